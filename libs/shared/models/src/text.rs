use serde::{Deserialize, Serialize};

/// Display language for user-facing text. Always passed explicitly at
/// formatting boundaries; the engine holds no ambient language state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Locale {
    En,
    Ar,
}

/// A user-facing label carried in both supported languages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BilingualText {
    pub en: String,
    pub ar: String,
}

impl BilingualText {
    pub fn new(en: impl Into<String>, ar: impl Into<String>) -> Self {
        Self {
            en: en.into(),
            ar: ar.into(),
        }
    }

    pub fn localized(&self, locale: Locale) -> &str {
        match locale {
            Locale::En => &self.en,
            Locale::Ar => &self.ar,
        }
    }
}
