use std::env;

use tracing::warn;

/// Engine-wide tunables. Severity thresholds and horizons are policy, not
/// constants; deployments override them through the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How many weeks a template application expands over.
    pub template_horizon_weeks: u32,
    /// Minimum flexibility score at which the generator accepts a
    /// conflicted placement instead of recording a shortfall.
    pub flexibility_threshold: i32,
    /// Hard cap on optimizer reshuffle iterations.
    pub max_optimizer_iterations: u32,
    /// How many alternative suggestions to attach per shortfall/conflict.
    pub suggestion_limit: usize,
    /// Step used when enumerating candidate start times inside a window.
    pub slot_increment_minutes: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            template_horizon_weeks: 12,
            flexibility_threshold: 70,
            max_optimizer_iterations: 50,
            suggestion_limit: 3,
            slot_increment_minutes: 30,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            template_horizon_weeks: read_env(
                "SCHEDULER_TEMPLATE_HORIZON_WEEKS",
                defaults.template_horizon_weeks,
            ),
            flexibility_threshold: read_env(
                "SCHEDULER_FLEXIBILITY_THRESHOLD",
                defaults.flexibility_threshold,
            ),
            max_optimizer_iterations: read_env(
                "SCHEDULER_MAX_OPTIMIZER_ITERATIONS",
                defaults.max_optimizer_iterations,
            ),
            suggestion_limit: read_env("SCHEDULER_SUGGESTION_LIMIT", defaults.suggestion_limit),
            slot_increment_minutes: read_env(
                "SCHEDULER_SLOT_INCREMENT_MINUTES",
                defaults.slot_increment_minutes,
            ),
        }
    }
}

fn read_env<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value, using default", key);
            default
        }),
        Err(_) => default,
    }
}
