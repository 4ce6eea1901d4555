pub mod memory;
pub mod notifier;
pub mod record_store;

pub use memory::InMemoryStore;
pub use notifier::{Notifier, ScheduleEvent, TracingNotifier};
pub use record_store::{RecordStore, SessionFilter, StoreResult};
