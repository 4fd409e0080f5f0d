//! Chatcord reminders: per-user storage and a heap-driven delivery loop.

pub mod scheduler;
pub mod store;
pub mod types;

pub use scheduler::{Notifier, ReminderScheduler, SchedulerConfig};
pub use store::ReminderStore;
pub use types::{ReminderError, ReminderRecord};
