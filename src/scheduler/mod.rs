//! Monitor scheduler: one task per running source.

mod controller;
mod state;
mod worker;

pub use controller::{ForceSync, MonitorScheduler, SchedulerBuilder};
pub use state::{MonitorState, MonitorStats, MonitorStatus};
