pub mod event;
pub mod records;
pub mod source;

pub use event::{CommandResult, CommandStatus, Envelope, Event, Payload};
pub use records::{CallRecord, LocationFix, MessageFolder, MessageRecord, UsageRecord};
pub use source::{Source, UnknownSource};
