pub mod attempt_record;
pub mod queue_entry;

pub use attempt_record::AttemptRecord;
pub use queue_entry::QueueEntry;
