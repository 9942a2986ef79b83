pub mod pending_records;

pub use pending_records::PendingSnapshot;
