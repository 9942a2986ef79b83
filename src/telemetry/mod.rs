pub mod backoff;
pub mod connectivity;
pub mod queue;
pub mod transport;

pub use backoff::RetryPolicy;
pub use connectivity::{Connectivity, ConnectivityMonitor, ConnectivityState};
pub use queue::{FlushReport, QueueConfig, QueueStats, TelemetryQueue};
pub use transport::{HttpTransport, Transport};
