//! Offline queue drain: connectivity, scheduling, and the drain pass itself.

pub mod connectivity;
pub mod drain;
pub mod scheduler;

pub use connectivity::{ConnectivityMonitor, ConnectivityProbe, HttpProbe, MonitorHandle};
pub use drain::{drain_once, DrainOutcome, DrainReport};
pub use scheduler::{BackoffPolicy, DrainScheduler, DrainSignal, SchedulerConfig, SchedulerHandle};
