use std::time::Duration;

pub mod colors;
mod error;
#[cfg(feature = "metrics")]
pub mod metrics;

#[cfg(not(feature = "metrics"))]
pub mod metrics {
    pub fn record_reconcile(_action: &str) {}
    pub fn record_sweep() {}
}

pub use error::*;

/// Interval the event loop's periodic full sweep fires at when no
/// override is configured.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Name this process identifies itself with in logs and owner metadata.
pub const MANAGER_NAME: &str = "train-conductor";
