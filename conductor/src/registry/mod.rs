pub mod redis_registry;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::model::JobRecord;
use crate::util::RegistryError;

pub use redis_registry::RedisRegistry;

/// A cursor into a full scan of the registry's job records, used to
/// resume `iterate_entries` across calls without rescanning entries
/// already paired off in the same sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCursor(pub u64);

impl ScanCursor {
    pub fn is_done(self) -> bool {
        self.0 == 0
    }
}

/// The registry contract: a declarative key-value store of job records,
/// addressable by id, with a pub/sub channel announcing changes.
///
/// Modeled as a trait so the reconciler and event loop can be exercised
/// against an in-memory fake in tests, the way the rest of this crate's
/// decision logic never touches a live adapter in `#[cfg(test)]`.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn read_record(&self, job_id: &str) -> Result<Option<JobRecord>, RegistryError>;

    async fn write_field(&self, job_id: &str, field: &str, value: &str) -> Result<(), RegistryError>;

    /// Scans one page of job ids starting at `cursor`, returning the
    /// records found and the cursor to resume at (zero when the scan
    /// has wrapped around).
    async fn iterate_entries(
        &self,
        cursor: ScanCursor,
    ) -> Result<(Vec<JobRecord>, ScanCursor), RegistryError>;

    /// Reads every record the registry currently holds. Used by the
    /// full sweep; backed by repeated `iterate_entries` calls.
    async fn read_many_entries(&self) -> Result<Vec<JobRecord>, RegistryError> {
        let mut all = Vec::new();
        let mut cursor = ScanCursor::default();
        loop {
            let (page, next) = self.iterate_entries(cursor).await?;
            all.extend(page);
            if next.is_done() {
                break;
            }
            cursor = next;
        }
        Ok(all)
    }

    /// Subscribes to the registry's change-announcement channel,
    /// sending each announced job id on `tx` until `cancel` fires.
    async fn start_listener(
        &self,
        cancel: CancellationToken,
        tx: tokio::sync::mpsc::Sender<String>,
    ) -> Result<(), RegistryError>;
}
