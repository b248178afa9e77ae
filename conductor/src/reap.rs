//! Background deletion of terminal orchestrator jobs and the
//! corresponding registry tombstone write.

use crate::orchestrator::OrchestratorClient;
use crate::registry::RegistryClient;
use crate::util::ReapError;

/// Deletes `job_name` with background propagation and marks the
/// registry record `deleted`. A failed delete is logged only - it is
/// not surfaced to the caller, matching the original implementation's
/// best-effort cleanup, and will be retried the next time this job id
/// is reconciled (the orchestrator job is still present, so the
/// decision table routes back here).
pub async fn reap(
    job_id: &str,
    job_name: &str,
    orchestrator: &dyn OrchestratorClient,
    registry: &dyn RegistryClient,
) -> Result<(), ReapError> {
    match orchestrator.delete_job(job_name).await {
        Ok(()) => {
            registry.write_field(job_id, "deleted", "1").await?;
        }
        Err(e) => {
            tracing::warn!(job_id, job_name, error = %e, "failed to delete orchestrator job");
        }
    }
    Ok(())
}
