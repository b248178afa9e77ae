//! Pulls pod logs for a job that just turned terminal, before it is
//! reaped, so operators have something to read after the Job's pods are
//! gone.

use crate::orchestrator::OrchestratorClient;
use crate::registry::RegistryClient;
use crate::util::CaptureError;

/// Captures logs for every pod labeled `job-name=<job_name>` and writes
/// them to the record's `errors` field. Called exactly once, right
/// before a newly-terminal job is reaped.
pub async fn capture(
    job_id: &str,
    job_name: &str,
    orchestrator: &dyn OrchestratorClient,
    registry: &dyn RegistryClient,
) -> Result<(), CaptureError> {
    let logs = orchestrator.read_job_pod_logs(job_name).await?;
    registry.write_field(job_id, "errors", &logs).await?;
    Ok(())
}
