//! The full sweep: enumerates both sides, pairs records up with their
//! orchestrator job by `job_id` label, reconciles every pair (plus any
//! orchestrator-only orphans), and hands back a cursor the watch can
//! resume from.

use std::collections::HashMap;

use k8s_openapi::api::batch::v1::Job;

use crate::config::TrainerConfig;
use crate::naming::JOB_ID_LABEL;
use crate::orchestrator::OrchestratorClient;
use crate::reconcile::{execute, reconcile};
use crate::registry::RegistryClient;
use crate::util::SweepError;

/// The orchestrator resourceVersion a watch should resume at after this
/// sweep, so events that happened during the sweep aren't missed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceCursor(pub String);

fn job_id_label(job: &Job) -> Option<&str> {
    job.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(JOB_ID_LABEL))
        .map(String::as_str)
}

pub async fn full_reconcile(
    cfg: &TrainerConfig,
    orchestrator: &dyn OrchestratorClient,
    registry: &dyn RegistryClient,
) -> Result<ResourceCursor, SweepError> {
    let (jobs, resource_version) = orchestrator.list_jobs().await?;
    let mut by_job_id: HashMap<String, Job> = HashMap::new();
    for job in jobs {
        if let Some(id) = job_id_label(&job) {
            by_job_id.insert(id.to_string(), job);
        } else {
            tracing::warn!(
                job_name = ?job.metadata.name,
                "orchestrator job missing job_id label, skipping"
            );
        }
    }

    let records = registry.read_many_entries().await?;
    let mut reconciled = 0usize;
    for record in &records {
        let orch_job = by_job_id.remove(&record.job_id);
        let action = reconcile(Some(record), orch_job.as_ref());
        if let Err(e) = execute(&record.job_id, Some(record), action, cfg, orchestrator, registry).await {
            tracing::warn!(job_id = %record.job_id, error = %e, "reconcile failed during full sweep");
        }
        reconciled += 1;
    }

    // Whatever's left in `by_job_id` has no registry record at all.
    let orphan_count = by_job_id.len();
    for (job_id, job) in by_job_id {
        let action = reconcile(None, Some(&job));
        if let Err(e) = execute(&job_id, None, action, cfg, orchestrator, registry).await {
            tracing::warn!(job_id = %job_id, error = %e, "failed to reap orphaned orchestrator job");
        }
    }

    crate::util::metrics::record_sweep();
    tracing::info!(reconciled, orphan_count, "full sweep complete");
    Ok(ResourceCursor(resource_version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobRecord;
    use crate::naming::job_labels;
    use crate::status::Status;
    use crate::testutil::{test_cfg, FakeOrchestrator, FakeRegistry};
    use k8s_openapi::api::batch::v1::JobStatus as K8sJobStatus;
    use kube::api::ObjectMeta;

    fn labeled_job(name: &str, job_id: &str, succeeded: Option<i32>) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(job_labels(job_id)),
                ..Default::default()
            },
            spec: None,
            status: Some(K8sJobStatus {
                start_time: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                    chrono::Utc::now(),
                )),
                succeeded,
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn sweep_finalises_completed_job_and_reaps_unlabeled_orphan() {
        let mut record = JobRecord::new("job-1", Status::Running, "{}");
        record.job_name = Some("train-conductor-tuning-job.job-1".to_string());

        let completed_job = labeled_job("train-conductor-tuning-job.job-1", "job-1", Some(1));
        let orphan_job = labeled_job("train-conductor-tuning-job.stray", "stray", None);

        let orchestrator = FakeOrchestrator::new();
        orchestrator.insert_job(completed_job);
        orchestrator.insert_job(orphan_job);
        let registry = FakeRegistry::with_record(record);
        let cfg = test_cfg();

        full_reconcile(&cfg, &orchestrator, &registry).await.unwrap();

        let updated = registry.get("job-1").unwrap();
        assert_eq!(updated.status, Status::Completed);
        assert!(updated.deleted);

        let deleted = orchestrator.deleted_jobs();
        assert!(deleted.contains(&"train-conductor-tuning-job.job-1".to_string()));
        assert!(deleted.contains(&"train-conductor-tuning-job.stray".to_string()));
    }

    #[tokio::test]
    async fn sweep_materialises_queued_record_with_no_orchestrator_job() {
        let record = JobRecord::new("job-2", Status::Queued, "{}");

        let orchestrator = FakeOrchestrator::new();
        let registry = FakeRegistry::with_record(record);
        let cfg = test_cfg();

        full_reconcile(&cfg, &orchestrator, &registry).await.unwrap();

        let updated = registry.get("job-2").unwrap();
        assert_eq!(updated.status, Status::Pending);
        assert_eq!(
            orchestrator.created_jobs(),
            vec!["train-conductor-tuning-job.job-2".to_string()]
        );
    }

    #[tokio::test]
    async fn sweep_skips_orchestrator_job_missing_job_id_label() {
        let unlabeled = Job {
            metadata: ObjectMeta {
                name: Some("some-unrelated-job".to_string()),
                ..Default::default()
            },
            spec: None,
            status: None,
        };
        let orchestrator = FakeOrchestrator::with_job(unlabeled);
        let registry = FakeRegistry::new();
        let cfg = test_cfg();

        full_reconcile(&cfg, &orchestrator, &registry).await.unwrap();

        assert!(orchestrator.deleted_jobs().is_empty());
        assert_eq!(orchestrator.created_jobs(), vec!["some-unrelated-job".to_string()]);
    }
}
