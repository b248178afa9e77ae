//! The reconciler: a pure decision function plus a thin executor. Kept
//! apart so the decision table can be unit-tested with no registry or
//! orchestrator adapter in the loop at all, the way
//! `storage_operator`'s shard/cluster `determine_action` functions are
//! tested - except here the split is explicit rather than folded into
//! an `async fn` that also happens to do I/O.

use k8s_openapi::api::batch::v1::Job;

use crate::model::JobRecord;
use crate::naming::job_name as derive_job_name;
use crate::orchestrator::OrchestratorClient;
use crate::registry::RegistryClient;
use crate::status::{map_status, Status};
use crate::util::ReconcileError;

/// The effect(s) a single reconcile pass decided on. Each variant names
/// exactly what `execute` needs to perform it, nothing more.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Nothing to do; the two sides already agree.
    NoOp,
    /// Build and submit the orchestrator job for a never-submitted
    /// record.
    Materialise,
    /// Write the mapped (non-terminal) status back to the registry.
    UpdateStatus { new_status: Status },
    /// The job just went terminal: write the status, capture
    /// diagnostics, then reap - all in one pass, per the tie-break note
    /// below.
    Finalise { new_status: Status, job_name: String },
    /// The orchestrator job is already gone and the record has reached
    /// a terminal status but isn't marked `deleted` yet - just write
    /// the tombstone, no delete call to make.
    Settle,
    /// Delete an orchestrator job whose registry record is already
    /// marked `deleted`, without touching the registry again.
    Reap { job_name: String },
    /// An orchestrator job has no corresponding registry record at
    /// all. Deleted, but with no registry write to make - there is
    /// nothing to write to.
    ReapOrphan { job_name: String },
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::NoOp => "NoOp",
            Action::Materialise => "Materialise",
            Action::UpdateStatus { .. } => "UpdateStatus",
            Action::Finalise { .. } => "Finalise",
            Action::Settle => "Settle",
            Action::Reap { .. } => "Reap",
            Action::ReapOrphan { .. } => "ReapOrphan",
        }
    }
}

/// The decision table. Pure: no I/O, no clock reads beyond what's
/// already embedded in `record`/`orch_job`. First matching row wins:
/// orphan (no record) → orphan-job → quiescent (deleted, job gone) →
/// settle (terminal, job gone, not yet deleted) → launch (non-terminal,
/// job gone) → cancel (job live, status externally set to CANCELED) →
/// no-op (converged) → update/finalise (job live, mapped status
/// differs).
///
/// When the mapped status differs from the recorded one *and* the
/// mapped status is terminal, the registry write and the
/// capture+reap happen together as `Finalise` rather than as two
/// separate reconcile passes - a job that completed is never left
/// sitting with a stale non-terminal status just because diagnostic
/// capture hasn't run yet.
pub fn reconcile(record: Option<&JobRecord>, orch_job: Option<&Job>) -> Action {
    let (record, orch_job) = match (record, orch_job) {
        (None, None) => return Action::NoOp,
        (None, Some(job)) => {
            let job_name = job
                .metadata
                .name
                .clone()
                .unwrap_or_else(|| "<unknown>".to_string());
            return Action::ReapOrphan { job_name };
        }
        (Some(record), orch_job) => (record, orch_job),
    };

    let Some(orch_job) = orch_job else {
        // No orchestrator job observed for this id - the record alone
        // decides. `deleted` and `is_completed` are each terminal in
        // their own right; neither depends on whether this record was
        // ever materialised, so a record that was submitted, went
        // RUNNING, and then lost its orchestrator job out-of-band is
        // re-launched here rather than left stuck (invariant 1).
        return if record.deleted {
            Action::NoOp // Quiescent
        } else if record.status.is_completed() {
            Action::Settle
        } else {
            Action::Materialise // Launch
        };
    };

    let job_name = || {
        orch_job
            .metadata
            .name
            .clone()
            .unwrap_or_else(|| derive_job_name(&record.job_id))
    };

    if record.deleted {
        return Action::Reap { job_name: job_name() };
    }

    // An external actor set CANCELED directly on the record; the
    // orchestrator has no concept of that status and will never map to
    // it, so this has to be checked ahead of the mapped-status compare
    // below or a live job would just get its status overwritten with
    // whatever the orchestrator currently reports.
    if record.status == Status::Canceled {
        return Action::Reap { job_name: job_name() };
    }

    let Some(status) = orch_job.status.as_ref() else {
        return Action::NoOp;
    };

    let mapped = map_status(status);
    if mapped == record.status {
        return Action::NoOp;
    }

    if mapped.is_completed() {
        Action::Finalise {
            new_status: mapped,
            job_name: job_name(),
        }
    } else {
        Action::UpdateStatus { new_status: mapped }
    }
}

/// Performs the effect(s) `reconcile` decided on.
pub async fn execute(
    job_id: &str,
    record: Option<&JobRecord>,
    action: Action,
    cfg: &crate::config::TrainerConfig,
    orchestrator: &dyn OrchestratorClient,
    registry: &dyn RegistryClient,
) -> Result<(), ReconcileError> {
    crate::util::metrics::record_reconcile(action.label());
    match action {
        Action::NoOp => Ok(()),
        Action::Materialise => {
            let Some(record) = record else {
                return Ok(());
            };
            crate::materialise::materialise(job_id, record, cfg, orchestrator, registry).await?;
            Ok(())
        }
        Action::UpdateStatus { new_status } => {
            registry
                .write_field(job_id, "status", &new_status.to_string())
                .await?;
            Ok(())
        }
        Action::Finalise { new_status, job_name } => {
            registry
                .write_field(job_id, "status", &new_status.to_string())
                .await?;
            crate::diagnostics::capture(job_id, &job_name, orchestrator, registry).await?;
            crate::reap::reap(job_id, &job_name, orchestrator, registry).await?;
            Ok(())
        }
        Action::Settle => {
            registry.write_field(job_id, "deleted", "1").await?;
            Ok(())
        }
        Action::Reap { job_name } => {
            crate::reap::reap(job_id, &job_name, orchestrator, registry).await?;
            Ok(())
        }
        Action::ReapOrphan { job_name } => {
            orchestrator.delete_job(&job_name).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobStatus as K8sJobStatus;
    use kube::api::ObjectMeta;

    fn record(status: Status) -> JobRecord {
        let mut r = JobRecord::new("job-1", status, "{}");
        if !matches!(status, Status::PlaceholderUnset | Status::Queued) {
            r.job_name = Some("train-conductor-tuning-job.job-1".to_string());
        }
        r
    }

    fn orch_job(name: &str, succeeded: Option<i32>, failed: Option<i32>, active: Option<i32>) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: None,
            status: Some(K8sJobStatus {
                start_time: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                    chrono::Utc::now(),
                )),
                succeeded,
                failed,
                active,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn no_record_no_job_is_noop() {
        assert_eq!(reconcile(None, None), Action::NoOp);
    }

    #[test]
    fn orphan_job_is_reaped_without_registry_write() {
        let job = orch_job("train-conductor-tuning-job.stray", None, None, Some(1));
        let action = reconcile(None, Some(&job));
        assert_eq!(
            action,
            Action::ReapOrphan {
                job_name: "train-conductor-tuning-job.stray".to_string()
            }
        );
    }

    #[test]
    fn fresh_record_with_no_job_is_materialised() {
        let r = record(Status::Queued);
        assert_eq!(reconcile(Some(&r), None), Action::Materialise);
    }

    #[test]
    fn previously_submitted_non_terminal_record_whose_job_vanished_is_relaunched() {
        // Status is non-terminal and orch_job is confirmed absent - the
        // decision table doesn't care that `job_name` is already set,
        // only that the job needs to exist per invariant 1.
        let r = record(Status::Running);
        assert_eq!(reconcile(Some(&r), None), Action::Materialise);
    }

    #[test]
    fn terminal_record_with_no_job_and_not_yet_deleted_is_settled() {
        let r = record(Status::Completed);
        assert_eq!(reconcile(Some(&r), None), Action::Settle);
    }

    #[test]
    fn terminal_deleted_record_with_no_job_is_noop() {
        let mut r = record(Status::Completed);
        r.deleted = true;
        assert_eq!(reconcile(Some(&r), None), Action::NoOp);
    }

    #[test]
    fn deleted_record_with_live_job_is_reaped() {
        let mut r = record(Status::Completed);
        r.deleted = true;
        let job = orch_job("train-conductor-tuning-job.job-1", Some(1), None, None);
        assert_eq!(
            reconcile(Some(&r), Some(&job)),
            Action::Reap {
                job_name: "train-conductor-tuning-job.job-1".to_string()
            }
        );
    }

    #[test]
    fn running_job_updates_non_terminal_status() {
        let r = record(Status::Pending);
        let job = orch_job("train-conductor-tuning-job.job-1", None, None, Some(1));
        assert_eq!(
            reconcile(Some(&r), Some(&job)),
            Action::UpdateStatus {
                new_status: Status::Running
            }
        );
    }

    #[test]
    fn canceled_record_with_live_job_is_reaped_not_status_overwritten() {
        let r = record(Status::Canceled);
        let job = orch_job("train-conductor-tuning-job.job-1", None, None, Some(1));
        assert_eq!(
            reconcile(Some(&r), Some(&job)),
            Action::Reap {
                job_name: "train-conductor-tuning-job.job-1".to_string()
            }
        );
    }

    #[test]
    fn newly_succeeded_job_finalises_in_one_pass() {
        let r = record(Status::Running);
        let job = orch_job("train-conductor-tuning-job.job-1", Some(1), None, None);
        assert_eq!(
            reconcile(Some(&r), Some(&job)),
            Action::Finalise {
                new_status: Status::Completed,
                job_name: "train-conductor-tuning-job.job-1".to_string()
            }
        );
    }

    #[test]
    fn converged_terminal_status_is_noop() {
        let r = record(Status::Completed);
        let job = orch_job("train-conductor-tuning-job.job-1", Some(1), None, None);
        assert_eq!(reconcile(Some(&r), Some(&job)), Action::NoOp);
    }

    #[test]
    fn idempotent_on_repeated_calls() {
        let r = record(Status::Pending);
        let job = orch_job("train-conductor-tuning-job.job-1", None, None, Some(1));
        let first = reconcile(Some(&r), Some(&job));
        let second = reconcile(Some(&r), Some(&job));
        assert_eq!(first, second);
    }

    /// Drives a record through its whole lifecycle by hand-applying the
    /// registry writes each decided `Action` would have made, checking
    /// at every step that the recorded status only ever moves forward
    /// through QUEUED → PENDING → RUNNING → COMPLETED, never back, and
    /// that the pair settles into a fixed point once reaped.
    #[test]
    fn status_progresses_monotonically_to_a_fixed_point() {
        let rank = |s: Status| match s {
            Status::PlaceholderUnset => 0,
            Status::Queued => 1,
            Status::Pending => 2,
            Status::Running => 3,
            Status::Completed | Status::Failed | Status::Canceled => 4,
        };

        let mut r = record(Status::Queued);
        let mut last_rank = rank(r.status);

        // Launch: no job yet, materialise decided.
        assert_eq!(reconcile(Some(&r), None), Action::Materialise);
        r.status = Status::Pending; // what `materialise` would have written
        r.job_name = Some("train-conductor-tuning-job.job-1".to_string());
        assert!(rank(r.status) >= last_rank);
        last_rank = rank(r.status);

        // Job starts running.
        let job = orch_job("train-conductor-tuning-job.job-1", None, None, Some(1));
        assert_eq!(
            reconcile(Some(&r), Some(&job)),
            Action::UpdateStatus { new_status: Status::Running }
        );
        r.status = Status::Running;
        assert!(rank(r.status) >= last_rank);
        last_rank = rank(r.status);

        // Job completes: Finalise in one pass.
        let job = orch_job("train-conductor-tuning-job.job-1", Some(1), None, None);
        assert_eq!(
            reconcile(Some(&r), Some(&job)),
            Action::Finalise {
                new_status: Status::Completed,
                job_name: "train-conductor-tuning-job.job-1".to_string()
            }
        );
        r.status = Status::Completed;
        assert!(rank(r.status) >= last_rank);

        // Finalise's executor captures diagnostics then reaps, marking
        // `deleted`; from there on reconciling repeatedly is a no-op
        // fixed point regardless of how many times it runs.
        r.deleted = true;
        for _ in 0..3 {
            assert_eq!(reconcile(Some(&r), None), Action::NoOp);
        }
    }

    // The following exercise `execute` itself, against the in-memory
    // fakes in `crate::testutil`, rather than just the decision table -
    // this is where a bug in an effect (not just in which effect got
    // picked) would show up.

    use crate::testutil::{test_cfg, FakeOrchestrator, FakeRegistry};

    #[tokio::test]
    async fn execute_materialise_submits_job_and_advances_to_pending() {
        let r = record(Status::Queued);
        let orchestrator = FakeOrchestrator::new();
        let registry = FakeRegistry::with_record(r.clone());
        let cfg = test_cfg();

        let action = reconcile(Some(&r), None);
        assert_eq!(action, Action::Materialise);
        execute(&r.job_id, Some(&r), action, &cfg, &orchestrator, &registry)
            .await
            .unwrap();

        let updated = registry.get(&r.job_id).unwrap();
        assert_eq!(updated.status, Status::Pending);
        assert_eq!(
            updated.job_name.as_deref(),
            Some("train-conductor-tuning-job.job-1")
        );
        assert_eq!(
            orchestrator.created_jobs(),
            vec!["train-conductor-tuning-job.job-1".to_string()]
        );
    }

    #[tokio::test]
    async fn execute_cancel_reaps_job_and_marks_deleted() {
        let r = record(Status::Canceled);
        let job = orch_job("train-conductor-tuning-job.job-1", None, None, Some(1));
        let orchestrator = FakeOrchestrator::with_job(job.clone());
        let registry = FakeRegistry::with_record(r.clone());
        let cfg = test_cfg();

        let action = reconcile(Some(&r), Some(&job));
        assert_eq!(
            action,
            Action::Reap {
                job_name: "train-conductor-tuning-job.job-1".to_string()
            }
        );
        execute(&r.job_id, Some(&r), action, &cfg, &orchestrator, &registry)
            .await
            .unwrap();

        assert_eq!(
            orchestrator.deleted_jobs(),
            vec!["train-conductor-tuning-job.job-1".to_string()]
        );
        assert!(registry.get(&r.job_id).unwrap().deleted);
    }

    #[tokio::test]
    async fn execute_finalise_captures_logs_then_reaps() {
        let r = record(Status::Running);
        let job = orch_job("train-conductor-tuning-job.job-1", Some(1), None, None);
        let orchestrator = FakeOrchestrator::with_job(job.clone());
        let registry = FakeRegistry::with_record(r.clone());
        let cfg = test_cfg();

        let action = reconcile(Some(&r), Some(&job));
        assert_eq!(
            action,
            Action::Finalise {
                new_status: Status::Completed,
                job_name: "train-conductor-tuning-job.job-1".to_string()
            }
        );
        execute(&r.job_id, Some(&r), action, &cfg, &orchestrator, &registry)
            .await
            .unwrap();

        let updated = registry.get(&r.job_id).unwrap();
        assert_eq!(updated.status, Status::Completed);
        assert!(updated.deleted);
        assert!(updated.errors.is_some());
        assert_eq!(
            orchestrator.deleted_jobs(),
            vec!["train-conductor-tuning-job.job-1".to_string()]
        );
    }

    #[tokio::test]
    async fn execute_orphan_deletes_job_with_no_registry_write() {
        let job = orch_job("train-conductor-tuning-job.stray", None, None, Some(1));
        let orchestrator = FakeOrchestrator::with_job(job.clone());
        let registry = FakeRegistry::new();
        let cfg = test_cfg();

        let action = reconcile(None, Some(&job));
        assert_eq!(
            action,
            Action::ReapOrphan {
                job_name: "train-conductor-tuning-job.stray".to_string()
            }
        );
        execute("stray", None, action, &cfg, &orchestrator, &registry)
            .await
            .unwrap();

        assert_eq!(
            orchestrator.deleted_jobs(),
            vec!["train-conductor-tuning-job.stray".to_string()]
        );
        assert!(registry.get("stray").is_none());
    }
}
