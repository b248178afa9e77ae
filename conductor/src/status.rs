use k8s_openapi::api::batch::v1::JobStatus as K8sJobStatus;
use serde::{Deserialize, Serialize};

/// The registry's status lattice for a tuning job.
///
/// `PlaceholderUnset` is what a freshly-written record carries before the
/// conductor has submitted anything; it is never produced by
/// [`map_status`], only ever set by the materialiser's caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    PlaceholderUnset,
    Queued,
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl Status {
    /// Membership test for the COMPLETED_STATES set.
    pub fn is_completed(self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Canceled)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::PlaceholderUnset => "PLACEHOLDER_UNSET",
            Status::Queued => "QUEUED",
            Status::Pending => "PENDING",
            Status::Running => "RUNNING",
            Status::Completed => "COMPLETED",
            Status::Failed => "FAILED",
            Status::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Status {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "QUEUED" => Status::Queued,
            "PENDING" => Status::Pending,
            "RUNNING" => Status::Running,
            "COMPLETED" => Status::Completed,
            "FAILED" => Status::Failed,
            "CANCELED" => Status::Canceled,
            _ => Status::PlaceholderUnset,
        })
    }
}

/// Maps a Kubernetes `Job`'s status block onto the registry's status
/// lattice. Pure and total; never returns `Pending` or `Canceled` -
/// those are registry-side-only states the orchestrator has no concept
/// of. Order matters: an unset `start_time` wins over everything else,
/// since the control plane hasn't even scheduled a pod yet.
pub fn map_status(status: &K8sJobStatus) -> Status {
    if status.start_time.is_none() {
        Status::Queued
    } else if status.succeeded.unwrap_or(0) >= 1 {
        Status::Completed
    } else if status.failed.unwrap_or(0) >= 1 {
        Status::Failed
    } else {
        Status::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> k8s_openapi::apimachinery::pkg::apis::meta::v1::Time {
        k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now())
    }

    fn status_with(succeeded: Option<i32>, failed: Option<i32>, active: Option<i32>) -> K8sJobStatus {
        K8sJobStatus {
            start_time: Some(started()),
            succeeded,
            failed,
            active,
            ..Default::default()
        }
    }

    #[test]
    fn succeeded_takes_priority() {
        let s = status_with(Some(1), Some(1), Some(1));
        assert_eq!(map_status(&s), Status::Completed);
    }

    #[test]
    fn failed_without_succeeded_is_failed() {
        let s = status_with(None, Some(1), Some(1));
        assert_eq!(map_status(&s), Status::Failed);
    }

    #[test]
    fn started_without_terminal_counts_is_running() {
        let s = status_with(None, None, Some(1));
        assert_eq!(map_status(&s), Status::Running);
    }

    #[test]
    fn unset_start_time_is_queued_regardless_of_counts() {
        let s = K8sJobStatus {
            start_time: None,
            succeeded: Some(1),
            ..Default::default()
        };
        assert_eq!(map_status(&s), Status::Queued);
    }

    #[test]
    fn started_with_no_terminal_counts_is_running() {
        let s = status_with(None, None, None);
        assert_eq!(map_status(&s), Status::Running);
    }

    #[test]
    fn completed_states_membership() {
        assert!(Status::Completed.is_completed());
        assert!(Status::Failed.is_completed());
        assert!(Status::Canceled.is_completed());
        assert!(!Status::Running.is_completed());
        assert!(!Status::Queued.is_completed());
        assert!(!Status::Pending.is_completed());
        assert!(!Status::PlaceholderUnset.is_completed());
    }
}
