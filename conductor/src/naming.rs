//! Deterministic names and labels derived from a registry `job_id`.

use std::collections::BTreeMap;

pub const APP_LABEL: &str = "app";
pub const APP_LABEL_VALUE: &str = "train-conductor-stack";
pub const JOB_ID_LABEL: &str = "job_id";

/// The Kubernetes `Job` name for a given registry job id.
pub fn job_name(job_id: &str) -> String {
    format!("{}-tuning-job.{job_id}", crate::util::MANAGER_NAME)
}

/// The label selector that pairs a `Job`'s auto-labelled Pods back to it.
pub fn pod_label_selector(job_name: &str) -> String {
    format!("job-name={job_name}")
}

pub fn job_labels(job_id: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(APP_LABEL.to_string(), APP_LABEL_VALUE.to_string());
    labels.insert(JOB_ID_LABEL.to_string(), job_id.to_string());
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_name_is_prefixed_and_deterministic() {
        assert_eq!(job_name("abc123"), "train-conductor-tuning-job.abc123");
        assert_eq!(job_name("abc123"), job_name("abc123"));
    }

    #[test]
    fn pod_selector_matches_k8s_job_name_auto_label() {
        assert_eq!(
            pod_label_selector("train-conductor-tuning-job.abc123"),
            "job-name=train-conductor-tuning-job.abc123"
        );
    }

    #[test]
    fn labels_carry_app_and_job_id() {
        let labels = job_labels("abc123");
        assert_eq!(labels.get(APP_LABEL).map(String::as_str), Some(APP_LABEL_VALUE));
        assert_eq!(labels.get(JOB_ID_LABEL).map(String::as_str), Some("abc123"));
    }
}
