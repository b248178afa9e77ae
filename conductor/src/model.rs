use serde::{Deserialize, Serialize};

use crate::status::Status;

/// The conductor's view of a registry entry, assembled field-by-field
/// from the raw key-value hash the registry stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub status: Status,
    pub parameters: String,
    pub deleted: bool,
    pub submission_timestamp: Option<String>,
    pub job_name: Option<String>,
    pub namespace: Option<String>,
    pub errors: Option<String>,
}

impl JobRecord {
    pub fn new(job_id: impl Into<String>, status: Status, parameters: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            parameters: parameters.into(),
            deleted: false,
            submission_timestamp: None,
            job_name: None,
            namespace: None,
            errors: None,
        }
    }

    /// The GPU count carried in `parameters`, if the caller has already
    /// parsed it out. Parsing itself lives in the materialiser, which
    /// is the only place that needs to look inside the opaque blob.
    pub fn num_gpus(&self) -> Option<u32> {
        serde_json::from_str::<serde_json::Value>(&self.parameters)
            .ok()
            .and_then(|v| v.get("num_gpus").and_then(|n| n.as_u64()))
            .map(|n| n as u32)
    }
}

/// The timestamp format the registry stores submission times in,
/// inherited from the original watcher (`strftime("%m/%d/%Y %H:%M:%S")`).
pub const SUBMISSION_TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

pub fn format_submission_timestamp(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format(SUBMISSION_TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_gpus_parsed_from_parameters() {
        let r = JobRecord::new("j1", Status::Queued, r#"{"num_gpus": 4}"#);
        assert_eq!(r.num_gpus(), Some(4));
    }

    #[test]
    fn num_gpus_absent_when_not_present() {
        let r = JobRecord::new("j1", Status::Queued, r#"{"lr": 0.1}"#);
        assert_eq!(r.num_gpus(), None);
    }

    #[test]
    fn submission_timestamp_format_matches_original() {
        let t = chrono::DateTime::parse_from_rfc3339("2026-07-28T12:34:56Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert_eq!(format_submission_timestamp(t), "07/28/2026 12:34:56");
    }
}
