//! In-memory fakes for [`RegistryClient`] and [`OrchestratorClient`], so
//! the reconciler's executor and the full sweep can be exercised
//! end-to-end without a live Redis or Kubernetes API server. Test-only.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use tokio_util::sync::CancellationToken;

use crate::config::TrainerConfig;
use crate::model::JobRecord;
use crate::orchestrator::{OrchestratorClient, WatchEvent};
use crate::registry::{RegistryClient, ScanCursor};
use crate::status::Status;
use crate::util::{OrchestratorError, RegistryError};

/// A `TrainerConfig` with every field populated plausibly, for tests
/// that need a config but don't care about its particulars.
pub fn test_cfg() -> TrainerConfig {
    TrainerConfig {
        tuning_image: "registry.example/trainer:latest".to_string(),
        target_namespace: "tuning".to_string(),
        tuning_entrypoint: vec!["python".to_string(), "/app/launch_training.py".to_string()],
        container_name: "train-conductor-training".to_string(),
        image_pull_secret: None,
        default_gpus: 1,
        job_time_limit: 0,
        reconcile_interval_secs: 30,
        registry_topic: "train_conductor.jobs".to_string(),
        registry_verify_tls: true,
        training_volumes: vec![crate::config::TrainingVolume {
            name: "checkpoints".to_string(),
            pvc_name: "ckpt-pvc".to_string(),
            mount_path: "/mnt/checkpoints".to_string(),
        }],
        #[cfg(feature = "metrics")]
        metrics_port: None,
        redis: eosin_common::args::RedisArgs {
            redis_host: "127.0.0.1".to_string(),
            redis_port: 6379,
            redis_username: None,
            redis_password: None,
            redis_proto: "redis".to_string(),
        },
    }
}

/// An in-memory `RegistryClient` backed by a `HashMap` keyed on job id.
#[derive(Default)]
pub struct FakeRegistry {
    records: Mutex<HashMap<String, JobRecord>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: JobRecord) -> Self {
        let registry = Self::new();
        registry.insert(record);
        registry
    }

    pub fn insert(&self, record: JobRecord) {
        self.records.lock().unwrap().insert(record.job_id.clone(), record);
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.records.lock().unwrap().get(job_id).cloned()
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn read_record(&self, job_id: &str) -> Result<Option<JobRecord>, RegistryError> {
        Ok(self.records.lock().unwrap().get(job_id).cloned())
    }

    async fn write_field(&self, job_id: &str, field: &str, value: &str) -> Result<(), RegistryError> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(job_id).ok_or_else(|| RegistryError::MalformedRecord {
            job_id: job_id.to_string(),
            reason: "no such record in fake registry".to_string(),
        })?;
        match field {
            "status" => record.status = value.parse().unwrap_or(Status::PlaceholderUnset),
            "deleted" => record.deleted = value == "1",
            "submission_timestamp" => record.submission_timestamp = Some(value.to_string()),
            "job_name" => record.job_name = Some(value.to_string()),
            "namespace" => record.namespace = Some(value.to_string()),
            "errors" => record.errors = Some(value.to_string()),
            other => panic!("fake registry asked to write unknown field '{other}'"),
        }
        Ok(())
    }

    async fn iterate_entries(
        &self,
        _cursor: ScanCursor,
    ) -> Result<(Vec<JobRecord>, ScanCursor), RegistryError> {
        let records = self.records.lock().unwrap();
        Ok((records.values().cloned().collect(), ScanCursor::default()))
    }

    async fn start_listener(
        &self,
        _cancel: CancellationToken,
        _tx: tokio::sync::mpsc::Sender<String>,
    ) -> Result<(), RegistryError> {
        Ok(())
    }
}

/// An in-memory `OrchestratorClient` backed by a `HashMap` keyed on Job
/// name. Tracks deletions so tests can assert on them directly.
#[derive(Default)]
pub struct FakeOrchestrator {
    jobs: Mutex<HashMap<String, Job>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(job: Job) -> Self {
        let orchestrator = Self::new();
        orchestrator.insert_job(job);
        orchestrator
    }

    pub fn insert_job(&self, job: Job) {
        let name = job.metadata.name.clone().expect("fake orchestrator job must be named");
        self.jobs.lock().unwrap().insert(name, job);
    }

    pub fn deleted_jobs(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn created_jobs(&self) -> Vec<String> {
        self.jobs.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl OrchestratorClient for FakeOrchestrator {
    async fn get_job(&self, job_name: &str) -> Result<Option<Job>, OrchestratorError> {
        Ok(self.jobs.lock().unwrap().get(job_name).cloned())
    }

    async fn list_jobs(&self) -> Result<(Vec<Job>, String), OrchestratorError> {
        Ok((self.jobs.lock().unwrap().values().cloned().collect(), "0".to_string()))
    }

    async fn watch_jobs(
        &self,
        _resource_version: String,
        _cancel: CancellationToken,
        _tx: tokio::sync::mpsc::Sender<WatchEvent>,
    ) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn create_job(&self, job: &Job) -> Result<(), OrchestratorError> {
        self.insert_job(job.clone());
        Ok(())
    }

    async fn delete_job(&self, job_name: &str) -> Result<(), OrchestratorError> {
        self.jobs.lock().unwrap().remove(job_name);
        self.deleted.lock().unwrap().push(job_name.to_string());
        Ok(())
    }

    async fn read_job_pod_logs(&self, _job_name: &str) -> Result<String, OrchestratorError> {
        Ok(String::new())
    }
}
