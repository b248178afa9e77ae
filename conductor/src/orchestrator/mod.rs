pub mod kube_orchestrator;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;

use crate::util::OrchestratorError;

pub use kube_orchestrator::KubeOrchestrator;

/// One orchestrator-side event, as produced by [`OrchestratorClient::watch_jobs`].
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(Job),
    Modified(Job),
    Deleted(Job),
    /// The watch's resourceVersion has fallen out of the orchestrator's
    /// retained history (HTTP 410 Gone); the caller must run a full
    /// sweep and resume from its cursor.
    Expired,
}

/// The orchestrator contract: an imperative Kubernetes-Jobs API.
/// Modeled as a trait for the same reason [`crate::registry::RegistryClient`]
/// is - so the reconciler's decision table is tested without a live
/// cluster.
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    async fn get_job(&self, job_name: &str) -> Result<Option<Job>, OrchestratorError>;

    /// Lists every managed Job, returning the resourceVersion to resume
    /// a watch from.
    async fn list_jobs(&self) -> Result<(Vec<Job>, String), OrchestratorError>;

    /// Watches for changes starting at `resource_version`, delivering
    /// events on `tx` until cancelled or the watch expires.
    async fn watch_jobs(
        &self,
        resource_version: String,
        cancel: tokio_util::sync::CancellationToken,
        tx: tokio::sync::mpsc::Sender<WatchEvent>,
    ) -> Result<(), OrchestratorError>;

    async fn create_job(&self, job: &Job) -> Result<(), OrchestratorError>;

    /// Deletes with background propagation; tolerates the Job already
    /// being gone.
    async fn delete_job(&self, job_name: &str) -> Result<(), OrchestratorError>;

    /// Concatenates logs of every pod matching `job-name=<job_name>`,
    /// in list order.
    async fn read_job_pod_logs(&self, job_name: &str) -> Result<String, OrchestratorError>;
}
