use async_trait::async_trait;
use futures::TryStreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, LogParams, PostParams, PropagationPolicy, WatchParams};
use kube::core::WatchEvent as KubeWatchEvent;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;

use crate::naming::pod_label_selector;
use crate::util::OrchestratorError;

use super::{OrchestratorClient, WatchEvent};

/// Orchestrator driver backed by a real Kubernetes API server. Uses the
/// low-level `Api::watch` (resourceVersion cursor, manual 410 handling)
/// rather than `kube::runtime::watcher`/`Controller` - those assume the
/// watched type is the CRD a controller owns, which doesn't hold here:
/// the registry side of this reconciliation has no Kubernetes
/// representation at all.
pub struct KubeOrchestrator {
    jobs: Api<Job>,
    pods: Api<Pod>,
    namespace: String,
}

impl KubeOrchestrator {
    pub async fn try_new(namespace: &str) -> Result<Self, OrchestratorError> {
        let client = Client::try_default().await?;
        Ok(Self::from_client(client, namespace))
    }

    pub fn from_client(client: Client, namespace: &str) -> Self {
        Self {
            jobs: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl OrchestratorClient for KubeOrchestrator {
    async fn get_job(&self, job_name: &str) -> Result<Option<Job>, OrchestratorError> {
        match self.jobs.get(job_name).await {
            Ok(job) => Ok(Some(job)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_jobs(&self) -> Result<(Vec<Job>, String), OrchestratorError> {
        let list = self.jobs.list(&ListParams::default()).await?;
        let resource_version = list.metadata.resource_version.clone().unwrap_or_default();
        Ok((list.items, resource_version))
    }

    async fn watch_jobs(
        &self,
        resource_version: String,
        cancel: CancellationToken,
        tx: tokio::sync::mpsc::Sender<WatchEvent>,
    ) -> Result<(), OrchestratorError> {
        let wp = WatchParams::default();
        let mut stream = match self.jobs.watch(&wp, &resource_version).await {
            Ok(s) => s.boxed(),
            Err(kube::Error::Api(ae)) if ae.code == 410 => {
                let _ = tx.send(WatchEvent::Expired).await;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = stream.try_next() => {
                    match next {
                        Ok(Some(event)) => {
                            let mapped = match event {
                                KubeWatchEvent::Added(job) => Some(WatchEvent::Added(job)),
                                KubeWatchEvent::Modified(job) => Some(WatchEvent::Modified(job)),
                                KubeWatchEvent::Deleted(job) => Some(WatchEvent::Deleted(job)),
                                KubeWatchEvent::Bookmark(_) => None,
                                KubeWatchEvent::Error(e) if e.code == 410 => {
                                    let _ = tx.send(WatchEvent::Expired).await;
                                    return Ok(());
                                }
                                KubeWatchEvent::Error(e) => {
                                    return Err(OrchestratorError::InvalidJob(e.message));
                                }
                            };
                            if let Some(event) = mapped
                                && tx.send(event).await.is_err()
                            {
                                return Ok(());
                            }
                        }
                        Ok(None) => return Ok(()),
                        Err(kube::Error::Api(ae)) if ae.code == 410 => {
                            let _ = tx.send(WatchEvent::Expired).await;
                            return Ok(());
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }

    async fn create_job(&self, job: &Job) -> Result<(), OrchestratorError> {
        match self.jobs.create(&PostParams::default(), job).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_job(&self, job_name: &str) -> Result<(), OrchestratorError> {
        let dp = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        match self.jobs.delete(job_name, &dp).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_job_pod_logs(&self, job_name: &str) -> Result<String, OrchestratorError> {
        let selector = pod_label_selector(job_name);
        let lp = ListParams::default().labels(&selector);
        let pod_list = self.pods.list(&lp).await.map_err(|e| {
            tracing::warn!(namespace = %self.namespace, job_name, error = %e, "failed to list pods for job");
            OrchestratorError::from(e)
        })?;
        let mut out = String::new();
        for pod in &pod_list.items {
            let Some(name) = pod.metadata.name.as_deref() else {
                continue;
            };
            match self.pods.logs(name, &LogParams::default()).await {
                Ok(log) => out.push_str(&log),
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => {
                    tracing::warn!(
                        namespace = %self.namespace,
                        job_name,
                        pod = name,
                        error = %e,
                        "failed to read pod logs"
                    );
                    return Err(e.into());
                }
            }
        }
        Ok(out)
    }
}

trait BoxedStreamExt: futures::Stream + Sized {
    fn boxed<'a>(self) -> std::pin::Pin<Box<dyn futures::Stream<Item = Self::Item> + Send + 'a>>
    where
        Self: Send + 'a,
    {
        Box::pin(self)
    }
}

impl<T: futures::Stream + Sized> BoxedStreamExt for T {}
