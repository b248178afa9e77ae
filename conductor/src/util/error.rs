#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("failed to materialise job: {0}")]
    Materialise(#[from] MaterialiseError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("redis error: {source}")]
    Redis {
        #[from]
        source: redis::RedisError,
    },

    #[error("redis pool error: {source}")]
    Pool {
        #[from]
        source: deadpool_redis::PoolError,
    },

    #[error("malformed record for job {job_id}: {reason}")]
    MalformedRecord { job_id: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("watch stream expired (resourceVersion too old)")]
    WatchExpired,

    #[error("invalid job object: {0}")]
    InvalidJob(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MaterialiseError {
    #[error("training volume spec invalid: {0}")]
    InvalidVolumeSpec(String),

    #[error("failed to encode submission payload: {0}")]
    PayloadEncoding(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReapError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Materialise(#[from] MaterialiseError),

    #[error(transparent)]
    Reap(#[from] ReapError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}
