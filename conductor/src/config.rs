use clap::Parser;
use eosin_common::args::RedisArgs;

use crate::util::Error;

/// One PVC-backed mount the training container expects to be present.
/// All three fields are required at materialisation time; an incomplete
/// entry in `--training-volume` fails a job's submission rather than the
/// process as a whole (see `MaterialiseError::InvalidVolumeSpec`).
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingVolume {
    pub name: String,
    pub pvc_name: String,
    pub mount_path: String,
}

impl std::str::FromStr for TrainingVolume {
    type Err = String;

    /// Parses `name:pvc_name:mount_path`, the shape a `--training-volume`
    /// flag (or `TRAIN_CONDUCTOR_TRAINING_VOLUMES`, comma-separated) is
    /// given in.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [name, pvc_name, mount_path] = parts.as_slice() else {
            return Err(format!(
                "expected name:pvc_name:mount_path, got '{s}'"
            ));
        };
        if name.is_empty() || pvc_name.is_empty() || mount_path.is_empty() {
            return Err(format!("empty field in training volume spec '{s}'"));
        }
        Ok(TrainingVolume {
            name: name.to_string(),
            pvc_name: pvc_name.to_string(),
            mount_path: mount_path.to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Reconciles the tuning job registry against Kubernetes Jobs", long_about = None)]
pub struct TrainerConfig {
    /// Container image used for every tuning Job this process submits.
    #[arg(long, env = "TRAIN_CONDUCTOR_TUNING_IMAGE")]
    pub tuning_image: String,

    /// Namespace tuning Jobs are created in. Required: there is no safe
    /// default namespace to fall back to.
    #[arg(long, env = "TRAIN_CONDUCTOR_TARGET_NAMESPACE")]
    pub target_namespace: String,

    /// Name of container entrypoint binary/command, split on whitespace.
    #[arg(
        long,
        env = "TRAIN_CONDUCTOR_ENTRYPOINT",
        default_value = "python /app/launch_training.py",
        value_delimiter = ' '
    )]
    pub tuning_entrypoint: Vec<String>,

    /// Name given to the single training container in the Job's pod spec.
    #[arg(long, env = "TRAIN_CONDUCTOR_CONTAINER_NAME", default_value = "train-conductor-training")]
    pub container_name: String,

    /// Optional name of an `imagePullSecrets` entry to attach.
    #[arg(long, env = "TRAIN_CONDUCTOR_IMAGE_PULL_SECRET")]
    pub image_pull_secret: Option<String>,

    /// GPU count used when a record's parameters don't specify one.
    #[arg(long, env = "TRAIN_CONDUCTOR_DEFAULT_GPUS", default_value_t = 1)]
    pub default_gpus: i64,

    /// Job-wide wall clock limit in seconds. `0` means unlimited, which
    /// is encoded by omitting `activeDeadlineSeconds` rather than
    /// setting it to zero (a k8s `Job` with `activeDeadlineSeconds: 0`
    /// is immediately past its deadline).
    #[arg(long, env = "TRAIN_CONDUCTOR_JOB_TIME_LIMIT", default_value_t = 0)]
    pub job_time_limit: i64,

    /// How often the full sweep runs, independent of watch/pub-sub
    /// traffic.
    #[arg(
        long,
        env = "TRAIN_CONDUCTOR_RECONCILE_INTERVAL_SECS",
        default_value_t = crate::util::DEFAULT_RECONCILE_INTERVAL.as_secs()
    )]
    pub reconcile_interval_secs: u64,

    /// Registry pub/sub topic new/changed job ids are announced on.
    #[arg(long, env = "TRAIN_CONDUCTOR_REGISTRY_TOPIC", default_value = "train_conductor.jobs")]
    pub registry_topic: String,

    /// Verify TLS certificates when talking to the registry. The
    /// original implementation hardcoded this off; here it defaults on
    /// and must be explicitly disabled.
    #[arg(long, env = "TRAIN_CONDUCTOR_REGISTRY_VERIFY_TLS", default_value_t = true)]
    pub registry_verify_tls: bool,

    /// One `name:pvc_name:mount_path` triple per PVC the training
    /// container needs mounted. May be repeated.
    #[arg(long = "training-volume", env = "TRAIN_CONDUCTOR_TRAINING_VOLUMES", value_delimiter = ',')]
    pub training_volumes: Vec<TrainingVolume>,

    #[cfg(feature = "metrics")]
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    #[command(flatten)]
    pub redis: RedisArgs,
}

impl TrainerConfig {
    /// Startup-time validation beyond what clap itself enforces. This is
    /// the only fatal error class in the process: a bad config means
    /// the daemon should refuse to start, not limp along and fail every
    /// reconcile.
    pub fn validate(&self) -> Result<(), Error> {
        if self.tuning_image.trim().is_empty() {
            return Err(Error::Config("tuning_image must not be empty".to_string()));
        }
        if self.target_namespace.trim().is_empty() {
            return Err(Error::Config("target_namespace must not be empty".to_string()));
        }
        if self.tuning_entrypoint.is_empty() {
            return Err(Error::Config("tuning_entrypoint must not be empty".to_string()));
        }
        if self.reconcile_interval_secs == 0 {
            return Err(Error::Config(
                "reconcile_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_volume_parses_triple() {
        let v: TrainingVolume = "checkpoints:ckpt-pvc:/mnt/checkpoints".parse().unwrap();
        assert_eq!(v.name, "checkpoints");
        assert_eq!(v.pvc_name, "ckpt-pvc");
        assert_eq!(v.mount_path, "/mnt/checkpoints");
    }

    #[test]
    fn training_volume_rejects_wrong_arity() {
        assert!("checkpoints:ckpt-pvc".parse::<TrainingVolume>().is_err());
    }

    #[test]
    fn training_volume_rejects_empty_field() {
        assert!(":ckpt-pvc:/mnt".parse::<TrainingVolume>().is_err());
    }

    #[test]
    fn validate_rejects_empty_target_namespace() {
        let mut c = crate::testutil::test_cfg();
        c.target_namespace = "  ".to_string();
        assert!(matches!(c.validate(), Err(Error::Config(_))));
    }
}
