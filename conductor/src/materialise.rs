//! Builds and submits the Kubernetes `Job` for a registry record that
//! has never been submitted.

use std::collections::BTreeMap;

use base64::Engine;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, LocalObjectReference, PersistentVolumeClaimVolumeSource, ResourceRequirements,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;

use crate::config::TrainerConfig;
use crate::model::{format_submission_timestamp, JobRecord};
use crate::naming::{job_labels, job_name};
use crate::orchestrator::OrchestratorClient;
use crate::registry::RegistryClient;
use crate::util::MaterialiseError;

const SUBMISSION_ENV_VAR: &str = "SFT_TRAINER_CONFIG_JSON_ENV_VAR";
const ALLOW_DOWNLOADS_ENV_VAR: &str = "ALLOW_DOWNLOADS";
const GPU_RESOURCE_KEY: &str = "nvidia.com/gpu";

/// Encodes a record's opaque `parameters` blob the way the training
/// container expects it on its environment: binary-serialised, then
/// base64-wrapped. The original implementation used Python's `pickle`
/// for the binary step; there is no idiomatic Rust pickle writer, and
/// nothing downstream of this conductor is being reimplemented in this
/// exercise, so `bincode` stands in as the binary serialisation format.
/// See DESIGN.md for the reasoning.
///
/// A record whose `parameters` isn't valid JSON doesn't block
/// submission: the parse failure is logged and an empty payload is
/// encoded in its place, the same way `JobRecord::num_gpus` degrades to
/// `None` rather than failing the whole record.
fn encode_submission_payload(job_id: &str, parameters: &str) -> Result<String, MaterialiseError> {
    let value: serde_json::Value = serde_json::from_str(parameters).unwrap_or_else(|e| {
        tracing::warn!(job_id, error = %e, "job parameters are not valid json, materialising with empty parameters");
        serde_json::Value::Null
    });
    let bytes = bincode::serde::encode_to_vec(&value, bincode::config::standard())
        .map_err(|e| MaterialiseError::PayloadEncoding(e.to_string()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn build_job_spec(
    job_id: &str,
    record: &JobRecord,
    cfg: &TrainerConfig,
) -> Result<Job, MaterialiseError> {
    for v in &cfg.training_volumes {
        if v.name.is_empty() || v.pvc_name.is_empty() || v.mount_path.is_empty() {
            return Err(MaterialiseError::InvalidVolumeSpec(format!(
                "volume '{}' missing a required field",
                v.name
            )));
        }
    }

    let payload = encode_submission_payload(job_id, &record.parameters)?;
    let gpus = record.num_gpus().unwrap_or(cfg.default_gpus as u32);

    let volumes: Vec<Volume> = cfg
        .training_volumes
        .iter()
        .map(|v| Volume {
            name: v.name.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: v.pvc_name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();

    let volume_mounts: Vec<VolumeMount> = cfg
        .training_volumes
        .iter()
        .map(|v| VolumeMount {
            name: v.name.clone(),
            mount_path: v.mount_path.clone(),
            ..Default::default()
        })
        .collect();

    let mut limits = BTreeMap::new();
    if gpus > 0 {
        limits.insert(GPU_RESOURCE_KEY.to_string(), Quantity(gpus.to_string()));
    }

    let container = Container {
        name: cfg.container_name.clone(),
        image: Some(cfg.tuning_image.clone()),
        command: Some(cfg.tuning_entrypoint.clone()),
        env: Some(vec![
            EnvVar {
                name: SUBMISSION_ENV_VAR.to_string(),
                value: Some(payload),
                value_from: None,
            },
            EnvVar {
                name: ALLOW_DOWNLOADS_ENV_VAR.to_string(),
                value: Some("true".to_string()),
                value_from: None,
            },
        ]),
        volume_mounts: Some(volume_mounts),
        resources: if limits.is_empty() {
            None
        } else {
            Some(ResourceRequirements {
                limits: Some(limits),
                ..Default::default()
            })
        },
        ..Default::default()
    };

    let image_pull_secrets = cfg.image_pull_secret.as_ref().map(|name| {
        vec![LocalObjectReference {
            name: name.clone(),
        }]
    });

    let active_deadline_seconds = if cfg.job_time_limit > 0 {
        Some(cfg.job_time_limit)
    } else {
        None
    };

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(job_name(job_id)),
            namespace: Some(cfg.target_namespace.clone()),
            labels: Some(job_labels(job_id)),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds,
            template: k8s_openapi::api::core::v1::PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(job_labels(job_id)),
                    ..Default::default()
                }),
                spec: Some(k8s_openapi::api::core::v1::PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    restart_policy: Some("Never".to_string()),
                    image_pull_secrets,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}

/// Builds and submits the Job for `record`, then records
/// `submission_timestamp`/`job_name`/`namespace`/`status=Pending` on
/// success. A 409 (already exists) is treated as success without
/// rewriting the registry fields - the next reconcile will observe the
/// already-running orchestrator job.
pub async fn materialise(
    job_id: &str,
    record: &JobRecord,
    cfg: &TrainerConfig,
    orchestrator: &dyn OrchestratorClient,
    registry: &dyn RegistryClient,
) -> Result<(), MaterialiseError> {
    let job = build_job_spec(job_id, record, cfg)?;
    let name = job_name(job_id);

    if orchestrator.get_job(&name).await?.is_some() {
        tracing::debug!(job_id, %name, "job already exists, skipping submission");
        return Ok(());
    }

    orchestrator.create_job(&job).await?;

    let now = format_submission_timestamp(chrono::Utc::now());
    registry.write_field(job_id, "submission_timestamp", &now).await?;
    registry.write_field(job_id, "job_name", &name).await?;
    registry
        .write_field(job_id, "namespace", &cfg.target_namespace)
        .await?;
    registry.write_field(job_id, "status", "PENDING").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;
    use crate::testutil::test_cfg as cfg;

    /// The original watcher (`watcher.py:267`) only attaches volumes
    /// when `training_volumes` is configured; it doesn't treat an empty
    /// list as an error. A deployment with no PVC mounts still submits a
    /// Job, just with empty `volumes`/`volumeMounts`.
    #[test]
    fn tolerates_no_training_volumes_configured() {
        let mut c = cfg();
        c.training_volumes.clear();
        let record = JobRecord::new("j1", Status::Queued, "{}");
        let job = build_job_spec("j1", &record, &c).unwrap();
        let spec = job.spec.unwrap();
        let pod_spec = spec.template.spec.unwrap();
        assert_eq!(pod_spec.volumes, Some(Vec::new()));
        assert_eq!(pod_spec.containers[0].volume_mounts, Some(Vec::new()));
    }

    #[test]
    fn rejects_incomplete_training_volume_entry() {
        let mut c = cfg();
        c.training_volumes[0].pvc_name.clear();
        let record = JobRecord::new("j1", Status::Queued, "{}");
        let err = build_job_spec("j1", &record, &c).unwrap_err();
        assert!(matches!(err, MaterialiseError::InvalidVolumeSpec(_)));
    }

    #[test]
    fn zero_time_limit_omits_active_deadline() {
        let c = cfg();
        let record = JobRecord::new("j1", Status::Queued, "{}");
        let job = build_job_spec("j1", &record, &c).unwrap();
        assert_eq!(job.spec.unwrap().active_deadline_seconds, None);
    }

    #[test]
    fn nonzero_time_limit_is_passed_through() {
        let mut c = cfg();
        c.job_time_limit = 3600;
        let record = JobRecord::new("j1", Status::Queued, "{}");
        let job = build_job_spec("j1", &record, &c).unwrap();
        assert_eq!(job.spec.unwrap().active_deadline_seconds, Some(3600));
    }

    #[test]
    fn backoff_limit_is_always_zero() {
        let c = cfg();
        let record = JobRecord::new("j1", Status::Queued, "{}");
        let job = build_job_spec("j1", &record, &c).unwrap();
        assert_eq!(job.spec.unwrap().backoff_limit, Some(0));
    }

    #[test]
    fn gpu_count_prefers_parameters_over_default() {
        let c = cfg();
        let record = JobRecord::new("j1", Status::Queued, r#"{"num_gpus": 8}"#);
        let job = build_job_spec("j1", &record, &c).unwrap();
        let spec = job.spec.unwrap();
        let container = &spec.template.spec.unwrap().containers[0];
        let limits = container.resources.as_ref().unwrap().limits.as_ref().unwrap();
        assert_eq!(limits.get(GPU_RESOURCE_KEY), Some(&Quantity("8".to_string())));
    }

    #[test]
    fn payload_roundtrips_through_bincode_and_base64() {
        let encoded = encode_submission_payload("j1", r#"{"lr": 0.01}"#).unwrap();
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        let (value, _): (serde_json::Value, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        assert_eq!(value["lr"], 0.01);
    }

    /// Malformed `parameters` degrades to an empty payload rather than
    /// failing materialisation outright - a record with a corrupt blob
    /// must still get a Job submitted for it.
    #[test]
    fn invalid_json_parameters_degrades_to_null_payload() {
        let encoded = encode_submission_payload("j1", "not json").unwrap();
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        let (value, _): (serde_json::Value, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        assert_eq!(value, serde_json::Value::Null);
    }

    #[test]
    fn build_job_spec_succeeds_despite_corrupt_parameters() {
        let c = cfg();
        let record = JobRecord::new("j1", Status::Queued, "{not valid json");
        assert!(build_job_spec("j1", &record, &c).is_ok());
    }
}
