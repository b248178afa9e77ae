use std::str::FromStr;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::{AsyncCommands, ConnectionAddr, IntoConnectionInfo};
use tokio_util::sync::CancellationToken;

use crate::config::TrainerConfig;
use crate::model::JobRecord;
use crate::status::Status;
use crate::util::RegistryError;

use super::{RegistryClient, ScanCursor};

const KEY_PREFIX: &str = "job:";
const SCAN_PAGE_SIZE: usize = 200;

fn record_key(job_id: &str) -> String {
    format!("{KEY_PREFIX}{job_id}")
}

fn job_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(KEY_PREFIX)
}

/// Registry driver backed by Redis: one hash per job under `job:<id>`,
/// plus a pub/sub channel announcing ids that changed. Mirrors
/// `eosin_common::redis`'s pool/pubsub split: a pooled connection for
/// ordinary reads and writes, a dedicated raw connection for
/// subscriptions.
pub struct RedisRegistry {
    pool: Pool,
    redis_url: String,
    topic: String,
}

impl RedisRegistry {
    pub async fn connect(cfg: &TrainerConfig) -> Result<Self, RegistryError> {
        let redis_url = cfg.redis.url();
        let mut connection_info =
            redis_url
                .as_str()
                .into_connection_info()
                .map_err(|e| RegistryError::MalformedRecord {
                    job_id: String::new(),
                    reason: format!("malformed redis url: {e}"),
                })?;
        // `registry_verify_tls = false` is the escape hatch for self-signed
        // registry deployments; it only has an effect over `rediss://`.
        if !cfg.registry_verify_tls {
            if let ConnectionAddr::TcpTls { host, port, .. } = connection_info.addr {
                connection_info.addr = ConnectionAddr::TcpTls {
                    host,
                    port,
                    insecure: true,
                    tls_params: None,
                };
            }
        }
        let pool = Config {
            url: None,
            connection: Some(connection_info),
            pool: None,
        }
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| RegistryError::MalformedRecord {
            job_id: String::new(),
            reason: format!("failed to build redis pool: {e}"),
        })?;
        // Validate connectivity up front, the way `init_redis` pings
        // before handing the pool back.
        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self {
            pool,
            redis_url,
            topic: cfg.registry_topic.clone(),
        })
    }

    fn record_from_fields(job_id: &str, fields: std::collections::HashMap<String, String>) -> JobRecord {
        JobRecord {
            job_id: job_id.to_string(),
            status: fields
                .get("status")
                .and_then(|s| Status::from_str(s).ok())
                .unwrap_or(Status::PlaceholderUnset),
            parameters: fields.get("parameters").cloned().unwrap_or_else(|| "{}".to_string()),
            deleted: fields.get("deleted").map(|v| v == "1").unwrap_or(false),
            submission_timestamp: fields.get("submission_timestamp").cloned(),
            job_name: fields.get("job_name").cloned(),
            namespace: fields.get("namespace").cloned(),
            errors: fields.get("errors").cloned(),
        }
    }
}

#[async_trait]
impl RegistryClient for RedisRegistry {
    async fn read_record(&self, job_id: &str) -> Result<Option<JobRecord>, RegistryError> {
        let mut conn = self.pool.get().await?;
        let fields: std::collections::HashMap<String, String> =
            conn.hgetall(record_key(job_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::record_from_fields(job_id, fields)))
    }

    async fn write_field(&self, job_id: &str, field: &str, value: &str) -> Result<(), RegistryError> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.hset(record_key(job_id), field, value).await?;
        Ok(())
    }

    async fn iterate_entries(
        &self,
        cursor: ScanCursor,
    ) -> Result<(Vec<JobRecord>, ScanCursor), RegistryError> {
        let mut conn = self.pool.get().await?;
        let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor.0)
            .arg("MATCH")
            .arg(format!("{KEY_PREFIX}*"))
            .arg("COUNT")
            .arg(SCAN_PAGE_SIZE)
            .query_async(&mut conn)
            .await?;

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(job_id) = job_id_from_key(&key) else {
                continue;
            };
            let fields: std::collections::HashMap<String, String> = conn.hgetall(&key).await?;
            if fields.is_empty() {
                continue;
            }
            records.push(Self::record_from_fields(job_id, fields));
        }
        Ok((records, ScanCursor(next_cursor)))
    }

    async fn start_listener(
        &self,
        cancel: CancellationToken,
        tx: tokio::sync::mpsc::Sender<String>,
    ) -> Result<(), RegistryError> {
        loop {
            let client = redis::Client::open(self.redis_url.as_str())?;
            let mut pubsub = client.get_async_pubsub().await?;
            pubsub.subscribe(&self.topic).await?;
            let mut messages = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    msg = futures::StreamExt::next(&mut messages) => {
                        match msg {
                            None => break,
                            Some(msg) => {
                                if let Ok(job_id) = msg.get_payload::<String>() {
                                    if tx.send(job_id).await.is_err() {
                                        return Ok(());
                                    }
                                }
                            }
                        }
                    }
                }
            }
            tracing::warn!("registry pub/sub connection dropped, reconnecting");
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
    }
}
