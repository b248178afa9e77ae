//! Reconciliation metrics, exposed on a small raw `hyper` server when the
//! `metrics` feature is enabled (matches the `prometheus`/`hyper`
//! dependencies the operator this crate was grown from carries, rather
//! than the `axum`-based HTTP metrics middleware the rest of the
//! workspace uses for actual web services - this daemon serves nothing
//! else over HTTP).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::OnceLock;

use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, IntCounter, IntCounterVec, Registry, TextEncoder};
use tokio::net::TcpListener;

pub struct ReconcilerMetrics {
    registry: Registry,
    reconcile_total: IntCounter,
    action_total: IntCounterVec,
    sweep_total: IntCounter,
}

impl ReconcilerMetrics {
    pub fn new(subsystem: &str) -> Self {
        let registry = Registry::new();
        let reconcile_total = IntCounter::with_opts(prometheus::opts!(
            format!("{subsystem}_reconcile_total"),
            "Number of reconcile invocations drained from the work queue"
        ))
        .unwrap();
        let action_total = IntCounterVec::new(
            prometheus::opts!(
                format!("{subsystem}_action_total"),
                "Number of times each action was decided and executed"
            ),
            &["action"],
        )
        .unwrap();
        let sweep_total = IntCounter::with_opts(prometheus::opts!(
            format!("{subsystem}_sweep_total"),
            "Number of full sweeps completed"
        ))
        .unwrap();
        registry.register(Box::new(reconcile_total.clone())).unwrap();
        registry.register(Box::new(action_total.clone())).unwrap();
        registry.register(Box::new(sweep_total.clone())).unwrap();
        Self {
            registry,
            reconcile_total,
            action_total,
            sweep_total,
        }
    }

    fn gather(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .expect("encode prometheus metrics");
        buf
    }
}

static METRICS: OnceLock<ReconcilerMetrics> = OnceLock::new();

/// Installs the process-wide metrics instance. Called once from `main`;
/// a second call is a no-op, since only one `ReconcilerMetrics` ever
/// makes sense per process.
pub fn install(metrics: ReconcilerMetrics) {
    let _ = METRICS.set(metrics);
}

pub fn record_reconcile(action: &str) {
    if let Some(m) = METRICS.get() {
        m.reconcile_total.inc();
        m.action_total.with_label_values(&[action]).inc();
    }
}

pub fn record_sweep() {
    if let Some(m) = METRICS.get() {
        m.sweep_total.inc();
    }
}

pub async fn serve(port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind metrics listener");
            return;
        }
    };
    tracing::info!(%addr, "metrics server listening");
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "metrics accept failed");
                continue;
            }
        };
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req: Request<hyper::body::Incoming>| handle(req));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "metrics connection closed");
            }
        });
    }
}

async fn handle(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<http_body_util::Full<Bytes>>, Infallible> {
    let body = match req.uri().path() {
        "/metrics" => METRICS.get().map(|m| m.gather()).unwrap_or_default(),
        "/healthz" | "/readyz" => b"ok".to_vec(),
        _ => b"not found".to_vec(),
    };
    Ok(Response::new(http_body_util::Full::new(Bytes::from(body))))
}
