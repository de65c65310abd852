//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the bridge.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Counters and gauges describing the bridge loop.
#[derive(Clone, Debug)]
pub struct BridgeMetrics {
    registry: SharedRegistry,
    connect_attempts: IntCounterVec,
    session_up: IntGauge,
    cycles_total: IntCounter,
    sensor_errors_total: IntCounter,
    write_failures: IntCounterVec,
    last_value: GaugeVec,
}

impl BridgeMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let connect_attempts = IntCounterVec::new(
            Opts::new(
                "meterlink_connect_attempts_total",
                "Session attempts by result (connected, failed)",
            ),
            &["result"],
        )?;
        registry.register(Box::new(connect_attempts.clone()))?;

        let session_up = IntGauge::with_opts(Opts::new(
            "meterlink_session_up",
            "Indicator (0/1) whether a resolved session is active",
        ))?;
        registry.register(Box::new(session_up.clone()))?;

        let cycles_total = IntCounter::with_opts(Opts::new(
            "meterlink_cycles_total",
            "Sampling cycles executed",
        ))?;
        registry.register(Box::new(cycles_total.clone()))?;

        let sensor_errors_total = IntCounter::with_opts(Opts::new(
            "meterlink_sensor_errors_total",
            "Cycles skipped because the latest reading was an error",
        ))?;
        registry.register(Box::new(sensor_errors_total.clone()))?;

        let write_failures = IntCounterVec::new(
            Opts::new(
                "meterlink_write_failures_total",
                "Failed variable writes by variable name",
            ),
            &["variable"],
        )?;
        registry.register(Box::new(write_failures.clone()))?;

        let last_value = GaugeVec::new(
            Opts::new(
                "meterlink_last_value",
                "Most recent scaled value written per variable",
            ),
            &["variable"],
        )?;
        registry.register(Box::new(last_value.clone()))?;

        Ok(Self {
            registry,
            connect_attempts,
            session_up,
            cycles_total,
            sensor_errors_total,
            write_failures,
            last_value,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_connect(&self, connected: bool) {
        let result = if connected { "connected" } else { "failed" };
        self.connect_attempts.with_label_values(&[result]).inc();
    }

    pub fn set_session_up(&self, up: bool) {
        self.session_up.set(if up { 1 } else { 0 });
    }

    pub fn inc_cycle(&self) {
        self.cycles_total.inc();
    }

    pub fn inc_sensor_error(&self) {
        self.sensor_errors_total.inc();
    }

    pub fn record_write(&self, variable: &str, value: f64, ok: bool) {
        if ok {
            self.last_value.with_label_values(&[variable]).set(value);
        } else {
            self.write_failures.with_label_values(&[variable]).inc();
        }
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_metrics_register_and_record() {
        let registry = new_registry();
        let metrics = BridgeMetrics::new(registry.clone()).unwrap();
        metrics.record_connect(false);
        metrics.record_connect(true);
        metrics.set_session_up(true);
        metrics.inc_cycle();
        metrics.record_write("AcVoltagePe", 229.5, true);
        metrics.record_write("AcCurrentPe", 0.0, false);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        assert!(names.contains(&"meterlink_connect_attempts_total".to_owned()));
        assert!(names.contains(&"meterlink_write_failures_total".to_owned()));
        assert_eq!(metrics.session_up.get(), 1);
        assert_eq!(metrics.cycles_total.get(), 1);
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = new_registry();
        BridgeMetrics::new(registry.clone()).unwrap();
        assert!(BridgeMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn handler_serves_text_exposition() {
        let registry = new_registry();
        let metrics = BridgeMetrics::new(registry.clone()).unwrap();
        metrics.inc_cycle();

        let response = metrics_handler(registry).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap();
        assert_eq!(content_type, prometheus::TEXT_FORMAT);
    }

    #[tokio::test]
    async fn exporter_binds_and_shuts_down() {
        let registry = new_registry();
        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(server.addr().port(), 0);
        server.shutdown().await.unwrap();
    }
}
