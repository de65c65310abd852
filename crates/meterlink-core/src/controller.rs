//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Connect, resolve, and sample loop driving the bridge."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use meterlink_common::BridgeConfig;
use meterlink_logging::{
    bridge_info, bridge_warn, log_lifecycle_event, LifecycleEvent, LogContext, SystemEventOutcome,
};
use meterlink_metrics::BridgeMetrics;
use meterlink_sensor::{Acquisition, LatestReading, SensorSource};
use meterlink_ua::{
    parse_node_id, NodeId, NodeResolver, ResolvedNodes, SessionConnector, UaSession, ValueWriter,
    WriteResult,
};
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{BridgeError, Result};
use crate::retry::RetryPolicy;
use crate::scaling::{snapshot, ScalingFactors, VariableMap};
use crate::state::BridgeState;

/// A session whose target variables have been resolved.
struct ActiveSession {
    session: Arc<dyn UaSession>,
    nodes: ResolvedNodes,
}

enum SamplingExit {
    Cancelled,
    SessionLost,
}

/// Drives one meter into one OPC UA channel until cancelled or until the
/// connection budget is exhausted.
pub struct BridgeController {
    connector: Arc<dyn SessionConnector>,
    root: NodeId,
    channel_path: Vec<String>,
    variables: VariableMap,
    writer: ValueWriter,
    scales: ScalingFactors,
    retry: RetryPolicy,
    acquisition_period: Duration,
    sample_interval: Duration,
    startup_delay: Duration,
    log_values: bool,
    log_every_n: u64,
    metrics: Option<BridgeMetrics>,
    state: watch::Sender<BridgeState>,
}

impl BridgeController {
    pub fn new(config: &BridgeConfig, connector: Arc<dyn SessionConnector>) -> Result<Self> {
        let root =
            parse_node_id(&config.opcua.machine_root_nodeid).map_err(BridgeError::InvalidRootNode)?;
        let variables = VariableMap::positional(&config.opcua.variables)?;
        let (state, _) = watch::channel(BridgeState::Disconnected);
        Ok(Self {
            connector,
            root,
            channel_path: config.opcua.channel_path.clone(),
            writer: ValueWriter::new(variables.names()),
            variables,
            scales: ScalingFactors::from(&config.scales),
            retry: RetryPolicy::from_config(&config.opcua),
            acquisition_period: config.pzem.read_interval,
            sample_interval: config.timing.sample_interval,
            startup_delay: config.timing.startup_delay,
            log_values: config.application.log_values,
            log_every_n: u64::from(config.application.log_values_every_n.max(1)),
            metrics: None,
            state,
        })
    }

    pub fn with_metrics(mut self, metrics: BridgeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Subscribe to state transitions.
    pub fn state(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Run until `cancel` fires (`Ok`) or no session can be established
    /// within the retry budget (`ConnectExhausted`).
    ///
    /// The source is moved into a background acquisition task; the loop here
    /// only ever sees the newest published reading.
    pub async fn run(
        &self,
        source: Box<dyn SensorSource>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let device = source.describe().to_owned();
        let acquisition_cancel = cancel.child_token();
        let acquisition =
            Acquisition::spawn(source, self.acquisition_period, acquisition_cancel.clone());
        let mut latest = acquisition.latest();

        self.await_first_reading(&mut latest, &cancel).await;
        let outcome = self.drive(&latest, &cancel, &device).await;

        acquisition_cancel.cancel();
        let published = acquisition.join().await;
        self.set_state(BridgeState::Stopped);
        info!(published, ok = outcome.is_ok(), "bridge stopped");
        outcome
    }

    async fn await_first_reading(&self, latest: &mut LatestReading, cancel: &CancellationToken) {
        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            waited = tokio::time::timeout(self.startup_delay, latest.first()) => waited,
        };
        match waited {
            Ok(Some(reading)) => debug!(status = %reading.status, "first reading available"),
            Ok(None) => bridge_warn!("acquisition ended before the first reading"),
            Err(_) => bridge_warn!(
                "no reading within {:?}; starting without one",
                self.startup_delay
            ),
        }
    }

    async fn drive(
        &self,
        latest: &LatestReading,
        cancel: &CancellationToken,
        device: &str,
    ) -> Result<()> {
        let mut cycle = 0u64;
        loop {
            let Some(active) = self.establish(cancel, device).await? else {
                return Ok(());
            };
            let exit = self
                .sample(&active, latest, cancel, device, &mut cycle)
                .await;
            self.close(active.session.as_ref(), device).await;
            match exit {
                SamplingExit::Cancelled => return Ok(()),
                SamplingExit::SessionLost => {
                    self.set_state(BridgeState::Disconnected);
                }
            }
        }
    }

    /// Connect and resolve under one attempt budget. `Ok(None)` means cancelled.
    async fn establish(
        &self,
        cancel: &CancellationToken,
        device: &str,
    ) -> Result<Option<ActiveSession>> {
        let endpoint = self.connector.endpoint();
        let mut last_error = String::new();

        for attempt in 1..=self.retry.max_attempts {
            let ctx = LogContext::new()
                .with_endpoint(endpoint)
                .with_device(device)
                .with_attempt(attempt);
            self.set_state(BridgeState::Connecting { attempt });
            log_lifecycle_event(
                Some(&ctx),
                LifecycleEvent::Connecting,
                "opening session",
                SystemEventOutcome::Success,
            );

            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                connected = self.connector.connect() => connected,
            };
            match connected {
                Ok(session) => {
                    self.set_state(BridgeState::Resolving);
                    let resolved = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            self.close(session.as_ref(), device).await;
                            return Ok(None);
                        }
                        resolved = NodeResolver::resolve(
                            session.as_ref(),
                            &self.root,
                            &self.channel_path,
                            self.writer.variables(),
                        ) => resolved,
                    };
                    match resolved {
                        Ok(nodes) => {
                            log_lifecycle_event(
                                Some(&ctx),
                                LifecycleEvent::Connected,
                                &format!("resolved {} variables", nodes.len()),
                                SystemEventOutcome::Success,
                            );
                            if let Some(metrics) = &self.metrics {
                                metrics.record_connect(true);
                                metrics.set_session_up(true);
                            }
                            return Ok(Some(ActiveSession { session, nodes }));
                        }
                        Err(err) => {
                            log_lifecycle_event(
                                Some(&ctx),
                                LifecycleEvent::ResolutionFailed,
                                &err.to_string(),
                                SystemEventOutcome::Fault,
                            );
                            self.close(session.as_ref(), device).await;
                            last_error = err.to_string();
                        }
                    }
                }
                Err(err) => {
                    bridge_warn!(context = ctx, "connect failed: {}", err);
                    last_error = err.to_string();
                }
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_connect(false);
            }

            if let Some(delay) = self.retry.delay_after(attempt) {
                self.set_state(BridgeState::Disconnected);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "waiting before retry");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(None),
                    _ = sleep(delay) => {}
                }
            }
        }

        let ctx = LogContext::new().with_endpoint(endpoint).with_device(device);
        log_lifecycle_event(
            Some(&ctx),
            LifecycleEvent::RetryExhausted,
            &format!(
                "giving up after {} attempts: {}",
                self.retry.max_attempts, last_error
            ),
            SystemEventOutcome::Fault,
        );
        Err(BridgeError::ConnectExhausted {
            attempts: self.retry.max_attempts,
            last_error,
        })
    }

    async fn sample(
        &self,
        active: &ActiveSession,
        latest: &LatestReading,
        cancel: &CancellationToken,
        device: &str,
        cycle: &mut u64,
    ) -> SamplingExit {
        let endpoint = self.connector.endpoint();
        self.set_state(BridgeState::Sampling);

        loop {
            if cancel.is_cancelled() {
                return SamplingExit::Cancelled;
            }
            if !active.session.is_alive() {
                let ctx = LogContext::new().with_endpoint(endpoint).with_device(device);
                log_lifecycle_event(
                    Some(&ctx),
                    LifecycleEvent::SessionLost,
                    "session ended; reconnecting",
                    SystemEventOutcome::Fault,
                );
                return SamplingExit::SessionLost;
            }

            *cycle += 1;
            if let Some(metrics) = &self.metrics {
                metrics.inc_cycle();
            }
            let ctx = LogContext::new()
                .with_endpoint(endpoint)
                .with_device(device)
                .with_cycle(*cycle);

            match latest.current() {
                None => bridge_warn!(context = ctx, "no sample yet; skipping write"),
                Some(reading) if reading.is_error() => {
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_sensor_error();
                    }
                    bridge_warn!(context = ctx, "no sample: {}", reading.status);
                }
                Some(reading) => {
                    let payload = self.variables.payload(&reading, &self.scales);
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return SamplingExit::Cancelled,
                        result = self.writer.write_values(
                            active.session.as_ref(),
                            &active.nodes,
                            &payload,
                        ) => result,
                    };
                    self.report_writes(&ctx, &result);
                    if self.log_values && *cycle % self.log_every_n == 0 {
                        bridge_info!(
                            context = ctx,
                            "{} ({})",
                            snapshot(&payload),
                            reading.status
                        );
                    }
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return SamplingExit::Cancelled,
                _ = sleep(self.sample_interval) => {}
            }
        }
    }

    fn report_writes(&self, ctx: &LogContext<'_>, result: &WriteResult) {
        for item in &result.items {
            if let Some(metrics) = &self.metrics {
                metrics.record_write(
                    &item.variable,
                    item.value.unwrap_or_default(),
                    item.result.is_ok(),
                );
            }
            if let Err(failure) = &item.result {
                bridge_warn!(context = ctx, "write {} failed: {}", item.variable, failure);
            }
        }
        if !result.all_succeeded() {
            log_lifecycle_event(
                Some(ctx),
                LifecycleEvent::WriteFailed,
                &format!(
                    "{} of {} writes failed",
                    result.items.len() - result.success_count(),
                    result.items.len()
                ),
                SystemEventOutcome::Fault,
            );
        }
    }

    async fn close(&self, session: &dyn UaSession, device: &str) {
        session.disconnect().await;
        if let Some(metrics) = &self.metrics {
            metrics.set_session_up(false);
        }
        let ctx = LogContext::new()
            .with_endpoint(self.connector.endpoint())
            .with_device(device);
        log_lifecycle_event(
            Some(&ctx),
            LifecycleEvent::Disconnected,
            "session closed",
            SystemEventOutcome::Success,
        );
    }

    fn set_state(&self, next: BridgeState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "bridge state");
        }
    }
}
