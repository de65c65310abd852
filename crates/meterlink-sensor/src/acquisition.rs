//! ---
//! ems_section: "02-device-io"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Background acquisition task publishing the latest reading."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::reading::{Reading, ReadingStatus};
use crate::source::SensorSource;

/// Shortest acquisition period; a zero period would spin.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Simple async rate limiter that ensures deterministic loop intervals.
#[derive(Debug)]
pub struct RateLimiter {
    interval: tokio::time::Interval,
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period.max(MIN_PERIOD));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

/// Read-only view of the most recent reading. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LatestReading {
    rx: watch::Receiver<Option<Arc<Reading>>>,
}

impl LatestReading {
    /// Snapshot of the latest reading, if any has been published yet.
    pub fn current(&self) -> Option<Arc<Reading>> {
        self.rx.borrow().clone()
    }

    /// Wait until the first reading is published. Returns `None` if the
    /// acquisition task ended before producing one.
    pub async fn first(&mut self) -> Option<Arc<Reading>> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(reading) => reading.clone(),
            Err(_) => None,
        }
    }
}

/// Handle to the background task that owns the sensor source.
#[derive(Debug)]
pub struct Acquisition {
    latest: LatestReading,
    task: JoinHandle<u64>,
}

impl Acquisition {
    /// Start polling `source` every `period` until `cancel` fires.
    pub fn spawn(
        source: Box<dyn SensorSource>,
        period: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(run(source, tx, period, cancel));
        Self {
            latest: LatestReading { rx },
            task,
        }
    }

    pub fn latest(&self) -> LatestReading {
        self.latest.clone()
    }

    /// Wait for the task to stop and return how many readings it published.
    /// A task that panicked or was aborted is logged and counts as zero.
    pub async fn join(self) -> u64 {
        match self.task.await {
            Ok(published) => published,
            Err(err) => {
                warn!(error = %err, panicked = err.is_panic(), "acquisition task failed");
                0
            }
        }
    }
}

async fn run(
    mut source: Box<dyn SensorSource>,
    tx: watch::Sender<Option<Arc<Reading>>>,
    period: Duration,
    cancel: CancellationToken,
) -> u64 {
    let mut limiter = RateLimiter::new(period);
    let mut published = 0u64;
    info!(
        source = source.describe(),
        period_ms = period.as_millis() as u64,
        "acquisition started"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = limiter.tick() => {}
        }
        let reading = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            reading = source.read() => reading,
        };
        if let ReadingStatus::Error(reason) = &reading.status {
            debug!(source = source.describe(), reason = %reason, "sensor returned no data");
        }
        tx.send_replace(Some(Arc::new(reading)));
        published += 1;
    }

    info!(source = source.describe(), published, "acquisition stopped");
    published
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::simulate::SimulatedSensor;

    struct Faulty;

    #[async_trait]
    impl SensorSource for Faulty {
        async fn read(&mut self) -> Reading {
            panic!("sensor driver fault");
        }

        fn describe(&self) -> &str {
            "faulty"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_and_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let acquisition = Acquisition::spawn(
            Box::new(SimulatedSensor::new(Duration::from_secs(2))),
            Duration::from_secs(2),
            cancel.clone(),
        );
        let mut latest = acquisition.latest();
        let first = latest.first().await.unwrap();
        assert_eq!(first.status, ReadingStatus::Sim);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let newer = latest.current().unwrap();
        assert!(newer.energy > first.energy);

        cancel.cancel();
        let published = acquisition.join().await;
        assert!(published >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_is_clamped() {
        let cancel = CancellationToken::new();
        let acquisition = Acquisition::spawn(
            Box::new(SimulatedSensor::new(Duration::ZERO)),
            Duration::ZERO,
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        let published = acquisition.join().await;
        assert!(published >= 1 && published <= 11, "published {published}");
    }

    #[tokio::test]
    async fn first_returns_none_when_task_ends_empty() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let acquisition = Acquisition::spawn(
            Box::new(SimulatedSensor::new(Duration::from_secs(1))),
            Duration::from_secs(1),
            cancel,
        );
        let mut latest = acquisition.latest();
        assert_eq!(acquisition.join().await, 0);
        assert!(latest.first().await.is_none());
    }

    #[tokio::test]
    async fn panicking_source_joins_as_zero() {
        let cancel = CancellationToken::new();
        let acquisition = Acquisition::spawn(
            Box::new(Faulty),
            Duration::from_millis(1),
            cancel.clone(),
        );
        let mut latest = acquisition.latest();
        assert_eq!(acquisition.join().await, 0);
        assert!(latest.first().await.is_none());
        assert!(!cancel.is_cancelled());
    }
}
