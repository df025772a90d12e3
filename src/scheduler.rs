//! Scheduler - fixed-period cycle loop
//!
//! ```text
//! loop:
//!   shutdown requested? → exit
//!   start = now
//!   run cycle → publish → evaluate health
//!   sleep(max(0, period - elapsed))   (interrupted by shutdown)
//! ```
//!
//! The start-to-start interval is held at `period`; an overrunning cycle is
//! followed immediately by the next one. Only one cycle runs at a time, and a
//! shutdown never interrupts a cycle in progress.

use std::fmt::Display;
use std::io;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::collector::TargetCollector;
use crate::config::{Config, Target};
use crate::control::{ControlClient, TorControlClient};
use crate::cycle::{CycleOutcome, CycleRunner, TagPolicy};
use crate::health::{FileArtifact, HealthMonitor, ReadinessArtifact};
use crate::publish::{InfluxWriter, PointWriter, Publisher};

/// Time left to sleep after a cycle that took `elapsed`.
pub fn sleep_duration(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

/// Wait for a shutdown signal source.
///
/// A source that fails to install is logged and then never fires, so the
/// scheduler keeps running instead of stopping after its first cycle.
pub async fn shutdown_signal<F, E>(source: F)
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    if let Err(e) = source.await {
        warn!("could not listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}

pub struct Scheduler<C, W, A> {
    targets: Vec<Target>,
    runner: CycleRunner<C>,
    publisher: Publisher<W>,
    health: HealthMonitor<A>,
    period: Duration,
    dry_run: bool,
}

impl Scheduler<TorControlClient, InfluxWriter, FileArtifact> {
    /// Wire up the production collaborators.
    ///
    /// Fails if the readiness artifact cannot be initialised.
    pub fn from_config(config: &Config, dry_run: bool) -> io::Result<Self> {
        let collector = TargetCollector::new(TorControlClient::new(), config.collect_timeout);
        let health = HealthMonitor::new(FileArtifact::new(&config.healthcheck_path))?;

        Ok(Scheduler::new(
            config.targets.clone(),
            CycleRunner::new(collector),
            Publisher::influx(&config.influx, TagPolicy::from_config(config)),
            health,
            config.period,
            dry_run,
        ))
    }
}

impl<C, W, A> Scheduler<C, W, A>
where
    C: ControlClient,
    W: PointWriter,
    A: ReadinessArtifact,
{
    pub fn new(
        targets: Vec<Target>,
        runner: CycleRunner<C>,
        publisher: Publisher<W>,
        health: HealthMonitor<A>,
        period: Duration,
        dry_run: bool,
    ) -> Self {
        Self {
            targets,
            runner,
            publisher,
            health,
            period,
            dry_run,
        }
    }

    pub fn health(&self) -> &HealthMonitor<A> {
        &self.health
    }

    /// Run a single cycle: collect, publish, evaluate health.
    #[instrument(skip_all)]
    pub async fn run_once(&mut self) -> CycleOutcome {
        let timestamp = Utc::now();
        let report = self.runner.run_cycle(&self.targets).await;
        let mut outcome = report.outcome;

        if let Err(e) = self
            .publisher
            .publish(&report.samples(), self.dry_run, timestamp)
            .await
        {
            error!(kind = e.kind(), "could not upload data: {e}");
            outcome.mark_failed();
        }

        self.health.evaluate(&outcome);
        outcome
    }

    /// Run cycles until `shutdown` turns `true` (or its sender goes away).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "polling {} targets every {}s{}",
            self.targets.len(),
            self.period.as_secs(),
            if self.dry_run { " (dry run)" } else { "" }
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let start = Instant::now();
            self.run_once().await;

            let elapsed = start.elapsed();
            let pause = sleep_duration(self.period, elapsed);
            if pause.is_zero() {
                warn!(
                    "cycle took {:.1}s, longer than the {}s period; starting next cycle now",
                    elapsed.as_secs_f64(),
                    self.period.as_secs()
                );
                continue;
            }

            debug!("sleeping {:.1}s until next cycle", pause.as_secs_f64());
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("shutdown sender dropped");
                        break;
                    }
                }
            }
        }

        info!("scheduler stopped");
    }
}
