//! HealthMonitor - liveness signal with hysteresis
//!
//! ## State Machine
//!
//! ```text
//!            cycle with any failure
//!   HEALTHY ────────────────────────► UNHEALTHY
//!      ▲                                  │
//!      └──────────────────────────────────┘
//!            cycle without failures
//! ```
//!
//! The readiness artifact is only written on an edge. A run of equal cycles
//! leaves it untouched, so external probes see stable content between
//! transitions.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::cycle::CycleOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

impl HealthState {
    /// Token persisted to the readiness artifact
    pub fn token(&self) -> &'static str {
        match self {
            HealthState::Healthy => "OK",
            HealthState::Unhealthy => "FAILED",
        }
    }

    fn for_outcome(outcome: &CycleOutcome) -> Self {
        if outcome.any_failure {
            HealthState::Unhealthy
        } else {
            HealthState::Healthy
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Where the current health state is persisted
pub trait ReadinessArtifact: Send {
    fn store(&mut self, state: HealthState) -> io::Result<()>;
}

/// Overwrites a file with the state token
#[derive(Debug, Clone)]
pub struct FileArtifact {
    path: PathBuf,
}

impl FileArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReadinessArtifact for FileArtifact {
    fn store(&mut self, state: HealthState) -> io::Result<()> {
        std::fs::write(&self.path, state.token())
    }
}

#[derive(Debug)]
pub struct HealthMonitor<A> {
    artifact: A,
    state: HealthState,
}

impl<A: ReadinessArtifact> HealthMonitor<A> {
    /// Start optimistic: HEALTHY, persisted immediately.
    pub fn new(mut artifact: A) -> io::Result<Self> {
        artifact.store(HealthState::Healthy)?;
        debug!("readiness artifact initialised as {}", HealthState::Healthy);

        Ok(Self {
            artifact,
            state: HealthState::Healthy,
        })
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn artifact(&self) -> &A {
        &self.artifact
    }

    /// Evaluate a completed cycle; returns the new state on a transition.
    ///
    /// If persisting the new state fails, the current state is kept so the
    /// edge is attempted again after the next cycle.
    pub fn evaluate(&mut self, outcome: &CycleOutcome) -> Option<HealthState> {
        let next = HealthState::for_outcome(outcome);
        if next == self.state {
            return None;
        }

        if let Err(e) = self.artifact.store(next) {
            error!("failed to persist health state {next}: {e}");
            return None;
        }

        match next {
            HealthState::Unhealthy => warn!(
                "health check failed: {}/{} targets collected",
                outcome.succeeded, outcome.attempted
            ),
            HealthState::Healthy => info!("health check recovered"),
        }

        self.state = next;
        Some(next)
    }
}
