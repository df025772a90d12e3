//! CycleRunner - one pass over every configured target
//!
//! Collections are fanned out concurrently and joined before the cycle's
//! outcome is assembled:
//!
//! ```text
//!            ┌─► collect(target 1) ─┐
//! targets ───┼─► collect(target 2) ─┼─► join ─► CycleReport { results, outcome }
//!            └─► collect(target N) ─┘
//! ```
//!
//! A failing target is logged and left out of the batch; it never stops or
//! cancels its siblings.

use std::collections::BTreeMap;

use futures::future::join_all;
use tracing::{debug, instrument, warn};

use crate::MetricSample;
use crate::collector::{CollectionError, TargetCollector};
use crate::config::{Config, Target};
use crate::control::ControlClient;

/// Tag set shared by all points of one sample
pub type Tags = BTreeMap<String, String>;

/// Which tags accompany every sample; fixed for the lifetime of the process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagPolicy {
    /// Add `version=<daemon version>` when the daemon reported one
    pub send_version: bool,

    /// Static `service=<tag>`
    pub service: Option<String>,
}

impl TagPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            send_version: config.send_version_tag,
            service: config.service_tag.clone(),
        }
    }

    pub fn tags(&self, sample: &MetricSample) -> Tags {
        let mut tags = Tags::new();
        tags.insert("host".to_string(), sample.label.clone());

        if self.send_version
            && let Some(version) = &sample.version
        {
            tags.insert("version".to_string(), version.clone());
        }

        if let Some(service) = &self.service {
            tags.insert("service".to_string(), service.clone());
        }

        tags
    }
}

/// Aggregate result of one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    pub attempted: usize,
    pub succeeded: usize,

    /// At least one target failed, or the publish step failed
    pub any_failure: bool,
}

impl CycleOutcome {
    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }

    /// Record a cycle-level failure (e.g. the batch write) on top of the
    /// per-target results.
    pub fn mark_failed(&mut self) {
        self.any_failure = true;
    }
}

pub type TargetResult = (Target, Result<MetricSample, CollectionError>);

#[derive(Debug)]
pub struct CycleReport {
    /// One entry per target, in registry order
    pub results: Vec<TargetResult>,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    fn new(results: Vec<TargetResult>) -> Self {
        let attempted = results.len();
        let succeeded = results.iter().filter(|(_, result)| result.is_ok()).count();

        Self {
            results,
            outcome: CycleOutcome {
                attempted,
                succeeded,
                any_failure: succeeded < attempted,
            },
        }
    }

    /// Successful samples, in registry order
    pub fn samples(&self) -> Vec<(&Target, &MetricSample)> {
        self.results
            .iter()
            .filter_map(|(target, result)| result.as_ref().ok().map(|sample| (target, sample)))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct CycleRunner<C> {
    collector: TargetCollector<C>,
}

impl<C: ControlClient> CycleRunner<C> {
    pub fn new(collector: TargetCollector<C>) -> Self {
        Self { collector }
    }

    #[instrument(skip_all, fields(targets = targets.len()))]
    pub async fn run_cycle(&self, targets: &[Target]) -> CycleReport {
        let results = join_all(targets.iter().map(|target| async move {
            let result = self.collector.collect(target).await;
            (target.clone(), result)
        }))
        .await;

        for (target, result) in &results {
            match result {
                Ok(_) => debug!("{target}: collected"),
                Err(e) => warn!(label = %target.label, kind = e.kind(), "{target}: {e}"),
            }
        }

        let report = CycleReport::new(results);
        debug!(
            "cycle collected {}/{} targets",
            report.outcome.succeeded, report.outcome.attempted
        );
        report
    }
}
