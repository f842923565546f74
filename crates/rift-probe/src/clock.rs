//! Clock synchronization
//!
//! Peers agree on an absolute meeting time, so each needs its local clock
//! error relative to a shared reference. Many time queries are fired at once
//! and outliers (slow replies, congested paths) are trimmed before averaging.

use rift_core::time::local_now;
use rift_core::{ClockConfig, Result, RiftError, SyncedClock, TimeSource};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Result of a successful estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockEstimate {
    /// Local clock minus reference clock, in milliseconds
    pub skew_ms: f64,
    /// Standard deviation of the surviving samples
    pub sdev_ms: f64,
    /// Samples that survived trimming
    pub samples: usize,
}

/// Mean and population standard deviation
fn mean_sdev(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Trim outliers and average the remaining samples
///
/// Every round keeps the values within one standard deviation of the mean;
/// the first round always runs. Later rounds are skipped once the deviation
/// is acceptable or too few values remain. Returns `None` when the survivors
/// are too few or too spread out.
#[must_use]
pub fn estimate_skew(samples: &[f64], config: &ClockConfig) -> Option<ClockEstimate> {
    if samples.is_empty() {
        return None;
    }

    let mut values = samples.to_vec();
    let (mut mean, mut sdev) = mean_sdev(&values);
    for _ in 0..config.trim_rounds.max(1) {
        values.retain(|v| (v - mean).abs() <= sdev);
        if values.len() < 2 {
            break;
        }
        (mean, sdev) = mean_sdev(&values);
        if sdev <= config.max_sdev_ms || values.len() < config.min_samples {
            break;
        }
    }

    if values.len() < config.min_samples || sdev > config.max_sdev_ms {
        return None;
    }

    Some(ClockEstimate {
        skew_ms: mean,
        sdev_ms: sdev,
        samples: values.len(),
    })
}

/// Estimates local clock skew against one or more time sources
pub struct ClockSynchronizer {
    sources: Vec<Arc<dyn TimeSource>>,
    config: ClockConfig,
}

impl ClockSynchronizer {
    /// Create a synchronizer; queries are spread round-robin over `sources`
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn TimeSource>>, config: ClockConfig) -> Self {
        Self { sources, config }
    }

    /// Collect skew samples, in milliseconds, from concurrent queries
    ///
    /// Failed or timed-out queries are skipped.
    pub async fn collect(&self) -> Vec<f64> {
        if self.sources.is_empty() {
            return Vec::new();
        }

        let mut set = JoinSet::new();
        for i in 0..self.config.samples {
            let source = Arc::clone(&self.sources[i % self.sources.len()]);
            let timeout = self.config.query_timeout;
            set.spawn(async move {
                let sent = local_now();
                let reference = tokio::time::timeout(timeout, source.query()).await??;
                let received = local_now();
                // Assume the reply was stamped halfway through the round trip
                let local = (sent + received) / 2.0;
                Ok::<f64, RiftError>((local - reference) * 1000.0)
            });
        }

        let mut samples = Vec::with_capacity(self.config.samples);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(sample)) => samples.push(sample),
                Ok(Err(e)) => debug!("time query failed: {}", e),
                Err(e) => warn!("time query task failed: {}", e),
            }
        }
        samples
    }

    /// Produce one estimate from fresh samples
    ///
    /// # Errors
    ///
    /// Returns `Clock` when the samples give no estimate.
    pub async fn estimate(&self) -> Result<ClockEstimate> {
        let samples = self.collect().await;
        estimate_skew(&samples, &self.config).ok_or_else(|| {
            RiftError::Clock(format!("no estimate from {} samples", samples.len()).into())
        })
    }

    /// Estimate with retries and return a corrected clock
    ///
    /// # Errors
    ///
    /// Returns `Clock` if every attempt fails. Synchronized punching must not
    /// proceed in that case.
    pub async fn synchronize(&self) -> Result<SyncedClock> {
        let attempts = self.config.retries.max(1);
        for attempt in 1..=attempts {
            match self.estimate().await {
                Ok(estimate) => {
                    info!(
                        "Clock skew {:.1} ms (sdev {:.1} ms, {} samples)",
                        estimate.skew_ms, estimate.sdev_ms, estimate.samples
                    );
                    return Ok(SyncedClock::new(estimate.skew_ms));
                }
                Err(e) => warn!("Clock estimate {}/{} failed: {}", attempt, attempts, e),
            }
        }
        Err(RiftError::Clock(
            format!("no estimate after {attempts} attempts").into(),
        ))
    }
}
