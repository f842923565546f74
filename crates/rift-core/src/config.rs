//! Runtime configuration
//!
//! Every tunable of the engine lives here so components receive an immutable
//! configuration instead of reading global tables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Clock synchronizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Time queries issued per estimate
    pub samples: usize,
    /// Samples that must survive outlier trimming
    pub min_samples: usize,
    /// Largest acceptable standard deviation, in milliseconds
    pub max_sdev_ms: f64,
    /// Outlier trimming rounds
    pub trim_rounds: usize,
    /// Timeout for a single time query
    pub query_timeout: Duration,
    /// Estimates attempted before giving up
    pub retries: usize,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            samples: 50,
            min_samples: 10,
            max_sdev_ms: 60.0,
            trim_rounds: 3,
            query_timeout: Duration::from_secs(2),
            retries: 3,
        }
    }
}

/// NAT classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Servers probed concurrently
    pub max_servers: usize,
    /// Time budget for each phase
    pub phase_timeout: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_servers: 5,
            phase_timeout: Duration::from_millis(500),
        }
    }
}

/// Delta prober configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaConfig {
    /// Probes per round
    pub test_count: usize,
    /// Observations required to accept a delta type
    pub threshold: usize,
    /// Timeout for a single mapping probe
    pub probe_timeout: Duration,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            test_count: 8,
            threshold: 5,
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Punch protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PunchConfig {
    /// Mappings predicted when the peer supplied none
    pub predictions: usize,
    /// Length of the connect burst
    pub window: Duration,
    /// Gap between attempts for one mapping
    pub attempt_spacing: Duration,
    /// Timeout for a single connect attempt
    pub attempt_timeout: Duration,
    /// Delay from the initial message to the meeting time
    pub meet_delay: Duration,
    /// Sessions older than this are discarded
    pub session_ttl: Duration,
    /// How often stale sessions are swept
    pub sweep_interval: Duration,
    /// Outer deadline for a whole protocol run
    pub protocol_deadline: Duration,
    /// Attempts per out-of-band mapping fetch
    pub preload_retries: usize,
    /// Offset separating the two sides of a self punch
    pub self_punch_offset: u16,
    /// Number of configured signaling servers
    pub signal_servers: usize,
}

impl Default for PunchConfig {
    fn default() -> Self {
        Self {
            predictions: 2,
            window: Duration::from_secs(6),
            attempt_spacing: Duration::from_millis(5),
            attempt_timeout: Duration::from_secs(2),
            meet_delay: Duration::from_secs(3),
            session_ttl: Duration::from_secs(300), // 5 minutes
            sweep_interval: Duration::from_secs(30),
            protocol_deadline: Duration::from_secs(30),
            preload_retries: 5,
            self_punch_offset: 1000,
            signal_servers: 5,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiftConfig {
    /// Clock synchronization
    pub clock: ClockConfig,
    /// NAT classification
    pub classifier: ClassifierConfig,
    /// Delta probing
    pub delta: DeltaConfig,
    /// Hole punching
    pub punch: PunchConfig,
}
