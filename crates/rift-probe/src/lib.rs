//! # RIFT Probe
//!
//! Measurement side of the RIFT NAT traversal engine.
//!
//! This crate provides:
//! - Clock synchronization against SNTP (or any [`TimeSource`](rift_core::TimeSource))
//!   with outlier-trimmed averaging
//! - NAT type classification over a classification channel
//! - Delta probing: how the NAT allocates external ports
//! - An identity mapping probe for routes without NAT
//!
//! ## Example
//!
//! ```rust,no_run
//! use rift_core::ClockConfig;
//! use rift_probe::{ClockSynchronizer, SntpSource};
//! use std::sync::Arc;
//!
//! # async fn run() -> rift_core::Result<()> {
//! let source = Arc::new(SntpSource::new("162.159.200.1:123".parse().unwrap()));
//! let sync = ClockSynchronizer::new(vec![source], ClockConfig::default());
//! let clock = sync.synchronize().await?;
//! println!("skew {:.1} ms", clock.skew_ms());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod clock;
pub mod delta;
pub mod local;
pub mod sntp;

pub use classify::{NatClassifier, filter_servers};
pub use clock::{ClockEstimate, ClockSynchronizer, estimate_skew};
pub use delta::{DeltaProber, DeltaTally, Observation, infer_delta};
pub use local::LocalMappingProbe;
pub use sntp::SntpSource;
