//! # RIFT Core
//!
//! Shared types for the RIFT TCP NAT traversal engine.
//!
//! This crate provides:
//! - NAT descriptors: filtering type, delta (port allocation) and port range
//! - Port arithmetic on the cyclic port field
//! - Predicted mappings and their wire form
//! - The peer address codec (binary and text)
//! - Capability traits for routes, mapping probes, classification channels
//!   and time sources
//! - Error types and runtime configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use rift_core::{Delta, DeltaType, NatDescriptor, NatType, PeerAddr};
//!
//! let nat = NatDescriptor::new(NatType::FullCone, Delta::new(DeltaType::Preserving, 0));
//! assert!(nat.can_predict());
//! assert!(nat.is_concurrent());
//!
//! let addr = PeerAddr::parse("0-[0,8.8.8.8,192.168.1.2,40000,3,3,0]-0-alice", 5).unwrap();
//! assert_eq!(addr.node_id, "alice");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod addr;
pub mod config;
pub mod error;
pub mod mapping;
pub mod nat;
pub mod ports;
pub mod probe;
pub mod route;
pub mod time;

pub use addr::{AddressFamily, IfaceEntry, PeerAddr};
pub use config::{ClassifierConfig, ClockConfig, DeltaConfig, PunchConfig, RiftConfig};
pub use error::{Result, RiftError};
pub use mapping::{HeldSocket, Mapping, PreloadedMapping};
pub use nat::{
    Delta, DeltaType, MAX_PORT, MAX_PREDICTIONS, NatDescriptor, NatType, PortRange, STUN_PORT,
};
pub use probe::{
    BindingReply, BindingRequest, ChangeRequest, MappingProbe, NatTestChannel, NatTestServer,
    ProbedMapping, TimeSource, Transport,
};
pub use route::{ReusableRoute, Route};
pub use time::SyncedClock;
