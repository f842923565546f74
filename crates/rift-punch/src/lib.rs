//! # RIFT Punch
//!
//! TCP hole punching for the RIFT NAT traversal engine.
//!
//! This crate provides:
//! - Mapping prediction from NAT type, delta and port range
//! - The two-message punch protocol and its session state machine
//! - Synchronized connect bursts with a symmetric tie-break
//! - A coordinator that drives both ends over any [`Signaling`] channel
//!
//! ## Example
//!
//! ```rust,no_run
//! use rift_core::{NatDescriptor, PeerAddr, PunchConfig, ReusableRoute, SyncedClock};
//! use rift_punch::{Endpoint, PunchCoordinator, SignalHub};
//! use std::sync::Arc;
//!
//! # async fn run(ours: PeerAddr, theirs: PeerAddr) -> rift_core::Result<()> {
//! let hub = SignalHub::new();
//! let (signaling, inbox) = hub.join(ours.node_id.clone());
//! let endpoint = Endpoint {
//!     addr: ours,
//!     route: Arc::new(ReusableRoute::loopback()),
//!     nat: NatDescriptor::open(),
//!     probe: None,
//! };
//! let coordinator = PunchCoordinator::new(
//!     endpoint,
//!     Arc::new(signaling),
//!     SyncedClock::local(),
//!     PunchConfig::default(),
//! );
//! coordinator.start().await?;
//! coordinator.spawn_listener(inbox);
//!
//! let stream = coordinator.connect(&theirs, "pipe-1").await?;
//! println!("punched {}", stream.peer_addr()?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod burst;
pub mod coordinator;
pub mod message;
pub mod mode;
pub mod predict;
pub mod session;
pub mod signaling;

pub use burst::{BurstPlan, predicted_key, run_burst, spawn_burst, tie_break_key};
pub use coordinator::{Endpoint, PunchCoordinator, Punched};
pub use message::{MessageKind, PunchMessage, new_session_id};
pub use mode::{PunchMode, is_private, punch_mode, select_dest, validate_dest};
pub use predict::{
    Prediction, Predictor, Strategy, requires_stun_port, self_punch_patch, self_punch_port,
};
pub use session::{
    Incoming, PunchSession, PunchState, SessionKey, Side, StepContext, transition,
};
pub use signaling::{ChannelSignaling, Inbound, SignalHub, Signaling};
