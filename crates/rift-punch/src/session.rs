//! Punch session state machine
//!
//! ```text
//!   (none) --no mappings--> INITIATED  --peer mappings--> UPDATED
//!   (none) --peer mappings--> RECEIVED
//! ```
//!
//! Every other transition is a contract violation and leaves the session
//! untouched.

use crate::burst::BurstPlan;
use crate::mode::PunchMode;
use crate::predict::{Predictor, self_punch_patch};
use rand::Rng;
use rift_core::{
    Mapping, MappingProbe, NatDescriptor, PreloadedMapping, PunchConfig, Result, RiftError,
    SyncedClock,
};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Protocol state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PunchState {
    /// We sent the first predictions
    InitiatedPredictions = 1,
    /// We received the first predictions and answered
    ReceivedPredictions = 2,
    /// The peer answered our first predictions
    UpdatedPredictions = 3,
}

impl fmt::Display for PunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitiatedPredictions => write!(f, "INITIATED_PREDICTIONS"),
            Self::ReceivedPredictions => write!(f, "RECEIVED_PREDICTIONS"),
            Self::UpdatedPredictions => write!(f, "UPDATED_PREDICTIONS"),
        }
    }
}

/// Which end of the protocol we are
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Side {
    /// Sent the first message
    Initiator = 1,
    /// Answered the first message
    Recipient = 2,
}

/// Next state for a protocol step
///
/// # Errors
///
/// Returns `InvalidState` for any transition outside the protocol.
pub fn transition(
    has_incoming: bool,
    current: Option<PunchState>,
) -> Result<(PunchState, Side)> {
    match (has_incoming, current) {
        (false, None) => Ok((PunchState::InitiatedPredictions, Side::Initiator)),
        (true, None) => Ok((PunchState::ReceivedPredictions, Side::Recipient)),
        (true, Some(PunchState::InitiatedPredictions)) => {
            Ok((PunchState::UpdatedPredictions, Side::Initiator))
        }
        (incoming, Some(state)) => Err(RiftError::InvalidState(
            format!(
                "{} in state {state}",
                if incoming { "peer mappings" } else { "new punch" }
            )
            .into(),
        )),
    }
}

/// Session lookup key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Peer node id
    pub node_id: String,
    /// Pipe id
    pub pipe_id: String,
}

impl SessionKey {
    /// Create a key
    pub fn new(node_id: impl Into<String>, pipe_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            pipe_id: pipe_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node_id, self.pipe_id)
    }
}

/// Mappings and meeting time received from the peer
#[derive(Debug, Clone)]
pub struct Incoming {
    /// Peer's predictions
    pub mappings: Vec<Mapping>,
    /// Peer's meeting time
    pub meet_time: f64,
}

/// Shared inputs for a protocol step
pub struct StepContext<'a> {
    /// Probe for out-of-band mappings
    pub probe: Option<Arc<dyn MappingProbe>>,
    /// Synchronized clock
    pub clock: &'a SyncedClock,
    /// Punch settings
    pub config: &'a PunchConfig,
}

/// One punch attempt with one peer over one pipe
#[derive(Debug)]
pub struct PunchSession {
    key: SessionKey,
    session_id: String,
    mode: PunchMode,
    dest_ip: IpAddr,
    our_nat: NatDescriptor,
    their_nat: NatDescriptor,
    state: Option<PunchState>,
    side: Option<Side>,
    ours: Vec<Mapping>,
    theirs: Vec<Mapping>,
    meet_time: f64,
    preloaded: Vec<PreloadedMapping>,
    created: Instant,
}

impl PunchSession {
    /// Create a session with no state yet
    pub fn new(
        key: SessionKey,
        session_id: impl Into<String>,
        mode: PunchMode,
        dest_ip: IpAddr,
        our_nat: NatDescriptor,
        their_nat: NatDescriptor,
    ) -> Self {
        Self {
            key,
            session_id: session_id.into(),
            mode,
            dest_ip,
            our_nat,
            their_nat,
            state: None,
            side: None,
            ours: Vec::new(),
            theirs: Vec::new(),
            meet_time: 0.0,
            preloaded: Vec::new(),
            created: Instant::now(),
        }
    }

    /// Session key
    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Wire session id
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Punch mode
    #[must_use]
    pub const fn mode(&self) -> PunchMode {
        self.mode
    }

    /// Current state, `None` before the first step
    #[must_use]
    pub const fn state(&self) -> Option<PunchState> {
        self.state
    }

    /// Our side, `None` before the first step
    #[must_use]
    pub const fn side(&self) -> Option<Side> {
        self.side
    }

    /// Our predicted mappings
    #[must_use]
    pub fn ours(&self) -> &[Mapping] {
        &self.ours
    }

    /// The peer's mappings
    #[must_use]
    pub fn theirs(&self) -> &[Mapping] {
        &self.theirs
    }

    /// Agreed meeting time
    #[must_use]
    pub const fn meet_time(&self) -> f64 {
        self.meet_time
    }

    /// Time since the session was created
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Run one protocol step
    ///
    /// State only changes when the step succeeds.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for out-of-order steps and propagates
    /// prediction failures.
    pub async fn step<R: Rng + ?Sized>(
        &mut self,
        incoming: Option<Incoming>,
        ctx: &StepContext<'_>,
        rng: &mut R,
    ) -> Result<PunchState> {
        let (next, side) = transition(incoming.is_some(), self.state)?;

        match (next, incoming) {
            (PunchState::UpdatedPredictions, Some(incoming)) => {
                let predictor = Predictor::new(
                    self.mode,
                    self.our_nat,
                    self.their_nat,
                    incoming.mappings.len(),
                )?
                .with_self_offset(ctx.config.self_punch_offset);
                let observed: Vec<Mapping> = self.preloaded.iter().map(|p| p.mapping).collect();
                let mut ours = self.ours.clone();
                predictor.refine_reply_ports(&mut ours, &incoming.mappings, &observed, rng)?;
                self.ours = ours;
                self.theirs = incoming.mappings;
            }
            (_, incoming) => {
                let count = incoming
                    .as_ref()
                    .map_or(ctx.config.predictions, |i| i.mappings.len());
                let predictor = Predictor::new(self.mode, self.our_nat, self.their_nat, count)?
                    .with_self_offset(ctx.config.self_punch_offset);
                let prediction = predictor
                    .predict(
                        incoming.as_ref().map(|i| i.mappings.as_slice()),
                        ctx.probe.clone(),
                        ctx.config.preload_retries,
                        rng,
                    )
                    .await?;

                let (theirs, meet_time) = match incoming {
                    Some(i) => (i.mappings, i.meet_time),
                    None => {
                        let placeholder = if self.mode == PunchMode::SelfPunch {
                            self_punch_patch(&prediction.mappings, ctx.config.self_punch_offset)
                        } else {
                            prediction.mappings.clone()
                        };
                        (
                            placeholder,
                            ctx.clock.now() + ctx.config.meet_delay.as_secs_f64(),
                        )
                    }
                };
                self.ours = prediction.mappings;
                self.preloaded = prediction.preloaded;
                self.theirs = theirs;
                self.meet_time = meet_time;
            }
        }

        debug!("Session {} -> {} as {:?}", self.key, next, side);
        self.state = Some(next);
        self.side = Some(side);
        Ok(next)
    }

    /// Schedule the connect burst for the current mappings
    ///
    /// Consumes the preloaded sockets so their ports are free to rebind.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` before any predictions exist, `InvalidMapping`
    /// when the two lists differ in length and `PunchFailed` when a self
    /// punch would aim at its own port.
    pub fn burst_plan(&mut self, clock: &SyncedClock, config: &PunchConfig) -> Result<BurstPlan> {
        if self.state.is_none() || self.ours.is_empty() || self.theirs.is_empty() {
            return Err(RiftError::invalid_state("no predictions to punch with"));
        }
        if self.ours.len() != self.theirs.len() {
            return Err(RiftError::InvalidMapping(
                format!(
                    "{} mappings paired with {} peer mappings",
                    self.ours.len(),
                    self.theirs.len()
                )
                .into(),
            ));
        }
        if self.mode == PunchMode::SelfPunch && self.ours[0].remote == self.theirs[0].local {
            return Err(RiftError::punch_failed("self punch aimed at its own port"));
        }
        self.preloaded.clear();

        Ok(BurstPlan {
            label: self.key.to_string(),
            mode: self.mode,
            dest_ip: self.dest_ip,
            pairs: self
                .ours
                .iter()
                .copied()
                .zip(self.theirs.iter().copied())
                .collect(),
            concurrent: self.mode != PunchMode::Remote || self.our_nat.is_concurrent(),
            start_in: clock.until(self.meet_time),
            window: config.window,
            spacing: config.attempt_spacing,
            attempt_timeout: config.attempt_timeout,
        })
    }
}
