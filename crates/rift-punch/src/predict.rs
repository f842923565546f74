//! Mapping prediction
//!
//! Given what is known about both NATs, the [`Predictor`] guesses which
//! external port our NAT will allocate for each local port we are about to
//! bind, aiming every guess at one of the peer's advertised targets.

use crate::mode::PunchMode;
use rand::Rng;
use rift_core::mapping::{check_mappings, strip_duplicates};
use rift_core::nat::SAFE_PORT_FLOOR;
use rift_core::ports::{field_wrap, port_distance, port_wrap, random_port, usable_range};
use rift_core::{
    DeltaType, MAX_PORT, Mapping, MappingProbe, NatDescriptor, NatType, PortRange,
    PreloadedMapping, Result, RiftError, STUN_PORT, Transport,
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Lowest port a self punch is shifted into
const SELF_PUNCH_FLOOR: u16 = SAFE_PORT_FLOOR + 1;

/// Upper bound for out-of-band source ports
const PRELOAD_CEILING: u16 = MAX_PORT - 1000;

/// How our mappings are derived from the peer's targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Both ends on one host, ports shifted apart
    SelfPunch,
    /// No translation, bind the target port directly
    Open,
    /// External port equals local port
    Equal,
    /// NAT keeps the distance between consecutive local ports
    Preserving,
    /// External ports advance by a fixed step regardless of local port
    Independent,
    /// External ports advance by a fixed step per local port increment
    Dependent,
    /// Reuse an out-of-band mapping the NAT will recycle
    Reuse,
}

impl Strategy {
    /// Whether the strategy consumes out-of-band mappings
    #[must_use]
    pub const fn needs_preload(self) -> bool {
        matches!(
            self,
            Self::Preserving | Self::Independent | Self::Dependent | Self::Reuse
        )
    }

    /// Whether each prediction becomes the next `last`
    #[must_use]
    pub const fn advances(self) -> bool {
        matches!(self, Self::Independent | Self::Dependent)
    }
}

/// Result of a prediction run
#[derive(Debug)]
pub struct Prediction {
    /// Our deduplicated mappings
    pub mappings: Vec<Mapping>,
    /// Range the predictions were drawn from
    pub range: PortRange,
    /// Strategy that produced them
    pub strategy: Strategy,
    /// Out-of-band mappings, holding their sockets
    pub preloaded: Vec<PreloadedMapping>,
}

impl Prediction {
    /// The preloaded mappings without their sockets
    #[must_use]
    pub fn observed(&self) -> Vec<Mapping> {
        self.preloaded.iter().map(|p| p.mapping).collect()
    }
}

/// Port shifted by `offset` into the self-punch range
#[must_use]
pub fn self_punch_port(port: u16, offset: u16) -> u16 {
    let floor = i64::from(SELF_PUNCH_FLOOR);
    let size = i64::from(MAX_PORT) - floor + 1;
    let shifted = i64::from(port) + i64::from(offset);
    // always within [floor, MAX_PORT]
    (floor + (shifted - floor).rem_euclid(size)) as u16
}

/// Shift a copy of `mappings` so both ends of a self punch never share a port
#[must_use]
pub fn self_punch_patch(mappings: &[Mapping], offset: u16) -> Vec<Mapping> {
    mappings
        .iter()
        .map(|m| {
            let local = self_punch_port(m.local, offset);
            Mapping::new(local, m.reply, local)
        })
        .collect()
}

/// Whether the STUN port must serve as the only target
///
/// A port-restricted NAT with random allocation only lets a reply in from
/// the exact port it last talked to, so both sides aim at [`STUN_PORT`].
///
/// # Errors
///
/// Returns `CannotPredict` when no reply port can satisfy both NATs.
pub fn requires_stun_port(ours: &NatDescriptor, theirs: &NatDescriptor) -> Result<bool> {
    let strict = |n: &NatDescriptor| {
        n.nat_type == NatType::RestrictPort && n.delta.kind == DeltaType::Random
    };

    if ours.nat_type == NatType::RestrictPort
        && theirs.nat_type == NatType::RestrictPort
        && (strict(ours) || strict(theirs))
    {
        return Err(RiftError::cannot_predict(
            "both sides port restricted with random allocation",
        ));
    }

    for (side, other) in [(ours, theirs), (theirs, ours)] {
        if !strict(side) {
            continue;
        }
        if other.is_hard() {
            return Err(RiftError::cannot_predict(
                "strict NAT facing an unpredictable peer",
            ));
        }
        if !other.range.contains(STUN_PORT) {
            return Err(RiftError::cannot_predict("STUN port outside peer range"));
        }
        return Ok(true);
    }
    Ok(false)
}

async fn fetch_mapping(
    probe: &dyn MappingProbe,
    slot: usize,
    ports: Vec<u16>,
) -> Option<(usize, PreloadedMapping)> {
    for port in ports {
        match probe.get_mapping(Transport::Tcp, port).await {
            Ok(m) => return Some((slot, PreloadedMapping::new(m.local, m.external, m.socket))),
            Err(e) => debug!("Out-of-band mapping from port {} failed: {}", port, e),
        }
    }
    None
}

/// Mapping predictor for one pair of NATs
#[derive(Debug, Clone)]
pub struct Predictor {
    mode: PunchMode,
    ours: NatDescriptor,
    count: usize,
    range: PortRange,
    stun_port: bool,
    strategy: Strategy,
    self_offset: u16,
}

impl Predictor {
    /// Build a predictor for `count` targets
    ///
    /// LAN and self punches ignore both NATs and treat the path as open.
    ///
    /// # Errors
    ///
    /// Returns `CannotPredict` when the NATs leave no usable range, no
    /// feasible reply port, or no strategy.
    pub fn new(
        mode: PunchMode,
        ours: NatDescriptor,
        theirs: NatDescriptor,
        count: usize,
    ) -> Result<Self> {
        let (ours, theirs) = match mode {
            PunchMode::Remote => (ours, theirs),
            PunchMode::Lan | PunchMode::SelfPunch => (NatDescriptor::open(), NatDescriptor::open()),
        };

        let stun_port = requires_stun_port(&ours, &theirs)?;
        let count = if stun_port { 1 } else { count.max(1) };
        let range = usable_range(ours.range, theirs.range, count)?;
        let strategy = Self::choose(mode, &ours)?;

        Ok(Self {
            mode,
            ours,
            count,
            range,
            stun_port,
            strategy,
            self_offset: 1000,
        })
    }

    /// Override the self-punch port offset
    #[must_use]
    pub fn with_self_offset(mut self, offset: u16) -> Self {
        self.self_offset = offset;
        self
    }

    fn choose(mode: PunchMode, ours: &NatDescriptor) -> Result<Strategy> {
        if mode == PunchMode::SelfPunch {
            return Ok(Strategy::SelfPunch);
        }
        if ours.is_open() {
            return Ok(Strategy::Open);
        }
        match ours.delta.kind {
            DeltaType::Equal => Ok(Strategy::Equal),
            DeltaType::Preserving => Ok(Strategy::Preserving),
            DeltaType::Independent => Ok(Strategy::Independent),
            DeltaType::Dependent => Ok(Strategy::Dependent),
            DeltaType::Na | DeltaType::Random if ours.can_predict() => Ok(Strategy::Reuse),
            _ => Err(RiftError::CannotPredict(
                format!("no strategy for {ours}").into(),
            )),
        }
    }

    /// Chosen strategy
    #[must_use]
    pub const fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Range predictions are drawn from
    #[must_use]
    pub const fn range(&self) -> PortRange {
        self.range
    }

    /// Whether targets are pinned to the STUN port
    #[must_use]
    pub const fn uses_stun_port(&self) -> bool {
        self.stun_port
    }

    /// Number of targets synthesized when the peer supplied none
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Synthesize targets when the peer has not sent any yet
    pub fn targets<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Mapping> {
        if self.stun_port {
            return vec![Mapping::target(STUN_PORT)];
        }
        (0..self.count)
            .map(|_| Mapping::target(random_port(self.range, rng)))
            .collect()
    }

    fn fit_our_range<R: Rng + ?Sized>(&self, port: u16, rng: &mut R) -> u16 {
        if self.ours.range.contains(port) {
            port
        } else {
            random_port(self.range, rng)
        }
    }

    /// Predict the mapping aimed at one target
    ///
    /// `last` is the most recent known mapping and `preloaded` the
    /// out-of-band mapping reserved for this target.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMapping` for a target without ports and
    /// `CannotPredict` when the strategy needs a missing preloaded mapping.
    pub fn predict_one<R: Rng + ?Sized>(
        &self,
        target: &Mapping,
        last: &Mapping,
        preloaded: Option<&Mapping>,
        rng: &mut R,
    ) -> Result<Mapping> {
        let bind = target.bind_port();
        if bind == 0 {
            return Err(RiftError::invalid_mapping("target names no port"));
        }
        let our_reply = if self.ours.nat_type == NatType::RestrictPort {
            bind
        } else {
            0
        };
        let step = i64::from(self.ours.delta.value);

        let mapping = match self.strategy {
            Strategy::SelfPunch => {
                let port = self_punch_port(target.remote, self.self_offset);
                Mapping::new(port, 0, port)
            }
            Strategy::Open => Mapping::new(bind, 0, bind),
            Strategy::Equal => {
                let port = self.fit_our_range(bind, rng);
                Mapping::new(port, 0, port)
            }
            Strategy::Preserving => {
                let port = self.fit_our_range(bind, rng);
                let dist = port_distance(last.remote, port);
                Mapping::new(
                    port_wrap(i64::from(last.local) + i64::from(dist)),
                    our_reply,
                    port,
                )
            }
            Strategy::Independent => Mapping::new(
                rng.gen_range(SAFE_PORT_FLOOR..=MAX_PORT),
                our_reply,
                field_wrap(i64::from(last.remote) + step, self.range),
            ),
            Strategy::Dependent => Mapping::new(
                port_wrap(i64::from(last.local) + 1),
                our_reply,
                field_wrap(i64::from(last.remote) + step, self.range),
            ),
            Strategy::Reuse => {
                let pre = preloaded
                    .ok_or(RiftError::cannot_predict("no out-of-band mapping to reuse"))?;
                let reply = if self.ours.nat_type == NatType::RestrictPort {
                    STUN_PORT
                } else {
                    0
                };
                Mapping::new(pre.local, reply, pre.remote)
            }
        };
        Ok(mapping)
    }

    /// Predict one mapping per target, then deduplicate and validate
    ///
    /// # Errors
    ///
    /// Propagates per-target failures and `InvalidMapping` when the final
    /// list breaks the mapping rules.
    pub fn predict_all<R: Rng + ?Sized>(
        &self,
        targets: &[Mapping],
        preloaded: &[Mapping],
        rng: &mut R,
    ) -> Result<Vec<Mapping>> {
        if self.strategy.needs_preload() && preloaded.is_empty() {
            return Err(RiftError::cannot_predict("strategy needs out-of-band mappings"));
        }
        // reused mappings must be distinct per target
        if self.strategy == Strategy::Reuse && preloaded.len() < targets.len() {
            return Err(RiftError::CannotPredict(
                format!(
                    "{} out-of-band mappings for {} targets",
                    preloaded.len(),
                    targets.len()
                )
                .into(),
            ));
        }

        let mut last = preloaded.last().copied().unwrap_or_default();
        let mut out = Vec::with_capacity(targets.len());
        for (i, target) in targets.iter().enumerate() {
            let pre = preloaded.get(i).or_else(|| preloaded.first());
            let mapping = self.predict_one(target, &last, pre, rng)?;
            if self.strategy.advances() {
                last = mapping;
            }
            out.push(mapping);
        }

        let out = strip_duplicates(out);
        check_mappings(&out)?;
        Ok(out)
    }

    /// Fetch out-of-band mappings at random high ports
    ///
    /// Each mapping is retried up to `retries` times from a fresh port;
    /// mappings that never succeed are dropped.
    ///
    /// # Errors
    ///
    /// Returns `Probe` when no mapping at all could be fetched.
    pub async fn preload<R: Rng + ?Sized>(
        &self,
        probe: Arc<dyn MappingProbe>,
        count: usize,
        retries: usize,
        rng: &mut R,
    ) -> Result<Vec<PreloadedMapping>> {
        let retries = retries.max(1);
        let plans: Vec<Vec<u16>> = (0..count)
            .map(|_| {
                (0..retries)
                    .map(|_| rng.gen_range(SAFE_PORT_FLOOR..=PRELOAD_CEILING))
                    .collect()
            })
            .collect();

        let mut fetched = Vec::with_capacity(count);
        if self.ours.is_concurrent() {
            let mut set = JoinSet::new();
            for (slot, ports) in plans.into_iter().enumerate() {
                let probe = Arc::clone(&probe);
                set.spawn(async move { fetch_mapping(probe.as_ref(), slot, ports).await });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Some(entry)) => fetched.push(entry),
                    Ok(None) => {}
                    Err(e) => warn!("Preload task failed: {}", e),
                }
            }
        } else {
            // allocation order matters to step-based NATs
            for (slot, ports) in plans.into_iter().enumerate() {
                if let Some(entry) = fetch_mapping(probe.as_ref(), slot, ports).await {
                    fetched.push(entry);
                }
            }
        }
        if fetched.is_empty() {
            return Err(RiftError::probe("no out-of-band mapping could be fetched"));
        }
        fetched.sort_by_key(|(slot, _)| *slot);
        Ok(fetched.into_iter().map(|(_, pre)| pre).collect())
    }

    /// Full prediction run
    ///
    /// Uses the peer's mappings as targets when given, otherwise
    /// synthesizes them. Out-of-band mappings are fetched from `probe` only
    /// when the strategy consumes them.
    ///
    /// # Errors
    ///
    /// Returns `CannotPredict` when a needed probe is missing, and
    /// propagates probe and prediction failures.
    pub async fn predict<R: Rng + ?Sized>(
        &self,
        theirs: Option<&[Mapping]>,
        probe: Option<Arc<dyn MappingProbe>>,
        retries: usize,
        rng: &mut R,
    ) -> Result<Prediction> {
        let targets = match theirs {
            Some(list) => list.to_vec(),
            None => self.targets(rng),
        };

        let preloaded = if self.strategy.needs_preload() {
            let probe = probe.ok_or(RiftError::cannot_predict(
                "strategy needs a mapping probe",
            ))?;
            self.preload(probe, targets.len(), retries, rng).await?
        } else {
            Vec::new()
        };
        let observed: Vec<Mapping> = preloaded.iter().map(|p| p.mapping).collect();

        let mappings = self.predict_all(&targets, &observed, rng)?;
        if theirs.is_some() && mappings.len() != targets.len() {
            return Err(RiftError::CannotPredict(
                format!(
                    "{} predictions for {} peer mappings",
                    mappings.len(),
                    targets.len()
                )
                .into(),
            ));
        }
        debug!(
            "Predicted {} mappings with {:?} over {}",
            mappings.len(),
            self.strategy,
            self.range
        );
        Ok(Prediction {
            mappings,
            range: self.range,
            strategy: self.strategy,
            preloaded,
        })
    }

    /// Re-aim our mappings at the reply ports the peer asked for
    ///
    /// Only NATs whose allocation depends on the destination port benefit;
    /// self punches and step-based or random deltas are left alone.
    ///
    /// # Errors
    ///
    /// Propagates per-target prediction failures.
    pub fn refine_reply_ports<R: Rng + ?Sized>(
        &self,
        ours: &mut [Mapping],
        theirs: &[Mapping],
        preloaded: &[Mapping],
        rng: &mut R,
    ) -> Result<()> {
        if self.mode == PunchMode::SelfPunch {
            return Ok(());
        }
        if matches!(
            self.ours.delta.kind,
            DeltaType::Independent | DeltaType::Dependent | DeltaType::Random
        ) {
            return Ok(());
        }

        let last = preloaded.last().copied().unwrap_or_default();
        for (i, (mine, peer)) in ours.iter_mut().zip(theirs).enumerate() {
            if peer.reply == 0 {
                continue;
            }
            let pre = preloaded.get(i).or_else(|| preloaded.first());
            let refined = self.predict_one(peer, &last, pre, rng)?;
            mine.local = refined.local;
            mine.remote = peer.reply;
        }
        Ok(())
    }
}
