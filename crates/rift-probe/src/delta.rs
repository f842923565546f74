//! Delta probing
//!
//! Infers how a NAT allocates external ports by requesting mappings from
//! chosen source ports and comparing each observation with the previous one.
//!
//! Round A uses random source ports and can detect equal, preserving and
//! independent allocation. Round B, only run when round A is inconclusive,
//! uses consecutive source ports so that a constant external step per local
//! step (dependent allocation) becomes visible. Round B always runs strictly
//! in order because each comparison depends on the preceding sample.

use rand::Rng;
use rift_core::ports::port_field_dist;
use rift_core::{Delta, DeltaConfig, DeltaType, MAX_PORT, MappingProbe, Result, RiftError, Transport};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Lowest source port used by probes
const MIN_SOURCE_PORT: u16 = 4000;

/// One observed (local, external) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Source port of the probe
    pub local: u16,
    /// External port the server saw
    pub external: u16,
}

impl From<(u16, u16)> for Observation {
    fn from((local, external): (u16, u16)) -> Self {
        Self { local, external }
    }
}

/// Counts collected over one round
///
/// Distances are kept in first-seen order so ties resolve towards the
/// distance observed earliest.
#[derive(Debug, Default, Clone)]
pub struct DeltaTally {
    equal: usize,
    preserving: usize,
    preserving_dists: Vec<u32>,
    independent: Vec<(u32, usize)>,
    dependent: Vec<(u32, usize)>,
}

fn bump(counts: &mut Vec<(u32, usize)>, dist: u32) {
    match counts.iter_mut().find(|(d, _)| *d == dist) {
        Some((_, n)) => *n += 1,
        None => counts.push((dist, 1)),
    }
}

impl DeltaTally {
    /// Tally a sequence of probe results; `None` marks a failed probe
    #[must_use]
    pub fn from_observations(observations: &[Option<Observation>]) -> Self {
        let mut tally = Self::default();
        for (i, current) in observations.iter().enumerate() {
            let Some(current) = current else { continue };
            if current.local == current.external {
                tally.equal += 1;
            }

            // A gap breaks the comparison with the previous sample
            let Some(Some(prev)) = i.checked_sub(1).map(|p| observations[p]) else {
                continue;
            };
            tally.record_pair(&prev, current);
        }
        tally
    }

    fn record_pair(&mut self, prev: &Observation, current: &Observation) {
        let local_dist = port_field_dist(current.local, prev.local);
        let mapped_dist = port_field_dist(current.external, prev.external);

        if mapped_dist == local_dist && current.external != current.local {
            self.preserving += 1;
            if !self.preserving_dists.contains(&mapped_dist) {
                self.preserving_dists.push(mapped_dist);
            }
        } else if local_dist != 1 {
            bump(&mut self.independent, mapped_dist);
        } else {
            bump(&mut self.dependent, mapped_dist);
        }
    }

    /// Verdict for round A (random source ports)
    ///
    /// Preserving only counts when more than one distinct distance was
    /// preserved; a single repeated distance is indistinguishable from an
    /// independent step.
    #[must_use]
    pub fn round_a(&self, threshold: usize) -> Option<Delta> {
        if self.equal >= threshold {
            return Some(Delta::new(DeltaType::Equal, 0));
        }
        if self.preserving_dists.len() > 1 && self.preserving >= threshold {
            return Some(Delta::new(DeltaType::Preserving, 0));
        }
        self.independent
            .iter()
            .find(|(_, n)| *n >= threshold)
            .map(|(d, _)| Delta::new(DeltaType::Independent, *d as i32))
    }

    /// Verdict for round B (consecutive source ports)
    #[must_use]
    pub fn round_b(&self, threshold: usize) -> Option<Delta> {
        self.dependent
            .iter()
            .find(|(_, n)| *n >= threshold)
            .map(|(d, _)| Delta::new(DeltaType::Dependent, *d as i32))
    }
}

/// Infer a delta from already collected rounds
#[must_use]
pub fn infer_delta(
    round_a: &[Option<Observation>],
    round_b: Option<&[Option<Observation>]>,
    threshold: usize,
) -> Delta {
    if let Some(delta) = DeltaTally::from_observations(round_a).round_a(threshold) {
        return delta;
    }
    round_b
        .and_then(|b| DeltaTally::from_observations(b).round_b(threshold))
        .unwrap_or_else(Delta::random)
}

/// Issues mapping probes and classifies the NAT's delta
#[derive(Debug, Clone, Default)]
pub struct DeltaProber {
    config: DeltaConfig,
}

impl DeltaProber {
    /// Create a prober
    #[must_use]
    pub fn new(config: DeltaConfig) -> Self {
        Self { config }
    }

    /// Probe `source` and infer its delta
    ///
    /// `concurrent` allows round A to fire all probes at once; round B is
    /// always sequential.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the test count cannot fit the port space.
    pub async fn probe<R: Rng + ?Sized>(
        &self,
        source: Arc<dyn MappingProbe>,
        concurrent: bool,
        rng: &mut R,
    ) -> Result<Delta> {
        let count = self.config.test_count;
        if count < 2 || count > usize::from(MAX_PORT - MIN_SOURCE_PORT) {
            return Err(RiftError::InvalidConfig(
                format!("delta test count {count} out of range").into(),
            ));
        }

        // Ports are drawn up front so no RNG is held across awaits
        let random_ports: Vec<u16> = (0..count)
            .map(|_| rng.gen_range(MIN_SOURCE_PORT..MAX_PORT))
            .collect();
        let start = rng.gen_range(MIN_SOURCE_PORT..MAX_PORT - count as u16);
        let consecutive: Vec<u16> = (0..count as u16).map(|i| start + i).collect();

        let round_a = if concurrent {
            self.run_concurrent(&source, &random_ports).await
        } else {
            self.run_sequential(&source, &random_ports).await
        };
        debug!("Delta round A: {:?}", round_a);

        let threshold = self.config.threshold;
        if let Some(delta) = DeltaTally::from_observations(&round_a).round_a(threshold) {
            info!("NAT delta is {}", delta);
            return Ok(delta);
        }

        let round_b = self.run_sequential(&source, &consecutive).await;
        debug!("Delta round B: {:?}", round_b);
        let delta = DeltaTally::from_observations(&round_b)
            .round_b(threshold)
            .unwrap_or_else(Delta::random);
        info!("NAT delta is {}", delta);
        Ok(delta)
    }

    async fn observe(&self, source: &Arc<dyn MappingProbe>, port: u16) -> Option<Observation> {
        let request = source.get_mapping(Transport::Tcp, port);
        match tokio::time::timeout(self.config.probe_timeout, request).await {
            // The held socket is dropped here, closing the probe connection
            Ok(Ok(mapping)) => Some(Observation {
                local: mapping.local,
                external: mapping.external,
            }),
            Ok(Err(e)) => {
                debug!("Delta probe from port {} failed: {}", port, e);
                None
            }
            Err(_) => {
                debug!("Delta probe from port {} timed out", port);
                None
            }
        }
    }

    async fn run_sequential(
        &self,
        source: &Arc<dyn MappingProbe>,
        ports: &[u16],
    ) -> Vec<Option<Observation>> {
        let mut out = Vec::with_capacity(ports.len());
        for &port in ports {
            out.push(self.observe(source, port).await);
        }
        out
    }

    async fn run_concurrent(
        &self,
        source: &Arc<dyn MappingProbe>,
        ports: &[u16],
    ) -> Vec<Option<Observation>> {
        let mut set = JoinSet::new();
        for (index, &port) in ports.iter().enumerate() {
            let prober = self.clone();
            let source = Arc::clone(source);
            set.spawn(async move { (index, prober.observe(&source, port).await) });
        }

        // Results are compared in issue order, not completion order
        let mut out = vec![None; ports.len()];
        while let Some(joined) = set.join_next().await {
            if let Ok((index, observation)) = joined {
                out[index] = observation;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rift_core::ProbedMapping;
    use std::net::IpAddr;

    fn observations(pairs: &[(u16, u16)]) -> Vec<Option<Observation>> {
        pairs.iter().map(|&p| Some(p.into())).collect()
    }

    #[test]
    fn test_preserving_sequence() {
        let round = observations(&[
            (4000, 50000),
            (10000, 56000),
            (10200, 56200),
            (10400, 56400),
            (11000, 57000),
            (12000, 58000),
            (4620, 2333),
            (4630, 2334),
        ]);
        assert_eq!(infer_delta(&round, None, 5), Delta::new(DeltaType::Preserving, 0));
    }

    #[test]
    fn test_equal_sequence() {
        let round = observations(&[
            (4567, 4567),
            (48234, 48234),
            (6823, 6823),
            (60000, 60000),
            (50000, 50000),
            (60001, 60001),
            (5000, 5001),
            (5000, 5001),
        ]);
        assert_eq!(infer_delta(&round, None, 5), Delta::new(DeltaType::Equal, 0));
    }

    #[test]
    fn test_independent_sequence() {
        let locals = [5000, 7000, 9000, 12000, 20000, 30000, 31000, 40000];
        let pairs: Vec<(u16, u16)> = locals
            .iter()
            .enumerate()
            .map(|(i, &l)| (l, 40000 + 10 * i as u16))
            .collect();
        assert_eq!(
            infer_delta(&observations(&pairs), None, 5),
            Delta::new(DeltaType::Independent, 10)
        );
    }

    #[test]
    fn test_dependent_sequence() {
        let random = observations(&[
            (5000, 33000),
            (9000, 12000),
            (21000, 61000),
            (15000, 7000),
            (42000, 25000),
            (30000, 48000),
            (8000, 19000),
            (50000, 2000),
        ]);
        let consecutive: Vec<(u16, u16)> = (0..8).map(|i| (20000 + i, 30000 + 20 * i)).collect();
        let consecutive = observations(&consecutive);

        assert_eq!(
            infer_delta(&random, Some(&consecutive), 5),
            Delta::new(DeltaType::Dependent, 20)
        );
    }

    #[test]
    fn test_random_sequence() {
        let random = observations(&[
            (5000, 33000),
            (9000, 12000),
            (21000, 61000),
            (15000, 7000),
            (42000, 25000),
            (30000, 48000),
            (8000, 19000),
            (50000, 2000),
        ]);
        let consecutive = observations(&[
            (20000, 3000),
            (20001, 9000),
            (20002, 4000),
            (20003, 60000),
            (20004, 11000),
            (20005, 52000),
            (20006, 31000),
            (20007, 17000),
        ]);
        assert_eq!(infer_delta(&random, Some(&consecutive), 5), Delta::random());
    }

    #[test]
    fn test_single_preserved_distance_is_not_preserving() {
        // Every pair preserves the same distance: indistinguishable from a
        // constant step, so it must not be reported as preserving
        let pairs: Vec<(u16, u16)> = (0..8).map(|i| (10000 + 7 * i, 20000 + 7 * i)).collect();
        let delta = infer_delta(&observations(&pairs), None, 5);
        assert_ne!(delta.kind, DeltaType::Preserving);
    }

    #[test]
    fn test_gaps_break_pairs() {
        let mut round = observations(&[
            (5000, 40000),
            (7000, 40010),
            (9000, 40020),
            (12000, 40030),
            (20000, 40040),
            (30000, 40050),
            (31000, 40060),
            (40000, 40070),
        ]);
        round[2] = None;
        round[5] = None;
        // Only 3 comparable pairs remain
        assert_eq!(infer_delta(&round, None, 5), Delta::random());
        assert_eq!(infer_delta(&round, None, 3), Delta::new(DeltaType::Independent, 10));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// A constant external step over random sources is independent
            #[test]
            fn constant_step_is_independent(
                locals in prop::collection::hash_set(4000u16..60000, 8),
                start in 2000u16..30000,
                step in 2u16..500,
            ) {
                let pairs: Vec<(u16, u16)> = locals
                    .iter()
                    .enumerate()
                    .map(|(i, &l)| (l, start + step * i as u16))
                    .collect();
                // A pair whose sources sit one apart looks dependent
                prop_assume!(pairs.windows(2).all(|w| w[0].0.abs_diff(w[1].0) != 1));
                prop_assume!(pairs.windows(2).all(|w| w[0].0.abs_diff(w[1].0) != step));
                prop_assume!(pairs.iter().all(|&(l, e)| l != e));
                prop_assert_eq!(
                    infer_delta(&observations(&pairs), None, 5),
                    Delta::new(DeltaType::Independent, i32::from(step))
                );
            }

            /// Failed probes alone never yield a verdict
            #[test]
            fn silence_is_random(count in 0usize..20) {
                let round = vec![None; count];
                prop_assert_eq!(infer_delta(&round, Some(&round), 1), Delta::random());
            }
        }
    }

    /// NAT whose external port advances by `step` per local port step
    struct DependentNat {
        step: u32,
    }

    #[async_trait]
    impl MappingProbe for DependentNat {
        async fn get_mapping(&self, _: Transport, source_port: u16) -> Result<ProbedMapping> {
            let external = 1025 + (u32::from(source_port) * self.step) % 60000;
            Ok(ProbedMapping {
                local: source_port,
                external: external as u16,
                socket: None,
            })
        }

        async fn external_address(&self) -> Result<IpAddr> {
            Ok(IpAddr::from([203, 0, 113, 1]))
        }
    }

    /// NAT that keeps the source port
    struct EqualNat;

    #[async_trait]
    impl MappingProbe for EqualNat {
        async fn get_mapping(&self, _: Transport, source_port: u16) -> Result<ProbedMapping> {
            Ok(ProbedMapping {
                local: source_port,
                external: source_port,
                socket: None,
            })
        }

        async fn external_address(&self) -> Result<IpAddr> {
            Ok(IpAddr::from([203, 0, 113, 1]))
        }
    }

    #[tokio::test]
    async fn test_probe_equal_nat() {
        let mut rng = StdRng::seed_from_u64(1);
        let delta = DeltaProber::default()
            .probe(Arc::new(EqualNat), true, &mut rng)
            .await
            .unwrap();
        assert_eq!(delta, Delta::new(DeltaType::Equal, 0));
    }

    #[tokio::test]
    async fn test_probe_dependent_nat() {
        let mut rng = StdRng::seed_from_u64(42);
        let delta = DeltaProber::default()
            .probe(Arc::new(DependentNat { step: 20 }), false, &mut rng)
            .await
            .unwrap();
        assert_eq!(delta, Delta::new(DeltaType::Dependent, 20));
    }

    #[tokio::test]
    async fn test_invalid_test_count() {
        let prober = DeltaProber::new(DeltaConfig {
            test_count: 1,
            ..DeltaConfig::default()
        });
        let mut rng = StdRng::seed_from_u64(1);
        assert!(prober.probe(Arc::new(EqualNat), true, &mut rng).await.is_err());
    }
}
