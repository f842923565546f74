//! Test helpers for probing and timing-sensitive tests
//!
//! Provides simulated NATs and reference clocks so probing can be exercised
//! without real STUN or NTP servers, plus CI-aware timeouts.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rift_core::ports::{field_wrap, port_wrap};
use rift_core::time::local_now;
use rift_core::{
    BindingReply, BindingRequest, Delta, DeltaType, MappingProbe, NatTestChannel, NatTestServer,
    NatType, PortRange, ProbedMapping, Result, RiftError, TimeSource, Transport,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::Duration;

/// Offset applied by a simulated preserving NAT
pub const PRESERVING_OFFSET: u16 = 1000;

/// First external port handed out by a simulated independent NAT
pub const INDEPENDENT_START: u16 = 20000;

/// Base of a simulated dependent NAT's port function
const DEPENDENT_BASE: i64 = 7;

/// Lowest port a simulated dependent NAT allocates
const DEPENDENT_FLOOR: u16 = 2000;

struct NatState {
    next_external: u16,
    allocated: usize,
    rng: StdRng,
}

/// A NAT in front of one host, answering both mapping probes and
/// classification requests the way a real NAT of that kind would
pub struct SimulatedNat {
    nat_type: NatType,
    delta: Delta,
    bind_ip: IpAddr,
    ext_ip: IpAddr,
    state: Mutex<NatState>,
}

impl SimulatedNat {
    /// Create a NAT with the given filtering and allocation behaviour
    pub fn new(nat_type: NatType, delta: Delta) -> Self {
        Self {
            nat_type,
            delta,
            bind_ip: IpAddr::from([192, 168, 1, 20]),
            ext_ip: IpAddr::from([203, 0, 113, 7]),
            state: Mutex::new(NatState {
                next_external: INDEPENDENT_START,
                allocated: 0,
                rng: StdRng::seed_from_u64(0x5eed),
            }),
        }
    }

    /// Number of mappings allocated so far
    pub fn allocated(&self) -> usize {
        self.state.lock().map(|s| s.allocated).unwrap_or_default()
    }

    /// External port the NAT will hand out for `local`, without allocating
    pub fn peek(&self, local: u16) -> u16 {
        let mut state = self.state.lock().expect("nat state poisoned");
        let saved = (state.next_external, state.allocated);
        let port = self.allocate(&mut state, local);
        (state.next_external, state.allocated) = saved;
        port
    }

    fn allocate(&self, state: &mut NatState, local: u16) -> u16 {
        state.allocated += 1;
        match self.delta.kind {
            DeltaType::Equal => local,
            DeltaType::Preserving => local - PRESERVING_OFFSET,
            DeltaType::Independent => {
                let port = state.next_external;
                state.next_external =
                    port_wrap(i64::from(port) + i64::from(self.delta.value));
                port
            }
            DeltaType::Dependent => {
                let range = PortRange::new(DEPENDENT_FLOOR, rift_core::MAX_PORT)
                    .unwrap_or(PortRange::FULL);
                field_wrap(
                    DEPENDENT_BASE + i64::from(local) * i64::from(self.delta.value),
                    range,
                )
            }
            DeltaType::Na | DeltaType::Random => state.rng.gen_range(5000..65000),
        }
    }

    /// Two classification servers with distinct addresses
    pub fn servers() -> Vec<NatTestServer> {
        (1..=2)
            .map(|n| NatTestServer {
                primary: SocketAddr::new(IpAddr::from([198, 51, n, 1]), 3478),
                secondary: SocketAddr::new(IpAddr::from([198, 51, n, 2]), 3479),
            })
            .collect()
    }
}

#[async_trait]
impl MappingProbe for SimulatedNat {
    async fn get_mapping(&self, _transport: Transport, source_port: u16) -> Result<ProbedMapping> {
        if self.nat_type == NatType::Blocked {
            return Err(RiftError::timeout("mapping server unreachable"));
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| RiftError::probe("nat state poisoned"))?;
        let local = if source_port == 0 {
            30000 + state.allocated as u16
        } else {
            source_port
        };
        let external = self.allocate(&mut state, local);
        Ok(ProbedMapping {
            local,
            external,
            socket: None,
        })
    }

    async fn external_address(&self) -> Result<IpAddr> {
        Ok(self.ext_ip)
    }
}

#[async_trait]
impl NatTestChannel for SimulatedNat {
    fn bind_ip(&self) -> IpAddr {
        self.bind_ip
    }

    async fn binding(&self, request: BindingRequest) -> Result<BindingReply> {
        let change = request.change;
        let delivered = match self.nat_type {
            NatType::OpenInternet | NatType::FullCone => true,
            NatType::RestrictIp => !change.change_ip,
            NatType::RestrictPort | NatType::Symmetric | NatType::SymmetricFirewall => {
                !change.change_ip && !change.change_port
            }
            NatType::Blocked => false,
        };
        if !delivered {
            return Err(RiftError::timeout("reply filtered by NAT"));
        }

        let ip = if self.nat_type == NatType::OpenInternet {
            self.bind_ip
        } else {
            self.ext_ip
        };
        // Symmetric NATs allocate a fresh port per destination
        let port = match (self.nat_type, request.dest.ip()) {
            (NatType::Symmetric, IpAddr::V4(v4)) => 40000 + u16::from(v4.octets()[3]),
            _ => 40000,
        };
        Ok(BindingReply {
            mapped: SocketAddr::new(ip, port),
        })
    }
}

/// Reference clock that lags or leads the local clock by a fixed skew
pub struct SkewedClock {
    skew_ms: f64,
    jitter_ms: f64,
    rng: Mutex<StdRng>,
}

impl SkewedClock {
    /// Reference clock such that local minus reference is `skew_ms`
    pub fn new(skew_ms: f64, jitter_ms: f64) -> Self {
        Self {
            skew_ms,
            jitter_ms,
            rng: Mutex::new(StdRng::seed_from_u64(7)),
        }
    }
}

#[async_trait]
impl TimeSource for SkewedClock {
    async fn query(&self) -> Result<f64> {
        let jitter = if self.jitter_ms > 0.0 {
            self.rng
                .lock()
                .map(|mut rng| rng.gen_range(-self.jitter_ms..self.jitter_ms))
                .unwrap_or_default()
        } else {
            0.0
        };
        Ok(local_now() - (self.skew_ms + jitter) / 1000.0)
    }
}

/// Check if running in a CI environment
///
/// Checks common CI environment variables.
pub fn is_ci_environment() -> bool {
    std::env::var("CI").is_ok()
        || std::env::var("GITHUB_ACTIONS").is_ok()
        || std::env::var("GITLAB_CI").is_ok()
        || std::env::var("CIRCLECI").is_ok()
}

/// Get CI-adjusted timeout duration
///
/// Returns a timeout that's longer in CI environments to account for
/// resource contention and slower machines.
pub fn ci_timeout(base_timeout: Duration) -> Duration {
    if is_ci_environment() {
        base_timeout.mul_f32(3.0)
    } else {
        base_timeout.mul_f32(1.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_independent_nat_steps() {
        let nat = SimulatedNat::new(NatType::FullCone, Delta::new(DeltaType::Independent, 7));
        assert_eq!(nat.peek(5000), INDEPENDENT_START);
        let a = nat.get_mapping(Transport::Tcp, 5000).await.unwrap();
        let b = nat.get_mapping(Transport::Tcp, 9000).await.unwrap();
        assert_eq!(a.external, INDEPENDENT_START);
        assert_eq!(b.external, INDEPENDENT_START + 7);
        assert_eq!(nat.allocated(), 2);
    }

    #[tokio::test]
    async fn test_filtering() {
        let nat = SimulatedNat::new(NatType::RestrictIp, Delta::na());
        let server = SimulatedNat::servers()[0];
        let blocked = BindingRequest {
            dest: server.primary,
            expect_from: server.secondary,
            change: rift_core::ChangeRequest::IP_AND_PORT,
        };
        assert!(nat.binding(blocked).await.is_err());

        let allowed = BindingRequest {
            change: rift_core::ChangeRequest::PORT,
            ..blocked
        };
        assert!(nat.binding(allowed).await.is_ok());
    }

    #[test]
    fn test_ci_timeout() {
        let base = Duration::from_secs(10);
        let adjusted = ci_timeout(base);

        if is_ci_environment() {
            assert_eq!(adjusted, Duration::from_secs(30));
        } else {
            assert_eq!(adjusted, Duration::from_secs(15));
        }
    }
}
