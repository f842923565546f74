//! NAT type classification
//!
//! Classic RFC 3489 style tests, raced across several servers:
//!
//! | Test | Change request | Sent to             | Reply expected from     |
//! |------|----------------|---------------------|-------------------------|
//! | 1    | none           | primary IP/port     | primary IP/port         |
//! | 2    | IP and port    | primary IP/port     | secondary IP/port       |
//! | 3    | none           | secondary IP, primary port | secondary IP, primary port |
//! | 4    | port           | secondary IP, primary port | secondary IP/port |
//!
//! Tests 1 and 2 run first. Tests 3 and 4 only run if the first phase was
//! inconclusive, because they depend on the mappings it created.

use rift_core::{
    BindingReply, BindingRequest, ChangeRequest, ClassifierConfig, NatTestChannel, NatTestServer,
    NatType, Result, RiftError,
};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// One of the four classification tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Test {
    Mapped,
    ChangeIpPort,
    SecondaryIp,
    ChangePort,
}

impl Test {
    fn request(self, server: &NatTestServer) -> BindingRequest {
        let secondary_ip_primary_port = SocketAddr::new(server.secondary.ip(), server.primary.port());
        match self {
            Test::Mapped => BindingRequest {
                dest: server.primary,
                expect_from: server.primary,
                change: ChangeRequest::NONE,
            },
            Test::ChangeIpPort => BindingRequest {
                dest: server.primary,
                expect_from: server.secondary,
                change: ChangeRequest::IP_AND_PORT,
            },
            Test::SecondaryIp => BindingRequest {
                dest: secondary_ip_primary_port,
                expect_from: secondary_ip_primary_port,
                change: ChangeRequest::NONE,
            },
            Test::ChangePort => BindingRequest {
                dest: secondary_ip_primary_port,
                expect_from: server.secondary,
                change: ChangeRequest::PORT,
            },
        }
    }
}

/// Keep servers whose primary and secondary IPs are unique across the list
///
/// Two servers sharing an IP would make "reply from a different IP" tests
/// ambiguous.
#[must_use]
pub fn filter_servers(servers: &[NatTestServer], max: usize) -> Vec<NatTestServer> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for server in servers {
        if out.len() >= max {
            break;
        }
        let (a, b) = (server.primary.ip(), server.secondary.ip());
        if a == b || seen.contains(&a) || seen.contains(&b) {
            continue;
        }
        seen.insert(a);
        seen.insert(b);
        out.push(*server);
    }
    out
}

/// Replies gathered across both phases
#[derive(Default)]
struct Observations {
    any_reply: bool,
    mapped: HashMap<usize, SocketAddr>,
    reuses_mapping: bool,
}

/// Buckets a route's NAT into one of the seven types
#[derive(Debug, Clone, Default)]
pub struct NatClassifier {
    config: ClassifierConfig,
}

impl NatClassifier {
    /// Create a classifier
    #[must_use]
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Classify the NAT behind `channel`
    ///
    /// An inconclusive run is not an error: it yields `Blocked` when nothing
    /// answered and `Symmetric` or `RestrictPort` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if no usable servers remain after filtering.
    pub async fn classify(
        &self,
        channel: Arc<dyn NatTestChannel>,
        servers: &[NatTestServer],
    ) -> Result<NatType> {
        let servers = filter_servers(servers, self.config.max_servers);
        if servers.is_empty() {
            return Err(RiftError::InvalidConfig("no usable NAT test servers".into()));
        }

        let mut seen = Observations::default();

        let phase_one = [Test::Mapped, Test::ChangeIpPort];
        if let Some(nat) = self.run_phase(&channel, &servers, &phase_one, &mut seen).await {
            info!("NAT classified as {} in phase 1", nat);
            return Ok(nat);
        }

        let phase_two = [Test::SecondaryIp, Test::ChangePort];
        if let Some(nat) = self.run_phase(&channel, &servers, &phase_two, &mut seen).await {
            info!("NAT classified as {} in phase 2", nat);
            return Ok(nat);
        }

        let nat = if !seen.any_reply {
            NatType::Blocked
        } else if seen.reuses_mapping {
            NatType::RestrictPort
        } else {
            NatType::Symmetric
        };
        info!("NAT classified as {} by elimination", nat);
        Ok(nat)
    }

    /// Race `tests` against every server until a conclusive reply or timeout
    async fn run_phase(
        &self,
        channel: &Arc<dyn NatTestChannel>,
        servers: &[NatTestServer],
        tests: &[Test],
        seen: &mut Observations,
    ) -> Option<NatType> {
        let mut set = JoinSet::new();
        for (index, server) in servers.iter().enumerate() {
            for &test in tests {
                let channel = Arc::clone(channel);
                let request = test.request(server);
                set.spawn(async move { (index, test, channel.binding(request).await) });
            }
        }

        let deadline = tokio::time::sleep(self.config.phase_timeout);
        tokio::pin!(deadline);

        let bind_ip = channel.bind_ip();
        let verdict = loop {
            tokio::select! {
                _ = &mut deadline => break None,
                joined = set.join_next() => {
                    let Some(joined) = joined else { break None };
                    let Ok((index, test, result)) = joined else { continue };
                    match result {
                        Ok(reply) => {
                            seen.any_reply = true;
                            if let Some(nat) = Self::interpret(index, test, reply, bind_ip, seen) {
                                break Some(nat);
                            }
                        }
                        Err(e) => debug!("NAT test {:?} on server {} failed: {}", test, index, e),
                    }
                }
            }
        };

        // Outstanding probes are abandoned
        set.abort_all();
        verdict
    }

    fn interpret(
        index: usize,
        test: Test,
        reply: BindingReply,
        bind_ip: std::net::IpAddr,
        seen: &mut Observations,
    ) -> Option<NatType> {
        match test {
            Test::Mapped => {
                seen.mapped.insert(index, reply.mapped);
                (reply.mapped.ip() == bind_ip).then_some(NatType::OpenInternet)
            }
            Test::ChangeIpPort => Some(if reply.mapped.ip() == bind_ip {
                NatType::OpenInternet
            } else {
                NatType::FullCone
            }),
            Test::SecondaryIp => {
                if seen.mapped.get(&index) == Some(&reply.mapped) {
                    seen.reuses_mapping = true;
                }
                None
            }
            Test::ChangePort => Some(NatType::RestrictIp),
        }
    }
}
