//! Two-peer test fixture for integration testing
//!
//! Wires two punch coordinators to one in-process signaling hub so a test
//! can drive a complete punch without any network services.
//!
//! # Example
//!
//! ```no_run
//! use rift_integration_tests::fixtures::TwoPeerFixture;
//!
//! #[tokio::test(flavor = "multi_thread")]
//! async fn test_punch() {
//!     let fixture = TwoPeerFixture::new().await.unwrap();
//!     let (stream, punched) = fixture.punch("pipe-1").await.unwrap();
//!     // ... exchange data ...
//!     fixture.cleanup().await;
//! }
//! ```

use rift_core::{
    Delta, IfaceEntry, NatDescriptor, NatType, PeerAddr, PunchConfig, ReusableRoute, Result,
    Route, SyncedClock,
};
use rift_probe::LocalMappingProbe;
use rift_punch::{Endpoint, PunchCoordinator, Punched, SignalHub};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Two coordinators on the loopback route
pub struct TwoPeerFixture {
    /// Shared signaling hub
    pub hub: SignalHub,
    /// Initiating side
    pub alice: PunchCoordinator,
    /// Answering side
    pub bob: PunchCoordinator,
    /// Address bob advertises
    pub bob_addr: PeerAddr,
}

impl TwoPeerFixture {
    /// Short windows suitable for loopback punches
    pub fn fast_config() -> PunchConfig {
        PunchConfig {
            window: Duration::from_millis(600),
            meet_delay: Duration::from_millis(300),
            attempt_timeout: Duration::from_millis(200),
            protocol_deadline: Duration::from_secs(10),
            ..PunchConfig::default()
        }
    }

    /// Create and start both peers with [`Self::fast_config`]
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if a coordinator cannot start.
    pub async fn new() -> Result<Self> {
        Self::with_config(Self::fast_config()).await
    }

    /// Create and start both peers with a custom punch configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if a coordinator cannot start.
    pub async fn with_config(config: PunchConfig) -> Result<Self> {
        let hub = SignalHub::new();
        let alice = Self::peer(&hub, "alice", config.clone());
        let bob = Self::peer(&hub, "bob", config);
        alice.start().await?;
        bob.start().await?;
        Ok(Self {
            hub,
            alice,
            bob,
            bob_addr: Self::addr("bob"),
        })
    }

    /// Loopback address advertised by `node_id`
    pub fn addr(node_id: &str) -> PeerAddr {
        let loopback = "127.0.0.1".parse().expect("valid loopback");
        PeerAddr::new(node_id).with_interface(IfaceEntry {
            if_index: 0,
            addr_index: 0,
            ext_ip: loopback,
            nic_ip: loopback,
            port: 40000,
            nat_type: NatType::OpenInternet,
            delta: Delta::na(),
        })
    }

    fn peer(hub: &SignalHub, node_id: &str, config: PunchConfig) -> PunchCoordinator {
        let (signaling, inbox) = hub.join(node_id);
        let route: Arc<dyn Route> = Arc::new(ReusableRoute::loopback());
        let endpoint = Endpoint {
            addr: Self::addr(node_id),
            route: Arc::clone(&route),
            nat: NatDescriptor::open(),
            probe: Some(Arc::new(LocalMappingProbe::new(route))),
        };
        let coordinator =
            PunchCoordinator::new(endpoint, Arc::new(signaling), SyncedClock::local(), config);
        coordinator.spawn_listener(inbox);
        coordinator
    }

    /// Punch from alice to bob over `pipe_id`
    ///
    /// # Errors
    ///
    /// Returns the first failure of either side.
    pub async fn punch(&self, pipe_id: &str) -> Result<(TcpStream, Punched)> {
        let (connected, accepted) =
            tokio::join!(self.alice.connect(&self.bob_addr, pipe_id), self.bob.accept());
        Ok((connected?, accepted?))
    }

    /// Stop both coordinators
    pub async fn cleanup(self) {
        self.alice.close().await;
        self.bob.close().await;
    }
}
