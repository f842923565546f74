//! Capabilities consumed from probing collaborators
//!
//! The STUN wire codec and the NTP client live outside the engine. The engine
//! talks to them through these traits, which expose only the semantic
//! operations classification, delta probing, prediction and clock
//! synchronization need. Implementations must tolerate packet loss; callers
//! apply their own timeouts and retries.

use crate::error::Result;
use crate::mapping::HeldSocket;
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};

/// Transport protocol a mapping is requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// TCP mappings (used for punching)
    Tcp,
    /// UDP mappings
    Udp,
}

/// A mapping observed by a mapping server
#[derive(Debug)]
pub struct ProbedMapping {
    /// Port we sent from
    pub local: u16,
    /// Port the server saw
    pub external: u16,
    /// Socket that created the mapping
    pub socket: Option<HeldSocket>,
}

/// STUN-equivalent mapping service
#[async_trait]
pub trait MappingProbe: Send + Sync {
    /// Request a mapping from `source_port` (zero lets the OS choose)
    ///
    /// # Errors
    ///
    /// Returns `Probe` or `Timeout` if no mapping could be observed.
    async fn get_mapping(&self, transport: Transport, source_port: u16) -> Result<ProbedMapping>;

    /// External address of the route
    ///
    /// # Errors
    ///
    /// Returns `Probe` or `Timeout` if the server did not answer.
    async fn external_address(&self) -> Result<IpAddr>;
}

/// Change-request flags of a binding request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeRequest {
    /// Ask the server to reply from its alternate IP
    pub change_ip: bool,
    /// Ask the server to reply from its alternate port
    pub change_port: bool,
}

impl ChangeRequest {
    /// Reply from the address the request was sent to
    pub const NONE: Self = Self {
        change_ip: false,
        change_port: false,
    };

    /// Reply from the alternate IP and port
    pub const IP_AND_PORT: Self = Self {
        change_ip: true,
        change_port: true,
    };

    /// Reply from the alternate port only
    pub const PORT: Self = Self {
        change_ip: false,
        change_port: true,
    };
}

/// One binding request on a classification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingRequest {
    /// Server address the request is sent to
    pub dest: SocketAddr,
    /// Address the reply must come from to count
    pub expect_from: SocketAddr,
    /// Change-request flags
    pub change: ChangeRequest,
}

/// Reply to a binding request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingReply {
    /// Our address as the server saw it
    pub mapped: SocketAddr,
}

/// Datagram pipe bound once per route, used for NAT classification
#[async_trait]
pub trait NatTestChannel: Send + Sync {
    /// Address the channel is bound to
    fn bind_ip(&self) -> IpAddr;

    /// Send a binding request and wait for the matching reply
    ///
    /// # Errors
    ///
    /// Returns `Probe` or `Timeout` if no matching reply arrived.
    async fn binding(&self, request: BindingRequest) -> Result<BindingReply>;
}

/// A classification server with its alternate ("changed") address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NatTestServer {
    /// Address requests are normally sent to
    pub primary: SocketAddr,
    /// Alternate IP and port the server can reply from
    pub secondary: SocketAddr,
}

/// Trusted reference clock
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Reference time as seconds since the UNIX epoch
    ///
    /// # Errors
    ///
    /// Returns `Probe` or `Timeout` if the source did not answer.
    async fn query(&self) -> Result<f64>;
}
