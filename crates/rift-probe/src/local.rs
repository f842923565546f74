//! Mapping probe for routes without NAT
//!
//! On an open route, or between processes on one host, the external mapping
//! is the local socket itself. The probe binds the requested port on the
//! route and reports it unchanged, holding the socket so the port stays
//! reserved until the caller drops it.

use async_trait::async_trait;
use rift_core::{
    HeldSocket, MappingProbe, ProbedMapping, Result, RiftError, Route, Transport,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Identity mapping probe bound to one route
#[derive(Clone)]
pub struct LocalMappingProbe {
    route: Arc<dyn Route>,
}

impl LocalMappingProbe {
    /// Create a probe on `route`
    #[must_use]
    pub fn new(route: Arc<dyn Route>) -> Self {
        Self { route }
    }
}

#[async_trait]
impl MappingProbe for LocalMappingProbe {
    async fn get_mapping(&self, transport: Transport, source_port: u16) -> Result<ProbedMapping> {
        match transport {
            Transport::Tcp => {
                let socket = self.route.bind(source_port)?;
                let local = socket.local_addr()?.port();
                Ok(ProbedMapping {
                    local,
                    external: local,
                    socket: Some(HeldSocket::Bound(socket)),
                })
            }
            Transport::Udp => {
                let socket =
                    UdpSocket::bind(SocketAddr::new(self.route.local_ip(), source_port)).await?;
                let local = socket.local_addr()?.port();
                Ok(ProbedMapping {
                    local,
                    external: local,
                    socket: Some(HeldSocket::Datagram(socket)),
                })
            }
        }
    }

    async fn external_address(&self) -> Result<IpAddr> {
        let ip = self.route.external_ip();
        if ip.is_unspecified() {
            return Err(RiftError::probe("route has no external address"));
        }
        Ok(ip)
    }
}
