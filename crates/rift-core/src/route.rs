//! Routes: an interface address plus the external address it maps to
//!
//! Interface and routing-table enumeration happen elsewhere; the engine only
//! needs to bind reusable sockets on a route and know its addresses.

use crate::addr::AddressFamily;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpSocket;

/// A local interface address usable for punching
pub trait Route: Send + Sync {
    /// Address bound on the interface
    fn local_ip(&self) -> IpAddr;

    /// Address the NAT presents to the internet
    fn external_ip(&self) -> IpAddr;

    /// Interface index advertised in peer addresses
    fn interface_index(&self) -> u8;

    /// Address family of the route
    fn af(&self) -> AddressFamily {
        AddressFamily::of(&self.local_ip())
    }

    /// Whether this route can reach addresses of `af`
    fn supports(&self, af: AddressFamily) -> bool {
        self.af() == af
    }

    /// Whether `ip` is one of this route's own addresses
    fn is_own(&self, ip: IpAddr) -> bool {
        ip == self.local_ip() || ip == self.external_ip()
    }

    /// Bind an unconnected TCP socket on `port` with address reuse enabled
    ///
    /// Port zero asks the OS for an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created or bound.
    fn bind(&self, port: u16) -> io::Result<TcpSocket>;
}

/// Route backed by real sockets
#[derive(Debug, Clone)]
pub struct ReusableRoute {
    local_ip: IpAddr,
    external_ip: IpAddr,
    if_index: u8,
}

impl ReusableRoute {
    /// Create a route; `external_ip` equals `local_ip` when there is no NAT
    #[must_use]
    pub fn new(local_ip: IpAddr, external_ip: IpAddr, if_index: u8) -> Self {
        Self {
            local_ip,
            external_ip,
            if_index,
        }
    }

    /// Route on the IPv4 loopback interface
    #[must_use]
    pub fn loopback() -> Self {
        let ip = IpAddr::from([127, 0, 0, 1]);
        Self::new(ip, ip, 0)
    }
}

impl Route for ReusableRoute {
    fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    fn external_ip(&self) -> IpAddr {
        self.external_ip
    }

    fn interface_index(&self) -> u8 {
        self.if_index
    }

    fn bind(&self, port: u16) -> io::Result<TcpSocket> {
        let addr = SocketAddr::new(self.local_ip, port);
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

        // Punch sockets share their port with listeners and earlier attempts
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        let std_stream: std::net::TcpStream = socket.into();
        Ok(TcpSocket::from_std_stream(std_stream))
    }
}
