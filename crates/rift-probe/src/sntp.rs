//! SNTP time source
//!
//! Minimal RFC 4330 client: one 48-byte mode 3 request, read the transmit
//! timestamp of the mode 4 reply.

use async_trait::async_trait;
use rift_core::{Result, RiftError, TimeSource};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// SNTP packet size
const PACKET_SIZE: usize = 48;

/// LI = 0, VN = 3, Mode = 3 (client)
const CLIENT_HEADER: u8 = 0x1B;

/// Server mode in the low three bits of the first byte
const MODE_SERVER: u8 = 4;

/// Seconds between the NTP era (1900) and the UNIX epoch
const NTP_UNIX_OFFSET: f64 = 2_208_988_800.0;

/// Default query timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Queries one SNTP server
#[derive(Debug, Clone)]
pub struct SntpSource {
    server: SocketAddr,
    timeout: Duration,
}

impl SntpSource {
    /// Create a source for `server`
    #[must_use]
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set query timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Server address
    #[must_use]
    pub fn server(&self) -> SocketAddr {
        self.server
    }
}

/// Build a client request
#[must_use]
pub fn request_packet() -> [u8; PACKET_SIZE] {
    let mut packet = [0u8; PACKET_SIZE];
    packet[0] = CLIENT_HEADER;
    packet
}

/// Extract the transmit timestamp as UNIX seconds
///
/// # Errors
///
/// Returns `Probe` for short packets, non-server replies or an unset
/// timestamp.
pub fn parse_reply(packet: &[u8]) -> Result<f64> {
    if packet.len() < PACKET_SIZE {
        return Err(RiftError::probe("short SNTP reply"));
    }
    if packet[0] & 0x07 != MODE_SERVER {
        return Err(RiftError::probe("SNTP reply is not in server mode"));
    }
    let secs = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]);
    let frac = u32::from_be_bytes([packet[44], packet[45], packet[46], packet[47]]);
    if secs == 0 {
        return Err(RiftError::probe("SNTP transmit timestamp unset"));
    }
    Ok(f64::from(secs) - NTP_UNIX_OFFSET + f64::from(frac) / 4_294_967_296.0)
}

#[async_trait]
impl TimeSource for SntpSource {
    async fn query(&self) -> Result<f64> {
        let bind: SocketAddr = if self.server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.send_to(&request_packet(), self.server).await?;

        let mut buf = [0u8; 128];
        loop {
            let (len, from) = tokio::time::timeout(self.timeout, socket.recv_from(&mut buf))
                .await
                .map_err(|_| RiftError::timeout("SNTP query"))??;
            // Ignore stray datagrams from anyone but the server
            if from == self.server {
                return parse_reply(&buf[..len]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(secs: u32, frac: u32) -> [u8; PACKET_SIZE] {
        let mut packet = [0u8; PACKET_SIZE];
        packet[0] = 0x24; // VN 4, mode 4
        packet[40..44].copy_from_slice(&secs.to_be_bytes());
        packet[44..48].copy_from_slice(&frac.to_be_bytes());
        packet
    }

    #[test]
    fn test_request_packet() {
        let packet = request_packet();
        assert_eq!(packet[0], 0x1B);
        assert!(packet[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_parse_reply() {
        // 2024-01-01T00:00:00Z plus half a second
        let unix = 1_704_067_200u32;
        let packet = reply(unix + 2_208_988_800, 1 << 31);
        let t = parse_reply(&packet).unwrap();
        assert!((t - (f64::from(unix) + 0.5)).abs() < 1e-6);
    }

    #[test]
    fn test_parse_rejects() {
        assert!(parse_reply(&[0u8; 10]).is_err());
        let mut packet = reply(3_900_000_000, 0);
        packet[0] = 0x1B;
        assert!(parse_reply(&packet).is_err());
        assert!(parse_reply(&reply(0, 0)).is_err());
    }

    #[tokio::test]
    async fn test_query_local_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (_, from) = server.recv_from(&mut buf).await.unwrap();
            server.send_to(&reply(3_913_056_000, 0), from).await.unwrap();
        });

        let source = SntpSource::new(addr).with_timeout(Duration::from_secs(1));
        let t = source.query().await.unwrap();
        assert!((t - (3_913_056_000.0 - NTP_UNIX_OFFSET)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let source = SntpSource::new(silent.local_addr().unwrap())
            .with_timeout(Duration::from_millis(50));
        let err = source.query().await.unwrap_err();
        assert!(matches!(err, RiftError::Timeout(_)));
    }
}
