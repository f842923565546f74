//! Peer address codec
//!
//! A peer address tells the other side everything it needs to start a punch:
//! which signaling servers reach us, and for every interface and address
//! family our external and NIC addresses, a listen port and the NAT
//! descriptor learned for that route.
//!
//! Two encodings exist. The binary form is a compact bincode record; the text
//! form is for transports that only carry text:
//!
//! ```text
//! 0,1-[0,8.8.8.8,192.168.21.200,33334,3,3,0]-0-alice
//! ^^^ signal servers
//!     ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^ IPv4 interfaces, '|' separated
//!                                           ^ IPv6 interfaces ('0' = none)
//!                                             ^^^^^ node id
//! ```
//!
//! Both decoders reject the whole address on the first invalid field.

use crate::error::{Result, RiftError};
use crate::nat::{Delta, DeltaType, MAX_PORT, NatDescriptor, NatType};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Maximum interfaces advertised per address family
pub const MAX_INTERFACES: usize = 4;

/// Maximum node id length in bytes
pub const MAX_NODE_ID_LEN: usize = 64;

/// Binary format version
const WIRE_VERSION: u8 = 1;

/// Upper bound on an encoded binary address
const MAX_ENCODED_LEN: u64 = 1024;

/// Address family of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl AddressFamily {
    /// Family of an IP address
    #[must_use]
    pub const fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    /// Wire token (`4` or `6`)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V4 => "4",
            Self::V6 => "6",
        }
    }

    /// Parse a wire token
    ///
    /// # Errors
    ///
    /// Returns `Protocol` for anything but `4` or `6`.
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "4" => Ok(Self::V4),
            "6" => Ok(Self::V6),
            _ => Err(RiftError::protocol("address family must be 4 or 6")),
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One advertised interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfaceEntry {
    /// Interface index on the advertising host
    pub if_index: u8,
    /// Index of the address on that interface (binary form only)
    pub addr_index: u8,
    /// External address as seen by mapping servers
    pub ext_ip: IpAddr,
    /// Address bound on the interface
    pub nic_ip: IpAddr,
    /// Listen port
    pub port: u16,
    /// NAT filtering behaviour of the route
    pub nat_type: NatType,
    /// Port allocation behaviour of the route
    pub delta: Delta,
}

impl IfaceEntry {
    /// NAT descriptor for this interface (full port range)
    #[must_use]
    pub const fn nat(&self) -> NatDescriptor {
        NatDescriptor::new(self.nat_type, self.delta)
    }

    /// Address family of the entry
    #[must_use]
    pub const fn af(&self) -> AddressFamily {
        AddressFamily::of(&self.nic_ip)
    }

    fn validate(&self, af: AddressFamily) -> Result<()> {
        if self.port == 0 {
            return Err(RiftError::invalid_address("listen port is zero"));
        }
        if AddressFamily::of(&self.ext_ip) != af || AddressFamily::of(&self.nic_ip) != af {
            return Err(RiftError::invalid_address("interface listed under the wrong family"));
        }
        if !(0..=i32::from(MAX_PORT)).contains(&self.delta.value) {
            return Err(RiftError::invalid_address("delta value out of range"));
        }
        Ok(())
    }

    fn parse_text(text: &str) -> Result<Self> {
        let inner = text
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or(RiftError::invalid_address("interface entry must be bracketed"))?;
        let parts: Vec<&str> = inner.split(',').collect();
        if parts.len() != 7 {
            return Err(RiftError::invalid_address("interface entry needs 7 fields"));
        }

        let number = |s: &str, what: &'static str| -> Result<i64> {
            s.parse::<i64>().map_err(|_| RiftError::invalid_address(what))
        };
        let ip = |s: &str| -> Result<IpAddr> {
            s.parse::<IpAddr>()
                .map_err(|_| RiftError::InvalidAddress(format!("bad IP '{s}'").into()))
        };

        let if_index = u8::try_from(number(parts[0], "bad interface index")?)
            .map_err(|_| RiftError::invalid_address("interface index out of range"))?;
        let port = number(parts[3], "bad port")?;
        if !(1..=i64::from(MAX_PORT)).contains(&port) {
            return Err(RiftError::invalid_address("port out of range"));
        }
        let nat_type = u8::try_from(number(parts[4], "bad NAT type")?)
            .ok()
            .and_then(NatType::from_code)
            .ok_or(RiftError::invalid_address("NAT type out of range"))?;
        let delta_type = u8::try_from(number(parts[5], "bad delta type")?)
            .ok()
            .and_then(DeltaType::from_code)
            .ok_or(RiftError::invalid_address("delta type out of range"))?;
        let delta_value = number(parts[6], "bad delta value")?;
        if !(0..=i64::from(MAX_PORT)).contains(&delta_value) {
            return Err(RiftError::invalid_address("delta value out of range"));
        }

        Ok(Self {
            if_index,
            addr_index: 0,
            ext_ip: ip(parts[1])?,
            nic_ip: ip(parts[2])?,
            port: port as u16,
            nat_type,
            delta: Delta::new(delta_type, delta_value as i32),
        })
    }
}

impl fmt::Display for IfaceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{},{},{},{},{},{}]",
            self.if_index,
            self.ext_ip,
            self.nic_ip,
            self.port,
            self.nat_type.code(),
            self.delta.kind.code(),
            self.delta.value
        )
    }
}

/// A complete peer address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    /// Indices into the shared signaling server list
    pub signal: Vec<u8>,
    /// IPv4 interfaces
    pub v4: Vec<IfaceEntry>,
    /// IPv6 interfaces
    pub v6: Vec<IfaceEntry>,
    /// Identity of the peer on the signaling network
    pub node_id: String,
}

impl PeerAddr {
    /// Create an address with no interfaces
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            signal: Vec::new(),
            v4: Vec::new(),
            v6: Vec::new(),
            node_id: node_id.into(),
        }
    }

    /// Add an interface under its address family
    #[must_use]
    pub fn with_interface(mut self, entry: IfaceEntry) -> Self {
        match entry.af() {
            AddressFamily::V4 => self.v4.push(entry),
            AddressFamily::V6 => self.v6.push(entry),
        }
        self
    }

    /// Interfaces of one family
    #[must_use]
    pub fn interfaces(&self, af: AddressFamily) -> &[IfaceEntry] {
        match af {
            AddressFamily::V4 => &self.v4,
            AddressFamily::V6 => &self.v6,
        }
    }

    /// Interface with the given index in one family
    #[must_use]
    pub fn interface(&self, af: AddressFamily, if_index: u8) -> Option<&IfaceEntry> {
        self.interfaces(af).iter().find(|e| e.if_index == if_index)
    }

    /// Validate every field of the address
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` describing the first violation.
    pub fn validate(&self, signal_servers: usize) -> Result<()> {
        validate_node_id(&self.node_id)?;
        if let Some(index) = self.signal.iter().find(|&&i| usize::from(i) >= signal_servers) {
            return Err(RiftError::InvalidAddress(
                format!("signal server index {index} exceeds {signal_servers} servers").into(),
            ));
        }
        for (af, entries) in [(AddressFamily::V4, &self.v4), (AddressFamily::V6, &self.v6)] {
            if entries.len() > MAX_INTERFACES {
                return Err(RiftError::invalid_address("too many interfaces"));
            }
            entries.iter().try_for_each(|e| e.validate(af))?;
        }
        if self.v4.is_empty() && self.v6.is_empty() {
            return Err(RiftError::invalid_address("no interfaces"));
        }
        Ok(())
    }

    /// Parse and validate the text form
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` if any field is malformed or out of range.
    pub fn parse(text: &str, signal_servers: usize) -> Result<Self> {
        let parts: Vec<&str> = text.trim().split('-').collect();
        if parts.len() != 4 {
            return Err(RiftError::invalid_address("expected 4 '-' separated parts"));
        }

        let signal = if parts[0].is_empty() {
            Vec::new()
        } else {
            parts[0]
                .split(',')
                .map(|s| {
                    s.parse::<u8>()
                        .map_err(|_| RiftError::invalid_address("bad signal server index"))
                })
                .collect::<Result<Vec<_>>>()?
        };

        let family = |part: &str| -> Result<Vec<IfaceEntry>> {
            if part == "0" {
                return Ok(Vec::new());
            }
            part.split('|').map(IfaceEntry::parse_text).collect()
        };

        let addr = Self {
            signal,
            v4: family(parts[1])?,
            v6: family(parts[2])?,
            node_id: parts[3].to_string(),
        };
        addr.validate(signal_servers)?;
        Ok(addr)
    }

    /// Encode the binary form
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` if the record cannot be serialized.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let record = WireAddr::from(self);
        wire_options()
            .serialize(&record)
            .map_err(|e| RiftError::InvalidAddress(e.to_string().into()))
    }

    /// Decode and validate the binary form
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` if the bytes are malformed or any field is out
    /// of range.
    pub fn from_bytes(bytes: &[u8], signal_servers: usize) -> Result<Self> {
        let record: WireAddr = wire_options()
            .deserialize(bytes)
            .map_err(|e| RiftError::InvalidAddress(e.to_string().into()))?;
        if record.version != WIRE_VERSION {
            return Err(RiftError::invalid_address("unsupported address version"));
        }
        let addr = Self::try_from(record)?;
        addr.validate(signal_servers)?;
        Ok(addr)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let signal = self
            .signal
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let family = |entries: &[IfaceEntry]| {
            if entries.is_empty() {
                "0".to_string()
            } else {
                entries
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("|")
            }
        };
        write!(
            f,
            "{}-{}-{}-{}",
            signal,
            family(&self.v4),
            family(&self.v6),
            self.node_id
        )
    }
}

fn validate_node_id(node_id: &str) -> Result<()> {
    if node_id.is_empty() || node_id.len() > MAX_NODE_ID_LEN {
        return Err(RiftError::invalid_address("node id length out of range"));
    }
    if !node_id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
    {
        return Err(RiftError::invalid_address("node id has invalid characters"));
    }
    Ok(())
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .with_limit(MAX_ENCODED_LEN)
}

/// Fixed-width record used by the binary form
#[derive(Serialize, Deserialize)]
struct WireEntry {
    if_index: u8,
    addr_index: u8,
    ext_ip: IpAddr,
    nic_ip: IpAddr,
    port: u16,
    nat_type: u8,
    delta_type: u8,
    delta_value: i32,
}

#[derive(Serialize, Deserialize)]
struct WireAddr {
    version: u8,
    signal: Vec<u8>,
    v4: Vec<WireEntry>,
    v6: Vec<WireEntry>,
    node_id: String,
}

impl From<&IfaceEntry> for WireEntry {
    fn from(e: &IfaceEntry) -> Self {
        Self {
            if_index: e.if_index,
            addr_index: e.addr_index,
            ext_ip: e.ext_ip,
            nic_ip: e.nic_ip,
            port: e.port,
            nat_type: e.nat_type.code(),
            delta_type: e.delta.kind.code(),
            delta_value: e.delta.value,
        }
    }
}

impl TryFrom<WireEntry> for IfaceEntry {
    type Error = RiftError;

    fn try_from(w: WireEntry) -> Result<Self> {
        let nat_type =
            NatType::from_code(w.nat_type).ok_or(RiftError::invalid_address("NAT type out of range"))?;
        let delta_type = DeltaType::from_code(w.delta_type)
            .ok_or(RiftError::invalid_address("delta type out of range"))?;
        Ok(Self {
            if_index: w.if_index,
            addr_index: w.addr_index,
            ext_ip: w.ext_ip,
            nic_ip: w.nic_ip,
            port: w.port,
            nat_type,
            delta: Delta::new(delta_type, w.delta_value),
        })
    }
}

impl From<&PeerAddr> for WireAddr {
    fn from(addr: &PeerAddr) -> Self {
        Self {
            version: WIRE_VERSION,
            signal: addr.signal.clone(),
            v4: addr.v4.iter().map(WireEntry::from).collect(),
            v6: addr.v6.iter().map(WireEntry::from).collect(),
            node_id: addr.node_id.clone(),
        }
    }
}

impl TryFrom<WireAddr> for PeerAddr {
    type Error = RiftError;

    fn try_from(w: WireAddr) -> Result<Self> {
        Ok(Self {
            signal: w.signal,
            v4: w.v4.into_iter().map(IfaceEntry::try_from).collect::<Result<_>>()?,
            v6: w.v6.into_iter().map(IfaceEntry::try_from).collect::<Result<_>>()?,
            node_id: w.node_id,
        })
    }
}
