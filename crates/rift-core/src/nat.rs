//! NAT behaviour descriptors
//!
//! A [`NatDescriptor`] captures what classification and delta probing learned
//! about a route: how the NAT filters inbound traffic ([`NatType`]), how it
//! allocates external ports ([`Delta`]) and which external ports it hands out
//! ([`PortRange`]). Every derived property is computed from these three
//! fields on demand.

use crate::error::{Result, RiftError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Well-known STUN port, used as a whitelisted reply port
pub const STUN_PORT: u16 = 3478;

/// Highest valid port
pub const MAX_PORT: u16 = 65535;

/// Ports at or below this value require privileges to bind
pub const PRIVILEGED_PORT_CEILING: u16 = 1024;

/// Lower bound substituted for privileged range starts
pub const SAFE_PORT_FLOOR: u16 = 2000;

/// Upper bound on predicted mappings per session
pub const MAX_PREDICTIONS: usize = 100;

/// NAT filtering behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum NatType {
    /// No NAT, no firewall
    OpenInternet = 1,
    /// Public address behind a stateful firewall
    SymmetricFirewall = 2,
    /// Any host may reach the mapped port once it exists
    FullCone = 3,
    /// Only previously contacted IPs may reach the mapped port
    RestrictIp = 4,
    /// Only previously contacted IP:port pairs may reach the mapped port
    RestrictPort = 5,
    /// A different mapping per destination
    Symmetric = 6,
    /// No replies at all
    Blocked = 7,
}

impl NatType {
    /// Wire code (1..=7)
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Parse a wire code
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::OpenInternet,
            2 => Self::SymmetricFirewall,
            3 => Self::FullCone,
            4 => Self::RestrictIp,
            5 => Self::RestrictPort,
            6 => Self::Symmetric,
            7 => Self::Blocked,
            _ => return None,
        })
    }

    /// Types that accept inbound traffic without a prior mapping
    #[must_use]
    pub const fn is_easy(self) -> bool {
        matches!(self, Self::OpenInternet | Self::FullCone)
    }

    /// Types that reuse one mapping across destinations
    #[must_use]
    pub const fn is_reusable(self) -> bool {
        matches!(self, Self::FullCone | Self::RestrictIp | Self::RestrictPort)
    }
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenInternet => write!(f, "Open Internet"),
            Self::SymmetricFirewall => write!(f, "Symmetric UDP Firewall"),
            Self::FullCone => write!(f, "Full Cone NAT"),
            Self::RestrictIp => write!(f, "Restricted Cone NAT"),
            Self::RestrictPort => write!(f, "Port Restricted Cone NAT"),
            Self::Symmetric => write!(f, "Symmetric NAT"),
            Self::Blocked => write!(f, "Blocked"),
        }
    }
}

impl FromStr for NatType {
    type Err = RiftError;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(code) = s.parse::<u8>() {
            return Self::from_code(code).ok_or(RiftError::invalid_address("NAT type out of range"));
        }
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "open" | "open_internet" => Ok(Self::OpenInternet),
            "symmetric_firewall" => Ok(Self::SymmetricFirewall),
            "full_cone" => Ok(Self::FullCone),
            "restrict_ip" => Ok(Self::RestrictIp),
            "restrict_port" => Ok(Self::RestrictPort),
            "symmetric" => Ok(Self::Symmetric),
            "blocked" => Ok(Self::Blocked),
            _ => Err(RiftError::InvalidConfig(format!("unknown NAT type '{s}'").into())),
        }
    }
}

/// How external port allocation relates to the internal port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DeltaType {
    /// Not applicable (no NAT)
    Na = 1,
    /// External port equals local port
    Equal = 2,
    /// External ports move by the same distance as local ports
    Preserving = 3,
    /// External ports advance by a constant regardless of local port
    Independent = 4,
    /// External ports advance by a constant when local ports advance by one
    Dependent = 5,
    /// No discernible pattern
    Random = 6,
}

impl DeltaType {
    /// Wire code (1..=6)
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Parse a wire code
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Na,
            2 => Self::Equal,
            3 => Self::Preserving,
            4 => Self::Independent,
            5 => Self::Dependent,
            6 => Self::Random,
            _ => return None,
        })
    }

    /// Deltas whose measurements depend on the immediately preceding one
    #[must_use]
    pub const fn is_ordered(self) -> bool {
        matches!(self, Self::Independent | Self::Dependent)
    }
}

impl fmt::Display for DeltaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Na => "n/a",
            Self::Equal => "equal",
            Self::Preserving => "preserving",
            Self::Independent => "independent",
            Self::Dependent => "dependent",
            Self::Random => "random",
        };
        f.write_str(name)
    }
}

impl FromStr for DeltaType {
    type Err = RiftError;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(code) = s.parse::<u8>() {
            return Self::from_code(code).ok_or(RiftError::invalid_address("delta type out of range"));
        }
        match s.to_ascii_lowercase().as_str() {
            "na" | "n/a" | "none" => Ok(Self::Na),
            "equal" => Ok(Self::Equal),
            "preserving" | "preserv" => Ok(Self::Preserving),
            "independent" => Ok(Self::Independent),
            "dependent" => Ok(Self::Dependent),
            "random" => Ok(Self::Random),
            _ => Err(RiftError::InvalidConfig(format!("unknown delta type '{s}'").into())),
        }
    }
}

/// Delta type plus its measured constant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Delta {
    /// Allocation pattern
    pub kind: DeltaType,
    /// Measured constant (only meaningful for independent/dependent)
    pub value: i32,
}

impl Delta {
    /// Create a delta
    #[must_use]
    pub const fn new(kind: DeltaType, value: i32) -> Self {
        Self { kind, value }
    }

    /// No NAT
    #[must_use]
    pub const fn na() -> Self {
        Self::new(DeltaType::Na, 0)
    }

    /// Unpredictable allocation
    #[must_use]
    pub const fn random() -> Self {
        Self::new(DeltaType::Random, 0)
    }
}

impl Default for Delta {
    fn default() -> Self {
        Self::random()
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.is_ordered() {
            write!(f, "{}({})", self.kind, self.value)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

/// Inclusive, non-empty port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(u16, u16)", into = "(u16, u16)")]
pub struct PortRange {
    min: u16,
    max: u16,
}

impl PortRange {
    /// The whole port space
    pub const FULL: Self = Self { min: 1, max: MAX_PORT };

    /// Create a range, rejecting empty ranges and port zero
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when `min` is zero or greater than `max`.
    pub fn new(min: u16, max: u16) -> Result<Self> {
        if min == 0 || min > max {
            return Err(RiftError::InvalidConfig(
                format!("invalid port range [{min}, {max}]").into(),
            ));
        }
        Ok(Self { min, max })
    }

    /// Lowest port
    #[must_use]
    pub const fn min(&self) -> u16 {
        self.min
    }

    /// Highest port
    #[must_use]
    pub const fn max(&self) -> u16 {
        self.max
    }

    /// Distance between the bounds
    #[must_use]
    pub const fn span(&self) -> u16 {
        self.max - self.min
    }

    /// Whether `port` lies inside the range
    #[must_use]
    pub const fn contains(&self, port: u16) -> bool {
        port >= self.min && port <= self.max
    }

    /// Overlap with another range, if any
    #[must_use]
    pub fn overlap(&self, other: &Self) -> Option<Self> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        (min <= max).then_some(Self { min, max })
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::FULL
    }
}

impl TryFrom<(u16, u16)> for PortRange {
    type Error = RiftError;

    fn try_from((min, max): (u16, u16)) -> Result<Self> {
        Self::new(min, max)
    }
}

impl From<PortRange> for (u16, u16) {
    fn from(range: PortRange) -> Self {
        (range.min, range.max)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Everything known about a route's NAT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NatDescriptor {
    /// Filtering behaviour
    pub nat_type: NatType,
    /// Port allocation behaviour
    pub delta: Delta,
    /// External ports the NAT allocates from
    #[serde(default)]
    pub range: PortRange,
}

impl NatDescriptor {
    /// Create a descriptor covering the full port range
    #[must_use]
    pub const fn new(nat_type: NatType, delta: Delta) -> Self {
        Self {
            nat_type,
            delta,
            range: PortRange::FULL,
        }
    }

    /// Descriptor for a route without NAT
    #[must_use]
    pub const fn open() -> Self {
        Self::new(NatType::OpenInternet, Delta::na())
    }

    /// Replace the port range
    #[must_use]
    pub const fn with_range(mut self, range: PortRange) -> Self {
        self.range = range;
        self
    }

    /// No translation happens on this route
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(
            self.nat_type,
            NatType::OpenInternet | NatType::SymmetricFirewall
        )
    }

    /// The NAT reuses mappings, so an out-of-band mapping can be recycled
    #[must_use]
    pub const fn can_predict(&self) -> bool {
        self.nat_type.is_reusable()
    }

    /// Neither the type nor the delta makes the external port guessable
    #[must_use]
    pub const fn is_hard(&self) -> bool {
        !self.nat_type.is_easy()
            && !matches!(self.delta.kind, DeltaType::Preserving | DeltaType::Equal)
    }

    /// Probes and connects may run in parallel
    #[must_use]
    pub const fn is_concurrent(&self) -> bool {
        self.nat_type.is_easy() || !self.delta.kind.is_ordered()
    }
}

impl Default for NatDescriptor {
    fn default() -> Self {
        Self::new(NatType::RestrictPort, Delta::random())
    }
}

impl fmt::Display for NatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {} {}", self.nat_type, self.delta, self.range)
    }
}
