//! Punch mode selection
//!
//! Both peers look at each other's advertised addresses and independently
//! reach the same conclusion about where to aim: the peer's NIC address when
//! both share an external address, otherwise its external address.

use rift_core::{IfaceEntry, Result, RiftError, Route};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Where the peer is relative to us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PunchMode {
    /// Same private network, no NAT in between
    Lan = 1,
    /// Across the internet, through both NATs
    Remote = 2,
    /// Same host
    SelfPunch = 3,
}

impl PunchMode {
    /// Numeric code (1..=3)
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Parse a numeric code
    ///
    /// # Errors
    ///
    /// Returns `Protocol` for codes outside 1..=3.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Self::Lan),
            2 => Ok(Self::Remote),
            3 => Ok(Self::SelfPunch),
            _ => Err(RiftError::protocol("unknown punch mode")),
        }
    }
}

impl fmt::Display for PunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lan => write!(f, "lan"),
            Self::Remote => write!(f, "remote"),
            Self::SelfPunch => write!(f, "self"),
        }
    }
}

impl FromStr for PunchMode {
    type Err = RiftError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lan" => Ok(Self::Lan),
            "remote" => Ok(Self::Remote),
            "self" => Ok(Self::SelfPunch),
            _ => Err(RiftError::InvalidConfig(format!("unknown punch mode '{s}'").into())),
        }
    }
}

/// Whether `ip` belongs to a private, loopback or link-local network
#[must_use]
pub fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || (first & 0xfe00) == 0xfc00 // unique local
                || (first & 0xffc0) == 0xfe80 // link local
        }
    }
}

/// Address to aim at for a peer interface
#[must_use]
pub fn select_dest(route: &dyn Route, theirs: &IfaceEntry) -> IpAddr {
    if theirs.ext_ip == route.external_ip() {
        theirs.nic_ip
    } else {
        theirs.ext_ip
    }
}

/// Punch mode for a destination reached over `route`
#[must_use]
pub fn punch_mode(route: &dyn Route, dest: IpAddr) -> PunchMode {
    if dest.is_loopback() || route.is_own(dest) {
        PunchMode::SelfPunch
    } else if is_private(&dest) {
        PunchMode::Lan
    } else {
        PunchMode::Remote
    }
}

/// Check that `dest` makes sense for `mode` on `route`
///
/// # Errors
///
/// Returns `InvalidAddress` when the destination contradicts the mode.
pub fn validate_dest(route: &dyn Route, dest: IpAddr, mode: PunchMode) -> Result<()> {
    if dest.is_unspecified() {
        return Err(RiftError::invalid_address("destination is unspecified"));
    }
    match mode {
        PunchMode::Remote => {
            if is_private(&dest) {
                return Err(RiftError::invalid_address("remote punch to a private address"));
            }
            if dest == route.external_ip() {
                return Err(RiftError::invalid_address("remote punch to our own external address"));
            }
        }
        PunchMode::Lan => {
            if !is_private(&dest) {
                return Err(RiftError::invalid_address("LAN punch to a public address"));
            }
            if dest == route.local_ip() {
                return Err(RiftError::invalid_address("LAN punch to our own interface"));
            }
        }
        PunchMode::SelfPunch => {
            if !dest.is_loopback() && !route.is_own(dest) {
                return Err(RiftError::invalid_address("self punch to another host"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rift_core::{Delta, NatType, ReusableRoute};

    fn route() -> ReusableRoute {
        ReusableRoute::new("192.168.1.10".parse().unwrap(), "203.0.113.5".parse().unwrap(), 0)
    }

    fn entry(ext: &str, nic: &str) -> IfaceEntry {
        IfaceEntry {
            if_index: 0,
            addr_index: 0,
            ext_ip: ext.parse().unwrap(),
            nic_ip: nic.parse().unwrap(),
            port: 40000,
            nat_type: NatType::FullCone,
            delta: Delta::na(),
        }
    }

    #[test]
    fn test_select_dest() {
        let r = route();
        assert_eq!(
            select_dest(&r, &entry("203.0.113.5", "192.168.1.20")),
            "192.168.1.20".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            select_dest(&r, &entry("198.51.100.9", "10.0.0.2")),
            "198.51.100.9".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_punch_mode() {
        let r = route();
        assert_eq!(punch_mode(&r, "127.0.0.1".parse().unwrap()), PunchMode::SelfPunch);
        assert_eq!(punch_mode(&r, "192.168.1.10".parse().unwrap()), PunchMode::SelfPunch);
        assert_eq!(punch_mode(&r, "203.0.113.5".parse().unwrap()), PunchMode::SelfPunch);
        assert_eq!(punch_mode(&r, "192.168.1.20".parse().unwrap()), PunchMode::Lan);
        assert_eq!(punch_mode(&r, "198.51.100.9".parse().unwrap()), PunchMode::Remote);
        assert_eq!(punch_mode(&r, "fd00::1".parse().unwrap()), PunchMode::Lan);
    }

    #[test]
    fn test_validate_dest() {
        let r = route();
        let public: IpAddr = "198.51.100.9".parse().unwrap();
        let private: IpAddr = "192.168.1.20".parse().unwrap();
        assert!(validate_dest(&r, public, PunchMode::Remote).is_ok());
        assert!(validate_dest(&r, private, PunchMode::Remote).is_err());
        assert!(validate_dest(&r, r.external_ip(), PunchMode::Remote).is_err());
        assert!(validate_dest(&r, private, PunchMode::Lan).is_ok());
        assert!(validate_dest(&r, public, PunchMode::Lan).is_err());
        assert!(validate_dest(&r, r.local_ip(), PunchMode::Lan).is_err());
        assert!(validate_dest(&r, "127.0.0.1".parse().unwrap(), PunchMode::SelfPunch).is_ok());
        assert!(validate_dest(&r, public, PunchMode::SelfPunch).is_err());
        assert!(validate_dest(&r, "0.0.0.0".parse().unwrap(), PunchMode::Lan).is_err());
    }

    #[test]
    fn test_mode_codes() {
        for code in 1..=3 {
            assert_eq!(PunchMode::from_code(code).unwrap().code(), code);
        }
        assert!(PunchMode::from_code(0).is_err());
        assert!(PunchMode::from_code(4).is_err());
        assert_eq!("self".parse::<PunchMode>().unwrap(), PunchMode::SelfPunch);
    }
}
