//! Predicted port mappings
//!
//! A [`Mapping`] is one predicted connection: the local port we bind, the
//! external port the NAT is expected to allocate for it, and optionally the
//! source port a port-restricted peer needs our reply to come from.

use crate::error::{Result, RiftError};
use crate::nat::{MAX_PREDICTIONS, PRIVILEGED_PORT_CEILING};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tokio::net::{TcpSocket, TcpStream, UdpSocket};

/// One predicted (local, reply, remote) triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Mapping {
    /// Port bound on our interface
    pub local: u16,
    /// Source port the peer must reply from, zero if unrestricted
    pub reply: u16,
    /// External port the NAT allocates
    pub remote: u16,
}

impl Mapping {
    /// Create a mapping
    #[must_use]
    pub const fn new(local: u16, reply: u16, remote: u16) -> Self {
        Self {
            local,
            reply,
            remote,
        }
    }

    /// A target that only names the external port to aim for
    #[must_use]
    pub const fn target(remote: u16) -> Self {
        Self::new(0, 0, remote)
    }

    /// Port to match against: the reply port when one is required
    #[must_use]
    pub const fn bind_port(&self) -> u16 {
        if self.reply != 0 { self.reply } else { self.remote }
    }

    /// Validate a mapping we are about to bind or send
    ///
    /// # Errors
    ///
    /// Returns `InvalidMapping` when the remote port is zero or the local
    /// port is privileged.
    pub fn check(&self) -> Result<()> {
        if self.remote == 0 {
            return Err(RiftError::invalid_mapping("remote port is zero"));
        }
        if self.local <= PRIVILEGED_PORT_CEILING {
            return Err(RiftError::InvalidMapping(
                format!("local port {} is privileged", self.local).into(),
            ));
        }
        Ok(())
    }
}

/// Wire form is `remote,reply,local`
impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.remote, self.reply, self.local)
    }
}

impl FromStr for Mapping {
    type Err = RiftError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(',');
        let mut next = |what: &'static str| -> Result<u16> {
            parts
                .next()
                .ok_or(RiftError::protocol(what))?
                .parse::<u16>()
                .map_err(|_| RiftError::protocol(what))
        };
        let remote = next("bad remote port")?;
        let reply = next("bad reply port")?;
        let local = next("bad local port")?;
        if parts.next().is_some() {
            return Err(RiftError::protocol("too many mapping fields"));
        }
        Ok(Self::new(local, reply, remote))
    }
}

/// Drop mappings whose local, reply or remote port repeats an earlier one
///
/// A zero reply port means "no requirement" and never counts as a collision.
#[must_use]
pub fn strip_duplicates(mappings: Vec<Mapping>) -> Vec<Mapping> {
    let mut locals = HashSet::new();
    let mut replies = HashSet::new();
    let mut remotes = HashSet::new();

    mappings
        .into_iter()
        .filter(|m| {
            if locals.contains(&m.local)
                || remotes.contains(&m.remote)
                || (m.reply != 0 && replies.contains(&m.reply))
            {
                return false;
            }
            locals.insert(m.local);
            remotes.insert(m.remote);
            if m.reply != 0 {
                replies.insert(m.reply);
            }
            true
        })
        .collect()
}

/// Validate a whole mapping list
///
/// # Errors
///
/// Returns `InvalidMapping` when the list is empty, exceeds
/// [`MAX_PREDICTIONS`] or contains an invalid mapping.
pub fn check_mappings(mappings: &[Mapping]) -> Result<()> {
    if mappings.is_empty() {
        return Err(RiftError::invalid_mapping("mapping list is empty"));
    }
    if mappings.len() > MAX_PREDICTIONS {
        return Err(RiftError::InvalidMapping(
            format!("{} mappings exceeds {MAX_PREDICTIONS}", mappings.len()).into(),
        ));
    }
    mappings.iter().try_for_each(Mapping::check)
}

/// Encode a mapping list as `remote,reply,local|...`
#[must_use]
pub fn encode_mappings(mappings: &[Mapping]) -> String {
    mappings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

/// Decode and validate a `remote,reply,local|...` list
///
/// # Errors
///
/// Returns `Protocol` for malformed triples and `InvalidMapping` when the
/// decoded list breaks the mapping rules.
pub fn decode_mappings(text: &str) -> Result<Vec<Mapping>> {
    let mappings = text
        .split('|')
        .map(str::parse)
        .collect::<Result<Vec<Mapping>>>()?;
    check_mappings(&mappings)?;
    Ok(mappings)
}

/// A socket that keeps an out-of-band mapping alive
#[derive(Debug)]
pub enum HeldSocket {
    /// Bound but unconnected TCP socket
    Bound(TcpSocket),
    /// TCP connection to a mapping server
    Connected(TcpStream),
    /// UDP socket used for the probe
    Datagram(UdpSocket),
}

/// A mapping fetched from a mapping probe, with the socket that created it
#[derive(Debug)]
pub struct PreloadedMapping {
    /// The observed mapping (`reply` is always zero)
    pub mapping: Mapping,
    /// Socket holding the mapping open until the punch finishes
    pub socket: Option<HeldSocket>,
}

impl PreloadedMapping {
    /// Wrap an observed (local, external) pair
    #[must_use]
    pub fn new(local: u16, remote: u16, socket: Option<HeldSocket>) -> Self {
        Self {
            mapping: Mapping::new(local, 0, remote),
            socket,
        }
    }
}
