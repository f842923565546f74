//! Punch protocol wire messages
//!
//! A message is one line of nine space-separated fields:
//!
//! ```text
//! <VERB> <pipeID> <sessionID> <meetTime> <mappings> <srcAddr> <af> <ourIfIndex> <theirIfIndex>
//! ```
//!
//! `<mappings>` is `remote,reply,local|...` and `<srcAddr>` the sender's
//! text peer address.

use rand::Rng;
use rift_core::mapping::{decode_mappings, encode_mappings};
use rift_core::{AddressFamily, Mapping, PeerAddr, Result, RiftError};
use std::fmt;
use std::str::FromStr;

/// Longest pipe or session identifier accepted
pub const MAX_ID_LEN: usize = 64;

/// Random bytes in a generated session id
const SESSION_ID_BYTES: usize = 8;

const FIELD_COUNT: usize = 9;

/// Message verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Initiator's first predictions
    InitialMappings,
    /// Recipient's predictions in answer
    UpdatedMappings,
}

impl MessageKind {
    /// Wire verb
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::InitialMappings => "INITIAL_MAPPINGS",
            Self::UpdatedMappings => "UPDATED_MAPPINGS",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

impl FromStr for MessageKind {
    type Err = RiftError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INITIAL_MAPPINGS" => Ok(Self::InitialMappings),
            "UPDATED_MAPPINGS" => Ok(Self::UpdatedMappings),
            _ => Err(RiftError::protocol("unknown verb")),
        }
    }
}

/// Generate a fresh hex session id
pub fn new_session_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn validate_id(id: &str, what: &'static str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN || !id.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(RiftError::protocol(what));
    }
    Ok(())
}

/// One punch protocol message
#[derive(Debug, Clone, PartialEq)]
pub struct PunchMessage {
    /// Verb
    pub kind: MessageKind,
    /// Pipe the punch belongs to
    pub pipe_id: String,
    /// Hex id shared by both messages of one run
    pub session_id: String,
    /// Meeting time, UNIX seconds in the synchronized time base
    pub meet_time: f64,
    /// Sender's predicted mappings
    pub mappings: Vec<Mapping>,
    /// Sender's peer address
    pub src_addr: PeerAddr,
    /// Address family of the punch
    pub af: AddressFamily,
    /// Sender's interface index
    pub our_if_index: u8,
    /// Receiver's interface index the sender aimed at
    pub their_if_index: u8,
}

impl PunchMessage {
    /// Validate fields that the text form cannot express as types
    ///
    /// # Errors
    ///
    /// Returns `Protocol` for bad ids or meet time and `InvalidMapping`
    /// for a bad mapping list.
    pub fn validate(&self, signal_servers: usize) -> Result<()> {
        validate_id(&self.pipe_id, "invalid pipe id")?;
        validate_id(&self.session_id, "invalid session id")?;
        if hex::decode(&self.session_id).is_err() {
            return Err(RiftError::protocol("session id is not hex"));
        }
        if !self.meet_time.is_finite() || self.meet_time < 0.0 {
            return Err(RiftError::protocol("invalid meet time"));
        }
        rift_core::mapping::check_mappings(&self.mappings)?;
        self.src_addr.validate(signal_servers)
    }

    /// Encode as a single text line
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{} {} {} {} {} {} {} {} {}",
            self.kind,
            self.pipe_id,
            self.session_id,
            self.meet_time,
            encode_mappings(&self.mappings),
            self.src_addr,
            self.af,
            self.our_if_index,
            self.their_if_index
        )
    }

    /// Parse and validate a text line
    ///
    /// # Errors
    ///
    /// Returns `Protocol` for malformed fields and the peer address or
    /// mapping errors of the embedded values.
    pub fn parse(text: &str, signal_servers: usize) -> Result<Self> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != FIELD_COUNT {
            return Err(RiftError::Protocol(
                format!("expected {FIELD_COUNT} fields, got {}", fields.len()).into(),
            ));
        }
        let index = |s: &str, what: &'static str| {
            s.parse::<u8>().map_err(|_| RiftError::protocol(what))
        };

        let message = Self {
            kind: fields[0].parse()?,
            pipe_id: fields[1].to_string(),
            session_id: fields[2].to_string(),
            meet_time: fields[3]
                .parse()
                .map_err(|_| RiftError::protocol("invalid meet time"))?,
            mappings: decode_mappings(fields[4])?,
            src_addr: PeerAddr::parse(fields[5], signal_servers)?,
            af: AddressFamily::parse(fields[6])?,
            our_if_index: index(fields[7], "invalid sender interface index")?,
            their_if_index: index(fields[8], "invalid receiver interface index")?,
        };
        message.validate(signal_servers)?;
        Ok(message)
    }

    /// Encode for the signaling channel
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }

    /// Decode a signaling payload
    ///
    /// # Errors
    ///
    /// Returns `Protocol` for non UTF-8 payloads and any [`parse`](Self::parse) error.
    pub fn from_bytes(bytes: &[u8], signal_servers: usize) -> Result<Self> {
        let text =
            std::str::from_utf8(bytes).map_err(|_| RiftError::protocol("payload is not UTF-8"))?;
        Self::parse(text, signal_servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rift_core::{Delta, IfaceEntry, NatType};

    fn src() -> PeerAddr {
        PeerAddr::new("alice.node_1").with_interface(IfaceEntry {
            if_index: 0,
            addr_index: 0,
            ext_ip: "127.0.0.1".parse().unwrap(),
            nic_ip: "127.0.0.1".parse().unwrap(),
            port: 40000,
            nat_type: NatType::OpenInternet,
            delta: Delta::na(),
        })
    }

    fn message() -> PunchMessage {
        PunchMessage {
            kind: MessageKind::InitialMappings,
            pipe_id: "pipe-1".to_string(),
            session_id: "00ff10aa20bb30cc".to_string(),
            meet_time: 1_700_000_003.25,
            mappings: vec![Mapping::new(41000, 0, 41000), Mapping::new(42000, 3478, 43000)],
            src_addr: src(),
            af: AddressFamily::V4,
            our_if_index: 0,
            their_if_index: 0,
        }
    }

    #[test]
    fn test_wire_layout() {
        let text = message().encode();
        let fields: Vec<&str> = text.split(' ').collect();
        assert_eq!(fields.len(), 9);
        assert_eq!(fields[0], "INITIAL_MAPPINGS");
        assert_eq!(fields[3], "1700000003.25");
        assert_eq!(fields[4], "41000,0,41000|43000,3478,42000");
        assert_eq!(fields[6], "4");
    }

    #[test]
    fn test_parse_encoded() {
        let original = message();
        let parsed = PunchMessage::from_bytes(&original.to_bytes(), 5).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_parse_padded() {
        let original = message();
        let padded = format!("  {}\n", original.encode().replace(' ', "   "));
        assert_eq!(PunchMessage::parse(&padded, 5).unwrap(), original);
        let tabbed = original.encode().replace(' ', "\t");
        assert_eq!(PunchMessage::parse(&tabbed, 5).unwrap(), original);
    }

    #[test]
    fn test_field_count() {
        let text = message().encode();
        assert!(PunchMessage::parse(&format!("{text} extra"), 5).is_err());
        let short: Vec<&str> = text.split(' ').take(8).collect();
        assert!(PunchMessage::parse(&short.join(" "), 5).is_err());
    }

    #[test]
    fn test_rejects_bad_fields() {
        let good = message().encode();
        let replace = |i: usize, value: &str| {
            let mut fields: Vec<String> = good.split(' ').map(String::from).collect();
            fields[i] = value.to_string();
            fields.join(" ")
        };

        for (i, value) in [
            (0, "HELLO"),
            (2, "not-hex"),
            (3, "-1"),
            (3, "NaN"),
            (3, "inf"),
            (4, "0,0,41000"),
            (4, "41000,0,80"),
            (6, "5"),
            (7, "256"),
            (8, "x"),
        ] {
            assert!(
                PunchMessage::parse(&replace(i, value), 5).is_err(),
                "field {i} = {value} accepted"
            );
        }
    }

    #[test]
    fn test_too_many_mappings() {
        let mut msg = message();
        msg.mappings = (0..101).map(|i| Mapping::new(2000 + i, 0, 2000 + i)).collect();
        assert!(PunchMessage::parse(&msg.encode(), 5).is_err());
    }

    #[test]
    fn test_non_utf8_payload() {
        assert!(PunchMessage::from_bytes(&[0xff, 0xfe, 0x00], 5).is_err());
    }

    #[test]
    fn test_session_ids() {
        let mut rng = StdRng::seed_from_u64(1);
        let a = new_session_id(&mut rng);
        let b = new_session_id(&mut rng);
        assert_eq!(a.len(), SESSION_ID_BYTES * 2);
        assert_ne!(a, b);
        assert!(hex::decode(&a).is_ok());
    }
}
