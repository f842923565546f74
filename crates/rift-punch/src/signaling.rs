//! Signaling channel
//!
//! The punch protocol only needs "send these bytes to that node id". Real
//! deployments route this through a rendezvous network; [`SignalHub`]
//! provides an in-process hub for tests and the CLI.

use async_trait::async_trait;
use dashmap::DashMap;
use rift_core::{Result, RiftError};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Delivers payloads to peers by node id
#[async_trait]
pub trait Signaling: Send + Sync {
    /// Send `payload` to `peer`
    ///
    /// # Errors
    ///
    /// Returns `Channel` when the peer is unreachable.
    async fn send(&self, peer: &str, payload: Vec<u8>) -> Result<()>;
}

/// A payload received from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Sender node id
    pub from: String,
    /// Raw payload
    pub payload: Vec<u8>,
}

/// In-process signaling hub
#[derive(Debug, Clone, Default)]
pub struct SignalHub {
    nodes: Arc<DashMap<String, mpsc::UnboundedSender<Inbound>>>,
}

impl SignalHub {
    /// Create an empty hub
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `node_id` and return its sending half and inbox
    ///
    /// Joining again replaces the previous inbox.
    pub fn join(
        &self,
        node_id: impl Into<String>,
    ) -> (ChannelSignaling, mpsc::UnboundedReceiver<Inbound>) {
        let node_id = node_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.nodes.insert(node_id.clone(), tx);
        (
            ChannelSignaling {
                node_id,
                hub: self.clone(),
            },
            rx,
        )
    }

    /// Unregister `node_id`
    pub fn leave(&self, node_id: &str) {
        self.nodes.remove(node_id);
    }
}

/// Signaling endpoint of one node on a [`SignalHub`]
#[derive(Debug, Clone)]
pub struct ChannelSignaling {
    node_id: String,
    hub: SignalHub,
}

impl ChannelSignaling {
    /// Our node id on the hub
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[async_trait]
impl Signaling for ChannelSignaling {
    async fn send(&self, peer: &str, payload: Vec<u8>) -> Result<()> {
        let tx = self
            .hub
            .nodes
            .get(peer)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RiftError::Channel(format!("unknown peer {peer}").into()))?;
        tx.send(Inbound {
            from: self.node_id.clone(),
            payload,
        })
        .map_err(|_| RiftError::Channel(format!("peer {peer} has left").into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivery() {
        let hub = SignalHub::new();
        let (alice, _alice_rx) = hub.join("alice");
        let (_bob, mut bob_rx) = hub.join("bob");

        alice.send("bob", b"hello".to_vec()).await.unwrap();
        let inbound = bob_rx.recv().await.unwrap();
        assert_eq!(inbound.from, "alice");
        assert_eq!(inbound.payload, b"hello");
    }

    #[tokio::test]
    async fn test_unknown_and_departed_peers() {
        let hub = SignalHub::new();
        let (alice, _alice_rx) = hub.join("alice");
        assert!(matches!(
            alice.send("nobody", Vec::new()).await,
            Err(RiftError::Channel(_))
        ));

        let (_bob, bob_rx) = hub.join("bob");
        drop(bob_rx);
        assert!(alice.send("bob", Vec::new()).await.is_err());

        hub.leave("bob");
        assert!(alice.send("bob", Vec::new()).await.is_err());
    }
}
