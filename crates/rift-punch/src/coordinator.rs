//! Punch coordinator
//!
//! Owns the sessions of one route and drives the protocol from both ends:
//! [`PunchCoordinator::connect`] initiates a punch and returns the winning
//! stream, while inbound messages (fed through
//! [`PunchCoordinator::handle_message`]) answer the peer's punches, whose
//! streams surface through [`PunchCoordinator::accept`].

use crate::burst::spawn_burst;
use crate::message::{MessageKind, PunchMessage, new_session_id};
use crate::mode::{punch_mode, select_dest, validate_dest};
use crate::session::{Incoming, PunchSession, PunchState, SessionKey, StepContext};
use crate::signaling::{Inbound, Signaling};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rift_core::{
    IfaceEntry, MappingProbe, NatDescriptor, PeerAddr, PunchConfig, Result, RiftError, Route,
    SyncedClock,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Our side of the punch: address, route and NAT
#[derive(Clone)]
pub struct Endpoint {
    /// Our advertised peer address
    pub addr: PeerAddr,
    /// Route punches run over
    pub route: Arc<dyn Route>,
    /// NAT in front of the route
    pub nat: NatDescriptor,
    /// Probe for out-of-band mappings, if the NAT needs them
    pub probe: Option<Arc<dyn MappingProbe>>,
}

/// A stream punched on the peer's initiative
#[derive(Debug)]
pub struct Punched {
    /// Peer node id
    pub peer: String,
    /// Pipe the punch belonged to
    pub pipe_id: String,
    /// The connection
    pub stream: TcpStream,
}

struct Inner {
    endpoint: Endpoint,
    signaling: Arc<dyn Signaling>,
    clock: SyncedClock,
    config: PunchConfig,
    sessions: DashMap<SessionKey, Arc<Mutex<PunchSession>>>,
    pending: DashMap<SessionKey, oneshot::Sender<Incoming>>,
    accepted_tx: mpsc::UnboundedSender<Punched>,
    accepted_rx: Mutex<mpsc::UnboundedReceiver<Punched>>,
    running: AtomicBool,
    sweep_wake: Notify,
    closed: Notify,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<JoinSet<()>>,
}

/// Punch coordinator for one route
#[derive(Clone)]
pub struct PunchCoordinator {
    inner: Arc<Inner>,
}

impl PunchCoordinator {
    /// Create a stopped coordinator
    #[must_use]
    pub fn new(
        endpoint: Endpoint,
        signaling: Arc<dyn Signaling>,
        clock: SyncedClock,
        config: PunchConfig,
    ) -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                endpoint,
                signaling,
                clock,
                config,
                sessions: DashMap::new(),
                pending: DashMap::new(),
                accepted_tx,
                accepted_rx: Mutex::new(accepted_rx),
                running: AtomicBool::new(false),
                sweep_wake: Notify::new(),
                closed: Notify::new(),
                sweeper: Mutex::new(None),
                tasks: Mutex::new(JoinSet::new()),
            }),
        }
    }

    /// Our node id
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.inner.endpoint.addr.node_id
    }

    /// Number of live sessions
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// State of the session with `peer` over `pipe_id`
    pub async fn session_state(&self, peer: &str, pipe_id: &str) -> Option<PunchState> {
        let session = self
            .inner
            .sessions
            .get(&SessionKey::new(peer, pipe_id))
            .map(|entry| Arc::clone(entry.value()))?;
        let guard = session.lock().await;
        guard.state()
    }

    fn step_context(&self) -> StepContext<'_> {
        StepContext {
            probe: self.inner.endpoint.probe.clone(),
            clock: &self.inner.clock,
            config: &self.inner.config,
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(RiftError::invalid_state("coordinator is not running"))
        }
    }

    fn register(&self, key: &SessionKey, session: PunchSession) -> Result<Arc<Mutex<PunchSession>>> {
        match self.inner.sessions.entry(key.clone()) {
            Entry::Occupied(_) => Err(RiftError::InvalidState(
                format!("session {key} already exists").into(),
            )),
            Entry::Vacant(slot) => {
                let session = Arc::new(Mutex::new(session));
                slot.insert(Arc::clone(&session));
                Ok(session)
            }
        }
    }

    fn forget(&self, key: &SessionKey) {
        self.inner.pending.remove(key);
        self.inner.sessions.remove(key);
    }

    /// Run `work` in the background until it ends or the coordinator closes
    async fn track<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.inner.tasks.lock().await;
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                if e.is_panic() {
                    warn!("Punch task panicked: {}", e);
                }
            }
        }
        if self.is_running() {
            tasks.spawn(work);
        }
    }

    fn peer_interface<'a>(&self, peer: &'a PeerAddr) -> Result<&'a IfaceEntry> {
        let af = self.inner.endpoint.route.af();
        peer.interfaces(af)
            .first()
            .ok_or_else(|| RiftError::InvalidAddress(format!("peer has no IPv{af} interface").into()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Lifecycle Methods
// ═══════════════════════════════════════════════════════════════════════════

impl PunchCoordinator {
    /// Start the stale-session sweep
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if already running.
    pub async fn start(&self) -> Result<()> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RiftError::invalid_state("coordinator already running"));
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { sweep_loop(inner).await });
        *self.inner.sweeper.lock().await = Some(handle);

        info!(
            "Punch coordinator {} started on {}",
            self.node_id(),
            self.inner.endpoint.route.local_ip()
        );
        Ok(())
    }

    /// Stop the sweep, abort background work and drop every session with
    /// its held sockets
    ///
    /// Pending [`connect`](Self::connect) calls return `Channel`. Bursts
    /// already running finish on their own threads.
    pub async fn close(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.sweep_wake.notify_one();
        self.inner.closed.notify_waiters();

        if let Some(handle) = self.inner.sweeper.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Sweep task failed: {}", e);
            }
        }
        self.inner.tasks.lock().await.shutdown().await;
        self.inner.pending.clear();
        self.inner.sessions.clear();
        info!("Punch coordinator {} closed", self.node_id());
    }

    /// Whether the coordinator is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Drop sessions older than the configured idle ceiling
    ///
    /// Sessions busy in a protocol step are left alone. Returns the number
    /// of sessions removed.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep()
    }

    /// Feed signaling messages to the coordinator until the inbox closes
    ///
    /// Each message is handled in its own task so a slow preload never
    /// holds up other peers.
    pub fn spawn_listener(&self, mut inbox: mpsc::UnboundedReceiver<Inbound>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(Inbound { from, payload }) = inbox.recv().await {
                let handler = this.clone();
                this.track(async move {
                    if let Err(e) = handler.handle_message(&from, &payload).await {
                        warn!("Dropped punch message from {}: {}", from, e);
                    }
                })
                .await;
            }
            debug!("Signaling inbox for {} closed", this.node_id());
        })
    }
}

impl Inner {
    fn sweep(&self) -> usize {
        let ttl = self.config.session_ttl;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.try_lock().map_or(true, |s| s.age() < ttl));
        self.pending.retain(|key, _| self.sessions.contains_key(key));

        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!("Swept {} stale punch sessions", removed);
        }
        removed
    }
}

async fn sweep_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(inner.config.sweep_interval);
    // first tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = inner.sweep_wake.notified() => {}
        }
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        inner.sweep();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Initiator
// ═══════════════════════════════════════════════════════════════════════════

impl PunchCoordinator {
    /// Punch a connection to `peer` over `pipe_id`
    ///
    /// Sends our predictions, waits for the peer's answer until the meeting
    /// time, then runs the burst. A missing answer is tolerated: the burst
    /// runs against the placeholder predictions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` for unusable peer addresses, `InvalidState`
    /// when a punch for the pipe is already running, `Timeout` when the
    /// protocol deadline passes, `Channel` when the coordinator closes
    /// meanwhile and `PunchFailed` when no connection survives the burst.
    pub async fn connect(&self, peer: &PeerAddr, pipe_id: &str) -> Result<TcpStream> {
        let closed = self.inner.closed.notified();
        self.ensure_running()?;
        let theirs = self.peer_interface(peer)?;
        let route = &self.inner.endpoint.route;
        let dest = select_dest(route.as_ref(), theirs);
        let mode = punch_mode(route.as_ref(), dest);
        validate_dest(route.as_ref(), dest, mode)?;

        let key = SessionKey::new(&peer.node_id, pipe_id);
        let mut rng = StdRng::from_entropy();
        let session = self.register(
            &key,
            PunchSession::new(
                key.clone(),
                new_session_id(&mut rng),
                mode,
                dest,
                self.inner.endpoint.nat,
                theirs.nat(),
            ),
        )?;
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(key.clone(), tx);
        info!("Punching {} via {} ({})", key, dest, mode);

        let run = self.run_initiator(&session, theirs.if_index, rx, &mut rng);
        let result = tokio::select! {
            outcome = timeout(self.inner.config.protocol_deadline, run) => match outcome {
                Ok(result) => result,
                Err(elapsed) => Err(elapsed.into()),
            },
            () = closed => Err(RiftError::Channel("coordinator closed".into())),
        };
        self.forget(&key);
        result
    }

    async fn run_initiator(
        &self,
        session: &Mutex<PunchSession>,
        their_if_index: u8,
        updated: oneshot::Receiver<Incoming>,
        rng: &mut StdRng,
    ) -> Result<TcpStream> {
        let ctx = self.step_context();
        let (peer, message) = {
            let mut guard = session.lock().await;
            guard.step(None, &ctx, rng).await?;
            let message = PunchMessage {
                kind: MessageKind::InitialMappings,
                pipe_id: guard.key().pipe_id.clone(),
                session_id: guard.session_id().to_string(),
                meet_time: guard.meet_time(),
                mappings: guard.ours().to_vec(),
                src_addr: self.inner.endpoint.addr.clone(),
                af: self.inner.endpoint.route.af(),
                our_if_index: self.inner.endpoint.route.interface_index(),
                their_if_index,
            };
            (guard.key().node_id.clone(), message)
        };

        self.inner.signaling.send(&peer, message.to_bytes()).await?;

        let wait = self.inner.clock.until(message.meet_time);
        match timeout(wait, updated).await {
            Ok(Ok(incoming)) => {
                let mut guard = session.lock().await;
                guard.step(Some(incoming), &ctx, rng).await?;
            }
            Ok(Err(_)) => debug!("Update channel for {} dropped", peer),
            Err(_) => debug!("No update from {} before the meeting time", peer),
        }

        let plan = session
            .lock()
            .await
            .burst_plan(&self.inner.clock, &self.inner.config)?;
        spawn_burst(plan, Arc::clone(&self.inner.endpoint.route)).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Recipient
// ═══════════════════════════════════════════════════════════════════════════

impl PunchCoordinator {
    /// Process one signaling payload from `from`
    ///
    /// # Errors
    ///
    /// Returns `Protocol` for malformed or misdirected messages,
    /// `InvalidState` for out-of-order ones and `SessionNotFound` for an
    /// update without a punch in flight.
    pub async fn handle_message(&self, from: &str, payload: &[u8]) -> Result<()> {
        self.ensure_running()?;
        let message = PunchMessage::from_bytes(payload, self.inner.config.signal_servers)?;
        let route = &self.inner.endpoint.route;

        if message.src_addr.node_id != from {
            return Err(RiftError::protocol("sender does not match source address"));
        }
        if message.their_if_index != route.interface_index() {
            return Err(RiftError::protocol("message aimed at another interface"));
        }
        if message.af != route.af() {
            return Err(RiftError::protocol("address family does not match route"));
        }

        let key = SessionKey::new(from, &message.pipe_id);
        match message.kind {
            MessageKind::InitialMappings => self.handle_initial(key, message).await,
            MessageKind::UpdatedMappings => self.handle_updated(key, message).await,
        }
    }

    async fn handle_initial(&self, key: SessionKey, message: PunchMessage) -> Result<()> {
        let theirs = message
            .src_addr
            .interface(message.af, message.our_if_index)
            .ok_or(RiftError::protocol("sender interface missing from its address"))?;
        let route = &self.inner.endpoint.route;
        let dest = select_dest(route.as_ref(), theirs);
        let mode = punch_mode(route.as_ref(), dest);
        validate_dest(route.as_ref(), dest, mode)?;

        let session = self.register(
            &key,
            PunchSession::new(
                key.clone(),
                message.session_id.clone(),
                mode,
                dest,
                self.inner.endpoint.nat,
                theirs.nat(),
            ),
        )?;

        let answered = self.answer(&session, &message).await;
        let (reply, plan) = match answered {
            Ok(answer) => answer,
            Err(e) => {
                self.forget(&key);
                return Err(e);
            }
        };
        if let Err(e) = self.inner.signaling.send(&key.node_id, reply.to_bytes()).await {
            self.forget(&key);
            return Err(e);
        }

        debug!("Answered punch {} ({}), burst in {:?}", key, mode, plan.start_in);
        let this = self.clone();
        let route = Arc::clone(route);
        self.track(async move {
            let outcome = spawn_burst(plan, route).await;
            this.inner.sessions.remove(&key);
            match outcome {
                Ok(stream) => {
                    info!("Punched {} on the peer's initiative", key);
                    let punched = Punched {
                        peer: key.node_id,
                        pipe_id: key.pipe_id,
                        stream,
                    };
                    if this.inner.accepted_tx.send(punched).is_err() {
                        warn!("Punched stream dropped, nobody accepting");
                    }
                }
                Err(e) => warn!("Punch {} failed: {}", key, e),
            }
        })
        .await;
        Ok(())
    }

    async fn answer(
        &self,
        session: &Mutex<PunchSession>,
        message: &PunchMessage,
    ) -> Result<(PunchMessage, crate::burst::BurstPlan)> {
        let ctx = self.step_context();
        let mut rng = StdRng::from_entropy();
        let mut guard = session.lock().await;
        let incoming = Incoming {
            mappings: message.mappings.clone(),
            meet_time: message.meet_time,
        };
        guard.step(Some(incoming), &ctx, &mut rng).await?;

        let reply = PunchMessage {
            kind: MessageKind::UpdatedMappings,
            pipe_id: message.pipe_id.clone(),
            session_id: message.session_id.clone(),
            meet_time: guard.meet_time(),
            mappings: guard.ours().to_vec(),
            src_addr: self.inner.endpoint.addr.clone(),
            af: message.af,
            our_if_index: self.inner.endpoint.route.interface_index(),
            their_if_index: message.our_if_index,
        };
        let plan = guard.burst_plan(&self.inner.clock, &self.inner.config)?;
        Ok((reply, plan))
    }

    async fn handle_updated(&self, key: SessionKey, message: PunchMessage) -> Result<()> {
        let session = self
            .inner
            .sessions
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RiftError::SessionNotFound(key.to_string()))?;
        {
            let guard = session.lock().await;
            if guard.session_id() != message.session_id {
                return Err(RiftError::protocol("session id mismatch"));
            }
            if guard.state() != Some(PunchState::InitiatedPredictions) {
                return Err(RiftError::InvalidState(
                    format!("update for {key} outside the initiated state").into(),
                ));
            }
        }

        let (_, waiter) = self
            .inner
            .pending
            .remove(&key)
            .ok_or(RiftError::invalid_state("no punch waiting for an update"))?;
        waiter
            .send(Incoming {
                mappings: message.mappings,
                meet_time: message.meet_time,
            })
            .map_err(|_| RiftError::Channel("initiator stopped waiting".into()))
    }

    /// Next stream punched on the peer's initiative
    ///
    /// # Errors
    ///
    /// Returns `Channel` once the coordinator is closed.
    pub async fn accept(&self) -> Result<Punched> {
        let closed = self.inner.closed.notified();
        self.ensure_running()
            .map_err(|_| RiftError::Channel("coordinator closed".into()))?;
        let mut accepted = self.inner.accepted_rx.lock().await;
        tokio::select! {
            punched = accepted.recv() => {
                punched.ok_or(RiftError::Channel("coordinator closed".into()))
            }
            () = closed => Err(RiftError::Channel("coordinator closed".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::SignalHub;
    use rift_core::{Delta, NatType, ReusableRoute};
    use std::time::Duration;

    fn addr(node_id: &str) -> PeerAddr {
        PeerAddr::new(node_id).with_interface(IfaceEntry {
            if_index: 0,
            addr_index: 0,
            ext_ip: "127.0.0.1".parse().unwrap(),
            nic_ip: "127.0.0.1".parse().unwrap(),
            port: 40000,
            nat_type: NatType::OpenInternet,
            delta: Delta::na(),
        })
    }

    fn config() -> PunchConfig {
        PunchConfig {
            window: Duration::from_millis(500),
            meet_delay: Duration::from_millis(300),
            ..PunchConfig::default()
        }
    }

    fn coordinator(hub: &SignalHub, node_id: &str) -> (PunchCoordinator, mpsc::UnboundedReceiver<Inbound>) {
        let (signaling, inbox) = hub.join(node_id);
        let endpoint = Endpoint {
            addr: addr(node_id),
            route: Arc::new(ReusableRoute::loopback()),
            nat: NatDescriptor::open(),
            probe: None,
        };
        (
            PunchCoordinator::new(endpoint, Arc::new(signaling), SyncedClock::local(), config()),
            inbox,
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_self_punch_roundtrip() {
        let hub = SignalHub::new();
        let (alice, alice_inbox) = coordinator(&hub, "alice");
        let (bob, bob_inbox) = coordinator(&hub, "bob");
        alice.start().await.unwrap();
        bob.start().await.unwrap();
        alice.spawn_listener(alice_inbox);
        bob.spawn_listener(bob_inbox);

        let bob_addr = addr("bob");
        let (connected, accepted) = tokio::join!(alice.connect(&bob_addr, "pipe"), bob.accept());
        let connected = connected.unwrap();
        let accepted = accepted.unwrap();
        assert_eq!(accepted.peer, "alice");
        assert_eq!(accepted.pipe_id, "pipe");
        assert_eq!(
            connected.local_addr().unwrap(),
            accepted.stream.peer_addr().unwrap()
        );
        assert_eq!(alice.session_count(), 0);

        alice.close().await;
        bob.close().await;
    }

    #[tokio::test]
    async fn test_rejects_spoofed_sender() {
        let hub = SignalHub::new();
        let (bob, _inbox) = coordinator(&hub, "bob");
        bob.start().await.unwrap();

        let message = PunchMessage {
            kind: MessageKind::InitialMappings,
            pipe_id: "pipe".into(),
            session_id: "00112233".into(),
            meet_time: 1.0,
            mappings: vec![rift_core::Mapping::new(41000, 0, 41000)],
            src_addr: addr("alice"),
            af: rift_core::AddressFamily::V4,
            our_if_index: 0,
            their_if_index: 0,
        };
        let err = bob
            .handle_message("mallory", &message.to_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, RiftError::Protocol(_)));

        let mut wrong_if = message.clone();
        wrong_if.their_if_index = 3;
        assert!(bob.handle_message("alice", &wrong_if.to_bytes()).await.is_err());

        let mut update = message;
        update.kind = MessageKind::UpdatedMappings;
        assert!(matches!(
            bob.handle_message("alice", &update.to_bytes()).await,
            Err(RiftError::SessionNotFound(_))
        ));
        bob.close().await;
    }

    #[tokio::test]
    async fn test_close_interrupts_connect() {
        let hub = SignalHub::new();
        let (signaling, _inbox) = hub.join("alice");
        // dave never answers
        let (_dave, _dave_inbox) = hub.join("dave");
        let endpoint = Endpoint {
            addr: addr("alice"),
            route: Arc::new(ReusableRoute::loopback()),
            nat: NatDescriptor::open(),
            probe: None,
        };
        let config = PunchConfig {
            meet_delay: Duration::from_secs(20),
            ..PunchConfig::default()
        };
        let alice =
            PunchCoordinator::new(endpoint, Arc::new(signaling), SyncedClock::local(), config);
        alice.start().await.unwrap();

        let dave_addr = addr("dave");
        let closer = alice.clone();
        let (result, ()) = tokio::join!(
            timeout(Duration::from_secs(5), alice.connect(&dave_addr, "pipe")),
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                closer.close().await;
            }
        );
        let err = result.expect("connect outlived close").unwrap_err();
        assert!(matches!(err, RiftError::Channel(_)), "{err}");
        assert_eq!(alice.session_count(), 0);
    }

    #[tokio::test]
    async fn test_requires_start() {
        let hub = SignalHub::new();
        let (alice, _inbox) = coordinator(&hub, "alice");
        assert!(alice.connect(&addr("bob"), "pipe").await.is_err());
        alice.start().await.unwrap();
        assert!(alice.start().await.is_err());
        alice.close().await;
        assert!(!alice.is_running());
        assert!(alice.accept().await.is_err());
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let hub = SignalHub::new();
        let (signaling, _inbox) = hub.join("alice");
        let endpoint = Endpoint {
            addr: addr("alice"),
            route: Arc::new(ReusableRoute::loopback()),
            nat: NatDescriptor::open(),
            probe: None,
        };
        let config = PunchConfig {
            session_ttl: Duration::ZERO,
            ..PunchConfig::default()
        };
        let alice =
            PunchCoordinator::new(endpoint, Arc::new(signaling), SyncedClock::local(), config);
        let key = SessionKey::new("bob", "pipe");
        alice
            .register(
                &key,
                PunchSession::new(
                    key.clone(),
                    "00",
                    crate::mode::PunchMode::SelfPunch,
                    "127.0.0.1".parse().unwrap(),
                    NatDescriptor::open(),
                    NatDescriptor::open(),
                ),
            )
            .unwrap();
        assert!(alice.register(&key, PunchSession::new(
            key.clone(),
            "01",
            crate::mode::PunchMode::SelfPunch,
            "127.0.0.1".parse().unwrap(),
            NatDescriptor::open(),
            NatDescriptor::open(),
        )).is_err());
        assert_eq!(alice.session_count(), 1);
        assert_eq!(alice.sweep_expired(), 1);
        assert_eq!(alice.session_count(), 0);
    }
}
