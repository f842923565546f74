//! Synchronized connect burst
//!
//! At the meeting time both peers hammer each predicted mapping pair with
//! connect attempts while a reusable listener on every local port accepts
//! whatever SYN gets through. Every connection that survives the window
//! enters a tie-break both sides evaluate identically, so they keep the same
//! socket without another round trip.

use crate::mode::PunchMode;
use rift_core::{Mapping, Result, RiftError, Route};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{debug, info, trace};

const LISTEN_BACKLOG: u32 = 16;

/// Extra time for connect attempts still in flight at the deadline
const DRAIN_SLACK: Duration = Duration::from_millis(50);

/// Everything a burst needs, detached from the session
#[derive(Debug, Clone)]
pub struct BurstPlan {
    /// Name used for the burst thread and logs
    pub label: String,
    /// Punch mode, decides which peer port is aimed at
    pub mode: PunchMode,
    /// Peer address
    pub dest_ip: IpAddr,
    /// (ours, theirs) mapping pairs
    pub pairs: Vec<(Mapping, Mapping)>,
    /// Attempt all pairs in parallel rather than round-robin
    pub concurrent: bool,
    /// Delay until the meeting time
    pub start_in: Duration,
    /// Length of the burst
    pub window: Duration,
    /// Gap between attempts
    pub spacing: Duration,
    /// Timeout of a single connect
    pub attempt_timeout: Duration,
}

impl BurstPlan {
    /// Peer endpoint for one of their mappings
    #[must_use]
    pub fn target(&self, theirs: &Mapping) -> SocketAddr {
        let port = match self.mode {
            PunchMode::Remote => theirs.remote,
            PunchMode::Lan | PunchMode::SelfPunch => theirs.local,
        };
        SocketAddr::new(self.dest_ip, port)
    }
}

fn ip_value(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Tie-break digest for a connection seen from one side
///
/// Both ends compute the same digest for the same connection: the tuple is
/// ordered by IP (or fully sorted when the IPs match) before hashing.
#[must_use]
pub fn tie_break_key(ours: SocketAddr, theirs: SocketAddr) -> [u8; 32] {
    let (our_ip, their_ip) = (ip_value(ours.ip()), ip_value(theirs.ip()));
    let (our_port, their_port) = (u128::from(ours.port()), u128::from(theirs.port()));

    let tuple = if our_ip == their_ip {
        let mut t = [our_ip, their_ip, our_port, their_port];
        t.sort_unstable();
        t
    } else if our_ip > their_ip {
        [our_ip, their_ip, our_port, their_port]
    } else {
        [their_ip, our_ip, their_port, our_port]
    };

    let mut hasher = blake3::Hasher::new();
    for value in tuple {
        hasher.update(&value.to_be_bytes());
    }
    *hasher.finalize().as_bytes()
}

#[derive(Debug)]
struct Candidate {
    pair: usize,
    stream: TcpStream,
}

async fn attempt(plan: &BurstPlan, route: &dyn Route, pair: usize) -> Option<TcpStream> {
    let (ours, theirs) = plan.pairs[pair];
    let target = plan.target(&theirs);
    let socket = match route.bind(ours.local) {
        Ok(socket) => socket,
        Err(e) => {
            trace!("Bind {} failed: {}", ours.local, e);
            return None;
        }
    };

    match timeout(plan.attempt_timeout, socket.connect(target)).await {
        Ok(Ok(stream)) => Some(stream),
        Ok(Err(e)) => {
            trace!("Connect {} -> {} failed: {}", ours.local, target, e);
            None
        }
        Err(_) => None,
    }
}

async fn connect_loop(
    pairs: Vec<usize>,
    plan: Arc<BurstPlan>,
    route: Arc<dyn Route>,
    done: Arc<[AtomicBool]>,
    found: mpsc::UnboundedSender<Candidate>,
    deadline: Instant,
) {
    while Instant::now() < deadline {
        let mut pending = false;
        for &pair in &pairs {
            if done[pair].load(Ordering::Acquire) {
                continue;
            }
            pending = true;
            if let Some(stream) = attempt(&plan, route.as_ref(), pair).await {
                done[pair].store(true, Ordering::Release);
                let _ = found.send(Candidate { pair, stream });
            }
            sleep(plan.spacing).await;
        }
        if !pending {
            break;
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    pair: usize,
    dest_ip: IpAddr,
    done: Arc<[AtomicBool]>,
    found: mpsc::UnboundedSender<Candidate>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) if peer.ip() == dest_ip => {
                done[pair].store(true, Ordering::Release);
                let _ = found.send(Candidate { pair, stream });
            }
            Ok((_, peer)) => debug!("Ignoring stray connection from {}", peer),
            Err(e) => {
                debug!("Accept on pair {} stopped: {}", pair, e);
                return;
            }
        }
    }
}

/// Tie-break digest of the pair both sides predicted
///
/// Remote punches may land on a NAT mapping neither side predicted exactly,
/// so each side hashes the agreed pair rather than what it observed.
#[must_use]
pub fn predicted_key(plan: &BurstPlan, our_ip: IpAddr, pair: usize) -> [u8; 32] {
    let (ours, theirs) = plan.pairs[pair];
    tie_break_key(SocketAddr::new(our_ip, ours.remote), plan.target(&theirs))
}

fn pick_winner(
    plan: &BurstPlan,
    route: &dyn Route,
    candidates: Vec<Candidate>,
) -> Result<TcpStream> {
    let total = candidates.len();
    let mut best: Option<([u8; 32], TcpStream)> = None;

    for Candidate { pair, stream } in candidates {
        let key = match plan.mode {
            PunchMode::Remote => predicted_key(plan, route.external_ip(), pair),
            PunchMode::Lan | PunchMode::SelfPunch => {
                match (stream.local_addr(), stream.peer_addr()) {
                    (Ok(ours), Ok(theirs)) => tie_break_key(ours, theirs),
                    _ => continue,
                }
            }
        };
        let better = best.as_ref().is_none_or(|(current, _)| key > *current);
        if better {
            best = Some((key, stream));
        }
    }

    let (_, winner) = best.ok_or(RiftError::punch_failed("no connection within the window"))?;
    info!(
        "Burst {} kept connection to {} ({} candidates)",
        plan.label,
        winner.peer_addr().map_or_else(|_| "?".to_string(), |a| a.to_string()),
        total
    );
    Ok(winner)
}

/// Let running tasks finish within `grace`, then abort the rest
async fn finish_in_flight(tasks: &mut JoinSet<()>, grace: Duration) {
    let drained = timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        debug!("Aborting {} connect loops after the grace period", tasks.len());
    }
    tasks.shutdown().await;
}

/// Run a burst on the current runtime
///
/// Waits for the meeting time, attempts every pair for the full window and
/// returns the tie-break winner. Losing connections are closed.
///
/// # Errors
///
/// Returns `PunchFailed` when no connection was made.
pub async fn run_burst(plan: BurstPlan, route: Arc<dyn Route>) -> Result<TcpStream> {
    if plan.pairs.is_empty() {
        return Err(RiftError::punch_failed("no mapping pairs"));
    }
    if !plan.start_in.is_zero() {
        debug!("Burst {} starts in {:?}", plan.label, plan.start_in);
        sleep(plan.start_in).await;
    }

    let deadline = Instant::now() + plan.window;
    let plan = Arc::new(plan);
    let done: Arc<[AtomicBool]> = (0..plan.pairs.len()).map(|_| AtomicBool::new(false)).collect();
    let (found_tx, mut found_rx) = mpsc::unbounded_channel();
    let mut listeners = JoinSet::new();
    let mut connectors = JoinSet::new();

    for (pair, (ours, _)) in plan.pairs.iter().enumerate() {
        match route.bind(ours.local).and_then(|s| s.listen(LISTEN_BACKLOG)) {
            Ok(listener) => {
                listeners.spawn(accept_loop(
                    listener,
                    pair,
                    plan.dest_ip,
                    Arc::clone(&done),
                    found_tx.clone(),
                ));
            }
            Err(e) => debug!("No listener on {}: {}", ours.local, e),
        }
    }

    let groups: Vec<Vec<usize>> = if plan.concurrent {
        (0..plan.pairs.len()).map(|pair| vec![pair]).collect()
    } else {
        vec![(0..plan.pairs.len()).collect()]
    };
    for pairs in groups {
        connectors.spawn(connect_loop(
            pairs,
            Arc::clone(&plan),
            Arc::clone(&route),
            Arc::clone(&done),
            found_tx.clone(),
            deadline,
        ));
    }
    drop(found_tx);

    sleep_until(deadline).await;
    finish_in_flight(&mut connectors, plan.attempt_timeout + DRAIN_SLACK).await;
    listeners.shutdown().await;

    let mut candidates = Vec::new();
    while let Ok(candidate) = found_rx.try_recv() {
        candidates.push(candidate);
    }
    pick_winner(&plan, route.as_ref(), candidates)
}

/// Run a burst on a dedicated thread with its own runtime
///
/// The winning socket is handed back to the caller's runtime.
///
/// # Errors
///
/// Returns `TaskJoin` if the thread cannot start or dies, and any
/// [`run_burst`] error.
pub async fn spawn_burst(plan: BurstPlan, route: Arc<dyn Route>) -> Result<TcpStream> {
    let (tx, rx) = oneshot::channel();
    let name = format!("rift-burst-{}", plan.label);

    thread::Builder::new()
        .name(name)
        .spawn(move || {
            let result = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(RiftError::from)
                .and_then(|rt| {
                    rt.block_on(run_burst(plan, route))
                        .and_then(|stream| stream.into_std().map_err(RiftError::from))
                });
            let _ = tx.send(result);
        })
        .map_err(|e| RiftError::TaskJoin(format!("burst thread: {e}").into()))?;

    let stream = rx
        .await
        .map_err(|_| RiftError::TaskJoin("burst thread exited".into()))??;
    Ok(TcpStream::from_std(stream)?)
}
