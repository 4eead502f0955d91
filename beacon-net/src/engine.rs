//! Sync engine: peer lifecycle around the session state machine
//!
//! Owns the TCP listener for inbound peers and one reconnect loop per
//! configured outbound peer. Sessions themselves are symmetric; the engine
//! only decides who dials whom, applies backoff between reconnects, and
//! aggregates per-peer observations for the health surface.

use crate::error::NetError;
use crate::session::{run_session, SessionConfig, SessionObserver};
use beacon_core::Processor;
use beacon_model::AlertStore;
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Aggregated peer observations, read by the health endpoint.
#[derive(Default)]
pub struct SyncStatus {
    active: AtomicUsize,
    peer_latest: Mutex<HashMap<String, u32>>,
}

impl SyncStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently connected peer sessions.
    pub fn active_peers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// True iff no connected peer has reported a tip above ours.
    pub fn synced(&self, my_latest: u32) -> bool {
        let peers = self.peer_latest.lock().expect("status lock");
        peers.values().all(|latest| *latest <= my_latest)
    }

    fn session_opened(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    fn session_closed(&self, peer: &str) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.peer_latest.lock().expect("status lock").remove(peer);
    }
}

impl SessionObserver for SyncStatus {
    fn peer_latest(&self, peer: &str, latest: u32) {
        self.peer_latest
            .lock()
            .expect("status lock")
            .insert(peer.to_string(), latest);
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// Address to accept inbound peers on; None disables the listener.
    pub listen: Option<SocketAddr>,
    /// Outbound peers to keep a session with ("host:port").
    pub peers: Vec<String>,
    pub session: SessionConfig,
}

/// Drives all peer sessions for one node.
pub struct SyncEngine {
    config: SyncEngineConfig,
    processor: Arc<Processor>,
    store: Arc<dyn AlertStore>,
    status: Arc<SyncStatus>,
    token: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        config: SyncEngineConfig,
        processor: Arc<Processor>,
        store: Arc<dyn AlertStore>,
        token: CancellationToken,
    ) -> Self {
        Self {
            config,
            processor,
            store,
            status: Arc::new(SyncStatus::new()),
            token,
        }
    }

    pub fn status(&self) -> Arc<SyncStatus> {
        self.status.clone()
    }

    /// Bind the listener and spawn all peer tasks. Returns the bound
    /// listen address (useful when configured with port 0).
    pub async fn start(&self) -> Result<Option<SocketAddr>, NetError> {
        let mut bound = None;
        if let Some(addr) = self.config.listen {
            let listener = TcpListener::bind(addr).await?;
            bound = Some(listener.local_addr()?);
            info!(addr = %bound.unwrap(), "p2p listener started");
            tokio::spawn(accept_loop(
                listener,
                self.processor.clone(),
                self.store.clone(),
                self.status.clone(),
                self.config.session,
                self.token.clone(),
            ));
        }

        for peer in &self.config.peers {
            tokio::spawn(outbound_loop(
                peer.clone(),
                self.processor.clone(),
                self.store.clone(),
                self.status.clone(),
                self.config.session,
                self.token.clone(),
            ));
        }
        Ok(bound)
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    processor: Arc<Processor>,
    store: Arc<dyn AlertStore>,
    status: Arc<SyncStatus>,
    config: SessionConfig,
    token: CancellationToken,
) {
    loop {
        let (stream, remote) = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            },
        };
        debug!(peer = %remote, "inbound peer connected");
        let peer = remote.to_string();
        let processor = processor.clone();
        let store = store.clone();
        let status = status.clone();
        let token = token.clone();
        tokio::spawn(async move {
            status.session_opened();
            let result = run_session(
                stream,
                &peer,
                processor,
                store,
                status.clone(),
                config,
                token,
            )
            .await;
            status.session_closed(&peer);
            match result {
                Ok(()) => debug!(peer, "inbound session ended"),
                Err(err) => warn!(peer, error = %err, "inbound session failed"),
            }
        });
    }
}

async fn outbound_loop(
    peer: String,
    processor: Arc<Processor>,
    store: Arc<dyn AlertStore>,
    status: Arc<SyncStatus>,
    config: SessionConfig,
    token: CancellationToken,
) {
    let mut backoff = BACKOFF_BASE;
    loop {
        if token.is_cancelled() {
            break;
        }
        match TcpStream::connect(&peer).await {
            Ok(stream) => {
                info!(peer, "connected to peer");
                backoff = BACKOFF_BASE;
                status.session_opened();
                let result = run_session(
                    stream,
                    &peer,
                    processor.clone(),
                    store.clone(),
                    status.clone(),
                    config,
                    token.clone(),
                )
                .await;
                status.session_closed(&peer);
                match result {
                    Ok(()) => debug!(peer, "session ended"),
                    Err(err) => warn!(peer, error = %err, "session failed"),
                }
            }
            Err(err) => {
                debug!(peer, error = %err, "connect failed");
            }
        }

        let wait = jittered(backoff);
        backoff = (backoff * 2).min(BACKOFF_CAP);
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

/// Backoff with +/-50% jitter so a restarted mesh does not reconnect in
/// lockstep.
fn jittered(base: Duration) -> Duration {
    let millis = base.as_millis() as u64;
    let jitter = rand::thread_rng().gen_range(millis / 2..=millis + millis / 2);
    Duration::from_millis(jitter)
}
