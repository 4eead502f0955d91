//! Per-peer sync session
//!
//! Both sides of a connection run the same session: it answers the peer's
//! requests from the local store, and drives its own catch-up state
//! machine from the peer's responses.
//!
//! The state machine is an explicit value stepped by a pure transition
//! function, so the protocol logic is testable without sockets:
//!
//! ```text
//! Idle --poll--> AwaitingLatest --IGotLatest(ahead)--> Catching{next,target}
//!   ^                 |                                      |
//!   |                 +--IGotLatest(behind/equal)------------+--next > target
//!   +--------------------------------------------------------+
//! ```

use crate::error::NetError;
use crate::framing::{MessageSink, MessageStream};
use crate::server::answer_request;
use beacon_core::Processor;
use beacon_model::{AlertStore, SyncMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Catch-up progress against one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Converged (or not yet polled); nothing outstanding.
    Idle,
    /// Sent `IWantLatest`, waiting for the peer's tip.
    AwaitingLatest,
    /// Pulling sequences `next..=target` in order.
    Catching { next: u32, target: u32 },
}

/// Result of one state-machine step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub state: SyncState,
    /// Message to send back, if any.
    pub reply: Option<SyncMessage>,
    /// Raw envelope to feed through the processor, if any.
    pub admit: Option<Vec<u8>>,
    /// The peer's reported tip, when the message carried one.
    pub peer_latest: Option<u32>,
}

impl Step {
    fn stay(state: SyncState) -> Self {
        Self {
            state,
            reply: None,
            admit: None,
            peer_latest: None,
        }
    }
}

/// Step the catch-up state machine on a response message.
///
/// `my_latest` is the local store's highest sequence (0 when empty).
/// Request messages (`IWant*`) are not handled here; the session answers
/// those from the store directly. Unknown message kinds are ignored.
pub fn transition(state: SyncState, msg: &SyncMessage, my_latest: u32) -> Result<Step, NetError> {
    match msg.kind {
        SyncMessage::I_GOT_LATEST => {
            // Only meaningful while we are waiting for it.
            if state != SyncState::AwaitingLatest {
                return Ok(Step::stay(state));
            }
            let target = msg.sequence_number;
            if target <= my_latest {
                return Ok(Step {
                    state: SyncState::Idle,
                    reply: None,
                    admit: None,
                    peer_latest: Some(target),
                });
            }
            // The data is the peer's tip alert: admit it now, then pull
            // the gap below it in order.
            let next = my_latest + 1;
            Ok(Step {
                state: SyncState::Catching { next, target },
                reply: Some(SyncMessage::want_sequence(next)),
                admit: Some(msg.data.clone()),
                peer_latest: Some(target),
            })
        }
        SyncMessage::I_GOT_SEQUENCE => {
            let SyncState::Catching { next, target } = state else {
                return Ok(Step::stay(state));
            };
            if msg.sequence_number != next {
                return Err(NetError::Misbehaving(format!(
                    "expected sequence {next}, peer sent {}",
                    msg.sequence_number
                )));
            }
            let following = next + 1;
            let (state, reply) = if following > target {
                (SyncState::Idle, None)
            } else {
                (
                    SyncState::Catching { next: following, target },
                    Some(SyncMessage::want_sequence(following)),
                )
            };
            Ok(Step {
                state,
                reply,
                admit: Some(msg.data.clone()),
                peer_latest: None,
            })
        }
        // Unknown kinds parse at the wire level but mean nothing to this
        // state machine.
        _ => Ok(Step::stay(state)),
    }
}

/// Session tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// How often an idle session re-polls the peer's latest sequence.
    pub poll_interval: Duration,
    /// How long to wait for a response while not idle.
    pub response_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            response_timeout: Duration::from_secs(15),
        }
    }
}

/// Callbacks the session uses to report peer observations.
pub trait SessionObserver: Send + Sync {
    fn peer_latest(&self, peer: &str, latest: u32) {
        let _ = (peer, latest);
    }
}

/// No-op observer for tests and standalone sessions.
pub struct NullObserver;

impl SessionObserver for NullObserver {}

/// Run one peer session over an established stream until the peer closes,
/// a protocol error occurs, or the token is cancelled.
pub async fn run_session<S>(
    stream: S,
    peer: &str,
    processor: Arc<Processor>,
    store: Arc<dyn AlertStore>,
    observer: Arc<dyn SessionObserver>,
    config: SessionConfig,
    token: CancellationToken,
) -> Result<(), NetError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut sink = MessageSink::new(write_half);
    let mut stream = MessageStream::new(read_half);

    let mut state = SyncState::Idle;
    // First poll fires immediately on connect.
    let mut poll_at = tokio::time::Instant::now();
    let mut deadline = poll_at + config.response_timeout;

    loop {
        let awaiting = state != SyncState::Idle;
        tokio::select! {
            _ = token.cancelled() => return Ok(()),

            _ = tokio::time::sleep_until(poll_at), if !awaiting => {
                sink.send(&SyncMessage::want_latest()).await?;
                state = SyncState::AwaitingLatest;
                deadline = tokio::time::Instant::now() + config.response_timeout;
                trace!(peer, "polled peer for latest");
            }

            _ = tokio::time::sleep_until(deadline), if awaiting => {
                match state {
                    // A peer with an empty store never answers the latest
                    // poll; treat silence as "nothing to offer".
                    SyncState::AwaitingLatest => {
                        state = SyncState::Idle;
                        poll_at = tokio::time::Instant::now() + config.poll_interval;
                    }
                    _ => return Err(NetError::Timeout),
                }
            }

            msg = stream.recv() => {
                let Some(msg) = msg? else {
                    return Err(NetError::Closed);
                };
                deadline = tokio::time::Instant::now() + config.response_timeout;

                // Requests are answered from the store regardless of our
                // own catch-up state.
                if answer_request(&msg, peer, &store, &mut sink).await? {
                    continue;
                }

                let my_latest = store
                    .latest()
                    .await?
                    .map(|r| r.sequence_number)
                    .unwrap_or(0);
                let step = transition(state, &msg, my_latest)?;

                if let Some(latest) = step.peer_latest {
                    observer.peer_latest(peer, latest);
                }
                if let Some(bytes) = step.admit {
                    // Any processor rejection closes the session; the
                    // backoff loop will re-pull elsewhere.
                    let outcome = processor.process_raw(&bytes).await?;
                    trace!(peer, ?outcome, "admitted alert from peer");
                }
                if let Some(reply) = step.reply {
                    sink.send(&reply).await?;
                }
                if step.state == SyncState::Idle && state != SyncState::Idle {
                    debug!(peer, "caught up with peer");
                    poll_at = tokio::time::Instant::now() + config.poll_interval;
                }
                state = step.state;
            }
        }
    }
}
