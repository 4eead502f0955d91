//! P2P sync layer for the beacon alert distribution service
//!
//! A four-message gossip protocol converges every peer on the same dense
//! alert log: poll a peer's latest sequence, admit its tip, then pull each
//! missing sequence in order through the processor. Sessions are symmetric
//! and transport-agnostic; the engine supplies TCP and reconnect policy.

pub mod engine;
pub mod error;
pub mod framing;
pub mod server;
pub mod session;

pub use engine::{SyncEngine, SyncEngineConfig, SyncStatus};
pub use error::NetError;
pub use framing::{MessageSink, MessageStream};
pub use server::answer_request;
pub use session::{run_session, transition, NullObserver, SessionConfig, SessionObserver, Step, SyncState};
