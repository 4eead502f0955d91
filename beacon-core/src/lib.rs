//! Core processing for the beacon alert distribution service
//!
//! Implementations of the capability traits declared in `beacon-model`
//! (key registry, alert store) plus the two engines that drive them: the
//! admission [`processor`] and the [`retry`] worker. The P2P layer lives
//! in `beacon-net`; this crate never touches a socket.

pub mod keys;
pub mod processor;
pub mod retry;
pub mod store;
pub mod verifier;

pub use keys::{MemoryKeyRegistry, RedbKeyRegistry};
pub use processor::{ProcessOutcome, Processor, ProcessorError};
pub use retry::spawn_retry_worker;
pub use store::{MemoryAlertStore, RedbAlertStore};
pub use verifier::{
    public_key_of, recover_signer, sign_digest, verify_threshold, VerifyError,
};
