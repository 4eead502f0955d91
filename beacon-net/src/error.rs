//! Error types for the beacon-net crate

use beacon_core::ProcessorError;
use beacon_model::{StoreError, SyncWireError};
use thiserror::Error;

/// Network-layer errors. Any of these closes the peer session; none of
/// them affect other peers or stored state.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sync wire error: {0}")]
    Wire(#[from] SyncWireError),

    #[error("peer misbehaving: {0}")]
    Misbehaving(String),

    #[error("peer closed the stream")]
    Closed,

    #[error("timed out waiting for peer response")]
    Timeout,

    #[error("alert rejected by processor: {0}")]
    Rejected(#[from] ProcessorError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}
