//! Data model and wire formats for the beacon alert distribution service
//!
//! This crate is I/O-free: it defines the alert envelope codec, the typed
//! payload variants, the P2P sync-message codec, strong byte types, and the
//! capability traits (store, key registry, node adapter, webhook sink) the
//! rest of the system is written against.

pub mod alert;
pub mod error;
pub mod payload;
pub mod sync;
pub mod traits;
pub mod types;
pub mod varint;

pub use alert::{content_hash, sha256d, Alert, AlertType, COMPACT_SIG_LEN, HEADER_LEN, LEGACY_SIG_LEN};
pub use error::WireError;
pub use payload::{FundRecord, Payload, FUND_RECORD_LEN, KEY_SET_SIZE, SET_KEYS_LEN};
pub use sync::{SyncMessage, SyncWireError};
pub use traits::{
    AlertNotification, AlertRecord, AlertStore, AdapterError, ConfiscationOutcome, KeyRegistry,
    KeyRegistryError, NodeAdapter, NotProcessedTx, StoreError, WebhookSink,
};
pub use types::{BlockHash, Hash, PubKey, TxId};
