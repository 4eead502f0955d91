//! Typed alert payloads
//!
//! Each alert type carries one payload variant. The envelope owns the
//! discriminator and the signature block; the variants here own their inner
//! layout. Parsers validate their own invariants and reject trailing bytes,
//! so a payload that reads successfully re-serializes to the same bytes.

use crate::alert::AlertType;
use crate::error::WireError;
use crate::types::{BlockHash, PubKey, TxId};
use crate::varint::{read_length_prefixed, write_length_prefixed, ByteReader};

/// Width of one fund record in a freeze/unfreeze payload.
pub const FUND_RECORD_LEN: usize = 57;

/// Width of a set-keys payload: five 33-byte compressed public keys.
pub const SET_KEYS_LEN: usize = 165;

/// Number of keys in the authoritative set.
pub const KEY_SET_SIZE: usize = 5;

/// A single UTXO to freeze or unfreeze, with its enforcement window.
///
/// Heights travel as u64 but are stored signed; values above `i64::MAX`
/// are rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundRecord {
    pub txid: TxId,
    pub vout: u64,
    pub enforce_start: i64,
    pub enforce_end: i64,
    pub expire_flag: u8,
}

impl FundRecord {
    fn read(r: &mut ByteReader<'_>) -> Result<Self, WireError> {
        let txid = TxId::from(r.read_array::<32>()?);
        let vout = r.read_u64_le()?;
        if vout > i64::MAX as u64 {
            return Err(WireError::HeightOverflow);
        }
        let enforce_start = checked_height(r.read_u64_le()?)?;
        let enforce_end = checked_height(r.read_u64_le()?)?;
        let expire_flag = r.read_u8()?;
        Ok(Self {
            txid,
            vout,
            enforce_start,
            enforce_end,
            expire_flag,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.txid.as_bytes());
        out.extend_from_slice(&self.vout.to_le_bytes());
        out.extend_from_slice(&(self.enforce_start as u64).to_le_bytes());
        out.extend_from_slice(&(self.enforce_end as u64).to_le_bytes());
        out.push(self.expire_flag);
    }

    /// Whether the freeze expires together with consensus enforcement.
    pub fn expires(&self) -> bool {
        self.expire_flag != 0
    }
}

fn checked_height(raw: u64) -> Result<i64, WireError> {
    i64::try_from(raw).map_err(|_| WireError::HeightOverflow)
}

/// The typed payload of an alert, tagged by [`AlertType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Free-form operator text, forwarded to the webhook sink.
    Informational { message: Vec<u8> },
    FreezeUtxo { funds: Vec<FundRecord> },
    UnfreezeUtxo { funds: Vec<FundRecord> },
    ConfiscateTransaction { enforce_at_height: i64, tx: Vec<u8> },
    BanPeer { peer: Vec<u8>, reason: Vec<u8> },
    UnbanPeer { peer: Vec<u8>, reason: Vec<u8> },
    InvalidateBlock { block_hash: BlockHash, reason: Vec<u8> },
    SetKeys { keys: [PubKey; KEY_SET_SIZE] },
    /// Early-format alert kept for wire compatibility; content is opaque.
    Legacy { data: Vec<u8> },
}

impl Payload {
    /// The discriminator this payload serializes under.
    pub fn alert_type(&self) -> AlertType {
        match self {
            Payload::Informational { .. } => AlertType::Informational,
            Payload::FreezeUtxo { .. } => AlertType::FreezeUtxo,
            Payload::UnfreezeUtxo { .. } => AlertType::UnfreezeUtxo,
            Payload::ConfiscateTransaction { .. } => AlertType::ConfiscateTransaction,
            Payload::BanPeer { .. } => AlertType::BanPeer,
            Payload::UnbanPeer { .. } => AlertType::UnbanPeer,
            Payload::InvalidateBlock { .. } => AlertType::InvalidateBlock,
            Payload::SetKeys { .. } => AlertType::SetKeys,
            Payload::Legacy { .. } => AlertType::Legacy,
        }
    }

    /// Parse the payload slice of an envelope for the given alert type.
    pub fn read(alert_type: AlertType, payload: &[u8]) -> Result<Self, WireError> {
        match alert_type {
            AlertType::Informational => read_informational(payload),
            AlertType::FreezeUtxo => {
                Ok(Payload::FreezeUtxo { funds: read_funds(payload)? })
            }
            AlertType::UnfreezeUtxo => {
                Ok(Payload::UnfreezeUtxo { funds: read_funds(payload)? })
            }
            AlertType::ConfiscateTransaction => read_confiscate(payload),
            AlertType::BanPeer => {
                let (peer, reason) = read_peer_reason(payload)?;
                Ok(Payload::BanPeer { peer, reason })
            }
            AlertType::UnbanPeer => {
                let (peer, reason) = read_peer_reason(payload)?;
                Ok(Payload::UnbanPeer { peer, reason })
            }
            AlertType::InvalidateBlock => read_invalidate_block(payload),
            AlertType::SetKeys => read_set_keys(payload),
            AlertType::Legacy => Ok(Payload::Legacy { data: payload.to_vec() }),
        }
    }

    /// Serialize the payload to its wire form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Payload::Informational { message } => {
                write_length_prefixed(&mut out, message);
            }
            Payload::FreezeUtxo { funds } | Payload::UnfreezeUtxo { funds } => {
                for fund in funds {
                    fund.write(&mut out);
                }
            }
            Payload::ConfiscateTransaction { enforce_at_height, tx } => {
                out.extend_from_slice(&(*enforce_at_height as u64).to_le_bytes());
                write_length_prefixed(&mut out, tx);
            }
            Payload::BanPeer { peer, reason } | Payload::UnbanPeer { peer, reason } => {
                write_length_prefixed(&mut out, peer);
                write_length_prefixed(&mut out, reason);
            }
            Payload::InvalidateBlock { block_hash, reason } => {
                out.extend_from_slice(block_hash.as_bytes());
                write_length_prefixed(&mut out, reason);
            }
            Payload::SetKeys { keys } => {
                for key in keys {
                    out.extend_from_slice(key.as_bytes());
                }
            }
            Payload::Legacy { data } => {
                out.extend_from_slice(data);
            }
        }
        out
    }

    /// One-line human-readable description, used by the webhook `text`
    /// field and the HTTP alert view.
    pub fn message_string(&self) -> String {
        match self {
            Payload::Informational { message } => {
                String::from_utf8_lossy(message).into_owned()
            }
            Payload::FreezeUtxo { funds } => {
                format!("Freezing {} fund(s).", funds.len())
            }
            Payload::UnfreezeUtxo { funds } => {
                format!("Unfreezing {} fund(s).", funds.len())
            }
            Payload::ConfiscateTransaction { enforce_at_height, tx } => format!(
                "Adding confiscation transaction [{}] to whitelist enforcing at height [{}].",
                hex::encode(tx),
                enforce_at_height
            ),
            Payload::BanPeer { peer, reason } => format!(
                "Banning peer [{}]; reason [{}].",
                String::from_utf8_lossy(peer),
                String::from_utf8_lossy(reason)
            ),
            Payload::UnbanPeer { peer, reason } => format!(
                "Unbanning peer [{}]; reason [{}].",
                String::from_utf8_lossy(peer),
                String::from_utf8_lossy(reason)
            ),
            Payload::InvalidateBlock { block_hash, reason } => format!(
                "Invalidating block [{}]; reason [{}].",
                block_hash,
                String::from_utf8_lossy(reason)
            ),
            Payload::SetKeys { keys } => format!(
                "Rotating key set to [{}].",
                keys.iter()
                    .map(|k| k.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Payload::Legacy { data } => {
                format!("Legacy alert ({} payload bytes).", data.len())
            }
        }
    }
}

fn read_informational(payload: &[u8]) -> Result<Payload, WireError> {
    let mut r = ByteReader::new(payload);
    let message = read_length_prefixed(&mut r)?.to_vec();
    if !r.is_empty() {
        return Err(WireError::TooManyBytesInAlert);
    }
    Ok(Payload::Informational { message })
}

fn read_funds(payload: &[u8]) -> Result<Vec<FundRecord>, WireError> {
    if payload.is_empty() || payload.len() % FUND_RECORD_LEN != 0 {
        return Err(WireError::FreezeInvalidLength(payload.len()));
    }
    let mut r = ByteReader::new(payload);
    let mut funds = Vec::with_capacity(payload.len() / FUND_RECORD_LEN);
    while !r.is_empty() {
        funds.push(FundRecord::read(&mut r)?);
    }
    Ok(funds)
}

fn read_confiscate(payload: &[u8]) -> Result<Payload, WireError> {
    if payload.len() < 9 {
        return Err(WireError::ConfiscationTooShort(payload.len()));
    }
    let mut r = ByteReader::new(payload);
    let enforce_at_height = checked_height(r.read_u64_le()?)?;
    let tx = read_length_prefixed(&mut r)?.to_vec();
    if !r.is_empty() {
        return Err(WireError::TooManyBytesInAlert);
    }
    Ok(Payload::ConfiscateTransaction { enforce_at_height, tx })
}

fn read_peer_reason(payload: &[u8]) -> Result<(Vec<u8>, Vec<u8>), WireError> {
    let mut r = ByteReader::new(payload);
    let peer = read_length_prefixed(&mut r)?.to_vec();
    let reason = read_length_prefixed(&mut r)?.to_vec();
    if !r.is_empty() {
        return Err(WireError::TooManyBytesInAlert);
    }
    Ok((peer, reason))
}

fn read_invalidate_block(payload: &[u8]) -> Result<Payload, WireError> {
    if payload.len() < 33 {
        return Err(WireError::InvalidateBlockTooShort(payload.len()));
    }
    let mut r = ByteReader::new(payload);
    let block_hash = BlockHash::from(r.read_array::<32>()?);
    let reason = read_length_prefixed(&mut r)?.to_vec();
    if !r.is_empty() {
        return Err(WireError::TooManyBytesInAlert);
    }
    Ok(Payload::InvalidateBlock { block_hash, reason })
}

fn read_set_keys(payload: &[u8]) -> Result<Payload, WireError> {
    if payload.len() != SET_KEYS_LEN {
        return Err(WireError::SetKeysInvalidLength(payload.len()));
    }
    let mut r = ByteReader::new(payload);
    let mut keys = [PubKey([0u8; 33]); KEY_SET_SIZE];
    for key in keys.iter_mut() {
        let candidate = PubKey::from(r.read_array::<33>()?);
        // Must be a valid compressed secp256k1 point.
        k256::PublicKey::from_sec1_bytes(candidate.as_bytes())
            .map_err(|_| WireError::InvalidKeyFormat)?;
        *key = candidate;
    }
    Ok(Payload::SetKeys { keys })
}
