//! Alert envelope wire format
//!
//! Layout: a fixed 20-byte header (version, sequence number, timestamp,
//! alert type, all little-endian), a type-specific payload, and a trailing
//! block of `threshold` signatures. The signature unit is 65 bytes except
//! for the legacy type 99, which uses 128-byte units.
//!
//! `parse` and `serialize` are inverses: any byte string `parse` accepts is
//! reproduced exactly by `serialize` on the result.

use crate::error::WireError;
use crate::payload::Payload;
use crate::types::Hash;
use sha2::{Digest, Sha256};
use std::fmt;

/// Width of the fixed envelope header.
pub const HEADER_LEN: usize = 20;

/// Width of one compact recoverable signature.
pub const COMPACT_SIG_LEN: usize = 65;

/// Width of one signature unit in a legacy (type 99) envelope.
pub const LEGACY_SIG_LEN: usize = 128;

/// Envelope version emitted by this implementation.
pub const ALERT_VERSION: u32 = 1;

/// Alert type discriminator. The numeric codes match the deployed network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AlertType {
    Informational = 1,
    FreezeUtxo = 2,
    UnfreezeUtxo = 3,
    ConfiscateTransaction = 4,
    BanPeer = 5,
    UnbanPeer = 6,
    InvalidateBlock = 7,
    SetKeys = 8,
    /// Early-format alert; its only wire distinction is the 128-byte
    /// signature unit.
    Legacy = 99,
}

impl AlertType {
    pub fn from_code(code: u32) -> Result<Self, WireError> {
        match code {
            1 => Ok(AlertType::Informational),
            2 => Ok(AlertType::FreezeUtxo),
            3 => Ok(AlertType::UnfreezeUtxo),
            4 => Ok(AlertType::ConfiscateTransaction),
            5 => Ok(AlertType::BanPeer),
            6 => Ok(AlertType::UnbanPeer),
            7 => Ok(AlertType::InvalidateBlock),
            8 => Ok(AlertType::SetKeys),
            99 => Ok(AlertType::Legacy),
            other => Err(WireError::UnknownAlertType(other)),
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    /// Width of one signature unit for this alert type.
    pub fn signature_len(self) -> usize {
        match self {
            AlertType::Legacy => LEGACY_SIG_LEN,
            _ => COMPACT_SIG_LEN,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertType::Informational => "Informational",
            AlertType::FreezeUtxo => "FreezeUtxo",
            AlertType::UnfreezeUtxo => "UnfreezeUtxo",
            AlertType::ConfiscateTransaction => "ConfiscateTransaction",
            AlertType::BanPeer => "BanPeer",
            AlertType::UnbanPeer => "UnbanPeer",
            AlertType::InvalidateBlock => "InvalidateBlock",
            AlertType::SetKeys => "SetKeys",
            AlertType::Legacy => "Legacy",
        };
        f.write_str(name)
    }
}

impl TryFrom<u32> for AlertType {
    type Error = WireError;
    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

/// A parsed alert envelope.
///
/// The raw bytes a stored alert was parsed from remain authoritative; this
/// struct is the working view, and [`Alert::serialize`] reproduces the raw
/// form exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub version: u32,
    pub sequence_number: u32,
    /// Unix seconds, informational only.
    pub timestamp: u64,
    pub payload: Payload,
    /// Exactly `threshold` signatures, each `signature_len()` bytes.
    pub signatures: Vec<Vec<u8>>,
}

impl Alert {
    /// Build an unsigned alert at the current envelope version.
    pub fn unsigned(sequence_number: u32, timestamp: u64, payload: Payload) -> Self {
        Self {
            version: ALERT_VERSION,
            sequence_number,
            timestamp,
            payload,
            signatures: Vec::new(),
        }
    }

    pub fn alert_type(&self) -> AlertType {
        self.payload.alert_type()
    }

    /// Parse an envelope. `threshold` fixes how many trailing signature
    /// units the envelope must carry.
    pub fn parse(bytes: &[u8], threshold: usize) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::TooShort { got: bytes.len() });
        }
        let version = u32::from_le_bytes(bytes[0..4].try_into().expect("4 bytes"));
        let sequence_number = u32::from_le_bytes(bytes[4..8].try_into().expect("4 bytes"));
        let timestamp = u64::from_le_bytes(bytes[8..16].try_into().expect("8 bytes"));
        let code = u32::from_le_bytes(bytes[16..20].try_into().expect("4 bytes"));
        let alert_type = AlertType::from_code(code)?;

        let sig_len = alert_type.signature_len();
        let sig_block = threshold * sig_len;
        // Header, at least one payload byte, and the full signature block.
        if bytes.len() < HEADER_LEN + 1 + sig_block {
            return Err(WireError::TooShort { got: bytes.len() });
        }

        let payload_end = bytes.len() - sig_block;
        let payload = Payload::read(alert_type, &bytes[HEADER_LEN..payload_end])?;
        let signatures = bytes[payload_end..]
            .chunks(sig_len)
            .map(|chunk| chunk.to_vec())
            .collect();

        Ok(Self {
            version,
            sequence_number,
            timestamp,
            payload,
            signatures,
        })
    }

    /// Serialize the full envelope: header, payload, signature block.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = self.serialize_unsigned();
        for sig in &self.signatures {
            out.extend_from_slice(sig);
        }
        out
    }

    /// Header plus payload: the bytes the signing digest covers.
    pub fn serialize_unsigned(&self) -> Vec<u8> {
        let payload = self.payload.serialize();
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.sequence_number.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.alert_type().code().to_le_bytes());
        out.extend_from_slice(&payload);
        out
    }

    /// The digest the authority keys sign: double SHA-256 over the
    /// envelope minus the signature block.
    pub fn signing_digest(&self) -> Hash {
        Hash::from(sha256d(&self.serialize_unsigned()))
    }
}

/// Double SHA-256.
pub fn sha256d(bytes: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(bytes);
    Sha256::digest(first).into()
}

/// Content hash of a raw envelope, identifying the alert in storage and
/// logs.
pub fn content_hash(raw: &[u8]) -> Hash {
    Hash::from(sha256d(raw))
}
