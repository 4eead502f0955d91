//! P2P sync wire format
//!
//! Four message types converge peers' alert logs: a requester asks for the
//! latest sequence, pulls each missing sequence in order, and the responder
//! answers with raw envelope bytes. Layout: one type byte, then (for every
//! type except `IWantLatest`) a little-endian u32 sequence number, then
//! optional opaque data.

use thiserror::Error;

/// Sync message parse errors. These close the peer session; they never
/// affect stored state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncWireError {
    #[error("empty sync message")]
    Empty,

    #[error("sync message is missing its sequence number")]
    MissingSequence,

    #[error("latest-request message carries trailing bytes")]
    TrailingBytes,
}

/// A single sync-protocol message.
///
/// `kind` is kept as a raw byte: unknown types still parse at the wire
/// level (the state machine ignores them), so a newer peer does not break
/// an older one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMessage {
    pub kind: u8,
    pub sequence_number: u32,
    pub data: Vec<u8>,
}

impl SyncMessage {
    /// "Tell me your highest sequence number." 1-byte message.
    pub const I_WANT_LATEST: u8 = 0x01;
    /// "Give me the alert at `seq`." 5-byte message.
    pub const I_WANT_SEQUENCE: u8 = 0x02;
    /// "Here is the alert at `seq`." `data` is the raw envelope.
    pub const I_GOT_SEQUENCE: u8 = 0x03;
    /// "My latest is `seq`." `data` is the raw envelope of that alert.
    pub const I_GOT_LATEST: u8 = 0x04;

    pub fn want_latest() -> Self {
        Self {
            kind: Self::I_WANT_LATEST,
            sequence_number: 0,
            data: Vec::new(),
        }
    }

    pub fn want_sequence(sequence_number: u32) -> Self {
        Self {
            kind: Self::I_WANT_SEQUENCE,
            sequence_number,
            data: Vec::new(),
        }
    }

    pub fn got_sequence(sequence_number: u32, data: Vec<u8>) -> Self {
        Self {
            kind: Self::I_GOT_SEQUENCE,
            sequence_number,
            data,
        }
    }

    pub fn got_latest(sequence_number: u32, data: Vec<u8>) -> Self {
        Self {
            kind: Self::I_GOT_LATEST,
            sequence_number,
            data,
        }
    }

    /// Parse a sync message.
    ///
    /// `IWantLatest` is valid at exactly 1 byte; every other type requires
    /// at least 5. Extra trailing bytes become `data`.
    pub fn parse(bytes: &[u8]) -> Result<Self, SyncWireError> {
        let kind = *bytes.first().ok_or(SyncWireError::Empty)?;
        if kind == Self::I_WANT_LATEST {
            if bytes.len() > 1 {
                return Err(SyncWireError::TrailingBytes);
            }
            return Ok(Self::want_latest());
        }
        if bytes.len() < 5 {
            return Err(SyncWireError::MissingSequence);
        }
        let sequence_number = u32::from_le_bytes(bytes[1..5].try_into().expect("4 bytes"));
        Ok(Self {
            kind,
            sequence_number,
            data: bytes[5..].to_vec(),
        })
    }

    /// Serialize to wire form. `IWantLatest` is a single byte; everything
    /// else is type, sequence, data.
    pub fn serialize(&self) -> Vec<u8> {
        if self.kind == Self::I_WANT_LATEST {
            return vec![self.kind];
        }
        let mut out = Vec::with_capacity(5 + self.data.len());
        out.push(self.kind);
        out.extend_from_slice(&self.sequence_number.to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_want_latest_is_one_byte() {
        let msg = SyncMessage::want_latest();
        assert_eq!(msg.serialize(), vec![0x01]);
        assert_eq!(SyncMessage::parse(&[0x01]).unwrap(), msg);
    }

    #[test]
    fn test_want_latest_rejects_trailing() {
        assert_eq!(
            SyncMessage::parse(&[0x01, 0x00]),
            Err(SyncWireError::TrailingBytes)
        );
    }

    #[test]
    fn test_empty_message() {
        assert_eq!(SyncMessage::parse(&[]), Err(SyncWireError::Empty));
    }

    #[test]
    fn test_sequence_field_is_le_u32() {
        let msg = SyncMessage::want_sequence(0x0403_0201);
        let bytes = msg.serialize();
        assert_eq!(bytes, vec![0x02, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(SyncMessage::parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_missing_sequence() {
        for len in 1..5 {
            let mut bytes = vec![SyncMessage::I_WANT_SEQUENCE];
            bytes.resize(len, 0x00);
            assert_eq!(
                SyncMessage::parse(&bytes),
                Err(SyncWireError::MissingSequence),
                "length {len}"
            );
        }
    }

    #[test]
    fn test_data_roundtrip() {
        let msg = SyncMessage::got_sequence(7, b"alert envelope bytes".to_vec());
        let parsed = SyncMessage::parse(&msg.serialize()).unwrap();
        assert_eq!(parsed, msg);

        let latest = SyncMessage::got_latest(u32::MAX, vec![0xaa; 1000]);
        assert_eq!(SyncMessage::parse(&latest.serialize()).unwrap(), latest);
    }

    #[test]
    fn test_unknown_kind_still_parses() {
        let bytes = [0xf0, 0x05, 0x00, 0x00, 0x00, 0xde, 0xad];
        let msg = SyncMessage::parse(&bytes).unwrap();
        assert_eq!(msg.kind, 0xf0);
        assert_eq!(msg.sequence_number, 5);
        assert_eq!(msg.data, vec![0xde, 0xad]);
        assert_eq!(msg.serialize(), bytes);
    }
}
