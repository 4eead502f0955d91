//! Wire-level error types for the alert envelope codec

use thiserror::Error;

/// Errors produced while parsing or validating alert envelope bytes.
///
/// All of these are terminal for the alert being parsed: the bytes are
/// rejected and never persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("alert is shorter than the minimum envelope: {got} bytes")]
    TooShort { got: usize },

    #[error("unexpected end of buffer")]
    UnexpectedEnd,

    #[error("too many bytes in alert message")]
    TooManyBytesInAlert,

    #[error("length prefix is longer than the remaining buffer")]
    LengthExceedsBuffer,

    #[error("invalid variable-length integer")]
    InvalidVarInt,

    #[error("unknown alert type: {0}")]
    UnknownAlertType(u32),

    #[error("invalid public key format")]
    InvalidKeyFormat,

    #[error("height exceeds the signed 64-bit range")]
    HeightOverflow,

    #[error("freeze payload is not a positive multiple of 57 bytes: got {0}")]
    FreezeInvalidLength(usize),

    #[error("confiscation payload is shorter than 9 bytes: got {0}")]
    ConfiscationTooShort(usize),

    #[error("invalidate-block payload is shorter than 33 bytes: got {0}")]
    InvalidateBlockTooShort(usize),

    #[error("set-keys payload must be exactly 165 bytes: got {0}")]
    SetKeysInvalidLength(usize),
}
