use crate::capture::Datalink;
use std::io;
use thiserror::Error;

/// The primary error type for the `vmsnoop-lib` library.
#[derive(Error, Debug)]
pub enum SnoopError {
    #[error("not a btsnoop file")]
    BadMagic,

    #[error("expected btsnoop file format version 1 but got {0}")]
    UnsupportedVersion(u32),

    #[error("Unsupported Datalink Type: {0}")]
    UnsupportedDatalink(Datalink),

    #[error("capture truncated at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("#{seq} expected attribute protocol channel 00 04 but got {channel:04x}")]
    ChannelMismatch { seq: u64, channel: u16 },

    #[error("#{seq} malformed packet: {what}")]
    Malformed { seq: u64, what: String },

    #[error("a uuid should have a length of 16 bytes, got {0}")]
    InvalidUuidLength(usize),

    #[error("encryption key must be a 32 hex character string (16 bytes), got {0} bytes")]
    InvalidKeyLength(usize),

    #[error("encryption key is not valid hex: {0}")]
    InvalidKeyHex(hex::FromHexError),

    #[error("invalid bike id: {0}")]
    InvalidAddress(String),

    #[error("unable to decrypt: {0}")]
    Decrypt(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SnoopError {
    /// Configuration problems are detected before any record is decoded.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            SnoopError::InvalidKeyLength(_) | SnoopError::InvalidKeyHex(_) | SnoopError::InvalidAddress(_)
        )
    }

    pub(crate) fn malformed(seq: u64, what: impl Into<String>) -> Self {
        SnoopError::Malformed { seq, what: what.into() }
    }
}
