//! TCP header codec errors

use thiserror::Error;

/// Errors returned by [`decode`](super::decode).
///
/// Decode errors are always handed back to the caller; the codec never
/// logs or panics on malformed input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Buffer shorter than the fixed prologue or the declared header length
    #[error("TCP header too short: need {needed} bytes, got {actual}")]
    Short { needed: usize, actual: usize },

    /// Data offset nibble outside 5..=15
    #[error("Invalid TCP data offset: {0} (must be 5..=15)")]
    InvalidOffset(u8),

    /// Option length runs past the end of the header, or is below 2
    #[error("Malformed TCP option kind {kind} at byte {offset}: length {length} exceeds header end {header_end}")]
    MalformedOption {
        offset: usize,
        kind: u8,
        length: u8,
        header_end: usize,
    },
}

impl DecodeError {
    /// Create a short-buffer error
    pub const fn short(needed: usize, actual: usize) -> Self {
        Self::Short { needed, actual }
    }

    /// Create a malformed-option error
    pub const fn malformed_option(offset: usize, kind: u8, length: u8, header_end: usize) -> Self {
        Self::MalformedOption {
            offset,
            kind,
            length,
            header_end,
        }
    }
}
