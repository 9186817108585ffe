//! TCP options
//!
//! Options sit between the fixed 20-byte prologue and the end of the header
//! declared by the data offset. Two single-byte kinds exist (end-of-list and
//! no-operation); every other kind carries a length byte that counts the
//! kind, the length byte itself and the data.
//!
//! ```text
//! +--------+--------+---------...
//! |  Kind  | Length |  Data (Length - 2 bytes)
//! +--------+--------+---------...
//! ```

use std::fmt;

use bytes::{BufMut, BytesMut};
use tracing::trace;

use super::error::DecodeError;

/// Well-known option kinds
pub mod kind {
    /// End of option list
    pub const EOL: u8 = 0;
    /// No-operation (alignment filler)
    pub const NOP: u8 = 1;
    /// Maximum segment size
    pub const MSS: u8 = 2;
    /// Window scale (RFC 7323)
    pub const WINDOW_SCALE: u8 = 3;
    /// SACK permitted (RFC 2018)
    pub const SACK_PERMITTED: u8 = 4;
    /// Selective acknowledgement blocks (RFC 2018)
    pub const SACK: u8 = 5;
    /// Timestamps (RFC 7323)
    pub const TIMESTAMPS: u8 = 8;
}

/// Largest payload a length-prefixed option can carry
pub const MAX_OPTION_DATA: usize = 253;

/// A single TCP option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpOption {
    /// Option kind
    pub kind: u8,
    /// Total length including kind and length bytes, 0 for single-byte kinds
    pub length: u8,
    /// Option payload (`length - 2` bytes)
    pub data: Vec<u8>,
}

impl TcpOption {
    /// Create an option with a payload. The length byte is derived from it.
    ///
    /// A payload longer than [`MAX_OPTION_DATA`] is cut to that size; use
    /// [`TcpOption::try_new`] to reject it instead.
    #[must_use]
    pub fn new(kind: u8, data: impl Into<Vec<u8>>) -> Self {
        let mut data = data.into();
        data.truncate(MAX_OPTION_DATA);
        Self::with_data(kind, data)
    }

    /// Create an option, or `None` if `data` does not fit a length byte.
    #[must_use]
    pub fn try_new(kind: u8, data: impl Into<Vec<u8>>) -> Option<Self> {
        let data = data.into();
        (data.len() <= MAX_OPTION_DATA).then(|| Self::with_data(kind, data))
    }

    #[allow(clippy::cast_possible_truncation)] // bounded by MAX_OPTION_DATA
    fn with_data(kind: u8, data: Vec<u8>) -> Self {
        Self {
            kind,
            length: (data.len() + 2) as u8,
            data,
        }
    }

    /// End-of-list marker
    #[must_use]
    pub const fn end_of_list() -> Self {
        Self {
            kind: kind::EOL,
            length: 0,
            data: Vec::new(),
        }
    }

    /// No-operation filler
    #[must_use]
    pub const fn nop() -> Self {
        Self {
            kind: kind::NOP,
            length: 0,
            data: Vec::new(),
        }
    }

    /// Maximum segment size option
    #[must_use]
    pub fn mss(mss: u16) -> Self {
        Self::new(kind::MSS, mss.to_be_bytes())
    }

    /// Window scale option
    #[must_use]
    pub fn window_scale(shift: u8) -> Self {
        Self::new(kind::WINDOW_SCALE, [shift])
    }

    /// SACK-permitted option
    #[must_use]
    pub fn sack_permitted() -> Self {
        Self::new(kind::SACK_PERMITTED, Vec::new())
    }

    /// Timestamps option
    #[must_use]
    pub fn timestamps(value: u32, echo_reply: u32) -> Self {
        let mut data = Vec::with_capacity(8);
        data.extend_from_slice(&value.to_be_bytes());
        data.extend_from_slice(&echo_reply.to_be_bytes());
        Self::new(kind::TIMESTAMPS, data)
    }

    /// Whether this kind is encoded as a lone kind byte
    #[must_use]
    pub const fn is_single_byte(&self) -> bool {
        matches!(self.kind, kind::EOL | kind::NOP)
    }

    /// Number of bytes this option occupies on the wire
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        if self.length < 1 {
            1
        } else {
            2 + self.data.len()
        }
    }

    /// MSS value, if this is a well-formed MSS option
    #[must_use]
    pub fn as_mss(&self) -> Option<u16> {
        match (self.kind, self.data.as_slice()) {
            (kind::MSS, [hi, lo]) => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    /// Short name of the option kind
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self.kind {
            kind::EOL => "eol",
            kind::NOP => "nop",
            kind::MSS => "mss",
            kind::WINDOW_SCALE => "wscale",
            kind::SACK_PERMITTED => "sackOK",
            kind::SACK => "sack",
            kind::TIMESTAMPS => "ts",
            _ => "unknown",
        }
    }

    /// Write the option verbatim: kind, then length and data when length ≥ 1.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind);
        if self.length < 1 {
            return;
        }
        buf.put_u8(self.length);
        buf.put_slice(&self.data);
    }
}

impl fmt::Display for TcpOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            kind::EOL | kind::NOP | kind::SACK_PERMITTED => f.write_str(self.kind_name()),
            kind::MSS if self.data.len() == 2 => {
                write!(f, "mss {}", u16::from_be_bytes([self.data[0], self.data[1]]))
            }
            kind::WINDOW_SCALE if self.data.len() == 1 => write!(f, "wscale {}", self.data[0]),
            kind::TIMESTAMPS if self.data.len() == 8 => {
                let val =
                    u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]);
                let ecr =
                    u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]]);
                write!(f, "ts val {val} ecr {ecr}")
            }
            _ => write!(f, "kind {} len {}", self.kind, self.length),
        }
    }
}

/// Parsed options area: the option list plus whatever follows end-of-list.
#[derive(Debug, Default)]
pub(crate) struct ParsedOptions {
    pub options: Vec<TcpOption>,
    pub padding: Vec<u8>,
}

/// Parse the options area `area`, which starts at header byte `base`.
///
/// Kind 0 is recorded and stops parsing; the remaining bytes are returned
/// as padding. Kind 1 is a single byte. Every other kind needs a length byte
/// in `2..=remaining`.
pub(crate) fn parse_options(area: &[u8], base: usize) -> Result<ParsedOptions, DecodeError> {
    let header_end = base + area.len();
    let mut parsed = ParsedOptions::default();
    let mut i = 0;

    while i < area.len() {
        let code = area[i];
        match code {
            kind::EOL => {
                parsed.options.push(TcpOption::end_of_list());
                parsed.padding = area[i + 1..].to_vec();
                trace!(
                    "TCP options end-of-list at byte {}, {} padding bytes",
                    base + i,
                    parsed.padding.len()
                );
                return Ok(parsed);
            }
            kind::NOP => {
                parsed.options.push(TcpOption::nop());
                i += 1;
            }
            _ => {
                let Some(&length) = area.get(i + 1) else {
                    return Err(DecodeError::malformed_option(base + i, code, 0, header_end));
                };
                let len = usize::from(length);
                if len < 2 || i + len > area.len() {
                    return Err(DecodeError::malformed_option(
                        base + i,
                        code,
                        length,
                        header_end,
                    ));
                }
                parsed.options.push(TcpOption {
                    kind: code,
                    length,
                    data: area[i + 2..i + len].to_vec(),
                });
                i += len;
            }
        }
    }

    Ok(parsed)
}
