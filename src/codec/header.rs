//! TCP header record and its wire encoding

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use super::error::DecodeError;
use super::options::{parse_options, TcpOption};

/// Length of the fixed prologue (5 words)
pub const MIN_HEADER_LEN: usize = 20;

/// Largest header the 4-bit data offset can describe (15 words)
pub const MAX_HEADER_LEN: usize = 60;

/// Smallest legal data offset
pub const MIN_DATA_OFFSET: u8 = 5;

/// Largest legal data offset
pub const MAX_DATA_OFFSET: u8 = 15;

const RESERVED_MASK: u16 = 0x3f;
const FLAGS_MASK: u16 = 0x3f;

/// Control bits of a TCP segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[allow(clippy::struct_excessive_bools)]
pub struct TcpFlags {
    pub urg: bool,
    pub ack: bool,
    pub psh: bool,
    pub rst: bool,
    pub syn: bool,
    pub fin: bool,
}

impl TcpFlags {
    pub const URG: u8 = 0x20;
    pub const ACK: u8 = 0x10;
    pub const PSH: u8 = 0x08;
    pub const RST: u8 = 0x04;
    pub const SYN: u8 = 0x02;
    pub const FIN: u8 = 0x01;

    /// No flags set
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            urg: false,
            ack: false,
            psh: false,
            rst: false,
            syn: false,
            fin: false,
        }
    }

    /// Every flag set
    #[must_use]
    pub const fn all() -> Self {
        Self {
            urg: true,
            ack: true,
            psh: true,
            rst: true,
            syn: true,
            fin: true,
        }
    }

    /// Unpack the low six bits of the control word
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self {
            urg: bits & Self::URG != 0,
            ack: bits & Self::ACK != 0,
            psh: bits & Self::PSH != 0,
            rst: bits & Self::RST != 0,
            syn: bits & Self::SYN != 0,
            fin: bits & Self::FIN != 0,
        }
    }

    /// Pack into `URG<<5 | ACK<<4 | PSH<<3 | RST<<2 | SYN<<1 | FIN`
    #[must_use]
    pub const fn bits(self) -> u8 {
        (self.urg as u8) << 5
            | (self.ack as u8) << 4
            | (self.psh as u8) << 3
            | (self.rst as u8) << 2
            | (self.syn as u8) << 1
            | self.fin as u8
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.bits() == 0
    }
}

impl fmt::Display for TcpFlags {
    /// Set flags as `U|A|P|R|S|F`, in that order, omitting clear ones.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letters = [
            (self.urg, "U"),
            (self.ack, "A"),
            (self.psh, "P"),
            (self.rst, "R"),
            (self.syn, "S"),
            (self.fin, "F"),
        ];
        let mut first = true;
        for (set, letter) in letters {
            if !set {
                continue;
            }
            if !first {
                f.write_str("|")?;
            }
            f.write_str(letter)?;
            first = false;
        }
        Ok(())
    }
}

/// A decoded TCP segment header.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Source Port          |       Destination Port        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        Sequence Number                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Acknowledgment Number                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Data |           |U|A|P|R|S|F|                               |
/// | Offset| Reserved  |R|C|S|S|Y|I|            Window             |
/// |       |           |G|K|H|T|N|N|                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           Checksum            |         Urgent Pointer        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Options                    |    Padding    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Checksum and window are carried raw; nothing is recomputed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence: u32,
    pub acknowledgement: u32,
    /// Header length in 32-bit words, 5..=15
    pub data_offset: u8,
    /// Six reserved bits, normally zero
    pub reserved: u8,
    pub flags: TcpFlags,
    pub window: u16,
    pub checksum: u16,
    pub urgent_pointer: u16,
    /// Options in wire order; an explicit end-of-list entry is kept if present
    pub options: Vec<TcpOption>,
    /// Bytes between the end of the option list and `data_offset * 4`
    pub padding: Vec<u8>,
}

impl Default for TcpHeader {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl TcpHeader {
    /// A bare 20-byte header between two ports
    #[must_use]
    pub const fn new(source_port: u16, destination_port: u16) -> Self {
        Self {
            source_port,
            destination_port,
            sequence: 0,
            acknowledgement: 0,
            data_offset: MIN_DATA_OFFSET,
            reserved: 0,
            flags: TcpFlags::empty(),
            window: 0,
            checksum: 0,
            urgent_pointer: 0,
            options: Vec::new(),
            padding: Vec::new(),
        }
    }

    /// Parse a header from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::Short`] if `bytes` is under 20 bytes or under
    ///   `data_offset * 4`
    /// - [`DecodeError::InvalidOffset`] if the data offset is outside 5..=15
    /// - [`DecodeError::MalformedOption`] if an option overruns the header
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < MIN_HEADER_LEN {
            return Err(DecodeError::short(MIN_HEADER_LEN, bytes.len()));
        }

        let mut buf = &bytes[..MIN_HEADER_LEN];
        let source_port = buf.get_u16();
        let destination_port = buf.get_u16();
        let sequence = buf.get_u32();
        let acknowledgement = buf.get_u32();
        let control = buf.get_u16();
        let window = buf.get_u16();
        let checksum = buf.get_u16();
        let urgent_pointer = buf.get_u16();

        let data_offset = (control >> 12) as u8;
        if !(MIN_DATA_OFFSET..=MAX_DATA_OFFSET).contains(&data_offset) {
            return Err(DecodeError::InvalidOffset(data_offset));
        }

        let header_end = usize::from(data_offset) * 4;
        if bytes.len() < header_end {
            return Err(DecodeError::short(header_end, bytes.len()));
        }

        let parsed = parse_options(&bytes[MIN_HEADER_LEN..header_end], MIN_HEADER_LEN)?;

        let header = Self {
            source_port,
            destination_port,
            sequence,
            acknowledgement,
            data_offset,
            reserved: ((control >> 6) & RESERVED_MASK) as u8,
            flags: TcpFlags::from_bits((control & FLAGS_MASK) as u8),
            window,
            checksum,
            urgent_pointer,
            options: parsed.options,
            padding: parsed.padding,
        };

        trace!("Decoded TCP header: {}", header);
        Ok(header)
    }

    /// Serialise into a fresh buffer. See [`encode_into`](Self::encode_into).
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Append the on-wire header to `buf`.
    ///
    /// Writes the prologue, the options verbatim and the stored padding, then
    /// zero-fills to [`header_len`](Self::header_len) bytes.
    ///
    /// Options are never dropped: content beyond 40 option bytes is emitted
    /// past [`MAX_HEADER_LEN`] with the data offset stuck at 15, so the output
    /// no longer describes its own length. Check
    /// [`fits_data_offset`](Self::fits_data_offset) first when that matters.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let start = buf.len();
        let target = self.header_len();
        buf.reserve(target);

        buf.put_u16(self.source_port);
        buf.put_u16(self.destination_port);
        buf.put_u32(self.sequence);
        buf.put_u32(self.acknowledgement);
        buf.put_u16(self.control_word());
        buf.put_u16(self.window);
        buf.put_u16(self.checksum);
        buf.put_u16(self.urgent_pointer);

        for option in &self.options {
            option.encode(buf);
        }
        buf.put_slice(&self.padding);

        let written = buf.len() - start;
        buf.put_bytes(0, target - written);
    }

    /// Combined data-offset / reserved / flags word
    #[must_use]
    pub fn control_word(&self) -> u16 {
        (u16::from(self.data_offset & 0x0f) << 12)
            | ((u16::from(self.reserved) & RESERVED_MASK) << 6)
            | u16::from(self.flags.bits())
    }

    /// Bytes the options and padding occupy before zero-fill
    #[must_use]
    pub fn options_len(&self) -> usize {
        self.options.iter().map(TcpOption::encoded_len).sum::<usize>() + self.padding.len()
    }

    /// Length [`encode`](Self::encode) produces:
    /// `max(data_offset * 4, content rounded up to 4, 20)`.
    ///
    /// Exceeds [`MAX_HEADER_LEN`] when the options do not fit.
    #[must_use]
    pub fn header_len(&self) -> usize {
        let content = MIN_HEADER_LEN + self.options_len();
        let aligned = content.div_ceil(4) * 4;
        (usize::from(self.data_offset) * 4).max(aligned).max(MIN_HEADER_LEN)
    }

    /// Whether the encoded header is exactly `data_offset * 4` bytes, i.e. a
    /// receiver would find the payload where [`encode`](Self::encode) ends
    #[must_use]
    pub fn fits_data_offset(&self) -> bool {
        self.header_len() == self.payload_offset()
    }

    /// Where the segment payload starts, according to the data offset
    #[must_use]
    pub fn payload_offset(&self) -> usize {
        usize::from(self.data_offset) * 4
    }

    /// Recompute `data_offset` from the current options and padding.
    ///
    /// Returns `false` (leaving the offset at 15) when they do not fit in a
    /// 60-byte header.
    #[allow(clippy::cast_possible_truncation)] // clamped to MAX_DATA_OFFSET
    pub fn sync_data_offset(&mut self) -> bool {
        let words = (MIN_HEADER_LEN + self.options_len()).div_ceil(4);
        self.data_offset = words.min(usize::from(MAX_DATA_OFFSET)) as u8;
        words <= usize::from(MAX_DATA_OFFSET)
    }

    /// Find the first option of `kind`
    #[must_use]
    pub fn option(&self, kind: u8) -> Option<&TcpOption> {
        self.options.iter().find(|o| o.kind == kind)
    }
}

impl fmt::Display for TcpHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "src={} dst={} seq={} ack={} off={} res={} flags=[{}] win={} csum={:#06x} urg={} opts=[",
            self.source_port,
            self.destination_port,
            self.sequence,
            self.acknowledgement,
            self.data_offset,
            self.reserved,
            self.flags,
            self.window,
            self.checksum,
            self.urgent_pointer,
        )?;
        for (i, option) in self.options.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{option}")?;
        }
        f.write_str("]")
    }
}

/// Decode a TCP header from `bytes`. See [`TcpHeader::decode`].
///
/// # Errors
///
/// Returns a [`DecodeError`] for short buffers, bad offsets or malformed options.
pub fn decode(bytes: &[u8]) -> Result<TcpHeader, DecodeError> {
    TcpHeader::decode(bytes)
}

/// Encode a TCP header to canonical bytes. See [`TcpHeader::encode`].
#[must_use]
pub fn encode(header: &TcpHeader) -> Bytes {
    header.encode()
}
