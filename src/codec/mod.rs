//! TCP header codec
//!
//! Pure, allocation-light conversion between the on-wire TCP header and
//! [`TcpHeader`]. Used by the `tcp_monitor` binary to print segments seen on
//! a raw socket. The proxy data path never touches it.
//!
//! # Example
//!
//! ```
//! use ya_proxy::codec::{decode, encode};
//!
//! let wire = [
//!     0x04, 0xD2, 0x00, 0x50, 0x00, 0x00, 0x00, 0x01,
//!     0x00, 0x00, 0x00, 0x02, 0x50, 0x12, 0xFF, 0xFF,
//!     0x12, 0x34, 0x00, 0x00,
//! ];
//! let header = decode(&wire).unwrap();
//! assert_eq!(header.source_port, 1234);
//! assert!(header.flags.syn && header.flags.ack);
//! assert_eq!(&encode(&header)[..], &wire[..]);
//! ```

mod error;
mod header;
pub mod options;

pub use error::DecodeError;
pub use header::{
    decode, encode, TcpFlags, TcpHeader, MAX_DATA_OFFSET, MAX_HEADER_LEN, MIN_DATA_OFFSET,
    MIN_HEADER_LEN,
};
pub use options::TcpOption;
