//! I/O utilities for ya-proxy
//!
//! Bidirectional splice between an inbound client stream and its upstream,
//! with half-close propagation and bounded teardown.

mod copy;

pub use copy::{
    splice, CopyOutcome, Direction, SpliceOptions, SpliceReport, Termination, DEFAULT_BUFFER_SIZE,
    DEFAULT_HALF_CLOSE_TIMEOUT,
};
