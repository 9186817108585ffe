//! Integration tests for ya-proxy
//!
//! # Test Organization
//!
//! - `bridge`: end-to-end sessions through a running [`ya_proxy::Bridge`],
//!   with the original-destination lookup replaced by a fixed resolver so no
//!   iptables rules are needed
//! - `codec`: TCP header decode/encode against hand-built segments
//!
//! # Test Requirements
//!
//! Loopback networking only. Nothing needs root.

pub mod bridge;
pub mod codec;
