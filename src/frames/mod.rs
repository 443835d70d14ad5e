//! QUIC frame model for outbound packets (RFC 9000 Section 19, RFC 9221).

mod encode;
mod types;

pub use types::*;
