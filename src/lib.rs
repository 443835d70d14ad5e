//! # quicpack: Datagram Assembly for a QUIC v1 Endpoint
//!
//! This crate implements the send half of a QUIC endpoint's packet layer:
//! it assembles outgoing datagrams from queued connection state, allocates
//! packet numbers, drives the per-level AEAD sealers, applies QUIC's
//! padding and coalescing rules, and hands every committed packet to loss
//! detection.
//!
//! - **RFC 9000**: packet formats, coalescing, Initial padding
//! - **RFC 9001**: packet protection and header protection
//! - **RFC 9002**: the sent-packet records loss detection consumes
//! - **RFC 9221**: unreliable DATAGRAM frames
//!
//! ## Architecture Overview
//!
//! ```text
//! quicpack/
//! ├── error      - transport error codes and the packer error surface
//! ├── types      - varints, connection IDs, levels, sizing constants
//! ├── frames     - owned outbound frames with exact wire lengths
//! ├── packet     - extended headers and packet number encoding
//! ├── crypto     - sealer traits (AEAD + header protection)
//! ├── recovery   - sent-packet records and lost-frame dispositions
//! ├── buffer     - pooled output buffers
//! ├── transport  - peer transport parameters
//! └── packer     - the packet packer and its collaborator seams
//! ```
//!
//! ## Design Principles
//!
//! 1. **Passive state machine**: no I/O, no clock, no timers. Each call
//!    completes synchronously; the connection loop decides when to pack.
//!
//! 2. **Byte-exact budgeting**: payload lengths are composed against a
//!    budget and verified against the serialized bytes; any disagreement
//!    is a [`error::PackError::Bug`].
//!
//! 3. **Pluggable collaborators**: sealing, packet numbers, stream data,
//!    ACKs and retransmissions are trait objects injected at construction.

#![forbid(unsafe_code)]

pub mod buffer;
pub mod crypto;
pub mod error;
pub mod frames;
pub mod packer;
pub mod packet;
pub mod recovery;
pub mod transport;
pub mod types;

pub use buffer::PacketBuffer;
pub use crypto::{PacketSealer, SealerError, SealingManager};
pub use error::{ApplicationError, PackError, TransportError, TransportErrorCode};
pub use frames::Frame;
pub use packer::{CoalescedPacket, LongHeaderPacket, PacketPacker, ShortHeaderPacket};
pub use recovery::{OnLost, SentFrame, SentPacket};
pub use types::{ConnectionId, EncryptionLevel, Instant, PacketNumber, Side};
