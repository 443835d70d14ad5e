//! Collaborator seams of the packet packer.
//!
//! The packer is polymorphic over the connection machinery that feeds it:
//! packet-number allocation, crypto streams, the stream multiplexer, the
//! ACK generator, the retransmission queue and the datagram queue. All
//! methods are non-blocking; the packer never suspends.

use crate::frames::{AckFrame, Frame};
use crate::packet::number::PacketNumberLen;
use crate::recovery::SentFrame;
use crate::types::{EncryptionLevel, PacketNumber};

/// Packet number allocation, one monotonic counter per encryption level.
///
/// A peeked number must be popped in the same packet-assembly step, and
/// the popped value must equal the peeked one; the packer aborts with a
/// BUG error otherwise.
pub trait PacketNumberManager {
    /// Next packet number for the level and the length it will be encoded
    /// with, without consuming it
    fn peek_packet_number(&self, level: EncryptionLevel) -> (PacketNumber, PacketNumberLen);

    /// Consume and return the next packet number for the level
    fn pop_packet_number(&mut self, level: EncryptionLevel) -> PacketNumber;
}

/// Pending handshake data of one crypto stream (Initial or Handshake).
pub trait CryptoStream {
    fn has_data(&self) -> bool;

    /// Pop one CRYPTO frame no larger than `max_len` bytes on the wire
    fn pop_crypto_frame(&mut self, max_len: usize) -> Option<Frame>;
}

/// The stream multiplexer: queued control frames and stream data.
pub trait FrameSource {
    fn has_data(&self) -> bool;

    /// Append queued control frames, at most `max_len` bytes in total.
    /// Returns the number of bytes appended.
    fn append_control_frames(&mut self, frames: &mut Vec<SentFrame>, max_len: usize) -> usize;

    /// Append stream frames, at most `max_len` bytes in total.
    /// Returns the number of bytes appended.
    fn append_stream_frames(&mut self, frames: &mut Vec<SentFrame>, max_len: usize) -> usize;
}

/// The ACK generator.
pub trait AckFrameSource {
    /// Get an ACK frame for the level, if one should be sent.
    ///
    /// With `only_if_queued`, an ACK is returned only if one is already
    /// due; otherwise the generator may produce one opportunistically
    /// because the packet is being sent anyway.
    fn get_ack_frame(&mut self, level: EncryptionLevel, only_if_queued: bool) -> Option<AckFrame>;
}

/// Frames queued for retransmission after loss, scoped per level.
pub trait RetransmissionQueue {
    fn has_initial_data(&self) -> bool;
    fn has_handshake_data(&self) -> bool;
    fn has_app_data(&self) -> bool;

    /// Pop an Initial-level frame no larger than `max_len`, if any fits
    fn get_initial_frame(&mut self, max_len: usize) -> Option<Frame>;

    /// Pop a Handshake-level frame no larger than `max_len`, if any fits
    fn get_handshake_frame(&mut self, max_len: usize) -> Option<Frame>;

    /// Pop an application-data frame no larger than `max_len`, if any fits
    fn get_app_data_frame(&mut self, max_len: usize) -> Option<Frame>;
}

/// Queued DATAGRAM frames (RFC 9221). Unreliable: sent once, never
/// retransmitted.
pub trait DatagramQueue {
    /// The next queued frame, if any, without consuming it
    fn peek(&self) -> Option<&Frame>;

    /// Consume the frame returned by the last `peek`
    fn pop(&mut self);
}
