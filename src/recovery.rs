//! # Sent-Packet Records (RFC 9002 Section 2)
//!
//! What the packer hands to loss detection for every committed packet:
//! the frames with their lost-frame dispositions, plus the metadata the
//! ACK handler needs to track the packet in flight.

use crate::frames::Frame;
use crate::types::{EncryptionLevel, Instant, PacketNumber};

/// Retransmission scope for a lost frame
///
/// Initial and Handshake frames go back to their own level's queue; 0-RTT
/// and 1-RTT frames share the application data queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSpace {
    Initial,
    Handshake,
    AppData,
}

impl FrameSpace {
    pub fn for_level(level: EncryptionLevel) -> Self {
        match level {
            EncryptionLevel::Initial => FrameSpace::Initial,
            EncryptionLevel::Handshake => FrameSpace::Handshake,
            EncryptionLevel::ZeroRtt | EncryptionLevel::OneRtt => FrameSpace::AppData,
        }
    }
}

/// What to do with a frame when its packet is declared lost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnLost {
    /// Queue the frame for retransmission in the given space
    Retransmit(FrameSpace),

    /// Drop the frame. Used for data that must not be retransmitted:
    /// DATAGRAM frames and PINGs injected to break ACK-only streaks.
    Ignore,
}

/// A frame together with its lost-frame disposition
///
/// The disposition starts out unset for ordinary frames; the packer fills
/// it with the level-appropriate [`OnLost::Retransmit`] when the packet is
/// committed. Frames constructed with an explicit disposition keep it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub frame: Frame,
    pub on_lost: Option<OnLost>,
}

impl SentFrame {
    /// A frame whose disposition is assigned at packet commit
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            on_lost: None,
        }
    }

    /// A frame that is dropped on loss
    pub fn ignored(frame: Frame) -> Self {
        Self {
            frame,
            on_lost: Some(OnLost::Ignore),
        }
    }
}

/// Returns true if any frame in the slice elicits an acknowledgement
pub fn has_ack_eliciting_frames(frames: &[SentFrame]) -> bool {
    frames.iter().any(|f| f.frame.is_ack_eliciting())
}

/// Sent Packet Record
///
/// Handed to the ACK handler when a packet is committed. Every frame in
/// `frames` carries a disposition by the time the record is built.
#[derive(Debug, Clone)]
pub struct SentPacket {
    /// Packet number
    pub packet_number: PacketNumber,

    /// Frames the packet carried (excluding the ACK)
    pub frames: Vec<SentFrame>,

    /// Largest packet number acknowledged by the packet's ACK frame
    pub largest_acked: Option<PacketNumber>,

    /// On-wire size of the sealed packet in bytes
    pub length: usize,

    /// Encryption level the packet was sent at
    pub encryption_level: EncryptionLevel,

    /// Time the packet was handed to the send path
    pub send_time: Instant,

    /// Whether this packet probes for a larger path MTU
    pub is_mtu_probe: bool,
}

impl SentPacket {
    pub fn is_ack_eliciting(&self) -> bool {
        has_ack_eliciting_frames(&self.frames)
    }
}
