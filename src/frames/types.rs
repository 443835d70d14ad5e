//! # Outbound Frame Types (RFC 9000 Section 19)
//!
//! Owned frame representations for the send path. Frames queued for
//! (re)transmission must outlive the packet they were first sent in, so
//! unlike a zero-copy parser these carry their data as `Bytes`.
//!
//! ## Frame Classification:
//! - **ACK-eliciting**: STREAM, CRYPTO, PING, DATAGRAM, etc.
//! - **Non-ACK-eliciting**: ACK, CONNECTION_CLOSE, PADDING

use bytes::Bytes;
use tinyvec::TinyVec;

use crate::types::{PacketNumber, VarInt};

/// Frame Type Constants (RFC 9000 Section 19)
pub const FRAME_TYPE_PADDING: u8 = 0x00;
pub const FRAME_TYPE_PING: u8 = 0x01;
pub const FRAME_TYPE_ACK: u8 = 0x02;
pub const FRAME_TYPE_ACK_ECN: u8 = 0x03;
pub const FRAME_TYPE_CRYPTO: u8 = 0x06;
pub const FRAME_TYPE_NEW_TOKEN: u8 = 0x07;
pub const FRAME_TYPE_STREAM_BASE: u8 = 0x08; // 0x08-0x0f
pub const FRAME_TYPE_MAX_DATA: u8 = 0x10;
pub const FRAME_TYPE_MAX_STREAM_DATA: u8 = 0x11;
pub const FRAME_TYPE_MAX_STREAMS_BIDI: u8 = 0x12;
pub const FRAME_TYPE_MAX_STREAMS_UNI: u8 = 0x13;
pub const FRAME_TYPE_DATA_BLOCKED: u8 = 0x14;
pub const FRAME_TYPE_CONNECTION_CLOSE_QUIC: u8 = 0x1c;
pub const FRAME_TYPE_CONNECTION_CLOSE_APP: u8 = 0x1d;
pub const FRAME_TYPE_HANDSHAKE_DONE: u8 = 0x1e;

/// DATAGRAM frame with a length field (RFC 9221 Section 4)
pub const FRAME_TYPE_DATAGRAM: u8 = 0x31;

/// STREAM Frame Flag Bits (RFC 9000 Section 19.8)
pub const STREAM_FRAME_BIT_FIN: u8 = 0x01;
pub const STREAM_FRAME_BIT_LEN: u8 = 0x02;
pub const STREAM_FRAME_BIT_OFF: u8 = 0x04;

/// ACK Frame (RFC 9000 Section 19.3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame {
    /// Largest packet number being acknowledged
    pub largest_acked: PacketNumber,

    /// Encoded ACK delay (already scaled by the ack_delay_exponent)
    pub ack_delay: VarInt,

    /// Number of contiguous packets preceding largest_acked
    pub first_range: VarInt,

    /// Additional ACK Ranges (Gap, Range pairs), furthest from
    /// largest_acked last
    pub ranges: TinyVec<[AckRange; 8]>,

    /// ECN counts (present only in ACK_ECN frames)
    pub ecn_counts: Option<EcnCounts>,
}

impl AckFrame {
    /// An ACK covering only the single packet `largest_acked`
    pub fn single(largest_acked: PacketNumber) -> Self {
        Self {
            largest_acked,
            ack_delay: 0,
            first_range: 0,
            ranges: TinyVec::default(),
            ecn_counts: None,
        }
    }
}

/// ACK Range (RFC 9000 Section 19.3.1)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckRange {
    /// Gap before this range (packet numbers NOT acknowledged)
    pub gap: VarInt,

    /// Length of this range (packet numbers acknowledged)
    pub length: VarInt,
}

/// ECN Counts (RFC 9000 Section 19.3.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcnCounts {
    pub ect0_count: VarInt,
    pub ect1_count: VarInt,
    pub ce_count: VarInt,
}

/// CRYPTO Frame (RFC 9000 Section 19.6)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoFrame {
    /// Byte offset in the crypto stream
    pub offset: VarInt,

    /// Handshake data
    pub data: Bytes,
}

/// STREAM Frame (RFC 9000 Section 19.8)
///
/// The length field is always written so that a frame's wire size does not
/// depend on its position in the packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    /// Stream ID
    pub stream_id: VarInt,

    /// Byte offset in the stream
    pub offset: VarInt,

    /// Stream data
    pub data: Bytes,

    /// FIN bit: final frame of the stream
    pub fin: bool,
}

/// DATAGRAM Frame (RFC 9221 Section 4)
///
/// Unreliable application data. Never retransmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatagramFrame {
    pub data: Bytes,
}

/// CONNECTION_CLOSE Frame (RFC 9000 Section 19.19)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCloseFrame {
    /// Error code
    pub error_code: VarInt,

    /// Frame type that triggered the close (transport close only)
    pub frame_type: Option<VarInt>,

    /// Human-readable reason (UTF-8)
    pub reason: Bytes,

    /// True for an application-level close (0x1d), false for a
    /// transport-level close (0x1c)
    pub application_close: bool,
}

/// Outbound Frame (RFC 9000 Section 19)
///
/// The subset of frame types the send path emits. PADDING is not a frame
/// here; padding is written directly by the packet assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// PING frame (0x01)
    Ping,

    /// ACK frame (0x02 or 0x03)
    Ack(AckFrame),

    /// CRYPTO frame (0x06)
    Crypto(CryptoFrame),

    /// NEW_TOKEN frame (0x07)
    NewToken { token: Bytes },

    /// STREAM frame (0x08-0x0f)
    Stream(StreamFrame),

    /// MAX_DATA frame (0x10)
    MaxData { maximum: VarInt },

    /// MAX_STREAM_DATA frame (0x11)
    MaxStreamData { stream_id: VarInt, maximum: VarInt },

    /// MAX_STREAMS frame (0x12 or 0x13)
    MaxStreams { bidirectional: bool, maximum: VarInt },

    /// DATA_BLOCKED frame (0x14)
    DataBlocked { limit: VarInt },

    /// CONNECTION_CLOSE frame (0x1c or 0x1d)
    ConnectionClose(ConnectionCloseFrame),

    /// HANDSHAKE_DONE frame (0x1e)
    HandshakeDone,

    /// DATAGRAM frame (0x31)
    Datagram(DatagramFrame),
}

impl Frame {
    /// Returns true if this frame is ACK-eliciting (RFC 9000 Section 13.2)
    ///
    /// ACK and CONNECTION_CLOSE do not elicit acknowledgements.
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(self, Frame::Ack(_) | Frame::ConnectionClose(_))
    }
}
