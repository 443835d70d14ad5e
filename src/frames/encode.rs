//! Frame serialization (RFC 9000 Section 19).
//!
//! `wire_len` and `append` must agree to the byte: the packet assembler
//! budgets with `wire_len` and verifies the serialized size afterwards.

use bytes::BufMut;

use super::types::*;
use crate::types::VarIntCodec;

impl AckFrame {
    pub fn wire_len(&self) -> usize {
        let mut len = 1
            + VarIntCodec::size(self.largest_acked)
            + VarIntCodec::size(self.ack_delay)
            + VarIntCodec::size(self.ranges.len() as u64)
            + VarIntCodec::size(self.first_range);
        for range in &self.ranges {
            len += VarIntCodec::size(range.gap) + VarIntCodec::size(range.length);
        }
        if let Some(ecn) = &self.ecn_counts {
            len += VarIntCodec::size(ecn.ect0_count)
                + VarIntCodec::size(ecn.ect1_count)
                + VarIntCodec::size(ecn.ce_count);
        }
        len
    }

    pub fn append<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(if self.ecn_counts.is_some() {
            FRAME_TYPE_ACK_ECN
        } else {
            FRAME_TYPE_ACK
        });
        VarIntCodec::put(self.largest_acked, buf);
        VarIntCodec::put(self.ack_delay, buf);
        VarIntCodec::put(self.ranges.len() as u64, buf);
        VarIntCodec::put(self.first_range, buf);
        for range in &self.ranges {
            VarIntCodec::put(range.gap, buf);
            VarIntCodec::put(range.length, buf);
        }
        if let Some(ecn) = &self.ecn_counts {
            VarIntCodec::put(ecn.ect0_count, buf);
            VarIntCodec::put(ecn.ect1_count, buf);
            VarIntCodec::put(ecn.ce_count, buf);
        }
    }
}

impl Frame {
    /// Serialized size of the frame in bytes
    pub fn wire_len(&self) -> usize {
        match self {
            Frame::Ping => 1,
            Frame::Ack(ack) => ack.wire_len(),
            Frame::Crypto(f) => {
                1 + VarIntCodec::size(f.offset)
                    + VarIntCodec::size(f.data.len() as u64)
                    + f.data.len()
            }
            Frame::NewToken { token } => {
                1 + VarIntCodec::size(token.len() as u64) + token.len()
            }
            Frame::Stream(f) => {
                let mut len = 1 + VarIntCodec::size(f.stream_id);
                if f.offset > 0 {
                    len += VarIntCodec::size(f.offset);
                }
                len + VarIntCodec::size(f.data.len() as u64) + f.data.len()
            }
            Frame::MaxData { maximum } => 1 + VarIntCodec::size(*maximum),
            Frame::MaxStreamData { stream_id, maximum } => {
                1 + VarIntCodec::size(*stream_id) + VarIntCodec::size(*maximum)
            }
            Frame::MaxStreams { maximum, .. } => 1 + VarIntCodec::size(*maximum),
            Frame::DataBlocked { limit } => 1 + VarIntCodec::size(*limit),
            Frame::ConnectionClose(f) => {
                let mut len = 1 + VarIntCodec::size(f.error_code);
                if !f.application_close {
                    len += VarIntCodec::size(f.frame_type.unwrap_or(0));
                }
                len + VarIntCodec::size(f.reason.len() as u64) + f.reason.len()
            }
            Frame::HandshakeDone => 1,
            Frame::Datagram(f) => {
                1 + VarIntCodec::size(f.data.len() as u64) + f.data.len()
            }
        }
    }

    /// Serialize the frame
    pub fn append<B: BufMut>(&self, buf: &mut B) {
        match self {
            Frame::Ping => buf.put_u8(FRAME_TYPE_PING),
            Frame::Ack(ack) => ack.append(buf),
            Frame::Crypto(f) => {
                buf.put_u8(FRAME_TYPE_CRYPTO);
                VarIntCodec::put(f.offset, buf);
                VarIntCodec::put(f.data.len() as u64, buf);
                buf.put_slice(&f.data);
            }
            Frame::NewToken { token } => {
                buf.put_u8(FRAME_TYPE_NEW_TOKEN);
                VarIntCodec::put(token.len() as u64, buf);
                buf.put_slice(token);
            }
            Frame::Stream(f) => {
                let mut frame_type = FRAME_TYPE_STREAM_BASE | STREAM_FRAME_BIT_LEN;
                if f.offset > 0 {
                    frame_type |= STREAM_FRAME_BIT_OFF;
                }
                if f.fin {
                    frame_type |= STREAM_FRAME_BIT_FIN;
                }
                buf.put_u8(frame_type);
                VarIntCodec::put(f.stream_id, buf);
                if f.offset > 0 {
                    VarIntCodec::put(f.offset, buf);
                }
                VarIntCodec::put(f.data.len() as u64, buf);
                buf.put_slice(&f.data);
            }
            Frame::MaxData { maximum } => {
                buf.put_u8(FRAME_TYPE_MAX_DATA);
                VarIntCodec::put(*maximum, buf);
            }
            Frame::MaxStreamData { stream_id, maximum } => {
                buf.put_u8(FRAME_TYPE_MAX_STREAM_DATA);
                VarIntCodec::put(*stream_id, buf);
                VarIntCodec::put(*maximum, buf);
            }
            Frame::MaxStreams {
                bidirectional,
                maximum,
            } => {
                buf.put_u8(if *bidirectional {
                    FRAME_TYPE_MAX_STREAMS_BIDI
                } else {
                    FRAME_TYPE_MAX_STREAMS_UNI
                });
                VarIntCodec::put(*maximum, buf);
            }
            Frame::DataBlocked { limit } => {
                buf.put_u8(FRAME_TYPE_DATA_BLOCKED);
                VarIntCodec::put(*limit, buf);
            }
            Frame::ConnectionClose(f) => {
                if f.application_close {
                    buf.put_u8(FRAME_TYPE_CONNECTION_CLOSE_APP);
                    VarIntCodec::put(f.error_code, buf);
                } else {
                    buf.put_u8(FRAME_TYPE_CONNECTION_CLOSE_QUIC);
                    VarIntCodec::put(f.error_code, buf);
                    VarIntCodec::put(f.frame_type.unwrap_or(0), buf);
                }
                VarIntCodec::put(f.reason.len() as u64, buf);
                buf.put_slice(&f.reason);
            }
            Frame::HandshakeDone => buf.put_u8(FRAME_TYPE_HANDSHAKE_DONE),
            Frame::Datagram(f) => {
                buf.put_u8(FRAME_TYPE_DATAGRAM);
                VarIntCodec::put(f.data.len() as u64, buf);
                buf.put_slice(&f.data);
            }
        }
    }
}
