//! # Extended Packet Headers (RFC 9000 Section 17)
//!
//! Outbound header construction. An extended header is a long or short
//! header together with its packet number; serialization happens before
//! header protection, so reserved bits are written as zero and the real
//! first-byte low bits are masked later by the sealer driver.

use bytes::{BufMut, Bytes};

use crate::packet::number::PacketNumberLen;
use crate::types::{ConnectionId, PacketNumber, VarIntCodec, Version};

/// Outbound packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Initial packet (long header, type 0x00)
    Initial,
    /// 0-RTT packet (long header, type 0x01)
    ZeroRtt,
    /// Handshake packet (long header, type 0x02)
    Handshake,
    /// 1-RTT packet (short header)
    Short,
}

/// Extended Header
///
/// Identifies one outbound packet: header form, connection IDs, token
/// (Initial only), length field and packet number. The length field covers
/// packet number + payload + AEAD overhead and is filled in by the packet
/// assembler once the payload size is final.
#[derive(Debug, Clone)]
pub struct ExtendedHeader {
    pub packet_type: PacketType,

    /// QUIC version (long headers only)
    pub version: Version,

    /// Destination Connection ID
    pub dcid: ConnectionId,

    /// Source Connection ID (long headers only)
    pub scid: Option<ConnectionId>,

    /// Retry token (Initial packets only; may be empty)
    pub token: Option<Bytes>,

    /// Length field value (long headers only)
    pub length: u64,

    /// Full packet number; written truncated to `pn_len` bytes
    pub packet_number: PacketNumber,

    /// Encoded packet number length
    pub pn_len: PacketNumberLen,

    /// Key phase bit (short headers only)
    pub key_phase: bool,
}

impl ExtendedHeader {
    /// Build a short (1-RTT) header
    pub fn short(
        dcid: ConnectionId,
        packet_number: PacketNumber,
        pn_len: PacketNumberLen,
        key_phase: bool,
    ) -> Self {
        Self {
            packet_type: PacketType::Short,
            version: 0,
            dcid,
            scid: None,
            token: None,
            length: 0,
            packet_number,
            pn_len,
            key_phase,
        }
    }

    pub fn is_long_header(&self) -> bool {
        self.packet_type != PacketType::Short
    }

    /// Serialize the header, including the truncated packet number.
    ///
    /// The long-header length field is always written as a 2-byte varint so
    /// that `wire_len` is stable before the payload size is known.
    pub fn write<B: BufMut>(&self, buf: &mut B) {
        if self.is_long_header() {
            let type_bits = match self.packet_type {
                PacketType::Initial => 0x00,
                PacketType::ZeroRtt => 0x10,
                PacketType::Handshake => 0x20,
                PacketType::Short => unreachable!(),
            };
            buf.put_u8(0x80 | 0x40 | type_bits | self.pn_len.first_byte_bits());
            buf.put_u32(self.version);

            buf.put_u8(self.dcid.len() as u8);
            buf.put_slice(self.dcid.as_bytes());
            let scid = self.scid.as_ref().expect("long header without SCID");
            buf.put_u8(scid.len() as u8);
            buf.put_slice(scid.as_bytes());

            if self.packet_type == PacketType::Initial {
                let token = self.token.as_deref().unwrap_or(&[]);
                VarIntCodec::put(token.len() as u64, buf);
                buf.put_slice(token);
            }

            buf.put_u16((self.length as u16) | 0x4000);
        } else {
            let mut first = 0x40 | self.pn_len.first_byte_bits();
            if self.key_phase {
                first |= 0x04;
            }
            buf.put_u8(first);
            buf.put_slice(self.dcid.as_bytes());
        }
        self.pn_len.encode(self.packet_number, buf);
    }

    /// Serialized header length in bytes
    pub fn wire_len(&self) -> usize {
        if self.is_long_header() {
            let mut len = 1 + 4;
            len += 1 + self.dcid.len();
            len += 1 + self.scid.as_ref().map(|c| c.len()).unwrap_or(0);
            if self.packet_type == PacketType::Initial {
                let token_len = self.token.as_ref().map(|t| t.len()).unwrap_or(0);
                len += VarIntCodec::size(token_len as u64) + token_len;
            }
            len += 2; // length field
            len + self.pn_len.len()
        } else {
            1 + self.dcid.len() + self.pn_len.len()
        }
    }
}
