//! # Packet Number Encoding (RFC 9000 Section 12.3, Appendix A.2)
//!
//! Packet numbers are written truncated to 1-4 bytes, big-endian. The
//! length is chosen from the distance to the largest acknowledged packet
//! number so the peer can reconstruct the full 62-bit value.

use bytes::BufMut;

use crate::types::PacketNumber;

/// How many bytes the packet number occupies on the wire.
///
/// The packet number field is 1-4 bytes; every packet advertises its width
/// in the two low bits of the first header byte, which hold `len - 1`
/// and are masked by header protection along with the field itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketNumberLen {
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
}

impl PacketNumberLen {
    /// The `len - 1` value [`ExtendedHeader`] ORs into the two low bits of
    /// the first byte, before header protection is applied.
    ///
    /// [`ExtendedHeader`]: crate::packet::header::ExtendedHeader
    pub fn first_byte_bits(self) -> u8 {
        (self as u8) - 1
    }

    /// Width of the packet number field in bytes
    pub fn len(self) -> usize {
        self as usize
    }

    /// Choose the shortest length that lets the peer reconstruct `full_pn`
    /// given `largest_acked` (RFC 9000 Appendix A.2)
    pub fn for_largest_acked(
        full_pn: PacketNumber,
        largest_acked: Option<PacketNumber>,
    ) -> Self {
        let num_unacked = match largest_acked {
            Some(acked) => full_pn.saturating_sub(acked),
            None => full_pn + 1,
        };

        if num_unacked < (1u64 << 7) {
            PacketNumberLen::One
        } else if num_unacked < (1u64 << 15) {
            PacketNumberLen::Two
        } else if num_unacked < (1u64 << 23) {
            PacketNumberLen::Three
        } else {
            PacketNumberLen::Four
        }
    }

    /// Append the truncated big-endian packet number
    pub fn encode<B: BufMut>(self, full_pn: PacketNumber, buf: &mut B) {
        match self {
            PacketNumberLen::One => buf.put_u8(full_pn as u8),
            PacketNumberLen::Two => buf.put_u16(full_pn as u16),
            PacketNumberLen::Three => {
                buf.put_u8((full_pn >> 16) as u8);
                buf.put_u16(full_pn as u16);
            }
            PacketNumberLen::Four => buf.put_u32(full_pn as u32),
        }
    }
}
