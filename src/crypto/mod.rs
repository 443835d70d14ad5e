//! # Sealing Interface (RFC 9001 Section 5)
//!
//! Trait seams for the cryptographic side of packet assembly. Key
//! derivation and the TLS handshake live elsewhere; the packer only needs
//! a per-level sealer that performs AEAD protection and yields the header
//! protection mask.

use std::sync::Arc;

use thiserror::Error;

use crate::types::PacketNumber;

/// AEAD authentication tag length. All cipher suites usable with QUIC v1
/// (RFC 9001 Section 5.3) produce a 16-byte tag.
pub const AEAD_TAG_LEN: usize = 16;

/// Header protection sample length (RFC 9001 Section 5.4.2)
pub const HEADER_PROTECTION_SAMPLE_LEN: usize = 16;

/// Errors reported when acquiring a sealer for an encryption level.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SealerError {
    /// The keys for this level have not been derived yet.
    #[error("keys not yet available")]
    KeysNotYetAvailable,

    /// The keys for this level have already been dropped.
    #[error("keys dropped")]
    KeysDropped,

    /// Any other failure of the crypto backend.
    #[error("sealer failure: {0}")]
    Backend(String),
}

/// Packet Sealer (RFC 9001 Sections 5.3, 5.4)
///
/// One sealer exists per encryption level. It applies AEAD protection to a
/// serialized packet and derives the header protection mask from a sample
/// of the ciphertext.
pub trait PacketSealer: Send + Sync {
    /// AEAD-seal `payload` in place, using `header` as associated data and
    /// the packet number as nonce input, and return the authentication tag.
    /// The caller appends the tag after the ciphertext.
    fn seal_in_place(
        &self,
        packet_number: PacketNumber,
        header: &[u8],
        payload: &mut [u8],
    ) -> [u8; AEAD_TAG_LEN];

    /// Derive the header protection mask from a ciphertext sample.
    ///
    /// Byte 0 masks the low bits of the packet's first byte; bytes 1-4 mask
    /// the packet number field.
    fn header_protection_mask(&self, sample: &[u8; HEADER_PROTECTION_SAMPLE_LEN]) -> [u8; 5];

    /// Bytes the seal operation adds to the payload.
    fn overhead(&self) -> usize {
        AEAD_TAG_LEN
    }

    /// Current key phase bit (RFC 9001 Section 6). Only meaningful for
    /// 1-RTT sealers; long-header levels have no key phase.
    fn key_phase(&self) -> bool {
        false
    }
}

/// Sealing Manager
///
/// Yields the current sealer for each encryption level. Implemented by the
/// crypto setup that tracks handshake progression and key schedules.
pub trait SealingManager {
    fn initial_sealer(&self) -> Result<Arc<dyn PacketSealer>, SealerError>;
    fn handshake_sealer(&self) -> Result<Arc<dyn PacketSealer>, SealerError>;
    fn zero_rtt_sealer(&self) -> Result<Arc<dyn PacketSealer>, SealerError>;
    fn one_rtt_sealer(&self) -> Result<Arc<dyn PacketSealer>, SealerError>;
}
