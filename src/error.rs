//! Error types for packet assembly.

use thiserror::Error;

use crate::crypto::SealerError;

/// QUIC transport error codes per RFC 9000 Section 20.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorCode {
    /// No error (0x00).
    #[error("no error")]
    NoError,

    /// Internal error (0x01).
    #[error("internal error")]
    InternalError,

    /// Connection refused (0x02).
    #[error("connection refused")]
    ConnectionRefused,

    /// Flow control error (0x03).
    #[error("flow control error")]
    FlowControlError,

    /// Stream limit error (0x04).
    #[error("stream limit error")]
    StreamLimitError,

    /// Stream state error (0x05).
    #[error("stream state error")]
    StreamStateError,

    /// Final size error (0x06).
    #[error("final size error")]
    FinalSizeError,

    /// Frame encoding error (0x07).
    #[error("frame encoding error")]
    FrameEncodingError,

    /// Transport parameter error (0x08).
    #[error("transport parameter error")]
    TransportParameterError,

    /// Connection ID limit error (0x09).
    #[error("connection ID limit error")]
    ConnectionIdLimitError,

    /// Protocol violation (0x0A).
    #[error("protocol violation")]
    ProtocolViolation,

    /// Invalid token (0x0B).
    #[error("invalid token")]
    InvalidToken,

    /// Application error (0x0C).
    #[error("application error")]
    ApplicationError,

    /// Crypto buffer exceeded (0x0D).
    #[error("crypto buffer exceeded")]
    CryptoBufferExceeded,

    /// Key update error (0x0E).
    #[error("key update error")]
    KeyUpdateError,

    /// AEAD limit reached (0x0F).
    #[error("AEAD limit reached")]
    AeadLimitReached,

    /// No viable path (0x10).
    #[error("no viable path")]
    NoViablePath,

    /// Crypto error carrying a TLS alert (0x0100-0x01FF).
    #[error("crypto error: {0:#x}")]
    Crypto(u16),
}

impl TransportErrorCode {
    /// Convert error code to wire format.
    pub fn to_wire(&self) -> u64 {
        match self {
            TransportErrorCode::NoError => 0x00,
            TransportErrorCode::InternalError => 0x01,
            TransportErrorCode::ConnectionRefused => 0x02,
            TransportErrorCode::FlowControlError => 0x03,
            TransportErrorCode::StreamLimitError => 0x04,
            TransportErrorCode::StreamStateError => 0x05,
            TransportErrorCode::FinalSizeError => 0x06,
            TransportErrorCode::FrameEncodingError => 0x07,
            TransportErrorCode::TransportParameterError => 0x08,
            TransportErrorCode::ConnectionIdLimitError => 0x09,
            TransportErrorCode::ProtocolViolation => 0x0A,
            TransportErrorCode::InvalidToken => 0x0B,
            TransportErrorCode::ApplicationError => 0x0C,
            TransportErrorCode::CryptoBufferExceeded => 0x0D,
            TransportErrorCode::KeyUpdateError => 0x0E,
            TransportErrorCode::AeadLimitReached => 0x0F,
            TransportErrorCode::NoViablePath => 0x10,
            TransportErrorCode::Crypto(code) => 0x0100 + (*code as u64),
        }
    }

    /// Convert wire format error code to error.
    pub fn from_wire(code: u64) -> Self {
        match code {
            0x00 => TransportErrorCode::NoError,
            0x01 => TransportErrorCode::InternalError,
            0x02 => TransportErrorCode::ConnectionRefused,
            0x03 => TransportErrorCode::FlowControlError,
            0x04 => TransportErrorCode::StreamLimitError,
            0x05 => TransportErrorCode::StreamStateError,
            0x06 => TransportErrorCode::FinalSizeError,
            0x07 => TransportErrorCode::FrameEncodingError,
            0x08 => TransportErrorCode::TransportParameterError,
            0x09 => TransportErrorCode::ConnectionIdLimitError,
            0x0A => TransportErrorCode::ProtocolViolation,
            0x0B => TransportErrorCode::InvalidToken,
            0x0C => TransportErrorCode::ApplicationError,
            0x0D => TransportErrorCode::CryptoBufferExceeded,
            0x0E => TransportErrorCode::KeyUpdateError,
            0x0F => TransportErrorCode::AeadLimitReached,
            0x10 => TransportErrorCode::NoViablePath,
            0x0100..=0x01FF => TransportErrorCode::Crypto(((code - 0x0100) & 0xFF) as u16),
            _ => TransportErrorCode::InternalError,
        }
    }

    /// Returns true if this code lies in the crypto error range
    /// (0x0100-0x01FF). Reason phrases for crypto errors are never put on
    /// the wire so that handshake details do not leak.
    pub fn is_crypto_error(&self) -> bool {
        matches!(self, TransportErrorCode::Crypto(_))
    }
}

/// A transport-level connection error (RFC 9000 Section 10.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// Error code sent in the CONNECTION_CLOSE frame.
    pub code: TransportErrorCode,

    /// Frame type that triggered the error, if any.
    pub frame_type: Option<u64>,

    /// Human-readable reason phrase.
    pub reason: String,
}

impl TransportError {
    pub fn new(code: TransportErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            frame_type: None,
            reason: reason.into(),
        }
    }
}

/// An application-level connection error (RFC 9000 Section 10.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationError {
    /// Application-defined error code.
    pub code: u64,

    /// Human-readable reason phrase.
    pub reason: String,
}

impl ApplicationError {
    pub fn new(code: u64, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the packet packer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PackError {
    /// The composer yielded no frames, no ACK and no datagram.
    #[error("nothing to pack")]
    NothingToPack,

    /// A sealer could not be acquired.
    #[error(transparent)]
    Sealer(#[from] SealerError),

    /// Internal consistency violation. These are not recoverable; the
    /// connection must be torn down.
    #[error("packet packer BUG: {0}")]
    Bug(String),
}

pub type Result<T> = core::result::Result<T, PackError>;
