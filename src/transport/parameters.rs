//! Peer transport parameters (RFC 9000 Section 18).
//!
//! The send path digests the peer's `max_udp_payload_size`; the rest of
//! the record is carried for the connection machinery that hands it over.
//! Only decoding is implemented here; encoding our own parameters belongs
//! to the handshake layer.

use anyhow::{anyhow, Result};

use crate::types::{ConnectionId, VarIntCodec};

#[derive(Debug, Clone, PartialEq)]
pub struct TransportParameters {
    pub original_destination_connection_id: Option<ConnectionId>,
    pub max_idle_timeout: u64, // milliseconds
    pub stateless_reset_token: Option<[u8; 16]>,
    pub max_udp_payload_size: u64,
    pub initial_max_data: u64,
    pub initial_max_stream_data_bidi_local: u64,
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_stream_data_uni: u64,
    pub initial_max_streams_bidi: u64,
    pub initial_max_streams_uni: u64,
    pub ack_delay_exponent: u64,
    pub max_ack_delay: u64, // milliseconds
    pub disable_active_migration: bool,
    pub active_connection_id_limit: u64,
    pub initial_source_connection_id: Option<ConnectionId>,
    pub retry_source_connection_id: Option<ConnectionId>,
    pub max_datagram_frame_size: u64,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            original_destination_connection_id: None,
            max_idle_timeout: 0,
            stateless_reset_token: None,
            // 0 means the peer did not constrain the UDP payload size
            max_udp_payload_size: 0,
            initial_max_data: 0,
            initial_max_stream_data_bidi_local: 0,
            initial_max_stream_data_bidi_remote: 0,
            initial_max_stream_data_uni: 0,
            initial_max_streams_bidi: 0,
            initial_max_streams_uni: 0,
            ack_delay_exponent: 3,
            max_ack_delay: 25,
            disable_active_migration: false,
            active_connection_id_limit: 2,
            initial_source_connection_id: None,
            retry_source_connection_id: None,
            max_datagram_frame_size: 0,
        }
    }
}

impl TransportParameters {
    /// Decode the parameter list from its TLV encoding.
    ///
    /// Unknown parameter IDs are skipped, as required by RFC 9000
    /// Section 7.4.2.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut params = Self::default();
        let mut pos = 0usize;

        while pos < data.len() {
            let (id, consumed) =
                VarIntCodec::decode(&data[pos..]).ok_or_else(|| anyhow!("truncated parameter id"))?;
            pos += consumed;
            let (len, consumed) = VarIntCodec::decode(&data[pos..])
                .ok_or_else(|| anyhow!("truncated parameter length"))?;
            pos += consumed;
            let len = len as usize;
            if data.len() - pos < len {
                return Err(anyhow!("parameter value exceeds buffer"));
            }
            let value = &data[pos..pos + len];
            pos += len;

            match id {
                0x00 => {
                    params.original_destination_connection_id = Some(
                        ConnectionId::from_slice(value).ok_or_else(|| anyhow!("invalid CID"))?,
                    )
                }
                0x01 => params.max_idle_timeout = decode_varint_value(value)?,
                0x02 => {
                    if value.len() != 16 {
                        return Err(anyhow!("invalid stateless reset token length"));
                    }
                    let mut token = [0u8; 16];
                    token.copy_from_slice(value);
                    params.stateless_reset_token = Some(token);
                }
                0x03 => params.max_udp_payload_size = decode_varint_value(value)?,
                0x04 => params.initial_max_data = decode_varint_value(value)?,
                0x05 => params.initial_max_stream_data_bidi_local = decode_varint_value(value)?,
                0x06 => params.initial_max_stream_data_bidi_remote = decode_varint_value(value)?,
                0x07 => params.initial_max_stream_data_uni = decode_varint_value(value)?,
                0x08 => params.initial_max_streams_bidi = decode_varint_value(value)?,
                0x09 => params.initial_max_streams_uni = decode_varint_value(value)?,
                0x0a => params.ack_delay_exponent = decode_varint_value(value)?,
                0x0b => params.max_ack_delay = decode_varint_value(value)?,
                0x0c => params.disable_active_migration = true,
                0x0e => params.active_connection_id_limit = decode_varint_value(value)?,
                0x0f => {
                    params.initial_source_connection_id = Some(
                        ConnectionId::from_slice(value).ok_or_else(|| anyhow!("invalid CID"))?,
                    )
                }
                0x10 => {
                    params.retry_source_connection_id = Some(
                        ConnectionId::from_slice(value).ok_or_else(|| anyhow!("invalid CID"))?,
                    )
                }
                0x20 => params.max_datagram_frame_size = decode_varint_value(value)?,
                _ => {
                    // Ignore unknown parameters
                }
            }
        }

        Ok(params)
    }

    /// Validate transport parameters per RFC 9000 Section 18.2
    pub fn validate(&self) -> Result<()> {
        if self.ack_delay_exponent > 20 {
            return Err(anyhow!(
                "ack_delay_exponent must be <= 20, got {}",
                self.ack_delay_exponent
            ));
        }

        if self.max_ack_delay >= (1 << 14) {
            return Err(anyhow!(
                "max_ack_delay must be < 2^14 ms, got {}",
                self.max_ack_delay
            ));
        }

        if self.active_connection_id_limit < 2 {
            return Err(anyhow!(
                "active_connection_id_limit must be >= 2, got {}",
                self.active_connection_id_limit
            ));
        }

        if self.max_udp_payload_size != 0 && self.max_udp_payload_size < 1200 {
            return Err(anyhow!(
                "max_udp_payload_size must be >= 1200, got {}",
                self.max_udp_payload_size
            ));
        }

        Ok(())
    }
}

fn decode_varint_value(value: &[u8]) -> Result<u64> {
    let (v, consumed) =
        VarIntCodec::decode(value).ok_or_else(|| anyhow!("truncated varint value"))?;
    if consumed != value.len() {
        return Err(anyhow!("trailing bytes after varint value"));
    }
    Ok(v)
}
