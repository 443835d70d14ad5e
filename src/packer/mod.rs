//! # Packet Packer (RFC 9000 Sections 12, 14, 17)
//!
//! Assembles outgoing datagrams from queued connection state: handshake
//! data, stream data, control frames, ACKs, retransmissions, datagrams and
//! close frames. Allocates packet numbers, drives the per-level sealers,
//! applies the padding rules and hands every committed packet to loss
//! detection as a [`SentPacket`] record.
//!
//! One call per send opportunity: [`PacketPacker::pack_coalesced_packet`]
//! before the handshake is confirmed, [`PacketPacker::pack_packet`] after.

mod traits;


pub use traits::{
    AckFrameSource, CryptoStream, DatagramQueue, FrameSource, PacketNumberManager,
    RetransmissionQueue,
};

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::buffer::PacketBuffer;
use crate::crypto::{PacketSealer, SealerError, SealingManager, HEADER_PROTECTION_SAMPLE_LEN};
use crate::error::{
    ApplicationError, PackError, Result, TransportError, TransportErrorCode,
};
use crate::frames::{AckFrame, ConnectionCloseFrame, Frame};
use crate::packet::header::{ExtendedHeader, PacketType};
use crate::packet::number::PacketNumberLen;
use crate::recovery::{has_ack_eliciting_frames, FrameSpace, OnLost, SentFrame, SentPacket};
use crate::transport::TransportParameters;
use crate::types::{
    ConnectionId, EncryptionLevel, Instant, PacketNumber, Side, Version,
    INITIAL_PACKET_SIZE_IPV4, INITIAL_PACKET_SIZE_IPV6, MAX_NON_ACK_ELICITING_ACKS,
    MIN_COALESCED_PACKET_SIZE, MIN_INITIAL_PACKET_SIZE, MIN_STREAM_FRAME_SIZE,
};

/// An assembled payload, immutable once composed.
///
/// `length` is the serialized size of the ACK plus the frames, excluding
/// any padding, and is the source of truth: serialization must agree with
/// it to the byte.
#[derive(Debug, Default)]
pub struct Payload {
    pub ack: Option<AckFrame>,
    pub frames: Vec<SentFrame>,
    pub length: usize,
}

/// A sealed long-header packet inside a coalesced datagram.
#[derive(Debug)]
pub struct LongHeaderPacket {
    pub header: ExtendedHeader,
    pub ack: Option<AckFrame>,
    pub frames: Vec<SentFrame>,

    /// On-wire size including AEAD overhead
    pub length: usize,
}

impl LongHeaderPacket {
    pub fn encryption_level(&self) -> EncryptionLevel {
        match self.header.packet_type {
            PacketType::Initial => EncryptionLevel::Initial,
            PacketType::Handshake => EncryptionLevel::Handshake,
            PacketType::ZeroRtt => EncryptionLevel::ZeroRtt,
            PacketType::Short => unreachable!("1-RTT packets use the short header"),
        }
    }

    pub fn is_ack_eliciting(&self) -> bool {
        has_ack_eliciting_frames(&self.frames)
    }

    /// Build the record handed to the ACK handler. Frames without a
    /// lost-frame disposition get the one for this packet's level.
    pub fn into_sent_packet(self, now: Instant) -> SentPacket {
        let level = self.encryption_level();
        let space = FrameSpace::for_level(level);
        let mut frames = self.frames;
        for frame in &mut frames {
            frame.on_lost.get_or_insert(OnLost::Retransmit(space));
        }
        SentPacket {
            packet_number: self.header.packet_number,
            frames,
            largest_acked: self.ack.as_ref().map(|ack| ack.largest_acked),
            length: self.length,
            encryption_level: level,
            send_time: now,
            is_mtu_probe: false,
        }
    }
}

/// A sealed short-header (1-RTT) packet.
///
/// Carries the finished ACK-handler record plus the fields the connection
/// logs about the packet it just sent.
#[derive(Debug)]
pub struct ShortHeaderPacket {
    pub packet: SentPacket,

    // used for logging
    pub dest_conn_id: ConnectionId,
    pub ack: Option<AckFrame>,
    pub packet_number_len: PacketNumberLen,
    pub key_phase: bool,
}

impl ShortHeaderPacket {
    pub fn is_ack_eliciting(&self) -> bool {
        self.packet.is_ack_eliciting()
    }
}

/// One datagram holding up to one packet per encryption level, in the
/// order Initial, Handshake, 0-RTT / 1-RTT.
#[derive(Debug)]
pub struct CoalescedPacket {
    pub buffer: PacketBuffer,
    pub long_packets: Vec<LongHeaderPacket>,
    pub short_packet: Option<ShortHeaderPacket>,
}

impl CoalescedPacket {
    pub fn is_ack_eliciting(&self) -> bool {
        self.long_packets.iter().any(|p| p.is_ack_eliciting())
            || self
                .short_packet
                .as_ref()
                .map(|p| p.is_ack_eliciting())
                .unwrap_or(false)
    }
}

/// The maximum packet size usable towards a remote address before path MTU
/// discovery has run.
fn max_packet_size_for(addr: SocketAddr) -> usize {
    match addr {
        SocketAddr::V4(_) => INITIAL_PACKET_SIZE_IPV4,
        SocketAddr::V6(_) => INITIAL_PACKET_SIZE_IPV6,
    }
}

/// The packet packer. Passive and single-threaded: every method completes
/// fully before returning, and the connection loop holds the sole
/// reference.
pub struct PacketPacker {
    src_conn_id: ConnectionId,
    get_dest_conn_id: Box<dyn Fn() -> ConnectionId>,

    perspective: Side,
    version: Version,
    crypto_setup: Box<dyn SealingManager>,

    initial_stream: Box<dyn CryptoStream>,
    handshake_stream: Box<dyn CryptoStream>,

    token: Bytes,

    pn_manager: Box<dyn PacketNumberManager>,
    framer: Box<dyn FrameSource>,
    acks: Box<dyn AckFrameSource>,
    datagram_queue: Option<Box<dyn DatagramQueue>>,
    retransmission_queue: Box<dyn RetransmissionQueue>,

    max_packet_size: usize,
    num_non_ack_eliciting_acks: usize,
}

impl PacketPacker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        src_conn_id: ConnectionId,
        get_dest_conn_id: Box<dyn Fn() -> ConnectionId>,
        initial_stream: Box<dyn CryptoStream>,
        handshake_stream: Box<dyn CryptoStream>,
        pn_manager: Box<dyn PacketNumberManager>,
        retransmission_queue: Box<dyn RetransmissionQueue>,
        remote_addr: SocketAddr,
        crypto_setup: Box<dyn SealingManager>,
        framer: Box<dyn FrameSource>,
        acks: Box<dyn AckFrameSource>,
        datagram_queue: Option<Box<dyn DatagramQueue>>,
        perspective: Side,
        version: Version,
    ) -> Self {
        Self {
            src_conn_id,
            get_dest_conn_id,
            perspective,
            version,
            crypto_setup,
            initial_stream,
            handshake_stream,
            token: Bytes::new(),
            pn_manager,
            framer,
            acks,
            datagram_queue,
            retransmission_queue,
            max_packet_size: max_packet_size_for(remote_addr),
            num_non_ack_eliciting_acks: 0,
        }
    }

    /// Pack one coalesced datagram: an Initial and/or Handshake packet if
    /// those packet number spaces have data, plus an application-data
    /// packet if keys and budget allow. Only called before the handshake
    /// is confirmed.
    ///
    /// Returns `Ok(None)` if no level produced a payload.
    pub fn pack_coalesced_packet(
        &mut self,
        only_ack: bool,
        now: Instant,
    ) -> Result<Option<CoalescedPacket>> {
        // Clients must send full-size Initial datagrams.
        let max_packet_size = if self.perspective.is_client() {
            MIN_INITIAL_PACKET_SIZE
        } else {
            self.max_packet_size
        };

        let mut size = 0usize;

        // Try packing an Initial packet.
        let mut initial: Option<(ExtendedHeader, Payload, Arc<dyn PacketSealer>)> = None;
        match self.crypto_setup.initial_sealer() {
            Ok(sealer) => {
                if let Some((hdr, payload)) = self.maybe_get_crypto_packet(
                    max_packet_size.saturating_sub(sealer.overhead()),
                    EncryptionLevel::Initial,
                    only_ack,
                    true,
                ) {
                    size += self.packet_length(&hdr, &payload) + sealer.overhead();
                    initial = Some((hdr, payload, sealer));
                }
            }
            Err(SealerError::KeysNotYetAvailable) | Err(SealerError::KeysDropped) => {}
            Err(err) => return Err(err.into()),
        }

        // Add a Handshake packet.
        let mut handshake: Option<(ExtendedHeader, Payload, Arc<dyn PacketSealer>)> = None;
        if (only_ack && size == 0)
            || (!only_ack && size < max_packet_size.saturating_sub(MIN_COALESCED_PACKET_SIZE))
        {
            match self.crypto_setup.handshake_sealer() {
                Ok(sealer) => {
                    if let Some((hdr, payload)) = self.maybe_get_crypto_packet(
                        max_packet_size
                            .saturating_sub(size)
                            .saturating_sub(sealer.overhead()),
                        EncryptionLevel::Handshake,
                        only_ack,
                        size == 0,
                    ) {
                        size += self.packet_length(&hdr, &payload) + sealer.overhead();
                        handshake = Some((hdr, payload, sealer));
                    }
                }
                Err(SealerError::KeysNotYetAvailable) | Err(SealerError::KeysDropped) => {}
                Err(err) => return Err(err.into()),
            }
        }

        // Add a 0-RTT / 1-RTT packet.
        let mut app_data: Option<(
            ExtendedHeader,
            Payload,
            Arc<dyn PacketSealer>,
            EncryptionLevel,
            bool,
        )> = None;
        if (only_ack && size == 0)
            || (!only_ack && size < max_packet_size.saturating_sub(MIN_COALESCED_PACKET_SIZE))
        {
            let mut app_data_level = EncryptionLevel::OneRtt;
            let sealer = match self.crypto_setup.one_rtt_sealer() {
                Ok(sealer) => Some(sealer),
                Err(SealerError::KeysNotYetAvailable) | Err(SealerError::KeysDropped)
                    if self.perspective.is_client() =>
                {
                    // Fall back to 0-RTT while 1-RTT keys are missing.
                    app_data_level = EncryptionLevel::ZeroRtt;
                    match self.crypto_setup.zero_rtt_sealer() {
                        Ok(sealer) => Some(sealer),
                        Err(SealerError::KeysNotYetAvailable)
                        | Err(SealerError::KeysDropped) => None,
                        Err(err) => return Err(err.into()),
                    }
                }
                Err(SealerError::KeysNotYetAvailable) | Err(SealerError::KeysDropped) => None,
                Err(err) => return Err(err.into()),
            };
            if let Some(sealer) = sealer {
                let key_phase = sealer.key_phase();
                let packed = match app_data_level {
                    EncryptionLevel::ZeroRtt => self.maybe_get_app_data_packet_for_0rtt(
                        sealer.overhead(),
                        max_packet_size.saturating_sub(size),
                    ),
                    EncryptionLevel::OneRtt => self.maybe_get_short_header_packet(
                        key_phase,
                        sealer.overhead(),
                        max_packet_size.saturating_sub(size),
                        only_ack,
                        size == 0,
                    ),
                    _ => unreachable!(),
                };
                if let Some((hdr, payload)) = packed {
                    size += self.packet_length(&hdr, &payload) + sealer.overhead();
                    app_data = Some((hdr, payload, sealer, app_data_level, key_phase));
                }
            }
        }

        if initial.is_none() && handshake.is_none() && app_data.is_none() {
            return Ok(None);
        }

        let mut buffer = PacketBuffer::acquire();
        let mut long_packets = Vec::with_capacity(2);
        let mut short_packet = None;

        if let Some((hdr, payload, sealer)) = initial {
            let padding = self.initial_padding_len(&payload.frames, size);
            long_packets.push(self.append_long_header_packet(
                &mut buffer,
                hdr,
                payload,
                padding,
                EncryptionLevel::Initial,
                sealer.as_ref(),
            )?);
        }
        if let Some((hdr, payload, sealer)) = handshake {
            long_packets.push(self.append_long_header_packet(
                &mut buffer,
                hdr,
                payload,
                0,
                EncryptionLevel::Handshake,
                sealer.as_ref(),
            )?);
        }
        if let Some((hdr, payload, sealer, level, key_phase)) = app_data {
            if level == EncryptionLevel::ZeroRtt {
                long_packets.push(self.append_long_header_packet(
                    &mut buffer,
                    hdr,
                    payload,
                    0,
                    level,
                    sealer.as_ref(),
                )?);
            } else {
                short_packet = Some(self.append_short_header_packet(
                    &mut buffer,
                    hdr.packet_number,
                    hdr.pn_len,
                    key_phase,
                    payload,
                    0,
                    sealer.as_ref(),
                    false,
                    now,
                )?);
            }
        }

        trace!(
            packets = long_packets.len() + usize::from(short_packet.is_some()),
            bytes = buffer.len(),
            "packed coalesced datagram"
        );
        Ok(Some(CoalescedPacket {
            buffer,
            long_packets,
            short_packet,
        }))
    }

    /// Pack a single 1-RTT packet. Only called after the handshake is
    /// confirmed.
    pub fn pack_packet(
        &mut self,
        only_ack: bool,
        now: Instant,
    ) -> Result<(ShortHeaderPacket, PacketBuffer)> {
        let sealer = self.crypto_setup.one_rtt_sealer()?;
        let key_phase = sealer.key_phase();
        let Some((hdr, payload)) = self.maybe_get_short_header_packet(
            key_phase,
            sealer.overhead(),
            self.max_packet_size,
            only_ack,
            true,
        ) else {
            return Err(PackError::NothingToPack);
        };
        let mut buffer = PacketBuffer::acquire();
        let packet = self.append_short_header_packet(
            &mut buffer,
            hdr.packet_number,
            hdr.pn_len,
            key_phase,
            payload,
            0,
            sealer.as_ref(),
            false,
            now,
        )?;
        Ok((packet, buffer))
    }

    /// Pack a probe packet for the given level in response to a PTO.
    /// Never called for 0-RTT.
    pub fn maybe_pack_probe_packet(
        &mut self,
        level: EncryptionLevel,
        now: Instant,
    ) -> Result<Option<CoalescedPacket>> {
        let mut key_phase = false;
        let (sealer, packed) = match level {
            EncryptionLevel::Initial => {
                let sealer = self.crypto_setup.initial_sealer()?;
                let packed = self.maybe_get_crypto_packet(
                    self.max_packet_size.saturating_sub(sealer.overhead()),
                    EncryptionLevel::Initial,
                    false,
                    true,
                );
                (sealer, packed)
            }
            EncryptionLevel::Handshake => {
                let sealer = self.crypto_setup.handshake_sealer()?;
                let packed = self.maybe_get_crypto_packet(
                    self.max_packet_size.saturating_sub(sealer.overhead()),
                    EncryptionLevel::Handshake,
                    false,
                    true,
                );
                (sealer, packed)
            }
            EncryptionLevel::OneRtt => {
                let sealer = self.crypto_setup.one_rtt_sealer()?;
                key_phase = sealer.key_phase();
                let hdr = self.get_short_header(key_phase);
                let max_payload = self
                    .max_packet_size
                    .saturating_sub(sealer.overhead())
                    .saturating_sub(hdr.wire_len());
                let packed = self
                    .maybe_get_app_data_packet(max_payload, false, true)
                    .map(|payload| (hdr, payload));
                (sealer, packed)
            }
            EncryptionLevel::ZeroRtt => {
                panic!("probe packets are never sent for 0-RTT")
            }
        };
        let Some((hdr, payload)) = packed else {
            return Ok(None);
        };

        let size = self.packet_length(&hdr, &payload) + sealer.overhead();
        let padding = if level == EncryptionLevel::Initial {
            self.initial_padding_len(&payload.frames, size)
        } else {
            0
        };
        let mut buffer = PacketBuffer::acquire();
        if level == EncryptionLevel::OneRtt {
            let short_packet = self.append_short_header_packet(
                &mut buffer,
                hdr.packet_number,
                hdr.pn_len,
                key_phase,
                payload,
                padding,
                sealer.as_ref(),
                false,
                now,
            )?;
            return Ok(Some(CoalescedPacket {
                buffer,
                long_packets: Vec::new(),
                short_packet: Some(short_packet),
            }));
        }

        let long_packet = self.append_long_header_packet(
            &mut buffer,
            hdr,
            payload,
            padding,
            level,
            sealer.as_ref(),
        )?;
        Ok(Some(CoalescedPacket {
            buffer,
            long_packets: vec![long_packet],
            short_packet: None,
        }))
    }

    /// Pack a datagram closing the connection with a transport error.
    ///
    /// Reason phrases of crypto errors are elided so handshake details do
    /// not leak.
    pub fn pack_connection_close(
        &mut self,
        error: &TransportError,
        now: Instant,
    ) -> Result<CoalescedPacket> {
        let reason = if error.code.is_crypto_error() {
            String::new()
        } else {
            error.reason.clone()
        };
        self.pack_close(false, error.code.to_wire(), error.frame_type, reason, now)
    }

    /// Pack a datagram closing the connection with an application error.
    pub fn pack_application_close(
        &mut self,
        error: &ApplicationError,
        now: Instant,
    ) -> Result<CoalescedPacket> {
        self.pack_close(true, error.code, None, error.reason.clone(), now)
    }

    fn pack_close(
        &mut self,
        is_application_error: bool,
        error_code: u64,
        frame_type: Option<u64>,
        reason: String,
        now: Instant,
    ) -> Result<CoalescedPacket> {
        let mut size = 0usize;
        let mut long_slots: Vec<(
            EncryptionLevel,
            ExtendedHeader,
            Payload,
            Arc<dyn PacketSealer>,
        )> = Vec::new();
        let mut short_slot: Option<(ExtendedHeader, Payload, Arc<dyn PacketSealer>, bool)> = None;

        for level in [
            EncryptionLevel::Initial,
            EncryptionLevel::Handshake,
            EncryptionLevel::ZeroRtt,
            EncryptionLevel::OneRtt,
        ] {
            // Servers never send 0-RTT packets.
            if self.perspective.is_server() && level == EncryptionLevel::ZeroRtt {
                continue;
            }

            let mut frame = ConnectionCloseFrame {
                error_code,
                frame_type: if is_application_error { None } else { frame_type.or(Some(0)) },
                reason: Bytes::from(reason.clone().into_bytes()),
                application_close: is_application_error,
            };
            // Application errors are not permitted in Initial or Handshake
            // packets; rewrite to a generic transport error there.
            if is_application_error
                && matches!(level, EncryptionLevel::Initial | EncryptionLevel::Handshake)
            {
                frame = ConnectionCloseFrame {
                    error_code: TransportErrorCode::ApplicationError.to_wire(),
                    frame_type: Some(0),
                    reason: Bytes::new(),
                    application_close: false,
                };
            }

            let sealer = match level {
                EncryptionLevel::Initial => self.crypto_setup.initial_sealer(),
                EncryptionLevel::Handshake => self.crypto_setup.handshake_sealer(),
                EncryptionLevel::ZeroRtt => self.crypto_setup.zero_rtt_sealer(),
                EncryptionLevel::OneRtt => self.crypto_setup.one_rtt_sealer(),
            };
            let sealer = match sealer {
                Ok(sealer) => sealer,
                Err(SealerError::KeysNotYetAvailable) | Err(SealerError::KeysDropped) => continue,
                Err(err) => return Err(err.into()),
            };

            let frame = Frame::ConnectionClose(frame);
            let payload = Payload {
                ack: None,
                length: frame.wire_len(),
                frames: vec![SentFrame::new(frame)],
            };

            let key_phase = sealer.key_phase();
            let hdr = if level == EncryptionLevel::OneRtt {
                self.get_short_header(key_phase)
            } else {
                self.get_long_header(level)
            };
            size += self.packet_length(&hdr, &payload) + sealer.overhead();
            if level == EncryptionLevel::OneRtt {
                short_slot = Some((hdr, payload, sealer, key_phase));
            } else {
                long_slots.push((level, hdr, payload, sealer));
            }
        }

        debug!(
            application = is_application_error,
            code = error_code,
            levels = long_slots.len() + usize::from(short_slot.is_some()),
            "packing connection close"
        );

        let mut buffer = PacketBuffer::acquire();
        let mut long_packets = Vec::with_capacity(long_slots.len());
        for (level, hdr, payload, sealer) in long_slots {
            let padding = if level == EncryptionLevel::Initial {
                self.initial_padding_len(&payload.frames, size)
            } else {
                0
            };
            long_packets.push(self.append_long_header_packet(
                &mut buffer,
                hdr,
                payload,
                padding,
                level,
                sealer.as_ref(),
            )?);
        }
        let mut short_packet = None;
        if let Some((hdr, payload, sealer, key_phase)) = short_slot {
            short_packet = Some(self.append_short_header_packet(
                &mut buffer,
                hdr.packet_number,
                hdr.pn_len,
                key_phase,
                payload,
                0,
                sealer.as_ref(),
                false,
                now,
            )?);
        }

        Ok(CoalescedPacket {
            buffer,
            long_packets,
            short_packet,
        })
    }

    /// Pack a 1-RTT packet carrying a single PING, padded so that the
    /// datagram is exactly `size` bytes on the wire. The usual size check
    /// is suppressed: probing beyond the current maximum is the point.
    pub fn pack_mtu_probe_packet(
        &mut self,
        ping: SentFrame,
        size: usize,
        now: Instant,
    ) -> Result<(ShortHeaderPacket, PacketBuffer)> {
        let payload = Payload {
            ack: None,
            length: ping.frame.wire_len(),
            frames: vec![ping],
        };
        let sealer = self.crypto_setup.one_rtt_sealer()?;
        let key_phase = sealer.key_phase();
        let hdr = self.get_short_header(key_phase);
        let padding = size
            .saturating_sub(self.packet_length(&hdr, &payload))
            .saturating_sub(sealer.overhead());
        let mut buffer = PacketBuffer::acquire();
        let packet = self.append_short_header_packet(
            &mut buffer,
            hdr.packet_number,
            hdr.pn_len,
            key_phase,
            payload,
            padding,
            sealer.as_ref(),
            true,
            now,
        )?;
        Ok((packet, buffer))
    }

    /// Update the Initial retry token used on future Initial packets.
    pub fn set_token(&mut self, token: Bytes) {
        self.token = token;
    }

    /// When a higher MTU is discovered, use it.
    pub fn set_max_packet_size(&mut self, size: usize) {
        self.max_packet_size = size;
    }

    /// The peer's `max_udp_payload_size` is a ceiling on the datagrams it
    /// will accept; clamp to it. A value of 0 means unspecified.
    pub fn handle_transport_parameters(&mut self, params: &TransportParameters) {
        if params.max_udp_payload_size != 0 {
            self.max_packet_size = self.max_packet_size.min(params.max_udp_payload_size as usize);
        }
    }

    // ------------------------------------------------------------------
    // Payload composition
    // ------------------------------------------------------------------

    fn maybe_get_crypto_packet(
        &mut self,
        mut max_packet_size: usize,
        level: EncryptionLevel,
        only_ack: bool,
        ack_allowed: bool,
    ) -> Option<(ExtendedHeader, Payload)> {
        if only_ack {
            if let Some(ack) = self.acks.get_ack_frame(level, true) {
                let length = ack.wire_len();
                let payload = Payload {
                    ack: Some(ack),
                    frames: Vec::new(),
                    length,
                };
                return Some((self.get_long_header(level), payload));
            }
            return None;
        }

        let (has_data, has_retransmission) = match level {
            EncryptionLevel::Initial => (
                self.initial_stream.has_data(),
                self.retransmission_queue.has_initial_data(),
            ),
            EncryptionLevel::Handshake => (
                self.handshake_stream.has_data(),
                self.retransmission_queue.has_handshake_data(),
            ),
            _ => unreachable!("crypto packets exist only at the Initial and Handshake levels"),
        };

        // Don't let an ACK force an otherwise-empty packet.
        let ack = if ack_allowed {
            self.acks
                .get_ack_frame(level, !has_retransmission && !has_data)
        } else {
            None
        };
        if !has_data && !has_retransmission && ack.is_none() {
            // nothing to send
            return None;
        }

        let mut payload = Payload::default();
        if let Some(ack) = ack {
            payload.length = ack.wire_len();
            payload.ack = Some(ack);
            max_packet_size = max_packet_size.saturating_sub(payload.length);
        }
        let hdr = self.get_long_header(level);
        max_packet_size = max_packet_size.saturating_sub(hdr.wire_len());

        if has_retransmission {
            loop {
                let frame = match level {
                    EncryptionLevel::Initial => {
                        self.retransmission_queue.get_initial_frame(max_packet_size)
                    }
                    EncryptionLevel::Handshake => self
                        .retransmission_queue
                        .get_handshake_frame(max_packet_size),
                    _ => unreachable!(),
                };
                let Some(frame) = frame else { break };
                let frame_len = frame.wire_len();
                payload.frames.push(SentFrame::new(frame));
                payload.length += frame_len;
                max_packet_size = max_packet_size.saturating_sub(frame_len);
            }
        } else if has_data {
            let stream = match level {
                EncryptionLevel::Initial => self.initial_stream.as_mut(),
                EncryptionLevel::Handshake => self.handshake_stream.as_mut(),
                _ => unreachable!(),
            };
            if let Some(frame) = stream.pop_crypto_frame(max_packet_size) {
                payload.length += frame.wire_len();
                payload.frames.push(SentFrame::new(frame));
            }
        }
        Some((hdr, payload))
    }

    fn maybe_get_app_data_packet_for_0rtt(
        &mut self,
        sealer_overhead: usize,
        max_packet_size: usize,
    ) -> Option<(ExtendedHeader, Payload)> {
        // Servers never send 0-RTT packets.
        if !self.perspective.is_client() {
            return None;
        }

        let hdr = self.get_long_header(EncryptionLevel::ZeroRtt);
        let max_payload_size = max_packet_size
            .saturating_sub(hdr.wire_len())
            .saturating_sub(sealer_overhead);
        self.maybe_get_app_data_packet(max_payload_size, false, false)
            .map(|payload| (hdr, payload))
    }

    fn maybe_get_short_header_packet(
        &mut self,
        key_phase: bool,
        sealer_overhead: usize,
        max_packet_size: usize,
        only_ack: bool,
        ack_allowed: bool,
    ) -> Option<(ExtendedHeader, Payload)> {
        let hdr = self.get_short_header(key_phase);
        let max_payload_size = max_packet_size
            .saturating_sub(hdr.wire_len())
            .saturating_sub(sealer_overhead);
        self.maybe_get_app_data_packet(max_payload_size, only_ack, ack_allowed)
            .map(|payload| (hdr, payload))
    }

    fn maybe_get_app_data_packet(
        &mut self,
        max_payload_size: usize,
        only_ack: bool,
        ack_allowed: bool,
    ) -> Option<Payload> {
        let mut payload = self.compose_next_packet(max_payload_size, only_ack, ack_allowed);

        // check if we have anything to send
        if payload.frames.is_empty() {
            payload.ack.as_ref()?;
            // the packet only contains an ACK
            if self.num_non_ack_eliciting_acks >= MAX_NON_ACK_ELICITING_ACKS {
                // Make the peer respond with an ACK of its own; a long
                // streak of unacknowledged ACK-only packets stalls both
                // sides' loss detection.
                debug!("injecting PING to break ACK-only streak");
                let ping = Frame::Ping;
                payload.length += ping.wire_len();
                // don't retransmit the PING if it is lost
                payload.frames.push(SentFrame::ignored(ping));
                self.num_non_ack_eliciting_acks = 0;
            } else {
                self.num_non_ack_eliciting_acks += 1;
            }
        } else {
            self.num_non_ack_eliciting_acks = 0;
        }
        Some(payload)
    }

    fn compose_next_packet(
        &mut self,
        max_frame_size: usize,
        only_ack: bool,
        ack_allowed: bool,
    ) -> Payload {
        if only_ack {
            if let Some(ack) = self.acks.get_ack_frame(EncryptionLevel::OneRtt, true) {
                return Payload {
                    length: ack.wire_len(),
                    ack: Some(ack),
                    frames: Vec::new(),
                };
            }
            return Payload::default();
        }

        let mut payload = Payload::default();

        let has_data = self.framer.has_data();
        let has_retransmission = self.retransmission_queue.has_app_data();

        let mut has_ack = false;
        if ack_allowed {
            if let Some(ack) = self
                .acks
                .get_ack_frame(EncryptionLevel::OneRtt, !has_retransmission && !has_data)
            {
                payload.length += ack.wire_len();
                payload.ack = Some(ack);
                has_ack = true;
            }
        }

        if let Some(queue) = self.datagram_queue.as_mut() {
            if let Some(frame) = queue.peek() {
                let size = frame.wire_len();
                if payload.length + size <= max_frame_size {
                    // Unreliable data: mark it so the default retransmit
                    // disposition is never attached.
                    payload.frames.push(SentFrame::ignored(frame.clone()));
                    payload.length += size;
                    queue.pop();
                }
            }
        }

        if has_ack && !has_data && !has_retransmission {
            return payload;
        }

        if has_retransmission {
            loop {
                let remaining = max_frame_size.saturating_sub(payload.length);
                if remaining < MIN_STREAM_FRAME_SIZE {
                    break;
                }
                let Some(frame) = self.retransmission_queue.get_app_data_frame(remaining) else {
                    break;
                };
                payload.length += frame.wire_len();
                payload.frames.push(SentFrame::new(frame));
            }
        }

        if has_data {
            payload.length += self
                .framer
                .append_control_frames(&mut payload.frames, max_frame_size.saturating_sub(payload.length));
            payload.length += self
                .framer
                .append_stream_frames(&mut payload.frames, max_frame_size.saturating_sub(payload.length));
        }
        payload
    }

    // ------------------------------------------------------------------
    // Size accounting
    // ------------------------------------------------------------------

    /// The serialized length of the packet, including the padding required
    /// to keep the header protection sample well-defined:
    /// payload + packet number length must be at least 4 bytes.
    fn packet_length(&self, hdr: &ExtendedHeader, payload: &Payload) -> usize {
        let tiny_padding = protection_padding(hdr.pn_len, payload.length);
        hdr.wire_len() + payload.length + tiny_padding
    }

    /// Padding needed to bring an Initial-bearing datagram of
    /// `current_size` bytes up to the maximum packet size.
    fn initial_padding_len(&self, frames: &[SentFrame], current_size: usize) -> usize {
        // For the server, only ack-eliciting Initial packets need padding.
        if self.perspective.is_server() && !has_ack_eliciting_frames(frames) {
            return 0;
        }
        if current_size >= self.max_packet_size {
            return 0;
        }
        self.max_packet_size - current_size
    }

    // ------------------------------------------------------------------
    // Header construction
    // ------------------------------------------------------------------

    fn get_short_header(&self, key_phase: bool) -> ExtendedHeader {
        let (pn, pn_len) = self.pn_manager.peek_packet_number(EncryptionLevel::OneRtt);
        ExtendedHeader::short((self.get_dest_conn_id)(), pn, pn_len, key_phase)
    }

    fn get_long_header(&self, level: EncryptionLevel) -> ExtendedHeader {
        let (pn, pn_len) = self.pn_manager.peek_packet_number(level);
        let packet_type = match level {
            EncryptionLevel::Initial => PacketType::Initial,
            EncryptionLevel::Handshake => PacketType::Handshake,
            EncryptionLevel::ZeroRtt => PacketType::ZeroRtt,
            EncryptionLevel::OneRtt => unreachable!("1-RTT packets use the short header"),
        };
        ExtendedHeader {
            packet_type,
            version: self.version,
            dcid: (self.get_dest_conn_id)(),
            scid: Some(self.src_conn_id.clone()),
            token: (level == EncryptionLevel::Initial).then(|| self.token.clone()),
            length: 0,
            packet_number: pn,
            pn_len,
            key_phase: false,
        }
    }

    // ------------------------------------------------------------------
    // Serialization and sealing
    // ------------------------------------------------------------------

    fn append_long_header_packet(
        &mut self,
        buffer: &mut PacketBuffer,
        mut hdr: ExtendedHeader,
        payload: Payload,
        padding: usize,
        level: EncryptionLevel,
        sealer: &dyn PacketSealer,
    ) -> Result<LongHeaderPacket> {
        let pn_len = hdr.pn_len.len();
        let padding_len = protection_padding(hdr.pn_len, payload.length) + padding;
        hdr.length = (pn_len + sealer.overhead() + payload.length + padding_len) as u64;

        let start = buffer.data.len();
        hdr.write(&mut buffer.data);
        let payload_offset = buffer.data.len() - start;

        let pn = self.pn_manager.pop_packet_number(level);
        if pn != hdr.packet_number {
            return Err(PackError::Bug(
                "peeked and popped packet numbers do not match".into(),
            ));
        }

        append_packet_payload(&mut buffer.data, &payload, padding_len)?;
        encrypt_packet(&mut buffer.data, start, payload_offset, pn, pn_len, true, sealer);
        let length = buffer.data.len() - start;

        Ok(LongHeaderPacket {
            header: hdr,
            ack: payload.ack,
            frames: payload.frames,
            length,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn append_short_header_packet(
        &mut self,
        buffer: &mut PacketBuffer,
        pn: PacketNumber,
        pn_len: PacketNumberLen,
        key_phase: bool,
        payload: Payload,
        padding: usize,
        sealer: &dyn PacketSealer,
        is_mtu_probe: bool,
        now: Instant,
    ) -> Result<ShortHeaderPacket> {
        let padding_len = protection_padding(pn_len, payload.length) + padding;

        let start = buffer.data.len();
        let conn_id = (self.get_dest_conn_id)();
        let hdr = ExtendedHeader::short(conn_id.clone(), pn, pn_len, key_phase);
        hdr.write(&mut buffer.data);
        let payload_offset = buffer.data.len() - start;

        if pn != self.pn_manager.pop_packet_number(EncryptionLevel::OneRtt) {
            return Err(PackError::Bug(
                "peeked and popped packet numbers do not match".into(),
            ));
        }

        append_packet_payload(&mut buffer.data, &payload, padding_len)?;
        if !is_mtu_probe {
            let size = buffer.data.len() - start + sealer.overhead();
            if size > self.max_packet_size {
                return Err(PackError::Bug(format!(
                    "packet too large ({size} bytes, allowed {} bytes)",
                    self.max_packet_size
                )));
            }
        }
        encrypt_packet(
            &mut buffer.data,
            start,
            payload_offset,
            pn,
            pn_len.len(),
            false,
            sealer,
        );
        let length = buffer.data.len() - start;

        // build the ACK-handler record
        let largest_acked = payload.ack.as_ref().map(|ack| ack.largest_acked);
        let mut frames = payload.frames;
        for frame in &mut frames {
            frame
                .on_lost
                .get_or_insert(OnLost::Retransmit(FrameSpace::AppData));
        }

        Ok(ShortHeaderPacket {
            packet: SentPacket {
                packet_number: pn,
                frames,
                largest_acked,
                length,
                encryption_level: EncryptionLevel::OneRtt,
                send_time: now,
                is_mtu_probe,
            },
            dest_conn_id: conn_id,
            ack: payload.ack,
            packet_number_len: pn_len,
            key_phase,
        })
    }
}

/// Padding needed so that payload + packet number cover at least 4 bytes,
/// which keeps the header protection sample inside the packet.
fn protection_padding(pn_len: PacketNumberLen, payload_len: usize) -> usize {
    4usize.saturating_sub(pn_len.len()).saturating_sub(payload_len)
}

/// Serialize the payload: ACK first, then padding zeros, then the frames
/// in composition order. The serialized size must match the composed
/// length exactly.
fn append_packet_payload(
    data: &mut BytesMut,
    payload: &Payload,
    padding_len: usize,
) -> Result<()> {
    let payload_offset = data.len();
    if let Some(ack) = &payload.ack {
        ack.append(data);
    }
    if padding_len > 0 {
        data.put_bytes(0, padding_len);
    }
    for frame in &payload.frames {
        frame.frame.append(data);
    }

    let payload_size = data.len() - payload_offset - padding_len;
    if payload_size != payload.length {
        return Err(PackError::Bug(format!(
            "payload size inconsistent (expected {}, got {} bytes)",
            payload.length, payload_size
        )));
    }
    Ok(())
}

/// Seal the packet that occupies `data[start..]`: AEAD-protect the payload
/// in place with the header as associated data, append the tag, then mask
/// the first byte and the packet number field with the header protection
/// mask derived from the ciphertext sample.
fn encrypt_packet(
    data: &mut BytesMut,
    start: usize,
    payload_offset: usize,
    pn: PacketNumber,
    pn_len: usize,
    is_long_header: bool,
    sealer: &dyn PacketSealer,
) {
    let packet = &mut data[start..];
    let (header, payload) = packet.split_at_mut(payload_offset);
    let tag = sealer.seal_in_place(pn, header, payload);
    data.extend_from_slice(&tag[..sealer.overhead()]);

    let packet = &mut data[start..];
    let pn_offset = payload_offset - pn_len;
    let mut sample = [0u8; HEADER_PROTECTION_SAMPLE_LEN];
    sample.copy_from_slice(&packet[pn_offset + 4..pn_offset + 4 + HEADER_PROTECTION_SAMPLE_LEN]);
    let mask = sealer.header_protection_mask(&sample);
    // low 4 bits of a long header's first byte are protected, low 5 of a
    // short header's
    packet[0] ^= mask[0] & if is_long_header { 0x0f } else { 0x1f };
    for i in 0..pn_len {
        packet[pn_offset + i] ^= mask[1 + i];
    }
}
