// MIT License - Copyright (c) 2026 Peter Wright
// Frame codec

use tracing::{debug, warn};

use crate::constants::{
    BLOCK_LEN, CRC_LEN, HEADER_LEN, INITIAL_SESSION_ID, LENGTH_OFFSET, MAX_FRAME_LEN,
    MIN_FRAME_LEN, PACKET_TYPE_DATA, PACKET_TYPE_SESSION, PAYLOAD_PREFIX_LEN,
    PROTOCOL_CLEARTEXT, PROTOCOL_ENCRYPTED, SESSION_COMMAND_LIMIT, crc16,
};
use crate::crypto::UniiCrypt;
use crate::error::ProtocolError;
use crate::protocol::{Command, Message};

/// The fixed 14-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub session_id: u16,
    pub tx_seq: u32,
    pub rx_seq: u32,
    pub protocol: u8,
    pub packet_type: u8,
    /// Total frame length including header and checksum.
    pub length: u16,
}

impl FrameHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..2].copy_from_slice(&self.session_id.to_be_bytes());
        out[2..6].copy_from_slice(&self.tx_seq.to_be_bytes());
        out[6..10].copy_from_slice(&self.rx_seq.to_be_bytes());
        out[10] = self.protocol;
        out[11] = self.packet_type;
        out[12..14].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Self {
        Self {
            session_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            tx_seq: u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
            rx_seq: u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
            protocol: bytes[10],
            packet_type: bytes[11],
            length: u16::from_be_bytes([bytes[12], bytes[13]]),
        }
    }
}

/// Session id and sequence numbers carried in every outgoing header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCounters {
    pub session_id: u16,
    pub tx_seq: u32,
    pub rx_seq: u32,
}

impl Default for SessionCounters {
    fn default() -> Self {
        Self {
            session_id: INITIAL_SESSION_ID,
            tx_seq: 0,
            rx_seq: 0,
        }
    }
}

impl SessionCounters {
    /// Adopt the panel's session id and acknowledge its sequence number.
    pub fn observe(&mut self, header: &FrameHeader) {
        self.session_id = header.session_id;
        self.rx_seq = header.tx_seq;
    }

    /// Called after each frame is written.
    pub fn advance(&mut self) {
        self.tx_seq = self.tx_seq.wrapping_add(1);
    }
}

/// A validated, decrypted frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub message: Message,
}

/// Result of attempting to decode one frame from the front of a buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame occupying the first `len` bytes.
    Frame { frame: Frame, len: usize },
    NeedMoreData,
    /// The first `len` bytes must be discarded.
    Invalid { error: ProtocolError, len: usize },
}

/// Encodes logical messages into wire frames and back.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    crypt: UniiCrypt,
}

impl FrameCodec {
    pub fn new(crypt: UniiCrypt) -> Self {
        Self { crypt }
    }

    pub fn is_encrypted(&self) -> bool {
        self.crypt.is_encrypted()
    }

    /// Build a complete frame for `message` using the current counters.
    pub fn encode(
        &self,
        counters: &SessionCounters,
        message: &Message,
    ) -> Result<Vec<u8>, ProtocolError> {
        let data_len = u16::try_from(message.data.len()).map_err(|_| ProtocolError::Malformed {
            what: "message",
            details: format!("{} data bytes do not fit a frame", message.data.len()),
        })?;
        let unpadded = HEADER_LEN + PAYLOAD_PREFIX_LEN + message.data.len() + CRC_LEN;
        let total = unpadded.div_ceil(BLOCK_LEN) * BLOCK_LEN;
        if total > MAX_FRAME_LEN {
            return Err(ProtocolError::InvalidLength { length: total });
        }

        let command_id = message.command.id();
        let header = FrameHeader {
            session_id: counters.session_id,
            tx_seq: counters.tx_seq,
            rx_seq: counters.rx_seq,
            protocol: if self.crypt.is_encrypted() {
                PROTOCOL_ENCRYPTED
            } else {
                PROTOCOL_CLEARTEXT
            },
            packet_type: if command_id < SESSION_COMMAND_LIMIT {
                PACKET_TYPE_SESSION
            } else {
                PACKET_TYPE_DATA
            },
            length: total as u16,
        };
        let header_bytes = header.to_bytes();

        let mut payload = vec![0u8; total - HEADER_LEN - CRC_LEN];
        payload[0..2].copy_from_slice(&command_id.to_be_bytes());
        payload[2..4].copy_from_slice(&data_len.to_be_bytes());
        payload[PAYLOAD_PREFIX_LEN..PAYLOAD_PREFIX_LEN + message.data.len()]
            .copy_from_slice(&message.data);
        self.crypt.apply(&header_bytes, &mut payload);

        let mut frame = Vec::with_capacity(total);
        frame.extend_from_slice(&header_bytes);
        frame.extend_from_slice(&payload);
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        Ok(frame)
    }

    /// Try to decode the frame at the front of `bytes`.
    pub fn decode(&self, bytes: &[u8]) -> Decoded {
        if bytes.len() < HEADER_LEN {
            return Decoded::NeedMoreData;
        }
        let length = u16::from_be_bytes([bytes[LENGTH_OFFSET], bytes[LENGTH_OFFSET + 1]]) as usize;
        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&length) {
            // No sync marker to recover from: drop everything buffered.
            return Decoded::Invalid {
                error: ProtocolError::InvalidLength { length },
                len: bytes.len(),
            };
        }
        if bytes.len() < length {
            return Decoded::NeedMoreData;
        }

        let raw = &bytes[..length];
        let expected = crc16(&raw[..length - CRC_LEN]);
        let received = u16::from_be_bytes([raw[length - 2], raw[length - 1]]);
        if expected != received {
            return Decoded::Invalid {
                error: ProtocolError::ChecksumMismatch { expected, received },
                len: length,
            };
        }

        let mut header_bytes = [0u8; HEADER_LEN];
        header_bytes.copy_from_slice(&raw[..HEADER_LEN]);
        let header = FrameHeader::parse(&header_bytes);
        let body = &raw[HEADER_LEN..length - CRC_LEN];

        let payload = match header.protocol {
            PROTOCOL_CLEARTEXT => body.to_vec(),
            PROTOCOL_ENCRYPTED if self.crypt.is_encrypted() => {
                self.crypt.decrypt(&header_bytes, body)
            }
            PROTOCOL_ENCRYPTED => {
                return Decoded::Invalid {
                    error: ProtocolError::MissingKey,
                    len: length,
                };
            }
            other => {
                return Decoded::Invalid {
                    error: ProtocolError::UnknownProtocol(other),
                    len: length,
                };
            }
        };

        match parse_payload(&payload) {
            Ok(message) => Decoded::Frame {
                frame: Frame { header, message },
                len: length,
            },
            Err(error) => Decoded::Invalid { error, len: length },
        }
    }
}

fn parse_payload(payload: &[u8]) -> Result<Message, ProtocolError> {
    if payload.len() < PAYLOAD_PREFIX_LEN {
        return Err(ProtocolError::Truncated {
            declared: PAYLOAD_PREFIX_LEN,
            available: payload.len(),
        });
    }
    let command = Command::from_id(u16::from_be_bytes([payload[0], payload[1]]));
    let declared = u16::from_be_bytes([payload[2], payload[3]]) as usize;
    let available = payload.len() - PAYLOAD_PREFIX_LEN;
    if declared > available {
        return Err(ProtocolError::Truncated { declared, available });
    }
    Ok(Message::new(
        command,
        &payload[PAYLOAD_PREFIX_LEN..PAYLOAD_PREFIX_LEN + declared],
    ))
}

/// Accumulates socket reads and yields whole frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Next decoded frame, a rejected frame, or `None` when more data is needed.
    pub fn next_frame(&mut self, codec: &FrameCodec) -> Option<Result<Frame, ProtocolError>> {
        match codec.decode(&self.buf) {
            Decoded::Frame { frame, len } => {
                self.buf.drain(..len);
                debug!(
                    "Frame {:?} ({} bytes, seq {})",
                    frame.message.command, len, frame.header.tx_seq
                );
                Some(Ok(frame))
            }
            Decoded::NeedMoreData => None,
            Decoded::Invalid { error, len } => {
                warn!("Discarding {} bytes: {}", len, error);
                self.buf.drain(..len);
                Some(Err(error))
            }
        }
    }
}
