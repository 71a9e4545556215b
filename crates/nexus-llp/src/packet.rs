//! LLP packet framing.
//!
//! Wire layout for data-bearing packets:
//!
//! ```text
//! +--------+-------------------+-----------------+
//! | Opcode |      Length       |     Payload     |
//! | 1 byte | 4 bytes (BE u32)  |  Length bytes   |
//! +--------+-------------------+-----------------+
//! ```
//!
//! Header-only packets (requests, response codes, PING/CLOSE) are a single
//! opcode byte with no length field. Which form an opcode uses is fixed by
//! its class (see [`PacketClass`]); a packet that violates its class rules is
//! invalid both before send and after parse.

use crate::{LlpError, LlpResult};
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Canonical opcode values, one name per value.
///
/// Earlier protocol revisions accumulated aliases (BLOCK_ACCEPTED for ACCEPT
/// and the like); only the canonical names are defined here and
/// [`opcode_name`] is the single symbolic map used for logging.
pub mod opcodes {
    /// Block template data, node to miner.
    pub const BLOCK_DATA: u8 = 0;
    /// Solved block submission, miner to node.
    pub const SUBMIT_BLOCK: u8 = 1;
    /// Chain height push, node to miner.
    pub const BLOCK_HEIGHT: u8 = 2;
    /// Mining channel selection (1 = prime, 2 = hash), miner to node.
    pub const SET_CHANNEL: u8 = 3;
    /// Current block reward, node to miner.
    pub const BLOCK_REWARD: u8 = 4;
    /// Coinbase address assignment.
    pub const SET_COINBASE: u8 = 5;
    /// Valid-but-not-best block notification.
    pub const GOOD_BLOCK: u8 = 6;
    /// Orphaned block notification.
    pub const ORPHAN_BLOCK: u8 = 7;
    /// Block validation request.
    pub const CHECK_BLOCK: u8 = 64;
    /// Block notification subscription.
    pub const SUBSCRIBE: u8 = 65;

    /// Request a new block template.
    pub const GET_BLOCK: u8 = 129;
    /// Request the current chain height.
    pub const GET_HEIGHT: u8 = 130;
    /// Request the current block reward.
    pub const GET_REWARD: u8 = 131;
    /// Clear the node-side block cache.
    pub const CLEAR_MAP: u8 = 132;
    /// Request the current mining round.
    pub const GET_ROUND: u8 = 133;

    /// Block accepted.
    pub const ACCEPT: u8 = 200;
    /// Block rejected.
    pub const REJECT: u8 = 201;
    /// Coinbase address set.
    pub const COINBASE_SET: u8 = 202;
    /// Coinbase address rejected.
    pub const COINBASE_FAIL: u8 = 203;
    /// New mining round started.
    pub const NEW_ROUND: u8 = 204;
    /// Stale mining round.
    pub const OLD_ROUND: u8 = 205;
    /// Channel selection acknowledged; carries the granted channel byte and
    /// optionally a 2-byte advertised port.
    pub const CHANNEL_ACK: u8 = 206;

    /// Legacy challenge-response opener, miner to node.
    pub const AUTH_INIT: u8 = 207;
    /// Legacy challenge nonce, node to miner.
    pub const AUTH_CHALLENGE: u8 = 208;
    /// Direct-protocol credential packet, miner to node.
    pub const AUTH_RESPONSE: u8 = 209;
    /// Authentication verdict, node to miner.
    pub const AUTH_RESULT: u8 = 210;
    /// Session open, node to miner.
    pub const SESSION_START: u8 = 211;
    /// Session heartbeat.
    pub const SESSION_KEEPALIVE: u8 = 212;

    /// Keepalive ping.
    pub const PING: u8 = 253;
    /// Close connection.
    pub const CLOSE: u8 = 254;
}

/// Maximum payload a data-bearing packet may declare. An inbound length above
/// this indicates stream desync rather than a droppable packet, so the codec
/// surfaces it as a connection-level error.
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Framing class of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    /// Opcode + 4-byte big-endian length + payload; length must be > 0.
    Data,
    /// Single opcode byte; no length field.
    HeaderOnly,
    /// Reserved, never valid on the wire.
    Reserved,
}

/// Classify an opcode.
///
/// - 0–127: data packets.
/// - 206–212: channel ack plus auth/session packets; data-bearing despite the
///   high opcode.
/// - 128–205 and 213–254: header-only requests, response codes and control.
/// - 255: reserved.
pub fn packet_class(opcode: u8) -> PacketClass {
    match opcode {
        0..=127 => PacketClass::Data,
        opcodes::CHANNEL_ACK..=opcodes::SESSION_KEEPALIVE => PacketClass::Data,
        255 => PacketClass::Reserved,
        _ => PacketClass::HeaderOnly,
    }
}

/// Symbolic name for an opcode, for logging.
pub fn opcode_name(opcode: u8) -> &'static str {
    use opcodes::*;
    match opcode {
        BLOCK_DATA => "BLOCK_DATA",
        SUBMIT_BLOCK => "SUBMIT_BLOCK",
        BLOCK_HEIGHT => "BLOCK_HEIGHT",
        SET_CHANNEL => "SET_CHANNEL",
        BLOCK_REWARD => "BLOCK_REWARD",
        SET_COINBASE => "SET_COINBASE",
        GOOD_BLOCK => "GOOD_BLOCK",
        ORPHAN_BLOCK => "ORPHAN_BLOCK",
        CHECK_BLOCK => "CHECK_BLOCK",
        SUBSCRIBE => "SUBSCRIBE",
        GET_BLOCK => "GET_BLOCK",
        GET_HEIGHT => "GET_HEIGHT",
        GET_REWARD => "GET_REWARD",
        CLEAR_MAP => "CLEAR_MAP",
        GET_ROUND => "GET_ROUND",
        ACCEPT => "ACCEPT",
        REJECT => "REJECT",
        COINBASE_SET => "COINBASE_SET",
        COINBASE_FAIL => "COINBASE_FAIL",
        NEW_ROUND => "NEW_ROUND",
        OLD_ROUND => "OLD_ROUND",
        CHANNEL_ACK => "CHANNEL_ACK",
        AUTH_INIT => "AUTH_INIT",
        AUTH_CHALLENGE => "AUTH_CHALLENGE",
        AUTH_RESPONSE => "AUTH_RESPONSE",
        AUTH_RESULT => "AUTH_RESULT",
        SESSION_START => "SESSION_START",
        SESSION_KEEPALIVE => "SESSION_KEEPALIVE",
        PING => "PING",
        CLOSE => "CLOSE",
        _ => "UNKNOWN",
    }
}

/// A framed LLP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet opcode.
    pub opcode: u8,
    /// Payload; empty for header-only packets.
    pub payload: Bytes,
}

impl Packet {
    /// Create a header-only packet (requests, PING, CLOSE).
    pub fn request(opcode: u8) -> Self {
        Self {
            opcode,
            payload: Bytes::new(),
        }
    }

    /// Create a data-bearing packet.
    pub fn data(opcode: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// Symbolic name of this packet's opcode.
    pub fn name(&self) -> &'static str {
        opcode_name(self.opcode)
    }

    /// Check the packet against its class framing rules.
    pub fn validate(&self) -> LlpResult<()> {
        match packet_class(self.opcode) {
            PacketClass::Data => {
                if self.payload.is_empty() {
                    return Err(LlpError::EmptyPayload {
                        opcode: self.opcode,
                        name: self.name(),
                    });
                }
                if self.payload.len() > MAX_PAYLOAD_SIZE {
                    return Err(LlpError::PacketTooLarge {
                        opcode: self.opcode,
                        size: self.payload.len(),
                        max: MAX_PAYLOAD_SIZE,
                    });
                }
            }
            PacketClass::HeaderOnly => {
                if !self.payload.is_empty() {
                    return Err(LlpError::InvalidOpcode {
                        opcode: self.opcode,
                        name: self.name(),
                        reason: "header-only opcode carries a payload",
                    });
                }
            }
            PacketClass::Reserved => {
                return Err(LlpError::InvalidOpcode {
                    opcode: self.opcode,
                    name: self.name(),
                    reason: "reserved opcode",
                });
            }
        }
        Ok(())
    }

    /// Serialize for transmission. Fails if the packet violates its class
    /// rules; nothing invalid reaches the socket.
    pub fn to_bytes(&self) -> LlpResult<Bytes> {
        self.validate()?;
        match packet_class(self.opcode) {
            PacketClass::Data => {
                let mut out = Vec::with_capacity(5 + self.payload.len());
                out.push(self.opcode);
                out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
                out.extend_from_slice(&self.payload);
                Ok(out.into())
            }
            _ => Ok(Bytes::copy_from_slice(&[self.opcode])),
        }
    }

    /// Hex preview of the first 16 payload bytes, for log lines.
    pub fn preview(&self) -> String {
        let n = self.payload.len().min(16);
        hex::encode(&self.payload[..n])
    }
}

/// Outcome of one stream-parse attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    /// A full packet was framed; `consumed` bytes belong to it.
    Complete { packet: Packet, consumed: usize },
    /// Not enough bytes yet; the buffer must be left untouched.
    Incomplete,
    /// Opcode recognized but the framing violates its class rules; skip
    /// `skip` bytes and keep parsing.
    Invalid { opcode: u8, skip: usize },
    /// Declared length exceeds [`MAX_PAYLOAD_SIZE`]; the stream is
    /// considered desynchronized.
    Oversized { opcode: u8, length: usize },
}

/// Parse one packet from the front of `buf` without consuming anything.
///
/// The parser never over-reads: a truncated length prefix or payload is
/// [`Parsed::Incomplete`], not an error. Callers drive it until `Incomplete`
/// before blocking on I/O, since a single socket read may carry several
/// packets or a fraction of one.
pub fn parse_packet(buf: &[u8]) -> Parsed {
    let Some(&opcode) = buf.first() else {
        return Parsed::Incomplete;
    };

    match packet_class(opcode) {
        PacketClass::Reserved => Parsed::Invalid { opcode, skip: 1 },
        PacketClass::HeaderOnly => Parsed::Complete {
            packet: Packet::request(opcode),
            consumed: 1,
        },
        PacketClass::Data => {
            if buf.len() < 5 {
                return Parsed::Incomplete;
            }
            let length =
                u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
            if length == 0 {
                return Parsed::Invalid { opcode, skip: 5 };
            }
            if length > MAX_PAYLOAD_SIZE {
                return Parsed::Oversized { opcode, length };
            }
            if buf.len() < 5 + length {
                return Parsed::Incomplete;
            }
            Parsed::Complete {
                packet: Packet::data(opcode, Bytes::copy_from_slice(&buf[5..5 + length])),
                consumed: 5 + length,
            }
        }
    }
}

/// Stream codec gluing [`parse_packet`] into tokio's framed I/O.
///
/// Invalid packets are dropped with a warning and parsing continues; an
/// oversized declared length errors the connection.
#[derive(Debug, Default)]
pub struct LlpCodec;

impl Decoder for LlpCodec {
    type Item = Packet;
    type Error = LlpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, LlpError> {
        loop {
            match parse_packet(src) {
                Parsed::Complete { packet, consumed } => {
                    src.advance(consumed);
                    return Ok(Some(packet));
                }
                Parsed::Incomplete => return Ok(None),
                Parsed::Invalid { opcode, skip } => {
                    warn!(
                        opcode,
                        name = opcode_name(opcode),
                        skip,
                        "Dropping packet with invalid framing"
                    );
                    src.advance(skip);
                }
                Parsed::Oversized { opcode, length } => {
                    return Err(LlpError::PacketTooLarge {
                        opcode,
                        size: length,
                        max: MAX_PAYLOAD_SIZE,
                    });
                }
            }
        }
    }
}

impl Encoder<Packet> for LlpCodec {
    type Error = LlpError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), LlpError> {
        let bytes = item.to_bytes()?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::opcodes::*;
    use super::*;

    #[test]
    fn test_header_only_encoding() {
        let packet = Packet::request(GET_BLOCK);
        assert!(packet.validate().is_ok());
        assert_eq!(packet.to_bytes().unwrap().as_ref(), &[0x81]);

        let packet = Packet::request(GET_HEIGHT);
        assert_eq!(packet.to_bytes().unwrap().as_ref(), &[0x82]);

        let packet = Packet::request(PING);
        assert_eq!(packet.to_bytes().unwrap().as_ref(), &[0xfd]);
    }

    #[test]
    fn test_data_packet_encoding() {
        let packet = Packet::data(SET_CHANNEL, vec![0x02]);
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes.as_ref(), &[0x03, 0x00, 0x00, 0x00, 0x01, 0x02]);
    }

    #[test]
    fn test_data_packet_requires_payload() {
        let packet = Packet::request(50);
        assert!(matches!(
            packet.validate(),
            Err(LlpError::EmptyPayload { opcode: 50, .. })
        ));
        assert!(packet.to_bytes().is_err());
    }

    #[test]
    fn test_header_only_rejects_payload() {
        let packet = Packet::data(GET_BLOCK, vec![0x01]);
        assert!(matches!(
            packet.validate(),
            Err(LlpError::InvalidOpcode { opcode: 129, .. })
        ));
    }

    #[test]
    fn test_every_data_class_opcode_rejects_empty() {
        for opcode in 0..=127u8 {
            assert!(Packet::request(opcode).validate().is_err());
        }
    }

    #[test]
    fn test_auth_class_is_data_bearing() {
        for opcode in [AUTH_INIT, AUTH_CHALLENGE, AUTH_RESPONSE, AUTH_RESULT] {
            assert_eq!(packet_class(opcode), PacketClass::Data);
            assert!(Packet::request(opcode).validate().is_err());
            assert!(Packet::data(opcode, vec![0x01]).validate().is_ok());
        }
    }

    #[test]
    fn test_framed_roundtrip_no_residual() {
        let packet = Packet::data(BLOCK_DATA, vec![0xAA; 92]);
        let bytes = packet.to_bytes().unwrap();
        match parse_packet(&bytes) {
            Parsed::Complete {
                packet: parsed,
                consumed,
            } => {
                assert_eq!(parsed, packet);
                assert_eq!(consumed, bytes.len());
            }
            other => panic!("expected Complete, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_length_prefix_is_incomplete() {
        // One byte of a multi-byte length field must not be treated as
        // invalid framing.
        assert_eq!(parse_packet(&[0x00, 0x00]), Parsed::Incomplete);
        assert_eq!(parse_packet(&[0x00, 0x00, 0x00, 0x00]), Parsed::Incomplete);
    }

    #[test]
    fn test_partial_read_reassembly() {
        let mut buf = BytesMut::new();
        let mut codec = LlpCodec;

        buf.extend_from_slice(&[0x00, 0x00, 0x00]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x00, 0x5C]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x11; 92]);
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.opcode, BLOCK_DATA);
        assert_eq!(packet.payload.len(), 92);
        assert!(buf.is_empty());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_multiple_packets_in_one_read() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&Packet::request(ACCEPT).to_bytes().unwrap());
        buf.extend_from_slice(&Packet::data(BLOCK_HEIGHT, vec![0, 0, 3, 0xE8]).to_bytes().unwrap());
        buf.extend_from_slice(&Packet::request(PING).to_bytes().unwrap());

        let mut codec = LlpCodec;
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().opcode, ACCEPT);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().opcode, BLOCK_HEIGHT);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().opcode, PING);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_zero_length_data_packet_is_skipped() {
        let mut buf = BytesMut::new();
        // Data opcode with length 0, then a valid ACCEPT behind it.
        buf.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x00, 0xC8]);
        let mut codec = LlpCodec;
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.opcode, ACCEPT);
    }

    #[test]
    fn test_oversized_length_errors() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x00, 0xFF, 0xFF, 0xFF, 0xFF]);
        let mut codec = LlpCodec;
        assert!(matches!(
            codec.decode(&mut buf),
            Err(LlpError::PacketTooLarge { .. })
        ));
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(opcode_name(ACCEPT), "ACCEPT");
        assert_eq!(opcode_name(AUTH_RESULT), "AUTH_RESULT");
        assert_eq!(opcode_name(77), "UNKNOWN");
    }

    #[test]
    fn test_preview_truncates() {
        let packet = Packet::data(BLOCK_DATA, vec![0xAB; 64]);
        assert_eq!(packet.preview().len(), 32);
    }
}
