//! Legacy pool session policy.
//!
//! Pool mode shares the framing core with the solo session but none of the
//! Falcon handshake: there is no authentication exchange, work is driven by
//! a periodic GET_HEIGHT poll instead of node pushes, a PING timer keeps the
//! connection alive, and submissions travel unsigned as
//! `merkle_root(64) ∥ nonce_u64_le`.

use crate::{FeedHandler, ProtocolError, ProtocolResult, TemplateInterface};
use nexus_llp::bytes as codec;
use nexus_llp::{opcodes, widen_merkle_root, Packet, CHANNEL_HASH, CHANNEL_PRIME};
use nexus_stats::Collector;
use nexus_worker::{SolvedBlock, WorkerId};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::session::MiningProtocol;

/// The unauthenticated pool session.
pub struct PoolProtocol {
    channel: u32,
    templates: TemplateInterface,
    stats: Arc<Collector>,
    current_height: u32,
}

impl PoolProtocol {
    /// Create a pool session on the given channel.
    pub fn new(channel: u32, stats: Arc<Collector>) -> Self {
        let channel = if channel == CHANNEL_PRIME || channel == CHANNEL_HASH {
            channel
        } else {
            warn!(channel, "Invalid channel, defaulting to hash");
            CHANNEL_HASH
        };
        Self {
            channel,
            templates: TemplateInterface::new(channel),
            stats,
            current_height: 0,
        }
    }

    /// The template interface, for stats readers.
    pub fn templates(&self) -> &TemplateInterface {
        &self.templates
    }

    fn request_work(&self) -> Vec<Packet> {
        debug!("Requesting new block from pool");
        vec![Packet::request(opcodes::GET_BLOCK)]
    }
}

impl MiningProtocol for PoolProtocol {
    fn reset(&mut self) {
        self.current_height = 0;
        self.templates.reset();
        debug!("Pool session reset");
    }

    fn on_connect(&mut self, peer: SocketAddr) -> ProtocolResult<Vec<Packet>> {
        // Legacy login always succeeds locally: announce the channel and
        // start polling for height.
        info!(%peer, channel = self.channel, "Connected to pool, sending SET_CHANNEL");
        Ok(vec![
            Packet::data(opcodes::SET_CHANNEL, vec![self.channel as u8]),
            Packet::request(opcodes::GET_HEIGHT),
        ])
    }

    fn handle_packet(&mut self, packet: &Packet, peer: SocketAddr) -> ProtocolResult<Vec<Packet>> {
        match packet.opcode {
            opcodes::BLOCK_HEIGHT => {
                let Ok(height) = codec::u32_be(&packet.payload, 0) else {
                    warn!(len = packet.payload.len(), "BLOCK_HEIGHT payload too short");
                    return Ok(Vec::new());
                };
                if height > self.current_height {
                    info!(height, previous = self.current_height, "Pool height advanced");
                    self.current_height = height;
                    self.templates.mark_stale("pool height advanced");
                    return Ok(self.request_work());
                }
                Ok(Vec::new())
            }
            opcodes::BLOCK_DATA => {
                if self
                    .templates
                    .read_template(&packet.payload, &peer.to_string())
                    .is_err()
                {
                    return Ok(self.request_work());
                }
                Ok(Vec::new())
            }
            opcodes::CHANNEL_ACK => {
                debug!(payload = %packet.preview(), "Pool acknowledged channel");
                Ok(Vec::new())
            }
            opcodes::ACCEPT => {
                self.stats.block_accepted();
                info!("Share accepted by pool");
                Ok(self.request_work())
            }
            opcodes::REJECT => {
                self.stats.block_rejected();
                warn!("Share rejected by pool");
                Ok(self.request_work())
            }
            opcodes::PING => {
                trace!("PING received");
                Ok(Vec::new())
            }
            opcodes::CLOSE => Err(ProtocolError::ConnectionClosed),
            other => {
                debug!(opcode = other, name = packet.name(), "Ignoring pool packet");
                Ok(Vec::new())
            }
        }
    }

    fn handle_solution(
        &mut self,
        worker: WorkerId,
        solved: &SolvedBlock,
    ) -> ProtocolResult<Vec<Packet>> {
        if let Err(error) = self
            .templates
            .verify_submission(&solved.header.merkle_root, solved.header.nonce)
        {
            warn!(worker, %error, "Dropping pool solution");
            return Ok(Vec::new());
        }

        // Legacy unsigned submission: merkle(64) then little-endian nonce.
        let merkle = widen_merkle_root(&solved.header.merkle_root)?;
        let mut payload = Vec::with_capacity(72);
        payload.extend_from_slice(&merkle);
        codec::put_u64_le(&mut payload, solved.header.nonce);

        info!(
            worker,
            height = solved.header.height,
            nonce = format_args!("{:#018x}", solved.header.nonce),
            "Submitting share to pool"
        );
        self.templates.record_submitted();
        Ok(vec![Packet::data(opcodes::SUBMIT_BLOCK, payload)])
    }

    fn set_feed_handler(&mut self, handler: FeedHandler) {
        self.templates.set_feed_handler(handler);
    }

    fn uses_ping_timer(&self) -> bool {
        true
    }

    fn uses_height_timer(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_llp::BlockHeader;

    fn peer() -> SocketAddr {
        "10.0.0.1:9000".parse().unwrap()
    }

    fn pool() -> PoolProtocol {
        PoolProtocol::new(CHANNEL_HASH, Arc::new(Collector::new(1)))
    }

    fn template_header(height: u32) -> BlockHeader {
        BlockHeader {
            version: 4,
            prev_hash: [0x11; 32],
            merkle_root: [0x22; 32],
            channel: CHANNEL_HASH,
            height,
            bits: 0x7b7f0000,
            nonce: 0,
            time: 1_700_000_000,
        }
    }

    #[test]
    fn test_connect_announces_channel_and_polls_height() {
        let mut pool = pool();
        let out = pool.on_connect(peer()).unwrap();
        assert_eq!(out[0].opcode, opcodes::SET_CHANNEL);
        assert_eq!(out[1].opcode, opcodes::GET_HEIGHT);
        assert!(pool.uses_ping_timer());
        assert!(pool.uses_height_timer());
    }

    #[test]
    fn test_height_advance_requests_work() {
        let mut pool = pool();
        let out = pool
            .handle_packet(
                &Packet::data(opcodes::BLOCK_HEIGHT, vec![0, 0, 0x03, 0xE8]),
                peer(),
            )
            .unwrap();
        assert_eq!(out[0].opcode, opcodes::GET_BLOCK);

        // Same height again: no new work.
        let out = pool
            .handle_packet(
                &Packet::data(opcodes::BLOCK_HEIGHT, vec![0, 0, 0x03, 0xE8]),
                peer(),
            )
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_unsigned_submission_shape() {
        let mut pool = pool();
        pool.handle_packet(
            &Packet::data(opcodes::BLOCK_DATA, template_header(1000).encode()),
            peer(),
        )
        .unwrap();

        let mut solved = template_header(1000);
        solved.nonce = 0x0102030405060708;
        let out = pool.handle_solution(0, &SolvedBlock { header: solved }).unwrap();
        assert_eq!(out[0].opcode, opcodes::SUBMIT_BLOCK);
        assert_eq!(out[0].payload.len(), 72);
        assert_eq!(
            &out[0].payload[64..],
            &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_reject_counts_and_rerequests() {
        let mut pool = pool();
        let out = pool
            .handle_packet(&Packet::request(opcodes::REJECT), peer())
            .unwrap();
        assert_eq!(out[0].opcode, opcodes::GET_BLOCK);
    }
}
