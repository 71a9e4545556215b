//! Session state machine for the authenticated (solo) protocol.
//!
//! One session per connection. The machine never blocks: it consumes one
//! inbound packet or one worker solution at a time and returns the packets
//! to transmit. The connection manager owns the socket and drives it.
//!
//! ```text
//!          connect()           tx(AUTH_RESPONSE)        rx(AUTH_RESULT, ok)
//! INIT ----------> CONNECTED ----------------> AWAITING_AUTH_RESULT ----------> AUTHENTICATED
//!                                                   | rx(AUTH_RESULT, fail)
//!                                                   v
//!                                               AUTH_FAILED (reconnect)
//!
//! AUTHENTICATED --tx(SET_CHANNEL)--> AWAITING_CHANNEL_ACK --rx(CHANNEL_ACK)--> READY
//! READY --tx(GET_BLOCK)--> AWAITING_TEMPLATE --rx(BLOCK_DATA)--> MINING
//! MINING --solution--> tx(SUBMIT_BLOCK) --> AWAITING_RESULT --rx(ACCEPT|REJECT)--> READY
//! ```

use crate::{FeedHandler, ProtocolError, ProtocolResult, TemplateInterface};
use nexus_crypto::{FalconSigner, SignatureKind};
use nexus_llp::bytes as codec;
use nexus_llp::{opcodes, widen_merkle_root, BlockSubmission, Packet, CHANNEL_HASH, CHANNEL_PRIME};
use nexus_stats::Collector;
use nexus_worker::{SolvedBlock, WorkerId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, trace, warn};

/// Re-requests of a rejected template before giving up until the next
/// height push.
const MAX_TEMPLATE_RETRIES: u32 = 5;

/// Session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet connected.
    Init,
    /// Socket up, credentials not yet sent.
    Connected,
    /// AUTH_RESPONSE sent, verdict pending.
    AwaitingAuthResult,
    /// Node accepted the credentials.
    Authenticated,
    /// SET_CHANNEL sent, ack pending.
    AwaitingChannelAck,
    /// Channel negotiated; idle between work cycles.
    Ready,
    /// GET_BLOCK sent, template pending.
    AwaitingTemplate,
    /// Workers are searching the current template.
    Mining,
    /// SUBMIT_BLOCK sent, verdict pending.
    AwaitingResult,
    /// Node rejected the credentials; terminal for this session.
    AuthFailed,
    /// Transport gone; waiting for the reconnect timer.
    Disconnected,
}

/// Behavior shared by the session policies (solo and pool). The connection
/// manager is generic over this seam; both policies share the framing core.
pub trait MiningProtocol: Send {
    /// Clear all per-connection state.
    fn reset(&mut self);

    /// The connection came up; produce the opening packets.
    fn on_connect(&mut self, peer: SocketAddr) -> ProtocolResult<Vec<Packet>>;

    /// Consume one inbound packet; produce the replies.
    fn handle_packet(&mut self, packet: &Packet, peer: SocketAddr) -> ProtocolResult<Vec<Packet>>;

    /// Consume one worker solution; produce the submission.
    fn handle_solution(
        &mut self,
        worker: WorkerId,
        solved: &SolvedBlock,
    ) -> ProtocolResult<Vec<Packet>>;

    /// Register the worker feed handler.
    fn set_feed_handler(&mut self, handler: FeedHandler);

    /// Whether the keepalive PING timer runs for this policy.
    fn uses_ping_timer(&self) -> bool {
        false
    }

    /// Whether the GET_HEIGHT poll timer runs for this policy.
    fn uses_height_timer(&self) -> bool {
        false
    }
}

/// The authenticated stateless session (solo mining).
pub struct SoloProtocol {
    state: SessionState,
    channel: u32,
    address: String,
    signer: Arc<FalconSigner>,
    templates: TemplateInterface,
    stats: Arc<Collector>,
    session_id: u32,
    authenticated: bool,
    current_reward: u64,
    template_retries: u32,
    block_signing_enabled: bool,
}

impl SoloProtocol {
    /// Create a solo session. `address` is the miner's network address
    /// embedded in the signed authentication message; the node reproduces
    /// it for verification.
    pub fn new(
        channel: u32,
        address: String,
        signer: Arc<FalconSigner>,
        stats: Arc<Collector>,
    ) -> Self {
        let channel = if channel == CHANNEL_PRIME || channel == CHANNEL_HASH {
            channel
        } else {
            warn!(channel, "Invalid channel, defaulting to hash");
            CHANNEL_HASH
        };
        Self {
            state: SessionState::Init,
            channel,
            address,
            signer,
            templates: TemplateInterface::new(channel),
            stats,
            session_id: 0,
            authenticated: false,
            current_reward: 0,
            template_retries: 0,
            block_signing_enabled: true,
        }
    }

    /// Toggle signing of submissions. Enabled by default; disabling saves
    /// the ~690 signature bytes per submission where the node tolerates it.
    pub fn enable_block_signing(&mut self, enable: bool) {
        self.block_signing_enabled = enable;
    }

    /// Current state, for diagnostics and tests.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session id assigned by the node; 0 while unauthenticated.
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Last reward pushed by the node.
    pub fn current_reward(&self) -> u64 {
        self.current_reward
    }

    /// The template interface, for stats readers.
    pub fn templates(&self) -> &TemplateInterface {
        &self.templates
    }

    fn request_work(&mut self) -> Vec<Packet> {
        debug!("Requesting new block template");
        self.state = SessionState::AwaitingTemplate;
        vec![Packet::request(opcodes::GET_BLOCK)]
    }

    fn handle_auth_result(&mut self, payload: &[u8]) -> ProtocolResult<Vec<Packet>> {
        if self.state != SessionState::AwaitingAuthResult {
            warn!(state = ?self.state, "Unexpected AUTH_RESULT");
        }
        match payload.first().copied() {
            Some(0x01) => {
                self.session_id = if payload.len() >= 5 {
                    codec::u32_le(payload, 1)?
                } else {
                    0
                };
                self.authenticated = true;
                self.templates.bind_session(self.session_id);
                self.state = SessionState::Authenticated;
                info!(
                    session_id = format_args!("{:#010x}", self.session_id),
                    "Authenticated with node"
                );

                let channel_packet =
                    Packet::data(opcodes::SET_CHANNEL, vec![self.channel as u8]);
                info!(
                    channel = self.channel,
                    name = if self.channel == CHANNEL_PRIME { "prime" } else { "hash" },
                    "Sending SET_CHANNEL"
                );
                self.state = SessionState::AwaitingChannelAck;
                Ok(vec![channel_packet])
            }
            _ => {
                error!("Authentication rejected by node. Likely causes:");
                error!("  - miner public key not whitelisted: add minerallowkey=<pubkey> to the node config");
                error!("  - malformed key material: regenerate with --create-keys");
                error!("  - node version predates stateless miner authentication");
                self.state = SessionState::AuthFailed;
                Err(ProtocolError::AuthRejected)
            }
        }
    }

    fn handle_channel_ack(&mut self, payload: &[u8], peer: SocketAddr) -> Vec<Packet> {
        let Some(&granted) = payload.first() else {
            warn!("CHANNEL_ACK without channel byte");
            return Vec::new();
        };
        let granted = granted as u32;
        if granted != self.channel {
            // The node is authoritative on the channel it serves.
            warn!(
                requested = self.channel,
                granted, "Node granted a different channel, accepting"
            );
            self.channel = granted;
            self.templates.set_channel(granted);
        }
        if payload.len() >= 3 {
            match codec::u16_be(payload, 1) {
                Ok(advertised_port) if advertised_port != peer.port() => {
                    warn!(
                        advertised_port,
                        peer_port = peer.port(),
                        "Advertised port differs from connected port"
                    );
                }
                Ok(port) => debug!(port, "Node advertised mining port"),
                Err(_) => {}
            }
        }
        info!(channel = self.channel, "Channel acknowledged, session ready");
        self.state = SessionState::Ready;
        self.request_work()
    }

    fn handle_block_data(&mut self, payload: &[u8], peer: SocketAddr) -> Vec<Packet> {
        match self.templates.read_template(payload, &peer.to_string()) {
            Ok(()) => {
                self.template_retries = 0;
                self.state = SessionState::Mining;
                Vec::new()
            }
            Err(_) => {
                self.template_retries += 1;
                if self.template_retries <= MAX_TEMPLATE_RETRIES {
                    self.request_work()
                } else {
                    error!(
                        retries = self.template_retries,
                        "Repeated template failures; waiting for a height push before retrying"
                    );
                    self.template_retries = 0;
                    self.state = SessionState::Ready;
                    Vec::new()
                }
            }
        }
    }

    fn handle_block_height(&mut self, payload: &[u8]) -> Vec<Packet> {
        let Ok(height) = codec::u32_be(payload, 0) else {
            warn!(len = payload.len(), "BLOCK_HEIGHT payload too short");
            return Vec::new();
        };
        if height > self.templates.current_height() {
            info!(
                height,
                previous = self.templates.current_height(),
                "Chain advanced"
            );
            self.templates.mark_stale("chain advanced");
            self.request_work()
        } else {
            trace!(height, "Height push without advance");
            Vec::new()
        }
    }
}

impl MiningProtocol for SoloProtocol {
    fn reset(&mut self) {
        self.state = SessionState::Init;
        self.session_id = 0;
        self.authenticated = false;
        self.current_reward = 0;
        self.template_retries = 0;
        self.templates.reset();
        debug!("Solo session reset");
    }

    fn on_connect(&mut self, peer: SocketAddr) -> ProtocolResult<Vec<Packet>> {
        self.state = SessionState::Connected;
        info!(%peer, address = %self.address, "Connected, starting Falcon authentication");

        let timestamp = unix_now();
        let signature = self.signer.sign_authentication(&self.address, timestamp)?;
        let pubkey = self.signer.public_bytes();

        // Credential packet, little-endian inner framing:
        // pubkey_len(2 LE) | pubkey | sig_len(2 LE) | signature
        let mut payload = Vec::with_capacity(2 + pubkey.len() + 2 + signature.len());
        codec::put_u16_le(&mut payload, pubkey.len() as u16);
        payload.extend_from_slice(pubkey);
        codec::put_u16_le(&mut payload, signature.len() as u16);
        payload.extend_from_slice(&signature);

        debug!(
            pubkey_len = pubkey.len(),
            sig_len = signature.len(),
            timestamp,
            "AUTH_RESPONSE composed"
        );
        self.state = SessionState::AwaitingAuthResult;
        Ok(vec![Packet::data(opcodes::AUTH_RESPONSE, payload)])
    }

    fn handle_packet(&mut self, packet: &Packet, peer: SocketAddr) -> ProtocolResult<Vec<Packet>> {
        match packet.opcode {
            opcodes::AUTH_RESULT => self.handle_auth_result(&packet.payload),
            opcodes::AUTH_CHALLENGE => {
                // The direct protocol never negotiates challenge-response.
                warn!("Node sent legacy AUTH_CHALLENGE; aborting handshake");
                Err(ProtocolError::LegacyChallenge)
            }
            opcodes::CHANNEL_ACK => Ok(self.handle_channel_ack(&packet.payload, peer)),
            opcodes::BLOCK_DATA => Ok(self.handle_block_data(&packet.payload, peer)),
            opcodes::BLOCK_HEIGHT => Ok(self.handle_block_height(&packet.payload)),
            opcodes::BLOCK_REWARD => {
                if let Ok(reward) = codec::u64_be(&packet.payload, 0) {
                    self.current_reward = reward;
                    info!(reward, "Block reward updated");
                }
                Ok(Vec::new())
            }
            opcodes::ACCEPT => {
                self.stats.block_accepted();
                info!("Block accepted by network");
                Ok(self.request_work())
            }
            opcodes::REJECT => {
                self.stats.block_rejected();
                warn!("Block rejected by network (stale template, losing race, or invalid signature)");
                Ok(self.request_work())
            }
            opcodes::PING => {
                trace!("PING received");
                Ok(Vec::new())
            }
            opcodes::CLOSE => {
                info!("Node requested connection close");
                Err(ProtocolError::ConnectionClosed)
            }
            other => {
                debug!(
                    opcode = other,
                    name = packet.name(),
                    len = packet.payload.len(),
                    "Ignoring unexpected packet"
                );
                Ok(Vec::new())
            }
        }
    }

    fn handle_solution(
        &mut self,
        worker: WorkerId,
        solved: &SolvedBlock,
    ) -> ProtocolResult<Vec<Packet>> {
        if !self.authenticated {
            warn!(worker, "Dropping solution on unauthenticated session");
            return Ok(Vec::new());
        }
        let Some(current) = self.templates.current() else {
            debug!(worker, "Dropping solution: no active template");
            return Ok(Vec::new());
        };
        // A solution racing a preemption may target a superseded template.
        if solved.header.height != current.header.height
            || solved.header.merkle_root != current.header.merkle_root
        {
            debug!(
                worker,
                solution_height = solved.header.height,
                template_height = current.header.height,
                "Dropping solution for superseded template"
            );
            return Ok(Vec::new());
        }

        if let Err(error) = self
            .templates
            .verify_submission(&solved.header.merkle_root, solved.header.nonce)
        {
            warn!(worker, %error, "Solution failed pre-submission verification");
            return Ok(Vec::new());
        }

        let mut submission = BlockSubmission {
            merkle_root: widen_merkle_root(&solved.header.merkle_root)?,
            nonce: solved.header.nonce,
            timestamp: unix_now(),
            signature: Vec::new(),
        };
        if self.block_signing_enabled {
            submission.signature = self
                .signer
                .sign_payload(&submission.signed_bytes(), SignatureKind::Block)
                .map_err(|e| {
                    // Never downgrade to an unsigned submission.
                    error!(%e, "Signing oracle unavailable, aborting submission");
                    e
                })?;
        }
        let payload = submission.encode()?;

        info!(
            worker,
            height = solved.header.height,
            nonce = format_args!("{:#018x}", solved.header.nonce),
            payload_len = payload.len(),
            "Submitting solved block"
        );
        self.templates.record_submitted();
        self.state = SessionState::AwaitingResult;
        Ok(vec![Packet::data(opcodes::SUBMIT_BLOCK, payload)])
    }

    fn set_feed_handler(&mut self, handler: FeedHandler) {
        self.templates.set_feed_handler(handler);
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
