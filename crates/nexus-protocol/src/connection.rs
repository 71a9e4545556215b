//! Connection manager.
//!
//! Owns the single outbound TCP socket. Inbound bytes run through the
//! re-entrant LLP codec and each framed packet is handed to the session
//! policy on this task; outbound packets are written one at a time in the
//! order produced. Worker solutions arrive over a channel and are processed
//! on the same task, so session state is only ever touched here.
//!
//! On socket error or EOF the session is reset and the reconnect timer is
//! armed; the dial-handshake cycle then starts over.

use crate::session::MiningProtocol;
use futures::{SinkExt, StreamExt};
use nexus_llp::{opcodes, LlpCodec, Packet};
use nexus_stats::Collector;
use nexus_worker::{SolvedBlock, WorkerId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Node host name or address.
    pub host: String,
    /// Node LLP port.
    pub port: u16,
    /// Dial timeout.
    pub connect_timeout: Duration,
    /// Delay between reconnect attempts.
    pub retry_interval: Duration,
    /// Keepalive interval (pool policy only).
    pub ping_interval: Duration,
    /// Height poll interval (pool policy only).
    pub height_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8323,
            connect_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_secs(5),
            ping_interval: Duration::from_secs(10),
            height_interval: Duration::from_secs(2),
        }
    }
}

type LlpFramed = Framed<TcpStream, LlpCodec>;

/// Drives one session policy over a reconnecting TCP connection.
pub struct ConnectionManager<P: MiningProtocol> {
    config: ConnectionConfig,
    protocol: P,
    solution_rx: mpsc::Receiver<(WorkerId, SolvedBlock)>,
    solutions_closed: bool,
    stats: Arc<Collector>,
}

impl<P: MiningProtocol> ConnectionManager<P> {
    /// Create a manager around a session policy and the worker solution
    /// channel.
    pub fn new(
        config: ConnectionConfig,
        protocol: P,
        solution_rx: mpsc::Receiver<(WorkerId, SolvedBlock)>,
        stats: Arc<Collector>,
    ) -> Self {
        Self {
            config,
            protocol,
            solution_rx,
            solutions_closed: false,
            stats,
        }
    }

    /// Access the session policy, for wiring the feed handler before `run`.
    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    /// Dial, run the session, reconnect on failure. Runs until the task is
    /// cancelled.
    pub async fn run(mut self) {
        loop {
            let endpoint = format!("{}:{}", self.config.host, self.config.port);
            info!(%endpoint, "Connecting to node");

            let stream = match tokio::time::timeout(
                self.config.connect_timeout,
                TcpStream::connect(&endpoint),
            )
            .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    warn!(%endpoint, error = %e, "Connection failed");
                    self.retry().await;
                    continue;
                }
                Err(_) => {
                    warn!(%endpoint, "Connection timed out");
                    self.retry().await;
                    continue;
                }
            };

            let peer = match stream.peer_addr() {
                Ok(peer) => peer,
                Err(e) => {
                    warn!(error = %e, "Peer address unavailable");
                    self.retry().await;
                    continue;
                }
            };
            info!(%peer, "Connected");
            let mut framed = Framed::new(stream, LlpCodec);

            let opening = match self.protocol.on_connect(peer) {
                Ok(packets) => packets,
                Err(e) => {
                    error!(error = %e, "Session open failed");
                    drop(framed);
                    self.reset_and_retry().await;
                    continue;
                }
            };
            if let Err(reason) = self.transmit(&mut framed, opening).await {
                warn!(reason, "Write failed during session open");
                drop(framed);
                self.reset_and_retry().await;
                continue;
            }

            let reason = self.drive(&mut framed, peer).await;
            info!(reason, "Disconnected from node");
            // Close the socket before arming the retry timer.
            drop(framed);
            self.reset_and_retry().await;
        }
    }

    /// Pump the session until the connection dies. Returns the reason.
    async fn drive(&mut self, framed: &mut LlpFramed, peer: SocketAddr) -> String {
        let mut ping = tokio::time::interval(self.config.ping_interval);
        let mut height = tokio::time::interval(self.config.height_interval);
        // Intervals fire immediately on creation; the opening packets
        // already covered that.
        ping.tick().await;
        height.tick().await;

        loop {
            tokio::select! {
                frame = framed.next() => match frame {
                    Some(Ok(packet)) => {
                        debug!(
                            opcode = packet.opcode,
                            name = packet.name(),
                            len = packet.payload.len(),
                            payload = %packet.preview(),
                            "<- packet"
                        );
                        match self.protocol.handle_packet(&packet, peer) {
                            Ok(replies) => {
                                if let Err(reason) = self.transmit(framed, replies).await {
                                    return reason;
                                }
                            }
                            Err(e) => return format!("session error: {e}"),
                        }
                    }
                    Some(Err(e)) => return format!("receive error: {e}"),
                    None => return "connection closed by node".to_string(),
                },

                solution = self.solution_rx.recv(), if !self.solutions_closed => {
                    match solution {
                        Some((worker, solved)) => {
                            match self.protocol.handle_solution(worker, &solved) {
                                Ok(replies) => {
                                    if let Err(reason) = self.transmit(framed, replies).await {
                                        return reason;
                                    }
                                }
                                Err(e) => return format!("submission error: {e}"),
                            }
                        }
                        None => {
                            warn!("Solution channel closed; no more workers");
                            self.solutions_closed = true;
                        }
                    }
                },

                _ = ping.tick(), if self.protocol.uses_ping_timer() => {
                    if let Err(reason) = self
                        .transmit(framed, vec![Packet::request(opcodes::PING)])
                        .await
                    {
                        return reason;
                    }
                },

                _ = height.tick(), if self.protocol.uses_height_timer() => {
                    if let Err(reason) = self
                        .transmit(framed, vec![Packet::request(opcodes::GET_HEIGHT)])
                        .await
                    {
                        return reason;
                    }
                },
            }
        }
    }

    /// Write packets in order, one at a time.
    async fn transmit(&mut self, framed: &mut LlpFramed, packets: Vec<Packet>) -> Result<(), String> {
        for packet in packets {
            debug!(
                opcode = packet.opcode,
                name = packet.name(),
                len = packet.payload.len(),
                payload = %packet.preview(),
                "-> packet"
            );
            framed
                .send(packet)
                .await
                .map_err(|e| format!("write error: {e}"))?;
        }
        Ok(())
    }

    async fn retry(&self) {
        self.stats.connection_retry();
        info!(
            seconds = self.config.retry_interval.as_secs(),
            "Reconnect timer armed"
        );
        tokio::time::sleep(self.config.retry_interval).await;
    }

    async fn reset_and_retry(&mut self) {
        self.protocol.reset();
        self.retry().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SoloProtocol;
    use nexus_crypto::{FalconSigner, MinerKeyPair};
    use nexus_llp::CHANNEL_HASH;
    use tokio::net::TcpListener;

    fn test_config(port: u16) -> ConnectionConfig {
        ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(100),
            ..Default::default()
        }
    }

    /// End-to-end handshake against an in-process fake node.
    #[tokio::test]
    async fn test_handshake_reaches_get_block() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let node = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, LlpCodec);

            // Expect the credential packet.
            let auth = framed.next().await.unwrap().unwrap();
            assert_eq!(auth.opcode, opcodes::AUTH_RESPONSE);
            let pubkey_len =
                u16::from_le_bytes([auth.payload[0], auth.payload[1]]) as usize;
            assert_eq!(pubkey_len, 897);

            // Grant the session.
            framed
                .send(Packet::data(
                    opcodes::AUTH_RESULT,
                    vec![0x01, 0x10, 0x20, 0x30, 0x40],
                ))
                .await
                .unwrap();

            let set_channel = framed.next().await.unwrap().unwrap();
            assert_eq!(set_channel.opcode, opcodes::SET_CHANNEL);
            assert_eq!(set_channel.payload.as_ref(), &[0x02]);

            framed
                .send(Packet::data(opcodes::CHANNEL_ACK, vec![0x02]))
                .await
                .unwrap();

            let get_block = framed.next().await.unwrap().unwrap();
            assert_eq!(get_block.opcode, opcodes::GET_BLOCK);
        });

        let stats = Arc::new(Collector::new(0));
        let signer = Arc::new(FalconSigner::new(MinerKeyPair::generate()));
        let protocol = SoloProtocol::new(
            CHANNEL_HASH,
            "127.0.0.1".to_string(),
            signer,
            Arc::clone(&stats),
        );
        let (_solution_tx, solution_rx) = mpsc::channel(4);
        let manager =
            ConnectionManager::new(test_config(port), protocol, solution_rx, stats);
        let miner = tokio::spawn(manager.run());

        tokio::time::timeout(Duration::from_secs(10), node)
            .await
            .expect("handshake timed out")
            .unwrap();
        miner.abort();
    }

    /// A refused endpoint arms the reconnect timer and counts retries.
    #[tokio::test]
    async fn test_connect_failure_counts_retries() {
        // Grab a port and close it again so the dial is refused.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let stats = Arc::new(Collector::new(0));
        let signer = Arc::new(FalconSigner::new(MinerKeyPair::generate()));
        let protocol = SoloProtocol::new(
            CHANNEL_HASH,
            "127.0.0.1".to_string(),
            signer,
            Arc::clone(&stats),
        );
        let (_solution_tx, solution_rx) = mpsc::channel(4);
        let manager = ConnectionManager::new(
            test_config(port),
            protocol,
            solution_rx,
            Arc::clone(&stats),
        );
        let miner = tokio::spawn(manager.run());

        tokio::time::sleep(Duration::from_millis(450)).await;
        miner.abort();
        assert!(stats.global().connection_retries >= 2);
    }
}
