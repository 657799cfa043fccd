//! Server network layer handling UDP communications and game loop coordination

use crate::game::{GameState, JoinOutcome, Removal};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::Packet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    SessionIdle {
        session_id: u32,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the main loop to the network sender task
#[derive(Debug)]
pub enum GameMessage {
    Send {
        payload: Vec<u8>,
        addr: SocketAddr,
    },
    Broadcast {
        payload: Vec<u8>,
        addrs: Vec<SocketAddr>,
    },
}

/// Milliseconds since the Unix epoch, the timestamp stamped on broadcasts.
fn unix_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    millis.min(u128::from(u64::MAX)) as u64
}

/// Main server coordinating networking and the simulation loop.
///
/// The receive path and the tick path both mutate the single [`GameState`]
/// behind one lock; outbound payloads are copied out while the lock is held
/// and handed to the sender task, so a slow peer never stalls a tick.
pub struct Server {
    socket: Arc<UdpSocket>,
    state: Arc<RwLock<GameState>>,
    tick_duration: Duration,
    afk_timeout: Duration,
    rng: StdRng,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_players: usize,
        afk_timeout: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            state: Arc::new(RwLock::new(GameState::new(max_players))),
            tick_duration,
            afk_timeout,
            rng: StdRng::from_entropy(),
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    /// The address the socket is actually bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match Packet::decode(&buffer[0..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Dropping malformed datagram from {}: {}", addr, e);
                        }
                    },
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue. Send errors are
    /// logged per peer and never interrupt the remaining recipients.
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::Send { payload, addr } => {
                        if let Err(e) = socket.send_to(&payload, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::Broadcast { payload, addrs } => {
                        for addr in addrs {
                            if let Err(e) = socket.send_to(&payload, addr).await {
                                error!("Failed to broadcast to {}: {}", addr, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns the AFK reaper: scans for idle sessions on a slow interval and
    /// routes each candidate through the main loop for eviction.
    fn spawn_afk_checker(&self) {
        let state = Arc::clone(&self.state);
        let server_tx = self.server_tx.clone();
        let afk_timeout = self.afk_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let idle = {
                    let state_guard = state.read().await;
                    state_guard.idle_sessions(afk_timeout)
                };

                for session_id in idle {
                    if let Err(e) = server_tx.send(ServerMessage::SessionIdle { session_id }) {
                        error!("Failed to send idle notice: {}", e);
                        break;
                    }
                }
            }
        });
    }

    /// Queues one packet for a single peer.
    fn queue_send(&self, packet: &Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::Send {
            payload: packet.encode(),
            addr,
        }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Queues an already-encoded payload for a list of peers.
    fn queue_broadcast(&self, payload: Vec<u8>, addrs: Vec<SocketAddr>) {
        if let Err(e) = self.game_tx.send(GameMessage::Broadcast { payload, addrs }) {
            error!("Failed to queue broadcast: {}", e);
        }
    }

    /// Acks every peer promoted out of the waiting queue like a fresh join.
    fn ack_promotions(&self, removal: &Removal) {
        for (session_id, addr) in &removal.promoted {
            self.queue_send(
                &Packet::JoinAck {
                    session_id: *session_id,
                },
                *addr,
            );
        }
    }

    /// Processes one decoded inbound packet and updates the game state
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Join => {
                let outcome = {
                    let mut state = self.state.write().await;
                    state.join(addr, &mut self.rng)
                };

                match outcome {
                    JoinOutcome::Admitted(session_id) | JoinOutcome::Rejoined(session_id) => {
                        self.queue_send(&Packet::JoinAck { session_id }, addr);
                    }
                    JoinOutcome::Queued => {
                        // No response; the peer keeps retrying its join and
                        // is acked once a slot frees up
                    }
                }
            }

            Packet::PlayerState {
                session_id,
                direction,
                timestamp: _,
            } => {
                let applied = {
                    let mut state = self.state.write().await;
                    state.steer(session_id, addr, direction)
                };

                if !applied {
                    debug!(
                        "Ignoring state update from {} for session {}",
                        addr, session_id
                    );
                }
            }

            Packet::Leave { session_id } => {
                let removal = {
                    let mut state = self.state.write().await;
                    state.leave(session_id, addr, &mut self.rng)
                };

                if let Some(removal) = removal {
                    info!("Session {} left from {}", session_id, addr);
                    self.queue_send(&Packet::LeaveAck, addr);
                    self.ack_promotions(&removal);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Evicts a session flagged by the reaper, re-checking idleness under
    /// the write lock; the peer may have spoken up since the scan.
    async fn handle_session_idle(&mut self, session_id: u32) {
        let removal = {
            let mut state = self.state.write().await;
            state.remove_if_idle(session_id, self.afk_timeout, &mut self.rng)
        };

        if let Some(removal) = removal {
            self.ack_promotions(&removal);
        }
    }

    /// Runs one simulation step and fans out the resulting broadcast.
    async fn run_tick(&mut self) {
        let outcome = {
            let mut state = self.state.write().await;
            state.tick(&mut self.rng, unix_millis())
        };

        if let Some((payload, addrs)) = outcome.broadcast {
            self.queue_broadcast(payload, addrs);
        }
        self.ack_promotions(&Removal {
            promoted: outcome.promoted,
        });

        // Periodic statistics
        if outcome.tick % 100 == 0 {
            let (players, waiting) = {
                let state = self.state.read().await;
                (state.sessions.len(), state.sessions.waiting_len())
            };
            if players > 0 {
                debug!(
                    "Tick {}: {} session(s), {} waiting",
                    outcome.tick, players, waiting
                );
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_afk_checker();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::SessionIdle { session_id }) => {
                            self.handle_session_idle(session_id).await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Handle simulation tick events
                _ = tick_interval.tick() => {
                    self.run_tick().await;
                },
            }
        }

        Ok(())
    }
}
