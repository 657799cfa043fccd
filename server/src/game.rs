use crate::session::{Admission, SessionRegistry};
use log::{debug, info};
use rand::Rng;
use shared::{Direction, Packet, PlayerSnapshot, Point, GRID_HEIGHT, GRID_WIDTH};
use std::net::SocketAddr;
use std::time::Duration;

/// How a join datagram was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Fresh session created under this id
    Admitted(u32),
    /// The peer already owns a session; its ack was lost, re-ack the id
    Rejoined(u32),
    /// At capacity, peer placed in the waiting queue
    Queued,
}

/// Follow-up work after a session was removed: peers promoted out of the
/// waiting queue, each to be acked like a fresh join.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Removal {
    pub promoted: Vec<(u32, SocketAddr)>,
}

/// Result of one simulation step.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub tick: u64,
    /// Encoded broadcast and its recipients; `None` when the grid is empty
    pub broadcast: Option<(Vec<u8>, Vec<SocketAddr>)>,
    pub promoted: Vec<(u32, SocketAddr)>,
}

/// The single authoritative game state: the session registry plus the tick
/// counter. Exactly one instance exists per process, shared between the
/// receive path and the tick path behind one lock.
pub struct GameState {
    pub sessions: SessionRegistry,
    pub ticks: u64,
}

impl GameState {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: SessionRegistry::new(capacity),
            ticks: 0,
        }
    }

    /// Resolves a join datagram. A peer that already owns a session gets its
    /// existing id back instead of a second snake; the join retry is the
    /// client's recovery path for a lost ack.
    pub fn join(&mut self, addr: SocketAddr, rng: &mut impl Rng) -> JoinOutcome {
        if let Some(id) = self.sessions.find_by_addr(addr) {
            debug!("Repeated join from {}, re-acking session {}", addr, id);
            if let Some(session) = self.sessions.session_mut(id) {
                session.touch();
            }
            return JoinOutcome::Rejoined(id);
        }
        match self.sessions.admit(addr, rng) {
            Admission::Admitted(id) => JoinOutcome::Admitted(id),
            Admission::Queued => JoinOutcome::Queued,
        }
    }

    /// Applies a steering update. The update is ignored unless the session
    /// exists and the datagram came from the address that owns it.
    pub fn steer(&mut self, session_id: u32, addr: SocketAddr, direction: Direction) -> bool {
        match self.sessions.session(session_id) {
            Some(session) if session.addr == addr => {}
            _ => return false,
        }
        self.sessions.set_direction(session_id, direction)
    }

    /// Handles an explicit leave. Returns `None` when the id is unknown or
    /// owned by a different address.
    pub fn leave(
        &mut self,
        session_id: u32,
        addr: SocketAddr,
        rng: &mut impl Rng,
    ) -> Option<Removal> {
        match self.sessions.session(session_id) {
            Some(session) if session.addr == addr => {}
            _ => return None,
        }
        self.sessions.remove(session_id);
        Some(self.after_removal(rng))
    }

    /// Evicts a session only if it is still idle past `timeout`; the session
    /// may have sent a packet between the reaper scan and this call.
    pub fn remove_if_idle(
        &mut self,
        session_id: u32,
        timeout: Duration,
        rng: &mut impl Rng,
    ) -> Option<Removal> {
        if !self.sessions.is_idle(session_id, timeout) {
            return None;
        }
        info!("Session {} timed out", session_id);
        self.sessions.remove(session_id);
        Some(self.after_removal(rng))
    }

    /// Ids of sessions past the AFK timeout, for the reaper scan.
    pub fn idle_sessions(&self, timeout: Duration) -> Vec<u32> {
        self.sessions.idle_sessions(timeout)
    }

    /// One fixed-interval simulation step.
    ///
    /// All live snakes move first; collisions are then evaluated against the
    /// post-move positions of every snake, so the outcome does not depend on
    /// enumeration order and simultaneous head-to-head collisions eliminate
    /// both snakes. The broadcast snapshot is taken while just-eliminated
    /// bodies are still on the grid; they are retired afterwards.
    pub fn tick(&mut self, rng: &mut impl Rng, timestamp: u64) -> TickOutcome {
        self.ticks += 1;

        if self.sessions.is_empty() {
            self.sessions.reset();
            return TickOutcome {
                tick: self.ticks,
                ..TickOutcome::default()
            };
        }

        // First pass: movement
        for session in self.sessions.sessions_mut() {
            if session.alive {
                session.advance(GRID_WIDTH, GRID_HEIGHT);
            }
        }

        // Second pass: every live head against the post-move snapshot of
        // every body, own head cell excepted
        let snapshot: Vec<(u32, Vec<Point>)> = self
            .sessions
            .sessions()
            .map(|session| (session.id, session.segments.clone()))
            .collect();

        let mut eliminated: Vec<u32> = Vec::new();
        for session in self.sessions.sessions() {
            if !session.alive {
                continue;
            }
            let Some(head) = session.head() else {
                continue;
            };
            'scan: for (other_id, segments) in &snapshot {
                for (index, cell) in segments.iter().enumerate() {
                    if *other_id == session.id && index == 0 {
                        continue;
                    }
                    if *cell == head {
                        eliminated.push(session.id);
                        break 'scan;
                    }
                }
            }
        }

        for id in &eliminated {
            if let Some(session) = self.sessions.session_mut(*id) {
                session.alive = false;
                info!("Session {} eliminated at tick {}", id, self.ticks);
            }
        }

        // Snapshot for the broadcast before the eliminated are retired
        let broadcast = self.broadcast_payload(timestamp);

        let mut promoted = Vec::new();
        if !eliminated.is_empty() {
            for id in &eliminated {
                self.sessions.remove(*id);
            }
            promoted = self.after_removal(rng).promoted;
        }

        TickOutcome {
            tick: self.ticks,
            broadcast: Some(broadcast),
            promoted,
        }
    }

    /// Encodes the full game state once and pairs it with the address of
    /// every registered session, in ascending session id order.
    fn broadcast_payload(&self, timestamp: u64) -> (Vec<u8>, Vec<SocketAddr>) {
        let ids = self.sessions.ids();
        let mut players = Vec::with_capacity(ids.len());
        let mut addrs = Vec::with_capacity(ids.len());

        for id in ids {
            if let Some(session) = self.sessions.session(id) {
                players.push(PlayerSnapshot {
                    direction: session.direction,
                    segments: session.segments.clone(),
                });
                addrs.push(session.addr);
            }
        }

        let packet = Packet::GameState {
            timestamp,
            grid_width: GRID_WIDTH,
            grid_height: GRID_HEIGHT,
            players,
        };
        (packet.encode(), addrs)
    }

    /// Refills free slots from the waiting queue; a queued peer takes the
    /// freed slot even when the removed session was the last one. Only a
    /// drain with nobody waiting ends the round and resets the id sequence.
    fn after_removal(&mut self, rng: &mut impl Rng) -> Removal {
        let mut promoted = Vec::new();
        while let Some(entry) = self.sessions.promote_waiting(rng) {
            promoted.push(entry);
        }
        if self.sessions.is_empty() {
            info!("Last session left, resetting round");
            self.sessions.reset();
        }
        Removal { promoted }
    }
}
