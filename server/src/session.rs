//! Player session management and admission control for the snake server
//!
//! This module handles the server-side lifecycle of player sessions:
//! - Admission with capacity enforcement and a FIFO waiting queue
//! - Spawn placement on an unoccupied grid cell
//! - Steering updates and activity tracking
//! - AFK detection and eviction
//! - Promotion of queued peers when a slot frees up
//!
//! The registry is the only owner of session records; the simulation engine
//! mutates them through it and the coordinator serializes all access behind
//! one lock.

use log::info;
use rand::Rng;
use shared::{occupied_cells, Direction, Point, GRID_HEIGHT, GRID_WIDTH};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Server-side record of one connected player.
///
/// The session is keyed by an id independent of the transport address; the
/// address is retained for response routing and for verifying that control
/// packets come from the peer that owns the session.
#[derive(Debug)]
pub struct Session {
    /// Unique session identifier assigned on admission
    pub id: u32,
    /// Network address the join came from
    pub addr: SocketAddr,
    /// Current steering direction; `None` until the first state update
    pub direction: Direction,
    /// Body cells, head first; never empty
    pub segments: Vec<Point>,
    /// Last time any packet arrived from this peer
    pub last_active: Instant,
    /// Cleared when the snake collides; the body stays on the grid for the
    /// collision pass of the tick that eliminated it
    pub alive: bool,
}

impl Session {
    /// Creates a session spawned as a single-segment snake on `spawn`,
    /// pointing `Direction::None` and marked recently active.
    pub fn new(id: u32, addr: SocketAddr, spawn: Point) -> Self {
        Self {
            id,
            addr,
            direction: Direction::None,
            segments: vec![spawn],
            last_active: Instant::now(),
            alive: true,
        }
    }

    /// The cell the head currently occupies.
    pub fn head(&self) -> Option<Point> {
        self.segments.first().copied()
    }

    /// Moves the snake one cell in its steering direction, wrapping at the
    /// grid edges. Body length is constant: new head in front, tail dropped.
    /// A snake pointing `Direction::None` does not move at all.
    pub fn advance(&mut self, width: u8, height: u8) {
        if self.direction == Direction::None {
            return;
        }
        let Some(head) = self.head() else {
            return;
        };
        let new_head = head.stepped(self.direction, width, height);
        self.segments.insert(0, new_head);
        self.segments.pop();
    }

    /// Marks the session as active now.
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// True when no packet has arrived from this peer within `timeout`.
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_active.elapsed() > timeout
    }
}

/// Result of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A session was created under this id
    Admitted(u32),
    /// Server is at capacity; the peer waits in the queue
    Queued,
}

/// Owns every session plus the waiting queue and enforces the capacity
/// invariant: the session count never exceeds capacity, surplus joiners
/// queue in FIFO order and are promoted as slots free up.
///
/// Session ids come from a monotonic counter starting at 1 that resets only
/// when the whole round resets, so ids are never reused within a round.
pub struct SessionRegistry {
    /// Live sessions indexed by their unique id
    sessions: HashMap<u32, Session>,
    /// Peers waiting for a free slot, oldest first
    waiting: VecDeque<SocketAddr>,
    /// Next id to assign
    next_session_id: u32,
    /// Maximum number of concurrent sessions
    capacity: usize,
}

impl SessionRegistry {
    /// Creates an empty registry. Capacity must leave free cells on the
    /// grid or spawn placement could not terminate.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        assert!(capacity < usize::from(GRID_WIDTH) * usize::from(GRID_HEIGHT));
        Self {
            sessions: HashMap::new(),
            waiting: VecDeque::new(),
            next_session_id: 1,
            capacity,
        }
    }

    /// Attempts to admit a peer.
    ///
    /// Below capacity this allocates a fresh id, picks an unoccupied spawn
    /// cell and inserts a new session. At capacity the peer is appended to
    /// the waiting queue instead; a peer retrying its join while already
    /// queued keeps its single queue slot.
    pub fn admit(&mut self, addr: SocketAddr, rng: &mut impl Rng) -> Admission {
        if self.sessions.len() >= self.capacity {
            if !self.waiting.contains(&addr) {
                self.waiting.push_back(addr);
                info!(
                    "Server full, queued {} ({} waiting)",
                    addr,
                    self.waiting.len()
                );
            }
            return Admission::Queued;
        }

        let id = self.next_session_id;
        self.next_session_id += 1;

        let spawn = self.free_cell(rng);
        info!(
            "Session {} joined from {}, spawned at ({}, {})",
            id, addr, spawn.x, spawn.y
        );
        self.sessions.insert(id, Session::new(id, addr, spawn));
        Admission::Admitted(id)
    }

    /// Admits the longest-waiting peer if a slot is free, through the same
    /// path as a fresh join. Returns the new session id and the peer to ack.
    pub fn promote_waiting(&mut self, rng: &mut impl Rng) -> Option<(u32, SocketAddr)> {
        if self.sessions.len() >= self.capacity {
            return None;
        }
        let addr = self.waiting.pop_front()?;
        match self.admit(addr, rng) {
            Admission::Admitted(id) => {
                info!("Promoted {} from the waiting queue", addr);
                Some((id, addr))
            }
            Admission::Queued => None,
        }
    }

    /// Draws uniformly random cells until one is not covered by any body.
    /// The occupied set is built fresh from the current sessions; with
    /// capacity below the cell count a free cell always exists.
    fn free_cell(&self, rng: &mut impl Rng) -> Point {
        let occupied = occupied_cells(self.sessions.values().map(|s| s.segments.as_slice()));
        loop {
            let candidate = Point {
                x: rng.gen_range(0..GRID_WIDTH),
                y: rng.gen_range(0..GRID_HEIGHT),
            };
            if !occupied.contains(&candidate) {
                return candidate;
            }
        }
    }

    /// Updates a session's steering direction and activity timestamp.
    /// Unknown ids are a no-op; any direction is accepted, including a 180
    /// degree reversal into the snake's own neck.
    pub fn set_direction(&mut self, session_id: u32, direction: Direction) -> bool {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.direction = direction;
            session.touch();
            true
        } else {
            false
        }
    }

    /// Removes a session. Returns false if it was already gone. Resetting
    /// the round after the last removal is the coordinator's job.
    pub fn remove(&mut self, session_id: u32) -> bool {
        if let Some(session) = self.sessions.remove(&session_id) {
            info!("Session {} removed", session.id);
            true
        } else {
            false
        }
    }

    /// Clears the round: fresh id counter and an empty waiting queue.
    pub fn reset(&mut self) {
        self.sessions.clear();
        self.waiting.clear();
        self.next_session_id = 1;
    }

    /// Ids of every session idle longer than `timeout`.
    pub fn idle_sessions(&self, timeout: Duration) -> Vec<u32> {
        self.sessions
            .values()
            .filter(|session| session.is_idle(timeout))
            .map(|session| session.id)
            .collect()
    }

    /// True when the given session exists and is idle longer than `timeout`.
    pub fn is_idle(&self, session_id: u32, timeout: Duration) -> bool {
        self.sessions
            .get(&session_id)
            .map(|session| session.is_idle(timeout))
            .unwrap_or(false)
    }

    /// Finds the session owned by a network address.
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.sessions
            .iter()
            .find(|(_, session)| session.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn session(&self, session_id: u32) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    pub fn session_mut(&mut self, session_id: u32) -> Option<&mut Session> {
        self.sessions.get_mut(&session_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    /// All session ids, sorted for a stable enumeration order.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no sessions are registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of peers currently waiting for a slot
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }
}
