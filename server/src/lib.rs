//! # Snake Game Server Library
//!
//! This library provides the authoritative server implementation for the
//! multiplayer snake game. It owns the canonical grid state, advances the
//! simulation on a fixed tick, and broadcasts the resulting state to every
//! connected client over UDP.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The server makes every game decision itself: spawn placement, movement,
//! collision elimination and capacity admission. Clients only submit steering
//! input and render whatever state the server broadcasts; nothing a client
//! sends is trusted beyond the session id its join was acked with.
//!
//! ### Session Management
//! Handles the complete lifecycle of player sessions:
//! - Admission with a fixed capacity and a FIFO waiting queue
//! - Steering input and activity tracking
//! - Explicit leaves and AFK timeout eviction
//! - Promotion of waiting peers into freed slots
//!
//! ### State Broadcasting
//! Once per tick the full game state is serialized once and sent to every
//! registered player. The protocol is fire-and-forget: a lost broadcast is
//! simply superseded by the next one, 100 ms later.
//!
//! ## Architecture Design
//!
//! ### Single Lock, Two Writers
//! Two execution contexts mutate the game state for the lifetime of the
//! process: the receive path (join/steer/leave datagrams) and the tick path
//! (movement, collisions, broadcast). Both go through one `RwLock` around
//! the single [`game::GameState`] aggregate. Broadcast payloads are encoded
//! while the lock is held and sent after it is released, so an unreachable
//! peer cannot stall the simulation for everyone else.
//!
//! ### UDP-Based Communication
//! All traffic is single-datagram packets with a hand-framed binary layout
//! (see the `shared` crate). Datagrams that fail validation are dropped
//! without a response; retrying is the client's job.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! The session registry: per-player records, admission control, the waiting
//! queue, spawn placement and AFK detection.
//!
//! ### Game Module (`game`)
//! The authoritative state aggregate and the simulation step: two-pass
//! move-then-collide, elimination, round reset and broadcast assembly.
//!
//! ### Network Module (`network`)
//! UDP socket handling, the receiver/sender tasks, the AFK reaper and the
//! main `tokio::select!` loop that serializes everything onto the state
//! lock.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Bind a server with a 100ms tick, 3 player slots and a 20s AFK limit
//!     let mut server = Server::new(
//!         "127.0.0.1:1337",
//!         Duration::from_millis(100),
//!         3,
//!         Duration::from_secs(20),
//!     )
//!     .await?;
//!
//!     // Runs the receive loop, tick loop and AFK reaper until shutdown
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod network;
pub mod session;
