// ===============================
// src/lib.rs
// ===============================
//! Client-side synchronization core for a room-based multiplayer economy
//! game: one websocket connection per session, a tag-keyed message router,
//! and the stores it feeds (remote players, round state, pending
//! transactions, timed notifications). A UI layer reads `SessionSnapshot`s
//! and sends `Command`s; it never touches the stores directly.

pub mod config;
pub mod connection;
pub mod console;
pub mod domain;
pub mod ledger;
pub mod lobby;
pub mod metrics;
pub mod notify;
pub mod players;
pub mod recorder;
pub mod round;
pub mod router;
pub mod session;
