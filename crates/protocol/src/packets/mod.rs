//! Packet definitions for the OgarX protocol.
//!
//! This module contains both client->server and server->client packet types.

pub mod client;
pub mod server;

pub use client::*;
pub use server::*;

/// Opcodes for client -> server packets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOpcode {
    /// Spawn with name and skin.
    Spawn = 1,
    /// Spectate request (only honoured while dead).
    Spectate = 2,
    /// Mouse position plus queued key presses.
    Input = 3,
    /// Respawn request sent by auto-respawn.
    Respawn = 7,
    /// Chat message.
    Chat = 10,
    /// Latency probe.
    Ping = 69,
}

/// Opcodes for server -> client packets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOpcode {
    /// Player id and map extents.
    Init = 1,
    /// Drop every cell the client knows about.
    Clear = 2,
    /// Name and skin for a player id.
    PlayerInfo = 3,
    /// Added/updated/eaten/deleted cells in the viewport.
    VisibilityDelta = 4,
    /// Top players by score.
    Leaderboard = 5,
    /// Every alive player's position and score.
    Minimap = 6,
    /// End-of-life statistics.
    Stats = 7,
    /// Ping reply.
    Pong = 69,
}

/// First byte of the handshake message.
pub const HANDSHAKE_MAGIC: u8 = 69;
/// Protocol key following the magic byte.
pub const HANDSHAKE_KEY: i16 = 420;
