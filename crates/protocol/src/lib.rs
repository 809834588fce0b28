//! Wire protocol crate for the OgarX arena server.
//!
//! This crate contains:
//! - Little-endian binary reading/writing utilities
//! - Client packet parsing and server packet builders
//! - Cell type tags shared by both ends of the connection

mod binary;
mod error;
pub mod packets;

pub use binary::{BinaryReader, BinaryWriter, PAGE_SIZE};
pub use error::ProtocolError;

/// A 2D world position.
pub type Position = glam::Vec2;

/// Cell type tags as they appear on the wire. Values 1..=250 are player ids.
pub mod cell_type {
    pub const DEAD: u8 = 251;
    pub const MOTHER: u8 = 252;
    pub const VIRUS: u8 = 253;
    pub const PELLET: u8 = 254;
    pub const EJECTED: u8 = 255;
}
