//! OgarX arena server core.
//!
//! The [`engine::Engine`] owns the world: a fixed-capacity [`arena::CellArena`],
//! the [`spatial::QuadTree`] over it and the controller roster. The
//! [`visibility`] module turns each tick into per-connection deltas and the
//! [`server`] module puts a WebSocket listener in front of both.

pub mod arena;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod resolver;
pub mod server;
pub mod spatial;
pub mod visibility;

pub use config::Config;
pub use engine::{Engine, EngineEvent};
pub use error::Error;
pub use server::{run, GameState};
