//! Connection admission errors.

use protocol::ProtocolError;
use thiserror::Error;

/// Why a connection was refused or closed by the server.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Server full")]
    ServerFull,
    #[error("Scratch pool exhausted")]
    PoolExhausted,
    #[error(transparent)]
    Handshake(#[from] ProtocolError),
}

impl Error {
    /// WebSocket close code sent to the peer.
    pub fn close_code(&self) -> u16 {
        match self {
            Error::ServerFull | Error::PoolExhausted => 1013,
            Error::Handshake(_) => 1003,
        }
    }
}
