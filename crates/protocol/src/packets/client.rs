//! Client -> Server packet parsing.

use super::{ClientOpcode, HANDSHAKE_KEY, HANDSHAKE_MAGIC};
use crate::{BinaryReader, Position, ProtocolError};

/// The first message of every connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Handshake {
    /// Newer clients send their name and skin with the handshake.
    pub name: Option<String>,
    pub skin: Option<String>,
}

impl Handshake {
    /// Parse `u8 69, i16 420` optionally followed by `utf16z name, utf16z skin`.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = BinaryReader::new(data);
        let magic = reader.get_u8().map_err(|_| ProtocolError::InvalidHandshake)?;
        let key = reader.get_i16().map_err(|_| ProtocolError::InvalidHandshake)?;
        if magic != HANDSHAKE_MAGIC || key != HANDSHAKE_KEY {
            return Err(ProtocolError::InvalidHandshake);
        }
        if reader.remaining() == 0 {
            return Ok(Self::default());
        }
        let name = reader.get_string_utf16()?;
        let skin = reader.get_string_utf16()?;
        Ok(Self {
            name: Some(name),
            skin: Some(skin),
        })
    }
}

/// Key presses and toggles carried by an extended input packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputKeys {
    pub spectate: bool,
    pub splits: u8,
    pub ejects: u8,
    pub macro_eject: bool,
    pub line_lock: bool,
}

/// Parsed client packet.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    /// Spawn (1) with name and skin.
    Spawn { name: String, skin: String },
    /// Spectate (2).
    Spectate,
    /// Mouse position (3), with key state from newer clients.
    Input {
        mouse: Position,
        keys: Option<InputKeys>,
    },
    /// Respawn (7).
    Respawn,
    /// Chat message (10).
    Chat { message: String },
    /// Ping (69).
    Ping,
}

impl ClientPacket {
    /// Parse a client packet from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = BinaryReader::new(data);
        let opcode = reader.get_u8()?;

        match opcode {
            op if op == ClientOpcode::Spawn as u8 => {
                let name = reader.get_string_utf16()?;
                let skin = reader.get_string_utf16()?;
                Ok(ClientPacket::Spawn { name, skin })
            }
            op if op == ClientOpcode::Spectate as u8 => Ok(ClientPacket::Spectate),
            op if op == ClientOpcode::Input as u8 => {
                let x = reader.get_f32()?;
                let y = reader.get_f32()?;
                if !x.is_finite() || !y.is_finite() {
                    return Err(ProtocolError::Malformed("mouse position is not finite"));
                }
                let keys = match reader.remaining() {
                    0 => None,
                    5 => Some(InputKeys {
                        spectate: reader.get_u8()? != 0,
                        splits: reader.get_u8()?,
                        ejects: reader.get_u8()?,
                        macro_eject: reader.get_u8()? != 0,
                        line_lock: reader.get_u8()? != 0,
                    }),
                    _ => return Err(ProtocolError::Malformed("input packet has a bad length")),
                };
                Ok(ClientPacket::Input {
                    mouse: Position::new(x, y),
                    keys,
                })
            }
            op if op == ClientOpcode::Respawn as u8 => Ok(ClientPacket::Respawn),
            op if op == ClientOpcode::Chat as u8 => {
                let message = reader.get_string_utf16()?;
                Ok(ClientPacket::Chat { message })
            }
            op if op == ClientOpcode::Ping as u8 => Ok(ClientPacket::Ping),
            _ => Err(ProtocolError::InvalidOpcode(opcode)),
        }
    }
}
