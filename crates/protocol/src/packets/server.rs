//! Server -> Client packet building.

use super::ServerOpcode;
use crate::{BinaryWriter, Position};

/// Build the Init packet (1): player id and map half extents.
pub fn build_init(pid: u16, map_hw: u16, map_hh: u16) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(7);
    w.put_u8(ServerOpcode::Init as u8);
    w.put_u16(pid);
    w.put_u16(map_hw);
    w.put_u16(map_hh);
    w
}

/// Build a Clear packet (2).
pub fn build_clear() -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(1);
    w.put_u8(ServerOpcode::Clear as u8);
    w
}

/// Build a PlayerInfo packet (3).
pub fn build_player_info(id: u16, name: &str, skin: &str) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(3 + 2 * (name.len() + skin.len() + 2));
    w.put_u8(ServerOpcode::PlayerInfo as u8);
    w.put_u16(id);
    w.put_string_utf16(name);
    w.put_string_utf16(skin);
    w
}

/// Build a Leaderboard packet (5). `rank` is the receiver's 0-based place.
pub fn build_leaderboard(rank: Option<usize>, pids: &[u8]) -> BinaryWriter {
    let count = pids.len().min(u8::MAX as usize);
    let mut w = BinaryWriter::with_capacity(4 + count);
    w.put_u8(ServerOpcode::Leaderboard as u8);
    w.put_i16(rank.map_or(-1, |r| r.min(i16::MAX as usize) as i16));
    w.put_u8(count as u8);
    for &pid in &pids[..count] {
        w.put_u8(pid);
    }
    w
}

/// One alive player on the minimap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimapEntry {
    pub pid: u8,
    pub position: Position,
    pub score: f32,
}

/// Build a Minimap packet (6).
pub fn build_minimap(entries: &[MinimapEntry]) -> BinaryWriter {
    let count = entries.len().min(u8::MAX as usize);
    let mut w = BinaryWriter::with_capacity(2 + count * 13);
    w.put_u8(ServerOpcode::Minimap as u8);
    w.put_u8(count as u8);
    for entry in &entries[..count] {
        w.put_u8(entry.pid);
        w.put_f32(entry.position.x);
        w.put_f32(entry.position.y);
        w.put_f32(entry.score);
    }
    w
}

/// Build a Stats packet (7), sent when a player loses its last cell.
pub fn build_stats(kills: u32, score: f32, survive_secs: f32) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(13);
    w.put_u8(ServerOpcode::Stats as u8);
    w.put_u32(kills);
    w.put_f32(score);
    w.put_f32(survive_secs);
    w
}

/// Build a Pong packet (69).
pub fn build_pong() -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(1);
    w.put_u8(ServerOpcode::Pong as u8);
    w
}

/// A cell entering the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AddedCell {
    pub id: u16,
    pub cell_type: u8,
    pub x: f32,
    pub y: f32,
    pub r: f32,
}

/// A cell still in the viewport whose geometry is resent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdatedCell {
    pub id: u16,
    pub x: f32,
    pub y: f32,
    pub r: f32,
}

/// A cell that left the viewport because something ate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EatenCell {
    pub id: u16,
    pub eaten_by: u16,
}

const DELTA_HEADER: usize = 9;
const DELTA_TERMINATORS: usize = 8;
const ADDED_RECORD: usize = 10;
const UPDATED_RECORD: usize = 8;
const EATEN_RECORD: usize = 4;
const DELETED_RECORD: usize = 2;

/// Exact encoded size of a visibility delta with the given group sizes.
pub const fn visibility_delta_size(added: usize, updated: usize, eaten: usize, deleted: usize) -> usize {
    DELTA_HEADER
        + DELTA_TERMINATORS
        + added * ADDED_RECORD
        + updated * UPDATED_RECORD
        + eaten * EATEN_RECORD
        + deleted * DELETED_RECORD
}

/// Write a VisibilityDelta packet (4) into `w`.
///
/// Groups are written in Added, Updated, Eaten, Deleted order, each closed by
/// a `u16 0`. Coordinates are truncated toward zero.
pub fn write_visibility_delta(
    w: &mut BinaryWriter,
    viewport: Position,
    added: impl IntoIterator<Item = AddedCell>,
    updated: impl IntoIterator<Item = UpdatedCell>,
    eaten: impl IntoIterator<Item = EatenCell>,
    deleted: impl IntoIterator<Item = u16>,
) {
    w.put_u8(ServerOpcode::VisibilityDelta as u8);
    w.put_f32(viewport.x);
    w.put_f32(viewport.y);

    for cell in added {
        w.put_u16(cell.id);
        w.put_u16(cell.cell_type as u16);
        w.put_i16(cell.x as i16);
        w.put_i16(cell.y as i16);
        w.put_u16(cell.r as u16);
    }
    w.put_u16(0);

    for cell in updated {
        w.put_u16(cell.id);
        w.put_i16(cell.x as i16);
        w.put_i16(cell.y as i16);
        w.put_u16(cell.r as u16);
    }
    w.put_u16(0);

    for cell in eaten {
        w.put_u16(cell.id);
        w.put_u16(cell.eaten_by);
    }
    w.put_u16(0);

    // Deleted ids go out as i16; the client reads them back bit-for-bit.
    for id in deleted {
        w.put_i16(id as i16);
    }
    w.put_u16(0);
}
