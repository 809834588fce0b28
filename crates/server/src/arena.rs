//! Fixed-capacity cell storage.
//!
//! Every cell in the world lives in one slot of [`CellArena`]. Slot 0 is
//! never handed out so that id 0 can mean "nobody" on the wire and in
//! `eaten_by`.

use glam::Vec2;
use protocol::cell_type;
use std::ops::{BitOr, BitOrAssign, Index, IndexMut};
use tracing::{debug, warn};

/// Cell id: index of the slot in the arena.
pub type CellId = u16;

/// Lifecycle and per-tick bits of a cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CellFlags(u8);

impl CellFlags {
    pub const NONE: Self = Self(0);
    /// Slot holds a live cell.
    pub const EXISTS: Self = Self(0x01);
    /// Geometry changed this tick and the cell needs re-indexing.
    pub const UPDATED: Self = Self(0x02);
    /// Fully covered by a sibling during a bounce.
    pub const INSIDE: Self = Self(0x04);
    /// Movement is locked to the owner's line.
    pub const LOCKED: Self = Self(0x08);
    /// Grew past the autosplit size and waits for the autosplit delay.
    pub const AUTO: Self = Self(0x10);
    /// Removed this tick; the slot is freed on the next tick.
    pub const REMOVE: Self = Self(0x20);
    /// Old enough to merge with same-owner cells.
    pub const MERGE: Self = Self(0x40);
    /// Pops (virus rupture or player explosion) after resolution.
    pub const POP: Self = Self(0x80);

    /// Cells carrying any of these bits take no part in resolution.
    pub const SKIP_RESOLVE: Self = Self(0x04 | 0x20 | 0x80);
    /// Bits that survive the start-of-tick reset.
    pub const PERSISTENT: Self = Self(0x01 | 0x10);

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    #[inline]
    pub fn retain(&mut self, keep: Self) {
        self.0 &= keep.0;
    }
}

impl BitOr for CellFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CellFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// What a cell is, decoded from its type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    /// Owned by the controller with this id (1..=250).
    Player(u8),
    /// Husk left behind by a respawning player.
    Dead,
    Mother,
    Virus,
    Pellet,
    Ejected,
}

impl CellKind {
    /// Highest controller id a player cell can carry.
    pub const MAX_PLAYER: u8 = 250;

    /// Decode a type byte. 0 is not a valid cell type.
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => None,
            1..=250 => Some(Self::Player(raw)),
            cell_type::DEAD => Some(Self::Dead),
            cell_type::MOTHER => Some(Self::Mother),
            cell_type::VIRUS => Some(Self::Virus),
            cell_type::PELLET => Some(Self::Pellet),
            cell_type::EJECTED => Some(Self::Ejected),
        }
    }

    pub const fn raw(self) -> u8 {
        match self {
            Self::Player(owner) => owner,
            Self::Dead => cell_type::DEAD,
            Self::Mother => cell_type::MOTHER,
            Self::Virus => cell_type::VIRUS,
            Self::Pellet => cell_type::PELLET,
            Self::Ejected => cell_type::EJECTED,
        }
    }
}

/// Residual launch velocity: a unit direction and a magnitude that decays.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Boost {
    pub x: f32,
    pub y: f32,
    pub d: f32,
}

impl Boost {
    pub const NONE: Self = Self { x: 0.0, y: 0.0, d: 0.0 };

    pub fn new(dir: Vec2, d: f32) -> Self {
        Self { x: dir.x, y: dir.y, d }
    }

    #[inline]
    pub fn dir(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    /// Still travelling under its own momentum.
    #[inline]
    pub fn active(&self) -> bool {
        self.d > 1.0
    }
}

/// One arena slot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cell {
    pub x: f32,
    pub y: f32,
    pub r: f32,
    /// Raw type byte, see [`CellKind`].
    pub cell_type: u8,
    pub flags: CellFlags,
    /// Cell that ate this one; only meaningful while REMOVE is set.
    pub eaten_by: CellId,
    /// Ticks since creation.
    pub age: u32,
    pub boost: Boost,
}

impl Cell {
    #[inline]
    pub fn exists(&self) -> bool {
        self.flags.contains(CellFlags::EXISTS)
    }

    #[inline]
    pub fn kind(&self) -> Option<CellKind> {
        CellKind::from_raw(self.cell_type)
    }

    /// Owning controller id for player cells.
    #[inline]
    pub fn owner(&self) -> Option<u8> {
        match self.kind() {
            Some(CellKind::Player(owner)) => Some(owner),
            _ => None,
        }
    }

    #[inline]
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    #[inline]
    pub fn set_position(&mut self, p: Vec2) {
        self.x = p.x;
        self.y = p.y;
    }

    /// Mass in score units.
    #[inline]
    pub fn mass(&self) -> f32 {
        self.r * self.r / 100.0
    }
}

/// Fixed-capacity record store with a rotating allocation cursor.
pub struct CellArena {
    cells: Vec<Cell>,
    cursor: usize,
    live: usize,
    /// Set after a failed allocation so exhaustion is logged once per episode.
    exhausted: bool,
}

impl CellArena {
    /// Create an arena with `capacity` slots (at most 65536, slot 0 reserved).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(2, CellId::MAX as usize + 1);
        Self {
            cells: vec![Cell::default(); capacity],
            cursor: 1,
            live: 0,
            exhausted: false,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Number of slots with EXISTS set.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.live >= self.capacity() - 1
    }

    /// Store a new cell and return its id, or `None` when the arena is full.
    pub fn allocate(&mut self, x: f32, y: f32, r: f32, cell_type: u8, boost: Boost) -> Option<CellId> {
        if self.is_full() {
            if !self.exhausted {
                warn!("Cell limit reached ({} live), dropping new cells", self.live);
                self.exhausted = true;
            }
            return None;
        }

        let capacity = self.capacity();
        loop {
            let id = self.cursor;
            self.cursor = (self.cursor + 1) % capacity;
            if id == 0 || self.cells[id].exists() {
                continue;
            }
            self.cells[id] = Cell {
                x,
                y,
                r,
                cell_type,
                flags: CellFlags::EXISTS,
                eaten_by: 0,
                age: 0,
                boost,
            };
            self.live += 1;
            return Some(id as CellId);
        }
    }

    /// Release a slot. Freeing an empty slot is a no-op.
    pub fn free(&mut self, id: CellId) {
        let Some(cell) = self.cells.get_mut(id as usize) else {
            return;
        };
        if !cell.exists() {
            debug!("Freeing cell #{} that does not exist", id);
            return;
        }
        *cell = Cell::default();
        self.live -= 1;
        self.exhausted = false;
    }

    #[inline]
    pub fn get(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(id as usize).filter(|c| c.exists())
    }

    #[inline]
    pub fn get_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells.get_mut(id as usize).filter(|c| c.exists())
    }

    /// Iterate live cells in id order.
    pub fn iter(&self) -> impl Iterator<Item = (CellId, &Cell)> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.exists())
            .map(|(i, c)| (i as CellId, c))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (CellId, &mut Cell)> {
        self.cells
            .iter_mut()
            .enumerate()
            .filter(|(_, c)| c.exists())
            .map(|(i, c)| (i as CellId, c))
    }

    /// Drop every cell and rewind the cursor.
    pub fn clear(&mut self) {
        self.cells.fill(Cell::default());
        self.cursor = 1;
        self.live = 0;
        self.exhausted = false;
    }
}

impl Index<CellId> for CellArena {
    type Output = Cell;

    #[inline]
    fn index(&self, id: CellId) -> &Cell {
        &self.cells[id as usize]
    }
}

impl IndexMut<CellId> for CellArena {
    #[inline]
    fn index_mut(&mut self, id: CellId) -> &mut Cell {
        &mut self.cells[id as usize]
    }
}

impl std::fmt::Debug for CellArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellArena")
            .field("live", &self.live)
            .field("capacity", &self.capacity())
            .field("cursor", &self.cursor)
            .finish()
    }
}
