//! Player controllers and the fixed roster they live in.

use crate::arena::{CellId, CellKind};
use crate::spatial::Bounds;
use glam::Vec2;

/// Camera box the visibility query runs against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub hw: f32,
    pub hh: f32,
}

impl Viewport {
    /// Where a controller without cells looks.
    pub const DEFAULT: Self = Self { x: 0.0, y: 0.0, hw: 960.0, hh: 540.0 };

    pub fn bounds(&self) -> Bounds {
        Bounds::from_center(self.x, self.y, self.hw, self.hh)
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Line `a·x + b·y + c = 0` a locked cell is constrained to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineLock {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl LineLock {
    /// Line through `mouse` and `cell`, or `None` when they coincide.
    pub fn through(mouse: Vec2, cell: Vec2) -> Option<Self> {
        let a = mouse.y - cell.y;
        let b = cell.x - mouse.x;
        let c = mouse.x * cell.y - cell.x * mouse.y;
        if a == 0.0 && b == 0.0 {
            return None;
        }
        Some(Self { a, b, c })
    }

    /// Closest point on the line.
    pub fn project(&self, p: Vec2) -> Vec2 {
        let Self { a, b, c } = *self;
        let n = a * a + b * b;
        Vec2::new(
            (b * (b * p.x - a * p.y) - a * c) / n,
            (a * (-b * p.x + a * p.y) - b * c) / n,
        )
    }
}

/// One player slot: intents written by the connection, derived state written by the engine.
#[derive(Debug, Clone)]
pub struct Controller {
    pub id: u8,
    name: String,
    skin: String,
    /// Name or skin changed since the last spawn.
    pub updated: bool,
    mouse: Vec2,
    pub split_attempts: u32,
    pub eject_attempts: u32,
    pub eject_macro: bool,
    pub spawn_requested: bool,
    pub auto_respawn: bool,
    /// Follow the leaderboard leader while dead.
    pub spectate: bool,
    /// Toggle of the line lock requested this tick.
    pub lock_requested: bool,
    pub lock: Option<LineLock>,
    /// Simulated clock values in milliseconds.
    pub last_popped_ms: f64,
    pub last_eject_ms: f64,
    pub last_spawn_ms: f64,
    pub viewport: Viewport,
    /// Extent of the owned cells, edges included.
    pub cell_box: Bounds,
    pub score: f32,
    pub max_score: f32,
    pub kills: u32,
    pub survive_ms: f32,
    /// Owned cells, maintained by the engine.
    pub cells: Vec<CellId>,
    pub connected: bool,
}

impl Controller {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            name: String::new(),
            skin: String::new(),
            updated: false,
            mouse: Vec2::ZERO,
            split_attempts: 0,
            eject_attempts: 0,
            eject_macro: false,
            spawn_requested: false,
            auto_respawn: false,
            spectate: false,
            lock_requested: false,
            lock: None,
            last_popped_ms: 0.0,
            last_eject_ms: 0.0,
            last_spawn_ms: 0.0,
            viewport: Viewport::DEFAULT,
            cell_box: Bounds::default(),
            score: 0.0,
            max_score: 0.0,
            kills: 0,
            survive_ms: 0.0,
            cells: Vec::new(),
            connected: false,
        }
    }

    #[inline]
    pub fn kind(&self) -> CellKind {
        CellKind::Player(self.id)
    }

    #[inline]
    pub fn alive(&self) -> bool {
        !self.cells.is_empty()
    }

    /// Box to stream cells from, if the controller looks at anything at all.
    pub fn view(&self) -> Option<Viewport> {
        (self.alive() || self.spectate).then_some(self.viewport)
    }

    pub fn name(&self) -> &str {
        if self.name.is_empty() { "Unnamed" } else { &self.name }
    }

    pub fn skin(&self) -> &str {
        &self.skin
    }

    pub fn set_name(&mut self, name: &str, max_len: usize) {
        let name: String = name.chars().take(max_len).collect();
        if name != self.name {
            self.name = name;
            self.updated = true;
        }
    }

    pub fn set_skin(&mut self, skin: &str) {
        if skin != self.skin {
            self.skin = skin.to_string();
            self.updated = true;
        }
    }

    #[inline]
    pub fn mouse(&self) -> Vec2 {
        self.mouse
    }

    /// Ignored while the line lock holds the cursor.
    pub fn set_mouse(&mut self, mouse: Vec2) {
        if self.lock.is_none() {
            self.mouse = mouse;
        }
    }

    /// Lock onto the line through the mouse and the only owned cell.
    pub fn lock_to(&mut self, cell: Vec2) -> bool {
        match LineLock::through(self.mouse, cell) {
            Some(line) => {
                self.lock = Some(line);
                true
            }
            None => false,
        }
    }

    /// Whether a spawn request can be served at simulated time `now_ms`.
    pub fn can_spawn(&self, now_ms: f64, spawn_delay: f32) -> bool {
        let delay = spawn_delay as f64;
        (self.spawn_requested || (!self.alive() && self.auto_respawn))
            && (now_ms <= delay || now_ms >= self.last_spawn_ms + delay)
    }

    /// Reset per-life state once cells are placed.
    pub fn after_spawn(&mut self, now_ms: f64) {
        self.spectate = false;
        self.eject_attempts = 0;
        self.eject_macro = false;
        self.last_popped_ms = 0.0;
        self.last_eject_ms = 0.0;
        self.updated = false;
        self.lock = None;
        self.lock_requested = false;
        self.max_score = 0.0;
        self.kills = 0;
        self.spawn_requested = false;
        self.auto_respawn = false;
        self.survive_ms = 0.0;
        self.last_spawn_ms = now_ms;
    }

    /// Return the slot to its pristine state, keeping the id.
    pub fn reset(&mut self) {
        *self = Self::new(self.id);
    }
}

/// Fixed table of controller slots. Id 0 is never handed out.
#[derive(Debug, Clone)]
pub struct Roster {
    slots: Vec<Controller>,
}

impl Roster {
    pub fn new() -> Self {
        Self {
            slots: (0..=CellKind::MAX_PLAYER).map(Controller::new).collect(),
        }
    }

    /// Claim the lowest free id.
    pub fn admit(&mut self) -> Option<u8> {
        let slot = self.slots.iter_mut().skip(1).find(|c| !c.connected)?;
        slot.reset();
        slot.connected = true;
        Some(slot.id)
    }

    /// Free a slot. Cells are the caller's business.
    pub fn release(&mut self, id: u8) {
        if let Some(slot) = self.slots.get_mut(id as usize) {
            slot.reset();
        }
    }

    pub fn connected_count(&self) -> usize {
        self.iter().count()
    }

    pub fn get(&self, id: u8) -> Option<&Controller> {
        self.slots.get(id as usize).filter(|c| c.connected)
    }

    pub fn get_mut(&mut self, id: u8) -> Option<&mut Controller> {
        self.slots.get_mut(id as usize).filter(|c| c.connected)
    }

    /// Any slot, connected or not, for cell bookkeeping.
    pub(crate) fn slot_mut(&mut self, id: u8) -> Option<&mut Controller> {
        self.slots.get_mut(id as usize).filter(|_| id != 0)
    }

    /// Connected controllers in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Controller> {
        self.slots.iter().filter(|c| c.connected)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Controller> {
        self.slots.iter_mut().filter(|c| c.connected)
    }

    pub fn ids(&self) -> Vec<u8> {
        self.iter().map(|c| c.id).collect()
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}
