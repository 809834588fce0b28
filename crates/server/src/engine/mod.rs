//! Fixed-tick simulation.
//!
//! [`Engine::tick`] runs the phases in a fixed order: spawn, intents, move,
//! decay and border, re-index, resolve, consequences, bookkeeping. The tick
//! never fails; anything that cannot be done (full arena, tree invariant
//! breakage) is logged and skipped.

mod input;
mod physics;
mod pop;
mod spawn;

pub use pop::distribute_mass;

use crate::arena::{Boost, CellArena, CellFlags, CellId, CellKind};
use crate::config::Config;
use crate::controller::{Controller, Roster, Viewport};
use crate::resolver::{self, ResolveParams, ResolveStats};
use crate::spatial::{QuadTree, SerializedTree};
use glam::Vec2;
use protocol::cell_type;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Something the connection layer has to tell clients about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// The controller got its first cell.
    Spawned(u8),
    /// The controller lost its last cell.
    Died(u8),
    /// The world was wiped.
    Restarted,
}

/// Wall-clock time spent per phase in the last tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickTimings {
    pub spawn: Duration,
    pub input: Duration,
    pub update: Duration,
    pub reindex: Duration,
    pub resolve: Duration,
    pub consequences: Duration,
    pub bookkeeping: Duration,
}

impl TickTimings {
    pub fn total(&self) -> Duration {
        self.spawn + self.input + self.update + self.reindex + self.resolve + self.consequences + self.bookkeeping
    }
}

/// Owner of all world state.
pub struct Engine {
    config: Config,
    params: ResolveParams,
    /// Simulated milliseconds per tick.
    dt: f32,
    arena: CellArena,
    tree: QuadTree,
    /// Serialized tree used by resolution and the viewport queries.
    snapshot: Vec<u8>,
    controllers: Roster,
    /// Live cells per type byte.
    counts: [usize; 256],
    /// Cells removed last tick; freed at the start of the next.
    pending_free: Vec<CellId>,
    spawn_queue: Vec<u8>,
    /// Controllers whose cells turn into husks this tick.
    kill_queue: Vec<u8>,
    order: Vec<CellId>,
    leaderboard: Vec<u8>,
    events: Vec<EngineEvent>,
    rng: StdRng,
    now_ms: f64,
    tick_count: u64,
    mother_timer_ms: f32,
    should_restart: bool,
    last_resolve: ResolveStats,
    timings: TickTimings,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Engine with a reproducible random sequence.
    pub fn with_seed(config: Config, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: Config, rng: StdRng) -> Self {
        let world = &config.world;
        let arena = CellArena::new(world.cell_limit);
        let tree = QuadTree::new(
            world.map_hw,
            world.map_hh,
            world.quadtree_max_items,
            world.quadtree_max_level,
            arena.capacity(),
        );
        Self {
            params: ResolveParams::from_config(&config),
            dt: config.dt(),
            arena,
            tree,
            snapshot: Vec::new(),
            controllers: Roster::new(),
            counts: [0; 256],
            pending_free: Vec::new(),
            spawn_queue: Vec::new(),
            kill_queue: Vec::new(),
            order: Vec::new(),
            leaderboard: Vec::new(),
            events: Vec::new(),
            rng,
            now_ms: 0.0,
            tick_count: 0,
            mother_timer_ms: 0.0,
            should_restart: false,
            last_resolve: ResolveStats::default(),
            timings: TickTimings::default(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn arena(&self) -> &CellArena {
        &self.arena
    }

    pub fn tree(&self) -> &QuadTree {
        &self.tree
    }

    /// The tree as it was serialized at the end of the last tick.
    pub fn snapshot(&self) -> SerializedTree<'_> {
        SerializedTree::new(&self.snapshot, self.tree.root_bounds())
    }

    pub fn controllers(&self) -> &Roster {
        &self.controllers
    }

    pub fn controller(&self, id: u8) -> Option<&Controller> {
        self.controllers.get(id)
    }

    pub fn controller_mut(&mut self, id: u8) -> Option<&mut Controller> {
        self.controllers.get_mut(id)
    }

    /// Alive controllers by score, best first.
    pub fn leaderboard(&self) -> &[u8] {
        &self.leaderboard
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Simulated time since start.
    pub fn now_ms(&self) -> f64 {
        self.now_ms
    }

    pub fn count_of(&self, cell_type: u8) -> usize {
        self.counts[cell_type as usize]
    }

    pub fn last_resolve(&self) -> ResolveStats {
        self.last_resolve
    }

    pub fn timings(&self) -> &TickTimings {
        &self.timings
    }

    /// Claim a controller slot for a new connection.
    pub fn add_controller(&mut self) -> Option<u8> {
        self.controllers.admit()
    }

    /// Drop a controller and every cell it owns, without husks.
    pub fn remove_controller(&mut self, id: u8) {
        self.remove_owned_cells(id);
        self.spawn_queue.retain(|&pid| pid != id);
        self.kill_queue.retain(|&pid| pid != id);
        self.controllers.release(id);
    }

    /// Place a cell directly. Player cells must belong to a connected controller.
    pub fn insert_cell(&mut self, position: Vec2, r: f32, kind: CellKind, boost: Boost) -> Option<CellId> {
        if let CellKind::Player(owner) = kind {
            self.controllers.get(owner)?;
        }
        self.new_cell(position.x, position.y, r, kind.raw(), boost)
    }

    /// Cells whose circle touches the viewport, as of the last tick.
    pub fn query(&self, viewport: &Viewport, out: &mut Vec<CellId>) {
        self.snapshot().select(&viewport.bounds(), &self.arena, out);
    }

    /// Advance the world by one tick and return what happened.
    pub fn tick(&mut self) -> Vec<EngineEvent> {
        if self.should_restart {
            self.restart();
        }
        self.sweep_removed();
        self.tick_count += 1;
        self.now_ms += self.dt as f64;

        let t = Instant::now();
        self.spawn_cells();
        self.timings.spawn = t.elapsed();

        let t = Instant::now();
        self.handle_inputs();
        self.timings.input = t.elapsed();

        let t = Instant::now();
        self.update_cells();
        self.update_player_cells();
        self.decay_and_clamp();
        self.release_wall_locks();
        self.timings.update = t.elapsed();

        let t = Instant::now();
        self.reindex();
        self.handle_kills();
        self.timings.reindex = t.elapsed();

        let t = Instant::now();
        self.resolve();
        self.timings.resolve = t.elapsed();

        let t = Instant::now();
        self.apply_consequences();
        self.timings.consequences = t.elapsed();

        let t = Instant::now();
        self.update_scores();
        self.check_world_size();
        self.snapshot.clear();
        self.tree.serialize(&mut self.snapshot);
        self.timings.bookkeeping = t.elapsed();

        if self.tick_count % 400 == 0 {
            let t = &self.timings;
            debug!(
                "Tick #{}: {:.2}ms total | spawn={:.2}ms input={:.2}ms update={:.2}ms reindex={:.2}ms resolve={:.2}ms consequences={:.2}ms bookkeeping={:.2}ms | {} cells, {} nodes, {} collisions",
                self.tick_count,
                t.total().as_secs_f64() * 1000.0,
                t.spawn.as_secs_f64() * 1000.0,
                t.input.as_secs_f64() * 1000.0,
                t.update.as_secs_f64() * 1000.0,
                t.reindex.as_secs_f64() * 1000.0,
                t.resolve.as_secs_f64() * 1000.0,
                t.consequences.as_secs_f64() * 1000.0,
                t.bookkeeping.as_secs_f64() * 1000.0,
                self.arena.live_count(),
                self.tree.node_count(),
                self.last_resolve.collisions
            );
        }

        std::mem::take(&mut self.events)
    }

    /// Allocate, index and count a cell.
    fn new_cell(&mut self, x: f32, y: f32, r: f32, cell_type: u8, boost: Boost) -> Option<CellId> {
        let id = self.arena.allocate(x, y, r, cell_type, boost)?;
        self.tree.insert(id, &self.arena);
        self.counts[cell_type as usize] += 1;
        if let Some(CellKind::Player(owner)) = CellKind::from_raw(cell_type) {
            if let Some(c) = self.controllers.slot_mut(owner) {
                c.cells.push(id);
            }
        }
        Some(id)
    }

    /// Carve a cell of radius `size` out of `id` and launch it along `dir`.
    fn split_from_cell(&mut self, id: CellId, size: f32, dir: Vec2, boost: f32) -> Option<CellId> {
        let parent = self.arena[id];
        let origin = parent.position() + dir * self.config.player.split_dist;
        let child = self.new_cell(origin.x, origin.y, size, parent.cell_type, Boost::new(dir, boost))?;
        let parent = &mut self.arena[id];
        parent.r = (parent.r * parent.r - size * size).max(0.0).sqrt();
        parent.flags.insert(CellFlags::UPDATED);
        Some(child)
    }

    /// Unindex a cell and settle its owner's bookkeeping. The slot stays
    /// allocated until the next tick so `eaten_by` can still be read.
    fn remove_cell(&mut self, id: CellId) {
        let cell = self.arena[id];
        self.tree.remove(id);
        self.pending_free.push(id);
        let count = &mut self.counts[cell.cell_type as usize];
        *count = count.saturating_sub(1);

        let Some(owner) = cell.owner() else {
            return;
        };
        let killer = match cell.eaten_by {
            0 => None,
            eater => self.arena.get(eater).and_then(|c| c.owner()),
        };
        let Some(c) = self.controllers.slot_mut(owner) else {
            return;
        };
        let before = c.cells.len();
        c.cells.retain(|&other| other != id);
        if before > 0 && c.cells.is_empty() {
            c.score = 0.0;
            self.events.push(EngineEvent::Died(owner));
            if let Some(k) = killer.and_then(|k| self.controllers.slot_mut(k)) {
                k.kills += 1;
            }
        }
    }

    /// Remove every cell of a controller right away, outside the tick phases.
    fn remove_owned_cells(&mut self, id: u8) {
        let Some(c) = self.controllers.slot_mut(id) else {
            return;
        };
        let cells = std::mem::take(&mut c.cells);
        c.score = 0.0;
        for cell_id in cells {
            self.tree.remove(cell_id);
            let cell = &mut self.arena[cell_id];
            cell.flags.insert(CellFlags::REMOVE);
            cell.eaten_by = 0;
            let count = &mut self.counts[cell.cell_type as usize];
            *count = count.saturating_sub(1);
            self.pending_free.push(cell_id);
        }
    }

    fn sweep_removed(&mut self) {
        for id in self.pending_free.drain(..) {
            self.arena.free(id);
        }
    }

    fn handle_kills(&mut self) {
        for id in std::mem::take(&mut self.kill_queue) {
            self.replace_with_husks(id);
        }
    }

    /// Turn a controller's cells into dead husks that keep their tree slot.
    fn replace_with_husks(&mut self, id: u8) {
        let Some(c) = self.controllers.slot_mut(id) else {
            return;
        };
        let cells = std::mem::take(&mut c.cells);
        for old in cells {
            let cell = self.arena[old];
            match self.arena.allocate(cell.x, cell.y, cell.r, cell_type::DEAD, cell.boost) {
                Some(husk) => {
                    self.tree.swap(old, husk);
                    self.counts[cell.cell_type as usize] = self.counts[cell.cell_type as usize].saturating_sub(1);
                    self.counts[cell_type::DEAD as usize] += 1;
                    self.arena.free(old);
                }
                // No room for a husk: the cell just goes away with the consequences.
                None => {
                    self.arena[old].flags.insert(CellFlags::REMOVE);
                    self.arena[old].eaten_by = 0;
                }
            }
        }
    }

    fn resolve(&mut self) {
        self.snapshot.clear();
        self.tree.serialize(&mut self.snapshot);

        let arena = &self.arena;
        self.order.clear();
        self.order.extend(
            arena
                .iter()
                .filter(|(_, c)| c.cell_type != cell_type::PELLET)
                .map(|(id, _)| id),
        );
        // Type by type, largest first within a type.
        self.order.sort_unstable_by(|a, b| {
            let (ca, cb) = (&arena[*a], &arena[*b]);
            ca.cell_type
                .cmp(&cb.cell_type)
                .then(cb.r.total_cmp(&ca.r))
                .then(a.cmp(b))
        });

        let snapshot = SerializedTree::new(&self.snapshot, self.tree.root_bounds());
        self.last_resolve = resolver::resolve(&snapshot, &mut self.arena, &self.order, &self.params);
    }

    fn update_scores(&mut self) {
        let dt = self.dt;
        for c in self.controllers.iter_mut() {
            c.score = c.cells.iter().map(|&id| self.arena[id].mass()).sum();
            c.max_score = c.max_score.max(c.score);
            if c.alive() {
                c.survive_ms += dt;
            }
        }
        let mut board: Vec<&Controller> = self.controllers.iter().filter(|c| c.alive()).collect();
        board.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        self.leaderboard = board.into_iter().map(|c| c.id).collect();
    }

    /// Kill or restart when one player outgrows the map.
    fn check_world_size(&mut self) {
        let world = &self.config.world;
        let limit = 4.0 * world.map_hw * world.map_hh / 100.0 * world.restart_mult;
        let Some(&top) = self.leaderboard.first() else {
            return;
        };
        let Some(c) = self.controllers.get(top) else {
            return;
        };
        if c.score <= limit {
            return;
        }
        if world.kill_oversize {
            info!("{} died from oversize", c.name());
            self.remove_owned_cells(top);
            self.events.push(EngineEvent::Died(top));
            self.leaderboard.retain(|&pid| pid != top);
        } else {
            info!("World is too big ({} has {:.0} mass), restarting", c.name(), c.score);
            self.should_restart = true;
        }
    }

    /// Wipe every cell. Controllers stay connected.
    fn restart(&mut self) {
        self.should_restart = false;
        self.arena.clear();
        self.tree.clear();
        self.snapshot.clear();
        self.counts = [0; 256];
        self.pending_free.clear();
        self.kill_queue.clear();
        self.leaderboard.clear();
        for c in self.controllers.iter_mut() {
            c.cells.clear();
            c.score = 0.0;
            c.lock = None;
        }
        self.events.push(EngineEvent::Restarted);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("tick", &self.tick_count)
            .field("arena", &self.arena)
            .field("controllers", &self.controllers.connected_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Small quiet world: no pellets, viruses or autosplit.
    pub(crate) fn quiet_config() -> Config {
        let mut config = Config::default();
        config.world.map_hw = 2000.0;
        config.world.map_hh = 2000.0;
        config.world.cell_limit = 4096;
        config.pellet.count = 0;
        config.virus.count = 0;
        config
    }

    #[test]
    fn test_viewport_defaults_without_cells() {
        let mut engine = Engine::with_seed(quiet_config(), 1);
        let id = engine.add_controller().unwrap();
        engine.controller_mut(id).unwrap().viewport = Viewport { x: 50.0, y: 50.0, hw: 10.0, hh: 10.0 };
        engine.tick();
        assert_eq!(engine.controller(id).unwrap().viewport, Viewport::DEFAULT);
    }

    #[test]
    fn test_world_fills_with_pellets_and_viruses() {
        let mut config = quiet_config();
        config.pellet.count = 120;
        config.virus.count = 5;
        let mut engine = Engine::with_seed(config, 2);
        for _ in 0..4 {
            engine.tick();
        }
        assert_eq!(engine.count_of(cell_type::PELLET), 120);
        assert_eq!(engine.count_of(cell_type::VIRUS), 5);
        assert_eq!(engine.tree().item_count(), 125);
        for (_, cell) in engine.arena().iter() {
            assert!(cell.x.abs() <= 2000.0 - cell.r && cell.y.abs() <= 2000.0 - cell.r);
        }
    }

    #[test]
    fn test_removed_slot_freed_next_tick() {
        let mut engine = Engine::with_seed(quiet_config(), 3);
        let pid = engine.add_controller().unwrap();
        let pellet = engine
            .insert_cell(Vec2::ZERO, 10.0, CellKind::Pellet, Boost::NONE)
            .unwrap();
        let player = engine
            .insert_cell(Vec2::new(25.0, 0.0), 40.0, CellKind::Player(pid), Boost::NONE)
            .unwrap();
        engine.controller_mut(pid).unwrap().set_mouse(Vec2::new(25.0, 0.0));
        engine.tick();

        let eaten = engine.arena()[pellet];
        assert!(eaten.exists());
        assert!(eaten.flags.contains(CellFlags::REMOVE));
        assert_eq!(eaten.eaten_by, player);
        assert!(!engine.tree().contains(pellet));

        engine.tick();
        assert!(!engine.arena()[pellet].exists());
    }

    #[test]
    fn test_respawn_leaves_husks() {
        let mut engine = Engine::with_seed(quiet_config(), 4);
        let pid = engine.add_controller().unwrap();
        let cell = engine
            .insert_cell(Vec2::new(100.0, 100.0), 80.0, CellKind::Player(pid), Boost::NONE)
            .unwrap();
        engine.controller_mut(pid).unwrap().spawn_requested = true;
        engine.tick();

        assert!(!engine.controller(pid).unwrap().alive());
        assert!(!engine.arena()[cell].exists());
        assert_eq!(engine.count_of(cell_type::DEAD), 1);
        let (husk, _) = engine
            .arena()
            .iter()
            .find(|(_, c)| c.cell_type == cell_type::DEAD)
            .unwrap();
        assert!(engine.tree().contains(husk));

        let events = engine.tick();
        assert!(events.contains(&EngineEvent::Spawned(pid)));
        assert!(engine.controller(pid).unwrap().alive());
    }

    #[test]
    fn test_disconnect_removes_cells() {
        let mut engine = Engine::with_seed(quiet_config(), 5);
        let pid = engine.add_controller().unwrap();
        for i in 0..3 {
            engine.insert_cell(Vec2::new(i as f32 * 200.0, 0.0), 50.0, CellKind::Player(pid), Boost::NONE);
        }
        engine.tick();
        engine.remove_controller(pid);
        assert!(engine.tree().is_empty());
        engine.tick();
        assert_eq!(engine.arena().live_count(), 0);
        assert_eq!(engine.add_controller(), Some(pid));
    }

    #[test]
    fn test_oversize_player_restarts_world() {
        let mut config = quiet_config();
        config.world.restart_mult = 0.001;
        let mut engine = Engine::with_seed(config, 6);
        let pid = engine.add_controller().unwrap();
        engine.insert_cell(Vec2::ZERO, 300.0, CellKind::Player(pid), Boost::NONE);
        engine.tick();
        let events = engine.tick();
        assert!(events.contains(&EngineEvent::Restarted));
        assert_eq!(engine.arena().live_count(), 0);
        assert!(!engine.controller(pid).unwrap().alive());
    }

    #[test]
    fn test_oversize_player_killed() {
        let mut config = quiet_config();
        config.world.restart_mult = 0.001;
        config.world.kill_oversize = true;
        let mut engine = Engine::with_seed(config, 7);
        let pid = engine.add_controller().unwrap();
        engine.insert_cell(Vec2::ZERO, 300.0, CellKind::Player(pid), Boost::NONE);
        let events = engine.tick();
        assert!(events.contains(&EngineEvent::Died(pid)));
        assert!(engine.leaderboard().is_empty());
        assert!(engine.tree().is_empty());

        let mut seen = Vec::new();
        engine.query(&Viewport::DEFAULT, &mut seen);
        assert!(seen.is_empty());
    }

    #[test]
    fn test_leaderboard_order_and_kills() {
        let mut engine = Engine::with_seed(quiet_config(), 8);
        let a = engine.add_controller().unwrap();
        let b = engine.add_controller().unwrap();
        engine.insert_cell(Vec2::new(-500.0, 0.0), 50.0, CellKind::Player(a), Boost::NONE);
        engine.insert_cell(Vec2::new(500.0, 0.0), 90.0, CellKind::Player(b), Boost::NONE);
        engine.tick();
        assert_eq!(engine.leaderboard(), &[b, a]);
        let score = engine.controller(b).unwrap().score;
        assert!(score > 80.0 && score <= 81.0);
    }
}
