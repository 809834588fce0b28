//! Consequences of a resolution pass: removals, virus ruptures and player pops.

use super::Engine;
use crate::arena::{Boost, CellFlags, CellId, CellKind};
use glam::Vec2;
use protocol::cell_type;
use rand::Rng;
use std::f32::consts::TAU;

/// Split `mass` into at most `slots` pieces of at least `min` each.
///
/// The pieces never add up to more than `mass`; whatever is left stays with
/// the popped cell. Without `monotone` the result favours a few large pieces
/// and a tail of small ones.
pub fn distribute_mass(mass: f32, slots: usize, min: f32, monotone: bool) -> Vec<f32> {
    if slots == 0 || mass <= 0.0 || min <= 0.0 {
        return Vec::new();
    }

    if monotone {
        let amount = ((mass / min).floor() as usize).min(slots);
        return vec![mass / (amount + 1) as f32; amount];
    }

    if mass / (slots as f32) < min {
        let mut amount = 2;
        while mass / (amount + 1) as f32 >= min && amount * 2 <= slots {
            amount *= 2;
        }
        let amount = amount.min(slots);
        return vec![mass / (amount + 1) as f32; amount];
    }

    let mut pieces = Vec::with_capacity(slots);
    let mut left = slots;
    let mut mass_left = mass / 2.0;
    let mut next = mass_left;
    while left > 0 {
        if next / (left as f32) < min {
            break;
        }
        while next >= mass_left && left > 1 {
            next /= 2.0;
        }
        pieces.push(next);
        mass_left -= next;
        left -= 1;
    }
    if left > 0 {
        pieces.extend(std::iter::repeat_n(mass_left / left as f32, left));
    }
    pieces
}

impl Engine {
    pub(super) fn apply_consequences(&mut self) {
        let mut ids = std::mem::take(&mut self.order);
        ids.clear();
        ids.extend(self.arena.iter().map(|(id, _)| id));

        for &id in &ids {
            let cell = self.arena[id];
            if !cell.exists() || !self.tree.contains(id) {
                continue;
            }
            if cell.flags.contains(CellFlags::REMOVE) {
                self.remove_cell(id);
                continue;
            }
            if cell.flags.contains(CellFlags::POP) {
                match cell.kind() {
                    Some(CellKind::Virus) => self.rupture_virus(id),
                    Some(CellKind::Player(owner)) => self.pop_player(id, owner),
                    _ => self.tree.update(id, &self.arena),
                }
                continue;
            }
            if let Some(owner) = cell.owner() {
                if cell.flags.contains(CellFlags::LOCKED) {
                    if let Some(line) = self.controllers.get(owner).and_then(|c| c.lock) {
                        self.arena[id].set_position(line.project(cell.position()));
                    }
                }
                self.tree.update(id, &self.arena);
            } else if cell.flags.contains(CellFlags::UPDATED) {
                self.tree.update(id, &self.arena);
            }
        }

        self.order = ids;
    }

    /// A fed virus shrinks back and sheds a new virus along its last feed direction.
    fn rupture_virus(&mut self, id: CellId) {
        let size = self.config.virus.size;
        let split_boost = self.config.virus.split_boost;
        let virus = &mut self.arena[id];
        virus.r = size;
        let (origin, dir) = (virus.position(), virus.boost.dir());
        self.tree.update(id, &self.arena);

        let dir = if dir.length_squared() > 0.0 { dir.normalize() } else { Vec2::X };
        self.new_cell(origin.x, origin.y, size, cell_type::VIRUS, Boost::new(dir, split_boost));
    }

    /// A player cell that ate a virus explodes into pieces flying in random directions.
    fn pop_player(&mut self, id: CellId, owner: u8) {
        let player = &self.config.player;
        let (max_cells, min_split, boost) = (player.max_cells, player.min_split_size, player.split_boost);
        let monotone = self.config.virus.monotone_pop;
        let now = self.now_ms;

        let Some(c) = self.controllers.get_mut(owner) else {
            self.tree.update(id, &self.arena);
            return;
        };
        c.last_popped_ms = now;
        let slots = max_cells.saturating_sub(c.cells.len());
        let splits = distribute_mass(self.arena[id].mass(), slots, min_split * min_split / 100.0, monotone);
        if !splits.is_empty() {
            c.lock = None;
        }

        for mass in splits {
            let angle = self.rng.random::<f32>() * TAU;
            self.split_from_cell(id, (mass * 100.0).sqrt(), Vec2::new(angle.sin(), angle.cos()), boost);
        }
        self.tree.update(id, &self.arena);
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::quiet_config;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_distribute_without_room() {
        assert!(distribute_mass(500.0, 0, 36.0, false).is_empty());
        assert!(distribute_mass(500.0, 0, 36.0, true).is_empty());
    }

    #[test]
    fn test_distribute_monotone() {
        let pieces = distribute_mass(400.0, 15, 36.0, true);
        assert_eq!(pieces.len(), 11);
        assert!(pieces.iter().all(|&m| (m - 400.0 / 12.0).abs() < 1e-4));
    }

    #[test]
    fn test_distribute_small_mass_doubles() {
        // 100 / 15 < 36, so pieces double while they stay above the minimum.
        let pieces = distribute_mass(100.0, 15, 36.0, false);
        assert_eq!(pieces.len(), 2);
        assert!((pieces[0] - 100.0 / 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_distribute_large_mass_halves() {
        let pieces = distribute_mass(10000.0, 4, 36.0, false);
        assert_eq!(pieces.len(), 4);
        assert_eq!(pieces[0], 2500.0);
        assert_eq!(pieces[1], 1250.0);
        let total: f32 = pieces.iter().sum();
        assert!((total - 5000.0).abs() < 1e-2);
    }

    proptest! {
        #[test]
        fn distribute_never_exceeds_mass(
            mass in 1.0f32..200_000.0,
            slots in 0usize..64,
            min in 1.0f32..400.0,
            monotone in any::<bool>(),
        ) {
            let pieces = distribute_mass(mass, slots, min, monotone);
            prop_assert!(pieces.len() <= slots);
            let total: f32 = pieces.iter().sum();
            prop_assert!(total <= mass * 1.0001);
            prop_assert!(pieces.iter().all(|&m| m > 0.0));
        }

        #[test]
        fn pop_conserves_mass(r in 120.0f32..900.0, max_cells in 2usize..32, monotone in any::<bool>()) {
            let mut config = quiet_config();
            config.player.max_cells = max_cells;
            config.virus.monotone_pop = monotone;
            let mut engine = Engine::with_seed(config, 41);
            let pid = engine.add_controller().unwrap();
            let id = engine.insert_cell(Vec2::ZERO, r, CellKind::Player(pid), Boost::NONE).unwrap();
            engine.arena[id].flags.insert(CellFlags::POP);
            engine.apply_consequences();

            let c = engine.controller(pid).unwrap();
            prop_assert!(c.cells.len() <= max_cells);
            let total: f32 = c.cells.iter().map(|&id| engine.arena[id].r.powi(2)).sum();
            prop_assert!((total.sqrt() - r).abs() < r * 1e-3);
        }
    }

    #[test]
    fn test_virus_rupture() {
        let mut engine = Engine::with_seed(quiet_config(), 42);
        let id = engine
            .insert_cell(Vec2::ZERO, 180.0, CellKind::Virus, Boost::new(Vec2::new(0.0, -1.0), 0.0))
            .unwrap();
        engine.arena[id].flags.insert(CellFlags::POP);
        engine.apply_consequences();

        assert_eq!(engine.arena[id].r, 100.0);
        assert_eq!(engine.count_of(cell_type::VIRUS), 2);
        let (_, child) = engine.arena.iter().find(|&(other, _)| other != id).unwrap();
        assert_eq!(child.r, 100.0);
        assert_eq!(child.boost.d, 120.0);
        assert_eq!(child.boost.y, -1.0);
    }

    #[test]
    fn test_player_pop_blocks_ejecting() {
        let mut engine = Engine::with_seed(quiet_config(), 43);
        let pid = engine.add_controller().unwrap();
        let id = engine
            .insert_cell(Vec2::ZERO, 300.0, CellKind::Player(pid), Boost::NONE)
            .unwrap();
        engine.now_ms = 4000.0;
        engine.arena[id].flags.insert(CellFlags::POP);
        engine.apply_consequences();

        let c = engine.controller(pid).unwrap();
        assert_eq!(c.last_popped_ms, 4000.0);
        assert!(c.cells.len() > 1);
    }

    #[test]
    fn test_eaten_cells_leave_tree_and_count() {
        let mut engine = Engine::with_seed(quiet_config(), 44);
        let a = engine.add_controller().unwrap();
        let b = engine.add_controller().unwrap();
        let big = engine
            .insert_cell(Vec2::ZERO, 100.0, CellKind::Player(a), Boost::NONE)
            .unwrap();
        let small = engine
            .insert_cell(Vec2::new(500.0, 0.0), 30.0, CellKind::Player(b), Boost::NONE)
            .unwrap();
        engine.arena[small].flags.insert(CellFlags::REMOVE);
        engine.arena[small].eaten_by = big;
        engine.apply_consequences();

        assert!(!engine.tree().contains(small));
        assert!(!engine.controller(b).unwrap().alive());
        assert_eq!(engine.controller(a).unwrap().kills, 1);
        assert_eq!(std::mem::take(&mut engine.events), vec![super::super::EngineEvent::Died(b)]);
    }
}
