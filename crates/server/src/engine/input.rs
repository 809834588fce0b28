//! Controller intents: viewport, line lock, split, eject and spawn requests.

use super::Engine;
use crate::arena::{Boost, CellFlags};
use crate::controller::Viewport;
use crate::spatial::Bounds;
use glam::Vec2;
use protocol::cell_type;
use rand::Rng;
use std::f32::consts::FRAC_1_SQRT_2;

/// Unit vector from a cell towards the mouse, or +x when they coincide.
pub(super) fn aim(delta: Vec2) -> Vec2 {
    let d = delta.length();
    if d < 1.0 { Vec2::X } else { delta / d }
}

impl Engine {
    pub(super) fn handle_inputs(&mut self) {
        let leader = self.leaderboard.first().copied();
        for id in self.controllers.ids() {
            self.update_viewport(id, leader);
            self.toggle_lock(id);
            self.handle_splits(id);
            self.handle_ejects(id);
            self.handle_spawn_request(id);
        }
    }

    /// Mass-weighted camera over the owned cells, zooming out as the player grows.
    fn update_viewport(&mut self, id: u8, leader: Option<u8>) {
        let Some(c) = self.controllers.get(id) else {
            return;
        };

        if c.cells.is_empty() {
            let viewport = match leader {
                Some(leader) if c.spectate && leader != id => self
                    .controllers
                    .get(leader)
                    .map_or(Viewport::DEFAULT, |l| l.viewport),
                _ => Viewport::DEFAULT,
            };
            if let Some(c) = self.controllers.get_mut(id) {
                c.viewport = viewport;
            }
            return;
        }

        let mut weighted = Vec2::ZERO;
        let mut weight = 0.0;
        let mut r_sum = 0.0;
        let mut cell_box = Bounds::new(f32::MAX, f32::MAX, f32::MIN, f32::MIN);
        for &cell_id in &c.cells {
            let cell = &self.arena[cell_id];
            let w = cell.r * cell.r;
            weighted += cell.position() * w;
            weight += w;
            r_sum += cell.r;
            cell_box.min_x = cell_box.min_x.min(cell.x - cell.r);
            cell_box.min_y = cell_box.min_y.min(cell.y - cell.r);
            cell_box.max_x = cell_box.max_x.max(cell.x + cell.r);
            cell_box.max_y = cell_box.max_y.max(cell.y + cell.r);
        }

        let center = if weight > 0.0 {
            weighted / weight
        } else {
            Vec2::new(
                (cell_box.min_x + cell_box.max_x) / 2.0,
                (cell_box.min_y + cell_box.max_y) / 2.0,
            )
        };
        let scale = if r_sum > 0.0 { (64.0 / r_sum).min(1.0).powf(0.4) } else { 1.0 };
        let view_scale = self.config.player.view_scale;
        let spread_x = (center.x - cell_box.min_x).max(cell_box.max_x - center.x);
        let spread_y = (center.y - cell_box.min_y).max(cell_box.max_y - center.y);

        if let Some(c) = self.controllers.get_mut(id) {
            c.viewport = Viewport {
                x: center.x,
                y: center.y,
                hw: (960.0 * view_scale / scale).max(spread_x),
                hh: (540.0 * view_scale / scale).max(spread_y),
            };
            c.cell_box = cell_box;
        }
    }

    fn toggle_lock(&mut self, id: u8) {
        let Some(c) = self.controllers.get_mut(id) else {
            return;
        };
        if !std::mem::take(&mut c.lock_requested) {
            return;
        }
        if c.lock.is_some() {
            c.lock = None;
        } else if let [only] = c.cells[..] {
            let position = self.arena[only].position();
            c.lock_to(position);
        }
    }

    fn handle_splits(&mut self, id: u8) {
        let player = &self.config.player;
        let (max_cells, boost, thresh) = (player.max_cells, player.split_boost, player.normalize_thresh_mass);
        let score = self.controllers.get(id).map_or(0.0, |c| c.score);
        let min_split = player.min_split_size * score_multi(score, thresh);
        let mut rounds = player.split_cap;

        while rounds > 0 {
            let Some(c) = self.controllers.get_mut(id) else {
                return;
            };
            if c.split_attempts == 0 {
                break;
            }
            c.split_attempts -= 1;
            rounds -= 1;

            let mouse = c.mouse();
            let cells = c.cells.clone();
            for cell_id in cells {
                if self.owned_count(id) >= max_cells {
                    break;
                }
                let cell = self.arena[cell_id];
                if cell.r < min_split {
                    continue;
                }
                let dir = aim(mouse - cell.position());
                let boost = boost * size_multi(cell.r, thresh);
                self.split_from_cell(cell_id, cell.r * FRAC_1_SQRT_2, dir, boost);
            }
        }
    }

    fn handle_ejects(&mut self, id: u8) {
        let eject = self.config.eject.clone();
        let (min_eject, no_eject_delay, no_pop_delay, thresh) = (
            self.config.player.min_eject_size,
            self.config.player.no_eject_delay,
            self.config.player.no_eject_pop_delay,
            self.config.player.normalize_thresh_mass,
        );
        let (now, dt) = (self.now_ms, self.dt as f64);

        let Some(c) = self.controllers.get(id) else {
            return;
        };
        if now <= c.last_popped_ms + no_pop_delay as f64 {
            return;
        }

        let mut budget = (self.dt / eject.delay.max(1.0)).ceil().max(1.0) as u32;
        let mut ejected = 0u32;
        loop {
            let Some(c) = self.controllers.get_mut(id) else {
                return;
            };
            if budget == 0 || c.last_eject_ms > now + dt || (c.eject_attempts == 0 && !c.eject_macro) {
                break;
            }
            budget -= 1;
            c.eject_attempts = c.eject_attempts.saturating_sub(1);
            ejected += 1;

            let mouse = c.mouse();
            let cells = c.cells.clone();
            for cell_id in cells {
                let cell = self.arena[cell_id];
                let multi = size_multi(cell.r, thresh);
                if cell.r < min_eject * multi || (cell.age as f32 * self.dt) < no_eject_delay {
                    continue;
                }
                let dir = aim(mouse - cell.position());
                let origin = cell.position() + dir * cell.r;
                let spread = self.rng.random::<f32>() * 2.0 - 1.0;
                let angle = dir.x.atan2(dir.y) + spread * eject.dispersion;
                let boost = Boost::new(Vec2::new(angle.sin(), angle.cos()), eject.boost * multi);
                if self
                    .new_cell(origin.x, origin.y, eject.size * multi, cell_type::EJECTED, boost)
                    .is_some()
                {
                    let loss = eject.loss * multi;
                    let cell = &mut self.arena[cell_id];
                    cell.r = (cell.r * cell.r - loss * loss).max(0.0).sqrt();
                    cell.flags.insert(CellFlags::UPDATED);
                }
            }

            if let Some(c) = self.controllers.get_mut(id) {
                c.last_eject_ms = now + ejected as f64 * eject.delay as f64;
            }
        }
    }

    fn handle_spawn_request(&mut self, id: u8) {
        let (now, delay) = (self.now_ms, self.config.player.spawn_delay);
        let Some(c) = self.controllers.get_mut(id) else {
            return;
        };
        if !c.can_spawn(now, delay) {
            return;
        }
        c.spawn_requested = false;
        if c.alive() {
            self.kill_queue.push(id);
        }
        if !self.spawn_queue.contains(&id) {
            self.spawn_queue.push(id);
        }
    }

    pub(super) fn owned_count(&self, id: u8) -> usize {
        self.controllers.get(id).map_or(0, |c| c.cells.len())
    }
}

/// `sqrt(score / thresh_mass)`, at least 1. Always 1 with normalisation off.
pub(super) fn score_multi(score: f32, thresh_mass: f32) -> f32 {
    if thresh_mass > 0.0 {
        (score / thresh_mass).sqrt().max(1.0)
    } else {
        1.0
    }
}

/// How far a cell's radius is past the radius of `thresh_mass`, at least 1.
fn size_multi(r: f32, thresh_mass: f32) -> f32 {
    if thresh_mass > 0.0 {
        (r / (thresh_mass * 100.0).sqrt()).max(1.0)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::quiet_config;
    use super::*;
    use crate::arena::CellKind;
    use crate::engine::Engine;

    #[test]
    fn test_aim_defaults_to_x() {
        assert_eq!(aim(Vec2::new(0.5, 0.0)), Vec2::X);
        let d = aim(Vec2::new(0.0, -10.0));
        assert!((d - Vec2::new(0.0, -1.0)).length() < 1e-6);
    }

    #[test]
    fn test_split_conserves_mass() {
        let mut engine = Engine::with_seed(quiet_config(), 11);
        let pid = engine.add_controller().unwrap();
        engine.insert_cell(Vec2::ZERO, 200.0, CellKind::Player(pid), Boost::NONE);
        let c = engine.controller_mut(pid).unwrap();
        c.set_mouse(Vec2::new(1000.0, 0.0));
        c.split_attempts = 1;
        engine.handle_inputs();

        let c = engine.controller(pid).unwrap();
        assert_eq!(c.cells.len(), 2);
        let sum: f32 = c.cells.iter().map(|&id| engine.arena[id].r.powi(2)).sum();
        assert!((sum.sqrt() - 200.0).abs() < 1e-2);
        let child = engine.arena[c.cells[1]];
        assert!(child.boost.d > 0.0);
        assert!(child.boost.x > 0.99);
    }

    #[test]
    fn test_split_respects_cap_and_max_cells() {
        let mut config = quiet_config();
        config.player.max_cells = 5;
        let mut engine = Engine::with_seed(config, 12);
        let pid = engine.add_controller().unwrap();
        engine.insert_cell(Vec2::ZERO, 1000.0, CellKind::Player(pid), Boost::NONE);
        engine.controller_mut(pid).unwrap().split_attempts = 10;
        engine.handle_inputs();

        let c = engine.controller(pid).unwrap();
        assert_eq!(c.cells.len(), 5);
        // Four rounds processed, the rest waits for the next tick.
        assert_eq!(c.split_attempts, 6);
    }

    #[test]
    fn test_eject_spawns_mass_and_shrinks_cell() {
        let mut engine = Engine::with_seed(quiet_config(), 13);
        let pid = engine.add_controller().unwrap();
        let cell = engine
            .insert_cell(Vec2::ZERO, 150.0, CellKind::Player(pid), Boost::NONE)
            .unwrap();
        engine.arena[cell].age = 100;
        engine.now_ms = 10_000.0;
        let c = engine.controller_mut(pid).unwrap();
        c.set_mouse(Vec2::new(0.0, 500.0));
        c.eject_attempts = 3;
        engine.handle_inputs();

        assert_eq!(engine.count_of(cell_type::EJECTED), 1);
        let expected = (150.0f32 * 150.0 - 43.0 * 43.0).sqrt();
        assert!((engine.arena[cell].r - expected).abs() < 1e-3);
        let c = engine.controller(pid).unwrap();
        assert_eq!(c.eject_attempts, 2);
        assert_eq!(c.last_eject_ms, 10_100.0);

        let (_, blob) = engine
            .arena
            .iter()
            .find(|(_, c)| c.cell_type == cell_type::EJECTED)
            .unwrap();
        assert!((blob.y - 150.0).abs() < 1e-3);
        assert!(blob.boost.y > 0.9);
    }

    #[test]
    fn test_normalized_split_boost_grows_with_radius() {
        let mut config = quiet_config();
        config.player.normalize_thresh_mass = 100.0;
        let mut engine = Engine::with_seed(config, 15);
        let pid = engine.add_controller().unwrap();
        engine.insert_cell(Vec2::ZERO, 200.0, CellKind::Player(pid), Boost::NONE);
        let c = engine.controller_mut(pid).unwrap();
        c.set_mouse(Vec2::new(1000.0, 0.0));
        c.split_attempts = 1;
        engine.handle_inputs();

        let c = engine.controller(pid).unwrap();
        assert_eq!(c.cells.len(), 2);
        // Radius 200 is twice the radius of 100 mass.
        assert!((engine.arena[c.cells[1]].boost.d - 1600.0).abs() < 1e-2);
    }

    #[test]
    fn test_normalized_min_split_grows_with_score() {
        let mut config = quiet_config();
        config.player.normalize_thresh_mass = 10_000.0;
        let mut engine = Engine::with_seed(config, 16);
        let pid = engine.add_controller().unwrap();
        engine.insert_cell(Vec2::ZERO, 100.0, CellKind::Player(pid), Boost::NONE);
        let c = engine.controller_mut(pid).unwrap();
        c.score = 40_000.0;
        c.split_attempts = 1;
        engine.handle_inputs();
        // Minimum split radius doubles to 120.
        assert_eq!(engine.controller(pid).unwrap().cells.len(), 1);

        let c = engine.controller_mut(pid).unwrap();
        c.score = 10_000.0;
        c.split_attempts = 1;
        engine.handle_inputs();
        assert_eq!(engine.controller(pid).unwrap().cells.len(), 2);
    }

    #[test]
    fn test_normalized_eject_scales_with_radius() {
        let mut config = quiet_config();
        config.player.normalize_thresh_mass = 100.0;
        let mut engine = Engine::with_seed(config, 17);
        let pid = engine.add_controller().unwrap();
        let cell = engine
            .insert_cell(Vec2::ZERO, 300.0, CellKind::Player(pid), Boost::NONE)
            .unwrap();
        engine.arena[cell].age = 100;
        engine.now_ms = 10_000.0;
        let c = engine.controller_mut(pid).unwrap();
        c.set_mouse(Vec2::new(0.0, 500.0));
        c.eject_attempts = 1;
        engine.handle_inputs();

        let expected = (300.0f32 * 300.0 - 129.0 * 129.0).sqrt();
        assert!((engine.arena[cell].r - expected).abs() < 1e-2);
        let (_, blob) = engine
            .arena
            .iter()
            .find(|(_, c)| c.cell_type == cell_type::EJECTED)
            .unwrap();
        assert!((blob.r - 114.0).abs() < 1e-3);
        assert!((blob.boost.d - 2340.0).abs() < 1e-2);
    }

    #[test]
    fn test_normalize_factors() {
        assert_eq!(score_multi(1e9, 0.0), 1.0);
        assert_eq!(score_multi(50.0, 100.0), 1.0);
        assert!((score_multi(900.0, 100.0) - 3.0).abs() < 1e-6);
        assert_eq!(size_multi(5000.0, 0.0), 1.0);
        assert_eq!(size_multi(50.0, 100.0), 1.0);
        assert!((size_multi(250.0, 100.0) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_eject_blocked_after_pop() {
        let mut engine = Engine::with_seed(quiet_config(), 14);
        let pid = engine.add_controller().unwrap();
        let cell = engine
            .insert_cell(Vec2::ZERO, 150.0, CellKind::Player(pid), Boost::NONE)
            .unwrap();
        engine.arena[cell].age = 100;
        engine.now_ms = 1000.0;
        let c = engine.controller_mut(pid).unwrap();
        c.last_popped_ms = 800.0;
        c.eject_macro = true;
        engine.handle_inputs();
        assert_eq!(engine.count_of(cell_type::EJECTED), 0);
    }

    #[test]
    fn test_lock_needs_single_cell() {
        let mut engine = Engine::with_seed(quiet_config(), 15);
        let pid = engine.add_controller().unwrap();
        engine.insert_cell(Vec2::ZERO, 50.0, CellKind::Player(pid), Boost::NONE);
        let c = engine.controller_mut(pid).unwrap();
        c.set_mouse(Vec2::new(100.0, 0.0));
        c.lock_requested = true;
        engine.handle_inputs();
        assert!(engine.controller(pid).unwrap().lock.is_some());

        engine.controller_mut(pid).unwrap().lock_requested = true;
        engine.handle_inputs();
        assert!(engine.controller(pid).unwrap().lock.is_none());

        engine.insert_cell(Vec2::new(300.0, 0.0), 50.0, CellKind::Player(pid), Boost::NONE);
        engine.controller_mut(pid).unwrap().lock_requested = true;
        engine.handle_inputs();
        assert!(engine.controller(pid).unwrap().lock.is_none());
    }

    #[test]
    fn test_spectator_follows_leader() {
        let mut engine = Engine::with_seed(quiet_config(), 16);
        let leader = engine.add_controller().unwrap();
        let watcher = engine.add_controller().unwrap();
        engine.insert_cell(Vec2::new(700.0, -300.0), 100.0, CellKind::Player(leader), Boost::NONE);
        engine.tick();
        engine.controller_mut(watcher).unwrap().spectate = true;
        engine.tick();

        let l = engine.controller(leader).unwrap().viewport;
        let w = engine.controller(watcher).unwrap().viewport;
        assert_eq!(l, w);
        assert_ne!(w, Viewport::DEFAULT);
    }
}
