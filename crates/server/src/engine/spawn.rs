//! Spawn phase: topping up pellets and hazards, mother bursts and queued players.

use super::{Engine, EngineEvent};
use crate::arena::{Boost, CellFlags};
use crate::spatial::Bounds;
use glam::Vec2;
use protocol::cell_type;
use rand::Rng;
use std::f32::consts::TAU;
use tracing::debug;

impl Engine {
    pub(super) fn spawn_cells(&mut self) {
        let per_tick = self.config.world.max_cell_per_tick;

        let (count, size) = (self.config.pellet.count, self.config.pellet.size);
        let missing = count.saturating_sub(self.counts[cell_type::PELLET as usize]).min(per_tick);
        for _ in 0..missing {
            let p = self.random_point(size);
            if self.new_cell(p.x, p.y, size, cell_type::PELLET, Boost::NONE).is_none() {
                break;
            }
        }

        let virus = (self.config.virus.count, self.config.virus.size);
        let mother = (self.config.mother.count, self.config.mother.size);
        for (kind, (count, size)) in [(cell_type::VIRUS, virus), (cell_type::MOTHER, mother)] {
            let missing = count.saturating_sub(self.counts[kind as usize]).min(per_tick);
            for _ in 0..missing {
                let safe = size * self.config.virus.safe_spawn_radius;
                let p = self.safe_point(safe).unwrap_or_else(|| self.random_point(size));
                if self.new_cell(p.x, p.y, size, kind, Boost::NONE).is_none() {
                    break;
                }
            }
        }

        self.emit_mother_pellets();
        self.spawn_players();
    }

    /// Every interval, each mother scatters a burst of pellets around itself.
    fn emit_mother_pellets(&mut self) {
        let mother = &self.config.mother;
        if self.counts[cell_type::MOTHER as usize] == 0 || mother.pellet_interval_ms <= 0.0 {
            return;
        }
        self.mother_timer_ms += self.dt;
        if self.mother_timer_ms < mother.pellet_interval_ms {
            return;
        }
        self.mother_timer_ms -= mother.pellet_interval_ms;

        let (burst, spread, cap) = (mother.pellets_per_burst, mother.pellet_spread, mother.max_pellets);
        let size = self.config.pellet.size;
        let mothers: Vec<_> = self
            .arena
            .iter()
            .filter(|(_, c)| c.cell_type == cell_type::MOTHER && !c.flags.contains(CellFlags::REMOVE))
            .map(|(_, c)| (c.position(), c.r))
            .collect();

        for (center, r) in mothers {
            for _ in 0..burst {
                if self.counts[cell_type::PELLET as usize] >= cap {
                    return;
                }
                let angle = self.rng.random::<f32>() * TAU;
                let dist = r + size + self.rng.random::<f32>() * spread;
                let p = self.clamp_point(center + Vec2::new(angle.sin(), angle.cos()) * dist, size);
                if self.new_cell(p.x, p.y, size, cell_type::PELLET, Boost::NONE).is_none() {
                    return;
                }
            }
        }
    }

    /// Place queued players. Ones that find no room stay queued for the next tick.
    fn spawn_players(&mut self) {
        let size = self.config.player.spawn_size;
        let queue = std::mem::take(&mut self.spawn_queue);
        for pid in queue {
            let Some(alive) = self.controllers.get(pid).map(|c| c.alive()) else {
                continue;
            };
            if !alive {
                let Some(p) = self.player_spawn_point(pid) else {
                    debug!("No spawn point for P#{}, retrying", pid);
                    self.spawn_queue.push(pid);
                    continue;
                };
                if self.new_cell(p.x, p.y, size, pid, Boost::NONE).is_none() {
                    self.spawn_queue.push(pid);
                    continue;
                }
            }
            let now = self.now_ms;
            if let Some(c) = self.controllers.get_mut(pid) {
                c.after_spawn(now);
            }
            self.events.push(EngineEvent::Spawned(pid));
        }
    }

    /// Somewhere near a random alive player, widening the search with each try,
    /// otherwise any safe spot on the map.
    fn player_spawn_point(&mut self, pid: u8) -> Option<Vec2> {
        let player = &self.config.player;
        let (size, view_min) = (player.spawn_size, player.view_min);
        let safe = size * player.safe_spawn_radius;
        let tries = self.config.world.safe_spawn_tries;

        let others: Vec<_> = self
            .controllers
            .iter()
            .filter(|c| c.id != pid && c.alive())
            .map(|c| (c.viewport, c.cell_box))
            .collect();
        if !others.is_empty() {
            let (view, cell_box) = others[self.rng.random_range(0..others.len())];
            let left = view_min.max(2.0 * (view.x - cell_box.min_x));
            let right = view_min.max(2.0 * (cell_box.max_x - view.x));
            let top = view_min.max(2.0 * (view.y - cell_box.min_y));
            let bottom = view_min.max(2.0 * (cell_box.max_y - view.y));
            for i in 1..tries {
                let f = i as f32 / tries as f32;
                let area = Bounds::new(view.x - f * left, view.y - f * top, view.x + f * right, view.y + f * bottom);
                let p = self.random_point_in(size, area);
                if self.snapshot().is_safe(&self.arena, p.x, p.y, safe, cell_type::VIRUS) {
                    return Some(p);
                }
            }
        }

        self.safe_point(safe)
    }

    /// Rejection-sample a point whose surroundings hold nothing up to virus type.
    pub(super) fn safe_point(&mut self, r: f32) -> Option<Vec2> {
        for _ in 0..self.config.world.safe_spawn_tries {
            let p = self.random_point(r);
            if self.snapshot().is_safe(&self.arena, p.x, p.y, r, cell_type::VIRUS) {
                return Some(p);
            }
        }
        None
    }

    pub(super) fn random_point(&mut self, size: f32) -> Vec2 {
        let (hw, hh) = (self.config.world.map_hw, self.config.world.map_hh);
        self.random_point_in(size, Bounds::new(-hw, -hh, hw, hh))
    }

    /// Uniform point in `area`, shrunk so a cell of radius `size` stays on the map.
    fn random_point_in(&mut self, size: f32, area: Bounds) -> Vec2 {
        let min = self.clamp_point(Vec2::new(area.min_x, area.min_y), size);
        let max = self.clamp_point(Vec2::new(area.max_x, area.max_y), size);
        let x = min.x + self.rng.random::<f32>() * (max.x - min.x);
        let y = min.y + self.rng.random::<f32>() * (max.y - min.y);
        Vec2::new(x, y)
    }

    fn clamp_point(&self, p: Vec2, size: f32) -> Vec2 {
        let (hw, hh) = (self.config.world.map_hw, self.config.world.map_hh);
        Vec2::new(
            p.x.max(-hw + size).min(hw - size),
            p.y.max(-hh + size).min(hh - size),
        )
    }
}
