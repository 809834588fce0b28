//! Per-tick cell motion: boosts, steering, decay, borders and re-indexing.

use super::input::score_multi;
use super::Engine;
use crate::arena::{Cell, CellFlags, CellId, CellKind};
use crate::controller::LineLock;
use glam::Vec2;
use protocol::cell_type;
use rand::Rng;
use std::f32::consts::TAU;

/// Steering speed in world units per millisecond.
#[inline]
pub(super) fn move_speed(r: f32, player_speed: f32) -> f32 {
    1.76 * r.powf(-0.4396754) * player_speed
}

/// Move `p` by `step` along the line, keeping it on the line.
fn slide_on_line(line: &LineLock, p: Vec2, step: Vec2) -> Vec2 {
    let LineLock { a, b, c } = *line;
    if a != 0.0 {
        let y = p.y + step.y;
        Vec2::new((-c - b * y) / a, y)
    } else if b != 0.0 {
        let x = p.x + step.x;
        Vec2::new(x, (-c - a * x) / b)
    } else {
        p
    }
}

impl Engine {
    /// Age every cell, expire old ejected mass and apply boost travel.
    pub(super) fn update_cells(&mut self) {
        let dt = self.dt;
        let max_age = self.config.eject.max_age;
        for (_, cell) in self.arena.iter_mut() {
            cell.age = cell.age.saturating_add(1);
            cell.flags.retain(CellFlags::PERSISTENT);

            if cell.cell_type == cell_type::EJECTED && cell.age as f32 * dt > max_age {
                cell.flags.insert(CellFlags::REMOVE);
                cell.eaten_by = 0;
            }

            if cell.boost.active() {
                let db = cell.boost.d * 0.0025 * dt;
                cell.set_position(cell.position() + cell.boost.dir() * db);
                cell.boost.d -= db;
                if cell.owner().is_none() {
                    cell.flags.insert(CellFlags::UPDATED);
                }
            }
        }
    }

    /// Merge eligibility and steering towards the mouse.
    pub(super) fn update_player_cells(&mut self) {
        let dt = self.dt;
        let speed = self.config.player.speed;
        for c in self.controllers.iter() {
            let mouse = c.mouse();
            let norm = 1.0 / score_multi(c.score, self.config.player.normalize_thresh_mass);
            for &id in &c.cells {
                let cell = &mut self.arena[id];
                if merge_ready(cell, dt, norm, &self.config.player) {
                    cell.flags.insert(CellFlags::MERGE);
                }
                if c.lock.is_some() {
                    cell.flags.insert(CellFlags::LOCKED);
                }

                let delta = mouse - cell.position();
                let d = delta.length();
                if d < 1.0 {
                    continue;
                }
                let step = delta / d * (move_speed(cell.r, speed) * dt).min(d);
                let next = match &c.lock {
                    Some(line) => slide_on_line(line, cell.position(), step),
                    None => cell.position() + step,
                };
                cell.set_position(next);
            }
        }
    }

    /// Player decay and autosplit marking, then the map border for every cell.
    pub(super) fn decay_and_clamp(&mut self) {
        let dt = self.dt;
        let player = &self.config.player;
        let (hw, hh) = (self.config.world.map_hw, self.config.world.map_hh);
        let decay_min = player.decay_min_size;
        let auto = player.autosplit_size;

        let mut scores = [0.0f32; CellKind::MAX_PLAYER as usize + 1];
        for c in self.controllers.iter() {
            scores[c.id as usize] = c.score;
        }

        for (_, cell) in self.arena.iter_mut() {
            if let Some(owner) = cell.owner() {
                let multi = ((scores[owner as usize] - 0.01 * decay_min * decay_min) * 0.00005 * player.dynamic_decay)
                    .max(1.0);
                if cell.r > decay_min {
                    cell.r -= multi * cell.r * player.static_decay * 0.01 * dt * 0.0001;
                }

                if auto > 0.0 && cell.r > auto {
                    if !cell.flags.contains(CellFlags::AUTO) {
                        cell.flags.insert(CellFlags::AUTO);
                        cell.age = 0;
                    }
                } else {
                    cell.flags.remove(CellFlags::AUTO);
                }
            }
            clamp_to_map(cell, hw, hh);
        }
    }

    /// A lock breaks once any owned cell hits the wall.
    pub(super) fn release_wall_locks(&mut self) {
        let arena = &self.arena;
        for c in self.controllers.iter_mut() {
            if c.lock.is_some() && c.cells.iter().any(|&id| arena[id].flags.contains(CellFlags::UPDATED)) {
                c.lock = None;
            }
        }
    }

    /// Run due autosplits and push moved cells back into the tree.
    pub(super) fn reindex(&mut self) {
        let delay = self.config.player.autosplit_delay;
        let auto = self.config.player.autosplit_size;

        let mut ids = std::mem::take(&mut self.order);
        ids.clear();
        ids.extend(self.arena.iter().map(|(id, _)| id));
        for &id in &ids {
            let cell = self.arena[id];
            if auto > 0.0 && cell.flags.contains(CellFlags::AUTO) && cell.age as f32 * self.dt > delay {
                self.autosplit(id);
            }
            let cell = &self.arena[id];
            if cell.owner().is_some() || cell.flags.contains(CellFlags::UPDATED) {
                self.tree.update(id, &self.arena);
            }
        }
        self.order = ids;
    }

    /// Break an oversized cell into the fewest pieces that fit under the autosplit size.
    /// Pieces keep the parent's type; only player cells are capped at `max_cells`.
    fn autosplit(&mut self, id: CellId) {
        let cell = self.arena[id];
        let player = &self.config.player;
        let (auto, max_cells, boost) = (player.autosplit_size, player.max_cells, player.split_boost);

        let pieces = (cell.r * cell.r / (auto * auto)).ceil() as usize;
        let size = (cell.r * cell.r / pieces.max(1) as f32).sqrt().min(auto);
        for _ in 1..pieces {
            if cell.owner().is_some_and(|owner| self.owned_count(owner) >= max_cells) {
                break;
            }
            let angle = self.rng.random::<f32>() * TAU;
            self.split_from_cell(id, size, Vec2::new(angle.sin(), angle.cos()), boost);
        }
    }
}

/// `norm` shortens the merge delay of players past the normalize mass.
fn merge_ready(cell: &Cell, dt: f32, norm: f32, player: &crate::config::PlayerConfig) -> bool {
    let age = cell.age as f32 * dt;
    if player.merge_time <= 0.0 {
        age > player.no_merge_delay
    } else if player.merge_new_ver {
        age > 1000.0 * player.merge_time
            && age > norm * (25.0 * cell.r * player.merge_increase).max(player.no_merge_delay)
    } else {
        age > player.no_merge_delay && age > norm * (1000.0 * player.merge_time + player.merge_increase)
    }
}

/// Keep the whole circle inside the map, bouncing boosted cells off the wall.
fn clamp_to_map(cell: &mut Cell, hw: f32, hh: f32) {
    let r = cell.r;
    let mut hit = false;
    if cell.x < -hw + r {
        cell.x = -hw + r;
        cell.boost.x = cell.boost.x.abs();
        hit = true;
    } else if cell.x > hw - r {
        cell.x = hw - r;
        cell.boost.x = -cell.boost.x.abs();
        hit = true;
    }
    if cell.y < -hh + r {
        cell.y = -hh + r;
        cell.boost.y = cell.boost.y.abs();
        hit = true;
    } else if cell.y > hh - r {
        cell.y = hh - r;
        cell.boost.y = -cell.boost.y.abs();
        hit = true;
    }
    if hit {
        cell.flags.insert(CellFlags::UPDATED);
    }
}
