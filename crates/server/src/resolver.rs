//! Pairwise cell interactions for one tick.
//!
//! [`resolve`] walks a serialized quadtree, lets every acting cell meet the
//! cells in the nodes its box overlaps, and leaves the outcome in the cell
//! flags (REMOVE, POP, UPDATED, INSIDE). Removing and splitting is left to the
//! engine.

use crate::arena::{Boost, Cell, CellArena, CellFlags, CellId, CellKind};
use crate::config::Config;
use crate::spatial::{Bounds, SerializedTree};
use glam::Vec2;

/// What happens when an acting cell meets a smaller or equal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    NoInteraction,
    /// Same owner, both merge-eligible.
    Merge,
    Eat,
    /// Elastic separation.
    Bounce,
    /// Eating the other cell explodes the eater.
    Pop,
}

/// Thresholds the resolver needs, with delays in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolveParams {
    /// Milliseconds per tick of age.
    pub dt: f32,
    pub no_colli_delay: f32,
    pub eat_overlap: f32,
    pub eat_mult: f32,
    /// Boost added to a fed virus, 0 when pushing is off.
    pub virus_push: f32,
    pub virus_max_boost: f32,
    pub virus_max_size: f32,
    pub dead_delay: f32,
}

impl ResolveParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dt: config.dt(),
            no_colli_delay: config.player.no_colli_delay,
            eat_overlap: config.world.eat_overlap,
            eat_mult: config.world.eat_mult,
            virus_push: if config.virus.push { config.virus.push_boost } else { 0.0 },
            virus_max_boost: config.virus.max_boost,
            virus_max_size: config.virus_max_size(),
            dead_delay: config.player.dead_delay,
        }
    }

    #[inline]
    fn age_ms(&self, cell: &Cell) -> f32 {
        cell.age as f32 * self.dt
    }
}

/// Counters from one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Overlapping pairs that were acted on.
    pub collisions: u32,
    pub eaten: u32,
    /// Husks that outlived the dead delay.
    pub expired: u32,
}

/// Rule table for an acting cell `me` against `other`.
pub fn classify(me: &Cell, other: &Cell, params: &ResolveParams) -> Interaction {
    let (Some(a), Some(b)) = (me.kind(), other.kind()) else {
        return Interaction::NoInteraction;
    };
    match (a, b) {
        (CellKind::Player(p), CellKind::Player(q)) if p == q => {
            if me.flags.contains(CellFlags::MERGE) && other.flags.contains(CellFlags::MERGE) {
                Interaction::Merge
            } else if params.age_ms(me) > params.no_colli_delay && params.age_ms(other) > params.no_colli_delay {
                Interaction::Bounce
            } else {
                Interaction::NoInteraction
            }
        }
        (CellKind::Player(_), CellKind::Virus | CellKind::Mother) => Interaction::Pop,
        (CellKind::Player(_), _) => Interaction::Eat,
        (CellKind::Virus, CellKind::Ejected) => Interaction::Eat,
        (CellKind::Ejected, CellKind::Ejected) => Interaction::Bounce,
        (CellKind::Dead, CellKind::Dead) => Interaction::Bounce,
        _ => Interaction::NoInteraction,
    }
}

/// Whether `me` is big enough and deep enough into `other` to swallow it.
#[inline]
pub fn can_eat(me: &Cell, other: &Cell, d: f32, merge: bool, params: &ResolveParams) -> bool {
    (merge || me.r >= other.r * params.eat_mult) && d <= me.r + other.r - params.eat_overlap
}

/// Run one resolution pass.
///
/// `order` lists the acting cells, largest first. Cells that are removed,
/// popped or covered by a sibling neither act nor get acted upon.
pub fn resolve(
    tree: &SerializedTree<'_>,
    arena: &mut CellArena,
    order: &[CellId],
    params: &ResolveParams,
) -> ResolveStats {
    let mut stats = ResolveStats::default();

    for &id in order {
        let mut me = arena[id];
        if !me.exists() || me.flags.intersects(CellFlags::SKIP_RESOLVE) {
            continue;
        }
        match me.kind() {
            None | Some(CellKind::Pellet) | Some(CellKind::Mother) => continue,
            Some(CellKind::Ejected) if !me.flags.contains(CellFlags::UPDATED) => continue,
            Some(CellKind::Dead) if params.age_ms(&me) > params.dead_delay => {
                arena[id].flags.insert(CellFlags::REMOVE);
                arena[id].eaten_by = 0;
                stats.expired += 1;
                continue;
            }
            _ => {}
        }

        let area = Bounds::from_center(me.x, me.y, me.r, me.r);
        tree.for_each_in(&area, |other_id| {
            if other_id == id {
                return;
            }
            let other = &mut arena[other_id];
            if !other.exists() || me.r < other.r || other.flags.intersects(CellFlags::SKIP_RESOLVE) {
                return;
            }
            let action = classify(&me, other, params);
            if action == Interaction::NoInteraction {
                return;
            }

            let delta = other.position() - me.position();
            let r_sum = me.r + other.r;
            let d_sqr = delta.length_squared();
            if d_sqr >= r_sum * r_sum {
                return;
            }
            let d = d_sqr.sqrt();
            stats.collisions += 1;

            match action {
                Interaction::Bounce => bounce(&mut me, other, delta, d),
                Interaction::Merge | Interaction::Eat | Interaction::Pop => {
                    if !can_eat(&me, other, d, action == Interaction::Merge, params) {
                        return;
                    }
                    eat(&mut me, other, id, action, params);
                    stats.eaten += 1;
                }
                Interaction::NoInteraction => {}
            }
        });

        arena[id] = me;
    }

    stats
}

fn bounce(me: &mut Cell, other: &mut Cell, delta: Vec2, d: f32) {
    if d <= 0.0 {
        return;
    }
    let dir = delta / d;
    let overlap = me.r + other.r - d;
    if d + other.r < me.r {
        other.flags.insert(CellFlags::INSIDE);
    }

    let a = me.r * me.r;
    let b = other.r * other.r;
    let sum = a + b;

    let push_me = overlap.min(me.r) * b / sum;
    me.set_position(me.position() - dir * push_me);
    let push_other = overlap.min(other.r) * a / sum;
    other.set_position(other.position() + dir * push_other);

    me.flags.insert(CellFlags::UPDATED);
    other.flags.insert(CellFlags::UPDATED);
}

fn eat(me: &mut Cell, other: &mut Cell, id: CellId, action: Interaction, params: &ResolveParams) {
    me.r = (me.r * me.r + other.r * other.r).sqrt();
    me.flags.insert(CellFlags::UPDATED);
    other.flags.insert(CellFlags::REMOVE);
    other.eaten_by = if action == Interaction::Pop { 0 } else { id };

    match (me.kind(), other.kind()) {
        (Some(CellKind::Player(_)), Some(CellKind::Ejected)) => {
            // Ejected mass hands part of its momentum to the eater.
            let ratio = other.r / (me.r + 100.0);
            me.boost.d += ratio * 0.025 * other.boost.d;
            let dir = (me.boost.dir() + ratio * 0.02 * other.boost.dir()).normalize_or_zero();
            me.boost = Boost::new(dir, me.boost.d);
        }
        (Some(CellKind::Virus), Some(CellKind::Ejected)) => feed_virus(me, other, params),
        _ => {}
    }

    if action == Interaction::Pop {
        me.flags.insert(CellFlags::POP);
    }
    // Non-player eaters are broken up by the autosplit pass once they outgrow it.
    if me.owner().is_none() {
        me.flags.insert(CellFlags::AUTO);
    }
}

fn feed_virus(virus: &mut Cell, ejected: &Cell, params: &ResolveParams) {
    if params.virus_max_size > 0.0 && virus.r >= params.virus_max_size {
        virus.flags.insert(CellFlags::POP);
        virus.boost = Boost::new(ejected.boost.dir(), virus.boost.d);
    }
    if params.virus_push > 0.0 {
        let boost = (virus.boost.d + params.virus_push).min(params.virus_max_boost);
        let dir = (virus.boost.dir() * virus.boost.d + ejected.boost.dir() * params.virus_push).normalize_or_zero();
        virus.boost = Boost::new(dir, boost);
    }
}
