//! Per-connection visibility deltas.
//!
//! Every tick each viewer queries the serialized tree with its controller's
//! viewport, diffs the result against what it sent last time and writes one
//! VisibilityDelta packet into a pooled scratch buffer.

use crate::arena::{CellFlags, CellId};
use crate::controller::Viewport;
use crate::engine::Engine;
use crate::error::Error;
use bytes::Bytes;
use fixedbitset::FixedBitSet;
use glam::Vec2;
use protocol::packets::server::{
    build_clear, visibility_delta_size, write_visibility_delta, AddedCell, EatenCell, UpdatedCell,
};
use protocol::{cell_type, BinaryWriter, PAGE_SIZE};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Outbound side of a connection as the core sees it.
pub trait Transport: Send + Sync {
    fn send(&self, data: Bytes);
    fn close(&self, code: u16, reason: &str);
    /// Bytes handed to `send` that have not reached the socket yet.
    fn buffered_bytes(&self) -> usize;
}

/// Fixed set of preallocated writers, one per admitted connection.
#[derive(Debug, Clone)]
pub struct ScratchPool {
    free: Arc<Mutex<Vec<BinaryWriter>>>,
}

impl ScratchPool {
    pub fn new(count: usize, pages: usize) -> Self {
        let free = (0..count)
            .map(|_| BinaryWriter::with_capacity(pages * PAGE_SIZE))
            .collect();
        Self {
            free: Arc::new(Mutex::new(free)),
        }
    }

    /// Take a writer out of the pool. It goes back when the lease drops.
    pub fn checkout(&self) -> Result<ScratchLease, Error> {
        let writer = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or(Error::PoolExhausted)?;
        Ok(ScratchLease {
            writer,
            pool: Arc::clone(&self.free),
        })
    }

    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A checked-out scratch writer.
#[derive(Debug)]
pub struct ScratchLease {
    writer: BinaryWriter,
    pool: Arc<Mutex<Vec<BinaryWriter>>>,
}

impl Deref for ScratchLease {
    type Target = BinaryWriter;

    fn deref(&self) -> &BinaryWriter {
        &self.writer
    }
}

impl DerefMut for ScratchLease {
    fn deref_mut(&mut self) -> &mut BinaryWriter {
        &mut self.writer
    }
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        let mut writer = std::mem::take(&mut self.writer);
        writer.clear();
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(writer);
    }
}

/// What [`Viewer::update`] did this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// A packet of this many bytes went to the transport.
    Sent(usize),
    /// The transport was over the watermark; nothing was sent.
    Skipped,
}

/// Visible-set bookkeeping of one connection.
#[derive(Debug)]
pub struct Viewer {
    scratch: ScratchLease,
    last: FixedBitSet,
    curr: FixedBitSet,
    last_list: Vec<CellId>,
    curr_list: Vec<CellId>,
    /// A skipped tick left the client's view unknown; start the next send with a Clear.
    resync: bool,
}

impl Viewer {
    /// `capacity` is the arena capacity; ids index the bitsets directly.
    pub fn new(scratch: ScratchLease, capacity: usize) -> Self {
        Self {
            scratch,
            last: FixedBitSet::with_capacity(capacity),
            curr: FixedBitSet::with_capacity(capacity),
            last_list: Vec::new(),
            curr_list: Vec::new(),
            resync: false,
        }
    }

    /// Forget what the client has seen, e.g. after it was sent a Clear.
    pub fn reset(&mut self) {
        self.last.clear();
        self.last_list.clear();
    }

    /// Cells the client currently knows about.
    pub fn visible(&self) -> &[CellId] {
        &self.last_list
    }

    /// Send the delta between the last sent view and `viewport` now.
    ///
    /// `None` means the controller sees nothing: no query runs and every
    /// previously visible cell goes out as deleted.
    pub fn update(
        &mut self,
        engine: &Engine,
        viewport: Option<&Viewport>,
        transport: &dyn Transport,
        watermark: usize,
    ) -> DeltaOutcome {
        if transport.buffered_bytes() > watermark {
            // Ids seen last may be freed and reused before the next send.
            if !self.last_list.is_empty() {
                self.reset();
                self.resync = true;
            }
            return DeltaOutcome::Skipped;
        }
        if std::mem::take(&mut self.resync) {
            transport.send(build_clear().finish());
        }

        let arena = engine.arena();
        match viewport {
            Some(viewport) => {
                engine.query(viewport, &mut self.curr_list);
                self.curr_list.retain(|&id| {
                    let cell = &arena[id];
                    cell.cell_type != cell_type::EJECTED || cell.age > 1
                });
            }
            None => self.curr_list.clear(),
        }

        self.curr.clear();
        self.curr.grow(arena.capacity());
        self.last.grow(arena.capacity());
        for &id in &self.curr_list {
            self.curr.insert(id as usize);
        }

        let (last, curr) = (&self.last, &self.curr);
        let added = self.curr_list.iter().filter(|&&id| !last.contains(id as usize));
        let updated = self
            .curr_list
            .iter()
            .filter(|&&id| last.contains(id as usize) && arena[id].cell_type != cell_type::PELLET);
        let gone = self.last_list.iter().filter(|&&id| !curr.contains(id as usize));
        let eaten = gone.clone().filter(|&&id| was_eaten(engine, id));
        let deleted = gone.filter(|&&id| !was_eaten(engine, id));

        let size = visibility_delta_size(
            added.clone().count(),
            updated.clone().count(),
            eaten.clone().count(),
            deleted.clone().count(),
        );
        let w: &mut BinaryWriter = &mut self.scratch;
        w.clear();
        let pages = w.grow_pages(size);
        if pages > 0 {
            debug!("Grew scratch buffer by {} page(s) for a {} byte delta", pages, size);
        }

        write_visibility_delta(
            w,
            viewport.map_or(Vec2::ZERO, Viewport::center),
            added.map(|&id| {
                let c = &arena[id];
                AddedCell { id, cell_type: c.cell_type, x: c.x, y: c.y, r: c.r }
            }),
            updated.map(|&id| {
                let c = &arena[id];
                UpdatedCell { id, x: c.x, y: c.y, r: c.r }
            }),
            eaten.map(|&id| EatenCell { id, eaten_by: arena[id].eaten_by }),
            deleted.copied(),
        );
        transport.send(w.take());

        std::mem::swap(&mut self.last, &mut self.curr);
        std::mem::swap(&mut self.last_list, &mut self.curr_list);
        DeltaOutcome::Sent(size)
    }
}

fn was_eaten(engine: &Engine, id: CellId) -> bool {
    engine
        .arena()
        .get(id)
        .is_some_and(|c| c.flags.contains(CellFlags::REMOVE) && c.eaten_by != 0)
}
