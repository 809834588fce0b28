//! Read-only view over a serialized quadtree.
//!
//! The resolver and the visibility queries walk this flat buffer instead of
//! the live tree, so they never hold references into the mutable node arena.

use super::quadtree::{QuadBox, NODE_RECORD_SIZE};
use crate::arena::{CellArena, CellId};

/// Axis-aligned query box.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Bounds {
    pub fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Box around a center with half extents.
    #[inline]
    pub fn from_center(cx: f32, cy: f32, hw: f32, hh: f32) -> Self {
        Self {
            min_x: cx - hw,
            min_y: cy - hh,
            max_x: cx + hw,
            max_y: cy + hh,
        }
    }

    /// Whether the circle touches or overlaps this box.
    #[inline]
    pub fn intersects_circle(&self, x: f32, y: f32, r: f32) -> bool {
        let dx = x - x.clamp(self.min_x, self.max_x);
        let dy = y - y.clamp(self.min_y, self.max_y);
        dx * dx + dy * dy <= r * r
    }

    #[inline]
    fn overlaps_quad(&self, q: &QuadBox) -> bool {
        self.min_x <= q.x + q.hw && self.max_x >= q.x - q.hw && self.min_y <= q.y + q.hh && self.max_y >= q.y - q.hh
    }

    #[inline]
    fn covers_quad(&self, q: &QuadBox) -> bool {
        self.min_x < q.x - q.hw && self.max_x > q.x + q.hw && self.min_y < q.y - q.hh && self.max_y > q.y + q.hh
    }
}

/// A flattened quadtree plus the root extents needed to rebuild node boxes.
#[derive(Debug, Clone, Copy)]
pub struct SerializedTree<'a> {
    buf: &'a [u8],
    root: QuadBox,
}

#[derive(Debug, Clone, Copy)]
struct NodeRef {
    offset: usize,
    bounds: QuadBox,
}

impl<'a> SerializedTree<'a> {
    pub fn new(buf: &'a [u8], root: QuadBox) -> Self {
        Self { buf, root }
    }

    #[inline]
    fn read_u16(&self, at: usize) -> u16 {
        u16::from_le_bytes([self.buf[at], self.buf[at + 1]])
    }

    #[inline]
    fn read_u32(&self, at: usize) -> u32 {
        u32::from_le_bytes([self.buf[at], self.buf[at + 1], self.buf[at + 2], self.buf[at + 3]])
    }

    #[inline]
    fn count(&self, node: &NodeRef) -> usize {
        self.read_u16(node.offset + 24) as usize
    }

    #[inline]
    fn item(&self, node: &NodeRef, i: usize) -> CellId {
        self.read_u16(node.offset + NODE_RECORD_SIZE + 2 * i)
    }

    fn children(&self, node: &NodeRef) -> Option<[NodeRef; 4]> {
        let first = self.read_u32(node.offset + 8) as usize;
        if first == 0 {
            return None;
        }
        Some(std::array::from_fn(|q| NodeRef {
            offset: self.read_u32(node.offset + 8 + 4 * q) as usize,
            bounds: node.bounds.child(q),
        }))
    }

    /// Visit every node whose box overlaps `area`, passing its item ids.
    pub fn for_each_in(&self, area: &Bounds, mut visit: impl FnMut(CellId)) {
        if self.buf.len() < NODE_RECORD_SIZE {
            return;
        }
        let mut stack = vec![NodeRef { offset: 0, bounds: self.root }];
        while let Some(node) = stack.pop() {
            if let Some(children) = self.children(&node) {
                stack.extend(children.into_iter().filter(|c| area.overlaps_quad(&c.bounds)));
            }
            for i in 0..self.count(&node) {
                visit(self.item(&node, i));
            }
        }
    }

    /// Collect every cell whose bounding circle intersects `area` into `out`.
    ///
    /// Nodes fully inside the area are copied wholesale without per-cell tests.
    pub fn select(&self, area: &Bounds, arena: &CellArena, out: &mut Vec<CellId>) {
        out.clear();
        if self.buf.len() < NODE_RECORD_SIZE {
            return;
        }
        let mut stack = vec![NodeRef { offset: 0, bounds: self.root }];
        while let Some(node) = stack.pop() {
            if area.covers_quad(&node.bounds) {
                self.collect_subtree(node, arena, out);
                continue;
            }
            if let Some(children) = self.children(&node) {
                stack.extend(children.into_iter().filter(|c| area.overlaps_quad(&c.bounds)));
            }
            for i in 0..self.count(&node) {
                let id = self.item(&node, i);
                let cell = &arena[id];
                if cell.exists() && area.intersects_circle(cell.x, cell.y, cell.r) {
                    out.push(id);
                }
            }
        }
    }

    fn collect_subtree(&self, node: NodeRef, arena: &CellArena, out: &mut Vec<CellId>) {
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            if let Some(children) = self.children(&node) {
                stack.extend(children);
            }
            for i in 0..self.count(&node) {
                let id = self.item(&node, i);
                if arena[id].exists() {
                    out.push(id);
                }
            }
        }
    }

    /// Whether no cell with type at or below `ignore_above` overlaps the circle.
    pub fn is_safe(&self, arena: &CellArena, x: f32, y: f32, r: f32, ignore_above: u8) -> bool {
        let area = Bounds::from_center(x, y, r, r);
        let mut safe = true;
        self.for_each_in(&area, |id| {
            if !safe {
                return;
            }
            let cell = &arena[id];
            if !cell.exists() || cell.cell_type > ignore_above {
                return;
            }
            let dx = cell.x - x;
            let dy = cell.y - y;
            let reach = r + cell.r;
            if dx * dx + dy * dy < reach * reach {
                safe = false;
            }
        });
        safe
    }
}
