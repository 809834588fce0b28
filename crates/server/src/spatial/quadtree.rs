//! Dynamic quadtree over arena cells.
//!
//! Nodes live in a flat arena addressed by [`NodeId`]; each cell id maps back
//! to its owning node and its slot in that node's item list, so removal is
//! O(1) and relocation only walks the levels that actually change.

use crate::arena::{Cell, CellArena, CellId};
use tracing::error;

/// Index of a node in the tree's node arena.
pub type NodeId = u32;

const NO_NODE: NodeId = NodeId::MAX;

/// Size of a serialized node record without its item ids.
pub const NODE_RECORD_SIZE: usize = 26;

/// Node box given by its center and half extents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadBox {
    pub x: f32,
    pub y: f32,
    pub hw: f32,
    pub hh: f32,
}

impl QuadBox {
    pub const fn new(x: f32, y: f32, hw: f32, hh: f32) -> Self {
        Self { x, y, hw, hh }
    }

    /// Whether a circle lies strictly inside this box.
    #[inline]
    pub fn contains_circle(&self, x: f32, y: f32, r: f32) -> bool {
        x - r > self.x - self.hw
            && x + r < self.x + self.hw
            && y + r < self.y + self.hh
            && y - r > self.y - self.hh
    }

    /// Quadrant (0 = top-left, 1 = top-right, 2 = bottom-left, 3 = bottom-right)
    /// that a circle falls in without crossing the center lines.
    #[inline]
    pub fn quadrant(&self, x: f32, y: f32, r: f32) -> Option<usize> {
        if y - r > self.y {
            if x + r < self.x {
                return Some(0);
            } else if x - r > self.x {
                return Some(1);
            }
        } else if y + r < self.y {
            if x + r < self.x {
                return Some(2);
            } else if x - r > self.x {
                return Some(3);
            }
        }
        None
    }

    /// Box of one quadrant, in the same order as [`QuadBox::quadrant`].
    #[inline]
    pub fn child(&self, quadrant: usize) -> QuadBox {
        let qw = self.hw / 2.0;
        let qh = self.hh / 2.0;
        match quadrant {
            0 => QuadBox::new(self.x - qw, self.y + qh, qw, qh),
            1 => QuadBox::new(self.x + qw, self.y + qh, qw, qh),
            2 => QuadBox::new(self.x - qw, self.y - qh, qw, qh),
            _ => QuadBox::new(self.x + qw, self.y - qh, qw, qh),
        }
    }
}

#[derive(Debug, Clone)]
struct QuadNode {
    bounds: QuadBox,
    level: u32,
    parent: Option<NodeId>,
    children: Option<[NodeId; 4]>,
    items: Vec<CellId>,
}

impl QuadNode {
    fn new(bounds: QuadBox, level: u32, parent: Option<NodeId>) -> Self {
        Self {
            bounds,
            level,
            parent,
            children: None,
            items: Vec::new(),
        }
    }

    #[inline]
    fn is_empty_leaf(&self) -> bool {
        self.children.is_none() && self.items.is_empty()
    }
}

/// Quadtree spatial index keyed by [`CellId`].
pub struct QuadTree {
    nodes: Vec<QuadNode>,
    free_nodes: Vec<NodeId>,
    /// Owning node per cell id, `NO_NODE` when not indexed.
    owner: Vec<NodeId>,
    /// Position of the cell id inside its owner's item list.
    slot: Vec<u32>,
    max_items: usize,
    max_level: u32,
}

const ROOT: NodeId = 0;

impl QuadTree {
    /// Create a tree covering `[-hw, hw] x [-hh, hh]` for ids below `cell_capacity`.
    pub fn new(hw: f32, hh: f32, max_items: usize, max_level: u32, cell_capacity: usize) -> Self {
        Self {
            nodes: vec![QuadNode::new(QuadBox::new(0.0, 0.0, hw, hh), 1, None)],
            free_nodes: Vec::new(),
            owner: vec![NO_NODE; cell_capacity],
            slot: vec![0; cell_capacity],
            max_items,
            max_level,
        }
    }

    #[inline]
    pub fn root_bounds(&self) -> QuadBox {
        self.nodes[ROOT as usize].bounds
    }

    /// Whether the cell id currently has an owning node.
    #[inline]
    pub fn contains(&self, id: CellId) -> bool {
        self.owner_of(id).is_some()
    }

    #[inline]
    fn owner_of(&self, id: CellId) -> Option<NodeId> {
        match self.owner.get(id as usize) {
            Some(&node) if node != NO_NODE => Some(node),
            _ => None,
        }
    }

    /// Number of nodes currently in the tree.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free_nodes.len()
    }

    /// Number of indexed cell ids.
    pub fn item_count(&self) -> usize {
        self.owner.iter().filter(|&&n| n != NO_NODE).count()
    }

    /// True when the tree is a single leaf with no items.
    pub fn is_empty(&self) -> bool {
        self.nodes[ROOT as usize].is_empty_leaf()
    }

    /// Index a cell at the deepest existing node that fully contains it.
    pub fn insert(&mut self, id: CellId, arena: &CellArena) {
        if (id as usize) >= self.owner.len() {
            error!("Quadtree insert of out-of-range cell #{}", id);
            return;
        }
        if self.contains(id) {
            error!("Quadtree insert of cell #{} which is already indexed", id);
            return;
        }
        let node = self.descend(ROOT, &arena[id]);
        self.attach(id, node);
        self.split(node, arena);
    }

    /// Drop a cell from the index and collapse emptied branches.
    pub fn remove(&mut self, id: CellId) {
        let Some(node) = self.owner_of(id) else {
            error!("Quadtree remove of cell #{} which is not indexed", id);
            return;
        };
        if self.detach(id, node) {
            self.merge(node);
        }
    }

    /// Move a cell to the node matching its current geometry.
    pub fn update(&mut self, id: CellId, arena: &CellArena) {
        let Some(old) = self.owner_of(id) else {
            error!("Quadtree update of cell #{} which is not indexed", id);
            self.insert(id, arena);
            return;
        };
        let cell = &arena[id];

        let mut node = old;
        while let Some(parent) = self.nodes[node as usize].parent {
            node = parent;
            if self.nodes[node as usize].bounds.contains_circle(cell.x, cell.y, cell.r) {
                break;
            }
        }
        let new = self.descend(node, cell);
        if new == old {
            return;
        }

        self.detach(id, old);
        self.attach(id, new);
        self.merge(old);
        self.split(new, arena);
    }

    /// Put `new` in the slot held by `old` without touching geometry.
    pub fn swap(&mut self, old: CellId, new: CellId) {
        let Some(node) = self.owner_of(old) else {
            error!("Quadtree swap from cell #{} which is not indexed", old);
            return;
        };
        if self.contains(new) {
            error!("Quadtree swap into cell #{} which is already indexed", new);
            return;
        }
        let slot = self.slot[old as usize];
        self.nodes[node as usize].items[slot as usize] = new;
        self.owner[new as usize] = node;
        self.slot[new as usize] = slot;
        self.owner[old as usize] = NO_NODE;
    }

    /// Drop every node and item.
    pub fn clear(&mut self) {
        let bounds = self.root_bounds();
        self.nodes.clear();
        self.nodes.push(QuadNode::new(bounds, 1, None));
        self.free_nodes.clear();
        self.owner.fill(NO_NODE);
    }

    fn descend(&self, mut node: NodeId, cell: &Cell) -> NodeId {
        loop {
            let n = &self.nodes[node as usize];
            let Some(children) = n.children else {
                return node;
            };
            match n.bounds.quadrant(cell.x, cell.y, cell.r) {
                Some(q) => node = children[q],
                None => return node,
            }
        }
    }

    fn attach(&mut self, id: CellId, node: NodeId) {
        let items = &mut self.nodes[node as usize].items;
        self.slot[id as usize] = items.len() as u32;
        items.push(id);
        self.owner[id as usize] = node;
    }

    fn detach(&mut self, id: CellId, node: NodeId) -> bool {
        let slot = self.slot[id as usize] as usize;
        let items = &mut self.nodes[node as usize].items;
        if items.get(slot) != Some(&id) {
            error!("Cell #{} missing from its quadtree node #{}", id, node);
            self.owner[id as usize] = NO_NODE;
            return false;
        }
        items.swap_remove(slot);
        if let Some(&moved) = items.get(slot) {
            self.slot[moved as usize] = slot as u32;
        }
        self.owner[id as usize] = NO_NODE;
        true
    }

    fn alloc_node(&mut self, node: QuadNode) -> NodeId {
        match self.free_nodes.pop() {
            Some(id) => {
                self.nodes[id as usize] = node;
                id
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as NodeId
            }
        }
    }

    fn split(&mut self, node: NodeId, arena: &CellArena) {
        let n = &self.nodes[node as usize];
        if n.children.is_some() || n.items.len() <= self.max_items || n.level >= self.max_level {
            return;
        }
        let bounds = n.bounds;
        let level = n.level + 1;

        let mut children = [NO_NODE; 4];
        for (q, child) in children.iter_mut().enumerate() {
            *child = self.alloc_node(QuadNode::new(bounds.child(q), level, Some(node)));
        }
        self.nodes[node as usize].children = Some(children);

        let items = std::mem::take(&mut self.nodes[node as usize].items);
        for id in items {
            let cell = &arena[id];
            match bounds.quadrant(cell.x, cell.y, cell.r) {
                Some(q) => self.attach(id, children[q]),
                None => self.attach(id, node),
            }
        }
    }

    fn merge(&mut self, start: NodeId) {
        let mut current = Some(start);
        while let Some(node) = current {
            let n = &self.nodes[node as usize];
            if let Some(children) = n.children {
                if !children.iter().all(|&c| self.nodes[c as usize].is_empty_leaf()) {
                    return;
                }
                self.nodes[node as usize].children = None;
                self.free_nodes.extend_from_slice(&children);
            }
            current = self.nodes[node as usize].parent;
        }
    }

    /// Flatten the tree depth-first into `out` (cleared first).
    ///
    /// Each record is `f32 x, f32 y, u32 children[4], u16 count, u16 ids[count]`,
    /// little-endian. Child pointers are byte offsets into `out`; a leaf has
    /// all four set to 0. The root record starts at offset 0.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.clear();
        self.write_node(ROOT, out);
    }

    fn write_node(&self, node: NodeId, out: &mut Vec<u8>) -> u32 {
        let n = &self.nodes[node as usize];
        let offset = out.len();
        out.extend_from_slice(&n.bounds.x.to_le_bytes());
        out.extend_from_slice(&n.bounds.y.to_le_bytes());
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&(n.items.len() as u16).to_le_bytes());
        for id in &n.items {
            out.extend_from_slice(&id.to_le_bytes());
        }
        if let Some(children) = n.children {
            for (i, child) in children.into_iter().enumerate() {
                let ptr = self.write_node(child, out);
                let at = offset + 8 + i * 4;
                out[at..at + 4].copy_from_slice(&ptr.to_le_bytes());
            }
        }
        offset as u32
    }

    /// Ids per node, for invariant checks in tests.
    #[cfg(test)]
    pub(crate) fn occurrences(&self, id: CellId) -> usize {
        let mut count = 0;
        let mut stack = vec![ROOT];
        while let Some(node) = stack.pop() {
            let n = &self.nodes[node as usize];
            count += n.items.iter().filter(|&&i| i == id).count();
            if let Some(children) = n.children {
                stack.extend_from_slice(&children);
            }
        }
        count
    }

    /// Whether every item sits in a node whose box contains it.
    #[cfg(test)]
    pub(crate) fn items_contained(&self, arena: &CellArena) -> bool {
        let mut stack = vec![ROOT];
        while let Some(node) = stack.pop() {
            let n = &self.nodes[node as usize];
            if node != ROOT {
                for &id in &n.items {
                    let c = &arena[id];
                    if !n.bounds.contains_circle(c.x, c.y, c.r) {
                        return false;
                    }
                }
            }
            if let Some(children) = n.children {
                stack.extend_from_slice(&children);
            }
        }
        true
    }
}

impl std::fmt::Debug for QuadTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuadTree")
            .field("nodes", &self.node_count())
            .field("bounds", &self.root_bounds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Boost;
    use proptest::prelude::*;

    fn tree_with(capacity: usize) -> (QuadTree, CellArena) {
        (QuadTree::new(1000.0, 1000.0, 4, 8, capacity), CellArena::new(capacity))
    }

    #[test]
    fn test_quadrant() {
        let b = QuadBox::new(0.0, 0.0, 100.0, 100.0);
        assert_eq!(b.quadrant(-50.0, 50.0, 10.0), Some(0));
        assert_eq!(b.quadrant(50.0, 50.0, 10.0), Some(1));
        assert_eq!(b.quadrant(-50.0, -50.0, 10.0), Some(2));
        assert_eq!(b.quadrant(50.0, -50.0, 10.0), Some(3));
        assert_eq!(b.quadrant(5.0, 50.0, 10.0), None);
        assert_eq!(b.child(0), QuadBox::new(-50.0, 50.0, 50.0, 50.0));
    }

    #[test]
    fn test_split_keeps_straddlers_at_parent() {
        let (mut tree, mut arena) = tree_with(64);
        let straddler = arena.allocate(0.0, 0.0, 20.0, 254, Boost::NONE).unwrap();
        tree.insert(straddler, &arena);
        for i in 0..5 {
            let id = arena.allocate(-500.0 + i as f32 * 10.0, 500.0, 5.0, 254, Boost::NONE).unwrap();
            tree.insert(id, &arena);
        }
        assert!(tree.node_count() > 1);
        assert_eq!(tree.owner_of(straddler), Some(ROOT));
        assert!(tree.items_contained(&arena));
    }

    #[test]
    fn test_update_relocates_and_merges() {
        let (mut tree, mut arena) = tree_with(64);
        let ids: Vec<_> = (0..6)
            .map(|i| {
                let id = arena.allocate(-600.0 + i as f32 * 20.0, 600.0, 5.0, 254, Boost::NONE).unwrap();
                tree.insert(id, &arena);
                id
            })
            .collect();
        let moved = ids[0];
        arena[moved].x = 600.0;
        arena[moved].y = -600.0;
        tree.update(moved, &arena);
        assert_eq!(tree.occurrences(moved), 1);
        assert!(tree.items_contained(&arena));

        for id in ids {
            tree.remove(id);
        }
        assert!(tree.is_empty());
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_invariant_violations_are_tolerated() {
        let (mut tree, mut arena) = tree_with(8);
        let id = arena.allocate(0.0, 0.0, 5.0, 254, Boost::NONE).unwrap();
        tree.remove(id);
        tree.insert(id, &arena);
        tree.insert(id, &arena);
        assert_eq!(tree.occurrences(id), 1);
        tree.remove(id);
        tree.remove(id);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_swap_takes_over_slot() {
        let (mut tree, mut arena) = tree_with(8);
        let a = arena.allocate(10.0, 10.0, 5.0, 3, Boost::NONE).unwrap();
        let b = arena.allocate(10.0, 10.0, 5.0, 251, Boost::NONE).unwrap();
        tree.insert(a, &arena);
        tree.swap(a, b);
        assert!(!tree.contains(a));
        assert_eq!(tree.occurrences(b), 1);
        tree.remove(b);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_serialize_record_layout() {
        let (mut tree, mut arena) = tree_with(8);
        let id = arena.allocate(1.0, 2.0, 3.0, 254, Boost::NONE).unwrap();
        tree.insert(id, &arena);
        let mut buf = Vec::new();
        tree.serialize(&mut buf);
        assert_eq!(buf.len(), NODE_RECORD_SIZE + 2);
        assert_eq!(&buf[0..4], &0f32.to_le_bytes());
        assert_eq!(&buf[8..24], &[0u8; 16]);
        assert_eq!(&buf[24..26], &1u16.to_le_bytes());
        assert_eq!(&buf[26..28], &id.to_le_bytes());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(f32, f32, f32),
        Remove(usize),
        Move(usize, f32, f32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (-990.0f32..990.0, -990.0f32..990.0, 1.0f32..10.0).prop_map(|(x, y, r)| Op::Insert(x, y, r)),
            any::<usize>().prop_map(Op::Remove),
            (any::<usize>(), -990.0f32..990.0, -990.0f32..990.0).prop_map(|(i, x, y)| Op::Move(i, x, y)),
        ]
    }

    proptest! {
        #[test]
        fn prop_every_live_cell_has_exactly_one_node(ops in prop::collection::vec(op(), 1..200)) {
            let (mut tree, mut arena) = tree_with(512);
            let mut live: Vec<CellId> = Vec::new();
            for op in ops {
                match op {
                    Op::Insert(x, y, r) => {
                        if let Some(id) = arena.allocate(x, y, r, 254, Boost::NONE) {
                            tree.insert(id, &arena);
                            live.push(id);
                        }
                    }
                    Op::Remove(i) if !live.is_empty() => {
                        let id = live.swap_remove(i % live.len());
                        tree.remove(id);
                        arena.free(id);
                    }
                    Op::Move(i, x, y) if !live.is_empty() => {
                        let id = live[i % live.len()];
                        arena[id].x = x;
                        arena[id].y = y;
                        tree.update(id, &arena);
                    }
                    _ => {}
                }
            }
            for &id in &live {
                prop_assert_eq!(tree.occurrences(id), 1);
            }
            prop_assert_eq!(tree.item_count(), live.len());
            prop_assert!(tree.items_contained(&arena));
        }

        #[test]
        fn prop_insert_then_remove_restores_empty_root(
            cells in prop::collection::vec((-990.0f32..990.0, -990.0f32..990.0, 1.0f32..10.0), 0..150),
            seed in any::<u64>(),
        ) {
            let (mut tree, mut arena) = tree_with(512);
            let mut ids: Vec<CellId> = cells
                .iter()
                .filter_map(|&(x, y, r)| arena.allocate(x, y, r, 254, Boost::NONE))
                .collect();
            for &id in &ids {
                tree.insert(id, &arena);
            }
            // Deterministic shuffle so removal order differs from insertion order.
            let len = ids.len();
            for i in 0..len {
                let j = (seed.wrapping_mul(i as u64 + 1).rotate_left(17) as usize) % len;
                ids.swap(i, j);
            }
            for id in ids {
                tree.remove(id);
            }
            prop_assert!(tree.is_empty());
            prop_assert_eq!(tree.node_count(), 1);
        }
    }
}
