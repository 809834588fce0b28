//! Spatial indexing: the live quadtree and its flattened snapshot.

mod quadtree;
mod snapshot;

pub use quadtree::{NodeId, QuadBox, QuadTree, NODE_RECORD_SIZE};
pub use snapshot::{Bounds, SerializedTree};
