//! Unsaved-geometry tracking.
//!
//! Keeps the last geometry the backend confirmed for every node and a single
//! "has unsaved changes" flag that gates the manual save action. Only used
//! for change detection; rendering always reads the store.

use crate::id::NodeId;
use crate::model::{Geometry, Node, Point};
use crate::store::CanvasStore;
use std::collections::HashMap;

/// Last confirmed geometry of one node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SavedGeometry {
    pub position: Point,
    pub width: f32,
    pub height: f32,
}

impl From<&Node> for SavedGeometry {
    fn from(node: &Node) -> Self {
        Self {
            position: node.position,
            width: node.width,
            height: node.height,
        }
    }
}

impl From<&Geometry> for SavedGeometry {
    fn from(row: &Geometry) -> Self {
        Self {
            position: Point::new(row.x, row.y),
            width: row.width,
            height: row.height,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirtyTracker {
    saved: HashMap<NodeId, SavedGeometry>,
    dirty: bool,
    tolerance: f32,
}

impl DirtyTracker {
    pub fn new(tolerance: f32) -> Self {
        Self {
            saved: HashMap::new(),
            dirty: false,
            tolerance,
        }
    }

    /// Rebuild the cache from a freshly loaded (or freshly saved) store.
    pub fn reset(&mut self, store: &CanvasStore) {
        self.saved = store.nodes().map(|n| (n.id, n.into())).collect();
        self.dirty = false;
    }

    /// Record `node`'s current geometry as confirmed.
    pub fn confirm(&mut self, node: &Node) {
        self.saved.insert(node.id, node.into());
    }

    /// Record a finished save of `rows`, then re-derive the flag from the
    /// live store: edits made while the save was in flight stay unsaved.
    pub fn saved_rows(&mut self, rows: &[Geometry], store: &CanvasStore) {
        for row in rows {
            self.saved.insert(row.id, row.into());
        }
        self.dirty = store.nodes().any(|n| self.differs(n));
    }

    pub fn forget(&mut self, id: NodeId) {
        self.saved.remove(&id);
    }

    pub fn saved(&self, id: NodeId) -> Option<SavedGeometry> {
        self.saved.get(&id).copied()
    }

    /// Whether `node` differs from its confirmed geometry beyond tolerance.
    /// Nodes never confirmed always count as changed.
    pub fn differs(&self, node: &Node) -> bool {
        let Some(saved) = self.saved.get(&node.id) else {
            return true;
        };
        node.position.differs(saved.position, self.tolerance)
            || (node.width - saved.width).abs() > self.tolerance
            || (node.height - saved.height).abs() > self.tolerance
    }

    /// Compare `node` to the cache and raise the flag if it moved.
    /// Returns whether it counted as a change.
    pub fn check(&mut self, node: &Node) -> bool {
        let changed = self.differs(node);
        if changed {
            log::trace!("{} has unsaved geometry", node.id);
            self.dirty = true;
        }
        changed
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
