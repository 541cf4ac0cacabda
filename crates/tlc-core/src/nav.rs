//! Breadcrumb navigation: which container is the open canvas root.

use crate::id::NodeId;
use smallvec::{SmallVec, smallvec};

/// One breadcrumb entry. `id: None` is the absolute root ("Home").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crumb {
    pub id: Option<NodeId>,
    pub title: String,
}

/// Ordered path from Home to the currently open container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breadcrumbs {
    stack: SmallVec<[Crumb; 4]>,
}

impl Default for Breadcrumbs {
    fn default() -> Self {
        Self::new()
    }
}

impl Breadcrumbs {
    pub const HOME: &'static str = "Home";

    pub fn new() -> Self {
        Self {
            stack: smallvec![Crumb {
                id: None,
                title: Self::HOME.to_string(),
            }],
        }
    }

    /// The open root (`None` = Home).
    pub fn current(&self) -> Option<NodeId> {
        self.stack.last().and_then(|c| c.id)
    }

    pub fn crumbs(&self) -> &[Crumb] {
        &self.stack
    }

    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    /// Open `id` as the root.
    ///
    /// `None` resets to Home. Revisiting an entry already on the path
    /// truncates back to it instead of appending a duplicate.
    pub fn navigate(&mut self, id: Option<NodeId>, title: impl Into<String>) {
        let Some(target) = id else {
            self.stack.truncate(1);
            log::debug!("navigate: home");
            return;
        };

        if let Some(pos) = self.stack.iter().position(|c| c.id == Some(target)) {
            self.stack.truncate(pos + 1);
            log::debug!("navigate: back to {target} (depth {})", self.depth());
        } else {
            self.stack.push(Crumb {
                id: Some(target),
                title: title.into(),
            });
            log::debug!("navigate: into {target} (depth {})", self.depth());
        }
    }

    /// Pop one level; no-op at Home.
    pub fn up(&mut self) -> Option<NodeId> {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
        self.current()
    }

    /// Drop entries for containers that no longer exist, keeping the
    /// path up to the first missing one.
    pub fn retain_existing(&mut self, exists: impl Fn(NodeId) -> bool) {
        if let Some(pos) = self
            .stack
            .iter()
            .position(|c| c.id.is_some_and(|id| !exists(id)))
        {
            self.stack.truncate(pos);
        }
    }

    /// Update the title shown for `id` (after a rename).
    pub fn rename(&mut self, id: NodeId, title: &str) {
        for crumb in self.stack.iter_mut().filter(|c| c.id == Some(id)) {
            crumb.title = title.to_string();
        }
    }
}
