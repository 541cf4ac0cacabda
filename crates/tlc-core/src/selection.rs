//! Edge highlighting driven by the node selection.
//!
//! Every render asks the highlighter for edge styles. It remembers the
//! previous selection and only restyles when membership actually changed
//! (or the edge set was invalidated), so unrelated re-renders don't churn
//! every edge.

use crate::id::{EdgeId, NodeId};
use crate::model::{Color, Edge};
use std::collections::{HashMap, HashSet};

pub const DEFAULT_EDGE_COLOR: Color = Color::rgba(0.58, 0.64, 0.72, 1.0);
pub const HIGHLIGHT_EDGE_COLOR: Color = Color::rgba(0.96, 0.62, 0.04, 1.0);

/// Resolved on-screen style of one edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeVisual {
    pub color: Color,
    pub width: f32,
    pub z_index: i32,
    /// Dash pattern `(dash, gap)`; `None` is solid.
    pub dash: Option<(f32, f32)>,
    pub animated: bool,
    pub highlighted: bool,
}

impl EdgeVisual {
    /// The edge's own persisted style.
    pub fn resting(edge: &Edge) -> Self {
        Self {
            color: edge
                .color
                .as_deref()
                .and_then(Color::from_hex)
                .unwrap_or(DEFAULT_EDGE_COLOR),
            width: 1.5,
            z_index: 0,
            dash: None,
            animated: edge.animated,
            highlighted: false,
        }
    }

    pub fn highlighted(edge: &Edge) -> Self {
        Self {
            color: HIGHLIGHT_EDGE_COLOR,
            width: 3.0,
            z_index: 1000,
            dash: Some((6.0, 4.0)),
            animated: edge.animated,
            highlighted: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EdgeHighlighter {
    previous: Option<HashSet<NodeId>>,
    styles: HashMap<EdgeId, EdgeVisual>,
}

impl EdgeHighlighter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the next `react` to restyle (edges were added/removed/edited).
    pub fn invalidate(&mut self) {
        self.previous = None;
    }

    /// Restyle `edges` for `selected` if the selection changed.
    /// Returns whether a restyle happened.
    pub fn react<'a>(
        &mut self,
        selected: &HashSet<NodeId>,
        edges: impl IntoIterator<Item = &'a Edge>,
    ) -> bool {
        if self.previous.as_ref().is_some_and(|prev| same_members(prev, selected)) {
            return false;
        }

        self.styles = edges
            .into_iter()
            .map(|edge| {
                let lit = selected.contains(&edge.source) || selected.contains(&edge.target);
                let visual = if lit {
                    EdgeVisual::highlighted(edge)
                } else {
                    EdgeVisual::resting(edge)
                };
                (edge.id, visual)
            })
            .collect();
        self.previous = Some(selected.clone());
        log::debug!("restyled {} edges for {} selected", self.styles.len(), selected.len());
        true
    }

    pub fn visual(&self, id: EdgeId) -> Option<&EdgeVisual> {
        self.styles.get(&id)
    }

    pub fn highlighted(&self) -> Vec<EdgeId> {
        let mut ids: Vec<EdgeId> = self
            .styles
            .iter()
            .filter(|(_, v)| v.highlighted)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }
}

fn same_members(a: &HashSet<NodeId>, b: &HashSet<NodeId>) -> bool {
    a.len() == b.len() && a.iter().all(|id| b.contains(id))
}
