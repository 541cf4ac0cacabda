//! Hit testing: screen point → breadcrumb / node lookup.
//!
//! Breadcrumb elements are laid out by the host, which reports their
//! screen rectangles; nodes are tested in view space against a projection.

use crate::id::NodeId;
use crate::model::Rect;
use crate::project::Projection;

/// Screen rectangle of one rendered breadcrumb entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreadcrumbHitbox {
    /// Navigation target (`None` = Home).
    pub target: Option<NodeId>,
    pub bounds: Rect,
}

/// Find the breadcrumb under screen position (px, py).
/// Later entries are treated as topmost.
pub fn hit_breadcrumb(hitboxes: &[BreadcrumbHitbox], px: f32, py: f32) -> Option<&BreadcrumbHitbox> {
    hitboxes.iter().rev().find(|h| h.bounds.contains(px, py))
}

/// Find the topmost visible node at view position (px, py).
/// Returns `None` if no node is hit (background).
pub fn hit_test(projection: &Projection, px: f32, py: f32) -> Option<NodeId> {
    // Paint order puts children after parents and higher z last.
    projection
        .nodes
        .iter()
        .rev()
        .find(|v| {
            projection
                .view_rect(v.node.id)
                .is_some_and(|r| r.contains(px, py))
        })
        .map(|v| v.node.id)
}

/// All visible nodes whose view rectangles intersect `area` (marquee selection).
pub fn hit_test_rect(projection: &Projection, area: Rect) -> Vec<NodeId> {
    projection
        .nodes
        .iter()
        .filter(|v| {
            projection
                .view_rect(v.node.id)
                .is_some_and(|r| r.intersection_area(&area) > 0.0)
        })
        .map(|v| v.node.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CanvasConfig;
    use crate::model::{Behavior, Edge, Node};
    use crate::project::project;

    fn id(s: &str) -> NodeId {
        NodeId::intern(s)
    }

    #[test]
    fn breadcrumb_hit_and_miss() {
        let crumbs = [
            BreadcrumbHitbox {
                target: None,
                bounds: Rect::new(0.0, 0.0, 60.0, 24.0),
            },
            BreadcrumbHitbox {
                target: Some(id("hb_era")),
                bounds: Rect::new(70.0, 0.0, 80.0, 24.0),
            },
        ];
        assert_eq!(hit_breadcrumb(&crumbs, 10.0, 10.0).map(|h| h.target), Some(None));
        assert_eq!(
            hit_breadcrumb(&crumbs, 100.0, 12.0).map(|h| h.target),
            Some(Some(id("hb_era")))
        );
        assert!(hit_breadcrumb(&crumbs, 65.0, 10.0).is_none());
        assert!(hit_breadcrumb(&crumbs, 100.0, 40.0).is_none());
    }

    #[test]
    fn nested_child_wins_over_parent() {
        let nodes = vec![
            Node::new(id("hn_group"), Behavior::Group).with_rect(Rect::new(0.0, 0.0, 640.0, 480.0)),
            Node::new(id("hn_child"), Behavior::Leaf)
                .with_rect(Rect::new(50.0, 50.0, 100.0, 100.0))
                .with_parent(Some(id("hn_group"))),
        ];
        let no_edges: Vec<Edge> = Vec::new();
        let p = project(&nodes, &no_edges, None, None, &CanvasConfig::default());
        assert_eq!(hit_test(&p, 60.0, 60.0), Some(id("hn_child")));
        assert_eq!(hit_test(&p, 500.0, 400.0), Some(id("hn_group")));
        assert_eq!(hit_test(&p, 900.0, 900.0), None);

        let mut marquee = hit_test_rect(&p, Rect::new(140.0, 140.0, 20.0, 20.0));
        marquee.sort();
        let mut expected = vec![id("hn_group"), id("hn_child")];
        expected.sort();
        assert_eq!(marquee, expected);
    }

    #[test]
    fn higher_sibling_covers_nested_child() {
        let mut group = Node::new(id("hz_group"), Behavior::Group)
            .with_rect(Rect::new(0.0, 0.0, 400.0, 300.0));
        group.z_index = 1;
        let child = Node::new(id("hz_child"), Behavior::Leaf)
            .with_rect(Rect::new(20.0, 60.0, 200.0, 100.0))
            .with_parent(Some(id("hz_group")));
        let mut card = Node::new(id("hz_card"), Behavior::Leaf)
            .with_rect(Rect::new(100.0, 80.0, 200.0, 100.0));
        card.z_index = 3;

        let no_edges: Vec<Edge> = Vec::new();
        let p = project(&[group, child, card], &no_edges, None, None, &CanvasConfig::default());
        assert_eq!(hit_test(&p, 150.0, 120.0), Some(id("hz_card")));
        assert_eq!(hit_test(&p, 40.0, 80.0), Some(id("hz_child")));
    }
}
