//! Folder layout: grid auto-arrangement and auto-size for GROUP containers.
//!
//! The grid keeps whatever column count the user last arranged: children
//! are read back in visual order (rows first, a row being everything within
//! `row_band` of the row's first item), the first row's length becomes the
//! column count, and every child is then re-placed into uniform cells
//! sized by the widest item per column and tallest item per row.
//!
//! Functions here only *compute*: they return updated node copies, and the
//! caller writes them back through the store.

use crate::config::LayoutConfig;
use crate::id::NodeId;
use crate::model::{Node, Point};
use crate::store::CanvasStore;

/// Children of `parent` in visual reading order, with the column count
/// inferred from the first row.
fn visual_order(mut children: Vec<Node>, row_band: f32) -> (Vec<Node>, usize) {
    children.sort_by(|a, b| {
        a.position
            .y
            .total_cmp(&b.position.y)
            .then(a.position.x.total_cmp(&b.position.x))
    });

    let mut rows: Vec<Vec<Node>> = Vec::new();
    let mut row_top = f32::NEG_INFINITY;
    for child in children {
        match rows.last_mut() {
            Some(row) if child.position.y - row_top < row_band => row.push(child),
            _ => {
                row_top = child.position.y;
                rows.push(vec![child]);
            }
        }
    }

    let cols = rows.first().map_or(1, |r| r.len().max(1));
    let ordered = rows
        .into_iter()
        .flat_map(|mut row| {
            row.sort_by(|a, b| a.position.x.total_cmp(&b.position.x));
            row
        })
        .collect();
    (ordered, cols)
}

/// Re-lay the children of `parent` into a grid.
///
/// Returns every child whose cell is not strictly within `tolerance` of
/// its current position, already updated.
pub fn rearrange(
    store: &CanvasStore,
    parent: NodeId,
    config: &LayoutConfig,
    tolerance: f32,
) -> Vec<Node> {
    let children: Vec<Node> = store
        .children_of(Some(parent))
        .into_iter()
        .cloned()
        .collect();
    if children.is_empty() {
        return Vec::new();
    }

    let (ordered, cols) = visual_order(children, config.row_band);
    let rows = ordered.len().div_ceil(cols);

    let mut col_widths = vec![0.0f32; cols];
    let mut row_heights = vec![0.0f32; rows];
    for (i, child) in ordered.iter().enumerate() {
        col_widths[i % cols] = col_widths[i % cols].max(child.width);
        row_heights[i / cols] = row_heights[i / cols].max(child.height);
    }

    let col_offsets = running_offsets(&col_widths, config.padding_left, config.gap);
    let row_offsets = running_offsets(&row_heights, config.padding_top, config.gap);

    let mut moved = Vec::new();
    for (i, mut child) in ordered.into_iter().enumerate() {
        let target = Point::new(col_offsets[i % cols], row_offsets[i / cols]);
        if !child.position.near(target, tolerance) {
            log::trace!("layout {parent}: {} -> ({}, {})", child.id, target.x, target.y);
            child.position = target;
            moved.push(child);
        }
    }
    moved
}

/// Start offset of each cell along one axis.
fn running_offsets(sizes: &[f32], padding: f32, gap: f32) -> Vec<f32> {
    let mut offset = padding;
    sizes
        .iter()
        .map(|size| {
            let start = offset;
            offset += size + gap;
            start
        })
        .collect()
}

/// Size `parent` to its children's bounding box plus right/bottom padding,
/// never below the configured minimum.
///
/// Returns the updated parent, or `None` if it has no children.
pub fn resize_to_fit(store: &CanvasStore, parent: NodeId, config: &LayoutConfig) -> Option<Node> {
    let container = store.get(parent)?;
    let children = store.children_of(Some(parent));
    if children.is_empty() {
        return None;
    }

    let (right, bottom) = children.iter().fold((f32::MIN, f32::MIN), |(r, b), c| {
        (r.max(c.position.x + c.width), b.max(c.position.y + c.height))
    });
    let width = (right + config.padding_right).max(config.min_width);
    let height = (bottom + config.padding_bottom).max(config.min_height);

    let mut resized = container.clone();
    resized.width = width;
    resized.height = height;
    Some(resized)
}

/// Scale the direct children of `group` for a resize to `width × height`.
///
/// Only one level is scaled; grandchildren keep their geometry relative to
/// their own (scaled) parent.
pub fn scale_children(store: &CanvasStore, group: NodeId, width: f32, height: f32) -> Vec<Node> {
    let Some(container) = store.get(group) else {
        return Vec::new();
    };
    if container.width <= 0.0 || container.height <= 0.0 {
        return Vec::new();
    }
    let sx = width / container.width;
    let sy = height / container.height;

    store
        .children_of(Some(group))
        .into_iter()
        .map(|child| {
            let mut scaled = child.clone();
            scaled.position = Point::new(child.position.x * sx, child.position.y * sy);
            scaled.width = child.width * sx;
            scaled.height = child.height * sy;
            scaled
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Behavior, Rect};
    use pretty_assertions::assert_eq;

    fn id(s: &str) -> NodeId {
        NodeId::intern(s)
    }

    fn folder(name: &str) -> Node {
        Node::new(id(name), Behavior::Group).with_rect(Rect::new(0.0, 0.0, 640.0, 480.0))
    }

    fn child(name: &str, parent: &str, rect: Rect) -> Node {
        Node::new(id(name), Behavior::Leaf)
            .with_rect(rect)
            .with_parent(Some(id(parent)))
    }

    fn positions(moved: &[Node]) -> Vec<(NodeId, Point)> {
        let mut out: Vec<_> = moved.iter().map(|n| (n.id, n.position)).collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    #[test]
    fn single_child_lands_in_first_cell() {
        let store = CanvasStore::from_rows(
            vec![
                folder("ly_f"),
                child("ly_only", "ly_f", Rect::new(300.0, 250.0, 320.0, 160.0)),
            ],
            vec![],
        );
        let config = LayoutConfig::default();
        let moved = rearrange(&store, id("ly_f"), &config, 1.0);
        assert_eq!(
            positions(&moved),
            vec![(id("ly_only"), Point::new(config.padding_left, config.padding_top))]
        );
    }

    #[test]
    fn first_row_sets_column_count() {
        // Two items share a row (y within the band), the third sits below.
        let store = CanvasStore::from_rows(
            vec![
                folder("lc_f"),
                child("lc_a", "lc_f", Rect::new(10.0, 70.0, 100.0, 50.0)),
                child("lc_b", "lc_f", Rect::new(400.0, 90.0, 200.0, 80.0)),
                child("lc_c", "lc_f", Rect::new(5.0, 300.0, 150.0, 40.0)),
            ],
            vec![],
        );
        let config = LayoutConfig::default();
        let moved = rearrange(&store, id("lc_f"), &config, 1.0);
        let mut expected = vec![
            (id("lc_a"), Point::new(20.0, 60.0)),
            // col 0 is max(100, 150) wide
            (id("lc_b"), Point::new(20.0 + 150.0 + 20.0, 60.0)),
            // row 0 is max(50, 80) tall
            (id("lc_c"), Point::new(20.0, 60.0 + 80.0 + 20.0)),
        ];
        expected.sort_by_key(|(id, _)| *id);
        assert_eq!(positions(&moved), expected);
    }

    #[test]
    fn settled_children_are_not_rewritten() {
        let store = CanvasStore::from_rows(
            vec![
                folder("ls_f"),
                child("ls_a", "ls_f", Rect::new(20.5, 60.4, 100.0, 50.0)),
            ],
            vec![],
        );
        assert!(rearrange(&store, id("ls_f"), &LayoutConfig::default(), 1.0).is_empty());
    }

    #[test]
    fn one_unit_off_is_rewritten() {
        let store = CanvasStore::from_rows(
            vec![
                folder("lu_f"),
                child("lu_a", "lu_f", Rect::new(21.0, 60.0, 100.0, 50.0)),
            ],
            vec![],
        );
        let moved = rearrange(&store, id("lu_f"), &LayoutConfig::default(), 1.0);
        assert_eq!(positions(&moved), vec![(id("lu_a"), Point::new(20.0, 60.0))]);
    }

    #[test]
    fn resize_always_sets_the_fitted_size() {
        let config = LayoutConfig::default();
        // Already 0.5 off the fitted 360 x 240: still reported.
        let store = CanvasStore::from_rows(
            vec![
                Node::new(id("la_f"), Behavior::Group).with_rect(Rect::new(0.0, 0.0, 360.5, 240.0)),
                child("la_a", "la_f", Rect::new(20.0, 60.0, 320.0, 160.0)),
            ],
            vec![],
        );
        let resized = resize_to_fit(&store, id("la_f"), &config).unwrap();
        assert_eq!((resized.width, resized.height), (360.0, 240.0));
    }

    #[test]
    fn resize_fits_children_with_floor() {
        let store = CanvasStore::from_rows(
            vec![
                folder("lr_f"),
                child("lr_a", "lr_f", Rect::new(20.0, 60.0, 700.0, 100.0)),
            ],
            vec![],
        );
        let config = LayoutConfig::default();
        let resized = resize_to_fit(&store, id("lr_f"), &config).unwrap();
        assert_eq!((resized.width, resized.height), (740.0, 200.0));

        let tiny = CanvasStore::from_rows(
            vec![
                folder("lr_t"),
                child("lr_t1", "lr_t", Rect::new(20.0, 60.0, 10.0, 10.0)),
            ],
            vec![],
        );
        let resized = resize_to_fit(&tiny, id("lr_t"), &config).unwrap();
        assert_eq!((resized.width, resized.height), (300.0, 200.0));
    }

    #[test]
    fn empty_folder_keeps_its_size() {
        let store = CanvasStore::from_rows(vec![folder("le_f")], vec![]);
        assert!(resize_to_fit(&store, id("le_f"), &LayoutConfig::default()).is_none());
        assert!(rearrange(&store, id("le_f"), &LayoutConfig::default(), 1.0).is_empty());
    }

    #[test]
    fn group_resize_scales_direct_children_only() {
        let store = CanvasStore::from_rows(
            vec![
                folder("lg_f"),
                Node::new(id("lg_sub"), Behavior::Group)
                    .with_rect(Rect::new(100.0, 100.0, 200.0, 100.0))
                    .with_parent(Some(id("lg_f"))),
                child("lg_deep", "lg_sub", Rect::new(10.0, 10.0, 50.0, 50.0)),
            ],
            vec![],
        );
        let scaled = scale_children(&store, id("lg_f"), 960.0, 480.0);
        assert_eq!(scaled.len(), 1);
        assert_eq!(scaled[0].id, id("lg_sub"));
        assert_eq!(scaled[0].rect(), Rect::new(150.0, 100.0, 300.0, 100.0));
    }
}
