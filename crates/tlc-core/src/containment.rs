//! Drag-end resolution: does a dropped node leave its parent, enter a
//! container, land on a breadcrumb, or just move?
//!
//! Checks run in a fixed priority order and the first that fires wins:
//!
//! 1. escape: overlap with the visible parent fell below `escape_ratio`,
//!    so the node moves up to its grandparent;
//! 2. entry: some other visible container is overlapped by more than
//!    `entry_ratio`, so the node moves into it;
//! 3. breadcrumb: the pointer was released over a breadcrumb other than
//!    the open root, so the node moves into that ancestor;
//! 4. settle: the node stays in its GROUP parent, which gets re-laid out;
//! 5. move: a plain position change, dirty only beyond tolerance.
//!
//! Overlap is measured in view space using the raw drop rectangle. The
//! header safe zone is applied afterwards to the resulting position
//! whenever the node ends up inside a rendered container.
//!
//! The resolver is pure: it reads the store and projection and returns a
//! `DropDecision` for the session to apply.

use crate::config::CanvasConfig;
use crate::dirty::DirtyTracker;
use crate::error::{CanvasError, Result};
use crate::hit::{BreadcrumbHitbox, hit_breadcrumb};
use crate::id::NodeId;
use crate::model::{Behavior, Node, Point, Rect};
use crate::project::Projection;
use crate::store::CanvasStore;
use std::collections::HashSet;

/// A finished drag gesture.
#[derive(Debug, Clone, PartialEq)]
pub struct DragEnd {
    pub id: NodeId,
    /// Drop position in the node's current parent space.
    pub position: Point,
    /// Pointer position in screen space at release.
    pub pointer: Point,
    /// Selection at release; only `id` is resolved.
    pub selected: HashSet<NodeId>,
}

impl DragEnd {
    pub fn new(id: NodeId, position: Point, pointer: Point) -> Self {
        Self {
            id,
            position,
            pointer,
            selected: HashSet::from([id]),
        }
    }
}

/// A containment change for one node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reparent {
    pub node: NodeId,
    pub from: Option<NodeId>,
    pub to: Option<NodeId>,
    /// Position in `to`'s content space.
    pub position: Point,
}

impl Reparent {
    /// `node` moved under its new parent.
    pub fn applied_to(&self, node: &Node) -> Node {
        let mut moved = node.clone();
        moved.parent = self.to;
        moved.position = self.position;
        moved
    }

    /// Both containers touched by the move.
    pub fn containers(&self) -> impl Iterator<Item = NodeId> {
        self.from.into_iter().chain(self.to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DropDecision {
    Escape(Reparent),
    Enter(Reparent),
    Breadcrumb(Reparent),
    /// Stay inside `parent`, which should be re-laid out.
    Settle { parent: NodeId, position: Point },
    Move { position: Point, dirty: bool },
}

impl DropDecision {
    pub fn reparent(&self) -> Option<&Reparent> {
        match self {
            DropDecision::Escape(r) | DropDecision::Enter(r) | DropDecision::Breadcrumb(r) => {
                Some(r)
            }
            DropDecision::Settle { .. } | DropDecision::Move { .. } => None,
        }
    }

    /// Final position of the dragged node.
    pub fn position(&self) -> Point {
        match self {
            DropDecision::Escape(r) | DropDecision::Enter(r) | DropDecision::Breadcrumb(r) => {
                r.position
            }
            DropDecision::Settle { position, .. } | DropDecision::Move { position, .. } => {
                *position
            }
        }
    }
}

/// Everything the resolver reads besides the gesture itself.
pub struct DropContext<'a> {
    pub store: &'a CanvasStore,
    pub projection: &'a Projection,
    pub breadcrumbs: &'a [BreadcrumbHitbox],
    pub tracker: &'a DirtyTracker,
    pub config: &'a CanvasConfig,
}

/// Decide what a drag-end does.
///
/// # Errors
/// `UnknownNode` if the dragged node is gone; `SelfReference` or `Cycle`
/// if the breadcrumb under the pointer is the node itself or one of its
/// descendants. Nothing is mutated either way.
pub fn resolve_drop(cx: &DropContext<'_>, drag: &DragEnd) -> Result<DropDecision> {
    let node = cx
        .store
        .get(drag.id)
        .ok_or(CanvasError::UnknownNode(drag.id))?;
    if drag.selected.len() > 1 {
        log::debug!(
            "drag of {} with {} selected; resolving the dragged node only",
            drag.id,
            drag.selected.len()
        );
    }

    let projection = cx.projection;
    let visual_parent = projection.get(drag.id).and_then(|v| v.visual_parent);
    let frame = visual_parent
        .and_then(|p| projection.view_origin(p))
        .unwrap_or(Point::ORIGIN);
    let dropped = Rect::new(
        frame.x + drag.position.x,
        frame.y + drag.position.y,
        node.width,
        node.height,
    );

    if let Some(decision) = try_escape(cx, node, visual_parent, &dropped) {
        return Ok(decision);
    }
    if let Some(decision) = try_enter(cx, node, &dropped) {
        return Ok(decision);
    }
    if let Some(decision) = try_breadcrumb(cx, node, drag, &dropped)? {
        return Ok(decision);
    }

    let position = clamp(cx, node.parent, drag.position);
    if let Some(parent) = node.parent
        && Some(parent) != projection.root
        && cx
            .store
            .get(parent)
            .is_some_and(|p| p.behavior != Behavior::Portal)
    {
        log::debug!("drop {}: settle in {parent}", drag.id);
        return Ok(DropDecision::Settle { parent, position });
    }

    let mut moved = node.clone();
    moved.position = position;
    let dirty = cx.tracker.differs(&moved);
    log::debug!("drop {}: move (dirty: {dirty})", drag.id);
    Ok(DropDecision::Move { position, dirty })
}

fn try_escape(
    cx: &DropContext<'_>,
    node: &Node,
    visual_parent: Option<NodeId>,
    dropped: &Rect,
) -> Option<DropDecision> {
    let parent = visual_parent?;
    let parent_rect = cx.projection.view_rect(parent)?;
    let ratio = dropped.overlap_ratio(&parent_rect);
    if ratio >= cx.config.escape_ratio {
        return None;
    }

    let grandparent = cx.store.get(parent).and_then(|p| p.parent);
    let frame = cx
        .projection
        .get(parent)
        .and_then(|v| v.visual_parent)
        .and_then(|gp| cx.projection.view_origin(gp))
        .unwrap_or(Point::ORIGIN);
    let position = clamp(cx, grandparent, dropped.origin().minus(frame));
    log::debug!(
        "drop {}: escape {parent} (overlap {ratio:.2}) to {grandparent:?}",
        node.id
    );
    Some(DropDecision::Escape(Reparent {
        node: node.id,
        from: node.parent,
        to: grandparent,
        position,
    }))
}

fn try_enter(cx: &DropContext<'_>, node: &Node, dropped: &Rect) -> Option<DropDecision> {
    let mut best: Option<(NodeId, f32, Point)> = None;
    for candidate in &cx.projection.nodes {
        let cid = candidate.node.id;
        if !candidate.node.behavior.is_container()
            || cid == node.id
            || Some(cid) == node.parent
            || cx.store.is_descendant_of(cid, node.id)
            || cx.store.is_descendant_of(node.id, cid)
        {
            continue;
        }
        let Some(rect) = cx.projection.view_rect(cid) else {
            continue;
        };
        let ratio = dropped.overlap_ratio(&rect);
        log::trace!("drop {}: {cid} overlap {ratio:.2}", node.id);
        // Later entries render on top, so they win ties.
        if ratio > cx.config.entry_ratio && best.is_none_or(|(_, r, _)| ratio >= r) {
            best = Some((cid, ratio, rect.origin()));
        }
    }

    let (target, ratio, origin) = best?;
    let position = clamp(cx, Some(target), dropped.origin().minus(origin));
    log::debug!("drop {}: enter {target} (overlap {ratio:.2})", node.id);
    Some(DropDecision::Enter(Reparent {
        node: node.id,
        from: node.parent,
        to: Some(target),
        position,
    }))
}

fn try_breadcrumb(
    cx: &DropContext<'_>,
    node: &Node,
    drag: &DragEnd,
    dropped: &Rect,
) -> Result<Option<DropDecision>> {
    let Some(hit) = hit_breadcrumb(cx.breadcrumbs, drag.pointer.x, drag.pointer.y) else {
        return Ok(None);
    };
    let root = cx.projection.root;
    if hit.target == root {
        return Ok(None);
    }
    if let Some(target) = hit.target {
        if target == node.id {
            return Err(CanvasError::SelfReference(node.id));
        }
        if cx.store.is_descendant_of(target, node.id) {
            return Err(CanvasError::Cycle {
                node: node.id,
                target,
            });
        }
    }

    // View space is the open root's content space; shift it into the
    // breadcrumb target's space.
    let shift = root.map_or(Point::ORIGIN, |r| cx.store.origin_of(r, hit.target));
    let position = clamp(cx, hit.target, dropped.origin().offset(shift));
    log::debug!("drop {}: breadcrumb {:?}", node.id, hit.target);
    Ok(Some(DropDecision::Breadcrumb(Reparent {
        node: node.id,
        from: node.parent,
        to: hit.target,
        position,
    })))
}

/// Keep children out of their container's title bar. The open root is
/// the canvas itself and has none.
fn clamp(cx: &DropContext<'_>, parent: Option<NodeId>, position: Point) -> Point {
    match parent {
        Some(p) if Some(p) != cx.projection.root => {
            Point::new(position.x, position.y.max(cx.config.header_offset))
        }
        _ => position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::project_store;
    use pretty_assertions::assert_eq;

    fn id(s: &str) -> NodeId {
        NodeId::intern(s)
    }

    fn container(name: &str, behavior: Behavior, rect: Rect) -> Node {
        Node::new(id(name), behavior).with_rect(rect)
    }

    fn leaf(name: &str, parent: Option<&str>, rect: Rect) -> Node {
        Node::new(id(name), Behavior::Leaf)
            .with_rect(rect)
            .with_parent(parent.map(id))
    }

    fn resolve(
        store: &CanvasStore,
        root: Option<&str>,
        crumbs: &[BreadcrumbHitbox],
        drag: DragEnd,
    ) -> Result<DropDecision> {
        let config = CanvasConfig::default();
        let projection = project_store(store, root.map(id), None, &config);
        let mut tracker = DirtyTracker::new(config.position_tolerance);
        tracker.reset(store);
        let cx = DropContext {
            store,
            projection: &projection,
            breadcrumbs: crumbs,
            tracker: &tracker,
            config: &config,
        };
        resolve_drop(&cx, &drag)
    }

    fn drag(name: &str, x: f32, y: f32) -> DragEnd {
        DragEnd::new(id(name), Point::new(x, y), Point::new(-1.0, -1.0))
    }

    fn scenario() -> CanvasStore {
        CanvasStore::from_rows(
            vec![
                container("cn_a", Behavior::Group, Rect::new(0.0, 0.0, 640.0, 480.0)),
                leaf("cn_b", Some("cn_a"), Rect::new(50.0, 50.0, 320.0, 160.0)),
                leaf("cn_c", None, Rect::new(900.0, 900.0, 320.0, 160.0)),
                container("cn_g", Behavior::Group, Rect::new(1000.0, 0.0, 640.0, 480.0)),
            ],
            vec![],
        )
    }

    #[test]
    fn low_overlap_escapes_to_grandparent() {
        // 32 × 160 of B's 320 × 160 stays inside A: ratio 0.1.
        let decision = resolve(&scenario(), None, &[], drag("cn_b", 608.0, 320.0)).unwrap();
        assert_eq!(
            decision,
            DropDecision::Escape(Reparent {
                node: id("cn_b"),
                from: Some(id("cn_a")),
                to: None,
                position: Point::new(608.0, 320.0),
            })
        );
    }

    #[test]
    fn forty_percent_overlap_enters_container() {
        // C's left 128 of 320 columns lie inside G: ratio 0.4.
        let decision = resolve(&scenario(), None, &[], drag("cn_c", 808.0, 100.0)).unwrap();
        let DropDecision::Enter(r) = decision else {
            panic!("expected entry, got {decision:?}");
        };
        assert_eq!(r.to, Some(id("cn_g")));
        assert_eq!(r.position, Point::new(-192.0, 100.0));
    }

    #[test]
    fn entry_does_not_target_own_ancestors_or_descendants() {
        let store = CanvasStore::from_rows(
            vec![
                container("cd_outer", Behavior::Group, Rect::new(0.0, 0.0, 1000.0, 1000.0)),
                container("cd_inner", Behavior::Group, Rect::new(20.0, 60.0, 640.0, 480.0))
                    .with_parent(Some(id("cd_outer"))),
                leaf("cd_leaf", Some("cd_inner"), Rect::new(20.0, 60.0, 320.0, 160.0)),
            ],
            vec![],
        );
        // The leaf sits inside both folders; it must settle, not jump to outer.
        let decision = resolve(&store, None, &[], drag("cd_leaf", 30.0, 70.0)).unwrap();
        assert_eq!(
            decision,
            DropDecision::Settle {
                parent: id("cd_inner"),
                position: Point::new(30.0, 70.0),
            }
        );

        // Dragging the inner folder over its own child is no entry either.
        let decision = resolve(&store, None, &[], drag("cd_inner", 25.0, 65.0)).unwrap();
        assert!(matches!(decision, DropDecision::Settle { .. }));
    }

    #[test]
    fn settle_clamps_into_safe_zone() {
        let decision = resolve(&scenario(), None, &[], drag("cn_b", 100.0, 5.0)).unwrap();
        assert_eq!(
            decision,
            DropDecision::Settle {
                parent: id("cn_a"),
                position: Point::new(100.0, 40.0),
            }
        );
    }

    #[test]
    fn plain_move_respects_tolerance() {
        let store = scenario();
        let small = resolve(&store, None, &[], drag("cn_c", 900.5, 900.5)).unwrap();
        assert_eq!(
            small,
            DropDecision::Move {
                position: Point::new(900.5, 900.5),
                dirty: false
            }
        );
        let big = resolve(&store, None, &[], drag("cn_c", 902.0, 902.0)).unwrap();
        assert!(matches!(big, DropDecision::Move { dirty: true, .. }));
    }

    fn portal_store() -> CanvasStore {
        CanvasStore::from_rows(
            vec![
                container("cb_portal", Behavior::Portal, Rect::new(100.0, 100.0, 640.0, 480.0)),
                leaf("cb_leaf", Some("cb_portal"), Rect::new(10.0, 50.0, 320.0, 160.0)),
                container("cb_sub", Behavior::Group, Rect::new(2000.0, 2000.0, 640.0, 480.0))
                    .with_parent(Some(id("cb_portal"))),
                leaf("cb_sub_leaf", Some("cb_sub"), Rect::new(20.0, 60.0, 100.0, 100.0)),
            ],
            vec![],
        )
    }

    fn crumbs(targets: &[Option<&str>]) -> Vec<BreadcrumbHitbox> {
        targets
            .iter()
            .enumerate()
            .map(|(i, t)| BreadcrumbHitbox {
                target: t.map(id),
                bounds: Rect::new(i as f32 * 100.0, 0.0, 90.0, 24.0),
            })
            .collect()
    }

    #[test]
    fn breadcrumb_drop_moves_into_ancestor_space() {
        let store = portal_store();
        let hitboxes = crumbs(&[None, Some("cb_portal")]);
        let mut gesture = drag("cb_leaf", 10.0, 50.0);
        gesture.pointer = Point::new(10.0, 10.0);

        let decision = resolve(&store, Some("cb_portal"), &hitboxes, gesture).unwrap();
        assert_eq!(
            decision,
            DropDecision::Breadcrumb(Reparent {
                node: id("cb_leaf"),
                from: Some(id("cb_portal")),
                to: None,
                position: Point::new(110.0, 150.0),
            })
        );
    }

    #[test]
    fn breadcrumb_of_open_root_is_ignored() {
        let store = portal_store();
        let hitboxes = crumbs(&[None, Some("cb_portal")]);
        let mut gesture = drag("cb_leaf", 12.0, 50.0);
        gesture.pointer = Point::new(150.0, 10.0);

        let decision = resolve(&store, Some("cb_portal"), &hitboxes, gesture).unwrap();
        assert!(matches!(decision, DropDecision::Move { dirty: true, .. }));
    }

    #[test]
    fn breadcrumb_into_own_subtree_is_rejected() {
        let store = portal_store();
        let mut gesture = drag("cb_sub", 2000.0, 2000.0);
        gesture.pointer = Point::new(10.0, 10.0);

        let err = resolve(&store, Some("cb_portal"), &crumbs(&[Some("cb_sub_leaf")]), gesture.clone())
            .unwrap_err();
        assert_eq!(
            err,
            CanvasError::Cycle {
                node: id("cb_sub"),
                target: id("cb_sub_leaf")
            }
        );
        let err = resolve(&store, Some("cb_portal"), &crumbs(&[Some("cb_sub")]), gesture).unwrap_err();
        assert_eq!(err, CanvasError::SelfReference(id("cb_sub")));
    }

    #[test]
    fn unknown_node_is_an_error() {
        let err = resolve(&scenario(), None, &[], drag("cn_ghost", 0.0, 0.0)).unwrap_err();
        assert_eq!(err, CanvasError::UnknownNode(id("cn_ghost")));
    }
}
