//! Integration tests: projection, containment and layout working together
//! over one store (tlc-core only, no backend).

use pretty_assertions::assert_eq;
use std::collections::HashSet;
use tlc_core::*;

fn id(s: &str) -> NodeId {
    NodeId::intern(s)
}

fn sorted(mut ids: Vec<NodeId>) -> Vec<NodeId> {
    ids.sort();
    ids
}

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A(GROUP 0,0,640,480) ⊃ B(LEAF 50,50,320,160); C(LEAF 900,900) top-level.
fn abc(a_behavior: Behavior) -> CanvasStore {
    CanvasStore::from_rows(
        vec![
            Node::new(id("it_a"), a_behavior)
                .with_title("A")
                .with_rect(Rect::new(0.0, 0.0, 640.0, 480.0)),
            Node::new(id("it_b"), Behavior::Leaf)
                .with_title("B")
                .with_rect(Rect::new(50.0, 50.0, 320.0, 160.0))
                .with_parent(Some(id("it_a"))),
            Node::new(id("it_c"), Behavior::Leaf)
                .with_title("C")
                .with_rect(Rect::new(900.0, 900.0, 320.0, 160.0)),
        ],
        vec![],
    )
}

// ─── Projection ─────────────────────────────────────────────────────────

#[test]
fn group_contents_are_inline_at_home() {
    init_logs();
    let store = abc(Behavior::Group);
    let config = CanvasConfig::default();

    let home = project_store(&store, None, None, &config);
    assert_eq!(sorted(home.ids()), sorted(vec![id("it_a"), id("it_b"), id("it_c")]));

    let inside = project_store(&store, Some(id("it_a")), None, &config);
    assert_eq!(inside.ids(), vec![id("it_b")]);
}

#[test]
fn portal_contents_only_when_opened() {
    let store = abc(Behavior::Portal);
    let config = CanvasConfig::default();

    let home = project_store(&store, None, None, &config);
    assert_eq!(sorted(home.ids()), sorted(vec![id("it_a"), id("it_c")]));

    let inside = project_store(&store, Some(id("it_a")), None, &config);
    assert_eq!(inside.ids(), vec![id("it_b")]);
}

#[test]
fn direct_children_of_root_are_always_visible() {
    let store = CanvasStore::from_rows(
        vec![
            Node::new(id("dr_portal"), Behavior::Portal),
            Node::new(id("dr_inner_portal"), Behavior::Portal).with_parent(Some(id("dr_portal"))),
            Node::new(id("dr_group"), Behavior::Group).with_parent(Some(id("dr_inner_portal"))),
            Node::new(id("dr_leaf"), Behavior::Leaf).with_parent(Some(id("dr_group"))),
        ],
        vec![],
    );
    let config = CanvasConfig::default();
    for root in store.nodes().map(|n| n.id) {
        let projection = project_store(&store, Some(root), None, &config);
        for child in store.children_of(Some(root)) {
            assert!(projection.contains(child.id), "{} hidden under {root}", child.id);
        }
        // Nothing sealed inside a portal below the root leaks through.
        for node in store.nodes() {
            let sealed = store
                .ancestors(node.id)
                .unwrap()
                .into_iter()
                .take_while(|a| *a != root)
                .any(|a| store.get(a).unwrap().behavior == Behavior::Portal);
            if sealed && store.is_descendant_of(node.id, root) {
                assert!(!projection.contains(node.id), "{} leaked under {root}", node.id);
            }
        }
    }
}

#[test]
fn reprojection_is_idempotent() {
    let store = abc(Behavior::Group);
    let config = CanvasConfig::default();
    for root in [None, Some(id("it_a"))] {
        let first = project_store(&store, root, None, &config);
        let again = project(first.node_rows(), &first.edges, root, None, &config);
        assert_eq!(sorted(again.ids()), sorted(first.ids()));
    }
}

#[test]
fn overlap_ratio_extremes() {
    let r = Rect::new(10.0, 20.0, 300.0, 200.0);
    assert_eq!(r.overlap_ratio(&r), 1.0);
    assert_eq!(r.overlap_ratio(&Rect::new(1000.0, 1000.0, 10.0, 10.0)), 0.0);
}

// ─── Drag-end → store → layout ──────────────────────────────────────────

fn resolve(store: &CanvasStore, tracker: &DirtyTracker, drag: &DragEnd) -> DropDecision {
    let config = CanvasConfig::default();
    let projection = project_store(store, None, None, &config);
    let cx = DropContext {
        store,
        projection: &projection,
        breadcrumbs: &[],
        tracker,
        config: &config,
    };
    resolve_drop(&cx, drag).unwrap()
}

#[test]
fn escaping_child_lands_in_absolute_space() {
    let mut store = abc(Behavior::Group);
    let mut tracker = DirtyTracker::new(1.0);
    tracker.reset(&store);

    let decision = resolve(
        &store,
        &tracker,
        &DragEnd::new(id("it_b"), Point::new(608.0, 320.0), Point::ORIGIN),
    );
    let reparent = *decision.reparent().unwrap();
    assert!(matches!(decision, DropDecision::Escape(_)));

    let moved = reparent.applied_to(store.get(id("it_b")).unwrap());
    store.upsert_node(moved).unwrap();
    assert_eq!(store.get(id("it_b")).unwrap().parent, None);
    assert_eq!(store.origin_of(id("it_b"), None), Point::new(608.0, 320.0));

    let home = project_store(&store, None, None, &CanvasConfig::default());
    assert_eq!(home.get(id("it_b")).unwrap().visual_parent, None);
}

#[test]
fn entering_empty_group_lays_out_first_cell() {
    let mut store = abc(Behavior::Group);
    store
        .upsert_node(
            Node::new(id("it_g"), Behavior::Group).with_rect(Rect::new(1000.0, 0.0, 640.0, 480.0)),
        )
        .unwrap();
    let mut tracker = DirtyTracker::new(1.0);
    tracker.reset(&store);

    let decision = resolve(
        &store,
        &tracker,
        &DragEnd::new(id("it_c"), Point::new(808.0, 100.0), Point::ORIGIN),
    );
    let DropDecision::Enter(reparent) = decision else {
        panic!("expected entry, got {decision:?}");
    };
    let moved = reparent.applied_to(store.get(id("it_c")).unwrap());
    store.upsert_node(moved).unwrap();

    let config = LayoutConfig::default();
    for child in rearrange(&store, id("it_g"), &config, 1.0) {
        store.upsert_node(child).unwrap();
    }
    let c = store.get(id("it_c")).unwrap();
    assert_eq!(c.parent, Some(id("it_g")));
    assert_eq!(c.position, Point::new(config.padding_left, config.padding_top));
}

#[test]
fn group_resize_scales_one_level() {
    let mut store = CanvasStore::from_rows(
        vec![
            Node::new(id("rs_g"), Behavior::Group).with_rect(Rect::new(0.0, 0.0, 640.0, 480.0)),
            Node::new(id("rs_child"), Behavior::Leaf)
                .with_rect(Rect::new(100.0, 100.0, 200.0, 100.0))
                .with_parent(Some(id("rs_g"))),
        ],
        vec![],
    );
    for child in scale_children(&store, id("rs_g"), 960.0, 480.0) {
        store.upsert_node(child).unwrap();
    }
    assert_eq!(
        store.get(id("rs_child")).unwrap().rect(),
        Rect::new(150.0, 100.0, 300.0, 100.0)
    );
}

#[test]
fn selection_highlights_follow_projection_edges() {
    let store = CanvasStore::from_rows(
        vec![
            Node::new(id("sh_x"), Behavior::Leaf),
            Node::new(id("sh_y"), Behavior::Leaf),
            Node::new(id("sh_z"), Behavior::Leaf),
        ],
        vec![
            Edge::new(EdgeId::intern("sh_xy"), id("sh_x"), id("sh_y")),
            Edge::new(EdgeId::intern("sh_yz"), id("sh_y"), id("sh_z")),
        ],
    );
    let projection = project_store(&store, None, None, &CanvasConfig::default());
    let mut highlighter = EdgeHighlighter::new();
    highlighter.react(&HashSet::from([id("sh_y")]), &projection.edges);
    assert_eq!(
        highlighter.highlighted(),
        sorted_edges(vec![EdgeId::intern("sh_xy"), EdgeId::intern("sh_yz")])
    );
}

fn sorted_edges(mut ids: Vec<EdgeId>) -> Vec<EdgeId> {
    ids.sort();
    ids
}
