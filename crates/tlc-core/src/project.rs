//! Visibility projection: authoritative store → what the canvas renders.
//!
//! Given the open navigation root, a node is visible when:
//!
//! 1. its parent *is* the root (direct child of the open context);
//! 2. it has no parent and the root is the absolute root;
//! 3. otherwise, if its parent is missing, it is an orphan and hidden;
//! 4. if its parent is a PORTAL other than the root, it is hidden;
//! 5. under a GROUP parent it is visible iff the parent is visible.
//!
//! Visible nodes are then given a *visual* parent: the real parent if it is
//! itself rendered and is not the root, otherwise none (rendered top-level).
//! The projector never mutates stored nodes; it hands out copies.
//!
//! With a search filter active, visibility switches to "matches + their
//! edge neighbours + GROUP contents of those", skipping anything sealed
//! inside a PORTAL.

use crate::config::CanvasConfig;
use crate::id::NodeId;
use crate::model::{Behavior, Edge, Node, Point, Rect};
use crate::store::CanvasStore;
use std::collections::{HashMap, HashSet};

/// A node as rendered: a read-only copy plus per-render UI state.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleNode {
    pub node: Node,
    /// Parent used for nesting on screen; may differ from `node.parent`.
    pub visual_parent: Option<NodeId>,
    pub selected: bool,
}

/// The rendered subset of the graph under one navigation root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub root: Option<NodeId>,
    pub nodes: Vec<VisibleNode>,
    /// Edges whose endpoints are both visible.
    pub edges: Vec<Edge>,
    index: HashMap<NodeId, usize>,
}

impl Projection {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&VisibleNode> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|v| v.node.id).collect()
    }

    /// Visible nodes as plain rows (for re-projection or export).
    pub fn node_rows(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().map(|v| &v.node)
    }

    /// Rectangle of `id` in view space (accumulated along visual parents).
    pub fn view_rect(&self, id: NodeId) -> Option<Rect> {
        let visible = self.get(id)?;
        let origin = self.view_origin(id)?;
        Some(Rect::new(
            origin.x,
            origin.y,
            visible.node.width,
            visible.node.height,
        ))
    }

    /// Origin of `id` in view space.
    pub fn view_origin(&self, id: NodeId) -> Option<Point> {
        let mut origin = Point::ORIGIN;
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(cid) = current {
            let visible = self.get(cid)?;
            origin = origin.offset(visible.node.position);
            current = visible.visual_parent;
            steps += 1;
            if steps > self.nodes.len() {
                log::warn!("visual parent chain of {id} does not terminate");
                break;
            }
        }
        Some(origin)
    }

    /// Set the per-render selection flag.
    pub fn mark_selected(&mut self, selected: &HashSet<NodeId>) {
        for visible in &mut self.nodes {
            visible.selected = selected.contains(&visible.node.id);
        }
    }
}

/// Project the whole store under `root`.
pub fn project_store(
    store: &CanvasStore,
    root: Option<NodeId>,
    filter: Option<&str>,
    config: &CanvasConfig,
) -> Projection {
    project(store.nodes(), store.edges(), root, filter, config)
}

/// Project any node/edge set under `root`, optionally filtered by title.
///
/// A filter that is empty after trimming counts as no filter.
pub fn project<'a>(
    nodes: impl IntoIterator<Item = &'a Node>,
    edges: impl IntoIterator<Item = &'a Edge>,
    root: Option<NodeId>,
    filter: Option<&str>,
    config: &CanvasConfig,
) -> Projection {
    let nodes: Vec<&Node> = nodes.into_iter().collect();
    let edges: Vec<&Edge> = edges.into_iter().collect();
    let lookup: HashMap<NodeId, &Node> = nodes.iter().map(|n| (n.id, *n)).collect();

    let visible: HashSet<NodeId> = match filter.map(str::trim).filter(|q| !q.is_empty()) {
        Some(query) => search_visible(&nodes, &lookup, &edges, root, query, config),
        None => {
            let mut memo = HashMap::new();
            nodes
                .iter()
                .filter(|n| is_visible(n.id, &lookup, root, &mut memo))
                .map(|n| n.id)
                .collect()
        }
    };

    let rendered: Vec<VisibleNode> = nodes
        .iter()
        .filter(|n| visible.contains(&n.id))
        .map(|n| VisibleNode {
            node: (*n).clone(),
            visual_parent: visual_parent(n, &visible, root),
            selected: false,
        })
        .collect();

    let rendered = stacking_order(rendered);

    let index = rendered
        .iter()
        .enumerate()
        .map(|(i, v)| (v.node.id, i))
        .collect();

    let edges = edges
        .into_iter()
        .filter(|e| visible.contains(&e.source) && visible.contains(&e.target))
        .cloned()
        .collect();

    Projection {
        root,
        nodes: rendered,
        edges,
        index,
    }
}

// ─── Navigation visibility ───────────────────────────────────────────────

/// Visibility of one node under `root`, memoised across calls.
///
/// Walks up the parent chain until one of the rules decides; every node on
/// the walked path shares that verdict (each was "visible iff parent is").
fn is_visible(
    id: NodeId,
    lookup: &HashMap<NodeId, &Node>,
    root: Option<NodeId>,
    memo: &mut HashMap<NodeId, bool>,
) -> bool {
    let mut path: Vec<NodeId> = Vec::new();
    let mut on_path: HashSet<NodeId> = HashSet::new();
    let mut current = id;

    let verdict = loop {
        if let Some(&known) = memo.get(&current) {
            break known;
        }
        if !on_path.insert(current) {
            log::warn!("parent cycle through {current}; hiding {id}");
            break false;
        }
        path.push(current);

        let Some(node) = lookup.get(&current) else {
            break false;
        };
        if node.parent == root {
            break true;
        }
        let Some(parent_id) = node.parent else {
            // Top-level node while a container is open.
            break false;
        };
        let Some(parent) = lookup.get(&parent_id) else {
            log::warn!("{current} is orphaned (parent {parent_id} missing)");
            break false;
        };
        if parent.behavior == Behavior::Portal {
            break false;
        }
        current = parent_id;
    };

    for visited in path {
        memo.insert(visited, verdict);
    }
    verdict
}

fn visual_parent(node: &Node, visible: &HashSet<NodeId>, root: Option<NodeId>) -> Option<NodeId> {
    match node.parent {
        Some(parent) if Some(parent) != root && visible.contains(&parent) => Some(parent),
        _ => None,
    }
}

/// Paint order: each sibling list sorted by z-index, every subtree drawn
/// right after its parent and below the parent's higher-z siblings.
fn stacking_order(rendered: Vec<VisibleNode>) -> Vec<VisibleNode> {
    let mut children: HashMap<Option<NodeId>, Vec<usize>> = HashMap::new();
    for (i, v) in rendered.iter().enumerate() {
        children.entry(v.visual_parent).or_default().push(i);
    }
    for siblings in children.values_mut() {
        siblings.sort_by_key(|&i| rendered[i].node.z_index);
    }

    let mut order = Vec::with_capacity(rendered.len());
    let mut placed = vec![false; rendered.len()];
    let mut stack: Vec<usize> = children
        .get(&None)
        .map(|top| top.iter().rev().copied().collect())
        .unwrap_or_default();
    while let Some(i) = stack.pop() {
        if std::mem::replace(&mut placed[i], true) {
            continue;
        }
        order.push(i);
        if let Some(kids) = children.get(&Some(rendered[i].node.id)) {
            stack.extend(kids.iter().rev());
        }
    }
    // Unreachable from the top level only through a corrupt chain.
    order.extend((0..rendered.len()).filter(|&i| !placed[i]));

    let mut slots: Vec<Option<VisibleNode>> = rendered.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

// ─── Search visibility ───────────────────────────────────────────────────

/// True when some ancestor below `root` is a PORTAL, or the chain is broken
/// by a cycle.
fn portal_nested(id: NodeId, lookup: &HashMap<NodeId, &Node>, root: Option<NodeId>) -> bool {
    let mut seen = HashSet::from([id]);
    let mut current = lookup.get(&id).and_then(|n| n.parent);
    while let Some(pid) = current {
        if Some(pid) == root {
            return false;
        }
        if !seen.insert(pid) {
            log::warn!("parent cycle through {pid} while searching");
            return true;
        }
        let Some(parent) = lookup.get(&pid) else {
            return false;
        };
        if parent.behavior == Behavior::Portal {
            return true;
        }
        current = parent.parent;
    }
    false
}

fn search_visible(
    nodes: &[&Node],
    lookup: &HashMap<NodeId, &Node>,
    edges: &[&Edge],
    root: Option<NodeId>,
    query: &str,
    config: &CanvasConfig,
) -> HashSet<NodeId> {
    let needle = query.to_lowercase();
    let matched: HashSet<NodeId> = nodes
        .iter()
        .filter(|n| n.title.to_lowercase().contains(&needle))
        .filter(|n| !portal_nested(n.id, lookup, root))
        .map(|n| n.id)
        .collect();

    if matched.is_empty() {
        return matched;
    }

    let mut visible = matched.clone();
    for edge in edges {
        let neighbor = if matched.contains(&edge.source) {
            edge.target
        } else if matched.contains(&edge.target) {
            edge.source
        } else {
            continue;
        };
        if lookup.contains_key(&neighbor) && !portal_nested(neighbor, lookup, root) {
            visible.insert(neighbor);
        }
    }

    // Pull in GROUP contents of everything visible so far.
    let mut passes = 0;
    loop {
        let before = visible.len();
        for node in nodes {
            if visible.contains(&node.id) {
                continue;
            }
            let inside_visible_group = node
                .parent
                .filter(|p| visible.contains(p))
                .and_then(|p| lookup.get(&p))
                .is_some_and(|p| p.behavior == Behavior::Group);
            if inside_visible_group {
                visible.insert(node.id);
            }
        }
        passes += 1;
        if visible.len() == before {
            break;
        }
        if passes >= config.search_expansion_cap {
            log::warn!(
                "search expansion stopped after {passes} passes; results may be incomplete"
            );
            break;
        }
    }
    log::trace!("search {query:?}: {} matched, {} visible", matched.len(), visible.len());
    visible
}
