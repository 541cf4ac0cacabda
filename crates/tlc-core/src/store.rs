//! Authoritative in-memory mirror of the persisted node/edge graph.
//!
//! The store is the single owner of every `Node` and `Edge`. Connections
//! live in a `StableDiGraph` (node weights = nodes, edge weights = edges) so
//! that removing a node drops its incident connections in one step.
//! Containment is *not* a graph edge: it is the node's `parent` attribute,
//! which may be corrupt upstream, so every chain walk here is bounded.
//!
//! All mutation goes through `upsert_node`, `remove_nodes`, `upsert_edge`,
//! `remove_edge` (plus the provisional-id confirmations used by optimistic
//! creates). Each node mutation bumps that node's revision so a delayed
//! backend echo can be recognised as stale.

use crate::error::{CanvasError, Result};
use crate::id::{EdgeId, NodeId};
use crate::model::{Edge, Node, Point};
use petgraph::Direction;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::stable_graph::StableDiGraph;
use std::collections::{HashMap, HashSet};

/// What `replace_all` had to repair while loading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// Nodes whose parent pointed at themselves; the parent was cleared.
    pub self_parented: Vec<NodeId>,
    /// Edges dropped for a missing endpoint or `source == target`.
    pub dropped_edges: Vec<EdgeId>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.self_parented.is_empty() && self.dropped_edges.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CanvasStore {
    graph: StableDiGraph<Node, Edge>,
    id_index: HashMap<NodeId, NodeIndex>,
    edge_index: HashMap<EdgeId, EdgeIndex>,
    revisions: HashMap<NodeId, u64>,
    clock: u64,
}

impl CanvasStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from already-sanitized rows.
    pub fn from_rows(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let mut store = Self::new();
        store.replace_all(nodes, edges);
        store
    }

    // ─── Loading ─────────────────────────────────────────────────────────

    /// Replace the whole mirror with a fresh fetch.
    ///
    /// Rows that would violate store invariants are repaired or dropped
    /// (and reported) instead of failing the load.
    pub fn replace_all(&mut self, nodes: Vec<Node>, edges: Vec<Edge>) -> LoadReport {
        self.clear();
        let mut report = LoadReport::default();

        for mut node in nodes {
            if node.parent == Some(node.id) {
                log::warn!("node {} is its own parent; treating as top-level", node.id);
                node.parent = None;
                report.self_parented.push(node.id);
            }
            self.insert_or_replace(node);
        }

        for edge in edges {
            let id = edge.id;
            if let Err(e) = self.upsert_edge(edge) {
                log::warn!("dropping edge {id} on load: {e}");
                report.dropped_edges.push(id);
            }
        }

        report
    }

    pub fn clear(&mut self) {
        self.graph.clear();
        self.id_index.clear();
        self.edge_index.clear();
        self.revisions.clear();
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.id_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_index.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_index.len()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.id_index.contains_key(&id)
    }

    /// Look up a node by id.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.id_index.get(&id).map(|idx| &self.graph[*idx])
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edge_index.get(&id).map(|idx| &self.graph[*idx])
    }

    /// All nodes, in storage order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_weights()
    }

    /// Direct children of `parent` (`None` = top level).
    pub fn children_of(&self, parent: Option<NodeId>) -> Vec<&Node> {
        self.nodes().filter(|n| n.parent == parent).collect()
    }

    /// Nodes connected to `id` by an edge in either direction.
    pub fn neighbors(&self, id: NodeId) -> Vec<NodeId> {
        let Some(&idx) = self.id_index.get(&id) else {
            return Vec::new();
        };
        let mut out: Vec<NodeId> = self
            .graph
            .neighbors_undirected(idx)
            .map(|n| self.graph[n].id)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Parent chain of `id`, nearest first, stopping at the top level.
    ///
    /// # Errors
    /// `Anomaly` when the chain revisits a node (cycle) or names a parent
    /// that is not in the store (orphan).
    pub fn ancestors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut current = self.get(id).ok_or(CanvasError::UnknownNode(id))?;

        while let Some(parent_id) = current.parent {
            if !seen.insert(parent_id) {
                return Err(CanvasError::Anomaly {
                    node: id,
                    detail: format!("parent chain cycles through {parent_id}"),
                });
            }
            current = self.get(parent_id).ok_or_else(|| CanvasError::Anomaly {
                node: id,
                detail: format!("missing ancestor {parent_id}"),
            })?;
            chain.push(parent_id);
        }
        Ok(chain)
    }

    /// Whether `ancestor` appears on `id`'s parent chain.
    /// Broken chains are only followed as far as they are intact.
    pub fn is_descendant_of(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut current = self.get(id).and_then(|n| n.parent);
        while let Some(pid) = current {
            if pid == ancestor {
                return true;
            }
            if !seen.insert(pid) {
                return false;
            }
            current = self.get(pid).and_then(|n| n.parent);
        }
        false
    }

    /// Every node nested (transitively) under `id`, excluding `id`.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut frontier = vec![id];
        while let Some(current) = frontier.pop() {
            for child in self.children_of(Some(current)) {
                if seen.insert(child.id) {
                    out.push(child.id);
                    frontier.push(child.id);
                }
            }
        }
        out
    }

    /// Position of `id`'s origin expressed in the content space of
    /// `relative_to` (`None` = absolute canvas space).
    ///
    /// Walks the parent chain summing parent-relative offsets. If the
    /// chain never reaches `relative_to`, the result is absolute.
    pub fn origin_of(&self, id: NodeId, relative_to: Option<NodeId>) -> Point {
        let mut origin = Point::ORIGIN;
        let mut seen = HashSet::new();
        let mut current = Some(id);
        while let Some(cid) = current {
            if Some(cid) == relative_to || !seen.insert(cid) {
                break;
            }
            let Some(node) = self.get(cid) else { break };
            origin = origin.offset(node.position);
            current = node.parent;
        }
        origin
    }

    pub fn revision(&self, id: NodeId) -> u64 {
        self.revisions.get(&id).copied().unwrap_or(0)
    }

    // ─── Mutations ───────────────────────────────────────────────────────

    /// Insert a node or replace the stored copy.
    ///
    /// # Errors
    /// `SelfReference` when the node names itself as parent.
    pub fn upsert_node(&mut self, node: Node) -> Result<()> {
        if node.parent == Some(node.id) {
            return Err(CanvasError::SelfReference(node.id));
        }
        self.insert_or_replace(node);
        Ok(())
    }

    fn insert_or_replace(&mut self, node: Node) {
        let id = node.id;
        match self.id_index.get(&id) {
            Some(&idx) => self.graph[idx] = node,
            None => {
                let idx = self.graph.add_node(node);
                self.id_index.insert(id, idx);
            }
        }
        self.clock += 1;
        self.revisions.insert(id, self.clock);
    }

    /// Accept a backend echo of `node` only if nothing touched it locally
    /// since the call was issued at `issued_revision`.
    pub fn accept_echo(&mut self, node: Node, issued_revision: u64) -> bool {
        if self.revision(node.id) > issued_revision {
            log::debug!("ignoring stale echo for {}", node.id);
            return false;
        }
        if !self.contains(node.id) || node.parent == Some(node.id) {
            return false;
        }
        self.insert_or_replace(node);
        true
    }

    /// Remove nodes and, recursively, everything nested under them.
    /// Returns every removed id.
    pub fn remove_nodes(&mut self, ids: &[NodeId]) -> Vec<NodeId> {
        let mut doomed: Vec<NodeId> = Vec::new();
        let mut seen = HashSet::new();
        for &id in ids {
            if !self.contains(id) {
                continue;
            }
            for victim in std::iter::once(id).chain(self.descendants(id)) {
                if seen.insert(victim) {
                    doomed.push(victim);
                }
            }
        }

        for &id in &doomed {
            if let Some(idx) = self.id_index.remove(&id) {
                let incident: Vec<EdgeId> = self
                    .graph
                    .edges_directed(idx, Direction::Outgoing)
                    .chain(self.graph.edges_directed(idx, Direction::Incoming))
                    .map(|e| e.weight().id)
                    .collect();
                for edge_id in incident {
                    self.edge_index.remove(&edge_id);
                }
                self.graph.remove_node(idx);
                self.revisions.remove(&id);
            }
        }
        doomed
    }

    /// Insert an edge or replace the stored copy.
    ///
    /// # Errors
    /// `SelfLoop` for `source == target`; `UnknownNode` for a missing endpoint.
    pub fn upsert_edge(&mut self, edge: Edge) -> Result<()> {
        if edge.source == edge.target {
            return Err(CanvasError::SelfLoop(edge.source));
        }
        let source = *self
            .id_index
            .get(&edge.source)
            .ok_or(CanvasError::UnknownNode(edge.source))?;
        let target = *self
            .id_index
            .get(&edge.target)
            .ok_or(CanvasError::UnknownNode(edge.target))?;

        if let Some(&existing) = self.edge_index.get(&edge.id) {
            let same_endpoints = self
                .graph
                .edge_endpoints(existing)
                .is_some_and(|(s, t)| s == source && t == target);
            if same_endpoints {
                self.graph[existing] = edge;
                return Ok(());
            }
            self.graph.remove_edge(existing);
        }
        let id = edge.id;
        let idx = self.graph.add_edge(source, target, edge);
        self.edge_index.insert(id, idx);
        Ok(())
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Option<Edge> {
        let idx = self.edge_index.remove(&id)?;
        self.graph.remove_edge(idx)
    }

    /// Swap a provisional node id for the confirmed row, re-pointing
    /// children and connections.
    pub fn confirm_node(&mut self, provisional: NodeId, confirmed: Node) {
        let Some(idx) = self.id_index.remove(&provisional) else {
            self.insert_or_replace(confirmed);
            return;
        };
        let new_id = confirmed.id;
        self.revisions.remove(&provisional);
        self.graph[idx] = confirmed;
        self.id_index.insert(new_id, idx);

        for child in self.graph.node_weights_mut() {
            if child.parent == Some(provisional) {
                child.parent = Some(new_id);
            }
        }
        for edge in self.graph.edge_weights_mut() {
            if edge.source == provisional {
                edge.source = new_id;
            }
            if edge.target == provisional {
                edge.target = new_id;
            }
        }
        self.clock += 1;
        self.revisions.insert(new_id, self.clock);
    }

    /// Swap a provisional edge id for the confirmed row.
    pub fn confirm_edge(&mut self, provisional: EdgeId, confirmed: Edge) -> Result<()> {
        self.remove_edge(provisional);
        self.upsert_edge(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Behavior, Rect};
    use pretty_assertions::assert_eq;

    fn id(s: &str) -> NodeId {
        NodeId::intern(s)
    }

    fn leaf(name: &str, parent: Option<&str>) -> Node {
        Node::new(id(name), Behavior::Leaf).with_parent(parent.map(id))
    }

    #[test]
    fn rejects_self_parent() {
        let mut store = CanvasStore::new();
        let err = store.upsert_node(leaf("st_self", Some("st_self"))).unwrap_err();
        assert_eq!(err, CanvasError::SelfReference(id("st_self")));
        assert!(store.is_empty());
    }

    #[test]
    fn load_repairs_bad_rows() {
        let nodes = vec![leaf("st_a", Some("st_a")), leaf("st_b", None)];
        let edges = vec![
            Edge::new(EdgeId::intern("st_e1"), id("st_a"), id("st_b")),
            Edge::new(EdgeId::intern("st_e2"), id("st_a"), id("st_a")),
            Edge::new(EdgeId::intern("st_e3"), id("st_a"), id("st_missing")),
        ];
        let mut store = CanvasStore::new();
        let report = store.replace_all(nodes, edges);
        assert_eq!(report.self_parented, vec![id("st_a")]);
        assert_eq!(
            report.dropped_edges,
            vec![EdgeId::intern("st_e2"), EdgeId::intern("st_e3")]
        );
        assert_eq!(store.get(id("st_a")).unwrap().parent, None);
        assert_eq!(store.edge_count(), 1);
    }

    #[test]
    fn remove_cascades_to_descendants_and_edges() {
        let mut store = CanvasStore::from_rows(
            vec![
                Node::new(id("st_folder"), Behavior::Group),
                leaf("st_inner", Some("st_folder")),
                leaf("st_deep", Some("st_inner")),
                leaf("st_outside", None),
            ],
            vec![Edge::new(
                EdgeId::intern("st_link"),
                id("st_deep"),
                id("st_outside"),
            )],
        );

        let mut removed = store.remove_nodes(&[id("st_folder")]);
        removed.sort();
        let mut expected = vec![id("st_folder"), id("st_inner"), id("st_deep")];
        expected.sort();
        assert_eq!(removed, expected);
        assert_eq!(store.len(), 1);
        assert_eq!(store.edge_count(), 0);
        assert!(store.edge(EdgeId::intern("st_link")).is_none());
    }

    #[test]
    fn ancestors_detect_cycles() {
        // Bypass upsert validation: a two-node cycle can only come from bad data.
        let store = CanvasStore::from_rows(
            vec![leaf("st_c1", Some("st_c2")), leaf("st_c2", Some("st_c1"))],
            vec![],
        );
        assert!(matches!(
            store.ancestors(id("st_c1")),
            Err(CanvasError::Anomaly { .. })
        ));
        assert!(!store.is_descendant_of(id("st_c1"), id("st_other")));
        // Bounded walk still terminates.
        let _ = store.origin_of(id("st_c1"), None);
    }

    #[test]
    fn origin_sums_parent_chain() {
        let store = CanvasStore::from_rows(
            vec![
                Node::new(id("st_o_outer"), Behavior::Group)
                    .with_rect(Rect::new(100.0, 100.0, 640.0, 480.0)),
                Node::new(id("st_o_mid"), Behavior::Group)
                    .with_rect(Rect::new(20.0, 60.0, 300.0, 200.0))
                    .with_parent(Some(id("st_o_outer"))),
                leaf("st_o_leaf", Some("st_o_mid")).with_rect(Rect::new(5.0, 5.0, 10.0, 10.0)),
            ],
            vec![],
        );
        assert_eq!(store.origin_of(id("st_o_leaf"), None), Point::new(125.0, 165.0));
        assert_eq!(
            store.origin_of(id("st_o_leaf"), Some(id("st_o_outer"))),
            Point::new(25.0, 65.0)
        );
    }

    #[test]
    fn stale_echo_is_ignored() {
        let mut store = CanvasStore::from_rows(vec![leaf("st_echo", None)], vec![]);
        let issued = store.revision(id("st_echo"));

        let mut local = store.get(id("st_echo")).unwrap().clone();
        local.position = Point::new(50.0, 50.0);
        store.upsert_node(local).unwrap();

        let echo = leaf("st_echo", None);
        assert!(!store.accept_echo(echo, issued));
        assert_eq!(store.get(id("st_echo")).unwrap().position, Point::new(50.0, 50.0));

        let fresh = store.revision(id("st_echo"));
        let mut echo = leaf("st_echo", None);
        echo.title = "confirmed".into();
        assert!(store.accept_echo(echo, fresh));
        assert_eq!(store.get(id("st_echo")).unwrap().title, "confirmed");
    }

    #[test]
    fn confirm_node_repoints_children_and_edges() {
        let pending = NodeId::provisional();
        let mut store = CanvasStore::from_rows(
            vec![
                Node::new(pending, Behavior::Group),
                leaf("st_child", None).with_parent(Some(pending)),
                leaf("st_peer", None),
            ],
            vec![Edge::new(EdgeId::intern("st_pe"), pending, id("st_peer"))],
        );

        store.confirm_node(pending, Node::new(id("st_real"), Behavior::Group));
        assert!(!store.contains(pending));
        assert_eq!(store.get(id("st_child")).unwrap().parent, Some(id("st_real")));
        assert_eq!(store.edge(EdgeId::intern("st_pe")).unwrap().source, id("st_real"));
        assert_eq!(store.neighbors(id("st_peer")), vec![id("st_real")]);
    }

    #[test]
    fn upsert_edge_moves_endpoints() {
        let mut store = CanvasStore::from_rows(
            vec![leaf("st_x", None), leaf("st_y", None), leaf("st_z", None)],
            vec![Edge::new(EdgeId::intern("st_xy"), id("st_x"), id("st_y"))],
        );
        store
            .upsert_edge(Edge::new(EdgeId::intern("st_xy"), id("st_x"), id("st_z")))
            .unwrap();
        assert_eq!(store.edge_count(), 1);
        assert!(store.neighbors(id("st_y")).is_empty());
        assert_eq!(store.neighbors(id("st_z")), vec![id("st_x")]);
    }
}
