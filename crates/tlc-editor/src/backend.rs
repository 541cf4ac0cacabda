//! Backing collaborator: the remote table store the canvas persists to.
//!
//! The session only ever talks to it through [`Backend`]. Every call either
//! returns the row as the store now sees it or a typed [`BackendError`].
//! [`MemoryBackend`] is a complete in-process implementation for hosts
//! without a server and for tests, with per-operation failure injection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tlc_core::id::{EdgeId, NodeId};
use tlc_core::model::{Edge, EdgeDraft, EdgePatch, Geometry, Node, NodeDraft, NodePatch};
use tokio::sync::Mutex;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A row could not be decoded into the canvas model.
    #[error("schema mismatch: {0}")]
    Schema(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_all_nodes(&self) -> BackendResult<Vec<Node>>;
    async fn fetch_all_edges(&self) -> BackendResult<Vec<Edge>>;

    async fn create_node(&self, draft: NodeDraft) -> BackendResult<Node>;
    async fn update_node(&self, id: NodeId, patch: NodePatch) -> BackendResult<Node>;
    /// Delete `ids` and everything nested under them.
    async fn delete_nodes(&self, ids: &[NodeId]) -> BackendResult<()>;

    async fn create_edge(&self, draft: EdgeDraft) -> BackendResult<Edge>;
    async fn update_edge(&self, id: EdgeId, patch: EdgePatch) -> BackendResult<Edge>;
    async fn delete_edge(&self, id: EdgeId) -> BackendResult<()>;

    /// Write many geometries in one round trip (manual layout save).
    async fn batch_update_geometry(&self, rows: &[Geometry]) -> BackendResult<()>;
}

// ─── In-memory backend ───────────────────────────────────────────────────

/// Backend operations, for failure injection and the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    FetchNodes,
    FetchEdges,
    CreateNode,
    UpdateNode,
    DeleteNodes,
    CreateEdge,
    UpdateEdge,
    DeleteEdge,
    BatchGeometry,
}

/// Full table contents, as loaded from or dumped to JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

#[derive(Debug, Default)]
struct Tables {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    next_id: u64,
    failing: HashMap<Op, BackendError>,
    calls: Vec<Op>,
}

impl Tables {
    fn enter(&mut self, op: Op) -> BackendResult<()> {
        self.calls.push(op);
        match self.failing.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Next numeric id not already used by a node or edge.
    fn mint(&mut self) -> String {
        loop {
            self.next_id += 1;
            let candidate = self.next_id.to_string();
            let taken = self.nodes.iter().any(|n| n.id.as_str() == candidate)
                || self.edges.iter().any(|e| e.id.as_str() == candidate);
            if !taken {
                return candidate;
            }
        }
    }

    fn node_mut(&mut self, id: NodeId) -> BackendResult<&mut Node> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| BackendError::NotFound(format!("node {id}")))
    }

    fn has_node(&self, id: NodeId) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            tables: Mutex::new(Tables {
                nodes,
                edges,
                ..Default::default()
            }),
        }
    }

    /// Load tables from a `{"nodes": [...], "edges": [...]}` document.
    ///
    /// # Errors
    /// `Schema` if the JSON does not decode into canvas rows.
    pub fn from_json(json: &str) -> BackendResult<Self> {
        let snapshot: Snapshot =
            serde_json::from_str(json).map_err(|e| BackendError::Schema(e.to_string()))?;
        Ok(Self::with_rows(snapshot.nodes, snapshot.edges))
    }

    /// Make every future call to `op` fail with `err`.
    pub async fn fail(&self, op: Op, err: BackendError) {
        self.tables.lock().await.failing.insert(op, err);
    }

    pub async fn heal(&self, op: Op) {
        self.tables.lock().await.failing.remove(&op);
    }

    /// Operations received so far, in order (failed ones included).
    pub async fn calls(&self) -> Vec<Op> {
        self.tables.lock().await.calls.clone()
    }

    pub async fn call_count(&self, op: Op) -> usize {
        self.tables.lock().await.calls.iter().filter(|c| **c == op).count()
    }

    pub async fn snapshot(&self) -> Snapshot {
        let tables = self.tables.lock().await;
        Snapshot {
            nodes: tables.nodes.clone(),
            edges: tables.edges.clone(),
        }
    }

    pub async fn node(&self, id: NodeId) -> Option<Node> {
        self.tables.lock().await.nodes.iter().find(|n| n.id == id).cloned()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn fetch_all_nodes(&self) -> BackendResult<Vec<Node>> {
        let mut tables = self.tables.lock().await;
        tables.enter(Op::FetchNodes)?;
        Ok(tables.nodes.clone())
    }

    async fn fetch_all_edges(&self) -> BackendResult<Vec<Edge>> {
        let mut tables = self.tables.lock().await;
        tables.enter(Op::FetchEdges)?;
        Ok(tables.edges.clone())
    }

    async fn create_node(&self, draft: NodeDraft) -> BackendResult<Node> {
        let mut tables = self.tables.lock().await;
        tables.enter(Op::CreateNode)?;
        if let Some(parent) = draft.parent
            && !tables.has_node(parent)
        {
            return Err(BackendError::Rejected(format!("unknown parent {parent}")));
        }
        let id = NodeId::intern(&tables.mint());
        let node = draft.into_node(id);
        tables.nodes.push(node.clone());
        Ok(node)
    }

    async fn update_node(&self, id: NodeId, patch: NodePatch) -> BackendResult<Node> {
        let mut tables = self.tables.lock().await;
        tables.enter(Op::UpdateNode)?;
        if patch.parent == Some(Some(id)) {
            return Err(BackendError::Rejected(format!("{id} cannot contain itself")));
        }
        if let Some(Some(parent)) = patch.parent
            && !tables.has_node(parent)
        {
            return Err(BackendError::Rejected(format!("unknown parent {parent}")));
        }
        let node = tables.node_mut(id)?;
        node.apply_patch(&patch);
        Ok(node.clone())
    }

    async fn delete_nodes(&self, ids: &[NodeId]) -> BackendResult<()> {
        let mut tables = self.tables.lock().await;
        tables.enter(Op::DeleteNodes)?;

        let mut doomed: HashSet<NodeId> = ids.iter().copied().collect();
        loop {
            let before = doomed.len();
            for node in &tables.nodes {
                if node.parent.is_some_and(|p| doomed.contains(&p)) {
                    doomed.insert(node.id);
                }
            }
            if doomed.len() == before {
                break;
            }
        }
        tables.nodes.retain(|n| !doomed.contains(&n.id));
        tables
            .edges
            .retain(|e| !doomed.contains(&e.source) && !doomed.contains(&e.target));
        Ok(())
    }

    async fn create_edge(&self, draft: EdgeDraft) -> BackendResult<Edge> {
        let mut tables = self.tables.lock().await;
        tables.enter(Op::CreateEdge)?;
        if draft.source == draft.target {
            return Err(BackendError::Rejected("edge source equals target".into()));
        }
        for end in [draft.source, draft.target] {
            if !tables.has_node(end) {
                return Err(BackendError::Rejected(format!("unknown endpoint {end}")));
            }
        }
        let id = EdgeId::intern(&tables.mint());
        let edge = draft.into_edge(id);
        tables.edges.push(edge.clone());
        Ok(edge)
    }

    async fn update_edge(&self, id: EdgeId, patch: EdgePatch) -> BackendResult<Edge> {
        let mut tables = self.tables.lock().await;
        tables.enter(Op::UpdateEdge)?;
        let edge = tables
            .edges
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| BackendError::NotFound(format!("edge {id}")))?;
        edge.apply_patch(&patch);
        Ok(edge.clone())
    }

    async fn delete_edge(&self, id: EdgeId) -> BackendResult<()> {
        let mut tables = self.tables.lock().await;
        tables.enter(Op::DeleteEdge)?;
        let before = tables.edges.len();
        tables.edges.retain(|e| e.id != id);
        if tables.edges.len() == before {
            return Err(BackendError::NotFound(format!("edge {id}")));
        }
        Ok(())
    }

    async fn batch_update_geometry(&self, rows: &[Geometry]) -> BackendResult<()> {
        let mut tables = self.tables.lock().await;
        tables.enter(Op::BatchGeometry)?;
        for row in rows {
            // Rows for nodes deleted meanwhile are skipped, not fatal.
            if let Ok(node) = tables.node_mut(row.id) {
                node.position.x = row.x;
                node.position.y = row.y;
                node.width = row.width;
                node.height = row.height;
                node.z_index = row.z_index;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tlc_core::model::{Behavior, Point};

    fn id(s: &str) -> NodeId {
        NodeId::intern(s)
    }

    #[tokio::test]
    async fn integer_ids_load_from_json() {
        let backend = MemoryBackend::from_json(
            r#"{
                "nodes": [
                    {"id": 1, "title": "Era", "behavior": "portal",
                     "position": {"x": 0, "y": 0}, "width": 640, "height": 480},
                    {"id": "2", "title": "Event", "parent": 1,
                     "position": {"x": 20, "y": 60}, "width": 320, "height": 160}
                ],
                "edges": []
            }"#,
        )
        .unwrap();
        let nodes = backend.fetch_all_nodes().await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].behavior, Behavior::Portal);
        assert_eq!(nodes[1].parent, Some(id("1")));
    }

    #[test]
    fn malformed_json_is_a_schema_error() {
        let err = MemoryBackend::from_json(r#"{"nodes": [{"id": 1}]}"#).unwrap_err();
        assert!(matches!(err, BackendError::Schema(_)));
    }

    #[tokio::test]
    async fn created_ids_skip_existing_rows() {
        let backend = MemoryBackend::with_rows(
            vec![Node::new(id("1"), Behavior::Leaf), Node::new(id("2"), Behavior::Leaf)],
            vec![],
        );
        let node = backend
            .create_node(NodeDraft::new("new", Behavior::Leaf, Point::ORIGIN))
            .await
            .unwrap();
        assert_eq!(node.id, id("3"));
    }

    #[tokio::test]
    async fn delete_cascades_server_side() {
        let backend = MemoryBackend::with_rows(
            vec![
                Node::new(id("mb_f"), Behavior::Group),
                Node::new(id("mb_in"), Behavior::Leaf).with_parent(Some(id("mb_f"))),
                Node::new(id("mb_out"), Behavior::Leaf),
            ],
            vec![Edge::new(EdgeId::intern("mb_e"), id("mb_in"), id("mb_out"))],
        );
        backend.delete_nodes(&[id("mb_f")]).await.unwrap();
        let snapshot = backend.snapshot().await;
        assert_eq!(snapshot.nodes.len(), 1);
        assert!(snapshot.edges.is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_logged_and_healable() {
        let backend = MemoryBackend::new();
        backend
            .fail(Op::FetchNodes, BackendError::Unavailable("offline".into()))
            .await;
        assert!(backend.fetch_all_nodes().await.is_err());
        backend.heal(Op::FetchNodes).await;
        assert!(backend.fetch_all_nodes().await.is_ok());
        assert_eq!(backend.calls().await, vec![Op::FetchNodes, Op::FetchNodes]);
    }

    #[tokio::test]
    async fn self_parent_update_is_rejected() {
        let backend = MemoryBackend::with_rows(vec![Node::new(id("mb_s"), Behavior::Group)], vec![]);
        let patch = NodePatch {
            parent: Some(Some(id("mb_s"))),
            ..Default::default()
        };
        let err = backend.update_node(id("mb_s"), patch).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));
    }
}
