//! Backend round-trips owed by changes the session has already applied.
//!
//! Every `begin_*` call on [`CanvasSession`](crate::CanvasSession) mutates
//! the store, re-projects, and hands back a [`Staged`] value holding the
//! [`Pending`] job still to run. A job owns everything it needs, so the host
//! can spawn it and keep rendering and editing while it is in flight. Its
//! [`Settled`] result goes back through `CanvasSession::finish`, which takes
//! echoes, rolls back, or schedules a reload.

use crate::backend::{Backend, BackendError, BackendResult};
use std::fmt;
use std::sync::Arc;
use tlc_core::id::{EdgeId, NodeId};
use tlc_core::model::{Edge, EdgeDraft, EdgePatch, Geometry, Node, NodeDraft, NodePatch};
use tokio::task::JoinSet;

/// What a `begin_*` call applied locally, plus the round-trip it still owes.
#[must_use = "a pending round-trip must be run and finished"]
pub struct Staged<T> {
    pub value: T,
    pub pending: Option<Pending>,
}

impl<T> Staged<T> {
    pub(crate) fn new(value: T, pending: Option<Pending>) -> Self {
        Self { value, pending }
    }
}

/// What `finish` applied.
#[derive(Default)]
pub struct Landed {
    /// `(provisional, confirmed)` node ids swapped by this step.
    pub nodes: Vec<(NodeId, NodeId)>,
    /// `(provisional, confirmed)` edge id, for a finished connect.
    pub edge: Option<(EdgeId, EdgeId)>,
    /// Follow-up round-trip: a folder layout after an expansion, or a
    /// reload after a failed multi-row write.
    pub then: Option<Pending>,
}

impl Landed {
    pub fn confirmed(&self, provisional: NodeId) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(p, _)| *p == provisional)
            .map(|(_, id)| *id)
    }
}

/// The failure a reload is standing in for.
pub(crate) struct Failure {
    pub op: &'static str,
    pub reason: String,
}

pub(crate) struct Write {
    pub id: NodeId,
    pub patch: NodePatch,
    /// Store revision when the write was staged.
    pub issued: u64,
}

pub(crate) enum Job {
    Reload {
        failed: Option<Failure>,
    },
    /// Parallel `update_node` calls: reparents and folder layouts.
    Writes {
        op: &'static str,
        writes: Vec<Write>,
    },
    CreateNode {
        provisional: NodeId,
        draft: NodeDraft,
    },
    Expand {
        folder: NodeId,
        items: Vec<(NodeId, NodeDraft)>,
    },
    UpdateNode {
        id: NodeId,
        patch: NodePatch,
        issued: u64,
        previous: Node,
    },
    DeleteNodes {
        ids: Vec<NodeId>,
    },
    CreateEdge {
        provisional: EdgeId,
        draft: EdgeDraft,
    },
    UpdateEdge {
        patch: EdgePatch,
        previous: Edge,
        updated: Edge,
    },
    DeleteEdge {
        removed: Edge,
    },
    SaveLayout {
        rows: Vec<Geometry>,
    },
}

impl Job {
    fn op(&self) -> &'static str {
        match self {
            Job::Reload { .. } => "reload",
            Job::Writes { op, .. } => *op,
            Job::CreateNode { .. } => "create node",
            Job::Expand { .. } => "expand folder",
            Job::UpdateNode { .. } => "update node",
            Job::DeleteNodes { .. } => "delete nodes",
            Job::CreateEdge { .. } => "connect",
            Job::UpdateEdge { .. } => "update edge",
            Job::DeleteEdge { .. } => "delete edge",
            Job::SaveLayout { .. } => "save layout",
        }
    }
}

pub(crate) enum Outcome {
    Reload {
        failed: Option<Failure>,
        fetched: BackendResult<(Vec<Node>, Vec<Edge>)>,
    },
    Writes {
        op: &'static str,
        echoes: BackendResult<Vec<(Node, u64)>>,
    },
    CreateNode {
        provisional: NodeId,
        reply: BackendResult<Node>,
    },
    Expand {
        folder: NodeId,
        created: BackendResult<Vec<(NodeId, Node)>>,
    },
    UpdateNode {
        issued: u64,
        touches_geometry: bool,
        previous: Node,
        reply: BackendResult<Node>,
    },
    DeleteNodes {
        reply: BackendResult<()>,
    },
    CreateEdge {
        provisional: EdgeId,
        reply: BackendResult<Edge>,
    },
    UpdateEdge {
        previous: Edge,
        updated: Edge,
        reply: BackendResult<Edge>,
    },
    DeleteEdge {
        removed: Edge,
        reply: BackendResult<()>,
    },
    SaveLayout {
        rows: Vec<Geometry>,
        reply: BackendResult<()>,
    },
}

/// A backend round-trip, detached from the session.
pub struct Pending {
    backend: Arc<dyn Backend>,
    job: Job,
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending").field("op", &self.op()).finish()
    }
}

impl Pending {
    pub(crate) fn new(backend: Arc<dyn Backend>, job: Job) -> Self {
        Self { backend, job }
    }

    pub fn op(&self) -> &'static str {
        self.job.op()
    }

    /// Talk to the backend. Never touches the session.
    pub async fn run(self) -> Settled {
        let Pending { backend, job } = self;
        let outcome = match job {
            Job::Reload { failed } => {
                let fetched =
                    tokio::try_join!(backend.fetch_all_nodes(), backend.fetch_all_edges());
                Outcome::Reload { failed, fetched }
            }
            Job::Writes { op, writes } => Outcome::Writes {
                op,
                echoes: write_all(&backend, writes).await,
            },
            Job::CreateNode { provisional, draft } => Outcome::CreateNode {
                provisional,
                reply: backend.create_node(draft).await,
            },
            Job::Expand { folder, items } => Outcome::Expand {
                folder,
                created: create_all(&backend, items).await,
            },
            Job::UpdateNode {
                id,
                patch,
                issued,
                previous,
            } => {
                let touches_geometry =
                    patch.position.is_some() || patch.width.is_some() || patch.height.is_some();
                Outcome::UpdateNode {
                    issued,
                    touches_geometry,
                    previous,
                    reply: backend.update_node(id, patch).await,
                }
            }
            Job::DeleteNodes { ids } => Outcome::DeleteNodes {
                reply: backend.delete_nodes(&ids).await,
            },
            Job::CreateEdge { provisional, draft } => Outcome::CreateEdge {
                provisional,
                reply: backend.create_edge(draft).await,
            },
            Job::UpdateEdge {
                patch,
                previous,
                updated,
            } => {
                let reply = backend.update_edge(updated.id, patch).await;
                Outcome::UpdateEdge {
                    previous,
                    updated,
                    reply,
                }
            }
            Job::DeleteEdge { removed } => {
                let reply = backend.delete_edge(removed.id).await;
                Outcome::DeleteEdge { removed, reply }
            }
            Job::SaveLayout { rows } => {
                let reply = backend.batch_update_geometry(&rows).await;
                Outcome::SaveLayout { rows, reply }
            }
        };
        Settled(outcome)
    }
}

/// Result of [`Pending::run`], to be handed to `CanvasSession::finish`.
pub struct Settled(pub(crate) Outcome);

/// One `update_node` per write, all in flight at once; returns after every
/// call has settled.
async fn write_all(
    backend: &Arc<dyn Backend>,
    writes: Vec<Write>,
) -> BackendResult<Vec<(Node, u64)>> {
    let mut tasks = JoinSet::new();
    for Write { id, patch, issued } in writes {
        let backend = Arc::clone(backend);
        tasks.spawn(async move { backend.update_node(id, patch).await.map(|echo| (echo, issued)) });
    }
    settle_all(tasks).await
}

async fn create_all(
    backend: &Arc<dyn Backend>,
    items: Vec<(NodeId, NodeDraft)>,
) -> BackendResult<Vec<(NodeId, Node)>> {
    let mut tasks = JoinSet::new();
    for (order, (provisional, draft)) in items.into_iter().enumerate() {
        let backend = Arc::clone(backend);
        tasks.spawn(async move {
            backend
                .create_node(draft)
                .await
                .map(|row| (order, (provisional, row)))
        });
    }
    let mut created = settle_all(tasks).await?;
    created.sort_by_key(|(order, _)| *order);
    Ok(created.into_iter().map(|(_, pair)| pair).collect())
}

/// Collect every task; the first failure wins.
async fn settle_all<T: Send + 'static>(
    mut tasks: JoinSet<BackendResult<T>>,
) -> BackendResult<Vec<T>> {
    let mut done = Vec::new();
    let mut failure = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(value)) => done.push(value),
            Ok(Err(e)) => {
                failure.get_or_insert(e);
            }
            Err(e) => {
                failure.get_or_insert(BackendError::Unavailable(e.to_string()));
            }
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(done),
    }
}
