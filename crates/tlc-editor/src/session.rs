//! Editing session: the authoritative store plus the persistence protocol.
//!
//! The session owns the [`CanvasStore`] and is the only thing that mutates
//! it. Every gesture is split in two:
//!
//! 1. `begin_*` mutates the store synchronously and re-projects, so the
//!    host renders the intent at once, and returns the [`Pending`]
//!    round-trip it owes the backend;
//! 2. [`CanvasSession::finish`] folds the settled result back in: echoes
//!    are taken unless a newer local change superseded them, single-row
//!    failures are undone locally, and multi-row failures (reparent,
//!    layout, delete, expansion) schedule a full reload.
//!
//! The host may run the pending job anywhere and keep editing meanwhile.
//! The `async` gesture methods are shorthands that stage, run and finish
//! in one go.
//!
//! Plain moves and resizes are not persisted individually: they raise the
//! dirty flag and wait for an explicit [`CanvasSession::save_layout`].

use crate::backend::{Backend, BackendError, BackendResult};
use crate::pending::{Failure, Job, Landed, Outcome, Pending, Settled, Staged, Write};
use std::collections::HashSet;
use std::sync::Arc;
use tlc_core::config::CanvasConfig;
use tlc_core::containment::{DragEnd, DropContext, DropDecision, Reparent, resolve_drop};
use tlc_core::dirty::DirtyTracker;
use tlc_core::error::{CanvasError, Result};
use tlc_core::hit::BreadcrumbHitbox;
use tlc_core::id::{EdgeId, NodeId};
use tlc_core::layout::{rearrange, resize_to_fit, scale_children};
use tlc_core::model::*;
use tlc_core::nav::Breadcrumbs;
use tlc_core::project::{Projection, project_store};
use tlc_core::selection::EdgeHighlighter;
use tlc_core::store::{CanvasStore, LoadReport};

/// Whether the initial fetch has happened and how it went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Empty,
    Ready,
    /// The store was left empty; nothing is rendered.
    Failed(String),
}

pub struct CanvasSession {
    store: CanvasStore,
    backend: Arc<dyn Backend>,
    config: CanvasConfig,
    nav: Breadcrumbs,
    tracker: DirtyTracker,
    highlighter: EdgeHighlighter,
    selection: HashSet<NodeId>,
    filter: Option<String>,
    projection: Projection,
    state: LoadState,
    last_error: Option<CanvasError>,
}

impl CanvasSession {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let config = CanvasConfig::default();
        Self {
            store: CanvasStore::new(),
            backend,
            tracker: DirtyTracker::new(config.position_tolerance),
            config,
            nav: Breadcrumbs::new(),
            highlighter: EdgeHighlighter::new(),
            selection: HashSet::new(),
            filter: None,
            projection: Projection::default(),
            state: LoadState::Empty,
            last_error: None,
        }
    }

    /// # Errors
    /// `Config` if the configuration does not validate.
    pub fn with_config(backend: Arc<dyn Backend>, config: CanvasConfig) -> Result<Self> {
        config.validate()?;
        let mut session = Self::new(backend);
        session.tracker = DirtyTracker::new(config.position_tolerance);
        session.config = config;
        Ok(session)
    }

    // ─── Host-facing state ───────────────────────────────────────────────

    pub fn store(&self) -> &CanvasStore {
        &self.store
    }

    /// What the canvas should render right now.
    pub fn visible(&self) -> &Projection {
        &self.projection
    }

    pub fn breadcrumbs(&self) -> &Breadcrumbs {
        &self.nav
    }

    pub fn current_root(&self) -> Option<NodeId> {
        self.nav.current()
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.tracker.is_dirty()
    }

    pub fn selection(&self) -> &HashSet<NodeId> {
        &self.selection
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn config(&self) -> &CanvasConfig {
        &self.config
    }

    /// Most recent failure, kept until the next one.
    pub fn last_error(&self) -> Option<&CanvasError> {
        self.last_error.as_ref()
    }

    /// Edge styles for this frame. Cheap when the selection is unchanged.
    pub fn edge_styles(&mut self) -> &EdgeHighlighter {
        self.highlighter.react(&self.selection, &self.projection.edges);
        &self.highlighter
    }

    fn reproject(&mut self) {
        let mut projection = project_store(
            &self.store,
            self.nav.current(),
            self.filter.as_deref(),
            &self.config,
        );
        projection.mark_selected(&self.selection);
        self.projection = projection;
        self.highlighter.invalidate();
    }

    fn fail(&mut self, err: CanvasError) -> CanvasError {
        self.last_error = Some(err.clone());
        err
    }

    fn job(&self, job: Job) -> Pending {
        Pending::new(Arc::clone(&self.backend), job)
    }

    fn reload_job(&self, op: &'static str, err: BackendError) -> Pending {
        log::warn!("{op} failed ({err}); reloading");
        self.job(Job::Reload {
            failed: Some(Failure {
                op,
                reason: err.to_string(),
            }),
        })
    }

    // ─── Loading ─────────────────────────────────────────────────────────

    /// Replace the store with a full fetch from the backend.
    ///
    /// # Errors
    /// `Load` when either fetch fails; the store is left empty.
    pub async fn load_all(&mut self) -> Result<LoadReport> {
        let fetched = tokio::try_join!(
            self.backend.fetch_all_nodes(),
            self.backend.fetch_all_edges()
        );
        self.apply_load(fetched)
    }

    fn apply_load(&mut self, fetched: BackendResult<(Vec<Node>, Vec<Edge>)>) -> Result<LoadReport> {
        match fetched {
            Ok((nodes, edges)) => {
                let report = self.store.replace_all(nodes, edges);
                if !report.is_clean() {
                    log::warn!(
                        "load repaired {} self-parented nodes, dropped {} edges",
                        report.self_parented.len(),
                        report.dropped_edges.len()
                    );
                }
                self.tracker.reset(&self.store);
                self.nav.retain_existing(|id| self.store.contains(id));
                self.selection.retain(|id| self.store.contains(*id));
                self.state = LoadState::Ready;
                self.reproject();
                log::debug!(
                    "loaded {} nodes, {} edges",
                    self.store.len(),
                    self.store.edge_count()
                );
                Ok(report)
            }
            Err(e) => {
                log::error!("load failed: {e}");
                self.store.clear();
                self.tracker.reset(&self.store);
                self.selection.clear();
                self.state = LoadState::Failed(e.to_string());
                self.reproject();
                Err(self.fail(CanvasError::Load(e.to_string())))
            }
        }
    }

    // ─── Completion ──────────────────────────────────────────────────────

    /// Fold a settled round-trip back into the store.
    ///
    /// A failed multi-row write is not reported here: the returned
    /// [`Landed::then`] holds the reload, and finishing that reload yields
    /// the `Mutation` error with `reloaded` set.
    ///
    /// # Errors
    /// `Mutation` for a failed single-row change (already rolled back), or
    /// for the failure a finished reload stood in for.
    pub fn finish(&mut self, settled: Settled) -> Result<Landed> {
        let mut landed = Landed::default();
        match settled.0 {
            Outcome::Reload { failed, fetched } => {
                let loaded = self.apply_load(fetched);
                if let Some(Failure { op, reason }) = failed {
                    return Err(self.fail(CanvasError::Mutation {
                        op,
                        reason,
                        reloaded: loaded.is_ok(),
                    }));
                }
                loaded?;
            }
            Outcome::Writes { op, echoes } => match echoes {
                Ok(echoes) => {
                    for (echo, issued) in echoes {
                        self.take_echo(echo, issued);
                    }
                }
                Err(e) => landed.then = Some(self.reload_job(op, e)),
            },
            Outcome::CreateNode { provisional, reply } => match reply {
                Ok(row) => {
                    landed.nodes.push((provisional, row.id));
                    self.confirm_created(provisional, row);
                }
                Err(e) => {
                    log::warn!("create failed ({e}); removing {provisional}");
                    self.store.remove_nodes(&[provisional]);
                    self.selection.remove(&provisional);
                    self.reproject();
                    return Err(self.fail(CanvasError::Mutation {
                        op: "create node",
                        reason: e.to_string(),
                        reloaded: false,
                    }));
                }
            },
            Outcome::Expand { folder, created } => match created {
                Ok(rows) => {
                    log::debug!("expanded {folder} with {} items", rows.len());
                    for (provisional, row) in rows {
                        landed.nodes.push((provisional, row.id));
                        self.confirm_created(provisional, row);
                    }
                    landed.then = self.stage_layout("layout", folder)?;
                }
                Err(e) => landed.then = Some(self.reload_job("expand folder", e)),
            },
            Outcome::UpdateNode {
                issued,
                touches_geometry,
                previous,
                reply,
            } => match reply {
                Ok(echo) => {
                    if touches_geometry {
                        self.take_echo(echo, issued);
                    } else {
                        self.store.accept_echo(echo, issued);
                    }
                }
                // A newer local edit would be clobbered by rolling back.
                Err(e) if self.store.revision(previous.id) > issued => {
                    landed.then = Some(self.reload_job("update node", e));
                }
                Err(e) => return Err(self.rollback("update node", e, previous)),
            },
            Outcome::DeleteNodes { reply } => {
                if let Err(e) = reply {
                    landed.then = Some(self.reload_job("delete nodes", e));
                }
            }
            Outcome::CreateEdge { provisional, reply } => match reply {
                Ok(edge) => {
                    landed.edge = Some((provisional, edge.id));
                    if let Err(e) = self.store.confirm_edge(provisional, edge) {
                        self.reproject();
                        return Err(self.fail(e));
                    }
                }
                Err(e) => {
                    log::warn!("connect failed ({e}); removing {provisional}");
                    self.store.remove_edge(provisional);
                    self.reproject();
                    return Err(self.fail(CanvasError::Mutation {
                        op: "connect",
                        reason: e.to_string(),
                        reloaded: false,
                    }));
                }
            },
            Outcome::UpdateEdge {
                previous,
                updated,
                reply,
            } => {
                // Edges carry no revision; only touch the edge if nothing
                // else changed it meanwhile.
                let untouched = self.store.edge(updated.id) == Some(&updated);
                match reply {
                    Ok(echo) => {
                        if untouched {
                            self.store.upsert_edge(echo)?;
                        }
                    }
                    Err(e) => {
                        log::warn!("edge update failed ({e}); rolling back {}", updated.id);
                        if untouched && let Err(err) = self.store.upsert_edge(previous) {
                            log::warn!("rollback rejected: {err}");
                        }
                        self.reproject();
                        return Err(self.fail(CanvasError::Mutation {
                            op: "update edge",
                            reason: e.to_string(),
                            reloaded: false,
                        }));
                    }
                }
            }
            Outcome::DeleteEdge { removed, reply } => {
                if let Err(e) = reply {
                    log::warn!("edge delete failed ({e}); restoring {}", removed.id);
                    if let Err(err) = self.store.upsert_edge(removed) {
                        log::warn!("restore rejected: {err}");
                    }
                    self.reproject();
                    return Err(self.fail(CanvasError::Mutation {
                        op: "delete edge",
                        reason: e.to_string(),
                        reloaded: false,
                    }));
                }
            }
            Outcome::SaveLayout { rows, reply } => match reply {
                Ok(()) => {
                    self.tracker.saved_rows(&rows, &self.store);
                    log::debug!("saved layout of {} nodes", rows.len());
                }
                Err(e) => {
                    log::warn!("layout save failed: {e}");
                    return Err(self.fail(CanvasError::Mutation {
                        op: "save layout",
                        reason: e.to_string(),
                        reloaded: false,
                    }));
                }
            },
        }
        self.reproject();
        Ok(landed)
    }

    /// Run `pending` and every follow-up it schedules, finishing each.
    ///
    /// # Errors
    /// The first error [`finish`](Self::finish) reports.
    pub async fn drive(&mut self, pending: Option<Pending>) -> Result<Landed> {
        let mut landed = Landed::default();
        let mut next = pending;
        while let Some(job) = next {
            let step = self.finish(job.run().await)?;
            landed.nodes.extend(step.nodes);
            landed.edge = step.edge.or(landed.edge);
            next = step.then;
        }
        Ok(landed)
    }

    /// Take a geometry echo, confirming it as saved only if it was current.
    fn take_echo(&mut self, echo: Node, issued: u64) {
        let confirmed = echo.clone();
        if self.store.accept_echo(echo, issued) {
            self.tracker.confirm(&confirmed);
        }
    }

    fn confirm_created(&mut self, provisional: NodeId, row: Node) {
        let id = row.id;
        self.tracker.confirm(&row);
        self.store.confirm_node(provisional, row);
        if self.selection.remove(&provisional) {
            self.selection.insert(id);
        }
    }

    /// Undo a single-node optimistic change.
    fn rollback(&mut self, op: &'static str, err: BackendError, previous: Node) -> CanvasError {
        log::warn!("{op} failed ({err}); rolling back {}", previous.id);
        self.nav.rename(previous.id, &previous.title);
        if let Err(e) = self.store.upsert_node(previous) {
            log::warn!("rollback rejected: {e}");
        }
        self.reproject();
        self.fail(CanvasError::Mutation {
            op,
            reason: err.to_string(),
            reloaded: false,
        })
    }

    // ─── Navigation, filter, selection ───────────────────────────────────

    /// Open `id` as the canvas root (`None` = Home).
    ///
    /// # Errors
    /// `UnknownNode` if `id` is not in the store; `NotAContainer` for a LEAF.
    pub fn navigate(&mut self, id: Option<NodeId>) -> Result<()> {
        let title = match id {
            None => Breadcrumbs::HOME.to_string(),
            Some(id) => match self.store.get(id) {
                Some(node) if node.behavior.is_container() => node.title.clone(),
                Some(_) => return Err(self.fail(CanvasError::NotAContainer(id))),
                None => return Err(self.fail(CanvasError::UnknownNode(id))),
            },
        };
        self.nav.navigate(id, title);
        self.reproject();
        Ok(())
    }

    pub fn navigate_up(&mut self) {
        self.nav.up();
        self.reproject();
    }

    /// Set or clear the title search. Blank queries clear it.
    pub fn set_filter(&mut self, query: Option<&str>) {
        self.filter = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string);
        self.reproject();
    }

    pub fn select(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        self.selection = ids.into_iter().filter(|id| self.store.contains(*id)).collect();
        self.projection.mark_selected(&self.selection);
    }

    // ─── Gestures ────────────────────────────────────────────────────────

    /// Resolve and apply a drag-end locally.
    ///
    /// # Errors
    /// Resolver rejections (`SelfReference`, `Cycle`, `UnknownNode`) with
    /// nothing mutated.
    pub fn begin_drag_end(
        &mut self,
        drag: DragEnd,
        breadcrumbs: &[BreadcrumbHitbox],
    ) -> Result<Staged<DropDecision>> {
        let resolved = resolve_drop(
            &DropContext {
                store: &self.store,
                projection: &self.projection,
                breadcrumbs,
                tracker: &self.tracker,
                config: &self.config,
            },
            &drag,
        );
        let decision = match resolved {
            Ok(decision) => decision,
            Err(e) => return Err(self.fail(e)),
        };

        let pending = match decision {
            DropDecision::Escape(r) | DropDecision::Enter(r) | DropDecision::Breadcrumb(r) => {
                Some(self.stage_reparent("reparent", r, NodePatch::default())?)
            }
            DropDecision::Settle { parent, position } => {
                self.set_position(drag.id, position)?;
                self.tracker.mark_dirty();
                self.stage_layout("layout", parent)?
            }
            DropDecision::Move { position, dirty } => {
                self.set_position(drag.id, position)?;
                if dirty {
                    self.tracker.mark_dirty();
                }
                None
            }
        };
        self.reproject();
        Ok(Staged::new(decision, pending))
    }

    /// Resolve, apply and persist a drag-end.
    ///
    /// # Errors
    /// As [`begin_drag_end`](Self::begin_drag_end), or `Mutation` when
    /// persisting a reparent/layout failed (the store has then been
    /// reloaded).
    pub async fn on_drag_end(
        &mut self,
        drag: DragEnd,
        breadcrumbs: &[BreadcrumbHitbox],
    ) -> Result<DropDecision> {
        let staged = self.begin_drag_end(drag, breadcrumbs)?;
        self.drive(staged.pending).await?;
        Ok(staged.value)
    }

    fn set_position(&mut self, id: NodeId, position: Point) -> Result<()> {
        let Some(mut node) = self.store.get(id).cloned() else {
            return Err(self.fail(CanvasError::UnknownNode(id)));
        };
        node.position = position;
        self.store.upsert_node(node)
    }

    /// Apply a finished resize. GROUP children are scaled with it (direct
    /// children only). Nothing is persisted until `save_layout`.
    ///
    /// # Errors
    /// `UnknownNode` if `id` is not in the store.
    pub fn on_resize_end(&mut self, id: NodeId, width: f32, height: f32) -> Result<()> {
        let Some(mut node) = self.store.get(id).cloned() else {
            return Err(self.fail(CanvasError::UnknownNode(id)));
        };
        if node.behavior == Behavior::Group {
            for child in scale_children(&self.store, id, width, height) {
                self.tracker.check(&child);
                self.store.upsert_node(child)?;
            }
        }
        node.width = width;
        node.height = height;
        self.tracker.check(&node);
        self.store.upsert_node(node)?;
        self.reproject();
        Ok(())
    }

    /// Move `id` under `parent` keeping its on-canvas position.
    ///
    /// # Errors
    /// `SelfReference`, `Cycle`, `NotAContainer` or `UnknownNode` before
    /// anything is mutated.
    pub fn begin_move_into(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<Staged<()>> {
        let Some(node) = self.store.get(id) else {
            return Err(self.fail(CanvasError::UnknownNode(id)));
        };
        let from = node.parent;
        if let Err(e) = self.check_parent(id, parent) {
            return Err(self.fail(e));
        }
        let reparent = Reparent {
            node: id,
            from,
            to: parent,
            position: self.keep_on_canvas(id, parent),
        };
        let pending = self.stage_reparent("reparent", reparent, NodePatch::default())?;
        Ok(Staged::new((), Some(pending)))
    }

    /// # Errors
    /// As [`begin_move_into`](Self::begin_move_into), or `Mutation` if the
    /// backend rejected the move (the store has then been reloaded).
    pub async fn move_into(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<()> {
        let staged = self.begin_move_into(id, parent)?;
        self.drive(staged.pending).await?;
        Ok(())
    }

    /// Position of `id` in `parent`'s content space that leaves it where
    /// it is on the canvas, kept clear of the header.
    fn keep_on_canvas(&self, id: NodeId, parent: Option<NodeId>) -> Point {
        let absolute = self.store.origin_of(id, None);
        let frame = parent.map_or(Point::ORIGIN, |p| self.store.origin_of(p, None));
        let mut position = absolute.minus(frame);
        if parent.is_some() {
            position.y = position.y.max(self.config.header_offset);
        }
        position
    }

    fn check_parent(&self, id: NodeId, parent: Option<NodeId>) -> Result<()> {
        let Some(parent) = parent else {
            return Ok(());
        };
        if parent == id {
            return Err(CanvasError::SelfReference(id));
        }
        let Some(target) = self.store.get(parent) else {
            return Err(CanvasError::UnknownNode(parent));
        };
        if self.store.is_descendant_of(parent, id) {
            return Err(CanvasError::Cycle {
                node: id,
                target: parent,
            });
        }
        if !target.behavior.is_container() {
            return Err(CanvasError::NotAContainer(parent));
        }
        Ok(())
    }

    /// Apply a reparent (plus any other edited fields) and lay out both
    /// containers; the returned job writes every node that changed.
    fn stage_reparent(
        &mut self,
        op: &'static str,
        r: Reparent,
        extra: NodePatch,
    ) -> Result<Pending> {
        let Some(node) = self.store.get(r.node) else {
            return Err(self.fail(CanvasError::UnknownNode(r.node)));
        };
        let mut edited = node.clone();
        edited.apply_patch(&extra);
        self.store.upsert_node(r.applied_to(&edited))?;
        if let Some(title) = &extra.title {
            self.nav.rename(r.node, title);
        }

        let mut touched = vec![r.node];
        for container in r.containers() {
            touched.extend(self.layout_locally(container)?);
        }
        self.reproject();
        log::debug!("reparenting {} from {:?} to {:?}", r.node, r.from, r.to);
        Ok(self.writes(op, &touched, Some((r.node, extra))))
    }

    /// One write per distinct id. `placed` also carries parent and any
    /// edited fields for the reparented node.
    fn writes(
        &self,
        op: &'static str,
        touched: &[NodeId],
        placed: Option<(NodeId, NodePatch)>,
    ) -> Pending {
        let mut seen = HashSet::new();
        let writes = touched
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|&id| {
                let node = self.store.get(id)?;
                let patch = match &placed {
                    Some((placed_id, extra)) if *placed_id == id => NodePatch {
                        parent: Some(node.parent),
                        position: Some(node.position),
                        width: Some(node.width),
                        height: Some(node.height),
                        ..extra.clone()
                    },
                    _ => NodePatch::geometry_of(node),
                };
                Some(Write {
                    id,
                    patch,
                    issued: self.store.revision(id),
                })
            })
            .collect();
        self.job(Job::Writes { op, writes })
    }

    // ─── Folder layout ───────────────────────────────────────────────────

    /// Grid-arrange and fit `parent` in the store. Returns the ids whose
    /// geometry changed. PORTALs are never laid out.
    fn layout_locally(&mut self, parent: NodeId) -> Result<Vec<NodeId>> {
        let Some(container) = self.store.get(parent) else {
            return Ok(Vec::new());
        };
        if container.behavior == Behavior::Portal {
            return Ok(Vec::new());
        }

        let tolerance = self.config.position_tolerance;
        let mut changed = Vec::new();
        for node in rearrange(&self.store, parent, &self.config.layout, tolerance) {
            changed.push(node.id);
            self.store.upsert_node(node)?;
        }
        if let Some(resized) = resize_to_fit(&self.store, parent, &self.config.layout) {
            let same_size = self
                .store
                .get(parent)
                .is_some_and(|c| c.width == resized.width && c.height == resized.height);
            if !same_size {
                changed.push(parent);
                self.store.upsert_node(resized)?;
            }
        }
        log::debug!("layout {parent}: {} nodes changed", changed.len());
        Ok(changed)
    }

    fn stage_layout(&mut self, op: &'static str, parent: NodeId) -> Result<Option<Pending>> {
        let changed = self.layout_locally(parent)?;
        self.reproject();
        if changed.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.writes(op, &changed, None)))
    }

    /// Grid-arrange and auto-size a folder locally.
    ///
    /// # Errors
    /// `UnknownNode` if `parent` is not in the store.
    pub fn begin_relayout(&mut self, parent: NodeId) -> Result<Staged<()>> {
        if !self.store.contains(parent) {
            return Err(self.fail(CanvasError::UnknownNode(parent)));
        }
        let pending = self.stage_layout("layout", parent)?;
        Ok(Staged::new((), pending))
    }

    /// Grid-arrange and auto-size a folder, persisting every node that
    /// changed.
    ///
    /// # Errors
    /// `Mutation` if any write failed; the store has then been reloaded.
    pub async fn relayout(&mut self, parent: NodeId) -> Result<()> {
        let staged = self.begin_relayout(parent)?;
        self.drive(staged.pending).await?;
        Ok(())
    }

    /// Insert one LEAF per external item into `folder` under provisional
    /// ids, returned in item order.
    ///
    /// # Errors
    /// `NotAContainer` / `UnknownNode` before anything is mutated.
    pub fn begin_expand_folder(
        &mut self,
        folder: NodeId,
        items: Vec<NodeDraft>,
    ) -> Result<Staged<Vec<NodeId>>> {
        match self.store.get(folder).map(|n| n.behavior.is_container()) {
            None => return Err(self.fail(CanvasError::UnknownNode(folder))),
            Some(false) => return Err(self.fail(CanvasError::NotAContainer(folder))),
            Some(true) => {}
        }

        let mut staged = Vec::with_capacity(items.len());
        for mut draft in items {
            draft.parent = Some(folder);
            let provisional = NodeId::provisional();
            self.store.upsert_node(draft.clone().into_node(provisional))?;
            staged.push((provisional, draft));
        }
        self.reproject();

        let provisional = staged.iter().map(|(id, _)| *id).collect();
        let pending = self.job(Job::Expand {
            folder,
            items: staged,
        });
        Ok(Staged::new(provisional, Some(pending)))
    }

    /// Expand `folder` and lay it out. Returns the created ids.
    ///
    /// # Errors
    /// As [`begin_expand_folder`](Self::begin_expand_folder), or `Mutation`
    /// if any create or layout write failed (the store has then been
    /// reloaded).
    pub async fn expand_folder(
        &mut self,
        folder: NodeId,
        items: Vec<NodeDraft>,
    ) -> Result<Vec<NodeId>> {
        let staged = self.begin_expand_folder(folder, items)?;
        let landed = self.drive(staged.pending).await?;
        Ok(staged
            .value
            .iter()
            .filter_map(|p| landed.confirmed(*p))
            .collect())
    }

    // ─── Node CRUD ───────────────────────────────────────────────────────

    /// Show a new node at once under a provisional id.
    ///
    /// # Errors
    /// `UnknownNode` / `NotAContainer` for a bad parent.
    pub fn begin_create_node(&mut self, draft: NodeDraft) -> Result<Staged<NodeId>> {
        if let Some(parent) = draft.parent {
            match self.store.get(parent).map(|p| p.behavior.is_container()) {
                None => return Err(self.fail(CanvasError::UnknownNode(parent))),
                Some(false) => return Err(self.fail(CanvasError::NotAContainer(parent))),
                Some(true) => {}
            }
        }

        let provisional = NodeId::provisional();
        self.store.upsert_node(draft.clone().into_node(provisional))?;
        self.reproject();
        let pending = self.job(Job::CreateNode { provisional, draft });
        Ok(Staged::new(provisional, Some(pending)))
    }

    /// Create a node and return its confirmed id.
    ///
    /// # Errors
    /// As [`begin_create_node`](Self::begin_create_node), or `Mutation` if
    /// the backend rejected it (the provisional node is removed again).
    pub async fn create_node(&mut self, draft: NodeDraft) -> Result<NodeId> {
        let staged = self.begin_create_node(draft)?;
        let landed = self.drive(staged.pending).await?;
        Ok(landed.confirmed(staged.value).unwrap_or(staged.value))
    }

    /// Edit node fields locally. A parent change goes through the reparent
    /// path: the node keeps its canvas position (unless the patch moves
    /// it) and both folders are laid out.
    ///
    /// # Errors
    /// `UnknownNode`, or an invalid parent change, before anything is
    /// mutated.
    pub fn begin_update_node(&mut self, id: NodeId, patch: NodePatch) -> Result<Staged<()>> {
        let Some(previous) = self.store.get(id).cloned() else {
            return Err(self.fail(CanvasError::UnknownNode(id)));
        };

        if let Some(to) = patch.parent
            && to != previous.parent
        {
            if let Err(e) = self.check_parent(id, to) {
                return Err(self.fail(e));
            }
            let position = patch
                .position
                .unwrap_or_else(|| self.keep_on_canvas(id, to));
            let reparent = Reparent {
                node: id,
                from: previous.parent,
                to,
                position,
            };
            let pending = self.stage_reparent("update node", reparent, patch)?;
            return Ok(Staged::new((), Some(pending)));
        }

        let mut updated = previous.clone();
        updated.apply_patch(&patch);
        self.store.upsert_node(updated)?;
        if let Some(title) = &patch.title {
            self.nav.rename(id, title);
        }
        self.reproject();

        let issued = self.store.revision(id);
        let pending = self.job(Job::UpdateNode {
            id,
            patch,
            issued,
            previous,
        });
        Ok(Staged::new((), Some(pending)))
    }

    /// Edit node fields and persist them.
    ///
    /// # Errors
    /// As [`begin_update_node`](Self::begin_update_node). Backend failures
    /// roll back plain edits and reload for parent changes.
    pub async fn update_node(&mut self, id: NodeId, patch: NodePatch) -> Result<()> {
        let staged = self.begin_update_node(id, patch)?;
        self.drive(staged.pending).await?;
        Ok(())
    }

    /// Remove nodes and everything nested under them. Returns every
    /// removed id.
    pub fn begin_delete_nodes(&mut self, ids: &[NodeId]) -> Staged<Vec<NodeId>> {
        let removed = self.store.remove_nodes(ids);
        if removed.is_empty() {
            return Staged::new(removed, None);
        }
        for id in &removed {
            self.tracker.forget(*id);
            self.selection.remove(id);
        }
        self.nav.retain_existing(|id| self.store.contains(id));
        self.reproject();

        let pending = self.job(Job::DeleteNodes { ids: ids.to_vec() });
        Staged::new(removed, Some(pending))
    }

    /// # Errors
    /// `Mutation` if the backend rejected it; the store is then reloaded.
    pub async fn delete_nodes(&mut self, ids: &[NodeId]) -> Result<Vec<NodeId>> {
        let staged = self.begin_delete_nodes(ids);
        self.drive(staged.pending).await?;
        Ok(staged.value)
    }

    // ─── Edge CRUD ───────────────────────────────────────────────────────

    /// # Errors
    /// `SelfLoop` / `UnknownNode` before anything is mutated.
    pub fn begin_connect(&mut self, draft: EdgeDraft) -> Result<Staged<EdgeId>> {
        let provisional = EdgeId::provisional();
        if let Err(e) = self.store.upsert_edge(draft.clone().into_edge(provisional)) {
            return Err(self.fail(e));
        }
        self.reproject();
        let pending = self.job(Job::CreateEdge { provisional, draft });
        Ok(Staged::new(provisional, Some(pending)))
    }

    /// Connect two nodes and return the confirmed edge id.
    ///
    /// # Errors
    /// As [`begin_connect`](Self::begin_connect), or `Mutation` if the
    /// backend rejected it (the provisional edge is removed).
    pub async fn connect(&mut self, draft: EdgeDraft) -> Result<EdgeId> {
        let staged = self.begin_connect(draft)?;
        let landed = self.drive(staged.pending).await?;
        Ok(landed.edge.map_or(staged.value, |(_, id)| id))
    }

    /// # Errors
    /// `UnknownEdge`.
    pub fn begin_update_edge(&mut self, id: EdgeId, patch: EdgePatch) -> Result<Staged<()>> {
        let Some(previous) = self.store.edge(id).cloned() else {
            return Err(self.fail(CanvasError::UnknownEdge(id)));
        };
        let mut updated = previous.clone();
        updated.apply_patch(&patch);
        self.store.upsert_edge(updated.clone())?;
        self.reproject();

        let pending = self.job(Job::UpdateEdge {
            patch,
            previous,
            updated,
        });
        Ok(Staged::new((), Some(pending)))
    }

    /// Edit an edge's label, color or animation.
    ///
    /// # Errors
    /// `UnknownEdge`; `Mutation` if the backend rejected it (rolled back).
    pub async fn update_edge(&mut self, id: EdgeId, patch: EdgePatch) -> Result<()> {
        let staged = self.begin_update_edge(id, patch)?;
        self.drive(staged.pending).await?;
        Ok(())
    }

    /// # Errors
    /// `UnknownEdge`.
    pub fn begin_delete_edge(&mut self, id: EdgeId) -> Result<Staged<()>> {
        let Some(removed) = self.store.remove_edge(id) else {
            return Err(self.fail(CanvasError::UnknownEdge(id)));
        };
        self.reproject();
        let pending = self.job(Job::DeleteEdge { removed });
        Ok(Staged::new((), Some(pending)))
    }

    /// # Errors
    /// `UnknownEdge`; `Mutation` if the backend rejected it (restored).
    pub async fn delete_edge(&mut self, id: EdgeId) -> Result<()> {
        let staged = self.begin_delete_edge(id)?;
        self.drive(staged.pending).await?;
        Ok(())
    }

    // ─── Save ────────────────────────────────────────────────────────────

    /// Snapshot the geometry of every stored node (not just the visible
    /// ones) for one batch write.
    pub fn begin_save_layout(&mut self) -> Staged<()> {
        let rows: Vec<Geometry> = self.store.nodes().map(Node::geometry).collect();
        Staged::new((), Some(self.job(Job::SaveLayout { rows })))
    }

    /// Persist every stored node's geometry, then refresh the saved-state
    /// cache.
    ///
    /// # Errors
    /// `Mutation` if the batch was rejected; the dirty flag stays set.
    pub async fn save_layout(&mut self) -> Result<()> {
        let staged = self.begin_save_layout();
        self.drive(staged.pending).await?;
        Ok(())
    }
}
