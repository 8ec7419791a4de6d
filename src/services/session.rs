//! Sync session — per-board orchestrator between the view and the store.
//!
//! DESIGN
//! ======
//! `SyncSession` is the state machine. It owns the local scene graph, the
//! change debouncer and the presence throttle for one mounted board:
//!
//! - `Loading` until the first board record arrives, which seeds the scene
//!   exactly once and moves to `Hydrated`.
//! - `Hydrated`: local edits replace the scene and go to the debouncer;
//!   board snapshots go through `merge::reconcile`; cursor moves go
//!   through the throttle to a presence write.
//! - `NotFound` when the board is missing or deleted. Terminal unless the
//!   record shows up again.
//! - `Closed` after teardown. Everything is ignored from here on.
//!
//! `SessionHandle::mount` runs a session on its own task. The task owns the
//! session and multiplexes view commands, the board feed and the presence
//! feed with `select!`, so every state transition happens on one task and
//! nothing needs a lock.
//!
//! SELF-WRITE ECHOES
//! =================
//! The store re-delivers our own saves. Each save carries a `WriteTag` with
//! this session's id; a snapshot tagged with our id is skipped rather than
//! merged. Remote merges replace the scene directly and never reach the
//! debouncer, so they are not re-broadcast.
//!
//! FAILURES
//! ========
//! Presence writes are fire-and-forget on their own tasks, logged on
//! failure. A failed initial load leaves the session in `Loading` with no
//! retry; the board feed may still hydrate it later.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::ErrorCode;
use crate::scene::{ElementId, ElementKind, SceneDocument, SceneElement};
use crate::services::assets::{AssetError, AssetFetcher, AssetStore, to_binary_file};
use crate::services::color::color_for;
use crate::services::debounce::ChangeDebouncer;
use crate::services::merge::reconcile;
use crate::services::presence::{self, Collaborator, PresenceThrottle};
use crate::state::{Board, BoardId, CursorPoint, PresenceRecord, PresenceUpdate, UserId, now_ms};
use crate::store::{BoardStore, StoreError};

/// Edge length of an inserted image element.
pub const IMAGE_SIZE: f64 = 400.0;
/// Horizontal gap between the rightmost element and an inserted image.
pub const IMAGE_GAP: f64 = 50.0;
/// Top edge of an inserted image element.
pub const IMAGE_Y: f64 = 50.0;

// =============================================================================
// TYPES
// =============================================================================

/// Identity of the user driving this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub id: UserId,
    pub name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Loading,
    NotFound,
    Hydrated,
    Closed,
}

/// What produced the latest scene replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    Hydration,
    Local,
    Remote,
}

/// Snapshot published to the view after every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneView {
    pub phase: SessionPhase,
    pub scene: SceneDocument,
    /// `None` for phase-only transitions.
    pub change: Option<ChangeOrigin>,
    /// Bumped on every publish.
    pub revision: u64,
}

/// External collaborators a session talks to.
#[derive(Clone)]
pub struct SessionDeps {
    pub store: Arc<dyn BoardStore>,
    pub assets: Arc<dyn AssetStore>,
    pub fetcher: Arc<dyn AssetFetcher>,
}

impl SessionDeps {
    #[must_use]
    pub fn new(store: Arc<dyn BoardStore>, assets: Arc<dyn AssetStore>, fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self { store, assets, fetcher }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session closed")]
    Closed,
    #[error("board not hydrated")]
    NotHydrated,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Asset(#[from] AssetError),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Closed => "E_SESSION_CLOSED",
            Self::NotHydrated => "E_NOT_HYDRATED",
            Self::Store(e) => e.error_code(),
            Self::Asset(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Closed | Self::NotHydrated => false,
            Self::Store(e) => e.retryable(),
            Self::Asset(e) => e.retryable(),
        }
    }
}

// =============================================================================
// STATE MACHINE
// =============================================================================

pub struct SyncSession {
    board_id: BoardId,
    session_id: Uuid,
    user: Option<LocalUser>,
    deps: SessionDeps,
    phase: SessionPhase,
    doc: SceneDocument,
    /// Raw blob of the last board snapshot seen, to skip unchanged repeats.
    last_blob: Option<String>,
    debouncer: ChangeDebouncer,
    throttle: PresenceThrottle,
    view_tx: watch::Sender<SceneView>,
    revision: u64,
}

impl SyncSession {
    /// Create a session in `Loading`. Spawns the debounce worker, so this
    /// must run inside a tokio runtime.
    #[must_use]
    pub fn new(board_id: BoardId, user: Option<LocalUser>, deps: SessionDeps, config: &SyncConfig) -> Self {
        let session_id = Uuid::new_v4();
        let debouncer = ChangeDebouncer::spawn(board_id, Arc::clone(&deps.store), session_id, config.save_debounce);
        let (view_tx, _) = watch::channel(SceneView {
            phase: SessionPhase::Loading,
            scene: SceneDocument::default(),
            change: None,
            revision: 0,
        });
        Self {
            board_id,
            session_id,
            user,
            deps,
            phase: SessionPhase::Loading,
            doc: SceneDocument::default(),
            last_blob: None,
            debouncer,
            throttle: PresenceThrottle::new(config.presence_throttle),
            view_tx,
            revision: 0,
        }
    }

    #[must_use]
    pub fn board_id(&self) -> BoardId {
        self.board_id
    }

    /// Id stamped on this session's writes.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub fn scene(&self) -> &SceneDocument {
        &self.doc
    }

    /// Receiver that observes every published `SceneView`.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SceneView> {
        self.view_tx.subscribe()
    }

    /// Fetch the board record once and hydrate from it.
    ///
    /// # Errors
    ///
    /// `Closed` after teardown, or the store error. A store error leaves
    /// the session in `Loading`.
    pub async fn load(&mut self) -> Result<SessionPhase, SessionError> {
        if self.phase == SessionPhase::Closed {
            return Err(SessionError::Closed);
        }
        match self.deps.store.get_board(self.board_id).await {
            Ok(board) => {
                self.on_board_snapshot(board).await;
                Ok(self.phase)
            }
            Err(e) => {
                warn!(
                    board_id = %self.board_id,
                    code = e.error_code(),
                    error = %e,
                    "initial board load failed; staying in loading"
                );
                Err(e.into())
            }
        }
    }

    /// Apply a board record delivered by the store.
    pub async fn on_board_snapshot(&mut self, board: Option<Board>) {
        if self.phase == SessionPhase::Closed {
            return;
        }

        let Some(board) = board else {
            if self.phase != SessionPhase::NotFound {
                info!(board_id = %self.board_id, "board not found");
                self.phase = SessionPhase::NotFound;
                self.publish(None);
            }
            // A board restored with the same blob must still hydrate.
            self.last_blob = None;
            return;
        };

        if self.last_blob.as_deref() == Some(board.scene.as_str()) {
            return;
        }
        let remote = SceneDocument::parse(&board.scene);
        self.last_blob = Some(board.scene);

        match self.phase {
            SessionPhase::Loading | SessionPhase::NotFound => self.hydrate(remote),
            SessionPhase::Hydrated => {
                if let Some(tag) = remote.origin.filter(|tag| tag.session == self.session_id) {
                    debug!(board_id = %self.board_id, seq = tag.seq, "skipping echo of own write");
                    return;
                }
                let merged = reconcile(&self.doc, &remote, self.deps.assets.as_ref(), self.deps.fetcher.as_ref()).await;
                debug!(
                    board_id = %self.board_id,
                    remote = remote.elements.len(),
                    merged = merged.elements.len(),
                    "merged remote snapshot"
                );
                self.doc = merged;
                self.publish(Some(ChangeOrigin::Remote));
            }
            SessionPhase::Closed => {}
        }
    }

    /// Replace the scene with the view's latest state and schedule a save.
    ///
    /// # Errors
    ///
    /// `NotHydrated` before the first snapshot (the edit is dropped), and
    /// `Closed` after teardown.
    pub fn on_local_change(&mut self, doc: SceneDocument) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Hydrated => {
                self.apply_local(doc);
                Ok(())
            }
            SessionPhase::Closed => Err(SessionError::Closed),
            SessionPhase::Loading | SessionPhase::NotFound => Err(SessionError::NotHydrated),
        }
    }

    /// Raw pointer movement. Returns `true` if a presence write was issued.
    pub fn on_cursor_move(&mut self, x: f64, y: f64) -> bool {
        if self.phase == SessionPhase::Closed || self.user.is_none() {
            return false;
        }
        if !self.throttle.try_acquire() {
            return false;
        }
        self.spawn_presence_upsert(Some(CursorPoint { x, y }));
        true
    }

    /// Announce the local user without a cursor. Not throttled.
    pub fn announce_presence(&self) {
        if self.phase != SessionPhase::Closed {
            self.spawn_presence_upsert(None);
        }
    }

    /// Download `url`, store it as an asset and insert an image element to
    /// the right of everything on the board. The insert is a local edit.
    ///
    /// # Errors
    ///
    /// `NotHydrated`/`Closed` by phase, or the asset failure. Nothing is
    /// inserted on error.
    pub async fn add_image(&mut self, url: &str) -> Result<ElementId, SessionError> {
        match self.phase {
            SessionPhase::Hydrated => {}
            SessionPhase::Closed => return Err(SessionError::Closed),
            SessionPhase::Loading | SessionPhase::NotFound => return Err(SessionError::NotHydrated),
        }

        let fetched = self.deps.fetcher.fetch(url).await?;
        let file_id = self
            .deps
            .assets
            .store(fetched.bytes.clone(), &fetched.mime_type)
            .await?;

        let x = self.doc.max_right_edge() + IMAGE_GAP;
        let element = SceneElement::new(
            format!("image-{}", Uuid::new_v4()),
            ElementKind::Image { file_id: Some(file_id.clone()) },
            x,
            IMAGE_Y,
            IMAGE_SIZE,
            IMAGE_SIZE,
        );
        let element_id = element.id.clone();

        let mut doc = self.doc.clone();
        doc.files.insert(file_id.clone(), to_binary_file(&fetched));
        doc.elements.push(element);
        self.apply_local(doc);

        info!(board_id = %self.board_id, %element_id, %file_id, "image inserted");
        Ok(element_id)
    }

    /// Close the session: drop the pending save, stop presence, and remove
    /// the local user's presence row. Idempotent.
    pub fn teardown(&mut self) {
        if self.phase == SessionPhase::Closed {
            return;
        }
        self.phase = SessionPhase::Closed;
        self.debouncer.cancel();
        self.publish(None);

        if let Some(user) = &self.user {
            let store = Arc::clone(&self.deps.store);
            let board_id = self.board_id;
            let user_id = user.id.clone();
            tokio::spawn(async move {
                if let Err(e) = store.remove_presence(board_id, &user_id).await {
                    warn!(%board_id, %user_id, error = %e, "presence removal failed");
                }
            });
        }
        info!(board_id = %self.board_id, session = %self.session_id, "session closed");
    }

    fn hydrate(&mut self, mut doc: SceneDocument) {
        doc.origin = None;
        info!(board_id = %self.board_id, elements = doc.elements.len(), "board hydrated");
        self.doc = doc;
        self.phase = SessionPhase::Hydrated;
        self.publish(Some(ChangeOrigin::Hydration));
    }

    fn apply_local(&mut self, mut doc: SceneDocument) {
        doc.origin = None;
        self.doc = doc;
        self.publish(Some(ChangeOrigin::Local));
        if !self.debouncer.notify(self.doc.clone()) {
            debug!(board_id = %self.board_id, "debouncer closed; edit not saved");
        }
    }

    fn publish(&mut self, change: Option<ChangeOrigin>) {
        self.revision += 1;
        self.view_tx.send_replace(SceneView {
            phase: self.phase,
            scene: self.doc.clone(),
            change,
            revision: self.revision,
        });
    }

    fn spawn_presence_upsert(&self, cursor: Option<CursorPoint>) {
        let Some(user) = &self.user else {
            return;
        };
        let update = PresenceUpdate {
            user_id: user.id.clone(),
            user_name: user.name.clone(),
            avatar_url: user.avatar_url.clone(),
            color: color_for(&user.id).fill.to_string(),
            cursor,
        };
        let store = Arc::clone(&self.deps.store);
        let board_id = self.board_id;
        tokio::spawn(async move {
            if let Err(e) = store.upsert_presence(board_id, update).await {
                warn!(%board_id, code = e.error_code(), error = %e, "presence write failed");
            }
        });
    }
}

// =============================================================================
// MOUNTED SESSION
// =============================================================================

enum SessionCommand {
    LocalChange(SceneDocument),
    CursorMove { x: f64, y: f64 },
    AddImage { url: String, reply: oneshot::Sender<Result<ElementId, SessionError>> },
    Teardown,
}

/// Capability for inserting an image into a mounted board.
#[async_trait::async_trait]
pub trait AddImage: Send + Sync {
    async fn add_image(&self, url: &str) -> Result<ElementId, SessionError>;
}

/// View-side handle of a session running on its own task.
///
/// Dropping the handle tears the session down.
pub struct SessionHandle {
    board_id: BoardId,
    session_id: Uuid,
    self_id: Option<UserId>,
    presence_ttl: Duration,
    commands: mpsc::UnboundedSender<SessionCommand>,
    scene_rx: watch::Receiver<SceneView>,
    presence_rx: watch::Receiver<Vec<PresenceRecord>>,
}

impl SessionHandle {
    /// Start a session for `board_id`: announce presence, load the board,
    /// then follow the board and presence feeds until torn down.
    #[must_use]
    pub fn mount(board_id: BoardId, user: Option<LocalUser>, deps: SessionDeps, config: &SyncConfig) -> Self {
        let self_id = user.as_ref().map(|u| u.id.clone());
        let session = SyncSession::new(board_id, user, deps, config);
        let session_id = session.session_id();
        let scene_rx = session.subscribe();
        let (presence_tx, presence_rx) = watch::channel(Vec::new());
        let (commands, commands_rx) = mpsc::unbounded_channel();

        info!(%board_id, session = %session_id, "mounting session");
        tokio::spawn(run_session(session, commands_rx, presence_tx));

        Self {
            board_id,
            session_id,
            self_id,
            presence_ttl: config.presence_ttl,
            commands,
            scene_rx,
            presence_rx,
        }
    }

    #[must_use]
    pub fn board_id(&self) -> BoardId {
        self.board_id
    }

    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Scene stream for the view.
    #[must_use]
    pub fn scene(&self) -> watch::Receiver<SceneView> {
        self.scene_rx.clone()
    }

    /// Active collaborators other than the local user, as of now.
    #[must_use]
    pub fn collaborators(&self) -> Vec<Collaborator> {
        self.collaborators_at(now_ms())
    }

    #[must_use]
    pub fn collaborators_at(&self, now_ms: i64) -> Vec<Collaborator> {
        let rows = self.presence_rx.borrow();
        presence::collaborators(&rows, self.self_id.as_deref(), now_ms, self.presence_ttl)
    }

    /// Push the view's edited scene.
    ///
    /// # Errors
    ///
    /// `Closed` if the session task has stopped.
    pub fn update_scene(&self, doc: SceneDocument) -> Result<(), SessionError> {
        self.send(SessionCommand::LocalChange(doc))
    }

    /// Report pointer movement.
    ///
    /// # Errors
    ///
    /// `Closed` if the session task has stopped.
    pub fn move_cursor(&self, x: f64, y: f64) -> Result<(), SessionError> {
        self.send(SessionCommand::CursorMove { x, y })
    }

    /// Tear the session down and wait until it reports `Closed`.
    pub async fn teardown(&self) {
        if self.send(SessionCommand::Teardown).is_err() {
            return;
        }
        let mut rx = self.scene_rx.clone();
        let closed = rx
            .wait_for(|view| view.phase == SessionPhase::Closed)
            .await
            .map(|_| ());
        if let Err(e) = closed {
            debug!(board_id = %self.board_id, error = %e, "session ended before reporting closed");
        }
    }

    fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }
}

#[async_trait::async_trait]
impl AddImage for SessionHandle {
    async fn add_image(&self, url: &str) -> Result<ElementId, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::AddImage { url: url.to_string(), reply })?;
        rx.await.map_err(|_| SessionError::Closed)?
    }
}

async fn run_session(
    mut session: SyncSession,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    presence_tx: watch::Sender<Vec<PresenceRecord>>,
) {
    let board_id = session.board_id();
    let store = Arc::clone(&session.deps.store);

    session.announce_presence();
    if let Err(e) = session.load().await {
        debug!(%board_id, code = e.error_code(), "waiting on board feed after failed load");
    }

    let mut board_feed = match store.subscribe_board(board_id).await {
        Ok(feed) => Some(feed),
        Err(e) => {
            warn!(%board_id, error = %e, "board subscription failed");
            None
        }
    };
    let mut presence_feed = match store.subscribe_presence(board_id).await {
        Ok(feed) => Some(feed),
        Err(e) => {
            warn!(%board_id, error = %e, "presence subscription failed");
            None
        }
    };

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    SessionCommand::LocalChange(doc) => {
                        if let Err(e) = session.on_local_change(doc) {
                            debug!(%board_id, code = e.error_code(), "local change ignored");
                        }
                    }
                    SessionCommand::CursorMove { x, y } => {
                        session.on_cursor_move(x, y);
                    }
                    SessionCommand::AddImage { url, reply } => {
                        let result = session.add_image(&url).await;
                        if let Err(e) = &result {
                            warn!(%board_id, %url, code = e.error_code(), error = %e, "image insert failed");
                        }
                        if reply.send(result).is_err() {
                            debug!(%board_id, "image insert caller went away");
                        }
                    }
                    SessionCommand::Teardown => break,
                }
            }
            board = next_from(&mut board_feed) => session.on_board_snapshot(board).await,
            rows = next_from(&mut presence_feed) => {
                presence_tx.send_replace(rows);
            }
        }
    }

    session.teardown();
}

/// Next item of an optional feed. Pends forever once the feed is gone.
async fn next_from<T>(feed: &mut Option<BoxStream<'static, T>>) -> T {
    if let Some(stream) = feed.as_mut() {
        if let Some(item) = stream.next().await {
            return item;
        }
    }
    *feed = None;
    std::future::pending().await
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
