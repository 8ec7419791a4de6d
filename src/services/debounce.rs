//! Change debouncer — coalesces local edits into one trailing-edge save.
//!
//! DESIGN
//! ======
//! Each session owns one worker task fed by an unbounded channel of scene
//! snapshots. Every snapshot replaces the pending one and pushes the
//! deadline out to `now + window`; when the deadline passes with no newer
//! snapshot, the worker stamps a `WriteTag` and writes the blob. A burst of
//! any length therefore produces exactly one write, carrying the last
//! snapshot of the burst.
//!
//! LIFECYCLE
//! =========
//! Closing the channel (`cancel`, or dropping the debouncer) stops the
//! worker. A snapshot still waiting on its deadline is discarded. A write
//! already in flight is awaited to completion, never aborted.
//!
//! Failed writes are logged and dropped. The next edit supersedes them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::scene::{SceneDocument, WriteTag};
use crate::state::BoardId;
use crate::store::BoardStore;

pub struct ChangeDebouncer {
    tx: Option<mpsc::UnboundedSender<SceneDocument>>,
    handle: Option<JoinHandle<()>>,
}

impl ChangeDebouncer {
    /// Spawn the save worker for `board_id`. Writes are tagged with `session`.
    #[must_use]
    pub fn spawn(board_id: BoardId, store: Arc<dyn BoardStore>, session: Uuid, window: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(rx, board_id, store, session, window));
        Self { tx: Some(tx), handle: Some(handle) }
    }

    /// Queue a snapshot, restarting the quiet window.
    ///
    /// Returns `false` once the debouncer has been cancelled.
    pub fn notify(&self, doc: SceneDocument) -> bool {
        match &self.tx {
            Some(tx) => tx.send(doc).is_ok(),
            None => false,
        }
    }

    /// Stop accepting snapshots and discard the pending one, if any.
    pub fn cancel(&mut self) {
        self.tx = None;
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.tx.is_none()
    }

    /// Cancel, then wait for the worker to exit (and any in-flight write).
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "debounce worker ended abnormally");
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<SceneDocument>,
    board_id: BoardId,
    store: Arc<dyn BoardStore>,
    session: Uuid,
    window: Duration,
) {
    let mut pending: Option<SceneDocument> = None;
    let mut deadline = Instant::now();
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(doc) => {
                    pending = Some(doc);
                    deadline = Instant::now() + window;
                }
                None => {
                    if pending.is_some() {
                        debug!(%board_id, "debouncer closed; discarding pending snapshot");
                    }
                    break;
                }
            },
            () = sleep_until(deadline), if pending.is_some() => {
                if let Some(doc) = pending.take() {
                    seq += 1;
                    write_snapshot(board_id, store.as_ref(), WriteTag { session, seq }, doc).await;
                }
            }
        }
    }

    debug!(%board_id, writes = seq, "debounce worker stopped");
}

async fn write_snapshot(board_id: BoardId, store: &dyn BoardStore, tag: WriteTag, mut doc: SceneDocument) {
    doc.origin = Some(tag);
    let blob = match doc.to_json() {
        Ok(blob) => blob,
        Err(e) => {
            warn!(%board_id, error = %e, "scene serialization failed; skipping save");
            return;
        }
    };

    let elements = doc.elements.len();
    match store.save_scene(board_id, blob).await {
        Ok(()) => info!(%board_id, seq = tag.seq, elements, "scene saved"),
        Err(e) => warn!(
            %board_id,
            seq = tag.seq,
            code = e.error_code(),
            error = %e,
            "scene save failed; dropping snapshot"
        ),
    }
}

#[cfg(test)]
#[path = "debounce_test.rs"]
mod tests;
