//! Persistence contract consumed by the sync core.
//!
//! ARCHITECTURE
//! ============
//! The storage engine is external. The core only needs point reads and
//! writes of the board record and presence rows, plus a push-based
//! subscription that re-delivers the current value on every underlying
//! change (including changes this client caused). `BoardStore` is that
//! contract; `BoardDirectory` covers the board lifecycle around it.
//!
//! Implementations: `MemoryStore` (in-process, `watch` channels) and
//! `crate::db::PgBoardStore` (Postgres, `LISTEN/NOTIFY`).

pub mod memory;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use rand::Rng;
use tokio::sync::watch;

use crate::error::ErrorCode;
use crate::state::{Board, BoardId, PresenceRecord, PresenceUpdate, Priority, Role, Share};

pub use memory::MemoryStore;

/// Board subscription. `None` means the board does not exist (or was deleted).
pub type BoardFeed = BoxStream<'static, Option<Board>>;

/// Raw presence rows for one board, before TTL filtering.
pub type PresenceFeed = BoxStream<'static, Vec<PresenceRecord>>;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("board not found: {0}")]
    NotFound(BoardId),
    #[error("write rejected: {0}")]
    WriteRejected(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_BOARD_NOT_FOUND",
            Self::WriteRejected(_) => "E_WRITE_FAILED",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

// =============================================================================
// CONTRACTS
// =============================================================================

/// Reads, writes and subscriptions the sync session depends on.
#[async_trait::async_trait]
pub trait BoardStore: Send + Sync {
    /// Point read of the board record.
    async fn get_board(&self, board_id: BoardId) -> Result<Option<Board>, StoreError>;

    /// Push subscription on the board record. Yields the current value first.
    async fn subscribe_board(&self, board_id: BoardId) -> Result<BoardFeed, StoreError>;

    /// Whole-document replacement of the scene blob. No compare-and-swap.
    async fn save_scene(&self, board_id: BoardId, scene: String) -> Result<(), StoreError>;

    /// Create or refresh the caller's presence row, stamping `last_active`.
    async fn upsert_presence(&self, board_id: BoardId, update: PresenceUpdate) -> Result<(), StoreError>;

    /// Raw presence rows, stale ones included.
    async fn get_presence(&self, board_id: BoardId) -> Result<Vec<PresenceRecord>, StoreError>;

    /// Push subscription on the raw presence rows. Yields the current rows first.
    async fn subscribe_presence(&self, board_id: BoardId) -> Result<PresenceFeed, StoreError>;

    /// Delete the caller's presence row. Missing rows are not an error.
    async fn remove_presence(&self, board_id: BoardId, user_id: &str) -> Result<(), StoreError>;
}

/// Board lifecycle and sharing. No access checks: authorization is external.
#[async_trait::async_trait]
pub trait BoardDirectory: Send + Sync {
    /// Create a board with an empty scene.
    async fn create_board(&self, title: &str, owner_id: &str) -> Result<Board, StoreError>;

    async fn rename_board(&self, board_id: BoardId, title: &str) -> Result<(), StoreError>;

    async fn set_priority(&self, board_id: BoardId, priority: Option<Priority>) -> Result<(), StoreError>;

    /// Delete a board together with its shares and presence rows.
    async fn delete_board(&self, board_id: BoardId) -> Result<(), StoreError>;

    /// Return the board's share token, minting one if it has none.
    async fn generate_share_link(&self, board_id: BoardId) -> Result<String, StoreError>;

    async fn revoke_share_link(&self, board_id: BoardId) -> Result<(), StoreError>;

    async fn get_by_share_token(&self, token: &str) -> Result<Option<Board>, StoreError>;

    /// Grant `role`, replacing any existing role for that user.
    async fn add_share(&self, board_id: BoardId, user_id: &str, role: Role) -> Result<(), StoreError>;

    async fn remove_share(&self, board_id: BoardId, user_id: &str) -> Result<(), StoreError>;

    async fn list_shares(&self, board_id: BoardId) -> Result<Vec<Share>, StoreError>;

    /// Delete every board owned by `owner_id`, cascading like `delete_board`.
    async fn delete_boards_by_owner(&self, owner_id: &str) -> Result<usize, StoreError>;
}

// =============================================================================
// HELPERS
// =============================================================================

/// Generate a random 16-byte share token as 32 lowercase hex chars.
#[must_use]
pub fn generate_share_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Turn a `watch` receiver into a feed: current value, then every change.
pub(crate) fn watch_feed<T>(mut rx: watch::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    let initial = rx.borrow_and_update().clone();
    let changes = stream::unfold(rx, |mut rx| async move {
        if rx.changed().await.is_err() {
            return None;
        }
        let value = rx.borrow_and_update().clone();
        Some((value, rx))
    });
    stream::once(async move { initial }).chain(changes).boxed()
}

#[cfg(test)]
#[path = "helpers_test.rs"]
pub(crate) mod test_helpers;
