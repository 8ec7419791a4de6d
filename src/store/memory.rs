//! In-process store backed by maps and `watch` channels.
//!
//! DESIGN
//! ======
//! All state sits behind one `tokio::sync::RwLock`. Every mutation that
//! touches a board record or its presence rows republishes the new value
//! on that board's `watch` channel, which is what gives subscribers the
//! re-deliver-on-change semantics. `watch` keeps only the latest value, so
//! a slow subscriber sees the newest snapshot rather than every step.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use uuid::Uuid;

use super::{BoardDirectory, BoardFeed, BoardStore, PresenceFeed, StoreError, generate_share_token, watch_feed};
use crate::state::{Board, BoardId, PresenceRecord, PresenceUpdate, Priority, Role, Share, UserId, now_ms};

/// Scene blob a new board starts with.
pub const EMPTY_SCENE: &str = "[]";

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    boards: HashMap<BoardId, Board>,
    shares: HashMap<BoardId, HashMap<UserId, Role>>,
    presence: HashMap<BoardId, HashMap<UserId, PresenceRecord>>,
    board_feeds: HashMap<BoardId, watch::Sender<Option<Board>>>,
    presence_feeds: HashMap<BoardId, watch::Sender<Vec<PresenceRecord>>>,
}

impl MemoryInner {
    fn publish_board(&self, board_id: BoardId) {
        if let Some(tx) = self.board_feeds.get(&board_id) {
            tx.send_replace(self.boards.get(&board_id).cloned());
        }
    }

    fn publish_presence(&self, board_id: BoardId) {
        if let Some(tx) = self.presence_feeds.get(&board_id) {
            tx.send_replace(self.presence_rows(board_id));
        }
    }

    /// Rows for a board, ordered by user for stable output.
    fn presence_rows(&self, board_id: BoardId) -> Vec<PresenceRecord> {
        let mut rows: Vec<PresenceRecord> = self
            .presence
            .get(&board_id)
            .map(|by_user| by_user.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        rows
    }

    fn board_mut(&mut self, board_id: BoardId) -> Result<&mut Board, StoreError> {
        self.boards
            .get_mut(&board_id)
            .ok_or(StoreError::NotFound(board_id))
    }

    fn remove_board_cascade(&mut self, board_id: BoardId) -> bool {
        if self.boards.remove(&board_id).is_none() {
            return false;
        }
        self.shares.remove(&board_id);
        self.presence.remove(&board_id);
        self.publish_board(board_id);
        self.publish_presence(board_id);
        true
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a board record as-is.
    pub async fn insert_board(&self, board: Board) {
        let mut inner = self.inner.write().await;
        let board_id = board.id;
        inner.boards.insert(board_id, board);
        inner.publish_board(board_id);
    }

    /// Overwrite a presence row verbatim, `last_active` included.
    pub async fn insert_presence(&self, record: PresenceRecord) {
        let mut inner = self.inner.write().await;
        let board_id = record.board_id;
        inner
            .presence
            .entry(board_id)
            .or_default()
            .insert(record.user_id.clone(), record);
        inner.publish_presence(board_id);
    }
}

// =============================================================================
// SYNC CONTRACT
// =============================================================================

#[async_trait::async_trait]
impl BoardStore for MemoryStore {
    async fn get_board(&self, board_id: BoardId) -> Result<Option<Board>, StoreError> {
        Ok(self.inner.read().await.boards.get(&board_id).cloned())
    }

    async fn subscribe_board(&self, board_id: BoardId) -> Result<BoardFeed, StoreError> {
        let mut inner = self.inner.write().await;
        let current = inner.boards.get(&board_id).cloned();
        let rx = inner
            .board_feeds
            .entry(board_id)
            .or_insert_with(|| watch::channel(current).0)
            .subscribe();
        Ok(watch_feed(rx))
    }

    async fn save_scene(&self, board_id: BoardId, scene: String) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.board_mut(board_id)?.scene = scene;
        inner.publish_board(board_id);
        Ok(())
    }

    async fn upsert_presence(&self, board_id: BoardId, update: PresenceUpdate) -> Result<(), StoreError> {
        let record = update.into_record(board_id, now_ms());
        let mut inner = self.inner.write().await;
        inner
            .presence
            .entry(board_id)
            .or_default()
            .insert(record.user_id.clone(), record);
        inner.publish_presence(board_id);
        Ok(())
    }

    async fn get_presence(&self, board_id: BoardId) -> Result<Vec<PresenceRecord>, StoreError> {
        Ok(self.inner.read().await.presence_rows(board_id))
    }

    async fn subscribe_presence(&self, board_id: BoardId) -> Result<PresenceFeed, StoreError> {
        let mut inner = self.inner.write().await;
        let current = inner.presence_rows(board_id);
        let rx = inner
            .presence_feeds
            .entry(board_id)
            .or_insert_with(|| watch::channel(current).0)
            .subscribe();
        Ok(watch_feed(rx))
    }

    async fn remove_presence(&self, board_id: BoardId, user_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let removed = inner
            .presence
            .get_mut(&board_id)
            .and_then(|by_user| by_user.remove(user_id))
            .is_some();
        if removed {
            inner.publish_presence(board_id);
        }
        Ok(())
    }
}

// =============================================================================
// DIRECTORY
// =============================================================================

#[async_trait::async_trait]
impl BoardDirectory for MemoryStore {
    async fn create_board(&self, title: &str, owner_id: &str) -> Result<Board, StoreError> {
        let board = Board {
            id: Uuid::new_v4(),
            title: title.to_string(),
            owner_id: owner_id.to_string(),
            scene: EMPTY_SCENE.to_string(),
            share_token: None,
            priority: None,
        };
        self.insert_board(board.clone()).await;
        Ok(board)
    }

    async fn rename_board(&self, board_id: BoardId, title: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.board_mut(board_id)?.title = title.to_string();
        inner.publish_board(board_id);
        Ok(())
    }

    async fn set_priority(&self, board_id: BoardId, priority: Option<Priority>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.board_mut(board_id)?.priority = priority;
        inner.publish_board(board_id);
        Ok(())
    }

    async fn delete_board(&self, board_id: BoardId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.remove_board_cascade(board_id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(board_id))
        }
    }

    async fn generate_share_link(&self, board_id: BoardId) -> Result<String, StoreError> {
        let mut inner = self.inner.write().await;
        let board = inner.board_mut(board_id)?;
        if let Some(token) = &board.share_token {
            return Ok(token.clone());
        }
        let token = generate_share_token();
        board.share_token = Some(token.clone());
        inner.publish_board(board_id);
        Ok(token)
    }

    async fn revoke_share_link(&self, board_id: BoardId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.board_mut(board_id)?.share_token = None;
        inner.publish_board(board_id);
        Ok(())
    }

    async fn get_by_share_token(&self, token: &str) -> Result<Option<Board>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .boards
            .values()
            .find(|b| b.share_token.as_deref() == Some(token))
            .cloned())
    }

    async fn add_share(&self, board_id: BoardId, user_id: &str, role: Role) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.boards.contains_key(&board_id) {
            return Err(StoreError::NotFound(board_id));
        }
        inner
            .shares
            .entry(board_id)
            .or_default()
            .insert(user_id.to_string(), role);
        Ok(())
    }

    async fn remove_share(&self, board_id: BoardId, user_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(by_user) = inner.shares.get_mut(&board_id) {
            by_user.remove(user_id);
        }
        Ok(())
    }

    async fn list_shares(&self, board_id: BoardId) -> Result<Vec<Share>, StoreError> {
        let inner = self.inner.read().await;
        let mut shares: Vec<Share> = inner
            .shares
            .get(&board_id)
            .map(|by_user| {
                by_user
                    .iter()
                    .map(|(user_id, role)| Share { board_id, user_id: user_id.clone(), role: *role })
                    .collect()
            })
            .unwrap_or_default();
        shares.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(shares)
    }

    async fn delete_boards_by_owner(&self, owner_id: &str) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let owned: Vec<BoardId> = inner
            .boards
            .values()
            .filter(|b| b.owner_id == owner_id)
            .map(|b| b.id)
            .collect();
        let mut removed = 0;
        for board_id in owned {
            if inner.remove_board_cascade(board_id) {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
