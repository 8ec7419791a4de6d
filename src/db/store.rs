//! Postgres implementation of the store contracts.
//!
//! DESIGN
//! ======
//! Plain runtime-checked SQLx queries against the tables in
//! `migrations/`. Push subscriptions ride on `LISTEN/NOTIFY`: row triggers
//! on `boards` and `board_presence` publish the affected board id on the
//! `board_changed` / `presence_changed` channels, and each subscriber
//! holds its own `PgListener`, filters on its board id and re-reads the
//! rows. Notification payloads stay tiny regardless of scene size.
//!
//! `save_scene` is a whole-document `UPDATE` with no version check, so
//! concurrent saves race and the later one wins.

use futures::StreamExt;
use futures::stream;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tracing::warn;
use uuid::Uuid;

use crate::state::{Board, BoardId, CursorPoint, PresenceRecord, PresenceUpdate, Priority, Role, Share, now_ms};
use crate::store::{BoardDirectory, BoardFeed, BoardStore, PresenceFeed, StoreError, generate_share_token};

const BOARD_CHANNEL: &str = "board_changed";
const PRESENCE_CHANNEL: &str = "presence_changed";

const BOARD_COLUMNS: &str = "id, title, owner_id, scene, share_token, priority";

type BoardRow = (Uuid, String, String, String, Option<String>, Option<String>);
type PresenceRow = (Uuid, String, String, Option<String>, String, Option<f64>, Option<f64>, i64);

#[derive(Clone)]
pub struct PgBoardStore {
    pool: PgPool,
}

impl PgBoardStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

fn board_from_row(row: BoardRow) -> Board {
    let (id, title, owner_id, scene, share_token, priority) = row;
    Board {
        id,
        title,
        owner_id,
        scene,
        share_token,
        priority: priority.as_deref().and_then(Priority::parse),
    }
}

fn presence_from_row(row: PresenceRow) -> PresenceRecord {
    let (board_id, user_id, user_name, avatar_url, color, cursor_x, cursor_y, last_active) = row;
    let cursor = match (cursor_x, cursor_y) {
        (Some(x), Some(y)) => Some(CursorPoint { x, y }),
        _ => None,
    };
    PresenceRecord { board_id, user_id, user_name, avatar_url, color, cursor, last_active }
}

async fn fetch_board(pool: &PgPool, board_id: BoardId) -> Result<Option<Board>, sqlx::Error> {
    let row = sqlx::query_as::<_, BoardRow>(&format!("SELECT {BOARD_COLUMNS} FROM boards WHERE id = $1"))
        .bind(board_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(board_from_row))
}

async fn fetch_presence(pool: &PgPool, board_id: BoardId) -> Result<Vec<PresenceRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PresenceRow>(
        "SELECT board_id, user_id, user_name, avatar_url, color, cursor_x, cursor_y, last_active
         FROM board_presence
         WHERE board_id = $1
         ORDER BY user_id",
    )
    .bind(board_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(presence_from_row).collect())
}

/// Listener on `channel` yielding one item per notification for `board_id`.
async fn board_notifications(
    pool: &PgPool,
    channel: &'static str,
    board_id: BoardId,
) -> Result<impl futures::Stream<Item = ()> + Send + 'static, sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(channel).await?;
    let target = board_id.to_string();

    Ok(listener.into_stream().filter_map(move |notification| {
        let matched = match notification {
            Ok(notification) => notification.payload() == target,
            Err(e) => {
                warn!(%board_id, channel, error = %e, "notification stream error");
                false
            }
        };
        async move { matched.then_some(()) }
    }))
}

// =============================================================================
// SYNC CONTRACT
// =============================================================================

#[async_trait::async_trait]
impl BoardStore for PgBoardStore {
    async fn get_board(&self, board_id: BoardId) -> Result<Option<Board>, StoreError> {
        Ok(fetch_board(&self.pool, board_id).await?)
    }

    async fn subscribe_board(&self, board_id: BoardId) -> Result<BoardFeed, StoreError> {
        // Listen before the initial read so no change slips in between.
        let changes = board_notifications(&self.pool, BOARD_CHANNEL, board_id).await?;
        let initial = fetch_board(&self.pool, board_id).await?;
        let pool = self.pool.clone();

        let updates = changes.filter_map(move |()| {
            let pool = pool.clone();
            async move {
                match fetch_board(&pool, board_id).await {
                    Ok(board) => Some(board),
                    Err(e) => {
                        warn!(%board_id, error = %e, "board re-read after notify failed");
                        None
                    }
                }
            }
        });
        Ok(stream::once(async move { initial }).chain(updates).boxed())
    }

    async fn save_scene(&self, board_id: BoardId, scene: String) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE boards SET scene = $2, updated_at = now() WHERE id = $1")
            .bind(board_id)
            .bind(scene)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(board_id));
        }
        Ok(())
    }

    async fn upsert_presence(&self, board_id: BoardId, update: PresenceUpdate) -> Result<(), StoreError> {
        let record = update.into_record(board_id, now_ms());
        let (cursor_x, cursor_y) = match record.cursor {
            Some(CursorPoint { x, y }) => (Some(x), Some(y)),
            None => (None, None),
        };
        sqlx::query(
            "INSERT INTO board_presence (board_id, user_id, user_name, avatar_url, color, cursor_x, cursor_y, last_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (board_id, user_id) DO UPDATE SET \
                 user_name = EXCLUDED.user_name, avatar_url = EXCLUDED.avatar_url, color = EXCLUDED.color, \
                 cursor_x = EXCLUDED.cursor_x, cursor_y = EXCLUDED.cursor_y, last_active = EXCLUDED.last_active",
        )
        .bind(record.board_id)
        .bind(&record.user_id)
        .bind(&record.user_name)
        .bind(&record.avatar_url)
        .bind(&record.color)
        .bind(cursor_x)
        .bind(cursor_y)
        .bind(record.last_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_presence(&self, board_id: BoardId) -> Result<Vec<PresenceRecord>, StoreError> {
        Ok(fetch_presence(&self.pool, board_id).await?)
    }

    async fn subscribe_presence(&self, board_id: BoardId) -> Result<PresenceFeed, StoreError> {
        let changes = board_notifications(&self.pool, PRESENCE_CHANNEL, board_id).await?;
        let initial = fetch_presence(&self.pool, board_id).await?;
        let pool = self.pool.clone();

        let updates = changes.filter_map(move |()| {
            let pool = pool.clone();
            async move {
                match fetch_presence(&pool, board_id).await {
                    Ok(rows) => Some(rows),
                    Err(e) => {
                        warn!(%board_id, error = %e, "presence re-read after notify failed");
                        None
                    }
                }
            }
        });
        Ok(stream::once(async move { initial }).chain(updates).boxed())
    }

    async fn remove_presence(&self, board_id: BoardId, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM board_presence WHERE board_id = $1 AND user_id = $2")
            .bind(board_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// =============================================================================
// DIRECTORY
// =============================================================================

#[async_trait::async_trait]
impl BoardDirectory for PgBoardStore {
    async fn create_board(&self, title: &str, owner_id: &str) -> Result<Board, StoreError> {
        let board = Board {
            id: Uuid::new_v4(),
            title: title.to_string(),
            owner_id: owner_id.to_string(),
            scene: crate::store::memory::EMPTY_SCENE.to_string(),
            share_token: None,
            priority: None,
        };
        sqlx::query("INSERT INTO boards (id, title, owner_id, scene) VALUES ($1, $2, $3, $4)")
            .bind(board.id)
            .bind(&board.title)
            .bind(&board.owner_id)
            .bind(&board.scene)
            .execute(&self.pool)
            .await?;
        Ok(board)
    }

    async fn rename_board(&self, board_id: BoardId, title: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE boards SET title = $2, updated_at = now() WHERE id = $1")
            .bind(board_id)
            .bind(title)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(board_id));
        }
        Ok(())
    }

    async fn set_priority(&self, board_id: BoardId, priority: Option<Priority>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE boards SET priority = $2, updated_at = now() WHERE id = $1")
            .bind(board_id)
            .bind(priority.map(Priority::as_str))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(board_id));
        }
        Ok(())
    }

    async fn delete_board(&self, board_id: BoardId) -> Result<(), StoreError> {
        // Shares and presence rows go with it via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM boards WHERE id = $1")
            .bind(board_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(board_id));
        }
        Ok(())
    }

    async fn generate_share_link(&self, board_id: BoardId) -> Result<String, StoreError> {
        let token: Option<String> = sqlx::query_scalar(
            "UPDATE boards SET share_token = COALESCE(share_token, $2) WHERE id = $1 RETURNING share_token",
        )
        .bind(board_id)
        .bind(generate_share_token())
        .fetch_optional(&self.pool)
        .await?;
        token.ok_or(StoreError::NotFound(board_id))
    }

    async fn revoke_share_link(&self, board_id: BoardId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE boards SET share_token = NULL WHERE id = $1")
            .bind(board_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(board_id));
        }
        Ok(())
    }

    async fn get_by_share_token(&self, token: &str) -> Result<Option<Board>, StoreError> {
        let row = sqlx::query_as::<_, BoardRow>(&format!("SELECT {BOARD_COLUMNS} FROM boards WHERE share_token = $1"))
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(board_from_row))
    }

    async fn add_share(&self, board_id: BoardId, user_id: &str, role: Role) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO board_shares (board_id, user_id, role) \
             SELECT $1, $2, $3 WHERE EXISTS (SELECT 1 FROM boards WHERE id = $1) \
             ON CONFLICT (board_id, user_id) DO UPDATE SET role = EXCLUDED.role",
        )
        .bind(board_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(board_id));
        }
        Ok(())
    }

    async fn remove_share(&self, board_id: BoardId, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM board_shares WHERE board_id = $1 AND user_id = $2")
            .bind(board_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_shares(&self, board_id: BoardId) -> Result<Vec<Share>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT user_id, role FROM board_shares WHERE board_id = $1 ORDER BY user_id",
        )
        .bind(board_id)
        .fetch_all(&self.pool)
        .await?;

        let shares = rows
            .into_iter()
            .filter_map(|(user_id, role)| match Role::parse(&role) {
                Some(role) => Some(Share { board_id, user_id, role }),
                None => {
                    warn!(%board_id, %user_id, %role, "skipping share with unknown role");
                    None
                }
            })
            .collect();
        Ok(shares)
    }

    async fn delete_boards_by_owner(&self, owner_id: &str) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM boards WHERE owner_id = $1")
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "store_test.rs"]
mod tests;
