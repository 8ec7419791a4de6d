//! Shared board, share and presence types.
//!
//! DESIGN
//! ======
//! These mirror the rows the persistence layer keeps: one board record
//! holding the serialized scene blob, share grants keyed by
//! (board, user), and presence rows keyed by (board, user). The scene blob
//! itself stays a `String` here; `crate::scene` owns its structure.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Board identifier.
pub type BoardId = Uuid;

/// Stable user identity string from the identity provider.
pub type UserId = String;

// =============================================================================
// BOARD
// =============================================================================

/// Optional triage tag on a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse the stored lowercase form. Unknown values yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Durable board record. `scene` is the opaque serialized scene blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub title: String,
    pub owner_id: UserId,
    pub scene: String,
    pub share_token: Option<String>,
    pub priority: Option<Priority>,
}

// =============================================================================
// SHARES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Editor,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "viewer" => Some(Self::Viewer),
            "editor" => Some(Self::Editor),
            _ => None,
        }
    }
}

/// Access grant for a user on a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub board_id: BoardId,
    pub user_id: UserId,
    pub role: Role,
}

// =============================================================================
// PRESENCE
// =============================================================================

/// Cursor position in scene coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPoint {
    pub x: f64,
    pub y: f64,
}

/// Stored presence row for one user on one board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub board_id: BoardId,
    pub user_id: UserId,
    pub user_name: String,
    pub avatar_url: Option<String>,
    /// Color the writer assigned itself (hex).
    pub color: String,
    pub cursor: Option<CursorPoint>,
    /// Milliseconds since Unix epoch of the last write.
    pub last_active: i64,
}

/// Write-side presence payload. The store stamps `last_active`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub user_id: UserId,
    pub user_name: String,
    pub avatar_url: Option<String>,
    pub color: String,
    pub cursor: Option<CursorPoint>,
}

impl PresenceUpdate {
    /// Materialize the stored row for `board_id` at `last_active`.
    #[must_use]
    pub fn into_record(self, board_id: BoardId, last_active: i64) -> PresenceRecord {
        PresenceRecord {
            board_id,
            user_id: self.user_id,
            user_name: self.user_name,
            avatar_url: self.avatar_url,
            color: self.color,
            cursor: self.cursor,
            last_active,
        }
    }
}

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
