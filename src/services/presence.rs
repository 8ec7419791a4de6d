//! Presence — cursor throttling and the time-to-live collaborator view.
//!
//! DESIGN
//! ======
//! Outbound: every raw pointer event goes through `PresenceThrottle`, which
//! accepts at most one emission per interval (100ms by default), bounding
//! each cursor to ~10 presence writes per second regardless of input rate.
//!
//! Inbound: presence rows are never swept. `active_presence` filters on
//! `last_active` at read time, so a client that dies without sending its
//! leave signal drops out of every view within one TTL window.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::services::color::{CollaboratorColor, color_for};
use crate::state::{CursorPoint, PresenceRecord, UserId};

// =============================================================================
// THROTTLE
// =============================================================================

/// Rate limiter for outbound cursor updates from one local user.
#[derive(Debug, Clone)]
pub struct PresenceThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl PresenceThrottle {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_emit: None }
    }

    /// Returns `true` if an emission is allowed now, and records it.
    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Check + record with explicit timestamp (for testing).
    pub(crate) fn try_acquire_at(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_emit {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_emit = Some(now);
        true
    }
}

// =============================================================================
// TTL VIEW
// =============================================================================

/// Rows whose `last_active` falls within `ttl` of `now_ms`.
#[must_use]
pub fn active_presence(rows: &[PresenceRecord], now_ms: i64, ttl: Duration) -> Vec<PresenceRecord> {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    let cutoff = now_ms.saturating_sub(ttl_ms);
    rows.iter()
        .filter(|row| row.last_active >= cutoff)
        .cloned()
        .collect()
}

/// A remote user as the canvas draws them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collaborator {
    pub user_id: UserId,
    pub user_name: String,
    pub avatar_url: Option<String>,
    pub pointer: Option<CursorPoint>,
    pub color: CollaboratorColor,
}

/// Active collaborators other than `self_id`.
///
/// Colors are recomputed from the identity rather than read from the row,
/// so every viewer agrees even if a writer stored something else.
#[must_use]
pub fn collaborators(rows: &[PresenceRecord], self_id: Option<&str>, now_ms: i64, ttl: Duration) -> Vec<Collaborator> {
    active_presence(rows, now_ms, ttl)
        .into_iter()
        .filter(|row| self_id != Some(row.user_id.as_str()))
        .map(|row| Collaborator {
            color: color_for(&row.user_id),
            user_id: row.user_id,
            user_name: row.user_name,
            avatar_url: row.avatar_url,
            pointer: row.cursor,
        })
        .collect()
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
