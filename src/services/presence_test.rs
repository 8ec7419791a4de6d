use super::*;
use uuid::Uuid;

const TTL: Duration = Duration::from_secs(30);

fn row(user_id: &str, last_active: i64) -> PresenceRecord {
    PresenceRecord {
        board_id: Uuid::nil(),
        user_id: user_id.into(),
        user_name: format!("name-{user_id}"),
        avatar_url: None,
        color: "#000000".into(),
        cursor: None,
        last_active,
    }
}

// =============================================================================
// PresenceThrottle
// =============================================================================

#[test]
fn first_move_is_accepted() {
    let mut throttle = PresenceThrottle::new(Duration::from_millis(100));
    assert!(throttle.try_acquire_at(Instant::now()));
}

#[test]
fn two_moves_within_interval_emit_once() {
    let mut throttle = PresenceThrottle::new(Duration::from_millis(100));
    let start = Instant::now();
    assert!(throttle.try_acquire_at(start));
    assert!(!throttle.try_acquire_at(start + Duration::from_millis(40)));
}

#[test]
fn move_at_exact_interval_is_accepted() {
    let mut throttle = PresenceThrottle::new(Duration::from_millis(100));
    let start = Instant::now();
    assert!(throttle.try_acquire_at(start));
    assert!(throttle.try_acquire_at(start + Duration::from_millis(100)));
}

#[test]
fn suppressed_moves_do_not_extend_window() {
    let mut throttle = PresenceThrottle::new(Duration::from_millis(100));
    let start = Instant::now();
    assert!(throttle.try_acquire_at(start));
    assert!(!throttle.try_acquire_at(start + Duration::from_millis(90)));
    assert!(throttle.try_acquire_at(start + Duration::from_millis(101)));
}

#[test]
fn burst_of_raw_events_is_bounded() {
    let mut throttle = PresenceThrottle::new(Duration::from_millis(100));
    let start = Instant::now();
    // 1000 events over one second (one per millisecond).
    let accepted = (0..1000)
        .filter(|ms| throttle.try_acquire_at(start + Duration::from_millis(*ms)))
        .count();
    assert_eq!(accepted, 10);
}

// =============================================================================
// active_presence
// =============================================================================

#[test]
fn row_just_past_ttl_is_excluded() {
    let now = 1_700_000_000_000;
    let rows = vec![row("stale", now - 30_000 - 1)];
    assert!(active_presence(&rows, now, TTL).is_empty());
}

#[test]
fn row_at_now_is_included() {
    let now = 1_700_000_000_000;
    let rows = vec![row("fresh", now)];
    assert_eq!(active_presence(&rows, now, TTL).len(), 1);
}

#[test]
fn row_exactly_at_cutoff_is_included() {
    let now = 1_700_000_000_000;
    let rows = vec![row("edge", now - 30_000)];
    assert_eq!(active_presence(&rows, now, TTL).len(), 1);
}

#[test]
fn stale_row_reappears_once_refreshed() {
    let now = 1_700_000_000_000;
    let mut rows = vec![row("u", now - 60_000)];
    assert!(active_presence(&rows, now, TTL).is_empty());
    rows[0].last_active = now;
    assert_eq!(active_presence(&rows, now, TTL).len(), 1);
}

#[test]
fn filter_does_not_mutate_input() {
    let now = 1_700_000_000_000;
    let rows = vec![row("a", now), row("b", 0)];
    let active = active_presence(&rows, now, TTL);
    assert_eq!(active.len(), 1);
    assert_eq!(rows.len(), 2);
}

// =============================================================================
// collaborators
// =============================================================================

#[test]
fn collaborators_excludes_self_and_stale() {
    let now = 1_700_000_000_000;
    let rows = vec![row("me", now), row("peer", now - 5), row("gone", now - 120_000)];
    let list = collaborators(&rows, Some("me"), now, TTL);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].user_id, "peer");
    assert_eq!(list[0].user_name, "name-peer");
}

#[test]
fn collaborators_color_comes_from_identity() {
    let now = 1_700_000_000_000;
    let rows = vec![row("user_2NNEqL3", now)];
    let list = collaborators(&rows, None, now, TTL);
    assert_eq!(list[0].color, color_for("user_2NNEqL3"));
}

#[test]
fn collaborators_pointer_follows_cursor() {
    let now = 1_700_000_000_000;
    let mut with_cursor = row("a", now);
    with_cursor.cursor = Some(CursorPoint { x: 3.0, y: 4.0 });
    let rows = vec![with_cursor, row("b", now)];
    let list = collaborators(&rows, None, now, TTL);
    assert_eq!(list[0].pointer, Some(CursorPoint { x: 3.0, y: 4.0 }));
    assert_eq!(list[1].pointer, None);
}
