use super::*;
use crate::scene::{BinaryFile, ElementKind};
use crate::services::assets::MemoryAssets;

fn rect(id: &str, version: u64) -> SceneElement {
    let mut el = SceneElement::new(id, ElementKind::Rectangle, 0.0, 0.0, 10.0, 10.0);
    el.version = version;
    el
}

fn rect_at(id: &str, version: u64, x: f64) -> SceneElement {
    let mut el = rect(id, version);
    el.x = x;
    el
}

fn image(id: &str, file_id: &str, version: u64) -> SceneElement {
    let mut el = SceneElement::new(
        id,
        ElementKind::Image { file_id: Some(file_id.into()) },
        0.0,
        0.0,
        400.0,
        400.0,
    );
    el.version = version;
    el
}

fn ids(elements: &[SceneElement]) -> Vec<&str> {
    elements.iter().map(|e| e.id.as_str()).collect()
}

fn doc(elements: Vec<SceneElement>) -> SceneDocument {
    SceneDocument { elements, ..SceneDocument::default() }
}

// =============================================================================
// merge
// =============================================================================

#[test]
fn disjoint_sets_are_unioned_remote_first() {
    let merged = merge(&[rect("l1", 1), rect("l2", 1)], &[rect("r1", 1)]);
    assert_eq!(ids(&merged), vec!["r1", "l1", "l2"]);
}

#[test]
fn higher_version_wins_either_side() {
    let local = [rect_at("a", 5, 1.0), rect_at("b", 2, 1.0)];
    let remote = [rect_at("a", 3, 2.0), rect_at("b", 4, 2.0)];
    let merged = merge(&local, &remote);

    assert_eq!(merged.len(), 2);
    let a = merged.iter().find(|e| e.id == "a").unwrap();
    let b = merged.iter().find(|e| e.id == "b").unwrap();
    assert_eq!((a.version, a.x), (5, 1.0));
    assert_eq!((b.version, b.x), (4, 2.0));
}

#[test]
fn version_tie_takes_remote() {
    let merged = merge(&[rect_at("a", 3, 1.0)], &[rect_at("a", 3, 9.0)]);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].x, 9.0);
}

#[test]
fn merged_version_is_max_of_inputs() {
    let local: Vec<SceneElement> = (0..6).map(|i| rect(&format!("e{i}"), i)).collect();
    let remote: Vec<SceneElement> = (0..6).map(|i| rect(&format!("e{i}"), 5 - i)).collect();
    let merged = merge(&local, &remote);

    assert_eq!(merged.len(), 6);
    for el in &merged {
        let l = local.iter().find(|e| e.id == el.id).unwrap().version;
        let r = remote.iter().find(|e| e.id == el.id).unwrap().version;
        assert_eq!(el.version, l.max(r));
    }
}

#[test]
fn empty_sides_are_identity() {
    let local = vec![rect("a", 1), rect("b", 2)];
    assert_eq!(merge(&local, &[]), local);
    assert_eq!(merge(&[], &local), local);
    assert!(merge(&[], &[]).is_empty());
}

#[test]
fn output_ids_are_unique() {
    let merged = merge(&[rect("a", 1), rect("b", 1)], &[rect("b", 2), rect("b", 1), rect("c", 1)]);
    assert_eq!(ids(&merged), vec!["b", "c", "a"]);
    assert_eq!(merged[0].version, 2);
}

#[test]
fn concurrent_edits_converge() {
    // Client A moved x1 (v3) while client B's stale save still has it at v2.
    let a_local = [rect_at("x1", 3, 50.0), rect("x2", 1)];
    let b_saved = [rect_at("x1", 2, 10.0), rect("x3", 1)];

    let merged = merge(&a_local, &b_saved);
    let x1 = merged.iter().find(|e| e.id == "x1").unwrap();
    assert_eq!((x1.version, x1.x), (3, 50.0));
    assert_eq!(ids(&merged), vec!["x1", "x3", "x2"]);
}

#[test]
fn deleted_element_returns_from_stale_peer() {
    // Local deleted "gone"; a peer's snapshot still carries it. Without
    // delete markers the merge has no way to tell.
    let local = [rect("kept", 1)];
    let remote = [rect("kept", 1), rect("gone", 4)];
    let merged = merge(&local, &remote);
    assert!(merged.iter().any(|e| e.id == "gone"));
}

// =============================================================================
// reconcile
// =============================================================================

#[tokio::test]
async fn reconcile_uses_inline_remote_file() {
    let assets = MemoryAssets::new();
    let mut remote = doc(vec![image("img", "f1", 1)]);
    remote.files.insert(
        "f1".into(),
        BinaryFile { data_url: "data:image/png;base64,AAAA".into(), mime_type: Some("image/png".into()) },
    );

    let merged = reconcile(&SceneDocument::default(), &remote, &assets, &assets).await;
    assert_eq!(ids(&merged.elements), vec!["img"]);
    assert!(merged.files.contains_key("f1"));
}

#[tokio::test]
async fn reconcile_materializes_missing_asset() {
    let assets = MemoryAssets::new();
    let file_id = assets.store(b"bytes".to_vec(), "image/png").await.unwrap();
    let remote = doc(vec![image("img", &file_id, 1)]);

    let merged = reconcile(&SceneDocument::default(), &remote, &assets, &assets).await;
    assert_eq!(ids(&merged.elements), vec!["img"]);
    let file = merged.files.get(&file_id).unwrap();
    assert!(file.data_url.starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn reconcile_drops_new_element_when_asset_unavailable() {
    let assets = MemoryAssets::new();
    let remote = doc(vec![image("img", "missing", 1), rect("r", 1)]);

    let merged = reconcile(&SceneDocument::default(), &remote, &assets, &assets).await;
    assert_eq!(ids(&merged.elements), vec!["r"]);
    assert!(merged.files.is_empty());
}

#[tokio::test]
async fn reconcile_keeps_local_copy_when_asset_unavailable() {
    let assets = MemoryAssets::new();
    let mut local_el = image("img", "old", 1);
    local_el.x = 7.0;
    let mut local = doc(vec![local_el]);
    local.files.insert(
        "old".into(),
        BinaryFile { data_url: "data:,x".into(), mime_type: None },
    );
    let remote = doc(vec![image("img", "missing", 2)]);

    let merged = reconcile(&local, &remote, &assets, &assets).await;
    assert_eq!(merged.elements.len(), 1);
    assert_eq!(merged.elements[0].version, 1);
    assert_eq!(merged.elements[0].x, 7.0);
}

#[tokio::test]
async fn reconcile_skips_fetch_when_file_already_local() {
    let assets = MemoryAssets::new();
    let mut local = doc(Vec::new());
    local.files.insert(
        "known".into(),
        BinaryFile { data_url: "data:,x".into(), mime_type: None },
    );
    let remote = doc(vec![image("img", "known", 1)]);

    // "known" is not in the asset store, so a fetch would fail.
    let merged = reconcile(&local, &remote, &assets, &assets).await;
    assert_eq!(ids(&merged.elements), vec!["img"]);
}

#[tokio::test]
async fn reconcile_clears_origin() {
    let assets = MemoryAssets::new();
    let mut remote = doc(vec![rect("a", 1)]);
    remote.origin = Some(crate::scene::WriteTag { session: uuid::Uuid::new_v4(), seq: 3 });

    let merged = reconcile(&SceneDocument::default(), &remote, &assets, &assets).await;
    assert!(merged.origin.is_none());
}
