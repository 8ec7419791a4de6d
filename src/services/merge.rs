//! Remote merge reconciler — folds a persisted snapshot into the local scene.
//!
//! DESIGN
//! ======
//! Per-element last-writer-wins on the version counter, unioned with
//! everything either side has:
//!
//! 1. Index local elements by id.
//! 2. Each remote element is kept as-is if local has no such id; otherwise
//!    the copy with the greater version wins, ties going to remote (a tie
//!    is our own edit coming back around).
//! 3. Local elements the remote does not mention are kept unchanged.
//!
//! Output order is remote order followed by local-only elements.
//!
//! TRADE-OFFS
//! ==========
//! There are no tombstones. An element deleted on one client comes back
//! as soon as any peer's stale copy round-trips through a merge. Deletion
//! propagation would need explicit delete markers with their own versions.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::error::ErrorCode;
use crate::scene::{SceneDocument, SceneElement};
use crate::services::assets::{AssetFetcher, AssetStore, materialize};

/// One merged slot: the chosen element plus where it came from.
struct Pick<'a> {
    chosen: &'a SceneElement,
    from_remote: bool,
    /// Local copy sharing the id, if any.
    local: Option<&'a SceneElement>,
}

/// Merge element sets. Pure; see module docs for the rules.
#[must_use]
pub fn merge(local: &[SceneElement], remote: &[SceneElement]) -> Vec<SceneElement> {
    merge_picks(local, remote)
        .into_iter()
        .map(|pick| pick.chosen.clone())
        .collect()
}

fn merge_picks<'a>(local: &'a [SceneElement], remote: &'a [SceneElement]) -> Vec<Pick<'a>> {
    let local_by_id: HashMap<&str, &SceneElement> = local.iter().map(|e| (e.id.as_str(), e)).collect();
    let mut emitted: HashSet<&str> = HashSet::with_capacity(local.len() + remote.len());
    let mut picks = Vec::with_capacity(local.len() + remote.len());

    for remote_el in remote {
        if !emitted.insert(remote_el.id.as_str()) {
            continue;
        }
        let pick = match local_by_id.get(remote_el.id.as_str()) {
            None => Pick { chosen: remote_el, from_remote: true, local: None },
            Some(&local_el) if remote_el.version >= local_el.version => {
                Pick { chosen: remote_el, from_remote: true, local: Some(local_el) }
            }
            Some(&local_el) => Pick { chosen: local_el, from_remote: false, local: Some(local_el) },
        };
        picks.push(pick);
    }

    for local_el in local {
        if emitted.insert(local_el.id.as_str()) {
            picks.push(Pick { chosen: local_el, from_remote: false, local: Some(local_el) });
        }
    }

    picks
}

/// Merge a remote snapshot into the local document, materializing assets.
///
/// Elements taken from the remote side that reference an asset missing
/// locally get it from the snapshot's inline files, or failing that from
/// the asset store. If neither works, that element's merge is skipped: the
/// local copy stays if there is one, otherwise the element is left out.
pub async fn reconcile(
    local: &SceneDocument,
    remote: &SceneDocument,
    assets: &dyn AssetStore,
    fetcher: &dyn AssetFetcher,
) -> SceneDocument {
    let picks = merge_picks(&local.elements, &remote.elements);
    let mut files = local.files.clone();
    let mut elements = Vec::with_capacity(picks.len());

    for pick in picks {
        let needs_asset = pick
            .chosen
            .asset_ref()
            .filter(|file_id| pick.from_remote && !files.contains_key(*file_id));

        if let Some(file_id) = needs_asset {
            let resolved = match remote.files.get(file_id) {
                Some(inline) => Ok(inline.clone()),
                None => materialize(file_id, assets, fetcher).await,
            };
            match resolved {
                Ok(file) => {
                    files.insert(file_id.clone(), file);
                }
                Err(e) => {
                    warn!(
                        element_id = %pick.chosen.id,
                        file_id = %file_id,
                        code = e.error_code(),
                        error = %e,
                        "asset unavailable; skipping element merge"
                    );
                    if let Some(local_el) = pick.local {
                        elements.push(local_el.clone());
                    }
                    continue;
                }
            }
        }

        elements.push(pick.chosen.clone());
    }

    SceneDocument { elements, files, origin: None }
}

#[cfg(test)]
#[path = "merge_test.rs"]
mod tests;
