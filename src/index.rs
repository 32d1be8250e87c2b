//! Entity index resolution
//!
//! Maps a session handle to its 0-based position in an ordered list. A miss
//! is reported as [`IndexResult::NotFound`], never as index 0.

use crate::session::{Session, TrackId};

/// Position of an entity in its containing list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexResult {
    /// 0-based position of the first identical handle
    Found(usize),
    /// Absent from the list; encoded as the `not found` sentinel
    NotFound,
}

/// Position of the first handle identical to `target`
pub fn resolve<T: PartialEq>(target: &T, candidates: &[T]) -> IndexResult {
    candidates
        .iter()
        .position(|candidate| candidate == target)
        .map(IndexResult::Found)
        .unwrap_or(IndexResult::NotFound)
}

/// Like [`resolve`], treating an absent target as not found
pub fn resolve_opt<T: PartialEq>(target: Option<&T>, candidates: &[T]) -> IndexResult {
    target
        .map(|t| resolve(t, candidates))
        .unwrap_or(IndexResult::NotFound)
}

/// Where the selected track lives, resolved regular → return → master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectedTrack {
    Regular(usize),
    Return(usize),
    /// Master sits right after the returns on the controller, so it carries
    /// the return count as its position.
    Master(usize),
    None,
}

/// Resolve the session's selected track across the three track categories
///
/// A track found in neither the regular nor the return list is the master.
pub fn resolve_selected_track(session: &dyn Session) -> SelectedTrack {
    let Some(selected) = session.selected_track() else {
        return SelectedTrack::None;
    };
    selected_track_position(selected, &session.tracks(), &session.return_tracks())
}

fn selected_track_position(
    selected: TrackId,
    tracks: &[TrackId],
    return_tracks: &[TrackId],
) -> SelectedTrack {
    if let IndexResult::Found(index) = resolve(&selected, tracks) {
        return SelectedTrack::Regular(index);
    }
    match resolve(&selected, return_tracks) {
        IndexResult::Found(index) => SelectedTrack::Return(index),
        IndexResult::NotFound => SelectedTrack::Master(return_tracks.len()),
    }
}

/// Resolve the selected scene within the scene list
pub fn resolve_selected_scene(session: &dyn Session) -> IndexResult {
    resolve_opt(session.selected_scene().as_ref(), &session.scenes())
}
