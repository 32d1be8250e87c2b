//! Command dispatch
//!
//! Validates decoded controller commands against the session's current
//! bounds and applies them through the mutation API. Anything out of range
//! is discarded without touching the session.

use std::fmt;
use tracing::{debug, trace};

use crate::controls::ControlCommand;
use crate::index::{resolve_selected_scene, IndexResult};
use crate::protocol::{InboundCommand, SlotCoord};
use crate::session::{ClipSlotId, QuantizeSettings, SceneId, Session, SessionError};

/// Why a command was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discard {
    TrackOutOfRange { index: usize, count: usize },
    ClipOutOfRange { track: usize, index: usize, count: usize },
    DeviceOutOfRange { index: usize, count: usize },
    SceneOutOfRange { index: usize, count: usize },
    /// Fire values other than 1 are reserved
    ReservedFire(u8),
    /// Required selection (track, scene, device) is missing or of the wrong kind
    NoSelection(&'static str),
    /// The session reports the action as unavailable (e.g. nothing to undo)
    Unavailable(&'static str),
}

impl fmt::Display for Discard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discard::TrackOutOfRange { index, count } => {
                write!(f, "track {} out of range ({} tracks)", index, count)
            }
            Discard::ClipOutOfRange { track, index, count } => {
                write!(f, "clip {} out of range on track {} ({} slots)", index, track, count)
            }
            Discard::DeviceOutOfRange { index, count } => {
                write!(f, "device {} out of range ({} devices)", index, count)
            }
            Discard::SceneOutOfRange { index, count } => {
                write!(f, "scene {} out of range ({} scenes)", index, count)
            }
            Discard::ReservedFire(value) => write!(f, "reserved fire value {}", value),
            Discard::NoSelection(what) => write!(f, "no selected {}", what),
            Discard::Unavailable(what) => write!(f, "{} unavailable", what),
        }
    }
}

/// Follow-up output the bridge owes the controller after a command
///
/// Only requested when the session will not fire a notification for the
/// change, so every frame goes out once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Re-send the selected scene
    Scene,
    /// Re-send the device snapshot
    Device,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Applied, and the controller expects an echo
    AppliedWith(Refresh),
    Discarded(Discard),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        !matches!(self, Outcome::Discarded(_))
    }
}

fn discarded(discard: Discard) -> Outcome {
    debug!("Command discarded: {}", discard);
    Outcome::Discarded(discard)
}

/// Resolve a raw coordinate to a slot handle within the current bounds
pub fn locate_slot(session: &dyn Session, coord: SlotCoord) -> Result<ClipSlotId, Discard> {
    let tracks = session.tracks();
    let track = tracks.get(coord.track).ok_or(Discard::TrackOutOfRange {
        index: coord.track,
        count: tracks.len(),
    })?;
    let slots = session.clip_slots(*track);
    slots.get(coord.clip).copied().ok_or(Discard::ClipOutOfRange {
        track: coord.track,
        index: coord.clip,
        count: slots.len(),
    })
}

/// Apply a decoded SysEx command
pub fn dispatch_command(
    session: &dyn Session,
    command: &InboundCommand,
) -> Result<Outcome, SessionError> {
    trace!("Dispatching {:?}", command);

    match *command {
        InboundCommand::FireClip { fire, slot } => {
            let id = match locate_slot(session, slot) {
                Ok(id) => id,
                Err(discard) => return Ok(discarded(discard)),
            };
            if fire != 1 {
                return Ok(discarded(Discard::ReservedFire(fire)));
            }
            let playing = session
                .clip_slot_flags(id)
                .map(|flags| flags.is_playing)
                .unwrap_or(false);
            if playing {
                session.stop_clip(id)?;
            } else {
                session.fire_clip(id, false)?;
            }
        }
        InboundCommand::DeleteClip { slot } => {
            let id = match locate_slot(session, slot) {
                Ok(id) => id,
                Err(discard) => return Ok(discarded(discard)),
            };
            session.delete_clip(id)?;
        }
        InboundCommand::CopyClip { source, destination } => {
            let located = locate_slot(session, source)
                .and_then(|src| locate_slot(session, destination).map(|dst| (src, dst)));
            let (src, dst) = match located {
                Ok(pair) => pair,
                Err(discard) => return Ok(discarded(discard)),
            };
            session.duplicate_clip_to(src, dst)?;
        }
    }

    Ok(Outcome::Applied)
}

fn scene_at(session: &dyn Session, index: usize) -> Result<SceneId, Discard> {
    let scenes = session.scenes();
    scenes.get(index).copied().ok_or(Discard::SceneOutOfRange {
        index,
        count: scenes.len(),
    })
}

/// Apply a control command. Quantize settings live with the caller.
pub fn dispatch_control(
    session: &dyn Session,
    quantize: &mut QuantizeSettings,
    command: ControlCommand,
) -> Result<Outcome, SessionError> {
    trace!("Control {:?}", command);

    match command {
        ControlCommand::Undo => {
            if !session.transport_flags().can_undo {
                return Ok(discarded(Discard::Unavailable("undo")));
            }
            session.undo()?;
        }
        ControlCommand::Redo => {
            if !session.transport_flags().can_redo {
                return Ok(discarded(Discard::Unavailable("redo")));
            }
            session.redo()?;
        }
        ControlCommand::SessionRecordToggle => {
            session.set_session_record(!session.session_record())?;
        }
        ControlCommand::CaptureMidi => session.capture_midi()?,
        ControlCommand::Quantize => session.quantize_detail_clip(*quantize)?,
        ControlCommand::QuantizeGrid(grid) => quantize.grid = grid,
        ControlCommand::QuantizeStrength(strength) => quantize.strength = strength,
        ControlCommand::SwingAmount(swing) => quantize.swing = swing,
        ControlCommand::DuplicateClip => return duplicate_clip(session),
        ControlCommand::DuplicateScene => {
            let IndexResult::Found(index) = resolve_selected_scene(session) else {
                return Ok(discarded(Discard::NoSelection("scene")));
            };
            session.duplicate_scene(index)?;
        }
        ControlCommand::SelectDevice(index) => {
            let Some(track) = session.selected_track() else {
                return Ok(discarded(Discard::NoSelection("track")));
            };
            let devices = session.devices(track);
            let Some(device) = devices.get(index) else {
                return Ok(discarded(Discard::DeviceOutOfRange { index, count: devices.len() }));
            };
            session.select_device(*device)?;
        }
        ControlCommand::SelectTrack(index) => {
            let tracks = session.tracks();
            let Some(track) = tracks.get(index) else {
                return Ok(discarded(Discard::TrackOutOfRange { index, count: tracks.len() }));
            };
            session.select_track(*track)?;
        }
        ControlCommand::SelectReturnTrack(index) => {
            let track = session
                .return_tracks()
                .get(index)
                .copied()
                .unwrap_or_else(|| session.master_track());
            session.select_track(track)?;
        }
        ControlCommand::FireScene(index) => match scene_at(session, index) {
            Ok(scene) => session.fire_scene(scene)?,
            Err(discard) => return Ok(discarded(discard)),
        },
        ControlCommand::SelectClipScene(index) => match scene_at(session, index) {
            Ok(scene) => {
                let unchanged = session.selected_scene() == Some(scene);
                session.select_scene(scene)?;
                if unchanged {
                    return Ok(Outcome::AppliedWith(Refresh::Scene));
                }
            }
            Err(discard) => return Ok(discarded(discard)),
        },
        ControlCommand::DeleteScene(index) => match scene_at(session, index) {
            Ok(_) => session.delete_scene(index)?,
            Err(discard) => return Ok(discarded(discard)),
        },
        ControlCommand::BankNavigate(delta) => {
            let device = session
                .selected_track()
                .and_then(|track| session.selected_device(track));
            let Some(device) = device else {
                return Ok(discarded(Discard::NoSelection("device")));
            };
            if !session.step_device_bank(device, delta)? {
                return Ok(Outcome::AppliedWith(Refresh::Device));
            }
        }
    }

    Ok(Outcome::Applied)
}

/// Copy the highlighted clip into the next free slot and move the selection
/// there, keeping playback going if the original was playing
fn duplicate_clip(session: &dyn Session) -> Result<Outcome, SessionError> {
    let Some(track) = session.selected_track() else {
        return Ok(discarded(Discard::NoSelection("track")));
    };
    if !session.tracks().contains(&track) {
        return Ok(discarded(Discard::NoSelection("regular track")));
    }
    let IndexResult::Found(index) = resolve_selected_scene(session) else {
        return Ok(discarded(Discard::NoSelection("scene")));
    };

    let was_playing = session
        .clip_slots(track)
        .get(index)
        .and_then(|slot| session.clip_slot_flags(*slot))
        .map(|flags| flags.is_playing)
        .unwrap_or(false);

    let copy = session.duplicate_clip_slot(track, index)?;
    let scene = match scene_at(session, copy) {
        Ok(scene) => scene,
        Err(discard) => return Ok(discarded(discard)),
    };
    session.select_scene(scene)?;

    if was_playing {
        if let Some(slot) = session.clip_slots(track).get(copy).copied() {
            let playing = session
                .clip_slot_flags(slot)
                .map(|flags| flags.is_playing)
                .unwrap_or(false);
            if !playing {
                session.fire_clip(slot, true)?;
            }
        }
    }

    Ok(Outcome::Applied)
}

/// Arm the selected track for MIDI input, disarm the other regular tracks and
/// make sure it has a selected device
///
/// With no selection the first regular track is armed. Returns whether a
/// device was selected here; the session then fires `SelectedDevice` itself.
pub fn follow_track_selection(session: &dyn Session) -> Result<bool, SessionError> {
    let tracks = session.tracks();
    let selected = session.selected_track();
    let armed = selected.or_else(|| tracks.first().copied());

    for track in &tracks {
        if Some(*track) != armed {
            session.set_implicit_arm(*track, false)?;
        }
    }

    let Some(armed) = armed else {
        return Ok(false);
    };
    let has_midi_input = session
        .track_info(armed)
        .map(|info| info.has_midi_input)
        .unwrap_or(false);
    if has_midi_input && tracks.contains(&armed) {
        session.set_implicit_arm(armed, true)?;
    }

    let Some(track) = selected else {
        return Ok(false);
    };
    if session.selected_device(track).is_some() {
        return Ok(false);
    }
    match session.devices(track).first() {
        Some(first) => {
            session.select_device(*first)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::memory::Mutation;
    use crate::session::{ClipSlotFlags, MemorySession, TransportFlags};

    fn session_with_tracks(tracks: usize, scenes: usize) -> MemorySession {
        let session = MemorySession::new(scenes);
        for i in 0..tracks {
            session.add_track(&format!("T{}", i), 0);
        }
        session
    }

    fn fire(track: usize, clip: usize) -> InboundCommand {
        InboundCommand::FireClip { fire: 1, slot: SlotCoord::new(track, clip) }
    }

    #[test]
    fn test_fire_out_of_range_is_discarded() {
        let session = session_with_tracks(4, 8);
        let outcome = dispatch_command(&session, &fire(10, 0)).unwrap();
        assert_eq!(
            outcome,
            Outcome::Discarded(Discard::TrackOutOfRange { index: 10, count: 4 })
        );
        assert!(session.mutations().is_empty());

        let outcome = dispatch_command(&session, &fire(0, 8)).unwrap();
        assert!(matches!(outcome, Outcome::Discarded(Discard::ClipOutOfRange { .. })));
        assert!(session.mutations().is_empty());
    }

    #[test]
    fn test_fire_toggles_playback() {
        let session = session_with_tracks(1, 2);
        let track = session.tracks()[0];
        session.set_slot_flags_at(track, 1, ClipSlotFlags::with_clip()).unwrap();
        let slot = session.slot_at(track, 1).unwrap();

        dispatch_command(&session, &fire(0, 1)).unwrap();
        assert!(session.clip_slot_flags(slot).unwrap().is_playing);

        dispatch_command(&session, &fire(0, 1)).unwrap();
        assert!(!session.clip_slot_flags(slot).unwrap().is_playing);
        assert_eq!(
            session.mutations(),
            vec![
                Mutation::FireClip { slot, force_legato: false },
                Mutation::StopClip(slot),
            ]
        );
    }

    #[test]
    fn test_reserved_fire_value() {
        let session = session_with_tracks(1, 1);
        let cmd = InboundCommand::FireClip { fire: 0, slot: SlotCoord::new(0, 0) };
        assert_eq!(
            dispatch_command(&session, &cmd).unwrap(),
            Outcome::Discarded(Discard::ReservedFire(0))
        );
        assert!(session.mutations().is_empty());
    }

    #[test]
    fn test_copy_with_invalid_destination_has_no_effect() {
        let session = session_with_tracks(2, 2);
        let track = session.tracks()[0];
        session.set_slot_flags_at(track, 0, ClipSlotFlags::with_clip()).unwrap();

        let cmd = InboundCommand::CopyClip {
            source: SlotCoord::new(0, 0),
            destination: SlotCoord::new(1, 7),
        };
        let outcome = dispatch_command(&session, &cmd).unwrap();
        assert!(!outcome.is_applied());
        assert!(session.mutations().is_empty());

        let other = session.tracks()[1];
        assert!(!session.clip_slot_flags(session.slot_at(other, 1).unwrap()).unwrap().has_clip);
    }

    #[test]
    fn test_copy_and_delete() {
        let session = session_with_tracks(2, 2);
        let (a, b) = (session.tracks()[0], session.tracks()[1]);
        session.set_slot_flags_at(a, 0, ClipSlotFlags::with_clip()).unwrap();

        let copy = InboundCommand::CopyClip {
            source: SlotCoord::new(0, 0),
            destination: SlotCoord::new(1, 1),
        };
        assert_eq!(dispatch_command(&session, &copy).unwrap(), Outcome::Applied);
        let dst = session.slot_at(b, 1).unwrap();
        assert!(session.clip_slot_flags(dst).unwrap().has_clip);

        let delete = InboundCommand::DeleteClip { slot: SlotCoord::new(1, 1) };
        dispatch_command(&session, &delete).unwrap();
        assert!(!session.clip_slot_flags(dst).unwrap().has_clip);
    }

    #[test]
    fn test_undo_requires_availability() {
        let session = session_with_tracks(0, 0);
        let mut quantize = QuantizeSettings::default();

        let outcome = dispatch_control(&session, &mut quantize, ControlCommand::Undo).unwrap();
        assert_eq!(outcome, Outcome::Discarded(Discard::Unavailable("undo")));

        session.set_transport_flags(TransportFlags { can_undo: true, can_redo: false });
        dispatch_control(&session, &mut quantize, ControlCommand::Undo).unwrap();
        assert_eq!(session.mutations(), vec![Mutation::Undo]);
    }

    #[test]
    fn test_session_record_toggles() {
        let session = session_with_tracks(0, 0);
        let mut quantize = QuantizeSettings::default();
        dispatch_control(&session, &mut quantize, ControlCommand::SessionRecordToggle).unwrap();
        assert!(session.session_record());
        dispatch_control(&session, &mut quantize, ControlCommand::SessionRecordToggle).unwrap();
        assert!(!session.session_record());
    }

    #[test]
    fn test_quantize_uses_current_settings() {
        let session = session_with_tracks(1, 1);
        let track = session.tracks()[0];
        session.select_track(track).unwrap();
        session.set_slot_flags_at(track, 0, ClipSlotFlags::with_clip()).unwrap();
        session.clear_mutations();

        let mut quantize = QuantizeSettings::default();
        dispatch_control(&session, &mut quantize, ControlCommand::QuantizeGrid(2)).unwrap();
        dispatch_control(&session, &mut quantize, ControlCommand::QuantizeStrength(0.5)).unwrap();
        dispatch_control(&session, &mut quantize, ControlCommand::SwingAmount(0.05)).unwrap();
        dispatch_control(&session, &mut quantize, ControlCommand::Quantize).unwrap();

        assert_eq!(
            session.mutations(),
            vec![Mutation::Quantize(QuantizeSettings { grid: 2, strength: 0.5, swing: 0.05 })]
        );
    }

    #[test]
    fn test_select_return_past_end_selects_master() {
        let session = session_with_tracks(1, 1);
        let ret = session.add_return_track("Verb", 0);
        let mut quantize = QuantizeSettings::default();

        dispatch_control(&session, &mut quantize, ControlCommand::SelectReturnTrack(0)).unwrap();
        assert_eq!(session.selected_track(), Some(ret));

        dispatch_control(&session, &mut quantize, ControlCommand::SelectReturnTrack(5)).unwrap();
        assert_eq!(session.selected_track(), Some(session.master_track()));
    }

    #[test]
    fn test_select_out_of_range_is_discarded() {
        let session = session_with_tracks(2, 3);
        let mut quantize = QuantizeSettings::default();

        let outcome = dispatch_control(&session, &mut quantize, ControlCommand::SelectTrack(2)).unwrap();
        assert_eq!(outcome, Outcome::Discarded(Discard::TrackOutOfRange { index: 2, count: 2 }));

        let outcome = dispatch_control(&session, &mut quantize, ControlCommand::FireScene(3)).unwrap();
        assert_eq!(outcome, Outcome::Discarded(Discard::SceneOutOfRange { index: 3, count: 3 }));
        assert!(session.mutations().is_empty());
    }

    #[test]
    fn test_select_clip_scene_echoes_only_without_change() {
        let session = session_with_tracks(1, 3);
        let mut quantize = QuantizeSettings::default();

        // a new scene fires SelectedScene, no extra echo
        let outcome =
            dispatch_control(&session, &mut quantize, ControlCommand::SelectClipScene(2)).unwrap();
        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(session.selected_scene(), Some(session.scenes()[2]));

        let outcome =
            dispatch_control(&session, &mut quantize, ControlCommand::SelectClipScene(2)).unwrap();
        assert_eq!(outcome, Outcome::AppliedWith(Refresh::Scene));
    }

    #[test]
    fn test_bank_navigation_echoes_only_at_the_edge() {
        let session = session_with_tracks(1, 1);
        let track = session.tracks()[0];
        let bank = |name: &str| crate::session::memory::BankSpec {
            name: name.to_string(),
            parameters: Vec::new(),
        };
        let device = session.add_device(track, "Operator", vec![bank("Osc"), bank("Filter")]);
        session.select_track(track).unwrap();
        session.select_device(device).unwrap();
        let mut quantize = QuantizeSettings::default();

        let outcome =
            dispatch_control(&session, &mut quantize, ControlCommand::BankNavigate(1)).unwrap();
        assert_eq!(outcome, Outcome::Applied);

        let outcome =
            dispatch_control(&session, &mut quantize, ControlCommand::BankNavigate(1)).unwrap();
        assert_eq!(outcome, Outcome::AppliedWith(Refresh::Device));
    }

    #[test]
    fn test_duplicate_clip_keeps_playing() {
        let session = session_with_tracks(1, 2);
        let track = session.tracks()[0];
        session.select_track(track).unwrap();
        let playing = ClipSlotFlags { is_playing: true, ..ClipSlotFlags::with_clip() };
        session.set_slot_flags_at(track, 0, playing).unwrap();
        session.clear_mutations();

        let mut quantize = QuantizeSettings::default();
        let outcome = dispatch_control(&session, &mut quantize, ControlCommand::DuplicateClip).unwrap();
        assert_eq!(outcome, Outcome::Applied);

        let copy = session.slot_at(track, 1).unwrap();
        assert_eq!(session.selected_scene(), Some(session.scenes()[1]));
        assert!(session.clip_slot_flags(copy).unwrap().is_playing);
        assert!(session
            .mutations()
            .contains(&Mutation::FireClip { slot: copy, force_legato: true }));
    }

    #[test]
    fn test_duplicate_clip_needs_regular_track() {
        let session = session_with_tracks(1, 2);
        let ret = session.add_return_track("Verb", 0);
        session.select_track(ret).unwrap();
        let mut quantize = QuantizeSettings::default();

        let outcome = dispatch_control(&session, &mut quantize, ControlCommand::DuplicateClip).unwrap();
        assert_eq!(outcome, Outcome::Discarded(Discard::NoSelection("regular track")));
    }

    #[test]
    fn test_follow_track_selection_arms_and_selects_device() {
        let session = session_with_tracks(2, 1);
        let (a, b) = (session.tracks()[0], session.tracks()[1]);
        let device = session.add_device(b, "Operator", Vec::new());

        session.select_track(a).unwrap();
        assert!(!follow_track_selection(&session).unwrap());
        assert!(session.is_armed(a));

        session.select_track(b).unwrap();
        assert!(follow_track_selection(&session).unwrap());
        assert!(session.is_armed(b));
        assert!(!session.is_armed(a));
        assert_eq!(session.selected_device(b), Some(device));

        // already selected, nothing to do
        assert!(!follow_track_selection(&session).unwrap());
    }

    #[test]
    fn test_follow_track_selection_arms_first_track_without_selection() {
        let session = session_with_tracks(2, 1);
        let (a, b) = (session.tracks()[0], session.tracks()[1]);
        session.set_implicit_arm(b, true).unwrap();

        assert!(!follow_track_selection(&session).unwrap());
        assert!(session.is_armed(a));
        assert!(!session.is_armed(b));
    }

    #[test]
    fn test_follow_track_selection_skips_audio_tracks() {
        let session = session_with_tracks(1, 1);
        let track = session.tracks()[0];
        session.set_midi_input(track, false);
        session.select_track(track).unwrap();
        follow_track_selection(&session).unwrap();
        assert!(!session.is_armed(track));
    }
}
