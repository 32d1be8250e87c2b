//! Snapshot builders
//!
//! Pull the current session state and turn it into the frames the controller
//! shows for the mixer, the selection and the selected device.

use tracing::debug;

use crate::index::{resolve, resolve_selected_scene, resolve_selected_track};
use crate::protocol::{Frame, FrameEncoder};
use crate::session::{Session, TrackId};

fn names_and_colors(session: &dyn Session, tracks: &[TrackId]) -> (Vec<String>, Vec<u32>) {
    tracks
        .iter()
        .map(|track| {
            session
                .track_info(*track)
                .map(|info| (info.name, info.color))
                .unwrap_or_default()
        })
        .unzip()
}

/// Track names and colors, return names and colors (master last)
pub fn mixer_frames(session: &dyn Session, encoder: &FrameEncoder) -> Vec<Frame> {
    let (names, colors) = names_and_colors(session, &session.tracks());
    let (return_names, return_colors) = names_and_colors(session, &session.return_tracks());
    let master_color = session
        .track_info(session.master_track())
        .map(|info| info.color)
        .unwrap_or(0);

    vec![
        encoder.track_names(&names),
        encoder.track_colors(&colors),
        encoder.return_track_names(&return_names),
        encoder.return_colors(&return_colors, master_color),
    ]
}

pub fn scene_frame(session: &dyn Session, encoder: &FrameEncoder) -> Frame {
    encoder.selected_scene(resolve_selected_scene(session))
}

/// Selected track and return, then the selected scene
pub fn track_and_scene_frames(session: &dyn Session, encoder: &FrameEncoder) -> Vec<Frame> {
    let mut frames: Vec<Frame> = encoder
        .selected_track(resolve_selected_track(session))
        .into();
    frames.push(scene_frame(session, encoder));
    frames
}

/// [`track_and_scene_frames`] followed by the device snapshot
pub fn selection_frames(session: &dyn Session, encoder: &FrameEncoder) -> Vec<Frame> {
    let mut frames = track_and_scene_frames(session, encoder);
    frames.extend(device_frames(session, encoder));
    frames
}

/// Bank name, bank names, device index, device list and parameter names of
/// the selected track's selected device
///
/// Empty when no track or no device is selected.
pub fn device_frames(session: &dyn Session, encoder: &FrameEncoder) -> Vec<Frame> {
    let Some(track) = session.selected_track() else {
        debug!("No selected track, skipping device snapshot");
        return Vec::new();
    };
    let Some(device) = session.selected_device(track) else {
        debug!("Selected track has no selected device");
        return Vec::new();
    };
    let Some(info) = session.device_info(device) else {
        debug!("Selected device {:?} vanished", device);
        return Vec::new();
    };

    let devices = session.devices(track);
    let available: Vec<String> = devices
        .iter()
        .map(|d| session.device_info(*d).map(|i| i.name).unwrap_or_default())
        .collect();

    let mut frames = vec![
        encoder.bank_name(&info.bank_name),
        encoder.bank_names(&info.bank_names),
        encoder.selected_device(resolve(&device, &devices)),
        encoder.available_devices(&available),
    ];
    match encoder.parameter_names(&info.parameter_names) {
        Some(frame) => frames.push(frame),
        None => debug!("Device '{}' exposes no named parameters", info.name),
    }
    frames
}
