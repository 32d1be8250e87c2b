//! Outbound frame encoding
//!
//! Every payload is ASCII text. Index results and track selections are
//! converted to their wire sentinels here and nowhere else.

use std::fmt;

use super::{MessageKind, ProtocolError, NONE_SELECTED, NOT_FOUND, SYSEX_END, SYSEX_START};
use crate::index::{IndexResult, SelectedTrack};
use crate::session::ClipSlotFlags;

/// One outbound SysEx frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: MessageKind,
    device_id: u8,
    payload: String,
}

impl Frame {
    /// Build a frame, replacing anything outside 7-bit ASCII with `?`
    pub fn new(kind: MessageKind, device_id: u8, payload: &str) -> Self {
        Self {
            kind,
            device_id: device_id & 0x7F,
            payload: sanitize(payload),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Complete frame bytes including start and end markers
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload.len() + 4);
        bytes.push(SYSEX_START);
        bytes.push(self.kind.tag());
        bytes.push(self.device_id);
        bytes.extend_from_slice(self.payload.as_bytes());
        bytes.push(SYSEX_END);
        bytes
    }

    /// Parse an outbound frame back (sniffer and tests)
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < 4 {
            return Err(ProtocolError::InvalidFrame(format!(
                "{} bytes is too short for a display frame",
                bytes.len()
            )));
        }
        if bytes[0] != SYSEX_START || bytes[bytes.len() - 1] != SYSEX_END {
            return Err(ProtocolError::InvalidFrame("missing SysEx markers".to_string()));
        }
        let kind = MessageKind::from_tag(bytes[1]).ok_or(ProtocolError::UnknownKind(bytes[1]))?;
        let body = &bytes[3..bytes.len() - 1];
        if body.iter().any(|b| !b.is_ascii()) {
            return Err(ProtocolError::InvalidFrame("payload is not ASCII".to_string()));
        }

        Ok(Self {
            kind,
            device_id: bytes[2],
            payload: String::from_utf8_lossy(body).into_owned(),
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\"", self.kind, self.payload)
    }
}

/// Replace characters that cannot travel inside a SysEx body
pub fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() { c } else { '?' })
        .collect()
}

/// Color components unpacked from a 24-bit integer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub fn from_packed(color: u32) -> Self {
        Self {
            r: ((color >> 16) & 0xFF) as u8,
            g: ((color >> 8) & 0xFF) as u8,
            b: (color & 0xFF) as u8,
        }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.r, self.g, self.b)
    }
}

/// `hasClip isPlaying isRecording isTriggered` as four `0`/`1` digits
pub fn encode_flags(flags: ClipSlotFlags) -> String {
    [flags.has_clip, flags.is_playing, flags.is_recording, flags.is_triggered]
        .iter()
        .map(|&on| if on { '1' } else { '0' })
        .collect()
}

/// Slots joined with `-`, tracks joined with `/`
pub fn encode_clip_grid(grid: &[Vec<ClipSlotFlags>]) -> String {
    grid.iter()
        .map(|slots| {
            slots
                .iter()
                .map(|flags| encode_flags(*flags))
                .collect::<Vec<_>>()
                .join("-")
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn encode_colors(colors: &[u32]) -> String {
    colors
        .iter()
        .map(|c| Rgb::from_packed(*c).to_string())
        .collect::<Vec<_>>()
        .join("-")
}

pub fn encode_index(index: IndexResult) -> String {
    match index {
        IndexResult::Found(i) => i.to_string(),
        IndexResult::NotFound => NOT_FOUND.to_string(),
    }
}

/// Payloads of the selected-track and selected-return frames
pub fn encode_selected_track(selected: SelectedTrack) -> (String, String) {
    match selected {
        SelectedTrack::Regular(i) => (i.to_string(), NONE_SELECTED.to_string()),
        SelectedTrack::Return(i) | SelectedTrack::Master(i) => {
            (NOT_FOUND.to_string(), i.to_string())
        }
        SelectedTrack::None => (NOT_FOUND.to_string(), NONE_SELECTED.to_string()),
    }
}

/// Builds frames for one controller device id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEncoder {
    device_id: u8,
}

impl FrameEncoder {
    pub fn new(device_id: u8) -> Self {
        Self { device_id }
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn frame(&self, kind: MessageKind, payload: &str) -> Frame {
        Frame::new(kind, self.device_id, payload)
    }

    pub fn track_names(&self, names: &[String]) -> Frame {
        self.frame(MessageKind::TrackNames, &names.join(","))
    }

    pub fn track_colors(&self, colors: &[u32]) -> Frame {
        self.frame(MessageKind::TrackColors, &encode_colors(colors))
    }

    pub fn return_track_names(&self, names: &[String]) -> Frame {
        self.frame(MessageKind::ReturnTrackNames, &names.join(","))
    }

    /// Return colors followed by the master color
    pub fn return_colors(&self, returns: &[u32], master: u32) -> Frame {
        let mut colors = returns.to_vec();
        colors.push(master);
        self.frame(MessageKind::ReturnColors, &encode_colors(&colors))
    }

    pub fn clip_grid(&self, grid: &[Vec<ClipSlotFlags>]) -> Frame {
        self.frame(MessageKind::ClipGrid, &encode_clip_grid(grid))
    }

    /// Selected-track frame followed by the selected-return frame
    pub fn selected_track(&self, selected: SelectedTrack) -> [Frame; 2] {
        let (track, ret) = encode_selected_track(selected);
        [
            self.frame(MessageKind::SelectedTrack, &track),
            self.frame(MessageKind::SelectedReturn, &ret),
        ]
    }

    pub fn selected_scene(&self, index: IndexResult) -> Frame {
        self.frame(MessageKind::SelectedScene, &encode_index(index))
    }

    pub fn selected_device(&self, index: IndexResult) -> Frame {
        self.frame(MessageKind::SelectedDevice, &encode_index(index))
    }

    pub fn available_devices(&self, names: &[String]) -> Frame {
        self.frame(MessageKind::AvailableDevices, &names.join(","))
    }

    /// Parameter names with empty entries dropped, `None` when nothing is left
    pub fn parameter_names(&self, names: &[String]) -> Option<Frame> {
        let named: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|n| !n.is_empty())
            .collect();
        if named.is_empty() {
            return None;
        }
        Some(self.frame(MessageKind::ParameterNames, &named.join(",")))
    }

    pub fn bank_name(&self, name: &str) -> Frame {
        self.frame(MessageKind::BankName, name)
    }

    pub fn bank_names(&self, names: &[String]) -> Frame {
        self.frame(MessageKind::BankNames, &names.join(","))
    }
}
