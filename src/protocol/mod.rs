//! MicroPush wire protocol
//!
//! Outbound frames carry ASCII text: `[0xF0, kind, device_id, text.., 0xF7]`.
//! Inbound command frames carry raw one-byte integer fields:
//! `[0xF0, command, field.., 0xF7]`.
//!
//! Composite payloads are delimiter separated. The firmware splits on the
//! delimiters, there is no length prefix:
//! - `,` between parallel items (track names, bank names)
//! - `-` between per-track colors and between the slots of one track
//! - `/` between the tracks of the clip grid

pub mod decode;
pub mod encode;

use std::fmt;

pub use crate::error::ProtocolError;
pub use decode::{decode_command, InboundCommand, SlotCoord};
pub use encode::{Frame, FrameEncoder, Rgb};

/// SysEx start marker
pub const SYSEX_START: u8 = 0xF0;

/// SysEx end marker
pub const SYSEX_END: u8 = 0xF7;

/// Device id of a factory MicroPush
pub const DEFAULT_DEVICE_ID: u8 = 0x01;

/// Payload sent when an entity is not in the list it was looked up in
pub const NOT_FOUND: &str = "not found";

/// Payload sent for the return selection when a regular track is selected
pub const NONE_SELECTED: &str = "none selected";

/// Outbound message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    AvailableDevices = 0x01,
    TrackNames = 0x02,
    SelectedTrack = 0x03,
    TrackColors = 0x04,
    ClipGrid = 0x05,
    ReturnTrackNames = 0x06,
    ReturnColors = 0x07,
    SelectedReturn = 0x08,
    SelectedScene = 0x10,
    SelectedDevice = 0x4D,
    BankNames = 0x5D,
    BankName = 0x6D,
    ParameterNames = 0x7D,
}

impl MessageKind {
    pub const ALL: [MessageKind; 13] = [
        MessageKind::AvailableDevices,
        MessageKind::TrackNames,
        MessageKind::SelectedTrack,
        MessageKind::TrackColors,
        MessageKind::ClipGrid,
        MessageKind::ReturnTrackNames,
        MessageKind::ReturnColors,
        MessageKind::SelectedReturn,
        MessageKind::SelectedScene,
        MessageKind::SelectedDevice,
        MessageKind::BankNames,
        MessageKind::BankName,
        MessageKind::ParameterNames,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.tag() == tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::AvailableDevices => "available-devices",
            MessageKind::TrackNames => "track-names",
            MessageKind::SelectedTrack => "selected-track",
            MessageKind::TrackColors => "track-colors",
            MessageKind::ClipGrid => "clip-grid",
            MessageKind::ReturnTrackNames => "return-track-names",
            MessageKind::ReturnColors => "return-colors",
            MessageKind::SelectedReturn => "selected-return",
            MessageKind::SelectedScene => "selected-scene",
            MessageKind::SelectedDevice => "selected-device",
            MessageKind::BankNames => "bank-names",
            MessageKind::BankName => "bank-name",
            MessageKind::ParameterNames => "parameter-names",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.tag())
    }
}
