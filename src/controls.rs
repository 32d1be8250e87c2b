//! Short-message control bindings
//!
//! Buttons and selectors on the controller send plain notes and control
//! changes. Each configured binding names the message that triggers one
//! [`ControlCommand`].

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::midi::MidiMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingKind {
    Note,
    Cc,
}

/// One physical control: message type, 1-based channel and note/CC number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ControlBinding {
    pub kind: BindingKind,
    pub channel: u8,
    pub number: u8,
}

impl ControlBinding {
    pub const fn note(channel: u8, number: u8) -> Self {
        Self {
            kind: BindingKind::Note,
            channel,
            number,
        }
    }

    pub const fn cc(channel: u8, number: u8) -> Self {
        Self {
            kind: BindingKind::Cc,
            channel,
            number,
        }
    }

    /// Value carried by `message` if it comes from this control.
    /// Note Off reads as value 0.
    pub fn value_of(&self, message: &MidiMessage) -> Option<u8> {
        let wanted_channel = self.channel.checked_sub(1)?;
        match (message, self.kind) {
            (&MidiMessage::NoteOn { channel, note, velocity }, BindingKind::Note)
                if channel == wanted_channel && note == self.number =>
            {
                Some(velocity)
            }
            (&MidiMessage::NoteOff { channel, note, .. }, BindingKind::Note)
                if channel == wanted_channel && note == self.number =>
            {
                Some(0)
            }
            (&MidiMessage::ControlChange { channel, cc, value }, BindingKind::Cc)
                if channel == wanted_channel && cc == self.number =>
            {
                Some(value)
            }
            _ => None,
        }
    }
}

/// Commands triggered from short messages
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    Undo,
    Redo,
    SessionRecordToggle,
    CaptureMidi,
    Quantize,
    DuplicateClip,
    DuplicateScene,
    QuantizeGrid(u8),
    /// 0.0 - 1.27
    QuantizeStrength(f32),
    /// 0.0 - 0.127
    SwingAmount(f32),
    SelectDevice(usize),
    SelectTrack(usize),
    /// Indices past the last return select the master track
    SelectReturnTrack(usize),
    FireScene(usize),
    SelectClipScene(usize),
    DeleteScene(usize),
    /// Step the selected device's parameter bank
    BankNavigate(i32),
}

/// The binding table, defaults match the MicroPush firmware layout
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlBindings {
    pub undo: ControlBinding,
    pub redo: ControlBinding,
    pub session_record: ControlBinding,
    pub capture_midi: ControlBinding,
    pub quantize: ControlBinding,
    pub duplicate_clip: ControlBinding,
    pub duplicate_scene: ControlBinding,
    pub quantize_grid: ControlBinding,
    pub quantize_strength: ControlBinding,
    pub swing_amount: ControlBinding,
    pub select_device: ControlBinding,
    pub select_track: ControlBinding,
    pub select_return_track: ControlBinding,
    pub fire_scene: ControlBinding,
    pub select_clip_scene: ControlBinding,
    pub delete_scene: ControlBinding,
    pub bank_prev: ControlBinding,
    pub bank_next: ControlBinding,
}

impl Default for ControlBindings {
    fn default() -> Self {
        Self {
            undo: ControlBinding::note(16, 101),
            redo: ControlBinding::note(16, 102),
            session_record: ControlBinding::cc(1, 119),
            capture_midi: ControlBinding::note(16, 100),
            quantize: ControlBinding::note(16, 99),
            duplicate_clip: ControlBinding::note(16, 98),
            duplicate_scene: ControlBinding::note(16, 95),
            quantize_grid: ControlBinding::cc(2, 0),
            quantize_strength: ControlBinding::cc(2, 1),
            swing_amount: ControlBinding::cc(2, 2),
            select_device: ControlBinding::cc(2, 3),
            select_track: ControlBinding::cc(2, 4),
            select_return_track: ControlBinding::cc(2, 5),
            fire_scene: ControlBinding::cc(2, 14),
            select_clip_scene: ControlBinding::cc(2, 15),
            delete_scene: ControlBinding::cc(2, 16),
            bank_prev: ControlBinding::cc(1, 33),
            bank_next: ControlBinding::cc(1, 32),
        }
    }
}

type Selector = fn(u8) -> ControlCommand;

impl ControlBindings {
    /// Momentary buttons, act on non-zero values only
    fn buttons(&self) -> [(&'static str, ControlBinding, ControlCommand); 9] {
        [
            ("undo", self.undo, ControlCommand::Undo),
            ("redo", self.redo, ControlCommand::Redo),
            ("session_record", self.session_record, ControlCommand::SessionRecordToggle),
            ("capture_midi", self.capture_midi, ControlCommand::CaptureMidi),
            ("quantize", self.quantize, ControlCommand::Quantize),
            ("duplicate_clip", self.duplicate_clip, ControlCommand::DuplicateClip),
            ("duplicate_scene", self.duplicate_scene, ControlCommand::DuplicateScene),
            ("bank_prev", self.bank_prev, ControlCommand::BankNavigate(-1)),
            ("bank_next", self.bank_next, ControlCommand::BankNavigate(1)),
        ]
    }

    /// Controls whose value is the argument, zero included
    fn selectors(&self) -> [(&'static str, ControlBinding, Selector); 9] {
        [
            ("quantize_grid", self.quantize_grid, ControlCommand::QuantizeGrid as Selector),
            ("quantize_strength", self.quantize_strength, |v| {
                ControlCommand::QuantizeStrength(v as f32 / 100.0)
            }),
            ("swing_amount", self.swing_amount, |v| {
                ControlCommand::SwingAmount(v as f32 / 1000.0)
            }),
            ("select_device", self.select_device, |v| ControlCommand::SelectDevice(v as usize)),
            ("select_track", self.select_track, |v| ControlCommand::SelectTrack(v as usize)),
            ("select_return_track", self.select_return_track, |v| {
                ControlCommand::SelectReturnTrack(v as usize)
            }),
            ("fire_scene", self.fire_scene, |v| ControlCommand::FireScene(v as usize)),
            ("select_clip_scene", self.select_clip_scene, |v| {
                ControlCommand::SelectClipScene(v as usize)
            }),
            ("delete_scene", self.delete_scene, |v| ControlCommand::DeleteScene(v as usize)),
        ]
    }

    /// Map a short message to its command, if it is bound
    pub fn resolve(&self, message: &MidiMessage) -> Option<ControlCommand> {
        for (_, binding, command) in self.buttons() {
            if let Some(value) = binding.value_of(message) {
                return (value != 0).then_some(command);
            }
        }
        for (_, binding, select) in self.selectors() {
            if let Some(value) = binding.value_of(message) {
                return Some(select(value));
            }
        }
        None
    }

    /// Channels must be 1-16, numbers 7-bit, and no two controls may share a message
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashMap<ControlBinding, &'static str> = HashMap::new();
        let all = self
            .buttons()
            .into_iter()
            .map(|(name, binding, _)| (name, binding))
            .chain(self.selectors().into_iter().map(|(name, binding, _)| (name, binding)));

        for (name, binding) in all {
            if !(1..=16).contains(&binding.channel) {
                anyhow::bail!("controls.{}: channel {} is not in 1-16", name, binding.channel);
            }
            if binding.number > 127 {
                anyhow::bail!("controls.{}: number {} is not a 7-bit value", name, binding.number);
            }
            if let Some(other) = seen.insert(binding, name) {
                anyhow::bail!("controls.{} and controls.{} use the same message", other, name);
            }
        }
        Ok(())
    }
}
