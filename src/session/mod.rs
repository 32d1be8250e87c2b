//! Session collaborator contract
//!
//! The bridge never owns session entities. It pulls snapshots and issues
//! mutations through the [`Session`] trait, and receives push notifications
//! through [`Notifier`] callbacks registered per [`Subject`].
//!
//! Handles are opaque ids minted by the session. Two handles are the same
//! entity if and only if they compare equal.

pub mod memory;

use std::sync::Arc;

pub use crate::error::SessionError;
pub use memory::MemorySession;

/// Handle to a track (regular, return or master)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

/// Handle to a clip slot nested under a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClipSlotId(pub u64);

/// Handle to a device nested under a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

/// Handle to a scene (a row shared by all tracks' clip slots)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneId(pub u64);

/// Id of a notification subscription issued by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Display attributes of a track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub name: String,
    /// Packed 24-bit RGB
    pub color: u32,
    pub has_midi_input: bool,
}

/// The four independent booleans of a clip slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ClipSlotFlags {
    pub has_clip: bool,
    pub is_playing: bool,
    pub is_recording: bool,
    pub is_triggered: bool,
}

impl ClipSlotFlags {
    /// Slot holding a stopped clip
    pub fn with_clip() -> Self {
        Self {
            has_clip: true,
            ..Self::default()
        }
    }
}

/// Session-global undo/redo availability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportFlags {
    pub can_undo: bool,
    pub can_redo: bool,
}

/// Device attributes consumed by the bridge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    /// Name of the currently selected parameter bank
    pub bank_name: String,
    /// All bank names in order
    pub bank_names: Vec<String>,
    /// Parameter names of the selected bank (may contain empty names)
    pub parameter_names: Vec<String>,
}

/// Clip quantization settings applied by the quantize button
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantizeSettings {
    /// Grid code (1 = 1/4, 2 = 1/8, 5 = 1/16, 8 = 1/32)
    pub grid: u8,
    /// Strength 0.0 - 1.0
    pub strength: f32,
    /// Swing amount 0.0 - 1.0
    pub swing: f32,
}

impl Default for QuantizeSettings {
    fn default() -> Self {
        Self {
            grid: 5,
            strength: 1.0,
            swing: 0.0,
        }
    }
}

/// Per-slot event kinds the bridge listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotEvent {
    HasClip,
    IsTriggered,
}

/// Something the bridge can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    /// Membership of the regular track list
    Tracks,
    SelectedTrack,
    SelectedScene,
    /// Selected device of the selected track, including bank changes
    SelectedDevice,
    ClipSlot(ClipSlotId, SlotEvent),
}

/// Callback invoked by the session when a subscribed subject fires.
///
/// May be called from any thread; implementations must not block.
pub type Notifier = Arc<dyn Fn(Subject) + Send + Sync>;

/// The live session model the bridge synchronizes with.
///
/// All methods take `&self`; implementations serialize their own mutations.
pub trait Session: Send + Sync {
    // ----- enumeration (pull) -----

    /// Regular tracks in session order
    fn tracks(&self) -> Vec<TrackId>;

    /// Return tracks in session order
    fn return_tracks(&self) -> Vec<TrackId>;

    fn master_track(&self) -> TrackId;

    fn track_info(&self, track: TrackId) -> Option<TrackInfo>;

    /// Clip slots of a regular track, one per scene
    fn clip_slots(&self, track: TrackId) -> Vec<ClipSlotId>;

    fn clip_slot_flags(&self, slot: ClipSlotId) -> Option<ClipSlotFlags>;

    fn scenes(&self) -> Vec<SceneId>;

    fn devices(&self, track: TrackId) -> Vec<DeviceId>;

    fn device_info(&self, device: DeviceId) -> Option<DeviceInfo>;

    fn transport_flags(&self) -> TransportFlags;

    fn session_record(&self) -> bool;

    // ----- selection -----

    fn selected_track(&self) -> Option<TrackId>;

    fn selected_scene(&self) -> Option<SceneId>;

    fn selected_device(&self, track: TrackId) -> Option<DeviceId>;

    /// Fires `SelectedTrack` when the selection changes
    fn select_track(&self, track: TrackId) -> Result<(), SessionError>;

    /// Fires `SelectedScene` when the selection changes
    fn select_scene(&self, scene: SceneId) -> Result<(), SessionError>;

    /// Fires `SelectedDevice` when the device belongs to the selected track
    fn select_device(&self, device: DeviceId) -> Result<(), SessionError>;

    // ----- notifications -----

    fn subscribe(&self, subject: Subject, notifier: Notifier)
        -> Result<SubscriptionId, SessionError>;

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), SessionError>;

    // ----- mutations -----

    fn fire_clip(&self, slot: ClipSlotId, force_legato: bool) -> Result<(), SessionError>;

    fn stop_clip(&self, slot: ClipSlotId) -> Result<(), SessionError>;

    fn delete_clip(&self, slot: ClipSlotId) -> Result<(), SessionError>;

    fn duplicate_clip_to(
        &self,
        source: ClipSlotId,
        destination: ClipSlotId,
    ) -> Result<(), SessionError>;

    /// Duplicate the clip at `index` into the next free slot of the track.
    /// Returns the scene index of the copy.
    fn duplicate_clip_slot(&self, track: TrackId, index: usize) -> Result<usize, SessionError>;

    fn fire_scene(&self, scene: SceneId) -> Result<(), SessionError>;

    fn delete_scene(&self, index: usize) -> Result<(), SessionError>;

    fn duplicate_scene(&self, index: usize) -> Result<(), SessionError>;

    fn undo(&self) -> Result<(), SessionError>;

    fn redo(&self) -> Result<(), SessionError>;

    fn set_session_record(&self, on: bool) -> Result<(), SessionError>;

    fn capture_midi(&self) -> Result<(), SessionError>;

    /// Quantize the clip shown in the detail view, if any
    fn quantize_detail_clip(&self, settings: QuantizeSettings) -> Result<(), SessionError>;

    fn set_implicit_arm(&self, track: TrackId, armed: bool) -> Result<(), SessionError>;

    /// Move the selected parameter bank of a device by `delta` banks, clamped
    /// to the bank list. Returns whether the bank moved; a move on the
    /// selected track's device fires `SelectedDevice`.
    fn step_device_bank(&self, device: DeviceId, delta: i32) -> Result<bool, SessionError>;
}
