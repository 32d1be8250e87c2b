//! In-memory session
//!
//! A self-contained [`Session`] used by the test-suite and by the binary's
//! simulated session. Subscribers are notified after the internal lock is
//! released, so a notifier may call straight back into the session.
//!
//! Launching a clip passes through the triggered state, so play/stop
//! transitions are reported on the [`SlotEvent::IsTriggered`] subject.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

use super::{
    ClipSlotFlags, ClipSlotId, DeviceId, DeviceInfo, Notifier, QuantizeSettings, SceneId,
    Session, SessionError, SlotEvent, Subject, SubscriptionId, TrackId, TrackInfo,
    TransportFlags,
};
use crate::config::{SessionConfig, TrackConfig};

/// A mutation applied through the [`Session`] API, recorded for inspection
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    SelectTrack(TrackId),
    SelectScene(SceneId),
    SelectDevice(DeviceId),
    FireClip { slot: ClipSlotId, force_legato: bool },
    StopClip(ClipSlotId),
    DeleteClip(ClipSlotId),
    DuplicateClipTo { source: ClipSlotId, destination: ClipSlotId },
    DuplicateClipSlot { track: TrackId, index: usize },
    FireScene(SceneId),
    DeleteScene(usize),
    DuplicateScene(usize),
    Undo,
    Redo,
    SessionRecord(bool),
    CaptureMidi,
    Quantize(QuantizeSettings),
    ImplicitArm { track: TrackId, armed: bool },
    StepBank { device: DeviceId, delta: i32 },
}

/// A parameter bank of a simulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankSpec {
    pub name: String,
    pub parameters: Vec<String>,
}

struct SlotEntry {
    id: ClipSlotId,
    flags: ClipSlotFlags,
}

struct DeviceEntry {
    id: DeviceId,
    name: String,
    banks: Vec<BankSpec>,
    bank: usize,
}

struct TrackEntry {
    id: TrackId,
    info: TrackInfo,
    armed: bool,
    slots: Vec<SlotEntry>,
    devices: Vec<DeviceEntry>,
    selected_device: Option<DeviceId>,
}

struct Inner {
    next_id: u64,
    tracks: Vec<TrackEntry>,
    returns: Vec<TrackEntry>,
    master: TrackEntry,
    scenes: Vec<SceneId>,
    selected_track: Option<TrackId>,
    selected_scene: Option<SceneId>,
    transport: TransportFlags,
    session_record: bool,
    subscriptions: HashMap<SubscriptionId, (Subject, Notifier)>,
    mutations: Vec<Mutation>,
}

/// Subjects fired by one mutation
type Fired = Vec<Subject>;

impl Inner {
    fn mint(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn new_track(&mut self, name: &str, color: u32, with_slots: bool) -> TrackEntry {
        let id = TrackId(self.mint());
        let slots = if with_slots {
            (0..self.scenes.len())
                .map(|_| SlotEntry {
                    id: ClipSlotId(self.mint()),
                    flags: ClipSlotFlags::default(),
                })
                .collect()
        } else {
            Vec::new()
        };
        TrackEntry {
            id,
            info: TrackInfo {
                name: name.to_string(),
                color,
                has_midi_input: true,
            },
            armed: false,
            slots,
            devices: Vec::new(),
            selected_device: None,
        }
    }

    fn all_tracks(&self) -> impl Iterator<Item = &TrackEntry> {
        self.tracks
            .iter()
            .chain(self.returns.iter())
            .chain(std::iter::once(&self.master))
    }

    fn track(&self, id: TrackId) -> Option<&TrackEntry> {
        self.all_tracks().find(|t| t.id == id)
    }

    fn track_mut(&mut self, id: TrackId) -> Option<&mut TrackEntry> {
        if self.master.id == id {
            return Some(&mut self.master);
        }
        self.tracks
            .iter_mut()
            .chain(self.returns.iter_mut())
            .find(|t| t.id == id)
    }

    fn slot_position(&self, slot: ClipSlotId) -> Option<(usize, usize)> {
        self.tracks.iter().enumerate().find_map(|(t, track)| {
            track
                .slots
                .iter()
                .position(|s| s.id == slot)
                .map(|s| (t, s))
        })
    }

    fn slot_mut(&mut self, slot: ClipSlotId) -> Result<&mut SlotEntry, SessionError> {
        let (t, s) = self
            .slot_position(slot)
            .ok_or_else(|| SessionError::UnknownEntity(format!("{:?}", slot)))?;
        Ok(&mut self.tracks[t].slots[s])
    }

    fn device(&self, device: DeviceId) -> Option<&DeviceEntry> {
        self.all_tracks()
            .flat_map(|t| t.devices.iter())
            .find(|d| d.id == device)
    }

    fn device_owner(&self, device: DeviceId) -> Option<TrackId> {
        self.all_tracks()
            .find(|t| t.devices.iter().any(|d| d.id == device))
            .map(|t| t.id)
    }

    /// Replace the flags of a slot and report which subjects fired
    fn set_flags(&mut self, slot: ClipSlotId, flags: ClipSlotFlags) -> Result<Fired, SessionError> {
        let entry = self.slot_mut(slot)?;
        let before = entry.flags;
        entry.flags = flags;

        let mut fired = Vec::new();
        if before.has_clip != flags.has_clip {
            fired.push(Subject::ClipSlot(slot, SlotEvent::HasClip));
        }
        if before.is_triggered != flags.is_triggered || before.is_playing != flags.is_playing {
            fired.push(Subject::ClipSlot(slot, SlotEvent::IsTriggered));
        }
        Ok(fired)
    }

    fn insert_scene(&mut self, at: usize) -> SceneId {
        let scene = SceneId(self.mint());
        self.scenes.insert(at, scene);
        for t in 0..self.tracks.len() {
            let id = ClipSlotId(self.mint());
            self.tracks[t].slots.insert(
                at,
                SlotEntry {
                    id,
                    flags: ClipSlotFlags::default(),
                },
            );
        }
        scene
    }

    fn notifiers_for(&self, fired: &[Subject]) -> Vec<(Subject, Notifier)> {
        let mut pending = Vec::new();
        for subject in fired {
            for (registered, notifier) in self.subscriptions.values() {
                if registered == subject {
                    pending.push((*subject, notifier.clone()));
                }
            }
        }
        pending
    }
}

/// Thread-safe in-memory [`Session`]
pub struct MemorySession {
    inner: Mutex<Inner>,
}

impl MemorySession {
    /// Create an empty session with `scene_count` scenes and a master track
    pub fn new(scene_count: usize) -> Self {
        let mut next_id = 0;
        let mut mint = || {
            next_id += 1;
            next_id
        };
        let scenes: Vec<SceneId> = (0..scene_count).map(|_| SceneId(mint())).collect();
        let master = TrackEntry {
            id: TrackId(mint()),
            info: TrackInfo {
                name: "Master".to_string(),
                color: 0,
                has_midi_input: false,
            },
            armed: false,
            slots: Vec::new(),
            devices: Vec::new(),
            selected_device: None,
        };

        Self {
            inner: Mutex::new(Inner {
                next_id,
                tracks: Vec::new(),
                returns: Vec::new(),
                master,
                selected_scene: scenes.first().copied(),
                scenes,
                selected_track: None,
                transport: TransportFlags::default(),
                session_record: false,
                subscriptions: HashMap::new(),
                mutations: Vec::new(),
            }),
        }
    }

    /// Build a session from the `session` section of the configuration
    pub fn from_config(config: &SessionConfig) -> Self {
        let session = Self::new(config.scenes);

        let build = |track: TrackId, spec: &TrackConfig| {
            for index in &spec.clips {
                let _ = session.set_slot_flags_at(track, *index, ClipSlotFlags::with_clip());
            }
            for device in &spec.devices {
                let banks = device
                    .banks
                    .iter()
                    .map(|b| BankSpec {
                        name: b.name.clone(),
                        parameters: b.parameters.clone(),
                    })
                    .collect();
                session.add_device(track, &device.name, banks);
            }
            session.set_midi_input(track, spec.midi_input);
        };

        for spec in &config.tracks {
            let track = session.add_track(&spec.name, spec.color);
            build(track, spec);
        }
        for spec in &config.return_tracks {
            let track = session.add_return_track(&spec.name, spec.color);
            build(track, spec);
        }
        if let Some(spec) = &config.master {
            let master = session.master_track();
            session.set_track_info(master, &spec.name, spec.color);
            build(master, spec);
        }

        if let Some(first) = session.tracks().first() {
            let _ = session.select_track(*first);
        }
        session.clear_mutations();
        session
    }

    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Inner) -> Result<(R, Fired), SessionError>,
    ) -> Result<R, SessionError> {
        let (result, pending) = {
            let mut inner = self.inner.lock();
            let (result, fired) = f(&mut *inner)?;
            (result, inner.notifiers_for(&fired))
        };
        for (subject, notifier) in pending {
            notifier(subject);
        }
        Ok(result)
    }

    fn record(inner: &mut Inner, mutation: Mutation) {
        debug!("Session mutation: {:?}", mutation);
        inner.mutations.push(mutation);
    }

    // ----- simulation controls -----

    /// Append a regular track with one empty slot per scene
    pub fn add_track(&self, name: &str, color: u32) -> TrackId {
        self.mutate(|inner| {
            let track = inner.new_track(name, color, true);
            let id = track.id;
            inner.tracks.push(track);
            Ok((id, vec![Subject::Tracks]))
        })
        .unwrap_or(TrackId(0))
    }

    /// Remove a regular track, moving the selection if it pointed there
    pub fn remove_track(&self, track: TrackId) -> Result<(), SessionError> {
        self.mutate(|inner| {
            let pos = inner
                .tracks
                .iter()
                .position(|t| t.id == track)
                .ok_or_else(|| SessionError::UnknownEntity(format!("{:?}", track)))?;
            inner.tracks.remove(pos);

            let mut fired = vec![Subject::Tracks];
            if inner.selected_track == Some(track) {
                inner.selected_track = inner.tracks.first().map(|t| t.id);
                fired.push(Subject::SelectedTrack);
            }
            Ok(((), fired))
        })
    }

    pub fn add_return_track(&self, name: &str, color: u32) -> TrackId {
        self.mutate(|inner| {
            let track = inner.new_track(name, color, false);
            let id = track.id;
            inner.returns.push(track);
            Ok((id, Vec::new()))
        })
        .unwrap_or(TrackId(0))
    }

    pub fn set_track_info(&self, track: TrackId, name: &str, color: u32) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.track_mut(track) {
            entry.info.name = name.to_string();
            entry.info.color = color;
        }
    }

    pub fn set_midi_input(&self, track: TrackId, has_midi_input: bool) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.track_mut(track) {
            entry.info.has_midi_input = has_midi_input;
        }
    }

    pub fn add_device(&self, track: TrackId, name: &str, banks: Vec<BankSpec>) -> DeviceId {
        let mut inner = self.inner.lock();
        let id = DeviceId(inner.mint());
        if let Some(entry) = inner.track_mut(track) {
            entry.devices.push(DeviceEntry {
                id,
                name: name.to_string(),
                banks,
                bank: 0,
            });
        }
        id
    }

    pub fn add_scene(&self) -> SceneId {
        let mut inner = self.inner.lock();
        let at = inner.scenes.len();
        inner.insert_scene(at)
    }

    /// Overwrite the flags of a slot, firing has-clip/is-triggered subjects
    pub fn set_slot_flags(&self, slot: ClipSlotId, flags: ClipSlotFlags) -> Result<(), SessionError> {
        self.mutate(|inner| Ok(((), inner.set_flags(slot, flags)?)))
    }

    pub fn set_slot_flags_at(
        &self,
        track: TrackId,
        scene_index: usize,
        flags: ClipSlotFlags,
    ) -> Result<(), SessionError> {
        let slot = self
            .slot_at(track, scene_index)
            .ok_or_else(|| SessionError::UnknownEntity(format!("{:?}[{}]", track, scene_index)))?;
        self.set_slot_flags(slot, flags)
    }

    /// Change undo/redo availability. Polled by the bridge, so nothing fires.
    pub fn set_transport_flags(&self, flags: TransportFlags) {
        self.inner.lock().transport = flags;
    }

    pub fn slot_at(&self, track: TrackId, scene_index: usize) -> Option<ClipSlotId> {
        self.clip_slots(track).get(scene_index).copied()
    }

    pub fn is_armed(&self, track: TrackId) -> bool {
        self.inner.lock().track(track).map(|t| t.armed).unwrap_or(false)
    }

    /// Total number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    /// Number of live subscriptions for one subject
    pub fn subscribers(&self, subject: Subject) -> usize {
        self.inner
            .lock()
            .subscriptions
            .values()
            .filter(|(s, _)| *s == subject)
            .count()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.inner.lock().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.inner.lock().mutations.clear();
    }
}

impl Session for MemorySession {
    fn tracks(&self) -> Vec<TrackId> {
        self.inner.lock().tracks.iter().map(|t| t.id).collect()
    }

    fn return_tracks(&self) -> Vec<TrackId> {
        self.inner.lock().returns.iter().map(|t| t.id).collect()
    }

    fn master_track(&self) -> TrackId {
        self.inner.lock().master.id
    }

    fn track_info(&self, track: TrackId) -> Option<TrackInfo> {
        self.inner.lock().track(track).map(|t| t.info.clone())
    }

    fn clip_slots(&self, track: TrackId) -> Vec<ClipSlotId> {
        self.inner
            .lock()
            .track(track)
            .map(|t| t.slots.iter().map(|s| s.id).collect())
            .unwrap_or_default()
    }

    fn clip_slot_flags(&self, slot: ClipSlotId) -> Option<ClipSlotFlags> {
        let inner = self.inner.lock();
        inner
            .slot_position(slot)
            .map(|(t, s)| inner.tracks[t].slots[s].flags)
    }

    fn scenes(&self) -> Vec<SceneId> {
        self.inner.lock().scenes.clone()
    }

    fn devices(&self, track: TrackId) -> Vec<DeviceId> {
        self.inner
            .lock()
            .track(track)
            .map(|t| t.devices.iter().map(|d| d.id).collect())
            .unwrap_or_default()
    }

    fn device_info(&self, device: DeviceId) -> Option<DeviceInfo> {
        let inner = self.inner.lock();
        let entry = inner.device(device)?;
        let bank = entry.banks.get(entry.bank);
        Some(DeviceInfo {
            name: entry.name.clone(),
            bank_name: bank.map(|b| b.name.clone()).unwrap_or_default(),
            bank_names: entry.banks.iter().map(|b| b.name.clone()).collect(),
            parameter_names: bank.map(|b| b.parameters.clone()).unwrap_or_default(),
        })
    }

    fn transport_flags(&self) -> TransportFlags {
        self.inner.lock().transport
    }

    fn session_record(&self) -> bool {
        self.inner.lock().session_record
    }

    fn selected_track(&self) -> Option<TrackId> {
        self.inner.lock().selected_track
    }

    fn selected_scene(&self) -> Option<SceneId> {
        self.inner.lock().selected_scene
    }

    fn selected_device(&self, track: TrackId) -> Option<DeviceId> {
        self.inner.lock().track(track).and_then(|t| t.selected_device)
    }

    fn select_track(&self, track: TrackId) -> Result<(), SessionError> {
        self.mutate(|inner| {
            if inner.track(track).is_none() {
                return Err(SessionError::UnknownEntity(format!("{:?}", track)));
            }
            Self::record(inner, Mutation::SelectTrack(track));
            let changed = inner.selected_track != Some(track);
            inner.selected_track = Some(track);
            let fired = if changed { vec![Subject::SelectedTrack] } else { Vec::new() };
            Ok(((), fired))
        })
    }

    fn select_scene(&self, scene: SceneId) -> Result<(), SessionError> {
        self.mutate(|inner| {
            if !inner.scenes.contains(&scene) {
                return Err(SessionError::UnknownEntity(format!("{:?}", scene)));
            }
            Self::record(inner, Mutation::SelectScene(scene));
            let changed = inner.selected_scene != Some(scene);
            inner.selected_scene = Some(scene);
            let fired = if changed { vec![Subject::SelectedScene] } else { Vec::new() };
            Ok(((), fired))
        })
    }

    fn select_device(&self, device: DeviceId) -> Result<(), SessionError> {
        self.mutate(|inner| {
            let owner = inner
                .device_owner(device)
                .ok_or_else(|| SessionError::UnknownEntity(format!("{:?}", device)))?;
            Self::record(inner, Mutation::SelectDevice(device));
            let is_selected_track = inner.selected_track == Some(owner);
            if let Some(track) = inner.track_mut(owner) {
                track.selected_device = Some(device);
            }
            let fired = if is_selected_track { vec![Subject::SelectedDevice] } else { Vec::new() };
            Ok(((), fired))
        })
    }

    fn subscribe(
        &self,
        subject: Subject,
        notifier: Notifier,
    ) -> Result<SubscriptionId, SessionError> {
        let mut inner = self.inner.lock();
        if let Subject::ClipSlot(slot, _) = subject {
            if inner.slot_position(slot).is_none() {
                return Err(SessionError::UnknownEntity(format!("{:?}", slot)));
            }
        }
        let id = SubscriptionId(inner.mint());
        inner.subscriptions.insert(id, (subject, notifier));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), SessionError> {
        self.inner
            .lock()
            .subscriptions
            .remove(&id)
            .map(|_| ())
            .ok_or(SessionError::UnknownSubscription(id))
    }

    fn fire_clip(&self, slot: ClipSlotId, force_legato: bool) -> Result<(), SessionError> {
        self.mutate(|inner| {
            let mut flags = inner.slot_mut(slot)?.flags;
            Self::record(inner, Mutation::FireClip { slot, force_legato });
            if flags.has_clip {
                flags.is_playing = true;
                flags.is_triggered = false;
            }
            Ok(((), inner.set_flags(slot, flags)?))
        })
    }

    fn stop_clip(&self, slot: ClipSlotId) -> Result<(), SessionError> {
        self.mutate(|inner| {
            let mut flags = inner.slot_mut(slot)?.flags;
            Self::record(inner, Mutation::StopClip(slot));
            flags.is_playing = false;
            flags.is_triggered = false;
            Ok(((), inner.set_flags(slot, flags)?))
        })
    }

    fn delete_clip(&self, slot: ClipSlotId) -> Result<(), SessionError> {
        self.mutate(|inner| {
            inner.slot_mut(slot)?;
            Self::record(inner, Mutation::DeleteClip(slot));
            Ok(((), inner.set_flags(slot, ClipSlotFlags::default())?))
        })
    }

    fn duplicate_clip_to(
        &self,
        source: ClipSlotId,
        destination: ClipSlotId,
    ) -> Result<(), SessionError> {
        self.mutate(|inner| {
            let copied = inner.slot_mut(source)?.flags;
            inner.slot_mut(destination)?;
            Self::record(inner, Mutation::DuplicateClipTo { source, destination });
            let flags = ClipSlotFlags {
                has_clip: copied.has_clip,
                ..ClipSlotFlags::default()
            };
            Ok(((), inner.set_flags(destination, flags)?))
        })
    }

    fn duplicate_clip_slot(&self, track: TrackId, index: usize) -> Result<usize, SessionError> {
        self.mutate(|inner| {
            let t = inner
                .tracks
                .iter()
                .position(|e| e.id == track)
                .ok_or_else(|| SessionError::UnknownEntity(format!("{:?}", track)))?;
            let has_clip = inner.tracks[t]
                .slots
                .get(index)
                .map(|s| s.flags.has_clip)
                .unwrap_or(false);
            if !has_clip {
                return Err(SessionError::Rejected(format!("no clip at slot {}", index)));
            }
            Self::record(inner, Mutation::DuplicateClipSlot { track, index });

            let free = inner.tracks[t]
                .slots
                .iter()
                .enumerate()
                .skip(index + 1)
                .find(|(_, s)| !s.flags.has_clip)
                .map(|(i, _)| i);
            let target = match free {
                Some(i) => i,
                None => {
                    inner.insert_scene(index + 1);
                    index + 1
                }
            };
            let slot = inner.tracks[t].slots[target].id;
            let fired = inner.set_flags(slot, ClipSlotFlags::with_clip())?;
            Ok((target, fired))
        })
    }

    fn fire_scene(&self, scene: SceneId) -> Result<(), SessionError> {
        self.mutate(|inner| {
            let index = inner
                .scenes
                .iter()
                .position(|s| *s == scene)
                .ok_or_else(|| SessionError::UnknownEntity(format!("{:?}", scene)))?;
            Self::record(inner, Mutation::FireScene(scene));
            let slots: Vec<ClipSlotId> = inner
                .tracks
                .iter()
                .filter_map(|t| t.slots.get(index))
                .filter(|s| s.flags.has_clip)
                .map(|s| s.id)
                .collect();
            let mut fired = Vec::new();
            for slot in slots {
                let flags = ClipSlotFlags {
                    is_playing: true,
                    ..ClipSlotFlags::with_clip()
                };
                fired.extend(inner.set_flags(slot, flags)?);
            }
            Ok(((), fired))
        })
    }

    fn delete_scene(&self, index: usize) -> Result<(), SessionError> {
        self.mutate(|inner| {
            if index >= inner.scenes.len() {
                return Err(SessionError::UnknownEntity(format!("scene {}", index)));
            }
            Self::record(inner, Mutation::DeleteScene(index));
            let removed = inner.scenes.remove(index);
            for track in inner.tracks.iter_mut() {
                if index < track.slots.len() {
                    track.slots.remove(index);
                }
            }
            let mut fired = Vec::new();
            if inner.selected_scene == Some(removed) {
                let next = index.min(inner.scenes.len().saturating_sub(1));
                inner.selected_scene = inner.scenes.get(next).copied();
                fired.push(Subject::SelectedScene);
            }
            Ok(((), fired))
        })
    }

    fn duplicate_scene(&self, index: usize) -> Result<(), SessionError> {
        self.mutate(|inner| {
            if index >= inner.scenes.len() {
                return Err(SessionError::UnknownEntity(format!("scene {}", index)));
            }
            Self::record(inner, Mutation::DuplicateScene(index));
            let scene = inner.insert_scene(index + 1);
            for track in inner.tracks.iter_mut() {
                let has_clip = track.slots[index].flags.has_clip;
                track.slots[index + 1].flags.has_clip = has_clip;
            }
            inner.selected_scene = Some(scene);
            Ok(((), vec![Subject::SelectedScene]))
        })
    }

    fn undo(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        if !inner.transport.can_undo {
            return Err(SessionError::Rejected("nothing to undo".to_string()));
        }
        Self::record(&mut inner, Mutation::Undo);
        inner.transport.can_redo = true;
        Ok(())
    }

    fn redo(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        if !inner.transport.can_redo {
            return Err(SessionError::Rejected("nothing to redo".to_string()));
        }
        Self::record(&mut inner, Mutation::Redo);
        inner.transport.can_undo = true;
        Ok(())
    }

    fn set_session_record(&self, on: bool) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        Self::record(&mut inner, Mutation::SessionRecord(on));
        inner.session_record = on;
        Ok(())
    }

    fn capture_midi(&self) -> Result<(), SessionError> {
        Self::record(&mut self.inner.lock(), Mutation::CaptureMidi);
        Ok(())
    }

    fn quantize_detail_clip(&self, settings: QuantizeSettings) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        let scene_index = inner
            .selected_scene
            .and_then(|scene| inner.scenes.iter().position(|s| *s == scene));
        let has_clip = match (inner.selected_track, scene_index) {
            (Some(track), Some(index)) => inner
                .track(track)
                .and_then(|t| t.slots.get(index))
                .map(|s| s.flags.has_clip)
                .unwrap_or(false),
            _ => false,
        };
        if has_clip {
            Self::record(&mut inner, Mutation::Quantize(settings));
        }
        Ok(())
    }

    fn set_implicit_arm(&self, track: TrackId, armed: bool) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .track_mut(track)
            .ok_or_else(|| SessionError::UnknownEntity(format!("{:?}", track)))?;
        if entry.armed == armed {
            return Ok(());
        }
        entry.armed = armed;
        Self::record(&mut inner, Mutation::ImplicitArm { track, armed });
        Ok(())
    }

    fn step_device_bank(&self, device: DeviceId, delta: i32) -> Result<bool, SessionError> {
        self.mutate(|inner| {
            let owner = inner
                .device_owner(device)
                .ok_or_else(|| SessionError::UnknownEntity(format!("{:?}", device)))?;
            Self::record(inner, Mutation::StepBank { device, delta });
            let is_selected_track = inner.selected_track == Some(owner);
            let mut changed = false;
            if let Some(track) = inner.track_mut(owner) {
                if let Some(entry) = track.devices.iter_mut().find(|d| d.id == device) {
                    let last = entry.banks.len().saturating_sub(1) as i64;
                    let next = (entry.bank as i64 + delta as i64).clamp(0, last) as usize;
                    changed = next != entry.bank;
                    entry.bank = next;
                }
            }
            let fired = if changed && is_selected_track {
                vec![Subject::SelectedDevice]
            } else {
                Vec::new()
            };
            Ok((changed, fired))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_notifier(counter: Arc<AtomicUsize>) -> Notifier {
        Arc::new(move |_: Subject| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_tracks_get_one_slot_per_scene() {
        let session = MemorySession::new(4);
        let track = session.add_track("Bass", 0xFF0000);
        assert_eq!(session.clip_slots(track).len(), 4);
        assert_eq!(session.tracks(), vec![track]);
    }

    #[test]
    fn test_slot_notification_fires_after_lock_release() {
        let session = Arc::new(MemorySession::new(2));
        let track = session.add_track("Drums", 0);
        let slot = session.slot_at(track, 0).unwrap();

        // Notifier reads back into the session: would deadlock if called under lock
        let reader = session.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let notifier: Notifier = Arc::new(move |subject| {
            if let Subject::ClipSlot(slot, _) = subject {
                if reader.clip_slot_flags(slot).unwrap().has_clip {
                    seen_clone.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        session
            .subscribe(Subject::ClipSlot(slot, SlotEvent::HasClip), notifier)
            .unwrap();

        session.set_slot_flags(slot, ClipSlotFlags::with_clip()).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_unknown_id_fails() {
        let session = MemorySession::new(1);
        let result = session.unsubscribe(SubscriptionId(999));
        assert_eq!(result, Err(SessionError::UnknownSubscription(SubscriptionId(999))));
    }

    #[test]
    fn test_add_track_fires_tracks_subject() {
        let session = MemorySession::new(1);
        let count = Arc::new(AtomicUsize::new(0));
        session
            .subscribe(Subject::Tracks, counting_notifier(count.clone()))
            .unwrap();

        session.add_track("A", 0);
        let b = session.add_track("B", 0);
        session.remove_track(b).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_duplicate_clip_slot_uses_next_free_slot() {
        let session = MemorySession::new(3);
        let track = session.add_track("Keys", 0);
        session.set_slot_flags_at(track, 0, ClipSlotFlags::with_clip()).unwrap();
        session.set_slot_flags_at(track, 1, ClipSlotFlags::with_clip()).unwrap();

        let index = session.duplicate_clip_slot(track, 0).unwrap();
        assert_eq!(index, 2);
        assert_eq!(session.scenes().len(), 3);

        // No free slot left: a scene is inserted below
        let index = session.duplicate_clip_slot(track, 2).unwrap();
        assert_eq!(index, 3);
        assert_eq!(session.scenes().len(), 4);
    }

    #[test]
    fn test_step_bank_clamps() {
        let session = MemorySession::new(1);
        let track = session.add_track("Synth", 0);
        let device = session.add_device(
            track,
            "Operator",
            vec![
                BankSpec { name: "Osc".into(), parameters: vec!["Coarse".into()] },
                BankSpec { name: "Filter".into(), parameters: vec!["Freq".into()] },
            ],
        );

        assert!(session.step_device_bank(device, 5).unwrap());
        assert_eq!(session.device_info(device).unwrap().bank_name, "Filter");
        assert!(!session.step_device_bank(device, 1).unwrap());
        assert!(session.step_device_bank(device, -9).unwrap());
        assert_eq!(session.device_info(device).unwrap().bank_name, "Osc");
    }
}
