//! Change detection
//!
//! Caches the last transmitted undo/redo availability and clip-slot grid so a
//! poll only produces output for values that actually changed.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::midi::MidiMessage;
use crate::protocol::{Frame, FrameEncoder};
use crate::session::{ClipSlotFlags, Session, TrackId, TransportFlags};

/// MIDI channel of the transport lights (channel 3, 0-based)
pub const TRANSPORT_CHANNEL: u8 = 2;
pub const UNDO_NOTE: u8 = 0;
pub const REDO_NOTE: u8 = 2;
pub const TRANSPORT_VELOCITY: u8 = 0x64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFlag {
    Undo,
    Redo,
}

impl TransportFlag {
    pub fn note(self) -> u8 {
        match self {
            TransportFlag::Undo => UNDO_NOTE,
            TransportFlag::Redo => REDO_NOTE,
        }
    }
}

/// Note On when the flag became available, Note Off when it went away
pub fn transport_flag_message(flag: TransportFlag, on: bool) -> MidiMessage {
    let (channel, note, velocity) = (TRANSPORT_CHANNEL, flag.note(), TRANSPORT_VELOCITY);
    if on {
        MidiMessage::NoteOn { channel, note, velocity }
    } else {
        MidiMessage::NoteOff { channel, note, velocity }
    }
}

/// A grid frame produced by a poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridUpdate {
    pub frame: Frame,
    /// Track set or slot count differs from the previous emission
    pub shape_changed: bool,
}

/// Everything one poll wants transmitted
#[derive(Debug, Default)]
pub struct PollOutput {
    pub transport: Vec<MidiMessage>,
    pub grid: Option<GridUpdate>,
}

impl PollOutput {
    pub fn is_empty(&self) -> bool {
        self.transport.is_empty() && self.grid.is_none()
    }
}

/// Last transmitted state, diffed against the session on every poll
///
/// The transport cache starts at false/false, so flags already set when the
/// bridge starts are sent on the first poll. The grid cache starts empty and
/// [`ChangeDetector::invalidate_grid`] forces the next grid poll to emit even
/// when nothing differs.
pub struct ChangeDetector {
    transport: TransportFlags,
    order: Vec<TrackId>,
    grid: HashMap<TrackId, Vec<ClipSlotFlags>>,
    force_grid: bool,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeDetector {
    /// Transport lights are assumed off and the first grid poll always emits
    pub fn new() -> Self {
        Self {
            transport: TransportFlags::default(),
            order: Vec::new(),
            grid: HashMap::new(),
            force_grid: true,
        }
    }

    /// Force the next grid poll to emit even if nothing changed
    pub fn invalidate_grid(&mut self) {
        self.force_grid = true;
    }

    /// Number of tracks with a cached grid column
    pub fn cached_tracks(&self) -> usize {
        self.grid.len()
    }

    /// Compare undo/redo availability with the cache, one message per edge
    pub fn poll_transport(&mut self, session: &dyn Session) -> Vec<MidiMessage> {
        let current = session.transport_flags();
        let mut messages = Vec::new();

        if current.can_undo != self.transport.can_undo {
            debug!("can_undo changed to {}", current.can_undo);
            messages.push(transport_flag_message(TransportFlag::Undo, current.can_undo));
        }
        if current.can_redo != self.transport.can_redo {
            debug!("can_redo changed to {}", current.can_redo);
            messages.push(transport_flag_message(TransportFlag::Redo, current.can_redo));
        }

        self.transport = current;
        messages
    }

    /// Pull the full grid and re-serialize it when anything differs
    pub fn poll_grid(&mut self, session: &dyn Session, encoder: &FrameEncoder) -> Option<GridUpdate> {
        let tracks = session.tracks();
        let grid: Vec<Vec<ClipSlotFlags>> = tracks
            .iter()
            .map(|track| {
                session
                    .clip_slots(*track)
                    .iter()
                    .map(|slot| session.clip_slot_flags(*slot).unwrap_or_default())
                    .collect()
            })
            .collect();

        let shape_changed = tracks != self.order
            || tracks
                .iter()
                .zip(&grid)
                .any(|(track, slots)| self.grid.get(track).map(Vec::len) != Some(slots.len()));
        let flags_changed = shape_changed
            || tracks
                .iter()
                .zip(&grid)
                .any(|(track, slots)| self.grid.get(track) != Some(slots));

        if !flags_changed && !self.force_grid {
            trace!("Clip grid unchanged");
            return None;
        }

        self.force_grid = false;
        self.grid = tracks.iter().copied().zip(grid.iter().cloned()).collect();
        self.order = tracks;

        Some(GridUpdate {
            frame: encoder.clip_grid(&grid),
            shape_changed,
        })
    }

    /// Transport edges followed by the grid
    pub fn poll(&mut self, session: &dyn Session, encoder: &FrameEncoder) -> PollOutput {
        PollOutput {
            transport: self.poll_transport(session),
            grid: self.poll_grid(session, encoder),
        }
    }
}

/// Limits push-triggered grid runs to one per poll interval
///
/// A refused run is not queued. The periodic tick always runs a full poll,
/// which picks up whatever changed since.
#[derive(Debug)]
pub struct GridThrottle {
    interval: Duration,
    last_run: Option<Instant>,
}

impl GridThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
        }
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Whether a push-triggered run may happen at `now`
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.last_run {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.record_run(now);
                true
            }
        }
    }

    /// Record a full run (tick or allowed push)
    pub fn record_run(&mut self, now: Instant) {
        self.last_run = Some(now);
    }
}
