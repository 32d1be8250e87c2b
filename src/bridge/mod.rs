//! Synchronization engine
//!
//! [`Bridge`] is the context object holding everything the engine needs:
//! change-detector caches, subscriptions, quantize settings and bindings. It
//! is owned by a single tokio task ([`actor::BridgeActor`]), so none of its
//! state is shared. Outside code talks to it through [`BridgeHandle`].

pub mod actor;
pub mod commands;
pub mod handle;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::controls::ControlBindings;
use crate::detector::{ChangeDetector, GridThrottle};
use crate::dispatch::{self, Outcome, Refresh};
use crate::listeners::SubscriptionRegistry;
use crate::midi::{format_hex, MidiMessage};
use crate::protocol::{decode_command, Frame, FrameEncoder, SYSEX_START};
use crate::session::{Notifier, QuantizeSettings, Session, SessionError, Subject};
use crate::snapshot;
use crate::transport::Transport;

pub use actor::BridgeActor;
pub use commands::BridgeCommand;
pub use handle::BridgeHandle;

/// Runtime settings of the bridge, hot-reloadable
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeOptions {
    pub poll_interval: Duration,
    pub device_id: u8,
    pub bindings: ControlBindings,
}

impl BridgeOptions {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            poll_interval: config.bridge.poll_interval(),
            device_id: config.bridge.device_id,
            bindings: config.controls.clone(),
        }
    }
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(300),
            device_id: crate::protocol::DEFAULT_DEVICE_ID,
            bindings: ControlBindings::default(),
        }
    }
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub messages_sent: u64,
    pub send_failures: u64,
    pub polls: u64,
    pub commands_applied: u64,
    pub commands_discarded: u64,
    pub protocol_errors: u64,
}

/// Synchronization engine between one session and one controller
///
/// # Architecture
///
/// ```text
/// session notifications ──┐
/// controller bytes ───────┼──► Bridge ──► Transport (SysEx / short messages)
/// poll ticks ─────────────┘      │
///                                └──► Session (dispatched commands)
/// ```
///
/// Notifications trigger targeted snapshots. Clip-slot pushes go through the
/// [`GridThrottle`]; the poll tick catches whatever was deferred along with
/// the transport-flag edges. Each change produces its frames once: a command
/// that makes the session notify leaves the echo to the notification.
pub struct Bridge {
    session: Arc<dyn Session>,
    transport: Arc<dyn Transport>,
    encoder: FrameEncoder,
    detector: ChangeDetector,
    registry: SubscriptionRegistry,
    throttle: GridThrottle,
    options: BridgeOptions,
    quantize: QuantizeSettings,
    stats: BridgeStats,
}

impl Bridge {
    /// `notifier` is handed to the session for every subscription
    pub fn new(
        session: Arc<dyn Session>,
        transport: Arc<dyn Transport>,
        options: BridgeOptions,
        notifier: Notifier,
    ) -> Self {
        Self {
            session,
            transport,
            encoder: FrameEncoder::new(options.device_id),
            detector: ChangeDetector::new(),
            registry: SubscriptionRegistry::new(notifier),
            throttle: GridThrottle::new(options.poll_interval),
            options,
            quantize: QuantizeSettings::default(),
            stats: BridgeStats::default(),
        }
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Subscribe to the session and send the full state
    pub fn startup(&mut self, now: Instant) {
        if let Err(e) = self.registry.attach_global(self.session.as_ref()) {
            warn!("Failed to subscribe to session: {}", e);
        }
        self.registry.sync_clip_slots(self.session.as_ref());
        let device_selected = self.follow_track_selection();

        info!(
            "🔗 Bridge started via '{}': {} tracks, {} scenes, {} subscriptions",
            self.transport.name(),
            self.session.tracks().len(),
            self.session.scenes().len(),
            self.registry.len()
        );

        // a device picked here arrives as SelectedDevice
        self.send_snapshot(!device_selected);
        self.poll(now);
    }

    /// Mixer and selection, used at startup and on resync
    fn send_snapshot(&mut self, with_device: bool) {
        let session = self.session.as_ref();
        let mut frames = snapshot::mixer_frames(session, &self.encoder);
        if with_device {
            frames.extend(snapshot::selection_frames(session, &self.encoder));
        } else {
            frames.extend(snapshot::track_and_scene_frames(session, &self.encoder));
        }
        self.send_frames(frames);
    }

    /// Re-send everything the controller shows, grid included
    pub fn resync(&mut self, now: Instant) {
        info!("Resynchronizing controller");
        self.detector.invalidate_grid();
        self.send_snapshot(true);
        self.poll(now);
    }

    /// Full poll: transport edges and grid, never throttled
    pub fn poll(&mut self, now: Instant) {
        self.stats.polls += 1;
        self.throttle.record_run(now);

        let output = self.detector.poll(self.session.as_ref(), &self.encoder);
        for message in output.transport {
            self.send_message(&message);
        }
        if let Some(update) = output.grid {
            self.send_frame(&update.frame);
            if update.shape_changed {
                self.registry.sync_clip_slots(self.session.as_ref());
            }
        }
    }

    /// Grid only, subject to the push throttle
    fn push_grid(&mut self, now: Instant) {
        if !self.throttle.allow(now) {
            debug!("Grid update deferred to next poll");
            return;
        }
        if let Some(update) = self.detector.poll_grid(self.session.as_ref(), &self.encoder) {
            self.send_frame(&update.frame);
            if update.shape_changed {
                self.registry.sync_clip_slots(self.session.as_ref());
            }
        }
    }

    /// React to a session notification
    pub fn on_notify(&mut self, subject: Subject, now: Instant) {
        match subject {
            Subject::Tracks => {
                debug!("Track list changed");
                self.registry.sync_clip_slots(self.session.as_ref());
                self.detector.invalidate_grid();
                self.send_snapshot(true);
                self.push_grid(now);
            }
            Subject::SelectedTrack => {
                let frames = if self.follow_track_selection() {
                    snapshot::track_and_scene_frames(self.session.as_ref(), &self.encoder)
                } else {
                    snapshot::selection_frames(self.session.as_ref(), &self.encoder)
                };
                self.send_frames(frames);
            }
            Subject::SelectedScene => {
                let frame = snapshot::scene_frame(self.session.as_ref(), &self.encoder);
                self.send_frame(&frame);
            }
            Subject::SelectedDevice => {
                let frames = snapshot::device_frames(self.session.as_ref(), &self.encoder);
                self.send_frames(frames);
            }
            Subject::ClipSlot(..) => self.push_grid(now),
        }
    }

    /// Handle bytes received from the controller
    pub fn on_inbound(&mut self, bytes: &[u8]) {
        debug!("Received: {}", format_hex(bytes));

        if bytes.first() == Some(&SYSEX_START) {
            match decode_command(bytes) {
                Ok(command) => {
                    let outcome = dispatch::dispatch_command(self.session.as_ref(), &command);
                    self.record_outcome(outcome);
                }
                Err(e) => {
                    self.stats.protocol_errors += 1;
                    warn!("Dropping controller frame: {}", e);
                }
            }
            return;
        }

        let Some(message) = MidiMessage::parse(bytes) else {
            debug!("Ignoring unparseable MIDI: {}", format_hex(bytes));
            return;
        };
        let Some(command) = self.options.bindings.resolve(&message) else {
            return;
        };
        let outcome =
            dispatch::dispatch_control(self.session.as_ref(), &mut self.quantize, command);
        match self.record_outcome(outcome) {
            Some(Refresh::Scene) => {
                let frame = snapshot::scene_frame(self.session.as_ref(), &self.encoder);
                self.send_frame(&frame);
            }
            Some(Refresh::Device) => {
                let frames = snapshot::device_frames(self.session.as_ref(), &self.encoder);
                self.send_frames(frames);
            }
            None => {}
        }
    }

    fn record_outcome(&mut self, outcome: Result<Outcome, SessionError>) -> Option<Refresh> {
        match outcome {
            Ok(Outcome::Applied) => {
                self.stats.commands_applied += 1;
                None
            }
            Ok(Outcome::AppliedWith(refresh)) => {
                self.stats.commands_applied += 1;
                Some(refresh)
            }
            Ok(Outcome::Discarded(_)) => {
                self.stats.commands_discarded += 1;
                None
            }
            Err(e) => {
                warn!("Session rejected command: {}", e);
                None
            }
        }
    }

    /// Apply reloaded options. A new device id re-sends everything.
    pub fn apply_options(&mut self, options: BridgeOptions, now: Instant) {
        let device_changed = options.device_id != self.options.device_id;
        if options.poll_interval != self.options.poll_interval {
            info!(
                "Poll interval {:?} → {:?}",
                self.options.poll_interval, options.poll_interval
            );
        }
        self.throttle.set_interval(options.poll_interval);
        self.encoder = FrameEncoder::new(options.device_id);
        self.options = options;

        if device_changed {
            self.resync(now);
        }
    }

    /// Release every subscription, returns how many were held
    pub fn teardown(&mut self) -> usize {
        let released = self.registry.release_all(self.session.as_ref());
        info!("Bridge stopped, released {} subscriptions", released);
        released
    }

    /// Implicit arm and first-device select. True when a device was selected.
    fn follow_track_selection(&self) -> bool {
        dispatch::follow_track_selection(self.session.as_ref()).unwrap_or_else(|e| {
            warn!("Session call failed: {}", e);
            false
        })
    }

    fn send_frames(&mut self, frames: Vec<Frame>) {
        for frame in &frames {
            self.send_frame(frame);
        }
    }

    fn send_frame(&mut self, frame: &Frame) {
        debug!("→ {}", frame);
        self.send_bytes(&frame.to_bytes());
    }

    fn send_message(&mut self, message: &MidiMessage) {
        debug!("→ {}", message);
        self.send_bytes(&message.encode());
    }

    fn send_bytes(&mut self, bytes: &[u8]) {
        match self.transport.send_frame(bytes) {
            Ok(()) => self.stats.messages_sent += 1,
            Err(e) => {
                self.stats.send_failures += 1;
                warn!("Send to '{}' failed: {}", self.transport.name(), e);
            }
        }
    }
}
