//! Subscription lifecycle
//!
//! Tracks every subscription the bridge holds on the session, keyed by the
//! subject it watches, so each (entity, event) pair is registered once and
//! torn down exactly once.

use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::session::{Notifier, Session, SessionError, SlotEvent, Subject, SubscriptionId};

/// Session-wide subjects the bridge always watches
pub const GLOBAL_SUBJECTS: [Subject; 4] = [
    Subject::Tracks,
    Subject::SelectedTrack,
    Subject::SelectedScene,
    Subject::SelectedDevice,
];

const SLOT_EVENTS: [SlotEvent; 2] = [SlotEvent::HasClip, SlotEvent::IsTriggered];

/// Result of a clip-slot re-synchronization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub attached: usize,
    pub detached: usize,
}

/// Every live subscription the bridge holds, one per [`Subject`]
///
/// Attaching a subject that is already registered is a no-op, so re-syncing
/// after a structural change never doubles a listener. Clip-slot subjects
/// follow the current track and scene lists through
/// [`SubscriptionRegistry::sync_clip_slots`]; [`SubscriptionRegistry::release_all`]
/// unsubscribes everything at shutdown.
pub struct SubscriptionRegistry {
    entries: HashMap<Subject, SubscriptionId>,
    notifier: Notifier,
}

impl SubscriptionRegistry {
    /// All subscriptions made through this registry report to `notifier`
    pub fn new(notifier: Notifier) -> Self {
        Self {
            entries: HashMap::new(),
            notifier,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_registered(&self, subject: &Subject) -> bool {
        self.entries.contains_key(subject)
    }

    /// Subscribe to `subject` unless already subscribed.
    /// Returns whether a new subscription was made.
    pub fn attach(&mut self, session: &dyn Session, subject: Subject) -> Result<bool, SessionError> {
        if self.entries.contains_key(&subject) {
            return Ok(false);
        }
        let id = session.subscribe(subject, self.notifier.clone())?;
        self.entries.insert(subject, id);
        Ok(true)
    }

    /// Drop the subscription for `subject`, if any
    pub fn detach(&mut self, session: &dyn Session, subject: &Subject) -> bool {
        let Some(id) = self.entries.remove(subject) else {
            return false;
        };
        if let Err(e) = session.unsubscribe(id) {
            debug!("Subscription for {:?} already gone: {}", subject, e);
        }
        true
    }

    pub fn attach_global(&mut self, session: &dyn Session) -> Result<(), SessionError> {
        for subject in GLOBAL_SUBJECTS {
            self.attach(session, subject)?;
        }
        Ok(())
    }

    /// Bring clip-slot subscriptions in line with the session's current slots
    pub fn sync_clip_slots(&mut self, session: &dyn Session) -> SyncReport {
        let wanted: HashSet<Subject> = session
            .tracks()
            .into_iter()
            .flat_map(|track| session.clip_slots(track))
            .flat_map(|slot| SLOT_EVENTS.map(|event| Subject::ClipSlot(slot, event)))
            .collect();

        let stale: Vec<Subject> = self
            .entries
            .keys()
            .filter(|subject| matches!(subject, Subject::ClipSlot(..)) && !wanted.contains(*subject))
            .copied()
            .collect();

        let mut report = SyncReport::default();
        for subject in &stale {
            if self.detach(session, subject) {
                report.detached += 1;
            }
        }

        for subject in wanted {
            match self.attach(session, subject) {
                Ok(true) => report.attached += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to subscribe to {:?}: {}", subject, e),
            }
        }

        if report != SyncReport::default() {
            debug!(
                "Clip slot listeners: +{} -{} ({} total)",
                report.attached,
                report.detached,
                self.entries.len()
            );
        }
        report
    }

    /// Unsubscribe everything, returns how many subscriptions were released
    pub fn release_all(&mut self, session: &dyn Session) -> usize {
        let released = self.entries.len();
        for (subject, id) in self.entries.drain() {
            if let Err(e) = session.unsubscribe(id) {
                debug!("Subscription for {:?} already gone: {}", subject, e);
            }
        }
        released
    }
}
