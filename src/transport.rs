//! Outbound transports
//!
//! The bridge hands complete MIDI messages (SysEx frames and short messages)
//! to a [`Transport`]. Sends are fire-and-forget; a failure is reported back
//! but never retried.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};

use crate::error::TransportError;
use crate::midi::{format_hex, MidiMessage};
use crate::protocol::Frame;

/// Outbound side of the controller connection
///
/// Called from the bridge actor only. Implementations must not block for
/// long; errors are counted by the bridge and the message is dropped.
pub trait Transport: Send + Sync {
    /// Port or sink name used in logs
    fn name(&self) -> &str;

    /// Transmit one complete message
    fn send_frame(&self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Human readable summary of outbound bytes
pub fn describe(bytes: &[u8]) -> String {
    if let Ok(frame) = Frame::parse(bytes) {
        return frame.to_string();
    }
    match MidiMessage::parse(bytes) {
        Some(message) => message.to_string(),
        None => format_hex(bytes),
    }
}

/// Logs every frame instead of sending it (dry runs)
pub struct ConsoleTransport {
    name: String,
    sent: AtomicU64,
}

impl ConsoleTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sent: AtomicU64::new(0),
        }
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_frame(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let count = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        info!("🎛️  [{}] #{} → {}", self.name, count, describe(bytes));
        debug!("[{}] raw: {}", self.name, format_hex(bytes));
        Ok(())
    }
}

/// Keeps every sent message in memory
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Vec<u8>>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail (nothing is recorded while failing)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    /// Drain everything recorded so far
    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Recorded display frames, short messages skipped
    pub fn frames(&self) -> Vec<Frame> {
        self.sent
            .lock()
            .iter()
            .filter_map(|bytes| Frame::parse(bytes).ok())
            .collect()
    }

    /// Recorded short messages, frames skipped
    pub fn short_messages(&self) -> Vec<MidiMessage> {
        self.sent
            .lock()
            .iter()
            .filter_map(|bytes| MidiMessage::parse(bytes))
            .filter(|message| !matches!(message, MidiMessage::SysEx { .. }))
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    fn send_frame(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Send("recording transport set to fail".to_string()));
        }
        self.sent.lock().push(bytes.to_vec());
        Ok(())
    }
}
