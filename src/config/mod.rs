//! Configuration management for the MicroPush bridge
//!
//! Handles loading, parsing, and hot-reloading of YAML configuration files.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::fs;

use crate::controls::ControlBindings;

pub use watcher::{ConfigUpdate, ConfigWatcher};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    pub midi: MidiConfig,
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub controls: ControlBindings,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Controller port configuration (substring match on port names)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MidiConfig {
    pub input_port: String,
    pub output_port: String,
}

/// Synchronization engine settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BridgeSettings {
    /// Fallback poll interval for the change detector
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Device id byte written into every outbound frame
    #[serde(default = "default_device_id")]
    pub device_id: u8,
}

impl BridgeSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            device_id: default_device_id(),
        }
    }
}

/// Initial content of the simulated session
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_scene_count")]
    pub scenes: usize,
    #[serde(default)]
    pub tracks: Vec<TrackConfig>,
    #[serde(default)]
    pub return_tracks: Vec<TrackConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master: Option<TrackConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scenes: default_scene_count(),
            tracks: Vec::new(),
            return_tracks: Vec::new(),
            master: None,
        }
    }
}

/// A simulated track
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TrackConfig {
    pub name: String,
    /// Packed 0xRRGGBB
    #[serde(default)]
    pub color: u32,
    /// Scene indices holding a clip
    #[serde(default)]
    pub clips: Vec<usize>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default = "default_true")]
    pub midi_input: bool,
}

/// A simulated device
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(default)]
    pub banks: Vec<BankConfig>,
}

/// A parameter bank of a simulated device
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BankConfig {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<String>,
}

impl BridgeConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::parse(&contents)
            .with_context(|| format!("Invalid config file: {}", path))?;

        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: BridgeConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.midi.input_port.is_empty() {
            anyhow::bail!("MIDI input_port cannot be empty");
        }
        if self.midi.output_port.is_empty() {
            anyhow::bail!("MIDI output_port cannot be empty");
        }

        if self.bridge.poll_interval_ms < 10 {
            anyhow::bail!(
                "bridge.poll_interval_ms is {} (must be at least 10)",
                self.bridge.poll_interval_ms
            );
        }
        if self.bridge.device_id > 0x7F {
            anyhow::bail!(
                "bridge.device_id 0x{:02X} is not a 7-bit value",
                self.bridge.device_id
            );
        }

        self.controls.validate().context("Invalid control bindings")?;

        let mut names = HashSet::new();
        for (idx, track) in self.session.tracks.iter().enumerate() {
            if track.name.is_empty() {
                anyhow::bail!("Track {} name cannot be empty", idx);
            }
            if !names.insert(track.name.as_str()) {
                anyhow::bail!("Duplicate track name '{}'", track.name);
            }
            for clip in &track.clips {
                if *clip >= self.session.scenes {
                    anyhow::bail!(
                        "Track '{}' has a clip in scene {} but only {} scenes exist",
                        track.name,
                        clip,
                        self.session.scenes
                    );
                }
            }
        }
        for track in self.session.tracks.iter().chain(&self.session.return_tracks) {
            if track.color > 0xFF_FFFF {
                anyhow::bail!("Track '{}' color 0x{:X} exceeds 24 bits", track.name, track.color);
            }
        }

        Ok(())
    }
}

// Default value functions
fn default_poll_interval_ms() -> u64 { 300 }
fn default_device_id() -> u8 { 0x01 }
fn default_scene_count() -> usize { 8 }
fn default_true() -> bool { true }
