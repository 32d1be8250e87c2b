//! MicroPush bridge
//!
//! Keeps a MicroPush controller in sync with a clip-launching session: the
//! session state is encoded into SysEx display frames, controller commands
//! and bound buttons are decoded and applied back to the session.

pub mod bridge;
pub mod config;
pub mod controller;
pub mod controls;
pub mod detector;
pub mod dispatch;
pub mod error;
pub mod index;
pub mod listeners;
pub mod midi;
pub mod protocol;
pub mod session;
pub mod sniffer;
pub mod snapshot;
pub mod transport;

pub use bridge::{BridgeHandle, BridgeOptions, BridgeStats};
pub use config::BridgeConfig;
pub use session::{MemorySession, Session};
