//! MicroPush controller ports
//!
//! Opens the controller's MIDI ports through midir. Outbound frames go to the
//! output connection, everything received on the input is forwarded raw to
//! the bridge actor.

use anyhow::{anyhow, Context, Result};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputConnection, MidiOutputPort};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::bridge::BridgeHandle;
use crate::config::MidiConfig;
use crate::error::TransportError;
use crate::midi::format_hex;
use crate::transport::Transport;

const CLIENT_NAME: &str = "MicroPush-Bridge";

/// Case-insensitive substring match on port names
fn matches(name: &str, pattern: &str) -> bool {
    name.to_lowercase().contains(&pattern.to_lowercase())
}

fn find_input_port(midi_in: &MidiInput, pattern: &str) -> Option<(MidiInputPort, String)> {
    midi_in.ports().into_iter().find_map(|port| {
        let name = midi_in.port_name(&port).ok()?;
        matches(&name, pattern).then(|| {
            debug!("Found port '{}' matching pattern '{}'", name, pattern);
            (port, name)
        })
    })
}

fn find_output_port(midi_out: &MidiOutput, pattern: &str) -> Option<(MidiOutputPort, String)> {
    midi_out.ports().into_iter().find_map(|port| {
        let name = midi_out.port_name(&port).ok()?;
        matches(&name, pattern).then(|| {
            debug!("Found port '{}' matching pattern '{}'", name, pattern);
            (port, name)
        })
    })
}

/// The hardware controller, usable as the bridge transport
pub struct Controller {
    name: String,
    input_pattern: String,
    input: Mutex<Option<MidiInputConnection<()>>>,
    output: Mutex<Option<MidiOutputConnection>>,
}

impl Controller {
    /// Open the output port. Input is attached later with [`Controller::listen`],
    /// once the bridge exists.
    pub fn open(config: &MidiConfig) -> Result<Self> {
        let midi_out =
            MidiOutput::new(&format!("{}-Output", CLIENT_NAME)).context("Failed to create MIDI output")?;
        debug!("Found {} MIDI output ports", midi_out.port_count());

        let (port, name) = find_output_port(&midi_out, &config.output_port)
            .ok_or_else(|| anyhow!("Output port '{}' not found", config.output_port))?;

        info!("Connecting to output port: {}", name);
        let output = midi_out
            .connect(&port, CLIENT_NAME)
            .map_err(|e| anyhow!("Failed to connect to output port '{}': {}", name, e))?;

        Ok(Self {
            name,
            input_pattern: config.input_port.clone(),
            input: Mutex::new(None),
            output: Mutex::new(Some(output)),
        })
    }

    /// Forward everything arriving on the input port to the bridge
    pub fn listen(&self, handle: BridgeHandle) -> Result<()> {
        let mut midi_in =
            MidiInput::new(&format!("{}-Input", CLIENT_NAME)).context("Failed to create MIDI input")?;
        // SysEx command frames must come through
        midi_in.ignore(Ignore::None);
        debug!("Found {} MIDI input ports", midi_in.port_count());

        let (port, name) = find_input_port(&midi_in, &self.input_pattern)
            .ok_or_else(|| anyhow!("Input port '{}' not found", self.input_pattern))?;

        info!("Connecting to input port: {}", name);
        let connection = midi_in
            .connect(
                &port,
                CLIENT_NAME,
                move |_timestamp, data, _| handle.handle_midi(data),
                (),
            )
            .map_err(|e| anyhow!("Failed to connect to input port '{}': {}", name, e))?;

        *self.input.lock() = Some(connection);
        Ok(())
    }

    /// Close both ports. Later sends fail with `NotConnected`.
    pub fn disconnect(&self) {
        if let Some(input) = self.input.lock().take() {
            let _ = input.close();
        }
        if let Some(output) = self.output.lock().take() {
            let _ = output.close();
        }
        info!("Controller '{}' disconnected", self.name);
    }
}

impl Transport for Controller {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_frame(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut output = self.output.lock();
        let conn = output
            .as_mut()
            .ok_or_else(|| TransportError::NotConnected(self.name.clone()))?;
        conn.send(bytes)
            .map_err(|e| TransportError::Send(e.to_string()))?;
        debug!("Sent: {}", format_hex(bytes));
        Ok(())
    }
}

/// Port discovery utilities
pub mod discovery {
    use super::*;

    /// Information about a MIDI port
    #[derive(Debug, Clone)]
    pub struct PortInfo {
        pub index: usize,
        pub name: String,
        pub is_virtual: bool,
    }

    fn is_virtual(name: &str) -> bool {
        name.contains("Virtual") || name.contains("loopMIDI") || name.contains("IAC")
    }

    pub fn discover_input_ports() -> Result<Vec<PortInfo>> {
        let midi_in = MidiInput::new(&format!("{}-Discovery", CLIENT_NAME))?;
        Ok(midi_in
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                let name = midi_in.port_name(port).ok()?;
                Some(PortInfo { index, is_virtual: is_virtual(&name), name })
            })
            .collect())
    }

    pub fn discover_output_ports() -> Result<Vec<PortInfo>> {
        let midi_out = MidiOutput::new(&format!("{}-Discovery", CLIENT_NAME))?;
        Ok(midi_out
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                let name = midi_out.port_name(port).ok()?;
                Some(PortInfo { index, is_virtual: is_virtual(&name), name })
            })
            .collect())
    }

    /// Print discovered ports, flagging the ones a config pattern would pick
    pub fn print_ports(config: Option<&MidiConfig>) {
        let mark = |name: &str, pattern: Option<&String>| match pattern {
            Some(p) if matches(name, p) => " <= configured",
            _ => "",
        };

        println!("\n=== MIDI Input Ports ===");
        if let Ok(ports) = discover_input_ports() {
            for port in &ports {
                let virtual_tag = if port.is_virtual { " [VIRTUAL]" } else { "" };
                let pattern = config.map(|c| &c.input_port);
                println!("  {}: {}{}{}", port.index, port.name, virtual_tag, mark(&port.name, pattern));
            }
        }

        println!("\n=== MIDI Output Ports ===");
        if let Ok(ports) = discover_output_ports() {
            for port in &ports {
                let virtual_tag = if port.is_virtual { " [VIRTUAL]" } else { "" };
                let pattern = config.map(|c| &c.output_port);
                println!("  {}: {}{}{}", port.index, port.name, virtual_tag, mark(&port.name, pattern));
            }
        }
        println!();
    }
}
