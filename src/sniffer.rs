//! Controller traffic sniffer
//!
//! Prints everything received on an input port, decoded as bridge protocol:
//! command frames, display frames and bound control messages.

use anyhow::{bail, Result};
use colored::*;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiInputPort};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

use crate::controller::discovery;
use crate::controls::ControlBindings;
use crate::midi::{format_hex, MidiMessage};
use crate::protocol::{decode_command, Frame, SYSEX_START};

/// What a received message means to the bridge
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Controller command frame (fire/delete/copy)
    Command(String),
    /// Display frame, as the bridge would send it
    Display(String),
    /// Short message bound to a control
    Control(String),
    /// Valid MIDI with no meaning to the bridge
    Unbound(String),
    /// Anything that failed to decode, with the reason
    Invalid(String),
}

/// Classify raw bytes from the controller
pub fn decode(bytes: &[u8], bindings: &ControlBindings) -> Decoded {
    if bytes.first() == Some(&SYSEX_START) {
        return match decode_command(bytes) {
            Ok(command) => Decoded::Command(command.to_string()),
            Err(command_err) => match Frame::parse(bytes) {
                Ok(frame) => Decoded::Display(frame.to_string()),
                Err(_) => Decoded::Invalid(command_err.to_string()),
            },
        };
    }

    match MidiMessage::parse(bytes) {
        Some(message) => match bindings.resolve(&message) {
            Some(command) => Decoded::Control(format!("{} => {:?}", message, command)),
            None => Decoded::Unbound(message.to_string()),
        },
        None => Decoded::Invalid("unparseable MIDI".to_string()),
    }
}

/// One received message
#[derive(Debug, Clone)]
pub struct SnifferEvent {
    pub timestamp_ms: u64,
    pub port_name: String,
    pub data: Vec<u8>,
}

/// Monitor the input port matching `pattern` (or a port index) until Ctrl+C
pub async fn run_cli_sniffer(pattern: &str, bindings: ControlBindings) -> Result<()> {
    println!("{}", "=== MicroPush Sniffer ===".bold().cyan());
    println!("Press Ctrl+C to exit\n");

    discovery::print_ports(None);

    let mut sniffer = CliSniffer::new(bindings);
    sniffer.connect_input(pattern)?;

    println!("\n{}", "Monitoring controller traffic...".green());
    println!("{}", "Format: [timestamp] PORT | HEX => DECODED".dimmed());
    println!("{}\n", "─".repeat(80).dimmed());

    sniffer.run().await
}

struct CliSniffer {
    connections: Vec<MidiInputConnection<()>>,
    event_rx: mpsc::Receiver<SnifferEvent>,
    event_tx: mpsc::Sender<SnifferEvent>,
    bindings: ControlBindings,
    start_time: Instant,
}

impl CliSniffer {
    fn new(bindings: ControlBindings) -> Self {
        let (event_tx, event_rx) = mpsc::channel(1000);

        Self {
            connections: Vec::new(),
            event_rx,
            event_tx,
            bindings,
            start_time: Instant::now(),
        }
    }

    fn connect_input(&mut self, pattern: &str) -> Result<()> {
        let mut midi_in = MidiInput::new("MicroPush-Sniffer")?;
        midi_in.ignore(Ignore::None);

        let ports = midi_in.ports();
        let found = match pattern.parse::<usize>() {
            Ok(index) => ports.into_iter().nth(index),
            Err(_) => ports.into_iter().find(|port| {
                midi_in
                    .port_name(port)
                    .map(|name| name.to_lowercase().contains(&pattern.to_lowercase()))
                    .unwrap_or(false)
            }),
        };

        let Some(port) = found else {
            bail!("No input port found matching: {}", pattern)
        };
        let name = midi_in.port_name(&port)?;
        self.connect_port(midi_in, port, &name)
    }

    fn connect_port(&mut self, midi_in: MidiInput, port: MidiInputPort, port_name: &str) -> Result<()> {
        let event_tx = self.event_tx.clone();
        let port_name = port_name.to_string();
        let start_time = self.start_time;

        info!("Connecting to: {}", port_name);

        let conn = midi_in
            .connect(
                &port,
                "Sniffer",
                move |_timestamp, data, _| {
                    let event = SnifferEvent {
                        timestamp_ms: start_time.elapsed().as_millis() as u64,
                        port_name: port_name.clone(),
                        data: data.to_vec(),
                    };
                    let _ = event_tx.try_send(event);
                },
                (),
            )
            .map_err(|e| anyhow::anyhow!("Failed to connect sniffer: {}", e))?;

        self.connections.push(conn);
        Ok(())
    }

    async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                event = self.event_rx.recv() => {
                    let Some(event) = event else { break };
                    self.print_event(&event);
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        println!("\n{}", "Sniffer stopped".yellow());
        Ok(())
    }

    fn print_event(&self, event: &SnifferEvent) {
        let timestamp = format!("{:08}", event.timestamp_ms);
        let port = if event.port_name.len() > 20 {
            format!("{}...", event.port_name.chars().take(17).collect::<String>())
        } else {
            event.port_name.clone()
        };

        let hex = format_hex(&event.data);
        let (hex, decoded) = match decode(&event.data, &self.bindings) {
            Decoded::Command(text) => (hex.bright_magenta(), text.bright_blue()),
            Decoded::Display(text) => (hex.magenta(), text.blue()),
            Decoded::Control(text) => (hex.bright_green(), text.bright_white()),
            Decoded::Unbound(text) => (hex.normal(), text.dimmed()),
            Decoded::Invalid(reason) => (hex.bright_black(), reason.red()),
        };

        println!(
            "[{}ms] {} {:20} | {} => {}",
            timestamp.dimmed(),
            "IN ".green(),
            port.white(),
            hex,
            decoded
        );
    }
}
