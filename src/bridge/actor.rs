//! Bridge actor
//!
//! Owns the [`Bridge`] and serializes everything that touches it: session
//! notifications, controller input, option updates and the periodic poll
//! all go through one `select!` loop.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use super::commands::BridgeCommand;
use super::handle::{notifier_for, BridgeHandle};
use super::{Bridge, BridgeOptions};
use crate::session::Session;
use crate::transport::Transport;

pub struct BridgeActor {
    bridge: Bridge,
    command_rx: mpsc::UnboundedReceiver<BridgeCommand>,
}

fn ticker(period: std::time::Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl BridgeActor {
    /// Spawn the actor on the current runtime and return its handle
    ///
    /// The startup snapshot is sent before any queued command is processed.
    pub fn spawn(
        session: Arc<dyn Session>,
        transport: Arc<dyn Transport>,
        options: BridgeOptions,
    ) -> BridgeHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let notifier = notifier_for(&cmd_tx);

        let actor = BridgeActor {
            bridge: Bridge::new(session, transport, options, notifier),
            command_rx: cmd_rx,
        };
        tokio::spawn(actor.run());

        info!("Bridge actor spawned");
        BridgeHandle::new(cmd_tx)
    }

    async fn run(mut self) {
        debug!("Bridge run loop started");
        self.bridge.startup(Instant::now().into_std());

        let mut interval = ticker(self.bridge.options().poll_interval);

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("All bridge handles dropped");
                        self.bridge.teardown();
                        break;
                    };
                    trace!(?cmd, "Processing command");
                    let now = Instant::now().into_std();

                    match cmd {
                        BridgeCommand::Notify(subject) => self.bridge.on_notify(subject, now),
                        BridgeCommand::Inbound(bytes) => self.bridge.on_inbound(&bytes),
                        BridgeCommand::UpdateOptions(options) => {
                            let reset = options.poll_interval != self.bridge.options().poll_interval;
                            self.bridge.apply_options(options, now);
                            if reset {
                                interval = ticker(self.bridge.options().poll_interval);
                            }
                        }
                        BridgeCommand::Resync => self.bridge.resync(now),
                        BridgeCommand::PollNow { response } => {
                            self.bridge.poll(now);
                            let _ = response.send(());
                        }
                        BridgeCommand::Flush { response } => {
                            let _ = response.send(());
                        }
                        BridgeCommand::GetStats { response } => {
                            let _ = response.send(self.bridge.stats());
                        }
                        BridgeCommand::Shutdown { response } => {
                            let released = self.bridge.teardown();
                            let _ = response.send(released);
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    self.bridge.poll(Instant::now().into_std());
                }
            }
        }

        debug!("Bridge run loop exited");
    }
}
