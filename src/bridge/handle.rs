//! Public API of the bridge actor

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::actor::BridgeActor;
use super::commands::BridgeCommand;
use super::{BridgeOptions, BridgeStats};
use crate::session::{Notifier, Session, Subject};
use crate::transport::Transport;

/// Session notifier feeding the actor queue
///
/// Holds a weak sender, so subscriptions left behind in the session do not
/// keep the actor alive.
pub(crate) fn notifier_for(cmd_tx: &mpsc::UnboundedSender<BridgeCommand>) -> Notifier {
    let weak = cmd_tx.downgrade();
    Arc::new(move |subject: Subject| {
        if let Some(tx) = weak.upgrade() {
            let _ = tx.send(BridgeCommand::Notify(subject));
        }
    })
}

/// Cheap, cloneable handle to a running bridge
///
/// Fire-and-forget methods never block. The async methods wait for the actor
/// to process everything queued before them and return `None`/`false` once
/// the actor has stopped.
#[derive(Clone)]
pub struct BridgeHandle {
    cmd_tx: mpsc::UnboundedSender<BridgeCommand>,
}

impl BridgeHandle {
    pub(crate) fn new(cmd_tx: mpsc::UnboundedSender<BridgeCommand>) -> Self {
        Self { cmd_tx }
    }

    pub fn spawn(
        session: Arc<dyn Session>,
        transport: Arc<dyn Transport>,
        options: BridgeOptions,
    ) -> Self {
        BridgeActor::spawn(session, transport, options)
    }

    /// A complete SysEx frame from the controller
    pub fn handle_frame(&self, frame: Vec<u8>) {
        let _ = self.cmd_tx.send(BridgeCommand::Inbound(frame));
    }

    /// Any message from the controller input port
    pub fn handle_midi(&self, bytes: &[u8]) {
        let _ = self.cmd_tx.send(BridgeCommand::Inbound(bytes.to_vec()));
    }

    pub fn update_options(&self, options: BridgeOptions) {
        let _ = self.cmd_tx.send(BridgeCommand::UpdateOptions(options));
    }

    pub fn resync(&self) {
        let _ = self.cmd_tx.send(BridgeCommand::Resync);
    }

    pub async fn poll_now(&self) -> bool {
        let (response, rx) = oneshot::channel();
        if self.cmd_tx.send(BridgeCommand::PollNow { response }).is_err() {
            return false;
        }
        rx.await.is_ok()
    }

    /// Wait until every command queued so far has been processed
    pub async fn flush(&self) -> bool {
        let (response, rx) = oneshot::channel();
        if self.cmd_tx.send(BridgeCommand::Flush { response }).is_err() {
            return false;
        }
        rx.await.is_ok()
    }

    pub async fn stats(&self) -> Option<BridgeStats> {
        let (response, rx) = oneshot::channel();
        self.cmd_tx.send(BridgeCommand::GetStats { response }).ok()?;
        rx.await.ok()
    }

    /// Stop the actor, returns the number of subscriptions released
    pub async fn shutdown(&self) -> Option<usize> {
        let (response, rx) = oneshot::channel();
        self.cmd_tx.send(BridgeCommand::Shutdown { response }).ok()?;
        rx.await.ok()
    }
}
