//! Messages accepted by the bridge actor

use tokio::sync::oneshot;

use super::{BridgeOptions, BridgeStats};
use crate::session::Subject;

/// Commands for the bridge actor
///
/// Notifications, inbound bytes and option updates are fire-and-forget.
/// The remaining commands answer on a oneshot channel once processed, which
/// also tells the caller that everything queued before them has run.
#[derive(Debug)]
pub enum BridgeCommand {
    /// A subscribed session subject fired
    Notify(Subject),

    /// Raw bytes from the controller (SysEx command frame or short message)
    Inbound(Vec<u8>),

    /// Hot-reloaded settings
    UpdateOptions(BridgeOptions),

    /// Re-send everything the controller displays
    Resync,

    /// Run a full poll now
    PollNow { response: oneshot::Sender<()> },

    /// Round trip through the queue without doing anything
    Flush { response: oneshot::Sender<()> },

    GetStats { response: oneshot::Sender<BridgeStats> },

    /// Release all subscriptions and stop; answers with the released count
    Shutdown { response: oneshot::Sender<usize> },
}
