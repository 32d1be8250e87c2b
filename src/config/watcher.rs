//! Config hot reload
//!
//! Watches the directory holding the config file, since editors often
//! replace the file instead of writing it in place. Bursts of events collapse
//! into one reload, and each reload is turned into the [`BridgeOptions`] the
//! running bridge can take. Port and session changes need a restart.

use anyhow::{anyhow, Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::BridgeConfig;
use crate::bridge::BridgeOptions;

/// Quiet period after the last file event before the config is re-read
const DEBOUNCE: Duration = Duration::from_millis(100);

/// What a reloaded file means for the running bridge
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigUpdate {
    pub options: BridgeOptions,
    /// The `midi` section differs from the one in use
    pub ports_changed: bool,
}

/// Compare two configs. `None` when nothing the bridge can use changed.
pub fn diff(current: &BridgeConfig, next: &BridgeConfig) -> Option<ConfigUpdate> {
    if current.session != next.session {
        warn!("Session changes take effect after restart");
    }

    let options = BridgeOptions::from_config(next);
    let ports_changed = current.midi != next.midi;
    if !ports_changed && options == BridgeOptions::from_config(current) {
        return None;
    }
    Some(ConfigUpdate { options, ports_changed })
}

pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<ConfigUpdate>,
}

impl ConfigWatcher {
    /// Load the config at `config_path` and start watching it
    pub async fn new(config_path: String) -> Result<(Self, Arc<BridgeConfig>)> {
        let initial = BridgeConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        let path = PathBuf::from(&config_path);
        let file_name = path
            .file_name()
            .map(OsStr::to_os_string)
            .ok_or_else(|| anyhow!("Config path '{}' names no file", config_path))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // notify calls back on its own thread, outside the runtime
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if touches(&event, &file_name) => {
                debug!("Config file event: {:?}", event.kind);
                let _ = event_tx.send(());
            }
            Ok(_) => {}
            Err(e) => error!("Watch error: {}", e),
        })?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory: {}", dir.display()))?;

        let (update_tx, rx) = mpsc::channel(4);
        tokio::spawn(reload_loop(config_path.clone(), initial.clone(), event_rx, update_tx));

        info!("Config file watcher started for: {}", config_path);
        Ok((Self { _watcher: watcher, rx }, Arc::new(initial)))
    }

    /// Wait for the next effective change. `None` once the watcher stopped.
    pub async fn next_update(&mut self) -> Option<ConfigUpdate> {
        self.rx.recv().await
    }
}

fn touches(event: &Event, file_name: &OsStr) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name))
}

async fn reload_loop(
    path: String,
    mut current: BridgeConfig,
    mut events: mpsc::UnboundedReceiver<()>,
    updates: mpsc::Sender<ConfigUpdate>,
) {
    while events.recv().await.is_some() {
        while let Ok(Some(())) = tokio::time::timeout(DEBOUNCE, events.recv()).await {}

        let next = match BridgeConfig::load(&path).await {
            Ok(next) => next,
            Err(e) => {
                warn!("Failed to reload config (keeping old config): {:#}", e);
                continue;
            }
        };
        let update = diff(&current, &next);
        current = next;

        let Some(update) = update else {
            debug!("Config rewritten without effective changes");
            continue;
        };
        info!("Configuration reloaded");
        if updates.send(update).await.is_err() {
            break;
        }
    }
    debug!("Config reload loop stopped");
}
