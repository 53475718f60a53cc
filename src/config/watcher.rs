//! Config hot reload
//!
//! File events are debounced, the file goes through the normal load path
//! (upgrade included) and the result is compared with the last applied
//! config. Only real changes reach the main loop, tagged with what they
//! touch so a saved-items edit does not reconnect the instance.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::GatewayConfig;

/// Quiet period after the last file event before reloading
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(150);

/// A reloaded config that differs from the one in use
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigChange {
    /// Instance settings changed; the instance has to be reconfigured
    Instance(GatewayConfig),
    /// Only saved actions/feedbacks changed
    Saved(GatewayConfig),
}

impl ConfigChange {
    pub fn config(&self) -> &GatewayConfig {
        match self {
            ConfigChange::Instance(config) | ConfigChange::Saved(config) => config,
        }
    }

    pub fn into_config(self) -> GatewayConfig {
        match self {
            ConfigChange::Instance(config) | ConfigChange::Saved(config) => config,
        }
    }
}

/// What `next` changes relative to `previous`, `None` when nothing applies live
///
/// The simulated tree is only read at startup, so edits to it alone are not
/// a change.
pub fn classify(previous: &GatewayConfig, next: &GatewayConfig) -> Option<ConfigChange> {
    if previous.instance != next.instance {
        Some(ConfigChange::Instance(next.clone()))
    } else if previous.saved != next.saved {
        Some(ConfigChange::Saved(next.clone()))
    } else {
        None
    }
}

/// Watches the config file and yields classified changes
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    changes: mpsc::Receiver<ConfigChange>,
    reloader: JoinHandle<()>,
}

impl ConfigWatcher {
    /// Load `config_path` and start watching it
    ///
    /// The parent directory is watched so editors that save by replacing the
    /// file are still seen.
    pub async fn new(config_path: String, debounce: Duration) -> Result<(Self, GatewayConfig)> {
        let initial = GatewayConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        let path = PathBuf::from(&config_path);
        let file_name: OsString = path
            .file_name()
            .with_context(|| format!("Config path has no file name: {}", config_path))?
            .to_os_string();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // notify runs its callback on its own thread; an unbounded send needs no runtime
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) if touches(&event, &file_name) => {
                    debug!(kind = ?event.kind, "Config file event");
                    let _ = events_tx.send(());
                },
                Ok(_) => {},
                Err(e) => error!("Config watch error: {}", e),
            }
        })?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory: {}", dir.display()))?;

        let (changes_tx, changes) = mpsc::channel(4);
        let reloader = tokio::spawn(reload_loop(
            config_path.clone(),
            events_rx,
            changes_tx,
            initial.clone(),
            debounce,
        ));

        info!("👀 Watching {} for changes", config_path);
        Ok((
            Self {
                _watcher: watcher,
                changes,
                reloader,
            },
            initial,
        ))
    }

    /// Next applicable change; `None` once the watcher stopped
    pub async fn next_change(&mut self) -> Option<ConfigChange> {
        self.changes.recv().await
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.reloader.abort();
    }
}

fn touches(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

async fn reload_loop(
    config_path: String,
    mut events: mpsc::UnboundedReceiver<()>,
    changes: mpsc::Sender<ConfigChange>,
    mut current: GatewayConfig,
    debounce: Duration,
) {
    while events.recv().await.is_some() {
        // One save usually fires several events
        tokio::time::sleep(debounce).await;
        while events.try_recv().is_ok() {}

        if !Path::new(&config_path).exists() {
            debug!("Config file missing (mid-replace?), waiting for the next event");
            continue;
        }
        let next = match GatewayConfig::load(&config_path).await {
            Ok(next) => next,
            Err(e) => {
                warn!("Config reload failed, keeping the current config: {:#}", e);
                continue;
            },
        };
        if next.simulation != current.simulation {
            warn!("Simulation tree changes take effect on restart");
        }
        let Some(change) = classify(&current, &next) else {
            debug!("Config file saved without applicable changes");
            current = next;
            continue;
        };
        current = next;
        if changes.send(change).await.is_err() {
            break;
        }
    }
    debug!("Config reload loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const BASE: &str = r#"
instance:
  host: "10.0.0.5"
  monitoredParams: "1.2"
"#;

    #[test]
    fn test_classify_changes() {
        let base = GatewayConfig::parse(BASE).unwrap();
        assert_eq!(classify(&base, &base.clone()), None);

        let mut moved = base.clone();
        moved.instance.host = Some("10.0.0.6".into());
        assert!(matches!(
            classify(&base, &moved),
            Some(ConfigChange::Instance(c)) if c.instance.host.as_deref() == Some("10.0.0.6")
        ));

        let mut saved = base.clone();
        saved.saved.actions.push(crate::config::SavedAction {
            action_id: "take".into(),
            options: Default::default(),
        });
        assert!(matches!(classify(&base, &saved), Some(ConfigChange::Saved(_))));

        let mut simulated = base.clone();
        simulated.simulation = Some(Default::default());
        assert_eq!(classify(&base, &simulated), None);
    }

    #[tokio::test]
    async fn test_watcher_reports_saved_and_instance_edits() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("ember-gw.yaml");
        fs::write(&config_path, BASE)?;

        let (mut watcher, config) = ConfigWatcher::new(
            config_path.to_string_lossy().to_string(),
            Duration::from_millis(50),
        )
        .await?;
        assert_eq!(config.instance.monitored_paths(), vec!["1.2"]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(
            &config_path,
            format!(
                "{}saved:\n  actions:\n    - actionId: setValueInt\n      options: {{ path: \"1/2\", variable: false, value: \"5\" }}\n",
                BASE
            ),
        )?;
        let change = tokio::time::timeout(Duration::from_secs(2), watcher.next_change())
            .await?
            .context("watcher closed")?;
        let ConfigChange::Saved(saved) = change else {
            panic!("expected a saved-items change, got {:?}", change);
        };
        // Reloads go through the same upgrade as the initial load
        let options = &saved.saved.actions[0].options;
        assert_eq!(options["path"], serde_json::json!("1.2"));
        assert_eq!(options["useVar"], serde_json::json!(false));

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&config_path, BASE.replace("10.0.0.5", "10.0.0.6"))?;
        let change = tokio::time::timeout(Duration::from_secs(2), watcher.next_change())
            .await?
            .context("watcher closed")?;
        assert!(matches!(change, ConfigChange::Instance(_)));
        assert_eq!(change.config().instance.host.as_deref(), Some("10.0.0.6"));

        Ok(())
    }
}
