//! File watcher that triggers configuration reloads.
//!
//! Watches the directories holding the file sources of a layer chain and
//! emits reload events through a tokio watch channel when one of those
//! files (or any `.toml`/`.yaml`/`.yml` file in an explicitly watched
//! directory) changes. Debouncing coalesces rapid successive writes.

use super::engine::ConfigEngine;
use super::loader::LayerSource;
use crate::error::EngineError;
use notify::Watcher;
use notify::RecommendedWatcher;
use notify_debouncer_mini::{DebouncedEventKind, Debouncer, new_debouncer};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Event types emitted when configuration files change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigChangeEvent {
    ConfigFile(PathBuf),
    /// Multiple files changed in quick succession
    BatchChange(Vec<PathBuf>),
    /// Watcher encountered an error
    Error(String),
}

impl ConfigChangeEvent {
    /// Returns true if this event requires a config reload.
    pub fn requires_reload(&self) -> bool {
        !matches!(self, ConfigChangeEvent::Error(_))
    }

    pub fn affected_paths(&self) -> Vec<&Path> {
        match self {
            ConfigChangeEvent::ConfigFile(p) => vec![p.as_path()],
            ConfigChangeEvent::BatchChange(paths) => paths.iter().map(|p| p.as_path()).collect(),
            ConfigChangeEvent::Error(_) => vec![],
        }
    }
}

/// Configuration for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce duration for coalescing rapid changes.
    pub debounce_duration: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(500),
        }
    }
}

/// What to watch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchPaths {
    /// Individual configuration files. Their parent directories are watched
    /// so files created after startup are picked up.
    pub files: Vec<PathBuf>,
    /// Directories in which any configuration document counts.
    pub dirs: Vec<PathBuf>,
}

impl WatchPaths {
    /// Watch every file named by a source chain.
    pub fn from_sources(sources: &[LayerSource]) -> Self {
        Self {
            files: sources
                .iter()
                .filter_map(LayerSource::path)
                .map(Path::to_path_buf)
                .collect(),
            dirs: Vec::new(),
        }
    }

    /// Directories handed to the OS watcher, deduplicated.
    fn watch_dirs(&self) -> BTreeSet<PathBuf> {
        let parents = self.files.iter().map(|f| match f.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        });
        parents.chain(self.dirs.iter().cloned()).collect()
    }
}

/// Handle to control the config watcher. Dropping it stops the OS watch
/// and ends the event pump.
pub struct ConfigWatcherHandle {
    /// Receiver for config change events.
    pub events: watch::Receiver<Option<ConfigChangeEvent>>,
    /// Owns the OS watch; its event sender is the pump's only input.
    _debouncer: Option<Debouncer<RecommendedWatcher>>,
    _task_handle: tokio::task::JoinHandle<()>,
}

impl ConfigWatcherHandle {
    /// Wait for the next config change event. `None` once the watcher stops.
    pub async fn wait_for_change(&mut self) -> Option<ConfigChangeEvent> {
        loop {
            if self.events.changed().await.is_err() {
                return None;
            }
            let event = self.events.borrow_and_update().clone();
            if event.is_some() {
                return event;
            }
        }
    }

    /// Get the latest event without waiting.
    pub fn latest_event(&self) -> Option<ConfigChangeEvent> {
        self.events.borrow().clone()
    }
}

/// Starts the configuration file watcher. Must be called inside a tokio
/// runtime.
pub fn start_config_watcher(paths: WatchPaths, config: WatcherConfig) -> Result<ConfigWatcherHandle, notify::Error> {
    let (event_tx, event_rx) = watch::channel(None);
    let (notify_tx, notify_rx) = mpsc::channel();

    let mut debouncer = new_debouncer(config.debounce_duration, notify_tx)?;
    let watcher = debouncer.watcher();

    for dir in paths.watch_dirs() {
        if dir.exists() {
            info!("Watching config directory: {}", dir.display());
            watcher.watch(&dir, notify::RecursiveMode::NonRecursive)?;
        } else {
            warn!("Config directory does not exist, skipping watch: {}", dir.display());
        }
    }

    let task_handle = tokio::task::spawn_blocking(move || {
        process_notify_events(notify_rx, event_tx, &paths);
    });

    Ok(ConfigWatcherHandle {
        events: event_rx,
        _debouncer: Some(debouncer),
        _task_handle: task_handle,
    })
}

fn process_notify_events(
    rx: mpsc::Receiver<Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>>,
    tx: watch::Sender<Option<ConfigChangeEvent>>,
    paths: &WatchPaths,
) {
    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                let changed: Vec<PathBuf> = events
                    .into_iter()
                    .filter(|e| matches!(e.kind, DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous))
                    .map(|e| e.path)
                    .collect();
                if let Some(event) = classify_paths(changed, paths) {
                    debug!("Config change detected: {:?}", event);
                    if tx.send(Some(event)).is_err() {
                        info!("Config watcher receiver dropped, stopping");
                        return;
                    }
                }
            }
            Ok(Err(e)) => {
                error!("File watcher error: {}", e);
                let _ = tx.send(Some(ConfigChangeEvent::Error(e.to_string())));
            }
            Err(_) => {
                info!("Config watcher channel closed, stopping");
                return;
            }
        }
    }
}

/// Collapse a batch of changed paths into at most one event.
fn classify_paths(changed: Vec<PathBuf>, paths: &WatchPaths) -> Option<ConfigChangeEvent> {
    let mut relevant: Vec<PathBuf> = changed
        .into_iter()
        .filter(|p| is_config_path(p, paths))
        .collect();
    relevant.sort();
    relevant.dedup();

    match relevant.len() {
        0 => None,
        1 => relevant.pop().map(ConfigChangeEvent::ConfigFile),
        _ => Some(ConfigChangeEvent::BatchChange(relevant)),
    }
}

fn is_config_path(path: &Path, paths: &WatchPaths) -> bool {
    if paths.files.iter().any(|f| same_file(f, path)) {
        return true;
    }
    let is_document = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("toml") | Some("yaml") | Some("yml")
    );
    is_document && paths.dirs.iter().any(|d| path.starts_with(d))
}

/// Notify reports absolute paths; sources may be relative.
fn same_file(configured: &Path, reported: &Path) -> bool {
    if configured == reported {
        return true;
    }
    match (configured.file_name(), reported.file_name()) {
        (Some(a), Some(b)) if a == b => {
            configured.is_relative() && reported.ends_with(configured)
        }
        _ => false,
    }
}

/// Reload `engine` from `sources` on every change until the watcher stops.
///
/// Rejected reloads are logged and leave the previous snapshot active.
/// Returns the engine when the watcher shuts down.
pub async fn run_reload_loop(
    mut engine: ConfigEngine,
    sources: Vec<LayerSource>,
    mut watcher: ConfigWatcherHandle,
) -> ConfigEngine {
    while let Some(event) = watcher.wait_for_change().await {
        if !event.requires_reload() {
            warn!("Ignoring watcher event: {:?}", event);
            continue;
        }
        info!(paths = ?event.affected_paths(), "Reloading configuration");
        match engine.reload_sources(&sources) {
            Ok(_) => {}
            Err(EngineError::Invalid(report)) => crate::logging::log_report(&report),
            Err(e) => error!("Configuration reload failed: {}", e),
        }
    }
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigTier;

    #[test]
    fn test_classify_configured_file() {
        let paths = WatchPaths {
            files: vec![PathBuf::from("/etc/robot/robot-agent.toml")],
            dirs: vec![],
        };
        let event = classify_paths(vec![PathBuf::from("/etc/robot/robot-agent.toml")], &paths);
        assert!(matches!(event, Some(ConfigChangeEvent::ConfigFile(_))));
    }

    #[test]
    fn test_classify_relative_source_against_absolute_event() {
        let paths = WatchPaths {
            files: vec![PathBuf::from("robot-agent.toml")],
            dirs: vec![],
        };
        let event = classify_paths(vec![PathBuf::from("/home/robot/ws/robot-agent.toml")], &paths);
        assert!(event.is_some());
    }

    #[test]
    fn test_classify_ignores_unrelated_files() {
        let paths = WatchPaths {
            files: vec![PathBuf::from("/etc/robot/robot-agent.toml")],
            dirs: vec![PathBuf::from("/etc/robot/conf.d")],
        };
        assert!(classify_paths(vec![PathBuf::from("/etc/robot/notes.txt")], &paths).is_none());
        assert!(classify_paths(vec![PathBuf::from("/etc/robot/other.toml")], &paths).is_none());
        assert!(classify_paths(vec![PathBuf::from("/etc/robot/conf.d/README.md")], &paths).is_none());
    }

    #[test]
    fn test_classify_batch() {
        let paths = WatchPaths {
            files: vec![],
            dirs: vec![PathBuf::from("/etc/robot/conf.d")],
        };
        let event = classify_paths(
            vec![
                PathBuf::from("/etc/robot/conf.d/a.toml"),
                PathBuf::from("/etc/robot/conf.d/b.yaml"),
                PathBuf::from("/etc/robot/conf.d/a.toml"),
            ],
            &paths,
        );
        match event {
            Some(ConfigChangeEvent::BatchChange(p)) => assert_eq!(p.len(), 2),
            other => panic!("expected batch, got {:?}", other),
        }
    }

    #[test]
    fn test_event_requires_reload() {
        assert!(ConfigChangeEvent::ConfigFile(PathBuf::new()).requires_reload());
        assert!(ConfigChangeEvent::BatchChange(vec![]).requires_reload());
        assert!(!ConfigChangeEvent::Error("test".to_string()).requires_reload());
    }

    #[test]
    fn test_watch_paths_from_sources() {
        let sources = vec![
            LayerSource::Embedded,
            LayerSource::OptionalFile {
                path: PathBuf::from("robot-agent.toml"),
                tier: ConfigTier::Project,
            },
            LayerSource::OptionalFile {
                path: PathBuf::from("/home/robot/.config/robot-agent/config.toml"),
                tier: ConfigTier::User,
            },
            LayerSource::Env {
                prefix: "ROBOT_AGENT".to_string(),
            },
        ];
        let paths = WatchPaths::from_sources(&sources);
        assert_eq!(paths.files.len(), 2);

        let dirs = paths.watch_dirs();
        assert!(dirs.contains(&PathBuf::from(".")));
        assert!(dirs.contains(&PathBuf::from("/home/robot/.config/robot-agent")));
    }

    #[tokio::test]
    async fn test_reload_loop_returns_engine_when_watcher_stops() {
        let (tx, rx) = watch::channel(None);
        let watcher = ConfigWatcherHandle {
            events: rx,
            _debouncer: None,
            _task_handle: tokio::spawn(async {}),
        };
        let mut engine = ConfigEngine::default();
        engine.load_sources(&[LayerSource::Embedded]).unwrap();
        engine.commit().unwrap();

        let sources = vec![LayerSource::Embedded];
        let task = tokio::spawn(run_reload_loop(engine, sources, watcher));
        tx.send(Some(ConfigChangeEvent::ConfigFile(PathBuf::from("robot-agent.toml"))))
            .unwrap();
        tokio::task::yield_now().await;
        drop(tx);

        let engine = task.await.unwrap();
        assert!(engine.snapshot().is_some());
        assert!(engine.generation() >= 1);
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_event_pump() {
        let temp = tempfile::TempDir::new().unwrap();
        let paths = WatchPaths {
            files: vec![],
            dirs: vec![temp.path().to_path_buf()],
        };
        let handle = start_config_watcher(
            paths,
            WatcherConfig {
                debounce_duration: Duration::from_millis(50),
            },
        )
        .unwrap();

        let mut events = handle.events.clone();
        drop(handle);

        // The pump owns the only sender; it closes once the debouncer is gone.
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            while events.changed().await.is_ok() {}
        })
        .await;
        assert!(closed.is_ok(), "event pump still running after handle drop");
    }
}
