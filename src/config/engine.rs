//! Configuration lifecycle and the reload-safe snapshot handle.
//!
//! `Unloaded -> Merged` on [`ConfigEngine::load_layers`];
//! `Merged -> Resolved` on a [`ConfigEngine::commit`] whose validation is
//! clean. A failed commit leaves the engine in `Merged` with the report
//! available, and the previously published snapshot stays in effect.
//!
//! Snapshots are published through an `ArcSwapOption`, so readers holding a
//! [`ConfigHandle`] never lock and never observe a partially built config.

use super::loader::{ConfigLoader, LayerSource};
use super::merge::load_layers;
use super::resolve::Resolver;
use super::schema::SchemaRegistry;
use super::types::ResolvedConfig;
use super::validate::validate;
use crate::error::{EngineError, ValidationReport};
use arc_swap::ArcSwapOption;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle state of a [`ConfigEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unloaded,
    Merged,
    Resolved,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lifecycle::Unloaded => write!(f, "unloaded"),
            Lifecycle::Merged => write!(f, "merged"),
            Lifecycle::Resolved => write!(f, "resolved"),
        }
    }
}

/// Read-only, cheaply cloneable access to the active snapshot.
#[derive(Clone, Default)]
pub struct ConfigHandle {
    active: Arc<ArcSwapOption<ResolvedConfig>>,
}

impl ConfigHandle {
    /// The active snapshot, or `None` before the first successful commit.
    pub fn current(&self) -> Option<Arc<ResolvedConfig>> {
        self.active.load_full()
    }

    pub fn is_ready(&self) -> bool {
        self.active.load().is_some()
    }

    fn publish(&self, snapshot: Arc<ResolvedConfig>) {
        self.active.store(Some(snapshot));
    }
}

impl std::fmt::Debug for ConfigHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigHandle")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Owns the merge/validate/resolve process and is the only producer of
/// [`ResolvedConfig`] snapshots.
#[derive(Debug)]
pub struct ConfigEngine {
    registry: Arc<SchemaRegistry>,
    resolver: Resolver,
    state: Lifecycle,
    merged: Option<Value>,
    last_report: ValidationReport,
    generation: u64,
    handle: ConfigHandle,
}

impl Default for ConfigEngine {
    fn default() -> Self {
        Self::new(SchemaRegistry::builtin())
    }
}

impl ConfigEngine {
    pub fn new(registry: SchemaRegistry) -> Self {
        let registry = Arc::new(registry);
        Self {
            resolver: Resolver::new(Arc::clone(&registry)),
            registry,
            state: Lifecycle::Unloaded,
            merged: None,
            last_report: ValidationReport::new(),
            generation: 0,
            handle: ConfigHandle::default(),
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    /// Merged tree from the last `load_layers`, before defaults.
    pub fn merged(&self) -> Option<&Value> {
        self.merged.as_ref()
    }

    /// Report from the last commit. Empty after a successful one.
    pub fn last_report(&self) -> &ValidationReport {
        &self.last_report
    }

    /// Number of snapshots published so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Handle for consumers. All handles see every later publication.
    pub fn handle(&self) -> ConfigHandle {
        self.handle.clone()
    }

    pub fn snapshot(&self) -> Option<Arc<ResolvedConfig>> {
        self.handle.current()
    }

    /// Merge an ordered sequence of raw trees, lowest priority first.
    pub fn load_layers(&mut self, layers: Vec<Value>) -> &Value {
        let count = layers.len();
        self.state = Lifecycle::Merged;
        debug!(layers = count, "Merged configuration layers");
        self.merged.insert(load_layers(layers))
    }

    /// Read every source and merge the results.
    pub fn load_sources(&mut self, sources: &[LayerSource]) -> Result<&Value, EngineError> {
        let loader = ConfigLoader::load_sources(sources.to_vec())?;
        Ok(self.load_layers(loader.trees()))
    }

    /// Validate the merged tree and, if clean, resolve and publish a new
    /// snapshot. On failure nothing is published.
    pub fn commit(&mut self) -> Result<Arc<ResolvedConfig>, EngineError> {
        let merged = self.merged.as_ref().ok_or(EngineError::NotLoaded)?;

        let report = validate(merged, &self.registry);
        if !report.is_ok() {
            warn!(violations = report.len(), "Configuration rejected");
            self.last_report = report.clone();
            return Err(EngineError::Invalid(report));
        }

        let resolved = match self.resolver.resolve(merged) {
            Ok(resolved) => Arc::new(resolved),
            Err(e) => {
                warn!(error = %e, "Configuration could not be resolved");
                let mut failed = ValidationReport::new();
                failed.push(e.violation());
                self.last_report = failed;
                return Err(e.into());
            }
        };
        self.last_report = report;
        self.generation += 1;
        self.handle.publish(Arc::clone(&resolved));
        self.state = Lifecycle::Resolved;
        info!(generation = self.generation, "Published configuration snapshot");
        Ok(resolved)
    }

    /// Start over from `Unloaded` with new layers. The new snapshot replaces
    /// the active one only if it validates.
    pub fn reload(&mut self, layers: Vec<Value>) -> Result<Arc<ResolvedConfig>, EngineError> {
        self.state = Lifecycle::Unloaded;
        self.load_layers(layers);
        self.commit()
            .inspect_err(|e| warn!(error = %e, "Reload rejected; keeping previous configuration"))
    }

    /// [`reload`](Self::reload) from sources. A source that cannot be read
    /// also leaves the previous snapshot in effect.
    pub fn reload_sources(&mut self, sources: &[LayerSource]) -> Result<Arc<ResolvedConfig>, EngineError> {
        let loader = ConfigLoader::load_sources(sources.to_vec())
            .inspect_err(|e| warn!(error = %e, "Reload rejected; keeping previous configuration"))?;
        self.reload(loader.trees())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelRole;
    use crate::error::ViolationKind;
    use serde_json::json;

    fn base() -> Value {
        json!({
            "vendor": {"simple_model": "ollama", "complex_model": "ollama", "embeddings_model": "ollama"},
            "ollama": {
                "simple_model": "llama3.2",
                "complex_model": "llama3.1:70b",
                "embeddings_model": "llama3.2"
            }
        })
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut engine = ConfigEngine::default();
        assert_eq!(engine.state(), Lifecycle::Unloaded);
        assert!(matches!(engine.commit(), Err(EngineError::NotLoaded)));

        engine.load_layers(vec![base()]);
        assert_eq!(engine.state(), Lifecycle::Merged);

        engine.commit().unwrap();
        assert_eq!(engine.state(), Lifecycle::Resolved);
        assert_eq!(engine.generation(), 1);
        assert!(engine.last_report().is_ok());
    }

    #[test]
    fn test_invalid_commit_stays_merged() {
        let mut engine = ConfigEngine::default();
        let mut tree = base();
        tree["vendor"]["simple_model"] = json!("gcp");
        engine.load_layers(vec![tree]);

        let err = engine.commit().unwrap_err();
        assert_eq!(err.report().unwrap().count(ViolationKind::UnknownVendor), 1);
        assert_eq!(engine.state(), Lifecycle::Merged);
        assert!(engine.snapshot().is_none());
        assert!(!engine.handle().is_ready());
        assert_eq!(engine.generation(), 0);
    }

    #[test]
    fn test_handle_sees_new_snapshot_after_reload() {
        let mut engine = ConfigEngine::default();
        let handle = engine.handle();
        engine.load_layers(vec![base()]);
        engine.commit().unwrap();
        let first = handle.current().unwrap();

        engine
            .reload(vec![base(), json!({"ollama": {"simple_model": "qwen2.5"}})])
            .unwrap();
        let second = handle.current().unwrap();

        assert_eq!(first.model(ModelRole::Simple).model, "llama3.2");
        assert_eq!(second.model(ModelRole::Simple).model, "qwen2.5");
        assert_eq!(engine.generation(), 2);
    }

    #[test]
    fn test_failed_reload_keeps_previous_snapshot() {
        let mut engine = ConfigEngine::default();
        let handle = engine.handle();
        engine.load_layers(vec![base()]);
        let good = engine.commit().unwrap();

        let err = engine
            .reload(vec![base(), json!({"asr": {"vad_threshold": 7.0}})])
            .unwrap_err();
        assert_eq!(err.report().unwrap().count(ViolationKind::RangeViolation), 1);
        assert_eq!(engine.state(), Lifecycle::Merged);
        assert_eq!(engine.last_report().len(), 1);

        let current = handle.current().unwrap();
        assert!(Arc::ptr_eq(&good, &current));
        assert_eq!(engine.generation(), 1);
    }

    #[test]
    fn test_unused_gated_field_of_any_type_commits() {
        let mut engine = ConfigEngine::default();
        engine.load_layers(vec![
            base(),
            json!({"asr": {"vad_threshold": 7.0}}),
        ]);
        assert!(engine.commit().is_err());
        assert!(!engine.last_report().is_ok());

        engine.load_layers(vec![
            base(),
            json!({"asr": {"use_wake_word": false, "wake_word_model": 42}}),
        ]);
        assert!(validate(engine.merged().unwrap(), engine.registry()).is_ok());
        let resolved = engine.commit().unwrap();
        assert_eq!(resolved.asr().wake_word_model, None);
        assert_eq!(engine.state(), Lifecycle::Resolved);
        assert!(engine.last_report().is_ok());
    }

    #[test]
    fn test_resolve_failure_is_recorded_in_report() {
        // A registry without the asr section lets a malformed asr table
        // through validation; the typed projection still rejects it.
        let mut registry = SchemaRegistry::builtin();
        registry.register_section("asr", Vec::new());
        let mut engine = ConfigEngine::new(registry);
        engine.load_layers(vec![base(), json!({"asr": {"vad_threshold": "loud"}})]);

        let err = engine.commit().unwrap_err();
        assert!(matches!(err, EngineError::Resolve(_)));
        assert_eq!(engine.state(), Lifecycle::Merged);
        assert_eq!(engine.last_report().len(), 1);
        let v = engine.last_report().find("asr").unwrap();
        assert_eq!(v.kind, ViolationKind::TypeMismatch);
    }

    #[test]
    fn test_reload_sources_keeps_snapshot_on_unreadable_source() {
        let mut engine = ConfigEngine::default();
        engine.load_sources(&[LayerSource::Embedded]).unwrap();
        let good = engine.commit().unwrap();

        let temp = tempfile::TempDir::new().unwrap();
        let broken = temp.path().join("broken.toml");
        std::fs::write(&broken, "[vendor\n").unwrap();
        let result = engine.reload_sources(&[
            LayerSource::Embedded,
            LayerSource::File {
                path: broken,
                tier: crate::config::ConfigTier::Project,
            },
        ]);
        assert!(matches!(result, Err(EngineError::Load(_))));
        assert!(Arc::ptr_eq(&good, &engine.snapshot().unwrap()));
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let mut engine = ConfigEngine::default();
        let handle = engine.handle();
        engine.load_layers(vec![base()]);
        engine.commit().unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let snap = handle.current().unwrap();
                        let simple = &snap.model(ModelRole::Simple).model;
                        let complex = &snap.model(ModelRole::Complex).model;
                        // Both roles are always overridden together below.
                        assert_eq!(simple == "llama3.2", complex == "llama3.1:70b");
                    }
                })
            })
            .collect();

        for i in 0..50 {
            let overlay = if i % 2 == 0 {
                json!({"ollama": {"simple_model": "qwen2.5", "complex_model": "qwen2.5:72b"}})
            } else {
                json!({})
            };
            engine.reload(vec![base(), overlay]).unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
