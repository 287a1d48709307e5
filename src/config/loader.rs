//! Source loader: reads configuration layers into untyped trees.
//!
//! Layers are applied lowest priority first:
//! 1. **Defaults** - the sample document embedded at build time
//! 2. **Project** - `$ROBOT_AGENT_PROJECT_FILE` or `./robot-agent.toml`
//! 3. **User** - `$ROBOT_AGENT_USER_FILE` or `<config dir>/robot-agent/config.toml`
//! 4. **Environment** - `ROBOT_AGENT__<SECTION>__<KEY>=value`
//!
//! `$ROBOT_AGENT_CONFIG_PATH` replaces tiers 2 and 3 with one explicit file.

use super::merge::load_layers;
use super::validate::join_path;
use crate::error::LoadError;
use serde_json::{Map, Value};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sample configuration compiled into the binary.
pub const EMBEDDED_DEFAULTS: &str = include_str!("../../config/default.toml");

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "ROBOT_AGENT";

/// Separator between path segments in environment override names.
const ENV_SEPARATOR: &str = "__";

/// Configuration tier priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    Defaults = 0,
    Project = 1,
    User = 2,
    Environment = 3,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::Project => write!(f, "project"),
            ConfigTier::User => write!(f, "user"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Document format of a file source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Toml,
    Yaml,
}

impl DocumentFormat {
    /// Pick the format from a file extension. Anything that is not YAML is
    /// read as TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => DocumentFormat::Yaml,
            _ => DocumentFormat::Toml,
        }
    }
}

/// One configuration source in an override chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerSource {
    /// The embedded sample document.
    Embedded,
    /// A file that must exist.
    File { path: PathBuf, tier: ConfigTier },
    /// A file that is skipped when absent.
    OptionalFile { path: PathBuf, tier: ConfigTier },
    /// An in-memory TOML document.
    Inline { name: String, toml: String },
    /// Process environment variables starting with `<prefix>__`.
    Env { prefix: String },
}

impl LayerSource {
    pub fn tier(&self) -> ConfigTier {
        match self {
            LayerSource::Embedded => ConfigTier::Defaults,
            LayerSource::File { tier, .. } | LayerSource::OptionalFile { tier, .. } => *tier,
            LayerSource::Inline { .. } => ConfigTier::Project,
            LayerSource::Env { .. } => ConfigTier::Environment,
        }
    }

    /// Path of the file behind this source, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            LayerSource::File { path, .. } | LayerSource::OptionalFile { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Read this source. Returns `Ok(None)` for an absent optional file.
    pub fn load(&self) -> Result<Option<Layer>, LoadError> {
        let (origin, tree) = match self {
            LayerSource::Embedded => (
                "embedded defaults".to_string(),
                parse_document(EMBEDDED_DEFAULTS, DocumentFormat::Toml, "embedded defaults")?,
            ),
            LayerSource::File { path, .. } => (path.display().to_string(), read_file(path)?),
            LayerSource::OptionalFile { path, .. } => {
                if !path.exists() {
                    debug!("Skipping absent config file {}", path.display());
                    return Ok(None);
                }
                (path.display().to_string(), read_file(path)?)
            }
            LayerSource::Inline { name, toml } => {
                (name.clone(), parse_document(toml, DocumentFormat::Toml, name)?)
            }
            LayerSource::Env { prefix } => (
                format!("environment ({}{}*)", prefix, ENV_SEPARATOR),
                env_layer(utf8_vars(std::env::vars_os()), prefix),
            ),
        };

        debug!(tier = %self.tier(), origin = %origin, "Loaded configuration layer");
        Ok(Some(Layer {
            tier: self.tier(),
            origin,
            tree,
        }))
    }
}

/// A loaded layer with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub tier: ConfigTier,
    /// File path or description of where the layer came from.
    pub origin: String,
    pub tree: Value,
}

/// Read and parse a configuration file.
pub fn read_file(path: &Path) -> Result<Value, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_document(&content, DocumentFormat::from_path(path), &path.display().to_string())
}

/// Parse a document into an untyped tree whose root is a table.
pub fn parse_document(content: &str, format: DocumentFormat, origin: &str) -> Result<Value, LoadError> {
    let value = match format {
        DocumentFormat::Toml => {
            let table: toml::Table = toml::from_str(content).map_err(|source| LoadError::Toml {
                origin: origin.to_string(),
                source,
            })?;
            let mut paths = Vec::new();
            for (key, value) in &table {
                non_finite_toml(value, key, &mut paths);
            }
            reject_non_finite(origin, paths)?;
            serde_json::to_value(table).map_err(|source| LoadError::Convert {
                origin: origin.to_string(),
                source,
            })?
        }
        DocumentFormat::Yaml => {
            let yaml: serde_yaml::Value = serde_yaml::from_str(content).map_err(|source| LoadError::Yaml {
                origin: origin.to_string(),
                source,
            })?;
            let mut paths = Vec::new();
            non_finite_yaml(&yaml, "", &mut paths);
            reject_non_finite(origin, paths)?;
            serde_json::to_value(yaml).map_err(|source| LoadError::Convert {
                origin: origin.to_string(),
                source,
            })?
        }
    };

    match value {
        // Empty or comment-only YAML parses as null.
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(value),
        _ => Err(LoadError::NotATable {
            origin: origin.to_string(),
        }),
    }
}

// The untyped tree cannot hold NaN or infinities; they would silently turn
// into nulls and be replaced by defaults.
fn reject_non_finite(origin: &str, paths: Vec<String>) -> Result<(), LoadError> {
    if paths.is_empty() {
        return Ok(());
    }
    Err(LoadError::NonFinite {
        origin: origin.to_string(),
        paths,
    })
}

fn non_finite_toml(value: &toml::Value, path: &str, found: &mut Vec<String>) {
    match value {
        toml::Value::Float(x) if !x.is_finite() => found.push(path.to_string()),
        toml::Value::Table(table) => {
            for (key, child) in table {
                non_finite_toml(child, &join_path(path, key), found);
            }
        }
        toml::Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                non_finite_toml(child, &format!("{}[{}]", path, i), found);
            }
        }
        _ => {}
    }
}

fn non_finite_yaml(value: &serde_yaml::Value, path: &str, found: &mut Vec<String>) {
    match value {
        serde_yaml::Value::Number(n) if n.as_f64().is_some_and(|x| !x.is_finite()) => {
            found.push(path.to_string())
        }
        serde_yaml::Value::Mapping(map) => {
            for (key, child) in map {
                let key = match key.as_str() {
                    Some(k) => k.to_string(),
                    None => format!("{:?}", key),
                };
                non_finite_yaml(child, &join_path(path, &key), found);
            }
        }
        serde_yaml::Value::Sequence(items) => {
            for (i, child) in items.iter().enumerate() {
                non_finite_yaml(child, &format!("{}[{}]", path, i), found);
            }
        }
        serde_yaml::Value::Tagged(tagged) => non_finite_yaml(&tagged.value, path, found),
        _ => {}
    }
}

/// Process environment as UTF-8 pairs. Variables whose name or value is
/// not UTF-8 cannot carry an override and are skipped.
fn utf8_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Vec<(String, String)> {
    vars.into_iter()
        .filter_map(|(name, value)| match (name.into_string(), value.into_string()) {
            (Ok(name), Ok(value)) => Some((name, value)),
            (name, _) => {
                debug!(name = ?name, "Skipping non-UTF-8 environment variable");
                None
            }
        })
        .collect()
}

/// Build an override tree from environment variables.
///
/// `<PREFIX>__OPENAI__BASE_URL=http://proxy/v1/` becomes
/// `{"openai": {"base_url": "http://proxy/v1/"}}`. Variables are applied in
/// name order so the result does not depend on environment iteration order.
pub fn env_layer(vars: impl IntoIterator<Item = (String, String)>, prefix: &str) -> Value {
    let marker = format!("{}{}", prefix, ENV_SEPARATOR);
    let mut matching: Vec<(Vec<String>, String)> = vars
        .into_iter()
        .filter_map(|(name, raw)| {
            let rest = name.strip_prefix(&marker)?;
            let segments: Vec<String> = rest
                .split(ENV_SEPARATOR)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase)
                .collect();
            (!segments.is_empty()).then_some((segments, raw))
        })
        .collect();
    matching.sort();

    load_layers(
        matching
            .into_iter()
            .map(|(segments, raw)| nest(&segments, parse_env_value(&raw))),
    )
}

fn nest(segments: &[String], leaf: Value) -> Value {
    segments.iter().rev().fold(leaf, |inner, key| {
        let mut map = Map::new();
        map.insert(key.clone(), inner);
        Value::Object(map)
    })
}

/// Booleans and numeric literals are typed; everything else is a string.
fn parse_env_value(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(x) = raw.parse::<f64>()
        && x.is_finite()
        && raw.contains(['.', 'e', 'E'])
    {
        return Value::from(x);
    }
    Value::String(raw.to_string())
}

/// Locations of each configuration tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub include_embedded: bool,
    /// Explicit file replacing the project and user tiers.
    pub explicit_file: Option<PathBuf>,
    pub project_file: Option<PathBuf>,
    pub user_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::discover()
    }
}

impl ConfigPaths {
    /// Discover configuration paths from environment and defaults.
    pub fn discover() -> Self {
        let explicit_file = std::env::var("ROBOT_AGENT_CONFIG_PATH").ok().map(PathBuf::from);

        let project_file = std::env::var("ROBOT_AGENT_PROJECT_FILE")
            .ok()
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from("robot-agent.toml")));

        let user_file = std::env::var("ROBOT_AGENT_USER_FILE")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|d| d.join("robot-agent").join("config.toml")));

        Self {
            include_embedded: true,
            explicit_file,
            project_file,
            user_file,
            env_prefix: Some(ENV_PREFIX.to_string()),
        }
    }

    /// Paths with explicit files and no environment tier.
    pub fn with_files(project_file: Option<PathBuf>, user_file: Option<PathBuf>) -> Self {
        Self {
            include_embedded: true,
            explicit_file: None,
            project_file,
            user_file,
            env_prefix: None,
        }
    }

    /// The ordered source chain, lowest priority first.
    pub fn sources(&self) -> Vec<LayerSource> {
        let mut sources = Vec::new();
        if self.include_embedded {
            sources.push(LayerSource::Embedded);
        }

        if let Some(ref path) = self.explicit_file {
            sources.push(LayerSource::File {
                path: path.clone(),
                tier: ConfigTier::Project,
            });
        } else {
            if let Some(ref path) = self.project_file {
                sources.push(LayerSource::OptionalFile {
                    path: path.clone(),
                    tier: ConfigTier::Project,
                });
            }
            if let Some(ref path) = self.user_file {
                sources.push(LayerSource::OptionalFile {
                    path: path.clone(),
                    tier: ConfigTier::User,
                });
            }
        }

        if let Some(ref prefix) = self.env_prefix {
            sources.push(LayerSource::Env {
                prefix: prefix.clone(),
            });
        }
        sources
    }
}

/// Loads every source of a chain and keeps the layers for diagnostics.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    sources: Vec<LayerSource>,
    layers: Vec<Layer>,
}

impl ConfigLoader {
    /// Load from the discovered default chain.
    pub fn load() -> Result<Self, LoadError> {
        Self::load_with_paths(&ConfigPaths::discover())
    }

    pub fn load_with_paths(paths: &ConfigPaths) -> Result<Self, LoadError> {
        Self::load_sources(paths.sources())
    }

    /// Load an explicit source chain. Any unreadable or unparsable source
    /// fails the whole load.
    pub fn load_sources(sources: Vec<LayerSource>) -> Result<Self, LoadError> {
        let mut layers = Vec::with_capacity(sources.len());
        for source in &sources {
            if let Some(layer) = source.load()? {
                layers.push(layer);
            }
        }
        Ok(Self { sources, layers })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn sources(&self) -> &[LayerSource] {
        &self.sources
    }

    /// Raw trees in priority order, ready for merging.
    pub fn trees(&self) -> Vec<Value> {
        self.layers.iter().map(|l| l.tree.clone()).collect()
    }

    /// Files that contributed a layer.
    pub fn config_files(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter_map(LayerSource::path)
            .filter(|p| p.exists())
            .collect()
    }

    /// All layers merged.
    pub fn merged(&self) -> Value {
        load_layers(self.trees())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_embedded_defaults_parse() {
        let layer = LayerSource::Embedded.load().unwrap().unwrap();
        assert_eq!(layer.tier, ConfigTier::Defaults);
        assert_eq!(layer.tree["openai"]["complex_model"], "gpt-4o-2024-08-06");
        assert_eq!(layer.tree["ollama"]["base_url"], "http://localhost:11434");
        assert_eq!(layer.tree["tracing"]["langfuse"]["use_langfuse"], false);
    }

    #[test]
    fn test_env_layer_nests_and_types_values() {
        let tree = env_layer(
            vars(&[
                ("ROBOT_AGENT__OPENAI__BASE_URL", "http://proxy:8080/v1/"),
                ("ROBOT_AGENT__ASR__VAD_THRESHOLD", "0.45"),
                ("ROBOT_AGENT__TRACING__LANGFUSE__USE_LANGFUSE", "true"),
                ("ROBOT_AGENT__OLLAMA__COMPLEX_MODEL", "llama3.1:70b"),
                ("ROBOT_AGENT_CONFIG_PATH", "/ignored.toml"),
                ("HOME", "/root"),
            ]),
            "ROBOT_AGENT",
        );
        assert_eq!(
            tree,
            json!({
                "openai": {"base_url": "http://proxy:8080/v1/"},
                "asr": {"vad_threshold": 0.45},
                "tracing": {"langfuse": {"use_langfuse": true}},
                "ollama": {"complex_model": "llama3.1:70b"}
            })
        );
    }

    #[test]
    fn test_env_value_parsing() {
        assert_eq!(parse_env_value("false"), json!(false));
        assert_eq!(parse_env_value("42"), json!(42));
        assert_eq!(parse_env_value("1e-3"), json!(0.001));
        assert_eq!(parse_env_value("inf"), json!("inf"));
        assert_eq!(parse_env_value("gpt-4o"), json!("gpt-4o"));
    }

    #[test]
    fn test_yaml_and_toml_files() {
        let temp = TempDir::new().unwrap();
        let toml_path = temp.path().join("project.toml");
        std::fs::write(&toml_path, "[ollama]\nbase_url = \"http://jetson:11434\"\n").unwrap();
        let yaml_path = temp.path().join("user.yaml");
        std::fs::write(&yaml_path, "asr:\n  language: pl\n").unwrap();

        assert_eq!(read_file(&toml_path).unwrap()["ollama"]["base_url"], "http://jetson:11434");
        assert_eq!(read_file(&yaml_path).unwrap()["asr"]["language"], "pl");
    }

    #[test]
    fn test_empty_yaml_is_empty_table() {
        assert_eq!(
            parse_document("# nothing here\n", DocumentFormat::Yaml, "test").unwrap(),
            json!({})
        );
    }

    #[test]
    fn test_non_table_yaml_rejected() {
        let err = parse_document("- a\n- b\n", DocumentFormat::Yaml, "list.yaml").unwrap_err();
        assert!(matches!(err, LoadError::NotATable { .. }));
    }

    #[test]
    fn test_invalid_toml_fails_closed() {
        let err = parse_document("[vendor\nsimple_model = ", DocumentFormat::Toml, "broken.toml").unwrap_err();
        assert!(matches!(err, LoadError::Toml { .. }));
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_non_finite_toml_floats_rejected() {
        let err = parse_document(
            "[asr]\nvad_threshold = nan\nwake_word_threshold = inf\n",
            DocumentFormat::Toml,
            "robot-agent.toml",
        )
        .unwrap_err();
        match err {
            LoadError::NonFinite { origin, paths } => {
                assert_eq!(origin, "robot-agent.toml");
                assert_eq!(paths, vec!["asr.vad_threshold", "asr.wake_word_threshold"]);
            }
            other => panic!("expected NonFinite, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_yaml_floats_rejected() {
        let err = parse_document(
            "velocity_smoother:\n  ros__parameters:\n    max_accel: [2.5, .inf, 3.2]\nasr:\n  vad_threshold: .nan\n",
            DocumentFormat::Yaml,
            "params.yaml",
        )
        .unwrap_err();
        match err {
            LoadError::NonFinite { paths, .. } => {
                assert!(paths.contains(&"asr.vad_threshold".to_string()));
                assert!(paths.contains(&"velocity_smoother.ros__parameters.max_accel[1]".to_string()));
            }
            other => panic!("expected NonFinite, got {:?}", other),
        }
    }

    #[test]
    fn test_finite_floats_still_parse() {
        let tree = parse_document("[asr]\nvad_threshold = 0.45\n", DocumentFormat::Toml, "t").unwrap();
        assert_eq!(tree["asr"]["vad_threshold"], 0.45);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_environment_entries_are_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let vars = utf8_vars(vec![
            (OsString::from("UNRELATED"), OsStr::from_bytes(b"f\xffo").to_os_string()),
            (OsStr::from_bytes(b"BAD\xffNAME").to_os_string(), OsString::from("x")),
            (OsString::from("ROBOT_AGENT__ASR__LANGUAGE"), OsString::from("pl")),
        ]);
        assert_eq!(vars, vec![("ROBOT_AGENT__ASR__LANGUAGE".to_string(), "pl".to_string())]);
        assert_eq!(env_layer(vars, "ROBOT_AGENT"), json!({"asr": {"language": "pl"}}));
    }

    #[test]
    fn test_env_source_loads() {
        let layer = LayerSource::Env {
            prefix: "ROBOT_AGENT_TEST_UNSET_PREFIX".to_string(),
        }
        .load()
        .unwrap()
        .unwrap();
        assert_eq!(layer.tree, json!({}));
    }

    #[test]
    fn test_missing_required_file_is_error() {
        let temp = TempDir::new().unwrap();
        let source = LayerSource::File {
            path: temp.path().join("missing.toml"),
            tier: ConfigTier::Project,
        };
        assert!(matches!(source.load(), Err(LoadError::Io { .. })));
    }

    #[test]
    fn test_missing_optional_file_is_skipped() {
        let temp = TempDir::new().unwrap();
        let source = LayerSource::OptionalFile {
            path: temp.path().join("missing.toml"),
            tier: ConfigTier::User,
        };
        assert!(source.load().unwrap().is_none());
    }

    #[test]
    fn test_user_overrides_project_overrides_defaults() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("robot-agent.toml");
        let user = temp.path().join("config.toml");
        std::fs::write(
            &project,
            "[vendor]\nsimple_model = \"ollama\"\n[ollama]\nbase_url = \"http://jetson:11434\"\n",
        )
        .unwrap();
        std::fs::write(&user, "[ollama]\nbase_url = \"http://laptop:11434\"\n").unwrap();

        let loader = ConfigLoader::load_with_paths(&ConfigPaths::with_files(Some(project), Some(user))).unwrap();
        assert_eq!(loader.layers().len(), 3);

        let merged = loader.merged();
        assert_eq!(merged["vendor"]["simple_model"], "ollama");
        assert_eq!(merged["vendor"]["complex_model"], "openai");
        assert_eq!(merged["ollama"]["base_url"], "http://laptop:11434");
        assert_eq!(merged["ollama"]["simple_model"], "llama3.2");
        assert_eq!(loader.config_files().len(), 2);
    }

    #[test]
    fn test_explicit_file_replaces_file_tiers() {
        let paths = ConfigPaths {
            include_embedded: false,
            explicit_file: Some(PathBuf::from("/etc/robot-agent.toml")),
            project_file: Some(PathBuf::from("robot-agent.toml")),
            user_file: Some(PathBuf::from("/home/robot/.config/robot-agent/config.toml")),
            env_prefix: Some(ENV_PREFIX.to_string()),
        };
        let sources = paths.sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].path(), Some(Path::new("/etc/robot-agent.toml")));
        assert_eq!(sources[1].tier(), ConfigTier::Environment);
    }
}
