//! Typed configuration records.
//!
//! Everything here is produced by the resolver from a validated tree and is
//! immutable afterwards. Consumers receive these records through a
//! [`ConfigHandle`](super::ConfigHandle).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Sections that hold settings rather than vendor blocks.
pub const RESERVED_SECTIONS: &[&str] = &["vendor", "tracing", "asr", "tts"];

/// Default tracing project identifier.
pub const DEFAULT_TRACING_PROJECT: &str = "robot-agent";

/// Functional slot a model fills within the agent framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Fast chat/completion model.
    Simple,
    /// Complex-reasoning model.
    Complex,
    Embeddings,
}

impl ModelRole {
    /// All roles, in resolution and reporting order.
    pub const ALL: [ModelRole; 3] = [ModelRole::Simple, ModelRole::Complex, ModelRole::Embeddings];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Simple => "simple",
            ModelRole::Complex => "complex",
            ModelRole::Embeddings => "embeddings",
        }
    }

    /// Key naming this role in both `[vendor]` and vendor blocks.
    pub fn field_name(&self) -> &'static str {
        match self {
            ModelRole::Simple => "simple_model",
            ModelRole::Complex => "complex_model",
            ModelRole::Embeddings => "embeddings_model",
        }
    }

    /// Returns true if `key` is one of the role fields.
    pub fn is_role_field(key: &str) -> bool {
        Self::ALL.iter().any(|r| r.field_name() == key)
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" | "simple_model" => Ok(ModelRole::Simple),
            "complex" | "complex_model" => Ok(ModelRole::Complex),
            "embeddings" | "embeddings_model" => Ok(ModelRole::Embeddings),
            other => Err(format!(
                "unknown model role '{}', expected one of: simple, complex, embeddings",
                other
            )),
        }
    }
}

/// Name of an AI backend provider, e.g. `openai`, `aws`, `ollama`.
///
/// The set is open: any table in the merged tree can be selected as a vendor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VendorName(String);

impl VendorName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VendorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VendorName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A role projected onto its selected vendor: model identifier plus the
/// vendor block's connection fields.
#[derive(Clone, PartialEq, Serialize)]
pub struct ModelEndpoint {
    pub role: ModelRole,
    pub vendor: VendorName,
    pub model: String,
    /// Non-role fields of the vendor block (`base_url`, `region_name`,
    /// `api_key_env`, and anything vendor specific).
    pub connection: BTreeMap<String, Value>,
}

impl ModelEndpoint {
    pub fn base_url(&self) -> Option<&str> {
        self.connection_str("base_url")
    }

    pub fn region_name(&self) -> Option<&str> {
        self.connection_str("region_name")
    }

    /// Where requests for this role go: the base URL, else the region.
    pub fn endpoint(&self) -> Option<&str> {
        self.base_url().or_else(|| self.region_name())
    }

    /// Name of the environment variable holding this vendor's API key.
    pub fn api_key_env(&self) -> Option<&str> {
        self.connection_str("api_key_env")
    }

    /// Read the API key from the environment, if this vendor uses one.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }

    pub fn connection_str(&self, key: &str) -> Option<&str> {
        self.connection.get(key).and_then(Value::as_str)
    }
}

impl fmt::Debug for ModelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEndpoint")
            .field("role", &self.role)
            .field("vendor", &self.vendor)
            .field("model", &self.model)
            .field("endpoint", &self.endpoint())
            .field("api_key_env", &self.api_key_env())
            .finish()
    }
}

/// One tracing backend sub-block (`[tracing.<name>]`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TracingBackend {
    pub name: String,
    /// Value of the `use_<name>` flag.
    pub enabled: bool,
    /// Every other key of the sub-block.
    pub connection: BTreeMap<String, Value>,
}

impl TracingBackend {
    pub fn host(&self) -> Option<&str> {
        self.connection.get("host").and_then(Value::as_str)
    }
}

/// Validated `[tracing]` section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TracingConfig {
    pub project: String,
    pub backends: BTreeMap<String, TracingBackend>,
}

impl TracingConfig {
    pub fn backend(&self, name: &str) -> Option<&TracingBackend> {
        self.backends.get(name)
    }

    /// Backends whose `use_*` flag is set, in name order.
    pub fn enabled_backends(&self) -> impl Iterator<Item = &TracingBackend> {
        self.backends.values().filter(|b| b.enabled)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.backend(name).is_some_and(|b| b.enabled)
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            project: DEFAULT_TRACING_PROJECT.to_string(),
            backends: BTreeMap::new(),
        }
    }
}

/// Speech recognition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsrConfig {
    pub vendor: String,
    pub language: String,
    pub recording_device_name: String,
    /// Seconds of silence tolerated before a recording is closed.
    pub silence_grace_period: f64,
    pub use_wake_word: bool,
    pub vad_threshold: f64,
    /// Empty in the document means no model.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub wake_word_model: Option<String>,
    pub wake_word_threshold: f64,
    /// Vendor-specific tuning keys not covered above.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Speech synthesis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsConfig {
    pub vendor: String,
    pub keep_speaker_busy: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Immutable, fully validated configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfig {
    pub(crate) models: BTreeMap<ModelRole, ModelEndpoint>,
    pub tracing: TracingConfig,
    pub asr: AsrConfig,
    pub tts: TtsConfig,
}

impl ResolvedConfig {
    /// Endpoint resolved for a role. Every role is always present.
    pub fn model(&self, role: ModelRole) -> &ModelEndpoint {
        &self.models[&role]
    }

    pub fn models(&self) -> impl Iterator<Item = (&ModelRole, &ModelEndpoint)> {
        self.models.iter()
    }

    pub fn tracing(&self) -> &TracingConfig {
        &self.tracing
    }

    pub fn asr(&self) -> &AsrConfig {
        &self.asr
    }

    pub fn tts(&self) -> &TtsConfig {
        &self.tts
    }
}
