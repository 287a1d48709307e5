//! Schema registry: recognised keys, types, defaults and gating per section.
//!
//! The registry is pure data. Adding a vendor, a tracing backend or a whole
//! section is a call to one of the `register_*` methods; neither the
//! validator nor the resolver needs to change.

use super::types::ModelRole;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;

/// Expected type (and value constraints) of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// Any string, including empty.
    String,
    NonEmptyString,
    Bool,
    Integer { min: Option<i64>, max: Option<i64> },
    Float { min: Option<f64>, max: Option<f64> },
    /// String from a closed set.
    OneOf(Vec<String>),
    /// List of exactly three numbers (e.g. x/y/theta velocity bounds).
    NumericTriplet,
    StringList,
    Table,
}

impl FieldType {
    pub fn float_range(min: f64, max: f64) -> Self {
        FieldType::Float {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Float in `[0, 1]`.
    pub fn probability() -> Self {
        Self::float_range(0.0, 1.0)
    }

    pub fn non_negative_float() -> Self {
        FieldType::Float {
            min: Some(0.0),
            max: None,
        }
    }

    pub fn positive_integer() -> Self {
        FieldType::Integer {
            min: Some(1),
            max: None,
        }
    }

    pub fn one_of(values: &[&str]) -> Self {
        FieldType::OneOf(values.iter().map(|s| s.to_string()).collect())
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::NonEmptyString => write!(f, "non-empty string"),
            FieldType::Bool => write!(f, "boolean"),
            FieldType::Integer { .. } => write!(f, "integer"),
            FieldType::Float { .. } => write!(f, "number"),
            FieldType::OneOf(values) => write!(f, "one of [{}]", values.join(", ")),
            FieldType::NumericTriplet => write!(f, "list of 3 numbers"),
            FieldType::StringList => write!(f, "list of strings"),
            FieldType::Table => write!(f, "table"),
        }
    }
}

/// When a field must be present.
#[derive(Debug, Clone, PartialEq)]
pub enum Requirement {
    Required,
    /// May be absent; filled with `default` when one is declared.
    Optional { default: Option<Value> },
    /// Required only when the boolean field `gate` in the same table is true.
    RequiredIf { gate: String },
}

/// Description of one recognised key.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub key: String,
    pub ty: FieldType,
    pub requirement: Requirement,
}

impl FieldSpec {
    pub fn required(key: &str, ty: FieldType) -> Self {
        Self {
            key: key.to_string(),
            ty,
            requirement: Requirement::Required,
        }
    }

    pub fn optional(key: &str, ty: FieldType) -> Self {
        Self {
            key: key.to_string(),
            ty,
            requirement: Requirement::Optional { default: None },
        }
    }

    /// Field that must be present iff the boolean `gate` field is true.
    pub fn gated(key: &str, ty: FieldType, gate: &str) -> Self {
        Self {
            key: key.to_string(),
            ty,
            requirement: Requirement::RequiredIf {
                gate: gate.to_string(),
            },
        }
    }

    /// Make the field optional with the given default.
    pub fn with_default(mut self, default: Value) -> Self {
        self.requirement = Requirement::Optional {
            default: Some(default),
        };
        self
    }

    pub fn default_value(&self) -> Option<&Value> {
        match self.requirement {
            Requirement::Optional { ref default } => default.as_ref(),
            _ => None,
        }
    }

    /// Gate field name for conditionally required fields.
    pub fn gate(&self) -> Option<&str> {
        match self.requirement {
            Requirement::RequiredIf { ref gate } => Some(gate),
            _ => None,
        }
    }
}

/// Name of the boolean flag enabling a tracing backend.
pub fn backend_flag(backend: &str) -> String {
    format!("use_{}", backend)
}

/// Registry of field specs for every known section.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    sections: BTreeMap<String, Vec<FieldSpec>>,
    vendors: BTreeMap<String, Vec<FieldSpec>>,
    tracing_backends: BTreeMap<String, Vec<FieldSpec>>,
}

impl SchemaRegistry {
    /// Empty registry: every section is opaque.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry describing the built-in vendors, tracing backends and
    /// speech sections.
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register_section(
            "vendor",
            ModelRole::ALL
                .iter()
                .map(|role| FieldSpec::required(role.field_name(), FieldType::NonEmptyString))
                .collect(),
        );

        registry.register_vendor(
            "openai",
            vec![
                FieldSpec::optional("base_url", FieldType::NonEmptyString)
                    .with_default(json!("https://api.openai.com/v1/")),
                FieldSpec::optional("api_key_env", FieldType::NonEmptyString)
                    .with_default(json!("OPENAI_API_KEY")),
            ],
        );
        registry.register_vendor(
            "aws",
            vec![
                FieldSpec::optional("region_name", FieldType::NonEmptyString)
                    .with_default(json!("us-east-1")),
            ],
        );
        registry.register_vendor(
            "ollama",
            vec![
                FieldSpec::optional("base_url", FieldType::NonEmptyString)
                    .with_default(json!("http://localhost:11434")),
            ],
        );

        registry.register_section(
            "tracing",
            vec![
                FieldSpec::optional("project", FieldType::NonEmptyString)
                    .with_default(json!(super::types::DEFAULT_TRACING_PROJECT)),
            ],
        );
        registry.register_tracing_backend(
            "langfuse",
            vec![
                FieldSpec::gated("host", FieldType::NonEmptyString, "use_langfuse"),
                FieldSpec::optional("public_key_env", FieldType::NonEmptyString),
                FieldSpec::optional("secret_key_env", FieldType::NonEmptyString),
            ],
        );
        registry.register_tracing_backend(
            "langsmith",
            vec![
                FieldSpec::gated("host", FieldType::NonEmptyString, "use_langsmith"),
                FieldSpec::optional("api_key_env", FieldType::NonEmptyString),
            ],
        );

        registry.register_section(
            "asr",
            vec![
                FieldSpec::optional("vendor", FieldType::one_of(&["whisper", "local_whisper", "openai"]))
                    .with_default(json!("whisper")),
                FieldSpec::optional("language", FieldType::NonEmptyString).with_default(json!("en")),
                FieldSpec::optional("recording_device_name", FieldType::String)
                    .with_default(json!("default")),
                FieldSpec::optional("silence_grace_period", FieldType::non_negative_float())
                    .with_default(json!(0.3)),
                FieldSpec::optional("use_wake_word", FieldType::Bool).with_default(json!(false)),
                FieldSpec::optional("vad_threshold", FieldType::probability()).with_default(json!(0.3)),
                FieldSpec::gated("wake_word_model", FieldType::NonEmptyString, "use_wake_word"),
                FieldSpec::optional("wake_word_threshold", FieldType::probability())
                    .with_default(json!(0.5)),
            ],
        );

        registry.register_section(
            "tts",
            vec![
                FieldSpec::optional("vendor", FieldType::one_of(&["elevenlabs", "opentts"]))
                    .with_default(json!("elevenlabs")),
                FieldSpec::optional("keep_speaker_busy", FieldType::Bool).with_default(json!(false)),
            ],
        );

        registry
    }

    /// Register (or replace) a plain top-level section.
    pub fn register_section(&mut self, name: &str, fields: Vec<FieldSpec>) -> &mut Self {
        self.sections.insert(name.to_string(), fields);
        self
    }

    /// Register a vendor with its connection fields. The three role fields
    /// are added automatically.
    pub fn register_vendor(&mut self, name: &str, connection: Vec<FieldSpec>) -> &mut Self {
        let mut fields = Self::role_fields();
        fields.extend(connection);
        self.vendors.insert(name.to_string(), fields);
        self
    }

    /// Register a tracing backend. Its `use_<name>` flag is added
    /// automatically with a default of `false`.
    pub fn register_tracing_backend(&mut self, name: &str, fields: Vec<FieldSpec>) -> &mut Self {
        let mut all = vec![FieldSpec::optional(&backend_flag(name), FieldType::Bool).with_default(json!(false))];
        all.extend(fields);
        self.tracing_backends.insert(name.to_string(), all);
        self
    }

    /// Field specs for a section.
    ///
    /// Accepts plain section names (`asr`), vendor names (`openai`) and
    /// tracing backends as `tracing.<backend>`. Unknown names yield an empty
    /// list, meaning "no constraints".
    pub fn describe(&self, section: &str) -> Vec<FieldSpec> {
        if let Some(fields) = self.sections.get(section) {
            return fields.clone();
        }
        if let Some(fields) = self.vendors.get(section) {
            return fields.clone();
        }
        if let Some(backend) = section.strip_prefix("tracing.")
            && let Some(fields) = self.tracing_backends.get(backend)
        {
            return fields.clone();
        }
        Vec::new()
    }

    /// Field specs for a table used as a vendor block. Unregistered vendors
    /// get the generic vendor schema.
    pub fn vendor_fields(&self, vendor: &str) -> Vec<FieldSpec> {
        self.vendors
            .get(vendor)
            .cloned()
            .unwrap_or_else(Self::generic_vendor_fields)
    }

    /// Field specs for a tracing backend sub-block. Unregistered backends only
    /// get their `use_<name>` flag.
    pub fn tracing_backend_fields(&self, backend: &str) -> Vec<FieldSpec> {
        self.tracing_backends.get(backend).cloned().unwrap_or_else(|| {
            vec![FieldSpec::optional(&backend_flag(backend), FieldType::Bool).with_default(json!(false))]
        })
    }

    pub fn is_registered_vendor(&self, name: &str) -> bool {
        self.vendors.contains_key(name)
    }

    pub fn vendor_names(&self) -> impl Iterator<Item = &str> {
        self.vendors.keys().map(String::as_str)
    }

    pub fn tracing_backend_names(&self) -> impl Iterator<Item = &str> {
        self.tracing_backends.keys().map(String::as_str)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    fn role_fields() -> Vec<FieldSpec> {
        ModelRole::ALL
            .iter()
            .map(|role| FieldSpec::required(role.field_name(), FieldType::NonEmptyString))
            .collect()
    }

    fn generic_vendor_fields() -> Vec<FieldSpec> {
        let mut fields = Self::role_fields();
        fields.push(FieldSpec::optional("base_url", FieldType::NonEmptyString));
        fields.push(FieldSpec::optional("region_name", FieldType::NonEmptyString));
        fields.push(FieldSpec::optional("api_key_env", FieldType::NonEmptyString));
        fields
    }
}
