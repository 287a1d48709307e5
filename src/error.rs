//! Structured violation and error types.
//!
//! Validation never throws: every problem found in a merged tree becomes a
//! [`Violation`] collected into a [`ValidationReport`]. The `thiserror` enums
//! below cover the operations that can genuinely fail (reading sources,
//! projecting typed records, driving the lifecycle).

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Violation codes for programmatic handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    /// A role selector names a vendor with no block in the merged tree.
    UnknownVendor,
    MissingRequiredField,
    TypeMismatch,
    RangeViolation,
    /// A gated field is absent while its `use_*` gate is true.
    ConditionalFieldMissing,
    /// A role selector names a section that can never be a vendor block.
    UnreachableSelector,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationKind::UnknownVendor => "unknown vendor",
            ViolationKind::MissingRequiredField => "missing required field",
            ViolationKind::TypeMismatch => "type mismatch",
            ViolationKind::RangeViolation => "range violation",
            ViolationKind::ConditionalFieldMissing => "conditional field missing",
            ViolationKind::UnreachableSelector => "unreachable selector",
        };
        f.write_str(s)
    }
}

/// A single problem found in a configuration tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    /// Dotted path of the offending field, e.g. `tracing.langfuse.host`.
    pub path: String,
    pub message: String,
    /// The constraint the field was expected to satisfy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
}

impl Violation {
    pub fn new(kind: ViolationKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
            expected: None,
        }
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    // Convenience constructors

    pub fn missing_field(path: &str) -> Self {
        Self::new(
            ViolationKind::MissingRequiredField,
            path,
            format!("{} is required", path),
        )
    }

    pub fn conditional_missing(path: &str, gate: &str) -> Self {
        Self::new(
            ViolationKind::ConditionalFieldMissing,
            path,
            format!("{} is required because {} is true", path, gate),
        )
        .with_expected(format!("present when {} = true", gate))
    }

    pub fn type_mismatch(path: &str, expected: &str, found: &str) -> Self {
        Self::new(
            ViolationKind::TypeMismatch,
            path,
            format!("{} has type {}", path, found),
        )
        .with_expected(expected)
    }

    pub fn out_of_range(path: &str, value: impl fmt::Display, expected: impl Into<String>) -> Self {
        Self::new(
            ViolationKind::RangeViolation,
            path,
            format!("{} = {} is out of range", path, value),
        )
        .with_expected(expected)
    }

    pub fn unknown_vendor(selector_path: &str, vendor: &str) -> Self {
        Self::new(
            ViolationKind::UnknownVendor,
            selector_path,
            format!("{} selects vendor '{}' but no [{}] section exists", selector_path, vendor, vendor),
        )
        .with_expected(format!("a [{}] vendor block", vendor))
    }

    pub fn unreachable_selector(selector_path: &str, target: &str, reason: &str) -> Self {
        Self::new(
            ViolationKind::UnreachableSelector,
            selector_path,
            format!("{} selects '{}', which {}", selector_path, target, reason),
        )
        .with_expected("the name of a vendor block")
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(ref expected) = self.expected {
            write!(f, " (expected: {})", expected)?;
        }
        Ok(())
    }
}

/// Ordered collection of violations. Empty means the tree was accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    pub fn extend(&mut self, other: ValidationReport) {
        self.violations.extend(other.violations);
    }

    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Number of violations of the given kind.
    pub fn count(&self, kind: ViolationKind) -> usize {
        self.violations.iter().filter(|v| v.kind == kind).count()
    }

    /// First violation reported for a path, if any.
    pub fn find(&self, path: &str) -> Option<&Violation> {
        self.violations.iter().find(|v| v.path == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.violations.is_empty() {
            return write!(f, "configuration is valid");
        }
        writeln!(f, "{} configuration violation(s):", self.violations.len())?;
        for v in &self.violations {
            writeln!(f, "  {}", v)?;
        }
        Ok(())
    }
}

impl IntoIterator for ValidationReport {
    type Item = Violation;
    type IntoIter = std::vec::IntoIter<Violation>;

    fn into_iter(self) -> Self::IntoIter {
        self.violations.into_iter()
    }
}

/// Failure to read or parse a configuration source.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML from {origin}: {source}")]
    Toml {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to parse YAML from {origin}: {source}")]
    Yaml {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to convert {origin} into a configuration tree: {source}")]
    Convert {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{origin} must contain a table at its root")]
    NotATable { origin: String },

    #[error("{origin} contains non-finite numbers at {}", .paths.join(", "))]
    NonFinite { origin: String, paths: Vec<String> },
}

/// Failure to project a merged tree into a [`ResolvedConfig`](crate::config::ResolvedConfig).
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("vendor.{role}_model selects '{vendor}' but no [{vendor}] section exists")]
    UnknownVendor { role: String, vendor: String },

    #[error("vendor block [{vendor}] lacks required field '{field}'")]
    MissingModelField { vendor: String, field: String },

    #[error("no vendor selected for role '{role}'")]
    MissingSelector { role: String },

    #[error("section [{section}] does not match its typed shape: {source}")]
    Section {
        section: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ResolveError {
    /// The same failure as a report entry.
    pub fn violation(&self) -> Violation {
        match self {
            ResolveError::UnknownVendor { role, vendor } => {
                Violation::unknown_vendor(&format!("vendor.{}_model", role), vendor)
            }
            ResolveError::MissingModelField { vendor, field } => {
                Violation::missing_field(&format!("{}.{}", vendor, field))
            }
            ResolveError::MissingSelector { role } => Violation::missing_field(&format!("vendor.{}_model", role)),
            ResolveError::Section { section, source } => {
                Violation::new(ViolationKind::TypeMismatch, section.as_str(), source.to_string())
                    .with_expected(format!("[{}] matching its typed shape", section))
            }
        }
    }
}

/// Failure while driving the configuration lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no configuration layers have been loaded")]
    NotLoaded,

    #[error("{0}")]
    Invalid(ValidationReport),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl EngineError {
    /// The validation report, when the failure came from validation.
    pub fn report(&self) -> Option<&ValidationReport> {
        match self {
            EngineError::Invalid(report) => Some(report),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_display_includes_expected() {
        let v = Violation::out_of_range("asr.vad_threshold", 1.5, "[0, 1]");
        let s = v.to_string();
        assert!(s.contains("range violation"));
        assert!(s.contains("asr.vad_threshold = 1.5"));
        assert!(s.contains("expected: [0, 1]"));
    }

    #[test]
    fn test_violation_kind_serialization() {
        let json = serde_json::to_string(&ViolationKind::ConditionalFieldMissing).unwrap();
        assert_eq!(json, "\"CONDITIONAL_FIELD_MISSING\"");
    }

    #[test]
    fn test_report_counts_by_kind() {
        let mut report = ValidationReport::new();
        assert!(report.is_ok());

        report.push(Violation::missing_field("openai.simple_model"));
        report.push(Violation::missing_field("openai.complex_model"));
        report.push(Violation::unknown_vendor("vendor.simple_model", "gcp"));

        assert!(!report.is_ok());
        assert_eq!(report.len(), 3);
        assert_eq!(report.count(ViolationKind::MissingRequiredField), 2);
        assert_eq!(report.count(ViolationKind::UnknownVendor), 1);
        assert!(report.find("vendor.simple_model").is_some());
    }

    #[test]
    fn test_resolve_error_as_violation() {
        let err = ResolveError::UnknownVendor {
            role: "complex".to_string(),
            vendor: "gcp".to_string(),
        };
        let v = err.violation();
        assert_eq!(v.kind, ViolationKind::UnknownVendor);
        assert_eq!(v.path, "vendor.complex_model");

        let err = ResolveError::MissingModelField {
            vendor: "ollama".to_string(),
            field: "embeddings_model".to_string(),
        };
        assert_eq!(err.violation().path, "ollama.embeddings_model");
    }

    #[test]
    fn test_engine_error_exposes_report() {
        let mut report = ValidationReport::new();
        report.push(Violation::missing_field("vendor.simple_model"));
        let err = EngineError::Invalid(report);
        assert_eq!(err.report().map(|r| r.len()), Some(1));
        assert!(err.to_string().contains("vendor.simple_model is required"));
    }
}
