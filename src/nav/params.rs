//! ROS 2 parameter documents.

use super::schema::{NavSchema, VELOCITY_BOUNDS};
use crate::config::{DocumentFormat, check_fields, join_path, parse_document, value_type_name};
use crate::error::{LoadError, ValidationReport, Violation};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

const PARAMETERS_KEY: &str = "ros__parameters";

/// One node's flattened parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct NavNode {
    /// `/`-joined mapping path, e.g. `local_costmap/local_costmap`.
    pub name: String,
    /// Parameters keyed by dotted path, e.g. `FollowPath.plugin`.
    pub params: Map<String, Value>,
}

impl NavNode {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(Value::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// A numeric triplet as `[x, y, theta]`.
    pub fn get_triplet(&self, key: &str) -> Option<[f64; 3]> {
        triplet(self.params.get(key)?)
    }
}

/// Parsed navigation parameter document.
#[derive(Debug, Clone, Default)]
pub struct NavParams {
    nodes: BTreeMap<String, NavNode>,
    /// Structural problems found while parsing.
    issues: Vec<Violation>,
}

impl NavParams {
    pub fn from_yaml_str(content: &str, origin: &str) -> Result<Self, LoadError> {
        let root = parse_document(content, DocumentFormat::Yaml, origin)?;
        let mut params = Self::default();
        if let Value::Object(table) = &root {
            params.collect(&mut Vec::new(), table);
        }
        if params.nodes.is_empty() && params.issues.is_empty() {
            params.issues.push(Violation::type_mismatch(
                PARAMETERS_KEY,
                "at least one node with ros__parameters",
                "no nodes",
            ));
        }
        debug!(origin, nodes = params.nodes.len(), "Parsed navigation parameters");
        Ok(params)
    }

    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content, &path.display().to_string())
    }

    pub fn node(&self, name: &str) -> Option<&NavNode> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NavNode> {
        self.nodes.values()
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check every node the schema knows about. Nodes absent from the
    /// document are skipped; unknown nodes and keys are accepted.
    pub fn validate(&self, schema: &NavSchema) -> ValidationReport {
        let mut report = ValidationReport::new();
        for issue in &self.issues {
            report.push(issue.clone());
        }

        for node in self.nodes.values() {
            let fields = schema.fields(&node.name);
            if fields.is_empty() {
                continue;
            }
            check_fields(&node.name, &node.params, fields, &mut report);
            match node.name.as_str() {
                "velocity_smoother" => check_velocity_bounds(node, &mut report),
                "amcl" => check_particle_counts(node, &mut report),
                _ => {}
            }
        }
        report
    }

    fn collect(&mut self, path: &mut Vec<String>, table: &Map<String, Value>) {
        if let Some(parameters) = table.get(PARAMETERS_KEY) {
            let name = if path.is_empty() { "/".to_string() } else { path.join("/") };
            match parameters {
                Value::Object(map) => {
                    let mut params = Map::new();
                    flatten("", map, &mut params);
                    self.nodes.insert(name.clone(), NavNode { name, params });
                }
                other => self.issues.push(Violation::type_mismatch(
                    &join_path(&name, PARAMETERS_KEY),
                    "mapping",
                    value_type_name(other),
                )),
            }
        }

        for (key, value) in table {
            if key == PARAMETERS_KEY {
                continue;
            }
            if let Value::Object(child) = value {
                path.push(key.clone());
                self.collect(path, child);
                path.pop();
            }
        }
    }
}

fn flatten(prefix: &str, map: &Map<String, Value>, out: &mut Map<String, Value>) {
    for (key, value) in map {
        let path = join_path(prefix, key);
        match value {
            Value::Object(child) => flatten(&path, child, out),
            leaf => {
                out.insert(path, leaf.clone());
            }
        }
    }
}

fn triplet(value: &Value) -> Option<[f64; 3]> {
    match value.as_array()?.as_slice() {
        [x, y, t] => Some([x.as_f64()?, y.as_f64()?, t.as_f64()?]),
        _ => None,
    }
}

const AXES: [&str; 3] = ["x", "y", "theta"];

/// Per-axis ordering of the velocity smoother bounds. Only well-formed
/// triplets are compared; shape errors are reported by the field checks.
fn check_velocity_bounds(node: &NavNode, report: &mut ValidationReport) {
    let [max_v, min_v, max_a, max_d] = VELOCITY_BOUNDS.map(|key| node.get_triplet(key));

    if let (Some(min_v), Some(max_v)) = (min_v, max_v) {
        for (i, axis) in AXES.iter().enumerate() {
            if min_v[i] > max_v[i] {
                report.push(Violation::out_of_range(
                    &format!("{}.min_velocity[{}]", node.name, i),
                    min_v[i],
                    format!("<= max_velocity[{}] ({}) on {}", i, max_v[i], axis),
                ));
            }
        }
    }

    if let Some(max_a) = max_a {
        for (i, axis) in AXES.iter().enumerate() {
            if max_a[i] < 0.0 {
                report.push(Violation::out_of_range(
                    &format!("{}.max_accel[{}]", node.name, i),
                    max_a[i],
                    format!(">= 0 on {}", axis),
                ));
            }
        }
    }

    if let Some(max_d) = max_d {
        for (i, axis) in AXES.iter().enumerate() {
            if max_d[i] > 0.0 {
                report.push(Violation::out_of_range(
                    &format!("{}.max_decel[{}]", node.name, i),
                    max_d[i],
                    format!("<= 0 on {}", axis),
                ));
            }
        }
    }
}

fn check_particle_counts(node: &NavNode, report: &mut ValidationReport) {
    let count = |key: &str| node.get(key).and_then(Value::as_i64);
    if let (Some(min), Some(max)) = (count("min_particles"), count("max_particles"))
        && min > max
    {
        report.push(Violation::out_of_range(
            &join_path(&node.name, "min_particles"),
            min,
            format!("<= max_particles ({})", max),
        ));
    }
}
