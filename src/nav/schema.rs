//! Field specs for the navigation nodes this crate knows about.

use crate::config::{FieldSpec, FieldType};
use serde_json::json;
use std::collections::BTreeMap;

/// Velocity bound keys of `velocity_smoother`, all `[x, y, theta]`.
pub const VELOCITY_BOUNDS: [&str; 4] = ["max_velocity", "min_velocity", "max_accel", "max_decel"];

/// Per-node field specs, keyed by node name.
#[derive(Debug, Clone, Default)]
pub struct NavSchema {
    nodes: BTreeMap<String, Vec<FieldSpec>>,
}

impl NavSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut schema = Self::new();

        schema.register_node("amcl", amcl_fields());

        schema.register_node(
            "controller_server",
            vec![
                FieldSpec::optional("use_sim_time", FieldType::Bool),
                FieldSpec::optional("controller_frequency", FieldType::non_negative_float()),
                FieldSpec::optional("min_x_velocity_threshold", FieldType::non_negative_float()),
                FieldSpec::optional("min_y_velocity_threshold", FieldType::non_negative_float()),
                FieldSpec::optional("min_theta_velocity_threshold", FieldType::non_negative_float()),
                FieldSpec::optional("failure_tolerance", FieldType::Float { min: Some(-1.0), max: None }),
                FieldSpec::required("controller_plugins", FieldType::StringList),
                FieldSpec::optional("progress_checker_plugins", FieldType::StringList),
                FieldSpec::optional("goal_checker_plugins", FieldType::StringList),
            ],
        );

        schema.register_node(
            "planner_server",
            vec![
                FieldSpec::optional("use_sim_time", FieldType::Bool),
                FieldSpec::optional("expected_planner_frequency", FieldType::non_negative_float()),
                FieldSpec::required("planner_plugins", FieldType::StringList),
            ],
        );

        let mut smoother = vec![
            FieldSpec::optional("smoothing_frequency", FieldType::non_negative_float()),
            FieldSpec::optional("scale_velocities", FieldType::Bool),
            FieldSpec::optional("feedback", FieldType::one_of(&["OPEN_LOOP", "CLOSED_LOOP"]))
                .with_default(json!("OPEN_LOOP")),
            FieldSpec::optional("deadband_velocity", FieldType::NumericTriplet),
            FieldSpec::optional("velocity_timeout", FieldType::non_negative_float()),
            FieldSpec::optional("odom_topic", FieldType::NonEmptyString),
            FieldSpec::optional("odom_duration", FieldType::non_negative_float()),
        ];
        smoother.extend(
            VELOCITY_BOUNDS
                .iter()
                .map(|key| FieldSpec::required(key, FieldType::NumericTriplet)),
        );
        schema.register_node("velocity_smoother", smoother);

        schema.register_node(
            "bt_navigator",
            vec![
                FieldSpec::optional("use_sim_time", FieldType::Bool),
                FieldSpec::optional("global_frame", FieldType::NonEmptyString).with_default(json!("map")),
                FieldSpec::optional("robot_base_frame", FieldType::NonEmptyString)
                    .with_default(json!("base_link")),
                FieldSpec::optional("odom_topic", FieldType::NonEmptyString).with_default(json!("/odom")),
                FieldSpec::optional("bt_loop_duration", FieldType::positive_integer()),
                FieldSpec::optional("default_server_timeout", FieldType::positive_integer()),
                FieldSpec::optional("navigators", FieldType::StringList),
                FieldSpec::optional("plugin_lib_names", FieldType::StringList),
                FieldSpec::optional("default_nav_to_pose_bt_xml", FieldType::String),
                FieldSpec::optional("default_nav_through_poses_bt_xml", FieldType::String),
            ],
        );

        schema.register_node(
            "waypoint_follower",
            vec![
                FieldSpec::optional("use_sim_time", FieldType::Bool),
                FieldSpec::optional("loop_rate", FieldType::positive_integer()),
                FieldSpec::optional("stop_on_failure", FieldType::Bool),
                FieldSpec::optional("waypoint_task_executor_plugin", FieldType::NonEmptyString),
                FieldSpec::optional("wait_at_waypoint.plugin", FieldType::NonEmptyString),
                FieldSpec::optional("wait_at_waypoint.enabled", FieldType::Bool),
                FieldSpec::optional(
                    "wait_at_waypoint.waypoint_pause_duration",
                    FieldType::Integer { min: Some(0), max: None },
                ),
            ],
        );

        schema
    }

    /// Register (or replace) the specs for `node`.
    pub fn register_node(&mut self, node: &str, fields: Vec<FieldSpec>) -> &mut Self {
        self.nodes.insert(node.to_string(), fields);
        self
    }

    /// Specs for `node`. Unknown nodes have none.
    pub fn fields(&self, node: &str) -> &[FieldSpec] {
        self.nodes.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }
}

fn amcl_fields() -> Vec<FieldSpec> {
    let mut fields: Vec<FieldSpec> = ["alpha1", "alpha2", "alpha3", "alpha4", "alpha5"]
        .iter()
        .map(|key| FieldSpec::optional(key, FieldType::non_negative_float()))
        .collect();

    for key in ["z_hit", "z_max", "z_rand", "z_short", "recovery_alpha_fast", "recovery_alpha_slow", "pf_err"] {
        fields.push(FieldSpec::optional(key, FieldType::probability()));
    }

    fields.extend([
        FieldSpec::optional("use_sim_time", FieldType::Bool),
        FieldSpec::optional("base_frame_id", FieldType::NonEmptyString).with_default(json!("base_footprint")),
        FieldSpec::optional("global_frame_id", FieldType::NonEmptyString).with_default(json!("map")),
        FieldSpec::optional("odom_frame_id", FieldType::NonEmptyString).with_default(json!("odom")),
        FieldSpec::optional("scan_topic", FieldType::NonEmptyString),
        FieldSpec::optional(
            "laser_model_type",
            FieldType::one_of(&["likelihood_field", "beam", "likelihood_field_prob"]),
        ),
        FieldSpec::optional("robot_model_type", FieldType::NonEmptyString),
        FieldSpec::optional("max_particles", FieldType::positive_integer()),
        FieldSpec::optional("min_particles", FieldType::positive_integer()),
        FieldSpec::optional("max_beams", FieldType::positive_integer()),
        FieldSpec::optional("resample_interval", FieldType::positive_integer()),
        FieldSpec::optional("laser_max_range", FieldType::Float { min: Some(-1.0), max: None }),
        FieldSpec::optional("laser_min_range", FieldType::Float { min: Some(-1.0), max: None }),
        FieldSpec::optional("update_min_a", FieldType::non_negative_float()),
        FieldSpec::optional("update_min_d", FieldType::non_negative_float()),
        FieldSpec::optional("sigma_hit", FieldType::non_negative_float()),
        FieldSpec::optional("lambda_short", FieldType::non_negative_float()),
        FieldSpec::optional("tf_broadcast", FieldType::Bool),
        FieldSpec::optional("set_initial_pose", FieldType::Bool),
    ]);
    fields
}
