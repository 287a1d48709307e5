//! Navigation stack parameters.
//!
//! A ROS 2 parameter document is keyed by node name, each node holding a
//! `ros__parameters` mapping. [`NavParams`] flattens every node into a dotted
//! key/value map and validates the nodes described by a [`NavSchema`] with
//! the same field checks used for the agent configuration. The parameter
//! values themselves are passed through to the navigation stack untouched.

mod params;
mod schema;

pub use params::{NavNode, NavParams};
pub use schema::{NavSchema, VELOCITY_BOUNDS};
