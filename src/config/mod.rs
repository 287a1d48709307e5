//! Layered configuration for the agent runtime.
//!
//! Raw trees come from up to five tiers, lowest priority first:
//! 1. **Embedded** - `config/default.toml`, compiled in
//! 2. **Explicit** - `ROBOT_AGENT_CONFIG_PATH`
//! 3. **Project** - `./robot-agent.toml` (or `ROBOT_AGENT_PROJECT_FILE`)
//! 4. **User** - `<config dir>/robot-agent/config.toml` (or `ROBOT_AGENT_USER_FILE`)
//! 5. **Environment** - `ROBOT_AGENT__SECTION__KEY=value`
//!
//! ## Pipeline
//! Trees are deep-merged field by field (later wins, lists replace), then
//! defaults from the [`SchemaRegistry`] are applied, then the result is
//! validated. Only a tree with an empty [`ValidationReport`] is resolved
//! into a [`ResolvedConfig`] and published by the [`ConfigEngine`].
//!
//! [`ValidationReport`]: crate::error::ValidationReport

mod defaults;
mod engine;
mod loader;
mod merge;
mod resolve;
mod schema;
mod types;
mod validate;
pub mod watcher;

pub use defaults::apply_defaults;
pub use engine::{ConfigEngine, ConfigHandle, Lifecycle};
pub use loader::{
    ConfigLoader, ConfigPaths, ConfigTier, DocumentFormat, EMBEDDED_DEFAULTS, ENV_PREFIX, Layer, LayerSource,
    env_layer, parse_document, read_file,
};
pub use merge::{deep_merge, load_layers};
pub use resolve::Resolver;
pub use schema::{FieldSpec, FieldType, Requirement, SchemaRegistry, backend_flag};
pub use types::*;
pub use validate::{check_fields, check_value, validate};
pub(crate) use validate::{join_path, value_type_name};
