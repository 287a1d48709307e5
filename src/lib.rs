//! Configuration resolution and validation for a multi-agent robot runtime.
//!
//! Layers are merged, defaulted and validated before anything downstream
//! starts; only a configuration with no violations is resolved into the
//! immutable [`ResolvedConfig`](config::ResolvedConfig) handed to model
//! clients, tracing, speech and navigation consumers.

pub mod config;
pub mod error;
pub mod logging;
pub mod nav;
