//! Configuration loading, validation, and env substitution.
//!
//! Config files: `handoff.toml`, `handoff.yaml`, or `handoff.json`
//! Searched in `./` then `~/.config/handoff/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in all
//! string values, and `HANDOFF_*` environment overrides on top.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{HandoffConfig, RouterConfig, StoreBackend, StoreConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_toml_str},
};
