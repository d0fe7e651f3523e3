use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    Error, Result,
    env_subst::substitute_env,
    schema::{HandoffConfig, StoreBackend},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "handoff.toml",
    "handoff.yaml",
    "handoff.yml",
    "handoff.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<HandoffConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply `HANDOFF_*`
/// environment overrides.
///
/// Search order:
/// 1. `./handoff.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/handoff/handoff.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `HandoffConfig::default()` if no file is found or the file
/// fails to parse.
pub fn discover_and_load() -> HandoffConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                HandoffConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            HandoffConfig::default()
        },
    };

    if let Err(e) = apply_env_overrides(&mut config, |name| std::env::var(name).ok()) {
        warn!(error = %e, "ignoring invalid environment override");
    }
    config
}

/// Overlay `HANDOFF_AGENT_PREFIX`, `HANDOFF_FORWARD_TIMEOUT_SECS`,
/// `HANDOFF_STORE_BACKEND` and `HANDOFF_DATABASE_URL` onto `config`.
///
/// Stops at the first unparsable value; overrides applied before it stay.
pub fn apply_env_overrides(
    config: &mut HandoffConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(prefix) = lookup("HANDOFF_AGENT_PREFIX") {
        config.router.agent_name_prefix = prefix;
    }
    if let Some(raw) = lookup("HANDOFF_FORWARD_TIMEOUT_SECS") {
        config.router.forward_timeout_secs = raw
            .trim()
            .parse()
            .map_err(|_| Error::invalid_override("HANDOFF_FORWARD_TIMEOUT_SECS", &raw))?;
    }
    if let Some(raw) = lookup("HANDOFF_STORE_BACKEND") {
        config.store.backend = raw
            .parse::<StoreBackend>()
            .map_err(|_| Error::invalid_override("HANDOFF_STORE_BACKEND", &raw))?;
    }
    if let Some(url) = lookup("HANDOFF_DATABASE_URL") {
        config.store.database_url = Some(url);
    }
    Ok(())
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists());
    if local.is_some() {
        return local;
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/handoff/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "handoff").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> Result<HandoffConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::unsupported_format(ext)),
    }
}
