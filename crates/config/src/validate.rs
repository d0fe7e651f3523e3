//! Configuration validation.
//!
//! Reports syntax errors, unknown (likely misspelled) keys, type errors and
//! semantic problems that would make the router misbehave at runtime.

use crate::schema::{HandoffConfig, StoreBackend};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "semantic"
    pub category: &'static str,
    /// Dotted path, e.g. "router.agent_name_prefix"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    fn push(
        &mut self,
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        });
    }
}

const SECTIONS: &[(&str, &[&str])] = &[
    ("router", &["agent_name_prefix", "forward_timeout_secs"]),
    ("store", &["backend", "database_url", "max_connections"]),
];

/// Semantic checks on an already-parsed config.
pub fn validate(config: &HandoffConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.router.agent_name_prefix.trim().is_empty() {
        result.push(
            Severity::Error,
            "semantic",
            "router.agent_name_prefix",
            "empty prefix would classify every sender as an agent",
        );
    }
    if config.router.forward_timeout_secs == 0 {
        result.push(
            Severity::Error,
            "semantic",
            "router.forward_timeout_secs",
            "a zero timeout fails every forwarded message",
        );
    }
    if config.store.backend == StoreBackend::Sqlite
        && config
            .store
            .database_url
            .as_deref()
            .is_none_or(|url| url.trim().is_empty())
    {
        result.push(
            Severity::Error,
            "semantic",
            "store.database_url",
            "sqlite backend requires a database_url",
        );
    }
    if config.store.backend == StoreBackend::Memory && config.store.database_url.is_some() {
        result.push(
            Severity::Warning,
            "semantic",
            "store.database_url",
            "database_url is ignored by the memory backend",
        );
    }
    if config.store.max_connections == 0 {
        result.push(
            Severity::Error,
            "semantic",
            "store.max_connections",
            "max_connections must be at least 1",
        );
    }

    result
}

/// Validate raw TOML text: syntax, unknown keys, types, then semantics.
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut result = ValidationResult::default();

    let value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            result.push(
                Severity::Error,
                "syntax",
                "",
                format!("TOML syntax error: {e}"),
            );
            return result;
        },
    };

    if let Some(table) = value.as_table() {
        check_unknown_fields(table, &mut result);
    }

    match toml::from_str::<HandoffConfig>(toml_str) {
        Ok(config) => result.diagnostics.extend(validate(&config).diagnostics),
        Err(e) => result.push(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        ),
    }

    result
}

fn check_unknown_fields(
    root: &toml::map::Map<String, toml::Value>,
    result: &mut ValidationResult,
) {
    let section_names: Vec<&str> = SECTIONS.iter().map(|(name, _)| *name).collect();

    for (key, value) in root {
        let Some((_, fields)) = SECTIONS.iter().find(|(name, _)| *name == key.as_str()) else {
            result.push(
                Severity::Error,
                "unknown-field",
                key.as_str(),
                unknown_message(key, &section_names),
            );
            continue;
        };
        let Some(table) = value.as_table() else {
            continue;
        };
        for field in table.keys() {
            if !fields.contains(&field.as_str()) {
                result.push(
                    Severity::Error,
                    "unknown-field",
                    format!("{key}.{field}"),
                    unknown_message(field, fields),
                );
            }
        }
    }
}

fn unknown_message(key: &str, candidates: &[&str]) -> String {
    match closest(key, candidates) {
        Some(hint) => format!("unknown field '{key}' (did you mean '{hint}'?)"),
        None => format!("unknown field '{key}'"),
    }
}

/// Closest candidate within edit distance 2.
fn closest<'a>(key: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (edit_distance(key, c), *c))
        .filter(|(d, _)| *d <= 2)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut diag = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == *cb {
                diag
            } else {
                1 + diag.min(above).min(row[j])
            };
            diag = above;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has(result: &ValidationResult, category: &str, path: &str) -> bool {
        result
            .diagnostics
            .iter()
            .any(|d| d.category == category && d.path == path)
    }

    #[test]
    fn default_config_is_clean() {
        let result = validate(&HandoffConfig::default());
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn edit_distance_basics() {
        assert_eq!(edit_distance("router", "router"), 0);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("rooter", "router"), 1);
        assert_eq!(edit_distance("stor", "store"), 1);
    }

    #[test]
    fn syntax_error_short_circuits() {
        let result = validate_toml_str("[router\n");
        assert!(result.has_errors());
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn unknown_section_suggests_fix() {
        let result = validate_toml_str("[rooter]\nagent_name_prefix = \"x\"\n");
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.path == "rooter")
            .map(|d| d.message.clone())
            .unwrap_or_default();
        assert!(d.contains("did you mean 'router'"), "{d}");
    }

    #[test]
    fn unknown_nested_field() {
        let result = validate_toml_str("[store]\nbakend = \"sqlite\"\n");
        assert!(has(&result, "unknown-field", "store.bakend"));
    }

    #[test]
    fn type_error_reported() {
        let result = validate_toml_str("[router]\nforward_timeout_secs = \"ten\"\n");
        assert!(has(&result, "type-error", ""));
    }

    #[test]
    fn sqlite_without_url_is_error() {
        let result = validate_toml_str("[store]\nbackend = \"sqlite\"\n");
        assert!(result.has_errors());
        assert!(has(&result, "semantic", "store.database_url"));
    }

    #[test]
    fn memory_with_url_is_warning() {
        let result = validate_toml_str("[store]\ndatabase_url = \"sqlite::memory:\"\n");
        assert!(!result.has_errors());
        assert!(has(&result, "semantic", "store.database_url"));
    }

    #[test]
    fn blank_prefix_and_zero_timeout() {
        let result =
            validate_toml_str("[router]\nagent_name_prefix = \" \"\nforward_timeout_secs = 0\n");
        assert!(has(&result, "semantic", "router.agent_name_prefix"));
        assert!(has(&result, "semantic", "router.forward_timeout_secs"));
    }
}
