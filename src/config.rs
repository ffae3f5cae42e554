//! Router configuration loading and validation.
//!
//! Reads the backend declaration document (JSON or YAML) and resolves
//! environment variables. The document is the single source of truth for
//! which backends the router tries to bring up at startup.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default startup deadline for a backend, in seconds.
pub const DEFAULT_STARTUP_TIMEOUT_SECS: f64 = 30.0;

fn default_startup_timeout() -> f64 {
    DEFAULT_STARTUP_TIMEOUT_SECS
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Fatal configuration problems. Any of these aborts router startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    /// The document is not valid JSON/YAML or does not match the schema.
    #[error("failed to parse config: {reason}")]
    Malformed { reason: String },

    /// The document parsed but violates a semantic rule.
    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// How to launch a backend process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the child process. Inherits the router's when unset.
    #[serde(default)]
    pub cwd: Option<String>,
}

/// One configured backend. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub name: String,
    pub description: String,
    /// Startup deadline in seconds.
    #[serde(default = "default_startup_timeout")]
    pub timeout: f64,
    pub startup: StartupSpec,
}

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(rename = "mcpServers", alias = "mcp_servers")]
    pub mcp_servers: Vec<BackendDescriptor>,
}

impl RouterConfig {
    /// Check the rules serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for backend in &self.mcp_servers {
            if backend.name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    reason: "backend name must not be empty".into(),
                });
            }
            if !seen.insert(backend.name.as_str()) {
                return Err(ConfigError::Invalid {
                    reason: format!("duplicate backend name '{}'", backend.name),
                });
            }
            if backend.startup.command.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    reason: format!("backend '{}' has an empty startup command", backend.name),
                });
            }
            if !backend.timeout.is_finite() || backend.timeout <= 0.0 {
                return Err(ConfigError::Invalid {
                    reason: format!(
                        "backend '{}' timeout must be a positive number of seconds, got {}",
                        backend.name, backend.timeout
                    ),
                });
            }
        }
        Ok(())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Load, interpolate, parse and validate a configuration file.
pub fn load_config(path: &Path) -> Result<RouterConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_config(&raw)
}

/// Parse a configuration document from text.
///
/// YAML is a superset of JSON, so both syntaxes go through `serde_yaml`.
pub fn parse_config(raw: &str) -> Result<RouterConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);

    let config: RouterConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Malformed {
            reason: e.to_string(),
        })?;

    config.validate()?;
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
