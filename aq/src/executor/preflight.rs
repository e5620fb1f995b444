//! Preflight checks
//!
//! Runs before every spawn: the executor binary must be resolvable and the
//! configured credential must be present. Failures are fail-closed ERRORs
//! with machine-readable reasons and are never reported as timeouts.

use std::path::Path;

use thiserror::Error;

use crate::config::ExecutorConfig;

/// Preflight failure reasons
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("AUTH_ERROR: {0}")]
    Auth(String),

    #[error("CONFIG_ERROR: {0}")]
    Config(String),
}

/// Check binary availability and authentication
pub fn run_preflight(config: &ExecutorConfig) -> Result<(), PreflightError> {
    if config.command.trim().is_empty() {
        return Err(PreflightError::Config("executor command is empty".to_string()));
    }

    if !binary_available(&config.command) {
        return Err(PreflightError::Config(format!(
            "executor binary not found: {}",
            config.command
        )));
    }

    if let Some(var) = &config.auth_env {
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => {}
            _ => {
                return Err(PreflightError::Auth(format!(
                    "credential environment variable {} is not set",
                    var
                )));
            }
        }
    }

    Ok(())
}

/// Resolve a command the way a shell would: explicit paths are stat'ed,
/// bare names are searched on PATH
fn binary_available(command: &str) -> bool {
    let path = Path::new(command);
    if path.components().count() > 1 {
        return path.is_file();
    }

    let Some(search_path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&search_path).any(|dir| dir.join(command).is_file())
}
