//! Namespace resolution
//!
//! A namespace partitions the queue between deployments (`stable`, `dev`,
//! one per checked-out project, ...). When not supplied explicitly it is
//! derived deterministically from the project directory.

use std::path::Path;

use eyre::{bail, Result};
use sha2::{Digest, Sha256};

pub use queuestore::is_valid_namespace;

/// Derive a namespace from a project directory:
/// `<basename>-<first 4 hex chars of sha256(path)>`
pub fn derive_from_path(path: &Path) -> String {
    let base: String = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string())
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();
    let base = base.trim_matches('-');
    let base = if base.is_empty() { "project" } else { base };

    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    format!("{}-{:02x}{:02x}", base, digest[0], digest[1])
}

/// Resolve the effective namespace: explicit value (validated) or derived
/// from the working directory.
pub fn resolve(explicit: Option<&str>, cwd: &Path) -> Result<String> {
    match explicit {
        Some(ns) => {
            if !is_valid_namespace(ns) {
                bail!("invalid namespace {:?}: must match [a-z0-9-]+", ns);
            }
            Ok(ns.to_string())
        }
        None => Ok(derive_from_path(cwd)),
    }
}
