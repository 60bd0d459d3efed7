//! Google API clients (Gmail + Calendar) via direct HTTP.
//!
//! OAuth consent and token refresh are out of scope here: companion
//! tooling maintains `{state_dir}/google/token.json` and these clients
//! read the current access token from it. The file uses the same field
//! names google-auth writes, so both `token` and `access_token` are
//! accepted.

pub mod calendar;
pub mod gmail;

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AutomationError;

/// Subset of the persisted OAuth token payload this crate reads.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleToken {
    #[serde(alias = "access_token")]
    pub token: String,
    /// Authenticated user email, when the auth tooling recorded one.
    #[serde(default, alias = "email")]
    pub account: Option<String>,
}

/// Path of the token file under the state directory.
pub fn token_path(state_dir: &Path) -> PathBuf {
    state_dir.join("google").join("token.json")
}

/// Read the current access token.
pub fn load_access_token(state_dir: &Path) -> Result<String, AutomationError> {
    let path = token_path(state_dir);
    if !path.exists() {
        return Err(AutomationError::Config(format!(
            "Google token not found at {}; run the auth tooling first",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(&path)?;
    let token: GoogleToken = serde_json::from_str(&content)
        .map_err(|e| AutomationError::Config(format!("invalid token file: {}", e)))?;
    if token.token.is_empty() {
        return Err(AutomationError::Config(
            "Google token file has an empty access token".into(),
        ));
    }
    Ok(token.token)
}
