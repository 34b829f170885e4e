//! Configuration file loading.
//!
//! The file is the JSON shape of [`OrchestratorConfig`]; absent fields
//! take their defaults, so a partial file is fine. An unreadable or
//! invalid file is a startup precondition failure.

use std::path::Path;

use drover::OrchestratorConfig;

use crate::error::{CliError, Result};

pub fn load(path: Option<&Path>) -> Result<OrchestratorConfig> {
    let Some(path) = path else {
        return Ok(OrchestratorConfig::default());
    };

    let raw = std::fs::read_to_string(path).map_err(|err| CliError::Config {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|err| CliError::Config {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
