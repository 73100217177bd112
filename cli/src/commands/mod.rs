//! CLI Commands

pub mod check;
pub mod classify;
pub mod replay;

use anyhow::{Context, Result};
use censor_engine::{CensorEngine, EngineConfig};
use std::path::Path;

/// Load a config file and build an engine from it, loading model files
pub fn load_engine(path: &Path) -> Result<CensorEngine> {
    let config = EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))?;
    CensorEngine::from_config(config).with_context(|| format!("building engine from {}", path.display()))
}
