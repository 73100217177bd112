//! Configuration check

use crate::output::OutputFormat;
use anyhow::Result;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct Summary {
    config: String,
    classifier: String,
    window: usize,
    idle_timeout_ms: u64,
    oracle_timeout_ms: u64,
    models: Vec<String>,
}

pub fn handle(path: &Path, format: OutputFormat) -> Result<()> {
    let engine = super::load_engine(path)?;
    let config = engine.config();

    format.print(&Summary {
        config: path.display().to_string(),
        classifier: engine
            .model_name()
            .map_or_else(|| "heuristic".to_string(), |m| format!("model {}", m)),
        window: config.window.size,
        idle_timeout_ms: config.flows.idle_timeout_ms,
        oracle_timeout_ms: config.oracle.timeout_ms,
        models: config.models.keys().cloned().collect(),
    });
    Ok(())
}
