//! Single-payload heuristic check

use crate::output::OutputFormat;
use anyhow::{Context, Result};
use censor_engine::{ByteStatistics, EngineConfig, HeuristicDetector};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct Report {
    action: String,
    finding: &'static str,
    len: usize,
    average_popcount: f64,
    printable_count: usize,
    printable_ratio: f64,
    longest_printable_run: usize,
    entropy: f64,
}

pub fn handle(
    payload: &str,
    src_port: u16,
    dst_port: u16,
    config: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let bytes = hex::decode(payload.trim()).context("payload is not valid hex")?;

    let detector = match config {
        Some(path) => {
            let config = EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))?;
            HeuristicDetector::from_config(&config.heuristic)
        }
        None => HeuristicDetector::default(),
    };

    let finding = detector.inspect(&bytes, src_port, dst_port);
    let stats = ByteStatistics::compute(&bytes);

    format.print(&Report {
        action: finding.action().to_string(),
        finding: finding.as_str(),
        len: stats.len,
        average_popcount: stats.average_popcount,
        printable_count: stats.printable_count,
        printable_ratio: stats.printable_ratio,
        longest_printable_run: stats.longest_printable_run,
        entropy: stats.entropy,
    });
    Ok(())
}
