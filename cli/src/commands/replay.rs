//! Trace replay

use crate::output::OutputFormat;
use crate::trace::{TraceEvent, TraceRecord};
use anyhow::{Context, Result};
use censor_common::Action;
use censor_engine::{EngineStatsSnapshot, Sweeper};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Serialize)]
struct Decision {
    line: usize,
    flow: String,
    src: String,
    dst: String,
    len: usize,
    action: Action,
}

#[derive(Serialize)]
struct Summary {
    records: usize,
    elapsed_ms: u64,
    model: Option<String>,
    flows_tracked: usize,
    stats: EngineStatsSnapshot,
}

pub fn handle(config: &Path, trace: &Path, decision_log: Option<&Path>, format: OutputFormat) -> Result<()> {
    let engine = Arc::new(super::load_engine(config)?);
    let sweeper = Sweeper::from_config(Arc::clone(&engine)).context("starting flow sweeper")?;

    let reader = BufReader::new(File::open(trace).with_context(|| format!("opening {}", trace.display()))?);
    let mut log = match decision_log {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => None,
    };

    let started = Instant::now();
    let mut records = 0usize;

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("reading {}", trace.display()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let record = TraceRecord::parse(line).with_context(|| format!("{}:{}", trace.display(), line_no))?;
        records += 1;

        match record.into_event().with_context(|| format!("{}:{}", trace.display(), line_no))? {
            TraceEvent::Packet(packet) => {
                let action = engine.process(&packet);
                if action != Action::Pass {
                    info!(line = line_no, flow = %packet.flow_key(), action = %action, "non-pass action");
                }

                if let Some(log) = log.as_mut() {
                    let decision = Decision {
                        line: line_no,
                        flow: packet.flow_key().to_string(),
                        src: packet.src.to_string(),
                        dst: packet.dst.to_string(),
                        len: packet.payload_len(),
                        action,
                    };
                    serde_json::to_writer(&mut *log, &decision)?;
                    log.write_all(b"\n")?;
                }
            }
            TraceEvent::EndFlow(key) => {
                if let Some(action) = engine.end_flow(&key) {
                    info!(line = line_no, flow = %key, action = %action, "flow ended");
                }
            }
        }
    }

    if let Some(mut log) = log {
        log.flush().context("flushing decision log")?;
    }
    sweeper.shutdown();

    format.print(&Summary {
        records,
        elapsed_ms: started.elapsed().as_millis() as u64,
        model: engine.model_name().map(String::from),
        flows_tracked: engine.flow_count(),
        stats: engine.stats(),
    });
    Ok(())
}
