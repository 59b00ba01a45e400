//! JSON Lines output: one summary line, then one line per location.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::pipeline::{RunOutcome, RunResult, Stats, Summary};

/// First line of the file: everything except the per-location records.
#[derive(Debug, Serialize)]
struct SummaryLine<'a> {
    kind: &'static str,
    job_id: &'a str,
    city: &'a str,
    correlation_id: &'a str,
    completed_at_ms: u64,
    outcome: &'a RunOutcome,
    summary: &'a Summary,
    stats: &'a Stats,
    stage_metrics: &'a std::collections::BTreeMap<String, crate::pipeline::StageMetrics>,
    urls: &'a [crate::pipeline::WebSource],
}

/// `output/<city>-results.jsonl`, city lowercased with spaces as dashes.
pub fn default_output_path(dir: &Path, city: &str) -> PathBuf {
    let city = city.trim().to_lowercase().replace(char::is_whitespace, "-");
    dir.join(format!("{}-results.jsonl", city))
}

/// Write `result` to `path`, creating parent directories. Written to a
/// sibling temp file first and renamed into place.
pub fn write_jsonl(result: &RunResult, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

    let tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    {
        let mut w = BufWriter::new(tmp.as_file());
        let head = SummaryLine {
            kind: "summary",
            job_id: &result.job_id,
            city: &result.city,
            correlation_id: &result.correlation_id,
            completed_at_ms: result.completed_at_ms,
            outcome: &result.outcome,
            summary: &result.summary,
            stats: &result.stats,
            stage_metrics: &result.stage_metrics,
            urls: &result.urls,
        };
        serde_json::to_writer(&mut w, &head)?;
        w.write_all(b"\n")?;
        for loc in &result.locations {
            serde_json::to_writer(&mut w, loc)?;
            w.write_all(b"\n")?;
        }
        w.flush()?;
    }
    tmp.persist(path)
        .with_context(|| format!("write {}", path.display()))?;
    tracing::info!("wrote {} locations to {}", result.locations.len(), path.display());
    Ok(())
}
