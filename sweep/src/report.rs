use crate::OutputFormat;
use anyhow::Result;
use rank::{band_file_name, format_line, render_band, Band, Ranking};
use scan::ScanRun;
use serde_json::json;
use std::io::Write;
use std::path::Path;
use sweep_core::{ProbeOutcome, ProgressSink};
use tracing::{debug, info};

/// Logs progress every `every` results and each reachable endpoint at debug.
pub struct LogSink {
    every: usize,
}

impl LogSink {
    pub fn new(every: usize) -> Self {
        LogSink { every: every.max(1) }
    }
}

impl ProgressSink for LogSink {
    fn on_progress(&self, completed: usize, total: usize) {
        if completed % self.every == 0 || completed == total {
            info!(completed, total, "progress");
        }
    }

    fn on_result(&self, outcome: &ProbeOutcome) {
        if outcome.is_reachable() {
            debug!(line = %format_line(outcome), "reachable");
        }
    }
}

fn entry_json(family: &str, band: Band, rank: usize, o: &ProbeOutcome) -> serde_json::Value {
    json!({
        "family": family,
        "band": band,
        "rank": rank,
        "host": o.endpoint.host(),
        "port": o.endpoint.port(),
        "label": o.endpoint.label(),
        "latency_ms": o.latency_ms(),
        "throughput_mbps": o.throughput_mbps,
        "source": o.endpoint.source(),
    })
}

/// Print ranked results to `w`.
///
/// Text prints each band under a header naming its file. JSON prints one
/// document with the run record and summary. JSONL prints one ranked entry
/// per line.
pub fn print_ranking<W: Write>(w: &mut W, run: &ScanRun, ranking: &Ranking, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for (family, band) in ranking.bands() {
                writeln!(w, "== {} ({}) ==", band_file_name(band.band, family), band.entries.len())?;
                writeln!(w, "{}", render_band(&band.entries))?;
            }
        }
        OutputFormat::Json => {
            let bands: serde_json::Map<String, serde_json::Value> = ranking
                .bands()
                .map(|(family, band)| {
                    let lines: Vec<String> = band.entries.iter().map(format_line).collect();
                    (band_file_name(band.band, family), json!(lines))
                })
                .collect();
            let obj = json!({
                "run_id": run.run_id,
                "state": run.state,
                "started_at": run.started_at,
                "finished_at": run.finished_at,
                "tokens": run.tokens.len(),
                "total": run.total,
                "completed": run.completed,
                "succeeded": run.succeeded,
                "decode_failures": run.decode_failures,
                "mode": ranking.mode,
                "summary": ranking.summary(),
                "bands": bands,
            });
            writeln!(w, "{}", serde_json::to_string_pretty(&obj)?)?;
        }
        OutputFormat::Jsonl => {
            for (family, band) in ranking.bands() {
                for (i, o) in band.entries.iter().enumerate() {
                    writeln!(w, "{}", serde_json::to_string(&entry_json(family.tag(), band.band, i + 1, o))?)?;
                }
            }
        }
    }
    Ok(())
}

pub fn write_csv(path: &Path, ranking: &Ranking) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(std::fs::File::create(path)?);
    wtr.write_record(["family", "band", "rank", "host", "port", "label", "latency_ms", "throughput_mbps", "source"])?;
    for (family, band) in ranking.bands() {
        let band_name = band_file_name(band.band, family);
        for (i, o) in band.entries.iter().enumerate() {
            wtr.write_record([
                family.tag().to_string(),
                band_name.trim_end_matches(".txt").to_string(),
                (i + 1).to_string(),
                o.endpoint.host().to_string(),
                o.endpoint.port().to_string(),
                o.endpoint.label().to_string(),
                o.latency_ms().map(|v| v.to_string()).unwrap_or_default(),
                o.throughput_mbps.map(|v| format!("{v:.1}")).unwrap_or_default(),
                o.endpoint.source().to_string(),
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// One-line completion report for stderr.
pub fn summary_line(run: &ScanRun, ranking: &Ranking) -> String {
    let s = ranking.summary();
    let mut line = format!(
        "{:?}: {} ranked ({} top band) from {} probed, {} undecodable",
        run.state, s.total, s.top_band, run.completed, run.decode_failures
    );
    if let Some(avg) = s.average_mbps {
        line.push_str(&format!(", average {avg:.1} Mbps"));
    }
    line
}
