use crate::{Band, Ranking};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use sweep_core::{ProbeOutcome, ProtocolFamily};
use tracing::debug;

/// `<source> # <label> - <latency>ms[ - <mbps>Mbps]`
pub fn format_line(outcome: &ProbeOutcome) -> String {
    let ep = &outcome.endpoint;
    let mut line = format!("{} # {} - {}ms", ep.source(), ep.label(), outcome.latency_ms().unwrap_or(0));
    if let Some(mbps) = outcome.throughput_mbps {
        line.push_str(&format!(" - {mbps:.1}Mbps"));
    }
    line
}

pub fn render_band(entries: &[ProbeOutcome]) -> String {
    entries.iter().map(format_line).collect::<Vec<_>>().join("\n")
}

/// `FAST_VLESS.txt`, `ULTRA_SS.txt`, or `TROJAN.txt` for the normal band.
pub fn band_file_name(band: Band, family: ProtocolFamily) -> String {
    match band.file_prefix() {
        Some(prefix) => format!("{prefix}_{}.txt", family.file_tag()),
        None => format!("{}.txt", family.file_tag()),
    }
}

/// Write one file per non-empty band into `dir`, creating it if needed.
/// Existing files with the same names are replaced.
pub fn write_ranking(dir: &Path, ranking: &Ranking) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("create output dir {}", dir.display()))?;
    let mut written = Vec::new();
    for (family, band) in ranking.bands() {
        let path = dir.join(band_file_name(band.band, family));
        fs::write(&path, render_band(&band.entries)).with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), entries = band.entries.len(), "band file written");
        written.push(path);
    }
    Ok(written)
}
