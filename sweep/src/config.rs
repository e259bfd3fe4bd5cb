use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "sweep.yaml";

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScanSection {
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub max_latency_ms: Option<u64>,
    pub speed: Option<bool>,
    pub min_mbps: Option<f64>,
    pub retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub qps: Option<u32>,
    pub deadline_secs: Option<u64>,
    pub format: Option<String>,
    pub out: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct Config {
    pub scan: Option<ScanSection>,
}

/// Load `path`, or `./sweep.yaml` when no path is given and that file
/// exists. An explicit path that cannot be read or parsed is an error.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("read config {}", path.display()))?;
    let cfg = serde_yaml::from_str(&s).with_context(|| format!("parse config {}", path.display()))?;
    Ok(Some(cfg))
}
