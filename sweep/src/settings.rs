use crate::config::ScanSection;
use crate::OutputFormat;
use anyhow::{anyhow, Result};
use clap::ValueEnum;
use probe::{ProbeOptions, ThroughputOptions};
use scan::ScanConfig;
use std::path::PathBuf;
use std::time::Duration;
use sweep_core::{ConfigError, Thresholds};

/// Scan flags as given on the command line; `None` means "not given".
#[derive(Debug, Default, Clone)]
pub struct ScanFlags {
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub max_latency_ms: Option<u64>,
    pub speed: bool,
    pub min_mbps: Option<f64>,
    pub retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub qps: Option<u32>,
    pub deadline_secs: Option<u64>,
    pub format: Option<OutputFormat>,
    pub out: Option<PathBuf>,
}

/// Fully resolved scan settings: flag, then config file, then default.
#[derive(Debug, Clone)]
pub struct Settings {
    pub probe: ProbeOptions,
    pub scan: ScanConfig,
    pub throughput: Option<ThroughputOptions>,
    pub format: OutputFormat,
    pub out: Option<PathBuf>,
}

/// Parse a config-file `format` value the way the `--format` flag does.
pub fn parse_format(s: &str) -> Result<OutputFormat> {
    <OutputFormat as ValueEnum>::from_str(s, true).map_err(|e| anyhow!("invalid format `{s}` in config: {e}"))
}

pub fn resolve(flags: &ScanFlags, file: Option<&ScanSection>) -> Result<Settings> {
    let file = file.cloned().unwrap_or_default();
    let defaults = ProbeOptions::default();

    let timeout_ms = flags.timeout_ms.or(file.timeout_ms).unwrap_or(defaults.timeout.as_millis() as u64);
    if timeout_ms == 0 {
        return Err(ConfigError::InvalidTimeout.into());
    }
    let probe = ProbeOptions {
        timeout: Duration::from_millis(timeout_ms),
        retries: flags.retries.or(file.retries).unwrap_or(defaults.retries),
        retry_delay: flags
            .retry_delay_ms
            .or(file.retry_delay_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_delay),
    };

    let mut thresholds = Thresholds::default();
    if let Some(ms) = flags.max_latency_ms.or(file.max_latency_ms) {
        thresholds.max_latency_ms = ms;
    }
    let speed = flags.speed || file.speed.unwrap_or(false);
    let throughput = if speed {
        let floor = flags.min_mbps.or(file.min_mbps).unwrap_or(Thresholds::DEFAULT_MIN_MBPS);
        thresholds = thresholds.with_throughput(floor);
        Some(ThroughputOptions::default())
    } else {
        None
    };

    // 0 disables pacing
    let qps = flags.qps.or(file.qps).filter(|q| *q > 0);
    let scan = ScanConfig {
        concurrency: flags.concurrency.or(file.concurrency).unwrap_or(scan::DEFAULT_CONCURRENCY),
        thresholds,
        qps,
        deadline: flags.deadline_secs.or(file.deadline_secs).map(Duration::from_secs),
    };
    scan.validate()?;

    let format = match (flags.format, file.format.as_deref()) {
        (Some(f), _) => f,
        (None, Some(s)) => parse_format(s)?,
        (None, None) => OutputFormat::Text,
    };
    let out = flags.out.clone().or_else(|| file.out.map(PathBuf::from));
    Ok(Settings { probe, scan, throughput, format, out })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_flags_or_file() {
        let s = resolve(&ScanFlags::default(), None).unwrap();
        assert_eq!(s.probe.timeout, Duration::from_secs(4));
        assert_eq!(s.scan.concurrency, 100);
        assert_eq!(s.scan.thresholds.max_latency_ms, 800);
        assert!(s.throughput.is_none());
        assert_eq!(s.scan.qps, None);
        assert_eq!(s.format, OutputFormat::Text);
    }

    #[test]
    fn flag_beats_file_beats_default() {
        let file = ScanSection {
            concurrency: Some(10),
            timeout_ms: Some(1500),
            qps: Some(0),
            format: Some("jsonl".into()),
            out: Some("results".into()),
            ..Default::default()
        };
        let flags = ScanFlags { concurrency: Some(20), ..Default::default() };
        let s = resolve(&flags, Some(&file)).unwrap();
        assert_eq!(s.scan.concurrency, 20);
        assert_eq!(s.probe.timeout, Duration::from_millis(1500));
        assert_eq!(s.scan.qps, None);
        assert_eq!(s.format, OutputFormat::Jsonl);
        assert_eq!(s.out, Some(PathBuf::from("results")));
    }

    #[test]
    fn speed_mode_sets_floor() {
        let file = ScanSection { speed: Some(true), ..Default::default() };
        let s = resolve(&ScanFlags::default(), Some(&file)).unwrap();
        assert_eq!(s.scan.thresholds.min_throughput_mbps, Some(1.0));
        let flags = ScanFlags { speed: true, min_mbps: Some(5.0), ..Default::default() };
        let s = resolve(&flags, None).unwrap();
        assert!(s.throughput.is_some());
        assert_eq!(s.scan.thresholds.min_throughput_mbps, Some(5.0));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(resolve(&ScanFlags { timeout_ms: Some(0), ..Default::default() }, None).is_err());
        assert!(resolve(&ScanFlags { concurrency: Some(0), ..Default::default() }, None).is_err());
        assert!(resolve(&ScanFlags { concurrency: Some(5000), ..Default::default() }, None).is_err());
        let bad = ScanSection { format: Some("yaml".into()), ..Default::default() };
        assert!(resolve(&ScanFlags::default(), Some(&bad)).is_err());
        let nan = ScanFlags { speed: true, min_mbps: Some(f64::NAN), ..Default::default() };
        assert!(resolve(&nan, None).is_err());
    }

    #[test]
    fn config_format_matches_flag_spelling() {
        let file = ScanSection { format: Some("JSON".into()), ..Default::default() };
        assert_eq!(resolve(&ScanFlags::default(), Some(&file)).unwrap().format, OutputFormat::Json);
        assert_eq!(parse_format("jsonl").unwrap(), OutputFormat::Jsonl);
        assert!(parse_format("").is_err());
    }
}
