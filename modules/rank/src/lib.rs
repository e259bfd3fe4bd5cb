//! Orders qualifying probe outcomes per protocol family and splits each
//! family into a top band and a normal band.

pub mod output;

pub use output::{band_file_name, format_line, render_band, write_ranking};

use scan::ScanRun;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use sweep_core::{ProbeOutcome, ProtocolFamily, Thresholds};

/// Latency below this puts an endpoint in the fast band.
pub const FAST_LATENCY_MS: u64 = 200;
/// Throughput at or above this puts an endpoint in the ultra band.
pub const ULTRA_MBPS: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMode {
    Latency,
    Throughput,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankConfig {
    pub thresholds: Thresholds,
    pub fast_latency_ms: u64,
    pub ultra_mbps: f64,
}

impl Default for RankConfig {
    fn default() -> Self {
        RankConfig { thresholds: Thresholds::default(), fast_latency_ms: FAST_LATENCY_MS, ultra_mbps: ULTRA_MBPS }
    }
}

impl RankConfig {
    pub fn mode(&self) -> RankMode {
        if self.thresholds.throughput_mode() {
            RankMode::Throughput
        } else {
            RankMode::Latency
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Fast,
    Ultra,
    Normal,
}

impl Band {
    /// File name prefix; the normal band has none.
    pub const fn file_prefix(self) -> Option<&'static str> {
        match self {
            Band::Fast => Some("FAST"),
            Band::Ultra => Some("ULTRA"),
            Band::Normal => None,
        }
    }

    fn top(mode: RankMode) -> Band {
        match mode {
            RankMode::Latency => Band::Fast,
            RankMode::Throughput => Band::Ultra,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedBand {
    pub band: Band,
    pub entries: Vec<ProbeOutcome>,
}

/// Ranked output: family to non-empty bands, top band first.
#[derive(Debug, Clone, Serialize)]
pub struct Ranking {
    pub mode: RankMode,
    pub families: BTreeMap<ProtocolFamily, Vec<RankedBand>>,
}

impl Ranking {
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Number of ranked outcomes across all families and bands.
    pub fn len(&self) -> usize {
        self.bands().map(|(_, b)| b.entries.len()).sum()
    }

    /// Entries of one band, empty if the band was omitted.
    pub fn band(&self, band: Band, family: ProtocolFamily) -> &[ProbeOutcome] {
        self.families
            .get(&family)
            .and_then(|bands| bands.iter().find(|b| b.band == band))
            .map(|b| b.entries.as_slice())
            .unwrap_or(&[])
    }

    pub fn bands(&self) -> impl Iterator<Item = (ProtocolFamily, &RankedBand)> {
        self.families.iter().flat_map(|(family, bands)| bands.iter().map(move |b| (*family, b)))
    }

    pub fn summary(&self) -> RankSummary {
        let mut per_family = BTreeMap::new();
        let mut top = 0;
        let mut speeds = Vec::new();
        for (family, band) in self.bands() {
            *per_family.entry(family).or_insert(0) += band.entries.len();
            if band.band != Band::Normal {
                top += band.entries.len();
            }
            speeds.extend(band.entries.iter().filter_map(|o| o.throughput_mbps));
        }
        let average_mbps = if speeds.is_empty() {
            None
        } else {
            let avg = speeds.iter().sum::<f64>() / speeds.len() as f64;
            Some((avg * 10.0).round() / 10.0)
        };
        RankSummary { total: self.len(), top_band: top, per_family, average_mbps }
    }
}

/// Completion report for a ranked run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankSummary {
    pub total: usize,
    pub top_band: usize,
    pub per_family: BTreeMap<ProtocolFamily, usize>,
    /// Mean throughput of ranked entries that carry one, one decimal.
    pub average_mbps: Option<f64>,
}

fn compare(mode: RankMode, a: &ProbeOutcome, b: &ProbeOutcome) -> Ordering {
    let by_latency = a.latency_ms().cmp(&b.latency_ms());
    let primary = match mode {
        RankMode::Latency => by_latency,
        RankMode::Throughput => {
            let ta = a.throughput_mbps.unwrap_or(f64::NEG_INFINITY);
            let tb = b.throughput_mbps.unwrap_or(f64::NEG_INFINITY);
            tb.total_cmp(&ta).then(by_latency)
        }
    };
    primary.then_with(|| a.endpoint.source().cmp(b.endpoint.source()))
}

fn in_top_band(config: &RankConfig, outcome: &ProbeOutcome) -> bool {
    match config.mode() {
        RankMode::Latency => matches!(outcome.latency_ms(), Some(ms) if ms < config.fast_latency_ms),
        RankMode::Throughput => matches!(outcome.throughput_mbps, Some(mbps) if mbps >= config.ultra_mbps),
    }
}

/// Rank the outcomes that pass `config.thresholds`. The result depends only
/// on the set of outcomes, not the order they arrive in.
pub fn rank<'a, I>(outcomes: I, config: &RankConfig) -> Ranking
where
    I: IntoIterator<Item = &'a ProbeOutcome>,
{
    let mode = config.mode();
    let mut grouped: BTreeMap<ProtocolFamily, Vec<ProbeOutcome>> = BTreeMap::new();
    for o in outcomes {
        if config.thresholds.qualifies(o) {
            grouped.entry(o.endpoint.family()).or_default().push(o.clone());
        }
    }

    let mut families = BTreeMap::new();
    for (family, mut list) in grouped {
        list.sort_by(|a, b| compare(mode, a, b));
        let (top, normal): (Vec<_>, Vec<_>) = list.into_iter().partition(|o| in_top_band(config, o));
        let bands: Vec<RankedBand> = [(Band::top(mode), top), (Band::Normal, normal)]
            .into_iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(band, entries)| RankedBand { band, entries })
            .collect();
        families.insert(family, bands);
    }
    Ranking { mode, families }
}

/// Rank a finished run under the thresholds it was scanned with.
pub fn rank_run(run: &ScanRun, config: &RankConfig) -> Ranking {
    let config = RankConfig { thresholds: run.thresholds, ..*config };
    rank(run.qualifying(), &config)
}
