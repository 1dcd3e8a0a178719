//! Historical traffic cleaning
//!
//! Collection store rows → deduplicated, coerced, imputed and
//! range-checked `PacketRecord`s, plus labelled synthetic anomalies.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::logic::features::layout::NORMALIZED_COLUMNS;
use crate::logic::features::{PacketRecord, RawRecord};
use crate::logic::model::NormalizationParams;

/// Highest valid IP protocol number
const MAX_PROTOCOL: f64 = 255.0;

/// Row counts after each cleaning step
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleaningReport {
    pub initial: usize,
    pub parsed: usize,
    pub deduplicated: usize,
    pub coerced: usize,
    pub imputed: usize,
    pub in_range: usize,
}

/// Training row with its ground-truth label (1 = synthetic anomaly)
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledRecord {
    pub packet: PacketRecord,
    pub label: u8,
}

/// Run every cleaning step over raw store lines
pub fn clean<I, S>(lines: I) -> (Vec<PacketRecord>, CleaningReport)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut report = CleaningReport::default();

    let mut raw = Vec::new();
    for line in lines {
        let line = line.as_ref();
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            continue;
        }
        report.initial += 1;
        if let Some(record) = RawRecord::parse_line(line) {
            raw.push(record);
        }
    }
    report.parsed = raw.len();
    log::info!("Initial number of rows: {} ({} well-formed)", report.initial, report.parsed);

    let mut seen = HashSet::new();
    raw.retain(|record| seen.insert(record.clone()));
    report.deduplicated = raw.len();
    log::info!("Rows after removing duplicates: {}", report.deduplicated);

    let mut packets: Vec<PacketRecord> = raw
        .iter()
        .filter_map(|record| PacketRecord::try_from(record).ok())
        .collect();
    report.coerced = packets.len();
    log::info!("Rows after dropping unparsable values: {}", report.coerced);

    report.imputed = impute_zero_intervals(&mut packets);
    if report.imputed > 0 {
        log::info!("Replaced {} zero time intervals with the median", report.imputed);
    }

    packets.retain(in_range);
    report.in_range = packets.len();
    log::info!("Rows after validating ranges: {}", report.in_range);

    (packets, report)
}

/// Replace `time_interval == 0` with the median of the positive intervals.
/// Returns how many rows were changed.
pub fn impute_zero_intervals(packets: &mut [PacketRecord]) -> usize {
    let positive: Vec<f64> = packets
        .iter()
        .map(|p| p.time_interval)
        .filter(|&t| t > 0.0)
        .collect();

    let Some(median) = median(&positive) else {
        return 0;
    };

    let mut replaced = 0;
    for packet in packets.iter_mut().filter(|p| p.time_interval == 0.0) {
        packet.time_interval = median;
        replaced += 1;
    }
    replaced
}

fn in_range(packet: &PacketRecord) -> bool {
    packet.packet_size > 0.0
        && (0.0..=MAX_PROTOCOL).contains(&packet.protocol)
        && packet.time_interval > 0.0
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;

    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Min-max parameters over the continuous columns; the others pass through
pub fn fit_normalization(packets: &[PacketRecord]) -> NormalizationParams {
    let mut params = NormalizationParams::default();

    for index in NORMALIZED_COLUMNS {
        let (min, max) = packets.iter().filter_map(|p| p.numeric(index)).fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(min, max), v| (min.min(v), max.max(v)),
        );
        if min.is_finite() && max.is_finite() {
            params.min_vals[index] = min as f32;
            params.max_vals[index] = max as f32;
        }
    }

    params
}

/// Extreme, deliberately invalid flows to mix into the training set
pub fn synthesize_anomalies<R: Rng>(count: usize, rng: &mut R) -> Vec<PacketRecord> {
    const SIZES: [f64; 2] = [99999.0, 0.0];
    const PROTOCOLS: [f64; 2] = [999.0, -1.0];
    const SOURCES: [&str; 2] = ["192.168.999.999", "256.256.256.256"];
    const DESTINATIONS: [&str; 2] = ["10.0.0.1", "8.8.8.8"];

    (0..count)
        .map(|_| PacketRecord {
            packet_size: SIZES[rng.gen_range(0..SIZES.len())],
            protocol: PROTOCOLS[rng.gen_range(0..PROTOCOLS.len())],
            src_ip: SOURCES[rng.gen_range(0..SOURCES.len())].to_string(),
            dst_ip: DESTINATIONS[rng.gen_range(0..DESTINATIONS.len())].to_string(),
            time_interval: rng.gen_range(0.001..100.0),
        })
        .collect()
}

/// Label cleaned rows 0, synthetic rows 1, and shuffle them together
pub fn combine<R: Rng>(
    cleaned: Vec<PacketRecord>,
    synthetic: Vec<PacketRecord>,
    rng: &mut R,
) -> Vec<LabeledRecord> {
    let mut combined: Vec<LabeledRecord> = cleaned
        .into_iter()
        .map(|packet| LabeledRecord { packet, label: 0 })
        .chain(
            synthetic
                .into_iter()
                .map(|packet| LabeledRecord { packet, label: 1 }),
        )
        .collect();
    combined.shuffle(rng);
    combined
}
