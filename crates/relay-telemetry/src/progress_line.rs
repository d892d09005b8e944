//! Adapter for external CLI transfer tools that report progress as text,
//! e.g. `Transferred: 1.5G / 2.0 GiB, 75%, 3.5 MiB/s, ETA 10s`.
//!
//! Units are 1024-based regardless of an `i` infix.

use std::sync::LazyLock;

use regex::Regex;
use relay_types::{TaskKey, TaskState, TransferTask};

use crate::aggregator::TelemetryAggregator;

static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.]+)\s*([KMGTP]?)I?B?").expect("valid size regex"));

static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Transferred:\s*(.*?) / (.*?), (.*?)%, (.*?/s)?, ETA (.*?)$")
        .expect("valid progress regex")
});

/// One parsed progress line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressLine {
    pub transferred_bytes: u64,
    pub total_bytes: u64,
    pub percent: f64,
    pub speed_bytes_per_sec: u64,
    pub eta: String,
}

/// `"1.5MB"`, `"100k"`, `"2.0 GiB"` → bytes. Unparseable input is zero.
pub fn parse_size(text: &str) -> u64 {
    let upper = text.trim().to_ascii_uppercase();
    let Some(caps) = SIZE_RE.captures(&upper) else {
        return 0;
    };
    let Ok(value) = caps[1].parse::<f64>() else {
        return 0;
    };
    let multiplier: u64 = match &caps[2] {
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        "P" => 1 << 50,
        _ => 1,
    };
    (value * multiplier as f64) as u64
}

pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let caps = PROGRESS_RE.captures(line.trim_end())?;
    let speed = caps
        .get(4)
        .map(|m| parse_size(m.as_str().trim_end_matches("/s")))
        .unwrap_or(0);
    Some(ProgressLine {
        transferred_bytes: parse_size(&caps[1]),
        total_bytes: parse_size(&caps[2]),
        percent: caps[3].trim().parse().unwrap_or(0.0),
        speed_bytes_per_sec: speed,
        eta: caps[5].trim().to_string(),
    })
}

/// The per-file summary line the tool prints once a single-file copy is done.
pub fn is_completion_line(line: &str) -> bool {
    line.contains("Transferred") && line.contains("100%") && line.contains("1 / 1")
}

impl TelemetryAggregator {
    /// Feeds one text line into the same `update` path native streams use.
    /// A completion summary fills the task and marks it successful.
    /// Lines that are not progress reports are ignored.
    pub fn update_from_line(&self, key: TaskKey, line: &str, display_name: &str) -> Option<TransferTask> {
        if is_completion_line(line) {
            let total = self.get_task(key).map(|t| t.total_bytes).unwrap_or(0);
            self.update(key, total, total, None, display_name);
            self.set_eta(key, None);
            self.set_state(key, TaskState::Success);
            return self.get_task(key);
        }
        let progress = parse_progress_line(line)?;
        let task = self.update(
            key,
            progress.transferred_bytes,
            progress.total_bytes,
            Some(progress.speed_bytes_per_sec),
            display_name,
        );
        let eta = (!progress.eta.is_empty()).then_some(progress.eta);
        self.set_eta(key, eta.clone());
        Some(TransferTask { eta, ..task })
    }
}
