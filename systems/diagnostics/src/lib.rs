#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Error retention and emission policy for the two operating postures.
//!
//! Development posture emits every record immediately as its own `tracing`
//! event. Production posture accumulates records into a batch that is emitted
//! as one aggregated event once it reaches the configured size or once the
//! flush interval has elapsed. Both postures keep the most recent records in a
//! fixed-capacity [`ErrorRing`] for introspection.

use std::{
    collections::{BTreeMap, VecDeque},
    time::Duration,
};

use pathway_core::{ErrorKind, ErrorRecord, Severity};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Operating posture of the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Verbose, individually logged errors and full validation.
    #[default]
    Development,
    /// Batched logging, lightweight validation and reduced budgets.
    Production,
}

impl OperatingMode {
    /// Maps the boolean production switch onto a posture.
    #[must_use]
    pub const fn from_production_flag(production: bool) -> Self {
        if production {
            Self::Production
        } else {
            Self::Development
        }
    }

    /// Reports whether the posture is production.
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Retention and batching policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    /// Number of recent records retained for introspection.
    pub ring_capacity: usize,
    /// Batch length that triggers a production flush.
    pub batch_size: usize,
    /// Milliseconds after which a non-empty production batch is flushed.
    pub flush_interval_ms: u64,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            ring_capacity: 64,
            batch_size: 16,
            flush_interval_ms: 5_000,
        }
    }
}

/// Fixed-capacity circular store of the most recent records.
#[derive(Clone, Debug)]
pub struct ErrorRing {
    records: VecDeque<ErrorRecord>,
    capacity: usize,
}

impl ErrorRing {
    /// Creates an empty ring; a zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a record, returning the oldest one when it was overwritten.
    pub fn push(&mut self, record: ErrorRecord) -> Option<ErrorRecord> {
        let overwritten = if self.records.len() == self.capacity {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        overwritten
    }

    /// Up to `count` newest records, oldest first.
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<ErrorRecord> {
        let skip = self.records.len().saturating_sub(count);
        self.records.iter().skip(skip).cloned().collect()
    }

    /// Number of retained records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Reports whether no record is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of retained records.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the capacity, dropping the oldest records that no longer fit.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.records.len() > self.capacity {
            let _ = self.records.pop_front();
        }
    }

    /// Drops every retained record.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Aggregate counters over every record seen since the last reset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStats {
    /// Records seen.
    pub total: u64,
    /// Critical records seen.
    pub critical: u64,
    /// Error records seen.
    pub errors: u64,
    /// Warning records seen.
    pub warnings: u64,
    /// Records seen per kind.
    pub by_kind: BTreeMap<ErrorKind, u64>,
    /// Aggregated production flushes emitted.
    pub flushes: u64,
    /// Records waiting in the production batch.
    pub pending: usize,
    /// Records retained in the ring.
    pub retained: usize,
}

/// Summary of one emitted production batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Records in the batch.
    pub records: usize,
    /// Critical records in the batch.
    pub critical: usize,
    /// Error records in the batch.
    pub errors: usize,
    /// Warning records in the batch.
    pub warnings: usize,
}

/// Posture-aware error sink.
#[derive(Clone, Debug)]
pub struct Diagnostics {
    mode: OperatingMode,
    settings: DiagnosticsSettings,
    ring: ErrorRing,
    batch: Vec<ErrorRecord>,
    batch_started: Duration,
    stats: ErrorStats,
}

impl Diagnostics {
    /// Creates a sink in the provided posture.
    #[must_use]
    pub fn new(settings: DiagnosticsSettings, mode: OperatingMode) -> Self {
        Self {
            mode,
            settings,
            ring: ErrorRing::with_capacity(settings.ring_capacity),
            batch: Vec::new(),
            batch_started: Duration::ZERO,
            stats: ErrorStats::default(),
        }
    }

    /// Active posture.
    #[must_use]
    pub const fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Policy in use.
    #[must_use]
    pub const fn settings(&self) -> &DiagnosticsSettings {
        &self.settings
    }

    /// Logs a record according to the active posture.
    ///
    /// `now` is the engine-relative time used to drive the flush interval.
    /// Returns the flush the record triggered, if any.
    pub fn record(&mut self, record: ErrorRecord, now: Duration) -> Option<FlushReport> {
        self.count(&record);

        match self.mode {
            OperatingMode::Development => {
                emit_record(&record);
                let _ = self.ring.push(record);
                None
            }
            OperatingMode::Production => {
                if self.batch.is_empty() {
                    self.batch_started = now;
                }
                let _ = self.ring.push(record.clone());
                self.batch.push(record);
                if self.batch.len() >= self.settings.batch_size.max(1) {
                    return self.flush();
                }
                self.poll(now)
            }
        }
    }

    /// Flushes the production batch when its interval has elapsed.
    pub fn poll(&mut self, now: Duration) -> Option<FlushReport> {
        if self.batch.is_empty() {
            return None;
        }

        let interval = Duration::from_millis(self.settings.flush_interval_ms);
        if now.saturating_sub(self.batch_started) >= interval {
            return self.flush();
        }
        None
    }

    /// Emits the pending batch as one aggregated event.
    pub fn flush(&mut self) -> Option<FlushReport> {
        if self.batch.is_empty() {
            return None;
        }

        let mut report = FlushReport {
            records: self.batch.len(),
            ..FlushReport::default()
        };
        let mut kinds: BTreeMap<&'static str, usize> = BTreeMap::new();
        for record in &self.batch {
            match record.level {
                Severity::Critical => report.critical += 1,
                Severity::Error => report.errors += 1,
                Severity::Warning => report.warnings += 1,
            }
            *kinds.entry(record.kind.as_str()).or_insert(0) += 1;
        }
        let latest = self
            .batch
            .last()
            .map(|record| record.message.clone())
            .unwrap_or_default();

        if report.critical > 0 || report.errors > 0 {
            error!(
                records = report.records,
                critical = report.critical,
                errors = report.errors,
                warnings = report.warnings,
                ?kinds,
                latest = %latest,
                "batched engine errors"
            );
        } else {
            warn!(
                records = report.records,
                warnings = report.warnings,
                ?kinds,
                latest = %latest,
                "batched engine warnings"
            );
        }

        self.batch.clear();
        self.stats.flushes += 1;
        Some(report)
    }

    /// Switches posture, flushing any pending batch first.
    ///
    /// Retained records survive the switch; batching restarts from `now`.
    pub fn set_mode(&mut self, mode: OperatingMode, now: Duration) -> Option<FlushReport> {
        let report = self.flush();
        self.mode = mode;
        self.batch_started = now;
        report
    }

    /// Replaces the policy, resizing the ring and keeping the newest records.
    pub fn configure(&mut self, settings: DiagnosticsSettings) {
        self.settings = settings;
        self.ring.resize(settings.ring_capacity);
    }

    /// Up to `count` newest retained records, oldest first.
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<ErrorRecord> {
        self.ring.recent(count)
    }

    /// Counters since the last reset.
    #[must_use]
    pub fn stats(&self) -> ErrorStats {
        ErrorStats {
            pending: self.batch.len(),
            retained: self.ring.len(),
            ..self.stats.clone()
        }
    }

    /// Drops retained records, the pending batch and every counter.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.batch.clear();
        self.stats = ErrorStats::default();
    }

    fn count(&mut self, record: &ErrorRecord) {
        self.stats.total += 1;
        match record.level {
            Severity::Critical => self.stats.critical += 1,
            Severity::Error => self.stats.errors += 1,
            Severity::Warning => self.stats.warnings += 1,
        }
        *self.stats.by_kind.entry(record.kind).or_insert(0) += 1;
    }
}

fn emit_record(record: &ErrorRecord) {
    match record.level {
        Severity::Critical | Severity::Error => error!(
            level = record.level.as_str(),
            kind = record.kind.as_str(),
            timestamp_ms = record.timestamp_ms,
            "{}",
            record.message
        ),
        Severity::Warning => warn!(
            kind = record.kind.as_str(),
            timestamp_ms = record.timestamp_ms,
            "{}",
            record.message
        ),
    }
}
