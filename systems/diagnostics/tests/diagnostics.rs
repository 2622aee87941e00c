use std::time::Duration;

use pathway_core::{ErrorKind, ErrorRecord, Severity};
use pathway_system_diagnostics::{Diagnostics, DiagnosticsSettings, OperatingMode};

fn record(index: u64, level: Severity) -> ErrorRecord {
    ErrorRecord::new(index, level, ErrorKind::Validation, format!("issue {index}"))
}

fn production(batch_size: usize, flush_interval_ms: u64) -> Diagnostics {
    Diagnostics::new(
        DiagnosticsSettings {
            ring_capacity: 8,
            batch_size,
            flush_interval_ms,
        },
        OperatingMode::Production,
    )
}

#[test]
fn ring_retains_only_the_newest_records() {
    let mut diagnostics = Diagnostics::new(
        DiagnosticsSettings {
            ring_capacity: 3,
            ..DiagnosticsSettings::default()
        },
        OperatingMode::Development,
    );

    for index in 0..10 {
        let _ = diagnostics.record(record(index, Severity::Error), Duration::ZERO);
    }

    let recent = diagnostics.recent(10);
    let stamps: Vec<u64> = recent.iter().map(|record| record.timestamp_ms).collect();
    assert_eq!(stamps, vec![7, 8, 9]);
    assert_eq!(diagnostics.stats().total, 10);
    assert_eq!(diagnostics.stats().retained, 3);
}

#[test]
fn production_flushes_when_batch_fills() {
    let mut diagnostics = production(3, 60_000);

    assert!(diagnostics.record(record(1, Severity::Error), Duration::ZERO).is_none());
    assert!(diagnostics.record(record(2, Severity::Warning), Duration::ZERO).is_none());
    let report = diagnostics
        .record(record(3, Severity::Critical), Duration::ZERO)
        .expect("third record fills the batch");

    assert_eq!(report.records, 3);
    assert_eq!(report.critical, 1);
    assert_eq!(report.errors, 1);
    assert_eq!(report.warnings, 1);
    assert_eq!(diagnostics.stats().pending, 0);
    assert_eq!(diagnostics.stats().flushes, 1);
}

#[test]
fn production_flushes_after_interval() {
    let mut diagnostics = production(100, 1_000);

    let _ = diagnostics.record(record(1, Severity::Error), Duration::from_millis(10));
    assert!(diagnostics.poll(Duration::from_millis(500)).is_none());
    assert_eq!(diagnostics.stats().pending, 1);

    let report = diagnostics
        .poll(Duration::from_millis(1_010))
        .expect("interval elapsed");
    assert_eq!(report.records, 1);
    assert_eq!(diagnostics.stats().pending, 0);
}

#[test]
fn switching_mode_flushes_pending_batch_and_keeps_history() {
    let mut diagnostics = production(100, 60_000);
    let _ = diagnostics.record(record(1, Severity::Error), Duration::ZERO);
    let _ = diagnostics.record(record(2, Severity::Error), Duration::ZERO);

    let report = diagnostics.set_mode(OperatingMode::Development, Duration::from_millis(5));

    assert_eq!(report.map(|report| report.records), Some(2));
    assert_eq!(diagnostics.mode(), OperatingMode::Development);
    assert_eq!(diagnostics.recent(5).len(), 2);
    assert!(diagnostics.record(record(3, Severity::Error), Duration::from_millis(6)).is_none());
    assert_eq!(diagnostics.stats().pending, 0);
}

#[test]
fn stats_break_down_by_kind() {
    let mut diagnostics =
        Diagnostics::new(DiagnosticsSettings::default(), OperatingMode::Development);
    let _ = diagnostics.record(record(1, Severity::Error), Duration::ZERO);
    let _ = diagnostics.record(
        ErrorRecord::new(2, Severity::Critical, ErrorKind::ConfigCorruption, "bad profile"),
        Duration::ZERO,
    );

    let stats = diagnostics.stats();
    assert_eq!(stats.by_kind.get(&ErrorKind::Validation), Some(&1));
    assert_eq!(stats.by_kind.get(&ErrorKind::ConfigCorruption), Some(&1));
    assert_eq!(stats.critical, 1);

    diagnostics.reset();
    assert_eq!(diagnostics.stats().total, 0);
    assert!(diagnostics.recent(5).is_empty());
}
