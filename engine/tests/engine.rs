use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use pathway_core::{
    ErrorKind, LevelDefinition, LevelId, PathMode, Point, ProfileOverride, Severity,
    ValidationRule,
};
use pathway_engine::{
    EngineConfig, EngineError, GenerationRequest, LevelConfig, PathEngine, Progress, TaskError,
    TaskPoll,
};
use pathway_system_diagnostics::DiagnosticsSettings;
use pathway_system_generation::Stage;
use serde_json::json;

fn request(level: u32, theme: &str, mode: PathMode, seed: u64) -> GenerationRequest {
    GenerationRequest::new(LevelId::new(level), theme, mode).with_seed(seed)
}

fn with_level(mut config: EngineConfig, id: u32, anchors: &[(f32, f32)]) -> EngineConfig {
    let points: Vec<Point> = anchors.iter().map(|&(x, y)| Point::new(x, y)).collect();
    let (entry, rest) = points.split_first().expect("entry");
    let (exit, waypoints) = rest.split_last().expect("exit");
    config.levels.push(LevelConfig {
        id: LevelId::new(id),
        definition: LevelDefinition::new(*entry, waypoints, *exit, "balanced"),
    });
    config
}

fn chunked_config() -> EngineConfig {
    EngineConfig {
        task_chunk_iterations: 1,
        ..EngineConfig::default()
    }
}

#[test]
fn seeded_requests_are_served_from_cache_on_repeat() {
    let mut engine = PathEngine::default();
    let request = request(2, "forest", PathMode::Dynamic, 42);

    let first = engine.generate(&request).expect("first generation");
    let second = engine.generate(&request).expect("second generation");

    assert_eq!(first.points(), second.points());
    assert!(!first.metadata().from_cache);
    assert!(second.metadata().from_cache);
    assert_eq!(first.entry(), Point::new(20.0, 100.0));
    assert_eq!(first.exit(), Point::new(780.0, 500.0));

    let validation = engine
        .validate(first.points(), "balanced", None)
        .expect("known profile");
    assert!(validation.is_valid(), "{:?}", validation.issues());

    let stats = engine.performance_stats();
    assert_eq!(stats.generations, 2);
    assert_eq!(stats.cache_served, 1);
    assert_eq!(stats.cache.hits, 1);
    assert_eq!(stats.cache.result_entries, 1);
    assert_eq!(stats.validations, 1);
    assert!(stats.average_validation_time() <= stats.total_validation_time);
}

#[test]
fn identical_requests_on_fresh_engines_agree() {
    let request = request(3, "cyber", PathMode::Hybrid, 9);
    let mut left = PathEngine::default();
    let mut right = PathEngine::default();

    let first = left.generate(&request).expect("left");
    let second = right.generate(&request).expect("right");

    assert_eq!(first.points(), second.points());
    assert_eq!(first.metadata().retry_count, second.metadata().retry_count);
}

#[test]
fn static_mode_returns_the_level_anchors() {
    let mut engine = PathEngine::default();
    let path = engine
        .generate(&request(1, "desert", PathMode::Static, 1))
        .expect("static path");

    let anchors = &engine
        .config()
        .level(LevelId::new(1))
        .expect("level 1")
        .definition
        .anchors;
    assert_eq!(path.points(), anchors.as_slice());
    assert!(!path.metadata().is_fallback);
}

#[test]
fn unseeded_requests_bypass_the_result_cache() {
    let mut engine = PathEngine::default();
    let request = GenerationRequest::new(LevelId::new(1), "cyber", PathMode::Static);

    let first = engine.generate(&request).expect("first");
    let second = engine.generate(&request).expect("second");

    assert!(!first.metadata().from_cache);
    assert!(!second.metadata().from_cache);
    assert_eq!(engine.performance_stats().cache.result_entries, 0);
}

#[test]
fn validation_reports_points_outside_the_world() {
    let mut engine = PathEngine::default();
    let points = [
        Point::new(20.0, 300.0),
        Point::new(100.0, 300.0),
        Point::new(180.0, 300.0),
        Point::new(260.0, -50.0),
    ];

    let result = engine
        .validate(&points, "lenient", None)
        .expect("known profile");

    assert!(!result.is_valid());
    assert!(result.has_issue(ValidationRule::Bounds, Severity::Error));
    assert_eq!(
        engine.error_stats().by_kind.get(&ErrorKind::Validation),
        Some(&1)
    );
}

#[test]
fn validation_rejects_unknown_profiles_only_in_development() {
    let points = [Point::new(20.0, 300.0), Point::new(100.0, 300.0)];
    let mut engine = PathEngine::default();

    let error = engine
        .validate(&points, "brutal", None)
        .expect_err("unknown profile");
    assert!(matches!(error, EngineError::UnknownProfile(name) if name == "brutal"));

    engine.set_production_mode(true);
    let result = engine
        .validate(&points, "brutal", None)
        .expect("production degrades to the default profile");
    assert!(result.is_valid());
    assert_eq!(engine.error_stats().by_kind.get(&ErrorKind::InvalidInput), Some(&2));
}

#[test]
fn validation_override_tightens_the_named_profile() {
    let mut engine = PathEngine::default();
    let points = [
        Point::new(20.0, 300.0),
        Point::new(100.0, 300.0),
        Point::new(180.0, 300.0),
    ];
    let tight = ProfileOverride {
        max_segment_length: Some(60.0),
        min_segment_length: Some(30.0),
        ..ProfileOverride::default()
    };

    assert!(engine
        .validate(&points, "balanced", None)
        .expect("plain")
        .is_valid());
    let result = engine
        .validate(&points, "balanced", Some(&tight))
        .expect("override");
    assert!(result.has_issue(ValidationRule::SegmentLength, Severity::Error));

    let broken = ProfileOverride {
        min_segment_length: Some(500.0),
        ..ProfileOverride::default()
    };
    let error = engine
        .validate(&points, "balanced", Some(&broken))
        .expect_err("inverted band");
    assert!(matches!(error, EngineError::InvalidValidationOverride(_)));
}

#[test]
fn memory_pressure_is_relieved_by_cleanup() {
    let mut config = EngineConfig::default();
    config.cache.threshold_bytes = 1024;
    config.cache.auto_cleanup = false;
    let mut engine = PathEngine::new(config);

    for seed in 0..8 {
        let _ = engine
            .generate(&request(1, "cyber", PathMode::Static, seed))
            .expect("static path");
    }
    assert!(engine.is_memory_pressure_high());

    let report = engine.run_cache_cleanup();
    assert!(report.evicted > 0);
    assert!(report.footprint_bytes <= 768);
    assert!(!engine.is_memory_pressure_high());
    assert_eq!(engine.performance_stats().cache.cleanups, 1);
}

#[test]
fn automatic_cleanup_keeps_the_cache_under_its_threshold() {
    let mut config = EngineConfig::default();
    config.cache.threshold_bytes = 1024;
    let mut engine = PathEngine::new(config);

    for seed in 0..8 {
        let _ = engine
            .generate(&request(1, "cyber", PathMode::Static, seed))
            .expect("static path");
    }

    assert!(!engine.is_memory_pressure_high());
    assert!(engine.performance_stats().cache.evictions > 0);
}

#[test]
fn cancelled_tasks_stop_reporting_and_skip_the_cache() {
    let mut engine = PathEngine::new(chunked_config());
    let request = request(2, "forest", PathMode::Dynamic, 3);
    let reports = Rc::new(Cell::new(0_usize));
    let counter = Rc::clone(&reports);

    let mut task = engine.generate_async(&request, move |_| counter.set(counter.get() + 1));
    assert!(matches!(engine.poll_task(&mut task), TaskPoll::Pending(_)));
    assert_eq!(reports.get(), 1);

    assert!(engine.cancel());
    assert!(matches!(
        engine.poll_task(&mut task),
        TaskPoll::Ready(Err(TaskError::Cancelled))
    ));
    assert_eq!(reports.get(), 1);
    assert!(matches!(
        engine.poll_task(&mut task),
        TaskPoll::Ready(Err(TaskError::Completed))
    ));
    assert!(!engine.cancel());

    let stats = engine.performance_stats();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.cache.result_entries, 0);

    let path = engine.generate(&request).expect("fresh generation");
    assert!(!path.metadata().from_cache);
}

#[test]
fn cancelled_static_fallback_task_is_never_cached() {
    let config = with_level(chunked_config(), 9, &[(20.0, 300.0), (400.0, 300.0), (780.0, 300.0)]);
    let mut engine = PathEngine::new(config);
    let request = request(9, "cyber", PathMode::Static, 3);
    let reports = Rc::new(Cell::new(0_usize));
    let counter = Rc::clone(&reports);

    let mut task = engine.generate_async(&request, move |_| counter.set(counter.get() + 1));
    assert!(engine.cancel());
    assert!(matches!(
        engine.poll_task(&mut task),
        TaskPoll::Ready(Err(TaskError::Cancelled))
    ));
    assert_eq!(reports.get(), 0);
    let stats = engine.performance_stats();
    assert_eq!(stats.cache.result_entries, 0);
    assert_eq!(stats.fallbacks, 0);

    let task = engine.generate_async(&request, |_| {});
    let polled = engine.run_task(task).expect("fallback path");
    assert!(polled.metadata().is_fallback);
    assert!(!polled.metadata().from_cache);

    let cached = engine.generate(&request).expect("cached fallback");
    assert!(cached.metadata().from_cache);
    assert_eq!(cached.points(), polled.points());
    assert_eq!(engine.performance_stats().fallbacks, 1);
}

#[test]
fn every_level_fallback_satisfies_its_profile() {
    let mut config = EngineConfig::default();
    config.development.max_retries = 0;
    let mut engine = PathEngine::new(config);

    for (level, profile) in [(1, "strict"), (2, "balanced"), (3, "lenient"), (42, "balanced")] {
        let path = engine
            .generate(&request(level, "cyber", PathMode::Dynamic, 1))
            .expect("fallback path");
        assert!(path.metadata().is_fallback, "level {level}");

        let validation = engine
            .validate(path.points(), profile, None)
            .expect("known profile");
        assert!(validation.is_valid(), "level {level}: {:?}", validation.issues());
    }
}

#[test]
fn level_whose_fallback_cannot_validate_is_dropped() {
    let config = with_level(EngineConfig::default(), 9, &[(100.0, 300.0), (115.0, 300.0)]);
    let engine = PathEngine::new(config);

    assert!(engine.config().level(LevelId::new(9)).is_none());
    assert_eq!(engine.config().levels.len(), 3);
    assert_eq!(
        engine.error_stats().by_kind.get(&ErrorKind::ConfigCorruption),
        Some(&1)
    );
}

#[test]
fn override_that_breaks_the_fallback_is_rejected() {
    let config = with_level(EngineConfig::default(), 9, &[(100.0, 300.0), (160.0, 300.0)]);
    let mut engine = PathEngine::new(config);

    let error = engine
        .set_level_override(
            LevelId::new(9),
            ProfileOverride {
                min_segment_length: Some(100.0),
                max_segment_length: Some(140.0),
                ..ProfileOverride::default()
            },
        )
        .expect_err("fallback segment too short");

    assert!(matches!(
        error,
        EngineError::FallbackRejected { level, .. } if level == LevelId::new(9)
    ));
    assert!(engine.level_override(LevelId::new(9)).is_none());
}

#[test]
fn tasks_report_progress_and_finish_at_full_completion() {
    let mut engine = PathEngine::new(chunked_config());
    let seen: Rc<RefCell<Vec<Progress>>> = Rc::default();
    let sink = Rc::clone(&seen);

    let task = engine.generate_async(&request(2, "cyber", PathMode::Dynamic, 11), move |progress| {
        sink.borrow_mut().push(progress.clone());
    });
    let path = engine.run_task(task).expect("task resolves");

    let seen = seen.borrow();
    assert!(seen.len() > 1);
    let last = seen.last().expect("final report");
    assert_eq!(last.stage, Stage::Finalize);
    assert_eq!(last.percent, 100);
    assert!(seen.iter().all(|progress| progress.percent <= 100));

    let synchronous = engine
        .generate(&request(2, "cyber", PathMode::Dynamic, 11))
        .expect("cached");
    assert!(synchronous.metadata().from_cache);
    assert_eq!(synchronous.points(), path.points());
}

#[test]
fn newer_task_supersedes_an_older_one_for_the_same_request() {
    let mut engine = PathEngine::new(chunked_config());
    let request = request(2, "forest", PathMode::Dynamic, 21);

    let older = engine.generate_async(&request, |_| {});
    let newer = engine.generate_async(&request, |_| {});

    assert!(matches!(engine.run_task(older), Err(TaskError::Superseded)));
    let path = engine.run_task(newer).expect("newer task wins");
    assert!(!path.metadata().from_cache);
    assert_eq!(engine.performance_stats().superseded, 1);
}

#[test]
fn structure_mutation_forces_recomputation() {
    let mut engine = PathEngine::default();
    let computations = Cell::new(0_u32);
    let derive = |tower: &serde_json::Value| {
        computations.set(computations.get() + 1);
        tower["cannon"].clone()
    };

    let first = engine.structure("tower", "cannon", derive).expect("tower");
    let second = engine.structure("tower", "cannon", derive).expect("tower");
    assert_eq!(first, second);
    assert_eq!(computations.get(), 1);

    engine.set_structure_config("tower", json!({"cannon": {"range": 6}}));
    let third = engine.structure("tower", "cannon", derive).expect("tower");
    assert_eq!(computations.get(), 2);
    assert_eq!(third, json!({"range": 6}));

    let error = engine
        .structure("wall", "stone", |_| json!(null))
        .expect_err("unknown entity");
    assert!(matches!(error, EngineError::UnknownStructure(name) if name == "wall"));
}

#[test]
fn level_override_invalidates_cached_results() {
    let mut engine = PathEngine::default();
    let request = request(1, "desert", PathMode::Static, 7);

    let _ = engine.generate(&request).expect("first");
    assert!(engine.generate(&request).expect("cached").metadata().from_cache);

    engine
        .set_level_override(
            LevelId::new(1),
            ProfileOverride {
                max_turn_angle: Some(80.0),
                ..ProfileOverride::default()
            },
        )
        .expect("valid override");
    let regenerated = engine.generate(&request).expect("regenerated");

    assert!(!regenerated.metadata().from_cache);
    assert_eq!(
        engine.level_profile(LevelId::new(1)).map(|profile| profile.max_turn_angle),
        Some(80.0)
    );
    assert_eq!(engine.performance_stats().cache.invalidations, 1);
}

#[test]
fn invalid_level_override_is_rejected_in_development() {
    let mut engine = PathEngine::default();
    let error = engine
        .set_level_override(
            LevelId::new(1),
            ProfileOverride {
                min_segment_length: Some(500.0),
                ..ProfileOverride::default()
            },
        )
        .expect_err("inverted band");

    assert!(matches!(
        error,
        EngineError::InvalidOverride { level, .. } if level == LevelId::new(1)
    ));
    assert!(engine.level_override(LevelId::new(1)).is_none());
}

#[test]
fn unknown_levels_follow_the_operating_posture() {
    let config = EngineConfig {
        allow_default_level: false,
        ..EngineConfig::default()
    };
    let mut engine = PathEngine::new(config);
    let request = request(99, "cyber", PathMode::Dynamic, 5);

    let error = engine.generate(&request).expect_err("development surfaces");
    assert!(matches!(error, EngineError::UnknownLevel(level) if level == LevelId::new(99)));

    engine.set_production_mode(true);
    let path = engine.generate(&request).expect("production degrades");
    assert!(path.points().len() >= 2);
    assert_eq!(engine.error_stats().by_kind.get(&ErrorKind::InvalidInput), Some(&2));
}

#[test]
fn unknown_levels_use_the_spanning_default_when_allowed() {
    let mut engine = PathEngine::default();
    let path = engine
        .generate(&request(42, "cyber", PathMode::Static, 1))
        .expect("spanning level");

    assert_eq!(path.entry(), Point::new(20.0, 300.0));
    assert_eq!(path.exit(), Point::new(780.0, 300.0));
    assert!(path.metadata().is_fallback);
}

#[test]
fn exhausted_generation_degrades_to_the_fallback() {
    let mut config = EngineConfig::default();
    config.development.max_retries = 0;
    let mut engine = PathEngine::new(config);

    let path = engine
        .generate(&request(2, "forest", PathMode::Dynamic, 1))
        .expect("fallback path");

    assert!(path.metadata().is_fallback);
    assert_eq!(path.entry(), Point::new(20.0, 100.0));
    assert_eq!(path.exit(), Point::new(780.0, 500.0));
    assert_eq!(engine.performance_stats().fallbacks, 1);
    assert_eq!(
        engine.error_stats().by_kind.get(&ErrorKind::GenerationExhausted),
        Some(&1)
    );
}

#[test]
fn exhausted_generation_without_fallback_is_an_error() {
    let mut config = EngineConfig::default();
    config.development.max_retries = 0;
    config.fallback_enabled = false;
    let mut engine = PathEngine::new(config);

    let error = engine
        .generate(&request(2, "forest", PathMode::Dynamic, 1))
        .expect_err("no fallback");
    assert!(matches!(
        error,
        EngineError::GenerationExhausted { level, .. } if level == LevelId::new(2)
    ));
}

#[test]
fn exported_configuration_restores_overrides_and_results() {
    let mut source = PathEngine::default();
    let request = request(3, "cyber", PathMode::Hybrid, 5);
    let original = source.generate(&request).expect("source path");
    source
        .set_level_override(
            LevelId::new(2),
            ProfileOverride {
                max_turn_angle: Some(70.0),
                ..ProfileOverride::default()
            },
        )
        .expect("override");
    let encoded = source.export_configuration().expect("export");
    assert!(encoded.starts_with("pathway:v1:"));

    let mut target = PathEngine::default();
    let restored = target.import_configuration(&encoded).expect("import");

    assert_eq!(restored, 1);
    assert_eq!(
        target
            .level_override(LevelId::new(2))
            .and_then(|overrides| overrides.max_turn_angle),
        Some(70.0)
    );
    let served = target.generate(&request).expect("target path");
    assert!(served.metadata().from_cache);
    assert_eq!(served.points(), original.points());
}

#[test]
fn malformed_snapshot_leaves_the_engine_untouched() {
    let mut engine = PathEngine::default();
    let error = engine
        .import_configuration("tiles:v1:abc")
        .expect_err("foreign prefix");

    assert!(matches!(error, EngineError::Snapshot(_)));
    assert_eq!(engine.config(), &EngineConfig::default());
}

#[test]
fn error_ring_retains_only_the_newest_records() {
    let config = EngineConfig {
        diagnostics: DiagnosticsSettings {
            ring_capacity: 4,
            ..DiagnosticsSettings::default()
        },
        ..EngineConfig::default()
    };
    let mut engine = PathEngine::new(config);
    let points = [Point::new(20.0, 300.0), Point::new(100.0, 300.0)];

    for attempt in 0..10 {
        let _ = engine
            .validate(&points, &format!("missing-{attempt}"), None)
            .expect_err("unknown profile");
    }

    let recent = engine.recent_errors(100);
    assert_eq!(recent.len(), 4);
    assert!(recent
        .last()
        .expect("newest")
        .message
        .contains("missing-9"));
    assert_eq!(engine.error_stats().total, 10);
}

#[test]
fn corrupt_configuration_is_repaired_and_recorded() {
    let mut config = EngineConfig::default();
    config.task_chunk_iterations = 0;
    config.default_profile = "absent".to_owned();
    let engine = PathEngine::new(config);

    assert_eq!(engine.config().task_chunk_iterations, 32);
    assert_eq!(engine.config().default_profile, "balanced");
    let stats = engine.error_stats();
    assert_eq!(stats.by_kind.get(&ErrorKind::ConfigCorruption), Some(&2));
    assert_eq!(stats.critical, 2);
}
