#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative path engine.
//!
//! [`PathEngine`] owns the configuration, per-level overrides, the memoized
//! version tokens, the cache store and the diagnostics sink. Requests are
//! served from the result cache when their level's configuration subtree is
//! unchanged, otherwise generated through the resumable run of
//! `pathway-system-generation`, either synchronously or as an explicit
//! [`GenerationTask`] polled by the caller.

pub mod config;
mod error;
pub mod snapshot;
pub mod task;

pub use config::{ConfigError, EngineConfig, LevelConfig};
pub use error::EngineError;
pub use snapshot::{CachedResult, ConfigurationSnapshot, LevelOverride, SnapshotError};
pub use task::{CancellationToken, GenerationTask, Progress, TaskError, TaskPoll};

use std::{
    collections::{BTreeMap, HashMap},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use pathway_core::{
    ErrorKind, ErrorRecord, GeneratedPath, LevelDefinition, LevelId, PathMetadata, PathMode,
    Point, ProfileOverride, Severity, Theme, ValidationProfile, ValidationResult, WorldBounds,
};
use pathway_system_cache::{
    version_token, CacheKey, CacheStats, CacheStore, CleanupReport, EstimateSize, Lookup,
    MemoryCache, ResultKey, VersionToken,
};
use pathway_system_diagnostics::{Diagnostics, ErrorStats, FlushReport, OperatingMode};
use pathway_system_generation::{
    fallback_path, GenerationInput, GenerationLimits, GenerationRun, RunOutcome, RunStatus,
    Stage, ThemeStyle,
};
use pathway_system_validation::{ValidationDepth, Validator, ValidatorSettings};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use config::fallback_defect;
use task::{Completion, TaskState, TokenWatch};

/// Value stored in the engine's cache.
#[derive(Clone, Debug, PartialEq)]
pub enum CachedValue {
    /// Generated path in the result namespace.
    Path(GeneratedPath),
    /// Derived structural data in the structural namespace.
    Structure(Value),
}

impl EstimateSize for CachedValue {
    fn estimated_bytes(&self) -> usize {
        match self {
            Self::Path(path) => path.estimated_bytes(),
            Self::Structure(value) => value.estimated_bytes(),
        }
    }
}

/// Path generation request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Level to generate for.
    pub level: LevelId,
    /// Seed; absent seeds are chosen by the engine and bypass the result cache.
    pub seed: Option<u64>,
    /// Requested theme.
    pub theme: Theme,
    /// Generation strategy.
    pub mode: PathMode,
}

impl GenerationRequest {
    /// Creates an unseeded request.
    #[must_use]
    pub fn new(level: LevelId, theme: impl Into<String>, mode: PathMode) -> Self {
        Self {
            level,
            seed: None,
            theme: Theme::new(theme),
            mode,
        }
    }

    /// Pins the request to `seed`.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Generation counters merged with the cache metrics.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PerformanceStats {
    /// Requests that produced a path, cached or not.
    pub generations: u64,
    /// Requests answered from the result cache.
    pub cache_served: u64,
    /// Requests answered with the fallback path.
    pub fallbacks: u64,
    /// Failed attempts across all requests.
    pub retries: u64,
    /// Tasks resolved through cancellation.
    pub cancelled: u64,
    /// Tasks discarded because a newer request owned their cache entry.
    pub superseded: u64,
    /// Explicit validation calls.
    pub validations: u64,
    /// Time spent in explicit validation calls.
    pub total_validation_time: Duration,
    /// Time spent in generation runs.
    pub total_generation_time: Duration,
    /// Longest single generation run.
    pub slowest_generation: Duration,
    /// Cache metrics.
    pub cache: CacheStats,
}

impl PerformanceStats {
    /// Mean time of the runs that were not served from the cache.
    #[must_use]
    pub fn average_generation_time(&self) -> Duration {
        let generated = self.generations.saturating_sub(self.cache_served);
        let divisor = u32::try_from(generated).unwrap_or(u32::MAX);
        self.total_generation_time
            .checked_div(divisor)
            .unwrap_or_default()
    }

    /// Mean time of an explicit validation call.
    #[must_use]
    pub fn average_validation_time(&self) -> Duration {
        let divisor = u32::try_from(self.validations).unwrap_or(u32::MAX);
        self.total_validation_time
            .checked_div(divisor)
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug)]
struct LevelPlan {
    definition: LevelDefinition,
    profile: ValidationProfile,
    fallback: Vec<Point>,
    anchors_valid: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum TokenSubject {
    Level(Option<LevelId>, Theme),
    Structure(String),
}

/// Configuration a level's cached results are derived from.
#[derive(Serialize)]
struct LevelSubtree<'a> {
    world: &'a WorldBounds,
    definition: &'a LevelDefinition,
    profile: &'a ValidationProfile,
    overrides: Option<&'a ProfileOverride>,
    validator: &'a ValidatorSettings,
    limits: GenerationLimits,
    style: ThemeStyle,
    fallback_enabled: bool,
}

enum Prepared {
    Cached(GeneratedPath),
    Fallback {
        path: GeneratedPath,
        completion: Completion,
    },
    Run {
        run: GenerationRun,
        completion: Completion,
    },
}

/// Latest operation allowed to write a result key.
struct Claim {
    operation: u64,
    task: Option<TokenWatch>,
}

impl Claim {
    fn is_live(&self) -> bool {
        self.task.as_ref().map_or(true, TokenWatch::is_alive)
    }
}

/// Path generation, validation and caching engine.
pub struct PathEngine<C = MemoryCache<CachedValue>> {
    config: EngineConfig,
    plans: BTreeMap<LevelId, LevelPlan>,
    spanning: LevelPlan,
    overrides: BTreeMap<LevelId, ProfileOverride>,
    tokens: HashMap<TokenSubject, VersionToken>,
    cache: C,
    diagnostics: Diagnostics,
    validator: Validator,
    stats: PerformanceStats,
    latest_operations: HashMap<ResultKey, Claim>,
    next_operation: u64,
    active: Option<(u64, TokenWatch)>,
    seeds: ChaCha8Rng,
    started: Instant,
}

impl PathEngine {
    /// Creates an engine backed by the in-memory cache.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let cache = MemoryCache::new(config.cache);
        Self::with_store(config, cache)
    }
}

impl Default for PathEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl<C: CacheStore<CachedValue>> PathEngine<C> {
    /// Creates an engine backed by the provided cache store.
    ///
    /// Corrupt configuration subtrees are replaced with defaults and each
    /// replacement is recorded as a critical configuration error.
    #[must_use]
    pub fn with_store(config: EngineConfig, cache: C) -> Self {
        let mode = OperatingMode::from_production_flag(config.production_mode);
        let validator = Validator::default();
        let spanning_definition = LevelDefinition::spanning(&WorldBounds::default());
        let spanning = LevelPlan {
            fallback: vec![spanning_definition.entry, spanning_definition.exit],
            definition: spanning_definition,
            profile: ValidationProfile::default(),
            anchors_valid: false,
        };
        let entropy = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();

        let mut engine = Self {
            config: EngineConfig::default(),
            plans: BTreeMap::new(),
            spanning,
            overrides: BTreeMap::new(),
            tokens: HashMap::new(),
            cache,
            diagnostics: Diagnostics::new(config.diagnostics, mode),
            validator,
            stats: PerformanceStats::default(),
            latest_operations: HashMap::new(),
            next_operation: 0,
            active: None,
            seeds: ChaCha8Rng::seed_from_u64(entropy),
            started: Instant::now(),
        };
        engine.apply_config(config);
        engine
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cache store backing the engine.
    #[must_use]
    pub const fn cache(&self) -> &C {
        &self.cache
    }

    /// Reports whether the engine runs in production posture.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.diagnostics.mode().is_production()
    }

    /// Effective profile of a configured level, overrides applied.
    #[must_use]
    pub fn level_profile(&self, level: LevelId) -> Option<ValidationProfile> {
        self.plans.get(&level).map(|plan| plan.profile)
    }

    /// Override currently attached to `level`.
    #[must_use]
    pub fn level_override(&self, level: LevelId) -> Option<&ProfileOverride> {
        self.overrides.get(&level)
    }

    /// Produces the path for `request`.
    ///
    /// Seeded requests are answered from the result cache while the level's
    /// configuration is unchanged. Exhausted generation returns the fallback
    /// path when it is enabled or the engine is in production posture.
    pub fn generate(&mut self, request: &GenerationRequest) -> Result<GeneratedPath, EngineError> {
        match self.prepare(request)? {
            Prepared::Cached(path) => Ok(path),
            Prepared::Fallback { path, completion } => {
                self.deliver_fallback(&completion, &path);
                Ok(path)
            }
            Prepared::Run { run, completion } => {
                let operation = self.claim_operation(completion.key.as_ref(), None);
                let outcome = run.run_to_completion();
                self.retire_operation(completion.key.as_ref(), operation);
                self.complete(outcome, completion)
            }
        }
    }

    /// Creates a task producing the path for `request`.
    ///
    /// The task does no generation work until it is polled. `on_progress` is
    /// called at every yield and once more when the path is ready, never after
    /// cancellation. The new task becomes the target of [`PathEngine::cancel`].
    pub fn generate_async<F>(
        &mut self,
        request: &GenerationRequest,
        on_progress: F,
    ) -> GenerationTask
    where
        F: FnMut(&Progress) + 'static,
    {
        let token = CancellationToken::new();
        let watch = token.watch();
        let (id, state) = match self.prepare(request) {
            Ok(Prepared::Cached(path)) => (self.issue_operation(), TaskState::Ready(Ok(path))),
            Ok(Prepared::Fallback { path, completion }) => (
                self.claim_operation(completion.key.as_ref(), Some(watch.clone())),
                TaskState::Fallback { path, completion },
            ),
            Ok(Prepared::Run { run, completion }) => (
                self.claim_operation(completion.key.as_ref(), Some(watch.clone())),
                TaskState::Running {
                    run: Box::new(run),
                    completion,
                },
            ),
            Err(error) => (self.issue_operation(), TaskState::Ready(Err(error))),
        };

        self.active = Some((id, watch));
        debug!(task = id, level = %request.level, mode = %request.mode, "generation task created");
        GenerationTask::new(id, token, state, Box::new(on_progress))
    }

    /// Advances `task` by one bounded chunk of work.
    pub fn poll_task(&mut self, task: &mut GenerationTask) -> TaskPoll {
        if task.is_resolved() {
            return TaskPoll::Ready(Err(TaskError::Completed));
        }
        if task.token.is_cancelled() {
            if let Some(completion) = task.state.completion() {
                let key = completion.key.clone();
                self.retire_operation(key.as_ref(), task.id);
            }
            task.state = TaskState::Resolved;
            self.release_task(task.id);
            self.stats.cancelled += 1;
            debug!(task = task.id, "generation task cancelled");
            return TaskPoll::Ready(Err(TaskError::Cancelled));
        }

        match std::mem::replace(&mut task.state, TaskState::Resolved) {
            TaskState::Resolved => TaskPoll::Ready(Err(TaskError::Completed)),
            TaskState::Ready(result) => {
                self.release_task(task.id);
                if result.is_ok() {
                    task.report(&Progress {
                        stage: Stage::Finalize,
                        percent: 100,
                        message: "path ready".to_owned(),
                    });
                }
                TaskPoll::Ready(result.map_err(TaskError::from))
            }
            TaskState::Fallback { path, completion } => {
                self.release_task(task.id);
                let key = completion.key.clone();
                if !self.owns_operation(key.as_ref(), task.id) {
                    self.stats.superseded += 1;
                    debug!(task = task.id, "generation task superseded");
                    return TaskPoll::Ready(Err(TaskError::Superseded));
                }
                self.retire_operation(key.as_ref(), task.id);

                self.deliver_fallback(&completion, &path);
                task.report(&Progress {
                    stage: Stage::Finalize,
                    percent: 100,
                    message: format!("level {}: fallback path ready", completion.level),
                });
                TaskPoll::Ready(Ok(path))
            }
            TaskState::Running {
                mut run,
                completion,
            } => match run.step(self.config.task_chunk_iterations) {
                RunStatus::Running { stage, percent } => {
                    let progress = Progress {
                        stage,
                        percent,
                        message: format!("level {}: {stage} {percent}%", completion.level),
                    };
                    task.report(&progress);
                    task.state = TaskState::Running { run, completion };
                    TaskPoll::Pending(progress)
                }
                RunStatus::Finished(outcome) => {
                    self.release_task(task.id);
                    let key = completion.key.clone();
                    if !self.owns_operation(key.as_ref(), task.id) {
                        self.stats.superseded += 1;
                        debug!(task = task.id, "generation task superseded");
                        return TaskPoll::Ready(Err(TaskError::Superseded));
                    }
                    self.retire_operation(key.as_ref(), task.id);

                    let level = completion.level;
                    let result = self.complete(outcome, completion);
                    if result.is_ok() {
                        task.report(&Progress {
                            stage: Stage::Finalize,
                            percent: 100,
                            message: format!("level {level}: path ready"),
                        });
                    }
                    TaskPoll::Ready(result.map_err(TaskError::from))
                }
            },
        }
    }

    /// Polls `task` until it resolves.
    pub fn run_task(&mut self, mut task: GenerationTask) -> Result<GeneratedPath, TaskError> {
        loop {
            if let TaskPoll::Ready(result) = self.poll_task(&mut task) {
                return result;
            }
        }
    }

    /// Cancels the most recently created task if it is still running.
    pub fn cancel(&mut self) -> bool {
        match self.active.take() {
            Some((id, task)) if task.cancel() => {
                debug!(task = id, "cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Validates `points` against a named profile, optionally overridden.
    pub fn validate(
        &mut self,
        points: &[Point],
        profile_name: &str,
        overrides: Option<&ProfileOverride>,
    ) -> Result<ValidationResult, EngineError> {
        let production = self.is_production();
        let named = match self.config.profile(profile_name).copied() {
            Some(profile) => profile,
            None => {
                self.record(
                    Severity::Error,
                    ErrorKind::InvalidInput,
                    format!("validation profile '{profile_name}' is not defined"),
                );
                if !production {
                    return Err(EngineError::UnknownProfile(profile_name.to_owned()));
                }
                self.config.default_profile()
            }
        };

        let checked = overrides.map(|overrides| (overrides, overrides.check_against(&named)));
        let profile = match checked {
            None => named,
            Some((overrides, Ok(()))) => overrides.apply_to(&named),
            Some((_, Err(source))) => {
                self.record(
                    Severity::Error,
                    ErrorKind::InvalidInput,
                    format!("validation override ignored: {source}"),
                );
                if !production {
                    return Err(EngineError::InvalidValidationOverride(source));
                }
                named
            }
        };

        let started = Instant::now();
        let result = self
            .validator
            .validate(points, &self.config.world, &profile, self.depth());
        self.stats.validations += 1;
        self.stats.total_validation_time += started.elapsed();
        if !result.is_valid() {
            let message = result
                .errors()
                .next()
                .unwrap_or("path is invalid")
                .to_owned();
            self.record(Severity::Error, ErrorKind::Validation, message);
        }
        Ok(result)
    }

    /// Generation counters merged with the cache metrics.
    #[must_use]
    pub fn performance_stats(&self) -> PerformanceStats {
        PerformanceStats {
            cache: self.cache.stats(),
            ..self.stats.clone()
        }
    }

    /// Clears generation counters and cache metrics.
    pub fn reset_performance_stats(&mut self) {
        self.stats = PerformanceStats::default();
        self.cache.reset_stats();
    }

    /// Counters over every recorded error.
    #[must_use]
    pub fn error_stats(&self) -> ErrorStats {
        self.diagnostics.stats()
    }

    /// Up to `count` newest retained errors, oldest first.
    #[must_use]
    pub fn recent_errors(&self, count: usize) -> Vec<ErrorRecord> {
        self.diagnostics.recent(count)
    }

    /// Drops retained errors, the pending batch and the error counters.
    pub fn clear_errors(&mut self) {
        self.diagnostics.reset();
    }

    /// Switches between development and production posture.
    ///
    /// Pending production errors are flushed first. Cached results stay in
    /// place but are only served again in the posture that produced them.
    pub fn set_production_mode(&mut self, production: bool) {
        let mode = OperatingMode::from_production_flag(production);
        self.config.production_mode = production;
        if self.diagnostics.mode() == mode {
            return;
        }

        let _ = self.diagnostics.set_mode(mode, self.started.elapsed());
        self.tokens
            .retain(|subject, _| matches!(subject, TokenSubject::Structure(_)));
        info!(production, "operating posture changed");
    }

    /// Emits any pending production batch immediately.
    pub fn flush_errors(&mut self) -> Option<FlushReport> {
        self.diagnostics.flush()
    }

    /// Flushes the production batch if its interval has elapsed.
    pub fn poll_diagnostics(&mut self) -> Option<FlushReport> {
        self.diagnostics.poll(self.started.elapsed())
    }

    /// Attaches a typed profile override to a configured level.
    ///
    /// Cached results for the level stop being served because its version
    /// token changes.
    pub fn set_level_override(
        &mut self,
        level: LevelId,
        overrides: ProfileOverride,
    ) -> Result<(), EngineError> {
        let production = self.is_production();
        let Some(definition) = self.config.level(level).map(|entry| entry.definition.clone())
        else {
            self.record(
                Severity::Error,
                ErrorKind::InvalidInput,
                format!("override for unknown level {level} ignored"),
            );
            return if production {
                Ok(())
            } else {
                Err(EngineError::UnknownLevel(level))
            };
        };

        if let Err(error) = self.check_override(level, &definition, &overrides) {
            self.record(Severity::Error, ErrorKind::InvalidInput, error.to_string());
            return if production { Ok(()) } else { Err(error) };
        }

        let _ = self.overrides.insert(level, overrides);
        self.forget_level_tokens(level);
        self.rebuild_plan(level);
        debug!(%level, "level override set");
        Ok(())
    }

    /// Detaches the override of `level`, returning whether one was attached.
    pub fn remove_level_override(&mut self, level: LevelId) -> bool {
        if self.overrides.remove(&level).is_none() {
            return false;
        }
        self.forget_level_tokens(level);
        self.rebuild_plan(level);
        true
    }

    /// Encodes configuration, overrides, posture and cached result paths.
    pub fn export_configuration(&self) -> Result<String, EngineError> {
        let results = self
            .cache
            .entries()
            .into_iter()
            .filter_map(|entry| match (entry.key(), entry.value()) {
                (CacheKey::Result(key), CachedValue::Path(path)) => Some(CachedResult {
                    key: key.clone(),
                    version: entry.version(),
                    path: path.clone(),
                }),
                _ => None,
            })
            .collect();
        let snapshot = ConfigurationSnapshot {
            config: self.config.clone(),
            overrides: self
                .overrides
                .iter()
                .map(|(level, overrides)| LevelOverride {
                    level: *level,
                    overrides: *overrides,
                })
                .collect(),
            production: self.is_production(),
            results,
        };
        Ok(snapshot.encode()?)
    }

    /// Replaces configuration, overrides and posture with an exported snapshot.
    ///
    /// Cached paths whose version token still matches are restored; the
    /// number restored is returned. A snapshot that fails to decode leaves the
    /// engine untouched.
    pub fn import_configuration(&mut self, encoded: &str) -> Result<usize, EngineError> {
        let snapshot = ConfigurationSnapshot::decode(encoded)?;

        self.overrides.clear();
        self.apply_config(snapshot.config);
        self.set_production_mode(snapshot.production);
        for LevelOverride { level, overrides } in snapshot.overrides {
            if let Err(error) = self.set_level_override(level, overrides) {
                self.record(
                    Severity::Critical,
                    ErrorKind::ConfigCorruption,
                    format!("imported override dropped: {error}"),
                );
            }
        }

        let mut restored = 0;
        for CachedResult { key, version, path } in snapshot.results {
            let level = if self.plans.contains_key(&key.level) {
                Some(key.level)
            } else if self.config.allow_default_level {
                None
            } else {
                continue;
            };
            if self.level_token(level, &key.theme)? != version {
                continue;
            }
            self.cache
                .put(CacheKey::Result(key), CachedValue::Path(path), version);
            restored += 1;
        }
        self.maybe_cleanup();
        info!(restored, "configuration imported");
        Ok(restored)
    }

    /// Replaces the configuration.
    ///
    /// Memoized version tokens are discarded, so results derived from changed
    /// subtrees are no longer served.
    pub fn reconfigure(&mut self, config: EngineConfig) {
        self.set_production_mode(config.production_mode);
        self.apply_config(config);
        info!(levels = self.plans.len(), "engine reconfigured");
    }

    /// Replaces the structural configuration of one entity type.
    pub fn set_structure_config(&mut self, entity_type: impl Into<String>, value: Value) {
        let entity_type = entity_type.into();
        let _ = self
            .tokens
            .remove(&TokenSubject::Structure(entity_type.clone()));
        let _ = self.config.structures.insert(entity_type, value);
    }

    /// Derived structural data for `(entity_type, variant)`.
    ///
    /// `compute` receives the entity type's configuration subtree and runs
    /// only when no fresh cached value exists.
    pub fn structure<F>(
        &mut self,
        entity_type: &str,
        variant: &str,
        compute: F,
    ) -> Result<Value, EngineError>
    where
        F: FnOnce(&Value) -> Value,
    {
        let Some(subtree) = self.config.structures.get(entity_type) else {
            return Err(EngineError::UnknownStructure(entity_type.to_owned()));
        };

        let subject = TokenSubject::Structure(entity_type.to_owned());
        let version = match self.tokens.get(&subject) {
            Some(token) => *token,
            None => {
                let token = version_token(subtree)?;
                let _ = self.tokens.insert(subject, token);
                token
            }
        };

        let key = CacheKey::structural(entity_type, variant);
        match self.cache.get(&key, version) {
            Lookup::Hit(CachedValue::Structure(value)) => return Ok(value.clone()),
            Lookup::Stale => debug!(entity_type, variant, "structural entry outdated"),
            Lookup::Hit(CachedValue::Path(_)) | Lookup::Miss => {}
        }

        let value = compute(subtree);
        self.cache
            .put(key, CachedValue::Structure(value.clone()), version);
        self.maybe_cleanup();
        Ok(value)
    }

    /// Reports whether the cache footprint exceeds its threshold.
    #[must_use]
    pub fn is_memory_pressure_high(&self) -> bool {
        self.cache.is_memory_pressure_high()
    }

    /// Runs the cache's adaptive cleanup now.
    pub fn run_cache_cleanup(&mut self) -> CleanupReport {
        self.cache.adaptive_cleanup()
    }

    fn apply_config(&mut self, config: EngineConfig) {
        let (config, issues) = config.sanitize();
        self.config = config;
        self.validator = Validator::new(self.config.validator);
        self.cache.configure(self.config.cache);
        self.diagnostics.configure(self.config.diagnostics);
        self.tokens.clear();
        for issue in issues {
            self.record(
                Severity::Critical,
                ErrorKind::ConfigCorruption,
                format!("configuration repaired: {issue}"),
            );
        }

        let overrides = std::mem::take(&mut self.overrides);
        for (level, overrides) in overrides {
            let Some(definition) = self.config.level(level).map(|entry| entry.definition.clone())
            else {
                self.record(
                    Severity::Warning,
                    ErrorKind::ConfigCorruption,
                    format!("override for removed level {level} dropped"),
                );
                continue;
            };
            if let Err(error) = self.check_override(level, &definition, &overrides) {
                self.record(
                    Severity::Critical,
                    ErrorKind::ConfigCorruption,
                    format!("{error}, override dropped"),
                );
                continue;
            }
            let _ = self.overrides.insert(level, overrides);
        }

        self.plans.clear();
        let levels: Vec<LevelId> = self.config.levels.iter().map(|entry| entry.id).collect();
        for level in levels {
            self.rebuild_plan(level);
        }
        self.spanning = self.build_plan(
            LevelDefinition::spanning(&self.config.world),
            self.config.default_profile(),
        );
    }

    fn rebuild_plan(&mut self, level: LevelId) {
        let Some(definition) = self.config.level(level).map(|entry| entry.definition.clone())
        else {
            let _ = self.plans.remove(&level);
            return;
        };

        let profile = self.resolve_profile(&definition.profile, self.overrides.get(&level));
        let plan = self.build_plan(definition, profile);
        if !plan.anchors_valid {
            self.record(
                Severity::Critical,
                ErrorKind::ConfigCorruption,
                format!("level {level} anchors fail validation, static paths use the fallback"),
            );
        }
        let _ = self.plans.insert(level, plan);
    }

    fn check_override(
        &self,
        level: LevelId,
        definition: &LevelDefinition,
        overrides: &ProfileOverride,
    ) -> Result<(), EngineError> {
        let base = self.resolve_profile(&definition.profile, None);
        overrides
            .check_against(&base)
            .map_err(|source| EngineError::InvalidOverride { level, source })?;
        let profile = overrides.apply_to(&base);
        match fallback_defect(&self.validator, definition, &self.config.world, &profile) {
            Some(reason) => Err(EngineError::FallbackRejected { level, reason }),
            None => Ok(()),
        }
    }

    fn build_plan(&self, definition: LevelDefinition, profile: ValidationProfile) -> LevelPlan {
        let fallback = fallback_path(definition.entry, definition.exit, profile.max_segment_length);
        let anchors_valid = self
            .validator
            .validate(
                &definition.anchors,
                &self.config.world,
                &profile,
                ValidationDepth::Full,
            )
            .is_valid();
        LevelPlan {
            definition,
            profile,
            fallback,
            anchors_valid,
        }
    }

    fn resolve_profile(
        &self,
        name: &str,
        overrides: Option<&ProfileOverride>,
    ) -> ValidationProfile {
        ValidationProfile::resolve(
            &self.config.default_profile(),
            self.config.profile(name),
            overrides,
        )
    }

    fn plan(&self, level: Option<LevelId>) -> &LevelPlan {
        level
            .and_then(|id| self.plans.get(&id))
            .unwrap_or(&self.spanning)
    }

    fn depth(&self) -> ValidationDepth {
        if self.is_production() {
            ValidationDepth::Lightweight
        } else {
            ValidationDepth::Full
        }
    }

    fn resolve_level(&mut self, level: LevelId) -> Result<Option<LevelId>, EngineError> {
        if self.plans.contains_key(&level) {
            return Ok(Some(level));
        }
        if self.config.allow_default_level {
            debug!(%level, "serving unconfigured level with the spanning default");
            return Ok(None);
        }

        self.record(
            Severity::Error,
            ErrorKind::InvalidInput,
            format!("level {level} is not configured"),
        );
        if self.is_production() {
            Ok(None)
        } else {
            Err(EngineError::UnknownLevel(level))
        }
    }

    fn level_token(
        &mut self,
        level: Option<LevelId>,
        theme: &Theme,
    ) -> Result<VersionToken, EngineError> {
        let subject = TokenSubject::Level(level, theme.clone());
        if let Some(token) = self.tokens.get(&subject) {
            return Ok(*token);
        }

        let plan = self.plan(level);
        let subtree = LevelSubtree {
            world: &self.config.world,
            definition: &plan.definition,
            profile: &plan.profile,
            overrides: level.and_then(|id| self.overrides.get(&id)),
            validator: &self.config.validator,
            limits: self.config.limits(self.is_production()),
            style: self.config.theme_style(theme),
            fallback_enabled: self.config.fallback_enabled,
        };
        let token = version_token(&subtree)?;
        let _ = self.tokens.insert(subject, token);
        Ok(token)
    }

    fn forget_level_tokens(&mut self, level: LevelId) {
        self.tokens.retain(
            |subject, _| !matches!(subject, TokenSubject::Level(Some(id), _) if *id == level),
        );
    }

    fn prepare(&mut self, request: &GenerationRequest) -> Result<Prepared, EngineError> {
        let level = self.resolve_level(request.level)?;
        let version = self.level_token(level, &request.theme)?;
        let key = request.seed.map(|seed| ResultKey {
            level: request.level,
            theme: request.theme.clone(),
            mode: request.mode,
            seed,
        });

        if let Some(key) = &key {
            let stale = match self.cache.get(&CacheKey::Result(key.clone()), version) {
                Lookup::Hit(CachedValue::Path(path)) => {
                    let metadata = PathMetadata {
                        from_cache: true,
                        ..*path.metadata()
                    };
                    let path = path.with_metadata(metadata);
                    self.stats.generations += 1;
                    self.stats.cache_served += 1;
                    debug!(level = %request.level, seed = key.seed, "result served from cache");
                    return Ok(Prepared::Cached(path));
                }
                Lookup::Stale => true,
                Lookup::Hit(CachedValue::Structure(_)) | Lookup::Miss => false,
            };
            if stale {
                self.record(
                    Severity::Warning,
                    ErrorKind::CacheVersionMismatch,
                    format!("cached path for level {} is outdated", request.level),
                );
            }
        }

        let plan = self.plan(level).clone();
        let completion = Completion {
            level: request.level,
            theme: request.theme.clone(),
            mode: request.mode,
            key,
            version,
            fallback: plan.fallback,
        };

        if request.mode == PathMode::Static && !plan.anchors_valid {
            let path = fallback_for(&completion, PathMetadata::default())?;
            return Ok(Prepared::Fallback { path, completion });
        }

        let seed = match request.seed {
            Some(seed) => seed,
            None => self.seeds.gen(),
        };
        let input = GenerationInput {
            level: request.level,
            theme: request.theme.clone(),
            mode: request.mode,
            seed,
            bounds: self.config.world,
            profile: plan.profile,
            anchors: plan.definition.anchors,
            style: self.config.theme_style(&request.theme),
            limits: self.config.limits(self.is_production()),
            depth: self.depth(),
            validator: self.validator,
        };
        Ok(Prepared::Run {
            run: GenerationRun::new(input),
            completion,
        })
    }

    fn complete(
        &mut self,
        outcome: RunOutcome,
        completion: Completion,
    ) -> Result<GeneratedPath, EngineError> {
        let metadata = *outcome.metadata();
        self.stats.generations += 1;
        self.stats.retries += u64::from(metadata.retry_count);
        self.stats.total_generation_time += metadata.generation_time;
        self.stats.slowest_generation = self.stats.slowest_generation.max(metadata.generation_time);

        let path = match outcome {
            RunOutcome::Accepted { points, .. } => GeneratedPath::new(
                points,
                completion.mode,
                completion.theme.clone(),
                metadata,
            )?,
            RunOutcome::Exhausted { reason, .. } => {
                self.record(
                    Severity::Error,
                    ErrorKind::GenerationExhausted,
                    format!("level {}: {reason}", completion.level),
                );
                if !self.config.fallback_enabled && !self.is_production() {
                    return Err(EngineError::GenerationExhausted {
                        level: completion.level,
                        reason,
                    });
                }
                self.fallback(&completion, metadata)?
            }
        };

        self.store_result(&completion, &path);
        Ok(path)
    }

    fn fallback(
        &mut self,
        completion: &Completion,
        metadata: PathMetadata,
    ) -> Result<GeneratedPath, EngineError> {
        self.stats.fallbacks += 1;
        fallback_for(completion, metadata)
    }

    fn deliver_fallback(&mut self, completion: &Completion, path: &GeneratedPath) {
        self.stats.generations += 1;
        self.stats.fallbacks += 1;
        self.store_result(completion, path);
    }

    fn store_result(&mut self, completion: &Completion, path: &GeneratedPath) {
        let Some(key) = &completion.key else {
            return;
        };
        self.cache.put(
            CacheKey::Result(key.clone()),
            CachedValue::Path(path.clone()),
            completion.version,
        );
        self.maybe_cleanup();
    }

    fn maybe_cleanup(&mut self) {
        if self.config.cache.auto_cleanup && self.cache.is_memory_pressure_high() {
            let report = self.cache.adaptive_cleanup();
            debug!(
                evicted = report.evicted,
                freed = report.freed_bytes,
                "cache cleanup after write"
            );
        }
    }

    fn issue_operation(&mut self) -> u64 {
        self.next_operation += 1;
        self.next_operation
    }

    fn claim_operation(&mut self, key: Option<&ResultKey>, task: Option<TokenWatch>) -> u64 {
        self.latest_operations.retain(|_, claim| claim.is_live());
        let operation = self.issue_operation();
        if let Some(key) = key {
            let _ = self
                .latest_operations
                .insert(key.clone(), Claim { operation, task });
        }
        operation
    }

    fn owns_operation(&self, key: Option<&ResultKey>, operation: u64) -> bool {
        match key {
            Some(key) => self
                .latest_operations
                .get(key)
                .is_some_and(|claim| claim.operation == operation),
            None => true,
        }
    }

    fn retire_operation(&mut self, key: Option<&ResultKey>, operation: u64) {
        if self.owns_operation(key, operation) {
            if let Some(key) = key {
                let _ = self.latest_operations.remove(key);
            }
        }
    }

    fn release_task(&mut self, id: u64) {
        if matches!(&self.active, Some((active, _)) if *active == id) {
            self.active = None;
        }
    }

    fn record(&mut self, level: Severity, kind: ErrorKind, message: impl Into<String>) {
        let now = self.started.elapsed();
        let timestamp_ms = u64::try_from(now.as_millis()).unwrap_or(u64::MAX);
        let _ = self
            .diagnostics
            .record(ErrorRecord::new(timestamp_ms, level, kind, message), now);
    }
}

fn fallback_for(
    completion: &Completion,
    metadata: PathMetadata,
) -> Result<GeneratedPath, EngineError> {
    let metadata = PathMetadata {
        is_fallback: true,
        hit_max_iterations: false,
        from_cache: false,
        ..metadata
    };
    Ok(GeneratedPath::new(
        completion.fallback.clone(),
        completion.mode,
        completion.theme.clone(),
        metadata,
    )?)
}
