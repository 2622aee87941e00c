//! Engine configuration and its load-time repair.

use std::collections::{BTreeMap, BTreeSet};

use pathway_core::{
    LevelDefinition, LevelId, Point, ProfileError, Theme, ValidationProfile, WorldBounds,
    DEFAULT_PROFILE_NAME, LENIENT_PROFILE_NAME, STRICT_PROFILE_NAME,
};
use pathway_system_cache::CacheSettings;
use pathway_system_diagnostics::DiagnosticsSettings;
use pathway_system_generation::{fallback_path, GenerationLimits, ThemeStyle};
use pathway_system_validation::{ValidationDepth, Validator, ValidatorSettings};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Level entry in the configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelConfig {
    /// Identifier callers use to request the level.
    pub id: LevelId,
    /// Endpoints, anchors and profile of the level.
    #[serde(flatten)]
    pub definition: LevelDefinition,
}

/// Immutable engine configuration.
///
/// Replaced wholesale through `PathEngine::reconfigure`; the engine never
/// mutates the value it was handed apart from structural subtrees set through
/// `PathEngine::set_structure_config`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// World every path must stay inside.
    pub world: WorldBounds,
    /// Profile used when a level or caller names none.
    pub default_profile: String,
    /// Named validation profiles.
    pub profiles: BTreeMap<String, ValidationProfile>,
    /// Hand-authored levels.
    pub levels: Vec<LevelConfig>,
    /// Walk shaping per theme name.
    pub themes: BTreeMap<String, ThemeStyle>,
    /// Budgets used in development posture.
    pub development: GenerationLimits,
    /// Reduced budgets used in production posture.
    pub production: GenerationLimits,
    /// Iterations a generation task performs per poll.
    pub task_chunk_iterations: u32,
    /// Cache thresholds.
    pub cache: CacheSettings,
    /// Error retention and batching.
    pub diagnostics: DiagnosticsSettings,
    /// Validator tolerances.
    pub validator: ValidatorSettings,
    /// Whether exhausted generation returns the straight fallback path.
    pub fallback_enabled: bool,
    /// Whether unknown levels are served with a world-spanning default level.
    pub allow_default_level: bool,
    /// Whether the engine starts in production posture.
    pub production_mode: bool,
    /// Structural configuration per entity type.
    pub structures: BTreeMap<String, Value>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            world: WorldBounds::default(),
            default_profile: DEFAULT_PROFILE_NAME.to_owned(),
            profiles: builtin_profiles(),
            levels: default_levels(),
            themes: default_themes(),
            development: GenerationLimits::default(),
            production: GenerationLimits {
                max_iterations: 250,
                max_retries: 1,
            },
            task_chunk_iterations: 32,
            cache: CacheSettings::default(),
            diagnostics: DiagnosticsSettings::default(),
            validator: ValidatorSettings::default(),
            fallback_enabled: true,
            allow_default_level: true,
            production_mode: false,
            structures: default_structures(),
        }
    }
}

impl EngineConfig {
    /// Level with the provided identifier.
    #[must_use]
    pub fn level(&self, id: LevelId) -> Option<&LevelConfig> {
        self.levels.iter().find(|level| level.id == id)
    }

    /// Named profile, if defined.
    #[must_use]
    pub fn profile(&self, name: &str) -> Option<&ValidationProfile> {
        self.profiles.get(name)
    }

    /// The default profile, falling back to the built-in balanced profile.
    #[must_use]
    pub fn default_profile(&self) -> ValidationProfile {
        self.profile(&self.default_profile)
            .copied()
            .unwrap_or_else(ValidationProfile::balanced)
    }

    /// Walk shaping for `theme`; unknown themes use the default style.
    #[must_use]
    pub fn theme_style(&self, theme: &Theme) -> ThemeStyle {
        self.themes.get(theme.as_str()).copied().unwrap_or_default()
    }

    /// Budgets for the requested posture.
    #[must_use]
    pub const fn limits(&self, production: bool) -> GenerationLimits {
        if production {
            self.production
        } else {
            self.development
        }
    }

    /// Replaces every unusable subtree with its default.
    ///
    /// Each replacement is reported so the caller can log it as
    /// configuration corruption.
    #[must_use]
    pub fn sanitize(mut self) -> (Self, Vec<ConfigError>) {
        let defaults = Self::default();
        let mut issues = Vec::new();

        if !self.world.is_well_formed() {
            issues.push(ConfigError::WorldBounds {
                width: self.world.width(),
                height: self.world.height(),
                grid_size: self.world.grid_size(),
            });
            self.world = defaults.world;
        }

        for (name, profile) in self.profiles.iter_mut() {
            if let Err(source) = profile.check() {
                issues.push(ConfigError::Profile {
                    name: name.clone(),
                    source,
                });
                *profile = builtin_profile(name).unwrap_or_else(ValidationProfile::balanced);
            }
        }
        if !self.profiles.contains_key(&self.default_profile) {
            issues.push(ConfigError::MissingDefaultProfile(
                self.default_profile.clone(),
            ));
            self.default_profile = DEFAULT_PROFILE_NAME.to_owned();
            let _ = self
                .profiles
                .entry(DEFAULT_PROFILE_NAME.to_owned())
                .or_insert_with(ValidationProfile::balanced);
        }

        let tolerances = [
            self.validator.segment_tolerance,
            self.validator.progress_tolerance,
        ];
        if tolerances.iter().any(|value| !value.is_finite() || *value < 0.0) {
            issues.push(ConfigError::Validator);
            self.validator = defaults.validator;
        }

        let validator = Validator::new(self.validator);
        let mut seen = BTreeSet::new();
        let mut levels = Vec::with_capacity(self.levels.len());
        for mut level in std::mem::take(&mut self.levels) {
            if !seen.insert(level.id) {
                issues.push(ConfigError::Level {
                    level: level.id,
                    reason: "duplicate level id".to_owned(),
                });
                continue;
            }
            if let Err(reason) = check_level(&level.definition, &self.world) {
                issues.push(ConfigError::Level {
                    level: level.id,
                    reason,
                });
                continue;
            }
            if !self.profiles.contains_key(&level.definition.profile) {
                issues.push(ConfigError::UnknownLevelProfile {
                    level: level.id,
                    profile: level.definition.profile.clone(),
                });
                level.definition.profile = self.default_profile.clone();
            }
            let profile = self
                .profile(&level.definition.profile)
                .copied()
                .unwrap_or_else(|| self.default_profile());
            let defect = fallback_defect(&validator, &level.definition, &self.world, &profile);
            if let Some(reason) = defect {
                issues.push(ConfigError::Level {
                    level: level.id,
                    reason: format!("fallback path fails validation: {reason}"),
                });
                continue;
            }
            levels.push(level);
        }
        self.levels = levels;

        if self.allow_default_level {
            let spanning = LevelDefinition::spanning(&self.world);
            let profile = self.default_profile();
            if let Some(reason) = fallback_defect(&validator, &spanning, &self.world, &profile) {
                issues.push(ConfigError::DefaultLevel(reason));
                self.allow_default_level = false;
            }
        }

        for (name, style) in self.themes.iter_mut() {
            if !(style.wander.is_finite() && (0.0..=1.0).contains(&style.wander)) {
                issues.push(ConfigError::Theme(name.clone()));
                *style = ThemeStyle::default();
            }
        }

        if self.development.max_iterations == 0 {
            issues.push(ConfigError::Limits("development"));
            self.development = defaults.development;
        }
        if self.production.max_iterations == 0 {
            issues.push(ConfigError::Limits("production"));
            self.production = defaults.production;
        }
        if self.task_chunk_iterations == 0 {
            issues.push(ConfigError::Limits("task chunk"));
            self.task_chunk_iterations = defaults.task_chunk_iterations;
        }

        let ratio = self.cache.cleanup_target_ratio;
        if self.cache.threshold_bytes == 0 || !(ratio > 0.0 && ratio <= 1.0) {
            issues.push(ConfigError::CacheSettings);
            self.cache = defaults.cache;
        }
        if self.diagnostics.ring_capacity == 0 || self.diagnostics.batch_size == 0 {
            issues.push(ConfigError::Diagnostics);
            self.diagnostics = defaults.diagnostics;
        }
        (self, issues)
    }
}

/// Configuration subtree that had to be replaced with its default.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    /// World bounds that do not describe a usable rectangle.
    #[error("world {width}x{height} with grid {grid_size} is unusable")]
    WorldBounds {
        /// Rejected width.
        width: f32,
        /// Rejected height.
        height: f32,
        /// Rejected grid size.
        grid_size: f32,
    },
    /// A named profile with out-of-range fields.
    #[error("profile '{name}' is invalid: {source}")]
    Profile {
        /// Name of the profile.
        name: String,
        /// Why the profile was rejected.
        source: ProfileError,
    },
    /// The default profile name is not defined.
    #[error("default profile '{0}' is not defined")]
    MissingDefaultProfile(String),
    /// A level that cannot be served.
    #[error("level {level} is malformed: {reason}")]
    Level {
        /// Identifier of the level.
        level: LevelId,
        /// Why the level was dropped.
        reason: String,
    },
    /// A level naming a profile that does not exist.
    #[error("level {level} names unknown profile '{profile}'")]
    UnknownLevelProfile {
        /// Identifier of the level.
        level: LevelId,
        /// Name the level asked for.
        profile: String,
    },
    /// The world-spanning default level cannot fall back to a valid path.
    #[error("default level disabled, its fallback path fails validation: {0}")]
    DefaultLevel(String),
    /// A theme with an unusable wander share.
    #[error("theme '{0}' has a wander share outside [0, 1]")]
    Theme(String),
    /// Iteration budgets of zero.
    #[error("{0} limits allow no iterations")]
    Limits(&'static str),
    /// Cache thresholds that cannot work.
    #[error("cache threshold must be positive and the cleanup ratio in (0, 1]")]
    CacheSettings,
    /// Diagnostics settings that cannot work.
    #[error("error ring capacity and batch size must be positive")]
    Diagnostics,
    /// Negative or non-finite validator tolerances.
    #[error("validator tolerances must be finite and non-negative")]
    Validator,
}

fn check_level(definition: &LevelDefinition, world: &WorldBounds) -> Result<(), String> {
    if !definition.anchors_match_endpoints() {
        return Err("anchors must start at the entry and finish at the exit".to_owned());
    }
    if let Some(index) = definition
        .anchors
        .iter()
        .position(|point| !world.contains(*point))
    {
        return Err(format!("anchor {index} lies outside the world"));
    }
    if definition.entry == definition.exit {
        return Err("entry and exit coincide".to_owned());
    }
    Ok(())
}

/// First blocking finding against the straight fallback of `definition`.
pub(crate) fn fallback_defect(
    validator: &Validator,
    definition: &LevelDefinition,
    world: &WorldBounds,
    profile: &ValidationProfile,
) -> Option<String> {
    let fallback = fallback_path(definition.entry, definition.exit, profile.max_segment_length);
    validator
        .validate(&fallback, world, profile, ValidationDepth::Full)
        .errors()
        .next()
        .map(str::to_owned)
}

fn builtin_profile(name: &str) -> Option<ValidationProfile> {
    match name {
        STRICT_PROFILE_NAME => Some(ValidationProfile::strict()),
        DEFAULT_PROFILE_NAME => Some(ValidationProfile::balanced()),
        LENIENT_PROFILE_NAME => Some(ValidationProfile::lenient()),
        _ => None,
    }
}

fn builtin_profiles() -> BTreeMap<String, ValidationProfile> {
    [STRICT_PROFILE_NAME, DEFAULT_PROFILE_NAME, LENIENT_PROFILE_NAME]
        .into_iter()
        .filter_map(|name| builtin_profile(name).map(|profile| (name.to_owned(), profile)))
        .collect()
}

fn default_levels() -> Vec<LevelConfig> {
    vec![
        LevelConfig {
            id: LevelId::new(1),
            definition: LevelDefinition::new(
                Point::new(20.0, 300.0),
                &[
                    Point::new(110.0, 300.0),
                    Point::new(200.0, 300.0),
                    Point::new(265.0, 235.0),
                    Point::new(355.0, 235.0),
                    Point::new(445.0, 235.0),
                    Point::new(510.0, 300.0),
                    Point::new(600.0, 300.0),
                    Point::new(690.0, 300.0),
                ],
                Point::new(780.0, 300.0),
                STRICT_PROFILE_NAME,
            ),
        },
        LevelConfig {
            id: LevelId::new(2),
            definition: LevelDefinition::new(
                Point::new(20.0, 100.0),
                &[
                    Point::new(150.0, 100.0),
                    Point::new(260.0, 180.0),
                    Point::new(380.0, 180.0),
                    Point::new(460.0, 280.0),
                    Point::new(570.0, 350.0),
                    Point::new(680.0, 420.0),
                ],
                Point::new(780.0, 500.0),
                DEFAULT_PROFILE_NAME,
            ),
        },
        LevelConfig {
            id: LevelId::new(3),
            definition: LevelDefinition::new(
                Point::new(20.0, 520.0),
                &[
                    Point::new(180.0, 520.0),
                    Point::new(300.0, 400.0),
                    Point::new(300.0, 260.0),
                    Point::new(480.0, 200.0),
                    Point::new(640.0, 200.0),
                ],
                Point::new(780.0, 80.0),
                LENIENT_PROFILE_NAME,
            ),
        },
    ]
}

fn default_themes() -> BTreeMap<String, ThemeStyle> {
    [("cyber", 0.35), ("forest", 0.5), ("desert", 0.2)]
        .into_iter()
        .map(|(name, wander)| (name.to_owned(), ThemeStyle { wander }))
        .collect()
}

fn default_structures() -> BTreeMap<String, Value> {
    let mut structures = BTreeMap::new();
    let _ = structures.insert(
        "tower".to_owned(),
        json!({
            "cannon": {"range": 4, "damage": 10, "upgrades": ["rapid", "heavy"]},
            "frost": {"range": 3, "slow": 0.5, "upgrades": ["deep_freeze"]},
        }),
    );
    structures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configuration_needs_no_repair() {
        let (config, issues) = EngineConfig::default().sanitize();
        assert!(issues.is_empty(), "{issues:?}");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn default_level_anchors_satisfy_their_profiles() {
        let config = EngineConfig::default();
        let validator = Validator::default();
        for level in &config.levels {
            let profile = config
                .profile(&level.definition.profile)
                .copied()
                .expect("profile exists");
            let result = validator.validate(
                &level.definition.anchors,
                &config.world,
                &profile,
                ValidationDepth::Full,
            );
            assert!(result.is_valid(), "level {}: {:?}", level.id, result.issues());
        }
    }

    #[test]
    fn corrupt_subtrees_are_replaced() {
        let mut config = EngineConfig::default();
        config.world = WorldBounds::new(-1.0, 600.0, 20.0);
        let _ = config.profiles.insert(
            "broken".to_owned(),
            ValidationProfile {
                max_turn_angle: 400.0,
                ..ValidationProfile::balanced()
            },
        );
        config.levels[0].definition.profile = "missing".to_owned();
        config.cache.cleanup_target_ratio = 2.0;

        let (repaired, issues) = config.sanitize();

        assert_eq!(repaired.world, WorldBounds::default());
        assert_eq!(repaired.profile("broken"), Some(&ValidationProfile::balanced()));
        assert_eq!(repaired.levels[0].definition.profile, DEFAULT_PROFILE_NAME);
        assert_eq!(repaired.cache, CacheSettings::default());
        assert_eq!(issues.len(), 4);
    }

    #[test]
    fn levels_outside_the_world_are_dropped() {
        let mut config = EngineConfig::default();
        config.levels[2].definition.anchors[3] = Point::new(1_000.0, 10.0);

        let (repaired, issues) = config.sanitize();

        assert!(repaired.level(LevelId::new(3)).is_none());
        assert!(matches!(
            issues.as_slice(),
            [ConfigError::Level { level, .. }] if *level == LevelId::new(3)
        ));
    }

    #[test]
    fn levels_whose_fallback_cannot_validate_are_dropped() {
        let mut config = EngineConfig::default();
        config.levels.push(LevelConfig {
            id: LevelId::new(9),
            definition: LevelDefinition::new(
                Point::new(100.0, 300.0),
                &[],
                Point::new(115.0, 300.0),
                DEFAULT_PROFILE_NAME,
            ),
        });

        let (repaired, issues) = config.sanitize();

        assert!(repaired.level(LevelId::new(9)).is_none());
        assert_eq!(repaired.levels.len(), 3);
        assert!(matches!(
            issues.as_slice(),
            [ConfigError::Level { level, reason }]
                if *level == LevelId::new(9) && reason.contains("fallback")
        ));
    }

    #[test]
    fn default_level_is_disabled_when_its_fallback_cannot_validate() {
        let mut config = EngineConfig::default();
        config.world = WorldBounds::new(100.0, 600.0, 20.0);
        config.levels.clear();
        let _ = config.profiles.insert(
            DEFAULT_PROFILE_NAME.to_owned(),
            ValidationProfile {
                min_segment_length: 100.0,
                max_segment_length: 140.0,
                ..ValidationProfile::balanced()
            },
        );

        let (repaired, issues) = config.sanitize();

        assert!(!repaired.allow_default_level);
        assert!(matches!(issues.as_slice(), [ConfigError::DefaultLevel(_)]));
    }

    #[test]
    fn default_level_fallbacks_validate() {
        let config = EngineConfig::default();
        let validator = Validator::new(config.validator);
        for level in &config.levels {
            let profile = config
                .profile(&level.definition.profile)
                .copied()
                .expect("profile exists");
            let defect = fallback_defect(&validator, &level.definition, &config.world, &profile);
            assert_eq!(defect, None, "level {}", level.id);
        }
    }

    #[test]
    fn missing_default_profile_is_restored() {
        let mut config = EngineConfig::default();
        config.default_profile = "nowhere".to_owned();

        let (repaired, issues) = config.sanitize();

        assert_eq!(repaired.default_profile, DEFAULT_PROFILE_NAME);
        assert_eq!(issues, vec![ConfigError::MissingDefaultProfile("nowhere".to_owned())]);
    }
}
