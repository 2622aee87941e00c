#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the Pathway engine.
//!
//! This crate defines the value types that flow between the generator, the
//! geometry validator, the cache store and the engine facade. Everything in
//! here is plain data: paths are immutable once built, validation results are
//! never mutated after creation, and profiles are merged through a single
//! documented precedence order (override field, then profile field, then the
//! default profile).

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the profile used when a caller or level does not name one.
pub const DEFAULT_PROFILE_NAME: &str = "balanced";

/// Name of the strict validation profile.
pub const STRICT_PROFILE_NAME: &str = "strict";

/// Name of the lenient validation profile.
pub const LENIENT_PROFILE_NAME: &str = "lenient";

/// Canvas position expressed in world units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal coordinate, growing to the right.
    pub x: f32,
    /// Vertical coordinate, growing downward.
    pub y: f32,
}

impl Point {
    /// Creates a point from its coordinates.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(self, other: Point) -> f32 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Point reached by travelling `length` units along `heading` radians.
    #[must_use]
    pub fn offset(self, heading: f32, length: f32) -> Point {
        Point::new(
            self.x + heading.cos() * length,
            self.y + heading.sin() * length,
        )
    }

    /// Heading in radians of the direction from `self` towards `other`.
    #[must_use]
    pub fn heading_to(self, other: Point) -> f32 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    /// Linear interpolation between `self` and `other`.
    #[must_use]
    pub fn lerp(self, other: Point, t: f32) -> Point {
        Point::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }
}

/// Rectangular world the path must stay inside.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldBounds {
    width: f32,
    height: f32,
    grid_size: f32,
}

impl WorldBounds {
    /// Creates world bounds spanning `[0, width] x [0, height]`.
    #[must_use]
    pub const fn new(width: f32, height: f32, grid_size: f32) -> Self {
        Self {
            width,
            height,
            grid_size,
        }
    }

    /// Width of the world in world units.
    #[must_use]
    pub const fn width(&self) -> f32 {
        self.width
    }

    /// Height of the world in world units.
    #[must_use]
    pub const fn height(&self) -> f32 {
        self.height
    }

    /// Size of a single layout grid cell in world units.
    #[must_use]
    pub const fn grid_size(&self) -> f32 {
        self.grid_size
    }

    /// Reports whether the point lies inside the world rectangle, edges included.
    #[must_use]
    pub fn contains(&self, point: Point) -> bool {
        point.x.is_finite()
            && point.y.is_finite()
            && point.x >= 0.0
            && point.y >= 0.0
            && point.x <= self.width
            && point.y <= self.height
    }

    /// Reports whether the point lies at least `margin` units inside every edge.
    #[must_use]
    pub fn contains_with_margin(&self, point: Point, margin: f32) -> bool {
        let margin = margin.max(0.0).min(self.width / 2.0).min(self.height / 2.0);
        point.x.is_finite()
            && point.y.is_finite()
            && point.x >= margin
            && point.y >= margin
            && point.x <= self.width - margin
            && point.y <= self.height - margin
    }

    /// Reports whether the bounds describe a usable, non-empty rectangle.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.width.is_finite()
            && self.height.is_finite()
            && self.grid_size.is_finite()
            && self.width > 0.0
            && self.height > 0.0
            && self.grid_size > 0.0
    }
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self::new(800.0, 600.0, 20.0)
    }
}

/// Identifier of a level whose entry and exit anchor the generated path.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LevelId(u32);

impl LevelId {
    /// Creates a new level identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for LevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Visual theme requested for the level, such as `"cyber"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Theme(String);

impl Theme {
    /// Creates a theme from its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name of the theme.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strategy used to produce a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMode {
    /// Preserved, hand-authored anchor path for the level.
    Static,
    /// Path synthesised entirely by the constrained random walk.
    Dynamic,
    /// Anchor path refined by bounded random perturbation.
    Hybrid,
}

impl PathMode {
    /// Lower-case name used in cache keys, seeds and the CLI.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for PathMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a path mode name is not recognised.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown path mode '{0}', expected static, dynamic or hybrid")]
pub struct ParsePathModeError(String);

impl FromStr for PathMode {
    type Err = ParsePathModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "dynamic" => Ok(Self::Dynamic),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(ParsePathModeError(value.to_owned())),
        }
    }
}

/// Bookkeeping attached to every generated path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMetadata {
    /// Random-walk or perturbation iterations consumed across all attempts.
    pub iterations: u32,
    /// Wall-clock time spent producing the path.
    pub generation_time: Duration,
    /// Set when the accepted attempt exhausted its iteration budget.
    pub hit_max_iterations: bool,
    /// Set when the path is the precomputed fallback.
    pub is_fallback: bool,
    /// Number of attempts that failed before the returned path was produced.
    pub retry_count: u32,
    /// Set when the path was served from the result cache.
    pub from_cache: bool,
}

/// Errors raised when a path would break its structural invariants.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PathError {
    /// A path needs at least an entry and an exit point.
    #[error("a path needs at least two points, got {0}")]
    TooShort(usize),
}

/// Immutable polyline enemies follow through a level.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GeneratedPathRepr")]
pub struct GeneratedPath {
    points: Vec<Point>,
    mode: PathMode,
    theme: Theme,
    metadata: PathMetadata,
}

impl GeneratedPath {
    /// Builds a path, rejecting point sequences shorter than two points.
    pub fn new(
        points: Vec<Point>,
        mode: PathMode,
        theme: Theme,
        metadata: PathMetadata,
    ) -> Result<Self, PathError> {
        if points.len() < 2 {
            return Err(PathError::TooShort(points.len()));
        }

        Ok(Self {
            points,
            mode,
            theme,
            metadata,
        })
    }

    /// Ordered points from entry to exit.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Mode that produced the path.
    #[must_use]
    pub const fn mode(&self) -> PathMode {
        self.mode
    }

    /// Theme the path was generated for.
    #[must_use]
    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    /// Generation bookkeeping.
    #[must_use]
    pub const fn metadata(&self) -> &PathMetadata {
        &self.metadata
    }

    /// First point of the path.
    #[must_use]
    pub fn entry(&self) -> Point {
        self.points[0]
    }

    /// Last point of the path.
    #[must_use]
    pub fn exit(&self) -> Point {
        self.points[self.points.len() - 1]
    }

    /// Total polyline length in world units.
    #[must_use]
    pub fn length(&self) -> f32 {
        self.points
            .windows(2)
            .map(|pair| pair[0].distance(pair[1]))
            .sum()
    }

    /// Copy of the path carrying replacement metadata.
    #[must_use]
    pub fn with_metadata(&self, metadata: PathMetadata) -> Self {
        Self {
            points: self.points.clone(),
            mode: self.mode,
            theme: self.theme.clone(),
            metadata,
        }
    }
}

#[derive(Deserialize)]
struct GeneratedPathRepr {
    points: Vec<Point>,
    mode: PathMode,
    theme: Theme,
    metadata: PathMetadata,
}

impl TryFrom<GeneratedPathRepr> for GeneratedPath {
    type Error = PathError;

    fn try_from(repr: GeneratedPathRepr) -> Result<Self, Self::Error> {
        Self::new(repr.points, repr.mode, repr.theme, repr.metadata)
    }
}

/// Named constraint bundle a path is validated against.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationProfile {
    /// Largest permitted turn at an interior vertex, in degrees.
    pub max_turn_angle: f32,
    /// Shortest permitted segment, in world units.
    pub min_segment_length: f32,
    /// Longest permitted segment, in world units.
    pub max_segment_length: f32,
    /// Complexity score above which a warning is raised.
    pub max_complexity: f32,
    /// Complexity the balance score steers towards.
    pub target_difficulty: f32,
}

impl ValidationProfile {
    /// Tight constraints suited to early levels.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            max_turn_angle: 60.0,
            min_segment_length: 40.0,
            max_segment_length: 100.0,
            max_complexity: 0.35,
            target_difficulty: 0.2,
        }
    }

    /// Default constraints.
    #[must_use]
    pub const fn balanced() -> Self {
        Self {
            max_turn_angle: 90.0,
            min_segment_length: 30.0,
            max_segment_length: 140.0,
            max_complexity: 0.55,
            target_difficulty: 0.4,
        }
    }

    /// Loose constraints that admit winding paths.
    #[must_use]
    pub const fn lenient() -> Self {
        Self {
            max_turn_angle: 135.0,
            min_segment_length: 20.0,
            max_segment_length: 200.0,
            max_complexity: 0.8,
            target_difficulty: 0.6,
        }
    }

    /// Checks that every field lies in its meaningful range.
    pub fn check(&self) -> Result<(), ProfileError> {
        if !(self.max_turn_angle.is_finite()
            && self.max_turn_angle > 0.0
            && self.max_turn_angle <= 180.0)
        {
            return Err(ProfileError::TurnAngle(self.max_turn_angle));
        }
        if !(self.min_segment_length.is_finite() && self.min_segment_length > 0.0) {
            return Err(ProfileError::SegmentLength {
                min: self.min_segment_length,
                max: self.max_segment_length,
            });
        }
        if !(self.max_segment_length.is_finite()
            && self.max_segment_length >= self.min_segment_length)
        {
            return Err(ProfileError::SegmentLength {
                min: self.min_segment_length,
                max: self.max_segment_length,
            });
        }
        if !(0.0..=1.0).contains(&self.max_complexity) {
            return Err(ProfileError::UnitRange {
                field: "max_complexity",
                value: self.max_complexity,
            });
        }
        if !(0.0..=1.0).contains(&self.target_difficulty) {
            return Err(ProfileError::UnitRange {
                field: "target_difficulty",
                value: self.target_difficulty,
            });
        }
        Ok(())
    }

    /// Resolves the effective profile for a level.
    ///
    /// Each field is taken from `overrides` when present, otherwise from
    /// `named`, otherwise from `default`.
    #[must_use]
    pub fn resolve(
        default: &ValidationProfile,
        named: Option<&ValidationProfile>,
        overrides: Option<&ProfileOverride>,
    ) -> ValidationProfile {
        let base = named.copied().unwrap_or(*default);
        match overrides {
            Some(overrides) => overrides.apply_to(&base),
            None => base,
        }
    }
}

impl Default for ValidationProfile {
    fn default() -> Self {
        Self::balanced()
    }
}

/// Reasons a validation profile is rejected.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ProfileError {
    /// Turn limit outside `(0, 180]` degrees.
    #[error("max_turn_angle {0} must lie in (0, 180] degrees")]
    TurnAngle(f32),
    /// Segment bounds that are non-positive or inverted.
    #[error("segment length bounds [{min}, {max}] must be positive and ordered")]
    SegmentLength {
        /// Rejected minimum length.
        min: f32,
        /// Rejected maximum length.
        max: f32,
    },
    /// A unit-interval field outside `[0, 1]`.
    #[error("{field} {value} must lie in [0, 1]")]
    UnitRange {
        /// Name of the offending field.
        field: &'static str,
        /// Rejected value.
        value: f32,
    },
}

/// Typed per-level partial profile. Present fields replace profile fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileOverride {
    /// Replacement turn limit in degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turn_angle: Option<f32>,
    /// Replacement minimum segment length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_segment_length: Option<f32>,
    /// Replacement maximum segment length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_segment_length: Option<f32>,
    /// Replacement complexity ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_complexity: Option<f32>,
    /// Replacement difficulty target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_difficulty: Option<f32>,
}

impl ProfileOverride {
    /// Reports whether the override replaces no field at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns `base` with every present field replaced.
    #[must_use]
    pub fn apply_to(&self, base: &ValidationProfile) -> ValidationProfile {
        ValidationProfile {
            max_turn_angle: self.max_turn_angle.unwrap_or(base.max_turn_angle),
            min_segment_length: self.min_segment_length.unwrap_or(base.min_segment_length),
            max_segment_length: self.max_segment_length.unwrap_or(base.max_segment_length),
            max_complexity: self.max_complexity.unwrap_or(base.max_complexity),
            target_difficulty: self.target_difficulty.unwrap_or(base.target_difficulty),
        }
    }

    /// Checks the override against the profile it will be merged into.
    pub fn check_against(&self, base: &ValidationProfile) -> Result<(), ProfileError> {
        self.apply_to(base).check()
    }
}

/// Severity attached to validation issues and error records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Unrecoverable within the current attempt.
    Critical,
    /// Rule violation recoverable through retry or fallback.
    Error,
    /// Advisory only, never blocks generation.
    Warning,
}

impl Severity {
    /// Lower-case name of the severity.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }

    /// Reports whether the severity invalidates a path.
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        matches!(self, Self::Critical | Self::Error)
    }
}

/// Failure taxonomy recorded by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A geometric rule was violated.
    Validation,
    /// The iteration or retry budget ran out.
    GenerationExhausted,
    /// Configuration was malformed or missing and defaults were substituted.
    ConfigCorruption,
    /// A cached entry was stale; internal signal only.
    CacheVersionMismatch,
    /// The caller supplied input the engine cannot serve.
    InvalidInput,
}

impl ErrorKind {
    /// Snake-case name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::GenerationExhausted => "generation_exhausted",
            Self::ConfigCorruption => "config_corruption",
            Self::CacheVersionMismatch => "cache_version_mismatch",
            Self::InvalidInput => "invalid_input",
        }
    }
}

/// Single logged failure retained for introspection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Milliseconds since the engine started when the failure was logged.
    pub timestamp_ms: u64,
    /// Severity of the failure.
    pub level: Severity,
    /// Category of the failure.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl ErrorRecord {
    /// Creates a new record.
    #[must_use]
    pub fn new(
        timestamp_ms: u64,
        level: Severity,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp_ms,
            level,
            kind,
            message: message.into(),
        }
    }
}

/// Geometric rule checked by the validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationRule {
    /// Every point must lie inside the world.
    Bounds,
    /// Segment lengths must lie within the profile band.
    SegmentLength,
    /// Interior turns must not exceed the profile limit.
    TurnAngle,
    /// Aggregate turning must not exceed the profile ceiling.
    Complexity,
    /// The path must keep advancing from entry towards exit.
    Progress,
}

/// Single finding reported by the validator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Rule that produced the finding.
    pub rule: ValidationRule,
    /// Severity of the finding.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
}

/// Outcome of validating a path against a profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    is_valid: bool,
    issues: Vec<ValidationIssue>,
    balance_score: f32,
    complexity: f32,
    recommendations: Vec<String>,
}

impl ValidationResult {
    /// Assembles a result; validity is derived from the issue severities.
    #[must_use]
    pub fn new(
        issues: Vec<ValidationIssue>,
        balance_score: f32,
        complexity: f32,
        recommendations: Vec<String>,
    ) -> Self {
        let is_valid = !issues.iter().any(|issue| issue.severity.is_blocking());
        Self {
            is_valid,
            issues,
            balance_score: balance_score.clamp(0.0, 1.0),
            complexity: complexity.clamp(0.0, 1.0),
            recommendations,
        }
    }

    /// True when no error or critical issue was found.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// Every finding in rule order.
    #[must_use]
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Messages of error and critical findings.
    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.issues
            .iter()
            .filter(|issue| issue.severity.is_blocking())
            .map(|issue| issue.message.as_str())
    }

    /// Messages of warning findings.
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Warning)
            .map(|issue| issue.message.as_str())
    }

    /// Reports whether any finding for `rule` has the given severity.
    #[must_use]
    pub fn has_issue(&self, rule: ValidationRule, severity: Severity) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.rule == rule && issue.severity == severity)
    }

    /// Weighted composite of constraint margins in `[0, 1]`.
    #[must_use]
    pub const fn balance_score(&self) -> f32 {
        self.balance_score
    }

    /// Normalised turning score in `[0, 1]`.
    #[must_use]
    pub const fn complexity(&self) -> f32 {
        self.complexity
    }

    /// Adjustments suggested to level-design tooling.
    #[must_use]
    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }
}

/// Hand-authored description of a level's path endpoints and anchors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelDefinition {
    /// Point where enemies enter the level.
    pub entry: Point,
    /// Point enemies try to reach.
    pub exit: Point,
    /// Static path from entry to exit, endpoints included.
    pub anchors: Vec<Point>,
    /// Name of the validation profile the level uses.
    #[serde(default = "default_profile_name")]
    pub profile: String,
}

fn default_profile_name() -> String {
    DEFAULT_PROFILE_NAME.to_owned()
}

impl LevelDefinition {
    /// Creates a level whose anchors run through `waypoints` between entry and exit.
    #[must_use]
    pub fn new(entry: Point, waypoints: &[Point], exit: Point, profile: &str) -> Self {
        let mut anchors = Vec::with_capacity(waypoints.len() + 2);
        anchors.push(entry);
        anchors.extend_from_slice(waypoints);
        anchors.push(exit);
        Self {
            entry,
            exit,
            anchors,
            profile: profile.to_owned(),
        }
    }

    /// Synthetic level crossing the world from the left edge to the right edge.
    #[must_use]
    pub fn spanning(bounds: &WorldBounds) -> Self {
        let inset = bounds.grid_size();
        let middle = bounds.height() / 2.0;
        Self::new(
            Point::new(inset, middle),
            &[],
            Point::new(bounds.width() - inset, middle),
            DEFAULT_PROFILE_NAME,
        )
    }

    /// Reports whether the anchors start at the entry and finish at the exit.
    #[must_use]
    pub fn anchors_match_endpoints(&self) -> bool {
        self.anchors.len() >= 2
            && self.anchors.first() == Some(&self.entry)
            && self.anchors.last() == Some(&self.exit)
    }
}
