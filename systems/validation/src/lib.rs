#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Pure geometry validator for generated paths.
//!
//! Every rule runs independently so a single call reports every violation:
//! point bounds, segment lengths, turn angles, complexity and progress along
//! the entry to exit axis. Production callers may request
//! [`ValidationDepth::Lightweight`], which skips the advisory complexity rule
//! together with the balance score and recommendations.

use pathway_core::{
    Point, Severity, ValidationIssue, ValidationProfile, ValidationResult, ValidationRule,
    WorldBounds,
};
use serde::{Deserialize, Serialize};

const ANGLE_WEIGHT: f32 = 0.4;
const LENGTH_WEIGHT: f32 = 0.3;
const DIFFICULTY_WEIGHT: f32 = 0.3;

const TIGHT_ANGLE_MARGIN: f32 = 0.1;
const DIFFICULTY_SLACK: f32 = 0.2;

/// How much of the rule set a validation pass runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ValidationDepth {
    /// Every rule, the balance score and recommendations.
    #[default]
    Full,
    /// Blocking rules only; complexity, balance and recommendations are skipped.
    Lightweight,
}

/// Tolerances applied on top of a validation profile.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorSettings {
    /// Fraction by which a segment may leave `[min, max]` before it becomes an error.
    pub segment_tolerance: f32,
    /// World units a point may fall behind the furthest progress already made.
    pub progress_tolerance: f32,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            segment_tolerance: 0.25,
            progress_tolerance: 5.0,
        }
    }
}

/// Stateless geometry validator.
#[derive(Clone, Copy, Debug, Default)]
pub struct Validator {
    settings: ValidatorSettings,
}

impl Validator {
    /// Creates a validator using the provided tolerances.
    #[must_use]
    pub const fn new(settings: ValidatorSettings) -> Self {
        Self { settings }
    }

    /// Tolerances in use.
    #[must_use]
    pub const fn settings(&self) -> &ValidatorSettings {
        &self.settings
    }

    /// Checks `points` against `profile` inside `bounds`.
    #[must_use]
    pub fn validate(
        &self,
        points: &[Point],
        bounds: &WorldBounds,
        profile: &ValidationProfile,
        depth: ValidationDepth,
    ) -> ValidationResult {
        let mut issues = Vec::new();

        check_bounds(points, bounds, &mut issues);
        let lengths = self.check_segment_lengths(points, profile, &mut issues);
        let turns = check_turn_angles(points, profile, &mut issues);
        let complexity = complexity_from_turns(&turns);
        if depth == ValidationDepth::Full && complexity > profile.max_complexity {
            issues.push(ValidationIssue {
                rule: ValidationRule::Complexity,
                severity: Severity::Warning,
                message: format!(
                    "complexity {complexity:.2} exceeds the profile ceiling {:.2}",
                    profile.max_complexity
                ),
            });
        }
        self.check_progress(points, &mut issues);

        if depth == ValidationDepth::Lightweight {
            return ValidationResult::new(issues, 0.0, complexity, Vec::new());
        }

        let margins = Margins::measure(&lengths, &turns, complexity, profile);
        let recommendations = margins.recommendations(profile, complexity);
        ValidationResult::new(issues, margins.balance_score(), complexity, recommendations)
    }

    fn check_segment_lengths(
        &self,
        points: &[Point],
        profile: &ValidationProfile,
        issues: &mut Vec<ValidationIssue>,
    ) -> Vec<f32> {
        let soft_min = profile.min_segment_length;
        let soft_max = profile.max_segment_length;
        let hard_min = soft_min * (1.0 - self.settings.segment_tolerance).max(0.0);
        let hard_max = soft_max * (1.0 + self.settings.segment_tolerance);

        let lengths: Vec<f32> = points
            .windows(2)
            .map(|pair| pair[0].distance(pair[1]))
            .collect();

        for (index, &length) in lengths.iter().enumerate() {
            if (soft_min..=soft_max).contains(&length) {
                continue;
            }

            let severity = if (hard_min..=hard_max).contains(&length) {
                Severity::Warning
            } else {
                Severity::Error
            };
            issues.push(ValidationIssue {
                rule: ValidationRule::SegmentLength,
                severity,
                message: format!(
                    "segment {index} has length {length:.1}, expected [{soft_min:.1}, {soft_max:.1}]"
                ),
            });
        }

        lengths
    }

    fn check_progress(&self, points: &[Point], issues: &mut Vec<ValidationIssue>) {
        let (Some(&entry), Some(&exit)) = (points.first(), points.last()) else {
            issues.push(degenerate_issue(points.len()));
            return;
        };
        if points.len() < 2 {
            issues.push(degenerate_issue(points.len()));
            return;
        }

        let Some(axis) = ProgressAxis::new(entry, exit) else {
            issues.push(ValidationIssue {
                rule: ValidationRule::Progress,
                severity: Severity::Critical,
                message: "entry and exit coincide, progress is undefined".to_owned(),
            });
            return;
        };

        let mut furthest = f32::NEG_INFINITY;
        for (index, &point) in points.iter().enumerate() {
            let projection = axis.project(point);
            if projection < furthest - self.settings.progress_tolerance {
                issues.push(ValidationIssue {
                    rule: ValidationRule::Progress,
                    severity: Severity::Critical,
                    message: format!(
                        "point {index} falls back {:.1} units along the entry to exit axis",
                        furthest - projection
                    ),
                });
            }
            furthest = furthest.max(projection);
        }
    }
}

/// Unit direction from entry to exit used to measure forward progress.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressAxis {
    origin: Point,
    length: f32,
    dx: f32,
    dy: f32,
}

impl ProgressAxis {
    /// Axis from `entry` towards `exit`, or `None` when they coincide.
    #[must_use]
    pub fn new(entry: Point, exit: Point) -> Option<Self> {
        let length = entry.distance(exit);
        if !length.is_finite() || length <= f32::EPSILON {
            return None;
        }

        Some(Self {
            origin: entry,
            length,
            dx: (exit.x - entry.x) / length,
            dy: (exit.y - entry.y) / length,
        })
    }

    /// Distance from the entry to the exit.
    #[must_use]
    pub const fn length(&self) -> f32 {
        self.length
    }

    /// Signed distance of `point` along the axis, measured from the entry.
    #[must_use]
    pub fn project(&self, point: Point) -> f32 {
        (point.x - self.origin.x) * self.dx + (point.y - self.origin.y) * self.dy
    }
}

/// Turn at `vertex` between the incoming and outgoing segments, in degrees.
///
/// Zero means the path continues straight on; 180 is a full reversal.
/// Zero-length segments produce a zero turn.
#[must_use]
pub fn turn_angle(previous: Point, vertex: Point, next: Point) -> f32 {
    let (ax, ay) = (vertex.x - previous.x, vertex.y - previous.y);
    let (bx, by) = (next.x - vertex.x, next.y - vertex.y);
    let norms = ax.hypot(ay) * bx.hypot(by);
    if norms <= f32::EPSILON {
        return 0.0;
    }

    let cosine = ((ax * bx + ay * by) / norms).clamp(-1.0, 1.0);
    cosine.acos().to_degrees()
}

/// Normalised turning score of a polyline in `[0, 1]`.
///
/// The sum of interior turns is divided by the largest possible sum, a full
/// reversal at every interior vertex.
#[must_use]
pub fn complexity_score(points: &[Point]) -> f32 {
    complexity_from_turns(&interior_turns(points))
}

fn interior_turns(points: &[Point]) -> Vec<f32> {
    points
        .windows(3)
        .map(|triple| turn_angle(triple[0], triple[1], triple[2]))
        .collect()
}

fn complexity_from_turns(turns: &[f32]) -> f32 {
    if turns.is_empty() {
        return 0.0;
    }

    let total: f32 = turns.iter().sum();
    (total / (180.0 * turns.len() as f32)).clamp(0.0, 1.0)
}

fn check_bounds(points: &[Point], bounds: &WorldBounds, issues: &mut Vec<ValidationIssue>) {
    for (index, &point) in points.iter().enumerate() {
        if bounds.contains(point) {
            continue;
        }

        issues.push(ValidationIssue {
            rule: ValidationRule::Bounds,
            severity: Severity::Error,
            message: format!(
                "point {index} ({:.1}, {:.1}) lies outside the {:.0}x{:.0} world",
                point.x,
                point.y,
                bounds.width(),
                bounds.height()
            ),
        });
    }
}

fn check_turn_angles(
    points: &[Point],
    profile: &ValidationProfile,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<f32> {
    let turns = interior_turns(points);
    for (offset, &turn) in turns.iter().enumerate() {
        if turn <= profile.max_turn_angle {
            continue;
        }

        issues.push(ValidationIssue {
            rule: ValidationRule::TurnAngle,
            severity: Severity::Error,
            message: format!(
                "vertex {} turns {turn:.1} degrees, limit is {:.1}",
                offset + 1,
                profile.max_turn_angle
            ),
        });
    }
    turns
}

fn degenerate_issue(count: usize) -> ValidationIssue {
    ValidationIssue {
        rule: ValidationRule::Progress,
        severity: Severity::Critical,
        message: format!("a path needs at least two points, got {count}"),
    }
}

struct Margins {
    angle: f32,
    length: f32,
    difficulty: f32,
    sharpest_vertex: Option<usize>,
    nonconforming_segments: usize,
}

impl Margins {
    fn measure(
        lengths: &[f32],
        turns: &[f32],
        complexity: f32,
        profile: &ValidationProfile,
    ) -> Self {
        let sharpest = turns
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1));
        let angle = match sharpest {
            Some((_, turn)) => (1.0 - turn / profile.max_turn_angle).clamp(0.0, 1.0),
            None => 1.0,
        };

        let band = profile.min_segment_length..=profile.max_segment_length;
        let nonconforming_segments = lengths
            .iter()
            .filter(|length| !band.contains(*length))
            .count();
        let length = if lengths.is_empty() {
            0.0
        } else {
            1.0 - nonconforming_segments as f32 / lengths.len() as f32
        };

        Self {
            angle,
            length,
            difficulty: (1.0 - (complexity - profile.target_difficulty).abs()).clamp(0.0, 1.0),
            sharpest_vertex: sharpest.map(|(offset, _)| offset + 1),
            nonconforming_segments,
        }
    }

    fn balance_score(&self) -> f32 {
        ANGLE_WEIGHT * self.angle
            + LENGTH_WEIGHT * self.length
            + DIFFICULTY_WEIGHT * self.difficulty
    }

    fn recommendations(&self, profile: &ValidationProfile, complexity: f32) -> Vec<String> {
        let mut recommendations = Vec::new();

        if let Some(vertex) = self.sharpest_vertex {
            if self.angle < TIGHT_ANGLE_MARGIN {
                recommendations.push(format!(
                    "soften the turn at vertex {vertex}, it is within 10% of the {:.0} degree limit",
                    profile.max_turn_angle
                ));
            }
        }

        if self.nonconforming_segments > 0 {
            recommendations.push(format!(
                "resample {} segment(s) into [{:.0}, {:.0}] world units",
                self.nonconforming_segments,
                profile.min_segment_length,
                profile.max_segment_length
            ));
        }

        if complexity + DIFFICULTY_SLACK < profile.target_difficulty {
            recommendations.push(format!(
                "path is simpler than the {:.2} difficulty target, consider hybrid or dynamic mode",
                profile.target_difficulty
            ));
        } else if complexity > profile.target_difficulty + DIFFICULTY_SLACK {
            recommendations.push(format!(
                "path is busier than the {:.2} difficulty target, reduce wander or use a stricter profile",
                profile.target_difficulty
            ));
        }

        recommendations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight(count: usize, spacing: f32) -> Vec<Point> {
        (0..count)
            .map(|index| Point::new(20.0 + index as f32 * spacing, 300.0))
            .collect()
    }

    #[test]
    fn turn_angle_measures_deviation_from_straight() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(10.0, 0.0);
        assert!(turn_angle(a, b, Point::new(20.0, 0.0)).abs() < 1e-3);
        assert!((turn_angle(a, b, Point::new(10.0, 10.0)) - 90.0).abs() < 1e-3);
        assert!((turn_angle(a, b, Point::new(0.0, 0.0)) - 180.0).abs() < 1e-3);
    }

    #[test]
    fn complexity_of_straight_line_is_zero() {
        assert_eq!(complexity_score(&straight(5, 100.0)), 0.0);
    }

    #[test]
    fn complexity_of_zigzag_is_bounded() {
        let zigzag = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
        ];
        assert!((complexity_score(&zigzag) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn straight_path_is_valid_with_full_margins() {
        let validator = Validator::default();
        let result = validator.validate(
            &straight(6, 100.0),
            &WorldBounds::default(),
            &ValidationProfile::balanced(),
            ValidationDepth::Full,
        );
        assert!(result.is_valid(), "{:?}", result.issues());
        assert!(result.balance_score() > 0.8);
    }

    #[test]
    fn slightly_long_segment_is_only_a_warning() {
        let validator = Validator::default();
        let points = vec![Point::new(20.0, 300.0), Point::new(170.0, 300.0)];
        let result = validator.validate(
            &points,
            &WorldBounds::default(),
            &ValidationProfile::balanced(),
            ValidationDepth::Full,
        );
        assert!(result.is_valid());
        assert!(result.has_issue(ValidationRule::SegmentLength, Severity::Warning));
    }

    #[test]
    fn far_too_long_segment_is_an_error() {
        let validator = Validator::default();
        let points = vec![Point::new(20.0, 300.0), Point::new(700.0, 300.0)];
        let result = validator.validate(
            &points,
            &WorldBounds::default(),
            &ValidationProfile::balanced(),
            ValidationDepth::Full,
        );
        assert!(!result.is_valid());
        assert!(result.has_issue(ValidationRule::SegmentLength, Severity::Error));
    }

    #[test]
    fn lightweight_depth_skips_advisory_output() {
        let validator = Validator::default();
        let points = vec![
            Point::new(100.0, 300.0),
            Point::new(200.0, 300.0),
            Point::new(240.0, 380.0),
            Point::new(340.0, 380.0),
        ];
        let profile = ValidationProfile {
            max_complexity: 0.01,
            ..ValidationProfile::lenient()
        };
        let full = validator.validate(
            &points,
            &WorldBounds::default(),
            &profile,
            ValidationDepth::Full,
        );
        let light = validator.validate(
            &points,
            &WorldBounds::default(),
            &profile,
            ValidationDepth::Lightweight,
        );
        assert!(full.has_issue(ValidationRule::Complexity, Severity::Warning));
        assert!(!light.has_issue(ValidationRule::Complexity, Severity::Warning));
        assert!(light.recommendations().is_empty());
    }

    #[test]
    fn coincident_endpoints_are_critical() {
        let validator = Validator::default();
        let point = Point::new(50.0, 50.0);
        let result = validator.validate(
            &[point, Point::new(100.0, 50.0), point],
            &WorldBounds::default(),
            &ValidationProfile::lenient(),
            ValidationDepth::Full,
        );
        assert!(result.has_issue(ValidationRule::Progress, Severity::Critical));
    }

    #[test]
    fn projection_is_measured_from_entry() {
        let axis = ProgressAxis::new(Point::new(0.0, 0.0), Point::new(0.0, 10.0))
            .expect("non-degenerate axis");
        assert!((axis.project(Point::new(3.0, 4.0)) - 4.0).abs() < 1e-6);
        assert!(ProgressAxis::new(Point::new(1.0, 1.0), Point::new(1.0, 1.0)).is_none());
    }
}
