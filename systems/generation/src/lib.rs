#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Deterministic path generator.
//!
//! Every attempt draws from its own ChaCha stream seeded by hashing the
//! request tuple together with the attempt number, so a given
//! `(seed, level, theme, mode)` always yields the same path. Generation is
//! expressed as a resumable [`GenerationRun`] that callers advance in bounded
//! chunks; [`generate`] simply drives a run to completion.

pub mod run;

pub use run::{GenerationRun, RunOutcome, RunStatus};

use std::fmt;

use pathway_core::{LevelId, PathMode, Point, Theme, ValidationProfile, WorldBounds};
use pathway_system_validation::{ValidationDepth, Validator};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Largest wander share a theme may request.
const MAX_WANDER: f32 = 0.9;

/// Iteration and retry budgets for one generation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationLimits {
    /// Walk or refinement iterations allowed per attempt.
    pub max_iterations: u32,
    /// Attempts allowed before the request is exhausted.
    pub max_retries: u32,
}

impl Default for GenerationLimits {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            max_retries: 3,
        }
    }
}

/// Per-theme shaping of the random walk.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeStyle {
    /// Share of each turn drawn from noise rather than steering to the exit.
    pub wander: f32,
}

impl ThemeStyle {
    /// Wander share clamped into its usable range.
    #[must_use]
    pub fn wander(&self) -> f32 {
        if self.wander.is_finite() {
            self.wander.clamp(0.0, MAX_WANDER)
        } else {
            0.0
        }
    }
}

impl Default for ThemeStyle {
    fn default() -> Self {
        Self { wander: 0.3 }
    }
}

/// Phase a generation run is in, as reported to progress listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Seeding the next attempt.
    Prepare,
    /// Building candidate points.
    Walk,
    /// Checking the candidate path.
    Validate,
    /// Stamping and storing the accepted path.
    Finalize,
}

impl Stage {
    /// Lower-case name of the stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Walk => "walk",
            Self::Validate => "validate",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a run needs, resolved by the caller.
#[derive(Clone, Debug)]
pub struct GenerationInput {
    /// Level being generated.
    pub level: LevelId,
    /// Requested theme.
    pub theme: Theme,
    /// Generation strategy.
    pub mode: PathMode,
    /// Caller or engine chosen seed.
    pub seed: u64,
    /// World the path must stay inside.
    pub bounds: WorldBounds,
    /// Effective profile after overrides.
    pub profile: ValidationProfile,
    /// Level anchors, entry and exit included.
    pub anchors: Vec<Point>,
    /// Walk shaping for the theme.
    pub style: ThemeStyle,
    /// Iteration and retry budgets.
    pub limits: GenerationLimits,
    /// Validation depth applied to each candidate.
    pub depth: ValidationDepth,
    /// Validator applied to each candidate.
    pub validator: Validator,
}

impl GenerationInput {
    /// First anchor, if any.
    #[must_use]
    pub fn entry(&self) -> Option<Point> {
        self.anchors.first().copied()
    }

    /// Last anchor, if any.
    #[must_use]
    pub fn exit(&self) -> Option<Point> {
        self.anchors.last().copied()
    }
}

/// Drives a fresh run to completion.
#[must_use]
pub fn generate(input: GenerationInput) -> RunOutcome {
    GenerationRun::new(input).run_to_completion()
}

/// Seed of the random stream used by one attempt.
#[must_use]
pub fn attempt_seed(seed: u64, level: LevelId, theme: &Theme, mode: PathMode, attempt: u32) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(level.get().to_le_bytes());
    hasher.update((theme.as_str().len() as u64).to_le_bytes());
    hasher.update(theme.as_str().as_bytes());
    hasher.update(mode.as_str().as_bytes());
    hasher.update(attempt.to_le_bytes());
    finalize_seed(hasher)
}

fn finalize_seed(hasher: Sha256) -> u64 {
    let digest = hasher.finalize();
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Straight path from `entry` to `exit` split into equal segments no longer
/// than `max_segment_length`.
#[must_use]
pub fn fallback_path(entry: Point, exit: Point, max_segment_length: f32) -> Vec<Point> {
    subdivide(&[entry, exit], max_segment_length)
}

/// Splits every span of `anchors` into equal pieces no longer than
/// `max_segment_length`, keeping the anchors themselves.
#[must_use]
pub fn subdivide(anchors: &[Point], max_segment_length: f32) -> Vec<Point> {
    knots(anchors, max_segment_length)
        .into_iter()
        .map(|knot| knot.base)
        .collect()
}

/// Subdivision point together with the unit normal of its span.
///
/// Anchors carry no normal and are never displaced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Knot {
    pub(crate) base: Point,
    pub(crate) normal: Option<(f32, f32)>,
}

pub(crate) fn knots(anchors: &[Point], max_segment_length: f32) -> Vec<Knot> {
    let Some(&first) = anchors.first() else {
        return Vec::new();
    };

    let mut knots = vec![Knot {
        base: first,
        normal: None,
    }];
    for pair in anchors.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        let length = from.distance(to);
        let pieces = if max_segment_length > 0.0 && length.is_finite() {
            (length / max_segment_length).ceil().max(1.0) as usize
        } else {
            1
        };
        let normal = if length > f32::EPSILON {
            Some(((from.y - to.y) / length, (to.x - from.x) / length))
        } else {
            None
        };

        for piece in 1..pieces {
            knots.push(Knot {
                base: from.lerp(to, piece as f32 / pieces as f32),
                normal,
            });
        }
        knots.push(Knot {
            base: to,
            normal: None,
        });
    }
    knots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_splits_into_equal_segments_within_limit() {
        let path = fallback_path(Point::new(20.0, 300.0), Point::new(780.0, 300.0), 140.0);

        assert_eq!(path.len(), 7);
        assert_eq!(path.first(), Some(&Point::new(20.0, 300.0)));
        assert_eq!(path.last(), Some(&Point::new(780.0, 300.0)));
        for pair in path.windows(2) {
            let length = pair[0].distance(pair[1]);
            assert!((length - 760.0 / 6.0).abs() < 1e-3, "{length}");
        }
    }

    #[test]
    fn short_span_is_kept_whole() {
        let path = fallback_path(Point::new(0.0, 0.0), Point::new(50.0, 0.0), 140.0);
        assert_eq!(path, vec![Point::new(0.0, 0.0), Point::new(50.0, 0.0)]);
    }

    #[test]
    fn anchors_are_never_given_a_normal() {
        let anchors = [
            Point::new(0.0, 0.0),
            Point::new(200.0, 0.0),
            Point::new(200.0, 100.0),
        ];
        let knots = knots(&anchors, 90.0);

        let fixed: Vec<Point> = knots
            .iter()
            .filter(|knot| knot.normal.is_none())
            .map(|knot| knot.base)
            .collect();
        assert_eq!(fixed, anchors.to_vec());
        assert_eq!(knots.len(), 6);
    }

    #[test]
    fn attempt_seed_separates_every_field() {
        let theme = Theme::new("cyber");
        let base = attempt_seed(42, LevelId::new(1), &theme, PathMode::Dynamic, 0);

        assert_eq!(base, attempt_seed(42, LevelId::new(1), &theme, PathMode::Dynamic, 0));
        assert_ne!(base, attempt_seed(43, LevelId::new(1), &theme, PathMode::Dynamic, 0));
        assert_ne!(base, attempt_seed(42, LevelId::new(2), &theme, PathMode::Dynamic, 0));
        let forest = Theme::new("forest");
        assert_ne!(base, attempt_seed(42, LevelId::new(1), &forest, PathMode::Dynamic, 0));
        assert_ne!(base, attempt_seed(42, LevelId::new(1), &theme, PathMode::Hybrid, 0));
        assert_ne!(base, attempt_seed(42, LevelId::new(1), &theme, PathMode::Dynamic, 1));
    }

    #[test]
    fn wander_is_clamped() {
        assert_eq!(ThemeStyle { wander: 4.0 }.wander(), MAX_WANDER);
        assert_eq!(ThemeStyle { wander: f32::NAN }.wander(), 0.0);
    }
}
