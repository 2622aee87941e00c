//! Resumable generation state machine.

use std::{
    f32::consts::{PI, TAU},
    mem,
    time::{Duration, Instant},
};

use pathway_core::{PathMetadata, PathMode, Point, ValidationResult};
use pathway_system_validation::{turn_angle, ProgressAxis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::{attempt_seed, knots, GenerationInput, Knot, Stage};

/// Fraction of the turn limit the generator aims to stay under.
const TURN_SAFETY: f32 = 0.9;
/// Displacements tried per hybrid point before it stays on its span.
const DISPLACEMENT_SAMPLES: u32 = 8;

const WALK_PERCENT_START: f32 = 10.0;
const WALK_PERCENT_SPAN: f32 = 70.0;
const VALIDATE_PERCENT: u8 = 85;

/// Result of a finished run.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// A candidate passed validation.
    Accepted {
        /// Accepted points from entry to exit.
        points: Vec<Point>,
        /// Validation of the accepted points.
        validation: ValidationResult,
        /// Bookkeeping for the run.
        metadata: PathMetadata,
    },
    /// Every permitted attempt failed.
    Exhausted {
        /// Bookkeeping for the run.
        metadata: PathMetadata,
        /// Why the last attempt was rejected.
        reason: String,
    },
}

impl RunOutcome {
    /// Bookkeeping for the run.
    #[must_use]
    pub const fn metadata(&self) -> &PathMetadata {
        match self {
            Self::Accepted { metadata, .. } | Self::Exhausted { metadata, .. } => metadata,
        }
    }

    /// Reports whether a candidate was accepted.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    fn stamp_time(&mut self, elapsed: Duration) {
        match self {
            Self::Accepted { metadata, .. } | Self::Exhausted { metadata, .. } => {
                metadata.generation_time = elapsed;
            }
        }
    }
}

/// Progress of a run after one step.
#[derive(Clone, Debug, PartialEq)]
pub enum RunStatus {
    /// More work remains.
    Running {
        /// Stage the run paused in.
        stage: Stage,
        /// Rough completion estimate in percent.
        percent: u8,
    },
    /// The run has finished; further steps return the same outcome.
    Finished(RunOutcome),
}

enum State {
    Prepare,
    Walking(Walk),
    Refining(Refine),
    Validating { points: Vec<Point>, hit_cap: bool },
    Done(RunOutcome),
}

/// Generation request advanced in bounded chunks of iterations.
pub struct GenerationRun {
    input: GenerationInput,
    axis: Option<ProgressAxis>,
    state: State,
    attempts: u32,
    failures: u32,
    iterations: u32,
    elapsed: Duration,
    last_rejection: Option<String>,
}

impl GenerationRun {
    /// Creates a run that has not done any work yet.
    #[must_use]
    pub fn new(input: GenerationInput) -> Self {
        let axis = match (input.entry(), input.exit()) {
            (Some(entry), Some(exit)) => ProgressAxis::new(entry, exit),
            _ => None,
        };

        Self {
            input,
            axis,
            state: State::Prepare,
            attempts: 0,
            failures: 0,
            iterations: 0,
            elapsed: Duration::ZERO,
            last_rejection: None,
        }
    }

    /// Request the run is serving.
    #[must_use]
    pub const fn input(&self) -> &GenerationInput {
        &self.input
    }

    /// Stage the run is currently in.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self.state {
            State::Prepare => Stage::Prepare,
            State::Walking(_) | State::Refining(_) => Stage::Walk,
            State::Validating { .. } => Stage::Validate,
            State::Done(_) => Stage::Finalize,
        }
    }

    /// Attempts that failed so far.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Performs at most `budget` iterations of work.
    ///
    /// Stage transitions are free; each walk, refinement or validation
    /// iteration consumes one unit. A zero budget still makes one unit of
    /// progress.
    pub fn step(&mut self, budget: u32) -> RunStatus {
        let started = Instant::now();
        let mut remaining = budget.max(1);
        let status = loop {
            if let Some(status) = self.advance(&mut remaining) {
                break status;
            }
        };
        self.elapsed += started.elapsed();

        match status {
            RunStatus::Finished(mut outcome) => {
                outcome.stamp_time(self.elapsed);
                RunStatus::Finished(outcome)
            }
            running => running,
        }
    }

    /// Steps until the run finishes.
    #[must_use]
    pub fn run_to_completion(mut self) -> RunOutcome {
        let chunk = self.input.limits.max_iterations.max(1);
        loop {
            if let RunStatus::Finished(outcome) = self.step(chunk) {
                return outcome;
            }
        }
    }

    fn advance(&mut self, remaining: &mut u32) -> Option<RunStatus> {
        let (next, status) = match mem::replace(&mut self.state, State::Prepare) {
            State::Done(outcome) => {
                let status = RunStatus::Finished(outcome.clone());
                (State::Done(outcome), Some(status))
            }
            State::Prepare => (self.begin_attempt(), None),
            State::Walking(mut walk) => match self.drive_walk(&mut walk, remaining) {
                Some(next) => (next, None),
                None => {
                    let percent = walk_percent(walk.progress_fraction());
                    (
                        State::Walking(walk),
                        Some(RunStatus::Running {
                            stage: Stage::Walk,
                            percent,
                        }),
                    )
                }
            },
            State::Refining(mut refine) => match self.drive_refine(&mut refine, remaining) {
                Some(next) => (next, None),
                None => {
                    let percent = walk_percent(refine.progress_fraction());
                    (
                        State::Refining(refine),
                        Some(RunStatus::Running {
                            stage: Stage::Walk,
                            percent,
                        }),
                    )
                }
            },
            State::Validating { points, hit_cap } => {
                if *remaining == 0 {
                    (
                        State::Validating { points, hit_cap },
                        Some(RunStatus::Running {
                            stage: Stage::Validate,
                            percent: VALIDATE_PERCENT,
                        }),
                    )
                } else {
                    *remaining -= 1;
                    (self.finish_attempt(points, hit_cap), None)
                }
            }
        };
        self.state = next;
        status
    }

    fn begin_attempt(&mut self) -> State {
        if self.input.mode == PathMode::Static {
            if self.attempts > 0 {
                return State::Done(self.exhausted());
            }
            self.attempts += 1;
            return State::Validating {
                points: self.input.anchors.clone(),
                hit_cap: false,
            };
        }

        if self.attempts >= self.input.limits.max_retries {
            return State::Done(self.exhausted());
        }
        let (Some(entry), Some(exit), Some(axis)) =
            (self.input.entry(), self.input.exit(), self.axis)
        else {
            self.last_rejection = Some("entry and exit coincide or are missing".to_owned());
            return State::Done(self.exhausted());
        };

        let attempt = self.attempts;
        self.attempts += 1;
        let rng = ChaCha8Rng::seed_from_u64(attempt_seed(
            self.input.seed,
            self.input.level,
            &self.input.theme,
            self.input.mode,
            attempt,
        ));

        match self.input.mode {
            PathMode::Hybrid => {
                let amplitude = self.input.bounds.grid_size() * 0.5_f32.powi(attempt as i32);
                State::Refining(Refine {
                    rng,
                    knots: knots(&self.input.anchors, self.input.profile.max_segment_length),
                    placed: Vec::new(),
                    amplitude,
                })
            }
            PathMode::Static | PathMode::Dynamic => State::Walking(Walk {
                rng,
                points: vec![entry],
                exit,
                axis,
                iterations: 0,
            }),
        }
    }

    fn drive_walk(&mut self, walk: &mut Walk, remaining: &mut u32) -> Option<State> {
        let cap = self.input.limits.max_iterations;
        while *remaining > 0 {
            if walk.iterations >= cap {
                debug!(
                    level = %self.input.level,
                    iterations = walk.iterations,
                    "walk hit its iteration cap, closing"
                );
                return Some(State::Validating {
                    points: walk.close(),
                    hit_cap: true,
                });
            }

            *remaining -= 1;
            self.iterations += 1;
            if walk.iterate(&self.input) {
                return Some(State::Validating {
                    points: mem::take(&mut walk.points),
                    hit_cap: false,
                });
            }
        }
        None
    }

    fn drive_refine(&mut self, refine: &mut Refine, remaining: &mut u32) -> Option<State> {
        while *remaining > 0 {
            if refine.placed.len() == refine.knots.len() {
                return Some(State::Validating {
                    points: mem::take(&mut refine.placed),
                    hit_cap: false,
                });
            }

            *remaining -= 1;
            self.iterations += 1;
            refine.place_next(&self.input);
        }
        None
    }

    fn finish_attempt(&mut self, points: Vec<Point>, hit_cap: bool) -> State {
        let validation = self.input.validator.validate(
            &points,
            &self.input.bounds,
            &self.input.profile,
            self.input.depth,
        );

        if validation.is_valid() {
            debug!(
                level = %self.input.level,
                mode = %self.input.mode,
                retries = self.failures,
                points = points.len(),
                "candidate accepted"
            );
            return State::Done(RunOutcome::Accepted {
                points,
                validation,
                metadata: self.metadata(hit_cap),
            });
        }

        self.failures += 1;
        self.last_rejection = validation.errors().next().map(str::to_owned);
        debug!(
            level = %self.input.level,
            mode = %self.input.mode,
            attempt = self.attempts,
            reason = self.last_rejection.as_deref().unwrap_or("unknown"),
            "candidate rejected"
        );
        State::Prepare
    }

    fn exhausted(&self) -> RunOutcome {
        let reason = match &self.last_rejection {
            Some(reason) => format!(
                "{} attempt(s) failed, last rejection: {reason}",
                self.failures
            ),
            None => format!("{} attempt(s) failed", self.failures),
        };
        RunOutcome::Exhausted {
            metadata: self.metadata(false),
            reason,
        }
    }

    fn metadata(&self, hit_max_iterations: bool) -> PathMetadata {
        PathMetadata {
            iterations: self.iterations,
            generation_time: self.elapsed,
            hit_max_iterations,
            is_fallback: false,
            retry_count: self.failures,
            from_cache: false,
        }
    }
}

fn walk_percent(fraction: f32) -> u8 {
    (WALK_PERCENT_START + WALK_PERCENT_SPAN * fraction.clamp(0.0, 1.0)).round() as u8
}

/// Wraps an angle into `(-PI, PI]`.
fn wrap_angle(angle: f32) -> f32 {
    let wrapped = angle % TAU;
    if wrapped > PI {
        wrapped - TAU
    } else if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

struct Walk {
    rng: ChaCha8Rng,
    points: Vec<Point>,
    exit: Point,
    axis: ProgressAxis,
    iterations: u32,
}

impl Walk {
    fn head(&self) -> Point {
        self.points[self.points.len() - 1]
    }

    fn heading(&self) -> Option<f32> {
        match self.points.as_slice() {
            [.., previous, head] => Some(previous.heading_to(*head)),
            _ => None,
        }
    }

    fn progress_fraction(&self) -> f32 {
        self.axis.project(self.head()) / self.axis.length()
    }

    /// One walk iteration; returns `true` once the exit has been reached.
    fn iterate(&mut self, input: &GenerationInput) -> bool {
        self.iterations += 1;

        let profile = &input.profile;
        let head = self.head();
        let limit = profile.max_turn_angle.to_radians() * TURN_SAFETY;
        let to_exit = head.heading_to(self.exit);
        let distance = head.distance(self.exit);
        let heading = self.heading();

        if (profile.min_segment_length..=profile.max_segment_length).contains(&distance) {
            let legal =
                heading.map_or(true, |heading| wrap_angle(to_exit - heading).abs() <= limit);
            if legal {
                self.points.push(self.exit);
                return true;
            }
        }
        if distance < profile.min_segment_length {
            if self.points.len() > 1 {
                let _ = self.points.pop();
                return false;
            }
            self.points.push(self.exit);
            return true;
        }

        let current = heading.unwrap_or(to_exit);
        let desired = wrap_angle(to_exit - current).clamp(-limit, limit);
        let noise = self.rng.gen_range(-limit..=limit);
        let wander = input.style.wander();
        let turn = ((1.0 - wander) * desired + wander * noise).clamp(-limit, limit);

        let shortest = profile.min_segment_length;
        let longest = profile
            .max_segment_length
            .min(distance - shortest)
            .max(shortest);
        let length = if longest > shortest {
            self.rng.gen_range(shortest..=longest)
        } else {
            shortest
        };
        let candidate = head.offset(current + turn, length);

        let progress = self.axis.project(candidate);
        if !input
            .bounds
            .contains_with_margin(candidate, input.bounds.grid_size())
            || progress < self.axis.project(head)
            || progress > self.axis.length()
        {
            return false;
        }

        self.points.push(candidate);
        false
    }

    fn close(&mut self) -> Vec<Point> {
        let mut points = mem::take(&mut self.points);
        if points.last() != Some(&self.exit) {
            points.push(self.exit);
        }
        points
    }
}

struct Refine {
    rng: ChaCha8Rng,
    knots: Vec<Knot>,
    placed: Vec<Point>,
    amplitude: f32,
}

impl Refine {
    fn progress_fraction(&self) -> f32 {
        if self.knots.is_empty() {
            return 1.0;
        }
        self.placed.len() as f32 / self.knots.len() as f32
    }

    fn place_next(&mut self, input: &GenerationInput) {
        let knot = self.knots[self.placed.len()];
        let Some((nx, ny)) = knot.normal else {
            self.placed.push(knot.base);
            return;
        };

        for _ in 0..DISPLACEMENT_SAMPLES {
            let offset = self.rng.gen_range(-self.amplitude..=self.amplitude);
            let candidate = Point::new(knot.base.x + nx * offset, knot.base.y + ny * offset);
            if self.fits(candidate, input) {
                self.placed.push(candidate);
                return;
            }
        }
        self.placed.push(knot.base);
    }

    fn fits(&self, candidate: Point, input: &GenerationInput) -> bool {
        let profile = &input.profile;
        if !input.bounds.contains(candidate) {
            return false;
        }

        match self.placed.as_slice() {
            [] => true,
            [previous] => {
                let length = previous.distance(candidate);
                (profile.min_segment_length..=profile.max_segment_length).contains(&length)
            }
            [.., before, previous] => {
                let length = previous.distance(candidate);
                (profile.min_segment_length..=profile.max_segment_length).contains(&length)
                    && turn_angle(*before, *previous, candidate)
                        <= profile.max_turn_angle * TURN_SAFETY
            }
        }
    }
}
