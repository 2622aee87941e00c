//! Cooperative, cancellable generation tasks.

use std::{
    cell::Cell,
    fmt,
    rc::{Rc, Weak},
};

use pathway_core::{GeneratedPath, LevelId, PathMode, Point, Theme};
use pathway_system_cache::{ResultKey, VersionToken};
use pathway_system_generation::{GenerationRun, Stage};
use thiserror::Error;

use crate::EngineError;

/// Shared flag a caller flips to stop a task at its next poll.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Rc<Cell<bool>>);

impl CancellationToken {
    /// Creates a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.set(true);
    }

    /// Reports whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }

    pub(crate) fn watch(&self) -> TokenWatch {
        TokenWatch(Rc::downgrade(&self.0))
    }
}

/// Weak view of a token that does not keep its task alive.
#[derive(Clone, Debug)]
pub(crate) struct TokenWatch(Weak<Cell<bool>>);

impl TokenWatch {
    /// Reports whether any clone of the token still exists.
    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    /// Cancels the token if it is alive and not yet cancelled.
    pub(crate) fn cancel(&self) -> bool {
        match self.0.upgrade() {
            Some(flag) if !flag.get() => {
                flag.set(true);
                true
            }
            _ => false,
        }
    }
}

/// Progress report emitted at every yield point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    /// Stage the task is in.
    pub stage: Stage,
    /// Rough completion estimate in percent.
    pub percent: u8,
    /// Human-readable status line.
    pub message: String,
}

/// Reasons a task resolves without a path.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task's cancellation token was triggered.
    #[error("generation task was cancelled")]
    Cancelled,
    /// A newer operation for the same request owns the cache entry.
    #[error("generation task was superseded by a newer request")]
    Superseded,
    /// The task already resolved and was polled again.
    #[error("generation task already completed")]
    Completed,
    /// Generation itself failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Outcome of polling a task once.
#[derive(Debug)]
pub enum TaskPoll {
    /// More work remains; the progress reported at this yield is attached.
    Pending(Progress),
    /// The task resolved.
    Ready(Result<GeneratedPath, TaskError>),
}

/// Cache bookkeeping for a running task.
pub(crate) struct Completion {
    pub(crate) level: LevelId,
    pub(crate) theme: Theme,
    pub(crate) mode: PathMode,
    pub(crate) key: Option<ResultKey>,
    pub(crate) version: VersionToken,
    pub(crate) fallback: Vec<Point>,
}

pub(crate) enum TaskState {
    Ready(Result<GeneratedPath, EngineError>),
    Fallback {
        path: GeneratedPath,
        completion: Completion,
    },
    Running {
        run: Box<GenerationRun>,
        completion: Completion,
    },
    Resolved,
}

impl TaskState {
    pub(crate) fn completion(&self) -> Option<&Completion> {
        match self {
            Self::Fallback { completion, .. } | Self::Running { completion, .. } => {
                Some(completion)
            }
            Self::Ready(_) | Self::Resolved => None,
        }
    }
}

type ProgressCallback = Box<dyn FnMut(&Progress)>;

/// Explicit generation task advanced by `PathEngine::poll_task`.
pub struct GenerationTask {
    pub(crate) id: u64,
    pub(crate) token: CancellationToken,
    pub(crate) state: TaskState,
    on_progress: ProgressCallback,
}

impl GenerationTask {
    pub(crate) fn new(
        id: u64,
        token: CancellationToken,
        state: TaskState,
        on_progress: ProgressCallback,
    ) -> Self {
        Self {
            id,
            token,
            state,
            on_progress,
        }
    }

    /// Operation id used to order writes to the result cache.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Token that cancels this task.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Requests cancellation of this task.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Reports whether the task has resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self.state, TaskState::Resolved)
    }

    pub(crate) fn report(&mut self, progress: &Progress) {
        (self.on_progress)(progress);
    }
}

impl fmt::Debug for GenerationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationTask")
            .field("id", &self.id)
            .field("cancelled", &self.token.is_cancelled())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
