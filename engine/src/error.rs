use pathway_core::{LevelId, PathError, ProfileError};
use pathway_system_cache::CanonicalError;
use thiserror::Error;

use crate::snapshot::SnapshotError;

/// Errors surfaced to engine callers.
///
/// Only invalid call-site input is surfaced, and only in development
/// posture; production degrades to defaults and records the failure instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The level is not configured and default levels are disabled.
    #[error("level {0} is not configured")]
    UnknownLevel(LevelId),
    /// The named validation profile does not exist.
    #[error("validation profile '{0}' is not defined")]
    UnknownProfile(String),
    /// A profile override would produce an unusable profile.
    #[error("override for level {level} is invalid: {source}")]
    InvalidOverride {
        /// Level the override targets.
        level: LevelId,
        /// Why the merged profile was rejected.
        source: ProfileError,
    },
    /// An override under which the level's fallback path fails validation.
    #[error("override for level {level} breaks its fallback path: {reason}")]
    FallbackRejected {
        /// Level the override targets.
        level: LevelId,
        /// First blocking finding against the fallback path.
        reason: String,
    },
    /// Ad hoc validation received an override that would produce an unusable profile.
    #[error("validation override is invalid: {0}")]
    InvalidValidationOverride(#[source] ProfileError),
    /// No structural configuration exists for the entity type.
    #[error("no structural configuration for entity type '{0}'")]
    UnknownStructure(String),
    /// Every attempt failed and the fallback path is disabled.
    #[error("generation for level {level} exhausted its retries: {reason}")]
    GenerationExhausted {
        /// Level being generated.
        level: LevelId,
        /// Why the last attempt was rejected.
        reason: String,
    },
    /// A generated point sequence broke the path invariants.
    #[error(transparent)]
    Path(#[from] PathError),
    /// A configuration subtree could not be canonicalised.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    /// A configuration snapshot could not be encoded or decoded.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}
