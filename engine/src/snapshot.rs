//! Single-line configuration transfer format.
//!
//! A snapshot is written as `pathway:v1:<payload>` where the payload is the
//! unpadded base64 encoding of a JSON document holding the configuration,
//! level overrides, operating posture and cached result paths.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use pathway_core::{GeneratedPath, LevelId, ProfileOverride};
use pathway_system_cache::{ResultKey, VersionToken};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EngineConfig;

const SNAPSHOT_DOMAIN: &str = "pathway";
const SNAPSHOT_VERSION: &str = "v1";
const FIELD_DELIMITER: char = ':';

/// Override attached to one level.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelOverride {
    /// Level the override applies to.
    pub level: LevelId,
    /// Fields replacing the level's profile fields.
    pub overrides: ProfileOverride,
}

/// Cached result path carried across engines.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    /// Request identity.
    pub key: ResultKey,
    /// Token the path was stamped with.
    pub version: VersionToken,
    /// Cached path.
    pub path: GeneratedPath,
}

/// Everything an engine needs to resume where another left off.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationSnapshot {
    /// Full configuration.
    pub config: EngineConfig,
    /// Active per-level overrides.
    pub overrides: Vec<LevelOverride>,
    /// Operating posture.
    pub production: bool,
    /// Cached result paths.
    pub results: Vec<CachedResult>,
}

impl ConfigurationSnapshot {
    /// Encodes the snapshot into its single-line form.
    pub fn encode(&self) -> Result<String, SnapshotError> {
        let json = serde_json::to_vec(self).map_err(SnapshotError::Encode)?;
        let encoded = STANDARD_NO_PAD.encode(json);
        Ok(format!(
            "{SNAPSHOT_DOMAIN}{FIELD_DELIMITER}{SNAPSHOT_VERSION}{FIELD_DELIMITER}{encoded}"
        ))
    }

    /// Decodes a snapshot from its single-line form.
    pub fn decode(value: &str) -> Result<Self, SnapshotError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(SnapshotError::EmptyPayload);
        }

        let mut parts = trimmed.splitn(3, FIELD_DELIMITER);
        let domain = parts.next().ok_or(SnapshotError::MissingPrefix)?;
        let version = parts.next().ok_or(SnapshotError::MissingVersion)?;
        let payload = parts.next().ok_or(SnapshotError::MissingPayload)?;

        if domain != SNAPSHOT_DOMAIN {
            return Err(SnapshotError::InvalidPrefix(domain.to_owned()));
        }
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version.to_owned()));
        }

        let bytes = STANDARD_NO_PAD
            .decode(payload.as_bytes())
            .map_err(SnapshotError::InvalidEncoding)?;
        serde_json::from_slice(&bytes).map_err(SnapshotError::InvalidPayload)
    }
}

/// Errors raised while encoding or decoding snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The provided string was empty or contained only whitespace.
    #[error("configuration snapshot was empty")]
    EmptyPayload,
    /// The prefix segment was missing.
    #[error("configuration snapshot is missing the prefix")]
    MissingPrefix,
    /// The version segment was missing.
    #[error("configuration snapshot is missing the version")]
    MissingVersion,
    /// The payload segment was missing.
    #[error("configuration snapshot is missing the payload")]
    MissingPayload,
    /// The prefix segment named another format.
    #[error("snapshot prefix '{0}' is not supported")]
    InvalidPrefix(String),
    /// The version segment named an unknown revision.
    #[error("snapshot version '{0}' is not supported")]
    UnsupportedVersion(String),
    /// The payload was not valid base64.
    #[error("could not decode snapshot payload: {0}")]
    InvalidEncoding(#[source] base64::DecodeError),
    /// The payload was not a valid snapshot document.
    #[error("could not parse snapshot payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),
    /// The snapshot could not be serialised.
    #[error("could not serialise snapshot: {0}")]
    Encode(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ConfigurationSnapshot {
        ConfigurationSnapshot {
            config: EngineConfig::default(),
            overrides: vec![LevelOverride {
                level: LevelId::new(2),
                overrides: ProfileOverride {
                    max_turn_angle: Some(70.0),
                    ..ProfileOverride::default()
                },
            }],
            production: true,
            results: Vec::new(),
        }
    }

    #[test]
    fn encoded_snapshot_carries_header() {
        let encoded = snapshot().encode().expect("encode");
        assert!(encoded.starts_with("pathway:v1:"));
        assert!(!encoded.contains('\n'));
        assert_eq!(ConfigurationSnapshot::decode(&encoded).expect("decode"), snapshot());
    }

    #[test]
    fn decode_rejects_foreign_prefix() {
        let error = ConfigurationSnapshot::decode("tiles:v1:abc").expect_err("prefix");
        assert!(matches!(error, SnapshotError::InvalidPrefix(prefix) if prefix == "tiles"));
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let error = ConfigurationSnapshot::decode("pathway:v9:abc").expect_err("version");
        assert!(matches!(error, SnapshotError::UnsupportedVersion(_)));
    }

    #[test]
    fn decode_rejects_blank_and_truncated_input() {
        assert!(matches!(
            ConfigurationSnapshot::decode("   "),
            Err(SnapshotError::EmptyPayload)
        ));
        assert!(matches!(
            ConfigurationSnapshot::decode("pathway:v1"),
            Err(SnapshotError::MissingPayload)
        ));
        assert!(matches!(
            ConfigurationSnapshot::decode("pathway:v1:%%%"),
            Err(SnapshotError::InvalidEncoding(_))
        ));
    }
}
