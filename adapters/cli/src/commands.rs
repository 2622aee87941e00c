//! Argument parsing helpers shared by the subcommands.

use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use pathway_core::{Point, ProfileOverride};
use pathway_engine::EngineConfig;

/// Reads an engine configuration from a TOML file, or returns the defaults.
pub(crate) fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };

    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration from {}", path.display()))?;
    toml::from_str(&text)
        .with_context(|| format!("failed to parse configuration in {}", path.display()))
}

/// Parses a point written as `x,y`.
pub(crate) fn parse_point(value: &str) -> Result<Point> {
    let Some((x, y)) = value.split_once(',') else {
        bail!("point '{value}' must be written as x,y");
    };
    let x: f32 = x
        .trim()
        .parse()
        .with_context(|| format!("invalid x coordinate in '{value}'"))?;
    let y: f32 = y
        .trim()
        .parse()
        .with_context(|| format!("invalid y coordinate in '{value}'"))?;
    if !(x.is_finite() && y.is_finite()) {
        bail!("point '{value}' must have finite coordinates");
    }
    Ok(Point::new(x, y))
}

/// Builds a profile override from the optional command-line fields.
pub(crate) fn profile_override(
    max_turn_angle: Option<f32>,
    min_segment_length: Option<f32>,
    max_segment_length: Option<f32>,
) -> Option<ProfileOverride> {
    let overrides = ProfileOverride {
        max_turn_angle,
        min_segment_length,
        max_segment_length,
        ..ProfileOverride::default()
    };
    (!overrides.is_empty()).then_some(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_parse_with_surrounding_whitespace() {
        let point = parse_point(" 20.5 , 300").expect("valid point");
        assert_eq!(point, Point::new(20.5, 300.0));
    }

    #[test]
    fn malformed_points_are_rejected() {
        assert!(parse_point("20").is_err());
        assert!(parse_point("a,1").is_err());
        assert!(parse_point("1,inf").is_err());
    }

    #[test]
    fn empty_override_is_omitted() {
        assert_eq!(profile_override(None, None, None), None);
        let overrides = profile_override(Some(45.0), None, None).expect("override");
        assert_eq!(overrides.max_turn_angle, Some(45.0));
    }

    #[test]
    fn default_configuration_survives_toml() {
        let text = toml::to_string(&EngineConfig::default()).expect("serialize");
        let parsed: EngineConfig = toml::from_str(&text).expect("parse");
        assert_eq!(parsed.levels.len(), 3);
        assert_eq!(parsed.default_profile, "balanced");
    }

    #[test]
    fn missing_configuration_file_is_reported() {
        let error = load_config(Some(Path::new("/nonexistent/pathway.toml")))
            .expect_err("missing file");
        assert!(error.to_string().contains("failed to read configuration"));
    }
}
