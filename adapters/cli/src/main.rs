#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter over the path engine.
//!
//! Generates and validates enemy paths, lists the configured profiles and
//! moves configuration snapshots between engines.

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pathway_core::{LevelId, PathMode};
use pathway_engine::{GenerationRequest, PathEngine};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Enemy path generation and validation.
#[derive(Debug, Parser)]
#[command(name = "pathway", version, about)]
struct Cli {
    /// TOML configuration file; the built-in levels are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Runs the engine in production posture.
    #[arg(long, global = true)]
    production: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generates the path for one level and prints it as JSON.
    Generate {
        /// Level identifier.
        #[arg(long)]
        level: u32,
        /// Visual theme.
        #[arg(long, default_value = "cyber")]
        theme: String,
        /// Generation strategy: static, dynamic or hybrid.
        #[arg(long, default_value = "static")]
        mode: PathMode,
        /// Seed; omit for a fresh path on every call.
        #[arg(long)]
        seed: Option<u64>,
        /// Runs generation as a polled task and logs its progress.
        #[arg(long)]
        progress: bool,
    },
    /// Validates a point sequence against a named profile.
    Validate {
        /// Profile name.
        #[arg(long, default_value = "balanced")]
        profile: String,
        /// Overrides the profile's turn limit in degrees.
        #[arg(long)]
        max_turn_angle: Option<f32>,
        /// Overrides the profile's shortest segment.
        #[arg(long)]
        min_segment_length: Option<f32>,
        /// Overrides the profile's longest segment.
        #[arg(long)]
        max_segment_length: Option<f32>,
        /// Points written as `x,y`, from entry to exit.
        #[arg(required = true, num_args = 2.., allow_hyphen_values = true)]
        points: Vec<String>,
    },
    /// Prints the configuration snapshot of the engine.
    Export,
    /// Loads a configuration snapshot and reports what it restored.
    Import {
        /// Snapshot produced by `export`.
        snapshot: String,
    },
    /// Lists validation profiles and the levels using them.
    Profiles,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = commands::load_config(cli.config.as_deref())?;
    config.production_mode |= cli.production;
    let mut engine = PathEngine::new(config);

    run(&mut engine, cli.command)?;

    let _ = engine.flush_errors();
    let stats = engine.error_stats();
    if stats.total > 0 {
        warn!(
            total = stats.total,
            critical = stats.critical,
            errors = stats.errors,
            "engine recorded errors"
        );
    }
    Ok(())
}

fn run(engine: &mut PathEngine, command: Command) -> Result<()> {
    match command {
        Command::Generate {
            level,
            theme,
            mode,
            seed,
            progress,
        } => {
            let mut request = GenerationRequest::new(LevelId::new(level), theme, mode);
            if let Some(seed) = seed {
                request = request.with_seed(seed);
            }

            let path = if progress {
                let task = engine.generate_async(&request, |progress| {
                    info!(
                        stage = %progress.stage,
                        percent = progress.percent,
                        "{}",
                        progress.message
                    );
                });
                engine.run_task(task)?
            } else {
                engine.generate(&request)?
            };
            println!("{}", serde_json::to_string_pretty(&path)?);
        }
        Command::Validate {
            profile,
            max_turn_angle,
            min_segment_length,
            max_segment_length,
            points,
        } => {
            let points = points
                .iter()
                .map(|point| commands::parse_point(point))
                .collect::<Result<Vec<_>>>()?;
            let overrides =
                commands::profile_override(max_turn_angle, min_segment_length, max_segment_length);
            let result = engine.validate(&points, &profile, overrides.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Export => {
            println!("{}", engine.export_configuration()?);
        }
        Command::Import { snapshot } => {
            let restored = engine
                .import_configuration(&snapshot)
                .context("failed to import configuration snapshot")?;
            println!(
                "imported {} level(s), {} override(s), {restored} cached path(s)",
                engine.config().levels.len(),
                engine
                    .config()
                    .levels
                    .iter()
                    .filter(|level| engine.level_override(level.id).is_some())
                    .count(),
            );
        }
        Command::Profiles => {
            let config = engine.config();
            for (name, profile) in &config.profiles {
                let marker = if *name == config.default_profile { "*" } else { " " };
                println!(
                    "{marker} {name:<10} turn<={:>5.1} segment {:>5.1}..{:<5.1} complexity<={:.2}",
                    profile.max_turn_angle,
                    profile.min_segment_length,
                    profile.max_segment_length,
                    profile.max_complexity,
                );
            }
            for level in &config.levels {
                println!("  level {} uses '{}'", level.id, level.definition.profile);
            }
        }
    }
    Ok(())
}
