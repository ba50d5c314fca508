//! feeder_ctl - admin tool for the bird feeder database and model outputs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use birdfeeder::{
    now_s, split_names, ClassLabels, DetectionThresholds, FeederToken, RawOutput, SightingStore,
    SpeciesDetector, SqliteSightingStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the sightings database.
    #[arg(long, env = "BIRDFEEDER_DB_PATH", default_value = "birdfeeder.db")]
    db_path: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every species record.
    Birds {
        /// Print records as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Record a manual sighting (comma-separated names). An empty list only
    /// clears the currently-observed flags.
    Add {
        #[arg(default_value = "")]
        names: String,
    },
    /// Run the species pipeline over a saved raw model output (JSON).
    Detect {
        /// Raw output file: {"rows":..,"cols":..,"data":[..]} or [[..],..].
        output: PathBuf,
        /// Class label list, one per line.
        #[arg(long, env = "BIRDFEEDER_LABELS_PATH", default_value = "class_names.txt")]
        labels: PathBuf,
        #[arg(long, default_value_t = 0.25)]
        confidence: f32,
        #[arg(long, default_value_t = 0.5)]
        iou: f32,
    },
    /// Show the feeder token fingerprint, creating the token if needed.
    Token {
        #[arg(long, env = "BIRDFEEDER_TOKEN_PATH", default_value = "feeder_token")]
        path: PathBuf,
        /// Print the secret itself (for pairing a device).
        #[arg(long)]
        reveal: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Birds { json } => {
            let mut store = SqliteSightingStore::open(&args.db_path)?;
            let birds = store.birds()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&birds)?);
                return Ok(());
            }
            if birds.is_empty() {
                println!("no species recorded in {}", args.db_path);
            }
            for bird in birds {
                let hours: Vec<String> = bird
                    .hourly_observations
                    .iter()
                    .map(|(hour, count)| format!("{hour:02}h={count}"))
                    .collect();
                println!(
                    "{:<28} {:>6} seen  last={}  {}{}",
                    bird.name,
                    bird.hourly_observations.total(),
                    bird.last_seen,
                    hours.join(" "),
                    if bird.currently_observed { "  [at feeder]" } else { "" }
                );
            }
        }
        Command::Add { names } => {
            let mut store = SqliteSightingStore::open(&args.db_path)?;
            let summary = store.record_sightings(&split_names(&names), now_s()?)?;
            println!("{}", summary.message());
        }
        Command::Detect {
            output,
            labels,
            confidence,
            iou,
        } => {
            let raw = std::fs::read_to_string(&output)
                .with_context(|| format!("failed to read raw output {}", output.display()))?;
            let raw: RawOutput = serde_json::from_str(&raw)
                .with_context(|| format!("invalid raw output {}", output.display()))?;
            let labels = ClassLabels::load(&labels)?;
            labels.ensure_class_count(raw.class_count())?;
            let detector =
                SpeciesDetector::new(labels, DetectionThresholds { confidence, iou })?;
            for species in detector.detect_species(&raw)? {
                println!("{species}");
            }
        }
        Command::Token { path, reveal } => {
            let (token, created) = FeederToken::load_or_create(&path)?;
            if created {
                eprintln!("created feeder token at {}", path.display());
            }
            if reveal {
                println!("{}", token.as_str());
            } else {
                println!("fingerprint {}", token.fingerprint());
            }
        }
    }
    Ok(())
}
