use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tchron_common::{ParticleSnapshot, SnapshotReport, TchronConfig};
use tchron_engine::{BandedSolver, DiffusionProfile, EnsembleDriver, ForwardModel, RadialProfile, SimParams};

/// Thermochronometric ages for geodynamic particle ensembles
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Carry every particle through a recorded snapshot series and date it
    Ensemble {
        /// Path to the config.toml file
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        /// Snapshot series (.json, .bin or .msgpack)
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Forward model a single time-temperature path
    Path {
        /// Path to the config.toml file
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        /// CSV file with a `temperature_k` column, oldest sample first
        #[arg(short, long)]
        temps: PathBuf,

        /// Years between samples (overrides timing.time_interval_yr)
        #[arg(long)]
        interval: Option<f64>,
    },
}

#[derive(Debug, Deserialize)]
struct TemperatureRow {
    temperature_k: f64,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    let args = Args::parse();
    info!("Using {} Rayon threads.", rayon::current_num_threads());

    match args.command {
        Command::Ensemble { config, input } => run_ensemble(&config, &input),
        Command::Path { config, temps, interval } => run_path(&config, &temps, interval),
    }
}

fn run_ensemble(config_path: &Path, input: &Path) -> Result<()> {
    let config = TchronConfig::load(config_path)?;
    debug!("Configuration: {:#?}", config);

    let snapshots = load_snapshots(input)?;
    info!("Loaded {} snapshots from {}", snapshots.len(), input.display());
    let (last, rest) = snapshots
        .split_last()
        .with_context(|| format!("No snapshots in '{}'", input.display()))?;

    let mut driver = EnsembleDriver::new(&config)?;
    let start_time = Instant::now();

    let progress_bar = ProgressBar::new(snapshots.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} snapshots ({percent}%) [{eta}]")
            .context("Invalid progress bar template")?
            .progress_chars("#>-"),
    );

    for snapshot in rest {
        if let Err(e) = driver.advance(snapshot) {
            error!("Error at snapshot {}: {}", driver.snapshots_processed(), e);
            progress_bar.abandon();
            return Err(e.into());
        }
        progress_bar.inc(1);
    }
    let ages = driver.finish(last)?;
    progress_bar.finish();

    info!(
        "Ensemble finished in {:.2}s: {} of {} particles dated.",
        start_time.elapsed().as_secs_f64(),
        ages.dated_count(),
        ages.ages.len()
    );

    let base = &config.output.base_filename;
    if config.output.save_ages {
        let filename = format!("{}_ages.csv", base);
        let mut writer = csv::Writer::from_path(&filename)
            .with_context(|| format!("Error creating ages file '{}'", filename))?;
        for record in ages.records() {
            writer.serialize(record)?;
        }
        writer.flush()?;
        info!("Ages saved to {}", filename);
    } else {
        info!("Skipping saving ages as per config.");
    }

    if config.output.save_reports {
        let format = config.output.format.as_deref().unwrap_or("json");
        save_reports(driver.recorded_reports(), base, format)?;
    }

    for (id, radial) in &ages.profiles {
        let filename = format!("{}_profile_{}.csv", base, id);
        write_radial_profile(&filename, radial)?;
        info!("Radial profile of particle {} saved to {}", id, filename);
    }
    for &id in &config.output.profile_particles {
        let filename = format!("{}_carried_{}.csv", base, id);
        write_carried_profile(&filename, &driver.state().profile_values(id))?;
        info!("Carried profile of particle {} saved to {}", id, filename);
    }

    info!("Run Complete.");
    Ok(())
}

fn run_path(config_path: &Path, temps_path: &Path, interval: Option<f64>) -> Result<()> {
    let config = TchronConfig::load(config_path)?;
    let time_interval = interval.unwrap_or(config.timing.time_interval_yr);

    let mut reader = csv::Reader::from_path(temps_path)
        .with_context(|| format!("Failed to open temperature file '{}'", temps_path.display()))?;
    let temperatures = reader
        .deserialize::<TemperatureRow>()
        .map(|row| row.map(|r| r.temperature_k))
        .collect::<Result<Vec<f64>, _>>()
        .with_context(|| format!("Failed to parse temperatures from '{}'", temps_path.display()))?;
    if temperatures.is_empty() {
        warn!("Temperature file '{}' has no samples; the grain holds no He.", temps_path.display());
    }

    let params = SimParams::from_grain(&config.grain, time_interval)?;
    info!(
        "Forward modelling {} samples at {:.3e} yr intervals ({}, R = {} um)",
        temperatures.len(),
        time_interval,
        params.system,
        params.radius
    );
    let result = ForwardModel::new(&params, &BandedSolver).run_with_age(&temperatures, None)?;
    info!("Uncorrected age: {:.3} Ma", result.age.age_uncorrected);
    info!("Corrected age:   {:.3} Ma", result.age.age_corrected);

    let filename = format!("{}_path_profile.csv", config.output.base_filename);
    write_radial_profile(&filename, &result.radial)?;
    info!("Radial profile saved to {}", filename);
    Ok(())
}

/// Reads a `Vec<ParticleSnapshot>` in the format given by the file extension.
fn load_snapshots(path: &Path) -> Result<Vec<ParticleSnapshot>> {
    let file = File::open(path).with_context(|| format!("Failed to open snapshot file '{}'", path.display()))?;
    let reader = BufReader::new(file);
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    let snapshots: Vec<ParticleSnapshot> = match extension {
        "json" => serde_json::from_reader(reader).context("Failed to parse JSON snapshots")?,
        "bin" => bincode::deserialize_from(reader).context("Failed to read bincode snapshots")?,
        "msgpack" => rmp_serde::from_read(reader).context("Failed to read MessagePack snapshots")?,
        other => anyhow::bail!("Unknown snapshot file extension '{}' (expected json, bin or msgpack)", other),
    };
    Ok(snapshots)
}

fn save_reports(reports: &[SnapshotReport], base: &str, format: &str) -> Result<()> {
    match format {
        "bincode" => {
            let filename = format!("{}_reports.bin", base);
            let file = BufWriter::new(File::create(&filename)?);
            bincode::serialize_into(file, reports).context("Error serializing reports to bincode")?;
            info!("Snapshot reports saved to {} (binary format)", filename);
        }
        "messagepack" => {
            let filename = format!("{}_reports.msgpack", base);
            let mut file = BufWriter::new(File::create(&filename)?);
            rmp_serde::encode::write(&mut file, reports).context("Error serializing reports to MessagePack")?;
            info!("Snapshot reports saved to {} (MessagePack format)", filename);
        }
        other => {
            if other != "json" {
                error!("Unknown output format: {}. Using JSON instead.", other);
            }
            let filename = format!("{}_reports.json", base);
            let file = BufWriter::new(File::create(&filename)?);
            serde_json::to_writer(file, reports).context("Error serializing reports to JSON")?;
            info!("Snapshot reports saved to {}", filename);
        }
    }
    Ok(())
}

fn write_radial_profile(filename: &str, radial: &RadialProfile) -> Result<()> {
    let mut writer = csv::Writer::from_path(filename)
        .with_context(|| format!("Error creating profile file '{}'", filename))?;
    writer.write_record(["r_over_radius", "concentration_norm"])?;
    for (r, c) in radial.position.iter().zip(&radial.concentration) {
        writer.write_record(&[format!("{:.6}", r), format!("{:.6}", c)])?;
    }
    writer.flush()?;
    Ok(())
}

// Raw substituted profile u = v r per node; NaN rows when the particle has none
fn write_carried_profile(filename: &str, profile: &DiffusionProfile) -> Result<()> {
    let mut writer = csv::Writer::from_path(filename)
        .with_context(|| format!("Error creating profile file '{}'", filename))?;
    writer.write_record(["node", "u"])?;
    for (node, u) in profile.values().iter().enumerate() {
        writer.write_record(&[node.to_string(), format!("{:e}", u)])?;
    }
    writer.flush()?;
    Ok(())
}
