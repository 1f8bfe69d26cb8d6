use serde::{Deserialize, Serialize};
use anyhow::Result;
use std::path::Path;

// Grain properties shared by every particle in a run
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GrainConfig {
    pub u_ppm: f64,
    pub th_ppm: f64,
    pub radius_um: f64,
    /// Isotopic system shorthand: AHe, ZHe, BtAr, MsAr, HbAr or KsAr.
    pub system: String,
    /// Radial node count; must be 2^m + 1 for Romberg integration.
    #[serde(default = "default_nodes")]
    pub nodes: usize,
}

// Configuration for timing
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    /// Years between consecutive snapshots (or t-T path samples).
    pub time_interval_yr: f64,
}

// Nearest-neighbour fallback and work partitioning
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct EnsembleConfig {
    /// Particles farther than this from any carried particle stay undefined.
    #[serde(default)]
    pub max_neighbor_distance: Option<f64>,
    /// Spatial index cell size; derived from point density when absent.
    #[serde(default)]
    pub neighbor_cell_size: Option<f64>,
    /// Minimum number of particles per parallel task.
    #[serde(default)]
    pub batch_size: Option<usize>,
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    #[serde(default = "default_true")]
    pub save_ages: bool,
    #[serde(default)]
    pub save_reports: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
    /// Particle ids whose normalised radial profile is written at the end.
    #[serde(default)]
    pub profile_particles: Vec<u64>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            base_filename: "tchron".to_string(),
            save_ages: true,
            save_reports: false,
            format: None,
            profile_particles: Vec::new(),
        }
    }
}

fn default_nodes() -> usize {
    513
}

fn default_true() -> bool {
    true
}

// Main run configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TchronConfig {
    pub grain: GrainConfig,
    pub timing: TimingConfig,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl TchronConfig {
    /// Loads the run configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;

        Ok(config)
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: TchronConfig = toml::from_str(text)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values the engine cannot recover from later.
    /// The isotopic system name is resolved by the engine itself.
    pub fn validate(&self) -> Result<()> {
        if !(self.grain.radius_um > 0.0) {
            anyhow::bail!("radius_um must be positive.");
        }
        if self.grain.u_ppm < 0.0 || self.grain.th_ppm < 0.0 {
            anyhow::bail!("u_ppm and th_ppm must not be negative.");
        }
        if !is_romberg_count(self.grain.nodes) {
            anyhow::bail!("nodes must be of the form 2^m + 1 (got {}).", self.grain.nodes);
        }
        if !(self.timing.time_interval_yr > 0.0) {
            anyhow::bail!("time_interval_yr must be positive.");
        }
        if let Some(d) = self.ensemble.max_neighbor_distance {
            if d.is_nan() || d < 0.0 {
                anyhow::bail!("max_neighbor_distance must not be negative.");
            }
        }
        if let Some(c) = self.ensemble.neighbor_cell_size {
            if !(c > 0.0) {
                anyhow::bail!("neighbor_cell_size must be positive.");
            }
        }
        if self.ensemble.batch_size == Some(0) {
            anyhow::bail!("batch_size must be greater than 0.");
        }
        Ok(())
    }
}

/// True when `n` is 2^m + 1 with m >= 1.
pub fn is_romberg_count(n: usize) -> bool {
    n >= 3 && (n - 1).is_power_of_two()
}
