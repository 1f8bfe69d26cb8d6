use serde::{Deserialize, Serialize};
use tchron_common::{is_romberg_count, GrainConfig, TchronConfig};

use crate::alpha::{alpha_correction, retained_fractions};
use crate::error::{TchronError, TchronResult};
use crate::system::{IsotopicSystem, SystemParameters};

/// 238U/235U present-day ratio.
const U238_U235_RATIO: f64 = 137.88;

// Half-lives (yr)
const HALF_LIFE_238U: f64 = 4.468e9;
const HALF_LIFE_235U: f64 = 7.04e8;
const HALF_LIFE_232TH: f64 = 1.40e10;

/// Decay constants (1/yr) for 238U, 235U and 232Th.
pub fn decay_constants() -> [f64; 3] {
    let ln2 = std::f64::consts::LN_2;
    [ln2 / HALF_LIFE_238U, ln2 / HALF_LIFE_235U, ln2 / HALF_LIFE_232TH]
}

/// Alpha particles emitted per decay chain: 238U, 235U, 232Th.
pub const ALPHAS_PER_CHAIN: [f64; 3] = [8.0, 7.0, 6.0];

/// Parent isotope amounts (mol/g).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParentInventory {
    pub u238: f64,
    pub u235: f64,
    pub th232: f64,
}

impl ParentInventory {
    /// Converts U and Th concentrations (ppm) to mol/g of each parent.
    pub fn from_ppm(u_ppm: f64, th_ppm: f64) -> Self {
        let u238_ppm = (U238_U235_RATIO / (1.0 + U238_U235_RATIO)) * u_ppm;
        let u235_ppm = (1.0 / (1.0 + U238_U235_RATIO)) * u_ppm;
        ParentInventory {
            u238: u238_ppm * 1e-6 / 238.0,
            u235: u235_ppm * 1e-6 / 235.0,
            th232: th_ppm * 1e-6 / 232.0,
        }
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.u238, self.u235, self.th232]
    }

    /// Scales each parent by its own factor.
    pub fn scaled(&self, factors: [f64; 3]) -> Self {
        ParentInventory {
            u238: self.u238 * factors[0],
            u235: self.u235 * factors[1],
            th232: self.th232 * factors[2],
        }
    }

    /// He production rate (mol/g/yr) with no ejection loss.
    pub fn he_production_rate(&self) -> f64 {
        let lambda = decay_constants();
        self.as_array()
            .iter()
            .zip(lambda.iter().zip(ALPHAS_PER_CHAIN.iter()))
            .map(|(n, (l, alphas))| alphas * l * n)
            .sum()
    }
}

/// Grain parameters derived from the configuration, shared read-only by
/// every particle of a run.
#[derive(Debug, Clone)]
pub struct SimParams {
    pub system: IsotopicSystem,
    pub parameters: SystemParameters,
    /// Grain radius (um).
    pub radius: f64,
    pub nodes: usize,
    /// Distance between nodes (um).
    pub node_spacing: f64,
    /// Time step (yr).
    pub time_interval: f64,
    /// Radial position of each node (um).
    pub node_positions: Vec<f64>,
    pub inventory: ParentInventory,
    /// He production rate per node after alpha ejection (mol/g/yr).
    pub production: Vec<f64>,
    /// Scalar alpha correction per parent, applied at age inversion.
    pub tau: [f64; 3],
}

impl SimParams {
    /// Builds run parameters from the `[grain]` and `[timing]` sections.
    pub fn from_config(config: &TchronConfig) -> TchronResult<Self> {
        Self::from_grain(&config.grain, config.timing.time_interval_yr)
    }

    pub fn from_grain(grain: &GrainConfig, time_interval: f64) -> TchronResult<Self> {
        let system: IsotopicSystem = grain.system.parse()?;
        Self::with_parameters(
            system,
            system.parameters(),
            grain.u_ppm,
            grain.th_ppm,
            grain.radius_um,
            grain.nodes,
            time_interval,
        )
    }

    /// Like [`SimParams::from_grain`] but with explicit system constants.
    pub fn with_parameters(
        system: IsotopicSystem,
        parameters: SystemParameters,
        u_ppm: f64,
        th_ppm: f64,
        radius: f64,
        nodes: usize,
        time_interval: f64,
    ) -> TchronResult<Self> {
        if !(radius > 0.0) || !radius.is_finite() {
            return Err(TchronError::Config(format!("grain radius must be positive, got {radius}")));
        }
        if !(time_interval > 0.0) || !time_interval.is_finite() {
            return Err(TchronError::Config(format!("time interval must be positive, got {time_interval}")));
        }
        if !is_romberg_count(nodes) {
            return Err(TchronError::Config(format!("node count must be 2^m + 1, got {nodes}")));
        }
        if u_ppm < 0.0 || th_ppm < 0.0 || !u_ppm.is_finite() || !th_ppm.is_finite() {
            return Err(TchronError::Config(format!("U and Th must be non-negative, got U={u_ppm} Th={th_ppm}")));
        }

        let node_spacing = radius / nodes as f64;
        let node_positions = node_positions(node_spacing, nodes);
        let inventory = ParentInventory::from_ppm(u_ppm, th_ppm);

        let (production, tau) = match parameters.stopping_distances {
            Some(distances) => {
                let fractions: Vec<Vec<f64>> = distances
                    .iter()
                    .map(|&d| retained_fractions(&node_positions, d, radius))
                    .collect();
                let production = (0..nodes)
                    .map(|j| {
                        inventory
                            .scaled([fractions[0][j], fractions[1][j], fractions[2][j]])
                            .he_production_rate()
                    })
                    .collect();
                let tau = [
                    alpha_correction(distances[0], radius),
                    alpha_correction(distances[1], radius),
                    alpha_correction(distances[2], radius),
                ];
                (production, tau)
            }
            None => (vec![inventory.he_production_rate(); nodes], [1.0; 3]),
        };

        Ok(SimParams {
            system,
            parameters,
            radius,
            nodes,
            node_spacing,
            time_interval,
            node_positions,
            inventory,
            production,
            tau,
        })
    }

    /// Parent inventory after the scalar alpha correction.
    pub fn corrected_inventory(&self) -> ParentInventory {
        self.inventory.scaled(self.tau)
    }
}

/// Node centres at `(j + 1/2) * spacing`.
pub fn node_positions(node_spacing: f64, nodes: usize) -> Vec<f64> {
    (0..nodes).map(|j| (j as f64 + 0.5) * node_spacing).collect()
}
