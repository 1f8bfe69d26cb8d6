//! Implicit finite-difference step for He diffusion in a sphere, after
//! Ketcham (2005).
//!
//! The state is the substitution `u = v * r` (concentration times radius),
//! which turns the spherical diffusion equation into a 1-D one. The centre
//! is reflective (`u(-r) = -u(r)`), the rim loses everything (`u = 0` just
//! outside the last node).
//!
//! Steps are Crank-Nicolson while `beta >= CRANK_NICOLSON_MIN_BETA`. Below
//! that the Crank-Nicolson factor of the resolved modes goes negative and a
//! carried profile would flip sign each step instead of decaying, so those
//! steps are backward Euler. When `kappa` underflows the step is the
//! production increment alone.

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::{TchronError, TchronResult};
use crate::linalg::{LinearSystem, Tridiagonal};
use crate::sim_params::SimParams;
use crate::system::SystemParameters;

/// Gas constant (J/K/mol).
pub const GAS_CONSTANT: f64 = 8.3144598;

/// Smallest `beta` at which every Crank-Nicolson mode factor is non-negative.
pub const CRANK_NICOLSON_MIN_BETA: f64 = 4.0;

/// Time discretisation used for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepScheme {
    /// No diffusion at all: `u' = u + P r dt`.
    ProductionOnly,
    CrankNicolson,
    BackwardEuler,
}

impl StepScheme {
    pub fn for_beta(beta: f64) -> Self {
        if !beta.is_finite() {
            StepScheme::ProductionOnly
        } else if beta >= CRANK_NICOLSON_MIN_BETA {
            StepScheme::CrankNicolson
        } else {
            StepScheme::BackwardEuler
        }
    }
}

/// Radial He state of one grain, stored as `u = v * r` per node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffusionProfile {
    values: Vec<f64>,
}

impl DiffusionProfile {
    /// All-zero profile: the grain's clock is fully reset.
    pub fn zeros(nodes: usize) -> Self {
        DiffusionProfile { values: vec![0.0; nodes] }
    }

    /// NaN-filled profile, the export form of an undefined state.
    pub fn undefined(nodes: usize) -> Self {
        DiffusionProfile { values: vec![f64::NAN; nodes] }
    }

    pub fn from_values(values: Vec<f64>) -> Self {
        DiffusionProfile { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when any node holds NaN.
    pub fn is_undefined(&self) -> bool {
        self.values.iter().any(|v| v.is_nan())
    }
}

/// Arrhenius diffusivity (um^2/yr) at temperature `t` (K).
pub fn diffusivity(t: f64, parameters: &SystemParameters) -> f64 {
    parameters.frequency_factor * (-parameters.activation_energy / (GAS_CONSTANT * t)).exp()
}

/// Dimensionless stiffness `2 h^2 / (kappa dt)`.
pub fn beta(diffusivity: f64, node_spacing: f64, time_interval: f64) -> f64 {
    (2.0 * node_spacing * node_spacing) / (diffusivity * time_interval)
}

/// Left-hand matrix for one step: `(1, -2-beta, 1)` with `-3-beta` in the
/// first row for the reflective centre.
pub fn step_matrix(beta: f64, nodes: usize) -> Tridiagonal {
    let mut matrix = Tridiagonal::constant(1.0, -2.0 - beta, 1.0, nodes);
    if nodes > 0 {
        matrix.diag[0] = -3.0 - beta;
    }
    matrix
}

/// Crank-Nicolson right-hand side for one step.
pub fn step_rhs(x: &[f64], beta: f64, params: &SimParams) -> Vec<f64> {
    let n = x.len();
    let dt = params.time_interval;
    (0..n)
        .map(|j| {
            // Reflection at the centre, zero concentration outside the rim
            let previous = if j == 0 { x[0] } else { -x[j - 1] };
            let next = if j + 1 < n { -x[j + 1] } else { 0.0 };
            previous + (2.0 - beta) * x[j] + next
                - params.production[j] * params.node_positions[j] * beta * dt
        })
        .collect()
}

/// Backward-Euler right-hand side, `-beta_be (u + P r dt)`.
///
/// Pair it with `step_matrix(beta_be, nodes)` where `beta_be = beta / 2`,
/// since the fully implicit step carries the whole `kappa dt` on one side.
pub fn backward_euler_rhs(x: &[f64], beta_be: f64, params: &SimParams) -> Vec<f64> {
    x.iter()
        .enumerate()
        .map(|(j, u)| -beta_be * (u + params.production[j] * params.node_positions[j] * params.time_interval))
        .collect()
}

/// Production-only increment for a step without diffusion.
pub fn production_increment(x: &[f64], params: &SimParams) -> Vec<f64> {
    x.iter()
        .enumerate()
        .map(|(j, u)| u + params.production[j] * params.node_positions[j] * params.time_interval)
        .collect()
}

/// Advances `profile` one time step at temperature `temperature` (K).
///
/// The incoming profile is consumed and a new one returned.
pub fn step_profile<S: LinearSystem + ?Sized>(
    profile: DiffusionProfile,
    temperature: f64,
    params: &SimParams,
    solver: &S,
) -> TchronResult<DiffusionProfile> {
    if profile.len() != params.nodes {
        return Err(TchronError::ProfileLength { expected: params.nodes, found: profile.len() });
    }

    let kappa = diffusivity(temperature, &params.parameters);
    let beta = beta(kappa, params.node_spacing, params.time_interval);
    let scheme = if kappa > 0.0 { StepScheme::for_beta(beta) } else { StepScheme::ProductionOnly };
    trace!("T = {:.2} K, kappa = {:.3e} um^2/yr, beta = {:.3e}, {:?}", temperature, kappa, beta, scheme);

    let x = profile.values();
    let next = match scheme {
        StepScheme::ProductionOnly => production_increment(x, params),
        StepScheme::CrankNicolson => solver.solve(&step_matrix(beta, params.nodes), &step_rhs(x, beta, params))?,
        StepScheme::BackwardEuler => {
            let beta_be = 0.5 * beta;
            solver.solve(&step_matrix(beta_be, params.nodes), &backward_euler_rhs(x, beta_be, params))?
        }
    };

    if let Some(node) = next.iter().position(|v| !v.is_finite()) {
        return Err(TchronError::NonFinite { node });
    }
    Ok(DiffusionProfile::from_values(next))
}
