//! Conversion of a solved He profile into a (U-Th)/He age.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::diffusion::DiffusionProfile;
use crate::error::{TchronError, TchronResult};
use crate::sim_params::{decay_constants, ParentInventory, SimParams, ALPHAS_PER_CHAIN};

/// Initial guess for the age equation (yr).
const AGE_SEED_YR: f64 = 1e6;
/// Upper limit for bracketing; well past the age of the Earth.
const AGE_LIMIT_YR: f64 = 1e11;
const MAX_ITERATIONS: usize = 200;
/// mol -> ncc at STP.
const NCC_PER_MOL: f64 = 22.4e12;

/// Both ages of one grain (Ma).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgeResult {
    pub age_uncorrected: f64,
    pub age_corrected: f64,
    /// Bulk He (mol/g).
    pub helium_molg: f64,
}

/// Normalised radial profile for diagnostic plots.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RadialProfile {
    /// Concentration divided by its maximum.
    pub concentration: Vec<f64>,
    /// Node position divided by the grain radius.
    pub position: Vec<f64>,
}

/// Bulk He in the grain and the recovered concentration profile.
#[derive(Debug, Clone, PartialEq)]
pub struct HeliumContent {
    /// Total He (mol/g).
    pub helium_molg: f64,
    /// Concentration `v = u / r` at every node (mol/g).
    pub concentration: Vec<f64>,
}

/// Sums He over the grain, weighting each node by the volume of its shell.
pub fn sum_he_shells(x: &[f64], node_positions: &[f64], radius: f64) -> TchronResult<HeliumContent> {
    if x.len() != node_positions.len() {
        return Err(TchronError::ProfileLength { expected: node_positions.len(), found: x.len() });
    }
    let sphere = |r: f64| r.powi(3) * (4.0 * std::f64::consts::PI / 3.0);
    let total_volume = sphere(radius);

    // Back-substitute u = v r
    let concentration: Vec<f64> = x.iter().zip(node_positions).map(|(u, r)| u / r).collect();

    let mut inner = 0.0;
    let weighted: Vec<f64> = concentration
        .iter()
        .zip(node_positions)
        .map(|(v, &r)| {
            let outer = sphere(r);
            let shell_fraction = (outer - inner) / total_volume;
            inner = outer;
            v * shell_fraction
        })
        .collect();

    let helium_molg = romberg(&weighted)?;
    debug!("He: {:.4e} ncc/g ({:.4} nmol/g)", helium_molg * NCC_PER_MOL, helium_molg * 1e9);
    Ok(HeliumContent { helium_molg, concentration })
}

/// Romberg integration of equally spaced samples with unit spacing.
/// Requires `2^m + 1` samples.
pub fn romberg(y: &[f64]) -> TchronResult<f64> {
    let samples = y.len();
    if samples < 3 || !(samples - 1).is_power_of_two() {
        return Err(TchronError::Config(format!(
            "Romberg integration needs 2^m + 1 samples, got {samples}"
        )));
    }
    let intervals = samples - 1;
    let levels = intervals.trailing_zeros() as usize;

    let mut table = vec![vec![0.0; levels + 1]; levels + 1];
    let mut h = intervals as f64;
    table[0][0] = (y[0] + y[intervals]) / 2.0 * h;

    let mut start = intervals;
    let mut step = intervals;
    for i in 1..=levels {
        start >>= 1;
        let midpoints: f64 = y[start..intervals].iter().step_by(step).sum();
        step >>= 1;
        table[i][0] = 0.5 * (table[i - 1][0] + h * midpoints);
        for j in 1..=i {
            let previous = table[i][j - 1];
            table[i][j] = previous + (previous - table[i - 1][j - 1]) / ((1u64 << (2 * j)) - 1) as f64;
        }
        h /= 2.0;
    }
    Ok(table[levels][levels])
}

/// Solves `sum n_i (exp(lambda_i t) - 1) = He` for t and returns it in Ma.
///
/// No alpha correction is applied here; callers pass corrected parents.
pub fn calculate_age(helium_molg: f64, parents: &ParentInventory) -> TchronResult<f64> {
    if !helium_molg.is_finite() || helium_molg <= 0.0 {
        return Err(TchronError::NonPositiveHelium(helium_molg));
    }
    let lambda = decay_constants();
    let terms = parents.as_array();
    let age_equation = |t: f64| -> f64 {
        (0..3)
            .map(|i| ALPHAS_PER_CHAIN[i] * terms[i] * (lambda[i] * t).exp_m1())
            .sum::<f64>()
            - helium_molg
    };

    // f(0) = -He < 0; expand from the seed until the sign changes
    let mut low = 0.0;
    let mut high = AGE_SEED_YR;
    while age_equation(high) < 0.0 {
        low = high;
        high *= 2.0;
        if high > AGE_LIMIT_YR {
            return Err(TchronError::AgeNoConvergence(format!(
                "no root below {AGE_LIMIT_YR:e} yr for He = {helium_molg:e} mol/g"
            )));
        }
    }

    let age_yr = brent(age_equation, low, high, 1e-6)?;
    Ok(age_yr / 1e6)
}

/// Brent's method on a bracketing interval `[a, b]`; `tol` is in the
/// units of the abscissa.
fn brent<F: Fn(f64) -> f64>(f: F, a: f64, b: f64, tol: f64) -> TchronResult<f64> {
    let (mut a, mut b) = (a, b);
    let (mut fa, mut fb) = (f(a), f(b));
    if fa * fb > 0.0 {
        return Err(TchronError::AgeNoConvergence("root is not bracketed".into()));
    }
    if fa == 0.0 {
        return Ok(a);
    }
    let (mut c, mut fc) = (a, fa);
    let mut d = b - a;
    let mut e = d;

    for _ in 0..MAX_ITERATIONS {
        if fb * fc > 0.0 {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }
        let tol1 = 2.0 * f64::EPSILON * b.abs() + 0.5 * tol;
        let xm = 0.5 * (c - b);
        if xm.abs() <= tol1 || fb == 0.0 {
            return Ok(b);
        }
        if e.abs() >= tol1 && fa.abs() > fb.abs() {
            // Inverse quadratic interpolation, or secant when a == c
            let s = fb / fa;
            let mut p;
            let mut q;
            if a == c {
                p = 2.0 * xm * s;
                q = 1.0 - s;
            } else {
                let qa = fa / fc;
                let r = fb / fc;
                p = s * (2.0 * xm * qa * (qa - r) - (b - a) * (r - 1.0));
                q = (qa - 1.0) * (r - 1.0) * (s - 1.0);
            }
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();
            let min1 = 3.0 * xm * q - (tol1 * q).abs();
            let min2 = (e * q).abs();
            if 2.0 * p < min1.min(min2) {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }
        a = b;
        fa = fb;
        b += if d.abs() > tol1 { d } else { tol1.copysign(xm) };
        fb = f(b);
    }
    Err(TchronError::AgeNoConvergence(format!("no convergence after {MAX_ITERATIONS} iterations")))
}

/// Integrates the profile and inverts the age equation with raw and
/// alpha-corrected parents.
///
/// The spatial ejection loss is already in the production term; the
/// corrected age additionally scales the parents by tau.
pub fn profile_to_age(profile: &DiffusionProfile, params: &SimParams) -> TchronResult<(AgeResult, RadialProfile)> {
    let content = sum_he_shells(profile.values(), &params.node_positions, params.radius)?;

    let age_uncorrected = calculate_age(content.helium_molg, &params.inventory)?;
    let age_corrected = calculate_age(content.helium_molg, &params.corrected_inventory())?;
    debug!("Age (Ma) uncorrected: {:.3}, corrected: {:.3}", age_uncorrected, age_corrected);

    let radial = normalized_profile(&content.concentration, &params.node_positions, params.radius);
    Ok((
        AgeResult { age_uncorrected, age_corrected, helium_molg: content.helium_molg },
        radial,
    ))
}

/// Scales concentration by its maximum and position by the radius.
pub fn normalized_profile(concentration: &[f64], node_positions: &[f64], radius: f64) -> RadialProfile {
    let peak = concentration.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let concentration = if peak > 0.0 {
        concentration.iter().map(|v| v / peak).collect()
    } else {
        vec![0.0; concentration.len()]
    };
    RadialProfile {
        concentration,
        position: node_positions.iter().map(|r| r / radius).collect(),
    }
}
