// Published forward-model cases of Ketcham (2005) for apatite.

use approx::assert_relative_eq;
use tchron_engine::{forward_model, ForwardOutput, IsotopicSystem};

const NODES: usize = 513;

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
        .collect()
}

fn celsius_to_kelvin(temps: Vec<f64>) -> Vec<f64> {
    temps.into_iter().map(|t| t + 273.0).collect()
}

fn corrected_age(u: f64, th: f64, radius: f64, temps: &[f64], interval: f64) -> f64 {
    match forward_model(u, th, radius, temps, interval, IsotopicSystem::AHe, NODES, None, true).unwrap() {
        ForwardOutput::Age(result) => {
            assert!(result.age.age_uncorrected < result.age.age_corrected);
            result.age.age_corrected
        }
        ForwardOutput::Profile(_) => panic!("asked for an age"),
    }
}

#[test]
fn early_cooling() {
    // 120 -> 20 C over 10 Myr, then 50 Myr at 20 C
    let mut temps = linspace(120.0, 20.0, 11);
    temps.extend(linspace(20.0, 20.0, 50));
    let age = corrected_age(100.0, 100.0, 100.0, &celsius_to_kelvin(temps), 1e6);
    assert_relative_eq!(age, 54.6, max_relative = 0.1);
}

#[test]
fn linear_cooling() {
    let temps = celsius_to_kelvin(linspace(120.0, 20.0, 7));
    let age = corrected_age(1.0, 1.0, 50.0, &temps, 10e6);
    assert_relative_eq!(age, 26.5, max_relative = 0.1);
}

#[test]
fn late_cooling() {
    // Slow cooling to 65 C over 57.5 Myr, then fast to 20 C
    let mut temps = linspace(120.0, 65.0, 116);
    temps.extend(linspace(65.0, 20.0, 6).into_iter().skip(1));
    let age = corrected_age(100.0, 100.0, 100.0, &celsius_to_kelvin(temps), 0.5e6);
    assert_relative_eq!(age, 7.12, max_relative = 0.1);
}

#[test]
fn carried_profile_reproduces_unsplit_path() {
    let mut temps = linspace(120.0, 20.0, 11);
    temps.extend(linspace(20.0, 20.0, 50));
    let temps = celsius_to_kelvin(temps);
    let whole = corrected_age(100.0, 100.0, 100.0, &temps, 1e6);

    let carried = match forward_model(100.0, 100.0, 100.0, &temps[..30], 1e6, IsotopicSystem::AHe, NODES, None, false)
        .unwrap()
    {
        ForwardOutput::Profile(profile) => profile,
        ForwardOutput::Age(_) => panic!("asked for a profile"),
    };
    let split = match forward_model(
        100.0,
        100.0,
        100.0,
        &temps[30..],
        1e6,
        IsotopicSystem::AHe,
        NODES,
        Some(carried),
        true,
    )
    .unwrap()
    {
        ForwardOutput::Age(result) => result.age.age_corrected,
        ForwardOutput::Profile(_) => panic!("asked for an age"),
    };
    assert_relative_eq!(split, whole, max_relative = 1e-12);
}
