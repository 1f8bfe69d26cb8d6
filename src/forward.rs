//! Forward model of one grain along a time-temperature path.

use log::debug;

use crate::age::{profile_to_age, AgeResult, RadialProfile};
use crate::diffusion::{step_profile, DiffusionProfile};
use crate::error::{TchronError, TchronResult};
use crate::linalg::{BandedSolver, LinearSystem};
use crate::sim_params::SimParams;
use crate::system::IsotopicSystem;

/// Final state of a forward run with the age computed.
#[derive(Debug, Clone)]
pub struct ForwardAge {
    pub age: AgeResult,
    pub radial: RadialProfile,
    /// Raw final profile, for carrying forward.
    pub profile: DiffusionProfile,
}

/// Runs the diffusion solver for one grain.
pub struct ForwardModel<'a, S: LinearSystem + ?Sized = BandedSolver> {
    params: &'a SimParams,
    solver: &'a S,
}

impl<'a, S: LinearSystem + ?Sized> ForwardModel<'a, S> {
    pub fn new(params: &'a SimParams, solver: &'a S) -> Self {
        ForwardModel { params, solver }
    }

    /// Steps the profile once per temperature (K) and returns the final profile.
    ///
    /// Without an incoming profile the grain starts with no He. An empty
    /// temperature sequence hands the incoming profile back untouched.
    pub fn run_profile(&self, temperatures: &[f64], initial: Option<DiffusionProfile>) -> TchronResult<DiffusionProfile> {
        let mut x = match initial {
            Some(profile) if profile.len() != self.params.nodes => {
                return Err(TchronError::ProfileLength { expected: self.params.nodes, found: profile.len() });
            }
            Some(profile) => profile,
            None => DiffusionProfile::zeros(self.params.nodes),
        };

        for (step, &temperature) in temperatures.iter().enumerate() {
            if !(temperature > 0.0) || !temperature.is_finite() {
                return Err(TchronError::InvalidTemperature { step, temperature });
            }
            x = step_profile(x, temperature, self.params, self.solver)?;
        }
        Ok(x)
    }

    /// Like [`ForwardModel::run_profile`], then converts the final profile to an age.
    pub fn run_with_age(&self, temperatures: &[f64], initial: Option<DiffusionProfile>) -> TchronResult<ForwardAge> {
        let profile = self.run_profile(temperatures, initial)?;
        let (age, radial) = profile_to_age(&profile, self.params)?;
        debug!(
            "{} steps: {:.3} Ma corrected ({:.3} Ma uncorrected)",
            temperatures.len(),
            age.age_corrected,
            age.age_uncorrected
        );
        Ok(ForwardAge { age, radial, profile })
    }
}

/// What [`forward_model`] should hand back.
#[derive(Debug, Clone)]
pub enum ForwardOutput {
    /// Raw final profile, for the next snapshot.
    Profile(DiffusionProfile),
    /// Age, normalised profile and raw final profile.
    Age(ForwardAge),
}

/// Forward models a (U-Th)/He age for one time-temperature path.
///
/// `u_ppm`/`th_ppm` are concentrations, `radius` in um, `temperatures` in K,
/// `time_interval` in years between samples.
#[allow(clippy::too_many_arguments)]
pub fn forward_model(
    u_ppm: f64,
    th_ppm: f64,
    radius: f64,
    temperatures: &[f64],
    time_interval: f64,
    system: IsotopicSystem,
    nodes: usize,
    initial: Option<DiffusionProfile>,
    calc_age: bool,
) -> TchronResult<ForwardOutput> {
    let params = SimParams::with_parameters(
        system,
        system.parameters(),
        u_ppm,
        th_ppm,
        radius,
        nodes,
        time_interval,
    )?;
    let model = ForwardModel::new(&params, &BandedSolver);
    if calc_age {
        model.run_with_age(temperatures, initial).map(ForwardOutput::Age)
    } else {
        model.run_profile(temperatures, initial).map(ForwardOutput::Profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::DenseSolver;
    use approx::assert_relative_eq;

    fn apatite(nodes: usize, time_interval: f64) -> SimParams {
        let system = IsotopicSystem::AHe;
        SimParams::with_parameters(system, system.parameters(), 100.0, 100.0, 100.0, nodes, time_interval).unwrap()
    }

    #[test]
    fn zero_length_continuation_is_identity() {
        let params = apatite(129, 1e6);
        let model = ForwardModel::new(&params, &BandedSolver);
        let profile = model.run_profile(&[400.0, 380.0, 350.0], None).unwrap();
        let resumed = model.run_profile(&[], Some(profile.clone())).unwrap();
        assert_eq!(resumed, profile);
    }

    #[test]
    fn split_path_matches_single_run() {
        let params = apatite(129, 1e6);
        let model = ForwardModel::new(&params, &BandedSolver);
        let temps: Vec<f64> = (0..20).map(|i| 390.0 - 4.0 * i as f64).collect();

        let whole = model.run_profile(&temps, None).unwrap();
        let first = model.run_profile(&temps[..7], None).unwrap();
        let rest = model.run_profile(&temps[7..], Some(first)).unwrap();
        for (a, b) in whole.values().iter().zip(rest.values()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
    }

    #[test]
    fn warmer_path_retains_less_helium() {
        let params = apatite(129, 1e6);
        let model = ForwardModel::new(&params, &BandedSolver);
        let cold = model.run_with_age(&[273.0; 20], None).unwrap();
        let warm = model.run_with_age(&[353.0; 20], None).unwrap();
        assert!(warm.age.helium_molg < 0.2 * cold.age.helium_molg);
        assert!(warm.age.age_corrected < 2.0);
    }

    #[test]
    fn reheating_empties_a_cold_grain() {
        // 60 Myr at 10 C, then 1, 2 or 4 Myr at 300 C
        let params = apatite(129, 1e6);
        let model = ForwardModel::new(&params, &BandedSolver);
        let cold = model.run_with_age(&[283.0; 60], None).unwrap();
        assert!(cold.age.age_corrected > 50.0);

        for steps in [1usize, 2, 4] {
            let hot = vec![573.0; steps];
            let reheated = model.run_with_age(&hot, Some(cold.profile.clone())).unwrap();
            assert!(reheated.age.helium_molg > 0.0);
            assert!(reheated.age.helium_molg < 1e-6 * cold.age.helium_molg, "{steps} steps");
            assert!(reheated.age.age_corrected < 0.01, "{steps} steps");
        }
    }

    #[test]
    fn solver_choice_does_not_change_the_age() {
        let params = apatite(65, 2e6);
        let temps: Vec<f64> = (0..15).map(|i| 380.0 - 5.0 * i as f64).collect();
        let banded = ForwardModel::new(&params, &BandedSolver).run_with_age(&temps, None).unwrap();
        let dense = ForwardModel::new(&params, &DenseSolver).run_with_age(&temps, None).unwrap();
        assert_relative_eq!(banded.age.age_corrected, dense.age.age_corrected, max_relative = 1e-9);
    }

    #[test]
    fn cold_grain_gives_its_elapsed_time() {
        // At surface temperature nothing diffuses out of a 100 um apatite over
        // 20 Myr except near the rim, so the corrected age is close to 20 Ma.
        let params = apatite(257, 1e6);
        let result = ForwardModel::new(&params, &BandedSolver).run_with_age(&[273.0; 20], None).unwrap();
        assert_relative_eq!(result.age.age_corrected, 20.0, max_relative = 0.05);
        assert!(result.age.age_uncorrected < result.age.age_corrected);
    }

    #[test]
    fn no_steps_means_undefined_age() {
        let params = apatite(65, 1e6);
        let err = ForwardModel::new(&params, &BandedSolver).run_with_age(&[], None).unwrap_err();
        assert!(matches!(err, TchronError::NonPositiveHelium(_)));
    }

    #[test]
    fn rejects_bad_inputs() {
        let params = apatite(65, 1e6);
        let model = ForwardModel::new(&params, &BandedSolver);
        assert!(matches!(
            model.run_profile(&[300.0, -5.0], None),
            Err(TchronError::InvalidTemperature { step: 1, .. })
        ));
        assert!(matches!(
            model.run_profile(&[300.0], Some(DiffusionProfile::zeros(33))),
            Err(TchronError::ProfileLength { expected: 65, found: 33 })
        ));
    }

    #[test]
    fn free_function_returns_requested_output() {
        let temps = [350.0, 340.0];
        let profile = forward_model(10.0, 10.0, 60.0, &temps, 1e6, IsotopicSystem::ZHe, 65, None, false).unwrap();
        assert!(matches!(profile, ForwardOutput::Profile(ref p) if p.len() == 65));
        let aged = forward_model(10.0, 10.0, 60.0, &temps, 1e6, IsotopicSystem::ZHe, 65, None, true).unwrap();
        assert!(matches!(aged, ForwardOutput::Age(ref a) if a.age.age_corrected > 0.0));
    }
}
