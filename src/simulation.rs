use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tchron_common::{
    ParticleAgeRecord, ParticleId, ParticleSample, ParticleSnapshot, SnapshotReport, TchronConfig, Vec3,
};

use crate::age::{profile_to_age, AgeResult, RadialProfile};
use crate::diffusion::DiffusionProfile;
use crate::ensemble_state::{CarriedState, EnsembleState};
use crate::error::{TchronError, TchronResult};
use crate::forward::ForwardModel;
use crate::grid::NeighborGrid;
use crate::linalg::{BandedSolver, LinearSystem};
use crate::sim_params::SimParams;

/// Minimum particles per rayon task when the config leaves it open.
const DEFAULT_BATCH_SIZE: usize = 64;

/// Why a particle has no age at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UndefinedAge {
    /// Neither its own history nor a neighbour's was available.
    NoCarriedState,
    /// The diffusion step failed on the final snapshot.
    SolverFailure,
    NonPositiveHelium,
    NoConvergence,
}

impl UndefinedAge {
    pub fn as_str(&self) -> &'static str {
        match self {
            UndefinedAge::NoCarriedState => "no_carried_state",
            UndefinedAge::SolverFailure => "solver_failure",
            UndefinedAge::NonPositiveHelium => "non_positive_helium",
            UndefinedAge::NoConvergence => "no_convergence",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AgeOutcome {
    Dated(AgeResult),
    Undefined(UndefinedAge),
}

impl AgeOutcome {
    pub fn age(&self) -> Option<&AgeResult> {
        match self {
            AgeOutcome::Dated(age) => Some(age),
            AgeOutcome::Undefined(_) => None,
        }
    }

    pub fn is_dated(&self) -> bool {
        matches!(self, AgeOutcome::Dated(_))
    }
}

/// Terminal result for one particle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleAge {
    /// Position in the terminal snapshot.
    pub position: Vec3,
    pub outcome: AgeOutcome,
    /// Donor whose profile this particle took over at some point.
    pub inherited_from: Option<ParticleId>,
}

impl ParticleAge {
    pub fn to_record(&self, id: ParticleId) -> ParticleAgeRecord {
        let (uncorrected, corrected, status) = match &self.outcome {
            AgeOutcome::Dated(age) => (Some(age.age_uncorrected), Some(age.age_corrected), "dated"),
            AgeOutcome::Undefined(reason) => (None, None, reason.as_str()),
        };
        ParticleAgeRecord {
            id,
            x: self.position.x,
            y: self.position.y,
            z: self.position.z,
            age_uncorrected_ma: uncorrected,
            age_corrected_ma: corrected,
            status: status.to_string(),
            inherited_from: self.inherited_from,
        }
    }
}

/// Everything produced at the terminal snapshot.
#[derive(Debug, Clone, Default)]
pub struct EnsembleAges {
    pub ages: BTreeMap<ParticleId, ParticleAge>,
    /// Normalised radial profiles of the particles listed in `profile_particles`.
    pub profiles: BTreeMap<ParticleId, RadialProfile>,
}

impl EnsembleAges {
    pub fn dated_count(&self) -> usize {
        self.ages.values().filter(|a| a.outcome.is_dated()).count()
    }

    pub fn records(&self) -> Vec<ParticleAgeRecord> {
        self.ages.iter().map(|(id, age)| age.to_record(*id)).collect()
    }
}

// Where a particle's profile comes from at the start of a snapshot
enum Start {
    ColdStart,
    Carried(CarriedState),
    Inherited(DiffusionProfile, ParticleId),
    Unmatched,
}

// Result of stepping one particle
struct StepOutcome {
    id: ParticleId,
    state: CarriedState,
    failed: bool,
}

/// Advances an ensemble of particles snapshot by snapshot and dates them at
/// the end.
pub struct EnsembleDriver<S: LinearSystem = BandedSolver> {
    config: TchronConfig,
    params: SimParams,
    solver: S,
    state: EnsembleState,
    snapshot_index: usize,
    recorded_reports: Vec<SnapshotReport>,
    // Particles whose step failed in the most recent snapshot
    failed_last: HashSet<ParticleId>,
}

impl EnsembleDriver<BandedSolver> {
    pub fn new(config: &TchronConfig) -> TchronResult<Self> {
        Self::with_solver(config, BandedSolver)
    }

    /// Runs every snapshot and dates the particles of the last one.
    pub fn run(config: &TchronConfig, snapshots: &[ParticleSnapshot]) -> TchronResult<EnsembleAges> {
        let (last, rest) = snapshots.split_last().ok_or(TchronError::EmptyRun)?;
        let mut driver = Self::new(config)?;
        for snapshot in rest {
            driver.advance(snapshot)?;
        }
        driver.finish(last)
    }
}

impl<S: LinearSystem> EnsembleDriver<S> {
    pub fn with_solver(config: &TchronConfig, solver: S) -> TchronResult<Self> {
        let params = SimParams::from_config(config)?;
        if let Some(d) = config.ensemble.max_neighbor_distance {
            if d.is_nan() || d < 0.0 {
                return Err(TchronError::Config(format!("max_neighbor_distance must not be negative, got {d}")));
            }
        }
        if config.ensemble.batch_size == Some(0) {
            return Err(TchronError::Config("batch_size must be greater than 0".to_string()));
        }
        info!(
            "Ensemble driver: {} grain, R = {} um, {} nodes, dt = {:.3e} yr",
            params.system, params.radius, params.nodes, params.time_interval
        );
        let nodes = params.nodes;
        Ok(EnsembleDriver {
            config: config.clone(),
            params,
            solver,
            state: EnsembleState::new(nodes),
            snapshot_index: 0,
            recorded_reports: Vec::new(),
            failed_last: HashSet::new(),
        })
    }

    pub fn state(&self) -> &EnsembleState {
        &self.state
    }

    /// Number of snapshots processed so far.
    pub fn snapshots_processed(&self) -> usize {
        self.snapshot_index
    }

    pub fn recorded_reports(&self) -> &[SnapshotReport] {
        &self.recorded_reports
    }

    fn batch_size(&self) -> usize {
        self.config.ensemble.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    /// Steps every particle of `snapshot` once at its own temperature.
    pub fn advance(&mut self, snapshot: &ParticleSnapshot) -> TchronResult<SnapshotReport> {
        let start_time = Instant::now();
        let index = self.snapshot_index;
        check_unique_ids(snapshot, index)?;

        let mut old = std::mem::take(&mut self.state);
        let mut report = SnapshotReport {
            index,
            time: snapshot.time,
            particle_count: snapshot.len(),
            ..Default::default()
        };

        // Own histories move out of the old map; donor profiles are cloned from it
        let starts: Vec<Start> = if index == 0 {
            report.cold_started = snapshot.len();
            snapshot.particles.iter().map(|_| Start::ColdStart).collect()
        } else {
            self.resolve_starts(snapshot, &mut old, &mut report)
        };
        report.dropped = old.len();
        drop(old);

        // Phase 2: one diffusion step per particle (Parallel).
        let params = &self.params;
        let model = ForwardModel::new(params, &self.solver);
        let work: Vec<(ParticleSample, Start)> = snapshot.particles.iter().copied().zip(starts).collect();
        let outcomes: Vec<StepOutcome> = work
            .into_par_iter()
            .with_min_len(self.batch_size())
            .map(|(sample, start)| step_particle(&model, sample, start))
            .collect();

        let mut states = HashMap::with_capacity(outcomes.len());
        let mut failed = HashSet::new();
        for outcome in outcomes {
            if outcome.failed {
                failed.insert(outcome.id);
            }
            states.insert(outcome.id, outcome.state);
        }
        self.state = EnsembleState::from_map(states, self.params.nodes);
        self.failed_last = failed;
        report.undefined = self.state.undefined_count();
        report.elapsed_ms = start_time.elapsed().as_secs_f64() * 1e3;

        info!(
            "Snapshot {} (t = {:.3e} yr): {} particles, {} carried, {} inherited, {} cold, {} undefined, {} dropped ({:.1} ms)",
            index,
            snapshot.time,
            report.particle_count,
            report.carried,
            report.inherited,
            report.cold_started,
            report.undefined,
            report.dropped,
            report.elapsed_ms
        );
        self.snapshot_index += 1;
        self.recorded_reports.push(report.clone());
        Ok(report)
    }

    // Moves own histories out of `old` and finds donors for the rest.
    fn resolve_starts(
        &self,
        snapshot: &ParticleSnapshot,
        old: &mut EnsembleState,
        report: &mut SnapshotReport,
    ) -> Vec<Start> {
        // Donors: present particles with a usable history
        let donors: Vec<(ParticleId, Vec3)> = snapshot
            .particles
            .iter()
            .filter(|p| old.has_defined(p.id) && p.position.is_finite())
            .map(|p| (p.id, p.position))
            .collect();
        let needs_donor: Vec<&ParticleSample> =
            snapshot.particles.iter().filter(|p| !old.has_defined(p.id)).collect();

        let mut inherited: HashMap<ParticleId, (DiffusionProfile, ParticleId)> = HashMap::new();
        if !needs_donor.is_empty() {
            let grid = NeighborGrid::build(donors, self.config.ensemble.neighbor_cell_size);
            debug!(
                "Neighbour grid: {} donors, cell {:.3}, dims {:?}",
                grid.len(),
                grid.cell_size(),
                grid.dims()
            );
            let max_distance = self.config.ensemble.max_neighbor_distance;
            let old_ref: &EnsembleState = old;
            inherited = needs_donor
                .par_iter()
                .filter_map(|p| {
                    let (donor, distance) = grid.nearest(p.position, max_distance)?;
                    let profile = old_ref.get(donor)?.profile()?.clone();
                    debug!("Particle {} inherits from {} at distance {:.3}", p.id, donor, distance);
                    Some((p.id, (profile, donor)))
                })
                .collect();
        }

        snapshot
            .particles
            .iter()
            .map(|p| {
                let own = old.take(p.id).filter(CarriedState::is_defined);
                match own {
                    Some(state) => {
                        report.carried += 1;
                        Start::Carried(state)
                    }
                    None => match inherited.remove(&p.id) {
                        Some((profile, from)) => {
                            report.inherited += 1;
                            Start::Inherited(profile, from)
                        }
                        None => {
                            warn!(
                                "Particle {} at snapshot {} has no carried state and no neighbour in range; marking undefined",
                                p.id, report.index
                            );
                            Start::Unmatched
                        }
                    },
                }
            })
            .collect()
    }

    /// Processes the terminal snapshot and converts every profile to an age.
    pub fn finish(&mut self, snapshot: &ParticleSnapshot) -> TchronResult<EnsembleAges> {
        self.advance(snapshot)?;

        let wanted: HashSet<ParticleId> = self.config.output.profile_particles.iter().copied().collect();
        let params = &self.params;
        let state = &self.state;
        let failed = &self.failed_last;

        let dated: Vec<(ParticleId, ParticleAge, Option<RadialProfile>)> = snapshot
            .particles
            .par_iter()
            .with_min_len(self.batch_size())
            .map(|p| {
                let carried = state.get(p.id);
                let inherited_from = carried.and_then(CarriedState::inherited_from);
                let (outcome, radial) = match carried.and_then(CarriedState::profile) {
                    Some(profile) => match profile_to_age(profile, params) {
                        Ok((age, radial)) => (AgeOutcome::Dated(age), Some(radial)),
                        Err(e) => {
                            warn!("Particle {}: age undefined ({})", p.id, e);
                            (AgeOutcome::Undefined(undefined_reason(&e)), None)
                        }
                    },
                    None if failed.contains(&p.id) => (AgeOutcome::Undefined(UndefinedAge::SolverFailure), None),
                    None => (AgeOutcome::Undefined(UndefinedAge::NoCarriedState), None),
                };
                let radial = radial.filter(|_| wanted.contains(&p.id));
                (p.id, ParticleAge { position: p.position, outcome, inherited_from }, radial)
            })
            .collect();

        let mut result = EnsembleAges::default();
        for (id, age, radial) in dated {
            if let Some(radial) = radial {
                result.profiles.insert(id, radial);
            }
            result.ages.insert(id, age);
        }
        for id in wanted.iter().filter(|id| !result.profiles.contains_key(id)) {
            warn!("No radial profile for particle {} (absent or undated)", id);
        }
        info!(
            "Dated {} of {} particles after {} snapshots",
            result.dated_count(),
            result.ages.len(),
            self.snapshot_index
        );
        Ok(result)
    }
}

fn step_particle<S: LinearSystem + ?Sized>(model: &ForwardModel<'_, S>, sample: ParticleSample, start: Start) -> StepOutcome {
    let id = sample.id;
    let (profile, from) = match start {
        Start::ColdStart => (None, None),
        Start::Carried(state) => {
            let from = state.inherited_from();
            match state.into_profile() {
                Some(profile) => (Some(profile), from),
                None => return StepOutcome { id, state: CarriedState::Undefined, failed: false },
            }
        }
        Start::Inherited(profile, from) => (Some(profile), Some(from)),
        Start::Unmatched => return StepOutcome { id, state: CarriedState::Undefined, failed: false },
    };

    match model.run_profile(&[sample.temperature], profile) {
        Ok(next) => {
            let state = match from {
                Some(from) => CarriedState::Inherited { profile: next, from },
                None => CarriedState::Fresh(next),
            };
            StepOutcome { id, state, failed: false }
        }
        Err(e) => {
            warn!("Particle {}: diffusion step failed ({}); marking undefined", id, e);
            StepOutcome { id, state: CarriedState::Undefined, failed: true }
        }
    }
}

fn undefined_reason(error: &TchronError) -> UndefinedAge {
    match error {
        TchronError::NonPositiveHelium(_) => UndefinedAge::NonPositiveHelium,
        TchronError::AgeNoConvergence(_) => UndefinedAge::NoConvergence,
        _ => UndefinedAge::SolverFailure,
    }
}

fn check_unique_ids(snapshot: &ParticleSnapshot, index: usize) -> TchronResult<()> {
    let mut seen = HashSet::with_capacity(snapshot.len());
    for p in &snapshot.particles {
        if !seen.insert(p.id) {
            return Err(TchronError::DuplicateParticle { id: p.id, snapshot: index });
        }
    }
    Ok(())
}
