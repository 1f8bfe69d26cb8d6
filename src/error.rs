use thiserror::Error;

use tchron_common::ParticleId;

#[derive(Error, Debug)]
pub enum TchronError {
    #[error("Isotopic system not found: '{0}'")]
    UnknownSystem(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Profile has {found} nodes, expected {expected}")]
    ProfileLength { expected: usize, found: usize },

    #[error("Invalid temperature {temperature} K at step {step}")]
    InvalidTemperature { step: usize, temperature: f64 },

    #[error("Singular linear system: zero pivot at row {row}")]
    SingularSystem { row: usize },

    #[error("Non-finite value at node {node} after diffusion step")]
    NonFinite { node: usize },

    #[error("Helium content {0:e} mol/g is not positive; age undefined")]
    NonPositiveHelium(f64),

    #[error("Age equation did not converge: {0}")]
    AgeNoConvergence(String),

    #[error("Particle {id} appears more than once in snapshot {snapshot}")]
    DuplicateParticle { id: ParticleId, snapshot: usize },

    #[error("No snapshots supplied")]
    EmptyRun,
}

pub type TchronResult<T> = Result<T, TchronError>;
