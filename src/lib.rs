//! Thermochronometric age engine: He diffusion in a spherical grain, age
//! inversion, and a parallel driver that carries every particle of a
//! geodynamic model through its recorded snapshots.

pub mod age;
pub mod alpha;
pub mod diffusion;
pub mod ensemble_state;
pub mod error;
pub mod forward;
pub mod grid;
pub mod linalg;
pub mod sim_params;
pub mod simulation;
pub mod system;

pub use age::{profile_to_age, AgeResult, RadialProfile};
pub use diffusion::DiffusionProfile;
pub use ensemble_state::{CarriedState, EnsembleState};
pub use error::{TchronError, TchronResult};
pub use forward::{forward_model, ForwardAge, ForwardModel, ForwardOutput};
pub use linalg::{BandedSolver, DenseSolver, LinearSystem, Tridiagonal};
pub use sim_params::SimParams;
pub use simulation::{AgeOutcome, EnsembleAges, EnsembleDriver, ParticleAge, UndefinedAge};
pub use system::{IsotopicSystem, SystemParameters};
