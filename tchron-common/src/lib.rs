pub mod config;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{TchronConfig, GrainConfig, TimingConfig, EnsembleConfig, OutputConfig, is_romberg_count};
pub use snapshot::{ParticleId, ParticleSample, ParticleSnapshot, SnapshotReport, ParticleAgeRecord};
pub use vecmath::{Vec3, clamp};
