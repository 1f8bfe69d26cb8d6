use serde::{Serialize, Deserialize};
use crate::vecmath::Vec3;

/// Stable identifier of a tracked particle across snapshots.
pub type ParticleId = u64;

/// One particle's state as recorded by the external simulation at a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticleSample {
    pub id: ParticleId,
    pub position: Vec3,
    /// Temperature in Kelvin.
    pub temperature: f64,
}

/// Particle positions and temperatures at one recorded time index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticleSnapshot {
    /// The simulation time (in years) at which the snapshot was taken.
    pub time: f64,
    pub particles: Vec<ParticleSample>,
}

impl ParticleSnapshot {
    pub fn new(time: f64, particles: Vec<ParticleSample>) -> Self {
        ParticleSnapshot { time, particles }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}

/// Bookkeeping recorded by the ensemble driver after each snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotReport {
    /// Zero-based snapshot index.
    pub index: usize,
    /// Snapshot time (years) as supplied by the reader.
    pub time: f64,
    /// Number of particles present in the snapshot.
    pub particle_count: usize,
    /// Particles that continued their own carried profile.
    pub carried: usize,
    /// Particles that started from an all-zero profile.
    pub cold_started: usize,
    /// Particles that took a neighbour's profile.
    pub inherited: usize,
    /// Particles left without a defined profile after this snapshot.
    pub undefined: usize,
    /// Entries of the previous map whose particle vanished from this snapshot.
    pub dropped: usize,
    /// Wall time spent on the snapshot (milliseconds).
    pub elapsed_ms: f64,
}

/// Flat per-particle age row written for downstream renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleAgeRecord {
    pub id: ParticleId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Uncorrected age (Ma); absent when undefined.
    pub age_uncorrected_ma: Option<f64>,
    /// Alpha-corrected age (Ma); absent when undefined.
    pub age_corrected_ma: Option<f64>,
    /// "dated" or the reason the age is undefined.
    pub status: String,
    /// Particle whose profile was substituted, if any.
    pub inherited_from: Option<ParticleId>,
}
