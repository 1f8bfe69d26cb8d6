use std::collections::HashMap;

use tchron_common::ParticleId;

use crate::diffusion::DiffusionProfile;

/// Diffusion state a particle carries from one snapshot to the next.
#[derive(Debug, Clone, PartialEq)]
pub enum CarriedState {
    /// The particle's own history (including a cold start).
    Fresh(DiffusionProfile),
    /// History copied from the nearest carried neighbour.
    Inherited { profile: DiffusionProfile, from: ParticleId },
    /// No usable history: no neighbour matched or the last step failed.
    Undefined,
}

impl CarriedState {
    pub fn profile(&self) -> Option<&DiffusionProfile> {
        match self {
            CarriedState::Fresh(profile) | CarriedState::Inherited { profile, .. } => Some(profile),
            CarriedState::Undefined => None,
        }
    }

    pub fn into_profile(self) -> Option<DiffusionProfile> {
        match self {
            CarriedState::Fresh(profile) | CarriedState::Inherited { profile, .. } => Some(profile),
            CarriedState::Undefined => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, CarriedState::Undefined)
    }

    /// Donor of an inherited history, if any.
    pub fn inherited_from(&self) -> Option<ParticleId> {
        match self {
            CarriedState::Inherited { from, .. } => Some(*from),
            _ => None,
        }
    }
}

/// Carried state of every particle after the last processed snapshot.
///
/// Replaced wholesale each snapshot; the driver is its only owner.
#[derive(Debug, Default)]
pub struct EnsembleState {
    states: HashMap<ParticleId, CarriedState>,
    nodes: usize,
}

impl EnsembleState {
    pub fn new(nodes: usize) -> Self {
        EnsembleState { states: HashMap::new(), nodes }
    }

    pub(crate) fn from_map(states: HashMap<ParticleId, CarriedState>, nodes: usize) -> Self {
        EnsembleState { states, nodes }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, id: ParticleId) -> Option<&CarriedState> {
        self.states.get(&id)
    }

    /// True when `id` is present with a usable profile.
    pub fn has_defined(&self, id: ParticleId) -> bool {
        self.states.get(&id).is_some_and(CarriedState::is_defined)
    }

    /// Moves a particle's state out, leaving nothing behind.
    pub fn take(&mut self, id: ParticleId) -> Option<CarriedState> {
        self.states.remove(&id)
    }

    /// Profile values for export; undefined or missing particles read as NaN.
    pub fn profile_values(&self, id: ParticleId) -> DiffusionProfile {
        match self.states.get(&id).and_then(CarriedState::profile) {
            Some(profile) => profile.clone(),
            None => DiffusionProfile::undefined(self.nodes),
        }
    }

    pub fn undefined_count(&self) -> usize {
        self.states.values().filter(|s| !s.is_defined()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> EnsembleState {
        let mut map = HashMap::new();
        map.insert(1, CarriedState::Fresh(DiffusionProfile::from_values(vec![1.0, 2.0, 3.0])));
        map.insert(2, CarriedState::Inherited { profile: DiffusionProfile::zeros(3), from: 1 });
        map.insert(3, CarriedState::Undefined);
        EnsembleState::from_map(map, 3)
    }

    #[test]
    fn counts_by_kind() {
        let state = sample_state();
        assert_eq!(state.len(), 3);
        assert_eq!(state.undefined_count(), 1);
        assert_eq!(state.get(2).and_then(CarriedState::inherited_from), Some(1));
        assert!(state.has_defined(1));
        assert!(!state.has_defined(3));
        assert!(!state.has_defined(99));
    }

    #[test]
    fn export_view_fills_missing_with_nan() {
        let state = sample_state();
        assert_eq!(state.profile_values(1).values(), &[1.0, 2.0, 3.0]);
        assert!(state.profile_values(3).is_undefined());
        let missing = state.profile_values(42);
        assert_eq!(missing.len(), 3);
        assert!(missing.is_undefined());
    }

    #[test]
    fn take_moves_state_out() {
        let mut state = sample_state();
        let taken = state.take(2).unwrap();
        assert_eq!(taken.inherited_from(), Some(1));
        assert!(state.get(2).is_none());
        assert!(state.take(2).is_none());
    }
}
