use std::path::Path;

use ahash::{AHashMap, AHashSet};
use gridsweep_places::LatLng;
use tracing::info;

use super::{EntityStore, PointState, ProgressLedger, Result};
use crate::{
    geometry::haversine_distance_m,
    grid::{PointKey, PointKind, SearchPoint},
};

/// In-memory view of a run, rebuilt from disk at startup and owned by the
/// orchestrator for the rest of the run.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    states: AHashMap<PointKey, PointState>,
    searched_fine_areas: Vec<LatLng>,
    searched_fine_keys: AHashSet<PointKey>,
    known_entity_ids: AHashSet<String>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay the progress ledger and the identifier file.
    ///
    /// Fine points already marked complete seed the searched-area index, so proximity
    /// suppression carries over between runs.
    pub fn load(ledger_path: impl AsRef<Path>, ids_path: impl AsRef<Path>) -> Result<Self> {
        let replay = ProgressLedger::replay(ledger_path)?;
        let mut state = Self {
            known_entity_ids: EntityStore::load_ids(ids_path)?,
            ..Self::default()
        };
        for (key, point_state) in replay.states {
            state.set_state(key, point_state);
        }
        info!(
            ledger_lines = replay.lines,
            skipped_lines = replay.skipped,
            completed = state.completed_count(),
            refining = state.refining_count(),
            known_entities = state.known_entity_ids.len(),
            "Loaded run state"
        );
        Ok(state)
    }

    pub fn state_of(&self, point: &SearchPoint) -> PointState {
        self.states.get(&point.key()).copied().unwrap_or_default()
    }

    pub fn is_complete(&self, point: &SearchPoint) -> bool {
        self.state_of(point) == PointState::Complete
    }

    pub fn is_refining(&self, point: &SearchPoint) -> bool {
        self.state_of(point) == PointState::Refining
    }

    pub fn mark(&mut self, point: &SearchPoint, state: PointState) {
        self.set_state(point.key(), state);
    }

    fn set_state(&mut self, key: PointKey, state: PointState) {
        if key.kind() == PointKind::Fine && state == PointState::Complete {
            self.record_fine_area_key(key);
        }
        self.states.insert(key, state);
    }

    pub fn record_fine_area(&mut self, point: &SearchPoint) {
        self.record_fine_area_key(point.key());
    }

    fn record_fine_area_key(&mut self, key: PointKey) {
        if self.searched_fine_keys.insert(key) {
            self.searched_fine_areas.push(key.location());
        }
    }

    /// Whether any searched fine area lies strictly closer than `threshold_m`.
    pub fn near_searched_fine_area(&self, location: LatLng, threshold_m: f64) -> bool {
        self.searched_fine_areas
            .iter()
            .any(|area| haversine_distance_m(*area, location) < threshold_m)
    }

    pub fn searched_fine_areas(&self) -> &[LatLng] {
        &self.searched_fine_areas
    }

    pub fn known_entity_ids(&self) -> &AHashSet<String> {
        &self.known_entity_ids
    }

    pub fn known_entity_ids_mut(&mut self) -> &mut AHashSet<String> {
        &mut self.known_entity_ids
    }

    pub fn completed_count(&self) -> usize {
        self.count(PointState::Complete)
    }

    pub fn refining_count(&self) -> usize {
        self.count(PointState::Refining)
    }

    fn count(&self, state: PointState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_load_rebuilds_states_and_fine_areas() {
        let dir = TempDir::new().unwrap();
        let ledger_path = dir.path().join("progress.txt");
        let ids_path = dir.path().join("ids.txt");

        let coarse = SearchPoint::coarse(52.51, 13.35);
        let fine = SearchPoint::fine(52.511, 13.351);
        let pending_fine = SearchPoint::fine(52.512, 13.352);
        {
            let mut ledger = ProgressLedger::open(&ledger_path).unwrap();
            ledger.record(&coarse, PointState::Refining).unwrap();
            ledger.record(&fine, PointState::Complete).unwrap();
            ledger.record(&pending_fine, PointState::Pending).unwrap();
        }
        std::fs::write(&ids_path, "a\nb\n").unwrap();

        let state = RunState::load(&ledger_path, &ids_path).unwrap();
        assert!(state.is_refining(&coarse));
        assert!(state.is_complete(&fine));
        assert_eq!(state.state_of(&pending_fine), PointState::Pending);
        assert_eq!(state.state_of(&SearchPoint::coarse(0.0, 0.0)), PointState::Pending);
        assert_eq!(state.searched_fine_areas(), &[fine.location()]);
        assert_eq!(state.known_entity_ids().len(), 2);
        assert_eq!(state.completed_count(), 1);
        assert_eq!(state.refining_count(), 1);
    }

    #[test]
    fn test_same_coordinates_different_kind_are_distinct() {
        let mut state = RunState::new();
        state.mark(&SearchPoint::coarse(1.0, 1.0), PointState::Complete);
        assert!(!state.is_complete(&SearchPoint::fine(1.0, 1.0)));
        // Only fine points count as searched areas.
        assert!(state.searched_fine_areas().is_empty());
    }

    #[test]
    fn test_proximity_is_strict() {
        let mut state = RunState::new();
        let fine = SearchPoint::fine(52.5, 13.4);
        state.record_fine_area(&fine);
        state.record_fine_area(&fine);
        assert_eq!(state.searched_fine_areas().len(), 1);

        let nearby = LatLng::new(52.5005, 13.4);
        let d = haversine_distance_m(fine.location(), nearby);
        assert!(state.near_searched_fine_area(nearby, d + 0.01));
        assert!(!state.near_searched_fine_area(nearby, d));
    }
}
