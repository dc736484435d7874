// Authoritative simulation store
//
// Two keyed collections (aircraft, controllers) plus the pending update
// table. Mutations from plugins and from the network accumulate as deltas
// keyed by aircraft id; a commit drains the table under the batching gate so
// readers never observe half a delta.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::model::aircraft::Aircraft;
use crate::model::controller::Controller;
use crate::model::delta::AircraftDelta;

struct StoreInner {
    aircraft: HashMap<Uuid, Aircraft>,
    controllers: HashMap<Uuid, Controller>,
    /// Coalesced by aircraft id with the delta-merge operator
    pending: HashMap<Uuid, AircraftDelta>,
}

/// The sole shared structure inside a server process. One lock is the
/// batching gate: a commit drain cannot interleave with an incoming delta.
pub struct SimulationStore {
    inner: RwLock<StoreInner>,
}

impl SimulationStore {
    pub fn new() -> Self {
        SimulationStore {
            inner: RwLock::new(StoreInner {
                aircraft: HashMap::new(),
                controllers: HashMap::new(),
                pending: HashMap::new(),
            }),
        }
    }

    // --- aircraft mutations (take effect at the next commit) ---

    /// Queue a delta; it lands in the live store at the next commit.
    pub async fn queue_update(&self, delta: AircraftDelta) {
        let mut inner = self.inner.write().await;
        let id = delta.aircraft;
        match inner.pending.remove(&id) {
            Some(existing) => {
                inner.pending.insert(id, existing.merge(&delta));
            }
            None => {
                inner.pending.insert(id, delta);
            }
        }
    }

    /// Queue removal of one aircraft.
    pub async fn queue_delete(&self, id: Uuid) {
        self.queue_update(AircraftDelta::delete(id)).await;
    }

    /// Introduce a new aircraft; returns its id. The aircraft is visible to
    /// `current*` readers immediately and to snapshot readers after commit.
    pub async fn queue_create(&self, aircraft: Aircraft) -> Uuid {
        let id = aircraft.id;
        self.queue_update(AircraftDelta::full(&aircraft)).await;
        id
    }

    /// True when the aircraft exists in the live store or the pending table.
    pub async fn knows_aircraft(&self, id: Uuid) -> bool {
        let inner = self.inner.read().await;
        inner.aircraft.contains_key(&id)
            || inner.pending.get(&id).map_or(false, |d| !d.update.is_delete())
    }

    // --- reads ---

    /// Live snapshot (committed state only).
    pub async fn aircraft_snapshot(&self) -> HashMap<Uuid, Aircraft> {
        self.inner.read().await.aircraft.clone()
    }

    pub async fn controllers_snapshot(&self) -> HashMap<Uuid, Controller> {
        self.inner.read().await.controllers.clone()
    }

    /// Live ⊕ pending view of one aircraft, as the planner and plugins see
    /// the world between commits.
    pub async fn current(&self, id: Uuid) -> Option<Aircraft> {
        let inner = self.inner.read().await;
        current_of(&inner, id)
    }

    /// Live ⊕ pending view of the whole fleet.
    pub async fn current_aircraft(&self) -> Vec<Aircraft> {
        let inner = self.inner.read().await;
        let mut ids: Vec<Uuid> = inner.aircraft.keys().copied().collect();
        for id in inner.pending.keys() {
            if !inner.aircraft.contains_key(id) {
                ids.push(*id);
            }
        }
        ids.into_iter().filter_map(|id| current_of(&inner, id)).collect()
    }

    pub async fn aircraft_by_callsign(&self, callsign: &str) -> HashMap<Uuid, Aircraft> {
        self.current_aircraft()
            .await
            .into_iter()
            .filter(|ac| ac.metadata.callsign == callsign)
            .map(|ac| (ac.id, ac))
            .collect()
    }

    // --- controllers (not batched; announced and swept by the engine) ---

    pub async fn upsert_controller(&self, controller: Controller) {
        self.inner.write().await.controllers.insert(controller.id, controller);
    }

    pub async fn get_controller(&self, id: Uuid) -> Option<Controller> {
        self.inner.read().await.controllers.get(&id).cloned()
    }

    pub async fn remove_controller(&self, id: Uuid) -> bool {
        self.inner.write().await.controllers.remove(&id).is_some()
    }

    // --- the commit batch ---

    /// Drain the pending table and apply it to the live store. Returns the
    /// emission sequence: exactly one coalesced delta per mutated aircraft,
    /// deletes included.
    pub async fn commit_batch(&self) -> Vec<AircraftDelta> {
        let mut inner = self.inner.write().await;
        let pending: Vec<(Uuid, AircraftDelta)> = inner.pending.drain().collect();

        let mut emitted = Vec::with_capacity(pending.len());
        for (id, delta) in pending {
            if delta.update.is_delete() {
                if inner.aircraft.remove(&id).is_some() {
                    emitted.push(delta);
                }
                // deleting an aircraft that never existed emits nothing
                continue;
            }
            match inner.aircraft.get(&id) {
                Some(live) => match delta.apply(live) {
                    Ok(next) => {
                        inner.aircraft.insert(id, next);
                        emitted.push(delta);
                    }
                    Err(e) => warn!("dropping unappliable delta for {}: {}", id, e),
                },
                None => match materialize(id, &delta) {
                    Some(created) => {
                        inner.aircraft.insert(id, created);
                        emitted.push(delta);
                    }
                    None => warn!("dropping partial create delta for {}", id),
                },
            }
        }
        emitted
    }

    /// Pending deltas waiting for the next commit (diagnostics).
    pub async fn pending_len(&self) -> usize {
        self.inner.read().await.pending.len()
    }
}

impl Default for SimulationStore {
    fn default() -> Self {
        Self::new()
    }
}

fn current_of(inner: &StoreInner, id: Uuid) -> Option<Aircraft> {
    let live = inner.aircraft.get(&id);
    let pending = inner.pending.get(&id);
    match (live, pending) {
        (_, Some(delta)) if delta.update.is_delete() => None,
        (Some(live), Some(delta)) => delta.apply(live).ok(),
        (Some(live), None) => Some(live.clone()),
        (None, Some(delta)) => materialize(id, delta),
        (None, None) => None,
    }
}

/// Build a live aircraft from a creation delta; requires every field group.
fn materialize(id: Uuid, delta: &AircraftDelta) -> Option<Aircraft> {
    Some(Aircraft {
        id,
        metadata: delta.metadata.clone()?,
        state: delta.state?,
        motion: delta.motion?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::Coordinate;
    use crate::model::aircraft::{AircraftMeta, AircraftMotion, AircraftState};
    use crate::model::delta::UpdateFields;
    use chrono::Utc;

    fn sample_aircraft(callsign: &str) -> Aircraft {
        Aircraft::new(
            AircraftMeta { callsign: callsign.to_string(), ..AircraftMeta::default() },
            AircraftState {
                time: Utc::now(),
                heading: 90.0,
                altitude: 7000.0,
                position: Coordinate::new(33.94, -118.4),
                ..AircraftState::default()
            },
            AircraftMotion { speed: 180, climb_rate: 0, turn_rate: 0.0, clockwise: true },
        )
    }

    #[tokio::test]
    async fn test_create_lands_after_commit() {
        let store = SimulationStore::new();
        let id = store.queue_create(sample_aircraft("N123AB")).await;

        // visible through the current view before commit
        assert!(store.current(id).await.is_some());
        assert!(store.aircraft_snapshot().await.is_empty());

        let emitted = store.commit_batch().await;
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].aircraft, id);
        assert!(store.aircraft_snapshot().await.contains_key(&id));
    }

    #[tokio::test]
    async fn test_batch_coalesces_per_aircraft() {
        let store = SimulationStore::new();
        let ac = sample_aircraft("SWA401");
        let id = store.queue_create(ac.clone()).await;
        store.commit_batch().await;

        // two motion updates in one batch coalesce to a single emission
        let mut d1 = AircraftDelta::empty(id);
        d1.update.insert(UpdateFields::MOVEMENT);
        d1.motion = Some(AircraftMotion { speed: 200, ..ac.motion });
        store.queue_update(d1).await;

        let mut d2 = AircraftDelta::empty(id);
        d2.update.insert(UpdateFields::MOVEMENT);
        d2.motion = Some(AircraftMotion { speed: 220, ..ac.motion });
        store.queue_update(d2).await;

        let emitted = store.commit_batch().await;
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].motion.unwrap().speed, 220);
        assert_eq!(store.current(id).await.unwrap().motion.speed, 220);
    }

    #[tokio::test]
    async fn test_delete_removes_and_emits() {
        let store = SimulationStore::new();
        let id = store.queue_create(sample_aircraft("UAL89")).await;
        store.commit_batch().await;

        store.queue_delete(id).await;
        assert!(store.current(id).await.is_none());

        let emitted = store.commit_batch().await;
        assert_eq!(emitted.len(), 1);
        assert!(emitted[0].update.is_delete());
        assert!(store.aircraft_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_then_delete_in_one_batch_emits_nothing() {
        let store = SimulationStore::new();
        let id = store.queue_create(sample_aircraft("GHOST1")).await;
        store.queue_delete(id).await;

        let emitted = store.commit_batch().await;
        assert!(emitted.is_empty());
        assert!(store.aircraft_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_emissions_merge_to_store_diff() {
        // merged emission sequence == diff(prev_store, next_store), per aircraft
        let store = SimulationStore::new();
        let ac = sample_aircraft("AAL2");
        let id = store.queue_create(ac.clone()).await;
        store.commit_batch().await;
        let prev = store.aircraft_snapshot().await;

        let mut d1 = AircraftDelta::empty(id);
        d1.update.insert(UpdateFields::STATE);
        d1.state = Some(AircraftState { altitude: 8000.0, ..ac.state });
        store.queue_update(d1).await;

        let mut d2 = AircraftDelta::empty(id);
        d2.update.insert(UpdateFields::MOVEMENT);
        d2.motion = Some(AircraftMotion { speed: 250, ..ac.motion });
        store.queue_update(d2).await;

        let emitted = store.commit_batch().await;
        let next = store.aircraft_snapshot().await;

        let merged = emitted
            .into_iter()
            .fold(AircraftDelta::empty(id), |acc, d| acc.merge(&d));
        let expected = AircraftDelta::diff(&prev[&id], &next[&id]);
        assert_eq!(merged, expected);
    }

    #[tokio::test]
    async fn test_callsign_lookup_sees_pending() {
        let store = SimulationStore::new();
        let id = store.queue_create(sample_aircraft("DAL555")).await;
        let found = store.aircraft_by_callsign("DAL555").await;
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&id));
        assert!(store.aircraft_by_callsign("NOPE").await.is_empty());
    }
}
