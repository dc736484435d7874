// Plugin contract and the server handle plugins drive the simulation with

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;
use uuid::Uuid;

use crate::model::aircraft::Aircraft;
use crate::model::controller::Controller;
use crate::model::delta::AircraftDelta;
use crate::model::instruction::Instruction;
use crate::net::messages::{ChannelMessage, Frequency, NetworkMessage, TextMessage};
use crate::sim::planner::Planner;
use crate::sim::store::SimulationStore;

/// A loadable capability bag, driven by the pump.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn maintainer(&self) -> &str;

    /// Called for every relayed chat frame.
    async fn process_text_message(&self, sender: Uuid, recipient: Uuid, message: &str);

    /// Called as often as the pump runs.
    async fn tick(&self, dt: Duration);
}

/// The server API handed to plugins: reads and mutations against the
/// authoritative store, chat sends, and planner routes.
#[derive(Clone)]
pub struct SimulationHandle {
    store: Arc<SimulationStore>,
    planner: Arc<Mutex<Planner>>,
    outbound: mpsc::Sender<NetworkMessage>,
    /// The hub-assigned server id, known once the handshake completes
    server_id: Arc<OnceLock<Uuid>>,
}

impl SimulationHandle {
    pub fn new(
        store: Arc<SimulationStore>,
        planner: Arc<Mutex<Planner>>,
        outbound: mpsc::Sender<NetworkMessage>,
    ) -> Self {
        SimulationHandle {
            store,
            planner,
            outbound,
            server_id: Arc::new(OnceLock::new()),
        }
    }

    pub fn store(&self) -> &Arc<SimulationStore> {
        &self.store
    }

    pub fn set_server_id(&self, id: Uuid) {
        let _ = self.server_id.set(id);
    }

    pub fn server_id(&self) -> Option<Uuid> {
        self.server_id.get().copied()
    }

    // --- aircraft ---

    /// Introduce an aircraft; lands at the next commit. Returns the new id.
    pub async fn add_aircraft(&self, aircraft: Aircraft) -> Uuid {
        self.store.queue_create(aircraft).await
    }

    /// Queue new data for one aircraft. False when the id is unknown.
    pub async fn update_aircraft(&self, id: Uuid, new_data: Aircraft) -> bool {
        let Some(current) = self.store.current(id).await else {
            return false;
        };
        let mut replacement = new_data;
        replacement.id = id;
        let delta = AircraftDelta::diff(&current, &replacement);
        if !delta.update.is_empty() {
            self.store.queue_update(delta).await;
        }
        true
    }

    /// Queue removal of one aircraft. False when the id is unknown.
    pub async fn remove_aircraft(&self, id: Uuid) -> bool {
        if !self.store.knows_aircraft(id).await {
            return false;
        }
        self.store.queue_delete(id).await;
        self.planner.lock().await.clear(id);
        true
    }

    /// Remove every aircraft flying a callsign; returns the removed ids.
    pub async fn remove_aircraft_by_callsign(&self, callsign: &str) -> Vec<Uuid> {
        let ids: Vec<Uuid> = self
            .store
            .aircraft_by_callsign(callsign)
            .await
            .into_keys()
            .collect();
        let mut planner = self.planner.lock().await;
        for &id in &ids {
            self.store.queue_delete(id).await;
            planner.clear(id);
        }
        ids
    }

    pub async fn aircraft_by_callsign(&self, callsign: &str) -> HashMap<Uuid, Aircraft> {
        self.store.aircraft_by_callsign(callsign).await
    }

    /// Read-only view of the committed aircraft.
    pub async fn aircraft(&self) -> HashMap<Uuid, Aircraft> {
        self.store.aircraft_snapshot().await
    }

    /// Read-only view of the connected controllers.
    pub async fn controllers(&self) -> HashMap<Uuid, Controller> {
        self.store.controllers_snapshot().await
    }

    // --- planner routes ---

    pub async fn assign_route(&self, id: Uuid, instructions: Vec<Instruction>) {
        self.planner.lock().await.assign_route(id, instructions);
    }

    pub async fn enqueue_instruction(&self, id: Uuid, instruction: Instruction) {
        self.planner.lock().await.enqueue(id, instruction);
    }

    // --- chat ---

    pub async fn send_text_message(&self, from: Uuid, to: Uuid, message: String) {
        let envelope = NetworkMessage::Text(TextMessage { from, to, message });
        if self.outbound.send(envelope).await.is_err() {
            warn!("hub link gone; text message dropped");
        }
    }

    /// Channel chat, sent as this server.
    pub async fn send_channel_message(&self, frequency: Frequency, message: String) {
        let from = self.server_id().unwrap_or(Uuid::nil());
        let envelope = NetworkMessage::Channel(ChannelMessage { from, frequency, message });
        if self.outbound.send(envelope).await.is_err() {
            warn!("hub link gone; channel message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::Coordinate;
    use crate::model::aircraft::{AircraftMeta, AircraftMotion, AircraftState};
    use chrono::Utc;

    fn handle_with_outbox() -> (SimulationHandle, mpsc::Receiver<NetworkMessage>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = SimulationHandle::new(
            Arc::new(SimulationStore::new()),
            Arc::new(Mutex::new(Planner::new())),
            tx,
        );
        (handle, rx)
    }

    fn sample_aircraft(callsign: &str) -> Aircraft {
        Aircraft::new(
            AircraftMeta { callsign: callsign.to_string(), ..AircraftMeta::default() },
            AircraftState {
                time: Utc::now(),
                heading: 270.0,
                altitude: 4000.0,
                position: Coordinate::new(33.6, -117.9),
                ..AircraftState::default()
            },
            AircraftMotion { speed: 160, climb_rate: 0, turn_rate: 0.0, clockwise: true },
        )
    }

    #[tokio::test]
    async fn test_add_update_remove_aircraft() {
        let (handle, _rx) = handle_with_outbox();
        let id = handle.add_aircraft(sample_aircraft("N1549")).await;

        let mut changed = handle.store().current(id).await.unwrap();
        changed.state.altitude = 6000.0;
        assert!(handle.update_aircraft(id, changed).await);
        assert_eq!(handle.store().current(id).await.unwrap().state.altitude, 6000.0);

        assert!(handle.remove_aircraft(id).await);
        assert!(!handle.remove_aircraft(id).await);
        assert!(!handle.update_aircraft(id, sample_aircraft("N1549")).await);
    }

    #[tokio::test]
    async fn test_remove_by_callsign() {
        let (handle, _rx) = handle_with_outbox();
        let a = handle.add_aircraft(sample_aircraft("TWIN1")).await;
        let b = handle.add_aircraft(sample_aircraft("TWIN1")).await;
        let _c = handle.add_aircraft(sample_aircraft("OTHER")).await;

        let mut removed = handle.remove_aircraft_by_callsign("TWIN1").await;
        removed.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(removed, expected);
        assert_eq!(handle.aircraft_by_callsign("OTHER").await.len(), 1);
    }

    #[tokio::test]
    async fn test_channel_message_uses_server_identity() {
        let (handle, mut rx) = handle_with_outbox();
        let server_id = Uuid::new_v4();
        handle.set_server_id(server_id);
        handle
            .send_channel_message(Frequency::from_mhz(121.5), "guard check".to_string())
            .await;

        match rx.recv().await.unwrap() {
            NetworkMessage::Channel(msg) => {
                assert_eq!(msg.from, server_id);
                assert_eq!(
                    msg.to().to_string(),
                    "12150000-0000-0000-0000-000000000000"
                );
            }
            other => panic!("expected channel message, got {:?}", other),
        }
    }
}
