// Simulation server: the authoritative process behind one hub registration
//
// Owns the hub link (WebSocket client), enforces the inbound message policy,
// commits the pending batch on its cadence, and keeps every controller
// resynchronised with authoritative snapshots.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::constants::{COMMIT_INTERVAL_SECS, RESYNC_INTERVAL_SECS, STALE_CONTROLLER_SECS};
use crate::errors::{handshake_error, transport_error, SimnetResult};
use crate::model::controller::Controller;
use crate::model::delta::{AircraftDelta, ControllerDelta};
use crate::net::messages::{AuthoritativeUpdate, NetworkMessage};
use crate::sim::planner::Planner;
use crate::sim::plugin::SimulationHandle;
use crate::sim::pump::{PluginPump, PluginRegistration};
use crate::sim::store::SimulationStore;

pub struct ServerOptions {
    /// Hub base URL, e.g. `ws://127.0.0.1:8700`
    pub hub_url: String,
    /// Human-readable name published in the directory
    pub name: String,
    /// Directories scanned for external-process modules
    pub plugin_dirs: Vec<PathBuf>,
    /// In-process plugins
    pub registrations: Vec<PluginRegistration>,
}

/// Everything the inbound/periodic handlers need, separate from the link
/// receiver so the run loop can poll both.
struct EngineCtx {
    handle: SimulationHandle,
    pump: Arc<PluginPump>,
    store: Arc<SimulationStore>,
    outbound_tx: mpsc::Sender<NetworkMessage>,
}

/// One simulation server process.
pub struct SimulationServer {
    ctx: EngineCtx,
    outbound_rx: mpsc::Receiver<NetworkMessage>,
    name: String,
    hub_url: String,
}

impl SimulationServer {
    /// Build the store, planner, handle, and pump. Plugin instantiation
    /// failures (missing dependencies) surface here, before any connect.
    pub async fn new(options: ServerOptions) -> SimnetResult<Self> {
        let store = Arc::new(SimulationStore::new());
        let planner = Arc::new(Mutex::new(Planner::new()));
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let handle = SimulationHandle::new(Arc::clone(&store), Arc::clone(&planner), outbound_tx.clone());

        let pump = Arc::new(
            PluginPump::new(
                handle.clone(),
                planner,
                options.registrations,
                options.plugin_dirs,
            )
            .await?,
        );

        Ok(SimulationServer {
            ctx: EngineCtx {
                handle,
                pump,
                store,
                outbound_tx,
            },
            outbound_rx,
            name: options.name,
            hub_url: options.hub_url,
        })
    }

    /// Plugin-facing API; also what tests drive the engine with.
    pub fn handle(&self) -> SimulationHandle {
        self.ctx.handle.clone()
    }

    /// Connect to the hub, handshake, and run until the link drops or
    /// `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> SimnetResult<()> {
        let SimulationServer {
            ctx,
            mut outbound_rx,
            name,
            hub_url,
        } = self;

        let url = format!("{}/connect", hub_url.trim_end_matches('/'));
        let (ws, _) = connect_async(&url).await?;
        let (mut sink, mut stream) = ws.split();

        // the hub speaks first: our assigned guid as a bare text frame
        let guid: Uuid = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    break text
                        .as_str()
                        .parse()
                        .map_err(|_| handshake_error("hub sent an unparseable guid"))?;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(transport_error("hub closed during handshake")),
            }
        };
        sink.send(Message::text(format!("{}|{}", guid, name))).await?;
        ctx.handle.set_server_id(guid);
        info!("registered with hub as {} ({:?})", guid, name);

        tokio::spawn(Arc::clone(&ctx.pump).run(shutdown.clone()));

        let mut commit = interval(Duration::from_secs(COMMIT_INTERVAL_SECS));
        commit.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut resync_deadline = Instant::now() + fuzzy_resync_period();

        loop {
            tokio::select! {
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            ctx.handle_inbound(text.as_str()).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("hub link closed");
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("hub link failed: {}", e);
                            return Err(e.into());
                        }
                    }
                }
                Some(outgoing) = outbound_rx.recv() => {
                    let frame = outgoing.encode()?;
                    sink.send(Message::text(frame)).await?;
                }
                _ = commit.tick() => {
                    for delta in ctx.store.commit_batch().await {
                        let frame = NetworkMessage::AircraftUpdate(delta).encode()?;
                        sink.send(Message::text(frame)).await?;
                    }
                }
                _ = sleep_until(resync_deadline) => {
                    ctx.sweep_stale_controllers().await;
                    ctx.resync_all().await;
                    resync_deadline = Instant::now() + fuzzy_resync_period();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("simulation server shutting down");
                        let _ = sink.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl EngineCtx {
    /// Inbound policy: controller updates, chat, and kills are accepted;
    /// aircraft and authoritative updates from clients are rejected.
    async fn handle_inbound(&self, frame: &str) {
        let message = match NetworkMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("dropping invalid frame: {}", e);
                return;
            }
        };

        match message {
            NetworkMessage::ControllerUpdate(delta) => self.apply_controller_update(delta).await,
            NetworkMessage::Text(msg) => {
                self.pump.dispatch_text(msg.from, msg.to, &msg.message).await;
                // fan the chat back out so every controller hears it
                self.send(NetworkMessage::Text(msg)).await;
            }
            NetworkMessage::Channel(msg) => {
                self.pump.dispatch_text(msg.from, msg.to(), &msg.message).await;
                self.send(NetworkMessage::Channel(msg)).await;
            }
            NetworkMessage::Kill(kill) => {
                debug!("kill scheduled for {}", kill.victim);
                self.store.queue_delete(kill.victim).await;
            }
            NetworkMessage::AircraftUpdate(_) | NetworkMessage::AuthoritativeUpdate(_) => {
                warn!("client sent a server-only envelope; dropped");
            }
            NetworkMessage::Base => {}
        }
    }

    async fn apply_controller_update(&self, delta: ControllerDelta) {
        let id = delta.controller;

        if delta.update.is_delete() {
            if self.store.remove_controller(id).await {
                info!("controller {} signed off", id);
                self.send(NetworkMessage::ControllerUpdate(ControllerDelta::delete(id))).await;
            }
            return;
        }

        match self.store.get_controller(id).await {
            Some(existing) => match delta.apply(&existing) {
                Ok(mut updated) => {
                    updated.time = Utc::now();
                    self.store.upsert_controller(updated).await;
                    self.send(NetworkMessage::ControllerUpdate(delta)).await;
                }
                Err(e) => warn!("controller update for {} dropped: {}", id, e),
            },
            None => {
                // a client announcing itself introduces the id
                let Some(metadata) = delta.metadata.clone() else {
                    warn!("controller {} announced without metadata; dropped", id);
                    return;
                };
                let controller = Controller {
                    id,
                    time: Utc::now(),
                    metadata,
                    state: delta.state.clone().unwrap_or_default(),
                };
                info!("controller {} ({}) joined", id, controller.callsign());
                self.store.upsert_controller(controller).await;
                self.send(NetworkMessage::ControllerUpdate(delta)).await;
                // a new controller gets its snapshot immediately
                self.resync_one(id).await;
            }
        }
    }

    /// Push an authoritative snapshot to every connected controller.
    async fn resync_all(&self) {
        let controllers = self.store.controllers_snapshot().await;
        for &id in controllers.keys() {
            self.resync_one(id).await;
        }
    }

    async fn resync_one(&self, recipient: Uuid) {
        let controllers = self.store.controllers_snapshot().await;
        let aircraft = self.store.aircraft_snapshot().await;
        let snapshot = AuthoritativeUpdate {
            recipient,
            controllers: controllers.values().map(ControllerDelta::full).collect(),
            aircraft: aircraft.values().map(AircraftDelta::full).collect(),
        };
        self.send(NetworkMessage::AuthoritativeUpdate(snapshot)).await;
    }

    /// Controllers that have not re-announced within the stale window are
    /// dropped; their clients disconnected without the hub telling us.
    async fn sweep_stale_controllers(&self) {
        let now = Utc::now();
        let controllers = self.store.controllers_snapshot().await;
        for (id, controller) in controllers {
            if (now - controller.time).num_seconds() > STALE_CONTROLLER_SECS {
                info!("controller {} ({}) went stale", id, controller.callsign());
                self.store.remove_controller(id).await;
                self.send(NetworkMessage::ControllerUpdate(ControllerDelta::delete(id))).await;
            }
        }
    }

    async fn send(&self, message: NetworkMessage) {
        if self.outbound_tx.send(message).await.is_err() {
            warn!("outbound queue closed");
        }
    }
}

/// Somewhere in [0.9, 1.0] of the resync ceiling, so snapshots arrive at
/// least every period and servers do not beat in lockstep.
fn fuzzy_resync_period() -> Duration {
    let secs = rand::thread_rng().gen_range(0.9 * RESYNC_INTERVAL_SECS as f64..=RESYNC_INTERVAL_SECS as f64);
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::Coordinate;
    use crate::hub::{router, HubDirectory, HubState, StaticData};
    use crate::model::aircraft::{Aircraft, AircraftMeta, AircraftMotion, AircraftState};
    use crate::model::controller::{ControllerMeta, ControllerState, FacilityType};
    use crate::model::delta::UpdateFields;
    use std::net::SocketAddr;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn start_hub() -> (SocketAddr, HubState) {
        let state = HubState {
            directory: Arc::new(HubDirectory::new()),
            static_data: Arc::new(StaticData::new(None, None, None)),
        };
        let app = router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, state)
    }

    /// Hub + engine + one attached client, ready to exchange envelopes.
    async fn start_world() -> (SimulationHandle, ClientWs, Uuid, watch::Sender<bool>) {
        let (addr, state) = start_hub().await;
        let server = SimulationServer::new(ServerOptions {
            hub_url: format!("ws://{}", addr),
            name: "Test Server".to_string(),
            plugin_dirs: Vec::new(),
            registrations: Vec::new(),
        })
        .await
        .unwrap();
        let handle = server.handle();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(server.run(shutdown_rx));

        // wait for the registration to land in the directory
        let mut server_id = None;
        for _ in 0..200 {
            let listed = state.directory.list().await;
            if let Some(info) = listed.first() {
                server_id = Some(info.id);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let server_id = server_id.expect("engine never registered");

        let url = format!("ws://{}/connect/{}", addr, server_id);
        let (client, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        (handle, client, server_id, shutdown_tx)
    }

    async fn next_envelope(client: &mut ClientWs) -> NetworkMessage {
        loop {
            match tokio::time::timeout(Duration::from_secs(10), client.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("socket ended")
                .expect("socket failed")
            {
                Message::Text(text) => return NetworkMessage::decode(text.as_str()).unwrap(),
                _ => continue,
            }
        }
    }

    fn announce_controller(id: Uuid) -> NetworkMessage {
        let mut delta = ControllerDelta::empty(id);
        delta.update.insert(UpdateFields::METADATA);
        delta.update.insert(UpdateFields::STATE);
        delta.metadata = Some(ControllerMeta {
            facility: "LAX".to_string(),
            facility_type: FacilityType::TWR,
            discriminator: None,
        });
        delta.state = Some(ControllerState {
            radar_antennae: vec![Coordinate::new(33.94, -118.4)],
        });
        NetworkMessage::ControllerUpdate(delta)
    }

    #[tokio::test]
    async fn test_new_controller_gets_immediate_snapshot() {
        let (_handle, mut client, _server_id, _shutdown) = start_world().await;
        let controller_id = Uuid::new_v4();

        client
            .send(Message::text(announce_controller(controller_id).encode().unwrap()))
            .await
            .unwrap();

        loop {
            match next_envelope(&mut client).await {
                NetworkMessage::AuthoritativeUpdate(snapshot) => {
                    assert_eq!(snapshot.recipient, controller_id);
                    assert_eq!(snapshot.controllers.len(), 1);
                    assert!(snapshot.aircraft.is_empty());
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_committed_aircraft_reaches_the_client_extrapolated() {
        let (handle, mut client, _server_id, _shutdown) = start_world().await;

        let aircraft = Aircraft::new(
            AircraftMeta { callsign: "SIM1".to_string(), ..AircraftMeta::default() },
            AircraftState {
                time: Utc::now(),
                heading: 0.0,
                altitude: 9000.0,
                position: Coordinate::new(33.9425, -118.408056),
                ..AircraftState::default()
            },
            AircraftMotion { speed: 200, climb_rate: -10, turn_rate: 3.0, clockwise: true },
        );
        let id = handle.add_aircraft(aircraft).await;

        loop {
            match next_envelope(&mut client).await {
                NetworkMessage::AircraftUpdate(delta) if delta.aircraft == id => {
                    let state = delta.state.expect("creation carries state");
                    assert!(state.position.latitude >= 33.9425);
                    assert!(state.altitude <= 9000.0);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_kill_message_deletes_the_aircraft() {
        let (handle, mut client, _server_id, _shutdown) = start_world().await;

        let aircraft = Aircraft::new(
            AircraftMeta { callsign: "DOOMED".to_string(), ..AircraftMeta::default() },
            AircraftState {
                time: Utc::now(),
                heading: 90.0,
                altitude: 3000.0,
                position: Coordinate::new(34.0, -118.0),
                ..AircraftState::default()
            },
            AircraftMotion::default(),
        );
        let id = handle.add_aircraft(aircraft).await;

        // wait for the creation to commit, then shoot it down
        loop {
            if let NetworkMessage::AircraftUpdate(delta) = next_envelope(&mut client).await {
                if delta.aircraft == id {
                    break;
                }
            }
        }
        client
            .send(Message::text(
                NetworkMessage::Kill(crate::net::messages::KillMessage { victim: id })
                    .encode()
                    .unwrap(),
            ))
            .await
            .unwrap();

        loop {
            if let NetworkMessage::AircraftUpdate(delta) = next_envelope(&mut client).await {
                if delta.aircraft == id && delta.update.is_delete() {
                    break;
                }
            }
        }
        assert!(handle.store().current(id).await.is_none());
    }

    #[tokio::test]
    async fn test_inbound_aircraft_update_is_rejected() {
        let (handle, mut client, _server_id, _shutdown) = start_world().await;

        let intruder = Uuid::new_v4();
        let mut delta = AircraftDelta::empty(intruder);
        delta.update.insert(UpdateFields::STATE);
        delta.state = Some(AircraftState::default());
        client
            .send(Message::text(NetworkMessage::AircraftUpdate(delta).encode().unwrap()))
            .await
            .unwrap();

        // give the engine time to (not) act on it
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(handle.store().current(intruder).await.is_none());
        assert!(handle.store().aircraft_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_inbound_chat_is_fanned_back_out() {
        let (_handle, mut client, server_id, _shutdown) = start_world().await;

        let from = Uuid::new_v4();
        let text = NetworkMessage::Text(crate::net::messages::TextMessage {
            from,
            to: server_id,
            message: "request flight following".to_string(),
        });
        client.send(Message::text(text.encode().unwrap())).await.unwrap();

        loop {
            if let NetworkMessage::Text(msg) = next_envelope(&mut client).await {
                assert_eq!(msg.from, from);
                assert_eq!(msg.message, "request flight following");
                break;
            }
        }
    }
}
