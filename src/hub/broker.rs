// Hub broker: session handshakes and the relay hooks
//
// After handshake the hub never parses payload JSON; it only routes frames.
// Server frames fan out to every attached client; client frames forward
// verbatim to the server.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::constants::{
    CLOSE_ENDPOINT_UNAVAILABLE, CLOSE_INVALID_PAYLOAD, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR,
    STATUS_INTERVAL_SECS,
};
use crate::hub::directory::HubDirectory;
use crate::net::session::Session;

/// Drive one server socket: handshake, fan-out relay, teardown.
pub async fn handle_server_socket(directory: Arc<HubDirectory>, ws: WebSocket) {
    let session = Session::spawn(ws);
    let guid = session.id();

    // 1. announce the assigned guid
    if session.send_text(guid.to_string()).await.is_err() {
        return;
    }

    // 2. expect "<guid>|<name>" back
    let reply = match session.intercept_next_text().await {
        Ok(reply) => reply,
        Err(_) => return,
    };
    let name = match parse_server_hello(guid, &reply) {
        Some(name) => name,
        None => {
            warn!("server {} sent a mis-identified handshake", guid);
            session.dispose(CLOSE_PROTOCOL_ERROR, "mis-identified handshake").await;
            return;
        }
    };

    // 3. publish in the directory
    info!("server {} registered as {:?}", guid, name);
    directory.register_server(guid, name, session.clone()).await;

    // 4. fan every server frame out to the attached clients, preserving
    //    send order through one relay task
    let (relay_tx, mut relay_rx) = mpsc::unbounded_channel::<String>();
    session.set_text_hook(Arc::new(move |frame| {
        let _ = relay_tx.send(frame);
    }));
    reject_binary_frames(&session);
    let relay_directory = Arc::clone(&directory);
    let relay = tokio::spawn(async move {
        while let Some(frame) = relay_rx.recv().await {
            for client in relay_directory.clients_of(guid).await {
                let _ = client.send_text(frame.clone()).await;
            }
        }
    });

    session.closed().await;
    relay.abort();

    // a dying server takes its clients down gracefully
    if let Some(entry) = directory.unregister_server(guid).await {
        info!("server {} ended; dropping {} client(s)", guid, entry.clients.len());
        for client in entry.clients.into_values() {
            client.dispose(CLOSE_NORMAL, "server shutdown").await;
        }
    }
}

/// Drive one client socket bound to `server_id`.
pub async fn handle_client_socket(directory: Arc<HubDirectory>, server_id: Uuid, ws: WebSocket) {
    let session = Session::spawn(ws);
    let guid = session.id();

    let server = match directory.server_session(server_id).await {
        Some(server) => server,
        None => {
            debug!("client {} asked for unknown server {}", guid, server_id);
            session.dispose(CLOSE_ENDPOINT_UNAVAILABLE, "unknown server").await;
            return;
        }
    };

    if !directory.add_client(server_id, session.clone()).await {
        session.dispose(CLOSE_ENDPOINT_UNAVAILABLE, "unknown server").await;
        return;
    }
    debug!("client {} attached to server {}", guid, server_id);

    // forward every client frame verbatim to the server, in order
    let (relay_tx, mut relay_rx) = mpsc::unbounded_channel::<String>();
    session.set_text_hook(Arc::new(move |frame| {
        let _ = relay_tx.send(frame);
    }));
    reject_binary_frames(&session);
    let relay = tokio::spawn(async move {
        while let Some(frame) = relay_rx.recv().await {
            if server.send_text(frame).await.is_err() {
                break;
            }
        }
    });

    session.closed().await;
    relay.abort();

    // the server is not told; the simulation notices via kill or its
    // stale-controller sweep
    directory.remove_client(server_id, guid).await;
    debug!("client {} detached from server {}", guid, server_id);
}

/// The relay is text-only; a binary frame after handshake is invalid payload.
fn reject_binary_frames(session: &Session) {
    let offender = session.clone();
    session.set_binary_hook(Arc::new(move |_| {
        let offender = offender.clone();
        tokio::spawn(async move {
            offender.dispose(CLOSE_INVALID_PAYLOAD, "text frames only").await;
        });
    }));
}

/// `"<guid>|<name>"` with a matching guid prefix, or None.
fn parse_server_hello(expected: Uuid, reply: &str) -> Option<String> {
    let (id_part, name) = reply.split_once('|')?;
    let claimed: Uuid = id_part.parse().ok()?;
    if claimed != expected || name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

/// Periodic status line.
pub async fn run_status_loop(directory: Arc<HubDirectory>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(STATUS_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let (servers, clients) = directory.counts().await;
        info!("Status: {} server(s), {} client(s)", servers, clients);
    }
}
