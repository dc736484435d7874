// Simnet - Main Entry Point
// Hub broker and simulation server for the training network
// Licensed under AGPL v3

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use simnet::config::Config;
use simnet::hub::{self, HubDirectory, HubState, StaticData};
use simnet::sim::{ServerOptions, SimulationHandle, SimulationServer};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    init_logging(config.verbose);

    if config.listen.is_none() && config.hub_url.is_none() {
        warn!("Nothing to do! Pass --listen to run a hub and/or --hub-url to run a server");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();
    let mut hub_directory: Option<Arc<HubDirectory>> = None;
    let mut sim_handle: Option<SimulationHandle> = None;

    // Hub role
    if let Some(listen) = &config.listen {
        let directory = Arc::new(HubDirectory::new());
        let static_data = Arc::new(StaticData::new(
            config.boundaries.as_ref().map(PathBuf::from),
            config.topologies.as_ref().map(PathBuf::from),
            config.geos.as_ref().map(PathBuf::from),
        ));
        let state = HubState {
            directory: Arc::clone(&directory),
            static_data,
        };
        let app = hub::router(state);

        let listener = tokio::net::TcpListener::bind(listen).await?;
        info!("hub listening on {}", listener.local_addr()?);

        tokio::spawn(hub::broker::run_status_loop(Arc::clone(&directory)));
        hub_directory = Some(directory);

        let mut hub_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                while hub_shutdown.changed().await.is_ok() {
                    if *hub_shutdown.borrow() {
                        break;
                    }
                }
            });
            if let Err(e) = serve.await {
                error!("hub server error: {}", e);
            }
        }));
    }

    // Simulation server role
    if let Some(hub_url) = &config.hub_url {
        let options = ServerOptions {
            hub_url: hub_url.clone(),
            name: config.server_name.clone(),
            plugin_dirs: config.plugin_dir.iter().map(PathBuf::from).collect(),
            registrations: Vec::new(),
        };
        let server = match SimulationServer::new(options).await {
            Ok(server) => server,
            Err(e) => {
                error!("simulation server failed to start: {}", e);
                return Err(e.into());
            }
        };
        info!("simulation server connecting to {}", hub_url);
        sim_handle = Some(server.handle());

        let server_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server.run(server_shutdown).await {
                error!("simulation server error: {}", e);
            }
        }));
    }

    info!("Ready");

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal (Ctrl+C)"),
        Err(e) => {
            error!("Unable to listen for shutdown signal: {}", e);
            return Err(e.into());
        }
    }

    // Graceful shutdown: flip the signal, then wait for each task to take
    // its own exit path (close frames, pump drain). Abort only a straggler.
    info!("Shutting down...");
    let _ = shutdown_tx.send(true);
    for mut task in tasks {
        if tokio::time::timeout(Duration::from_secs(5), &mut task).await.is_err() {
            warn!("task did not stop in time; aborting");
            task.abort();
        }
    }

    // Report final statistics
    if let Some(directory) = &hub_directory {
        let (servers, clients) = directory.counts().await;
        info!("Hub stopped. Final count: {} server(s), {} client(s)", servers, clients);
    }
    if let Some(handle) = &sim_handle {
        let aircraft = handle.aircraft().await.len();
        let controllers = handle.controllers().await.len();
        info!(
            "Simulation server stopped. Final count: {} aircraft, {} controller(s)",
            aircraft, controllers
        );
    }

    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;

    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_span_events(if verbose {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        });

    if verbose {
        subscriber.with_max_level(tracing::Level::DEBUG).init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber.with_max_level(tracing::Level::INFO).init();
    }
}
