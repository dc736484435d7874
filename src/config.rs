use clap::Parser;

/// Training-simulation network configuration
///
/// One binary serves both roles: pass --listen to run a hub, --hub-url with
/// --server-name to run a simulation server, or both together.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Run a hub listening on this address, e.g. 0.0.0.0:8700
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Boundaries file served read-only by the hub
    #[arg(long, value_name = "FILE")]
    pub boundaries: Option<String>,

    /// Directory of terrain shape files served read-only by the hub
    #[arg(long, value_name = "DIR")]
    pub topologies: Option<String>,

    /// OSM PBF extract served read-only by the hub
    #[arg(long, value_name = "FILE")]
    pub geos: Option<String>,

    /// Run a simulation server against this hub, e.g. ws://127.0.0.1:8700
    #[arg(long, value_name = "URL")]
    pub hub_url: Option<String>,

    /// Name published in the hub's server directory
    #[arg(long, default_value = "Simulation Server")]
    pub server_name: String,

    /// Directory scanned for external-process plugin modules (repeatable)
    #[arg(long, value_name = "DIR")]
    pub plugin_dir: Vec<String>,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}
