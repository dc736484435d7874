// Simulation engine module
// Authoritative aircraft/controller store, batched delta commits, the
// instruction planner, the plugin pump, and the hub link.

pub mod bridge;
pub mod engine;
pub mod planner;
pub mod plugin;
pub mod pump;
pub mod store;

pub use engine::{ServerOptions, SimulationServer};
pub use planner::Planner;
pub use plugin::{Plugin, SimulationHandle};
pub use pump::{AircraftSnapshot, PluginPump, PluginRegistration};
pub use store::SimulationStore;
