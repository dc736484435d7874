// Simulation entity model
// Aircraft, controllers, planner instructions, and the delta-merge algebra

pub mod aircraft;
pub mod controller;
pub mod delta;
pub mod instruction;

pub use aircraft::{Aircraft, AircraftMeta, AircraftMotion, AircraftState, FlightRules, Squawk, SquawkMode};
pub use controller::{Controller, ControllerMeta, ControllerState, FacilityType};
pub use delta::{AircraftDelta, ControllerDelta, UpdateFields};
pub use instruction::{AltitudeRange, Instruction, LnavCommand, SpeedRange, Termination};
