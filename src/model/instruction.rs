// Planner instructions: one LNAV command plus altitude/speed restrictions
// and a termination condition, queued per aircraft

use serde::{Deserialize, Serialize};

use crate::geodesy::Coordinate;

/// Lateral navigation command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum LnavCommand {
    /// Maintain present heading
    #[default]
    PresentHeading,
    /// Fly the given heading (degrees true)
    Heading(f64),
    /// Proceed direct to the endpoint
    Direct(Coordinate),
}

/// Altitude restriction in feet MSL. An empty range is "no restriction".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct AltitudeRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl AltitudeRange {
    pub fn between(min: f64, max: f64) -> Self {
        AltitudeRange { min: Some(min), max: Some(max) }
    }

    pub fn is_compliant(&self, altitude: f64) -> bool {
        if let Some(min) = self.min {
            if altitude < min {
                return false;
            }
        }
        if let Some(max) = self.max {
            if altitude > max {
                return false;
            }
        }
        true
    }
}

/// Speed restriction in knots. An empty range is "no restriction".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SpeedRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

impl SpeedRange {
    pub fn between(min: u32, max: u32) -> Self {
        SpeedRange { min: Some(min), max: Some(max) }
    }

    pub fn is_compliant(&self, speed: u32) -> bool {
        if let Some(min) = self.min {
            if speed < min {
                return false;
            }
        }
        if let Some(max) = self.max {
            if speed > max {
                return false;
            }
        }
        true
    }
}

/// When the head instruction pops off the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Termination {
    /// Pops when the aircraft crosses abeam the direct endpoint
    Crossing,
    /// Pops when the altitude restriction is satisfied
    Altitude,
    /// Never pops
    #[default]
    Forever,
}

/// One element of a planner route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Instruction {
    pub lnav: LnavCommand,
    pub altitude: AltitudeRange,
    pub speed: SpeedRange,
    pub termination: Termination,
}

impl Instruction {
    /// `Crossing` is only meaningful against a direct endpoint; any other
    /// combination degrades to `Forever`.
    pub fn effective_termination(&self) -> Termination {
        match (self.termination, self.lnav) {
            (Termination::Crossing, LnavCommand::Direct(_)) => Termination::Crossing,
            (Termination::Crossing, _) => Termination::Forever,
            (t, _) => t,
        }
    }
}
