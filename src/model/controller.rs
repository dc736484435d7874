// Controller entity: a human participant's position within a facility

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geodesy::Coordinate;

/// Position type within a facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FacilityType {
    /// Clearance delivery
    DEL,
    /// Ground
    GND,
    /// Tower
    TWR,
    /// Approach
    APP,
    /// Departure
    DEP,
    /// Center
    CTR,
    /// Flight service station
    FSS,
}

impl std::fmt::Display for FacilityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FacilityType::DEL => "DEL",
            FacilityType::GND => "GND",
            FacilityType::TWR => "TWR",
            FacilityType::APP => "APP",
            FacilityType::DEP => "DEP",
            FacilityType::CTR => "CTR",
            FacilityType::FSS => "FSS",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerMeta {
    pub facility: String,
    #[serde(rename = "type")]
    pub facility_type: FacilityType,
    /// Distinguishes multiple positions of the same type within a facility
    pub discriminator: Option<String>,
}

impl ControllerMeta {
    /// Derived callsign: `facility[_discriminator]_type`.
    pub fn callsign(&self) -> String {
        match &self.discriminator {
            Some(d) => format!("{}_{}_{}", self.facility, d, self.facility_type),
            None => format!("{}_{}", self.facility, self.facility_type),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ControllerState {
    pub radar_antennae: Vec<Coordinate>,
}

/// One connected controller position, introduced by its client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Controller {
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub metadata: ControllerMeta,
    pub state: ControllerState,
}

impl Controller {
    pub fn callsign(&self) -> String {
        self.metadata.callsign()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callsign_without_discriminator() {
        let meta = ControllerMeta {
            facility: "LAX".to_string(),
            facility_type: FacilityType::TWR,
            discriminator: None,
        };
        assert_eq!(meta.callsign(), "LAX_TWR");
    }

    #[test]
    fn test_callsign_with_discriminator() {
        let meta = ControllerMeta {
            facility: "SCT".to_string(),
            facility_type: FacilityType::APP,
            discriminator: Some("E".to_string()),
        };
        assert_eq!(meta.callsign(), "SCT_E_APP");
    }
}
