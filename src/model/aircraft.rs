// Aircraft entity: flight-plan metadata, timestamped position snapshot,
// motion vector. Extrapolation advances a snapshot deterministically.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geodesy::{normalize_heading, Coordinate};

/// Filed flight rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FlightRules {
    #[default]
    VFR,
    IFR,
    /// IFR first, cancelling to VFR en route
    Y,
    /// VFR first, picking up IFR en route
    Z,
}

/// Transponder mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SquawkMode {
    #[default]
    Standby,
    On,
    Altitude,
}

/// Transponder code and mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Squawk {
    pub code: u16,
    pub mode: SquawkMode,
}

/// Flight-plan strip data; changes rarely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AircraftMeta {
    pub callsign: String,
    pub origin: String,
    pub destination: String,
    pub rules: FlightRules,
    #[serde(rename = "type")]
    pub aircraft_type: String,
    pub route: String,
    pub remarks: String,
}

/// Positional snapshot, valid at its own timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct AircraftState {
    pub time: DateTime<Utc>,
    /// Degrees true, always normalised into [0, 360)
    pub heading: f64,
    /// Feet MSL
    pub altitude: f64,
    pub position: Coordinate,
    pub squawk: Squawk,
}

/// Motion vector that carries a snapshot forward in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct AircraftMotion {
    /// Knots
    pub speed: u32,
    /// Feet per minute
    pub climb_rate: i32,
    /// Degrees per second, magnitude; direction is `clockwise`
    pub turn_rate: f32,
    pub clockwise: bool,
}

impl AircraftMotion {
    /// Signed turn rate in degrees per second (positive = clockwise).
    pub fn signed_turn_rate(&self) -> f64 {
        if self.clockwise {
            self.turn_rate as f64
        } else {
            -(self.turn_rate as f64)
        }
    }

    /// Advance `state` by `dt_secs` under this motion vector.
    ///
    /// With no turn rate the aircraft translates along its heading; with a
    /// turn rate it follows a small-circle arc of radius speed/turn-rate
    /// whose tangent at the start matches the heading. Heading is normalised
    /// after translation; altitude advances by climb-rate minutes.
    pub fn apply(&self, state: &AircraftState, dt_secs: f64) -> AircraftState {
        let mut next = *state;
        let distance = self.speed as f64 * dt_secs / 3600.0;
        let omega = self.signed_turn_rate();

        if omega == 0.0 {
            next.position = state.position.fix_radial_distance(normalize_heading(state.heading), distance);
            next.heading = normalize_heading(state.heading);
        } else {
            let theta = omega * dt_secs;
            // Chord of the arc: length 2R·sin(θ/2), bearing half way into the turn
            let radius = (self.speed as f64 / 3600.0) / (omega.abs() * std::f64::consts::PI / 180.0);
            let chord = 2.0 * radius * (theta.abs() * std::f64::consts::PI / 360.0).sin();
            let chord_bearing = normalize_heading(state.heading + theta / 2.0);
            next.position = state.position.fix_radial_distance(chord_bearing, chord);
            next.heading = normalize_heading(state.heading + theta);
        }

        next.altitude = state.altitude + self.climb_rate as f64 * dt_secs / 60.0;
        next.time = state.time + Duration::milliseconds((dt_secs * 1000.0).round() as i64);
        next
    }
}

/// One simulated aircraft, owned by exactly one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aircraft {
    pub id: Uuid,
    pub metadata: AircraftMeta,
    pub state: AircraftState,
    pub motion: AircraftMotion,
}

impl Aircraft {
    pub fn new(metadata: AircraftMeta, state: AircraftState, motion: AircraftMotion) -> Self {
        Aircraft {
            id: Uuid::new_v4(),
            metadata,
            state,
            motion,
        }
    }

    /// Timestamp of the current snapshot.
    pub fn time(&self) -> DateTime<Utc> {
        self.state.time
    }

    /// Deterministic snapshot of this aircraft at `time`.
    ///
    /// A timestamp at or before the current one returns the aircraft with the
    /// clock rewound but the snapshot otherwise untouched.
    pub fn extrapolate(&self, time: DateTime<Utc>) -> Aircraft {
        let dt = (time - self.state.time).num_milliseconds() as f64 / 1000.0;
        let mut next = self.clone();
        if dt > 0.0 {
            next.state = self.motion.apply(&self.state, dt);
        }
        next.state.time = time;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(heading: f64, altitude: f64, lat: f64, lon: f64) -> AircraftState {
        AircraftState {
            time: Utc::now(),
            heading,
            altitude,
            position: Coordinate::new(lat, lon),
            squawk: Squawk::default(),
        }
    }

    #[test]
    fn test_apply_normalizes_negative_heading() {
        let motion = AircraftMotion { speed: 0, climb_rate: 0, turn_rate: 0.0, clockwise: true };
        let state = snapshot(-10.0, 5000.0, 33.0, -118.0);
        let next = motion.apply(&state, 1.0);
        assert!(next.heading >= 0.0 && next.heading < 360.0);
        assert_eq!(next.heading, 350.0);
    }

    #[test]
    fn test_apply_straight_translation() {
        // 60 kt due north for one minute covers one NM
        let motion = AircraftMotion { speed: 60, climb_rate: 0, turn_rate: 0.0, clockwise: true };
        let state = snapshot(0.0, 3000.0, 33.9425, -118.408056);
        let next = motion.apply(&state, 60.0);
        let travelled = state.position.distance_to(&next.position);
        assert!((travelled - 1.0).abs() < 1e-3, "travelled {} NM", travelled);
        assert!(next.position.latitude > state.position.latitude);
    }

    #[test]
    fn test_apply_climb_per_minute() {
        let motion = AircraftMotion { speed: 0, climb_rate: -600, turn_rate: 0.0, clockwise: true };
        let state = snapshot(0.0, 9000.0, 33.0, -118.0);
        let next = motion.apply(&state, 30.0);
        assert!((next.altitude - 8700.0).abs() < 1e-9);
    }

    #[test]
    fn test_apply_standard_turn() {
        let motion = AircraftMotion { speed: 200, climb_rate: 0, turn_rate: 3.0, clockwise: true };
        let state = snapshot(0.0, 9000.0, 33.9425, -118.408056);
        let next = motion.apply(&state, 1.0);
        assert!((next.heading - 3.0).abs() < 1e-9);
        // Mostly northbound with a slight eastward curve
        assert!(next.position.latitude > state.position.latitude);
        assert!(next.position.longitude > state.position.longitude);
    }

    #[test]
    fn test_apply_counterclockwise_turn() {
        let motion = AircraftMotion { speed: 200, climb_rate: 0, turn_rate: 3.0, clockwise: false };
        let state = snapshot(0.0, 9000.0, 33.9425, -118.408056);
        let next = motion.apply(&state, 2.0);
        assert!((next.heading - 354.0).abs() < 1e-9);
    }

    #[test]
    fn test_extrapolate_sets_time() {
        let ac = Aircraft::new(
            AircraftMeta::default(),
            snapshot(90.0, 5000.0, 33.0, -118.0),
            AircraftMotion { speed: 120, climb_rate: 0, turn_rate: 0.0, clockwise: true },
        );
        let later = ac.time() + Duration::seconds(30);
        let next = ac.extrapolate(later);
        assert_eq!(next.time(), later);
        assert_eq!(next.id, ac.id);
    }

    #[test]
    fn test_extrapolate_composes_when_straight() {
        // extrapolate(extrapolate(ac, t1), t2) ~= extrapolate(ac, t2) with no turn
        let ac = Aircraft::new(
            AircraftMeta::default(),
            snapshot(45.0, 5000.0, 33.9425, -118.408056),
            AircraftMotion { speed: 300, climb_rate: 500, turn_rate: 0.0, clockwise: true },
        );
        let t1 = ac.time() + Duration::seconds(17);
        let t2 = ac.time() + Duration::seconds(61);

        let two_step = ac.extrapolate(t1).extrapolate(t2);
        let one_step = ac.extrapolate(t2);

        let gap = two_step.state.position.distance_to(&one_step.state.position);
        assert!(gap < 1e-3, "geodesic gap {} NM", gap);
        assert!((two_step.state.altitude - one_step.state.altitude).abs() < 1e-6);
        assert_eq!(two_step.time(), one_step.time());
    }
}
