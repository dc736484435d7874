// Instruction planner
//
// Per-aircraft FIFO routes of instructions. Each tick runs three phases over
// the fleet: termination check on the head instruction, the skip phase, and
// actuation of the current instruction into motion adjustments. Only
// adjustments that actually change motion are returned for write-through.

use std::collections::{HashMap, VecDeque};

use tracing::debug;
use uuid::Uuid;

use crate::constants::{
    ACCELERATION_KT_PER_SEC, CLIMB_RATE_FPM, DECELERATION_KT_PER_SEC, DESCENT_RATE_FPM,
    DIRECT_TOLERANCE_DEG, STANDARD_TURN_RATE,
};
use crate::geodesy::{normalize_heading, signed_heading_delta};
use crate::model::aircraft::{Aircraft, AircraftMotion};
use crate::model::instruction::{Instruction, LnavCommand, Termination};

struct RouteState {
    /// Instructions behind the current one
    route: VecDeque<Instruction>,
    /// Cached head of the route
    current: Option<Instruction>,
    /// |angle between heading and bearing-to-endpoint| from the last tick
    last_abeam_angle: Option<f64>,
    /// Fractional speed integrator; speed on the wire is whole knots
    speed_carry: Option<f64>,
    /// Speed we last wrote, to detect outside interference
    last_written_speed: Option<u32>,
}

impl RouteState {
    fn new(instructions: Vec<Instruction>) -> Self {
        let mut route: VecDeque<Instruction> = instructions.into();
        let current = route.pop_front();
        RouteState {
            route,
            current,
            last_abeam_angle: None,
            speed_carry: None,
            last_written_speed: None,
        }
    }

    fn is_idle(&self) -> bool {
        self.current.is_none() && self.route.is_empty()
    }

    /// Dequeue the head; promote the next instruction.
    fn skip(&mut self) {
        self.current = self.route.pop_front();
        self.last_abeam_angle = None;
        self.speed_carry = None;
    }
}

/// Planner state for every aircraft with a route. Owned by the pump task.
pub struct Planner {
    routes: HashMap<Uuid, RouteState>,
}

impl Planner {
    pub fn new() -> Self {
        Planner { routes: HashMap::new() }
    }

    /// Replace an aircraft's route.
    pub fn assign_route(&mut self, id: Uuid, instructions: Vec<Instruction>) {
        self.routes.insert(id, RouteState::new(instructions));
    }

    /// Append one instruction to an aircraft's route.
    pub fn enqueue(&mut self, id: Uuid, instruction: Instruction) {
        let rs = self
            .routes
            .entry(id)
            .or_insert_with(|| RouteState::new(Vec::new()));
        if rs.current.is_none() {
            rs.current = Some(instruction);
            rs.last_abeam_angle = None;
        } else {
            rs.route.push_back(instruction);
        }
    }

    pub fn clear(&mut self, id: Uuid) {
        self.routes.remove(&id);
    }

    /// True when the aircraft has no instruction left.
    pub fn is_idle(&self, id: Uuid) -> bool {
        self.routes.get(&id).map_or(true, |rs| rs.is_idle())
    }

    pub fn current_instruction(&self, id: Uuid) -> Option<Instruction> {
        self.routes.get(&id).and_then(|rs| rs.current)
    }

    /// One planner pass over the fleet. Returns the motion adjustments that
    /// differ from the aircraft's present motion.
    pub fn tick(&mut self, fleet: &[Aircraft], dt_secs: f64) -> Vec<(Uuid, AircraftMotion)> {
        let mut adjustments = Vec::new();

        for ac in fleet {
            let Some(rs) = self.routes.get_mut(&ac.id) else { continue };
            if rs.current.is_none() {
                rs.current = rs.route.pop_front();
                rs.last_abeam_angle = None;
            }
            let Some(instruction) = rs.current else { continue };

            // 1. termination check, 2. skip (at most once per tick)
            if terminated(&instruction, ac, &mut rs.last_abeam_angle) {
                debug!("aircraft {} completed an instruction", ac.id);
                rs.skip();
            }
            let Some(instruction) = rs.current else { continue };

            // 3. actuate
            let motion = actuate(&instruction, ac, rs, dt_secs);
            if motion != ac.motion {
                adjustments.push((ac.id, motion));
            }
        }

        adjustments
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

/// Has the head instruction run its course?
fn terminated(instruction: &Instruction, ac: &Aircraft, last_abeam: &mut Option<f64>) -> bool {
    match instruction.effective_termination() {
        Termination::Forever => false,
        Termination::Altitude => instruction.altitude.is_compliant(ac.state.altitude),
        Termination::Crossing => {
            let LnavCommand::Direct(endpoint) = instruction.lnav else {
                return false;
            };
            let (bearing, _) = ac.state.position.bearing_distance_to(&endpoint);
            let Some(bearing) = bearing else {
                // sitting on the endpoint
                return true;
            };
            let angle = signed_heading_delta(ac.state.heading, bearing).abs();
            let was_ahead = last_abeam.map_or(true, |prev| prev <= 90.0);
            *last_abeam = Some(angle);
            was_ahead && angle > 90.0
        }
    }
}

/// Motion the current instruction asks for, starting from the aircraft's
/// present motion.
fn actuate(instruction: &Instruction, ac: &Aircraft, rs: &mut RouteState, dt_secs: f64) -> AircraftMotion {
    let mut motion = ac.motion;

    // lateral
    match instruction.lnav {
        LnavCommand::PresentHeading => {
            motion.turn_rate = 0.0;
        }
        LnavCommand::Heading(target) => {
            steer(&mut motion, ac.state.heading, normalize_heading(target), 0.0);
        }
        LnavCommand::Direct(endpoint) => {
            match ac.state.position.bearing_distance_to(&endpoint).0 {
                Some(bearing) => steer(&mut motion, ac.state.heading, bearing, DIRECT_TOLERANCE_DEG),
                None => motion.turn_rate = 0.0,
            }
        }
    }

    // vertical
    if instruction.altitude.is_compliant(ac.state.altitude) {
        motion.climb_rate = 0;
    } else if instruction.altitude.min.map_or(false, |min| ac.state.altitude < min) {
        motion.climb_rate = CLIMB_RATE_FPM;
    } else {
        motion.climb_rate = DESCENT_RATE_FPM;
    }

    // speed; integrate fractionally, the wire value is whole knots
    if !instruction.speed.is_compliant(motion.speed) {
        // an outside write to speed invalidates the integrator
        if rs.last_written_speed != Some(motion.speed) {
            rs.speed_carry = None;
        }
        let mut speed = rs.speed_carry.unwrap_or(motion.speed as f64);
        if let Some(min) = instruction.speed.min {
            if motion.speed < min {
                speed = (speed + ACCELERATION_KT_PER_SEC * dt_secs).min(min as f64);
            }
        }
        if let Some(max) = instruction.speed.max {
            if motion.speed > max {
                speed = (speed - DECELERATION_KT_PER_SEC * dt_secs).max(max as f64);
            }
        }
        rs.speed_carry = Some(speed);
        motion.speed = speed.round() as u32;
        rs.last_written_speed = Some(motion.speed);
    }

    motion
}

/// Turn the shorter way at standard rate; level the wings inside `tolerance`.
fn steer(motion: &mut AircraftMotion, heading: f64, target: f64, tolerance: f64) {
    let delta = signed_heading_delta(heading, target);
    if delta.abs() <= tolerance || delta == 0.0 {
        motion.turn_rate = 0.0;
    } else {
        motion.turn_rate = STANDARD_TURN_RATE;
        motion.clockwise = delta > 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::Coordinate;
    use crate::model::aircraft::{AircraftMeta, AircraftState};
    use crate::model::instruction::{AltitudeRange, SpeedRange};
    use chrono::Utc;

    fn aircraft_at(heading: f64, altitude: f64, speed: u32, position: Coordinate) -> Aircraft {
        Aircraft::new(
            AircraftMeta::default(),
            AircraftState {
                time: Utc::now(),
                heading,
                altitude,
                position,
                ..AircraftState::default()
            },
            AircraftMotion { speed, climb_rate: 0, turn_rate: 0.0, clockwise: true },
        )
    }

    fn direct_crossing(endpoint: Coordinate) -> Instruction {
        Instruction {
            lnav: LnavCommand::Direct(endpoint),
            termination: Termination::Crossing,
            ..Instruction::default()
        }
    }

    #[test]
    fn test_heading_instruction_turns_shorter_way() {
        let mut planner = Planner::new();
        let ac = aircraft_at(350.0, 5000.0, 200, Coordinate::new(34.0, -118.0));
        planner.assign_route(
            ac.id,
            vec![Instruction { lnav: LnavCommand::Heading(10.0), ..Instruction::default() }],
        );

        let adjustments = planner.tick(&[ac.clone()], 0.1);
        assert_eq!(adjustments.len(), 1);
        let motion = adjustments[0].1;
        assert_eq!(motion.turn_rate, STANDARD_TURN_RATE);
        assert!(motion.clockwise, "350 to 010 turns right");

        let ac2 = aircraft_at(10.0, 5000.0, 200, Coordinate::new(34.0, -118.0));
        planner.assign_route(
            ac2.id,
            vec![Instruction { lnav: LnavCommand::Heading(350.0), ..Instruction::default() }],
        );
        let adjustments = planner.tick(&[ac2], 0.1);
        assert!(!adjustments[0].1.clockwise, "010 to 350 turns left");
    }

    #[test]
    fn test_on_heading_levels_wings() {
        let mut planner = Planner::new();
        let mut ac = aircraft_at(90.0, 5000.0, 200, Coordinate::new(34.0, -118.0));
        ac.motion.turn_rate = STANDARD_TURN_RATE;
        planner.assign_route(
            ac.id,
            vec![Instruction { lnav: LnavCommand::Heading(90.0), ..Instruction::default() }],
        );
        let adjustments = planner.tick(&[ac], 0.1);
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].1.turn_rate, 0.0);
    }

    #[test]
    fn test_altitude_actuation() {
        let mut planner = Planner::new();
        let restriction = Instruction {
            altitude: AltitudeRange::between(10000.0, 11000.0),
            ..Instruction::default()
        };

        let low = aircraft_at(0.0, 8000.0, 200, Coordinate::new(34.0, -118.0));
        planner.assign_route(low.id, vec![restriction]);
        let adj = planner.tick(&[low], 0.1);
        assert_eq!(adj[0].1.climb_rate, CLIMB_RATE_FPM);

        let high = aircraft_at(0.0, 12000.0, 200, Coordinate::new(34.0, -118.0));
        planner.assign_route(high.id, vec![restriction]);
        let adj = planner.tick(&[high], 0.1);
        assert_eq!(adj[0].1.climb_rate, DESCENT_RATE_FPM);

        let mut level = aircraft_at(0.0, 10500.0, 200, Coordinate::new(34.0, -118.0));
        level.motion.climb_rate = 1500;
        planner.assign_route(level.id, vec![restriction]);
        let adj = planner.tick(&[level], 0.1);
        assert_eq!(adj[0].1.climb_rate, 0);
    }

    #[test]
    fn test_speed_actuation_integrates_and_clamps() {
        let mut planner = Planner::new();
        let restriction = Instruction {
            speed: SpeedRange::between(200, 250),
            ..Instruction::default()
        };
        let mut ac = aircraft_at(0.0, 5000.0, 190, Coordinate::new(34.0, -118.0));
        planner.assign_route(ac.id, vec![restriction]);

        // 10 kt/s for one second of 10 Hz ticks closes the 10 kt gap exactly
        for _ in 0..10 {
            for (_, motion) in planner.tick(&[ac.clone()], 0.1) {
                ac.motion = motion;
            }
        }
        assert_eq!(ac.motion.speed, 200);

        // decelerate from above the range, clamped at the maximum
        let mut fast = aircraft_at(0.0, 5000.0, 252, Coordinate::new(34.0, -118.0));
        planner.assign_route(fast.id, vec![restriction]);
        for _ in 0..50 {
            for (_, motion) in planner.tick(&[fast.clone()], 0.1) {
                fast.motion = motion;
            }
        }
        assert_eq!(fast.motion.speed, 250);
    }

    #[test]
    fn test_crossing_detected_within_120_ticks() {
        // one NM short of the endpoint, pointed straight at it, 60 kt
        let endpoint = Coordinate::new(34.0, -118.0);
        let start = endpoint.fix_radial_distance(180.0, 1.0);
        let mut ac = aircraft_at(0.0, 5000.0, 60, start);
        ac.motion.speed = 60;

        let mut planner = Planner::new();
        planner.assign_route(ac.id, vec![direct_crossing(endpoint)]);

        // 1 NM at 60 kt is 60 s of travel; the abeam flip lands within a
        // dozen ticks of passing the point
        let mut crossed_at = None;
        for tick in 0..720 {
            for (_, motion) in planner.tick(&[ac.clone()], 0.1) {
                ac.motion = motion;
            }
            if planner.is_idle(ac.id) {
                crossed_at = Some(tick);
                break;
            }
            ac.state = ac.motion.apply(&ac.state, 0.1);
        }
        let crossed_at = crossed_at.expect("never crossed the endpoint");
        assert!(crossed_at >= 590, "crossed far too early: tick {}", crossed_at);
    }

    #[test]
    fn test_abeam_aircraft_pops_to_next_instruction() {
        // just past abeam: the endpoint sits 0.05 NM off the left wing,
        // a hair behind the beam
        let ac_pos = Coordinate::new(34.0, -118.0);
        let endpoint = ac_pos.fix_radial_distance(269.0, 0.05);
        let ac = aircraft_at(0.0, 5000.0, 200, ac_pos);

        let next = Instruction {
            altitude: AltitudeRange::between(1000.0, 1000.0),
            termination: Termination::Altitude,
            ..Instruction::default()
        };
        let mut planner = Planner::new();
        planner.assign_route(ac.id, vec![direct_crossing(endpoint), next]);

        planner.tick(&[ac.clone()], 0.1);
        let current = planner.current_instruction(ac.id).unwrap();
        assert_eq!(current.termination, Termination::Altitude);
    }

    #[test]
    fn test_forever_never_terminates() {
        let mut planner = Planner::new();
        let ac = aircraft_at(180.0, 5000.0, 200, Coordinate::new(34.0, -118.0));
        planner.assign_route(
            ac.id,
            vec![Instruction { lnav: LnavCommand::PresentHeading, ..Instruction::default() }],
        );
        for _ in 0..50 {
            planner.tick(&[ac.clone()], 0.1);
        }
        assert!(!planner.is_idle(ac.id));
    }

    #[test]
    fn test_altitude_termination_pops_when_compliant() {
        let mut planner = Planner::new();
        let ac = aircraft_at(0.0, 9950.0, 200, Coordinate::new(34.0, -118.0));
        planner.assign_route(
            ac.id,
            vec![Instruction {
                altitude: AltitudeRange::between(9900.0, 10000.0),
                termination: Termination::Altitude,
                ..Instruction::default()
            }],
        );
        planner.tick(&[ac.clone()], 0.1);
        assert!(planner.is_idle(ac.id));
    }

    #[test]
    fn test_unchanged_motion_is_not_written() {
        let mut planner = Planner::new();
        let ac = aircraft_at(90.0, 5000.0, 200, Coordinate::new(34.0, -118.0));
        // present heading, no restrictions; aircraft already level and steady
        planner.assign_route(
            ac.id,
            vec![Instruction { lnav: LnavCommand::PresentHeading, ..Instruction::default() }],
        );
        let adjustments = planner.tick(&[ac], 0.1);
        assert!(adjustments.is_empty());
    }
}
