// Shared constants: WebSocket close codes, engine timing
// Geodesic constants live next to the math in geodesy.rs

// --- WebSocket close codes (RFC 6455) ---

/// Graceful disconnect / server shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Unknown server at connect time; orphaned endpoint.
pub const CLOSE_ENDPOINT_UNAVAILABLE: u16 = 1001;
/// Mal-formed or mis-identified handshake.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Invalid payload framing.
pub const CLOSE_INVALID_PAYLOAD: u16 = 1007;

// --- Engine timing ---

/// Plugin pump tick interval (10 Hz).
pub const PUMP_TICK_MILLIS: u64 = 100;

/// Pending-batch commit interval (s).
pub const COMMIT_INTERVAL_SECS: u64 = 1;

/// Upper bound on the authoritative resync period (s); the live period is
/// fuzzed below this so every controller sees a snapshot at least this often.
pub const RESYNC_INTERVAL_SECS: u64 = 30;

/// Plugin module directory scan interval (s).
pub const MODULE_SCAN_INTERVAL_SECS: u64 = 5;

/// Controllers silent for this long are swept (two missed resyncs).
pub const STALE_CONTROLLER_SECS: i64 = 60;

/// Hub status log interval (s).
pub const STATUS_INTERVAL_SECS: u64 = 15;

// --- Planner actuation rates ---

/// Standard-rate turn (degrees per second).
pub const STANDARD_TURN_RATE: f32 = 3.0;

/// Heading tolerance on direct-to legs (degrees).
pub const DIRECT_TOLERANCE_DEG: f64 = 1.0;

/// Climb rate applied below an altitude restriction minimum (feet per minute).
pub const CLIMB_RATE_FPM: i32 = 1000;

/// Descent rate applied above an altitude restriction maximum (feet per minute).
pub const DESCENT_RATE_FPM: i32 = -500;

/// Acceleration toward a speed restriction minimum (knots per second).
pub const ACCELERATION_KT_PER_SEC: f64 = 10.0;

/// Deceleration toward a speed restriction maximum (knots per second).
pub const DECELERATION_KT_PER_SEC: f64 = 5.0;
