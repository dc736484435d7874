// Geodesy module - WGS-84 coordinate math shared by hub and simulation
//
// Provides:
// - haversine distance (fast path for bulk culling and proximity checks)
// - Vincenty direct (fix/radial/distance projection)
// - Vincenty inverse (bearing and distance between two fixes)
//
// All distances are nautical miles, all angles are degrees.

use std::f64::consts::PI;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// Degrees to radians conversion factor
const DTOR: f64 = PI / 180.0;

/// Radians to degrees conversion factor
const RTOD: f64 = 180.0 / PI;

/// Mean Earth radius in nautical miles (haversine sphere)
const EARTH_RADIUS_NM: f64 = 3440.07;

/// WGS-84 ellipsoid semi-major axis in nautical miles
const WGS84_A: f64 = 3443.918;

/// WGS-84 ellipsoid semi-minor axis in nautical miles
const WGS84_B: f64 = 3432.3716599595;

/// WGS-84 ellipsoid flattening factor
const WGS84_F: f64 = 1.0 / 298.257223563;

/// Vincenty convergence tolerance
const CONVERGENCE_TOLERANCE: f64 = 1e-9;

/// Vincenty inverse iteration cap before declaring non-convergence
const MAX_ITERATIONS: usize = 100;

/// Normalise a heading or bearing into [0, 360).
#[inline]
pub fn normalize_heading(degrees: f64) -> f64 {
    let h = degrees % 360.0;
    if h < 0.0 {
        h + 360.0
    } else {
        h
    }
}

/// Signed smallest angle from `from` to `to` in [-180, 180); positive means
/// clockwise is the shorter way round.
#[inline]
pub fn signed_heading_delta(from: f64, to: f64) -> f64 {
    (to - from + 180.0).rem_euclid(360.0) - 180.0
}

/// A position on the WGS-84 ellipsoid in signed degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Coordinate { latitude, longitude }
    }

    /// Great-circle distance to `other` in nautical miles (haversine).
    ///
    /// Spherical approximation; use `bearing_distance_to` when the ellipsoid
    /// matters.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let lat0 = self.latitude * DTOR;
        let lat1 = other.latitude * DTOR;
        let dlat = (other.latitude - self.latitude) * DTOR;
        let dlon = (other.longitude - self.longitude) * DTOR;

        let a = (dlat / 2.0).sin().powi(2) + lat0.cos() * lat1.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_NM * c
    }

    /// Project a fix along `bearing` (degrees true) for `distance` nautical
    /// miles using the Vincenty direct formula.
    pub fn fix_radial_distance(&self, bearing: f64, distance: f64) -> Coordinate {
        if distance == 0.0 {
            return *self;
        }

        let alpha1 = bearing * DTOR;
        let phi1 = self.latitude * DTOR;

        let tan_u1 = (1.0 - WGS84_F) * phi1.tan();
        let cos_u1 = 1.0 / (1.0 + tan_u1 * tan_u1).sqrt();
        let sin_u1 = tan_u1 * cos_u1;

        let sigma1 = tan_u1.atan2(alpha1.cos());
        let sin_alpha = cos_u1 * alpha1.sin();
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;

        let u_sq = cos_sq_alpha * (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_B * WGS84_B);
        let big_a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
        let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));

        let mut sigma = distance / (WGS84_B * big_a);
        let mut cos_2sigma_m;
        let mut iterations = 0;
        loop {
            cos_2sigma_m = (2.0 * sigma1 + sigma).cos();
            let sin_sigma = sigma.sin();
            let cos_sigma = sigma.cos();
            let delta_sigma = big_b
                * sin_sigma
                * (cos_2sigma_m
                    + big_b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                            - big_b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                                * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));
            let sigma_next = distance / (WGS84_B * big_a) + delta_sigma;
            let converged = (sigma_next - sigma).abs() < CONVERGENCE_TOLERANCE;
            sigma = sigma_next;
            iterations += 1;
            if converged || iterations >= MAX_ITERATIONS {
                break;
            }
        }

        let sin_sigma = sigma.sin();
        let cos_sigma = sigma.cos();
        let tmp = sin_u1 * sin_sigma - cos_u1 * cos_sigma * alpha1.cos();

        let phi2 = (sin_u1 * cos_sigma + cos_u1 * sin_sigma * alpha1.cos())
            .atan2((1.0 - WGS84_F) * (sin_alpha * sin_alpha + tmp * tmp).sqrt());
        let lambda = (sin_sigma * alpha1.sin()).atan2(cos_u1 * cos_sigma - sin_u1 * sin_sigma * alpha1.cos());

        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let l = lambda
            - (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma + c * sin_sigma * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));

        let mut longitude = self.longitude + l * RTOD;
        if longitude > 180.0 {
            longitude -= 360.0;
        } else if longitude < -180.0 {
            longitude += 360.0;
        }

        Coordinate {
            latitude: phi2 * RTOD,
            longitude,
        }
    }

    /// Initial bearing (degrees true, normalised into [0, 360)) and distance
    /// in nautical miles to `other` via the Vincenty inverse formula.
    ///
    /// The bearing is `None` iff the two points coincide. When the inverse
    /// fails to converge (nearly antipodal points) the azimuth is undefined
    /// and the haversine distance is returned instead.
    pub fn bearing_distance_to(&self, other: &Coordinate) -> (Option<f64>, f64) {
        if self.latitude == other.latitude && self.longitude == other.longitude {
            return (None, 0.0);
        }

        let phi1 = self.latitude * DTOR;
        let phi2 = other.latitude * DTOR;
        let big_l = (other.longitude - self.longitude) * DTOR;

        let tan_u1 = (1.0 - WGS84_F) * phi1.tan();
        let cos_u1 = 1.0 / (1.0 + tan_u1 * tan_u1).sqrt();
        let sin_u1 = tan_u1 * cos_u1;
        let tan_u2 = (1.0 - WGS84_F) * phi2.tan();
        let cos_u2 = 1.0 / (1.0 + tan_u2 * tan_u2).sqrt();
        let sin_u2 = tan_u2 * cos_u2;

        let mut lambda = big_l;
        let mut sin_sigma;
        let mut cos_sigma;
        let mut sigma;
        let mut sin_alpha;
        let mut cos_sq_alpha;
        let mut cos_2sigma_m;
        let mut converged = false;

        let mut iterations = 0;
        loop {
            let sin_lambda = lambda.sin();
            let cos_lambda = lambda.cos();
            sin_sigma = ((cos_u2 * sin_lambda).powi(2)
                + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
            .sqrt();
            if sin_sigma == 0.0 {
                // Coincident after projection onto the auxiliary sphere
                return (None, 0.0);
            }
            cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
            sigma = sin_sigma.atan2(cos_sigma);
            sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
            cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
            cos_2sigma_m = if cos_sq_alpha != 0.0 {
                cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
            } else {
                // Both points on the equator
                0.0
            };
            let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
            let lambda_next = big_l
                + (1.0 - c)
                    * WGS84_F
                    * sin_alpha
                    * (sigma
                        + c * sin_sigma
                            * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));
            let delta = (lambda_next - lambda).abs();
            lambda = lambda_next;
            iterations += 1;
            if delta < CONVERGENCE_TOLERANCE {
                converged = true;
                break;
            }
            if iterations >= MAX_ITERATIONS {
                break;
            }
        }

        if !converged {
            // Azimuth undefined; distance still useful via the fast path
            return (None, self.distance_to(other));
        }

        let u_sq = cos_sq_alpha * (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_B * WGS84_B);
        let big_a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
        let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
        let delta_sigma = big_b
            * sin_sigma
            * (cos_2sigma_m
                + big_b / 4.0
                    * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                        - big_b / 6.0
                            * cos_2sigma_m
                            * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                            * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));

        let distance = WGS84_B * big_a * (sigma - delta_sigma);
        let bearing = (cos_u2 * lambda.sin())
            .atan2(cos_u1 * sin_u2 - sin_u1 * cos_u2 * lambda.cos())
            * RTOD;

        (Some(normalize_heading(bearing)), distance)
    }
}

// Component-wise composition for screen-space vector math, not great-circle
// addition. Results clamp to the valid coordinate range.

impl Add for Coordinate {
    type Output = Coordinate;

    fn add(self, rhs: Coordinate) -> Coordinate {
        Coordinate {
            latitude: (self.latitude + rhs.latitude).clamp(-90.0, 90.0),
            longitude: (self.longitude + rhs.longitude).clamp(-180.0, 180.0),
        }
    }
}

impl Sub for Coordinate {
    type Output = Coordinate;

    fn sub(self, rhs: Coordinate) -> Coordinate {
        Coordinate {
            latitude: (self.latitude - rhs.latitude).clamp(-90.0, 90.0),
            longitude: (self.longitude - rhs.longitude).clamp(-180.0, 180.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-6;

    #[test]
    fn test_haversine_lax_jfk() {
        // KLAX to KJFK is about 2145 NM
        let lax = Coordinate::new(33.9425, -118.408056);
        let jfk = Coordinate::new(40.639751, -73.778925);
        let d = lax.distance_to(&jfk);
        assert!((d - 2145.0).abs() < 10.0, "distance: {} NM", d);
    }

    #[test]
    fn test_haversine_same_point() {
        let p = Coordinate::new(51.5, -0.1);
        assert!(p.distance_to(&p).abs() < EPSILON);
    }

    #[test]
    fn test_inverse_identical_points() {
        let p = Coordinate::new(33.9425, -118.408056);
        let (bearing, distance) = p.bearing_distance_to(&p);
        assert!(bearing.is_none());
        assert_eq!(distance, 0.0);
    }

    #[test]
    fn test_direct_inverse_roundtrip() {
        // p.fix_radial_distance(bearing(p,q), dist(p,q)) lands within 0.01 NM of q
        let pairs = [
            (Coordinate::new(33.9425, -118.408056), Coordinate::new(34.5, -117.0)),
            (Coordinate::new(51.5074, -0.1278), Coordinate::new(48.8566, 2.3522)),
            (Coordinate::new(-33.9, 18.4), Coordinate::new(-26.1, 28.0)),
            (Coordinate::new(35.7, 139.7), Coordinate::new(37.4, 141.0)),
        ];
        for (p, q) in pairs {
            let (bearing, distance) = p.bearing_distance_to(&q);
            let bearing = bearing.expect("distinct points have a bearing");
            let landed = p.fix_radial_distance(bearing, distance);
            assert!(
                landed.distance_to(&q) < 0.01,
                "{:?} -> {:?} missed by {} NM",
                p,
                q,
                landed.distance_to(&q)
            );
        }
    }

    #[test]
    fn test_direct_due_north() {
        let p = Coordinate::new(0.0, 0.0);
        let q = p.fix_radial_distance(0.0, 60.0);
        assert!(q.latitude > 0.99, "latitude: {}", q.latitude);
        assert!(q.longitude.abs() < EPSILON);
    }

    #[test]
    fn test_direct_zero_distance() {
        let p = Coordinate::new(33.9425, -118.408056);
        let q = p.fix_radial_distance(123.0, 0.0);
        assert_eq!(p, q);
    }

    #[test]
    fn test_inverse_bearing_due_east() {
        let p = Coordinate::new(0.0, 0.0);
        let q = Coordinate::new(0.0, 1.0);
        let (bearing, distance) = p.bearing_distance_to(&q);
        assert!((bearing.unwrap() - 90.0).abs() < 0.01);
        // One degree of longitude on the equator is about 60 NM
        assert!((distance - 60.0).abs() < 0.5, "distance: {} NM", distance);
    }

    #[test]
    fn test_add_clamps() {
        let p = Coordinate::new(89.0, 179.0) + Coordinate::new(5.0, 5.0);
        assert_eq!(p.latitude, 90.0);
        assert_eq!(p.longitude, 180.0);

        let q = Coordinate::new(-89.0, -179.0) - Coordinate::new(5.0, 5.0);
        assert_eq!(q.latitude, -90.0);
        assert_eq!(q.longitude, -180.0);
    }

    #[test]
    fn test_normalize_heading() {
        assert_eq!(normalize_heading(-10.0), 350.0);
        assert_eq!(normalize_heading(370.0), 10.0);
        assert_eq!(normalize_heading(0.0), 0.0);
        assert_eq!(normalize_heading(360.0), 0.0);
    }

    #[test]
    fn test_signed_heading_delta() {
        assert_eq!(signed_heading_delta(350.0, 10.0), 20.0);
        assert_eq!(signed_heading_delta(10.0, 350.0), -20.0);
        assert_eq!(signed_heading_delta(90.0, 90.0), 0.0);
        // the dead-astern tie goes left
        assert_eq!(signed_heading_delta(0.0, 180.0), -180.0);
    }
}
