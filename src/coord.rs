//! Spherical coordinates inside the dome.
//!
//! Positions are expressed as (radius, polar angle θ, azimuth φ, height).
//! Height is a vertical offset added on top of the spherical z component, so
//! a source can sit on a shell that is raised above the floor plane.

use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

/// Quantization step for [`CoordKey`]: one micro-unit per component.
const KEY_SCALE: f64 = 1.0e6;

/// A point in dome space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SphericalCoordinate {
    /// Distance from the origin, >= 0.
    pub radius: f64,
    /// Polar angle in [0, π].
    pub theta: f64,
    /// Azimuth in [0, 2π).
    pub phi: f64,
    /// Vertical offset in the dome.
    pub height: f64,
}

impl SphericalCoordinate {
    pub fn new(radius: f64, theta: f64, phi: f64, height: f64) -> Self {
        SphericalCoordinate {
            radius,
            theta,
            phi,
            height,
        }
    }

    /// The dome origin.
    pub fn origin() -> Self {
        Self::default()
    }

    /// Bring components back into their canonical ranges.
    pub fn normalized(&self) -> Self {
        SphericalCoordinate {
            radius: self.radius.max(0.0),
            theta: self.theta.clamp(0.0, PI),
            phi: wrap_azimuth(self.phi),
            height: self.height,
        }
    }

    /// Cartesian position: `x = r·sinθ·cosφ`, `y = r·sinθ·sinφ`, `z = r·cosθ + height`.
    pub fn to_cartesian(&self) -> [f64; 3] {
        let (sin_t, cos_t) = self.theta.sin_cos();
        let (sin_p, cos_p) = self.phi.sin_cos();
        [
            self.radius * sin_t * cos_p,
            self.radius * sin_t * sin_p,
            self.radius * cos_t + self.height,
        ]
    }

    /// Euclidean distance between two points.
    pub fn distance_to(&self, other: &SphericalCoordinate) -> f64 {
        let a = self.to_cartesian();
        let b = other.to_cartesian();
        let dx = a[0] - b[0];
        let dy = a[1] - b[1];
        let dz = a[2] - b[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Quantized key suitable for ordered maps.
    pub fn key(&self) -> CoordKey {
        CoordKey::from(self)
    }
}

/// Wrap an azimuth into [0, 2π).
pub(crate) fn wrap_azimuth(phi: f64) -> f64 {
    let wrapped = phi.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= TAU { 0.0 } else { wrapped }
}

/// Integer-quantized coordinate, ordered lexicographically on
/// (radius, θ, φ, height).
///
/// Two coordinates that differ by less than one micro-unit in every
/// component map to the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoordKey {
    radius: i64,
    theta: i64,
    phi: i64,
    height: i64,
}

fn quantize(v: f64) -> i64 {
    (v * KEY_SCALE).round() as i64
}

impl From<&SphericalCoordinate> for CoordKey {
    fn from(c: &SphericalCoordinate) -> Self {
        CoordKey {
            radius: quantize(c.radius),
            theta: quantize(c.theta),
            phi: quantize(c.phi),
            height: quantize(c.height),
        }
    }
}

impl From<CoordKey> for SphericalCoordinate {
    fn from(k: CoordKey) -> Self {
        SphericalCoordinate {
            radius: k.radius as f64 / KEY_SCALE,
            theta: k.theta as f64 / KEY_SCALE,
            phi: k.phi as f64 / KEY_SCALE,
            height: k.height as f64 / KEY_SCALE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn cartesian_on_equator() {
        let c = SphericalCoordinate::new(2.0, FRAC_PI_2, 0.0, 1.0);
        let [x, y, z] = c.to_cartesian();
        assert!((x - 2.0).abs() < 1e-12);
        assert!(y.abs() < 1e-12);
        assert!((z - 1.0).abs() < 1e-12);
    }

    #[test]
    fn distance_is_symmetric_and_zero_to_self() {
        let a = SphericalCoordinate::new(3.0, 0.4, 1.2, 0.5);
        let b = SphericalCoordinate::new(1.0, 2.0, 4.0, 0.0);
        assert_eq!(a.distance_to(&a), 0.0);
        assert!((a.distance_to(&b) - b.distance_to(&a)).abs() < 1e-12);
    }

    #[test]
    fn height_offsets_vertical_axis() {
        let low = SphericalCoordinate::new(0.0, 0.0, 0.0, 0.0);
        let high = SphericalCoordinate::new(0.0, 0.0, 0.0, 4.0);
        assert!((low.distance_to(&high) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn normalized_wraps_and_clamps() {
        let c = SphericalCoordinate::new(-1.0, 4.0, -FRAC_PI_2, 2.0).normalized();
        assert_eq!(c.radius, 0.0);
        assert_eq!(c.theta, PI);
        assert!((c.phi - 3.0 * FRAC_PI_2).abs() < 1e-12);
        assert_eq!(c.height, 2.0);
        assert!(wrap_azimuth(TAU) < TAU);
        assert!(wrap_azimuth(-1e-18) < TAU);
    }

    #[test]
    fn nearby_coordinates_share_a_key() {
        let a = SphericalCoordinate::new(1.0, 0.5, 0.25, 0.0);
        let b = SphericalCoordinate::new(1.0 + 1e-9, 0.5, 0.25 - 1e-9, 0.0);
        assert_eq!(a.key(), b.key());

        let mut map = BTreeMap::new();
        map.insert(a.key(), 1);
        map.insert(b.key(), 2);
        assert_eq!(map.len(), 1);
        assert_eq!(map[&a.key()], 2);
    }

    #[test]
    fn keys_order_lexicographically() {
        let a = SphericalCoordinate::new(1.0, 3.0, 0.0, 0.0).key();
        let b = SphericalCoordinate::new(2.0, 0.0, 0.0, 0.0).key();
        let c = SphericalCoordinate::new(2.0, 0.0, 0.1, 0.0).key();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn key_converts_back() {
        let c = SphericalCoordinate::new(1.5, 0.75, 2.25, 0.5);
        let back = SphericalCoordinate::from(c.key());
        assert!((back.radius - 1.5).abs() < 1e-9);
        assert!((back.phi - 2.25).abs() < 1e-9);
    }
}
