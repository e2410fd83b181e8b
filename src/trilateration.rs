//! Trilateration (Zsombor-Murray) kinematic model.
//!
//! The mechanism is treated as an ideal delta robot. Shifting every knee by its ankle
//! offset turns forward kinematics into the intersection of three spheres of radius
//! `re`, solved through the Plücker line common to the pairwise radical planes.

extern crate nalgebra as na;

use na::Vector3;

use crate::errors::KinematicError;
use crate::geometry::falcon_geometry::TrilaterationGeometry;
use crate::kinematic_traits::{
    saturate_i16, ActuatorAngles, Encoders, FalconKinematic, Force, Position,
};

const DEGENERATE_EPSILON: f64 = 1e-18;

#[derive(Debug, Clone)]
pub struct TrilaterationKinematics {
    pub geometry: TrilaterationGeometry,
    /// Radial unit vector of each leg.
    directions: [Vector3<f64>; 3],
    hips: [Vector3<f64>; 3],
    ankles: [Vector3<f64>; 3],
}

impl TrilaterationKinematics {
    pub fn new(geometry: TrilaterationGeometry) -> Self {
        let half_sqrt3 = 3f64.sqrt() / 2.0;
        let directions = [
            Vector3::new(0.0, -1.0, 0.0),
            Vector3::new(half_sqrt3, 0.5, 0.0),
            Vector3::new(-half_sqrt3, 0.5, 0.0),
        ];
        // Inradius of the equilateral triangle
        let inradius = |side: f64| side / (2.0 * 3f64.sqrt());
        let hips = directions.map(|u| u * inradius(geometry.f));
        let ankles = directions.map(|u| u * inradius(geometry.e));

        TrilaterationKinematics { geometry, directions, hips, ankles }
    }

    /// Knee positions moved by the ankle offset, so the effector center lies at distance
    /// `re` from all three.
    fn virtual_knees(&self, angles: &ActuatorAngles) -> [Vector3<f64>; 3] {
        let rf = self.geometry.rf;
        std::array::from_fn(|leg| {
            let (sin_t, cos_t) = angles[leg].sin_cos();
            self.hips[leg] - self.ankles[leg]
                + self.directions[leg] * (rf * cos_t)
                + Vector3::new(0.0, 0.0, rf * sin_t)
        })
    }

    /// Both intersection points of the three spheres, the upper one first.
    pub fn candidates(&self, angles: &ActuatorAngles) -> Result<[Position; 2], KinematicError> {
        let [k0, k1, k2] = self.virtual_knees(angles);

        // Radical planes n·p = d of the sphere pairs (0,1) and (1,2)
        let n1 = k1 - k0;
        let d1 = (k1.norm_squared() - k0.norm_squared()) / 2.0;
        let n2 = k2 - k1;
        let d2 = (k2.norm_squared() - k1.norm_squared()) / 2.0;

        // Plücker coordinates (direction, moment) of the plane intersection line
        let direction = n1.cross(&n2);
        let p01 = direction.norm_squared();
        if p01 < DEGENERATE_EPSILON {
            return Err(KinematicError::OutOfWorkspace { leg: 3, reason: "knees are collinear" });
        }
        let moment = n1 * d2 - n2 * d1;
        let closest = direction.cross(&moment) / p01;

        // Line meets the sphere around the first knee
        let w = closest - k0;
        let b = direction.dot(&w);
        let c = w.norm_squared() - self.geometry.re * self.geometry.re;
        let discriminant = b * b - p01 * c;
        if discriminant < 0.0 {
            return Err(KinematicError::OutOfWorkspace { leg: 3, reason: "spheres do not intersect" });
        }
        let root = discriminant.sqrt();
        let first = closest + direction * ((-b + root) / p01);
        let second = closest + direction * ((-b - root) / p01);

        Ok(if first.z >= second.z { [first, second] } else { [second, first] })
    }

    /// Forward kinematics from actuated angles. Of the two intersections the upper one is
    /// taken; it must lie in the positive z half-space.
    pub fn forward(&self, angles: &ActuatorAngles) -> Result<Position, KinematicError> {
        let [upper, _] = self.candidates(angles)?;
        if upper.z <= 0.0 {
            return Err(KinematicError::OutOfWorkspace { leg: 3, reason: "no solution with positive z" });
        }
        Ok(upper)
    }

    fn leg_angle(&self, leg: usize, position: &Position) -> Result<f64, KinematicError> {
        let g = &self.geometry;
        let direction = self.directions[leg];
        let lateral_direction = direction.cross(&Vector3::new(0.0, 0.0, 1.0));

        let relative = position + self.ankles[leg] - self.hips[leg];
        let radial = relative.dot(&direction);
        let lateral = relative.dot(&lateral_direction);
        let height = relative.z;

        // rf·(radial·cos θ + height·sin θ) = k, solved with s = tan(θ/2)
        let k = (g.rf * g.rf + radial * radial + lateral * lateral + height * height - g.re * g.re)
            / (2.0 * g.rf);
        let a = k + radial;
        let b = -2.0 * height;
        let c = k - radial;

        let t = if a.abs() < 1e-12 {
            if b.abs() < 1e-12 {
                return Err(KinematicError::OutOfWorkspace { leg, reason: "degenerate leg" });
            }
            -c / b
        } else {
            let discriminant = b * b - 4.0 * a * c;
            if discriminant < 0.0 {
                return Err(KinematicError::OutOfWorkspace { leg, reason: "no real arm angle" });
            }
            let root = discriminant.sqrt();
            let t1 = (-b + root) / (2.0 * a);
            let t2 = (-b - root) / (2.0 * a);
            // Knee out, the assembly mode of the device
            if t1.abs() <= t2.abs() { t1 } else { t2 }
        };
        Ok(2.0 * t.atan())
    }
}

impl FalconKinematic for TrilaterationKinematics {
    fn initialize(&mut self) {}

    fn angles(&self, position: &Position) -> Result<ActuatorAngles, KinematicError> {
        Ok([
            self.leg_angle(0, position)?,
            self.leg_angle(1, position)?,
            self.leg_angle(2, position)?,
        ])
    }

    fn position(&mut self, encoders: &Encoders) -> Result<Position, KinematicError> {
        let angles = encoders.map(|encoder| self.encoder_to_angle(encoder));
        self.forward(&angles)
    }

    fn forces(&self, _position: &Position, _force: &Force) -> Result<Encoders, KinematicError> {
        Err(KinematicError::NotImplemented("trilateration force mapping"))
    }

    fn workspace_origin(&self) -> Position {
        // All arms at the encoder center
        let theta = self.encoder_to_angle(0);
        let z = self.geometry.symmetric_height(theta).unwrap_or(self.geometry.re);
        Position::new(0.0, 0.0, z)
    }

    fn encoder_to_angle(&self, encoder: i16) -> f64 {
        let g = &self.geometry;
        ((encoder as f64 - g.encoder_zero) / g.encoder_span * 90.0).to_radians()
    }

    fn angle_to_encoder(&self, angle: f64) -> i16 {
        let g = &self.geometry;
        saturate_i16(angle.to_degrees() / 90.0 * g.encoder_span + g.encoder_zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn falcon() -> TrilaterationKinematics {
        TrilaterationKinematics::new(TrilaterationGeometry::novint_falcon())
    }

    #[test]
    fn test_reference_position() {
        let robot = falcon();
        let position = robot.forward(&[0.3, 0.3, 0.3]).unwrap();
        assert!(position.x.abs() < 1e-12);
        assert!(position.y.abs() < 1e-12);
        assert!((position.z - 0.11192681754880379).abs() < 1e-9);

        // Hand formula for equal angles
        let (rf, re) = (4.0 * 0.0254, 5.0 * 0.0254);
        let expected = rf * 0.3f64.sin() + (re * re - (rf * 0.3f64.cos()).powi(2)).sqrt();
        assert!((position.z - expected).abs() < 1e-9);
    }

    #[test]
    fn test_other_branch_is_below() {
        let [upper, lower] = falcon().candidates(&[0.3, 0.3, 0.3]).unwrap();
        assert!(upper.z > 0.0);
        assert!((lower.z + 0.0518771).abs() < 1e-6);
    }

    #[test]
    fn test_inverse_matches_forward() {
        let robot = falcon();
        for angles in [[0.1, 0.4, 0.2], [0.5, 0.2, 0.3], [-0.2, 0.1, 0.6], [0.3, 0.3, 0.3]] {
            let position = robot.forward(&angles).unwrap();
            let recovered = robot.angles(&position).unwrap();
            for leg in 0..3 {
                assert!((recovered[leg] - angles[leg]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_unreachable_position() {
        let result = falcon().angles(&Position::new(0.0, 0.0, 1.0));
        assert!(matches!(result, Err(KinematicError::OutOfWorkspace { .. })));
    }

    #[test]
    fn test_encoder_map() {
        let robot = falcon();
        assert!((robot.encoder_to_angle(-2000)).abs() < 1e-12);
        assert!((robot.encoder_to_angle(2000) - 90f64.to_radians()).abs() < 1e-12);
        assert_eq!(robot.angle_to_encoder(45f64.to_radians()), 0);
    }

    #[test]
    fn test_forces_not_implemented() {
        let robot = falcon();
        let result = robot.forces(&robot.workspace_origin(), &Force::new(0.0, 0.0, 1.0));
        assert!(matches!(result, Err(KinematicError::NotImplemented(_))));
    }

    #[test]
    fn test_workspace_origin_round_trip() {
        let mut robot = falcon();
        let origin = robot.workspace_origin();
        let position = robot.position(&[0, 0, 0]).unwrap();
        assert!((position - origin).norm() < 1e-9);
    }
}
