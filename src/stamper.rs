//! Stamper kinematic model of the Falcon parallel-delta mechanism.
//!
//! Inverse kinematics is closed form, one quadratic in `tan(θ1/2)` per leg. Forward
//! kinematics has no closed form and is solved by Newton iteration through the Jacobian.

extern crate nalgebra as na;

use na::Vector3;
use tracing::warn;

use crate::errors::KinematicError;
use crate::geometry::falcon_geometry::StamperGeometry;
use crate::jacobian::Jacobian;
use crate::kinematic_traits::{
    saturate_i16, ActuatorAngles, Encoders, FalconKinematic, Force, JointAngles, Position,
};
use crate::utils::is_valid;

/// Newton iterations before the forward solver gives up and returns its best estimate.
pub const MAX_ITERATIONS: usize = 10;

/// Per-axis angle residual below which the forward solution is accepted.
pub const EPSILON_ANGLE: f64 = 0.05 * std::f64::consts::PI / 180.0;

/// Shortest Newton step fraction tried before giving up at the workspace boundary.
const MIN_STEP: f64 = 1e-3;

/// Motor units per newton-meter of joint torque. Matches the stock driver output.
pub const FORCE_GAIN: f64 = 10000.0;

/// Largest force command the firmware accepts.
pub const MAX_FORCE_COMMAND: f64 = 4095.0;

/// Result of the forward solver. A solution that did not converge is still the best
/// available estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForwardSolution {
    pub position: Position,
    pub iterations: usize,
    pub converged: bool,
    /// Largest remaining per-leg angle error, radians.
    pub residual: f64,
}

#[derive(Debug, Clone)]
pub struct StamperKinematics {
    pub geometry: StamperGeometry,
    /// Warm start of the forward solver.
    last_position: Position,
}

impl StamperKinematics {
    pub fn new(geometry: StamperGeometry) -> Self {
        let last_position = Position::new(0.0, 0.0, geometry.origin_z);
        StamperKinematics { geometry, last_position }
    }

    /// Full inverse kinematics: all three angles of every leg.
    pub fn joint_angles(&self, position: &Position) -> Result<JointAngles, KinematicError> {
        let mut angles = JointAngles {
            theta1: [0.0; 3],
            theta2: [0.0; 3],
            theta3: [0.0; 3],
        };
        for leg in 0..3 {
            let (theta1, theta2, theta3) = self.leg_angles(leg, position)?;
            angles.theta1[leg] = theta1;
            angles.theta2[leg] = theta2;
            angles.theta3[leg] = theta3;
        }
        Ok(angles)
    }

    fn leg_angles(&self, leg: usize, position: &Position) -> Result<(f64, f64, f64), KinematicError> {
        let g = &self.geometry;
        let (sin_phi, cos_phi) = g.leg_azimuths[leg].sin_cos();
        let (x, y, z) = (position.x, position.y, position.z);

        // Leg-local frame
        let pu = -g.r + cos_phi * x + sin_phi * y;
        let pv = -(g.s - cos_phi * y + sin_phi * x);
        let pw = z;

        let arg3 = (pv + g.f) / g.b;
        if !arg3.is_finite() || arg3.abs() > 1.0 {
            return Err(KinematicError::OutOfWorkspace { leg, reason: "theta3 out of range" });
        }
        let theta3 = arg3.acos();
        let sin_t3 = theta3.sin();

        let common = pw * pw + pu * pu + 2.0 * g.c * pu + g.a * g.a + g.c * g.c
            - g.d * g.d
            - g.e * g.e
            - g.b * g.b * sin_t3 * sin_t3
            - 2.0 * g.b * g.e * sin_t3
            - 2.0 * g.b * g.d * sin_t3
            - 2.0 * g.d * g.e;
        let l0 = common - 2.0 * g.a * pu - 2.0 * g.a * g.c;
        let l1 = -4.0 * g.a * pw;
        let l2 = common + 2.0 * g.a * pu + 2.0 * g.a * g.c;

        let discriminant = l1 * l1 - 4.0 * l2 * l0;
        if discriminant < 0.0 || l2 == 0.0 {
            return Err(KinematicError::OutOfWorkspace { leg, reason: "no real theta1" });
        }
        let t = -(discriminant.sqrt() + l1) / (2.0 * l2);
        let theta1 = 2.0 * t.atan();

        let arg2 = -(g.a * theta1.cos() - g.c - pu) / (g.b * sin_t3 + g.d + g.e);
        if !arg2.is_finite() || arg2.abs() > 1.0 {
            return Err(KinematicError::OutOfWorkspace { leg, reason: "theta2 out of range" });
        }
        let theta2 = arg2.acos();

        Ok((theta1, theta2, theta3))
    }

    pub fn jacobian(&self, angles: &JointAngles) -> Result<Jacobian, KinematicError> {
        Jacobian::new(&self.geometry, angles)
    }

    /// Forward kinematics by Newton iteration from `guess`. The step is halved whenever
    /// the residual grows, and a step that would leave the workspace is shortened until
    /// it does not. Fails only on a guess outside the workspace or a non-finite target;
    /// running out of iterations (or into a singularity) returns the last valid estimate
    /// with `converged` unset.
    pub fn forward(&self, target: &ActuatorAngles, guess: &Position) -> Result<ForwardSolution, KinematicError> {
        if !is_valid(target) {
            return Err(KinematicError::OutOfWorkspace { leg: 3, reason: "target angles not finite" });
        }
        let target = Vector3::from(*target);
        let mut position = *guess;
        let mut angles = self.joint_angles(&position)?;
        let mut step = 1.0;
        let mut previous_error = f64::INFINITY;
        let mut iterations = 0;

        while iterations < MAX_ITERATIONS {
            let residual = target - Vector3::from(angles.theta1);
            let worst = residual.amax();
            if worst < EPSILON_ANGLE {
                return Ok(ForwardSolution { position, iterations, converged: true, residual: worst });
            }

            let error = residual.norm();
            if error > previous_error {
                step /= 2.0;
            }
            previous_error = error;

            let delta = match self.jacobian(&angles).and_then(|jacobian| jacobian.velocities(&residual)) {
                Ok(delta) => delta,
                Err(_) => break,
            };
            match self.step_inside(&position, &delta, step) {
                Some((next, next_angles, taken)) => {
                    position = next;
                    angles = next_angles;
                    step = taken;
                }
                None => break,
            }
            iterations += 1;
        }

        let worst = (target - Vector3::from(angles.theta1)).amax();
        Ok(ForwardSolution {
            position,
            iterations,
            converged: worst < EPSILON_ANGLE,
            residual: worst,
        })
    }

    /// Longest step along `delta`, at most `step`, that stays inside the workspace.
    fn step_inside(&self, position: &Position, delta: &Vector3<f64>, step: f64) -> Option<(Position, JointAngles, f64)> {
        let mut step = step;
        while step > MIN_STEP {
            let candidate = *position + *delta * step;
            if let Ok(angles) = self.joint_angles(&candidate) {
                return Some((candidate, angles, step));
            }
            step /= 2.0;
        }
        None
    }
}

impl FalconKinematic for StamperKinematics {
    fn initialize(&mut self) {
        self.last_position = self.workspace_origin();
    }

    fn angles(&self, position: &Position) -> Result<ActuatorAngles, KinematicError> {
        Ok(self.joint_angles(position)?.theta1)
    }

    fn position(&mut self, encoders: &Encoders) -> Result<Position, KinematicError> {
        let target = encoders.map(|encoder| self.encoder_to_angle(encoder));

        // The warm start may be stale after a jump, retry from the origin.
        let solution = match self.forward(&target, &self.last_position) {
            Ok(solution) if solution.converged => solution,
            _ => self.forward(&target, &self.workspace_origin())?,
        };
        if !solution.converged {
            warn!(
                "Forward kinematics did not converge for {:?}, residual {:.4} deg",
                encoders,
                solution.residual.to_degrees()
            );
        }
        self.last_position = solution.position;
        Ok(solution.position)
    }

    fn forces(&self, position: &Position, force: &Force) -> Result<Encoders, KinematicError> {
        let angles = self.joint_angles(position)?;
        let torques = -FORCE_GAIN * self.jacobian(&angles)?.torques(force)?;

        // Scale the whole vector so the direction survives saturation.
        let largest = torques.amax();
        let torques = if largest > MAX_FORCE_COMMAND {
            torques * (MAX_FORCE_COMMAND / largest)
        } else {
            torques
        };

        Ok(std::array::from_fn(|leg| {
            saturate_i16(torques[leg].clamp(-MAX_FORCE_COMMAND, MAX_FORCE_COMMAND))
        }))
    }

    fn workspace_origin(&self) -> Position {
        Position::new(0.0, 0.0, self.geometry.origin_z)
    }

    fn encoder_to_angle(&self, encoder: i16) -> f64 {
        let degrees = self.geometry.degrees_per_count() * encoder as f64
            + self.geometry.theta_offset.to_degrees();
        degrees.to_radians()
    }

    fn angle_to_encoder(&self, angle: f64) -> i16 {
        let counts = (angle.to_degrees() - self.geometry.theta_offset.to_degrees())
            / self.geometry.degrees_per_count();
        saturate_i16(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn falcon() -> StamperKinematics {
        StamperKinematics::new(StamperGeometry::novint_falcon())
    }

    #[test]
    fn test_origin_is_symmetric() {
        let angles = falcon().joint_angles(&Position::new(0.0, 0.0, 0.150)).unwrap();
        for leg in 0..3 {
            assert!((angles.theta1[leg].to_degrees() - 47.2433).abs() < 1e-3);
        }
    }

    #[test]
    fn test_theta3_out_of_range() {
        // Far off to the side, (pv + f) / b leaves [-1, 1] for at least one leg.
        let result = falcon().joint_angles(&Position::new(0.5, 0.0, 0.12));
        assert!(matches!(result, Err(KinematicError::OutOfWorkspace { .. })));
    }

    #[test]
    fn test_unreachable_height() {
        let result = falcon().joint_angles(&Position::new(0.0, 0.0, 0.5));
        assert!(matches!(result, Err(KinematicError::OutOfWorkspace { .. })));
    }

    #[test]
    fn test_forward_recovers_position() {
        let robot = falcon();
        let expected = Position::new(0.012, -0.018, 0.118);
        let target = robot.angles(&expected).unwrap();
        let solution = robot.forward(&target, &robot.workspace_origin()).unwrap();
        assert!(solution.converged);
        assert!(solution.iterations <= MAX_ITERATIONS);
        assert!((solution.position - expected).norm() < 1e-3);
    }

    #[test]
    fn test_forward_rejects_non_finite_target() {
        let robot = falcon();
        let result = robot.forward(&[0.8, f64::NAN, 0.8], &robot.workspace_origin());
        assert!(matches!(result, Err(KinematicError::OutOfWorkspace { leg: 3, .. })));
    }

    #[test]
    fn test_encoder_conversion() {
        let robot = falcon();
        assert!((robot.encoder_to_angle(0) - 35.0_f64.to_radians()).abs() < 1e-12);
        for encoder in [-1046, -4, 0, 336, 1025] {
            assert_eq!(robot.angle_to_encoder(robot.encoder_to_angle(encoder)), encoder);
        }
    }

    #[test]
    fn test_position_from_encoders() {
        let mut robot = falcon();
        let expected = Position::new(-0.01, 0.015, 0.13);
        let encoders = robot.encoders(&expected).unwrap();
        let position = robot.position(&encoders).unwrap();
        // Encoder quantization is about 0.04 degrees.
        assert!((position - expected).norm() < 1e-3);

        // Warm start from there
        let position = robot.position(&encoders).unwrap();
        assert!((position - expected).norm() < 1e-3);
    }

    #[test]
    fn test_forces_are_clamped_and_keep_direction() {
        let robot = falcon();
        let position = robot.workspace_origin();
        let small = robot.forces(&position, &Force::new(0.0, 0.0, 0.5)).unwrap();
        let huge = robot.forces(&position, &Force::new(0.0, 0.0, 5000.0)).unwrap();

        assert!(huge.iter().all(|&f| (-4095..=4095).contains(&f)));
        assert!(huge.iter().any(|&f| f.abs() == 4095));
        for leg in 0..3 {
            assert_eq!(small[leg].signum(), huge[leg].signum());
        }
    }

    #[test]
    fn test_forces_zero_for_zero_force() {
        let robot = falcon();
        let forces = robot.forces(&Position::new(0.01, 0.01, 0.12), &Force::zeros()).unwrap();
        assert_eq!(forces, [0, 0, 0]);
    }
}
