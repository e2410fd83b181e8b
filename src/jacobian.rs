extern crate nalgebra as na;
use na::{Matrix3, Vector3};
use crate::errors::KinematicError;
use crate::geometry::falcon_geometry::StamperGeometry;
use crate::kinematic_traits::{FalconKinematic, JointAngles, Position};

/// Below this magnitude a leg (or the whole Jacobian) is treated as singular.
const SINGULARITY_EPSILON: f64 = 1e-9;

/// Velocity Jacobian of the Stamper model
pub struct Jacobian {
    /// A 3x3 matrix mapping end-effector velocity to actuated angle rates
    ///
    /// Row `i` belongs to leg `i`, column `j` to the Cartesian axis `j`, so
    /// `dθ1 = matrix * dp`. It is assembled as `J_I⁻¹ · J_F` where `J_F` relates the
    /// effector velocity to the passive joint rates and `J_I` is the diagonal actuator part.
    matrix: Matrix3<f64>,
}

impl Jacobian {
    /// Constructs the Jacobian for the given geometry and full joint state
    ///
    /// # Arguments
    ///
    /// * `geometry` - Stamper link lengths and leg azimuths
    /// * `angles` - Joint state as returned by inverse kinematics for the position of interest
    ///
    /// # Returns
    ///
    /// The Jacobian, or `OutOfWorkspace` naming the first leg with a singular actuator term.
    pub fn new(geometry: &StamperGeometry, angles: &JointAngles) -> Result<Self, KinematicError> {
        let effector = effector_jacobian(geometry, angles);
        let actuator = actuator_jacobian(geometry, angles);

        let mut actuator_inverse = Matrix3::zeros();
        for leg in 0..3 {
            let term = actuator[(leg, leg)];
            if term.abs() < SINGULARITY_EPSILON {
                return Err(KinematicError::OutOfWorkspace {
                    leg,
                    reason: "singular actuator Jacobian",
                });
            }
            actuator_inverse[(leg, leg)] = 1.0 / term;
        }

        Ok(Self { matrix: actuator_inverse * effector })
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Actuated angle rates produced by the given end-effector velocity.
    pub fn angle_rates(&self, velocity: &Vector3<f64>) -> Vector3<f64> {
        self.matrix * velocity
    }

    /// Computes the end-effector velocity produced by the given actuated angle rates
    ///
    /// # Arguments
    ///
    /// * `angle_rates` - Rates (or small increments) of the three actuated angles
    ///
    /// # Returns
    ///
    /// The Cartesian velocity (or displacement), or `OutOfWorkspace` if the Jacobian
    /// cannot be inverted. The forward kinematics solver uses this as its Newton step.
    pub fn velocities(&self, angle_rates: &Vector3<f64>) -> Result<Vector3<f64>, KinematicError> {
        Ok(self.inverse()? * angle_rates)
    }

    /// Computes the actuator torques that balance a force applied at the end effector
    ///
    /// # Arguments
    ///
    /// * `force` - Cartesian force in newtons
    ///
    /// # Returns
    ///
    /// Torques of the three actuated joints. From virtual work, `F·dp = τ·dθ` with
    /// `dp = J⁻¹ dθ`, so `τ = (J⁻¹)ᵀ F`.
    pub fn torques(&self, force: &Vector3<f64>) -> Result<Vector3<f64>, KinematicError> {
        Ok(self.inverse()?.transpose() * force)
    }

    fn inverse(&self) -> Result<Matrix3<f64>, KinematicError> {
        if self.matrix.determinant().abs() < SINGULARITY_EPSILON {
            return Err(KinematicError::OutOfWorkspace { leg: 3, reason: "singular Jacobian" });
        }
        self.matrix
            .try_inverse()
            .ok_or(KinematicError::OutOfWorkspace { leg: 3, reason: "singular Jacobian" })
    }
}

/// Effector part `J_F`, one row per leg.
pub fn effector_jacobian(geometry: &StamperGeometry, angles: &JointAngles) -> Matrix3<f64> {
    let mut j_f = Matrix3::zeros();
    for leg in 0..3 {
        let (sin_phi, cos_phi) = geometry.leg_azimuths[leg].sin_cos();
        let (sin_t2, cos_t2) = angles.theta2[leg].sin_cos();
        let (sin_t3, cos_t3) = angles.theta3[leg].sin_cos();

        j_f[(leg, 0)] = cos_t2 * sin_t3 * cos_phi - cos_t3 * sin_phi;
        j_f[(leg, 1)] = cos_t3 * cos_phi + cos_t2 * sin_t3 * sin_phi;
        j_f[(leg, 2)] = sin_t2 * sin_t3;
    }
    j_f
}

/// Actuator part `J_I`, diagonal.
pub fn actuator_jacobian(geometry: &StamperGeometry, angles: &JointAngles) -> Matrix3<f64> {
    let mut j_i = Matrix3::zeros();
    for leg in 0..3 {
        j_i[(leg, leg)] = geometry.a
            * (angles.theta2[leg] - angles.theta1[leg]).sin()
            * angles.theta3[leg].sin();
    }
    j_i
}

/// Function to compute the Jacobian of any kinematic model by finite differences of
/// its inverse kinematics
///
/// # Arguments
///
/// * `robot` - The kinematic model
/// * `position` - Where to evaluate
/// * `epsilon` - Displacement along each axis, meters
///
/// # Returns
///
/// Matrix mapping end-effector displacement to actuated angle change
pub fn compute_jacobian(
    robot: &impl FalconKinematic,
    position: &Position,
    epsilon: f64,
) -> Result<Matrix3<f64>, KinematicError> {
    let base = robot.angles(position)?;
    let mut matrix = Matrix3::zeros();

    for axis in 0..3 {
        let mut displaced = *position;
        displaced[axis] += epsilon;
        let angles = robot.angles(&displaced)?;
        for leg in 0..3 {
            matrix[(leg, axis)] = (angles[leg] - base[leg]) / epsilon;
        }
    }
    Ok(matrix)
}
