//! Shared kinematic types and the contract every Falcon kinematic model implements.

extern crate nalgebra as na;

use na::Vector3;
use crate::errors::KinematicError;

/// End-effector position in meters, in the frame of the mechanism base.
/// ```
/// extern crate nalgebra as na;
/// use na::Vector3;
///
/// type Position = Vector3<f64>;
///
/// // Center of the Stamper workspace
/// let origin = Position::new(0.0, 0.0, 0.150);
/// ```
pub type Position = Vector3<f64>;

/// Force applied to the end effector, in newtons.
pub type Force = Vector3<f64>;

/// Raw signed encoder ticks, one per motor. Also used for motor force commands
/// that travel in the same 16 bit slots of the wire frame.
pub type Encoders = [i16; 3];

/// Actuated (motor driven) angle of each leg, radians.
pub type ActuatorAngles = [f64; 3];

/// Full joint state of the three legs, radians. `theta1` is the actuated angle,
/// `theta2` and `theta3` are the passive parallelogram angles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointAngles {
    pub theta1: [f64; 3],
    pub theta2: [f64; 3],
    pub theta3: [f64; 3],
}

/// Kinematic model of the Falcon. Implementations are selected when the device is
/// built and are used from the IO thread only.
pub trait FalconKinematic: Send {
    /// Resets any state carried between calls, like the forward solver warm start.
    fn initialize(&mut self);

    /// Inverse kinematics: actuated angles for the given position.
    fn angles(&self, position: &Position) -> Result<ActuatorAngles, KinematicError>;

    /// Forward kinematics from raw encoder values.
    fn position(&mut self, encoders: &Encoders) -> Result<Position, KinematicError>;

    /// Motor force command producing the given Cartesian force at the given position.
    fn forces(&self, position: &Position, force: &Force) -> Result<Encoders, KinematicError>;

    /// Position of the workspace center.
    fn workspace_origin(&self) -> Position;

    /// Angle of the actuated arm, radians, for a raw encoder value.
    fn encoder_to_angle(&self, encoder: i16) -> f64;

    /// Nearest encoder value for the actuated arm angle.
    fn angle_to_encoder(&self, angle: f64) -> i16;

    /// Encoder values the device would report at this position.
    fn encoders(&self, position: &Position) -> Result<Encoders, KinematicError> {
        let angles = self.angles(position)?;
        Ok(angles.map(|angle| self.angle_to_encoder(angle)))
    }
}

/// Rounds and saturates to the i16 range.
pub(crate) fn saturate_i16(value: f64) -> i16 {
    value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}
