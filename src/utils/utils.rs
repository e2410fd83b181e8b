//! Helper functions

use crate::kinematic_traits::{ActuatorAngles, Encoders, JointAngles, Position};

/// Checks if all elements in the array are finite
pub fn is_valid(angles: &ActuatorAngles) -> bool {
    angles.iter().all(|&q| q.is_finite())
}

/// Print actuated angles, converting radians to degrees.
#[allow(dead_code)]
pub fn dump_angles(angles: &ActuatorAngles) {
    let mut row_str = String::new();
    for leg in 0..3 {
        row_str.push_str(&format!("{:6.2} ", angles[leg].to_degrees()));
    }
    println!("[{}]", row_str.trim_end());
}

/// Print the full joint state, one leg per row, in degrees.
#[allow(dead_code)]
pub fn dump_joint_angles(angles: &JointAngles) {
    for leg in 0..3 {
        println!(
            "leg {}: theta1 {:6.2} theta2 {:6.2} theta3 {:6.2}",
            leg + 1,
            angles.theta1[leg].to_degrees(),
            angles.theta2[leg].to_degrees(),
            angles.theta3[leg].to_degrees()
        );
    }
}

#[allow(dead_code)]
pub fn dump_encoders(encoders: &Encoders) {
    println!("[{:6} {:6} {:6}]", encoders[0], encoders[1], encoders[2]);
}

/// Position in millimeters, which is easier to read for a desktop device.
pub fn dump_position(position: &Position) {
    println!(
        "x: {:8.3} mm, y: {:8.3} mm, z: {:8.3} mm",
        position.x * 1000.0,
        position.y * 1000.0,
        position.z * 1000.0
    );
}

/// formatting for YAML output
pub(crate) fn deg(x: &f64) -> String {
    if *x == 0.0 {
        return "0".to_string();
    }
    format!("deg({:.4})", x.to_degrees())
}

/// Parses the `deg(..)` notation produced by [`deg`] back into radians.
/// Plain numbers are taken as radians.
#[allow(dead_code)]
pub(crate) fn parse_angle(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Some(inner) = text.strip_prefix("deg(").and_then(|t| t.strip_suffix(')')) {
        return inner.trim().parse::<f64>().ok().map(f64::to_radians);
    }
    text.parse::<f64>().ok()
}

pub fn assert_position_eq(a: &Position, b: &Position, distance_tolerance: f64) -> bool {
    let distance = (a - b).norm();
    if distance > distance_tolerance {
        dump_position(a);
        dump_position(b);
        panic!("Positions are {:.6} m apart, tolerance {:.6}", distance, distance_tolerance);
    }
    true
}
