#[cfg(test)]
mod tests {
    extern crate rand;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::geometry::falcon_geometry::StamperGeometry;
    use crate::kinematic_traits::{FalconKinematic, Force, Position};
    use crate::stamper::{StamperKinematics, FORCE_GAIN, MAX_FORCE_COMMAND};

    #[test]
    fn test_large_forces_keep_direction() {
        let robot = StamperKinematics::new(StamperGeometry::novint_falcon());
        let mut rng = StdRng::seed_from_u64(2024);

        let mut saturated = 0;
        for _ in 0..300 {
            let position = Position::new(
                rng.gen_range(-0.025..0.025),
                rng.gen_range(-0.025..0.025),
                rng.gen_range(0.10..0.15),
            );
            let force = Force::new(
                rng.gen_range(-200.0..200.0),
                rng.gen_range(-200.0..200.0),
                rng.gen_range(-200.0..200.0),
            );

            let commands = robot.forces(&position, &force).unwrap();
            for command in commands {
                assert!((command as f64).abs() <= MAX_FORCE_COMMAND);
            }

            let angles = robot.joint_angles(&position).unwrap();
            let torques = -FORCE_GAIN * robot.jacobian(&angles).unwrap().torques(&force).unwrap();
            let largest = torques.amax();
            let scale = if largest > MAX_FORCE_COMMAND {
                saturated += 1;
                MAX_FORCE_COMMAND / largest
            } else {
                1.0
            };
            for leg in 0..3 {
                let expected = torques[leg] * scale;
                assert!(
                    (commands[leg] as f64 - expected).abs() <= 1.0,
                    "leg {}: {} vs {:.2}",
                    leg,
                    commands[leg],
                    expected
                );
            }
        }
        // The force range is chosen so that most cases saturate
        assert!(saturated > 0);
    }

    #[test]
    fn test_zero_force_is_zero_command() {
        let robot = StamperKinematics::new(StamperGeometry::novint_falcon());
        let commands = robot.forces(&robot.workspace_origin(), &Force::zeros()).unwrap();
        assert_eq!(commands, [0, 0, 0]);
    }
}
