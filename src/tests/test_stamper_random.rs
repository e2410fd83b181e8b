#[cfg(test)]
mod tests {
    extern crate rand;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::geometry::falcon_geometry::StamperGeometry;
    use crate::kinematic_traits::{FalconKinematic, Position};
    use crate::stamper::{StamperKinematics, MAX_ITERATIONS};
    use crate::utils::{assert_position_eq, dump_position};

    const CASES: usize = 500;

    fn random_position(rng: &mut StdRng) -> Position {
        Position::new(
            rng.gen_range(-0.03..0.03),
            rng.gen_range(-0.03..0.03),
            rng.gen_range(0.095..0.155),
        )
    }

    #[test]
    fn test_forward_from_origin_recovers_position() {
        let robot = StamperKinematics::new(StamperGeometry::novint_falcon());
        let origin = robot.workspace_origin();
        let mut rng = StdRng::seed_from_u64(42);

        let mut within = 0;
        for _ in 0..CASES {
            let position = random_position(&mut rng);
            let angles = robot.angles(&position).expect("inside the workspace");
            let solution = robot.forward(&angles, &origin).expect("forward solution");

            assert!(solution.iterations <= MAX_ITERATIONS);
            if (solution.position - position).norm() < 1e-3 {
                within += 1;
            } else {
                println!("Missed, expected and found:");
                dump_position(&position);
                dump_position(&solution.position);
            }
        }
        assert!(within * 100 >= CASES * 95, "only {} of {} within 1 mm", within, CASES);
    }

    #[test]
    fn test_encoder_walk() {
        // Small steps like a hand moving the grip, solved through the warm start
        let mut robot = StamperKinematics::new(StamperGeometry::novint_falcon());
        let mut rng = StdRng::seed_from_u64(7);
        let mut position = robot.workspace_origin();

        for _ in 0..CASES {
            let step = Position::new(
                rng.gen_range(-0.002..0.002),
                rng.gen_range(-0.002..0.002),
                rng.gen_range(-0.002..0.002),
            );
            let next = position + step;
            if next.x.abs() > 0.03 || next.y.abs() > 0.03 || next.z < 0.095 || next.z > 0.155 {
                continue;
            }
            position = next;

            let encoders = robot.encoders(&position).unwrap();
            let solved = robot.position(&encoders).unwrap();
            assert_position_eq(&solved, &position, 1e-3);
        }
    }

    #[test]
    fn test_positions_near_the_boundary() {
        // Well outside the nominal cube, where a full Newton step may leave the workspace
        let mut robot = StamperKinematics::new(StamperGeometry::novint_falcon());
        let mut rng = StdRng::seed_from_u64(11);

        let mut reachable = 0;
        let mut within = 0;
        for _ in 0..CASES * 4 {
            let position = Position::new(
                rng.gen_range(-0.048..0.048),
                rng.gen_range(-0.048..0.048),
                rng.gen_range(0.075..0.175),
            );
            let Ok(encoders) = robot.encoders(&position) else {
                continue;
            };
            reachable += 1;

            robot.initialize();
            let solved = robot.position(&encoders).expect("valid encoder state");
            assert!(robot.angles(&solved).is_ok());
            if (solved - position).norm() < 1e-3 {
                within += 1;
            }
        }
        assert!(reachable > CASES);
        assert!(within * 100 >= reachable * 95, "only {} of {} within 1 mm", within, reachable);
    }

    #[test]
    fn test_far_positions_are_rejected() {
        let robot = StamperKinematics::new(StamperGeometry::novint_falcon());
        for position in [
            Position::new(0.0, 0.0, 1.0),
            Position::new(1.0, 0.0, 0.15),
            Position::new(0.0, -1.0, 0.15),
        ] {
            assert!(robot.angles(&position).is_err(), "{:?} accepted", position);
        }
    }
}
