#[cfg(test)]
mod tests {
    extern crate rand;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::geometry::falcon_geometry::TrilaterationGeometry;
    use crate::kinematic_traits::FalconKinematic;
    use crate::trilateration::TrilaterationKinematics;

    #[test]
    fn test_angles_round_trip() {
        let robot = TrilaterationKinematics::new(TrilaterationGeometry::novint_falcon());
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..1000 {
            let angles = [
                rng.gen_range(0.0..0.6),
                rng.gen_range(0.0..0.6),
                rng.gen_range(0.0..0.6),
            ];
            let position = robot.forward(&angles).unwrap();
            assert!(position.z > 0.0);

            let back = robot.angles(&position).unwrap();
            for leg in 0..3 {
                assert!(
                    (back[leg] - angles[leg]).abs() < 1e-6,
                    "leg {}: {:?} came back as {:?}",
                    leg,
                    angles,
                    back
                );
            }
        }
    }

    #[test]
    fn test_encoders_round_trip() {
        let mut robot = TrilaterationKinematics::new(TrilaterationGeometry::novint_falcon());
        let mut rng = StdRng::seed_from_u64(12);

        for _ in 0..200 {
            let encoders = [
                rng.gen_range(-2000..-700),
                rng.gen_range(-2000..-700),
                rng.gen_range(-2000..-700),
            ];
            let position = robot.position(&encoders).unwrap();
            assert_eq!(robot.encoders(&position).unwrap(), encoders);
        }
    }
}
