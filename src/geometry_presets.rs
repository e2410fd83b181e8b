//! Hardcoded geometry of the Novint Falcon

pub mod falcon_geometry {
    use crate::geometry::falcon_geometry::{StamperGeometry, TrilaterationGeometry};
    use std::f64::consts::PI;

    /// Leg azimuths are rotated by this angle from the ideal 120 degree layout.
    const LEG_OFFSET_ANGLE: f64 = PI / 12.0;

    const INCH: f64 = 0.0254;

    impl StamperGeometry {
        /// Measured on the Novint Falcon.
        pub fn novint_falcon() -> Self {
            StamperGeometry {
                a: 0.060,
                b: 0.1025,
                c: 0.01443,
                d: 0.01125,
                e: 0.01125,
                f: -0.025,
                r: 0.0400,
                s: -0.02309,
                leg_azimuths: [
                    PI / 2.0 + LEG_OFFSET_ANGLE,
                    -PI / 6.0 + LEG_OFFSET_ANGLE,
                    -5.0 * PI / 6.0 + LEG_OFFSET_ANGLE,
                ],
                wheel_slots: 320.0,
                shaft_diameter: 0.01425,
                small_arm_diameter: 0.110,
                theta_offset: 35.0_f64.to_radians(),
                origin_z: 0.150,
            }
        }
    }

    impl Default for StamperGeometry {
        fn default() -> Self {
            Self::novint_falcon()
        }
    }

    impl TrilaterationGeometry {
        /// Approximate Falcon proportions expressed as an ideal delta robot.
        pub fn novint_falcon() -> Self {
            TrilaterationGeometry {
                f: 3.0 * INCH,
                e: 3.0 * INCH,
                re: 5.0 * INCH,
                rf: 4.0 * INCH,
                encoder_zero: -2000.0,
                encoder_span: 4000.0,
            }
        }
    }

    impl Default for TrilaterationGeometry {
        fn default() -> Self {
            Self::novint_falcon()
        }
    }
}
