//! Defines the mechanism geometry data structures

pub mod falcon_geometry {
    use crate::utils::deg;

    /// Link lengths and offsets of the Stamper model of the parallel-delta mechanism.
    /// See [geometry_presets.rs](geometry_presets.rs) for the Novint Falcon values.
    /// All lengths are in meters, angles in radians.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct StamperGeometry {
        /// Length of the actuated (upper) arm.
        pub a: f64,

        /// Length of the parallelogram (lower) arm.
        pub b: f64,

        /// Offset of the parallelogram from the end of the actuated arm.
        pub c: f64,

        /// Half width of the parallelogram at the knee.
        pub d: f64,

        /// Half width of the parallelogram at the effector.
        pub e: f64,

        /// Offset of the parallelogram plane from the effector center.
        pub f: f64,

        /// Radial offset of the motor shaft from the base center.
        pub r: f64,

        /// Lateral offset of the motor shaft from the leg axis.
        pub s: f64,

        /// Azimuth of each leg around the vertical axis.
        pub leg_azimuths: [f64; 3],

        /// Slots of the encoder wheel. Quadrature gives four counts per slot.
        pub wheel_slots: f64,

        /// Diameter of the motor shaft driving the arm capstan.
        pub shaft_diameter: f64,

        /// Diameter of the capstan on the actuated arm.
        pub small_arm_diameter: f64,

        /// Arm angle when the encoder reads zero.
        pub theta_offset: f64,

        /// Height of the workspace center above the base.
        pub origin_z: f64,
    }

    /// Geometry of the trilateration (Zsombor-Murray) model. Lengths in meters.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct TrilaterationGeometry {
        /// Side of the equilateral base triangle through the hip joints.
        pub f: f64,

        /// Side of the equilateral effector triangle through the ankle joints.
        pub e: f64,

        /// Length of the lower (parallelogram) arm.
        pub re: f64,

        /// Length of the upper (actuated) arm.
        pub rf: f64,

        /// Encoder value at which the arm is at zero degrees.
        pub encoder_zero: f64,

        /// Encoder counts per 90 degrees of arm travel.
        pub encoder_span: f64,
    }

    impl StamperGeometry {
        /// Convert to string yaml representation (quick viewing, etc).
        pub fn to_yaml(&self) -> String {
            format!(
                "stamper_geometry:\n  \
              a: {}\n  \
              b: {}\n  \
              c: {}\n  \
              d: {}\n  \
              e: {}\n  \
              f: {}\n  \
              r: {}\n  \
              s: {}\n\
            leg_azimuths: [{}]\n\
            encoder:\n  \
              wheel_slots: {}\n  \
              shaft_diameter: {}\n  \
              small_arm_diameter: {}\n  \
              theta_offset: {}\n\
            origin_z: {}\n",
                self.a,
                self.b,
                self.c,
                self.d,
                self.e,
                self.f,
                self.r,
                self.s,
                self.leg_azimuths.iter().map(|x| deg(x))
                    .collect::<Vec<_>>().join(","),
                self.wheel_slots,
                self.shaft_diameter,
                self.small_arm_diameter,
                deg(&self.theta_offset),
                self.origin_z
            )
        }

        /// Degrees of arm rotation per encoder count. The shaft drives the arm capstan
        /// by friction, so the ratio is the ratio of circumferences.
        pub fn degrees_per_count(&self) -> f64 {
            let shaft_travel_per_count =
                (self.shaft_diameter * std::f64::consts::PI) / (self.wheel_slots * 4.0);
            let arm_travel_per_degree = (std::f64::consts::PI * self.small_arm_diameter) / 360.0;
            shaft_travel_per_count / arm_travel_per_degree
        }
    }

    impl TrilaterationGeometry {
        /// Convert to string yaml representation (quick viewing, etc).
        pub fn to_yaml(&self) -> String {
            format!(
                "trilateration_geometry:\n  \
              f: {}\n  \
              e: {}\n  \
              re: {}\n  \
              rf: {}\n\
            encoder:\n  \
              zero: {}\n  \
              span: {}\n",
                self.f, self.e, self.re, self.rf, self.encoder_zero, self.encoder_span
            )
        }

        /// Height of the effector when all three arms are at the same angle.
        /// The effector then sits on the vertical axis.
        pub fn symmetric_height(&self, theta: f64) -> Option<f64> {
            let radial = (self.f - self.e) / (2.0 * 3f64.sqrt()) + self.rf * theta.cos();
            let squared = self.re * self.re - radial * radial;
            if squared < 0.0 {
                return None;
            }
            Some(self.rf * theta.sin() + squared.sqrt())
        }
    }
}
