//! The device facade: one Falcon with its transport, firmware, kinematics and grip.
//!
//! ```
//! use nifalcon::device::{FalconDevice, LoopFlags};
//! use nifalcon::geometry::falcon_geometry::StamperGeometry;
//! use nifalcon::kinematic_traits::{FalconKinematic, Position};
//! use nifalcon::simulated::SimulatedFalcon;
//! use nifalcon::stamper::StamperKinematics;
//!
//! let robot = StamperKinematics::new(StamperGeometry::novint_falcon());
//! let sim = SimulatedFalcon::new();
//! sim.set_encoders(robot.encoders(&Position::new(0.0, 0.0, 0.13)).unwrap());
//!
//! let mut falcon = FalconDevice::new(Box::new(sim.clone()));
//! falcon.set_kinematics(Box::new(robot));
//! falcon.set_firmware_image(vec![0x55; 200]).unwrap();
//!
//! falcon.open(0).unwrap();
//! falcon.load_firmware(10, false).unwrap();
//! for _ in 0..10 {
//!     falcon.run_io_loop(LoopFlags::all()).unwrap();
//! }
//! assert!((falcon.position().z - 0.13).abs() < 1e-3);
//! ```

#[cfg(feature = "allow_filesystem")]
use std::path::Path;

use bitflags::bitflags;
use tracing::{debug, info, warn};

use crate::codec::{FalconLeds, HomingStatus};
use crate::errors::{FalconError, KinematicError};
use crate::firmware_loader::FirmwareLoader;
use crate::grip::FalconGrip;
use crate::io_loop::IoLoop;
use crate::kinematic_traits::{Encoders, FalconKinematic, Force, Position};
use crate::transport::Transport;

bitflags! {
    /// Stages run by [`FalconDevice::run_io_loop`] besides the frame exchange.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LoopFlags: u8 {
        /// Run the frame exchange at all.
        const FIRMWARE = 0x01;
        /// Decode the grip buttons.
        const GRIP = 0x02;
        /// Map force to motor commands before the exchange and encoders to a position after.
        const KINEMATIC = 0x04;
    }
}

/// One Falcon. Owned by a single thread, see [`crate::device_thread`] for sharing.
pub struct FalconDevice {
    transport: Box<dyn Transport>,
    io: IoLoop,
    firmware: FirmwareLoader,
    kinematics: Option<Box<dyn FalconKinematic>>,
    grip: Option<Box<dyn FalconGrip>>,

    /// Cartesian force requested for the next ticks.
    force: Force,
    position: Position,
    error_count: u64,
}

impl FalconDevice {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        FalconDevice {
            transport,
            io: IoLoop::new(),
            firmware: FirmwareLoader::new(),
            kinematics: None,
            grip: None,
            force: Force::zeros(),
            position: Position::zeros(),
            error_count: 0,
        }
    }

    pub fn set_kinematics(&mut self, mut kinematics: Box<dyn FalconKinematic>) {
        kinematics.initialize();
        self.position = kinematics.workspace_origin();
        self.kinematics = Some(kinematics);
    }

    pub fn kinematics(&self) -> Option<&dyn FalconKinematic> {
        self.kinematics.as_deref()
    }

    pub fn set_grip(&mut self, grip: Box<dyn FalconGrip>) {
        self.grip = Some(grip);
    }

    pub fn grip(&self) -> Option<&dyn FalconGrip> {
        self.grip.as_deref()
    }

    pub fn set_firmware_image(&mut self, image: Vec<u8>) -> Result<(), FalconError> {
        self.firmware.set_image(image)
    }

    #[cfg(feature = "allow_filesystem")]
    pub fn set_firmware_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), FalconError> {
        self.firmware.set_image_file(path)
    }

    pub fn device_count(&mut self) -> Result<usize, FalconError> {
        self.transport.device_count()
    }

    pub fn open(&mut self, index: usize) -> Result<(), FalconError> {
        if self.transport.is_open() {
            self.close()?;
        }
        self.transport.open(index)?;
        self.reset_session();
        info!("Falcon {} open", index);
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), FalconError> {
        self.transport.close()?;
        self.reset_session();
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Forgets everything learned from the device in the last session.
    fn reset_session(&mut self) {
        self.io = IoLoop::new();
        self.firmware.reset();
        self.force = Force::zeros();
        if let Some(kinematics) = self.kinematics.as_mut() {
            kinematics.initialize();
            self.position = kinematics.workspace_origin();
        }
    }

    /// Uploads the firmware image, see [`FirmwareLoader::load_firmware`].
    pub fn load_firmware(&mut self, retries: usize, skip_checksum: bool) -> Result<(), FalconError> {
        self.firmware.load_firmware(self.transport.as_mut(), &mut self.io, retries, skip_checksum)
    }

    /// Checks for running firmware without uploading. Useful when the device kept its
    /// firmware from an earlier session.
    pub fn confirm_firmware(&mut self) -> Result<bool, FalconError> {
        match self.firmware.confirm_firmware(self.transport.as_mut(), &mut self.io) {
            Ok(()) => Ok(true),
            Err(FalconError::NoFirmwareLoaded) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn is_firmware_loaded(&self) -> bool {
        self.firmware.is_loaded()
    }

    /// Runs one tick of the selected stages. Returns true if a status frame arrived.
    ///
    /// With `KINEMATIC` set and a kinematic model present the requested force is mapped
    /// to motor commands at the last known position before the exchange, and the new
    /// encoder values are mapped to a position after it. Failed ticks increment
    /// [`FalconDevice::error_count`].
    pub fn run_io_loop(&mut self, flags: LoopFlags) -> Result<bool, FalconError> {
        let result = self.run_stages(flags);
        if let Err(err) = &result {
            self.error_count += 1;
            debug!("IO loop failed: {}", err);
        }
        result
    }

    fn run_stages(&mut self, flags: LoopFlags) -> Result<bool, FalconError> {
        if !self.transport.is_open() {
            return Err(FalconError::TransportNotOpen);
        }

        let kinematic = flags.contains(LoopFlags::KINEMATIC);
        // A failed force mapping still lets the zeroed command out and the position update
        let mapped = if kinematic { self.map_force() } else { Ok(()) };
        let received = self.exchange(flags, kinematic)?;
        mapped?;
        Ok(received)
    }

    /// Motor commands for the requested force. They are zeroed if the model cannot map
    /// it, so a stale command is never held on the motors.
    fn map_force(&mut self) -> Result<(), KinematicError> {
        let Some(kinematics) = self.kinematics.as_ref() else {
            return Ok(());
        };
        // Zero force is zero torque for any model
        if self.force == Force::zeros() {
            self.io.set_forces([0; 3]);
            return Ok(());
        }
        match kinematics.forces(&self.position, &self.force) {
            Ok(forces) => {
                self.io.set_forces(forces);
                Ok(())
            }
            Err(err) => {
                self.io.set_forces([0; 3]);
                Err(err)
            }
        }
    }

    fn exchange(&mut self, flags: LoopFlags, kinematic: bool) -> Result<bool, FalconError> {
        if !flags.contains(LoopFlags::FIRMWARE) {
            return Ok(false);
        }
        if !self.io.tick(self.transport.as_mut())? {
            return Ok(false);
        }

        if flags.contains(LoopFlags::GRIP) {
            if let Some(grip) = self.grip.as_mut() {
                grip.run_grip_loop(&[self.io.grip_info()])?;
            }
        }
        if kinematic {
            if let Some(kinematics) = self.kinematics.as_mut() {
                self.position = kinematics.position(&self.io.encoders())?;
            }
        }
        Ok(true)
    }

    /// Cartesian force, newtons, applied from the next kinematic tick on.
    pub fn set_force(&mut self, force: Force) {
        self.force = force;
    }

    pub fn force(&self) -> Force {
        self.force
    }

    /// Raw motor commands, bypassing the kinematics. Overwritten by the next tick with
    /// the `KINEMATIC` flag.
    pub fn set_forces(&mut self, forces: Encoders) {
        self.io.set_forces(forces);
    }

    /// Last position computed by the kinematic stage.
    pub fn position(&self) -> Position {
        self.position
    }

    pub fn encoders(&self) -> Encoders {
        self.io.encoders()
    }

    pub fn set_homing_mode(&mut self, homing: bool) {
        self.io.set_homing_mode(homing);
    }

    pub fn set_leds(&mut self, leds: FalconLeds) {
        self.io.set_leds(leds);
    }

    pub fn homing_status(&self) -> HomingStatus {
        self.io.homing_status()
    }

    pub fn is_homed(&self) -> bool {
        self.io.is_homed()
    }

    /// Position, only when every encoder is homed.
    pub fn homed_position(&self) -> Result<Position, FalconError> {
        if !self.is_homed() {
            return Err(FalconError::NotHomed);
        }
        Ok(self.position)
    }

    /// Holds homing mode on and runs the IO loop until all encoders report homed or
    /// `max_ticks` ticks pass. Homing mode is switched off again on return.
    pub fn wait_for_homing(&mut self, max_ticks: usize) -> Result<(), FalconError> {
        self.set_homing_mode(true);
        let mut result = Err(FalconError::NotHomed);
        for tick in 0..max_ticks {
            if let Err(err) = self.run_io_loop(LoopFlags::FIRMWARE) {
                result = Err(err);
                break;
            }
            if self.is_homed() {
                debug!("Homed after {} ticks", tick + 1);
                result = Ok(());
                break;
            }
        }
        self.set_homing_mode(false);
        if result.is_err() {
            warn!("Homing did not complete in {} ticks", max_ticks);
        }
        result
    }

    /// Ticks that completed a read.
    pub fn loop_count(&self) -> u64 {
        self.io.loop_count()
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn malformed_count(&self) -> u64 {
        self.io.malformed_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::falcon_geometry::{StamperGeometry, TrilaterationGeometry};
    use crate::grip::FourButtonGrip;
    use crate::simulated::SimulatedFalcon;
    use crate::stamper::StamperKinematics;
    use crate::trilateration::TrilaterationKinematics;

    fn stamper() -> Box<StamperKinematics> {
        Box::new(StamperKinematics::new(StamperGeometry::novint_falcon()))
    }

    fn loaded() -> (SimulatedFalcon, FalconDevice) {
        let sim = SimulatedFalcon::new();
        sim.set_encoders(stamper().encoders(&Position::new(0.0, 0.0, 0.15)).unwrap());
        let mut falcon = FalconDevice::new(Box::new(sim.clone()));
        falcon.set_kinematics(stamper());
        falcon.set_grip(Box::new(FourButtonGrip::new()));
        falcon.set_firmware_image(vec![0x2A; 130]).unwrap();
        falcon.open(0).unwrap();
        falcon.load_firmware(10, false).unwrap();
        (sim, falcon)
    }

    fn run(falcon: &mut FalconDevice, ticks: usize) {
        for _ in 0..ticks {
            falcon.run_io_loop(LoopFlags::all()).unwrap();
        }
    }

    #[test]
    fn test_not_open() {
        let mut falcon = FalconDevice::new(Box::new(SimulatedFalcon::new()));
        assert_eq!(falcon.run_io_loop(LoopFlags::all()), Err(FalconError::TransportNotOpen));
        assert_eq!(falcon.error_count(), 1);
        assert_eq!(falcon.load_firmware(1, false).unwrap_err(), FalconError::FirmwareFileNotValid(
            "no firmware image set".to_string()
        ));
    }

    #[test]
    fn test_position_follows_encoders() {
        let (sim, mut falcon) = loaded();
        let robot = stamper();
        let target = Position::new(0.01, -0.015, 0.13);
        sim.set_encoders(robot.encoders(&target).unwrap());

        run(&mut falcon, 6);
        // Encoder quantization is about 0.036 degrees per count
        assert!((falcon.position() - target).norm() < 1e-3);
        assert!(falcon.loop_count() >= 2);
    }

    #[test]
    fn test_force_reaches_the_wire() {
        let (sim, mut falcon) = loaded();
        run(&mut falcon, 4);

        falcon.set_force(Force::new(0.0, 0.0, 2.0));
        run(&mut falcon, 2);
        let sent = sim.last_command().unwrap().forces;
        let expected = stamper().forces(&falcon.position(), &falcon.force()).unwrap();
        assert_ne!(sent, [0, 0, 0]);
        for leg in 0..3 {
            // The position is solved again every tick, allow for rounding
            assert!((sent[leg] - expected[leg]).abs() <= 2, "{:?} vs {:?}", sent, expected);
        }
    }

    #[test]
    fn test_flags_select_stages() {
        let (sim, mut falcon) = loaded();
        sim.set_encoders(stamper().encoders(&Position::new(0.02, 0.0, 0.12)).unwrap());
        sim.set_grip(0x05);
        falcon.set_force(Force::new(1.0, 0.0, 0.0));

        for _ in 0..4 {
            falcon.run_io_loop(LoopFlags::FIRMWARE).unwrap();
        }
        assert_eq!(falcon.position(), Position::new(0.0, 0.0, 0.15));
        assert_eq!(falcon.grip().unwrap().digital_inputs(), 0);
        assert_eq!(sim.last_command().unwrap().forces, [0, 0, 0]);

        run(&mut falcon, 4);
        assert!(falcon.grip().unwrap().digital_input(0));
        assert!(falcon.grip().unwrap().digital_input(2));
        assert!((falcon.position().x - 0.02).abs() < 1e-3);

        // Without the exchange nothing is sent
        let sent = sim.commands_received();
        falcon.run_io_loop(LoopFlags::KINEMATIC).unwrap();
        assert_eq!(sim.commands_received(), sent);
    }

    #[test]
    fn test_homing() {
        let (sim, mut falcon) = loaded();
        sim.set_homing_ticks(20);
        assert_eq!(falcon.homed_position(), Err(FalconError::NotHomed));

        assert_eq!(falcon.wait_for_homing(5), Err(FalconError::NotHomed));
        assert!(!falcon.is_homed());

        falcon.wait_for_homing(100).unwrap();
        assert!(falcon.is_homed());
        assert!(falcon.homed_position().is_ok());
        falcon.run_io_loop(LoopFlags::FIRMWARE).unwrap();
        assert!(!sim.last_command().unwrap().homing);
    }

    #[test]
    fn test_leds_are_sent() {
        let (sim, mut falcon) = loaded();
        falcon.set_leds(FalconLeds::RED | FalconLeds::BLUE);
        run(&mut falcon, 3);
        assert_eq!(sim.last_command().unwrap().leds, FalconLeds::RED | FalconLeds::BLUE);
    }

    #[test]
    fn test_errors_are_counted() {
        let (sim, mut falcon) = loaded();
        run(&mut falcon, 2);
        sim.fail_next_write();
        assert!(matches!(falcon.run_io_loop(LoopFlags::all()), Err(FalconError::Comm(_))));
        assert_eq!(falcon.error_count(), 1);
    }

    #[test]
    fn test_trilateration_forces_are_not_implemented() {
        let (_sim, mut falcon) = loaded();
        falcon.set_kinematics(Box::new(TrilaterationKinematics::new(TrilaterationGeometry::novint_falcon())));
        falcon.set_force(Force::new(0.0, 0.0, 1.0));
        assert_eq!(
            falcon.run_io_loop(LoopFlags::all()),
            Err(FalconError::Kinematic(KinematicError::NotImplemented("trilateration force mapping")))
        );
        // Without a force the model still tracks the position
        falcon.set_force(Force::zeros());
        for _ in 0..3 {
            falcon.run_io_loop(LoopFlags::all()).unwrap();
        }
        assert!(falcon.position().z > 0.0);
    }

    #[test]
    fn test_failed_force_mapping_zeroes_the_motors() {
        let (sim, mut falcon) = loaded();
        falcon.set_force(Force::new(0.0, 0.0, 50.0));
        run(&mut falcon, 3);
        let held = sim.last_command().unwrap().forces;
        assert!(held.iter().all(|&f| f != 0));
        assert!(held.iter().any(|&f| f.abs() == 4095));

        // A model that cannot map forces must not leave the last command on the motors
        falcon.set_kinematics(Box::new(TrilaterationKinematics::new(TrilaterationGeometry::novint_falcon())));
        for _ in 0..5 {
            assert!(matches!(
                falcon.run_io_loop(LoopFlags::all()),
                Err(FalconError::Kinematic(KinematicError::NotImplemented(_)))
            ));
        }
        assert_eq!(falcon.error_count(), 5);
        assert_eq!(sim.last_command().unwrap().forces, [0, 0, 0]);

        for _ in 0..3 {
            falcon.run_io_loop(LoopFlags::FIRMWARE).unwrap();
        }
        assert_eq!(sim.last_command().unwrap().forces, [0, 0, 0]);
        // The exchange kept running, so the position is still tracked
        assert!(falcon.position().z > 0.0);
    }

    #[test]
    fn test_reopen_forgets_firmware() {
        let (_sim, mut falcon) = loaded();
        assert!(falcon.is_firmware_loaded());
        falcon.close().unwrap();
        assert!(!falcon.is_firmware_loaded());
        assert!(!falcon.is_open());

        // The simulated device keeps running its firmware
        falcon.open(0).unwrap();
        falcon.confirm_firmware().unwrap();
        assert!(falcon.is_firmware_loaded());
    }
}
