use std::f64::consts::PI;

use anyhow::{Context, Result};
use nifalcon::codec::FalconLeds;
use nifalcon::device::{FalconDevice, LoopFlags};
use nifalcon::geometry::falcon_geometry::{StamperGeometry, TrilaterationGeometry};
use nifalcon::grip::FourButtonGrip;
use nifalcon::kinematic_traits::{FalconKinematic, Force, Position};
use nifalcon::simulated::SimulatedFalcon;
use nifalcon::stamper::StamperKinematics;
use nifalcon::trilateration::TrilaterationKinematics;
use nifalcon::utils::{dump_angles, dump_encoders, dump_joint_angles, dump_position};

/// Usage example, runs against the simulated device.
fn main() -> Result<()> {
    let mut robot = StamperKinematics::new(StamperGeometry::novint_falcon());
    let position = Position::new(0.01, -0.02, 0.13);
    println!("Position:");
    dump_position(&position);

    println!("Joint angles of all three legs:");
    let joints = robot.joint_angles(&position)?;
    dump_joint_angles(&joints);

    println!("Encoders the device reports there:");
    let encoders = robot.encoders(&position)?;
    dump_encoders(&encoders);

    println!("Position solved back from the encoders (quantized):");
    dump_position(&robot.position(&encoders)?);

    let force = Force::new(0.0, 0.0, 3.0);
    println!("Motor commands for 3 N upwards:");
    dump_encoders(&robot.forces(&position, &force)?);

    let trilateration = TrilaterationKinematics::new(TrilaterationGeometry::novint_falcon());
    println!("Trilateration model, all arms at 30 degrees:");
    let angles = [PI / 6.0; 3];
    dump_angles(&angles);
    dump_position(&trilateration.forward(&angles)?);

    // The simulated device shares state with this handle
    let sim = SimulatedFalcon::new();
    sim.set_encoders(robot.encoders(&robot.workspace_origin())?);
    sim.set_homing_ticks(25);

    let mut falcon = FalconDevice::new(Box::new(sim.clone()));
    falcon.set_kinematics(Box::new(robot.clone()));
    falcon.set_grip(Box::new(FourButtonGrip::new()));
    // Any bytes do for the simulated boot loader
    falcon.set_firmware_image((0..=255u8).cycle().take(4096).collect())?;

    falcon.open(0).context("opening the simulated Falcon")?;
    falcon.load_firmware(10, false).context("loading firmware")?;
    println!("Firmware loaded: {}", falcon.is_firmware_loaded());

    falcon.set_leds(FalconLeds::BLUE);
    falcon.wait_for_homing(200).context("homing")?;
    println!("Homed, status {:?}", falcon.homing_status());
    falcon.set_leds(FalconLeds::GREEN);

    println!("Moving along a circle of 20 mm at 130 mm height:");
    for step in 0..8 {
        let angle = 2.0 * PI * step as f64 / 8.0;
        let target = Position::new(0.02 * angle.cos(), 0.02 * angle.sin(), 0.13);
        sim.set_encoders(robot.encoders(&target)?);
        falcon.set_force(-50.0 * (target - robot.workspace_origin()));
        // One tick picks up the previous answer, the next one the new encoders
        for _ in 0..3 {
            falcon.run_io_loop(LoopFlags::all())?;
        }
        dump_position(&falcon.homed_position()?);
    }

    sim.set_grip(0x09);
    falcon.run_io_loop(LoopFlags::all())?;
    falcon.run_io_loop(LoopFlags::all())?;
    if let Some(grip) = falcon.grip() {
        println!("Grip buttons: {:04b}", grip.digital_inputs());
    }
    println!(
        "{} loops, {} errors, {} malformed frames",
        falcon.loop_count(),
        falcon.error_count(),
        falcon.malformed_count()
    );
    falcon.close()?;

    #[cfg(feature = "allow_filesystem")] {
        // This requires YAML library
        println!("Geometry:\n{}", StamperGeometry::novint_falcon().to_yaml());
    }
    Ok(())
}
