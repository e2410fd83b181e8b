//! Command line test tool: opens a Falcon, loads firmware if needed, optionally homes
//! it and runs the IO loop, logging position and buttons.
//!
//! ```text
//! falcon_cli --device-count
//! falcon_cli --device-index 0 --firmware nifalcon.bin --homing --led green --ticks 5000
//! falcon_cli --simulate --homing --spring 100
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use nifalcon::codec::FalconLeds;
use nifalcon::device::{FalconDevice, LoopFlags};
use nifalcon::device_thread::DeviceThread;
use nifalcon::geometry::falcon_geometry::{StamperGeometry, TrilaterationGeometry};
use nifalcon::grip::FourButtonGrip;
use nifalcon::kinematic_traits::{FalconKinematic, Force};
use nifalcon::simulated::SimulatedFalcon;
use nifalcon::stamper::StamperKinematics;
use nifalcon::transport::{HandshakeProfile, Transport};
use nifalcon::trilateration::TrilaterationKinematics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Led {
    Red,
    Green,
    Blue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Kinematics {
    Stamper,
    Trilateration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Profile {
    Libftdi,
    Ftd2xx,
}

#[derive(Parser, Debug)]
#[command(name = "falcon_cli")]
#[command(about = "Test tool for the Novint Falcon haptic controller")]
struct Args {
    /// Print the number of connected devices and exit
    #[arg(long)]
    device_count: bool,

    /// Index of the device to open (starts at 0)
    #[arg(long, default_value_t = 0)]
    device_index: usize,

    /// Firmware image to upload
    #[arg(long)]
    firmware: Option<PathBuf>,

    /// Upload the firmware even if the device already runs it
    #[arg(long)]
    force_firmware: bool,

    /// Do not compare the echo of the uploaded firmware
    #[arg(long)]
    skip_checksum: bool,

    /// Firmware upload attempts
    #[arg(long, default_value_t = 10)]
    retries: usize,

    /// IO loop ticks to run, 0 runs until Ctrl-C
    #[arg(long, default_value_t = 1000)]
    ticks: u64,

    /// Home the encoders before running
    #[arg(long)]
    homing: bool,

    /// LED to switch on
    #[arg(long, value_enum)]
    led: Option<Led>,

    #[arg(long, value_enum, default_value_t = Kinematics::Stamper)]
    kinematics: Kinematics,

    /// Geometry YAML, the stock device preset if not given
    #[arg(long)]
    geometry: Option<PathBuf>,

    /// Spring stiffness towards the workspace center, N/m
    #[arg(long, default_value_t = 0.0)]
    spring: f64,

    /// Acknowledgement bytes to expect during the firmware handshake
    #[arg(long, value_enum, default_value_t = Profile::Ftd2xx)]
    profile: Profile,

    /// Run against the built-in simulated device
    #[arg(long)]
    simulate: bool,
}

fn handshake_profile(profile: Profile) -> HandshakeProfile {
    match profile {
        Profile::Libftdi => HandshakeProfile::libftdi(),
        Profile::Ftd2xx => HandshakeProfile::ftd2xx(),
    }
}

fn transport(args: &Args) -> Result<Box<dyn Transport>> {
    let profile = handshake_profile(args.profile);
    if args.simulate {
        let sim = SimulatedFalcon::with_profile(profile);
        // Park the simulated grip at the workspace center
        let robot = StamperKinematics::new(StamperGeometry::novint_falcon());
        sim.set_encoders(robot.encoders(&robot.workspace_origin())?);
        if args.firmware.is_none() {
            sim.set_firmware_preloaded(true);
        }
        return Ok(Box::new(sim));
    }

    #[cfg(feature = "serial")]
    {
        Ok(Box::new(nifalcon::serial::SerialTransport::with_profile(profile)))
    }
    #[cfg(not(feature = "serial"))]
    {
        bail!("built without the serial backend, only --simulate is available")
    }
}

fn kinematics(args: &Args) -> Result<Box<dyn FalconKinematic>> {
    let model: Box<dyn FalconKinematic> = match args.kinematics {
        Kinematics::Stamper => {
            let geometry = match &args.geometry {
                Some(path) => StamperGeometry::from_yaml_file(path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => StamperGeometry::novint_falcon(),
            };
            Box::new(StamperKinematics::new(geometry))
        }
        Kinematics::Trilateration => {
            let geometry = match &args.geometry {
                Some(path) => TrilaterationGeometry::from_yaml_file(path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => TrilaterationGeometry::novint_falcon(),
            };
            Box::new(TrilaterationKinematics::new(geometry))
        }
    };
    Ok(model)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut falcon = FalconDevice::new(transport(&args)?);

    if args.device_count {
        println!("Connected device count: {}", falcon.device_count()?);
        return Ok(());
    }

    let model = kinematics(&args)?;
    let origin = model.workspace_origin();
    falcon.set_kinematics(model);
    falcon.set_grip(Box::new(FourButtonGrip::new()));

    falcon
        .open(args.device_index)
        .with_context(|| format!("cannot open Falcon {}", args.device_index))?;

    if let Some(path) = &args.firmware {
        falcon
            .set_firmware_file(path)
            .with_context(|| format!("cannot use firmware file {}", path.display()))?;
        if args.force_firmware || !falcon.confirm_firmware()? {
            falcon
                .load_firmware(args.retries, args.skip_checksum)
                .context("cannot load firmware to device")?;
        }
    } else {
        falcon.confirm_firmware()?;
    }
    if !falcon.is_firmware_loaded() {
        bail!("no firmware loaded to device, cannot continue (see --firmware)");
    }

    if args.homing {
        info!("Homing, move the grip through the whole workspace");
        falcon.set_leds(FalconLeds::RED);
        falcon.wait_for_homing(100_000)?;
        info!("Homed");
    }
    falcon.set_leds(match args.led {
        Some(Led::Red) => FalconLeds::RED,
        Some(Led::Green) => FalconLeds::GREEN,
        Some(Led::Blue) => FalconLeds::BLUE,
        None => FalconLeds::empty(),
    });

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let io = DeviceThread::spawn(falcon, LoopFlags::all(), Duration::ZERO);
    let mut reported = 0;
    while running.load(Ordering::SeqCst) && io.is_running() {
        thread::sleep(Duration::from_millis(100));
        let state = io.snapshot();
        if args.spring != 0.0 {
            let force: Force = -args.spring * (state.position - origin);
            io.set_force(force);
        }
        if state.loop_count >= reported + 500 || (args.ticks > 0 && state.loop_count >= args.ticks) {
            reported = state.loop_count;
            info!(
                "loop {} position [{:.1} {:.1} {:.1}] mm encoders {:?} buttons {:04b} errors {}",
                state.loop_count,
                state.position.x * 1000.0,
                state.position.y * 1000.0,
                state.position.z * 1000.0,
                state.encoders,
                state.buttons,
                state.error_count
            );
        }
        if args.ticks > 0 && state.loop_count >= args.ticks {
            break;
        }
    }

    let mut falcon = io.stop()?;
    falcon.set_leds(FalconLeds::empty());
    falcon.set_forces([0; 3]);
    // A tick only writes once the previous answer is in
    for _ in 0..100 {
        match falcon.run_io_loop(LoopFlags::FIRMWARE) {
            Ok(true) => break,
            Ok(false) => thread::sleep(Duration::from_millis(1)),
            Err(err) => {
                warn!("Could not send the final idle command: {}", err);
                break;
            }
        }
    }
    falcon.close()?;
    Ok(())
}
