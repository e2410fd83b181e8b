//! Rust driver for the Novint Falcon haptic controller.
//!
//! The Falcon is a three legged parallel-delta robot with a USB (FTDI) link to a small
//! microcontroller. The controller runs no firmware after power up; the host uploads it
//! through the boot loader and then exchanges one 16 byte command frame and one 16 byte
//! status frame per tick.
//!
//! # Features
//!
//! - Wire codec for the ASCII biased frames, with resynchronization on partial and
//!   concatenated reads.
//! - Firmware upload with echo verification, retrying the whole mode switch handshake.
//! - Synchronous IO loop with homing, LED and grip support.
//! - Two kinematic models behind one trait: the Stamper model (closed form inverse,
//!   Newton forward through the Jacobian, force rendering) and a trilateration model.
//! - A device facade combining transport, firmware, kinematics and grip into one tick,
//!   and a worker thread runner around it.
//! - A simulated Falcon for tests and demos, and a serial port backend for the FTDI
//!   virtual COM port driver.
//!
//! # Geometry
//!
//! Both kinematic models are parameterized. Presets for the stock device are available
//! as `StamperGeometry::novint_falcon()` and `TrilaterationGeometry::novint_falcon()`,
//! and with the `allow_filesystem` feature geometry can be read from YAML.

pub mod errors;

pub mod kinematic_traits;

pub mod geometry;
pub mod geometry_presets;

#[cfg(feature = "allow_filesystem")]
pub mod geometry_from_file;
#[cfg(feature = "allow_filesystem")]
pub mod parameter_error;

#[path = "utils/utils.rs"]
pub mod utils;

pub mod codec;

pub mod jacobian;
pub mod stamper;
pub mod trilateration;

#[path = "comm/transport.rs"]
pub mod transport;

#[path = "comm/handshake.rs"]
pub mod handshake;

#[path = "comm/simulated.rs"]
pub mod simulated;

#[cfg(feature = "serial")]
#[path = "comm/serial.rs"]
pub mod serial;

pub mod io_loop;
pub mod firmware_loader;
pub mod grip;

pub mod device;
pub mod device_thread;

#[cfg(test)]
mod tests;
