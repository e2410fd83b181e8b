//! Byte transport to the device and the line settings of its FTDI bridge.

use std::time::Duration;

use crate::errors::{CommError, FalconError};

/// USB vendor and product id of the Falcon FTDI bridge.
pub const FALCON_VENDOR_ID: u16 = 0x0403;
pub const FALCON_PRODUCT_ID: u16 = 0xCB48;

/// Mode of the transport. Firmware mode is only reached through the handshake,
/// normal mode is the steady state line configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommMode {
    Uninitialized,
    Firmware,
    Normal,
}

/// Bytes and timings of the mode switch handshake. Backends disagree on the
/// acknowledgement bytes, so every backend carries its own profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeProfile {
    pub name: &'static str,
    /// Bytes the received probe answer must end with.
    pub probe_ack: &'static [u8],
    /// Length of the answer to the mode byte. Its first byte must echo the mode byte.
    pub mode_ack_len: usize,
    /// Attempts of the whole probe sequence before firmware mode entry fails.
    pub probe_attempts: usize,
    pub probe_baud: u32,
    pub firmware_baud: u32,
    pub normal_baud: u32,
    pub firmware_latency_ms: u8,
    pub normal_latency_ms: u8,
    /// Upper bound on every blocking read.
    pub read_timeout: Duration,
}

impl HandshakeProfile {
    /// Profile of the libftdi backend, which sees a leading zero before the ack.
    pub fn libftdi() -> Self {
        HandshakeProfile {
            name: "libftdi",
            probe_ack: &[0x00, 0x0A, 0x44, 0x2C, 0x0D],
            mode_ack_len: 1,
            probe_attempts: 10,
            probe_baud: 9600,
            firmware_baud: 140_000,
            normal_baud: 1_456_312,
            firmware_latency_ms: 16,
            normal_latency_ms: 1,
            read_timeout: Duration::from_millis(100),
        }
    }

    /// Profile of the FTD2XX style driver (also used for the OS serial driver).
    pub fn ftd2xx() -> Self {
        HandshakeProfile {
            name: "ftd2xx",
            probe_ack: &[0x0A, 0x44, 0x2C, 0x0D],
            mode_ack_len: 2,
            ..Self::libftdi()
        }
    }
}

impl Default for HandshakeProfile {
    fn default() -> Self {
        Self::libftdi()
    }
}

/// Byte stream to one Falcon. Only one thread drives a transport at a time.
pub trait Transport: Send {
    /// Number of Falcons connected.
    fn device_count(&mut self) -> Result<usize, FalconError>;

    fn open(&mut self, index: usize) -> Result<(), FalconError>;

    fn close(&mut self) -> Result<(), FalconError>;

    fn is_open(&self) -> bool;

    /// Reads what is available, up to `buffer.len()`, without waiting.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, CommError>;

    fn write(&mut self, data: &[u8]) -> Result<(), CommError>;

    /// Reads until `buffer` is full or the read timeout expires. Returns the count read.
    fn read_blocking(&mut self, buffer: &mut [u8]) -> Result<usize, CommError>;

    /// Writes all of `data`, waiting for the device to take it.
    fn write_blocking(&mut self, data: &[u8]) -> Result<(), CommError>;

    fn bytes_available(&mut self) -> Result<usize, CommError>;

    fn has_bytes_available(&mut self) -> Result<bool, CommError> {
        Ok(self.bytes_available()? > 0)
    }

    /// Polling style transports only learn about new bytes when polled.
    fn requires_poll(&self) -> bool {
        false
    }

    fn poll(&mut self) -> Result<(), CommError> {
        Ok(())
    }

    fn comm_mode(&self) -> CommMode;

    /// Runs the firmware mode handshake.
    fn set_firmware_mode(&mut self) -> Result<(), FalconError>;

    /// Switches the line to the steady state configuration.
    fn set_normal_mode(&mut self) -> Result<(), FalconError>;
}

/// Line level control of the FTDI bridge, used by the handshake.
pub trait LineControl {
    fn purge(&mut self) -> Result<(), CommError>;
    fn reset(&mut self) -> Result<(), CommError>;
    fn set_latency_timer(&mut self, milliseconds: u8) -> Result<(), CommError>;
    fn set_baud_rate(&mut self, baud: u32) -> Result<(), CommError>;
    /// 8 data bits, no parity, 1 stop bit, no flow control.
    fn set_line_8n1(&mut self) -> Result<(), CommError>;
    fn set_rts(&mut self, level: bool) -> Result<(), CommError>;
    fn set_dtr(&mut self, level: bool) -> Result<(), CommError>;
}
