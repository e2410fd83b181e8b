//! Transport over the FTDI virtual COM port driver.

use std::io::{self, Read, Write};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tracing::{debug, info};

use crate::errors::{CommError, CommErrorKind, FalconError};
use crate::handshake;
use crate::transport::{
    CommMode, HandshakeProfile, LineControl, Transport, FALCON_PRODUCT_ID, FALCON_VENDOR_ID,
};

fn port_error(kind: CommErrorKind, err: serialport::Error) -> CommError {
    CommError::new(kind, 0, err.to_string())
}

/// Names of serial ports backed by a Falcon, in enumeration order.
pub fn falcon_ports() -> Result<Vec<String>, FalconError> {
    let ports = serialport::available_ports()
        .map_err(|e| FalconError::Comm(port_error(CommErrorKind::Open, e)))?;
    Ok(ports
        .into_iter()
        .filter(|port| match &port.port_type {
            SerialPortType::UsbPort(usb) => usb.vid == FALCON_VENDOR_ID && usb.pid == FALCON_PRODUCT_ID,
            _ => false,
        })
        .map(|port| port.port_name)
        .collect())
}

pub struct SerialTransport {
    profile: HandshakeProfile,
    port: Option<Box<dyn SerialPort>>,
    mode: CommMode,
}

impl SerialTransport {
    pub fn new() -> Self {
        Self::with_profile(HandshakeProfile::ftd2xx())
    }

    pub fn with_profile(profile: HandshakeProfile) -> Self {
        SerialTransport { profile, port: None, mode: CommMode::Uninitialized }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, CommError> {
        self.port
            .as_mut()
            .ok_or_else(|| CommError::new(CommErrorKind::Open, 0, "port not open"))
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SerialTransport {
    fn device_count(&mut self) -> Result<usize, FalconError> {
        Ok(falcon_ports()?.len())
    }

    fn open(&mut self, index: usize) -> Result<(), FalconError> {
        let ports = falcon_ports()?;
        if ports.is_empty() {
            return Err(FalconError::DeviceNotFound);
        }
        let name = ports
            .get(index)
            .ok_or(FalconError::DeviceIndexOutOfRange { index, count: ports.len() })?;

        let port = serialport::new(name.as_str(), self.profile.probe_baud)
            .data_bits(DataBits::Eight)
            .flow_control(FlowControl::None)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(self.profile.read_timeout)
            .open()
            .map_err(|e| FalconError::Comm(port_error(CommErrorKind::Open, e)))?;

        info!("Opened Falcon {} on {}", index, name);
        self.port = Some(port);
        self.mode = CommMode::Uninitialized;
        Ok(())
    }

    fn close(&mut self) -> Result<(), FalconError> {
        self.port = None;
        self.mode = CommMode::Uninitialized;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, CommError> {
        let port = self.port()?;
        let available = port
            .bytes_to_read()
            .map_err(|e| port_error(CommErrorKind::Read, e))? as usize;
        let wanted = available.min(buffer.len());
        if wanted == 0 {
            return Ok(0);
        }
        Ok(port.read(&mut buffer[..wanted])?)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), CommError> {
        let port = self.port()?;
        port.write_all(data)
            .map_err(|e| CommError::new(CommErrorKind::Write, e.raw_os_error().unwrap_or(0), e.to_string()))
    }

    fn read_blocking(&mut self, buffer: &mut [u8]) -> Result<usize, CommError> {
        let port = self.port()?;
        let mut received = 0;
        while received < buffer.len() {
            match port.read(&mut buffer[received..]) {
                Ok(0) => break,
                Ok(count) => received += count,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(received)
    }

    fn write_blocking(&mut self, data: &[u8]) -> Result<(), CommError> {
        let port = self.port()?;
        port.write_all(data)
            .and_then(|_| port.flush())
            .map_err(|e| CommError::new(CommErrorKind::Write, e.raw_os_error().unwrap_or(0), e.to_string()))
    }

    fn bytes_available(&mut self) -> Result<usize, CommError> {
        let port = self.port()?;
        Ok(port
            .bytes_to_read()
            .map_err(|e| port_error(CommErrorKind::Read, e))? as usize)
    }

    fn comm_mode(&self) -> CommMode {
        self.mode
    }

    fn set_firmware_mode(&mut self) -> Result<(), FalconError> {
        let profile = self.profile;
        handshake::enter_firmware_mode(self, &profile)?;
        self.mode = CommMode::Firmware;
        Ok(())
    }

    fn set_normal_mode(&mut self) -> Result<(), FalconError> {
        let profile = self.profile;
        handshake::enter_normal_mode(self, &profile)?;
        self.mode = CommMode::Normal;
        Ok(())
    }
}

impl LineControl for SerialTransport {
    fn purge(&mut self) -> Result<(), CommError> {
        self.port()?
            .clear(ClearBuffer::All)
            .map_err(|e| port_error(CommErrorKind::Configuration, e))
    }

    fn reset(&mut self) -> Result<(), CommError> {
        // The OS driver has no bridge reset, dropping the buffers is the closest.
        self.purge()
    }

    fn set_latency_timer(&mut self, milliseconds: u8) -> Result<(), CommError> {
        debug!("Latency timer {} ms is left to the driver configuration", milliseconds);
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), CommError> {
        self.port()?
            .set_baud_rate(baud)
            .map_err(|e| port_error(CommErrorKind::Configuration, e))
    }

    fn set_line_8n1(&mut self) -> Result<(), CommError> {
        let port = self.port()?;
        port.set_data_bits(DataBits::Eight)
            .and_then(|_| port.set_parity(Parity::None))
            .and_then(|_| port.set_stop_bits(StopBits::One))
            .and_then(|_| port.set_flow_control(FlowControl::None))
            .map_err(|e| port_error(CommErrorKind::Configuration, e))
    }

    fn set_rts(&mut self, level: bool) -> Result<(), CommError> {
        self.port()?
            .write_request_to_send(level)
            .map_err(|e| port_error(CommErrorKind::Configuration, e))
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), CommError> {
        self.port()?
            .write_data_terminal_ready(level)
            .map_err(|e| port_error(CommErrorKind::Configuration, e))
    }
}
