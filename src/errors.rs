//! Errors reported by the driver.
//!
//! Transport and protocol failures are [`FalconError`], kinematic domain failures are
//! [`KinematicError`]. Both are plain values so the caller decides whether to retry,
//! abort or hold the last good state.

use std::fmt;
use std::io;

/// Kind of a communication failure, independent of the transport backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommErrorKind {
    Open,
    Read,
    Write,
    Timeout,
    Underflow,
    Configuration,
}

/// Communication failure with a transport-specific inner code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommError {
    pub kind: CommErrorKind,
    /// Backend code (FTDI status, OS errno), 0 if the backend has none.
    pub code: i32,
    pub message: String,
}

impl CommError {
    pub fn new(kind: CommErrorKind, code: i32, message: impl Into<String>) -> Self {
        CommError {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn read(message: impl Into<String>) -> Self {
        Self::new(CommErrorKind::Read, 0, message)
    }

    pub fn write(message: impl Into<String>) -> Self {
        Self::new(CommErrorKind::Write, 0, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(CommErrorKind::Timeout, 0, message)
    }
}

impl fmt::Display for CommError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?} error (code {}): {}", self.kind, self.code, self.message)
    }
}

impl std::error::Error for CommError {}

impl From<io::Error> for CommError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => CommErrorKind::Timeout,
            io::ErrorKind::UnexpectedEof => CommErrorKind::Underflow,
            _ => CommErrorKind::Read,
        };
        CommError::new(kind, err.raw_os_error().unwrap_or(0), err.to_string())
    }
}

/// The kinematic model was asked for a configuration it cannot represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KinematicError {
    /// Position or encoder state is outside the mechanism domain: failed discriminant,
    /// acos argument out of range or singular Jacobian. `leg` is 0..=2, or 3 when the
    /// failure is not attributable to a single leg.
    OutOfWorkspace { leg: usize, reason: &'static str },
    /// The solver does not provide this operation.
    NotImplemented(&'static str),
}

impl fmt::Display for KinematicError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            KinematicError::OutOfWorkspace { leg, reason } if leg < 3 => {
                write!(f, "Out of workspace on leg {}: {}", leg + 1, reason)
            }
            KinematicError::OutOfWorkspace { reason, .. } => {
                write!(f, "Out of workspace: {}", reason)
            }
            KinematicError::NotImplemented(what) => write!(f, "Not implemented: {}", what),
        }
    }
}

impl std::error::Error for KinematicError {}

/// Unified error of the device, firmware loader and IO loop.
#[derive(Debug, Clone, PartialEq)]
pub enum FalconError {
    TransportNotInitialized,
    TransportNotOpen,
    DeviceNotFound,
    DeviceIndexOutOfRange { index: usize, count: usize },
    Comm(CommError),
    /// The firmware mode handshake did not produce the expected acknowledgement.
    FirmwareModeEntry { stage: &'static str },
    ChecksumMismatch { chunk: usize, offset: usize },
    /// Upload finished but the device never produced a valid status frame.
    NoFirmwareLoaded,
    FirmwareFileNotValid(String),
    Kinematic(KinematicError),
    NotHomed,
    /// The IO worker thread panicked or was already stopped.
    IoThread(String),
    Grip(String),
}

impl fmt::Display for FalconError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            FalconError::TransportNotInitialized => write!(f, "Transport not initialized"),
            FalconError::TransportNotOpen => write!(f, "Transport not open"),
            FalconError::DeviceNotFound => write!(f, "No Falcon device found"),
            FalconError::DeviceIndexOutOfRange { index, count } => write!(
                f,
                "Device index {} out of range ({} devices connected)",
                index, count
            ),
            FalconError::Comm(ref err) => write!(f, "Communication failed: {}", err),
            FalconError::FirmwareModeEntry { stage } => {
                write!(f, "Could not enter firmware mode ({})", stage)
            }
            FalconError::ChecksumMismatch { chunk, offset } => write!(
                f,
                "Firmware checksum mismatch in chunk {} at byte {}",
                chunk, offset
            ),
            FalconError::NoFirmwareLoaded => write!(f, "No firmware loaded on the device"),
            FalconError::FirmwareFileNotValid(ref msg) => {
                write!(f, "Firmware file not valid: {}", msg)
            }
            FalconError::Kinematic(ref err) => write!(f, "Kinematics: {}", err),
            FalconError::NotHomed => write!(f, "Device is not homed"),
            FalconError::IoThread(ref msg) => write!(f, "IO thread: {}", msg),
            FalconError::Grip(ref msg) => write!(f, "Grip: {}", msg),
        }
    }
}

impl std::error::Error for FalconError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FalconError::Comm(err) => Some(err),
            FalconError::Kinematic(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CommError> for FalconError {
    fn from(err: CommError) -> Self {
        FalconError::Comm(err)
    }
}

impl From<KinematicError> for FalconError {
    fn from(err: KinematicError) -> Self {
        FalconError::Kinematic(err)
    }
}

impl From<io::Error> for FalconError {
    fn from(err: io::Error) -> Self {
        FalconError::Comm(CommError::from(err))
    }
}
