//! Upload of the microcontroller firmware through the boot loader.

#[cfg(feature = "allow_filesystem")]
use std::path::Path;

use tracing::{debug, info, warn};

use crate::errors::{CommError, FalconError};
use crate::io_loop::IoLoop;
use crate::transport::{CommMode, Transport};

/// Bytes per upload chunk. Keeps every USB packet under 64 bytes with the two status
/// bytes the FTDI bridge prepends.
pub const FIRMWARE_CHUNK_SIZE: usize = 62;

/// Rounds of IO ticks tried when checking for running firmware.
pub const CONFIRM_RETRIES: usize = 10;
pub const CONFIRM_TICKS: usize = 100;

#[derive(Debug, Default)]
pub struct FirmwareLoader {
    image: Option<Vec<u8>>,
    loaded: bool,
}

impl FirmwareLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(image: Vec<u8>) -> Result<Self, FalconError> {
        let mut loader = Self::new();
        loader.set_image(image)?;
        Ok(loader)
    }

    pub fn set_image(&mut self, image: Vec<u8>) -> Result<(), FalconError> {
        if image.is_empty() {
            return Err(FalconError::FirmwareFileNotValid("firmware image is empty".to_string()));
        }
        self.image = Some(image);
        Ok(())
    }

    #[cfg(feature = "allow_filesystem")]
    pub fn set_image_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), FalconError> {
        let path = path.as_ref();
        let image = std::fs::read(path).map_err(|e| {
            FalconError::FirmwareFileNotValid(format!("{}: {}", path.display(), e))
        })?;
        self.set_image(image)
    }

    pub fn image(&self) -> Option<&[u8]> {
        self.image.as_deref()
    }

    /// True after a successful load or confirmation.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Marks the firmware as unknown, for example after the device was closed.
    pub fn reset(&mut self) {
        self.loaded = false;
    }

    /// One upload attempt: firmware mode handshake, chunked upload with echo check,
    /// switch to normal mode.
    pub fn upload(&mut self, transport: &mut dyn Transport, skip_checksum: bool) -> Result<(), FalconError> {
        self.loaded = false;
        let image = self.image.as_deref().ok_or_else(|| {
            FalconError::FirmwareFileNotValid("no firmware image set".to_string())
        })?;
        if !transport.is_open() {
            return Err(FalconError::TransportNotOpen);
        }

        transport.set_firmware_mode()?;

        let mut echo = [0u8; FIRMWARE_CHUNK_SIZE];
        for (chunk_index, chunk) in image.chunks(FIRMWARE_CHUNK_SIZE).enumerate() {
            transport.write_blocking(chunk)?;

            let mut received = 0;
            while received < chunk.len() {
                let count = transport.read_blocking(&mut echo[received..chunk.len()])?;
                if count == 0 {
                    return Err(CommError::timeout(format!(
                        "echo of firmware chunk {} stopped after {} of {} bytes",
                        chunk_index,
                        received,
                        chunk.len()
                    ))
                    .into());
                }
                received += count;
            }

            if !skip_checksum {
                if let Some(offset) = chunk.iter().zip(echo.iter()).position(|(sent, back)| sent != back) {
                    return Err(FalconError::ChecksumMismatch { chunk: chunk_index, offset });
                }
            }
        }
        debug!("Uploaded {} bytes of firmware", image.len());

        transport.set_normal_mode()?;
        Ok(())
    }

    /// Uploads the firmware, retrying the whole sequence up to `retries` times, then
    /// checks that the device answers.
    ///
    /// Returns the error of the last attempt if all uploads fail, or `NoFirmwareLoaded`
    /// if the upload went through but the device stays silent.
    pub fn load_firmware(
        &mut self,
        transport: &mut dyn Transport,
        io: &mut IoLoop,
        retries: usize,
        skip_checksum: bool,
    ) -> Result<(), FalconError> {
        let mut last_error = FalconError::FirmwareModeEntry { stage: "no attempt made" };
        let mut uploaded = false;

        for attempt in 1..=retries.max(1) {
            match self.upload(transport, skip_checksum) {
                Ok(()) => {
                    uploaded = true;
                    break;
                }
                Err(err) => {
                    warn!("Firmware upload attempt {} of {} failed: {}", attempt, retries.max(1), err);
                    if matches!(err, FalconError::TransportNotOpen | FalconError::FirmwareFileNotValid(_)) {
                        return Err(err);
                    }
                    last_error = err;
                }
            }
        }
        if !uploaded {
            return Err(last_error);
        }

        self.confirm_firmware(transport, io)?;
        info!("Firmware loaded");
        Ok(())
    }

    /// Checks for running firmware by ticking the IO loop until a status frame arrives.
    pub fn confirm_firmware(&mut self, transport: &mut dyn Transport, io: &mut IoLoop) -> Result<(), FalconError> {
        if !transport.is_open() {
            return Err(FalconError::TransportNotOpen);
        }
        if transport.comm_mode() != CommMode::Normal {
            transport.set_normal_mode()?;
        }

        for _ in 0..CONFIRM_RETRIES {
            io.reset_state();
            for _ in 0..CONFIRM_TICKS {
                if io.tick(transport)? {
                    self.loaded = true;
                    return Ok(());
                }
            }
        }
        self.loaded = false;
        Err(FalconError::NoFirmwareLoaded)
    }
}
