//! Mode switch sequences shared by all backends.

use tracing::{debug, warn};

use crate::errors::{CommError, FalconError};
use crate::transport::{HandshakeProfile, LineControl, Transport};

/// Sent at probe baud after the DTR pulse.
pub const PROBE: [u8; 3] = [0x0A, 0x43, 0x0D];

/// Sent at firmware baud, echoed back by the boot loader.
pub const MODE_BYTE: u8 = 0x41;

/// Reads up to `buffer.len()` bytes, stopping at the first empty read.
fn read_answer<T: Transport + ?Sized>(transport: &mut T, buffer: &mut [u8]) -> Result<usize, CommError> {
    let mut received = 0;
    while received < buffer.len() {
        let count = transport.read_blocking(&mut buffer[received..])?;
        if count == 0 {
            break;
        }
        received += count;
    }
    Ok(received)
}

fn probe<T: Transport + LineControl + ?Sized>(transport: &mut T, profile: &HandshakeProfile) -> Result<bool, CommError> {
    transport.purge()?;
    transport.reset()?;
    transport.set_latency_timer(profile.firmware_latency_ms)?;
    transport.set_baud_rate(profile.probe_baud)?;
    transport.set_line_8n1()?;
    transport.set_rts(false)?;
    transport.set_dtr(false)?;
    transport.set_dtr(true)?;

    transport.write_blocking(&PROBE)?;
    let mut answer = vec![0u8; profile.probe_ack.len()];
    let count = read_answer(transport, &mut answer)?;
    Ok(answer[..count].ends_with(profile.probe_ack))
}

/// Puts the boot loader into firmware receive mode.
///
/// The probe sequence (purge, reset, 9600 8N1, DTR pulse, probe bytes) is retried up to
/// `profile.probe_attempts` times. After the probe is acknowledged DTR is dropped, the
/// line moves to firmware baud and the mode byte must come back as the first byte of
/// the answer.
pub fn enter_firmware_mode<T: Transport + LineControl + ?Sized>(
    transport: &mut T,
    profile: &HandshakeProfile,
) -> Result<(), FalconError> {
    if !transport.is_open() {
        return Err(FalconError::TransportNotOpen);
    }

    let mut acknowledged = false;
    for attempt in 1..=profile.probe_attempts {
        if probe(transport, profile)? {
            debug!("Probe acknowledged on attempt {} ({})", attempt, profile.name);
            acknowledged = true;
            break;
        }
        warn!("Probe not acknowledged, attempt {} of {}", attempt, profile.probe_attempts);
    }
    if !acknowledged {
        return Err(FalconError::FirmwareModeEntry { stage: "probe" });
    }

    transport.set_dtr(false)?;
    transport.set_baud_rate(profile.firmware_baud)?;
    transport.write_blocking(&[MODE_BYTE])?;

    let mut answer = vec![0u8; profile.mode_ack_len];
    let count = read_answer(transport, &mut answer)?;
    if count == 0 || answer[0] != MODE_BYTE {
        return Err(FalconError::FirmwareModeEntry { stage: "mode byte" });
    }
    debug!("Firmware mode entered at {} baud", profile.firmware_baud);
    Ok(())
}

/// Switches the line to steady state operation and drops stale bytes.
pub fn enter_normal_mode<T: Transport + LineControl + ?Sized>(
    transport: &mut T,
    profile: &HandshakeProfile,
) -> Result<(), FalconError> {
    if !transport.is_open() {
        return Err(FalconError::TransportNotOpen);
    }
    transport.set_latency_timer(profile.normal_latency_ms)?;
    transport.set_baud_rate(profile.normal_baud)?;
    transport.purge()?;
    debug!("Normal mode entered at {} baud", profile.normal_baud);
    Ok(())
}
