//! Encoding of the 16 byte frames exchanged with the Falcon firmware.
//!
//! A frame is `<`, twelve nibble bytes carrying three 16 bit values (low nibble first),
//! one status byte, one spare byte and `>`. Every byte between the markers is biased
//! by `0x41` so the stream stays printable.

use bitflags::bitflags;
use crate::kinematic_traits::Encoders;

pub const FRAME_SIZE: usize = 16;
pub const FRAME_START: u8 = b'<';
pub const FRAME_END: u8 = b'>';
/// Bias added to every payload byte.
pub const ASCII_BIAS: u8 = 0x41;

const STATUS_OFFSET: usize = 13;
const SPARE_OFFSET: usize = 14;

pub type Frame = [u8; FRAME_SIZE];

bitflags! {
    /// LED state sent in the status byte of a command frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FalconLeds: u8 {
        const GREEN = 0x02;
        const BLUE = 0x04;
        const RED = 0x08;
    }
}

bitflags! {
    /// Homing complete bits reported by the firmware, one per encoder.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HomingStatus: u8 {
        const ENCODER_1 = 0x01;
        const ENCODER_2 = 0x02;
        const ENCODER_3 = 0x04;
    }
}

/// Command sent to the device every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandFrame {
    pub forces: Encoders,
    pub homing: bool,
    pub leds: FalconLeds,
}

impl Default for FalconLeds {
    fn default() -> Self {
        FalconLeds::empty()
    }
}

impl Default for HomingStatus {
    fn default() -> Self {
        HomingStatus::empty()
    }
}

/// Decoded device response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFrame {
    pub encoders: Encoders,
    pub homing: HomingStatus,
    /// Low nibble of the status byte, interpreted by the grip.
    pub grip: u8,
}

/// Why a window could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer than 16 bytes from the offset.
    Incomplete,
    BadStart(u8),
    BadEnd(u8),
}

fn put_word(frame: &mut Frame, offset: usize, value: i16) {
    let bits = value as u16;
    for nibble in 0..4 {
        frame[offset + nibble] = ((bits >> (4 * nibble)) & 0x0F) as u8;
    }
}

fn get_word(window: &[u8], offset: usize) -> i16 {
    let mut bits: u16 = 0;
    for nibble in 0..4 {
        let value = window[offset + nibble].wrapping_sub(ASCII_BIAS) & 0x0F;
        bits |= (value as u16) << (4 * nibble);
    }
    bits as i16
}

/// Builds the outbound frame. Never fails.
pub fn encode(command: &CommandFrame) -> Frame {
    let mut frame = [0u8; FRAME_SIZE];
    for leg in 0..3 {
        put_word(&mut frame, 1 + 4 * leg, command.forces[leg]);
    }
    frame[STATUS_OFFSET] = command.leds.bits() | if command.homing { 0x01 } else { 0x00 };
    frame[SPARE_OFFSET] = 0;

    for byte in frame[1..FRAME_SIZE - 1].iter_mut() {
        *byte = byte.wrapping_add(ASCII_BIAS);
    }
    frame[0] = FRAME_START;
    frame[FRAME_SIZE - 1] = FRAME_END;
    frame
}

/// Decodes the frame starting at `offset`. Does not try to recover from bad markers,
/// the caller resynchronizes on the next `<`.
pub fn decode(buffer: &[u8], offset: usize) -> Result<StatusFrame, FrameError> {
    let window = buffer
        .get(offset..offset + FRAME_SIZE)
        .ok_or(FrameError::Incomplete)?;
    if window[0] != FRAME_START {
        return Err(FrameError::BadStart(window[0]));
    }
    if window[FRAME_SIZE - 1] != FRAME_END {
        return Err(FrameError::BadEnd(window[FRAME_SIZE - 1]));
    }

    let encoders = [get_word(window, 1), get_word(window, 5), get_word(window, 9)];
    let status = window[STATUS_OFFSET].wrapping_sub(ASCII_BIAS);

    Ok(StatusFrame {
        encoders,
        homing: HomingStatus::from_bits_truncate((status >> 4) & 0x07),
        grip: status & 0x0F,
    })
}

/// Frame the firmware would send for the given state. The inverse of [`decode`].
pub fn encode_status(status: &StatusFrame) -> Frame {
    let mut frame = [0u8; FRAME_SIZE];
    for leg in 0..3 {
        put_word(&mut frame, 1 + 4 * leg, status.encoders[leg]);
    }
    frame[STATUS_OFFSET] = (status.homing.bits() & 0x07) << 4 | (status.grip & 0x0F);
    for byte in frame[1..FRAME_SIZE - 1].iter_mut() {
        *byte = byte.wrapping_add(ASCII_BIAS);
    }
    frame[0] = FRAME_START;
    frame[FRAME_SIZE - 1] = FRAME_END;
    frame
}

/// Decodes the command frame as the firmware sees it.
pub fn decode_command(buffer: &[u8], offset: usize) -> Result<CommandFrame, FrameError> {
    let window = buffer
        .get(offset..offset + FRAME_SIZE)
        .ok_or(FrameError::Incomplete)?;
    if window[0] != FRAME_START {
        return Err(FrameError::BadStart(window[0]));
    }
    if window[FRAME_SIZE - 1] != FRAME_END {
        return Err(FrameError::BadEnd(window[FRAME_SIZE - 1]));
    }
    let status = window[STATUS_OFFSET].wrapping_sub(ASCII_BIAS);
    Ok(CommandFrame {
        forces: [get_word(window, 1), get_word(window, 5), get_word(window, 9)],
        homing: status & 0x01 != 0,
        leds: FalconLeds::from_bits_truncate(status),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let frame = encode(&CommandFrame {
            forces: [0x1234, -1, 0],
            homing: true,
            leds: FalconLeds::RED,
        });
        assert_eq!(frame.len(), FRAME_SIZE);
        assert_eq!(frame[0], b'<');
        assert_eq!(frame[15], b'>');
        // 0x1234 low nibble first
        assert_eq!(&frame[1..5], &[0x45, 0x44, 0x43, 0x42]);
        assert_eq!(&frame[5..9], &[0x50, 0x50, 0x50, 0x50]);
        assert_eq!(&frame[9..13], &[0x41; 4]);
        assert_eq!(frame[13], (0x08 | 0x01) + 0x41);
        assert_eq!(frame[14], 0x41);
    }

    #[test]
    fn test_decode_reads_status_byte() {
        let mut frame = encode(&CommandFrame::default());
        frame[13] = ((0x05 << 4) | 0x0A) + ASCII_BIAS;
        let status = decode(&frame, 0).unwrap();
        assert_eq!(status.homing, HomingStatus::ENCODER_1 | HomingStatus::ENCODER_3);
        assert_eq!(status.grip, 0x0A);
    }

    #[test]
    fn test_round_trip_extremes() {
        for forces in [[i16::MIN, i16::MAX, 0], [-4095, 4095, -1], [1, -2, 3]] {
            for leds in [FalconLeds::empty(), FalconLeds::all(), FalconLeds::GREEN] {
                for homing in [false, true] {
                    let frame = encode(&CommandFrame { forces, homing, leds });
                    let status = decode(&frame, 0).unwrap();
                    assert_eq!(status.encoders, forces);
                    let expected = (leds.bits() | homing as u8) & 0x0F;
                    assert_eq!(status.grip, expected);
                    assert_eq!(status.homing.bits(), 0);
                }
            }
        }
    }

    #[test]
    fn test_status_frame_round_trip() {
        let status = StatusFrame {
            encoders: [-1046, 976, 336],
            homing: HomingStatus::all(),
            grip: 0x09,
        };
        assert_eq!(decode(&encode_status(&status), 0), Ok(status));
    }

    #[test]
    fn test_command_decode() {
        let command = CommandFrame {
            forces: [100, -200, 4095],
            homing: true,
            leds: FalconLeds::BLUE | FalconLeds::GREEN,
        };
        assert_eq!(decode_command(&encode(&command), 0), Ok(command));
    }

    #[test]
    fn test_decode_rejects_bad_markers() {
        let frame = encode(&CommandFrame::default());

        let mut bad_start = frame;
        bad_start[0] = b'x';
        assert_eq!(decode(&bad_start, 0), Err(FrameError::BadStart(b'x')));

        let mut bad_end = frame;
        bad_end[15] = b'<';
        assert_eq!(decode(&bad_end, 0), Err(FrameError::BadEnd(b'<')));

        assert_eq!(decode(&frame[..15], 0), Err(FrameError::Incomplete));
    }

    #[test]
    fn test_decode_at_offset() {
        let mut buffer = vec![0x13, 0x37, b'>'];
        let forces = [7, 8, 9];
        buffer.extend_from_slice(&encode(&CommandFrame { forces, ..Default::default() }));
        assert!(decode(&buffer, 0).is_err());
        assert_eq!(decode(&buffer, 3).unwrap().encoders, forces);
    }
}
