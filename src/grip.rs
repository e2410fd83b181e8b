//! Grips attached to the Falcon end effector.

use bitflags::bitflags;

use crate::errors::FalconError;

pub const MAX_DIGITAL_INPUTS: usize = 32;
pub const MAX_ANALOG_INPUTS: usize = 128;

/// A grip decodes its part of the status data after every IO tick.
pub trait FalconGrip: Send {
    /// Parses the grip bytes of the last status frame.
    fn run_grip_loop(&mut self, data: &[u8]) -> Result<(), FalconError>;

    fn digital_input_count(&self) -> usize;

    fn analog_input_count(&self) -> usize;

    /// One bit per digital input.
    fn digital_inputs(&self) -> u32;

    fn digital_input(&self, index: usize) -> bool {
        index < self.digital_input_count().min(MAX_DIGITAL_INPUTS)
            && self.digital_inputs() & (1 << index) != 0
    }

    fn analog_input(&self, _index: usize) -> Option<i32> {
        None
    }
}

bitflags! {
    /// Buttons of the stock ball grip.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GripButtons: u8 {
        const BUTTON_1 = 0x01;
        const BUTTON_2 = 0x02;
        const BUTTON_3 = 0x04;
        const BUTTON_4 = 0x08;
    }
}

/// The four button ball grip shipped with the Falcon. The buttons occupy the low
/// nibble of the status byte.
#[derive(Debug, Clone, Copy)]
pub struct FourButtonGrip {
    buttons: GripButtons,
}

impl FourButtonGrip {
    pub fn new() -> Self {
        FourButtonGrip { buttons: GripButtons::empty() }
    }

    pub fn buttons(&self) -> GripButtons {
        self.buttons
    }
}

impl Default for FourButtonGrip {
    fn default() -> Self {
        Self::new()
    }
}

impl FalconGrip for FourButtonGrip {
    fn run_grip_loop(&mut self, data: &[u8]) -> Result<(), FalconError> {
        // The whole state fits into one nibble
        if data.len() != 1 {
            return Err(FalconError::Grip(format!(
                "four button grip expects 1 byte, got {}",
                data.len()
            )));
        }
        self.buttons = GripButtons::from_bits_truncate(data[0] & 0x0F);
        Ok(())
    }

    fn digital_input_count(&self) -> usize {
        4
    }

    fn analog_input_count(&self) -> usize {
        0
    }

    fn digital_inputs(&self) -> u32 {
        self.buttons.bits() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_button_masks_low_nibble() {
        let mut grip = FourButtonGrip::new();
        grip.run_grip_loop(&[0xF5]).unwrap();
        assert_eq!(grip.buttons(), GripButtons::BUTTON_1 | GripButtons::BUTTON_3);
        assert!(grip.digital_input(0));
        assert!(!grip.digital_input(1));
        assert!(grip.digital_input(2));
        assert!(!grip.digital_input(4));
        assert_eq!(grip.analog_input(0), None);
    }

    #[test]
    fn test_four_button_rejects_size() {
        let mut grip = FourButtonGrip::new();
        assert!(matches!(grip.run_grip_loop(&[1, 2]), Err(FalconError::Grip(_))));
        assert!(matches!(grip.run_grip_loop(&[]), Err(FalconError::Grip(_))));
    }
}
