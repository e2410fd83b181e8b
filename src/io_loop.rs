//! Steady state exchange of command and status frames.

use tracing::{debug, warn};

use crate::codec::{self, CommandFrame, FalconLeds, HomingStatus, FRAME_SIZE, FRAME_START};
use crate::errors::FalconError;
use crate::kinematic_traits::Encoders;
use crate::transport::{CommMode, Transport};

/// Upper bound on bytes taken from the transport in one tick.
const MAX_READ: usize = 1024;

/// One side of the frame exchange. Not reentrant: the outstanding write flag and the
/// partial frame buffer belong to a single caller.
#[derive(Debug, Default)]
pub struct IoLoop {
    command: CommandFrame,

    encoders: Encoders,
    homing_status: HomingStatus,
    grip_info: u8,

    /// Received bytes not yet consumed as frames.
    rx: Vec<u8>,
    has_written: bool,

    loop_count: u64,
    frame_count: u64,
    malformed_count: u64,
}

impl IoLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs one tick: collects the answer to the previous command if it has arrived,
    /// then sends the next command.
    ///
    /// Returns true if at least one status frame was decoded. With a command
    /// outstanding and nothing received yet the tick returns false without writing.
    pub fn tick(&mut self, transport: &mut dyn Transport) -> Result<bool, FalconError> {
        if !transport.is_open() {
            return Err(FalconError::TransportNotOpen);
        }
        // Neither line setup has run since open
        if transport.comm_mode() == CommMode::Uninitialized {
            return Err(FalconError::TransportNotInitialized);
        }
        if transport.requires_poll() {
            transport.poll()?;
        }

        let mut decoded = false;
        if self.has_written {
            let available = transport.bytes_available()?;
            if available == 0 {
                return Ok(false);
            }

            let start = self.rx.len();
            self.rx.resize(start + available.min(MAX_READ), 0);
            let count = match transport.read(&mut self.rx[start..]) {
                Ok(count) => count,
                Err(err) => {
                    self.rx.truncate(start);
                    return Err(err.into());
                }
            };
            self.rx.truncate(start + count);

            decoded = self.drain_frames();
            self.has_written = false;
            self.loop_count += 1;
        }

        transport.write(&codec::encode(&self.command))?;
        self.has_written = true;
        Ok(decoded)
    }

    /// Decodes every complete frame in the receive buffer, resynchronizing on `<`.
    /// Keeps an incomplete tail for the next tick.
    fn drain_frames(&mut self) -> bool {
        let mut decoded = false;
        let mut position = 0;

        loop {
            match self.rx[position..].iter().position(|&b| b == FRAME_START) {
                Some(skip) => {
                    if skip > 0 {
                        debug!("Skipped {} bytes before frame start", skip);
                    }
                    position += skip;
                }
                None => {
                    position = self.rx.len();
                    break;
                }
            }
            if self.rx.len() - position < FRAME_SIZE {
                break;
            }

            match codec::decode(&self.rx, position) {
                Ok(status) => {
                    self.encoders = status.encoders;
                    self.homing_status = status.homing;
                    self.grip_info = status.grip;
                    self.frame_count += 1;
                    decoded = true;
                    position += FRAME_SIZE;
                }
                Err(err) => {
                    self.malformed_count += 1;
                    warn!("Malformed frame ({:?}), resynchronizing", err);
                    position += 1;
                }
            }
        }

        self.rx.drain(..position);
        decoded
    }

    /// Forgets the outstanding write and any partial frame.
    pub fn reset_state(&mut self) {
        self.has_written = false;
        self.rx.clear();
    }

    pub fn set_forces(&mut self, forces: Encoders) {
        self.command.forces = forces;
    }

    pub fn forces(&self) -> Encoders {
        self.command.forces
    }

    /// While set the firmware drives the arms to their end stops to find the encoder index.
    pub fn set_homing_mode(&mut self, homing: bool) {
        self.command.homing = homing;
    }

    pub fn homing_mode(&self) -> bool {
        self.command.homing
    }

    pub fn set_leds(&mut self, leds: FalconLeds) {
        self.command.leds = leds;
    }

    pub fn leds(&self) -> FalconLeds {
        self.command.leds
    }

    pub fn encoders(&self) -> Encoders {
        self.encoders
    }

    pub fn homing_status(&self) -> HomingStatus {
        self.homing_status
    }

    /// All three encoders report homed.
    pub fn is_homed(&self) -> bool {
        self.homing_status.is_all()
    }

    /// Low nibble of the last status byte, consumed by the grip.
    pub fn grip_info(&self) -> u8 {
        self.grip_info
    }

    /// Ticks that completed a read.
    pub fn loop_count(&self) -> u64 {
        self.loop_count
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed_count
    }

    /// Bytes waiting for the rest of their frame.
    pub fn pending_bytes(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_status, StatusFrame};
    use crate::errors::CommErrorKind;
    use crate::simulated::SimulatedFalcon;

    fn running() -> (SimulatedFalcon, Box<dyn Transport>) {
        let sim = SimulatedFalcon::new();
        let mut transport: Box<dyn Transport> = Box::new(sim.clone());
        transport.open(0).unwrap();
        sim.set_firmware_preloaded(true);
        transport.set_normal_mode().unwrap();
        (sim, transport)
    }

    #[test]
    fn test_not_open() {
        let mut transport: Box<dyn Transport> = Box::new(SimulatedFalcon::new());
        let mut io = IoLoop::new();
        assert_eq!(io.tick(transport.as_mut()), Err(FalconError::TransportNotOpen));
    }

    #[test]
    fn test_not_initialized() {
        let sim = SimulatedFalcon::new();
        let mut transport: Box<dyn Transport> = Box::new(sim.clone());
        transport.open(0).unwrap();
        let mut io = IoLoop::new();
        assert_eq!(io.tick(transport.as_mut()), Err(FalconError::TransportNotInitialized));
        assert_eq!(sim.commands_received(), 0);
    }

    #[test]
    fn test_write_then_read() {
        let (sim, mut transport) = running();
        sim.set_encoders([100, -200, 300]);
        let mut io = IoLoop::new();
        io.set_forces([1, 2, 3]);

        // First tick only writes
        assert_eq!(io.tick(transport.as_mut()), Ok(false));
        assert_eq!(sim.last_command().unwrap().forces, [1, 2, 3]);

        assert_eq!(io.tick(transport.as_mut()), Ok(true));
        assert_eq!(io.encoders(), [100, -200, 300]);
        assert_eq!(io.loop_count(), 1);
        assert_eq!(sim.commands_received(), 2);
    }

    #[test]
    fn test_waits_for_answer() {
        let (sim, mut transport) = running();
        sim.set_responding(false);
        let mut io = IoLoop::new();

        for _ in 0..5 {
            assert_eq!(io.tick(transport.as_mut()), Ok(false));
        }
        // Nothing came back, so only the first command was sent
        assert_eq!(sim.commands_received(), 1);
    }

    #[test]
    fn test_split_frames() {
        let (sim, mut transport) = running();
        sim.set_encoders([7, 8, 9]);
        sim.set_max_read(Some(5));
        let mut io = IoLoop::new();

        io.tick(transport.as_mut()).unwrap();
        let mut decoded = false;
        for _ in 0..4 {
            decoded |= io.tick(transport.as_mut()).unwrap();
        }
        assert!(decoded);
        assert_eq!(io.encoders(), [7, 8, 9]);
        assert_eq!(io.malformed_count(), 0);
        assert!(io.pending_bytes() < FRAME_SIZE);
    }

    #[test]
    fn test_concatenated_frames_and_garbage() {
        let (sim, mut transport) = running();
        let mut io = IoLoop::new();
        io.tick(transport.as_mut()).unwrap();

        let first = StatusFrame { encoders: [1, 1, 1], homing: HomingStatus::empty(), grip: 0 };
        let second = StatusFrame { encoders: [2, 2, 2], homing: HomingStatus::all(), grip: 0x3 };
        let mut noise = vec![0x00, b'>', 0x7F];
        noise.extend_from_slice(&encode_status(&first));
        noise.extend_from_slice(&encode_status(&second));
        // Discard the device's own answer so only the injected bytes are read
        let mut sink = [0u8; 64];
        transport.read(&mut sink).unwrap();
        sim.inject(&noise);

        assert_eq!(io.tick(transport.as_mut()), Ok(true));
        assert_eq!(io.frame_count(), 2);
        assert_eq!(io.encoders(), [2, 2, 2]);
        assert!(io.is_homed());
        assert_eq!(io.grip_info(), 0x3);
    }

    #[test]
    fn test_corrupted_marker_is_counted() {
        let (sim, mut transport) = running();
        let mut io = IoLoop::new();
        io.tick(transport.as_mut()).unwrap();
        let mut sink = [0u8; 64];
        transport.read(&mut sink).unwrap();

        let good = StatusFrame { encoders: [5, 6, 7], homing: HomingStatus::empty(), grip: 0 };
        let mut corrupted = encode_status(&StatusFrame { encoders: [9, 9, 9], ..good });
        corrupted[15] = b'#';
        let mut bytes = corrupted.to_vec();
        bytes.extend_from_slice(&encode_status(&good));
        sim.inject(&bytes);

        assert_eq!(io.tick(transport.as_mut()), Ok(true));
        assert_eq!(io.encoders(), [5, 6, 7]);
        assert_eq!(io.malformed_count(), 1);
    }

    #[test]
    fn test_read_error_propagates() {
        let (sim, mut transport) = running();
        sim.set_encoders([4, 4, 4]);
        let mut io = IoLoop::new();
        io.tick(transport.as_mut()).unwrap();

        sim.fail_next_read();
        match io.tick(transport.as_mut()) {
            Err(FalconError::Comm(err)) => assert_eq!(err.kind, CommErrorKind::Read),
            other => panic!("Unexpected {:?}", other),
        }
        assert_eq!(io.encoders(), [0, 0, 0]);
        assert_eq!(io.loop_count(), 0);

        // The answer is still there for the next tick
        assert_eq!(io.tick(transport.as_mut()), Ok(true));
        assert_eq!(io.encoders(), [4, 4, 4]);
    }

    #[test]
    fn test_poll_is_called() {
        let (sim, mut transport) = running();
        sim.set_requires_poll(true);
        let mut io = IoLoop::new();
        io.tick(transport.as_mut()).unwrap();
        io.tick(transport.as_mut()).unwrap();
        assert_eq!(sim.polls(), 2);
    }
}
