//! In-process stand-in for a Falcon on the other end of the FTDI bridge.
//!
//! The simulator plays the boot loader handshake, echoes firmware chunks and, once
//! running, answers every command frame with a status frame. Faults can be injected
//! to exercise the error paths. Clones share the same device, so a test can keep a
//! handle after moving the transport into a [`crate::device::FalconDevice`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::codec::{self, CommandFrame, HomingStatus, StatusFrame, FRAME_SIZE};
use crate::errors::{CommError, CommErrorKind, FalconError};
use crate::handshake::{self, MODE_BYTE, PROBE};
use crate::kinematic_traits::Encoders;
use crate::transport::{CommMode, HandshakeProfile, LineControl, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootState {
    /// Powered, waiting for a DTR pulse.
    Idle,
    AwaitingProbe,
    AwaitingModeByte,
    /// Receiving firmware, echoing every byte.
    Loading,
    Running,
}

#[derive(Debug)]
struct SimulatedState {
    profile: HandshakeProfile,
    devices: usize,
    open: bool,
    mode: CommMode,
    boot: BootState,
    baud: u32,
    dtr: bool,
    requires_poll: bool,

    /// Bytes the host can read.
    rx: VecDeque<u8>,
    /// Command bytes not yet forming a whole frame.
    inbound: Vec<u8>,

    encoders: Encoders,
    homing: HomingStatus,
    grip: u8,
    homing_ticks: usize,
    homing_progress: usize,

    max_read: Option<usize>,
    probe_failures: usize,
    checksum_fault: Option<usize>,
    responding: bool,
    fail_next_read: bool,
    fail_next_write: bool,

    chunks_received: usize,
    firmware_bytes: usize,
    probes_received: usize,
    polls: usize,
    commands_received: usize,
    last_command: Option<CommandFrame>,
}

impl SimulatedState {
    fn new(profile: HandshakeProfile) -> Self {
        SimulatedState {
            profile,
            devices: 1,
            open: false,
            mode: CommMode::Uninitialized,
            boot: BootState::Idle,
            baud: 0,
            dtr: false,
            requires_poll: false,
            rx: VecDeque::new(),
            inbound: Vec::new(),
            encoders: [0; 3],
            homing: HomingStatus::empty(),
            grip: 0,
            homing_ticks: 50,
            homing_progress: 0,
            max_read: None,
            probe_failures: 0,
            checksum_fault: None,
            responding: true,
            fail_next_read: false,
            fail_next_write: false,
            chunks_received: 0,
            firmware_bytes: 0,
            probes_received: 0,
            polls: 0,
            commands_received: 0,
            last_command: None,
        }
    }

    fn available(&self) -> usize {
        match self.max_read {
            Some(limit) => self.rx.len().min(limit),
            None => self.rx.len(),
        }
    }

    fn receive_firmware_chunk(&mut self, data: &[u8]) {
        let mut echo = data.to_vec();
        if self.checksum_fault == Some(self.chunks_received) && !echo.is_empty() {
            let middle = echo.len() / 2;
            echo[middle] ^= 0xFF;
        }
        self.chunks_received += 1;
        self.firmware_bytes += data.len();
        self.rx.extend(echo);
    }

    fn receive_commands(&mut self, data: &[u8]) {
        self.inbound.extend_from_slice(data);
        while self.inbound.len() >= FRAME_SIZE {
            let frame: Vec<u8> = self.inbound.drain(..FRAME_SIZE).collect();
            let Ok(command) = codec::decode_command(&frame, 0) else {
                continue;
            };
            self.commands_received += 1;
            self.last_command = Some(command);
            self.advance_homing(command.homing);

            if !self.responding {
                continue;
            }
            let status = StatusFrame {
                encoders: self.encoders,
                homing: self.homing,
                grip: self.grip,
            };
            self.rx.extend(codec::encode_status(&status));
        }
    }

    fn advance_homing(&mut self, requested: bool) {
        if !requested || self.homing == HomingStatus::all() {
            return;
        }
        self.homing_progress += 1;
        if self.homing_progress >= self.homing_ticks {
            self.homing = HomingStatus::all();
        }
    }
}

/// Simulated Falcon. See the module documentation.
#[derive(Debug, Clone)]
pub struct SimulatedFalcon {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedFalcon {
    pub fn new() -> Self {
        Self::with_profile(HandshakeProfile::libftdi())
    }

    /// Simulates the acknowledgement bytes of the given backend.
    pub fn with_profile(profile: HandshakeProfile) -> Self {
        SimulatedFalcon {
            state: Arc::new(Mutex::new(SimulatedState::new(profile))),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimulatedState> {
        // A panic elsewhere does not leave the simulated device inconsistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_device_count(&self, devices: usize) {
        self.state().devices = devices;
    }

    /// Encoder values reported in every following status frame.
    pub fn set_encoders(&self, encoders: Encoders) {
        self.state().encoders = encoders;
    }

    pub fn set_grip(&self, buttons: u8) {
        self.state().grip = buttons & 0x0F;
    }

    /// Command frames with the homing flag needed before all encoders report homed.
    pub fn set_homing_ticks(&self, ticks: usize) {
        let mut state = self.state();
        state.homing_ticks = ticks;
        state.homing_progress = 0;
        state.homing = HomingStatus::empty();
    }

    /// Limits every read (and the reported byte count) to `limit` bytes, splitting frames.
    pub fn set_max_read(&self, limit: Option<usize>) {
        self.state().max_read = limit.map(|l| l.max(1));
    }

    /// Ignores the first `count` probes.
    pub fn set_probe_failures(&self, count: usize) {
        self.state().probe_failures = count;
    }

    /// Corrupts one byte of the echo of the given firmware chunk (zero based).
    pub fn set_checksum_fault(&self, chunk: Option<usize>) {
        self.state().checksum_fault = chunk;
    }

    /// The device already runs firmware when opened.
    pub fn set_firmware_preloaded(&self, preloaded: bool) {
        let mut state = self.state();
        if preloaded && state.boot == BootState::Idle {
            state.boot = BootState::Running;
        }
    }

    /// When false the running device swallows command frames without answering.
    pub fn set_responding(&self, responding: bool) {
        self.state().responding = responding;
    }

    pub fn set_requires_poll(&self, requires_poll: bool) {
        self.state().requires_poll = requires_poll;
    }

    pub fn fail_next_read(&self) {
        self.state().fail_next_read = true;
    }

    pub fn fail_next_write(&self) {
        self.state().fail_next_write = true;
    }

    /// Queues raw bytes for the host, like line noise.
    pub fn inject(&self, bytes: &[u8]) {
        self.state().rx.extend(bytes.iter().copied());
    }

    pub fn is_running(&self) -> bool {
        self.state().boot == BootState::Running
    }

    pub fn firmware_bytes(&self) -> usize {
        self.state().firmware_bytes
    }

    pub fn firmware_chunks(&self) -> usize {
        self.state().chunks_received
    }

    pub fn probes_received(&self) -> usize {
        self.state().probes_received
    }

    pub fn polls(&self) -> usize {
        self.state().polls
    }

    pub fn commands_received(&self) -> usize {
        self.state().commands_received
    }

    pub fn last_command(&self) -> Option<CommandFrame> {
        self.state().last_command
    }

    fn receive(&self, data: &[u8]) -> Result<(), CommError> {
        let mut state = self.state();
        if !state.open {
            return Err(CommError::new(CommErrorKind::Write, -1, "device not open"));
        }
        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(CommError::new(CommErrorKind::Write, -5, "simulated write failure"));
        }

        let baud = state.baud;
        let profile = state.profile;
        let boot = state.boot;
        match boot {
            BootState::AwaitingProbe if data == &PROBE[..] && baud == profile.probe_baud => {
                state.probes_received += 1;
                if state.probe_failures > 0 {
                    state.probe_failures -= 1;
                } else {
                    state.rx.extend(profile.probe_ack.iter().copied());
                    state.boot = BootState::AwaitingModeByte;
                }
            }
            BootState::AwaitingModeByte if data == &[MODE_BYTE][..] && baud == profile.firmware_baud => {
                state.rx.push_back(MODE_BYTE);
                if profile.mode_ack_len > 1 {
                    state.rx.push_back(0x0D);
                }
                state.boot = BootState::Loading;
                state.chunks_received = 0;
                state.firmware_bytes = 0;
            }
            BootState::Loading if baud == profile.firmware_baud => state.receive_firmware_chunk(data),
            BootState::Running if baud == profile.normal_baud => state.receive_commands(data),
            // Wrong baud or state, the bytes are lost on the line
            _ => {}
        }
        Ok(())
    }
}

impl Default for SimulatedFalcon {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedFalcon {
    fn device_count(&mut self) -> Result<usize, FalconError> {
        Ok(self.state().devices)
    }

    fn open(&mut self, index: usize) -> Result<(), FalconError> {
        let mut state = self.state();
        if state.devices == 0 {
            return Err(FalconError::DeviceNotFound);
        }
        if index >= state.devices {
            return Err(FalconError::DeviceIndexOutOfRange { index, count: state.devices });
        }
        state.open = true;
        state.mode = CommMode::Uninitialized;
        state.rx.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), FalconError> {
        let mut state = self.state();
        state.open = false;
        state.mode = CommMode::Uninitialized;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, CommError> {
        let mut state = self.state();
        if !state.open {
            return Err(CommError::new(CommErrorKind::Read, -1, "device not open"));
        }
        if state.fail_next_read {
            state.fail_next_read = false;
            return Err(CommError::new(CommErrorKind::Read, -4, "simulated read failure"));
        }
        let count = buffer.len().min(state.available());
        for (slot, byte) in buffer.iter_mut().zip(state.rx.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), CommError> {
        self.receive(data)
    }

    fn read_blocking(&mut self, buffer: &mut [u8]) -> Result<usize, CommError> {
        // Everything the device will send is queued synchronously on write.
        self.read(buffer)
    }

    fn write_blocking(&mut self, data: &[u8]) -> Result<(), CommError> {
        self.receive(data)
    }

    fn bytes_available(&mut self) -> Result<usize, CommError> {
        Ok(self.state().available())
    }

    fn requires_poll(&self) -> bool {
        self.state().requires_poll
    }

    fn poll(&mut self) -> Result<(), CommError> {
        self.state().polls += 1;
        Ok(())
    }

    fn comm_mode(&self) -> CommMode {
        self.state().mode
    }

    fn set_firmware_mode(&mut self) -> Result<(), FalconError> {
        let profile = self.state().profile;
        handshake::enter_firmware_mode(self, &profile)?;
        self.state().mode = CommMode::Firmware;
        Ok(())
    }

    fn set_normal_mode(&mut self) -> Result<(), FalconError> {
        let profile = self.state().profile;
        handshake::enter_normal_mode(self, &profile)?;
        self.state().mode = CommMode::Normal;
        Ok(())
    }
}

impl LineControl for SimulatedFalcon {
    fn purge(&mut self) -> Result<(), CommError> {
        let mut state = self.state();
        state.rx.clear();
        state.inbound.clear();
        Ok(())
    }

    fn reset(&mut self) -> Result<(), CommError> {
        Ok(())
    }

    fn set_latency_timer(&mut self, _milliseconds: u8) -> Result<(), CommError> {
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), CommError> {
        let mut state = self.state();
        state.baud = baud;
        // Leaving the loader at the run baud starts the uploaded firmware.
        if state.boot == BootState::Loading && baud == state.profile.normal_baud && state.firmware_bytes > 0 {
            state.boot = BootState::Running;
        }
        Ok(())
    }

    fn set_line_8n1(&mut self) -> Result<(), CommError> {
        Ok(())
    }

    fn set_rts(&mut self, _level: bool) -> Result<(), CommError> {
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), CommError> {
        let mut state = self.state();
        // Rising edge resets the microcontroller into its boot loader.
        if level && !state.dtr {
            state.boot = BootState::AwaitingProbe;
            state.homing = HomingStatus::empty();
            state.homing_progress = 0;
        }
        state.dtr = level;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode, FalconLeds};

    fn opened(profile: HandshakeProfile) -> SimulatedFalcon {
        let mut sim = SimulatedFalcon::with_profile(profile);
        sim.open(0).unwrap();
        sim
    }

    #[test]
    fn test_handshake_for_both_profiles() {
        for profile in [HandshakeProfile::libftdi(), HandshakeProfile::ftd2xx()] {
            let mut sim = opened(profile);
            sim.set_firmware_mode().unwrap();
            assert_eq!(sim.comm_mode(), CommMode::Firmware);
            assert_eq!(sim.probes_received(), 1);
        }
    }

    #[test]
    fn test_probe_retries() {
        let mut sim = opened(HandshakeProfile::libftdi());
        sim.set_probe_failures(3);
        sim.set_firmware_mode().unwrap();
        assert_eq!(sim.probes_received(), 4);

        let mut sim = opened(HandshakeProfile::libftdi());
        sim.set_probe_failures(10);
        assert_eq!(
            sim.set_firmware_mode(),
            Err(FalconError::FirmwareModeEntry { stage: "probe" })
        );
    }

    #[test]
    fn test_open_checks_index() {
        let mut sim = SimulatedFalcon::new();
        assert_eq!(
            sim.open(1),
            Err(FalconError::DeviceIndexOutOfRange { index: 1, count: 1 })
        );
        sim.set_device_count(0);
        assert_eq!(sim.open(0), Err(FalconError::DeviceNotFound));
    }

    #[test]
    fn test_running_device_answers_commands() {
        let mut sim = opened(HandshakeProfile::libftdi());
        sim.set_firmware_preloaded(true);
        sim.set_normal_mode().unwrap();
        sim.set_encoders([1, -2, 3]);

        let command = CommandFrame { forces: [10, 20, 30], homing: false, leds: FalconLeds::RED };
        sim.write(&encode(&command)).unwrap();
        assert_eq!(sim.last_command(), Some(command));

        let mut buffer = [0u8; 32];
        assert_eq!(sim.read(&mut buffer).unwrap(), FRAME_SIZE);
        assert_eq!(codec::decode(&buffer, 0).unwrap().encoders, [1, -2, 3]);
    }

    #[test]
    fn test_firmware_echo_with_fault() {
        let mut sim = opened(HandshakeProfile::libftdi());
        sim.set_firmware_mode().unwrap();
        sim.set_checksum_fault(Some(1));

        let chunk = [0x11u8; 62];
        let mut echo = [0u8; 62];
        sim.write_blocking(&chunk).unwrap();
        assert_eq!(sim.read_blocking(&mut echo).unwrap(), 62);
        assert_eq!(echo, chunk);

        sim.write_blocking(&chunk).unwrap();
        sim.read_blocking(&mut echo).unwrap();
        assert_ne!(echo, chunk);
    }
}
