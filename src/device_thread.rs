//! Runs a [`FalconDevice`] IO loop on its own thread.
//!
//! The thread owns the device. Other threads post the force to render and read back a
//! snapshot of the last state; the device is handed back by [`DeviceThread::stop`].

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::codec::HomingStatus;
use crate::device::{FalconDevice, LoopFlags};
use crate::errors::FalconError;
use crate::kinematic_traits::{Encoders, Force, Position};

/// State published by the IO thread after every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub position: Position,
    pub encoders: Encoders,
    pub homing: HomingStatus,
    pub buttons: u32,
    pub loop_count: u64,
    pub error_count: u64,
    /// Most recent failed tick, kept until another tick fails.
    pub last_error: Option<FalconError>,
}

impl Default for DeviceSnapshot {
    fn default() -> Self {
        DeviceSnapshot {
            position: Position::zeros(),
            encoders: [0; 3],
            homing: HomingStatus::empty(),
            buttons: 0,
            loop_count: 0,
            error_count: 0,
            last_error: None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Plain data, still consistent if a holder panicked
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct DeviceThread {
    run: Arc<AtomicBool>,
    force: Arc<Mutex<Force>>,
    snapshot: Arc<Mutex<DeviceSnapshot>>,
    handle: Option<JoinHandle<FalconDevice>>,
}

impl DeviceThread {
    /// Starts ticking the device with the given flags. `period` is slept between ticks,
    /// zero only yields.
    pub fn spawn(device: FalconDevice, flags: LoopFlags, period: Duration) -> Self {
        let run = Arc::new(AtomicBool::new(true));
        let force = Arc::new(Mutex::new(device.force()));
        let snapshot = Arc::new(Mutex::new(DeviceSnapshot::default()));

        let run_clone = run.clone();
        let force_clone = force.clone();
        let snapshot_clone = snapshot.clone();
        let handle = thread::spawn(move || {
            io_thread(device, flags, period, run_clone, force_clone, snapshot_clone)
        });

        DeviceThread {
            run,
            force,
            snapshot,
            handle: Some(handle),
        }
    }

    /// Force applied from the next tick on.
    pub fn set_force(&self, force: Force) {
        *lock(&self.force) = force;
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        lock(&self.snapshot).clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the loop and returns the device.
    pub fn stop(mut self) -> Result<FalconDevice, FalconError> {
        self.run.store(false, Ordering::Relaxed);
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|payload| {
                let message = panic_message(payload.as_ref());
                error!("IO thread panicked: {}", message);
                FalconError::IoThread(format!("panicked: {}", message))
            }),
            None => Err(FalconError::IoThread("already stopped".to_string())),
        }
    }
}

impl Drop for DeviceThread {
    fn drop(&mut self) {
        self.run.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if let Err(payload) = handle.join() {
                error!("IO thread panicked: {}", panic_message(payload.as_ref()));
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown cause".to_string()
    }
}

fn io_thread(
    mut device: FalconDevice,
    flags: LoopFlags,
    period: Duration,
    run: Arc<AtomicBool>,
    force: Arc<Mutex<Force>>,
    snapshot: Arc<Mutex<DeviceSnapshot>>,
) -> FalconDevice {
    debug!("IO thread started");
    let mut last_error = None;
    while run.load(Ordering::Relaxed) {
        device.set_force(*lock(&force));

        // The loop keeps going, the consumer sees the failure in the snapshot
        if let Err(err) = device.run_io_loop(flags) {
            if last_error.as_ref() != Some(&err) {
                warn!("IO loop failed: {}", err);
            }
            last_error = Some(err);
        }

        {
            let mut state = lock(&snapshot);
            *state = DeviceSnapshot {
                position: device.position(),
                encoders: device.encoders(),
                homing: device.homing_status(),
                buttons: device.grip().map_or(0, |grip| grip.digital_inputs()),
                loop_count: device.loop_count(),
                error_count: device.error_count(),
                last_error: last_error.clone(),
            };
        }

        if period.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(period);
        }
    }
    debug!("IO thread stopped");
    device
}
