//! Running/paused/stopped lifecycle contract for background-threaded devices.
//!
//! Every unit with a dedicated execution thread shares a [`DeviceControl`].
//! The owning loop polls it at a safe suspension point (typically once per
//! frame) and idles in [`wait_while_paused`](DeviceControl::wait_while_paused)
//! without consuming emulated cycles. All transitions are idempotent and may
//! be called from any thread; `stop()` always performs the pause transition
//! before clearing `running`, so a stopped device is never observed unpaused.

use std::sync::{Condvar, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Flags {
    running: bool,
    paused: bool,
}

/// Shared lifecycle flags plus the wakeup used to resume or stop a paused
/// device.
pub struct DeviceControl {
    flags: Mutex<Flags>,
    cond: Condvar,
}

impl DeviceControl {
    /// A fresh control in the stopped state.
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(Flags {
                running: false,
                paused: true,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin executing: `running = true`, `paused = false`.
    pub fn start(&self) {
        let mut flags = self.lock();
        flags.running = true;
        flags.paused = false;
        self.cond.notify_all();
    }

    /// Suspend execution at the loop's next safe point.
    pub fn pause(&self) {
        let mut flags = self.lock();
        flags.paused = true;
    }

    /// Resume a paused device. Meaningful only while running; a no-op on a
    /// stopped device, which must stay paused.
    pub fn resume(&self) {
        let mut flags = self.lock();
        if flags.running {
            flags.paused = false;
            self.cond.notify_all();
        }
    }

    /// End execution. Pauses first, then clears `running`, and wakes any
    /// thread idling in [`wait_while_paused`](Self::wait_while_paused).
    pub fn stop(&self) {
        let mut flags = self.lock();
        flags.paused = true;
        flags.running = false;
        self.cond.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Block while the device is paused and still running.
    ///
    /// Returns `true` if the call actually waited, so the loop can
    /// re-baseline its timing after the idle period. Returns immediately once
    /// the device is stopped.
    pub fn wait_while_paused(&self) -> bool {
        let mut flags = self.lock();
        let mut waited = false;
        while flags.paused && flags.running {
            waited = true;
            flags = self
                .cond
                .wait(flags)
                .unwrap_or_else(PoisonError::into_inner);
        }
        waited
    }
}

impl Default for DeviceControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn initial_state_is_stopped() {
        let control = DeviceControl::new();
        assert!(!control.is_running());
        assert!(control.is_paused());
    }

    #[test]
    fn start_pause_resume_cycle() {
        let control = DeviceControl::new();
        control.start();
        assert!(control.is_running());
        assert!(!control.is_paused());

        control.pause();
        assert!(control.is_running());
        assert!(control.is_paused());

        control.resume();
        assert!(control.is_running());
        assert!(!control.is_paused());
    }

    #[test]
    fn stop_always_leaves_paused_set() {
        let control = DeviceControl::new();
        control.start();
        control.stop();
        assert!(!control.is_running());
        assert!(control.is_paused());

        // The invariant holds for every call order.
        control.start();
        control.pause();
        control.stop();
        assert!(!control.is_running());
        assert!(control.is_paused());
    }

    #[test]
    fn lifecycle_calls_are_idempotent() {
        let control = DeviceControl::new();
        control.pause();
        control.pause();
        control.stop();
        control.stop();
        control.start();
        control.start();
        assert!(control.is_running());
        control.resume();
        control.resume();
        assert!(!control.is_paused());
    }

    #[test]
    fn resume_on_stopped_device_is_a_no_op() {
        let control = DeviceControl::new();
        control.start();
        control.stop();
        control.resume();
        assert!(!control.is_running());
        assert!(control.is_paused());
    }

    #[test]
    fn wait_returns_immediately_when_unpaused_or_stopped() {
        let control = DeviceControl::new();
        assert!(!control.wait_while_paused()); // stopped
        control.start();
        assert!(!control.wait_while_paused()); // running, not paused
    }

    #[test]
    fn stop_wakes_a_paused_waiter() {
        let control = Arc::new(DeviceControl::new());
        control.start();
        control.pause();

        let (tx, rx) = mpsc::channel();
        let waiter = Arc::clone(&control);
        let handle = thread::spawn(move || {
            let waited = waiter.wait_while_paused();
            tx.send(waited).unwrap();
        });

        // Give the waiter time to park, then stop from this thread.
        thread::sleep(Duration::from_millis(20));
        control.stop();

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        handle.join().unwrap();
    }

    #[test]
    fn resume_wakes_a_paused_waiter() {
        let control = Arc::new(DeviceControl::new());
        control.start();
        control.pause();

        let waiter = Arc::clone(&control);
        let handle = thread::spawn(move || waiter.wait_while_paused());

        thread::sleep(Duration::from_millis(20));
        control.resume();

        assert!(handle.join().unwrap());
        assert!(control.is_running());
    }
}
