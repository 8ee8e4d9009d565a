// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for the capture loop
//!
//! The detector owns the camera and LED, and the LED sequence must not be
//! interrupted by anything else, so detection runs on a dedicated, named
//! thread. The controller reports initialization failures back to whoever
//! joins it and stops the loop when dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Action returned by the capture loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a capture loop running in a separate thread
///
/// # Example
///
/// ```ignore
/// let mut controller = CaptureLoopController::start_with_init(
///     "goal-detector",
///     move || Ok(GoalDetector::new(open_rig()?, &config, clock)),
///     move |detector: &mut GoalDetector| detector.iterate(&mut sink),
/// )?;
/// controller.join()?;
/// ```
pub struct CaptureLoopController {
    /// Thread handle for joining; the thread reports initialization errors
    thread_handle: Option<JoinHandle<Result<(), String>>>,
    /// Signal to stop the loop
    stop_signal: Arc<AtomicBool>,
    /// Name for logging
    name: String,
}

impl CaptureLoopController {
    /// Start a capture loop with initialization
    ///
    /// The `init_fn` runs once on the new thread, so resources that are not
    /// `Send` may be created there. If it fails the loop never runs and
    /// `join()` returns the error.
    ///
    /// # Arguments
    ///
    /// * `name` - A descriptive name for the loop
    /// * `init_fn` - Initialization closure, returns Ok(state) or Err(message)
    /// * `loop_fn` - Loop closure that receives the state and returns LoopAction
    ///
    /// The thread carries `name`. An error is returned only if it could not
    /// be spawned.
    pub fn start_with_init<S, I, F>(name: &str, init_fn: I, mut loop_fn: F) -> Result<Self, String>
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        info!(name = %name, "Starting capture loop");

        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            debug!(name = %name_clone, "Capture loop thread started, initializing...");

            let mut state = match init_fn() {
                Ok(s) => {
                    debug!(name = %name_clone, "Initialization successful");
                    s
                }
                Err(e) => {
                    warn!(name = %name_clone, error = %e, "Initialization failed");
                    return Err(e);
                }
            };

            loop {
                if stop_signal_clone.load(Ordering::SeqCst) {
                    debug!(name = %name_clone, "Stop signal received");
                    break;
                }

                match loop_fn(&mut state) {
                    LoopAction::Continue => {}
                    LoopAction::Stop => {
                        debug!(name = %name_clone, "Loop requested stop");
                        break;
                    }
                }
            }

            // Drop the state here so hardware is released before join returns
            drop(state);
            info!(name = %name_clone, "Capture loop thread exiting");
            Ok(())
        });
        let thread_handle = spawned.map_err(|e| format!("failed to spawn {} thread: {}", name, e))?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting capture loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) -> Result<(), String> {
        self.request_stop();
        self.join()
    }

    /// Wait for the thread to finish without sending stop signal
    ///
    /// Returns the initialization error, or a message if the thread panicked.
    pub fn join(&mut self) -> Result<(), String> {
        let Some(handle) = self.thread_handle.take() else {
            return Ok(());
        };

        debug!(name = %self.name, "Waiting for capture loop thread to finish");
        match handle.join() {
            Ok(result) => {
                debug!(name = %self.name, "Capture loop thread finished");
                result
            }
            Err(e) => {
                warn!(name = %self.name, "Capture loop thread panicked: {:?}", e);
                Err(format!("{} thread panicked", self.name))
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn test_basic_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start_with_init(
            "test-loop",
            || Ok(()),
            move |_: &mut ()| {
                let count = counter_clone.fetch_add(1, Ordering::SeqCst);
                if count >= 10 {
                    LoopAction::Stop
                } else {
                    LoopAction::Continue
                }
            },
        )
        .unwrap();

        assert!(controller.join().is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_stop_ends_endless_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start_with_init(
            "test-loop",
            || Ok(()),
            move |_: &mut ()| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                LoopAction::Continue
            },
        )
        .unwrap();

        thread::sleep(Duration::from_millis(30));
        assert!(controller.stop().is_ok());
        assert!(counter.load(Ordering::SeqCst) > 0);
        // A second stop finds nothing left to join
        assert!(controller.stop().is_ok());
    }

    #[test]
    fn test_with_init() {
        let result = Arc::new(AtomicU32::new(0));
        let result_clone = Arc::clone(&result);

        let mut controller = CaptureLoopController::start_with_init(
            "test-init-loop",
            || Ok(42u32),
            move |state| {
                result_clone.store(*state, Ordering::SeqCst);
                LoopAction::Stop
            },
        )
        .unwrap();

        assert!(controller.join().is_ok());
        assert_eq!(result.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_thread_carries_loop_name() {
        let names = Arc::new(Mutex::new(Vec::new()));
        let init_names = Arc::clone(&names);
        let loop_names = Arc::clone(&names);

        let mut controller = CaptureLoopController::start_with_init(
            "goal-detector",
            move || {
                init_names.lock().unwrap().push(thread::current().name().map(String::from));
                Ok(())
            },
            move |_: &mut ()| {
                loop_names.lock().unwrap().push(thread::current().name().map(String::from));
                LoopAction::Stop
            },
        )
        .unwrap();

        assert!(controller.join().is_ok());
        let names = names.lock().unwrap();
        assert_eq!(*names, vec![Some("goal-detector".to_string()); 2]);
    }

    #[test]
    fn test_init_failure_is_reported() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);

        let mut controller = CaptureLoopController::start_with_init(
            "test-fail-init",
            || Err::<(), _>("no camera".to_string()),
            move |_: &mut ()| {
                ran_clone.store(true, Ordering::SeqCst);
                LoopAction::Stop
            },
        )
        .unwrap();

        assert_eq!(controller.join(), Err("no camera".to_string()));
        assert!(!ran.load(Ordering::SeqCst));
    }
}
