// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for pacing and relay loops
//!
//! Sequence pacing, live relay and preview delivery all run on a dedicated
//! loop thread owned by a [`CaptureLoopController`]. Stopping a controller
//! joins its thread, so once `stop()` returns the loop body will not run
//! again. Paced loops sleep with `park_timeout` and are unparked on stop,
//! which keeps cancellation prompt even at low frame rates.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a loop running in a separate thread
///
/// # Example
///
/// ```ignore
/// let mut pacer = CaptureLoopController::start_paced(
///     "sequence-pacer",
///     Duration::from_millis(33),
///     move || {
///         cursor.advance();
///         LoopAction::Continue
///     },
/// );
///
/// // Later, stop the loop; no tick runs after this returns
/// pacer.stop();
/// ```
pub struct CaptureLoopController {
    /// Thread handle for joining and unparking
    thread_handle: Option<JoinHandle<()>>,
    /// Signal to stop the loop
    stop_signal: Arc<AtomicBool>,
    /// Name for logging
    name: String,
}

impl CaptureLoopController {
    /// Start a loop that calls `loop_fn` back to back
    ///
    /// Suited to bodies that block on their own, such as pulling a frame
    /// with a timeout.
    pub fn start<F>(name: &str, mut loop_fn: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        info!(name = %name, "Starting loop");

        let thread_handle = thread::spawn(move || {
            debug!(name = %name_clone, "Loop thread started");

            while !stop_signal_clone.load(Ordering::SeqCst) {
                if loop_fn() == LoopAction::Stop {
                    debug!(name = %name_clone, "Loop requested stop");
                    break;
                }
            }

            info!(name = %name_clone, "Loop thread exiting");
        });

        Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        }
    }

    /// Start a loop that calls `loop_fn` once per `period`
    ///
    /// The first call happens immediately. A body that overruns its period
    /// delays the next tick instead of bursting to catch up.
    pub fn start_paced<F>(name: &str, period: Duration, mut loop_fn: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        info!(name = %name, period_ms = period.as_millis() as u64, "Starting paced loop");

        let thread_handle = thread::spawn(move || {
            debug!(name = %name_clone, "Paced loop thread started");
            let mut next_tick = Instant::now();

            loop {
                if stop_signal_clone.load(Ordering::SeqCst) {
                    debug!(name = %name_clone, "Stop signal received");
                    break;
                }

                if loop_fn() == LoopAction::Stop {
                    debug!(name = %name_clone, "Loop requested stop");
                    break;
                }

                next_tick += period;
                let now = Instant::now();
                if next_tick < now {
                    next_tick = now;
                }

                // park_timeout may wake spuriously or early on unpark
                while !stop_signal_clone.load(Ordering::SeqCst) {
                    let now = Instant::now();
                    if now >= next_tick {
                        break;
                    }
                    thread::park_timeout(next_tick - now);
                }
            }

            info!(name = %name_clone, "Paced loop thread exiting");
        });

        Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        }
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.as_ref() {
            handle.thread().unpark();
        }
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                // Stopped from inside its own body; the loop exits on its own
                warn!(name = %self.name, "Loop stopped from its own thread, not joining");
                return;
            }
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Loop thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Loop thread finished");
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_basic_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start("test-loop", move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            if count >= 10 {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        });

        controller.join();

        assert_eq!(counter.load(Ordering::SeqCst), 11); // 0-10 inclusive
    }

    #[test]
    fn test_stop_signal() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start("test-loop", move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            LoopAction::Continue
        });

        thread::sleep(Duration::from_millis(50));

        controller.stop();
        assert!(counter.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_paced_loop_respects_period() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller =
            CaptureLoopController::start_paced("test-paced", Duration::from_millis(50), move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                LoopAction::Continue
            });

        thread::sleep(Duration::from_millis(275));
        controller.stop();

        // ~6 ticks expected; allow generous scheduling slack
        let ticks = counter.load(Ordering::SeqCst);
        assert!((2..=8).contains(&ticks), "unexpected tick count {}", ticks);
    }

    #[test]
    fn test_no_tick_after_stop_returns() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller =
            CaptureLoopController::start_paced("test-stop", Duration::from_millis(5), move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                LoopAction::Continue
            });

        thread::sleep(Duration::from_millis(30));
        controller.stop();
        let after_stop = counter.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);
        assert!(!controller.is_running());
    }

    #[test]
    fn test_slow_period_stops_promptly() {
        let mut controller =
            CaptureLoopController::start_paced("test-slow", Duration::from_secs(60), || {
                LoopAction::Continue
            });

        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        controller.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_is_running() {
        let controller = CaptureLoopController::start("test-running", || {
            thread::sleep(Duration::from_millis(100));
            LoopAction::Continue
        });

        assert!(controller.is_running());

        // Drop will stop it
        drop(controller);
    }
}
