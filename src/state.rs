use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

#[derive(Debug)]
struct Inner {
    stop: AtomicBool,
    // never sent on; dropped on stop so every sleeper wakes up
    wake_tx: Mutex<Option<Sender<()>>>,
    wake_rx: Receiver<()>,
}

/// Shared stop token observed by every channel runner.
///
/// Starts out running, and once stopped stays stopped.
#[derive(Clone, Debug)]
pub struct RunState {
    inner: Arc<Inner>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                stop: AtomicBool::new(false),
                wake_tx: Mutex::new(Some(wake_tx)),
                wake_rx,
            }),
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    /// Request shutdown and wake every sleeping poller. Returns `true` only for
    /// the call that actually flipped the flag.
    pub fn request_stop(&self) -> bool {
        let first = !self.inner.stop.swap(true, Ordering::SeqCst);
        if first {
            self.inner
                .wake_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        }
        first
    }

    /// Sleep for `duration`, returning early if a stop is requested meanwhile.
    /// Returns `true` if the sleep was cut short by a stop.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.stop_requested() {
            return true;
        }
        match self.inner.wake_rx.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => self.stop_requested(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        thread,
        time::{Duration, Instant},
    };

    #[test]
    fn stop_is_sticky_and_set_once() {
        let state = RunState::new();
        assert!(!state.stop_requested());
        assert!(state.request_stop());
        assert!(!state.request_stop());
        assert!(state.stop_requested());
        assert!(state.clone().stop_requested());
    }

    #[test]
    fn sleep_runs_full_interval_while_running() {
        let state = RunState::new();
        let start = Instant::now();
        assert!(!state.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn stop_wakes_sleepers() {
        let state = RunState::new();
        let sleeper = state.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let woken = sleeper.sleep(Duration::from_secs(30));
            (woken, start.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        state.request_stop();
        let (woken, elapsed) = handle.join().unwrap();
        assert!(woken);
        assert!(elapsed < Duration::from_secs(5));
    }
}
