// SPDX-License-Identifier: MPL-2.0
//! Cooperative cancellation and completion signalling.
//!
//! Every sleep in the engine goes through [`CancelToken::sleep`], so a stop
//! request wakes the playback loop and both workers immediately instead of
//! waiting out a backpressure or pre-render delay.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A one-shot cancellation flag with interruptible sleeps.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every sleeper.
    pub fn cancel(&self) {
        let mut cancelled = self.cancelled.lock();
        *cancelled = true;
        self.condvar.notify_all();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    /// Sleeps for `duration` unless cancelled first.
    ///
    /// Returns `true` if the full duration elapsed, `false` if the token was
    /// (or already is) cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.cancelled.lock();
        while !*cancelled {
            if self.condvar.wait_until(&mut cancelled, deadline).timed_out() {
                return !*cancelled;
            }
        }
        false
    }
}

/// Set once when a thread finishes; lets another thread wait with a timeout.
///
/// `JoinHandle::join` cannot time out, so lifecycle code waits on the latch
/// first and only joins a thread that is known to be done.
#[derive(Debug, Default)]
pub struct CompletionLatch {
    done: Mutex<bool>,
    condvar: Condvar,
}

impl CompletionLatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.condvar.notify_all();
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.done.lock()
    }

    /// Waits until the latch is set or `timeout` elapses. Returns whether it
    /// was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.condvar.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }
}

/// Sets the latch when dropped, including during unwinding.
pub(crate) struct LatchGuard<'a>(pub(crate) &'a CompletionLatch);

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        self.0.set();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn sleep_runs_to_completion_when_not_cancelled() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(token.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancel_interrupts_sleep() {
        let token = Arc::new(CancelToken::new());
        let sleeper = Arc::clone(&token);
        let start = Instant::now();
        let handle = thread::spawn(move || sleeper.sleep(Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(20));
        token.cancel();

        let completed = handle.join().expect("sleeper panicked");
        assert!(!completed);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn sleep_after_cancel_returns_immediately() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(!token.sleep(Duration::from_secs(10)));
    }

    #[test]
    fn latch_times_out_when_never_set() {
        let latch = CompletionLatch::new();
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn latch_guard_sets_on_panic() {
        let latch = Arc::new(CompletionLatch::new());
        let inner = Arc::clone(&latch);
        let result = thread::spawn(move || {
            let _guard = LatchGuard(&inner);
            panic!("loop died");
        })
        .join();

        assert!(result.is_err());
        assert!(latch.is_set());
        assert!(latch.wait_timeout(Duration::ZERO));
    }
}
