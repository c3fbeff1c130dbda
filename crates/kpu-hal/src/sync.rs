// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The completion semaphore connecting interrupt context to the driver.

use std::sync::{Condvar, Mutex};

/// A binary semaphore.
///
/// Both the KPU interrupt handler and the DMA completion callback signal
/// the same `Completion`; the execution driver parks on [`take`] between
/// hardware layers. The engine's contract is exactly one [`give`] per
/// suspension point, so the binary (not counting) semantics are sufficient:
/// a give that arrives before the matching take is not lost, and a second
/// give before a take would indicate a protocol violation, not a wake-up
/// to buffer.
///
/// [`take`]: Completion::take
/// [`give`]: Completion::give
#[derive(Debug, Default)]
pub struct Completion {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the semaphore is given, then consumes the signal.
    ///
    /// There is no timeout: a wedged accelerator wedges the caller, by
    /// design of the execution model.
    pub fn take(&self) {
        let mut signalled = self.signalled.lock().unwrap();
        while !*signalled {
            signalled = self.condvar.wait(signalled).unwrap();
        }
        *signalled = false;
    }

    /// Signals the semaphore from thread context.
    pub fn give(&self) {
        let mut signalled = self.signalled.lock().unwrap();
        *signalled = true;
        self.condvar.notify_one();
    }

    /// Signals the semaphore from interrupt context.
    ///
    /// On the host this is identical to [`give`]; on a real target this is
    /// the point where an RTOS would request a context switch if the
    /// release unblocked a higher-priority task.
    ///
    /// [`give`]: Completion::give
    pub fn give_from_isr(&self) {
        self.give();
    }

    /// Drops any pending signal without blocking.
    pub fn drain(&self) {
        *self.signalled.lock().unwrap() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_give_before_take_is_not_lost() {
        let c = Completion::new();
        c.give();
        c.take(); // must not block
    }

    #[test]
    fn test_take_waits_for_cross_thread_give() {
        let c = Arc::new(Completion::new());
        let giver = Arc::clone(&c);
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            giver.give_from_isr();
        });
        c.take();
        t.join().unwrap();
    }

    #[test]
    fn test_take_consumes_signal() {
        let c = Arc::new(Completion::new());
        c.give();
        c.take();

        // A second take must block until the next give.
        let waiter = Arc::clone(&c);
        let t = std::thread::spawn(move || {
            waiter.take();
            true
        });
        std::thread::sleep(Duration::from_millis(20));
        assert!(!t.is_finished());
        c.give();
        assert!(t.join().unwrap());
    }

    #[test]
    fn test_drain() {
        let c = Completion::new();
        c.give();
        c.drain();
        assert!(!*c.signalled.lock().unwrap());
    }
}
