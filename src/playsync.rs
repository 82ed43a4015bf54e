// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

/// Stops a producer thread. Producers check it between ticks and sleep on it, so a cancel
/// wakes them straight away instead of after their next tick.
#[derive(Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<Mutex<bool>>,
    condvar: Arc<Condvar>,
}

impl CancelHandle {
    pub fn new() -> CancelHandle {
        CancelHandle::default()
    }

    /// Returns true once the handle has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    /// Blocks until the handle is cancelled.
    pub fn wait(&self) {
        let mut cancelled = self.cancelled.lock();
        while !*cancelled {
            self.condvar.wait(&mut cancelled);
        }
    }

    /// Sleeps for up to `timeout`. Returns true if the handle was cancelled meanwhile.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.cancelled.lock();
        while !*cancelled {
            if self.condvar.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }

    /// Cancels the handle and wakes every waiter.
    pub fn cancel(&self) {
        let mut cancelled = self.cancelled.lock();
        if !*cancelled {
            *cancelled = true;
            self.condvar.notify_all();
        }
    }
}
