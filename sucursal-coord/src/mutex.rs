use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A binary semaphore with capacity one. Acquire and release are driven by
/// distinct messages arriving over the wire (`acquire_permission` and
/// `release_permission` are two independent connections, not a scope-guard),
/// so this can't be a RAII lock — the python original's
/// `threading.Semaphore()` is the direct ancestor.
pub struct Semaphore {
    held: Mutex<bool>,
    free: Condvar,
}

impl Semaphore {
    pub fn new() -> Semaphore {
        Semaphore {
            held: Mutex::new(false),
            free: Condvar::new(),
        }
    }

    /// Blocks until the permit is free and takes it, or gives up after
    /// `timeout`. A zero timeout behaves as a non-blocking try-acquire.
    pub fn acquire(&self, timeout: Duration) -> bool {
        let mut held = self.held.lock();
        let deadline = Instant::now() + timeout;
        while *held {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let result = self.free.wait_for(&mut held, remaining);
            if result.timed_out() && *held {
                return false;
            }
        }
        *held = true;
        true
    }

    pub fn release(&self) {
        let mut held = self.held.lock();
        *held = false;
        self.free.notify_one();
    }
}

impl Default for Semaphore {
    fn default() -> Semaphore {
        Semaphore::new()
    }
}

/// The global write lock (spec §4.4). Only the node currently flagged
/// master grants this to its peers over the network; every other node's
/// copy sits unused except when it is itself promoted by Failover.
pub struct MasterMutex {
    write_lock: Semaphore,
}

impl MasterMutex {
    pub fn new() -> MasterMutex {
        MasterMutex {
            write_lock: Semaphore::new(),
        }
    }

    pub fn acquire_write_lock(&self, timeout: Duration) -> bool {
        self.write_lock.acquire(timeout)
    }

    pub fn release_write_lock(&self) {
        self.write_lock.release();
    }
}

impl Default for MasterMutex {
    fn default() -> MasterMutex {
        MasterMutex::new()
    }
}
