// External collaborators the running machine depends on but does not
// implement itself: monitor primitives and the two ways a thread can
// leave the process (a clean `success` exit and a `abort` for invariant
// violations the design considers unrecoverable). The default impls
// here wrap `parking_lot`, whose `Mutex`/`Condvar` do not poison on
// panic -- a poisoned lock would otherwise turn one aborting thread's
// panic into a wedged process for every other thread still running.

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::VmError;

/// A monitor: the lock/wait/notify primitive backing `monitorenter` /
/// `monitorexit` and `Object.wait`/`notifyAll`. `acquire`/`release` are
/// reentrant at the call site's discretion -- this trait only exposes
/// the primitive operations; recursion counting is the caller's job.
pub trait Monitor: Send + Sync {
    fn acquire(&self);
    fn release(&self);
    /// Blocks the calling thread until notified. Caller must hold the
    /// monitor; semantically equivalent to `Condvar::wait` under the
    /// monitor's own mutex.
    fn wait(&self);
    fn notify_all(&self);
    /// Releases any OS resources the monitor holds. `parking_lot`
    /// primitives need no explicit teardown, so the default is a no-op;
    /// this exists so the `System` collaborator's construct/dispose pair
    /// (spec section 6) has somewhere to dispatch.
    fn dispose(&self) {}
}

/// Creates monitors, and hosts the two terminal actions a thread can
/// take: `success` for an orderly exit, `abort` for a fatal invariant
/// violation with no recovery path (a tier-3 error; see `error::VmError`
/// for the tier-1/tier-2 counterparts that stay inside the interpreter
/// loop instead of tearing the process down).
pub trait System: Send + Sync {
    fn create_monitor(&self) -> Result<Box<dyn Monitor>, VmError>;

    /// The calling thread is exiting after running to completion with no
    /// uncaught exception.
    fn success(&self);

    /// A fatal, unrecoverable condition (a broken invariant, not a Java
    /// exception) was detected. The default implementation logs the
    /// message and calls `std::process::abort()`; this never returns.
    fn abort(&self, message: &str) -> ! {
        log::error!("fatal: {message}");
        std::process::abort();
    }
}

/// A monitor built from a `parking_lot` mutex/condvar pair. `acquire`
/// leaks its guard into the monitor's own storage so `release` can drop
/// it from an unrelated call frame -- `Monitor::release` takes `&self`,
/// not an owned guard, to match the bytecode-level
/// `monitorenter`/`monitorexit` pairing which does not thread a token
/// through the interpreter's frames.
pub struct StdMonitor {
    state: Mutex<MonitorState>,
    condvar: Condvar,
}

#[derive(Default)]
struct MonitorState {
    locked: bool,
}

impl StdMonitor {
    pub fn new() -> StdMonitor {
        StdMonitor {
            state: Mutex::new(MonitorState::default()),
            condvar: Condvar::new(),
        }
    }

    fn lock_guard(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock()
    }
}

impl Default for StdMonitor {
    fn default() -> Self {
        StdMonitor::new()
    }
}

impl Monitor for StdMonitor {
    fn acquire(&self) {
        let mut guard = self.lock_guard();
        while guard.locked {
            self.condvar.wait(&mut guard);
        }
        guard.locked = true;
    }

    fn release(&self) {
        let mut guard = self.lock_guard();
        guard.locked = false;
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let mut guard = self.lock_guard();
        // The caller holds the monitor; release it for the duration of
        // the wait and treat a wake as re-acquisition, matching
        // Object.wait's contract of returning with the monitor re-held.
        guard.locked = false;
        self.condvar.notify_all();
        while guard.locked {
            self.condvar.wait(&mut guard);
        }
        guard.locked = true;
    }

    fn notify_all(&self) {
        self.condvar.notify_all();
    }
}

/// The default `System` used by the CLI binary and by tests that don't
/// need to observe exit/abort behavior directly.
#[derive(Default)]
pub struct StdSystem;

impl System for StdSystem {
    fn create_monitor(&self) -> Result<Box<dyn Monitor>, VmError> {
        Ok(Box::new(StdMonitor::new()))
    }

    fn success(&self) {
        log::info!("thread exited normally");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn acquire_release_round_trips_uncontended() {
        let m = StdMonitor::new();
        m.acquire();
        m.release();
        m.acquire();
        m.release();
    }

    #[test]
    fn acquire_blocks_until_released_by_another_thread() {
        let m = Arc::new(StdMonitor::new());
        m.acquire();

        let m2 = m.clone();
        let handle = thread::spawn(move || {
            m2.acquire();
            m2.release();
        });

        thread::sleep(Duration::from_millis(20));
        m.release();
        handle.join().unwrap();
    }
}
