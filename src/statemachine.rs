// Thread-coordination state machine. Every thread the machine manages
// occupies exactly one of these states at a time, and `transition` below
// is the only thing allowed to move a thread between them -- the thread
// module calls into it rather than mutating a state field directly, so
// `active_count`/`live_count` can never drift out of sync with the
// states they summarize, and the blocking conditions (the coordinator's
// actual safe-point barrier) live in exactly one place.
//
// Transition table (spec section 4.2), every row taken under the same
// internal lock:
//   None/Idle -> Active    wait until no Exclusive holder; active_count++
//                           (and live_count++ only from None)
//   Active    -> Idle      active_count--; notify_all
//   Active    -> Exclusive assert no other Exclusive; set held; wait
//                           until active_count==1 (i.e. every other
//                           thread has dropped to Idle)
//   Exclusive -> Active    clear held; notify_all
//   Exclusive -> Idle      clear held; active_count--; notify_all
//   */Exclusive -> Zombie  [clear held]; active_count--; live_count--;
//                           notify_all
//   */Exclusive -> Exit    [clear held]; active_count--; wait until
//                           live_count==1 (this thread is the last one
//                           standing); live_count--; notify_all
//
// At most one thread may hold `Exclusive` at a time; a collection only
// ever runs while `active_count == 1` (the collecting thread itself),
// which is exactly the barrier "during a collection, no mutator runs".

use parking_lot::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    None,
    Active,
    Idle,
    Zombie,
    Exclusive,
    Exit,
}

#[derive(Debug, Default)]
struct Counters {
    active_count: usize,
    live_count: usize,
    exclusive_held: bool,
}

#[derive(Debug)]
pub struct StateMachine {
    counters: Mutex<Counters>,
    condvar: Condvar,
}

impl StateMachine {
    pub fn new() -> StateMachine {
        StateMachine {
            counters: Mutex::new(Counters::default()),
            condvar: Condvar::new(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.counters.lock().active_count
    }

    pub fn live_count(&self) -> usize {
        self.counters.lock().live_count
    }

    pub fn exclusive_held(&self) -> bool {
        self.counters.lock().exclusive_held
    }

    /// Blocks (if the transition's precondition calls for it) and then
    /// applies the bookkeeping side effect of moving one thread from
    /// `from` to `to`. Callers own the thread's own `ThreadState` field;
    /// this only adjusts shared totals and enforces the safe-point
    /// barriers. Every wait re-checks its condition against spurious and
    /// legitimate concurrent wakeups, per the usual condvar discipline.
    pub fn transition(&self, from: ThreadState, to: ThreadState) {
        use ThreadState::*;
        let mut c = self.counters.lock();
        log::trace!("thread state {from:?} -> {to:?}");

        match (from, to) {
            (None | Idle, Active) => {
                self.wait_while(&mut c, |c| c.exclusive_held);
                c.active_count += 1;
                if from == ThreadState::None {
                    c.live_count += 1;
                }
            }
            (Active, Idle) => {
                c.active_count -= 1;
                self.condvar.notify_all();
            }
            (Active, Exclusive) => {
                assert!(!c.exclusive_held, "only one thread may hold Exclusive");
                c.exclusive_held = true;
                self.wait_while(&mut c, |c| c.active_count != 1);
            }
            (Exclusive, Active) => {
                c.exclusive_held = false;
                self.condvar.notify_all();
            }
            (Exclusive, Idle) => {
                c.exclusive_held = false;
                c.active_count -= 1;
                self.condvar.notify_all();
            }
            (Active | Exclusive, Zombie) => {
                if from == Exclusive {
                    c.exclusive_held = false;
                }
                c.active_count -= 1;
                self.condvar.notify_all();
            }
            (Active | Exclusive, Exit) => {
                if from == Exclusive {
                    c.exclusive_held = false;
                }
                c.active_count -= 1;
                self.condvar.notify_all();
                self.wait_while(&mut c, |c| c.live_count != 1);
                c.live_count -= 1;
                self.condvar.notify_all();
            }
            _ => unreachable!("unsupported state transition {from:?} -> {to:?}"),
        }
    }

    fn wait_while(&self, guard: &mut MutexGuard<'_, Counters>, mut cond: impl FnMut(&Counters) -> bool) {
        while cond(guard) {
            self.condvar.wait(guard);
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        StateMachine::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use ThreadState::*;

    #[test]
    fn start_and_exit_round_trip_counters_to_zero() {
        let sm = StateMachine::new();
        sm.transition(None, Active);
        assert_eq!(sm.active_count(), 1);
        assert_eq!(sm.live_count(), 1);

        sm.transition(Active, Exit);
        assert_eq!(sm.active_count(), 0);
        assert_eq!(sm.live_count(), 0);
    }

    #[test]
    fn idle_thread_does_not_count_as_active_but_stays_live() {
        let sm = StateMachine::new();
        sm.transition(None, Active);
        sm.transition(Active, Idle);
        assert_eq!(sm.active_count(), 0);
        assert_eq!(sm.live_count(), 1);
        sm.transition(Idle, Active);
        assert_eq!(sm.active_count(), 1);
    }

    #[test]
    fn zombie_drops_out_of_both_counts() {
        let sm = StateMachine::new();
        sm.transition(None, Active);
        sm.transition(Active, Zombie);
        assert_eq!(sm.active_count(), 0);
        assert_eq!(sm.live_count(), 0);
    }

    #[test]
    #[should_panic(expected = "one thread")]
    fn double_exclusive_panics() {
        let sm = StateMachine::new();
        sm.transition(None, Active);
        sm.transition(Active, Exclusive);
        sm.transition(None, Active);
        sm.transition(Active, Exclusive);
    }

    /// Scenario 6 (spec section 8): thread A requests Exclusive while B is
    /// still Active. A must block until B drops to Idle at its own
    /// safe-point; only then does A's active_count==1 condition clear.
    #[test]
    fn exclusive_request_blocks_until_other_thread_goes_idle() {
        let sm = Arc::new(StateMachine::new());
        sm.transition(None, Active); // thread A
        sm.transition(None, Active); // thread B
        assert_eq!(sm.active_count(), 2);

        let sm_a = sm.clone();
        let collector = thread::spawn(move || {
            sm_a.transition(Active, Exclusive);
            sm_a.transition(Exclusive, Active);
        });

        thread::sleep(Duration::from_millis(20));
        assert_eq!(sm.active_count(), 2, "A must still be waiting on B");

        sm.transition(Active, Idle); // thread B reaches a safe-point
        collector.join().unwrap();
        assert_eq!(sm.active_count(), 1, "B is still Idle after the collection");
        assert!(!sm.exclusive_held());
    }

    #[test]
    fn exit_waits_for_the_last_other_thread_to_finish() {
        let sm = Arc::new(StateMachine::new());
        sm.transition(None, Active); // A
        sm.transition(None, Active); // B
        assert_eq!(sm.live_count(), 2);

        let sm_a = sm.clone();
        let exiting = thread::spawn(move || {
            sm_a.transition(Active, Exit);
        });

        thread::sleep(Duration::from_millis(20));
        assert_eq!(sm.live_count(), 2, "A must wait for B to leave first");

        sm.transition(Active, Zombie); // B finishes
        exiting.join().unwrap();
        assert_eq!(sm.live_count(), 0);
    }
}
