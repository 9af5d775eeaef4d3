// The machine: one process-wide resolver and class table, a pool of
// registered threads, a shared write-barrier `Heap`, and the state-machine
// plus monitors that coordinate them. Nothing in here interprets bytecode
// itself -- `spawn_thread`/`run` hand a `Thread` to `interpreter::run` and
// record its place in the parent/child tree that `dfs_thread_ids` walks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::class::MethodRef;
use crate::config::VmConfig;
use crate::error::VmError;
use crate::heap::Heap;
use crate::interpreter::{self, HeapContext};
use crate::object::Slot;
use crate::resolver::{ClassFileReader, ClassFinder, Resolver};
use crate::statemachine::{StateMachine, ThreadState};
use crate::system::{Monitor, System};
use crate::thread::Thread;

/// A registered thread's bookkeeping. `thread` carries its own lock so a
/// `run` call only ever holds the outer `threads` table lock long enough
/// to look up (and clone the `Arc` to) one entry -- not for the
/// interpretation that follows, which is where two threads actually need
/// to make progress at once (spec section 5's "parallel OS threads, one
/// per `Thread`"). `children` is likewise its own lock since a thread can
/// register a child after its own entry was created.
struct RegisteredThread {
    thread: Mutex<Thread>,
    parent: Option<usize>,
    children: Mutex<Vec<usize>>,
}

/// One running machine: the class table, the thread-state coordinator, a
/// shared `Heap` write-barrier collaborator, and the registered threads
/// under it. Allocation and collection stay per-thread (each `Thread` owns
/// its own `ThreadArena`); `heap` here is the separate hook every
/// heap-resident store is funneled through on its way in (spec §6's
/// `check(&slot, Monitor*)` write barrier), guarded by `heap_lock` since a
/// store on one thread can race a read of the same barrier state on
/// another even though the arenas themselves never overlap.
pub struct Machine {
    pub config: VmConfig,
    pub system: Box<dyn System>,
    pub resolver: Resolver,
    pub state_machine: StateMachine,
    heap: Mutex<Box<dyn Heap>>,
    class_lock: Box<dyn Monitor>,
    state_lock: Box<dyn Monitor>,
    heap_lock: Box<dyn Monitor>,
    threads: Mutex<Vec<Arc<RegisteredThread>>>,
    next_thread_id: AtomicU64,
}

impl Machine {
    pub fn new(
        system: Box<dyn System>,
        heap: Box<dyn Heap>,
        finder: Box<dyn ClassFinder>,
        reader: Box<dyn ClassFileReader>,
        config: VmConfig,
    ) -> Result<Machine, VmError> {
        let class_lock = system.create_monitor()?;
        let state_lock = system.create_monitor()?;
        let heap_lock = system.create_monitor()?;
        Ok(Machine {
            config,
            system,
            resolver: Resolver::new(finder, reader),
            state_machine: StateMachine::new(),
            heap: Mutex::new(heap),
            class_lock,
            state_lock,
            heap_lock,
            threads: Mutex::new(Vec::new()),
            next_thread_id: AtomicU64::new(1),
        })
    }

    /// Releases the three monitors' OS resources. `parking_lot`-backed
    /// monitors need nothing, but a `System` embedding real OS mutexes
    /// would need this called before the machine is dropped.
    pub fn dispose(self) {
        self.class_lock.dispose();
        self.state_lock.dispose();
        self.heap_lock.dispose();
    }

    /// Registers a new thread under `parent` (or as a root thread if
    /// `None`) and transitions it `None -> Active`, blocking if another
    /// thread currently holds `Exclusive`. Returns the index used to
    /// address it in later `run`/`dfs_thread_ids` calls.
    pub fn spawn_thread(&self, parent: Option<usize>) -> usize {
        let id = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
        let mut thread = Thread::new(id, self.config.arena_capacity);

        self.state_lock.acquire();
        self.state_machine.transition(ThreadState::None, ThreadState::Active);
        self.state_lock.release();
        thread.state = ThreadState::Active;

        let registered = Arc::new(RegisteredThread {
            thread: Mutex::new(thread),
            parent,
            children: Mutex::new(Vec::new()),
        });

        let mut threads = self.threads.lock();
        let index = threads.len();
        threads.push(registered);
        if let Some(p) = parent {
            threads[p].children.lock().push(index);
        }
        drop(threads);
        log::info!("thread {id} spawned at index {index} (parent {parent:?})");
        index
    }

    /// Drives the thread at `index` from `entry` to completion and
    /// transitions it `Active -> Zombie` when the interpreter returns,
    /// regardless of whether it returned a value or unwound on an
    /// uncaught exception. The table lock is only held long enough to
    /// clone the `Arc` for this one entry; the interpretation itself runs
    /// against that thread's own lock, so other registered threads can
    /// register, look up, and run concurrently.
    pub fn run(&self, index: usize, entry: MethodRef) -> Option<Slot> {
        let registered = {
            let threads = self.threads.lock();
            threads[index].clone()
        };

        let mut thread = registered.thread.lock();
        thread.state = ThreadState::Active;

        let mut ctx = HeapContext {
            heap: &self.heap,
            heap_lock: self.heap_lock.as_ref(),
        };
        let result = interpreter::run(
            &mut thread,
            &self.resolver,
            self.system.as_ref(),
            &mut ctx,
            entry,
            self.config.max_stack_depth,
        );

        self.state_lock.acquire();
        self.state_machine.transition(ThreadState::Active, ThreadState::Zombie);
        self.state_lock.release();
        thread.state = ThreadState::Zombie;

        result
    }

    /// Returns every registered thread's id, visited depth-first starting
    /// from each root thread (one with no parent) in registration order.
    pub fn dfs_thread_ids(&self) -> Vec<u64> {
        let threads = self.threads.lock();
        let mut out = Vec::new();
        for (i, t) in threads.iter().enumerate() {
            if t.parent.is_none() {
                self.dfs_from(&threads, i, &mut out);
            }
        }
        out
    }

    fn dfs_from(&self, threads: &[Arc<RegisteredThread>], index: usize, out: &mut Vec<u64>) {
        out.push(threads[index].thread.lock().id);
        for &child in threads[index].children.lock().iter() {
            self.dfs_from(threads, child, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Class;
    use crate::system::StdSystem;

    struct EmptyFinder;
    impl ClassFinder for EmptyFinder {
        fn find(&self, name: &str) -> Result<Vec<u8>, VmError> {
            Err(VmError::ClassNotFoundBytes(name.to_string()))
        }
    }
    struct EmptyReader;
    impl ClassFileReader for EmptyReader {
        fn parse(&self, _name: &str, _bytes: &[u8]) -> Result<Class, VmError> {
            unreachable!()
        }
    }

    fn machine() -> Machine {
        Machine::new(
            Box::new(StdSystem),
            Box::new(crate::heap::NoBarrier),
            Box::new(EmptyFinder),
            Box::new(EmptyReader),
            VmConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn spawning_a_thread_makes_it_active_and_live() {
        let m = machine();
        m.spawn_thread(None);
        assert_eq!(m.state_machine.active_count(), 1);
        assert_eq!(m.state_machine.live_count(), 1);
    }

    #[test]
    fn dfs_visits_children_under_their_parent_before_unrelated_roots() {
        let m = machine();
        let root = m.spawn_thread(None);
        let child = m.spawn_thread(Some(root));
        let _grandchild = m.spawn_thread(Some(child));
        let other_root = m.spawn_thread(None);

        let ids = m.dfs_thread_ids();
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[0], 1); // root
        assert_eq!(ids[1], 2); // child
        assert_eq!(ids[2], 3); // grandchild
        assert_eq!(ids[3], 4); // other_root, visited after root's subtree
        let _ = other_root;
    }
}
