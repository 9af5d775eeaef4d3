// Per-thread bump-allocated object arena and its cooperative, moving
// minor collector. Allocation only ever grows the arena linearly until
// it is full; a full arena is never grown in place, it is collected:
// every object still reachable from the registered roots is copied into
// a fresh arena (a classic Cheney-style semispace copy) and the old one
// is dropped whole. Because the copy rewrites every `Slot::Ref` it finds
// along the way, a collection can run at any allocation site without the
// interpreter needing to track liveness itself -- it only needs to
// present its roots when asked.

use crate::class::ClassRef;
use crate::object::{ArrayKind, Object, ObjectData, ObjectRef, Slot, TraceEntry};
use crate::protector::ProtectorChain;

/// Why a collection was requested. `Minor` is the only kind this core
/// performs (a single per-thread generation); `Major` is accepted for
/// interface completeness and currently behaves identically, since there
/// is no old generation to distinguish it from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionType {
    Minor,
    Major,
}

/// Something the collector can ask to rewrite its reference slots in
/// place. Implemented by `&mut [Slot]` style storage: the operand stack,
/// the locals array of every live frame, and the protector chain.
pub trait GcVisitor {
    fn visit(&mut self, slot: &mut Slot);
}

impl<F: FnMut(&mut Slot)> GcVisitor for F {
    fn visit(&mut self, slot: &mut Slot) {
        (self)(slot)
    }
}

/// A source of roots for one collection: everything the calling thread
/// considers live right now. `visit_roots` must reach every `Slot` that
/// can hold a reference -- the operand stack up to `sp`, every frame's
/// locals, and the protector chain -- or a live object will be collected
/// out from under the interpreter.
pub trait RootIterator {
    fn visit_roots(&mut self, visitor: &mut dyn GcVisitor);
}

/// External collaborator for heap lifecycle events: collection and the
/// write barrier. A `Heap` implementation does not need to own the
/// arena itself (see `ThreadArena` below for the concrete in-process
/// one); it only needs to be notified. `Send + Sync` since one `Heap` is
/// shared across every registered thread's `Machine::run`.
pub trait Heap: Send + Sync {
    /// Funnels every heap-resident slot mutation (an instance field, a
    /// static field, an array element) through this hook before the
    /// mutation is applied. Scalar locals and operand-stack slots bypass
    /// it entirely -- only slots that live inside an `Object` go through
    /// `check`.
    fn check(&mut self, target: ObjectRef, value: Slot) -> Slot {
        let _ = target;
        value
    }
}

/// One arena slot: live objects are `Some`; a `None` marks an index that
/// was never filled (never happens in steady state, but keeps the
/// vector indexable by raw `usize` without an extra bounds dance during
/// construction).
#[derive(Debug)]
pub struct ThreadArena {
    objects: Vec<Object>,
    capacity: usize,
}

impl ThreadArena {
    pub fn new(capacity: usize) -> ThreadArena {
        ThreadArena {
            objects: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, r: ObjectRef) -> &Object {
        &self.objects[r.index()]
    }

    pub fn get_mut(&mut self, r: ObjectRef) -> &mut Object {
        &mut self.objects[r.index()]
    }

    /// True once a further allocation of one object would exceed the
    /// arena's fixed capacity -- the cooperative safe-point condition a
    /// caller checks before allocating (never mid-allocation).
    pub fn is_full(&self) -> bool {
        self.objects.len() >= self.capacity
    }

    fn push_raw(&mut self, obj: Object) -> ObjectRef {
        let idx = self.objects.len();
        self.objects.push(obj);
        ObjectRef(idx)
    }

    /// Allocates a plain instance. Callers must have already ensured
    /// `!is_full()` (or just collected) -- this never grows past
    /// `capacity`.
    pub fn alloc_instance(&mut self, class: ClassRef, field_count: usize) -> Option<ObjectRef> {
        if self.is_full() {
            return None;
        }
        Some(self.push_raw(Object::new_instance(class, field_count)))
    }

    pub fn alloc_array(
        &mut self,
        class: ClassRef,
        kind: ArrayKind,
        length: usize,
    ) -> Option<ObjectRef> {
        if self.is_full() {
            return None;
        }
        Some(self.push_raw(Object::new_array(class, kind, length)))
    }

    /// Anchors a captured frame trace behind a `Slot::Ref` so it survives
    /// collection like any other referenced object; `class` is borrowed
    /// from the exception instance it belongs to purely to satisfy the
    /// object header's class-pointer slot (see `ObjectData::Trace`'s
    /// doc comment -- a native auxiliary object, not a Java-visible one).
    pub fn alloc_trace(&mut self, class: ClassRef, trace: Vec<TraceEntry>) -> Option<ObjectRef> {
        if self.is_full() {
            return None;
        }
        Some(self.push_raw(Object {
            class,
            data: ObjectData::Trace(trace),
        }))
    }

    /// Anchors a formatted exception message behind a `Slot::Ref`; see
    /// `alloc_trace` for why `class` is reused rather than modeled.
    pub fn alloc_message(&mut self, class: ClassRef, message: String) -> Option<ObjectRef> {
        if self.is_full() {
            return None;
        }
        Some(self.push_raw(Object {
            class,
            data: ObjectData::Message(message),
        }))
    }

    /// Runs a full stop-the-world minor collection: every object
    /// transitively reachable from `roots` is copied into a fresh arena
    /// of the same capacity, and the old arena (with all its garbage) is
    /// dropped. Reference slots visited by `roots`, and every reference
    /// slot inside a surviving object, are rewritten to point at the
    /// object's new index.
    ///
    /// This is a copying collector, not a mark-sweep one: a single
    /// forwarding pass suffices because every reachable object is
    /// visited exactly once, via a worklist seeded by the roots.
    pub fn collect(&mut self, kind: CollectionType, roots: &mut dyn RootIterator) {
        let _ = kind; // no generational distinction in a single-arena design

        let mut to_space: Vec<Object> = Vec::with_capacity(self.capacity);
        let mut forwarded: Vec<Option<usize>> = vec![None; self.objects.len()];
        let mut worklist: Vec<usize> = Vec::new();

        let mut seed = |slot: &mut Slot| {
            if let Slot::Ref(r) = slot {
                let old_idx = r.index();
                let new_idx = match forwarded[old_idx] {
                    Some(i) => i,
                    None => {
                        let i = to_space.len();
                        to_space.push(self.objects[old_idx].clone());
                        forwarded[old_idx] = Some(i);
                        worklist.push(i);
                        i
                    }
                };
                *r = ObjectRef(new_idx);
            }
        };
        roots.visit_roots(&mut seed);

        while let Some(i) = worklist.pop() {
            let mut referents: Vec<usize> = Vec::new();
            for slot in to_space[i].data.reference_slots_mut() {
                if let Slot::Ref(r) = slot {
                    referents.push(r.index());
                }
            }
            let mut new_indices = Vec::with_capacity(referents.len());
            for old_idx in referents {
                let new_idx = match forwarded[old_idx] {
                    Some(fi) => fi,
                    None => {
                        let fi = to_space.len();
                        to_space.push(self.objects[old_idx].clone());
                        forwarded[old_idx] = Some(fi);
                        worklist.push(fi);
                        fi
                    }
                };
                new_indices.push(new_idx);
            }
            let mut ni = new_indices.into_iter();
            for slot in to_space[i].data.reference_slots_mut() {
                if let Slot::Ref(r) = slot {
                    *r = ObjectRef(ni.next().unwrap());
                }
            }
        }

        self.objects = to_space;
    }
}

impl Heap for ThreadArena {
    fn check(&mut self, target: ObjectRef, value: Slot) -> Slot {
        let _ = target;
        value
    }
}

/// The write-barrier hook for a machine that does no cross-thread
/// remembered-set/card-table bookkeeping: every store passes through
/// unchanged. This is the `Heap` a `Machine` is given when nothing needs
/// the barrier beyond per-thread collection, which `ThreadArena` already
/// handles on its own.
#[derive(Debug, Default)]
pub struct NoBarrier;

impl Heap for NoBarrier {}

/// Adapts a thread's live root sources (operand stack up to `sp`, every
/// frame's locals, its protector chain, and its pending exception) into
/// one `RootIterator` the collector can drive without the thread module
/// needing to know anything about copying.
pub struct ThreadRoots<'a> {
    pub operand_stack: &'a mut [Slot],
    pub frame_locals: Vec<&'a mut [Slot]>,
    pub protectors: &'a mut ProtectorChain,
    pub pending_exception: &'a mut Option<ObjectRef>,
}

impl<'a> RootIterator for ThreadRoots<'a> {
    fn visit_roots(&mut self, visitor: &mut dyn GcVisitor) {
        for slot in self.operand_stack.iter_mut() {
            visitor.visit(slot);
        }
        for locals in self.frame_locals.iter_mut() {
            for slot in locals.iter_mut() {
                visitor.visit(slot);
            }
        }
        for r in self.protectors.iter_mut() {
            let mut as_slot = Slot::Ref(*r);
            visitor.visit(&mut as_slot);
            if let Slot::Ref(new_r) = as_slot {
                *r = new_r;
            }
        }
        if let Some(exc) = self.pending_exception {
            let mut as_slot = Slot::Ref(*exc);
            visitor.visit(&mut as_slot);
            if let Slot::Ref(new_r) = as_slot {
                *exc = new_r;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{Class, InitializerChain};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn fixture_class() -> ClassRef {
        Arc::new(Class {
            name: "Fixture".into(),
            super_class: None,
            flags: 0,
            id: crate::class::next_class_id(),
            interfaces: Vec::new(),
            methods: Vec::new(),
            instance_fields: Vec::new(),
            static_fields: Vec::new(),
            statics: Mutex::new(Vec::new()),
            initializer_chain: InitializerChain::new(Vec::new()),
            fixed_instance_size: 2,
        })
    }

    #[test]
    fn unreachable_objects_are_dropped_by_collection() {
        let class = fixture_class();
        let mut arena = ThreadArena::new(16);
        let live = arena.alloc_instance(class.clone(), 2).unwrap();
        let _garbage = arena.alloc_instance(class, 2).unwrap();
        assert_eq!(arena.len(), 2);

        let mut stack = vec![Slot::Ref(live)];
        let mut roots = ThreadRoots {
            operand_stack: &mut stack,
            frame_locals: Vec::new(),
            protectors: &mut ProtectorChain::new(),
            pending_exception: &mut None,
        };
        arena.collect(CollectionType::Minor, &mut roots);

        assert_eq!(arena.len(), 1);
        // the surviving root was rewritten to point at its new slot
        match stack[0] {
            Slot::Ref(r) => assert_eq!(r.index(), 0),
            _ => panic!("expected a rewritten reference"),
        }
    }

    #[test]
    fn reachable_chain_through_fields_survives() {
        let class = fixture_class();
        let mut arena = ThreadArena::new(16);
        let tail = arena.alloc_instance(class.clone(), 2).unwrap();
        let head = arena.alloc_instance(class, 2).unwrap();
        arena.get_mut(head).data.reference_slots_mut()[0] = Slot::Ref(tail);

        let mut stack = vec![Slot::Ref(head)];
        let mut roots = ThreadRoots {
            operand_stack: &mut stack,
            frame_locals: Vec::new(),
            protectors: &mut ProtectorChain::new(),
            pending_exception: &mut None,
        };
        arena.collect(CollectionType::Minor, &mut roots);

        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn pending_exception_survives_collection_as_a_root() {
        let class = fixture_class();
        let mut arena = ThreadArena::new(16);
        let exc = arena.alloc_instance(class.clone(), 2).unwrap();
        let _garbage = arena.alloc_instance(class, 2).unwrap();
        assert_eq!(arena.len(), 2);

        let mut stack: Vec<Slot> = Vec::new();
        let mut pending = Some(exc);
        let mut roots = ThreadRoots {
            operand_stack: &mut stack,
            frame_locals: Vec::new(),
            protectors: &mut ProtectorChain::new(),
            pending_exception: &mut pending,
        };
        arena.collect(CollectionType::Minor, &mut roots);

        assert_eq!(arena.len(), 1);
        match pending {
            Some(r) => assert_eq!(r.index(), 0),
            None => panic!("pending exception must survive as a root"),
        }
    }
}
