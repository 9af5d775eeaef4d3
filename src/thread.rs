// One interpreted thread: its frame chain, operand stack, local
// variables, protector chain, per-thread GC arena and pending-exception
// register. The interpreter loop (`interpreter.rs`) drives a `Thread`
// one opcode at a time; this module only owns the registers and the
// frame-entry/exit bookkeeping around them.

use crate::class::MethodRef;
use crate::heap::{ThreadArena, ThreadRoots};
use crate::object::{ObjectRef, Slot};
use crate::protector::ProtectorChain;
use crate::statemachine::ThreadState;

/// One activation record. `stack_base` is the operand-stack depth at
/// frame entry -- the frame's own operand area is
/// `operand_stack[stack_base..]`, and returning restores the stack to
/// exactly that depth before pushing the frame's result, if any.
#[derive(Debug)]
pub struct Frame {
    pub method: MethodRef,
    pub ip: usize,
    pub locals: Vec<Slot>,
    pub stack_base: usize,
}

impl Frame {
    /// Sets up a new frame for `method`, copying the caller's top
    /// `param_count` logical argument words off the shared operand stack
    /// into the new frame's locals (index 0 receives the first
    /// argument, or `this` for an instance method), and truncates the
    /// caller's operand stack back to the point before those arguments.
    pub fn enter(
        method: MethodRef,
        operand_stack: &mut Vec<Slot>,
    ) -> Frame {
        let max_locals = method
            .code
            .as_ref()
            .map(|c| c.max_locals)
            .unwrap_or(method.param_count);

        let param_words = count_argument_words(operand_stack, method.param_count);
        let args_start = operand_stack.len() - param_words;
        let mut locals = vec![Slot::Null; max_locals];
        locals[..param_words].clone_from_slice(&operand_stack[args_start..]);
        operand_stack.truncate(args_start);

        let stack_base = operand_stack.len();
        Frame {
            method,
            ip: 0,
            locals,
            stack_base,
        }
    }
}

/// Counts how many logical stack words the last `arg_count` *values*
/// occupy, walking backwards and accounting for category-2 values'
/// extra `Top` word.
fn count_argument_words(operand_stack: &[Slot], arg_count: usize) -> usize {
    let mut words = 0;
    let mut values = 0;
    let mut i = operand_stack.len();
    while values < arg_count && i > 0 {
        i -= 1;
        words += 1;
        if operand_stack[i] != Slot::Top {
            values += 1;
        }
    }
    words
}

pub struct Thread {
    pub id: u64,
    pub state: ThreadState,
    pub frames: Vec<Frame>,
    pub operand_stack: Vec<Slot>,
    pub protectors: ProtectorChain,
    pub arena: ThreadArena,
    /// Set by `athrow` or by the interpreter synthesizing a tier-1
    /// exception; cleared once a handler frame consumes it or the
    /// thread's top-level frame returns with it still set (an uncaught
    /// exception).
    pub pending_exception: Option<ObjectRef>,
}

impl Thread {
    pub fn new(id: u64, arena_capacity: usize) -> Thread {
        Thread {
            id,
            state: ThreadState::None,
            frames: Vec::new(),
            operand_stack: Vec::new(),
            protectors: ProtectorChain::new(),
            arena: ThreadArena::new(arena_capacity),
            pending_exception: None,
        }
    }

    pub fn current_frame(&self) -> &Frame {
        self.frames.last().expect("no active frame")
    }

    pub fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no active frame")
    }

    pub fn push(&mut self, slot: Slot) {
        self.operand_stack.push(slot);
    }

    pub fn pop(&mut self) -> Slot {
        self.operand_stack.pop().expect("operand stack underflow")
    }

    /// Presents this thread's live roots to the arena collector: the
    /// shared operand stack, every frame's locals, the protector chain,
    /// and the pending exception register. Frames below the top only
    /// ever hold references in their locals (their operand-stack words
    /// were already folded into the callee's locals or the shared stack
    /// at call time), so visiting `locals` for every frame plus the
    /// single shared operand stack is exhaustive. `pending_exception` is
    /// visited too, independent of whether `step_frame` happens to
    /// allocate while an exception is pending, since it is a live
    /// reference the moment `athrow`/a synthesized throw sets it.
    pub fn collect_garbage(&mut self, kind: crate::heap::CollectionType) {
        let frame_locals: Vec<&mut [Slot]> =
            self.frames.iter_mut().map(|f| f.locals.as_mut_slice()).collect();
        let mut roots = ThreadRoots {
            operand_stack: &mut self.operand_stack,
            frame_locals,
            protectors: &mut self.protectors,
            pending_exception: &mut self.pending_exception,
        };
        self.arena.collect(kind, &mut roots);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{Class, InitializerChain};
    use crate::code::Code;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn method_with_arity(param_count: usize, max_locals: usize) -> MethodRef {
        let owner = Arc::new(Class {
            name: "T".into(),
            super_class: None,
            flags: 0,
            id: crate::class::next_class_id(),
            interfaces: Vec::new(),
            methods: Vec::new(),
            instance_fields: Vec::new(),
            static_fields: Vec::new(),
            statics: Mutex::new(Vec::new()),
            initializer_chain: InitializerChain::new(Vec::new()),
            fixed_instance_size: 0,
        });
        Arc::new(crate::class::Method {
            owner,
            name: "m".into(),
            descriptor: "()V".into(),
            offset: 0,
            param_count,
            flags: 0,
            code: Some(Code::new(Vec::new(), Vec::new(), 4, max_locals, Vec::new())),
        })
    }

    #[test]
    fn frame_entry_copies_arguments_and_truncates_caller_stack() {
        let mut stack = vec![Slot::Int(10), Slot::Int(20), Slot::Int(30)];
        let method = method_with_arity(2, 3);
        let frame = Frame::enter(method, &mut stack);
        assert_eq!(stack, vec![Slot::Int(10)]);
        assert_eq!(frame.locals[0], Slot::Int(20));
        assert_eq!(frame.locals[1], Slot::Int(30));
        assert_eq!(frame.locals[2], Slot::Null);
        assert_eq!(frame.stack_base, 1);
    }

    #[test]
    fn frame_entry_accounts_for_category_two_argument_width() {
        let mut stack = vec![Slot::Int(1), Slot::Long(99), Slot::Top];
        let method = method_with_arity(1, 2);
        let frame = Frame::enter(method, &mut stack);
        assert_eq!(stack, vec![Slot::Int(1)]);
        assert_eq!(frame.locals[0], Slot::Long(99));
    }
}
