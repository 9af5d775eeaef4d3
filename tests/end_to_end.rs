// Multi-module end-to-end scenarios driven purely through `Machine`'s
// public surface (`resolver.define_class`, `spawn_thread`, `run`) -- the
// same entry points `classvm-run` itself uses. Each scenario exercises a
// different seam: arithmetic return, array bounds, static-initializer
// injection, exception-handler catch-and-resume, and two registered
// threads actually making progress at once.

use std::sync::Arc;

use parking_lot::Mutex;

use classvm::class::{next_class_id, Class, ClassRef, FieldInfo, InitializerChain, Method, MethodRef};
use classvm::code::{Code, ConstantPoolEntry, ExceptionHandler};
use classvm::config::VmConfig;
use classvm::error::VmError;
use classvm::heap::NoBarrier;
use classvm::object::Slot;
use classvm::resolver::{ClassFileReader, ClassFinder};
use classvm::system::StdSystem;
use classvm::vm::Machine;

struct EmptyFinder;
impl ClassFinder for EmptyFinder {
    fn find(&self, name: &str) -> Result<Vec<u8>, VmError> {
        Err(VmError::ClassNotFoundBytes(name.to_string()))
    }
}
struct EmptyReader;
impl ClassFileReader for EmptyReader {
    fn parse(&self, _name: &str, _bytes: &[u8]) -> Result<Class, VmError> {
        unreachable!("no test here loads a class by name/bytes")
    }
}

fn machine() -> Machine {
    Machine::new(
        Box::new(StdSystem),
        Box::new(NoBarrier),
        Box::new(EmptyFinder),
        Box::new(EmptyReader),
        VmConfig::default(),
    )
    .unwrap()
}

fn bare_class(name: &str) -> ClassRef {
    Arc::new(Class {
        name: name.to_string(),
        super_class: None,
        flags: 0,
        id: next_class_id(),
        interfaces: Vec::new(),
        methods: Vec::new(),
        instance_fields: Vec::new(),
        static_fields: Vec::new(),
        statics: Mutex::new(Vec::new()),
        initializer_chain: InitializerChain::new(Vec::new()),
        fixed_instance_size: 2,
    })
}

#[allow(clippy::too_many_arguments)]
fn method_with_body(
    owner: ClassRef,
    name: &str,
    descriptor: &str,
    param_count: usize,
    body: Vec<u8>,
    pool: Vec<ConstantPoolEntry>,
    max_stack: usize,
    max_locals: usize,
    handlers: Vec<ExceptionHandler>,
) -> MethodRef {
    Arc::new(Method {
        owner,
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        offset: 0,
        param_count,
        flags: 0,
        code: Some(Code::new(body, pool, max_stack, max_locals, handlers)),
    })
}

/// `iconst_3; iconst_4; iadd; ireturn` through a real `Machine`, not just
/// the interpreter loop directly.
#[test]
fn arithmetic_entry_point_returns_through_the_full_machine() {
    let m = machine();
    let owner = bare_class("Calc");
    let body = vec![6, 7, 96, 172]; // iconst_3 iconst_4 iadd ireturn
    let method = method_with_body(owner, "add", "()I", 0, body, Vec::new(), 4, 0, Vec::new());

    let t = m.spawn_thread(None);
    assert_eq!(m.run(t, method), Some(Slot::Int(7)));
}

/// Builds an `int[3]` entirely via `newarray`/`dup`/`iastore` bytecode (no
/// reaching into arena internals from outside the crate), stores and
/// reads back element 0, then a second entry point indexes past the end
/// and the uncaught `ArrayIndexOutOfBoundsException` surfaces as `None`.
#[test]
fn array_store_and_load_then_an_out_of_bounds_index_is_uncaught() {
    let m = machine();
    m.resolver
        .define_class(bare_class("java/lang/ArrayIndexOutOfBoundsException"));
    let owner = bare_class("ArrTest");

    // iconst_3; newarray int; dup; iconst_0; bipush 42; iastore;
    // iconst_0; iaload; ireturn
    let ok_body = vec![6, 188, 10, 89, 3, 16, 42, 79, 3, 46, 172];
    let ok_method = method_with_body(owner.clone(), "store_then_load", "()I", 0, ok_body, Vec::new(), 6, 0, Vec::new());
    let t_ok = m.spawn_thread(None);
    assert_eq!(m.run(t_ok, ok_method), Some(Slot::Int(42)));

    // iconst_3; newarray int; iconst_5; iaload; ireturn
    let oob_body = vec![6, 188, 10, 8, 46, 172];
    let oob_method = method_with_body(owner, "load_out_of_bounds", "()I", 0, oob_body, Vec::new(), 6, 0, Vec::new());
    let t_oob = m.spawn_thread(None);
    assert_eq!(m.run(t_oob, oob_method), None);
}

/// A class's static initializer chain is drained by the opcode-rewind
/// protocol the first time `getstatic` touches one of its fields: the
/// same `getstatic` re-executes once `<clinit>` has run, now observing
/// the value `<clinit>` installed.
#[test]
fn getstatic_drains_the_owning_class_initializer_chain_before_reading() {
    let m = machine();

    // <clinit>: bipush 99; putstatic C#counter; return
    let clinit_pool = vec![ConstantPoolEntry::UnresolvedFieldRef {
        class: "C".to_string(),
        name: "counter".to_string(),
        descriptor: "I".to_string(),
    }];
    let clinit_body = vec![16, 99, 179, 0, 0, 177];
    let clinit_owner = bare_class("C$bootstrap"); // never consulted by field resolution, which is name-keyed
    let clinit = method_with_body(clinit_owner, "<clinit>", "()V", 0, clinit_body, clinit_pool, 4, 0, Vec::new());

    let c = Arc::new(Class {
        name: "C".to_string(),
        super_class: None,
        flags: 0,
        id: next_class_id(),
        interfaces: Vec::new(),
        methods: Vec::new(),
        instance_fields: Vec::new(),
        static_fields: vec![FieldInfo {
            name: "counter".to_string(),
            descriptor: "I".to_string(),
            offset: 0,
        }],
        statics: Mutex::new(vec![Slot::Int(0)]),
        initializer_chain: InitializerChain::new(vec![clinit]),
        fixed_instance_size: 0,
    });
    m.resolver.define_class(c.clone());

    // getstatic C#counter; ireturn
    let reader_pool = vec![ConstantPoolEntry::UnresolvedFieldRef {
        class: "C".to_string(),
        name: "counter".to_string(),
        descriptor: "I".to_string(),
    }];
    let reader_body = vec![178, 0, 0, 172];
    let reader = method_with_body(c, "read", "()I", 0, reader_body, reader_pool, 4, 0, Vec::new());

    let t = m.spawn_thread(None);
    assert_eq!(m.run(t, reader), Some(Slot::Int(99)));
}

/// `new`s a real exception instance and `athrow`s that reference (not a
/// VM-synthesized one -- synthesized throws unwind straight past the
/// throwing frame without trying its own handler table, since they
/// report `FrameOutcome::Unwound` directly; an explicit `athrow` of a
/// live reference instead sets the exception register and lets
/// `step_frame` retry the handler search against the *current* frame, the
/// catch-in-the-same-frame path). The handler discards the reference the
/// catch entry pushed and the method resumes to a normal return.
#[test]
fn exception_handler_catches_and_resumes_to_a_normal_return() {
    let m = machine();
    let exc_class = bare_class("Boom");
    m.resolver.define_class(exc_class.clone());
    let owner = bare_class("Thrower");

    let pool = vec![ConstantPoolEntry::ResolvedClass(exc_class)];
    // new Boom; athrow | pop; bipush 7; ireturn
    let body = vec![187, 0, 0, 191, 87, 16, 7, 172];
    let handlers = vec![ExceptionHandler {
        start_ip: 0,
        end_ip: 4,
        handler_ip: 4,
        catch_type: None,
    }];
    let method = method_with_body(owner, "catches_its_own_throw", "()I", 0, body, pool, 4, 0, handlers);

    let t = m.spawn_thread(None);
    assert_eq!(m.run(t, method), Some(Slot::Int(7)));
}

/// Two threads registered on the same `Machine` make progress at the
/// same time: `run`'s table lock only covers the `Arc<RegisteredThread>`
/// lookup, so neither thread waits on the other's interpretation.
#[test]
fn two_registered_threads_run_concurrently_through_the_machine() {
    let m = Arc::new(machine());
    let owner = bare_class("Concurrent");
    let body = vec![6, 7, 96, 172]; // iconst_3 iconst_4 iadd ireturn
    let method = method_with_body(owner, "add", "()I", 0, body, Vec::new(), 4, 0, Vec::new());

    let t1 = m.spawn_thread(None);
    let t2 = m.spawn_thread(None);

    let (m1, method1) = (m.clone(), method.clone());
    let h1 = std::thread::spawn(move || m1.run(t1, method1));
    let (m2, method2) = (m.clone(), method.clone());
    let h2 = std::thread::spawn(move || m2.run(t2, method2));

    assert_eq!(h1.join().unwrap(), Some(Slot::Int(7)));
    assert_eq!(h2.join().unwrap(), Some(Slot::Int(7)));
}
