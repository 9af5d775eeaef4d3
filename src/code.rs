// A method's executable body: raw bytecode, constant pool (mixed
// unresolved/resolved entries), stack/locals sizing and the exception
// handler table.

use parking_lot::Mutex;

use crate::class::{ClassRef, MethodRef};

/// One (startIp, endIp, handlerIp, catchType) row. `catch_type` is a
/// constant-pool index into the owning `Code`'s pool; `None` means "any"
/// (a `catch_type` pool index of 0 in the source format).
#[derive(Debug, Clone)]
pub struct ExceptionHandler {
    pub start_ip: usize,
    pub end_ip: usize,
    pub handler_ip: usize,
    pub catch_type: Option<usize>,
}

impl ExceptionHandler {
    pub fn covers(&self, ip: usize) -> bool {
        ip >= self.start_ip && ip < self.end_ip
    }
}

/// One constant-pool slot. Unresolved variants are what an (out-of-scope)
/// class-file parser would produce straight from the bytes; resolved
/// variants are installed in place by the resolver on first touch and
/// never un-replaced.
#[derive(Debug, Clone)]
pub enum ConstantPoolEntry {
    UnresolvedClass(String),
    UnresolvedFieldRef {
        class: String,
        name: String,
        descriptor: String,
    },
    UnresolvedMethodRef {
        class: String,
        name: String,
        descriptor: String,
    },
    UnresolvedInterfaceMethodRef {
        class: String,
        name: String,
        descriptor: String,
    },

    ResolvedClass(ClassRef),
    ResolvedField(ResolvedField),
    ResolvedMethod(MethodRef),

    /// Literal constants pushed by `ldc`/`ldc_w`/`ldc2_w`.
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Utf8(String),
    /// Backing bytes for a `CONSTANT_string` entry; `ldc` materializes
    /// this as a fresh byte-array heap object on each touch (Java string
    /// interning/layout is out of scope here).
    StringBytes(String),
}

/// A resolved field reference: the class whose field table declared it,
/// the field's offset (into instance fields or into that class's
/// `statics` vector) and whether it is static.
#[derive(Debug, Clone)]
pub struct ResolvedField {
    pub class: ClassRef,
    pub offset: usize,
    pub is_static: bool,
}

#[derive(Debug)]
pub struct Code {
    pub body: Vec<u8>,
    pub constant_pool: Mutex<Vec<ConstantPoolEntry>>,
    pub max_stack: usize,
    pub max_locals: usize,
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl Code {
    pub fn new(
        body: Vec<u8>,
        constant_pool: Vec<ConstantPoolEntry>,
        max_stack: usize,
        max_locals: usize,
        exception_handlers: Vec<ExceptionHandler>,
    ) -> Code {
        Code {
            body,
            constant_pool: Mutex::new(constant_pool),
            max_stack,
            max_locals,
            exception_handlers,
        }
    }

    pub fn handler_for(&self, ip: usize) -> Vec<&ExceptionHandler> {
        self.exception_handlers
            .iter()
            .filter(|h| h.covers(ip))
            .collect()
    }
}
