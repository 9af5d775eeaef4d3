// Runtime representation of a loaded class: name, super, flags, id,
// interface/method/field/static tables and the initializer chain.
// Classes are created once by the resolver and never destroyed by the
// running machine, so they're shared behind `Arc` and identified for
// equality purposes by a monotonically-assigned `id` rather than by
// pointer, which sidesteps the cyclic `class -> super -> class`
// back-reference problem that a pointer-identity scheme would hit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::code::Code;
use crate::object::Slot;

/// Monotonically assigned at insertion into the class table. Two classes
/// are the same class iff their ids match.
pub type ClassId = u32;

/// Interfaces are identified in a separate id space from classes.
pub type InterfaceId = u32;

pub type ClassRef = Arc<Class>;
pub type MethodRef = Arc<Method>;

static NEXT_CLASS_ID: AtomicUsize = AtomicUsize::new(1);
static NEXT_INTERFACE_ID: AtomicUsize = AtomicUsize::new(1);

pub fn next_class_id() -> ClassId {
    NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed) as ClassId
}

pub fn next_interface_id() -> InterfaceId {
    NEXT_INTERFACE_ID.fetch_add(1, Ordering::Relaxed) as InterfaceId
}

/// One instance or static field declared by a class.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub descriptor: String,
    /// Index into the owning object's `Instance` field vector, or into
    /// the class's `statics` vector for a static field.
    pub offset: usize,
}

/// One row of a class's interface table: the interface itself, paired
/// with a slice of methods ordered to match that interface's own method
/// table, so `invokeinterface` can select `row.itable[method.offset]`
/// (spec §4.8).
#[derive(Debug, Clone)]
pub struct InterfaceSlot {
    pub interface: ClassRef,
    pub itable: Vec<MethodRef>,
}

/// Classes awaiting static initialization drain their chain head-first
/// on first touch: `getstatic`/`putstatic`/`new` check for a non-empty
/// initializer chain and, if found, inject a synthetic invocation of the
/// next initializer before popping it off.
#[derive(Debug, Default)]
pub struct InitializerChain {
    pending: Mutex<Vec<MethodRef>>,
}

impl InitializerChain {
    pub fn new(pending: Vec<MethodRef>) -> InitializerChain {
        InitializerChain {
            pending: Mutex::new(pending),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Removes and returns the next initializer to run, if any. Callers
    /// are expected to have already decided to run it (the opcode-rewind
    /// protocol in interpreter.rs), so popping is unconditional.
    pub fn pop_next(&self) -> Option<MethodRef> {
        self.pending.lock().pop()
    }
}

#[derive(Debug)]
pub struct Class {
    pub name: String,
    pub super_class: Option<ClassRef>,
    pub flags: u16,
    pub id: ClassId,
    pub interfaces: Vec<InterfaceSlot>,
    pub methods: Vec<MethodRef>,
    pub instance_fields: Vec<FieldInfo>,
    pub static_fields: Vec<FieldInfo>,
    pub statics: Mutex<Vec<Slot>>,
    pub initializer_chain: InitializerChain,
    pub fixed_instance_size: usize,
}

impl Class {
    pub fn is_interface(&self) -> bool {
        self.flags & crate::def::ACC_INTERFACE != 0
    }

    pub fn has_acc_super(&self) -> bool {
        self.flags & crate::def::ACC_SUPER != 0
    }

    /// `id` equality implies identity; this never walks the super chain.
    pub fn same_class(&self, other: &Class) -> bool {
        self.id == other.id
    }

    /// True iff `self` is `other` or a (transitive) subclass of `other`,
    /// by walking the super chain and comparing ids — the non-interface
    /// half of `instanceof`.
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        let mut cur = Some(self);
        while let Some(c) = cur {
            if c.id == other.id {
                return true;
            }
            cur = c.super_class.as_deref();
        }
        false
    }

    /// True iff `self` or any of its superclasses directly implements
    /// `interface_id`.
    pub fn implements_interface(&self, interface_id: InterfaceId) -> bool {
        let mut cur = Some(self);
        while let Some(c) = cur {
            if c.interfaces
                .iter()
                .any(|slot| slot.interface.id == interface_id)
            {
                return true;
            }
            cur = c.super_class.as_deref();
        }
        false
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<MethodRef> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
            .cloned()
    }

    pub fn find_instance_field(&self, name: &str, descriptor: &str) -> Option<&FieldInfo> {
        self.instance_fields
            .iter()
            .find(|f| f.name == name && f.descriptor == descriptor)
    }

    pub fn find_static_field(&self, name: &str, descriptor: &str) -> Option<&FieldInfo> {
        self.static_fields
            .iter()
            .find(|f| f.name == name && f.descriptor == descriptor)
    }
}

/// One declared method: owning class, name+descriptor, its offset within
/// the owner's method/itable (used by `invokevirtual`/`invokeinterface`
/// dispatch), parameter count and its `Code`.
#[derive(Debug)]
pub struct Method {
    pub owner: ClassRef,
    pub name: String,
    pub descriptor: String,
    pub offset: usize,
    pub param_count: usize,
    pub flags: u16,
    pub code: Option<Code>,
}

impl Method {
    pub fn is_static(&self) -> bool {
        self.flags & crate::def::ACC_STATIC != 0
    }
}

/// Parses a JVM-style method descriptor (`(ILjava/lang/Object;)I`) into a
/// parameter count. Return type is not needed by the interpreter since
/// `*return` opcodes already carry their own arity.
pub fn parameter_count(descriptor: &str) -> usize {
    let bytes = descriptor.as_bytes();
    let mut i = 1; // skip '('
    let mut count = 0;
    while i < bytes.len() && bytes[i] != b')' {
        match bytes[i] {
            b'J' | b'D' => {
                count += 1;
                i += 1;
            }
            b'L' => {
                count += 1;
                while i < bytes.len() && bytes[i] != b';' {
                    i += 1;
                }
                i += 1;
            }
            b'[' => {
                // array dimension prefix: consume dims then the element
                while i < bytes.len() && bytes[i] == b'[' {
                    i += 1;
                }
                if i < bytes.len() && bytes[i] == b'L' {
                    while i < bytes.len() && bytes[i] != b';' {
                        i += 1;
                    }
                }
                count += 1;
                i += 1;
            }
            _ => {
                count += 1;
                i += 1;
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_count_handles_primitives_objects_and_arrays() {
        assert_eq!(parameter_count("()V"), 0);
        assert_eq!(parameter_count("(I)V"), 1);
        assert_eq!(parameter_count("(IJ)V"), 2);
        assert_eq!(parameter_count("(Ljava/lang/Object;)Z"), 1);
        assert_eq!(parameter_count("(I[Ljava/lang/Object;D)V"), 3);
    }
}
