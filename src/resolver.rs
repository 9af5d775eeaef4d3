// Class table and lazy constant-pool resolution. A class is loaded once,
// the first time anything asks for it by name, and lives in the table
// for the rest of the process's lifetime; a constant-pool entry is
// resolved once, the first time an opcode touches it, and the resolved
// variant is written back into the pool in place so every later touch of
// the same entry is a cheap already-resolved read.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::class::{Class, ClassRef, MethodRef};
use crate::code::{Code, ConstantPoolEntry, ResolvedField};
use crate::error::VmError;

/// Supplies the raw bytes of a named class. Finding bytes and parsing
/// them are split on purpose: a `ClassFinder` only knows how to locate a
/// class (by searching a classpath, a jar, a network fetch -- whatever
/// the embedding application wants), it never has to understand the
/// class file format itself.
pub trait ClassFinder: Send + Sync {
    fn find(&self, name: &str) -> Result<Vec<u8>, VmError>;
}

/// Turns bytes located by a `ClassFinder` into a runtime `Class`. This is
/// the seam a real class-file parser plugs into; the fixture reader this
/// crate ships (see `classpath.rs`) only understands a tiny struct-like
/// encoding meant for tests and demos, not real `.class` files.
pub trait ClassFileReader: Send + Sync {
    fn parse(&self, name: &str, bytes: &[u8]) -> Result<Class, VmError>;
}

/// What went wrong resolving a name. Distinct from `VmError`: a class,
/// method or field genuinely not existing is an ordinary, recoverable
/// outcome from the calling bytecode's point of view (it surfaces as a
/// `NoClassDefFoundError`/`NoSuchMethodError`/`NoSuchFieldError`-shaped
/// Java exception), so the interpreter decides what heap object to raise
/// for it rather than this module aborting the process.
#[derive(Debug)]
pub enum ResolveError {
    ClassNotFound(String),
    MethodNotFound { class: String, name: String, descriptor: String },
    FieldNotFound { class: String, name: String, descriptor: String },
    /// The finder or reader itself failed (bad classpath, malformed
    /// bytes) -- a plumbing problem, not a missing-symbol outcome.
    Fatal(VmError),
}

impl From<VmError> for ResolveError {
    fn from(e: VmError) -> Self {
        ResolveError::Fatal(e)
    }
}

pub struct Resolver {
    finder: Box<dyn ClassFinder>,
    reader: Box<dyn ClassFileReader>,
    class_lock: Mutex<()>,
    classes: Mutex<HashMap<String, ClassRef>>,
}

impl Resolver {
    pub fn new(finder: Box<dyn ClassFinder>, reader: Box<dyn ClassFileReader>) -> Resolver {
        Resolver {
            finder,
            reader,
            class_lock: Mutex::new(()),
            classes: Mutex::new(HashMap::new()),
        }
    }

    /// Directly registers an already-built class, bypassing the
    /// finder/reader pipeline. Used by tests and by bootstrap code that
    /// constructs a handful of classes (exception types, primitives'
    /// boxed array element classes) in Rust rather than from bytes.
    pub fn define_class(&self, class: ClassRef) {
        self.classes.lock().insert(class.name.clone(), class);
    }

    /// Loads and caches the named class, resolving it (and, recursively,
    /// its superclass and interfaces) eagerly. Safe to call from any
    /// number of threads concurrently; `class_lock` serializes the
    /// find-parse-insert sequence so two threads racing to load the same
    /// name can't both insert it.
    pub fn resolve_class(&self, name: &str) -> Result<ClassRef, ResolveError> {
        if let Some(c) = self.classes.lock().get(name) {
            return Ok(c.clone());
        }

        let _guard = self.class_lock.lock();
        // Re-check: another thread may have finished loading it while we
        // waited for class_lock.
        if let Some(c) = self.classes.lock().get(name) {
            return Ok(c.clone());
        }

        let bytes = self
            .finder
            .find(name)
            .map_err(|_| ResolveError::ClassNotFound(name.to_string()))?;
        let class = self.reader.parse(name, &bytes)?;
        let class_ref: ClassRef = std::sync::Arc::new(class);
        self.classes.lock().insert(name.to_string(), class_ref.clone());
        Ok(class_ref)
    }

    /// Resolution variant 1: an unresolved class-name entry becomes a
    /// `ResolvedClass`, written back in place so later touches skip the
    /// name lookup entirely.
    pub fn resolve_class_entry(
        &self,
        code: &Code,
        index: usize,
    ) -> Result<ClassRef, ResolveError> {
        let name = {
            let pool = code.constant_pool.lock();
            match &pool[index] {
                ConstantPoolEntry::ResolvedClass(c) => return Ok(c.clone()),
                ConstantPoolEntry::UnresolvedClass(name) => name.clone(),
                _ => {
                    return Err(ResolveError::Fatal(VmError::ParseFailure(
                        format!("index {index}"),
                        "constant pool entry is not a class".into(),
                    )))
                }
            }
        };
        let class = self.resolve_class(&name)?;
        code.constant_pool.lock()[index] = ConstantPoolEntry::ResolvedClass(class.clone());
        Ok(class)
    }

    /// Resolution variant 2: an unresolved (class, name, descriptor)
    /// method reference becomes a `ResolvedMethod`. Walks the target
    /// class's own super chain looking for a matching declaration, since
    /// the reference names the *declaring* class, not necessarily the
    /// one that defines the method body.
    pub fn resolve_method_entry(
        &self,
        code: &Code,
        index: usize,
    ) -> Result<MethodRef, ResolveError> {
        let (class_name, name, descriptor) = {
            let pool = code.constant_pool.lock();
            match &pool[index] {
                ConstantPoolEntry::ResolvedMethod(m) => return Ok(m.clone()),
                ConstantPoolEntry::UnresolvedMethodRef { class, name, descriptor }
                | ConstantPoolEntry::UnresolvedInterfaceMethodRef { class, name, descriptor } => {
                    (class.clone(), name.clone(), descriptor.clone())
                }
                _ => {
                    return Err(ResolveError::Fatal(VmError::ParseFailure(
                        format!("index {index}"),
                        "constant pool entry is not a method ref".into(),
                    )))
                }
            }
        };
        let declaring = self.resolve_class(&class_name)?;
        let mut cur = Some(declaring.clone());
        while let Some(c) = cur {
            if let Some(m) = c.find_method(&name, &descriptor) {
                code.constant_pool.lock()[index] = ConstantPoolEntry::ResolvedMethod(m.clone());
                return Ok(m);
            }
            cur = c.super_class.clone();
        }
        Err(ResolveError::MethodNotFound {
            class: class_name,
            name,
            descriptor,
        })
    }

    /// Resolution variant 3: an unresolved (class, name, descriptor)
    /// field reference becomes a `ResolvedField`. Unlike class/method
    /// resolution this writes back into the *container* holding the
    /// field access (`getfield`/`putfield`/`getstatic`/`putstatic`'s own
    /// operand), not just the pool slot, mirroring the embedded
    /// field-rewrite variant distinct from the other two.
    pub fn resolve_field_entry(
        &self,
        code: &Code,
        index: usize,
    ) -> Result<ResolvedField, ResolveError> {
        let (class_name, name, descriptor) = {
            let pool = code.constant_pool.lock();
            match &pool[index] {
                ConstantPoolEntry::ResolvedField(f) => return Ok(f.clone()),
                ConstantPoolEntry::UnresolvedFieldRef { class, name, descriptor } => {
                    (class.clone(), name.clone(), descriptor.clone())
                }
                _ => {
                    return Err(ResolveError::Fatal(VmError::ParseFailure(
                        format!("index {index}"),
                        "constant pool entry is not a field ref".into(),
                    )))
                }
            }
        };
        let declaring = self.resolve_class(&class_name)?;
        let mut cur = Some(declaring.clone());
        while let Some(c) = cur {
            if let Some(f) = c.find_instance_field(&name, &descriptor) {
                let resolved = ResolvedField {
                    class: c.clone(),
                    offset: f.offset,
                    is_static: false,
                };
                code.constant_pool.lock()[index] = ConstantPoolEntry::ResolvedField(resolved.clone());
                return Ok(resolved);
            }
            if let Some(f) = c.find_static_field(&name, &descriptor) {
                let resolved = ResolvedField {
                    class: c.clone(),
                    offset: f.offset,
                    is_static: true,
                };
                code.constant_pool.lock()[index] = ConstantPoolEntry::ResolvedField(resolved.clone());
                return Ok(resolved);
            }
            cur = c.super_class.clone();
        }
        Err(ResolveError::FieldNotFound {
            class: class_name,
            name,
            descriptor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::InitializerChain;
    use std::sync::Arc;

    struct EmptyFinder;
    impl ClassFinder for EmptyFinder {
        fn find(&self, name: &str) -> Result<Vec<u8>, VmError> {
            Err(VmError::ClassNotFoundBytes(name.to_string()))
        }
    }
    struct NeverReader;
    impl ClassFileReader for NeverReader {
        fn parse(&self, _name: &str, _bytes: &[u8]) -> Result<Class, VmError> {
            unreachable!("empty finder always fails first")
        }
    }

    fn leaf_class(name: &str) -> Class {
        Class {
            name: name.to_string(),
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
        }
    }

    #[test]
    fn resolve_class_caches_after_first_load() {
        let resolver = Resolver::new(Box::new(EmptyFinder), Box::new(NeverReader));
        resolver.define_class(Arc::new(leaf_class("Pre")));
        let a = resolver.resolve_class("Pre").unwrap();
        let b = resolver.resolve_class("Pre").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn missing_class_is_a_resolve_error_not_a_panic() {
        let resolver = Resolver::new(Box::new(EmptyFinder), Box::new(NeverReader));
        match resolver.resolve_class("Missing") {
            Err(ResolveError::ClassNotFound(name)) => assert_eq!(name, "Missing"),
            other => panic!("expected ClassNotFound, got {other:?}"),
        }
    }
}
