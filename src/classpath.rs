// A directory-list based `ClassFinder`: the fully-qualified name
// `a.b.Foo` maps to `a/b/Foo.class` and is searched for under each
// configured root in order, current directory first.

use std::fs;
use std::path::PathBuf;

use crate::error::VmError;
use crate::resolver::ClassFinder;

#[derive(Debug, Clone)]
pub struct ClassPath {
    roots: Vec<PathBuf>,
}

impl ClassPath {
    /// Builds a `ClassPath` from a `;`-separated list of directories;
    /// blank entries are dropped and `.` is always searched first.
    pub fn from_str(raw: &str) -> ClassPath {
        let mut roots = vec![PathBuf::from(".")];
        roots.extend(
            raw.split(';')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        );
        ClassPath { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl ClassFinder for ClassPath {
    fn find(&self, name: &str) -> Result<Vec<u8>, VmError> {
        let rel = format!("{}.class", name.replace('.', "/"));
        for root in &self.roots {
            let candidate = root.join(&rel);
            match fs::read(&candidate) {
                Ok(bytes) => {
                    log::debug!("found class `{name}` at {}", candidate.display());
                    return Ok(bytes);
                }
                Err(e) => {
                    log::trace!("class `{name}` not at {}: {e}", candidate.display());
                }
            }
        }
        Err(VmError::ClassNotFoundBytes(name.to_string()))
    }
}

/// A trivial line-oriented stand-in for a real `.class` parser (spec's
/// class-file parser is explicitly out of scope). Understands just enough
/// of a struct-like text encoding to drive tests and the demonstration
/// binary: a `class`/`super`/`flags` header, `field`/`const`/`method`
/// declarations in textual form, and a method's code as space-separated
/// hex bytes. Production embedders are expected to supply their own
/// `ClassFileReader` over real class files.
#[derive(Debug, Default)]
pub struct FixtureClassFileReader;

impl FixtureClassFileReader {
    pub fn new() -> FixtureClassFileReader {
        FixtureClassFileReader
    }
}

impl crate::resolver::ClassFileReader for FixtureClassFileReader {
    fn parse(&self, name: &str, bytes: &[u8]) -> Result<crate::class::Class, VmError> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            VmError::ParseFailure(name.to_string(), format!("not utf8: {e}"))
        })?;
        fixture::parse_class(name, text)
    }
}

/// The fixture text format's parser, split out of the `ClassFileReader`
/// impl above so its pieces can be unit-tested without going through
/// `find`/`parse`'s `&[u8]` boundary.
mod fixture {
    use parking_lot::Mutex;
    use std::sync::Arc;

    use crate::class::{self, Class, ClassRef, FieldInfo, InitializerChain, Method};
    use crate::code::{Code, ConstantPoolEntry, ExceptionHandler};
    use crate::error::VmError;
    use crate::object::Slot;

    fn fail(name: &str, detail: impl Into<String>) -> VmError {
        VmError::ParseFailure(name.to_string(), detail.into())
    }

    fn parse_flags(tok: &str) -> Option<u16> {
        if let Some(hex) = tok.strip_prefix("0x") {
            u16::from_str_radix(hex, 16).ok()
        } else {
            tok.parse().ok()
        }
    }

    struct PendingMethod {
        is_static: bool,
        name: String,
        descriptor: String,
        max_stack: usize,
        max_locals: usize,
        code: Vec<u8>,
        handlers: Vec<ExceptionHandler>,
    }

    pub fn parse_class(name: &str, text: &str) -> Result<Class, VmError> {
        let mut super_name: Option<String> = None;
        let mut flags: u16 = 0;
        let mut instance_fields = Vec::new();
        let mut static_fields = Vec::new();
        let mut const_pool: Vec<ConstantPoolEntry> = Vec::new();
        let mut methods: Vec<PendingMethod> = Vec::new();

        let mut current: Option<PendingMethod> = None;
        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let keyword = parts.next().unwrap_or("");

            if let Some(m) = current.as_mut() {
                match keyword {
                    "code" => {
                        for tok in parts {
                            let byte = u8::from_str_radix(tok, 16)
                                .map_err(|_| fail(name, format!("bad hex byte `{tok}`")))?;
                            m.code.push(byte);
                        }
                        continue;
                    }
                    "handler" => {
                        let vals: Vec<&str> = parts.collect();
                        if vals.len() != 4 {
                            return Err(fail(name, "handler needs 4 fields"));
                        }
                        let parse_usize = |s: &str| {
                            s.parse::<usize>().map_err(|_| fail(name, format!("bad handler field `{s}`")))
                        };
                        m.handlers.push(ExceptionHandler {
                            start_ip: parse_usize(vals[0])?,
                            end_ip: parse_usize(vals[1])?,
                            handler_ip: parse_usize(vals[2])?,
                            catch_type: if vals[3] == "-" {
                                None
                            } else {
                                Some(parse_usize(vals[3])?)
                            },
                        });
                        continue;
                    }
                    "endmethod" => {
                        methods.push(current.take().unwrap());
                        continue;
                    }
                    _ => return Err(fail(name, format!("unexpected `{keyword}` inside method body"))),
                }
            }

            match keyword {
                "class" => {}
                "super" => super_name = parts.next().map(str::to_string),
                "flags" => {
                    let tok = parts.next().ok_or_else(|| fail(name, "flags needs a value"))?;
                    flags = parse_flags(tok).ok_or_else(|| fail(name, format!("bad flags `{tok}`")))?;
                }
                "field" => {
                    let kind = parts.next().ok_or_else(|| fail(name, "field needs a kind"))?;
                    let fname = parts.next().ok_or_else(|| fail(name, "field needs a name"))?;
                    let descriptor = parts.next().ok_or_else(|| fail(name, "field needs a descriptor"))?;
                    let target = match kind {
                        "instance" => &mut instance_fields,
                        "static" => &mut static_fields,
                        other => return Err(fail(name, format!("unknown field kind `{other}`"))),
                    };
                    let offset = target.len();
                    target.push(FieldInfo {
                        name: fname.to_string(),
                        descriptor: descriptor.to_string(),
                        offset,
                    });
                }
                "const" => {
                    let index: usize = parts
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| fail(name, "const needs an index"))?;
                    if index != const_pool.len() {
                        return Err(fail(name, "const entries must appear in index order"));
                    }
                    let tag = parts.next().ok_or_else(|| fail(name, "const needs a tag"))?;
                    let rest: Vec<&str> = parts.collect();
                    let joined = rest.join(" ");
                    let entry = match tag {
                        "integer" => ConstantPoolEntry::Integer(
                            joined.parse().map_err(|_| fail(name, "bad integer constant"))?,
                        ),
                        "string" => ConstantPoolEntry::StringBytes(joined),
                        "class" => ConstantPoolEntry::UnresolvedClass(joined),
                        other => return Err(fail(name, format!("unknown const tag `{other}`"))),
                    };
                    const_pool.push(entry);
                }
                "method" => {
                    let kind = parts.next().ok_or_else(|| fail(name, "method needs a kind"))?;
                    let mname = parts.next().ok_or_else(|| fail(name, "method needs a name"))?;
                    let descriptor = parts.next().ok_or_else(|| fail(name, "method needs a descriptor"))?;
                    let max_stack: usize = parts
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| fail(name, "method needs maxstack"))?;
                    let max_locals: usize = parts
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| fail(name, "method needs maxlocals"))?;
                    current = Some(PendingMethod {
                        is_static: kind == "static",
                        name: mname.to_string(),
                        descriptor: descriptor.to_string(),
                        max_stack,
                        max_locals,
                        code: Vec::new(),
                        handlers: Vec::new(),
                    });
                }
                other => return Err(fail(name, format!("unknown declaration `{other}`"))),
            }
        }
        if current.is_some() {
            return Err(fail(name, "method missing endmethod"));
        }

        // The fixture format doesn't walk a real classpath to load a named
        // superclass recursively -- it stands a minimal, method-less
        // placeholder in for it instead, carrying its own fresh id. That's
        // enough for `is_subclass_of`/ACC_SUPER dispatch to see a distinct
        // class in the chain, but not enough to resolve an inherited
        // method or field through it; a fixture class that needs those
        // should declare them itself rather than relying on inheritance.
        let super_class: Option<ClassRef> = super_name.map(|sup| {
            Arc::new(Class {
                name: sup,
                super_class: None,
                flags: 0,
                id: class::next_class_id(),
                interfaces: Vec::new(),
                methods: Vec::new(),
                instance_fields: Vec::new(),
                static_fields: Vec::new(),
                statics: Mutex::new(Vec::new()),
                initializer_chain: InitializerChain::new(Vec::new()),
                fixed_instance_size: 0,
            })
        });

        let class_id = class::next_class_id();
        let fixed_instance_size = instance_fields.len();

        // `Method.owner` is read only for its id/flags/super-chain (the
        // ACC_SUPER redirect rule and trace formatting) -- never for its
        // own `methods`/field tables, which callers always reach through
        // the canonical `ClassRef` the resolver hands back. So each
        // method's owner can be a lighter sibling `Arc` sharing the same
        // id rather than the literal class value being built below,
        // sidestepping the self-reference a single shared `Arc` would need.
        let owner_view = Arc::new(Class {
            name: name.to_string(),
            super_class: super_class.clone(),
            flags,
            id: class_id,
            interfaces: Vec::new(),
            methods: Vec::new(),
            instance_fields: Vec::new(),
            static_fields: Vec::new(),
            statics: Mutex::new(Vec::new()),
            initializer_chain: InitializerChain::new(Vec::new()),
            fixed_instance_size,
        });

        let mut built_methods = Vec::with_capacity(methods.len());
        for (offset, m) in methods.into_iter().enumerate() {
            let param_count = class::parameter_count(&m.descriptor);
            let method_flags = if m.is_static { crate::def::ACC_STATIC } else { 0 };
            built_methods.push(Arc::new(Method {
                owner: owner_view.clone(),
                name: m.name,
                descriptor: m.descriptor,
                offset,
                param_count,
                flags: method_flags,
                code: Some(Code::new(m.code, const_pool.clone(), m.max_stack, m.max_locals, m.handlers)),
            }));
        }

        Ok(Class {
            name: name.to_string(),
            super_class,
            flags,
            id: class_id,
            interfaces: Vec::new(),
            methods: built_methods,
            instance_fields,
            static_fields: static_fields.clone(),
            statics: Mutex::new(vec![Slot::Null; static_fields.len()]),
            initializer_chain: InitializerChain::new(Vec::new()),
            fixed_instance_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decomposes_semicolon_separated_roots_with_current_dir_first() {
        let cp = ClassPath::from_str("~/some/other/bar; /bar/baz;dir ;");
        let expected: Vec<PathBuf> = vec![".", "~/some/other/bar", "/bar/baz", "dir"]
            .into_iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(cp.roots(), expected.as_slice());
    }

    #[test]
    fn missing_class_is_a_recoverable_error() {
        let cp = ClassPath::from_str("");
        match cp.find("does.not.Exist") {
            Err(VmError::ClassNotFoundBytes(name)) => assert_eq!(name, "does.not.Exist"),
            other => panic!("expected ClassNotFoundBytes, got {other:?}"),
        }
    }

    #[test]
    fn fixture_reader_builds_a_class_with_fields_and_a_method() {
        use crate::resolver::ClassFileReader;
        let text = "\
            class Adder\n\
            flags 0x21\n\
            field static total I\n\
            method static add (II)I 4 2\n\
            code 1a 1b 60 ac\n\
            endmethod\n\
        ";
        let reader = FixtureClassFileReader::new();
        let class = reader.parse("Adder", text.as_bytes()).unwrap();
        assert_eq!(class.name, "Adder");
        assert!(class.has_acc_super());
        assert_eq!(class.static_fields.len(), 1);
        assert_eq!(class.static_fields[0].name, "total");
        assert_eq!(class.methods.len(), 1);
        let m = &class.methods[0];
        assert_eq!(m.name, "add");
        assert_eq!(m.param_count, 2);
        assert!(m.is_static());
        assert_eq!(m.code.as_ref().unwrap().body, vec![0x1a, 0x1b, 0x60, 0xac]);
    }

    #[test]
    fn fixture_reader_rejects_unterminated_method_body() {
        use crate::resolver::ClassFileReader;
        let text = "class Bad\nmethod static m ()V 1 1\ncode 00\n";
        let reader = FixtureClassFileReader::new();
        assert!(reader.parse("Bad", text.as_bytes()).is_err());
    }
}
