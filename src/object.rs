// File: src/object.rs
//
// The heap-object hierarchy: everything a `Value::Object` can point at.
// Per Design Notes §9 ("virtual heap-object hierarchy") this is a tagged
// enum rather than a trait-object hierarchy; equality, hashing, and
// stringification are pattern matches over `Obj` instead of virtual calls.

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// A handle into a `Heap`'s object arena. Cheap to copy, meaningless on its
/// own outside the `Heap` that allocated it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjRef(pub(crate) u32);

impl ObjRef {
    pub fn index(&self) -> u32 {
        self.0
    }
}

/// One frame of a synthesized call trace (§7).
#[derive(Clone, Debug)]
pub struct TraceFrame {
    pub name: Box<str>,
    pub line: u32,
    pub embedded: bool,
}

/// An Objection: GavelScript's single error kind, compile-time or runtime.
#[derive(Clone, Debug)]
pub struct Objection {
    pub message: Box<str>,
    pub trace: Vec<TraceFrame>,
}

impl Objection {
    pub fn new(message: impl Into<Box<str>>) -> Self {
        Objection {
            message: message.into(),
            trace: Vec::new(),
        }
    }
}

/// A compiled function: a Chunk plus the metadata §3 calls for.
#[derive(Debug)]
pub struct GFunction {
    pub name: Option<Box<str>>,
    pub arity: u8,
    pub upvalue_count: u8,
    pub chunk: Chunk,
    /// Compiler-generated frames (for-each bodies) are hidden from call traces.
    pub embedded: bool,
}

/// Where an `Upvalue` currently gets its value from.
#[derive(Debug)]
pub enum UpvalueState {
    /// Points at `stack[index]` in the owning Vm.
    Open(usize),
    /// Owns its value directly, after the frame that created it returned.
    Closed(Value),
}

#[derive(Debug)]
pub struct Upvalue {
    pub state: UpvalueState,
}

/// A Function bound to concrete captured upvalues.
#[derive(Debug)]
pub struct Closure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// A host-language callback. Returns `Err(message)` to raise an Objection;
/// the VM attaches the call trace.
pub type HostFn = Rc<dyn Fn(&mut crate::vm::Vm, &[Value]) -> Result<Value, String>>;

pub struct CFunctionObj {
    pub name: Box<str>,
    pub func: HostFn,
}

impl fmt::Debug for CFunctionObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CFunctionObj").field("name", &self.name).finish()
    }
}

/// Pairs a host callback with a Prototable receiver. `alive` must be cleared
/// by host code before the receiver is freed (§9 Open Question iii).
pub struct BoundCall {
    pub callback: ObjRef,
    pub receiver: ObjRef,
    pub alive: Cell<bool>,
}

impl fmt::Debug for BoundCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundCall")
            .field("callback", &self.callback)
            .field("receiver", &self.receiver)
            .field("alive", &self.alive.get())
            .finish()
    }
}

/// A typed getter/setter pair plus a GC-marking hook, registered by name on
/// a Prototable type descriptor.
pub struct PrototableAccessor {
    pub get: Option<Rc<dyn Fn(&Prototable) -> Value>>,
    pub set: Option<Rc<dyn Fn(&mut Prototable, Value) -> Result<(), String>>>,
    /// Lets the GC trace any ObjRefs this field's host data carries.
    pub mark: Option<Rc<dyn Fn(&Prototable, &mut Vec<ObjRef>)>>,
}

/// A table-shaped façade over host-language data with typed accessors.
pub struct Prototable {
    pub type_name: Box<str>,
    pub host: Box<dyn Any>,
    pub accessors: Rc<Vec<(Box<str>, PrototableAccessor)>>,
}

impl Prototable {
    pub fn get_field(&self, name: &str) -> Option<Value> {
        self.accessors
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .and_then(|(_, acc)| acc.get.as_ref())
            .map(|g| g(self))
    }

    pub fn set_field(&mut self, name: &str, value: Value) -> Result<bool, String> {
        let accessors = Rc::clone(&self.accessors);
        match accessors.iter().find(|(n, _)| n.as_ref() == name) {
            Some((_, acc)) => match &acc.set {
                Some(setter) => {
                    setter(self, value)?;
                    Ok(true)
                }
                None => Err(format!("field '{}' is read-only", name)),
            },
            None => Ok(false),
        }
    }

    pub fn mark_host_refs(&self, out: &mut Vec<ObjRef>) {
        let accessors = Rc::clone(&self.accessors);
        for (_, acc) in accessors.iter() {
            if let Some(mark) = &acc.mark {
                mark(self, out);
            }
        }
    }
}

impl fmt::Debug for Prototable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prototable").field("type_name", &self.type_name).finish()
    }
}

/// A heap object: everything a `Value::Object` handle can resolve to.
#[derive(Debug)]
pub enum Obj {
    String(Box<str>),
    Table(Table),
    Prototable(Prototable),
    Function(GFunction),
    Closure(Closure),
    Upvalue(Upvalue),
    CFunction(CFunctionObj),
    BoundCall(BoundCall),
    Objection(Objection),
}

impl Obj {
    pub fn type_name(&self) -> &'static str {
        match self {
            Obj::String(_) => "string",
            Obj::Table(_) => "table",
            Obj::Prototable(_) => "prototable",
            Obj::Function(_) => "function",
            Obj::Closure(_) => "closure",
            Obj::Upvalue(_) => "upvalue",
            Obj::CFunction(_) => "cfunction",
            Obj::BoundCall(_) => "boundcall",
            Obj::Objection(_) => "objection",
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Obj::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Obj::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_table_mut(&mut self) -> Option<&mut Table> {
        match self {
            Obj::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&Closure> {
        match self {
            Obj::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&GFunction> {
        match self {
            Obj::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_upvalue(&self) -> Option<&Upvalue> {
        match self {
            Obj::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_upvalue_mut(&mut self) -> Option<&mut Upvalue> {
        match self {
            Obj::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_objection(&self) -> Option<&Objection> {
        match self {
            Obj::Objection(o) => Some(o),
            _ => None,
        }
    }
}
