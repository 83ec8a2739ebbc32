// File: src/gc.rs
//
// Tri-color mark-and-sweep (§4.6). `Heap` is the collector: it owns every
// heap object through a flat arena (the idiomatic stand-in for "an
// intrusive list of every allocated object" — Design Notes §9 explicitly
// asks for index/handle references rather than raw pointers, and a `Vec`
// of slots is the natural way to express that ownership in Rust), the
// interned-string pool, and the allocation-threshold bookkeeping.
//
// Per Design Notes §9 ("global mutable state"), the pool and the object
// arena are owned per-runtime: a `Heap` belongs to exactly one `Vm`, not to
// a process-wide singleton.

use crate::object::{ Obj, ObjRef, UpvalueState };
use crate::table::Table;
use crate::value::Value;
use ahash::RandomState;
use std::collections::HashMap;

/// Snapshot of everything a `Vm` considers a GC root, borrowed for the
/// duration of one collection (§4.6 Roots).
pub struct Roots<'a> {
    pub stack: &'a [Value],
    pub frame_closures: &'a [ObjRef],
    pub open_upvalues: &'a [ObjRef],
    pub globals: &'a Table,
    /// The `Vm`'s peekable last-raised Objection (§6 "read the Objection via
    /// a peek operation"), if any. Not listed among §4.6's roots directly,
    /// but it must be one: otherwise a collection between a failing call and
    /// the embedder's `last_objection()` peek could sweep it.
    pub last_objection: Option<ObjRef>,
}

const INITIAL_THRESHOLD: usize = 1 << 20; // 1 MiB
const INITIAL_INTERN_THRESHOLD: usize = 256;

pub struct Heap {
    objects: Vec<Option<Obj>>,
    marks: Vec<bool>,
    free_list: Vec<u32>,
    intern_pool: HashMap<Box<str>, ObjRef, RandomState>,
    bytes_allocated: usize,
    threshold: usize,
    intern_threshold: usize,
    pub collections_run: u64,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            objects: Vec::new(),
            marks: Vec::new(),
            free_list: Vec::new(),
            intern_pool: HashMap::with_hasher(RandomState::new()),
            bytes_allocated: 0,
            threshold: INITIAL_THRESHOLD,
            intern_threshold: INITIAL_INTERN_THRESHOLD,
            collections_run: 0,
        }
    }

    pub fn alloc(&mut self, obj: Obj) -> ObjRef {
        self.bytes_allocated += approx_size(&obj);
        if let Some(idx) = self.free_list.pop() {
            self.objects[idx as usize] = Some(obj);
            self.marks[idx as usize] = false;
            ObjRef(idx)
        } else {
            self.objects.push(Some(obj));
            self.marks.push(false);
            ObjRef((self.objects.len() - 1) as u32)
        }
    }

    pub fn get(&self, r: ObjRef) -> &Obj {
        self.objects[r.index() as usize]
            .as_ref()
            .expect("dereferencing a freed ObjRef is a GC-soundness bug")
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        self.objects[r.index() as usize]
            .as_mut()
            .expect("dereferencing a freed ObjRef is a GC-soundness bug")
    }

    /// Interns a string by content: a second request for the same bytes
    /// returns the same `ObjRef` (invariant v).
    pub fn intern_string(&mut self, s: &str) -> ObjRef {
        if let Some(r) = self.intern_pool.get(s) {
            return *r;
        }
        let r = self.alloc(Obj::String(s.into()));
        self.intern_pool.insert(s.into(), r);
        r
    }

    pub fn intern_pool_len(&self) -> usize {
        self.intern_pool.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.iter().filter(|o| o.is_some()).count()
    }

    // --- Display helpers (ambient op, SPEC_FULL.md §4 Expansion) ---

    pub fn display_value(&self, v: &Value) -> String {
        match v {
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Character(c) => (*c as char).to_string(),
            Value::Object(r) => self.display_object(*r),
        }
    }

    pub fn display_object(&self, r: ObjRef) -> String {
        match self.get(r) {
            Obj::String(s) => s.to_string(),
            Obj::Table(t) => format!("table: {} entries", t.len()),
            Obj::Prototable(p) => format!("prototable: {}", p.type_name),
            Obj::Function(f) => match &f.name {
                Some(name) => format!("function: {}", name),
                None => "function: anonymous".to_string(),
            },
            Obj::Closure(c) => self.display_object(c.function),
            Obj::Upvalue(_) => "upvalue".to_string(),
            Obj::CFunction(f) => format!("cfunction: {}", f.name),
            Obj::BoundCall(_) => "boundcall".to_string(),
            Obj::Objection(o) => o.message.to_string(),
        }
    }

    // --- Mark and sweep (§4.6) ---

    pub fn check_garbage(&mut self, roots: Roots) {
        if self.bytes_allocated > self.threshold || self.intern_pool.len() > self.intern_threshold {
            self.collect_garbage(roots);
        }
    }

    pub fn collect_garbage(&mut self, roots: Roots) {
        self.collections_run += 1;
        let mut worklist: Vec<ObjRef> = Vec::new();

        for v in roots.stack {
            self.mark_value(v, &mut worklist);
        }
        for c in roots.frame_closures {
            self.mark_object(*c, &mut worklist);
        }
        for u in roots.open_upvalues {
            self.mark_object(*u, &mut worklist);
        }
        for (k, v) in roots.globals.iter() {
            self.mark_value(k, &mut worklist);
            self.mark_value(v, &mut worklist);
        }
        if let Some(r) = roots.last_objection {
            self.mark_object(r, &mut worklist);
        }

        while let Some(r) = worklist.pop() {
            self.blacken(r, &mut worklist);
        }

        self.sweep();
    }

    fn mark_value(&mut self, v: &Value, worklist: &mut Vec<ObjRef>) {
        if let Value::Object(r) = v {
            self.mark_object(*r, worklist);
        }
    }

    fn mark_object(&mut self, r: ObjRef, worklist: &mut Vec<ObjRef>) {
        let idx = r.index() as usize;
        if !self.marks[idx] {
            self.marks[idx] = true;
            worklist.push(r);
        }
    }

    /// Blackening marks everything a grey object references (§4.6 Mark).
    fn blacken(&mut self, r: ObjRef, worklist: &mut Vec<ObjRef>) {
        // Collect referenced handles/values first to avoid holding a borrow
        // of `self.objects` while recursively marking.
        enum Refs {
            Objects(Vec<ObjRef>),
            Values(Vec<Value>),
            Both(Vec<ObjRef>, Vec<Value>),
            None,
        }

        let refs = match self.get(r) {
            Obj::String(_) => Refs::None,
            Obj::Table(t) => {
                let mut vals = Vec::with_capacity(t.len() * 2);
                for (k, v) in t.iter() {
                    vals.push(*k);
                    vals.push(*v);
                }
                Refs::Values(vals)
            }
            Obj::Prototable(p) => {
                let mut out = Vec::new();
                p.mark_host_refs(&mut out);
                Refs::Objects(out)
            }
            Obj::Function(f) => {
                let ids = f.chunk.identifiers.clone();
                let consts = f.chunk.constants.clone();
                Refs::Both(ids, consts)
            }
            Obj::Closure(c) => {
                let mut objs = c.upvalues.clone();
                objs.push(c.function);
                Refs::Objects(objs)
            }
            Obj::Upvalue(u) => match &u.state {
                UpvalueState::Closed(v) => Refs::Values(vec![*v]),
                UpvalueState::Open(_) => Refs::None,
            },
            Obj::CFunction(_) => Refs::None,
            Obj::BoundCall(b) => Refs::Objects(vec![b.callback, b.receiver]),
            Obj::Objection(_) => Refs::None,
        };

        match refs {
            Refs::None => {}
            Refs::Objects(objs) => {
                for o in objs {
                    self.mark_object(o, worklist);
                }
            }
            Refs::Values(vals) => {
                for v in vals {
                    self.mark_value(&v, worklist);
                }
            }
            Refs::Both(objs, vals) => {
                for o in objs {
                    self.mark_object(o, worklist);
                }
                for v in vals {
                    self.mark_value(&v, worklist);
                }
            }
        }
    }

    fn sweep(&mut self) {
        for idx in 0..self.objects.len() {
            if self.objects[idx].is_some() {
                if self.marks[idx] {
                    self.marks[idx] = false;
                } else {
                    let freed = self.objects[idx].take().expect("checked is_some above");
                    self.bytes_allocated = self.bytes_allocated.saturating_sub(approx_size(&freed));
                    self.free_list.push(idx as u32);
                }
            }
        }

        let objects = &self.objects;
        self.intern_pool.retain(|_, r| objects[r.index() as usize].is_some());

        if self.bytes_allocated > self.threshold / 2 {
            self.threshold += self.bytes_allocated;
        }
        if self.intern_pool.len() > self.intern_threshold / 2 {
            self.intern_threshold += self.intern_pool.len();
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn approx_size(obj: &Obj) -> usize {
    match obj {
        Obj::String(s) => 24 + s.len(),
        Obj::Table(t) => 48 + t.len() * 32,
        Obj::Prototable(_) => 64,
        Obj::Function(f) => 80 + f.chunk.code.len() * 4,
        Obj::Closure(c) => 32 + c.upvalues.len() * 4,
        Obj::Upvalue(_) => 24,
        Obj::CFunction(_) => 32,
        Obj::BoundCall(_) => 24,
        Obj::Objection(o) => 32 + o.message.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedupes_by_content() {
        let mut heap = Heap::new();
        let a = heap.intern_string("hello");
        let b = heap.intern_string("hello");
        assert_eq!(a, b);
        let c = heap.intern_string("world");
        assert_ne!(a, c);
    }

    #[test]
    fn unreachable_object_is_swept() {
        let mut heap = Heap::new();
        let r = heap.alloc(Obj::Table(Table::new()));
        assert_eq!(heap.object_count(), 1);
        let globals = Table::new();
        heap.collect_garbage(Roots {
            stack: &[],
            frame_closures: &[],
            open_upvalues: &[],
            globals: &globals,
            last_objection: None,
        });
        assert_eq!(heap.object_count(), 0);
        let _ = r;
    }

    #[test]
    fn rooted_object_survives_collection() {
        let mut heap = Heap::new();
        let r = heap.alloc(Obj::Table(Table::new()));
        let stack = vec![Value::Object(r)];
        let globals = Table::new();
        heap.collect_garbage(Roots {
            stack: &stack,
            frame_closures: &[],
            open_upvalues: &[],
            globals: &globals,
            last_objection: None,
        });
        assert_eq!(heap.object_count(), 1);
    }

    #[test]
    fn table_values_keep_their_referents_alive() {
        let mut heap = Heap::new();
        let inner = heap.alloc(Obj::Table(Table::new()));
        let mut outer_table = Table::new();
        outer_table.insert(Value::Number(1.0), Value::Object(inner));
        let outer = heap.alloc(Obj::Table(outer_table));
        let stack = vec![Value::Object(outer)];
        let globals = Table::new();
        heap.collect_garbage(Roots {
            stack: &stack,
            frame_closures: &[],
            open_upvalues: &[],
            globals: &globals,
            last_objection: None,
        });
        assert_eq!(heap.object_count(), 2);
    }
}
