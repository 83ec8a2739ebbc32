// File: src/table.rs
//
// The one hash-table implementation the spec calls for (§2), reused for
// globals, GavelScript-level table objects, and the GC's interned-string
// pool. Backed by `ahash` — declared in the teacher's Cargo.toml but never
// actually wired to a hasher there; here it does the job it was always
// meant for.

use crate::value::Value;
use ahash::RandomState;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Table {
    entries: HashMap<Value, Value, RandomState>,
}

impl Table {
    pub fn new() -> Self {
        Table {
            entries: HashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.entries.get(key).copied()
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Option<Value> {
        self.entries.insert(key, value)
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_roundtrip() {
        let mut t = Table::new();
        assert_eq!(t.insert(Value::Number(1.0), Value::Boolean(true)), None);
        assert_eq!(t.get(&Value::Number(1.0)), Some(Value::Boolean(true)));
        assert_eq!(t.get(&Value::Number(2.0)), None);
    }

    #[test]
    fn remove_drops_entry() {
        let mut t = Table::new();
        t.insert(Value::Nil, Value::Number(4.0));
        assert_eq!(t.remove(&Value::Nil), Some(Value::Number(4.0)));
        assert_eq!(t.len(), 0);
    }
}
