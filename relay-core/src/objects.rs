//! 对象引用表
//!
//! Live instances keyed by their token. Ids come from a counter that only
//! grows, so a deleted token can never resolve again.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{KernelError, KernelResult};
use crate::router::OverrideSet;
use crate::targets;
use crate::value::{ObjectRef, Value};

/// One live instance
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    fqn: String,
    overrides: OverrideSet,
    slots: HashMap<String, Value>,
}

impl Instance {
    pub fn fqn(&self) -> &str {
        &self.fqn
    }

    /// Host-implemented members of this instance
    pub fn overrides(&self) -> &OverrideSet {
        &self.overrides
    }

    pub fn slot(&self, name: &str) -> Option<&Value> {
        self.slots.get(name)
    }

    pub fn set_slot(&mut self, name: impl Into<String>, value: Value) {
        self.slots.insert(name.into(), value);
    }
}

/// 对象表
#[derive(Debug)]
pub struct ObjectTable {
    next_id: u64,
    live: HashMap<ObjectRef, Instance>,
}

impl ObjectTable {
    pub fn new(first_id: u64) -> Self {
        Self {
            next_id: first_id,
            live: HashMap::new(),
        }
    }

    /// Register a new instance and hand out its token
    pub fn allocate(&mut self, fqn: &str, overrides: OverrideSet) -> ObjectRef {
        let objref = ObjectRef::new(fqn, self.next_id);
        self.next_id += 1;
        self.live.insert(
            objref.clone(),
            Instance {
                fqn: fqn.to_string(),
                overrides,
                slots: HashMap::new(),
            },
        );
        debug!(target: targets::OBJECTS, %objref, "allocated");
        objref
    }

    pub fn resolve(&self, objref: &ObjectRef) -> KernelResult<&Instance> {
        self.live.get(objref).ok_or_else(|| not_found(objref))
    }

    pub fn resolve_mut(&mut self, objref: &ObjectRef) -> KernelResult<&mut Instance> {
        self.live.get_mut(objref).ok_or_else(|| not_found(objref))
    }

    pub fn contains(&self, objref: &ObjectRef) -> bool {
        self.live.contains_key(objref)
    }

    /// Remove an instance; objects it refers to stay live
    pub fn delete(&mut self, objref: &ObjectRef) -> KernelResult<Instance> {
        let instance = self.live.remove(objref).ok_or_else(|| not_found(objref))?;
        debug!(target: targets::OBJECTS, %objref, "deleted");
        Ok(instance)
    }

    /// 存活对象数量
    pub fn count(&self) -> usize {
        self.live.len()
    }
}

fn not_found(objref: &ObjectRef) -> KernelError {
    KernelError::ObjectNotFound {
        objref: objref.to_string(),
    }
}

/// Slot storage for static properties without a native accessor
#[derive(Debug, Default)]
pub struct StaticStore {
    slots: HashMap<(String, String), Value>,
}

impl StaticStore {
    pub fn get(&self, fqn: &str, property: &str) -> Option<&Value> {
        self.slots.get(&(fqn.to_string(), property.to_string()))
    }

    pub fn set(&mut self, fqn: &str, property: &str, value: Value) {
        self.slots
            .insert((fqn.to_string(), property.to_string()), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_never_reused() {
        let mut table = ObjectTable::new(10_000);
        let a = table.allocate("demo.A", OverrideSet::default());
        table.delete(&a).unwrap();
        let b = table.allocate("demo.A", OverrideSet::default());

        assert_eq!(a.id(), 10_000);
        assert_eq!(b.id(), 10_001);
        assert_ne!(a, b);
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn test_double_delete_is_an_error() {
        let mut table = ObjectTable::new(1);
        let a = table.allocate("demo.A", OverrideSet::default());
        assert!(table.delete(&a).is_ok());
        assert_eq!(table.delete(&a).unwrap_err().kind(), "ObjectNotFound");
        assert_eq!(table.resolve(&a).unwrap_err().kind(), "ObjectNotFound");
    }

    #[test]
    fn test_tampered_type_prefix_does_not_resolve() {
        let mut table = ObjectTable::new(1);
        let a = table.allocate("demo.A", OverrideSet::default());
        let forged: ObjectRef = "demo.B@1".parse().unwrap();
        assert!(table.resolve(&a).is_ok());
        assert!(!table.contains(&forged));
    }

    #[test]
    fn test_slots() {
        let mut table = ObjectTable::new(1);
        let a = table.allocate("demo.A", OverrideSet::default());
        table.resolve_mut(&a).unwrap().set_slot("x", Value::Int(4));
        assert_eq!(table.resolve(&a).unwrap().slot("x"), Some(&Value::Int(4)));

        let mut statics = StaticStore::default();
        assert!(statics.get("demo.A", "count").is_none());
        statics.set("demo.A", "count", Value::Int(1));
        assert_eq!(statics.get("demo.A", "count"), Some(&Value::Int(1)));
    }
}
