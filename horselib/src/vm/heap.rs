//! Per-thread heap: a slot pool of reference-counted objects.
//!
//! Every object carries two counters. `external_ref_count` covers references
//! from roots (stack slots, global slots, pending exception values);
//! `heap_ref_count` covers references from other heap objects. An object is
//! released as soon as both reach zero; reference cycles are reclaimed by
//! `collect_cycles`, which marks from externally-referenced objects only.

use indexmap::IndexMap;

use super::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(pub u32);

/// Hashable form of a value used as a set element or map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    None,
    Bool(bool),
    Int(i64),
    FloatBits(u64),
    Func(u32),
    Class(u32),
    Str(Vec<u32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterKind {
    List,
    Set,
    MapKeys,
    Vector,
    Str,
}

#[derive(Debug, Clone)]
pub enum ObjectPayload {
    Str(Vec<u32>),
    List(Vec<Value>),
    Set(IndexMap<ValueKey, Value>),
    Map(IndexMap<ValueKey, (Value, Value)>),
    Vector(Vec<f64>),
    Instance { class_id: u32, vars: Vec<Value> },
    Iterator { kind: IterKind, source: HeapId, index: usize },
    Exception { class_id: u32, message: String },
    /// A function value carrying the captured outer-variable values it was
    /// created with.
    Closure { func_id: u32, bound: Vec<Value> },
}

impl ObjectPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjectPayload::Str(_) => "str",
            ObjectPayload::List(_) => "list",
            ObjectPayload::Set(_) => "set",
            ObjectPayload::Map(_) => "map",
            ObjectPayload::Vector(_) => "vector",
            ObjectPayload::Instance { .. } => "instance",
            ObjectPayload::Iterator { .. } => "iterator",
            ObjectPayload::Exception { .. } => "exception",
            ObjectPayload::Closure { .. } => "closure",
        }
    }

    /// Heap objects this payload references.
    fn heap_children(&self, out: &mut Vec<HeapId>) {
        let mut push_value = |v: &Value, out: &mut Vec<HeapId>| {
            if let Value::HeapRef(id) = v {
                out.push(*id);
            }
        };
        match self {
            ObjectPayload::Str(_) | ObjectPayload::Vector(_) | ObjectPayload::Exception { .. } => {}
            ObjectPayload::List(items) => {
                for item in items {
                    push_value(item, out);
                }
            }
            ObjectPayload::Set(items) => {
                for item in items.values() {
                    push_value(item, out);
                }
            }
            ObjectPayload::Map(entries) => {
                for (key, value) in entries.values() {
                    push_value(key, out);
                    push_value(value, out);
                }
            }
            ObjectPayload::Instance { vars, .. } => {
                for var in vars {
                    push_value(var, out);
                }
            }
            ObjectPayload::Iterator { source, .. } => out.push(*source),
            ObjectPayload::Closure { bound, .. } => {
                for value in bound {
                    push_value(value, out);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeapObject {
    pub external_ref_count: u32,
    pub heap_ref_count: u32,
    pub payload: ObjectPayload,
}

/// Pool of heap objects. Freed slots are recycled through a free list, so
/// ids are only stable while the object is alive.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Option<HeapObject>>,
    free_slots: Vec<u32>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an object holding one external reference (the caller's
    /// root slot).
    pub fn alloc(&mut self, payload: ObjectPayload) -> HeapId {
        let object = HeapObject {
            external_ref_count: 1,
            heap_ref_count: 0,
            payload,
        };
        match self.free_slots.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(object);
                HeapId(idx)
            }
            None => {
                self.slots.push(Some(object));
                HeapId(self.slots.len() as u32 - 1)
            }
        }
    }

    pub fn get(&self, id: HeapId) -> &HeapObject {
        self.slots[id.0 as usize]
            .as_ref()
            .expect("heap id refers to a live object")
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapObject {
        self.slots[id.0 as usize]
            .as_mut()
            .expect("heap id refers to a live object")
    }

    pub fn is_live(&self, id: HeapId) -> bool {
        self.slots
            .get(id.0 as usize)
            .map(|s| s.is_some())
            .unwrap_or(false)
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Sum of all external reference counts; balanced-audit hook for tests.
    pub fn total_external_refs(&self) -> u64 {
        self.slots
            .iter()
            .flatten()
            .map(|o| o.external_ref_count as u64)
            .sum()
    }

    pub fn incr_external(&mut self, id: HeapId) {
        self.get_mut(id).external_ref_count += 1;
    }

    pub fn decr_external(&mut self, id: HeapId) {
        let object = self.get_mut(id);
        debug_assert!(object.external_ref_count > 0);
        object.external_ref_count -= 1;
        if object.external_ref_count == 0 && object.heap_ref_count == 0 {
            self.release(id);
        }
    }

    pub fn incr_heap(&mut self, id: HeapId) {
        self.get_mut(id).heap_ref_count += 1;
    }

    pub fn decr_heap(&mut self, id: HeapId) {
        let object = self.get_mut(id);
        debug_assert!(object.heap_ref_count > 0);
        object.heap_ref_count -= 1;
        if object.external_ref_count == 0 && object.heap_ref_count == 0 {
            self.release(id);
        }
    }

    /// Frees a dead object and cascades into its heap references.
    fn release(&mut self, id: HeapId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(object) = self.slots[id.0 as usize].take() else {
                continue;
            };
            debug_assert_eq!(object.external_ref_count, 0);
            debug_assert_eq!(object.heap_ref_count, 0);
            self.free_slots.push(id.0);
            let mut children = Vec::new();
            object.payload.heap_children(&mut children);
            for child in children {
                if let Some(child_obj) = self.slots[child.0 as usize].as_mut() {
                    debug_assert!(child_obj.heap_ref_count > 0);
                    child_obj.heap_ref_count -= 1;
                    if child_obj.external_ref_count == 0 && child_obj.heap_ref_count == 0 {
                        pending.push(child);
                    }
                }
            }
        }
    }

    /// Releases a root's hold on a value and blanks it. Idempotent: the
    /// slot is `None` afterwards, so a second call is a no-op.
    pub fn free_value(&mut self, value: &mut Value) {
        if let Value::HeapRef(id) = *value {
            self.decr_external(id);
        }
        *value = Value::None;
    }

    /// Reclaims reference cycles: marks every object reachable from an
    /// externally-referenced root, then sweeps the rest. Returns the number
    /// of objects freed.
    pub fn collect_cycles(&mut self) -> usize {
        let mut marked = vec![false; self.slots.len()];
        let mut worklist: Vec<HeapId> = Vec::new();
        for (idx, slot) in self.slots.iter().enumerate() {
            if let Some(object) = slot {
                if object.external_ref_count > 0 {
                    marked[idx] = true;
                    worklist.push(HeapId(idx as u32));
                }
            }
        }
        while let Some(id) = worklist.pop() {
            let mut children = Vec::new();
            if let Some(object) = &self.slots[id.0 as usize] {
                object.payload.heap_children(&mut children);
            }
            for child in children {
                let idx = child.0 as usize;
                if !marked[idx] && self.slots[idx].is_some() {
                    marked[idx] = true;
                    worklist.push(child);
                }
            }
        }

        let mut freed = 0;
        for idx in 0..self.slots.len() {
            if marked[idx] || self.slots[idx].is_none() {
                continue;
            }
            // Unmarked objects are unreachable from any root; drop them
            // wholesale, only fixing up edges into survivors.
            let object = self.slots[idx].take().expect("checked above");
            self.free_slots.push(idx as u32);
            freed += 1;
            let mut children = Vec::new();
            object.payload.heap_children(&mut children);
            for child in children {
                let child_idx = child.0 as usize;
                if marked[child_idx] {
                    if let Some(child_obj) = self.slots[child_idx].as_mut() {
                        debug_assert!(child_obj.heap_ref_count > 0);
                        child_obj.heap_ref_count -= 1;
                    }
                }
            }
        }
        freed
    }

    /// Hashable key form of a value, or `None` when the value cannot be a
    /// set element / map key.
    pub fn value_key(&self, value: &Value) -> Option<ValueKey> {
        match value {
            Value::None => Some(ValueKey::None),
            Value::Bool(b) => Some(ValueKey::Bool(*b)),
            Value::Int(v) => Some(ValueKey::Int(*v)),
            Value::Float(v) => Some(ValueKey::FloatBits(v.to_bits())),
            Value::FuncRef(id) => Some(ValueKey::Func(*id)),
            Value::ClassRef(id) => Some(ValueKey::Class(*id)),
            Value::HeapRef(id) => match &self.get(*id).payload {
                ObjectPayload::Str(units) => Some(ValueKey::Str(units.clone())),
                _ => None,
            },
        }
    }

    /// Structural equality as the language defines it: primitives by value,
    /// strings by content, every other heap object by identity.
    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::HeapRef(ia), Value::HeapRef(ib)) => {
                if ia == ib {
                    return true;
                }
                match (&self.get(*ia).payload, &self.get(*ib).payload) {
                    (ObjectPayload::Str(sa), ObjectPayload::Str(sb)) => sa == sb,
                    _ => false,
                }
            }
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            _ => a == b,
        }
    }
}
