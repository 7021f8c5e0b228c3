//! The value stack: a flat slot array with a current-function floor.

use super::heap::Heap;
use super::Value;

/// Slots held back from normal growth so exception construction still has
/// room when the stack limit is hit.
pub const ALLOC_EMERGENCY_MARGIN: usize = 16;

#[derive(Debug)]
pub struct Stack {
    entries: Vec<Value>,
    pub current_func_floor: usize,
    max_entries: usize,
}

impl Stack {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            current_func_floor: 0,
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, idx: usize) -> &Value {
        &self.entries[idx]
    }

    /// Moves the value out, leaving `none`. No reference counts change;
    /// ownership travels with the returned value.
    pub fn take(&mut self, idx: usize) -> Value {
        std::mem::replace(&mut self.entries[idx], Value::None)
    }

    /// Overwrites a slot, releasing whatever it held. The new value's
    /// external reference (if any) transfers to the slot.
    pub fn put(&mut self, heap: &mut Heap, idx: usize, value: Value) {
        heap.free_value(&mut self.entries[idx]);
        self.entries[idx] = value;
    }

    /// Grows or shrinks to `total_entries` slots. Shrinking always succeeds
    /// and releases every truncated slot. Growing fails (returning `false`,
    /// stack unchanged) once it would eat into the emergency margin, unless
    /// the margin is explicitly in use.
    pub fn to_size(
        &mut self,
        heap: &mut Heap,
        total_entries: usize,
        use_emergency_margin: bool,
    ) -> bool {
        if total_entries < self.entries.len() {
            for idx in (total_entries..self.entries.len()).rev() {
                heap.free_value(&mut self.entries[idx]);
            }
            self.entries.truncate(total_entries);
            return true;
        }
        let margin = if use_emergency_margin {
            0
        } else {
            ALLOC_EMERGENCY_MARGIN
        };
        if total_entries + margin > self.max_entries {
            return false;
        }
        self.entries.resize(total_entries, Value::None);
        true
    }

    /// Debug listing of every slot, written to stderr.
    pub fn dump(&self) {
        eprintln!("=== STACK ===");
        eprintln!(
            "* total entries: {}, current func floor: {}",
            self.entries.len(),
            self.current_func_floor
        );
        for (idx, value) in self.entries.iter().enumerate() {
            match value {
                Value::None => eprintln!("{idx}: none"),
                Value::Bool(b) => eprintln!("{idx}: {b}"),
                Value::Int(v) => eprintln!("{idx}: {v}"),
                Value::Float(v) => eprintln!("{idx}: {v}"),
                Value::FuncRef(id) => eprintln!("{idx}: func {id}"),
                Value::ClassRef(id) => eprintln!("{idx}: class {id}"),
                Value::HeapRef(id) => eprintln!("{idx}: gcval {}", id.0),
            }
        }
    }
}
