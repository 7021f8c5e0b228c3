//! Container, iterator, and member-access handlers.

use crate::bytecode::{ClassMember, ConstValue};
use crate::vm::{IterKind, ObjectPayload, Value};

use super::{Exec, Fault, Flow};

pub(super) fn materialize_const(ex: &mut Exec<'_>, value: &ConstValue) -> Value {
    match value {
        ConstValue::None => Value::None,
        ConstValue::Bool(b) => Value::Bool(*b),
        ConstValue::Int(v) => Value::Int(*v),
        ConstValue::Float(v) => Value::Float(*v),
        ConstValue::Str(units) => {
            Value::HeapRef(ex.thread.heap.alloc(ObjectPayload::Str(units.clone())))
        }
    }
}

pub(super) fn new_container(
    ex: &mut Exec<'_>,
    floor: usize,
    dest: u16,
    payload: ObjectPayload,
) -> Result<Flow, Fault> {
    let dest_abs = ex.abs_slot(floor, dest)?;
    let id = ex.thread.heap.alloc(payload);
    let t = &mut *ex.thread;
    t.stack.put(&mut t.heap, dest_abs, Value::HeapRef(id));
    Ok(Flow::Continue)
}

fn heap_ref_at(ex: &Exec<'_>, abs: usize, what: &'static str) -> Result<crate::vm::HeapId, Fault> {
    match *ex.thread.stack.get(abs) {
        Value::HeapRef(id) => Ok(id),
        _ => Err(Fault::type_mismatch(format!(
            "{what}: slot does not hold a heap object"
        ))),
    }
}

pub(super) fn add_to_list(
    ex: &mut Exec<'_>,
    floor: usize,
    list: u16,
    value: u16,
) -> Result<(), Fault> {
    let list_abs = ex.abs_slot(floor, list)?;
    let value_abs = ex.abs_slot(floor, value)?;
    let list_id = heap_ref_at(ex, list_abs, "addtolist")?;
    if !matches!(&ex.thread.heap.get(list_id).payload, ObjectPayload::List(_)) {
        return Err(Fault::type_mismatch("addtolist: target is not a list"));
    }
    let item = ex.thread.stack.get(value_abs).clone();
    if let Value::HeapRef(id) = item {
        ex.thread.heap.incr_heap(id);
    }
    match &mut ex.thread.heap.get_mut(list_id).payload {
        ObjectPayload::List(items) => items.push(item),
        _ => unreachable!("checked above"),
    }
    Ok(())
}

pub(super) fn add_to_set(
    ex: &mut Exec<'_>,
    floor: usize,
    set: u16,
    value: u16,
) -> Result<(), Fault> {
    let set_abs = ex.abs_slot(floor, set)?;
    let value_abs = ex.abs_slot(floor, value)?;
    let set_id = heap_ref_at(ex, set_abs, "addtoset")?;
    let item = ex.thread.stack.get(value_abs).clone();
    let Some(key) = ex.thread.heap.value_key(&item) else {
        return Err(Fault::type_mismatch("addtoset: value is not hashable"));
    };
    let already_present = match &ex.thread.heap.get(set_id).payload {
        ObjectPayload::Set(items) => items.contains_key(&key),
        _ => return Err(Fault::type_mismatch("addtoset: target is not a set")),
    };
    if already_present {
        return Ok(());
    }
    if let Value::HeapRef(id) = item {
        ex.thread.heap.incr_heap(id);
    }
    match &mut ex.thread.heap.get_mut(set_id).payload {
        ObjectPayload::Set(items) => {
            items.insert(key, item);
        }
        _ => unreachable!("checked above"),
    }
    Ok(())
}

pub(super) fn put_vector(
    ex: &mut Exec<'_>,
    floor: usize,
    vector: u16,
    index: u32,
    value: u16,
) -> Result<(), Fault> {
    let vector_abs = ex.abs_slot(floor, vector)?;
    let value_abs = ex.abs_slot(floor, value)?;
    let vector_id = heap_ref_at(ex, vector_abs, "putvector")?;
    let component = match *ex.thread.stack.get(value_abs) {
        Value::Int(v) => v as f64,
        Value::Float(v) => v,
        _ => return Err(Fault::type_mismatch("putvector: value must be a number")),
    };
    match &mut ex.thread.heap.get_mut(vector_id).payload {
        ObjectPayload::Vector(items) => {
            let idx = index as usize;
            if idx >= items.len() {
                items.resize(idx + 1, 0.0);
            }
            items[idx] = component;
        }
        _ => return Err(Fault::type_mismatch("putvector: target is not a vector")),
    }
    Ok(())
}

pub(super) fn put_map(
    ex: &mut Exec<'_>,
    floor: usize,
    map: u16,
    key: u16,
    value: u16,
) -> Result<(), Fault> {
    let map_abs = ex.abs_slot(floor, map)?;
    let key_abs = ex.abs_slot(floor, key)?;
    let value_abs = ex.abs_slot(floor, value)?;
    let map_id = heap_ref_at(ex, map_abs, "putmap")?;
    let key_value = ex.thread.stack.get(key_abs).clone();
    let item = ex.thread.stack.get(value_abs).clone();
    let Some(key_form) = ex.thread.heap.value_key(&key_value) else {
        return Err(Fault::type_mismatch("putmap: key is not hashable"));
    };
    if !matches!(&ex.thread.heap.get(map_id).payload, ObjectPayload::Map(_)) {
        return Err(Fault::type_mismatch("putmap: target is not a map"));
    }
    if let Value::HeapRef(id) = key_value {
        ex.thread.heap.incr_heap(id);
    }
    if let Value::HeapRef(id) = item {
        ex.thread.heap.incr_heap(id);
    }
    let previous = match &mut ex.thread.heap.get_mut(map_id).payload {
        ObjectPayload::Map(entries) => entries.insert(key_form, (key_value, item)),
        _ => unreachable!("checked above"),
    };
    if let Some((old_key, old_value)) = previous {
        for old in [old_key, old_value] {
            if let Value::HeapRef(id) = old {
                ex.thread.heap.decr_heap(id);
            }
        }
    }
    Ok(())
}

pub(super) fn new_iterator(
    ex: &mut Exec<'_>,
    floor: usize,
    dest: u16,
    source: u16,
) -> Result<(), Fault> {
    let source_abs = ex.abs_slot(floor, source)?;
    let dest_abs = ex.abs_slot(floor, dest)?;
    let source_id = heap_ref_at(ex, source_abs, "newiterator")?;
    let kind = match &ex.thread.heap.get(source_id).payload {
        ObjectPayload::List(_) => IterKind::List,
        ObjectPayload::Set(_) => IterKind::Set,
        ObjectPayload::Map(_) => IterKind::MapKeys,
        ObjectPayload::Vector(_) => IterKind::Vector,
        ObjectPayload::Str(_) => IterKind::Str,
        other => {
            return Err(Fault::type_mismatch(format!(
                "newiterator: cannot iterate a {}",
                other.type_name()
            )))
        }
    };
    ex.thread.heap.incr_heap(source_id);
    let iterator = ex.thread.heap.alloc(ObjectPayload::Iterator {
        kind,
        source: source_id,
        index: 0,
    });
    let t = &mut *ex.thread;
    t.stack.put(&mut t.heap, dest_abs, Value::HeapRef(iterator));
    Ok(())
}

pub(super) fn iterate(
    ex: &mut Exec<'_>,
    floor: usize,
    dest: u16,
    iterator: u16,
    end_target: u32,
) -> Result<(), Fault> {
    let iterator_abs = ex.abs_slot(floor, iterator)?;
    let dest_abs = ex.abs_slot(floor, dest)?;
    let iterator_id = heap_ref_at(ex, iterator_abs, "iterate")?;
    let (kind, source, index) = match &ex.thread.heap.get(iterator_id).payload {
        ObjectPayload::Iterator {
            kind,
            source,
            index,
        } => (*kind, *source, *index),
        _ => return Err(Fault::type_mismatch("iterate: slot is not an iterator")),
    };

    enum Next {
        Exhausted,
        Value(Value),
        StrUnit(u32),
    }
    let next = match (kind, &ex.thread.heap.get(source).payload) {
        (IterKind::List, ObjectPayload::List(items)) => match items.get(index) {
            Some(item) => Next::Value(item.clone()),
            None => Next::Exhausted,
        },
        (IterKind::Set, ObjectPayload::Set(items)) => match items.get_index(index) {
            Some((_, item)) => Next::Value(item.clone()),
            None => Next::Exhausted,
        },
        (IterKind::MapKeys, ObjectPayload::Map(entries)) => match entries.get_index(index) {
            Some((_, (key, _))) => Next::Value(key.clone()),
            None => Next::Exhausted,
        },
        (IterKind::Vector, ObjectPayload::Vector(items)) => match items.get(index) {
            Some(component) => Next::Value(Value::Float(*component)),
            None => Next::Exhausted,
        },
        (IterKind::Str, ObjectPayload::Str(units)) => match units.get(index) {
            Some(unit) => Next::StrUnit(*unit),
            None => Next::Exhausted,
        },
        _ => {
            return Err(Fault::invalid_instruction(
                "iterate: iterator source changed type",
            ))
        }
    };

    match next {
        Next::Exhausted => {
            ex.frames
                .last_mut()
                .expect("iterate executes inside a frame")
                .pc = end_target as usize;
        }
        Next::Value(value) => {
            advance_iterator(ex, iterator_id);
            if let Value::HeapRef(id) = value {
                ex.thread.heap.incr_external(id);
            }
            let t = &mut *ex.thread;
            t.stack.put(&mut t.heap, dest_abs, value);
        }
        Next::StrUnit(unit) => {
            advance_iterator(ex, iterator_id);
            let id = ex.thread.heap.alloc(ObjectPayload::Str(vec![unit]));
            let t = &mut *ex.thread;
            t.stack.put(&mut t.heap, dest_abs, Value::HeapRef(id));
        }
    }
    Ok(())
}

fn advance_iterator(ex: &mut Exec<'_>, iterator_id: crate::vm::HeapId) {
    if let ObjectPayload::Iterator { index, .. } =
        &mut ex.thread.heap.get_mut(iterator_id).payload
    {
        *index += 1;
    }
}

pub(super) fn get_member(
    ex: &mut Exec<'_>,
    floor: usize,
    dest: u16,
    object: u16,
    name_id: u32,
) -> Result<(), Fault> {
    let object_abs = ex.abs_slot(floor, object)?;
    let dest_abs = ex.abs_slot(floor, dest)?;
    let object_id = heap_ref_at(ex, object_abs, "getmember")?;
    let length_name_id = ex.program.special_name_ids.length;

    let result = match &ex.thread.heap.get(object_id).payload {
        ObjectPayload::Str(units) if name_id == length_name_id => {
            Value::Int(units.len() as i64)
        }
        ObjectPayload::List(items) if name_id == length_name_id => {
            Value::Int(items.len() as i64)
        }
        ObjectPayload::Set(items) if name_id == length_name_id => {
            Value::Int(items.len() as i64)
        }
        ObjectPayload::Map(entries) if name_id == length_name_id => {
            Value::Int(entries.len() as i64)
        }
        ObjectPayload::Vector(items) if name_id == length_name_id => {
            Value::Int(items.len() as i64)
        }
        ObjectPayload::Instance { class_id, vars } => {
            match ex.program.lookup_member_in_chain(*class_id, name_id) {
                Some((defining_class, ClassMember::Var { index })) => {
                    let offset = ex.program.instance_var_offset(*class_id, defining_class);
                    vars[offset + index as usize].clone()
                }
                Some((_, ClassMember::Method { func_id, .. })) => Value::FuncRef(func_id),
                None => {
                    let name = ex
                        .program
                        .symbols
                        .member_name(name_id)
                        .unwrap_or("<unknown>");
                    return Err(Fault::type_mismatch(format!(
                        "getmember: no member \"{name}\" on this object"
                    )));
                }
            }
        }
        other => {
            let name = ex
                .program
                .symbols
                .member_name(name_id)
                .unwrap_or("<unknown>");
            return Err(Fault::type_mismatch(format!(
                "getmember: no member \"{name}\" on a {}",
                other.type_name()
            )));
        }
    };
    // A copied instance var gains a new root reference; every other result
    // is a fresh non-heap value.
    if let Value::HeapRef(id) = result {
        ex.thread.heap.incr_external(id);
    }
    let t = &mut *ex.thread;
    t.stack.put(&mut t.heap, dest_abs, result);
    Ok(())
}
