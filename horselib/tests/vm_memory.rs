use horselib::vm::{Heap, ObjectPayload, Stack, Value, ALLOC_EMERGENCY_MARGIN};

#[test]
fn alloc_starts_with_one_external_reference() {
    let mut heap = Heap::new();
    let id = heap.alloc(ObjectPayload::Str(vec![104, 105]));
    assert_eq!(heap.get(id).external_ref_count, 1);
    assert_eq!(heap.get(id).heap_ref_count, 0);
    assert_eq!(heap.live_count(), 1);
    heap.decr_external(id);
    assert_eq!(heap.live_count(), 0);
}

#[test]
fn free_value_is_idempotent() {
    let mut heap = Heap::new();
    let id = heap.alloc(ObjectPayload::List(Vec::new()));
    let mut value = Value::HeapRef(id);
    heap.free_value(&mut value);
    assert!(value.is_none());
    assert_eq!(heap.live_count(), 0);
    // The slot now holds none; a second free must not touch the heap.
    heap.free_value(&mut value);
    assert!(value.is_none());
}

#[test]
fn releasing_a_container_cascades_into_its_children() {
    let mut heap = Heap::new();
    let child = heap.alloc(ObjectPayload::Str(vec![120]));
    let list = heap.alloc(ObjectPayload::List(vec![Value::HeapRef(child)]));
    heap.incr_heap(child);
    // The child is owned by the stack slot and by the list.
    let mut child_root = Value::HeapRef(child);
    heap.free_value(&mut child_root);
    assert_eq!(heap.live_count(), 2, "still heap-referenced");

    let mut list_root = Value::HeapRef(list);
    heap.free_value(&mut list_root);
    assert_eq!(heap.live_count(), 0, "release cascades through the edge");
}

#[test]
fn reference_cycles_need_the_tracing_sweep() {
    let mut heap = Heap::new();
    let a = heap.alloc(ObjectPayload::List(Vec::new()));
    let b = heap.alloc(ObjectPayload::List(Vec::new()));
    match &mut heap.get_mut(a).payload {
        ObjectPayload::List(items) => items.push(Value::HeapRef(b)),
        _ => unreachable!(),
    }
    heap.incr_heap(b);
    match &mut heap.get_mut(b).payload {
        ObjectPayload::List(items) => items.push(Value::HeapRef(a)),
        _ => unreachable!(),
    }
    heap.incr_heap(a);

    let (mut root_a, mut root_b) = (Value::HeapRef(a), Value::HeapRef(b));
    heap.free_value(&mut root_a);
    heap.free_value(&mut root_b);
    // Mutually referenced: counts never hit zero on their own.
    assert_eq!(heap.live_count(), 2);
    assert_eq!(heap.collect_cycles(), 2);
    assert_eq!(heap.live_count(), 0);
}

#[test]
fn cycle_sweep_keeps_externally_rooted_objects() {
    let mut heap = Heap::new();
    let rooted = heap.alloc(ObjectPayload::List(Vec::new()));
    let garbage = heap.alloc(ObjectPayload::List(Vec::new()));
    match &mut heap.get_mut(garbage).payload {
        ObjectPayload::List(items) => items.push(Value::HeapRef(rooted)),
        _ => unreachable!(),
    }
    heap.incr_heap(rooted);
    let mut garbage_root = Value::HeapRef(garbage);
    heap.free_value(&mut garbage_root);
    // `garbage` still points at `rooted`, but only `rooted` has a root.
    // (The plain refcount path already freed `garbage` since it had no
    // heap referrers; the sweep must find nothing else to do.)
    assert_eq!(heap.live_count(), 1);
    assert_eq!(heap.collect_cycles(), 0);
    assert!(heap.is_live(rooted));
    assert_eq!(heap.get(rooted).external_ref_count, 1);
    assert_eq!(heap.get(rooted).heap_ref_count, 0);
}

#[test]
fn stack_truncation_frees_exactly_the_truncated_slots() {
    let mut heap = Heap::new();
    let mut stack = Stack::new(1024);
    assert!(stack.to_size(&mut heap, 4, false));

    let kept = heap.alloc(ObjectPayload::Str(vec![97]));
    let dropped = heap.alloc(ObjectPayload::Str(vec![98]));
    stack.put(&mut heap, 0, Value::HeapRef(kept));
    stack.put(&mut heap, 3, Value::HeapRef(dropped));

    assert!(stack.to_size(&mut heap, 2, false));
    assert!(heap.is_live(kept));
    assert!(!heap.is_live(dropped));
    assert_eq!(heap.total_external_refs(), 1);

    assert!(stack.to_size(&mut heap, 0, false));
    assert_eq!(heap.total_external_refs(), 0);
    assert_eq!(heap.live_count(), 0);
}

#[test]
fn growth_respects_the_emergency_margin() {
    let mut heap = Heap::new();
    let limit = ALLOC_EMERGENCY_MARGIN + 4;
    let mut stack = Stack::new(limit);
    // Normal growth stops where the margin begins.
    assert!(stack.to_size(&mut heap, 4, false));
    assert!(!stack.to_size(&mut heap, 5, false));
    assert_eq!(stack.len(), 4, "failed growth leaves the stack unchanged");
    // Exception construction may dip into the margin.
    assert!(stack.to_size(&mut heap, 5, true));
    assert!(stack.to_size(&mut heap, limit, true));
    assert!(!stack.to_size(&mut heap, limit + 1, true));
    // Shrinking always succeeds.
    assert!(stack.to_size(&mut heap, 0, false));
}

#[test]
fn overwriting_a_slot_releases_the_old_value() {
    let mut heap = Heap::new();
    let mut stack = Stack::new(64);
    assert!(stack.to_size(&mut heap, 1, false));
    let first = heap.alloc(ObjectPayload::Str(vec![1]));
    stack.put(&mut heap, 0, Value::HeapRef(first));
    let second = heap.alloc(ObjectPayload::Str(vec![2]));
    stack.put(&mut heap, 0, Value::HeapRef(second));
    assert!(!heap.is_live(first));
    assert!(heap.is_live(second));
    assert_eq!(heap.total_external_refs(), 1);
}
