use horselib::bytecode::{ClassMember, Program, RegisterError, CLASS_HASH_SIZE};

#[test]
fn new_program_carries_builtin_error_classes() {
    let program = Program::new();
    assert_eq!(program.symbols.class_name(horselib::corelib::BASE_ERROR_CLASS), "BaseError");
    assert_eq!(
        program.symbols.class_name(horselib::corelib::VALUE_ERROR_CLASS),
        "ValueError"
    );
    assert!(program.class_is_or_inherits(
        horselib::corelib::VALUE_ERROR_CLASS,
        horselib::corelib::BASE_ERROR_CLASS
    ));
    assert!(!program.class_is_or_inherits(
        horselib::corelib::BASE_ERROR_CLASS,
        horselib::corelib::VALUE_ERROR_CLASS
    ));
}

#[test]
fn ids_are_assigned_in_insertion_order() {
    let mut program = Program::new();
    let first_class = program.classes.len() as u32;
    let a = program.add_class("A", None, Some("m"), None).expect("add A");
    let b = program.add_class("B", None, Some("m"), None).expect("add B");
    assert_eq!(a, first_class);
    assert_eq!(b, first_class + 1);

    let v0 = program
        .add_global_var("x", false, None, Some("m"), None)
        .expect("add x");
    let v1 = program
        .add_global_var("y", true, None, Some("m"), None)
        .expect("add y");
    assert_eq!(v1, v0 + 1);
    assert!(program.globals[v1 as usize].is_const);
}

#[test]
fn duplicate_module_level_names_are_rejected_without_side_effects() {
    let mut program = Program::new();
    program
        .add_global_var("thing", false, None, Some("m"), None)
        .expect("first registration");
    let globals_before = program.globals.len();
    let classes_before = program.classes.len();

    assert_eq!(
        program.add_global_var("thing", false, None, Some("m"), None),
        Err(RegisterError::DuplicateSymbol)
    );
    assert_eq!(
        program.add_class("thing", None, Some("m"), None),
        Err(RegisterError::DuplicateSymbol)
    );
    assert_eq!(program.globals.len(), globals_before);
    assert_eq!(program.classes.len(), classes_before);

    // The same name in another module is fine.
    program
        .add_global_var("thing", false, None, Some("other"), None)
        .expect("other module");
}

#[test]
fn member_name_interning_is_stable() {
    let mut program = Program::new();
    let a = program.symbols.intern_member_name("width");
    let b = program.symbols.intern_member_name("height");
    assert_ne!(a, b);
    assert_eq!(program.symbols.intern_member_name("width"), a);
    assert_eq!(program.symbols.member_name(a), Some("width"));

    // Ids are shared across classes.
    let c1 = program.add_class("C1", None, Some("m"), None).expect("C1");
    let c2 = program.add_class("C2", None, Some("m"), None).expect("C2");
    let id1 = program
        .register_class_member(c1, "width", None)
        .expect("member on C1");
    let id2 = program
        .register_class_member(c2, "width", None)
        .expect("member on C2");
    assert_eq!(id1, id2);
    assert_eq!(id1, a);
}

#[test]
fn duplicate_class_members_are_rejected() {
    let mut program = Program::new();
    let class = program.add_class("C", None, Some("m"), None).expect("C");
    program
        .register_class_member(class, "size", None)
        .expect("first member");
    assert_eq!(
        program.register_class_member(class, "size", None),
        Err(RegisterError::DuplicateClassMember)
    );
}

#[test]
fn bucket_probe_matches_linear_scan() {
    let mut program = Program::new();
    let class = program.add_class("Wide", None, Some("m"), None).expect("class");
    // Enough members to force bucket collisions (more names than buckets).
    let count = CLASS_HASH_SIZE as usize + 10;
    let mut name_ids = Vec::new();
    for i in 0..count {
        let name = format!("member_{i}");
        let with_func = i % 3 == 0;
        let func_id = if with_func {
            Some(
                program
                    .register_function(
                        Some(&name),
                        None,
                        0,
                        Vec::new(),
                        false,
                        Some("m"),
                        None,
                        Some(class),
                    )
                    .expect("method"),
            )
        } else {
            None
        };
        let name_id = match func_id {
            // Method path interned the name already.
            Some(_) => program.symbols.member_name_id(&name).expect("interned"),
            None => program
                .register_class_member(class, &name, None)
                .expect("member var"),
        };
        name_ids.push(name_id);
    }
    for name_id in name_ids {
        let probed = program.lookup_class_member(class, name_id);
        let scanned = program.classes[class as usize].lookup_member_linear(name_id);
        assert_eq!(probed, scanned);
        assert!(probed.is_some());
    }
}

#[test]
fn method_registration_links_func_and_member() {
    let mut program = Program::new();
    let class = program.add_class("Shape", None, Some("m"), None).expect("class");
    let func_id = program
        .register_function(
            Some("area"),
            None,
            0,
            Vec::new(),
            false,
            Some("m"),
            None,
            Some(class),
        )
        .expect("method");
    // Methods take a hidden self slot.
    assert_eq!(program.funcs[func_id as usize].input_stack_size, 1);

    let name_id = program.symbols.member_name_id("area").expect("interned");
    match program.lookup_class_member(class, name_id) {
        Some(ClassMember::Method { func_id: found, .. }) => assert_eq!(found, func_id),
        other => panic!("expected a method, got {other:?}"),
    }
}

#[test]
fn file_uris_intern_to_stable_normalized_indices() {
    let mut program = Program::new();
    let a = program.intern_file_uri("src//mod/../main.h64");
    let b = program.intern_file_uri("src/main.h64");
    assert_eq!(a, b);
    assert_eq!(program.symbols.file_uris[a as usize], "src/main.h64");
}

#[test]
fn inherited_members_resolve_through_the_chain() {
    let mut program = Program::new();
    let base = program.add_class("Base", None, Some("m"), None).expect("base");
    let derived = program.add_class("Derived", None, Some("m"), None).expect("derived");
    program.set_class_base(derived, base);
    program
        .register_class_member(base, "tag", None)
        .expect("base member");

    let name_id = program.symbols.member_name_id("tag").expect("interned");
    // Not on the derived class itself...
    assert!(program.lookup_class_member(derived, name_id).is_none());
    // ...but visible through the chain.
    let (defining, member) = program
        .lookup_member_in_chain(derived, name_id)
        .expect("found in chain");
    assert_eq!(defining, base);
    assert!(matches!(member, ClassMember::Var { index: 0 }));
}
