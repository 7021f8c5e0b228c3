//! Append-only program tables for functions, classes, and global variables.
//!
//! Ids are insertion positions and are never reused; registration either
//! completes in full or leaves every table unchanged.

use super::symbols::DebugSymbols;
use super::Instruction;
use crate::corelib;
use crate::vm::{NativeCallContext, NativeOutcome};

/// Bucket count of every class's member hash table. Power of two.
pub const CLASS_HASH_SIZE: u32 = 64;

/// Bucket payloads below this value are method positions; payloads at or
/// above it are variable positions offset by it.
pub const CLASS_MAX_METHODS: u32 = 1 << 20;

pub type NativeFn = fn(&mut NativeCallContext<'_>) -> NativeOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("name already bound in the same module")]
    DuplicateSymbol,
    #[error("class already has a member with this name")]
    DuplicateClassMember,
    #[error("class method table is full")]
    TooManyMethods,
}

#[derive(Clone)]
pub struct FuncEntry {
    pub is_native: bool,
    pub code: Vec<Instruction>,
    pub native: Option<NativeFn>,
    /// Stable lookup string for native functions,
    /// `module.name` or `module.name@lib:library`.
    pub native_lookup: Option<String>,
    pub arg_count: u16,
    pub kwarg_names: Vec<Option<String>>,
    pub last_is_multiarg: bool,
    /// Slots holding arguments (plus `self` for methods) at frame entry.
    pub input_stack_size: u16,
    /// Additional slots the function body needs; set by the emitter.
    pub inner_stack_size: u16,
    /// For closure-capturing functions: the defining function's frame slots
    /// whose values are snapshotted when `GETFUNC` creates the closure, in
    /// capture-slot order. Empty for capture-free functions.
    pub capture_source_slots: Vec<u16>,
    pub associated_class_id: Option<u32>,
}

impl std::fmt::Debug for FuncEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuncEntry")
            .field("is_native", &self.is_native)
            .field("code_len", &self.code.len())
            .field("arg_count", &self.arg_count)
            .field("input_stack_size", &self.input_stack_size)
            .field("inner_stack_size", &self.inner_stack_size)
            .field("capture_source_slots", &self.capture_source_slots)
            .field("associated_class_id", &self.associated_class_id)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MemberBucketEntry {
    name_id: u32,
    method_or_var_idx: u32,
}

/// Result of a class member lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassMember {
    /// Position in the method list plus the method's func id.
    Method { index: u32, func_id: u32 },
    /// Position in the member-variable list.
    Var { index: u32 },
}

#[derive(Debug, Clone)]
pub struct ClassEntry {
    pub base_class_global_id: Option<u32>,
    /// Ordered `(member name id, func id)` pairs.
    pub methods: Vec<(u32, u32)>,
    /// Ordered member-variable name ids.
    pub vars: Vec<u32>,
    pub has_varinit_func: bool,
    buckets: Vec<Vec<MemberBucketEntry>>,
}

impl ClassEntry {
    fn new() -> Self {
        Self {
            base_class_global_id: None,
            methods: Vec::new(),
            vars: Vec::new(),
            has_varinit_func: false,
            buckets: vec![Vec::new(); CLASS_HASH_SIZE as usize],
        }
    }

    /// Reconstructs an entry from its ordered member lists, re-deriving the
    /// bucket table. Used when decoding a program image.
    pub(super) fn rebuild(
        base_class_global_id: Option<u32>,
        has_varinit_func: bool,
        methods: Vec<(u32, u32)>,
        vars: Vec<u32>,
    ) -> Self {
        let mut buckets = vec![Vec::new(); CLASS_HASH_SIZE as usize];
        for (index, &(name_id, _)) in methods.iter().enumerate() {
            buckets[(name_id % CLASS_HASH_SIZE) as usize].push(MemberBucketEntry {
                name_id,
                method_or_var_idx: index as u32,
            });
        }
        for (index, &name_id) in vars.iter().enumerate() {
            buckets[(name_id % CLASS_HASH_SIZE) as usize].push(MemberBucketEntry {
                name_id,
                method_or_var_idx: CLASS_MAX_METHODS + index as u32,
            });
        }
        ClassEntry {
            base_class_global_id,
            methods,
            vars,
            has_varinit_func,
            buckets,
        }
    }

    /// Linear scan over the ordered member lists; reference behavior for
    /// the bucket probe.
    pub fn lookup_member_linear(&self, name_id: u32) -> Option<ClassMember> {
        for (index, &(method_name_id, func_id)) in self.methods.iter().enumerate() {
            if method_name_id == name_id {
                return Some(ClassMember::Method {
                    index: index as u32,
                    func_id,
                });
            }
        }
        for (index, &var_name_id) in self.vars.iter().enumerate() {
            if var_name_id == name_id {
                return Some(ClassMember::Var {
                    index: index as u32,
                });
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalVarEntry {
    pub is_const: bool,
}

/// Pre-interned name ids for the special member names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialNameIds {
    pub to_str: u32,
    pub length: u32,
    pub init: u32,
    pub destroy: u32,
    pub clone: u32,
    pub equals: u32,
    pub hash: u32,
}

#[derive(Debug, Clone)]
pub struct Program {
    pub funcs: Vec<FuncEntry>,
    pub classes: Vec<ClassEntry>,
    pub globals: Vec<GlobalVarEntry>,
    pub symbols: DebugSymbols,
    pub main_func_index: Option<u32>,
    pub globalinit_func_index: Option<u32>,
    pub special_name_ids: SpecialNameIds,
}

impl Program {
    /// An empty program with the builtin core library registered: error
    /// classes in their fixed order, builtin functions, and the special
    /// member names pre-interned.
    pub fn new() -> Self {
        let mut symbols = DebugSymbols::new();
        let special_name_ids = SpecialNameIds {
            to_str: symbols.intern_member_name("to_str"),
            length: symbols.intern_member_name("length"),
            init: symbols.intern_member_name("init"),
            destroy: symbols.intern_member_name("destroy"),
            clone: symbols.intern_member_name("clone"),
            equals: symbols.intern_member_name("equals"),
            hash: symbols.intern_member_name("hash"),
        };
        let mut program = Self {
            funcs: Vec::new(),
            classes: Vec::new(),
            globals: Vec::new(),
            symbols,
            main_func_index: None,
            globalinit_func_index: None,
            special_name_ids,
        };
        corelib::register_error_classes(&mut program)
            .expect("builtin error classes register into an empty program");
        corelib::register_funcs(&mut program)
            .expect("builtin funcs register into an empty program");
        program
    }

    /// An entirely empty program without the core library. Only the codec
    /// uses this; every other construction path goes through `new`.
    pub(crate) fn bare() -> Self {
        let mut symbols = DebugSymbols::new();
        let special_name_ids = SpecialNameIds {
            to_str: symbols.intern_member_name("to_str"),
            length: symbols.intern_member_name("length"),
            init: symbols.intern_member_name("init"),
            destroy: symbols.intern_member_name("destroy"),
            clone: symbols.intern_member_name("clone"),
            equals: symbols.intern_member_name("equals"),
            hash: symbols.intern_member_name("hash"),
        };
        Self {
            funcs: Vec::new(),
            classes: Vec::new(),
            globals: Vec::new(),
            symbols,
            main_func_index: None,
            globalinit_func_index: None,
            special_name_ids,
        }
    }

    /// Appends a global variable slot and its symbol rows. Fails without
    /// side effects when `name` is already bound in the module.
    pub fn add_global_var(
        &mut self,
        name: &str,
        is_const: bool,
        file_uri: Option<&str>,
        module_path: Option<&str>,
        library_name: Option<&str>,
    ) -> Result<u32, RegisterError> {
        let fileuri_index = file_uri.map(|uri| self.symbols.intern_file_uri(uri));
        let module_idx = self.symbols.module_index(module_path, library_name);
        let msymbols = &mut self.symbols.module_symbols[module_idx];
        if msymbols.has_name(name) {
            return Err(RegisterError::DuplicateSymbol);
        }

        let global_id = self.globals.len() as u32;
        let entry_idx = msymbols.globalvar_symbols.len() as u32;
        msymbols
            .globalvar_symbols
            .push(super::symbols::GlobalVarSymbol {
                name: name.to_string(),
                global_id,
                fileuri_index,
                is_const,
            });
        msymbols
            .globalvar_name_to_entry
            .insert(name.to_string(), entry_idx);
        self.symbols
            .globalvar_id_to_module
            .push((module_idx as u32, entry_idx));
        self.globals.push(GlobalVarEntry { is_const });
        Ok(global_id)
    }

    /// Appends a class entry with an empty member table sized to
    /// `CLASS_HASH_SIZE` buckets.
    pub fn add_class(
        &mut self,
        name: &str,
        file_uri: Option<&str>,
        module_path: Option<&str>,
        library_name: Option<&str>,
    ) -> Result<u32, RegisterError> {
        let fileuri_index = file_uri.map(|uri| self.symbols.intern_file_uri(uri));
        let module_idx = self.symbols.module_index(module_path, library_name);
        let msymbols = &mut self.symbols.module_symbols[module_idx];
        if msymbols.has_name(name) {
            return Err(RegisterError::DuplicateSymbol);
        }

        let class_id = self.classes.len() as u32;
        let entry_idx = msymbols.class_symbols.len() as u32;
        msymbols.class_symbols.push(super::symbols::ClassSymbol {
            name: name.to_string(),
            global_id: class_id,
            fileuri_index,
        });
        msymbols
            .class_name_to_entry
            .insert(name.to_string(), entry_idx);
        self.symbols
            .class_id_to_module
            .push((module_idx as u32, entry_idx));
        self.classes.push(ClassEntry::new());
        Ok(class_id)
    }

    pub fn set_class_base(&mut self, class_id: u32, base_class_id: u32) {
        self.classes[class_id as usize].base_class_global_id = Some(base_class_id);
    }

    /// Registers a member on a class: a method when `func_id` is given, a
    /// member variable otherwise. Rejects duplicate names on the same
    /// class; checks happen before any table is touched.
    pub fn register_class_member(
        &mut self,
        class_id: u32,
        name: &str,
        func_id: Option<u32>,
    ) -> Result<u32, RegisterError> {
        let name_id = self.symbols.intern_member_name(name);
        let class = &mut self.classes[class_id as usize];
        let bucket_index = (name_id % CLASS_HASH_SIZE) as usize;
        if class.buckets[bucket_index]
            .iter()
            .any(|e| e.name_id == name_id)
        {
            return Err(RegisterError::DuplicateClassMember);
        }

        let method_or_var_idx = match func_id {
            Some(func_id) => {
                if class.methods.len() as u32 >= CLASS_MAX_METHODS {
                    return Err(RegisterError::TooManyMethods);
                }
                class.methods.push((name_id, func_id));
                class.methods.len() as u32 - 1
            }
            None => {
                class.vars.push(name_id);
                CLASS_MAX_METHODS + class.vars.len() as u32 - 1
            }
        };
        class.buckets[bucket_index].push(MemberBucketEntry {
            name_id,
            method_or_var_idx,
        });
        Ok(name_id)
    }

    /// Probes the member bucket for `name_id` linearly.
    pub fn lookup_class_member(&self, class_id: u32, name_id: u32) -> Option<ClassMember> {
        let class = &self.classes[class_id as usize];
        let bucket = &class.buckets[(name_id % CLASS_HASH_SIZE) as usize];
        for entry in bucket {
            if entry.name_id != name_id {
                continue;
            }
            if entry.method_or_var_idx < CLASS_MAX_METHODS {
                let index = entry.method_or_var_idx;
                let func_id = class.methods[index as usize].1;
                return Some(ClassMember::Method { index, func_id });
            }
            return Some(ClassMember::Var {
                index: entry.method_or_var_idx - CLASS_MAX_METHODS,
            });
        }
        None
    }

    /// Registers a bytecode function. With `associated_class_id` set it is
    /// also registered as a method of that class; failures roll the symbol
    /// rows back so the tables stay unchanged.
    #[allow(clippy::too_many_arguments)]
    pub fn register_function(
        &mut self,
        name: Option<&str>,
        file_uri: Option<&str>,
        arg_count: u16,
        kwarg_names: Vec<Option<String>>,
        last_is_multiarg: bool,
        module_path: Option<&str>,
        library_name: Option<&str>,
        associated_class_id: Option<u32>,
    ) -> Result<u32, RegisterError> {
        self.register_function_ex(
            name,
            None,
            file_uri,
            arg_count,
            kwarg_names,
            last_is_multiarg,
            module_path,
            library_name,
            associated_class_id,
        )
    }

    /// Registers a native-callback function.
    #[allow(clippy::too_many_arguments)]
    pub fn register_native_function(
        &mut self,
        name: &str,
        callback: NativeFn,
        arg_count: u16,
        kwarg_names: Vec<Option<String>>,
        last_is_multiarg: bool,
        module_path: Option<&str>,
        library_name: Option<&str>,
        associated_class_id: Option<u32>,
    ) -> Result<u32, RegisterError> {
        self.register_function_ex(
            Some(name),
            Some(callback),
            None,
            arg_count,
            kwarg_names,
            last_is_multiarg,
            module_path,
            library_name,
            associated_class_id,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn register_function_ex(
        &mut self,
        name: Option<&str>,
        native: Option<NativeFn>,
        file_uri: Option<&str>,
        arg_count: u16,
        kwarg_names: Vec<Option<String>>,
        last_is_multiarg: bool,
        module_path: Option<&str>,
        library_name: Option<&str>,
        associated_class_id: Option<u32>,
    ) -> Result<u32, RegisterError> {
        debug_assert!(name.is_some() || associated_class_id.is_none());
        let fileuri_index = file_uri.map(|uri| self.symbols.intern_file_uri(uri));
        let module_idx = self.symbols.module_index(module_path, library_name);

        // Free functions may not collide with other module-level names;
        // methods live in their class's namespace instead.
        if associated_class_id.is_none() {
            if let Some(name) = name {
                if self.symbols.module_symbols[module_idx].has_name(name) {
                    return Err(RegisterError::DuplicateSymbol);
                }
            }
        }

        let func_id = self.funcs.len() as u32;

        // A method registration can still fail on a duplicate member name;
        // do it before any symbol row is written.
        if let Some(class_id) = associated_class_id {
            let name = name.expect("methods are always named");
            self.register_class_member(class_id, name, Some(func_id))?;
        }

        let native_lookup = native.map(|_| {
            let name = name.unwrap_or_default();
            let module = module_path.filter(|m| !m.is_empty()).unwrap_or("$$builtin");
            match library_name {
                Some(lib) if !lib.is_empty() => format!("{module}.{name}@lib:{lib}"),
                _ => format!("{module}.{name}"),
            }
        });

        let msymbols = &mut self.symbols.module_symbols[module_idx];
        let entry_idx = msymbols.func_symbols.len() as u32;
        msymbols.func_symbols.push(super::symbols::FuncSymbol {
            name: name.map(str::to_string),
            global_id: func_id,
            fileuri_index,
            arg_count,
            has_self_arg: associated_class_id.is_some(),
            last_arg_is_multiarg: last_is_multiarg,
        });
        if let Some(name) = name {
            if associated_class_id.is_none() {
                msymbols.func_name_to_entry.insert(name.to_string(), entry_idx);
            }
        }
        self.symbols
            .func_id_to_module
            .push((module_idx as u32, entry_idx));

        self.funcs.push(FuncEntry {
            is_native: native.is_some(),
            code: Vec::new(),
            native,
            native_lookup,
            arg_count,
            kwarg_names,
            last_is_multiarg,
            input_stack_size: arg_count + u16::from(associated_class_id.is_some()),
            inner_stack_size: 0,
            capture_source_slots: Vec::new(),
            associated_class_id,
        });
        Ok(func_id)
    }

    /// Normalizes a file URI and returns its stable table index.
    pub fn intern_file_uri(&mut self, uri: &str) -> u32 {
        self.symbols.intern_file_uri(uri)
    }

    /// True when the class (or any ancestor through the base-class chain)
    /// is `ancestor_id`.
    pub fn class_is_or_inherits(&self, class_id: u32, ancestor_id: u32) -> bool {
        let mut cursor = Some(class_id);
        while let Some(id) = cursor {
            if id == ancestor_id {
                return true;
            }
            cursor = self.classes[id as usize].base_class_global_id;
        }
        false
    }

    /// Looks a member up along the inheritance chain, innermost class
    /// first. Returns the defining class alongside the member.
    pub fn lookup_member_in_chain(
        &self,
        class_id: u32,
        name_id: u32,
    ) -> Option<(u32, ClassMember)> {
        let mut cursor = Some(class_id);
        while let Some(id) = cursor {
            if let Some(member) = self.lookup_class_member(id, name_id) {
                return Some((id, member));
            }
            cursor = self.classes[id as usize].base_class_global_id;
        }
        None
    }

    /// Total member-variable slots of an instance, ancestors included.
    pub fn instance_var_count(&self, class_id: u32) -> usize {
        let mut count = 0;
        let mut cursor = Some(class_id);
        while let Some(id) = cursor {
            count += self.classes[id as usize].vars.len();
            cursor = self.classes[id as usize].base_class_global_id;
        }
        count
    }

    /// Start offset of `defining_class`'s variables within an instance of
    /// `class_id`. Ancestor variables come first, root-most class first.
    pub fn instance_var_offset(&self, class_id: u32, defining_class: u32) -> usize {
        let mut chain = Vec::new();
        let mut cursor = Some(class_id);
        while let Some(id) = cursor {
            chain.push(id);
            cursor = self.classes[id as usize].base_class_global_id;
        }
        let mut offset = 0;
        for &id in chain.iter().rev() {
            if id == defining_class {
                return offset;
            }
            offset += self.classes[id as usize].vars.len();
        }
        offset
    }

    /// The class's `init` method, if registered anywhere in its chain.
    pub fn init_func_of(&self, class_id: u32) -> Option<u32> {
        match self.lookup_member_in_chain(class_id, self.special_name_ids.init) {
            Some((_, ClassMember::Method { func_id, .. })) => Some(func_id),
            _ => None,
        }
    }

    /// The class's synthesized `$$varinit` method, if one was registered.
    pub fn varinit_func_of(&self, class_id: u32) -> Option<u32> {
        let name_id = self.symbols.member_name_id("$$varinit")?;
        match self.lookup_class_member(class_id, name_id) {
            Some(ClassMember::Method { func_id, .. }) => Some(func_id),
            _ => None,
        }
    }

    /// Installs a function's instruction stream and stack requirement.
    pub fn set_func_code(&mut self, func_id: u32, code: Vec<Instruction>, inner_stack_size: u16) {
        let entry = &mut self.funcs[func_id as usize];
        debug_assert!(!entry.is_native);
        entry.code = code;
        entry.inner_stack_size = inner_stack_size;
    }

    /// Records where a capturing function's bound values come from in its
    /// defining function's frame, in capture-slot order.
    pub fn set_func_capture_sources(&mut self, func_id: u32, capture_source_slots: Vec<u16>) {
        let entry = &mut self.funcs[func_id as usize];
        debug_assert!(!entry.is_native);
        entry.capture_source_slots = capture_source_slots;
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}
