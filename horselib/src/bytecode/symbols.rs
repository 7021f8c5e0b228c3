//! Debug symbols: per-module symbol tables, member-name interning, and the
//! file-URI table.
//!
//! Tables are append-only; every id is an insertion position and stays
//! valid for the lifetime of the program.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use crate::paths;

/// The builtin module always occupies the first slot.
pub const BUILTIN_MODULE_INDEX: usize = 0;

#[derive(Debug, Clone)]
pub struct FuncSymbol {
    pub name: Option<String>,
    pub global_id: u32,
    pub fileuri_index: Option<u32>,
    pub arg_count: u16,
    pub has_self_arg: bool,
    pub last_arg_is_multiarg: bool,
}

#[derive(Debug, Clone)]
pub struct ClassSymbol {
    pub name: String,
    pub global_id: u32,
    pub fileuri_index: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct GlobalVarSymbol {
    pub name: String,
    pub global_id: u32,
    pub fileuri_index: Option<u32>,
    pub is_const: bool,
}

/// Symbols of one module. Name maps go to module-local entry positions;
/// the symbol rows carry the program-global ids.
#[derive(Debug, Clone, Default)]
pub struct ModuleSymbols {
    pub module_path: String,
    pub library_name: Option<String>,
    pub func_symbols: Vec<FuncSymbol>,
    pub class_symbols: Vec<ClassSymbol>,
    pub globalvar_symbols: Vec<GlobalVarSymbol>,
    pub func_name_to_entry: IndexMap<String, u32>,
    pub class_name_to_entry: IndexMap<String, u32>,
    pub globalvar_name_to_entry: IndexMap<String, u32>,
}

impl ModuleSymbols {
    fn new(module_path: String, library_name: Option<String>) -> Self {
        Self {
            module_path,
            library_name,
            ..Self::default()
        }
    }

    /// True if any symbol table of this module already binds `name`.
    pub fn has_name(&self, name: &str) -> bool {
        self.func_name_to_entry.contains_key(name)
            || self.class_name_to_entry.contains_key(name)
            || self.globalvar_name_to_entry.contains_key(name)
    }
}

#[derive(Debug, Clone)]
pub struct DebugSymbols {
    pub module_symbols: Vec<ModuleSymbols>,
    module_key_to_index: HashMap<(String, String), usize>,
    member_names: IndexSet<String>,
    member_names_frozen: bool,
    pub file_uris: Vec<String>,
    file_uri_to_index: HashMap<String, u32>,
    /// Per func id: (module index, entry position within the module).
    pub func_id_to_module: Vec<(u32, u32)>,
    pub class_id_to_module: Vec<(u32, u32)>,
    pub globalvar_id_to_module: Vec<(u32, u32)>,
    pub main_module_path: Option<String>,
    pub main_fileuri_index: Option<u32>,
}

impl Default for DebugSymbols {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugSymbols {
    pub fn new() -> Self {
        let builtin = ModuleSymbols::new(String::new(), None);
        let mut module_key_to_index = HashMap::new();
        module_key_to_index.insert((String::new(), String::new()), BUILTIN_MODULE_INDEX);
        Self {
            module_symbols: vec![builtin],
            module_key_to_index,
            member_names: IndexSet::new(),
            member_names_frozen: false,
            file_uris: Vec::new(),
            file_uri_to_index: HashMap::new(),
            func_id_to_module: Vec::new(),
            class_id_to_module: Vec::new(),
            globalvar_id_to_module: Vec::new(),
            main_module_path: None,
            main_fileuri_index: None,
        }
    }

    pub fn builtin_module(&self) -> &ModuleSymbols {
        &self.module_symbols[BUILTIN_MODULE_INDEX]
    }

    /// Returns the module's symbol-table index, creating the module on
    /// first use. `None` selects the builtin module.
    pub fn module_index(
        &mut self,
        module_path: Option<&str>,
        library_name: Option<&str>,
    ) -> usize {
        let Some(module_path) = module_path else {
            return BUILTIN_MODULE_INDEX;
        };
        let key = (
            module_path.to_string(),
            library_name.unwrap_or("").to_string(),
        );
        if let Some(&idx) = self.module_key_to_index.get(&key) {
            return idx;
        }
        let idx = self.module_symbols.len();
        self.module_symbols.push(ModuleSymbols::new(
            module_path.to_string(),
            library_name.map(str::to_string),
        ));
        self.module_key_to_index.insert(key, idx);
        idx
    }

    pub fn find_module(
        &self,
        module_path: &str,
        library_name: Option<&str>,
    ) -> Option<&ModuleSymbols> {
        let key = (
            module_path.to_string(),
            library_name.unwrap_or("").to_string(),
        );
        self.module_key_to_index
            .get(&key)
            .map(|&idx| &self.module_symbols[idx])
    }

    /// Interns a member/attribute name to its program-wide stable id.
    /// Re-interning an already known name returns the same id.
    pub fn intern_member_name(&mut self, name: &str) -> u32 {
        debug_assert!(
            !self.member_names_frozen,
            "cannot intern member names once the table is frozen"
        );
        if let Some(idx) = self.member_names.get_index_of(name) {
            return idx as u32;
        }
        let (idx, _) = self.member_names.insert_full(name.to_string());
        idx as u32
    }

    pub fn member_name_id(&self, name: &str) -> Option<u32> {
        self.member_names.get_index_of(name).map(|i| i as u32)
    }

    pub fn member_name(&self, id: u32) -> Option<&str> {
        self.member_names.get_index(id as usize).map(String::as_str)
    }

    pub fn member_name_count(&self) -> usize {
        self.member_names.len()
    }

    /// Freezes the interning table; execution requires stable ids.
    pub fn freeze_member_names(&mut self) {
        self.member_names_frozen = true;
    }

    /// Normalizes `uri` and returns its stable index in the file-URI table.
    pub fn intern_file_uri(&mut self, uri: &str) -> u32 {
        let normalized = paths::normalize(uri);
        if let Some(&idx) = self.file_uri_to_index.get(&normalized) {
            return idx;
        }
        let idx = self.file_uris.len() as u32;
        self.file_uris.push(normalized.clone());
        self.file_uri_to_index.insert(normalized, idx);
        idx
    }

    pub fn func_symbol(&self, func_id: u32) -> Option<&FuncSymbol> {
        let &(module, sub) = self.func_id_to_module.get(func_id as usize)?;
        self.module_symbols[module as usize]
            .func_symbols
            .get(sub as usize)
    }

    pub fn class_symbol(&self, class_id: u32) -> Option<&ClassSymbol> {
        let &(module, sub) = self.class_id_to_module.get(class_id as usize)?;
        self.module_symbols[module as usize]
            .class_symbols
            .get(sub as usize)
    }

    pub fn globalvar_symbol(&self, var_id: u32) -> Option<&GlobalVarSymbol> {
        let &(module, sub) = self.globalvar_id_to_module.get(var_id as usize)?;
        self.module_symbols[module as usize]
            .globalvar_symbols
            .get(sub as usize)
    }

    pub fn class_name(&self, class_id: u32) -> &str {
        self.class_symbol(class_id)
            .map(|s| s.name.as_str())
            .unwrap_or("<unexpected lookup fail>")
    }
}
