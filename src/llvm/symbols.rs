// This module builds the address table embedded next to the bitcode snapshot. The runtime
// loads the snapshot into a fresh LLVM context, where every external symbol is unresolved,
// and re-binds each one by ordinal to the address stored in the table; the collection
// order therefore has to be reproducible from the snapshot alone. SymbolCollector makes one
// deterministic pass: listed global variables first (module global order), then every
// non-intrinsic function declaration (module function order). The same pass strips
// optnone and noinline from every function definition, so modules built without
// optimization can still be inlined by later stages and by the runtime re-specializer.

//! Snapshot address table collection.

use hashbrown::HashSet;
use inkwell::attributes::{Attribute, AttributeLoc};
use inkwell::module::Module;
use inkwell::values::PointerValue;

use crate::llvm::function_name;

/// Kind of symbol captured in the address table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Function,
}

/// One address table entry.
#[derive(Debug, Clone)]
pub struct SymbolEntry<'ctx> {
    pub ordinal: u32,
    pub name: String,
    pub kind: SymbolKind,
    pub address: PointerValue<'ctx>,
}

/// Collects external symbols in a stable order.
pub struct SymbolCollector<'a> {
    listed_globals: HashSet<&'a str>,
    strip_attributes: bool,
}

impl<'a> SymbolCollector<'a> {
    const STRIPPED_ATTRIBUTES: [&'static str; 2] = ["optnone", "noinline"];

    pub fn new(listed_globals: &'a [String]) -> Self {
        Self {
            listed_globals: listed_globals.iter().map(String::as_str).collect(),
            strip_attributes: true,
        }
    }

    /// Collect without touching function attributes.
    pub fn read_only(mut self) -> Self {
        self.strip_attributes = false;
        self
    }

    pub fn collect<'ctx>(&self, module: &Module<'ctx>) -> Vec<SymbolEntry<'ctx>> {
        let mut result = Vec::new();

        for global in module.get_globals() {
            let name = global.get_name().to_string_lossy().into_owned();
            if self.listed_globals.contains(name.as_str()) {
                log::debug!("noting extern {}", name);
                result.push(SymbolEntry {
                    ordinal: result.len() as u32,
                    name,
                    kind: SymbolKind::Variable,
                    address: global.as_pointer_value(),
                });
            }
        }

        let stripped: Vec<u32> = Self::STRIPPED_ATTRIBUTES
            .iter()
            .map(|attribute| Attribute::get_named_enum_kind_id(attribute))
            .collect();

        for function in module.get_functions() {
            if function.get_intrinsic_id() != 0 {
                continue;
            }

            let global = function.as_global_value();
            if global.is_declaration() {
                let name = function_name(function);
                log::debug!("noting extern {}", name);
                result.push(SymbolEntry {
                    ordinal: result.len() as u32,
                    name,
                    kind: SymbolKind::Function,
                    address: global.as_pointer_value(),
                });
            } else if self.strip_attributes {
                for &kind_id in &stripped {
                    function.remove_enum_attribute(AttributeLoc::Function, kind_id);
                }
            }
        }

        result
    }
}
