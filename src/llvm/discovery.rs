//! Target function discovery.
//!
//! Matches every function in the module against the configured target names.
//! Definitions become landing targets; the function type of every match,
//! declaration or definition, becomes a target signature used to recognize
//! calls worth decorating.

use hashbrown::HashSet;
use inkwell::module::Module;
use inkwell::types::AsTypeRef;
use inkwell::values::FunctionValue;
use llvm_sys::prelude::LLVMTypeRef;

use crate::core::config::TargetSet;
use crate::llvm::function_name;

/// Targets found in one module.
#[derive(Debug)]
pub struct TargetDiscovery<'ctx> {
    /// Target definitions, in module order.
    definitions: Vec<FunctionValue<'ctx>>,

    /// Function types of every matched function.
    signatures: HashSet<LLVMTypeRef>,

    /// Functions examined.
    scanned: usize,
}

impl<'ctx> TargetDiscovery<'ctx> {
    /// Scan `module` for functions named in `targets`.
    pub fn scan(module: &Module<'ctx>, targets: &TargetSet) -> Self {
        let mut definitions = Vec::new();
        let mut signatures = HashSet::new();
        let mut scanned = 0;
        let mut matched = 0;

        for function in module.get_functions() {
            scanned += 1;
            let name = function_name(function);
            if !targets.contains(&name) {
                continue;
            }

            matched += 1;
            if !function.as_global_value().is_declaration() {
                log::debug!("found target function definition {}", name);
                definitions.push(function);
            }
            signatures.insert(function.get_type().as_type_ref());
        }

        if matched == 0 {
            log::debug!("no target functions found in module");
        } else {
            log::debug!(
                "{} target functions ({} definitions)",
                matched,
                definitions.len()
            );
        }

        Self {
            definitions,
            signatures,
            scanned,
        }
    }

    /// Whether any target, defined or declared, exists in the module.
    pub fn found(&self) -> bool {
        !self.signatures.is_empty()
    }

    pub fn definitions(&self) -> &[FunctionValue<'ctx>] {
        &self.definitions
    }

    pub fn signatures(&self) -> &HashSet<LLVMTypeRef> {
        &self.signatures
    }

    pub fn scanned(&self) -> usize {
        self.scanned
    }
}
