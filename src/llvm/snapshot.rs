// This module embeds a self-describing snapshot into the module under decoration. The
// builder first collects the external symbol table (which also strips optnone/noinline
// from definitions), then serializes the module in its current state to bitcode. That
// state already includes the linked support module but none of the decoration, which is
// what the runtime recompiles from; decoration is added only after this point so the
// snapshot never grows with repeated re-specialization. The bitcode bytes, the address
// table and the reflect descriptor tying them together are installed as three internal
// constant globals. The snapshot itself is returned as an owned byte buffer so callers can
// inspect exactly what was embedded.

//! Self snapshot embedding.

use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::values::{BasicValue, GlobalValue, PointerValue};

use crate::llvm::layout::SupportItems;
use crate::llvm::symbols::{SymbolCollector, SymbolEntry};

/// What was embedded into the module.
#[derive(Debug)]
pub struct SelfSnapshot<'ctx> {
    /// Bitcode of the undecorated module.
    pub bitcode: Vec<u8>,

    /// Address table entries, by ordinal.
    pub symbols: Vec<SymbolEntry<'ctx>>,

    /// The `__drti_self` descriptor global.
    pub descriptor: GlobalValue<'ctx>,
}

/// Builds and installs the module's self snapshot.
pub struct SelfSnapshotBuilder<'a, 'ctx> {
    context: &'ctx Context,
    module: &'a Module<'ctx>,
    support: &'a SupportItems<'ctx>,
}

impl<'a, 'ctx> SelfSnapshotBuilder<'a, 'ctx> {
    pub const BITCODE_GLOBAL: &'static str = "__drti_bitcode";
    pub const GLOBALS_GLOBAL: &'static str = "__drti_globals";
    pub const SELF_GLOBAL: &'static str = "__drti_self";

    pub fn new(
        context: &'ctx Context,
        module: &'a Module<'ctx>,
        support: &'a SupportItems<'ctx>,
    ) -> Self {
        Self {
            context,
            module,
            support,
        }
    }

    /// Snapshot the module and install the descriptor.
    pub fn build(&self, listed_globals: &[String]) -> SelfSnapshot<'ctx> {
        // Collect after linking so the table matches the serialized bitcode.
        let symbols = SymbolCollector::new(listed_globals).collect(self.module);

        let bitcode = self.raw_bitcode();
        let bitcode_global = self.add_constant_global(
            &self.context.const_string(&bitcode, false),
            Self::BITCODE_GLOBAL,
        );

        let ptr_type = self.context.ptr_type(inkwell::AddressSpace::default());
        let addresses: Vec<PointerValue<'ctx>> =
            symbols.iter().map(|entry| entry.address).collect();
        let globals_global =
            self.add_constant_global(&ptr_type.const_array(&addresses), Self::GLOBALS_GLOBAL);

        let i64_type = self.context.i64_type();
        let reflect = self.support.reflect_type.const_named_struct(&[
            bitcode_global.as_pointer_value().into(),
            i64_type.const_int(bitcode.len() as u64, false).into(),
            globals_global.as_pointer_value().into(),
            i64_type.const_int(addresses.len() as u64, false).into(),
        ]);
        let descriptor = self.add_constant_global(&reflect, Self::SELF_GLOBAL);

        log::debug!(
            "inserted {} of size {} with {} symbols",
            Self::SELF_GLOBAL,
            bitcode.len(),
            symbols.len()
        );

        SelfSnapshot {
            bitcode,
            symbols,
            descriptor,
        }
    }

    fn raw_bitcode(&self) -> Vec<u8> {
        self.module.write_bitcode_to_memory().as_slice().to_vec()
    }

    fn add_constant_global<V: BasicValue<'ctx>>(&self, initializer: &V, name: &str) -> GlobalValue<'ctx> {
        let value = initializer.as_basic_value_enum();
        let global = self.module.add_global(value.get_type(), None, name);
        global.set_initializer(&value);
        global.set_constant(true);
        global.set_linkage(Linkage::Internal);
        global
    }
}
