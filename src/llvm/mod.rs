//! LLVM integration for the decoration pass.
//!
//! Every stage of the pass works directly on inkwell modules. The stages run
//! in this order, driven by [`DecoratePass`]:
//!
//! 1. [`discovery`] finds target definitions and target signatures.
//! 2. [`support`] links the DRTI support module in.
//! 3. [`layout`] validates the linked record types and routines.
//! 4. [`snapshot`] embeds the module's own bitcode and address table.
//! 5. [`landing`] and [`callsite`] instrument each target definition.
//!
//! # Example
//! ```ignore
//! use drti_decorate::core::{DecorateOptions, TargetSet};
//! use drti_decorate::llvm::DecoratePass;
//! use inkwell::context::Context;
//!
//! let context = Context::create();
//! let module = drti_decorate::llvm::parse_module(&context, ir, "input")?;
//! let targets = TargetSet::from_names(["hot_fn"])?;
//! let outcome = DecoratePass::new(&context, targets, DecorateOptions::default())
//!     .run_on_module(&module)?;
//! ```

use std::path::Path;

use inkwell::context::Context;
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::Module;
use inkwell::values::FunctionValue;

pub mod callsite;
pub mod discovery;
pub mod landing;
pub mod layout;
pub mod pass;
pub mod probe;
pub mod snapshot;
pub mod support;
pub mod symbols;

pub use callsite::{CallCollector, CallSiteInstrumenter, CollectedCall};
pub use discovery::TargetDiscovery;
pub use landing::{LandingInstrumenter, LandingPoint};
pub use layout::{LayoutValidator, SupportItems};
pub use pass::{DecoratePass, DecorationReport, LandingSummary, PassOutcome};
pub use probe::{CallerProbe, ProbeGate, ReturnAddressProbe};
pub use snapshot::{SelfSnapshot, SelfSnapshotBuilder};
pub use support::{SupportLinker, SUPPORT_IR};
pub use symbols::{SymbolCollector, SymbolEntry, SymbolKind};

/// Magic prefix of LLVM bitcode files.
const BITCODE_MAGIC: &[u8] = b"BC";

/// Parse textual LLVM IR into a module.
pub fn parse_module<'ctx>(
    context: &'ctx Context,
    ir: &str,
    name: &str,
) -> Result<Module<'ctx>, String> {
    let buffer = MemoryBuffer::create_from_memory_range_copy(ir.as_bytes(), name);
    context
        .create_module_from_ir(buffer)
        .map_err(|e| format!("Failed to parse IR: {}", e))
}

/// Load a module from a bitcode or textual IR file.
pub fn load_module<'ctx>(context: &'ctx Context, path: &Path) -> Result<Module<'ctx>, String> {
    let buffer = MemoryBuffer::create_from_file(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;

    if buffer.as_slice().starts_with(BITCODE_MAGIC) {
        Module::parse_bitcode_from_buffer(&buffer, context)
            .map_err(|e| format!("Failed to parse bitcode {}: {}", path.display(), e))
    } else {
        context
            .create_module_from_ir(buffer)
            .map_err(|e| format!("Failed to parse IR {}: {}", path.display(), e))
    }
}

pub(crate) fn function_name(function: FunctionValue<'_>) -> String {
    function.get_name().to_string_lossy().into_owned()
}
