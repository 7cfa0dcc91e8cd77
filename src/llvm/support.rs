// This module links the DRTI support module into the module being decorated. The support
// module is textual LLVM IR embedded into the crate at build time; it defines the record
// types shared with the runtime (reflect, landing_site, static_callsite, treenode) and the
// two hand-off routines called from instrumented code, _drti_landed and _drti_call_from.
// SupportLinker parses the blob into the target module's context and hands it to LLVM's
// module linker, which merges the definitions into the target. A blob that fails to parse
// or a link conflict aborts the pass, since a half-linked module cannot be used. Alternate
// blobs can be supplied for tools that ship their own build of the support routines.

//! Support module linking.

use std::borrow::Cow;

use inkwell::context::Context;
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::Module;

use crate::core::error::{DecorateError, DecorateResult};

/// Support routines and record types, as shipped with the pass.
pub const SUPPORT_IR: &str = include_str!("../../support/drti_support.ll");

/// Links a support module into modules under decoration.
#[derive(Debug, Clone)]
pub struct SupportLinker {
    source: Cow<'static, str>,
}

impl Default for SupportLinker {
    fn default() -> Self {
        Self {
            source: Cow::Borrowed(SUPPORT_IR),
        }
    }
}

impl SupportLinker {
    /// Linker for the embedded support module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Linker for an alternate support module given as textual IR.
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: Cow::Owned(source.into()),
        }
    }

    /// Parse the support module into `context`.
    pub fn parse<'ctx>(&self, context: &'ctx Context) -> DecorateResult<Module<'ctx>> {
        let buffer =
            MemoryBuffer::create_from_memory_range_copy(self.source.as_bytes(), "drti-support");
        context
            .create_module_from_ir(buffer)
            .map_err(|e| DecorateError::SupportParse {
                reason: e.to_string(),
            })
    }

    /// Link the support module into `module`.
    ///
    /// On error `module` may be partially linked and must be discarded.
    pub fn link_into<'ctx>(&self, context: &'ctx Context, module: &Module<'ctx>) -> DecorateResult<()> {
        let support = self.parse(context)?;

        log::debug!(
            "linking support module into {}",
            module.get_name().to_string_lossy()
        );

        module
            .link_in_module(support)
            .map_err(|e| DecorateError::LinkConflict {
                reason: e.to_string(),
            })
    }
}
