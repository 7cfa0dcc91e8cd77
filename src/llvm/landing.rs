// This module adds landing detection to the entry of every target function definition. The
// original entry block keeps the function body and becomes the continue block (drti_land1);
// a fresh entry block is prepended in front of it and receives the leading allocas, so
// successors of the old entry keep their phi edges untouched. The new entry runs the
// CallerProbe gate and branches to the probe block (drti_land2) or straight to continue.
// The probe block runs the confirming check and branches to the confirmed block
// (drti_land3) or to continue. The confirmed block fetches the caller's tree node through
// _drti_caller, reports the landing to _drti_landed and falls through. A phi at the top of
// continue selects the caller node (null on both failure edges), and every decorated call
// in the body passes it on to the runtime. Each target also gets its landing_site record,
// an internal global named _drti_landing_<function>.

//! Landing detection at target function entry.

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::values::{
    BasicValue, FunctionValue, GlobalValue, InstructionOpcode, InstructionValue, PointerValue,
};
use inkwell::AddressSpace;

use crate::core::error::{DecorateError, DecorateResult};
use crate::core::records::CALLER_ROUTINE;
use crate::llvm::function_name;
use crate::llvm::layout::SupportItems;
use crate::llvm::probe::CallerProbe;

/// What the landing instrumentation produced for one function.
#[derive(Debug, Clone, Copy)]
pub struct LandingPoint<'ctx> {
    /// The `_drti_landing_<function>` record.
    pub site: GlobalValue<'ctx>,

    /// Caller tree node, or null when the caller is not decorated.
    pub caller: PointerValue<'ctx>,
}

/// Instruments target function entries.
pub struct LandingInstrumenter<'a, 'ctx> {
    context: &'ctx Context,
    module: &'a Module<'ctx>,
    support: &'a SupportItems<'ctx>,
    descriptor: GlobalValue<'ctx>,
    probe: &'a dyn CallerProbe,
    builder: Builder<'ctx>,
}

impl<'a, 'ctx> LandingInstrumenter<'a, 'ctx> {
    pub const SITE_PREFIX: &'static str = "_drti_landing_";
    const SITE_NAME_GLOBAL: &'static str = "__drti_landing_site_name";
    const FUNCTION_NAME_GLOBAL: &'static str = "__drti_landing_site_function_name";

    pub fn new(
        context: &'ctx Context,
        module: &'a Module<'ctx>,
        support: &'a SupportItems<'ctx>,
        descriptor: GlobalValue<'ctx>,
        probe: &'a dyn CallerProbe,
    ) -> Self {
        Self {
            context,
            module,
            support,
            descriptor,
            probe,
            builder: context.create_builder(),
        }
    }

    /// Restructure the entry of `function` and create its landing site.
    pub fn instrument(&self, function: FunctionValue<'ctx>) -> DecorateResult<LandingPoint<'ctx>> {
        let name = function_name(function);
        let malformed = || DecorateError::MalformedEntryBlock {
            function: name.clone(),
        };

        let body = function.get_first_basic_block().ok_or_else(malformed)?;
        if body.get_terminator().is_none() {
            return Err(malformed());
        }
        let allocas = leading_allocas(body);

        let site = self.add_landing_site(&name);

        body.set_name("drti_land1");
        let entry = self.context.prepend_basic_block(body, "entry");
        let probe_block = self.context.insert_basic_block_after(entry, "drti_land2");
        let confirmed = self.context.insert_basic_block_after(probe_block, "drti_land3");

        self.builder.position_at_end(entry);
        for alloca in allocas {
            let alloca_name = alloca
                .get_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            alloca.remove_from_basic_block();
            self.builder.insert_instruction(&alloca, Some(&alloca_name));
        }

        let gate = self.probe.emit_gate(self.context, self.module, &self.builder)?;
        self.builder
            .build_conditional_branch(gate.taken, probe_block, body)?;

        self.builder.position_at_end(probe_block);
        let matches = self.probe.emit_confirm(self.context, &self.builder, &gate)?;
        self.builder
            .build_conditional_branch(matches, confirmed, body)?;

        self.builder.position_at_end(confirmed);
        let caller_routine = self.caller_routine();
        let node = self
            .builder
            .build_call(caller_routine, &[], "drtiCaller")?
            .try_as_basic_value()
            .basic()
            .ok_or_else(|| DecorateError::UnexpectedCallResult {
                callee: CALLER_ROUTINE.to_string(),
            })?
            .into_pointer_value();
        self.builder.build_call(
            self.support.landed,
            &[site.as_pointer_value().into(), node.into()],
            "",
        )?;
        self.builder.build_unconditional_branch(body)?;

        match body.get_first_instruction() {
            Some(first) => self.builder.position_before(&first),
            None => self.builder.position_at_end(body),
        }
        let ptr_type = self.ptr_type();
        let null = ptr_type.const_null();
        let phi = self.builder.build_phi(ptr_type, "drtiCallerTreenode")?;
        let incoming: [(&dyn BasicValue<'ctx>, BasicBlock<'ctx>); 3] =
            [(&null, entry), (&null, probe_block), (&node, confirmed)];
        phi.add_incoming(&incoming);

        log::debug!("landing instrumentation added to {}", name);

        Ok(LandingPoint {
            site,
            caller: phi.as_basic_value().into_pointer_value(),
        })
    }

    fn add_landing_site(&self, function: &str) -> GlobalValue<'ctx> {
        let site_name = format!("{}{}", Self::SITE_PREFIX, function);
        let site_name_global = self.add_name_global(&site_name, Self::SITE_NAME_GLOBAL);
        let function_name_global = self.add_name_global(function, Self::FUNCTION_NAME_GLOBAL);

        let initializer = self.support.landing_site_type.const_named_struct(&[
            self.context.i64_type().const_zero().into(),
            site_name_global.as_pointer_value().into(),
            function_name_global.as_pointer_value().into(),
            self.descriptor.as_pointer_value().into(),
        ]);

        let site = self
            .module
            .add_global(self.support.landing_site_type, None, &site_name);
        site.set_initializer(&initializer);
        site.set_linkage(Linkage::Internal);
        site
    }

    fn add_name_global(&self, text: &str, name: &str) -> GlobalValue<'ctx> {
        let value = self.context.const_string(text.as_bytes(), true);
        let global = self.module.add_global(value.get_type(), None, name);
        global.set_initializer(&value);
        global.set_constant(true);
        global.set_linkage(Linkage::Internal);
        global
    }

    fn caller_routine(&self) -> FunctionValue<'ctx> {
        self.module.get_function(CALLER_ROUTINE).unwrap_or_else(|| {
            self.module
                .add_function(CALLER_ROUTINE, self.ptr_type().fn_type(&[], false), None)
        })
    }

    fn ptr_type(&self) -> inkwell::types::PointerType<'ctx> {
        self.context.ptr_type(AddressSpace::default())
    }
}

fn leading_allocas(block: BasicBlock<'_>) -> Vec<InstructionValue<'_>> {
    let mut allocas = Vec::new();
    let mut cursor = block.get_first_instruction();
    while let Some(instruction) = cursor {
        if instruction.get_opcode() != InstructionOpcode::Alloca {
            break;
        }
        allocas.push(instruction);
        cursor = instruction.get_next_instruction();
    }
    allocas
}
