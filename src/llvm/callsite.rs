// This module decorates the outgoing calls of target functions. CallCollector walks every
// call-like instruction (call, invoke, callbr) of a function in block and instruction
// order and numbers them; inline assembly is not a call and takes no number. A call is
// selected when its called function type is one of the target signatures, unless it calls
// a named function directly and that function is not a target. The numbering has to be
// computed on the undecorated body, the same body the embedded snapshot holds, because the
// ordinal is the only key the runtime has for finding the same call again after
// recompiling from the snapshot. The selected calls are handed over as an arena slice.
// CallSiteInstrumenter then gives each selected call a static_callsite record and routes it
// through _drti_call_from, which returns a tree node whose resolved target replaces the
// original callee. A _drti_set_caller marker records the node for the machine-code pass,
// and plain calls are forced notail so the callee's return-address probe stays reliable.

//! Call collection and call-site decoration.

use std::ffi::CStr;

use bumpalo::collections::Vec as BumpVec;
use hashbrown::HashSet;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::types::PointerType;
use inkwell::values::{
    AsValueRef, FunctionValue, GlobalValue, InstructionOpcode, InstructionValue,
};
use inkwell::AddressSpace;
use llvm_sys::core::{
    LLVMGetCalledFunctionType, LLVMGetCalledValue, LLVMGetValueName2, LLVMIsAFunction,
    LLVMIsAInlineAsm, LLVMSetTailCallKind,
};
use llvm_sys::prelude::{LLVMTypeRef, LLVMValueRef};
use llvm_sys::LLVMTailCallKind;

use crate::core::config::TargetSet;
use crate::core::error::{DecorateError, DecorateResult};
use crate::core::records::{
    CALLSITE_SCRATCH_LEN, CALL_FROM_ROUTINE, SET_CALLER_ROUTINE, TREENODE_RESOLVED_TARGET,
};
use crate::core::session::DecorateSession;
use crate::llvm::function_name;
use crate::llvm::landing::LandingPoint;
use crate::llvm::layout::SupportItems;

/// A call selected for decoration.
#[derive(Debug, Clone, Copy)]
pub struct CollectedCall<'ctx> {
    /// Position among all calls of the function.
    pub ordinal: u32,
    pub instruction: InstructionValue<'ctx>,
}

/// Numbers the calls of a function and selects the decoration-worthy ones.
pub struct CallCollector<'a> {
    targets: &'a TargetSet,
    signatures: &'a HashSet<LLVMTypeRef>,
}

impl<'a> CallCollector<'a> {
    pub fn new(targets: &'a TargetSet, signatures: &'a HashSet<LLVMTypeRef>) -> Self {
        Self {
            targets,
            signatures,
        }
    }

    /// Collect the selected calls of `function` into the session arena.
    pub fn collect<'arena, 'ctx>(
        &self,
        session: &DecorateSession<'arena>,
        function: FunctionValue<'ctx>,
    ) -> &'arena [CollectedCall<'ctx>] {
        let mut selected = BumpVec::new_in(session.arena());
        let mut ordinal: u32 = 0;

        for block in function.get_basic_blocks() {
            let mut cursor = block.get_first_instruction();
            while let Some(instruction) = cursor {
                cursor = instruction.get_next_instruction();

                if !is_call_like(instruction) {
                    continue;
                }

                let callee = called_value(instruction);
                if is_inline_asm(callee) {
                    continue;
                }

                let this_ordinal = ordinal;
                ordinal += 1;

                if self.is_selected(instruction, callee) {
                    selected.push(CollectedCall {
                        ordinal: this_ordinal,
                        instruction,
                    });
                }
            }
        }

        session.record_calls_scanned(ordinal as usize);
        log::debug!(
            "{}: {} calls, {} selected",
            function_name(function),
            ordinal,
            selected.len()
        );

        selected.into_bump_slice()
    }

    fn is_selected(&self, instruction: InstructionValue<'_>, callee: LLVMValueRef) -> bool {
        // SAFETY: `instruction` is a live call-like instruction.
        let called_type = unsafe { LLVMGetCalledFunctionType(instruction.as_value_ref()) };
        if !self.signatures.contains(&called_type) {
            return false;
        }

        match direct_callee_name(callee) {
            Some(name) => self.targets.contains(&name),
            None => true,
        }
    }
}

/// Rewrites selected calls to go through the runtime resolver.
pub struct CallSiteInstrumenter<'a, 'ctx> {
    context: &'ctx Context,
    module: &'a Module<'ctx>,
    support: &'a SupportItems<'ctx>,
    builder: Builder<'ctx>,
}

impl<'a, 'ctx> CallSiteInstrumenter<'a, 'ctx> {
    pub const SITE_PREFIX: &'static str = "_drti_callsite_";

    pub fn new(
        context: &'ctx Context,
        module: &'a Module<'ctx>,
        support: &'a SupportItems<'ctx>,
    ) -> Self {
        Self {
            context,
            module,
            support,
            builder: context.create_builder(),
        }
    }

    /// Decorate `calls` of `function`, returning the decorated ordinals.
    pub fn decorate(
        &self,
        session: &DecorateSession<'_>,
        function: FunctionValue<'ctx>,
        landing: &LandingPoint<'ctx>,
        calls: &[CollectedCall<'ctx>],
    ) -> DecorateResult<Vec<u32>> {
        let name = function_name(function);
        let site_name = format!("{}{}", Self::SITE_PREFIX, name);
        let mut ordinals = Vec::with_capacity(calls.len());

        for call in calls {
            let site = self.add_callsite(&site_name, landing.site, call.ordinal);
            self.decorate_call(call.instruction, site, landing)?;
            session.record_call_decorated();
            ordinals.push(call.ordinal);
        }

        Ok(ordinals)
    }

    fn decorate_call(
        &self,
        instruction: InstructionValue<'ctx>,
        site: GlobalValue<'ctx>,
        landing: &LandingPoint<'ctx>,
    ) -> DecorateResult<()> {
        let callee_index = instruction.get_num_operands() - 1;
        let old_target = instruction
            .get_operand(callee_index)
            .and_then(|operand| operand.value())
            .ok_or_else(|| DecorateError::UnexpectedCallResult {
                callee: "<call operand>".to_string(),
            })?;

        self.builder.position_before(&instruction);
        let node = self
            .builder
            .build_call(
                self.support.call_from,
                &[
                    site.as_pointer_value().into(),
                    landing.caller.into(),
                    old_target.into(),
                ],
                "drtiNode",
            )?
            .try_as_basic_value()
            .basic()
            .ok_or_else(|| DecorateError::UnexpectedCallResult {
                callee: CALL_FROM_ROUTINE.to_string(),
            })?
            .into_pointer_value();

        let target_slot = self.builder.build_struct_gep(
            self.support.treenode_type,
            node,
            TREENODE_RESOLVED_TARGET,
            "drtiTargetSlot",
        )?;
        let new_target = self
            .builder
            .build_load(self.ptr_type(), target_slot, "drtiTarget")?;
        self.builder
            .build_call(self.set_caller_routine(), &[node.into()], "")?;

        instruction.set_operand(callee_index, new_target);

        if instruction.get_opcode() == InstructionOpcode::Call {
            // SAFETY: `instruction` is a plain call instruction.
            unsafe {
                LLVMSetTailCallKind(
                    instruction.as_value_ref(),
                    LLVMTailCallKind::LLVMTailCallKindNoTail,
                );
            }
        }

        Ok(())
    }

    fn add_callsite(
        &self,
        name: &str,
        landing_site: GlobalValue<'ctx>,
        ordinal: u32,
    ) -> GlobalValue<'ctx> {
        let initializer = self.support.callsite_type.const_named_struct(&[
            self.context.i64_type().const_zero().into(),
            landing_site.as_pointer_value().into(),
            self.context.i32_type().const_int(ordinal as u64, false).into(),
            self.ptr_type().array_type(CALLSITE_SCRATCH_LEN).const_zero().into(),
        ]);

        let site = self
            .module
            .add_global(self.support.callsite_type, None, name);
        site.set_initializer(&initializer);
        site.set_linkage(Linkage::Internal);
        site
    }

    fn set_caller_routine(&self) -> FunctionValue<'ctx> {
        self.module.get_function(SET_CALLER_ROUTINE).unwrap_or_else(|| {
            let fn_type = self
                .context
                .void_type()
                .fn_type(&[self.ptr_type().into()], false);
            self.module.add_function(SET_CALLER_ROUTINE, fn_type, None)
        })
    }

    fn ptr_type(&self) -> PointerType<'ctx> {
        self.context.ptr_type(AddressSpace::default())
    }
}

fn is_call_like(instruction: InstructionValue<'_>) -> bool {
    matches!(
        instruction.get_opcode(),
        InstructionOpcode::Call | InstructionOpcode::Invoke | InstructionOpcode::CallBr
    )
}

fn called_value(instruction: InstructionValue<'_>) -> LLVMValueRef {
    // SAFETY: only called on call-like instructions.
    unsafe { LLVMGetCalledValue(instruction.as_value_ref()) }
}

fn is_inline_asm(callee: LLVMValueRef) -> bool {
    // SAFETY: `callee` is the called operand of a live call.
    unsafe { !LLVMIsAInlineAsm(callee).is_null() }
}

/// Name of the callee when the call targets a function directly.
fn direct_callee_name(callee: LLVMValueRef) -> Option<String> {
    // SAFETY: `callee` is the called operand of a live call; the returned
    // name is owned by LLVM and copied before returning.
    unsafe {
        if LLVMIsAFunction(callee).is_null() {
            return None;
        }
        let mut length = 0;
        let name = LLVMGetValueName2(callee, &mut length);
        if name.is_null() {
            return None;
        }
        Some(CStr::from_ptr(name).to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkwell::values::AnyValue;
    use crate::core::config::ProbeConfig;
    use crate::llvm::discovery::TargetDiscovery;
    use crate::llvm::landing::LandingInstrumenter;
    use crate::llvm::layout::LayoutValidator;
    use crate::llvm::parse_module;
    use crate::llvm::probe::ReturnAddressProbe;
    use crate::llvm::snapshot::SelfSnapshotBuilder;
    use crate::llvm::support::SupportLinker;
    use bumpalo::Bump;

    const IR: &str = r#"
target datalayout = "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128"
target triple = "x86_64-unknown-linux-gnu"

declare i32 @puts(ptr)
declare i32 @helper(i32)
declare i32 @other(i32)

define i32 @hot_fn(i32 %x, ptr %fp) {
entry:
  %a = call i32 @puts(ptr null)
  call void asm sideeffect "nop", ""()
  %b = call i32 @helper(i32 %x)
  %c = call i32 @other(i32 %b)
  %d = tail call i32 %fp(i32 %c)
  ret i32 %d
}
"#;

    fn ordinals(calls: &[CollectedCall<'_>]) -> Vec<u32> {
        calls.iter().map(|call| call.ordinal).collect()
    }

    #[test]
    fn test_collect_numbers_every_call() {
        let context = Context::create();
        let module = parse_module(&context, IR, "calls").unwrap();
        let targets = TargetSet::from_names(["hot_fn", "helper"]).unwrap();
        let discovery = TargetDiscovery::scan(&module, &targets);
        let arena = Bump::new();
        let session = DecorateSession::new(&arena);

        let hot_fn = module.get_function("hot_fn").unwrap();
        let calls = CallCollector::new(&targets, discovery.signatures()).collect(&session, hot_fn);

        // puts=0, helper=1, other=2 (excluded: direct non-target), %fp=3.
        assert_eq!(ordinals(calls), vec![1, 3]);
        assert_eq!(session.stats().calls_scanned, 4);
    }

    #[test]
    fn test_collect_is_deterministic() {
        let runs: Vec<Vec<u32>> = (0..2)
            .map(|_| {
                let context = Context::create();
                let module = parse_module(&context, IR, "calls").unwrap();
                let targets = TargetSet::from_names(["hot_fn", "helper"]).unwrap();
                let discovery = TargetDiscovery::scan(&module, &targets);
                let arena = Bump::new();
                let session = DecorateSession::new(&arena);
                let hot_fn = module.get_function("hot_fn").unwrap();
                ordinals(
                    CallCollector::new(&targets, discovery.signatures()).collect(&session, hot_fn),
                )
            })
            .collect();

        assert_eq!(runs[0], runs[1]);
    }

    #[test]
    fn test_decorate_rewrites_calls() {
        let context = Context::create();
        let module = parse_module(&context, IR, "calls").unwrap();
        let targets = TargetSet::from_names(["hot_fn", "helper"]).unwrap();
        let discovery = TargetDiscovery::scan(&module, &targets);
        let arena = Bump::new();
        let session = DecorateSession::new(&arena);

        SupportLinker::new().link_into(&context, &module).unwrap();
        let support = LayoutValidator::new(&module).validate().unwrap();
        let snapshot = SelfSnapshotBuilder::new(&context, &module, &support).build(&[]);

        let hot_fn = module.get_function("hot_fn").unwrap();
        let calls = CallCollector::new(&targets, discovery.signatures()).collect(&session, hot_fn);

        let probe = ReturnAddressProbe::new(ProbeConfig::default()).unwrap();
        let landing = LandingInstrumenter::new(&context, &module, &support, snapshot.descriptor, &probe)
            .instrument(hot_fn)
            .unwrap();
        let decorated = CallSiteInstrumenter::new(&context, &module, &support)
            .decorate(&session, hot_fn, &landing, calls)
            .unwrap();

        assert_eq!(decorated, vec![1, 3]);
        assert_eq!(session.stats().calls_decorated, 2);
        assert!(module.verify().is_ok());

        let printed = hot_fn.print_to_string().to_string();
        assert_eq!(printed.matches("call ptr @_drti_call_from").count(), 2);
        assert_eq!(printed.matches("call void @_drti_set_caller").count(), 2);
        assert!(printed.contains("call i32 @puts"));
        assert!(printed.contains("call i32 @other"));
        assert!(!printed.contains("call i32 @helper"));
        assert!(!printed.contains("tail call i32 %fp"));
        assert_eq!(printed.matches("notail call i32 %drtiTarget").count(), 2);
    }

    #[test]
    fn test_direct_callee_name() {
        let context = Context::create();
        let module = parse_module(&context, IR, "calls").unwrap();
        let hot_fn = module.get_function("hot_fn").unwrap();
        let mut names = Vec::new();
        let mut cursor = hot_fn.get_first_basic_block().unwrap().get_first_instruction();
        while let Some(inst) = cursor {
            cursor = inst.get_next_instruction();
            if is_call_like(inst) && !is_inline_asm(called_value(inst)) {
                names.push(direct_callee_name(called_value(inst)));
            }
        }

        assert_eq!(
            names,
            vec![
                Some("puts".to_string()),
                Some("helper".to_string()),
                Some("other".to_string()),
                None
            ]
        );
    }
}
