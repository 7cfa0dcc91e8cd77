//! Caller identity probes.
//!
//! A target function learns that it was entered through a decorated call
//! site without any extra parameter: the decorated call path leaves a
//! recognizable mark the callee can test for. [`CallerProbe`] is the narrow
//! interface the landing instrumenter uses to emit that test, split into a
//! cheap gate evaluated in the entry block and a confirming check in the
//! probe block. [`ReturnAddressProbe`] is the x86-64 implementation: the
//! return address must be aligned and the 64-bit word at a fixed negative
//! offset from it must hold the magic constant planted by the machine-code
//! pass.

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::intrinsics::Intrinsic;
use inkwell::module::Module;
use inkwell::values::IntValue;
use inkwell::IntPredicate;

use crate::core::config::ProbeConfig;
use crate::core::error::{DecorateError, DecorateResult};

/// Result of the entry-block gate.
#[derive(Debug, Clone, Copy)]
pub struct ProbeGate<'ctx> {
    /// True when the confirming check should run.
    pub taken: IntValue<'ctx>,

    /// Probe-specific value carried from the gate to the confirming check.
    pub state: IntValue<'ctx>,
}

/// Emits the "was I called through a decorated call site" test.
pub trait CallerProbe {
    /// Emit the gate at the builder's position in the entry block.
    fn emit_gate<'ctx>(
        &self,
        context: &'ctx Context,
        module: &Module<'ctx>,
        builder: &Builder<'ctx>,
    ) -> DecorateResult<ProbeGate<'ctx>>;

    /// Emit the confirming check at the builder's position in the probe block.
    fn emit_confirm<'ctx>(
        &self,
        context: &'ctx Context,
        builder: &Builder<'ctx>,
        gate: &ProbeGate<'ctx>,
    ) -> DecorateResult<IntValue<'ctx>>;
}

/// Return-address alignment and magic-word probe.
#[derive(Debug, Clone, Copy)]
pub struct ReturnAddressProbe {
    config: ProbeConfig,
}

impl ReturnAddressProbe {
    const RETURN_ADDRESS: &'static str = "llvm.returnaddress";

    pub fn new(config: ProbeConfig) -> DecorateResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }
}

impl CallerProbe for ReturnAddressProbe {
    fn emit_gate<'ctx>(
        &self,
        context: &'ctx Context,
        module: &Module<'ctx>,
        builder: &Builder<'ctx>,
    ) -> DecorateResult<ProbeGate<'ctx>> {
        let i32_type = context.i32_type();
        let i64_type = context.i64_type();

        let return_address = Intrinsic::find(Self::RETURN_ADDRESS)
            .and_then(|intrinsic| intrinsic.get_declaration(module, &[]))
            .ok_or(DecorateError::MissingIntrinsic {
                name: Self::RETURN_ADDRESS,
            })?;

        let address = builder
            .build_call(
                return_address,
                &[i32_type.const_zero().into()],
                "drtiRetAddress",
            )?
            .try_as_basic_value()
            .basic()
            .ok_or(DecorateError::UnexpectedCallResult {
                callee: Self::RETURN_ADDRESS.to_string(),
            })?
            .into_pointer_value();

        let address = builder.build_ptr_to_int(address, i64_type, "drtiRetAddressCast")?;
        let mask = i64_type.const_int(self.config.alignment_mask(), false);
        let low_bits = builder.build_and(address, mask, "drtiAndRetalign")?;
        let aligned = builder.build_int_compare(
            IntPredicate::EQ,
            low_bits,
            i64_type.const_zero(),
            "drtiRetIsAligned",
        )?;

        Ok(ProbeGate {
            taken: aligned,
            state: address,
        })
    }

    fn emit_confirm<'ctx>(
        &self,
        context: &'ctx Context,
        builder: &Builder<'ctx>,
        gate: &ProbeGate<'ctx>,
    ) -> DecorateResult<IntValue<'ctx>> {
        let i64_type = context.i64_type();
        let ptr_type = context.ptr_type(inkwell::AddressSpace::default());

        // Sign-extended, so a negative offset wraps as intended.
        let offset = i64_type.const_int(self.config.offset as u64, true);
        let slot = builder.build_int_add(gate.state, offset, "drtiMagicAddress")?;
        let slot = builder.build_int_to_ptr(slot, ptr_type, "drtiMagicSlot")?;
        let maybe_magic = builder
            .build_load(i64_type, slot, "drtiMaybeMagic")?
            .into_int_value();

        let magic = i64_type.const_int(self.config.magic, false);
        Ok(builder.build_int_compare(IntPredicate::EQ, maybe_magic, magic, "drtiMatches")?)
    }
}
