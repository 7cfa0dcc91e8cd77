//! drti-decorate - ahead-of-time instrumentation for dynamic runtime inlining.
//!
//! The decoration pass prepares an LLVM module so that a runtime
//! re-optimizer can later re-specialize calls made by selected "target"
//! functions. It links in a small support module, embeds a bitcode snapshot
//! of the module together with an address table of its external symbols,
//! adds landing detection at the entry of every target definition and
//! routes the target's qualifying outgoing calls through the runtime
//! resolver.
//!
//! # Primary Usage
//!
//! ```ignore
//! use drti_decorate::core::{DecorateOptions, TargetSpecification};
//! use drti_decorate::llvm::{parse_module, DecoratePass};
//! use inkwell::context::Context;
//!
//! let targets = TargetSpecification::from_env().resolve()?;
//! let context = Context::create();
//! let module = parse_module(&context, &ir_text, "input")?;
//!
//! let outcome = DecoratePass::new(&context, targets, DecorateOptions::default())
//!     .run_on_module(&module)?;
//! if outcome.modified() {
//!     module.write_bitcode_to_path(&output);
//! }
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Configuration, errors, record layouts and session statistics
//! - [`llvm`] - The pass stages and their orchestration

pub mod core;
pub mod llvm;

pub use core::{
    DecorateError, DecorateOptions, DecorateResult, DecorateSession, LayoutError, ProbeConfig,
    SessionStats, TargetSet, TargetSpecification,
};
pub use llvm::{DecoratePass, DecorationReport, LandingSummary, PassOutcome};
