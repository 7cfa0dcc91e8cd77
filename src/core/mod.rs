// This module serves as the hub for the LLVM-independent pieces of the decoration pass:
// configuration (target name resolution, probe constants, pass options), the error types,
// the record layout tables shared with the support module and the runtime, and the
// arena-backed session that carries scratch data and statistics through one run.

//! Core infrastructure shared by every stage of the pass.
//!
//! # Key Components
//!
//! ## Configuration (`config`)
//! - Target name resolution from `DRTI_TARGET_NAMES` / `DRTI_TARGETS_FILE`
//! - Landing probe constants and pass options
//!
//! ## Records (`records`)
//! - `#[repr(C)]` mirrors of the runtime records with compile-time offset checks
//! - Layout tables consumed by the layout validator
//!
//! ## Session (`session`)
//! - Arena allocation using `bumpalo`
//! - Decoration statistics

pub mod config;
pub mod error;
pub mod records;
pub mod session;

pub use config::{
    DecorateOptions,
    ProbeConfig,
    TargetSet,
    TargetSpecification,
    DECORATED_TRIPLE,
    DEFAULT_DATA_LAYOUT,
    SUPPORTED_TRIPLE,
};

pub use error::{
    DecorateError,
    DecorateResult,
    LayoutError,
};

pub use records::{
    FieldKind,
    FieldLayout,
    RecordLayout,
};

pub use session::{
    DecorateSession,
    SessionStats,
};
