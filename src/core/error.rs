// This module defines the error types for the decoration pass using the thiserror crate.
// DecorateError covers every condition that aborts the pass outright: missing target
// configuration, an unreadable targets file, a support module that fails to parse or
// link, a target function whose entry block cannot be split, invalid probe constants,
// IR builder failures and verifier rejections. Each variant carries the context needed
// to act on the diagnostic (variable names, paths, function names, LLVM messages).
// LayoutError is deliberately separate: a layout mismatch is a soft skip reported
// through PassOutcome rather than a failure, so it never travels through `?`.

//! Error types for the decoration pass.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors. Any of these means the module must not be used.
#[derive(Error, Debug)]
pub enum DecorateError {
    #[error(
        "No target functions found. Have you set {names_var} and/or {file_var}?"
    )]
    NoTargetsConfigured {
        names_var: &'static str,
        file_var: &'static str,
    },

    #[error("Cannot read targets file {}: {source}", path.display())]
    TargetsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse support module: {reason}")]
    SupportParse { reason: String },

    #[error("Failed to link support module: {reason}")]
    LinkConflict { reason: String },

    #[error("Malformed entry block in function {function}")]
    MalformedEntryBlock { function: String },

    #[error("Intrinsic not available: {name}")]
    MissingIntrinsic { name: &'static str },

    #[error("Invalid probe configuration: {reason}")]
    InvalidProbe { reason: String },

    #[error("IR builder failed: {0}")]
    Builder(#[from] inkwell::builder::BuilderError),

    #[error("Call to {callee} did not produce a value")]
    UnexpectedCallResult { callee: String },

    #[error("Decorated module failed verification: {reason}")]
    Verification { reason: String },
}

/// Result type alias for pass operations.
pub type DecorateResult<T> = Result<T, DecorateError>;

/// Why the linked support module cannot be used by this pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Type {name} not found in module")]
    MissingType { name: &'static str },

    #[error("Type {name} has no body")]
    OpaqueType { name: &'static str },

    #[error("Support function {name} not found in module")]
    MissingRoutine { name: &'static str },

    #[error("Support function {name} takes {found} parameters, expected {expected}")]
    RoutineArity {
        name: &'static str,
        expected: u32,
        found: u32,
    },

    #[error("{record} has {found} fields, expected {expected}")]
    FieldCount {
        record: &'static str,
        expected: u32,
        found: u32,
    },

    #[error("{record}.{field} has type {found}, expected {expected}")]
    FieldType {
        record: &'static str,
        field: &'static str,
        expected: String,
        found: String,
    },

    #[error("{record}.{field} is at offset {found}, expected {expected}")]
    FieldOffset {
        record: &'static str,
        field: &'static str,
        expected: u64,
        found: u64,
    },
}
