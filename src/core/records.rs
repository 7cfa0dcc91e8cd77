// This module pins down the record layouts shared by the pass, the support module and the
// runtime. Each record is mirrored as a #[repr(C)] Rust struct whose field offsets are
// checked at compile time with offset_of!, and described by a static RecordLayout table
// (LLVM type name, plus index, name, byte offset and kind of each field the pass relies
// on). The layout validator compares the linked support module's struct types against
// these tables at every run, so a support module built for a different revision of the
// records is detected before any instrumentation is emitted.

//! Record layouts shared with the support module and the runtime.

use std::ffi::{c_char, c_void};
use std::fmt;
use std::mem::offset_of;

/// Shape of one record field as seen in LLVM IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Integer of the given bit width.
    Int(u32),
    /// Opaque pointer.
    Ptr,
    /// Array of pointers of the given length.
    PtrArray(u32),
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Int(bits) => write!(f, "i{}", bits),
            FieldKind::Ptr => write!(f, "ptr"),
            FieldKind::PtrArray(len) => write!(f, "[{} x ptr]", len),
        }
    }
}

/// One field the pass depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    pub index: u32,
    pub name: &'static str,
    pub offset: u64,
    pub kind: FieldKind,
}

/// Expected layout of one named struct type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub type_name: &'static str,
    pub fields: &'static [FieldLayout],

    /// Fields past the known ones are allowed. Only records the pass never
    /// builds a constant for may be open.
    pub open: bool,
}

impl RecordLayout {
    /// Smallest field count the record must have.
    pub fn min_fields(&self) -> u32 {
        self.fields.iter().map(|field| field.index + 1).max().unwrap_or(0)
    }

    /// Whether a struct with `found` fields can carry this record.
    pub fn accepts_field_count(&self, found: u32) -> bool {
        if self.open {
            found >= self.min_fields()
        } else {
            found == self.min_fields()
        }
    }
}

/// Self descriptor: the embedded snapshot and its address table.
#[repr(C)]
pub struct Reflect {
    pub module: *const c_char,
    pub module_size: u64,
    pub globals: *const *const c_void,
    pub globals_size: u64,
}

/// Per target function landing record.
#[repr(C)]
pub struct LandingSite {
    pub total_called: u64,
    pub global_name: *const c_char,
    pub function_name: *const c_char,
    pub self_: *const Reflect,
}

/// Per decorated call record.
#[repr(C)]
pub struct StaticCallsite {
    pub total_calls: u64,
    pub landing_site: *const LandingSite,
    pub call_number: u32,
    pub scratch: [*mut c_void; 3],
}

/// Runtime call-graph node. Only `resolved_target` is read by decorated code.
#[repr(C)]
pub struct TreeNode {
    pub parent: *mut TreeNode,
    pub callsite: *const StaticCallsite,
    pub landing_site: *const LandingSite,
    pub total_calls: u64,
    pub children: *mut c_void,
    pub resolved_target: *const c_void,
}

// Keep the tables below honest on the 64-bit platform they describe.
#[cfg(target_pointer_width = "64")]
const _: () = {
    assert!(offset_of!(Reflect, module) == 0);
    assert!(offset_of!(Reflect, module_size) == 8);
    assert!(offset_of!(Reflect, globals) == 16);
    assert!(offset_of!(Reflect, globals_size) == 24);

    assert!(offset_of!(LandingSite, total_called) == 0);
    assert!(offset_of!(LandingSite, global_name) == 8);
    assert!(offset_of!(LandingSite, function_name) == 16);
    assert!(offset_of!(LandingSite, self_) == 24);

    assert!(offset_of!(StaticCallsite, total_calls) == 0);
    assert!(offset_of!(StaticCallsite, landing_site) == 8);
    assert!(offset_of!(StaticCallsite, call_number) == 16);
    assert!(offset_of!(StaticCallsite, scratch) == 24);

    assert!(offset_of!(TreeNode, resolved_target) == 40);
};

pub const REFLECT: RecordLayout = RecordLayout {
    type_name: "struct.drti::reflect",
    fields: &[
        FieldLayout { index: 0, name: "module", offset: 0, kind: FieldKind::Ptr },
        FieldLayout { index: 1, name: "module_size", offset: 8, kind: FieldKind::Int(64) },
        FieldLayout { index: 2, name: "globals", offset: 16, kind: FieldKind::Ptr },
        FieldLayout { index: 3, name: "globals_size", offset: 24, kind: FieldKind::Int(64) },
    ],
    open: false,
};

pub const LANDING_SITE: RecordLayout = RecordLayout {
    type_name: "struct.drti::landing_site",
    fields: &[
        FieldLayout { index: 0, name: "total_called", offset: 0, kind: FieldKind::Int(64) },
        FieldLayout { index: 1, name: "global_name", offset: 8, kind: FieldKind::Ptr },
        FieldLayout { index: 2, name: "function_name", offset: 16, kind: FieldKind::Ptr },
        FieldLayout { index: 3, name: "self", offset: 24, kind: FieldKind::Ptr },
    ],
    open: false,
};

pub const STATIC_CALLSITE: RecordLayout = RecordLayout {
    type_name: "struct.drti::static_callsite",
    fields: &[
        FieldLayout { index: 0, name: "total_calls", offset: 0, kind: FieldKind::Int(64) },
        FieldLayout { index: 1, name: "landing_site", offset: 8, kind: FieldKind::Ptr },
        FieldLayout { index: 2, name: "call_number", offset: 16, kind: FieldKind::Int(32) },
        FieldLayout {
            index: CALLSITE_SCRATCH,
            name: "scratch",
            offset: 24,
            kind: FieldKind::PtrArray(CALLSITE_SCRATCH_LEN),
        },
    ],
    open: false,
};

pub const TREENODE: RecordLayout = RecordLayout {
    type_name: "struct.drti::treenode",
    fields: &[FieldLayout {
        index: TREENODE_RESOLVED_TARGET,
        name: "resolved_target",
        offset: 40,
        kind: FieldKind::Ptr,
    }],
    open: true,
};

/// Field index of the resolved target in the tree node.
pub const TREENODE_RESOLVED_TARGET: u32 = 5;

/// Index of the scratch buffer in the call site record.
pub const CALLSITE_SCRATCH: u32 = 3;

/// Pointer slots in the call site scratch buffer.
pub const CALLSITE_SCRATCH_LEN: u32 = 3;

/// Every record the validator checks.
pub const ALL_RECORDS: [&RecordLayout; 4] = [&REFLECT, &LANDING_SITE, &STATIC_CALLSITE, &TREENODE];

pub const LANDED_ROUTINE: &str = "_drti_landed";
pub const CALL_FROM_ROUTINE: &str = "_drti_call_from";
pub const CALLER_ROUTINE: &str = "_drti_caller";
pub const SET_CALLER_ROUTINE: &str = "_drti_set_caller";
