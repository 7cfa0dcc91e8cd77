// This module validates the support module after it has been linked. It looks up the four
// record types by name, checks every field the pass relies on against the layout tables in
// core::records (field type and byte offset under the module's data layout), and resolves
// the two hand-off routines with the expected parameter counts. Success yields SupportItems,
// the typed handles used by the snapshot builder and both instrumenters. Failure yields a
// LayoutError describing the first mismatch; the pass treats that as version skew between
// the pass and the support module and skips instrumentation without failing.

//! Support module layout validation.

use inkwell::module::Module;
use inkwell::targets::TargetData;
use inkwell::types::{AnyType, BasicTypeEnum, StructType};
use inkwell::values::FunctionValue;

use crate::core::config::DEFAULT_DATA_LAYOUT;
use crate::core::error::LayoutError;
use crate::core::records::{
    FieldKind, RecordLayout, ALL_RECORDS, CALL_FROM_ROUTINE, LANDED_ROUTINE, LANDING_SITE,
    REFLECT, STATIC_CALLSITE, TREENODE,
};

/// Handles into the linked support module.
#[derive(Debug, Clone, Copy)]
pub struct SupportItems<'ctx> {
    pub reflect_type: StructType<'ctx>,
    pub landing_site_type: StructType<'ctx>,
    pub callsite_type: StructType<'ctx>,
    pub treenode_type: StructType<'ctx>,
    pub landed: FunctionValue<'ctx>,
    pub call_from: FunctionValue<'ctx>,
}

/// Checks linked record types against the hard-coded layouts.
pub struct LayoutValidator<'a, 'ctx> {
    module: &'a Module<'ctx>,
    target_data: TargetData,
}

impl<'a, 'ctx> LayoutValidator<'a, 'ctx> {
    pub fn new(module: &'a Module<'ctx>) -> Self {
        let data_layout = module.get_data_layout();
        let declared = data_layout.as_str().to_string_lossy();
        let layout = if declared.is_empty() {
            DEFAULT_DATA_LAYOUT
        } else {
            declared.as_ref()
        };

        Self {
            module,
            target_data: TargetData::create(layout),
        }
    }

    /// Validate everything and return the support handles.
    pub fn validate(&self) -> Result<SupportItems<'ctx>, LayoutError> {
        for record in ALL_RECORDS {
            self.check_record(record)?;
        }

        let items = SupportItems {
            reflect_type: self.lookup_type(&REFLECT)?,
            landing_site_type: self.lookup_type(&LANDING_SITE)?,
            callsite_type: self.lookup_type(&STATIC_CALLSITE)?,
            treenode_type: self.lookup_type(&TREENODE)?,
            landed: self.lookup_routine(LANDED_ROUTINE, 2)?,
            call_from: self.lookup_routine(CALL_FROM_ROUTINE, 3)?,
        };

        log::debug!("support module layout validated");
        Ok(items)
    }

    fn lookup_type(&self, record: &RecordLayout) -> Result<StructType<'ctx>, LayoutError> {
        self.module
            .get_struct_type(record.type_name)
            .ok_or(LayoutError::MissingType {
                name: record.type_name,
            })
    }

    fn lookup_routine(
        &self,
        name: &'static str,
        params: u32,
    ) -> Result<FunctionValue<'ctx>, LayoutError> {
        let function = self
            .module
            .get_function(name)
            .ok_or(LayoutError::MissingRoutine { name })?;

        let found = function.count_params();
        if found != params {
            return Err(LayoutError::RoutineArity {
                name,
                expected: params,
                found,
            });
        }

        Ok(function)
    }

    fn check_record(&self, record: &RecordLayout) -> Result<(), LayoutError> {
        let struct_type = self.lookup_type(record)?;

        if struct_type.is_opaque() {
            return Err(LayoutError::OpaqueType {
                name: record.type_name,
            });
        }

        let found = struct_type.count_fields();
        if !record.accepts_field_count(found) {
            return Err(LayoutError::FieldCount {
                record: record.type_name,
                expected: record.min_fields(),
                found,
            });
        }

        for field in record.fields {
            let field_type = struct_type.get_field_type_at_index(field.index);
            let type_ok = field_type.is_some_and(|ty| kind_matches(ty, field.kind));
            if !type_ok {
                return Err(LayoutError::FieldType {
                    record: record.type_name,
                    field: field.name,
                    expected: field.kind.to_string(),
                    found: field_type
                        .map(|ty| ty.print_to_string().to_string())
                        .unwrap_or_else(|| "<none>".to_string()),
                });
            }

            let offset = self
                .target_data
                .offset_of_element(&struct_type, field.index)
                .unwrap_or(u64::MAX);
            if offset != field.offset {
                return Err(LayoutError::FieldOffset {
                    record: record.type_name,
                    field: field.name,
                    expected: field.offset,
                    found: offset,
                });
            }
        }

        Ok(())
    }
}

fn kind_matches(ty: BasicTypeEnum<'_>, kind: FieldKind) -> bool {
    match (kind, ty) {
        (FieldKind::Int(bits), BasicTypeEnum::IntType(int_type)) => int_type.get_bit_width() == bits,
        (FieldKind::Ptr, BasicTypeEnum::PointerType(_)) => true,
        (FieldKind::PtrArray(len), BasicTypeEnum::ArrayType(array_type)) => {
            array_type.len() == len && array_type.get_element_type().is_pointer_type()
        }
        _ => false,
    }
}
