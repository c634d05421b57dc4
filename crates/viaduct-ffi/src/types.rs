//! Native type descriptors for the FFI boundary
//!
//! Defines `NativeType`, the closed set of types a call interface may be
//! built from. Each variant maps onto one of libffi's static type records;
//! the enum itself is the stable, process-lifetime token callers pass
//! around.
//!
//! Type mapping:
//! - NativeType::Pointer → ffi_type_pointer (opaque address, never dereferenced here)
//! - NativeType::Int32 / UInt32 → ffi_type_sint32 / ffi_type_uint32
//! - NativeType::Int64 / UInt64 → ffi_type_sint64 / ffi_type_uint64
//! - NativeType::Void → ffi_type_void (return position only)

use libffi::middle::Type;
use serde::{Deserialize, Serialize};

/// Closed set of types usable in a call interface.
///
/// `Void` is only legal in return position; `CallInterface::build` rejects
/// it as a parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NativeType {
    /// Native pointer, carried as an opaque address
    Pointer,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 32-bit integer
    UInt32,
    /// Unsigned 64-bit integer
    UInt64,
    /// No value (return position only)
    Void,
}

impl NativeType {
    /// Whether this type may appear in parameter position.
    pub fn is_parameter(&self) -> bool {
        !matches!(self, NativeType::Void)
    }

    /// Size of the native representation in bytes.
    pub fn size(&self) -> usize {
        match self {
            NativeType::Pointer => std::mem::size_of::<usize>(),
            NativeType::Int32 | NativeType::UInt32 => 4,
            NativeType::Int64 | NativeType::UInt64 => 8,
            NativeType::Void => 0,
        }
    }

    /// Display name used in error messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            NativeType::Pointer => "pointer",
            NativeType::Int32 => "i32",
            NativeType::Int64 => "i64",
            NativeType::UInt32 => "u32",
            NativeType::UInt64 => "u64",
            NativeType::Void => "void",
        }
    }

    /// The libffi type record backing this descriptor.
    pub(crate) fn libffi_type(&self) -> Type {
        match self {
            NativeType::Pointer => Type::pointer(),
            NativeType::Int32 => Type::i32(),
            NativeType::Int64 => Type::i64(),
            NativeType::UInt32 => Type::u32(),
            NativeType::UInt64 => Type::u64(),
            NativeType::Void => Type::void(),
        }
    }
}

/// sizeof(void *) on this target.
pub const POINTER_SIZE: usize = std::mem::size_of::<usize>();
