//! Argument marshaling for native calls
//!
//! Converts managed [`Value`]s into native argument storage for one call.
//! A [`MarshalScope`] owns every temporary it creates — NUL-terminated
//! string buffers in particular — and releases them when it drops, which
//! happens on every exit path of an invocation, successful or not.
//!
//! Byte-array arguments are not copied: the caller's buffer is already
//! pinned for the duration of the call by the `&[Value]` borrow, matching
//! the pin/release bracket the native side expects.

use crate::types::NativeType;
use crate::value::Value;
use std::ffi::{c_void, CString};
use thiserror::Error;

/// Marshal error types
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MarshalError {
    /// Value kind does not match the declared parameter type
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },
    /// String argument contains an interior NUL byte
    #[error("string contains an interior NUL byte at offset {0}")]
    InteriorNul(usize),
}

/// One marshaled argument. Scalars are stored inline so the call layer can
/// take a stable pointer to them for the duration of the call.
#[derive(Debug)]
pub(crate) enum NativeArg {
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    Ptr(*const c_void),
}

/// Per-call marshaling scope.
///
/// Holds the NUL-terminated temporaries backing string arguments. Dropping
/// the scope frees them; the scope must therefore outlive the native call
/// it was built for — the invoker keeps it alive across the call and no
/// longer.
#[derive(Default)]
pub(crate) struct MarshalScope {
    strings: Vec<CString>,
}

impl MarshalScope {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Convert one managed value for a parameter of the given type.
    ///
    /// Integer widths are exact — no implicit narrowing or widening.
    /// `Pointer` parameters accept an opaque address, a string (marshaled
    /// to a NUL-terminated temporary owned by this scope), or a byte
    /// buffer (borrowed from the caller, pinned for the call).
    pub(crate) fn to_native(
        &mut self,
        value: &Value,
        target: NativeType,
    ) -> Result<NativeArg, MarshalError> {
        match (value, target) {
            (Value::Int32(v), NativeType::Int32) => Ok(NativeArg::I32(*v)),
            (Value::Int64(v), NativeType::Int64) => Ok(NativeArg::I64(*v)),
            (Value::UInt32(v), NativeType::UInt32) => Ok(NativeArg::U32(*v)),
            (Value::UInt64(v), NativeType::UInt64) => Ok(NativeArg::U64(*v)),

            (Value::Ptr(p), NativeType::Pointer) => Ok(NativeArg::Ptr(*p as *const c_void)),

            (Value::Str(s), NativeType::Pointer) => {
                let c_string = CString::new(s.as_str())
                    .map_err(|e| MarshalError::InteriorNul(e.nul_position()))?;
                // Take the pointer before moving the CString into storage;
                // the heap buffer does not move with it.
                let ptr = c_string.as_ptr() as *const c_void;
                self.strings.push(c_string);
                Ok(NativeArg::Ptr(ptr))
            }

            (Value::Bytes(b), NativeType::Pointer) => {
                Ok(NativeArg::Ptr(b.as_ptr() as *const c_void))
            }

            _ => Err(MarshalError::TypeMismatch {
                expected: target.display_name(),
                got: value.type_name(),
            }),
        }
    }

    #[cfg(test)]
    fn string_count(&self) -> usize {
        self.strings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn test_marshal_exact_integers() {
        let mut scope = MarshalScope::new();
        assert!(matches!(
            scope.to_native(&Value::Int32(-5), NativeType::Int32),
            Ok(NativeArg::I32(-5))
        ));
        assert!(matches!(
            scope.to_native(&Value::Int64(1 << 40), NativeType::Int64),
            Ok(NativeArg::I64(v)) if v == 1 << 40
        ));
        assert!(matches!(
            scope.to_native(&Value::UInt32(7), NativeType::UInt32),
            Ok(NativeArg::U32(7))
        ));
        assert!(matches!(
            scope.to_native(&Value::UInt64(u64::MAX), NativeType::UInt64),
            Ok(NativeArg::U64(u64::MAX))
        ));
    }

    #[test]
    fn test_marshal_rejects_width_mismatch() {
        let mut scope = MarshalScope::new();
        let result = scope.to_native(&Value::Int32(1), NativeType::Int64);
        assert_eq!(
            result.err(),
            Some(MarshalError::TypeMismatch {
                expected: "i64",
                got: "i32",
            })
        );
    }

    #[test]
    fn test_marshal_rejects_sign_mismatch() {
        let mut scope = MarshalScope::new();
        assert!(scope
            .to_native(&Value::Int32(1), NativeType::UInt32)
            .is_err());
        assert!(scope
            .to_native(&Value::UInt64(1), NativeType::Int64)
            .is_err());
    }

    #[test]
    fn test_marshal_pointer() {
        let mut scope = MarshalScope::new();
        let arg = scope.to_native(&Value::Ptr(0xABCD), NativeType::Pointer).unwrap();
        assert!(matches!(arg, NativeArg::Ptr(p) if p as usize == 0xABCD));
    }

    #[test]
    fn test_marshal_string_to_pointer() {
        let mut scope = MarshalScope::new();
        let arg = scope
            .to_native(&Value::Str("hello".into()), NativeType::Pointer)
            .unwrap();
        let NativeArg::Ptr(ptr) = arg else {
            panic!("expected pointer arg");
        };
        let text = unsafe { CStr::from_ptr(ptr as *const std::ffi::c_char) };
        assert_eq!(text.to_str().unwrap(), "hello");
        assert_eq!(scope.string_count(), 1);
    }

    #[test]
    fn test_marshal_string_with_interior_nul() {
        let mut scope = MarshalScope::new();
        let result = scope.to_native(&Value::Str("he\0llo".into()), NativeType::Pointer);
        assert_eq!(result.err(), Some(MarshalError::InteriorNul(2)));
        assert_eq!(scope.string_count(), 0);
    }

    #[test]
    fn test_marshal_bytes_borrows_caller_buffer() {
        let mut scope = MarshalScope::new();
        let value = Value::Bytes(vec![9, 8, 7]);
        let arg = scope.to_native(&value, NativeType::Pointer).unwrap();
        let NativeArg::Ptr(ptr) = arg else {
            panic!("expected pointer arg");
        };
        assert_eq!(ptr as usize, value.as_bytes().unwrap().as_ptr() as usize);
    }

    #[test]
    fn test_marshal_scope_tracks_strings() {
        let mut scope = MarshalScope::new();
        scope
            .to_native(&Value::Str("a".into()), NativeType::Pointer)
            .unwrap();
        scope
            .to_native(&Value::Str("b".into()), NativeType::Pointer)
            .unwrap();
        assert_eq!(scope.string_count(), 2);
    }

    #[test]
    fn test_marshal_rejects_string_for_integer() {
        let mut scope = MarshalScope::new();
        let result = scope.to_native(&Value::Str("42".into()), NativeType::Int32);
        assert!(matches!(result, Err(MarshalError::TypeMismatch { .. })));
    }
}
