//! Generic invocation of resolved native addresses
//!
//! An [`ExternFunction`] pairs a resolved [`SymbolAddress`] with a shared
//! [`CallInterface`] and performs the call through libffi, converting
//! arguments and results between managed [`Value`]s and native
//! representations.
//!
//! This layer is mechanical: numeric results come back verbatim, pointer
//! results come back as opaque addresses, and native status codes are
//! never interpreted here — that is the concern of whatever wraps the
//! specific entry point.

use crate::interface::CallInterface;
use crate::loader::SymbolAddress;
use crate::marshal::{MarshalError, MarshalScope, NativeArg};
use crate::types::NativeType;
use crate::value::Value;
use libffi::middle::{Arg, CodePtr};
use std::ffi::c_void;
use std::sync::Arc;
use thiserror::Error;

/// Invocation errors. A failed marshal aborts the invocation before the
/// native call is attempted.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallError {
    #[error("expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    /// Typed entry point used against an interface with a different
    /// return shape
    #[error("return type mismatch: expected {expected}, interface returns {actual}")]
    ReturnMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

/// A callable native entry point: resolved address plus call shape.
///
/// The interface is shared — many functions of the same shape reuse one
/// [`CallInterface`], and the same `Arc` can back closures of that shape.
pub struct ExternFunction {
    addr: SymbolAddress,
    interface: Arc<CallInterface>,
}

impl ExternFunction {
    /// Bind an address to a call shape.
    ///
    /// # Safety
    ///
    /// The caller asserts that `addr` names a function whose actual
    /// signature matches `interface` exactly (argument order, widths,
    /// return type, default calling convention) and that the owning
    /// library outlives this value.
    pub unsafe fn new(addr: SymbolAddress, interface: Arc<CallInterface>) -> Self {
        Self { addr, interface }
    }

    pub fn address(&self) -> SymbolAddress {
        self.addr
    }

    pub fn interface(&self) -> &CallInterface {
        &self.interface
    }

    /// Call the function with managed arguments.
    ///
    /// Arguments are checked against the interface's arity and parameter
    /// types, marshaled into native storage, and released on every exit
    /// path once the call returns. String temporaries never outlive the
    /// call.
    ///
    /// # Safety
    ///
    /// Calls foreign code. The address must still be valid (owning library
    /// not closed) and must really have the bound shape. The callee must
    /// not unwind.
    pub unsafe fn call(&self, args: &[Value]) -> Result<Value, CallError> {
        let params = self.interface.params();
        if args.len() != params.len() {
            return Err(CallError::ArityMismatch {
                expected: params.len(),
                got: args.len(),
            });
        }

        let mut scope = MarshalScope::new();
        let mut storage: Vec<NativeArg> = Vec::with_capacity(args.len());
        for (value, ty) in args.iter().zip(params.iter()) {
            storage.push(scope.to_native(value, *ty)?);
        }

        // Arg borrows point into `storage`, which outlives the call.
        let ffi_args: Vec<Arg> = storage
            .iter()
            .map(|arg| match arg {
                NativeArg::I32(v) => Arg::new(v),
                NativeArg::I64(v) => Arg::new(v),
                NativeArg::U32(v) => Arg::new(v),
                NativeArg::U64(v) => Arg::new(v),
                NativeArg::Ptr(v) => Arg::new(v),
            })
            .collect();

        let code = CodePtr::from_ptr(self.addr.as_ptr());
        let cif = self.interface.cif();

        let result = match self.interface.return_type() {
            NativeType::Void => {
                cif.call::<()>(code, &ffi_args);
                Value::Void
            }
            NativeType::Int32 => Value::Int32(cif.call::<i32>(code, &ffi_args)),
            NativeType::UInt32 => Value::UInt32(cif.call::<u32>(code, &ffi_args)),
            NativeType::Int64 => Value::Int64(cif.call::<i64>(code, &ffi_args)),
            NativeType::UInt64 => Value::UInt64(cif.call::<u64>(code, &ffi_args)),
            NativeType::Pointer => {
                Value::Ptr(cif.call::<*const c_void>(code, &ffi_args) as usize)
            }
        };

        Ok(result)
    }

    /// Call a void-returning entry point.
    ///
    /// # Safety
    ///
    /// As [`ExternFunction::call`].
    pub unsafe fn call_void(&self, args: &[Value]) -> Result<(), CallError> {
        match self.call(args)? {
            Value::Void => Ok(()),
            other => Err(self.return_mismatch("void", &other)),
        }
    }

    /// Call an i32-returning entry point.
    ///
    /// # Safety
    ///
    /// As [`ExternFunction::call`].
    pub unsafe fn call_i32(&self, args: &[Value]) -> Result<i32, CallError> {
        match self.call(args)? {
            Value::Int32(v) => Ok(v),
            other => Err(self.return_mismatch("i32", &other)),
        }
    }

    /// Call an i64-returning entry point.
    ///
    /// # Safety
    ///
    /// As [`ExternFunction::call`].
    pub unsafe fn call_i64(&self, args: &[Value]) -> Result<i64, CallError> {
        match self.call(args)? {
            Value::Int64(v) => Ok(v),
            other => Err(self.return_mismatch("i64", &other)),
        }
    }

    /// Call a pointer-returning entry point. The result is an opaque
    /// address; [`crate::memory`] is the sanctioned way to look through it.
    ///
    /// # Safety
    ///
    /// As [`ExternFunction::call`].
    pub unsafe fn call_ptr(&self, args: &[Value]) -> Result<usize, CallError> {
        match self.call(args)? {
            Value::Ptr(p) => Ok(p),
            other => Err(self.return_mismatch("pointer", &other)),
        }
    }

    fn return_mismatch(&self, expected: &'static str, got: &Value) -> CallError {
        CallError::ReturnMismatch {
            expected,
            actual: got.type_name(),
        }
    }
}
