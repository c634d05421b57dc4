//! Native-callable trampolines dispatching into managed handlers
//!
//! A [`Closure`] owns an ffi closure: a writable descriptor block plus a
//! separately addressed executable code pointer that native code treats as
//! an ordinary function pointer of the bound shape. Construction binds the
//! call interface, the managed handler, and the handler's durable anchor
//! atomically — the code pointer is only reachable once binding has
//! completed.
//!
//! Every invocation of the generated pointer attaches the calling thread
//! to the runtime for the duration of the crossing, marshals the native
//! argument slots into [`Value`]s, runs the handler, and writes its result
//! into the native return slot. Handler and attachment failures are routed
//! to an overridable error hook and produce the shape's zero default; an
//! upcall never unwinds into native frames.
//!
//! Dropping a `Closure` frees the code pair and releases the anchor.
//! Native code still holding the old pointer afterwards invokes undefined
//! behavior — outliving all possible invocations is the owner's
//! responsibility, not something the bridge can check.

use crate::handles::ManagedRef;
use crate::interface::CallInterface;
use crate::loader::SymbolAddress;
use crate::runtime::{Runtime, UpcallError, UpcallHandler};
use crate::types::NativeType;
use crate::value::Value;
use libffi::low::{closure_alloc, closure_free, ffi_cif, ffi_closure, prep_closure, CodePtr};
use libffi::raw::ffi_arg;
use std::ffi::c_void;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Closure construction errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClosureError {
    /// The platform refused to allocate the writable/executable code pair
    #[error("failed to allocate closure code pair")]
    AllocFailed,
    /// The underlying closure preparation rejected the binding
    #[error("closure preparation failed: {0}")]
    PrepFailed(String),
}

/// Hook receiving upcall failures that cannot propagate across the native
/// boundary. Must not panic.
pub type ErrorHook = Box<dyn Fn(&UpcallError) + Send + Sync>;

fn default_error_hook(err: &UpcallError) {
    eprintln!("viaduct-ffi: upcall error: {err}");
}

struct ClosureData {
    interface: Arc<CallInterface>,
    runtime: Arc<Runtime>,
    handler: Arc<dyn UpcallHandler>,
    anchor: ManagedRef,
    error_hook: Mutex<ErrorHook>,
}

/// A bound, invocable trampoline.
pub struct Closure {
    closure: *mut ffi_closure,
    code: CodePtr,
    data: *mut ClosureData,
}

// The descriptor block is only mutated behind the error-hook mutex; the
// code pair and the rest of the bound state are read-only after bind.
unsafe impl Send for Closure {}
unsafe impl Sync for Closure {}

impl Closure {
    /// Allocate a closure and bind it to a call shape and a managed
    /// handler.
    ///
    /// The handler is anchored in the runtime's handle table for as long
    /// as the closure lives, so native code can carry [`Closure::handler_ref`]
    /// as opaque user data and the managed side can find its way back.
    ///
    /// On any binding failure the partially built closure is torn down
    /// before the error is returned; a `Closure` you hold is always fully
    /// bound.
    pub fn bind<H>(
        interface: Arc<CallInterface>,
        runtime: Arc<Runtime>,
        handler: Arc<H>,
    ) -> Result<Self, ClosureError>
    where
        H: UpcallHandler + 'static,
    {
        let anchor = runtime.retain(handler.clone());

        #[allow(unused_unsafe)]
        let (closure, code) = unsafe { closure_alloc() };
        if closure.is_null() {
            let _ = runtime.release(anchor);
            return Err(ClosureError::AllocFailed);
        }

        let data = Box::into_raw(Box::new(ClosureData {
            interface: Arc::clone(&interface),
            runtime: Arc::clone(&runtime),
            handler,
            anchor,
            error_hook: Mutex::new(Box::new(default_error_hook)),
        }));

        let prep = unsafe {
            prep_closure(
                closure,
                interface.raw_cif(),
                dispatch_upcall,
                data as *const ClosureData,
                code,
            )
        };

        if let Err(e) = prep {
            unsafe {
                closure_free(closure);
                drop(Box::from_raw(data));
            }
            let _ = runtime.release(anchor);
            return Err(ClosureError::PrepFailed(format!("{:?}", e)));
        }

        Ok(Self {
            closure,
            code,
            data,
        })
    }

    /// Address of the generated entry point. To native code this is an
    /// ordinary function pointer of the bound shape; it dies with `self`.
    pub fn address(&self) -> SymbolAddress {
        SymbolAddress::from_raw(self.code.as_ptr() as usize)
    }

    /// The call shape this closure accepts.
    pub fn interface(&self) -> &CallInterface {
        unsafe { &(*self.data).interface }
    }

    /// Durable reference anchoring the bound handler — the opaque integer
    /// a native structure can carry back to the managed side.
    pub fn handler_ref(&self) -> ManagedRef {
        unsafe { (*self.data).anchor }
    }

    /// Replace the error hook fired on handler or attachment failures.
    /// The hook runs on whatever thread the native caller used.
    pub fn set_error_hook(&self, hook: impl Fn(&UpcallError) + Send + Sync + 'static) {
        let data = unsafe { &*self.data };
        *data.error_hook.lock().unwrap() = Box::new(hook);
    }
}

impl Drop for Closure {
    fn drop(&mut self) {
        unsafe {
            closure_free(self.closure);
            let data = Box::from_raw(self.data);
            let _ = data.runtime.release(data.anchor);
        }
    }
}

/// Shape-agnostic dispatcher bound into every closure.
///
/// Nothing may unwind out of here: the caller is a native frame.
unsafe extern "C" fn dispatch_upcall(
    _cif: &ffi_cif,
    result: &mut u64,
    args: *const *const c_void,
    data: &ClosureData,
) {
    let ret = data.interface.return_type();
    let slot = result as *mut u64 as *mut c_void;

    match run_upcall(data, args) {
        Ok(value) => {
            if let Err(e) = write_return(slot, ret, &value) {
                fire_error_hook(data, &e);
                write_default(slot, ret);
            }
        }
        Err(e) => {
            fire_error_hook(data, &e);
            write_default(slot, ret);
        }
    }
}

fn fire_error_hook(data: &ClosureData, err: &UpcallError) {
    // A hook that panicked on an earlier crossing poisons the lock; keep
    // reporting anyway.
    let hook = data
        .error_hook
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(err)));
}

unsafe fn run_upcall(
    data: &ClosureData,
    args: *const *const c_void,
) -> Result<Value, UpcallError> {
    // Scoped attachment: acquired before any managed code runs, released
    // on every exit path when the guard drops.
    let _env = data.runtime.attach_current_thread()?;

    let params = data.interface.params();
    let mut values = Vec::with_capacity(params.len());
    for (i, ty) in params.iter().enumerate() {
        values.push(read_arg(*args.add(i), *ty));
    }

    // Handler panics stop at this boundary; the native caller sees the
    // default return value, not an unwind.
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        data.handler.on_upcall(&values)
    }))
    .unwrap_or_else(|_| Err(UpcallError::Handler("handler panicked".to_string())))
}

/// Read one native argument slot at its declared width.
unsafe fn read_arg(slot: *const c_void, ty: NativeType) -> Value {
    match ty {
        NativeType::Pointer => Value::Ptr(*(slot as *const *const c_void) as usize),
        NativeType::Int32 => Value::Int32(*(slot as *const i32)),
        NativeType::UInt32 => Value::UInt32(*(slot as *const u32)),
        NativeType::Int64 => Value::Int64(*(slot as *const i64)),
        NativeType::UInt64 => Value::UInt64(*(slot as *const u64)),
        // Void cannot appear in parameter position (interface invariant).
        NativeType::Void => Value::Void,
    }
}

/// Write the handler's result into the native return slot.
///
/// Sub-register integers are widened to `ffi_arg`, which is what the
/// closure calling convention expects for integral returns.
unsafe fn write_return(
    slot: *mut c_void,
    ty: NativeType,
    value: &Value,
) -> Result<(), UpcallError> {
    match (ty, value) {
        (NativeType::Void, _) => Ok(()),
        (NativeType::Int32, Value::Int32(v)) => {
            *(slot as *mut ffi_arg) = *v as ffi_arg;
            Ok(())
        }
        (NativeType::UInt32, Value::UInt32(v)) => {
            *(slot as *mut ffi_arg) = *v as ffi_arg;
            Ok(())
        }
        (NativeType::Int64, Value::Int64(v)) => {
            *(slot as *mut i64) = *v;
            Ok(())
        }
        (NativeType::UInt64, Value::UInt64(v)) => {
            *(slot as *mut u64) = *v;
            Ok(())
        }
        (NativeType::Pointer, Value::Ptr(p)) => {
            *(slot as *mut usize) = *p;
            Ok(())
        }
        (expected, got) => Err(UpcallError::ReturnMismatch {
            expected: expected.display_name(),
            got: got.type_name(),
        }),
    }
}

/// Zero default produced when a dispatch is refused or the handler fails.
unsafe fn write_default(slot: *mut c_void, ty: NativeType) {
    match ty {
        NativeType::Void => {}
        NativeType::Int32 | NativeType::UInt32 => *(slot as *mut ffi_arg) = 0,
        NativeType::Int64 | NativeType::UInt64 => *(slot as *mut u64) = 0,
        NativeType::Pointer => *(slot as *mut usize) = 0,
    }
}
