//! Call-interface construction
//!
//! A [`CallInterface`] describes one call shape — return type plus ordered
//! argument types — prepared once for the platform's default calling
//! convention and reused across any number of invocations and closures.
//! It is the single shared vocabulary between the invoker and the
//! trampoline manager.

use crate::types::NativeType;
use libffi::middle::Cif;
use libffi::raw::ffi_cif;
use thiserror::Error;

/// Most parameters a call interface may carry.
pub const MAX_ARITY: usize = 6;

/// Interface-preparation errors.
///
/// These are configuration errors: fatal to the specific call site and
/// never retried or coerced.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InterfaceError {
    #[error("unsupported arity {got}: at most {max} parameters")]
    UnsupportedArity { got: usize, max: usize },

    #[error("void is not a parameter type (parameter {index})")]
    VoidParameter { index: usize },
}

/// A prepared, reusable call shape.
///
/// Immutable once built; two interfaces built from identical descriptors
/// are independent and interchangeable. Argument order is call-site order
/// and is preserved exactly.
pub struct CallInterface {
    params: Vec<NativeType>,
    ret: NativeType,
    cif: Cif,
}

// The inner Cif owns its type records and is only read after
// construction; sharing the built interface across threads is safe.
unsafe impl Send for CallInterface {}
unsafe impl Sync for CallInterface {}

impl CallInterface {
    /// Build an interface from a return descriptor and ordered parameter
    /// descriptors.
    ///
    /// The supported shape set is closed: up to [`MAX_ARITY`] parameters
    /// drawn from the non-void descriptors. Violations surface here, before
    /// any native preparation runs.
    pub fn build(ret: NativeType, params: &[NativeType]) -> Result<Self, InterfaceError> {
        if params.len() > MAX_ARITY {
            return Err(InterfaceError::UnsupportedArity {
                got: params.len(),
                max: MAX_ARITY,
            });
        }
        for (index, param) in params.iter().enumerate() {
            if !param.is_parameter() {
                return Err(InterfaceError::VoidParameter { index });
            }
        }

        // Within the validated set, cif preparation cannot be rejected by
        // the platform.
        let cif = Cif::new(params.iter().map(NativeType::libffi_type), ret.libffi_type());
        Ok(Self {
            params: params.to_vec(),
            ret,
            cif,
        })
    }

    /// Parameter descriptors in call-site order.
    pub fn params(&self) -> &[NativeType] {
        &self.params
    }

    /// Return descriptor.
    pub fn return_type(&self) -> NativeType {
        self.ret
    }

    /// Number of parameters.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub(crate) fn cif(&self) -> &Cif {
        &self.cif
    }

    pub(crate) fn raw_cif(&self) -> *mut ffi_cif {
        self.cif.as_raw_ptr()
    }
}
