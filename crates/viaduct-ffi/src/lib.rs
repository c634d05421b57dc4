//! Viaduct FFI - runtime foreign-function bridge
//!
//! Lets a managed host runtime work against native libraries whose exact
//! build is unknown at compile time:
//! - Dynamic library loading and symbol resolution (loader)
//! - Runtime-described call shapes (interface) and generic invocation of
//!   resolved addresses (invoker)
//! - Native-callable trampolines dispatching back into managed handlers
//!   (callbacks), with scoped thread attachment (runtime)
//! - Durable managed references and raw-memory views for marshaling
//!   (handles, memory)
//!
//! # Safety
//!
//! Crossing a foreign boundary is inherently unsafe. All unsafe code is
//! isolated in this crate behind explicit contracts: operations whose
//! soundness depends on caller-asserted facts (a symbol really having a
//! shape, an address really being readable) are `unsafe fn`s that document
//! exactly what the caller vouches for; everything checkable at runtime —
//! arity, type widths, stale handles, detached threads — is checked and
//! surfaced as a typed error.

/// Bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Public API modules
pub mod callbacks;
pub mod config;
pub mod handles;
pub mod interface;
pub mod invoker;
pub mod loader;
pub mod marshal;
pub mod memory;
pub mod runtime;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use callbacks::{Closure, ClosureError, ErrorHook};
pub use config::{ConfigError, LoaderConfig};
pub use handles::{HandleError, ManagedObject, ManagedRef};
pub use interface::{CallInterface, InterfaceError, MAX_ARITY};
pub use invoker::{CallError, ExternFunction};
pub use loader::{last_error, LoadError, NativeLibrary, NativeLoader, SymbolAddress};
pub use marshal::MarshalError;
pub use memory::{read_utf8, BufferView, MemoryError};
pub use runtime::{AttachError, AttachGuard, AttachPolicy, Runtime, UpcallError, UpcallHandler};
pub use types::NativeType;
pub use value::Value;
