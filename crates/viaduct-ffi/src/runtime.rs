//! Managed runtime facade: thread attachment and upcall handlers
//!
//! Native code may invoke a trampoline on any thread it likes. Before any
//! managed handler runs, the invoking thread must hold an attachment to
//! the [`Runtime`]; the attachment is scoped — acquired on entry, dropped
//! on every exit path — so a native-originated thread never remains
//! half-registered after its upcall returns.
//!
//! Crossing into managed code from an unattached thread is the most
//! dangerous failure mode in the bridge. It is handled as a recoverable
//! error: under [`AttachPolicy::RequireRegistered`] the dispatch is
//! refused with [`AttachError::Detached`] instead of terminating the
//! process.

use crate::handles::{HandleError, HandleTable, ManagedObject, ManagedRef};
use crate::value::Value;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use thiserror::Error;

/// Thread-attachment errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AttachError {
    /// The current thread holds no attachment and the runtime's policy
    /// refuses to create one on demand
    #[error("current thread is not attached to the managed runtime")]
    Detached,
}

/// Managed-side failure raised during an upcall. These never unwind into
/// native frames; the trampoline reports them through its error hook and
/// produces the shape's default return value.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UpcallError {
    #[error("upcall handler failed: {0}")]
    Handler(String),

    #[error("handler returned {got} for a {expected} return slot")]
    ReturnMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error(transparent)]
    Attach(#[from] AttachError),

    #[error(transparent)]
    Handle(#[from] HandleError),
}

/// Managed logic invocable from native code through a trampoline.
///
/// Implementations receive the marshaled native arguments in call-site
/// order and return the value to place in the native return slot.
pub trait UpcallHandler: Send + Sync {
    fn on_upcall(&self, args: &[Value]) -> Result<Value, UpcallError>;
}

impl<F> UpcallHandler for F
where
    F: Fn(&[Value]) -> Result<Value, UpcallError> + Send + Sync,
{
    fn on_upcall(&self, args: &[Value]) -> Result<Value, UpcallError> {
        self(args)
    }
}

/// How the runtime treats an upcall from an unattached thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachPolicy {
    /// Attach the thread for the duration of the crossing and detach on
    /// exit
    #[default]
    AttachOnDemand,
    /// Refuse the crossing: only threads pre-registered via
    /// [`Runtime::register_current_thread`] may enter managed code
    RequireRegistered,
}

/// The managed runtime the bridge serves: the thread-attachment registry
/// and the durable-reference table.
///
/// Shareable across threads; the interior mutexes exist because upcalls
/// arrive on arbitrary native threads.
pub struct Runtime {
    policy: AttachPolicy,
    handles: Mutex<HandleTable>,
    attached: Mutex<HashSet<ThreadId>>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_policy(AttachPolicy::default())
    }

    pub fn with_policy(policy: AttachPolicy) -> Self {
        Self {
            policy,
            handles: Mutex::new(HandleTable::default()),
            attached: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> AttachPolicy {
        self.policy
    }

    /// Acquire the calling thread's attachment.
    ///
    /// Already-attached threads get a non-owning guard; otherwise behavior
    /// follows the attach policy. The returned guard detaches (if it
    /// attached) when dropped, on every exit path.
    pub fn attach_current_thread(&self) -> Result<AttachGuard<'_>, AttachError> {
        let id = thread::current().id();
        let mut attached = self.attached.lock().unwrap();
        if attached.contains(&id) {
            return Ok(AttachGuard {
                runtime: self,
                thread: id,
                owned: false,
                _not_send: PhantomData,
            });
        }
        match self.policy {
            AttachPolicy::RequireRegistered => Err(AttachError::Detached),
            AttachPolicy::AttachOnDemand => {
                attached.insert(id);
                Ok(AttachGuard {
                    runtime: self,
                    thread: id,
                    owned: true,
                    _not_send: PhantomData,
                })
            }
        }
    }

    /// Register the calling thread regardless of policy. This is how an
    /// embedder marks its managed threads under
    /// [`AttachPolicy::RequireRegistered`].
    pub fn register_current_thread(&self) -> AttachGuard<'_> {
        let id = thread::current().id();
        let owned = self.attached.lock().unwrap().insert(id);
        AttachGuard {
            runtime: self,
            thread: id,
            owned,
            _not_send: PhantomData,
        }
    }

    /// Whether the calling thread currently holds an attachment.
    pub fn is_attached(&self) -> bool {
        let id = thread::current().id();
        self.attached.lock().unwrap().contains(&id)
    }

    /// Anchor a managed object for native-side transport.
    ///
    /// Must be matched by exactly one [`Runtime::release`] or the object
    /// is pinned forever.
    pub fn retain(&self, object: ManagedObject) -> ManagedRef {
        self.handles.lock().unwrap().retain(object)
    }

    /// Resolve a durable reference back to its object. Released or
    /// fabricated handles are [`HandleError::Stale`].
    pub fn resolve(&self, handle: ManagedRef) -> Result<ManagedObject, HandleError> {
        self.handles.lock().unwrap().resolve(handle)
    }

    /// Drop a durable reference. Releasing twice is an error, not
    /// undefined behavior.
    pub fn release(&self, handle: ManagedRef) -> Result<(), HandleError> {
        self.handles.lock().unwrap().release(handle)
    }

    /// Number of live durable references, for leak diagnostics.
    pub fn live_refs(&self) -> usize {
        self.handles.lock().unwrap().live_count()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped thread attachment. Dropping the outermost (owning) guard
/// detaches the thread; nested guards are no-ops on drop.
pub struct AttachGuard<'rt> {
    runtime: &'rt Runtime,
    thread: ThreadId,
    owned: bool,
    // Attachment is a property of the current thread; the guard must not
    // migrate to another one.
    _not_send: PhantomData<*const ()>,
}

impl AttachGuard<'_> {
    /// Whether this guard owns the attachment (detaches on drop).
    pub fn is_owner(&self) -> bool {
        self.owned
    }
}

impl Drop for AttachGuard<'_> {
    fn drop(&mut self) {
        if self.owned {
            self.runtime.attached.lock().unwrap().remove(&self.thread);
        }
    }
}
