//! Per-runtime pending-error channel
//!
//! No failure crosses the boundary as an unwind. Every fallible entry
//! point runs its body inside [`guard`], which catches both engine errors
//! and panics, classifies them, stores the result in the runtime's sticky
//! slot, and returns the call's sentinel:
//!
//! - a script-thrown value becomes a **script error** (read back with
//!   `sable_runtime_get_and_clear_error`),
//! - any native fault — including a caught panic — becomes a **host
//!   error** message (read back with
//!   `sable_runtime_get_and_clear_error_message`).
//!
//! The slot holds at most one of the two, and a new failure overwrites an
//! unread one. That overwrite is part of the contract: callers that need
//! the first failure must drain before issuing more calls.

use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use sable_core::{Engine, EngineError, EngineOptions, EngineResult, Value};

use crate::value::{own_out, undefined};
use crate::{SableRuntime, SableValue};

/// The sticky failure record: exactly one of the two.
pub(crate) enum PendingError {
    /// Script-thrown value
    Script(Value),
    /// Native-level fault message
    Host(String),
}

/// Internal representation of a runtime (not exposed to C).
pub(crate) struct RuntimeHandle {
    pub(crate) engine: Engine,
    pending: RefCell<Option<PendingError>>,
    pub(crate) interrupt: Arc<AtomicBool>,
}

impl RuntimeHandle {
    pub(crate) fn new(options: EngineOptions) -> Box<Self> {
        let engine = Engine::new(options);
        let interrupt = engine.interrupt_handle();
        Box::new(RuntimeHandle {
            engine,
            pending: RefCell::new(None),
            interrupt,
        })
    }

    /// Record a failure, overwriting any unread one.
    pub(crate) fn set_error(&self, error: EngineError) {
        let record = match error {
            EngineError::Thrown(value) => PendingError::Script(value),
            other => PendingError::Host(other.to_string()),
        };
        *self.pending.borrow_mut() = Some(record);
    }

    pub(crate) fn set_host_message(&self, message: String) {
        *self.pending.borrow_mut() = Some(PendingError::Host(message));
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending.borrow().is_some()
    }

    /// Consume a pending script error, if that is what is stored.
    pub(crate) fn take_script_error(&self) -> Option<Value> {
        let mut slot = self.pending.borrow_mut();
        match slot.take() {
            Some(PendingError::Script(value)) => Some(value),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Consume a pending host error, if that is what is stored.
    pub(crate) fn take_host_message(&self) -> Option<String> {
        let mut slot = self.pending.borrow_mut();
        match slot.take() {
            Some(PendingError::Host(message)) => Some(message),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Drop whatever is pending (runtime teardown).
    pub(crate) fn clear_pending(&self) {
        *self.pending.borrow_mut() = None;
    }
}

/// # Safety
/// `rt` must be a live runtime created by this crate, accessed from its
/// owning thread.
pub(crate) unsafe fn rt_handle<'a>(rt: *mut SableRuntime) -> &'a RuntimeHandle {
    &*(rt as *const RuntimeHandle)
}

/// The failure-catching region around every fallible boundary call.
///
/// On success returns the body's value; on failure stores the classified
/// error in the runtime's slot and returns `sentinel`.
///
/// # Safety
/// `rt` must be a live runtime created by this crate.
pub(crate) unsafe fn guard<T>(
    rt: *mut SableRuntime,
    sentinel: T,
    body: impl FnOnce(&RuntimeHandle) -> EngineResult<T>,
) -> T {
    let handle = rt_handle(rt);
    match catch_unwind(AssertUnwindSafe(|| body(handle))) {
        Ok(Ok(value)) => value,
        Ok(Err(error)) => {
            handle.set_error(error);
            sentinel
        }
        Err(payload) => {
            handle.set_host_message(panic_message(payload.as_ref()));
            sentinel
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "internal engine fault".to_string()
    }
}

// ============================================================================
// extern "C" surface
// ============================================================================

/// Is a failure pending on this runtime?
///
/// # Safety
/// `rt` must be a valid runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_has_pending_error(rt: *const SableRuntime) -> bool {
    rt_handle(rt as *mut SableRuntime).has_pending()
}

/// Consume a pending script error. Returns the thrown value (owned by the
/// caller), or undefined when the slot is clear or holds a host error.
/// A second read observes the cleared slot.
///
/// # Safety
/// `rt` must be a valid runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_get_and_clear_error(rt: *mut SableRuntime) -> SableValue {
    match rt_handle(rt).take_script_error() {
        Some(value) => own_out(value),
        None => undefined(),
    }
}

/// Consume a pending host error. Returns an owned NUL-terminated message
/// the caller frees with `sable_message_free`, or null when the slot is
/// clear or holds a script error.
///
/// # Safety
/// `rt` must be a valid runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_get_and_clear_error_message(
    rt: *mut SableRuntime,
) -> *mut c_char {
    match rt_handle(rt).take_host_message() {
        Some(message) => match CString::new(message) {
            Ok(c) => c.into_raw(),
            Err(_) => std::ptr::null_mut(),
        },
        None => std::ptr::null_mut(),
    }
}

/// Record a host error from the embedder side, e.g. from a failing host
/// callback. Overwrites any unread error.
///
/// # Safety
/// `rt` must be a valid runtime; `message` must be valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_set_pending_message(
    rt: *mut SableRuntime,
    message: *const c_char,
    len: usize,
) {
    let text = if message.is_null() {
        String::new()
    } else {
        let bytes = std::slice::from_raw_parts(message as *const u8, len);
        String::from_utf8_lossy(bytes).into_owned()
    };
    rt_handle(rt).set_host_message(text);
}

/// Free a message buffer returned by this crate.
///
/// # Safety
/// `message` must have been returned by this crate and not freed already.
#[no_mangle]
pub unsafe extern "C" fn sable_message_free(message: *mut c_char) {
    if !message.is_null() {
        drop(CString::from_raw(message));
    }
}
