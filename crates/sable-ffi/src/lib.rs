//! C FFI bindings for the Sable engine
//!
//! This crate exposes the engine through a flat, ABI-stable boundary so
//! that embedders which cannot link against the Rust API can create, call,
//! and inspect script values. The API follows these principles:
//!
//! - ABI-stable (only C-compatible types cross the boundary)
//! - Opaque pointers for runtimes, handles, and prepared scripts
//! - Manual memory management with explicit ownership rules
//! - No unwinding across the boundary: failures land in a per-runtime
//!   pending-error slot and the call returns a sentinel
//!
//! # Ownership rules
//!
//! A [`SableValue`] returned by any function here is **owned**: if its kind
//! carries a handle, the caller holds the single reference and must release
//! it exactly once (`sable_value_release`, or by passing it to a call
//! documented to consume it). A `*const SableValue` passed *into* a
//! function is **borrowed**: the callee never releases it and clones it if
//! it needs to keep it. The same convention applies to bare handles.
//! Ownership is a calling-convention contract — nothing in the value
//! itself records it, and a raw memory copy of a handle-carrying value
//! creates two owners of one reference.
//!
//! # Error handling
//!
//! Every fallible call returns a fixed sentinel on failure (undefined
//! value, null pointer, `false`, or `-1`) and records the failure in the
//! runtime's pending-error slot. Check `sable_runtime_has_pending_error`
//! and drain with `sable_runtime_get_and_clear_error` (script-thrown
//! value) or `sable_runtime_get_and_clear_error_message` (native fault).
//! The slot holds only the most recent failure: a new failure silently
//! replaces an unread one.
//!
//! # Threading
//!
//! A runtime and everything reachable from it is confined to one thread at
//! a time; the single exception is `sable_runtime_request_interrupt`,
//! which may be called from a watchdog thread. Nothing here locks —
//! serialization is the caller's job.

mod array;
mod bytecode;
mod error;
mod function;
mod hooks;
mod object;
mod primitives;
mod runtime;
mod value;

pub use array::*;
pub use bytecode::*;
pub use error::*;
pub use function::*;
pub use hooks::*;
pub use object::*;
pub use primitives::*;
pub use runtime::*;
pub use value::*;

use std::os::raw::c_void;

// ============================================================================
// Opaque Types
// ============================================================================

/// Opaque handle to a Sable runtime instance
#[repr(C)]
pub struct SableRuntime {
    _private: [u8; 0],
}

/// Opaque handle to one strong reference into the engine heap
#[repr(C)]
pub struct SableHandle {
    _private: [u8; 0],
}

/// Opaque handle to a prepared (pre-parsed) script
#[repr(C)]
pub struct SablePreparedScript {
    _private: [u8; 0],
}

// ============================================================================
// Configuration
// ============================================================================

/// Runtime construction options, passed through to the engine.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SableConfig {
    /// Maintain a microtask queue (queue/drain fail when disabled)
    pub microtask_queue: bool,
    /// Nested call budget before calls fail with a native error
    pub max_call_depth: u32,
}

/// Engine defaults for [`SableConfig`].
#[no_mangle]
pub extern "C" fn sable_config_default() -> SableConfig {
    let defaults = sable_core::EngineOptions::default();
    SableConfig {
        microtask_queue: defaults.microtask_queue,
        max_call_depth: defaults.max_call_depth,
    }
}

// ============================================================================
// Callback signatures
// ============================================================================

/// Host function body.
///
/// Invoked synchronously by the engine. `this_val` and `args` are
/// **borrowed** — the callback must not release them, and must clone
/// anything it keeps. The returned value is **owned** by the engine (a new
/// reference for handle kinds). A callback that cannot succeed should set
/// the runtime's pending error (`sable_runtime_set_pending_message`) and
/// return undefined.
pub type SableHostFunctionCallback = unsafe extern "C" fn(
    rt: *mut SableRuntime,
    this_val: *const SableValue,
    args: *const SableValue,
    arg_count: usize,
    user_data: *mut c_void,
) -> SableValue;

/// Finalizer for host-supplied state. Runs exactly once, when the engine
/// reclaims the owning cell (or, for native state, on explicit
/// detachment). Never invoked when the registered user data was null.
pub type SableFinalizer = unsafe extern "C" fn(user_data: *mut c_void);

/// Host object property read. `name` is a **borrowed** property-name
/// handle; the returned value is **owned** by the engine.
pub type SableHostObjectGetCallback = unsafe extern "C" fn(
    rt: *mut SableRuntime,
    name: *const SableHandle,
    user_data: *mut c_void,
) -> SableValue;

/// Host object property write. `name` and `value` are **borrowed**.
pub type SableHostObjectSetCallback = unsafe extern "C" fn(
    rt: *mut SableRuntime,
    name: *const SableHandle,
    value: *const SableValue,
    user_data: *mut c_void,
);

/// Host object enumeration.
///
/// Returns an array of **owned** property-name handles (allocated with
/// `sable_propname_array_alloc`) and writes the element count to
/// `out_count`. The bridge adopts every element and then frees the array's
/// backing memory itself — two separate ownership transfers. Return null
/// with `*out_count == 0` for an empty result.
pub type SableHostObjectNamesCallback = unsafe extern "C" fn(
    rt: *mut SableRuntime,
    out_count: *mut usize,
    user_data: *mut c_void,
) -> *mut *mut SableHandle;

/// Process-wide fatal handler. Receives a message that is only valid for
/// the duration of the call.
pub type SableFatalHandler = unsafe extern "C" fn(message: *const std::os::raw::c_char, len: usize);
