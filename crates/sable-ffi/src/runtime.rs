//! Runtime lifecycle, evaluation, microtasks, and scopes

use std::os::raw::{c_char, c_int};
use std::sync::atomic::Ordering;

use sable_core::{EngineOptions, PreparedScript};

use crate::error::{guard, rt_handle, RuntimeHandle};
use crate::value::{clone_in, own_out, steal, undefined};
use crate::{SableConfig, SableHandle, SablePreparedScript, SableRuntime, SableValue};

// Internal representation of a prepared script (not exposed to C).
pub(crate) struct PreparedHandle {
    script: PreparedScript,
}

unsafe fn source_id<'a>(id: *const c_char, id_len: usize) -> std::borrow::Cow<'a, str> {
    if id.is_null() || id_len == 0 {
        std::borrow::Cow::Borrowed("<eval>")
    } else {
        let bytes = std::slice::from_raw_parts(id as *const u8, id_len);
        String::from_utf8_lossy(bytes)
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Create a runtime with default configuration.
///
/// # Safety
/// The returned runtime must be destroyed with `sable_runtime_destroy`,
/// on the thread that uses it.
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_new() -> *mut SableRuntime {
    Box::into_raw(RuntimeHandle::new(EngineOptions::default())) as *mut SableRuntime
}

/// Create a runtime with explicit configuration.
///
/// # Safety
/// `config` must be valid; null falls back to defaults. See
/// `sable_runtime_new`.
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_new_with_config(
    config: *const SableConfig,
) -> *mut SableRuntime {
    let options = if config.is_null() {
        EngineOptions::default()
    } else {
        let config = &*config;
        EngineOptions {
            microtask_queue: config.microtask_queue,
            max_call_depth: config.max_call_depth,
        }
    };
    Box::into_raw(RuntimeHandle::new(options)) as *mut SableRuntime
}

/// Destroy a runtime: drops any pending error, then the engine and every
/// cell only it keeps alive.
///
/// # Safety
/// `rt` must not be used after this call (null is tolerated). Values and
/// handles obtained from the runtime become dangling.
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_destroy(rt: *mut SableRuntime) {
    if rt.is_null() {
        return;
    }
    let handle = Box::from_raw(rt as *mut RuntimeHandle);
    handle.clear_pending();
    drop(handle);
}

/// Owned handle to the global object.
///
/// # Safety
/// `rt` must be a valid runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_global(rt: *mut SableRuntime) -> *mut SableHandle {
    steal(rt_handle(rt).engine.global())
}

/// Copy the runtime description into `buf` (probe pattern: pass a null
/// buffer to learn the required size; no NUL terminator is written).
///
/// # Safety
/// `buf`, when non-null, must be valid for `buf_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_description(
    rt: *mut SableRuntime,
    buf: *mut c_char,
    buf_len: usize,
) -> usize {
    let description = rt_handle(rt).engine.description();
    let needed = description.len();
    if !buf.is_null() && buf_len > 0 {
        let to_copy = needed.min(buf_len);
        std::ptr::copy_nonoverlapping(description.as_ptr(), buf as *mut u8, to_copy);
    }
    needed
}

/// Whether a debugger can attach to this runtime.
///
/// # Safety
/// `rt` must be a valid runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_is_inspectable(rt: *mut SableRuntime) -> bool {
    rt_handle(rt).engine.is_inspectable()
}

/// Request an interrupt. Idempotent, and the one entry point that may be
/// called from a thread other than the runtime's owner (a watchdog) while
/// the owner is executing. The next interrupt check on the owning thread
/// fails its operation with a pending host error.
///
/// # Safety
/// `rt` must be a live runtime (null is tolerated).
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_request_interrupt(rt: *mut SableRuntime) {
    if rt.is_null() {
        return;
    }
    // Touch only the interrupt flag: this must stay safe while the owning
    // thread is inside the engine.
    let flag = &*std::ptr::addr_of!((*(rt as *const RuntimeHandle)).interrupt);
    flag.store(true, Ordering::SeqCst);
}

// ============================================================================
// Evaluation
// ============================================================================

/// Evaluate source bytes (raw source or a compiled-module buffer) under a
/// source identifier. Returns an owned value, or undefined with a pending
/// error.
///
/// # Safety
/// `data` must be valid for `len` bytes; `id` for `id_len` bytes when
/// non-null.
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_eval(
    rt: *mut SableRuntime,
    data: *const u8,
    len: usize,
    id: *const c_char,
    id_len: usize,
) -> SableValue {
    guard(rt, undefined(), |handle| {
        let source = std::slice::from_raw_parts(data, len);
        let id = source_id(id, id_len);
        Ok(own_out(handle.engine.evaluate(source, &id)?))
    })
}

/// Construct an owned value from JSON bytes. Bad JSON leaves a pending
/// script error (a thrown SyntaxError).
///
/// # Safety
/// `data` must be valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_value_from_json_utf8(
    rt: *mut SableRuntime,
    data: *const u8,
    len: usize,
) -> SableValue {
    guard(rt, undefined(), |handle| {
        let bytes = std::slice::from_raw_parts(data, len);
        Ok(own_out(handle.engine.value_from_json(bytes)?))
    })
}

/// Parse source once for repeated evaluation. Returns null with a pending
/// error on failure.
///
/// # Safety
/// `data` must be valid for `len` bytes; `id` for `id_len` when non-null.
/// The result must be destroyed with `sable_prepared_script_destroy`; it
/// may outlive the runtime, but evaluating it against a destroyed runtime
/// is undefined behavior.
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_prepare(
    rt: *mut SableRuntime,
    data: *const u8,
    len: usize,
    id: *const c_char,
    id_len: usize,
) -> *mut SablePreparedScript {
    guard(rt, std::ptr::null_mut(), |handle| {
        let source = std::slice::from_raw_parts(data, len);
        let id = source_id(id, id_len);
        let script = handle.engine.prepare(source, &id)?;
        Ok(Box::into_raw(Box::new(PreparedHandle { script })) as *mut SablePreparedScript)
    })
}

/// Evaluate a prepared script. Each evaluation produces a fresh value.
///
/// # Safety
/// `prepared` must be live and `rt` must be the runtime family it is used
/// with (see `sable_runtime_prepare`).
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_eval_prepared(
    rt: *mut SableRuntime,
    prepared: *const SablePreparedScript,
) -> SableValue {
    guard(rt, undefined(), |handle| {
        let prepared = &*(prepared as *const PreparedHandle);
        Ok(own_out(handle.engine.evaluate_prepared(&prepared.script)?))
    })
}

/// Destroy a prepared script. Independent of any runtime.
///
/// # Safety
/// `prepared` must not be used after this call (null is tolerated).
#[no_mangle]
pub unsafe extern "C" fn sable_prepared_script_destroy(prepared: *mut SablePreparedScript) {
    if !prepared.is_null() {
        drop(Box::from_raw(prepared as *mut PreparedHandle));
    }
}

// ============================================================================
// Microtasks
// ============================================================================

/// Drain queued microtasks in order.
///
/// `max_hint <= 0` means unbounded. Returns 1 when the queue is empty
/// afterwards, 0 when work remains, -1 on failure (check the error
/// channel; already-run jobs are not requeued).
///
/// # Safety
/// `rt` must be a valid runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_drain_microtasks(
    rt: *mut SableRuntime,
    max_hint: c_int,
) -> c_int {
    guard(rt, -1, |handle| {
        Ok(if handle.engine.drain_microtasks(max_hint)? {
            1
        } else {
            0
        })
    })
}

/// Queue a function value (borrowed) for a later drain.
///
/// # Safety
/// `func` must be a valid borrowed value for this runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_runtime_queue_microtask(
    rt: *mut SableRuntime,
    func: *const SableValue,
) -> bool {
    guard(rt, false, |handle| {
        let func = clone_in(&*func);
        handle.engine.queue_microtask(&func)?;
        Ok(true)
    })
}

// ============================================================================
// Scopes
// ============================================================================

/// Open a scope: every cell the engine allocates while this scope is the
/// innermost one stays pinned until the scope is popped. Returns the scope
/// token (never 0).
///
/// # Safety
/// `rt` must be a valid runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_scope_push(rt: *mut SableRuntime) -> u64 {
    guard(rt, 0, |handle| Ok(handle.engine.push_scope()))
}

/// Close a scope, batch-releasing its pinned cells. Scopes are strict
/// LIFO; popping anything but the innermost scope fails and leaves a
/// pending host error.
///
/// # Safety
/// `rt` must be a valid runtime and `scope` a token from
/// `sable_scope_push`.
#[no_mangle]
pub unsafe extern "C" fn sable_scope_pop(rt: *mut SableRuntime, scope: u64) -> bool {
    guard(rt, false, |handle| {
        handle.engine.pop_scope(scope)?;
        Ok(true)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sable_runtime_has_pending_error, SableValueKind};

    #[test]
    fn runtime_lifecycle() {
        unsafe {
            let rt = sable_runtime_new();
            assert!(!rt.is_null());
            assert!(!sable_runtime_has_pending_error(rt));
            sable_runtime_destroy(rt);
            // Idempotent on null.
            sable_runtime_destroy(std::ptr::null_mut());
        }
    }

    #[test]
    fn description_probe_pattern() {
        unsafe {
            let rt = sable_runtime_new();
            let needed = sable_runtime_description(rt, std::ptr::null_mut(), 0);
            assert!(needed > 0);

            let mut buf = vec![0u8; needed];
            let written = sable_runtime_description(rt, buf.as_mut_ptr() as *mut c_char, buf.len());
            assert_eq!(written, needed);
            let text = String::from_utf8(buf).unwrap();
            assert!(text.starts_with("sable-core"));

            // Truncating copy still reports the full size.
            let mut small = [0u8; 4];
            let reported =
                sable_runtime_description(rt, small.as_mut_ptr() as *mut c_char, small.len());
            assert_eq!(reported, needed);
            assert_eq!(&small, b"sabl");

            sable_runtime_destroy(rt);
        }
    }

    #[test]
    fn eval_and_prepared_scripts() {
        unsafe {
            let rt = sable_runtime_new();
            let src = b"[1,2,3]";
            let mut v = sable_runtime_eval(rt, src.as_ptr(), src.len(), std::ptr::null(), 0);
            assert_eq!(v.kind, SableValueKind::Object);
            crate::sable_value_release(&mut v);

            let id = b"mod.sbl";
            let prepared = sable_runtime_prepare(
                rt,
                src.as_ptr(),
                src.len(),
                id.as_ptr() as *const c_char,
                id.len(),
            );
            assert!(!prepared.is_null());
            // Two evaluations produce distinct trees.
            let a = sable_runtime_eval_prepared(rt, prepared);
            let b = sable_runtime_eval_prepared(rt, prepared);
            assert_ne!(crate::sable_value_unique_id(&a), crate::sable_value_unique_id(&b));
            let (mut a, mut b) = (a, b);
            crate::sable_value_release(&mut a);
            crate::sable_value_release(&mut b);
            sable_prepared_script_destroy(prepared);
            sable_runtime_destroy(rt);
        }
    }

    #[test]
    fn eval_failure_leaves_script_error() {
        unsafe {
            let rt = sable_runtime_new();
            let src = b"{broken";
            let v = sable_runtime_eval(rt, src.as_ptr(), src.len(), std::ptr::null(), 0);
            assert_eq!(v.kind, SableValueKind::Undefined);
            assert!(sable_runtime_has_pending_error(rt));
            let mut thrown = crate::sable_runtime_get_and_clear_error(rt);
            assert_eq!(thrown.kind, SableValueKind::Object);
            crate::sable_value_release(&mut thrown);
            sable_runtime_destroy(rt);
        }
    }
}
