//! Process-wide hooks: fatal handler and profiler toggles
//!
//! One slot each, last registration wins, no composition. The fatal
//! handler slot is explicit process-scoped state: install before use,
//! clear (idempotently) on teardown.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::path::Path;

use parking_lot::Mutex;

use sable_core::hooks;

use crate::SableFatalHandler;

static FATAL_HANDLER: Mutex<Option<SableFatalHandler>> = Mutex::new(None);

/// Install or clear (pass null) the process-wide fatal handler. Last
/// write wins. The handler receives unrecoverable engine conditions; the
/// failing operation still reports through its runtime's error channel.
///
/// # Safety
/// The handler must not unwind and must not call back into the runtime
/// that is reporting.
#[no_mangle]
pub unsafe extern "C" fn sable_set_fatal_handler(handler: Option<SableFatalHandler>) {
    *FATAL_HANDLER.lock() = handler;
    match handler {
        Some(_) => hooks::set_fatal_hook(Some(Box::new(|message| {
            if let Some(h) = *FATAL_HANDLER.lock() {
                unsafe { h(message.as_ptr() as *const c_char, message.len()) }
            }
        }))),
        None => hooks::set_fatal_hook(None),
    }
}

/// Enable the sampling profiler globally.
#[no_mangle]
pub extern "C" fn sable_sampling_profiler_enable() {
    hooks::enable_sampling_profiler();
}

/// Disable the sampling profiler globally.
#[no_mangle]
pub extern "C" fn sable_sampling_profiler_disable() {
    hooks::disable_sampling_profiler();
}

/// Write the sampled trace to a file. Returns false on IO failure or a
/// bad path.
///
/// # Safety
/// `path` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn sable_dump_sampled_trace(path: *const c_char) -> bool {
    if path.is_null() {
        return false;
    }
    let Ok(path) = CStr::from_ptr(path).to_str() else {
        return false;
    };
    hooks::dump_sampling_trace(Path::new(path)).is_ok()
}

/// Enable the code-coverage profiler globally.
#[no_mangle]
pub extern "C" fn sable_coverage_profiler_enable() {
    hooks::enable_coverage_profiler();
}

/// Disable the code-coverage profiler globally.
#[no_mangle]
pub extern "C" fn sable_coverage_profiler_disable() {
    hooks::disable_coverage_profiler();
}

/// Current code-coverage-profiler state.
#[no_mangle]
pub extern "C" fn sable_coverage_profiler_is_enabled() -> bool {
    hooks::coverage_profiler_enabled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FATAL_CALLS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn counting_handler(_message: *const c_char, _len: usize) {
        FATAL_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn fatal_handler_fires_on_scope_misuse() {
        unsafe {
            sable_set_fatal_handler(Some(counting_handler));
            let rt = crate::sable_runtime_new();
            let before = FATAL_CALLS.load(Ordering::SeqCst);

            // Popping a never-pushed scope is an engine invariant break:
            // it reports fatally and fails through the error channel.
            assert!(!crate::sable_scope_pop(rt, 999));
            assert_eq!(FATAL_CALLS.load(Ordering::SeqCst), before + 1);
            assert!(crate::sable_runtime_has_pending_error(rt));
            let msg = crate::sable_runtime_get_and_clear_error_message(rt);
            crate::sable_message_free(msg);

            sable_set_fatal_handler(None);
            assert!(!crate::sable_scope_pop(rt, 999));
            assert_eq!(FATAL_CALLS.load(Ordering::SeqCst), before + 1);
            let msg = crate::sable_runtime_get_and_clear_error_message(rt);
            crate::sable_message_free(msg);

            crate::sable_runtime_destroy(rt);
        }
    }

    #[test]
    fn profiler_toggles_and_trace_dump() {
        unsafe {
            sable_coverage_profiler_enable();
            assert!(sable_coverage_profiler_is_enabled());
            sable_coverage_profiler_disable();
            assert!(!sable_coverage_profiler_is_enabled());

            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("trace.txt");
            let c_path = std::ffi::CString::new(path.to_str().unwrap()).unwrap();
            sable_sampling_profiler_enable();
            assert!(sable_dump_sampled_trace(c_path.as_ptr()));
            sable_sampling_profiler_disable();
            assert!(std::fs::read_to_string(&path)
                .unwrap()
                .starts_with("sable sampling trace"));

            assert!(!sable_dump_sampled_trace(std::ptr::null()));
        }
    }
}
