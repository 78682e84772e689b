//! Functions: host-function registration and calls
//!
//! The registration bridge is the heart of engine-to-host control flow: a
//! C callback triple becomes a shared-ownership closure the engine can
//! invoke any number of times before reclaiming it exactly once.

use std::os::raw::c_void;
use std::rc::Rc;

use sable_core::{HostFn, Value};

use crate::error::guard;
use crate::value::{borrow_handle, borrow_out, clone_in, own_in, own_out, steal, undefined};
use crate::{SableFinalizer, SableHandle, SableHostFunctionCallback, SableRuntime, SableValue};

// Shared-ownership bundle behind a registered host function. Dropped —
// and the finalizer run — exactly once, when the engine reclaims the
// wrapping function cell.
struct HostFnClosure {
    rt: *mut SableRuntime,
    callback: SableHostFunctionCallback,
    user_data: *mut c_void,
    finalizer: Option<SableFinalizer>,
}

impl Drop for HostFnClosure {
    fn drop(&mut self) {
        if let Some(finalizer) = self.finalizer {
            if !self.user_data.is_null() {
                unsafe { finalizer(self.user_data) }
            }
        }
    }
}

/// Expose a host function to the engine.
///
/// `name` is a borrowed property-name handle; `param_count` is advisory.
/// The callback/user-data/finalizer triple is always supplied together: a
/// stateless callback passes null user data and a null finalizer. Returns
/// an owned function handle, engine-side indistinguishable from any other
/// function.
///
/// Invocation contract: the engine calls the bridge synchronously with a
/// borrowed `this` and borrowed argument array; the callback returns an
/// owned value the bridge adopts without extra cloning. A callback that
/// cannot succeed sets the runtime's pending error and returns undefined
/// — the bridge does not intercept that path.
///
/// # Safety
/// The callback must follow the ownership contract and must not unwind;
/// `user_data` must stay valid until the finalizer runs.
#[no_mangle]
pub unsafe extern "C" fn sable_function_new(
    rt: *mut SableRuntime,
    name: *const SableHandle,
    param_count: u32,
    callback: SableHostFunctionCallback,
    user_data: *mut c_void,
    finalizer: Option<SableFinalizer>,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        let n = borrow_handle(name);
        let name_text = handle.engine.propname_text(&n)?;

        let closure = Rc::new(HostFnClosure {
            rt,
            callback,
            user_data,
            finalizer,
        });
        let body: HostFn = Rc::new(move |_engine, this, args| {
            // Borrowed representations out: no count changes, nothing for
            // the callback to release.
            let c_this = borrow_out(this);
            let c_args: Vec<SableValue> = args.iter().map(borrow_out).collect();
            let result = unsafe {
                (closure.callback)(
                    closure.rt,
                    &c_this,
                    c_args.as_ptr(),
                    c_args.len(),
                    closure.user_data,
                )
            };
            // The result is owned by contract; adopt it as-is.
            Ok(unsafe { own_in(&result) })
        });

        Ok(steal(handle.engine.create_function(
            &name_text,
            param_count,
            body,
        )))
    })
}

/// Call a function. `this_val` may be null (undefined `this`); `args` is
/// a borrowed array of `arg_count` values. Returns an owned result, or
/// undefined with a pending error.
///
/// # Safety
/// `function` is a borrowed function handle; `args`, when non-null, must
/// be valid for `arg_count` values.
#[no_mangle]
pub unsafe extern "C" fn sable_function_call(
    rt: *mut SableRuntime,
    function: *const SableHandle,
    this_val: *const SableValue,
    args: *const SableValue,
    arg_count: usize,
) -> SableValue {
    guard(rt, undefined(), |handle| {
        let f = borrow_handle(function);
        let this = if this_val.is_null() {
            Value::Undefined
        } else {
            clone_in(&*this_val)
        };
        let arg_values = collect_args(args, arg_count);
        let func = Value::Object((*f).clone());
        Ok(own_out(handle.engine.call(&func, &this, &arg_values)?))
    })
}

/// Constructor call: a fresh object wired to the function's `prototype`
/// becomes `this`; the explicit object result wins if the function
/// produces one. Returns an owned value.
///
/// # Safety
/// `function` is a borrowed function handle; `args`, when non-null, must
/// be valid for `arg_count` values.
#[no_mangle]
pub unsafe extern "C" fn sable_function_construct(
    rt: *mut SableRuntime,
    function: *const SableHandle,
    args: *const SableValue,
    arg_count: usize,
) -> SableValue {
    guard(rt, undefined(), |handle| {
        let f = borrow_handle(function);
        let arg_values = collect_args(args, arg_count);
        Ok(own_out(handle.engine.construct(&f, &arg_values)?))
    })
}

/// Is this a host-implemented function? (Every function this engine can
/// hold is host-backed, so this matches `sable_object_is_function`.)
///
/// # Safety
/// `function` is a borrowed handle.
#[no_mangle]
pub unsafe extern "C" fn sable_function_is_host(
    rt: *mut SableRuntime,
    function: *const SableHandle,
) -> bool {
    crate::sable_object_is_function(rt, function)
}

unsafe fn collect_args(args: *const SableValue, arg_count: usize) -> Vec<Value> {
    if args.is_null() || arg_count == 0 {
        return Vec::new();
    }
    // Clone each borrowed argument for the duration of the call; the
    // caller keeps its references.
    std::slice::from_raw_parts(args, arg_count)
        .iter()
        .map(|v| clone_in(v))
        .collect()
}
