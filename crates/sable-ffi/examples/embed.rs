//! Drives the C API the way an embedder would from C: build a document,
//! register a host function, call it, and drain the error channel.
//!
//! Run with: cargo run -p sable-ffi --example embed

use std::os::raw::{c_char, c_void};
use std::ptr;

use sable_ffi::*;

unsafe extern "C" fn greet(
    rt: *mut SableRuntime,
    _this: *const SableValue,
    args: *const SableValue,
    arg_count: usize,
    _user_data: *mut c_void,
) -> SableValue {
    if arg_count == 0 {
        let msg = b"greet needs one argument";
        sable_runtime_set_pending_message(rt, msg.as_ptr() as *const c_char, msg.len());
        return sable_value_undefined();
    }
    // args are borrowed; build a fresh owned string for the result.
    let name = sable_value_to_string(rt, args);
    let needed = sable_string_utf8(rt, name, ptr::null_mut(), 0);
    let mut buf = vec![0u8; needed];
    sable_string_utf8(rt, name, buf.as_mut_ptr() as *mut c_char, buf.len());
    sable_handle_release(name);

    let greeting = format!("Hello, {}!", String::from_utf8_lossy(&buf));
    let out = sable_string_new_utf8(rt, greeting.as_ptr(), greeting.len());
    sable_value_string(out)
}

fn main() {
    unsafe {
        let rt = sable_runtime_new();

        // Build a value from JSON and read it back.
        let doc = br#"{"who":"world"}"#;
        let mut root = sable_runtime_value_from_json_utf8(rt, doc.as_ptr(), doc.len());
        let key = sable_propname_new_utf8(rt, b"who".as_ptr(), 3);
        let mut who = sable_object_get(rt, root.payload.handle, key);

        // Register and call a host function.
        let fn_name = sable_propname_new_utf8(rt, b"greet".as_ptr(), 5);
        let func = sable_function_new(rt, fn_name, 1, greet, ptr::null_mut(), None);
        let mut result = sable_function_call(rt, func, ptr::null(), &who, 1);

        if sable_runtime_has_pending_error(rt) {
            let msg = sable_runtime_get_and_clear_error_message(rt);
            eprintln!("call failed: {:?}", std::ffi::CStr::from_ptr(msg));
            sable_message_free(msg);
        } else {
            let text = sable_value_to_string(rt, &result);
            let needed = sable_string_utf8(rt, text, ptr::null_mut(), 0);
            let mut buf = vec![0u8; needed];
            sable_string_utf8(rt, text, buf.as_mut_ptr() as *mut c_char, buf.len());
            println!("{}", String::from_utf8_lossy(&buf));
            sable_handle_release(text);
        }

        sable_value_release(&mut result);
        sable_value_release(&mut who);
        sable_value_release(&mut root);
        for h in [key, fn_name, func] {
            sable_handle_release(h);
        }
        sable_runtime_destroy(rt);
    }
}
