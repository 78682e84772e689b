//! Strings, property names, symbols, and bigints

use std::ffi::CString;
use std::os::raw::c_char;

use sable_core::EngineError;

use crate::error::guard;
use crate::value::{borrow_handle, steal};
use crate::{SableHandle, SableRuntime};

unsafe fn utf8_slice<'a>(data: *const u8, len: usize) -> Result<&'a str, EngineError> {
    let bytes = std::slice::from_raw_parts(data, len);
    std::str::from_utf8(bytes).map_err(|_| EngineError::Fault("invalid UTF-8 in input".into()))
}

/// Copy `text` into `buf` (probe pattern), returning the size needed.
unsafe fn probe_copy(text: &str, buf: *mut c_char, buf_len: usize) -> usize {
    let needed = text.len();
    if !buf.is_null() && buf_len > 0 {
        let to_copy = needed.min(buf_len);
        std::ptr::copy_nonoverlapping(text.as_ptr(), buf as *mut u8, to_copy);
    }
    needed
}

// ============================================================================
// Strings
// ============================================================================

/// Create a string from UTF-8 bytes. Returns an owned handle, or null with
/// a pending error (invalid UTF-8 is a host error).
///
/// # Safety
/// `data` must be valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn sable_string_new_utf8(
    rt: *mut SableRuntime,
    data: *const u8,
    len: usize,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        let text = utf8_slice(data, len)?;
        Ok(steal(handle.engine.create_string(text)))
    })
}

/// Create a string from ASCII bytes (rejects bytes above 0x7F).
///
/// # Safety
/// `data` must be valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn sable_string_new_ascii(
    rt: *mut SableRuntime,
    data: *const c_char,
    len: usize,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        let bytes = std::slice::from_raw_parts(data as *const u8, len);
        if !bytes.is_ascii() {
            return Err(EngineError::Fault("non-ASCII byte in ASCII string".into()));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|_| EngineError::Fault("invalid ASCII string".into()))?;
        Ok(steal(handle.engine.create_string(text)))
    })
}

/// Copy a string's UTF-8 bytes into `buf` and return the byte count
/// needed (probe pattern: pass a null buffer to measure; no NUL
/// terminator is written).
///
/// # Safety
/// `string` is a borrowed string handle; `buf`, when non-null, must be
/// valid for `buf_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn sable_string_utf8(
    rt: *mut SableRuntime,
    string: *const SableHandle,
    buf: *mut c_char,
    buf_len: usize,
) -> usize {
    guard(rt, 0, |handle| {
        let s = borrow_handle(string);
        let text = handle.engine.string_text(&s)?;
        Ok(probe_copy(text, buf, buf_len))
    })
}

/// The always-NUL-terminated convenience: an owned C string copy of the
/// string's bytes, freed with `sable_message_free`. Returns null with a
/// pending error (embedded NUL bytes cannot be represented).
///
/// # Safety
/// `string` is a borrowed string handle.
#[no_mangle]
pub unsafe extern "C" fn sable_string_to_cstring(
    rt: *mut SableRuntime,
    string: *const SableHandle,
) -> *mut c_char {
    guard(rt, std::ptr::null_mut(), |handle| {
        let s = borrow_handle(string);
        let text = handle.engine.string_text(&s)?;
        CString::new(text)
            .map(CString::into_raw)
            .map_err(|_| EngineError::Fault("string contains an embedded NUL".into()))
    })
}

/// Content equality of two strings (both borrowed).
///
/// # Safety
/// Both handles must be borrowed string handles for this runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_string_equals(
    rt: *mut SableRuntime,
    a: *const SableHandle,
    b: *const SableHandle,
) -> bool {
    guard(rt, false, |handle| {
        let (a, b) = (borrow_handle(a), borrow_handle(b));
        Ok(handle.engine.string_text(&a)? == handle.engine.string_text(&b)?)
    })
}

// ============================================================================
// Property names
// ============================================================================

/// Create a property name from UTF-8 bytes. Returns an owned handle.
///
/// # Safety
/// `data` must be valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn sable_propname_new_utf8(
    rt: *mut SableRuntime,
    data: *const u8,
    len: usize,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        let text = utf8_slice(data, len)?;
        Ok(steal(handle.engine.propname_from_str(text)))
    })
}

/// Property name backed by a string handle (borrowed).
///
/// # Safety
/// `string` must be a borrowed string handle for this runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_propname_from_string(
    rt: *mut SableRuntime,
    string: *const SableHandle,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        let s = borrow_handle(string);
        Ok(steal(handle.engine.propname_from_string_cell(&s)?))
    })
}

/// Property name backed by a symbol handle (borrowed). The name keys by
/// the symbol's identity.
///
/// # Safety
/// `symbol` must be a borrowed symbol handle for this runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_propname_from_symbol(
    rt: *mut SableRuntime,
    symbol: *const SableHandle,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        let s = borrow_handle(symbol);
        Ok(steal(handle.engine.propname_from_symbol(&s)?))
    })
}

/// Copy a property name's readable text (probe pattern, no NUL).
///
/// # Safety
/// `name` is a borrowed property-name handle; `buf`, when non-null, must
/// be valid for `buf_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn sable_propname_utf8(
    rt: *mut SableRuntime,
    name: *const SableHandle,
    buf: *mut c_char,
    buf_len: usize,
) -> usize {
    guard(rt, 0, |handle| {
        let n = borrow_handle(name);
        let text = handle.engine.propname_text(&n)?;
        Ok(probe_copy(&text, buf, buf_len))
    })
}

/// Property-name equality: string keys by content, symbol keys by
/// identity.
///
/// # Safety
/// Both handles must be borrowed property-name handles for this runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_propname_equals(
    rt: *mut SableRuntime,
    a: *const SableHandle,
    b: *const SableHandle,
) -> bool {
    guard(rt, false, |handle| {
        let (a, b) = (borrow_handle(a), borrow_handle(b));
        handle.engine.propname_equals(&a, &b)
    })
}

/// Allocate a zeroed array for a host-object enumeration callback. The
/// bridge frees it after adopting the elements; the host must not free it.
/// Returns null when `count` is 0.
#[no_mangle]
pub extern "C" fn sable_propname_array_alloc(count: usize) -> *mut *mut SableHandle {
    if count == 0 {
        return std::ptr::null_mut();
    }
    let array: Box<[*mut SableHandle]> = vec![std::ptr::null_mut(); count].into_boxed_slice();
    Box::into_raw(array) as *mut *mut SableHandle
}

/// Free an enumeration array. Crate-internal: only the bridge releases
/// the backing memory.
pub(crate) unsafe fn free_propname_array(array: *mut *mut SableHandle, count: usize) {
    if array.is_null() || count == 0 {
        return;
    }
    drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
        array, count,
    )));
}

// ============================================================================
// Symbols
// ============================================================================

/// Create a unique symbol with a description. Returns an owned handle.
///
/// # Safety
/// `description` must be valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn sable_symbol_new(
    rt: *mut SableRuntime,
    description: *const u8,
    len: usize,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        let text = utf8_slice(description, len)?;
        Ok(steal(handle.engine.create_symbol(text)))
    })
}

/// The symbol's description as an owned string handle.
///
/// # Safety
/// `symbol` is a borrowed symbol handle.
#[no_mangle]
pub unsafe extern "C" fn sable_symbol_to_string(
    rt: *mut SableRuntime,
    symbol: *const SableHandle,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        let s = borrow_handle(symbol);
        let text = handle.engine.symbol_description(&s)?.to_string();
        Ok(steal(handle.engine.create_string(&text)))
    })
}

/// Symbol identity equality.
///
/// # Safety
/// Both handles must be borrowed symbol handles.
#[no_mangle]
pub unsafe extern "C" fn sable_symbol_equals(
    rt: *mut SableRuntime,
    a: *const SableHandle,
    b: *const SableHandle,
) -> bool {
    guard(rt, false, |handle| {
        let (a, b) = (borrow_handle(a), borrow_handle(b));
        handle.engine.symbol_description(&a)?;
        handle.engine.symbol_description(&b)?;
        Ok(a.ptr_eq(&b))
    })
}

// ============================================================================
// BigInts
// ============================================================================

/// BigInt from a signed 64-bit value. Returns an owned handle.
///
/// # Safety
/// `rt` must be a valid runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_bigint_from_i64(
    rt: *mut SableRuntime,
    value: i64,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        Ok(steal(handle.engine.create_bigint(value as i128)))
    })
}

/// BigInt from an unsigned 64-bit value. Returns an owned handle.
///
/// # Safety
/// `rt` must be a valid runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_bigint_from_u64(
    rt: *mut SableRuntime,
    value: u64,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        Ok(steal(handle.engine.create_bigint(value as i128)))
    })
}

/// Does the bigint fit an i64 without truncation?
///
/// # Safety
/// `bigint` is a borrowed bigint handle.
#[no_mangle]
pub unsafe extern "C" fn sable_bigint_fits_i64(
    rt: *mut SableRuntime,
    bigint: *const SableHandle,
) -> bool {
    guard(rt, false, |handle| {
        let b = borrow_handle(bigint);
        Ok(i64::try_from(handle.engine.bigint_value(&b)?).is_ok())
    })
}

/// Does the bigint fit a u64 without truncation?
///
/// # Safety
/// `bigint` is a borrowed bigint handle.
#[no_mangle]
pub unsafe extern "C" fn sable_bigint_fits_u64(
    rt: *mut SableRuntime,
    bigint: *const SableHandle,
) -> bool {
    guard(rt, false, |handle| {
        let b = borrow_handle(bigint);
        Ok(u64::try_from(handle.engine.bigint_value(&b)?).is_ok())
    })
}

/// Low 64 bits of the bigint, truncating.
///
/// # Safety
/// `bigint` is a borrowed bigint handle.
#[no_mangle]
pub unsafe extern "C" fn sable_bigint_truncate_u64(
    rt: *mut SableRuntime,
    bigint: *const SableHandle,
) -> u64 {
    guard(rt, 0, |handle| {
        let b = borrow_handle(bigint);
        Ok(handle.engine.bigint_value(&b)? as u64)
    })
}

/// The bigint as an i64 (meaningful when `sable_bigint_fits_i64`;
/// truncating otherwise).
///
/// # Safety
/// `bigint` is a borrowed bigint handle.
#[no_mangle]
pub unsafe extern "C" fn sable_bigint_to_i64(
    rt: *mut SableRuntime,
    bigint: *const SableHandle,
) -> i64 {
    guard(rt, 0, |handle| {
        let b = borrow_handle(bigint);
        Ok(handle.engine.bigint_value(&b)? as i64)
    })
}

/// Digit string in the given radix (2..=36) as an owned string handle.
///
/// # Safety
/// `bigint` is a borrowed bigint handle.
#[no_mangle]
pub unsafe extern "C" fn sable_bigint_to_string(
    rt: *mut SableRuntime,
    bigint: *const SableHandle,
    radix: u32,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        let b = borrow_handle(bigint);
        let digits = handle.engine.bigint_to_string(&b, radix)?;
        Ok(steal(handle.engine.create_string(&digits)))
    })
}

/// BigInt content equality.
///
/// # Safety
/// Both handles must be borrowed bigint handles.
#[no_mangle]
pub unsafe extern "C" fn sable_bigint_equals(
    rt: *mut SableRuntime,
    a: *const SableHandle,
    b: *const SableHandle,
) -> bool {
    guard(rt, false, |handle| {
        let (a, b) = (borrow_handle(a), borrow_handle(b));
        Ok(handle.engine.bigint_value(&a)? == handle.engine.bigint_value(&b)?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sable_runtime_destroy, sable_runtime_new};

    #[test]
    fn string_probe_and_equality() {
        unsafe {
            let rt = sable_runtime_new();
            let text = "héllo";
            let s = sable_string_new_utf8(rt, text.as_ptr(), text.len());
            assert!(!s.is_null());

            let needed = sable_string_utf8(rt, s, std::ptr::null_mut(), 0);
            assert_eq!(needed, text.len());
            let mut buf = vec![0u8; needed];
            sable_string_utf8(rt, s, buf.as_mut_ptr() as *mut c_char, buf.len());
            assert_eq!(std::str::from_utf8(&buf).unwrap(), text);

            let s2 = sable_string_new_utf8(rt, text.as_ptr(), text.len());
            assert!(sable_string_equals(rt, s, s2));

            let c = sable_string_to_cstring(rt, s);
            assert_eq!(std::ffi::CStr::from_ptr(c).to_str().unwrap(), text);
            crate::sable_message_free(c);

            crate::sable_handle_release(s);
            crate::sable_handle_release(s2);
            sable_runtime_destroy(rt);
        }
    }

    #[test]
    fn invalid_utf8_is_a_host_error() {
        unsafe {
            let rt = sable_runtime_new();
            let bad = [0xFFu8, 0xFE];
            let s = sable_string_new_utf8(rt, bad.as_ptr(), bad.len());
            assert!(s.is_null());
            assert!(crate::sable_runtime_has_pending_error(rt));
            let msg = crate::sable_runtime_get_and_clear_error_message(rt);
            assert!(!msg.is_null());
            crate::sable_message_free(msg);
            sable_runtime_destroy(rt);
        }
    }

    #[test]
    fn ascii_rejects_high_bytes() {
        unsafe {
            let rt = sable_runtime_new();
            let s = sable_string_new_ascii(rt, b"ok\xC3".as_ptr() as *const c_char, 3);
            assert!(s.is_null());
            let msg = crate::sable_runtime_get_and_clear_error_message(rt);
            crate::sable_message_free(msg);
            sable_runtime_destroy(rt);
        }
    }

    #[test]
    fn propname_equality_and_text() {
        unsafe {
            let rt = sable_runtime_new();
            let a = sable_propname_new_utf8(rt, b"key".as_ptr(), 3);
            let b = sable_propname_new_utf8(rt, b"key".as_ptr(), 3);
            assert!(sable_propname_equals(rt, a, b));

            let sym = sable_symbol_new(rt, b"tag".as_ptr(), 3);
            let pa = sable_propname_from_symbol(rt, sym);
            let pb = sable_propname_from_symbol(rt, sym);
            assert!(sable_propname_equals(rt, pa, pb));
            assert!(!sable_propname_equals(rt, pa, a));

            let needed = sable_propname_utf8(rt, a, std::ptr::null_mut(), 0);
            assert_eq!(needed, 3);

            for h in [a, b, pa, pb, sym] {
                crate::sable_handle_release(h);
            }
            sable_runtime_destroy(rt);
        }
    }

    #[test]
    fn bigint_conversions() {
        unsafe {
            let rt = sable_runtime_new();
            let big = sable_bigint_from_u64(rt, u64::MAX);
            assert!(sable_bigint_fits_u64(rt, big));
            assert!(!sable_bigint_fits_i64(rt, big));
            assert_eq!(sable_bigint_truncate_u64(rt, big), u64::MAX);

            let neg = sable_bigint_from_i64(rt, -42);
            assert!(sable_bigint_fits_i64(rt, neg));
            assert_eq!(sable_bigint_to_i64(rt, neg), -42);

            let hex = sable_bigint_to_string(rt, neg, 16);
            let mut buf = vec![0u8; sable_string_utf8(rt, hex, std::ptr::null_mut(), 0)];
            sable_string_utf8(rt, hex, buf.as_mut_ptr() as *mut c_char, buf.len());
            assert_eq!(std::str::from_utf8(&buf).unwrap(), "-2a");

            let other = sable_bigint_from_i64(rt, -42);
            assert!(sable_bigint_equals(rt, neg, other));

            for h in [big, neg, hex, other] {
                crate::sable_handle_release(h);
            }
            sable_runtime_destroy(rt);
        }
    }
}
