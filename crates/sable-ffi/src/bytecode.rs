//! Compiled-module introspection: pure functions over byte buffers
//!
//! None of these touch a runtime; they are stable entry points for
//! tooling that wants to identify or validate module buffers.

use sable_core::module;

/// Format sniff: does the buffer start with a compiled-module header?
///
/// # Safety
/// `data`, when non-null, must be valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn sable_bytecode_is_module(data: *const u8, len: usize) -> bool {
    if data.is_null() {
        return false;
    }
    module::is_module(std::slice::from_raw_parts(data, len))
}

/// The container version this build produces and understands.
#[no_mangle]
pub extern "C" fn sable_bytecode_version() -> u32 {
    module::VERSION
}

/// Full header and length consistency check.
///
/// # Safety
/// `data`, when non-null, must be valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn sable_bytecode_sanity_check(data: *const u8, len: usize) -> bool {
    if data.is_null() {
        return false;
    }
    module::sanity_check(std::slice::from_raw_parts(data, len))
}

/// Locate the epilogue region of a valid module buffer. Returns a pointer
/// into `data` and writes its length to `out_len`; returns null (and 0)
/// when the buffer is malformed or carries no epilogue.
///
/// # Safety
/// `data`, when non-null, must be valid for `len` bytes; `out_len`, when
/// non-null, must be writable.
#[no_mangle]
pub unsafe extern "C" fn sable_bytecode_epilogue(
    data: *const u8,
    len: usize,
    out_len: *mut usize,
) -> *const u8 {
    if !out_len.is_null() {
        *out_len = 0;
    }
    if data.is_null() {
        return std::ptr::null();
    }
    match module::epilogue(std::slice::from_raw_parts(data, len)) {
        Some(epi) if !epi.is_empty() => {
            if !out_len.is_null() {
                *out_len = epi.len();
            }
            epi.as_ptr()
        }
        _ => std::ptr::null(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_version_and_epilogue() {
        unsafe {
            let buffer = module::encode(b"{\"x\":1}", b"meta");
            assert!(sable_bytecode_is_module(buffer.as_ptr(), buffer.len()));
            assert!(sable_bytecode_sanity_check(buffer.as_ptr(), buffer.len()));
            assert_eq!(sable_bytecode_version(), module::VERSION);

            let mut epi_len = 0usize;
            let epi = sable_bytecode_epilogue(buffer.as_ptr(), buffer.len(), &mut epi_len);
            assert!(!epi.is_null());
            assert_eq!(epi_len, 4);
            assert_eq!(std::slice::from_raw_parts(epi, epi_len), b"meta");

            // Raw source is not a module and has no epilogue.
            let raw = b"{\"x\":1}";
            assert!(!sable_bytecode_is_module(raw.as_ptr(), raw.len()));
            let mut none_len = 7usize;
            let none = sable_bytecode_epilogue(raw.as_ptr(), raw.len(), &mut none_len);
            assert!(none.is_null());
            assert_eq!(none_len, 0);

            assert!(!sable_bytecode_is_module(std::ptr::null(), 0));
            assert!(!sable_bytecode_sanity_check(std::ptr::null(), 0));
        }
    }
}
