//! Arrays and byte buffers

use crate::error::guard;
use crate::value::{borrow_handle, own_out, steal, undefined, BorrowedValue};
use crate::{SableHandle, SableRuntime, SableValue};

// ============================================================================
// Arrays
// ============================================================================

/// Create a dense array of `length` undefined slots. Returns an owned
/// handle.
///
/// # Safety
/// `rt` must be a valid runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_array_new(
    rt: *mut SableRuntime,
    length: usize,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        Ok(steal(handle.engine.create_array(length)))
    })
}

/// Element count of an array.
///
/// # Safety
/// `array` is a borrowed array handle.
#[no_mangle]
pub unsafe extern "C" fn sable_array_length(
    rt: *mut SableRuntime,
    array: *const SableHandle,
) -> usize {
    guard(rt, 0, |handle| {
        let a = borrow_handle(array);
        handle.engine.array_len(&a)
    })
}

/// Indexed read; out-of-range indices read as undefined. Returns an owned
/// value.
///
/// # Safety
/// `array` is a borrowed array handle.
#[no_mangle]
pub unsafe extern "C" fn sable_array_get(
    rt: *mut SableRuntime,
    array: *const SableHandle,
    index: usize,
) -> SableValue {
    guard(rt, undefined(), |handle| {
        let a = borrow_handle(array);
        Ok(own_out(handle.engine.array_get(&a, index)?))
    })
}

/// Indexed write; out-of-range indices leave a pending script error
/// (RangeError). `value` is borrowed.
///
/// # Safety
/// `array` is a borrowed array handle; `value` a borrowed value.
#[no_mangle]
pub unsafe extern "C" fn sable_array_set(
    rt: *mut SableRuntime,
    array: *const SableHandle,
    index: usize,
    value: *const SableValue,
) -> bool {
    guard(rt, false, |handle| {
        let a = borrow_handle(array);
        let v = BorrowedValue::new(&*value);
        handle.engine.array_set(&a, index, &v)?;
        Ok(true)
    })
}

// ============================================================================
// Byte buffers
// ============================================================================

/// Create a zero-filled byte buffer. Returns an owned handle.
///
/// # Safety
/// `rt` must be a valid runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_buffer_new(rt: *mut SableRuntime, size: usize) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        Ok(steal(handle.engine.create_buffer(size)))
    })
}

/// Byte length of a buffer.
///
/// # Safety
/// `buffer` is a borrowed buffer handle.
#[no_mangle]
pub unsafe extern "C" fn sable_buffer_size(
    rt: *mut SableRuntime,
    buffer: *const SableHandle,
) -> usize {
    guard(rt, 0, |handle| {
        let b = borrow_handle(buffer);
        handle.engine.buffer_size(&b)
    })
}

/// Raw pointer to the buffer's bytes. The allocation is fixed-size and
/// never moves; the pointer stays valid until the buffer cell is
/// reclaimed. Returns null with a pending error for non-buffer handles.
///
/// # Safety
/// `buffer` is a borrowed buffer handle; the caller must not use the
/// pointer after releasing its last reference.
#[no_mangle]
pub unsafe extern "C" fn sable_buffer_data(
    rt: *mut SableRuntime,
    buffer: *const SableHandle,
) -> *mut u8 {
    guard(rt, std::ptr::null_mut(), |handle| {
        let b = borrow_handle(buffer);
        handle.engine.buffer_data_ptr(&b)
    })
}
