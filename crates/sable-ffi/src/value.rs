//! The tagged value ABI and ownership-explicit conversions
//!
//! [`SableValue`] is the fixed-layout discriminated union that crosses the
//! boundary. The conversion helpers in this module are the only way engine
//! values become ABI values and vice versa, and each helper is explicit
//! about which side of the steal/borrow protocol it implements:
//!
//! - [`own_out`]: engine → ABI, transferring ownership (steal). Used for
//!   every value a boundary function returns.
//! - [`borrow_out`]: engine → ABI with no transfer. Used for callback
//!   arguments the host must not release.
//! - [`own_in`]: ABI → engine, adopting the caller's reference. Used for
//!   callback results, which are owned by contract.
//! - [`clone_in`]: ABI → engine, minting a fresh reference while the
//!   caller keeps ownership. Used for every borrowed value parameter.

use std::mem::ManuallyDrop;
use std::ops::Deref;

use sable_core::{BorrowedRef, HeapCell, HeapRef, Value};

use crate::error::{guard, rt_handle};
use crate::{SableHandle, SableRuntime};

// ============================================================================
// ABI layout
// ============================================================================

/// Value kind discriminant. Exactly eight variants; the kind fully
/// determines which payload union member is valid.
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SableValueKind {
    /// No payload
    Undefined = 0,
    /// No payload
    Null = 1,
    /// `payload.boolean`
    Boolean = 2,
    /// `payload.number`
    Number = 3,
    /// `payload.handle`
    Symbol = 4,
    /// `payload.handle`
    BigInt = 5,
    /// `payload.handle`
    String = 6,
    /// `payload.handle`
    Object = 7,
}

/// Payload union; interpret per [`SableValueKind`].
#[repr(C)]
#[derive(Clone, Copy)]
pub union SableValuePayload {
    /// Boolean scalar
    pub boolean: bool,
    /// Number scalar
    pub number: f64,
    /// Heap reference (handle kinds only)
    pub handle: *mut SableHandle,
}

/// C-compatible tagged value.
///
/// `Copy` mirrors the C struct semantics — but copying a handle-kind value
/// duplicates the *pointer*, not the reference. Only `sable_value_clone`
/// produces a second logical owner.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SableValue {
    /// Kind discriminant
    pub kind: SableValueKind,
    /// Payload, valid per `kind`
    pub payload: SableValuePayload,
}

// ============================================================================
// Handle helpers
// ============================================================================

pub(crate) fn undefined() -> SableValue {
    SableValue {
        kind: SableValueKind::Undefined,
        payload: SableValuePayload { number: 0.0 },
    }
}

/// Steal: consume a wrapper, handing its one reference to the caller.
pub(crate) fn steal(r: HeapRef) -> *mut SableHandle {
    r.into_raw() as *mut SableHandle
}

/// Non-owning pointer for a reference the engine keeps.
pub(crate) fn handle_of(r: &HeapRef) -> *mut SableHandle {
    r.as_raw() as *mut SableHandle
}

/// Adopt: take over the caller's reference.
pub(crate) unsafe fn adopt(h: *mut SableHandle) -> HeapRef {
    HeapRef::from_raw(h as *const HeapCell)
}

/// Mint an additional reference; the caller keeps theirs.
pub(crate) unsafe fn clone_handle(h: *mut SableHandle) -> HeapRef {
    HeapRef::clone_raw(h as *const HeapCell)
}

/// Transient view of a caller-owned handle; never releases.
pub(crate) unsafe fn borrow_handle(h: *const SableHandle) -> BorrowedRef {
    HeapRef::borrow_raw(h as *const HeapCell)
}

// ============================================================================
// Value conversions
// ============================================================================

/// Engine value → owned ABI value (handle kinds are stolen).
pub(crate) fn own_out(value: Value) -> SableValue {
    let (kind, payload) = match value {
        Value::Undefined => (SableValueKind::Undefined, SableValuePayload { number: 0.0 }),
        Value::Null => (SableValueKind::Null, SableValuePayload { number: 0.0 }),
        Value::Bool(b) => (SableValueKind::Boolean, SableValuePayload { boolean: b }),
        Value::Number(n) => (SableValueKind::Number, SableValuePayload { number: n }),
        Value::Symbol(r) => (SableValueKind::Symbol, SableValuePayload { handle: steal(r) }),
        Value::BigInt(r) => (SableValueKind::BigInt, SableValuePayload { handle: steal(r) }),
        Value::String(r) => (SableValueKind::String, SableValuePayload { handle: steal(r) }),
        Value::Object(r) => (SableValueKind::Object, SableValuePayload { handle: steal(r) }),
    };
    SableValue { kind, payload }
}

/// Engine value → borrowed ABI value (no ownership transfer).
pub(crate) fn borrow_out(value: &Value) -> SableValue {
    let (kind, payload) = match value {
        Value::Undefined => (SableValueKind::Undefined, SableValuePayload { number: 0.0 }),
        Value::Null => (SableValueKind::Null, SableValuePayload { number: 0.0 }),
        Value::Bool(b) => (SableValueKind::Boolean, SableValuePayload { boolean: *b }),
        Value::Number(n) => (SableValueKind::Number, SableValuePayload { number: *n }),
        Value::Symbol(r) => (
            SableValueKind::Symbol,
            SableValuePayload { handle: handle_of(r) },
        ),
        Value::BigInt(r) => (
            SableValueKind::BigInt,
            SableValuePayload { handle: handle_of(r) },
        ),
        Value::String(r) => (
            SableValueKind::String,
            SableValuePayload { handle: handle_of(r) },
        ),
        Value::Object(r) => (
            SableValueKind::Object,
            SableValuePayload { handle: handle_of(r) },
        ),
    };
    SableValue { kind, payload }
}

/// ABI value → engine value, adopting the caller's reference.
pub(crate) unsafe fn own_in(v: &SableValue) -> Value {
    from_abi(v, |h| adopt(h))
}

/// ABI value → engine value, minting a fresh reference.
pub(crate) unsafe fn clone_in(v: &SableValue) -> Value {
    from_abi(v, |h| clone_handle(h))
}

unsafe fn from_abi(v: &SableValue, mut take: impl FnMut(*mut SableHandle) -> HeapRef) -> Value {
    let mut handle = |payload: &SableValuePayload| {
        let h = payload.handle;
        if h.is_null() {
            None
        } else {
            Some(take(h))
        }
    };
    match v.kind {
        SableValueKind::Undefined => Value::Undefined,
        SableValueKind::Null => Value::Null,
        SableValueKind::Boolean => Value::Bool(v.payload.boolean),
        SableValueKind::Number => Value::Number(v.payload.number),
        SableValueKind::Symbol => handle(&v.payload).map(Value::Symbol).unwrap_or(Value::Undefined),
        SableValueKind::BigInt => handle(&v.payload).map(Value::BigInt).unwrap_or(Value::Undefined),
        SableValueKind::String => handle(&v.payload).map(Value::String).unwrap_or(Value::Undefined),
        SableValueKind::Object => handle(&v.payload).map(Value::Object).unwrap_or(Value::Undefined),
    }
}

/// Borrowed view of an ABI value; dereferences to an engine value and
/// never releases anything on drop.
pub(crate) struct BorrowedValue(ManuallyDrop<Value>);

impl BorrowedValue {
    /// # Safety
    /// Any handle in `v` must stay live for the guard's lifetime.
    pub(crate) unsafe fn new(v: &SableValue) -> Self {
        // Reconstruct without touching the count, then suppress release.
        let value = from_abi(v, |h| HeapRef::from_raw(h as *const HeapCell));
        BorrowedValue(ManuallyDrop::new(value))
    }
}

impl Deref for BorrowedValue {
    type Target = Value;

    fn deref(&self) -> &Value {
        &self.0
    }
}

// ============================================================================
// extern "C" surface
// ============================================================================

/// The undefined value.
#[no_mangle]
pub extern "C" fn sable_value_undefined() -> SableValue {
    undefined()
}

/// The null value.
#[no_mangle]
pub extern "C" fn sable_value_null() -> SableValue {
    SableValue {
        kind: SableValueKind::Null,
        payload: SableValuePayload { number: 0.0 },
    }
}

/// A boolean value.
#[no_mangle]
pub extern "C" fn sable_value_bool(value: bool) -> SableValue {
    SableValue {
        kind: SableValueKind::Boolean,
        payload: SableValuePayload { boolean: value },
    }
}

/// A number value.
#[no_mangle]
pub extern "C" fn sable_value_number(value: f64) -> SableValue {
    SableValue {
        kind: SableValueKind::Number,
        payload: SableValuePayload { number: value },
    }
}

/// Wrap an owned string handle as a value. Consumes the handle: ownership
/// moves into the returned value.
#[no_mangle]
pub unsafe extern "C" fn sable_value_string(handle: *mut SableHandle) -> SableValue {
    SableValue {
        kind: SableValueKind::String,
        payload: SableValuePayload { handle },
    }
}

/// Wrap an owned object handle as a value. Consumes the handle.
#[no_mangle]
pub unsafe extern "C" fn sable_value_object(handle: *mut SableHandle) -> SableValue {
    SableValue {
        kind: SableValueKind::Object,
        payload: SableValuePayload { handle },
    }
}

/// Wrap an owned symbol handle as a value. Consumes the handle.
#[no_mangle]
pub unsafe extern "C" fn sable_value_symbol(handle: *mut SableHandle) -> SableValue {
    SableValue {
        kind: SableValueKind::Symbol,
        payload: SableValuePayload { handle },
    }
}

/// Wrap an owned bigint handle as a value. Consumes the handle.
#[no_mangle]
pub unsafe extern "C" fn sable_value_bigint(handle: *mut SableHandle) -> SableValue {
    SableValue {
        kind: SableValueKind::BigInt,
        payload: SableValuePayload { handle },
    }
}

/// Release an owned value. Handle kinds drop their reference and the
/// handle field is nulled; scalar kinds are a no-op. Safe to call on a
/// value that was already released this way.
///
/// # Safety
/// For handle kinds, the value must own its reference (not a borrowed
/// callback argument) and must not be used as an owner afterwards.
#[no_mangle]
pub unsafe extern "C" fn sable_value_release(value: *mut SableValue) {
    if value.is_null() {
        return;
    }
    let v = &mut *value;
    if matches!(
        v.kind,
        SableValueKind::Symbol | SableValueKind::BigInt | SableValueKind::String | SableValueKind::Object
    ) && !v.payload.handle.is_null()
    {
        drop(adopt(v.payload.handle));
        v.payload.handle = std::ptr::null_mut();
    }
}

/// Clone a borrowed value into a new owned value (handle kinds gain a
/// reference; scalars are copied).
///
/// # Safety
/// `value` must be a valid borrowed value for this runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_value_clone(
    _rt: *mut SableRuntime,
    value: *const SableValue,
) -> SableValue {
    if value.is_null() {
        return undefined();
    }
    own_out(clone_in(&*value))
}

/// Strict equality (scalars by value, strings/bigints by content,
/// symbols/objects by identity). Both values are borrowed.
///
/// # Safety
/// Both values must be valid for this runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_value_strict_equals(
    rt: *mut SableRuntime,
    a: *const SableValue,
    b: *const SableValue,
) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    let handle = rt_handle(rt);
    let va = BorrowedValue::new(&*a);
    let vb = BorrowedValue::new(&*b);
    handle.engine.strict_equals(&va, &vb)
}

/// String form of any value; returns an owned string handle, or null with
/// a pending error.
///
/// # Safety
/// `value` is borrowed and must be valid for this runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_value_to_string(
    rt: *mut SableRuntime,
    value: *const SableValue,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        let v = BorrowedValue::new(&*value);
        let text = handle.engine.to_display_string(&v)?;
        Ok(steal(handle.engine.create_string(&text)))
    })
}

/// Engine-assigned unique id of the referenced cell; 0 for scalar kinds.
///
/// # Safety
/// `value` is borrowed and must be valid.
#[no_mangle]
pub unsafe extern "C" fn sable_value_unique_id(value: *const SableValue) -> u64 {
    if value.is_null() {
        return 0;
    }
    let v = BorrowedValue::new(&*value);
    v.unique_id()
}

/// Mint an additional reference to a handle. The caller owns the result.
///
/// # Safety
/// `handle` must point at a live cell.
#[no_mangle]
pub unsafe extern "C" fn sable_handle_clone(handle: *mut SableHandle) -> *mut SableHandle {
    if handle.is_null() {
        return std::ptr::null_mut();
    }
    steal(clone_handle(handle))
}

/// Release one owned reference.
///
/// # Safety
/// `handle` must carry an owned reference; it must not be used as an
/// owner afterwards.
#[no_mangle]
pub unsafe extern "C" fn sable_handle_release(handle: *mut SableHandle) {
    if !handle.is_null() {
        drop(adopt(handle));
    }
}

/// Engine-assigned unique id of the cell behind a handle.
///
/// # Safety
/// `handle` must point at a live cell.
#[no_mangle]
pub unsafe extern "C" fn sable_handle_unique_id(handle: *const SableHandle) -> u64 {
    if handle.is_null() {
        return 0;
    }
    borrow_handle(handle).id()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_value_is_fixed_size() {
        // kind (u32, padded) + 8-byte payload
        assert_eq!(std::mem::size_of::<SableValue>(), 16);
        assert_eq!(std::mem::size_of::<SableValuePayload>(), 8);
    }

    #[test]
    fn scalar_constructors() {
        let b = sable_value_bool(true);
        assert_eq!(b.kind, SableValueKind::Boolean);
        assert!(unsafe { b.payload.boolean });

        let n = sable_value_number(6.5);
        assert_eq!(n.kind, SableValueKind::Number);
        assert_eq!(unsafe { n.payload.number }, 6.5);

        assert_eq!(sable_value_undefined().kind, SableValueKind::Undefined);
        assert_eq!(sable_value_null().kind, SableValueKind::Null);
    }

    #[test]
    fn release_is_idempotent_on_scalars_and_nulled_handles() {
        let mut n = sable_value_number(1.0);
        unsafe {
            sable_value_release(&mut n);
            sable_value_release(&mut n);
        }
        // A released handle kind is nulled, so a second release is a no-op.
        let engine = sable_core::Engine::new(sable_core::EngineOptions::default());
        let mut s = own_out(Value::String(engine.create_string("x")));
        unsafe {
            sable_value_release(&mut s);
            assert!(s.payload.handle.is_null());
            sable_value_release(&mut s);
        }
    }

    #[test]
    fn own_out_then_own_in_round_trips_without_leaking() {
        let engine = sable_core::Engine::new(sable_core::EngineOptions::default());
        let r = engine.create_string("round trip");
        let id = r.id();
        let probe = r.clone();
        assert_eq!(probe.strong_count(), 2);

        let abi = own_out(Value::String(r));
        assert_eq!(probe.strong_count(), 2); // stolen, not dropped
        let back = unsafe { own_in(&abi) };
        assert_eq!(back.unique_id(), id);
        drop(back);
        assert_eq!(probe.strong_count(), 1);
    }

    #[test]
    fn borrow_out_does_not_transfer() {
        let engine = sable_core::Engine::new(sable_core::EngineOptions::default());
        let v = Value::String(engine.create_string("borrowed"));
        let r = v.heap_ref().unwrap().clone();

        let abi = borrow_out(&v);
        assert_eq!(r.strong_count(), 2); // unchanged by borrow_out
        let guard = unsafe { BorrowedValue::new(&abi) };
        assert_eq!(guard.unique_id(), r.id());
        drop(guard);
        assert_eq!(r.strong_count(), 2); // guard released nothing
    }
}
