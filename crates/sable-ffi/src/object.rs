//! Objects: properties, prototypes, host objects, native state, weak refs

use std::any::Any;
use std::os::raw::c_void;
use std::rc::Rc;

use sable_core::{Engine, EngineResult, HeapRef, HostObject, Value};

use crate::error::guard;
use crate::primitives::free_propname_array;
use crate::value::{
    adopt, borrow_handle, borrow_out, handle_of, own_in, own_out, steal, undefined, BorrowedValue,
};
use crate::{
    SableFinalizer, SableHandle, SableHostObjectGetCallback, SableHostObjectNamesCallback,
    SableHostObjectSetCallback, SableRuntime, SableValue,
};

// ============================================================================
// Creation and prototypes
// ============================================================================

/// Create a plain object. Returns an owned handle.
///
/// # Safety
/// `rt` must be a valid runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_object_new(rt: *mut SableRuntime) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        Ok(steal(handle.engine.create_object()))
    })
}

/// Create an object with an explicit prototype (an object value or null).
///
/// # Safety
/// `prototype` is borrowed and must be valid for this runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_object_new_with_prototype(
    rt: *mut SableRuntime,
    prototype: *const SableValue,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        let proto = BorrowedValue::new(&*prototype);
        Ok(steal(handle.engine.create_object_with_prototype(&proto)?))
    })
}

/// The object's prototype: an owned object value, or null-kind when the
/// chain ends.
///
/// # Safety
/// `object` is a borrowed object handle.
#[no_mangle]
pub unsafe extern "C" fn sable_object_get_prototype(
    rt: *mut SableRuntime,
    object: *const SableHandle,
) -> SableValue {
    guard(rt, undefined(), |handle| {
        let o = borrow_handle(object);
        Ok(own_out(handle.engine.get_prototype(&o)?))
    })
}

/// Replace the object's prototype (an object value or null). Cycles are
/// rejected with a pending script error.
///
/// # Safety
/// `object` is a borrowed object handle; `prototype` a borrowed value.
#[no_mangle]
pub unsafe extern "C" fn sable_object_set_prototype(
    rt: *mut SableRuntime,
    object: *const SableHandle,
    prototype: *const SableValue,
) -> bool {
    guard(rt, false, |handle| {
        let o = borrow_handle(object);
        let proto = BorrowedValue::new(&*prototype);
        handle.engine.set_prototype(&o, &proto)?;
        Ok(true)
    })
}

// ============================================================================
// Properties (property-name keys)
// ============================================================================

unsafe fn propname_key(
    engine: &Engine,
    name: *const SableHandle,
) -> EngineResult<sable_core::PropKey> {
    let n = borrow_handle(name);
    engine.propname_key(&n)
}

/// Property read. Missing properties read as undefined. Returns an owned
/// value.
///
/// # Safety
/// `object` and `name` are borrowed handles for this runtime.
#[no_mangle]
pub unsafe extern "C" fn sable_object_get(
    rt: *mut SableRuntime,
    object: *const SableHandle,
    name: *const SableHandle,
) -> SableValue {
    guard(rt, undefined(), |handle| {
        let o = borrow_handle(object);
        let key = propname_key(&handle.engine, name)?;
        Ok(own_out(handle.engine.get_property(&o, &key)?))
    })
}

/// Property write. `value` is borrowed; the engine stores its own clone.
///
/// # Safety
/// `object` and `name` are borrowed handles; `value` a borrowed value.
#[no_mangle]
pub unsafe extern "C" fn sable_object_set(
    rt: *mut SableRuntime,
    object: *const SableHandle,
    name: *const SableHandle,
    value: *const SableValue,
) -> bool {
    guard(rt, false, |handle| {
        let o = borrow_handle(object);
        let key = propname_key(&handle.engine, name)?;
        let v = BorrowedValue::new(&*value);
        handle.engine.set_property(&o, key, &v)?;
        Ok(true)
    })
}

/// Property presence, own or inherited.
///
/// # Safety
/// `object` and `name` are borrowed handles.
#[no_mangle]
pub unsafe extern "C" fn sable_object_has(
    rt: *mut SableRuntime,
    object: *const SableHandle,
    name: *const SableHandle,
) -> bool {
    guard(rt, false, |handle| {
        let o = borrow_handle(object);
        let key = propname_key(&handle.engine, name)?;
        handle.engine.has_property(&o, &key)
    })
}

/// Remove an own property; true if it existed.
///
/// # Safety
/// `object` and `name` are borrowed handles.
#[no_mangle]
pub unsafe extern "C" fn sable_object_delete(
    rt: *mut SableRuntime,
    object: *const SableHandle,
    name: *const SableHandle,
) -> bool {
    guard(rt, false, |handle| {
        let o = borrow_handle(object);
        let key = propname_key(&handle.engine, name)?;
        handle.engine.delete_property(&o, &key)
    })
}

// ============================================================================
// Properties (computed value keys)
// ============================================================================

/// Property read with a computed key (string/symbol directly; anything
/// else through its string form).
///
/// # Safety
/// `object` is a borrowed handle; `key` a borrowed value.
#[no_mangle]
pub unsafe extern "C" fn sable_object_get_by_value(
    rt: *mut SableRuntime,
    object: *const SableHandle,
    key: *const SableValue,
) -> SableValue {
    guard(rt, undefined(), |handle| {
        let o = borrow_handle(object);
        let k = BorrowedValue::new(&*key);
        let key = handle.engine.prop_key_from_value(&k)?;
        Ok(own_out(handle.engine.get_property(&o, &key)?))
    })
}

/// Property write with a computed key.
///
/// # Safety
/// `object` is a borrowed handle; `key` and `value` are borrowed values.
#[no_mangle]
pub unsafe extern "C" fn sable_object_set_by_value(
    rt: *mut SableRuntime,
    object: *const SableHandle,
    key: *const SableValue,
    value: *const SableValue,
) -> bool {
    guard(rt, false, |handle| {
        let o = borrow_handle(object);
        let k = BorrowedValue::new(&*key);
        let key = handle.engine.prop_key_from_value(&k)?;
        let v = BorrowedValue::new(&*value);
        handle.engine.set_property(&o, key, &v)?;
        Ok(true)
    })
}

/// Property presence with a computed key.
///
/// # Safety
/// `object` is a borrowed handle; `key` a borrowed value.
#[no_mangle]
pub unsafe extern "C" fn sable_object_has_by_value(
    rt: *mut SableRuntime,
    object: *const SableHandle,
    key: *const SableValue,
) -> bool {
    guard(rt, false, |handle| {
        let o = borrow_handle(object);
        let k = BorrowedValue::new(&*key);
        let key = handle.engine.prop_key_from_value(&k)?;
        handle.engine.has_property(&o, &key)
    })
}

/// Enumerable property names as an owned array-of-strings handle.
///
/// # Safety
/// `object` is a borrowed object handle.
#[no_mangle]
pub unsafe extern "C" fn sable_object_get_property_names(
    rt: *mut SableRuntime,
    object: *const SableHandle,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        let o = borrow_handle(object);
        let names = handle.engine.property_names(&o)?;
        Ok(steal(handle.engine.create_array_from(names)))
    })
}

// ============================================================================
// Predicates and identity
// ============================================================================

/// Is this object a dense array?
///
/// # Safety
/// `object` is a borrowed handle.
#[no_mangle]
pub unsafe extern "C" fn sable_object_is_array(
    _rt: *mut SableRuntime,
    object: *const SableHandle,
) -> bool {
    let o = borrow_handle(object);
    matches!(o.cell().data(), sable_core::CellData::Object(oc)
        if matches!(oc.kind(), sable_core::ObjectKind::Array(_)))
}

/// Is this object a byte buffer?
///
/// # Safety
/// `object` is a borrowed handle.
#[no_mangle]
pub unsafe extern "C" fn sable_object_is_buffer(
    _rt: *mut SableRuntime,
    object: *const SableHandle,
) -> bool {
    let o = borrow_handle(object);
    matches!(o.cell().data(), sable_core::CellData::Object(oc)
        if matches!(oc.kind(), sable_core::ObjectKind::Buffer(_)))
}

/// Is this object callable?
///
/// # Safety
/// `object` is a borrowed handle.
#[no_mangle]
pub unsafe extern "C" fn sable_object_is_function(
    _rt: *mut SableRuntime,
    object: *const SableHandle,
) -> bool {
    let o = borrow_handle(object);
    matches!(o.cell().data(), sable_core::CellData::Object(oc)
        if matches!(oc.kind(), sable_core::ObjectKind::Function(_)))
}

/// Is this object host-delegated?
///
/// # Safety
/// `object` is a borrowed handle.
#[no_mangle]
pub unsafe extern "C" fn sable_object_is_host(
    _rt: *mut SableRuntime,
    object: *const SableHandle,
) -> bool {
    let o = borrow_handle(object);
    matches!(o.cell().data(), sable_core::CellData::Object(oc)
        if matches!(oc.kind(), sable_core::ObjectKind::Host(_)))
}

/// Object identity equality.
///
/// # Safety
/// Both handles are borrowed object handles.
#[no_mangle]
pub unsafe extern "C" fn sable_object_strict_equals(
    _rt: *mut SableRuntime,
    a: *const SableHandle,
    b: *const SableHandle,
) -> bool {
    let (a, b) = (borrow_handle(a), borrow_handle(b));
    a.ptr_eq(&b)
}

/// `instanceof`: does the constructor's `prototype` property appear in
/// the object's prototype chain?
///
/// # Safety
/// `object` and `constructor` are borrowed handles.
#[no_mangle]
pub unsafe extern "C" fn sable_object_instance_of(
    rt: *mut SableRuntime,
    object: *const SableHandle,
    constructor: *const SableHandle,
) -> bool {
    guard(rt, false, |handle| {
        let o = borrow_handle(object);
        let c = borrow_handle(constructor);
        handle.engine.instance_of(&o, &c)
    })
}

/// Record an advisory external-memory amount for the object. Failures
/// (non-object handle) land on the error channel.
///
/// # Safety
/// `object` is a borrowed handle.
#[no_mangle]
pub unsafe extern "C" fn sable_object_set_external_memory_hint(
    rt: *mut SableRuntime,
    object: *const SableHandle,
    bytes: usize,
) {
    guard(rt, (), |handle| {
        let o = borrow_handle(object);
        handle.engine.set_external_memory_hint(&o, bytes)
    })
}

// ============================================================================
// Native state
// ============================================================================

// Native state attachment as stored in the engine: the raw pointer plus
// its finalizer, torn down exactly once.
struct CNativeState {
    data: *mut c_void,
    finalizer: Option<SableFinalizer>,
}

impl Drop for CNativeState {
    fn drop(&mut self) {
        if let Some(finalizer) = self.finalizer {
            if !self.data.is_null() {
                unsafe { finalizer(self.data) }
            }
        }
    }
}

/// Attach native state (an opaque pointer plus finalizer) to an object.
/// Replacing an existing attachment detaches it, running its finalizer.
/// The new finalizer runs exactly once: at detachment or when the object
/// cell is reclaimed, whichever comes first; it is skipped when `data` is
/// null.
///
/// # Safety
/// `object` is a borrowed object handle; `data` must stay valid until the
/// finalizer runs.
#[no_mangle]
pub unsafe extern "C" fn sable_object_set_native_state(
    rt: *mut SableRuntime,
    object: *const SableHandle,
    data: *mut c_void,
    finalizer: Option<SableFinalizer>,
) -> bool {
    guard(rt, false, |handle| {
        let o = borrow_handle(object);
        handle
            .engine
            .set_native_state(&o, Some(Rc::new(CNativeState { data, finalizer })))?;
        Ok(true)
    })
}

/// Is native state attached?
///
/// # Safety
/// `object` is a borrowed object handle.
#[no_mangle]
pub unsafe extern "C" fn sable_object_has_native_state(
    rt: *mut SableRuntime,
    object: *const SableHandle,
) -> bool {
    guard(rt, false, |handle| {
        let o = borrow_handle(object);
        Ok(handle.engine.native_state(&o)?.is_some())
    })
}

/// The attached data pointer (informational; no ownership transfer), or
/// null when nothing is attached.
///
/// # Safety
/// `object` is a borrowed object handle.
#[no_mangle]
pub unsafe extern "C" fn sable_object_get_native_state(
    rt: *mut SableRuntime,
    object: *const SableHandle,
) -> *mut c_void {
    guard(rt, std::ptr::null_mut(), |handle| {
        let o = borrow_handle(object);
        Ok(handle
            .engine
            .native_state(&o)?
            .as_deref()
            .and_then(|state| state.downcast_ref::<CNativeState>())
            .map(|state| state.data)
            .unwrap_or(std::ptr::null_mut()))
    })
}

/// Explicitly detach native state, running its finalizer now. A no-op
/// when nothing is attached.
///
/// # Safety
/// `object` is a borrowed object handle.
#[no_mangle]
pub unsafe extern "C" fn sable_object_clear_native_state(
    rt: *mut SableRuntime,
    object: *const SableHandle,
) -> bool {
    guard(rt, false, |handle| {
        let o = borrow_handle(object);
        handle.engine.set_native_state(&o, None)?;
        Ok(true)
    })
}

// ============================================================================
// Host objects
// ============================================================================

// Bridges the C callback triple+2 into the engine's HostObject hook.
// Shared ownership with the engine's object graph; dropped (and the
// finalizer run) when the wrapping cell is reclaimed.
struct HostObjectBridge {
    rt: *mut SableRuntime,
    get_cb: Option<SableHostObjectGetCallback>,
    set_cb: Option<SableHostObjectSetCallback>,
    names_cb: Option<SableHostObjectNamesCallback>,
    user_data: *mut c_void,
    finalizer: Option<SableFinalizer>,
}

impl Drop for HostObjectBridge {
    fn drop(&mut self) {
        if let Some(finalizer) = self.finalizer {
            if !self.user_data.is_null() {
                unsafe { finalizer(self.user_data) }
            }
        }
    }
}

impl HostObject for HostObjectBridge {
    fn get(&self, _engine: &Engine, name: &HeapRef) -> EngineResult<Value> {
        match self.get_cb {
            // The callback returns an OWNED value; adopt it with no extra
            // clone. The name handle is only borrowed.
            Some(cb) => {
                let result = unsafe { cb(self.rt, handle_of(name), self.user_data) };
                Ok(unsafe { own_in(&result) })
            }
            None => Ok(Value::Undefined),
        }
    }

    fn set(&self, _engine: &Engine, name: &HeapRef, value: &Value) -> EngineResult<()> {
        if let Some(cb) = self.set_cb {
            let borrowed = borrow_out(value);
            unsafe { cb(self.rt, handle_of(name), &borrowed, self.user_data) };
        }
        Ok(())
    }

    fn property_names(&self, _engine: &Engine) -> EngineResult<Vec<HeapRef>> {
        let Some(cb) = self.names_cb else {
            return Ok(Vec::new());
        };
        let mut count = 0usize;
        let array = unsafe { cb(self.rt, &mut count, self.user_data) };
        if array.is_null() {
            return Ok(Vec::new());
        }
        // Two transfers: adopt each owned element, then free the backing
        // array — never conflate the two.
        let mut names = Vec::with_capacity(count);
        unsafe {
            for i in 0..count {
                let element = *array.add(i);
                if !element.is_null() {
                    names.push(adopt(element));
                }
            }
            free_propname_array(array, count);
        }
        Ok(names)
    }
}

/// Create a host-delegated object from a callback triple plus user data
/// and finalizer. Returns an owned handle; engine-side the object is
/// indistinguishable from any other object. The finalizer runs exactly
/// once when the cell is reclaimed, and is skipped when `user_data` is
/// null.
///
/// # Safety
/// The callbacks must follow the documented ownership rules and must not
/// unwind; `user_data` must stay valid until the finalizer runs.
#[no_mangle]
pub unsafe extern "C" fn sable_object_new_host(
    rt: *mut SableRuntime,
    get_cb: Option<SableHostObjectGetCallback>,
    set_cb: Option<SableHostObjectSetCallback>,
    names_cb: Option<SableHostObjectNamesCallback>,
    user_data: *mut c_void,
    finalizer: Option<SableFinalizer>,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        let bridge = HostObjectBridge {
            rt,
            get_cb,
            set_cb,
            names_cb,
            user_data,
            finalizer,
        };
        Ok(steal(handle.engine.create_host_object(Rc::new(bridge))))
    })
}

/// The user-data pointer a host object was registered with, or null for
/// non-host objects.
///
/// # Safety
/// `object` is a borrowed object handle.
#[no_mangle]
pub unsafe extern "C" fn sable_object_get_host_data(
    rt: *mut SableRuntime,
    object: *const SableHandle,
) -> *mut c_void {
    guard(rt, std::ptr::null_mut(), |handle| {
        let o = borrow_handle(object);
        let Some(host) = handle.engine.host_object(&o)? else {
            return Ok(std::ptr::null_mut());
        };
        let any: Rc<dyn Any> = host;
        Ok(any
            .downcast_ref::<HostObjectBridge>()
            .map(|bridge| bridge.user_data)
            .unwrap_or(std::ptr::null_mut()))
    })
}

// ============================================================================
// Weak references
// ============================================================================

/// Create a weak reference to an object. Returns an owned handle.
///
/// # Safety
/// `object` is a borrowed object handle.
#[no_mangle]
pub unsafe extern "C" fn sable_weak_new(
    rt: *mut SableRuntime,
    object: *const SableHandle,
) -> *mut SableHandle {
    guard(rt, std::ptr::null_mut(), |handle| {
        let o = borrow_handle(object);
        Ok(steal(handle.engine.create_weak(&o)?))
    })
}

/// Upgrade a weak reference: an owned object value, or undefined once the
/// referent has been reclaimed.
///
/// # Safety
/// `weak` is a borrowed weak-reference handle.
#[no_mangle]
pub unsafe extern "C" fn sable_weak_lock(
    rt: *mut SableRuntime,
    weak: *const SableHandle,
) -> SableValue {
    guard(rt, undefined(), |handle| {
        let w = borrow_handle(weak);
        Ok(own_out(handle.engine.weak_lock(&w)?))
    })
}
