//! The engine: a reference-counted value heap with host hooks
//!
//! One [`Engine`] instance is single-threaded and non-reentrant: it runs at
//! most one operation at a time, to completion, and host callbacks it
//! invokes run synchronously on the same call stack. The one exception is
//! the interrupt flag, which may be set from any thread via the handle
//! returned by [`Engine::interrupt_handle`]; the engine observes it at call
//! entry and between microtasks.
//!
//! Lifetime is pure reference counting. There is no cycle collector;
//! embedders that build reference cycles keep them alive themselves.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

use crate::error::{EngineError, EngineResult};
use crate::hooks;
use crate::json;
use crate::module::PreparedScript;
use crate::object::{FunctionCell, HostFn, HostObject, ObjectCell, ObjectKind};
use crate::value::{strict_equals, CellData, HeapRef, PropKey, Value};

static DESCRIPTION: Lazy<String> =
    Lazy::new(|| format!("sable-core (reference-counted engine) v{}", env!("CARGO_PKG_VERSION")));

const PROTO_CHAIN_LIMIT: usize = 128;
const DISPLAY_DEPTH_LIMIT: usize = 8;

/// Engine construction options.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Maintain a microtask queue; when false, queue and drain operations
    /// fail with [`EngineError::MicrotasksDisabled`].
    pub microtask_queue: bool,
    /// Nested call budget; exceeding it fails the call with
    /// [`EngineError::CallDepthExceeded`].
    pub max_call_depth: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            microtask_queue: true,
            max_call_depth: 64,
        }
    }
}

struct ScopeFrame {
    id: u64,
    roots: Vec<HeapRef>,
}

// Reset-on-drop guards: the boundary layer catches panics, so per-call
// engine state has to unwind back even when a host callback blows up.
struct FlagReset<'a>(&'a Cell<bool>);

impl Drop for FlagReset<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

struct DepthReset<'a>(&'a Cell<u32>, u32);

impl Drop for DepthReset<'_> {
    fn drop(&mut self) {
        self.0.set(self.1);
    }
}

/// A single engine instance.
pub struct Engine {
    options: EngineOptions,
    global: HeapRef,
    microtasks: RefCell<VecDeque<Value>>,
    draining: Cell<bool>,
    call_depth: Cell<u32>,
    interrupt: Arc<AtomicBool>,
    scopes: RefCell<Vec<ScopeFrame>>,
    next_scope: Cell<u64>,
    interned: RefCell<FxHashSet<Rc<str>>>,
}

impl Engine {
    /// Create an engine with the given options.
    pub fn new(options: EngineOptions) -> Self {
        Engine {
            options,
            global: HeapRef::new(CellData::Object(ObjectCell::new(ObjectKind::Plain))),
            microtasks: RefCell::new(VecDeque::new()),
            draining: Cell::new(false),
            call_depth: Cell::new(0),
            interrupt: Arc::new(AtomicBool::new(false)),
            scopes: RefCell::new(Vec::new()),
            next_scope: Cell::new(1),
            interned: RefCell::new(FxHashSet::default()),
        }
    }

    /// Deduplicated shared string for property keys.
    pub(crate) fn intern(&self, s: &str) -> Rc<str> {
        let mut set = self.interned.borrow_mut();
        if let Some(existing) = set.get(s) {
            return existing.clone();
        }
        let rc: Rc<str> = s.into();
        set.insert(rc.clone());
        rc
    }

    /// Construction options.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Shared interrupt flag. Storing `true` from any thread makes the
    /// next interrupt check on the owning thread fail with
    /// [`EngineError::Interrupted`]; the flag is consumed by that check,
    /// so repeated stores before it are coalesced.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Consume a pending interrupt, if any.
    pub fn check_interrupt(&self) -> EngineResult<()> {
        if self.interrupt.swap(false, Ordering::SeqCst) {
            Err(EngineError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// The global object (a fresh strong reference).
    pub fn global(&self) -> HeapRef {
        self.global.clone()
    }

    /// Human-readable engine description.
    pub fn description(&self) -> &str {
        &DESCRIPTION
    }

    /// Whether a debugger can attach. Always false for this engine.
    pub fn is_inspectable(&self) -> bool {
        false
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocate a cell, pinning it in the innermost scope if one is open.
    fn alloc(&self, data: CellData) -> HeapRef {
        let r = HeapRef::new(data);
        if let Some(top) = self.scopes.borrow_mut().last_mut() {
            top.roots.push(r.clone());
        }
        r
    }

    /// Allocate a string cell.
    pub fn create_string(&self, s: &str) -> HeapRef {
        self.alloc(CellData::Str(s.into()))
    }

    /// Allocate a symbol cell with a description.
    pub fn create_symbol(&self, description: &str) -> HeapRef {
        self.alloc(CellData::Symbol(description.into()))
    }

    /// Allocate a bigint cell.
    pub fn create_bigint(&self, v: i128) -> HeapRef {
        self.alloc(CellData::BigInt(v))
    }

    /// Allocate a property-name cell.
    pub fn create_propname(&self, key: PropKey) -> HeapRef {
        self.alloc(CellData::PropName(key))
    }

    /// Property name for a string key.
    pub fn propname_from_str(&self, s: &str) -> HeapRef {
        let key = PropKey::Str(self.intern(s));
        self.create_propname(key)
    }

    /// Property name backed by a string cell.
    pub fn propname_from_string_cell(&self, s: &HeapRef) -> EngineResult<HeapRef> {
        let key = PropKey::Str(self.intern(self.string_text(s)?));
        Ok(self.create_propname(key))
    }

    /// Property name backed by a symbol cell.
    pub fn propname_from_symbol(&self, sym: &HeapRef) -> EngineResult<HeapRef> {
        match sym.cell().data() {
            CellData::Symbol(_) => Ok(self.create_propname(PropKey::Symbol(sym.clone()))),
            _ => Err(self.expected("symbol", sym)),
        }
    }

    /// Allocate a plain object.
    pub fn create_object(&self) -> HeapRef {
        self.alloc(CellData::Object(ObjectCell::new(ObjectKind::Plain)))
    }

    /// Allocate an object with an explicit prototype (object or null).
    pub fn create_object_with_prototype(&self, proto: &Value) -> EngineResult<HeapRef> {
        let obj = self.create_object();
        self.set_prototype(&obj, proto)?;
        Ok(obj)
    }

    /// Allocate a dense array of `len` undefined slots.
    pub fn create_array(&self, len: usize) -> HeapRef {
        self.alloc(CellData::Object(ObjectCell::new(ObjectKind::Array(
            RefCell::new(vec![Value::Undefined; len]),
        ))))
    }

    /// Allocate an array holding the given values.
    pub fn create_array_from(&self, values: Vec<Value>) -> HeapRef {
        self.alloc(CellData::Object(ObjectCell::new(ObjectKind::Array(
            RefCell::new(values),
        ))))
    }

    /// Allocate a zero-filled byte buffer.
    pub fn create_buffer(&self, size: usize) -> HeapRef {
        self.alloc(CellData::Object(ObjectCell::new(ObjectKind::Buffer(
            RefCell::new(vec![0u8; size].into_boxed_slice()),
        ))))
    }

    /// Allocate a host-backed function object.
    pub fn create_function(&self, name: &str, param_count: u32, callable: HostFn) -> HeapRef {
        self.alloc(CellData::Object(ObjectCell::new(ObjectKind::Function(
            FunctionCell {
                name: name.into(),
                param_count,
                callable,
            },
        ))))
    }

    /// Allocate a host-delegated object.
    pub fn create_host_object(&self, host: Rc<dyn HostObject>) -> HeapRef {
        self.alloc(CellData::Object(ObjectCell::new(ObjectKind::Host(host))))
    }

    /// Allocate a weak reference to an object.
    pub fn create_weak(&self, obj: &HeapRef) -> EngineResult<HeapRef> {
        self.expect_object(obj)?;
        Ok(self.alloc(CellData::WeakRef(obj.downgrade())))
    }

    /// Upgrade a weak reference: the object, or undefined once reclaimed.
    pub fn weak_lock(&self, weak: &HeapRef) -> EngineResult<Value> {
        match weak.cell().data() {
            CellData::WeakRef(w) => Ok(w
                .upgrade()
                .map(|rc| Value::Object(HeapRef::from_rc(rc)))
                .unwrap_or(Value::Undefined)),
            _ => Err(self.expected("weakref", weak)),
        }
    }

    // ------------------------------------------------------------------
    // Cell readers
    // ------------------------------------------------------------------

    /// The text of a string cell.
    pub fn string_text<'a>(&self, s: &'a HeapRef) -> EngineResult<&'a str> {
        match s.cell().data() {
            CellData::Str(text) => Ok(text),
            _ => Err(self.expected("string", s)),
        }
    }

    /// The description of a symbol cell.
    pub fn symbol_description<'a>(&self, sym: &'a HeapRef) -> EngineResult<&'a str> {
        match sym.cell().data() {
            CellData::Symbol(desc) => Ok(desc),
            _ => Err(self.expected("symbol", sym)),
        }
    }

    /// The integer behind a bigint cell.
    pub fn bigint_value(&self, bi: &HeapRef) -> EngineResult<i128> {
        match bi.cell().data() {
            CellData::BigInt(v) => Ok(*v),
            _ => Err(self.expected("bigint", bi)),
        }
    }

    /// Digit string of a bigint in the given radix (2..=36).
    pub fn bigint_to_string(&self, bi: &HeapRef, radix: u32) -> EngineResult<String> {
        if !(2..=36).contains(&radix) {
            return Err(EngineError::Fault(format!(
                "invalid radix {radix}; expected 2..=36"
            )));
        }
        let v = self.bigint_value(bi)?;
        if v == 0 {
            return Ok("0".to_string());
        }
        const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let mut magnitude = v.unsigned_abs();
        let mut out = Vec::new();
        while magnitude > 0 {
            out.push(DIGITS[(magnitude % radix as u128) as usize]);
            magnitude /= radix as u128;
        }
        if v < 0 {
            out.push(b'-');
        }
        out.reverse();
        Ok(String::from_utf8(out).unwrap_or_default())
    }

    /// The key behind a property-name cell.
    pub fn propname_key(&self, name: &HeapRef) -> EngineResult<PropKey> {
        match name.cell().data() {
            CellData::PropName(key) => Ok(key.clone()),
            _ => Err(self.expected("propname", name)),
        }
    }

    /// Readable text of a property name (symbol keys use the description).
    pub fn propname_text(&self, name: &HeapRef) -> EngineResult<String> {
        match self.propname_key(name)? {
            PropKey::Str(s) => Ok(s.to_string()),
            PropKey::Symbol(sym) => Ok(self.symbol_description(&sym)?.to_string()),
        }
    }

    /// Property-name equality (string keys by content, symbols by identity).
    pub fn propname_equals(&self, a: &HeapRef, b: &HeapRef) -> EngineResult<bool> {
        Ok(self.propname_key(a)? == self.propname_key(b)?)
    }

    /// The object cell behind a reference, if it is an object.
    pub fn object_cell<'a>(&self, r: &'a HeapRef) -> Option<&'a ObjectCell> {
        match r.cell().data() {
            CellData::Object(oc) => Some(oc),
            _ => None,
        }
    }

    fn expect_object<'a>(&self, r: &'a HeapRef) -> EngineResult<&'a ObjectCell> {
        self.object_cell(r).ok_or_else(|| self.expected("object", r))
    }

    /// The array slot vector behind a reference, if it is an array.
    pub fn array_slots<'a>(&self, r: &'a HeapRef) -> Option<&'a RefCell<Vec<Value>>> {
        match self.object_cell(r).map(ObjectCell::kind) {
            Some(ObjectKind::Array(slots)) => Some(slots),
            _ => None,
        }
    }

    fn expected(&self, expected: &'static str, got: &HeapRef) -> EngineError {
        EngineError::TypeMismatch {
            expected,
            got: got.cell().kind_name(),
        }
    }

    // ------------------------------------------------------------------
    // Kind predicates
    // ------------------------------------------------------------------

    /// Is this reference a dense array?
    pub fn is_array(&self, r: &HeapRef) -> bool {
        matches!(
            self.object_cell(r).map(ObjectCell::kind),
            Some(ObjectKind::Array(_))
        )
    }

    /// Is this reference a byte buffer?
    pub fn is_buffer(&self, r: &HeapRef) -> bool {
        matches!(
            self.object_cell(r).map(ObjectCell::kind),
            Some(ObjectKind::Buffer(_))
        )
    }

    /// Is this reference callable?
    pub fn is_function(&self, r: &HeapRef) -> bool {
        matches!(
            self.object_cell(r).map(ObjectCell::kind),
            Some(ObjectKind::Function(_))
        )
    }

    /// Is this reference host-delegated?
    pub fn is_host_object(&self, r: &HeapRef) -> bool {
        matches!(
            self.object_cell(r).map(ObjectCell::kind),
            Some(ObjectKind::Host(_))
        )
    }

    /// The host adapter behind a host object.
    pub fn host_object(&self, r: &HeapRef) -> EngineResult<Option<Rc<dyn HostObject>>> {
        Ok(match self.expect_object(r)?.kind() {
            ObjectKind::Host(h) => Some(h.clone()),
            _ => None,
        })
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    /// Property key derived from a value (strings and symbols directly,
    /// everything else through its string form).
    pub fn prop_key_from_value(&self, key: &Value) -> EngineResult<PropKey> {
        match key {
            Value::String(s) => Ok(PropKey::Str(self.intern(self.string_text(s)?))),
            Value::Symbol(sym) => Ok(PropKey::Symbol(sym.clone())),
            other => Ok(PropKey::Str(self.intern(&self.to_display_string(other)?))),
        }
    }

    /// Property read: host dispatch, array `length`, then the own-property
    /// table and the prototype chain. Missing properties are undefined.
    pub fn get_property(&self, obj: &HeapRef, key: &PropKey) -> EngineResult<Value> {
        let oc = self.expect_object(obj)?;
        if let ObjectKind::Host(h) = oc.kind() {
            let host = h.clone();
            let name = self.create_propname(key.clone());
            return host.get(self, &name);
        }
        if let ObjectKind::Array(slots) = oc.kind() {
            if key.as_str() == Some("length") {
                return Ok(Value::Number(slots.borrow().len() as f64));
            }
        }
        let mut current = obj.clone();
        for _ in 0..PROTO_CHAIN_LIMIT {
            let next = {
                let oc = self.expect_object(&current)?;
                if let Some(v) = oc.get_own(key) {
                    return Ok(v);
                }
                oc.prototype()
            };
            match next {
                Some(proto) => current = proto,
                None => return Ok(Value::Undefined),
            }
        }
        Err(self.throw_error("TypeError", "prototype chain too deep"))
    }

    /// Property write. The value is borrowed; the engine stores its own
    /// clone.
    pub fn set_property(&self, obj: &HeapRef, key: PropKey, value: &Value) -> EngineResult<()> {
        let oc = self.expect_object(obj)?;
        if let ObjectKind::Host(h) = oc.kind() {
            let host = h.clone();
            let name = self.create_propname(key);
            return host.set(self, &name, value);
        }
        oc.set_own(key, value.clone());
        Ok(())
    }

    /// Property presence, own or inherited.
    pub fn has_property(&self, obj: &HeapRef, key: &PropKey) -> EngineResult<bool> {
        let oc = self.expect_object(obj)?;
        if matches!(oc.kind(), ObjectKind::Host(_)) {
            return Ok(!matches!(self.get_property(obj, key)?, Value::Undefined));
        }
        let mut current = obj.clone();
        for _ in 0..PROTO_CHAIN_LIMIT {
            let next = {
                let oc = self.expect_object(&current)?;
                if oc.get_own(key).is_some() {
                    return Ok(true);
                }
                oc.prototype()
            };
            match next {
                Some(proto) => current = proto,
                None => return Ok(false),
            }
        }
        Err(self.throw_error("TypeError", "prototype chain too deep"))
    }

    /// Own-property removal; true if the property existed.
    pub fn delete_property(&self, obj: &HeapRef, key: &PropKey) -> EngineResult<bool> {
        let oc = self.expect_object(obj)?;
        if matches!(oc.kind(), ObjectKind::Host(_)) {
            return Err(self.throw_error("TypeError", "cannot delete from a host object"));
        }
        Ok(oc.delete_own(key))
    }

    /// Enumerable property names as string values, insertion-ordered.
    /// Host objects are asked; arrays report indices first.
    pub fn property_names(&self, obj: &HeapRef) -> EngineResult<Vec<Value>> {
        let oc = self.expect_object(obj)?;
        let mut out = Vec::new();
        match oc.kind() {
            ObjectKind::Host(h) => {
                let host = h.clone();
                for name in host.property_names(self)? {
                    if let PropKey::Str(s) = self.propname_key(&name)? {
                        out.push(Value::String(self.create_string(&s)));
                    }
                }
            }
            ObjectKind::Array(slots) => {
                let len = slots.borrow().len();
                for i in 0..len {
                    out.push(Value::String(self.create_string(&i.to_string())));
                }
                for key in oc.own_string_keys() {
                    out.push(Value::String(self.create_string(&key)));
                }
            }
            _ => {
                for key in oc.own_string_keys() {
                    out.push(Value::String(self.create_string(&key)));
                }
            }
        }
        Ok(out)
    }

    /// Current prototype: an object value or null.
    pub fn get_prototype(&self, obj: &HeapRef) -> EngineResult<Value> {
        Ok(match self.expect_object(obj)?.prototype() {
            Some(proto) => Value::Object(proto),
            None => Value::Null,
        })
    }

    /// Replace the prototype (object or null). Cycles are rejected with a
    /// thrown TypeError.
    pub fn set_prototype(&self, obj: &HeapRef, proto: &Value) -> EngineResult<()> {
        let oc = self.expect_object(obj)?;
        let new_proto = match proto {
            Value::Null => None,
            Value::Object(p) => Some(p.clone()),
            other => {
                return Err(EngineError::TypeMismatch {
                    expected: "object or null",
                    got: other.kind_name(),
                })
            }
        };
        if let Some(start) = &new_proto {
            let mut cursor = Some(start.clone());
            while let Some(c) = cursor {
                if c.ptr_eq(obj) {
                    return Err(self.throw_error("TypeError", "cyclic prototype chain"));
                }
                cursor = self.expect_object(&c)?.prototype();
            }
        }
        oc.set_prototype(new_proto);
        Ok(())
    }

    /// `instanceof`: walk the object's prototype chain looking for the
    /// constructor's `prototype` property.
    pub fn instance_of(&self, obj: &HeapRef, ctor: &HeapRef) -> EngineResult<bool> {
        if !self.is_function(ctor) {
            return Err(self.throw_error(
                "TypeError",
                "right-hand side of instanceof is not callable",
            ));
        }
        let target = match self.get_property(ctor, &PropKey::Str("prototype".into()))? {
            Value::Object(p) => p,
            _ => return Ok(false),
        };
        let mut cursor = self.expect_object(obj)?.prototype();
        while let Some(proto) = cursor {
            if proto.ptr_eq(&target) {
                return Ok(true);
            }
            cursor = self.expect_object(&proto)?.prototype();
        }
        Ok(false)
    }

    /// Record an advisory external-memory amount on an object.
    pub fn set_external_memory_hint(&self, obj: &HeapRef, bytes: usize) -> EngineResult<()> {
        self.expect_object(obj)?.set_external_bytes(bytes);
        Ok(())
    }

    /// Attach native state (replacing and thereby detaching any previous
    /// attachment), or detach with `None`.
    pub fn set_native_state(&self, obj: &HeapRef, state: Option<Rc<dyn Any>>) -> EngineResult<()> {
        self.expect_object(obj)?.set_native_state(state);
        Ok(())
    }

    /// Currently attached native state.
    pub fn native_state(&self, obj: &HeapRef) -> EngineResult<Option<Rc<dyn Any>>> {
        Ok(self.expect_object(obj)?.native_state())
    }

    // ------------------------------------------------------------------
    // Arrays and buffers
    // ------------------------------------------------------------------

    /// Array element count.
    pub fn array_len(&self, arr: &HeapRef) -> EngineResult<usize> {
        match self.array_slots(arr) {
            Some(slots) => Ok(slots.borrow().len()),
            None => Err(self.expected("array", arr)),
        }
    }

    /// Indexed read; out of range reads as undefined.
    pub fn array_get(&self, arr: &HeapRef, index: usize) -> EngineResult<Value> {
        match self.array_slots(arr) {
            Some(slots) => Ok(slots
                .borrow()
                .get(index)
                .cloned()
                .unwrap_or(Value::Undefined)),
            None => Err(self.expected("array", arr)),
        }
    }

    /// Indexed write; out of range throws a RangeError.
    pub fn array_set(&self, arr: &HeapRef, index: usize, value: &Value) -> EngineResult<()> {
        let slots = self
            .array_slots(arr)
            .ok_or_else(|| self.expected("array", arr))?;
        let mut slots = slots.borrow_mut();
        match slots.get_mut(index) {
            Some(slot) => {
                *slot = value.clone();
                Ok(())
            }
            None => Err(self.throw_error("RangeError", "array index out of bounds")),
        }
    }

    /// Buffer byte length.
    pub fn buffer_size(&self, buf: &HeapRef) -> EngineResult<usize> {
        match self.expect_object(buf)?.kind() {
            ObjectKind::Buffer(bytes) => Ok(bytes.borrow().len()),
            _ => Err(self.expected("arraybuffer", buf)),
        }
    }

    /// Raw pointer to the buffer's bytes. The allocation is fixed-size and
    /// never moves; the pointer is valid until the buffer cell is
    /// reclaimed.
    pub fn buffer_data_ptr(&self, buf: &HeapRef) -> EngineResult<*mut u8> {
        match self.expect_object(buf)?.kind() {
            ObjectKind::Buffer(bytes) => Ok(bytes.borrow_mut().as_mut_ptr()),
            _ => Err(self.expected("arraybuffer", buf)),
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Call a function value. `this` and `args` are borrowed; the result
    /// is owned by the caller.
    pub fn call(&self, func: &Value, this: &Value, args: &[Value]) -> EngineResult<Value> {
        self.check_interrupt()?;
        let fref = match func {
            Value::Object(r) => r.clone(),
            other => {
                return Err(self.throw_error(
                    "TypeError",
                    &format!("{} is not callable", other.kind_name()),
                ))
            }
        };
        let callable = match self.expect_object(&fref)?.kind() {
            ObjectKind::Function(fc) => fc.callable.clone(),
            other => {
                return Err(
                    self.throw_error("TypeError", &format!("{} is not callable", other.name()))
                )
            }
        };
        let depth = self.call_depth.get();
        if depth >= self.options.max_call_depth {
            return Err(EngineError::CallDepthExceeded(self.options.max_call_depth));
        }
        self.call_depth.set(depth + 1);
        let _reset = DepthReset(&self.call_depth, depth);
        callable(self, this, args)
    }

    /// Constructor call: allocate a fresh object wired to the function's
    /// `prototype` property, call with it as `this`, and return the
    /// explicit object result if the function produced one.
    pub fn construct(&self, func: &HeapRef, args: &[Value]) -> EngineResult<Value> {
        let obj = match self.get_property(func, &PropKey::Str("prototype".into()))? {
            proto @ Value::Object(_) => self.create_object_with_prototype(&proto)?,
            _ => self.create_object(),
        };
        let this = Value::Object(obj);
        let result = self.call(&Value::Object(func.clone()), &this, args)?;
        Ok(match result {
            Value::Object(_) => result,
            _ => this,
        })
    }

    // ------------------------------------------------------------------
    // Microtasks
    // ------------------------------------------------------------------

    /// Queue a function value for a later drain.
    pub fn queue_microtask(&self, func: &Value) -> EngineResult<()> {
        if !self.options.microtask_queue {
            return Err(EngineError::MicrotasksDisabled);
        }
        match func.heap_ref() {
            Some(r) if self.is_function(r) => {
                self.microtasks.borrow_mut().push_back(func.clone());
                Ok(())
            }
            _ => Err(self.throw_error("TypeError", "microtask is not callable")),
        }
    }

    /// Run queued microtasks in FIFO order, each exactly once.
    ///
    /// `max_hint <= 0` means unbounded. Returns true when the queue is
    /// empty afterwards. A job that fails stops the drain; already-run
    /// jobs are not requeued, unrun jobs stay queued.
    pub fn drain_microtasks(&self, max_hint: i32) -> EngineResult<bool> {
        if !self.options.microtask_queue {
            return Err(EngineError::MicrotasksDisabled);
        }
        if self.draining.get() {
            hooks::report_fatal("reentrant microtask drain");
            return Err(EngineError::ReentrantDrain);
        }
        self.draining.set(true);
        let _reset = FlagReset(&self.draining);
        self.drain_inner(max_hint)
    }

    fn drain_inner(&self, max_hint: i32) -> EngineResult<bool> {
        let mut budget = if max_hint <= 0 {
            usize::MAX
        } else {
            max_hint as usize
        };
        while budget > 0 {
            self.check_interrupt()?;
            let job = self.microtasks.borrow_mut().pop_front();
            let Some(job) = job else { break };
            self.call(&job, &Value::Undefined, &[])?;
            budget -= 1;
        }
        Ok(self.microtasks.borrow().is_empty())
    }

    // ------------------------------------------------------------------
    // Scripts
    // ------------------------------------------------------------------

    /// Evaluate source bytes (raw or module-wrapped) under an identifier.
    pub fn evaluate(&self, bytes: &[u8], id: &str) -> EngineResult<Value> {
        self.check_interrupt()?;
        let prepared = self.prepare(bytes, id)?;
        Ok(json::instantiate(self, prepared.doc()))
    }

    /// Parse source once for repeated evaluation. Bad source throws a
    /// SyntaxError.
    pub fn prepare(&self, bytes: &[u8], id: &str) -> EngineResult<PreparedScript> {
        PreparedScript::compile(bytes, id)
            .map_err(|e| self.throw_error("SyntaxError", &e.to_string()))
    }

    /// Evaluate a prepared script: a fresh value tree per evaluation.
    pub fn evaluate_prepared(&self, prepared: &PreparedScript) -> EngineResult<Value> {
        self.check_interrupt()?;
        Ok(json::instantiate(self, prepared.doc()))
    }

    /// Construct a value from JSON bytes.
    pub fn value_from_json(&self, bytes: &[u8]) -> EngineResult<Value> {
        json::parse(self, bytes)
    }

    // ------------------------------------------------------------------
    // Misc
    // ------------------------------------------------------------------

    /// Strict equality (see [`crate::value::strict_equals`]).
    pub fn strict_equals(&self, a: &Value, b: &Value) -> bool {
        strict_equals(a, b)
    }

    /// String form of any value.
    pub fn to_display_string(&self, v: &Value) -> EngineResult<String> {
        self.display_inner(v, 0)
    }

    fn display_inner(&self, v: &Value, depth: usize) -> EngineResult<String> {
        if depth > DISPLAY_DEPTH_LIMIT {
            return Ok("...".to_string());
        }
        Ok(match v {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(true) => "true".to_string(),
            Value::Bool(false) => "false".to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => self.string_text(s)?.to_string(),
            Value::Symbol(s) => format!("Symbol({})", self.symbol_description(s)?),
            Value::BigInt(b) => self.bigint_to_string(b, 10)?,
            Value::Object(r) => match self.expect_object(r)?.kind() {
                ObjectKind::Array(slots) => {
                    let items = slots.borrow().clone();
                    let mut parts = Vec::with_capacity(items.len());
                    for item in &items {
                        parts.push(match item {
                            Value::Undefined | Value::Null => String::new(),
                            other => self.display_inner(other, depth + 1)?,
                        });
                    }
                    parts.join(",")
                }
                ObjectKind::Function(fc) => {
                    format!("function {}() {{ [host code] }}", fc.name)
                }
                ObjectKind::Buffer(_) => "[object ArrayBuffer]".to_string(),
                _ => "[object Object]".to_string(),
            },
        })
    }

    /// Build a thrown error value with `name` and `message` properties.
    pub fn throw_error(&self, name: &str, message: &str) -> EngineError {
        let obj = self.create_object();
        if let Some(oc) = self.object_cell(&obj) {
            oc.set_own(
                PropKey::Str("name".into()),
                Value::String(self.create_string(name)),
            );
            oc.set_own(
                PropKey::Str("message".into()),
                Value::String(self.create_string(message)),
            );
        }
        EngineError::Thrown(Value::Object(obj))
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    /// Open a scope: every cell allocated while it is innermost is pinned
    /// until the scope is popped. Returns the scope token.
    pub fn push_scope(&self) -> u64 {
        let id = self.next_scope.get();
        self.next_scope.set(id + 1);
        self.scopes.borrow_mut().push(ScopeFrame {
            id,
            roots: Vec::new(),
        });
        id
    }

    /// Close a scope, batch-releasing its pinned cells. Scopes are strict
    /// LIFO; popping anything but the innermost scope fails.
    pub fn pop_scope(&self, id: u64) -> EngineResult<()> {
        let mut scopes = self.scopes.borrow_mut();
        match scopes.last() {
            Some(frame) if frame.id == id => {
                scopes.pop();
                Ok(())
            }
            _ => {
                drop(scopes);
                hooks::report_fatal("scope released out of order");
                Err(EngineError::ScopeOrder)
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(EngineOptions::default())
    }

    fn echo_function(engine: &Engine) -> Value {
        let f = engine.create_function(
            "echo",
            1,
            Rc::new(|_e, _this, args| Ok(args.first().cloned().unwrap_or(Value::Undefined))),
        );
        Value::Object(f)
    }

    #[test]
    fn call_round_trips_first_argument() {
        let e = engine();
        let f = echo_function(&e);
        let s = Value::String(e.create_string("payload"));
        let out = e.call(&f, &Value::Undefined, &[s.clone()]).unwrap();
        assert!(e.strict_equals(&out, &s));
    }

    #[test]
    fn calling_a_non_function_throws() {
        let e = engine();
        let obj = Value::Object(e.create_object());
        match e.call(&obj, &Value::Undefined, &[]) {
            Err(EngineError::Thrown(_)) => {}
            other => panic!("expected thrown TypeError, got {other:?}"),
        }
    }

    #[test]
    fn call_depth_budget_is_enforced() {
        let e = Engine::new(EngineOptions {
            max_call_depth: 4,
            ..EngineOptions::default()
        });
        // A function that calls itself through the engine until the budget
        // runs out.
        let f: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
        let f2 = f.clone();
        let func = Value::Object(e.create_function(
            "recurse",
            0,
            Rc::new(move |e, _this, _args| {
                let me = f2.borrow().clone().expect("function registered");
                e.call(&me, &Value::Undefined, &[])
            }),
        ));
        *f.borrow_mut() = Some(func.clone());
        match e.call(&func, &Value::Undefined, &[]) {
            Err(EngineError::CallDepthExceeded(4)) => {}
            other => panic!("expected depth error, got {other:?}"),
        }
    }

    #[test]
    fn property_chain_lookup() {
        let e = engine();
        let proto = e.create_object();
        e.set_property(
            &proto,
            PropKey::Str("inherited".into()),
            &Value::Number(7.0),
        )
        .unwrap();
        let obj = e
            .create_object_with_prototype(&Value::Object(proto))
            .unwrap();
        let got = e
            .get_property(&obj, &PropKey::Str("inherited".into()))
            .unwrap();
        assert!(e.strict_equals(&got, &Value::Number(7.0)));
        assert!(e.has_property(&obj, &PropKey::Str("inherited".into())).unwrap());
        // delete only removes own properties
        assert!(!e
            .delete_property(&obj, &PropKey::Str("inherited".into()))
            .unwrap());
    }

    #[test]
    fn cyclic_prototype_is_rejected() {
        let e = engine();
        let a = e.create_object();
        let b = e
            .create_object_with_prototype(&Value::Object(a.clone()))
            .unwrap();
        match e.set_prototype(&a, &Value::Object(b)) {
            Err(EngineError::Thrown(_)) => {}
            other => panic!("expected thrown TypeError, got {other:?}"),
        }
    }

    #[test]
    fn construct_wires_prototype_and_this() {
        let e = engine();
        let func = e.create_function(
            "Point",
            1,
            Rc::new(|e, this, args| {
                if let Some(r) = this.heap_ref() {
                    e.set_property(
                        r,
                        PropKey::Str("x".into()),
                        args.first().unwrap_or(&Value::Undefined),
                    )?;
                }
                Ok(Value::Undefined)
            }),
        );
        let proto = e.create_object();
        e.set_property(
            &func,
            PropKey::Str("prototype".into()),
            &Value::Object(proto.clone()),
        )
        .unwrap();

        let instance = e.construct(&func, &[Value::Number(3.0)]).unwrap();
        let iref = instance.heap_ref().unwrap();
        let x = e.get_property(iref, &PropKey::Str("x".into())).unwrap();
        assert!(e.strict_equals(&x, &Value::Number(3.0)));
        assert!(e.instance_of(iref, &func).unwrap());
    }

    #[test]
    fn microtasks_run_in_order_exactly_once() {
        let e = engine();
        let log: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            let f = Value::Object(e.create_function(
                "job",
                0,
                Rc::new(move |_e, _this, _args| {
                    log.borrow_mut().push(i);
                    Ok(Value::Undefined)
                }),
            ));
            e.queue_microtask(&f).unwrap();
        }
        assert!(e.drain_microtasks(-1).unwrap());
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        // Nothing left; a second drain is a no-op.
        assert!(e.drain_microtasks(-1).unwrap());
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn bounded_drain_leaves_work() {
        let e = engine();
        for _ in 0..3 {
            let f = Value::Object(e.create_function(
                "job",
                0,
                Rc::new(|_e, _this, _args| Ok(Value::Undefined)),
            ));
            e.queue_microtask(&f).unwrap();
        }
        assert!(!e.drain_microtasks(2).unwrap());
        assert!(e.drain_microtasks(-1).unwrap());
    }

    #[test]
    fn disabled_queue_errors() {
        let e = Engine::new(EngineOptions {
            microtask_queue: false,
            ..EngineOptions::default()
        });
        let f = echo_function(&e);
        assert!(matches!(
            e.queue_microtask(&f),
            Err(EngineError::MicrotasksDisabled)
        ));
        assert!(matches!(
            e.drain_microtasks(-1),
            Err(EngineError::MicrotasksDisabled)
        ));
    }

    #[test]
    fn interrupt_fails_next_call() {
        let e = engine();
        e.interrupt_handle().store(true, Ordering::SeqCst);
        let f = echo_function(&e);
        assert!(matches!(
            e.call(&f, &Value::Undefined, &[]),
            Err(EngineError::Interrupted)
        ));
        // Consumed: the next call succeeds.
        assert!(e.call(&f, &Value::Undefined, &[]).is_ok());
    }

    #[test]
    fn scopes_pin_and_batch_release() {
        let e = engine();
        let scope = e.push_scope();
        let obj = e.create_object();
        let weak = e.create_weak(&obj).unwrap();
        drop(obj); // caller's reference gone; the scope still pins the cell
        assert!(matches!(
            e.weak_lock(&weak).unwrap(),
            Value::Object(_)
        ));
        e.pop_scope(scope).unwrap();
        assert!(matches!(e.weak_lock(&weak).unwrap(), Value::Undefined));
    }

    #[test]
    fn scope_pop_is_strict_lifo() {
        let e = engine();
        let outer = e.push_scope();
        let inner = e.push_scope();
        assert!(matches!(e.pop_scope(outer), Err(EngineError::ScopeOrder)));
        e.pop_scope(inner).unwrap();
        e.pop_scope(outer).unwrap();
        assert!(matches!(e.pop_scope(outer), Err(EngineError::ScopeOrder)));
    }

    #[test]
    fn bigint_radix_formatting() {
        let e = engine();
        let bi = e.create_bigint(255);
        assert_eq!(e.bigint_to_string(&bi, 16).unwrap(), "ff");
        assert_eq!(e.bigint_to_string(&bi, 2).unwrap(), "11111111");
        let neg = e.create_bigint(-10);
        assert_eq!(e.bigint_to_string(&neg, 10).unwrap(), "-10");
        assert!(e.bigint_to_string(&bi, 1).is_err());
        assert!(e.bigint_to_string(&bi, 37).is_err());
    }

    #[test]
    fn display_strings() {
        let e = engine();
        assert_eq!(e.to_display_string(&Value::Number(1.0)).unwrap(), "1");
        assert_eq!(e.to_display_string(&Value::Number(1.5)).unwrap(), "1.5");
        assert_eq!(
            e.to_display_string(&Value::Number(f64::NAN)).unwrap(),
            "NaN"
        );
        let arr = e.create_array_from(vec![
            Value::Number(1.0),
            Value::Null,
            Value::Bool(true),
        ]);
        assert_eq!(
            e.to_display_string(&Value::Object(arr)).unwrap(),
            "1,,true"
        );
    }

    #[test]
    fn native_state_detaches_on_replace() {
        let e = engine();
        let obj = e.create_object();
        struct Probe(Rc<Cell<u32>>);
        impl Drop for Probe {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }
        let drops = Rc::new(Cell::new(0));
        e.set_native_state(&obj, Some(Rc::new(Probe(drops.clone()))))
            .unwrap();
        assert!(e.native_state(&obj).unwrap().is_some());
        e.set_native_state(&obj, None).unwrap();
        assert_eq!(drops.get(), 1);
        assert!(e.native_state(&obj).unwrap().is_none());
    }
}
