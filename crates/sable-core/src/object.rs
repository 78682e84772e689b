//! Object cells: property tables, arrays, buffers, functions, host objects
//!
//! Property tables preserve insertion order, which is contractual for
//! enumeration, so they are ordered entry vectors rather than hash maps.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::engine::Engine;
use crate::error::EngineResult;
use crate::value::{HeapRef, PropKey, Value};

/// Host-implemented function body.
///
/// Invoked synchronously by the engine with a borrowed `this` and borrowed
/// arguments; returns an owned value. Shared ownership: the engine keeps
/// the closure alive for as long as the wrapping function cell is
/// reachable, and drops it exactly once when the cell is reclaimed.
pub type HostFn = Rc<dyn Fn(&Engine, &Value, &[Value]) -> EngineResult<Value>>;

/// Host-implemented object: property access is delegated to the host.
///
/// `name` parameters are borrowed property-name cells. `get` returns an
/// owned value; `set` receives a borrowed one. `property_names` returns
/// owned property-name references, one per enumerable key.
///
/// The `Any` supertrait lets an embedding layer recover its concrete
/// adapter from a stored trait object.
pub trait HostObject: Any {
    /// Property read
    fn get(&self, engine: &Engine, name: &HeapRef) -> EngineResult<Value>;

    /// Property write
    fn set(&self, engine: &Engine, name: &HeapRef, value: &Value) -> EngineResult<()>;

    /// Enumerable property names
    fn property_names(&self, engine: &Engine) -> EngineResult<Vec<HeapRef>>;
}

/// Function cell payload
pub struct FunctionCell {
    /// Function name (diagnostic only)
    pub name: Rc<str>,
    /// Declared parameter count (advisory; calls are not arity-checked)
    pub param_count: u32,
    /// The callable body
    pub callable: HostFn,
}

/// Object payload kinds
pub enum ObjectKind {
    /// Plain property bag
    Plain,
    /// Dense array of values
    Array(RefCell<Vec<Value>>),
    /// Fixed-size byte buffer
    Buffer(RefCell<Box<[u8]>>),
    /// Callable function
    Function(FunctionCell),
    /// Host-delegated object
    Host(Rc<dyn HostObject>),
}

impl ObjectKind {
    /// Short kind name, used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ObjectKind::Plain => "object",
            ObjectKind::Array(_) => "array",
            ObjectKind::Buffer(_) => "arraybuffer",
            ObjectKind::Function(_) => "function",
            ObjectKind::Host(_) => "host object",
        }
    }
}

/// Object cell: ordered property table plus kind payload.
pub struct ObjectCell {
    kind: ObjectKind,
    props: RefCell<Vec<(PropKey, Value)>>,
    prototype: RefCell<Option<HeapRef>>,
    native: RefCell<Option<Rc<dyn Any>>>,
    external_bytes: Cell<usize>,
}

impl ObjectCell {
    pub(crate) fn new(kind: ObjectKind) -> Self {
        ObjectCell {
            kind,
            props: RefCell::new(Vec::new()),
            prototype: RefCell::new(None),
            native: RefCell::new(None),
            external_bytes: Cell::new(0),
        }
    }

    /// Kind payload
    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    /// Own-property lookup; clones the stored value.
    pub fn get_own(&self, key: &PropKey) -> Option<Value> {
        self.props
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Insert or replace, preserving first-insertion order.
    pub fn set_own(&self, key: PropKey, value: Value) {
        let mut props = self.props.borrow_mut();
        if let Some(entry) = props.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            props.push((key, value));
        }
    }

    /// Remove an own property; true if it existed.
    pub fn delete_own(&self, key: &PropKey) -> bool {
        let mut props = self.props.borrow_mut();
        let before = props.len();
        props.retain(|(k, _)| k != key);
        props.len() != before
    }

    /// Own string keys in insertion order (symbol keys are skipped,
    /// matching own-property-name enumeration).
    pub fn own_string_keys(&self) -> Vec<Rc<str>> {
        self.props
            .borrow()
            .iter()
            .filter_map(|(k, _)| match k {
                PropKey::Str(s) => Some(s.clone()),
                PropKey::Symbol(_) => None,
            })
            .collect()
    }

    /// Prototype link
    pub fn prototype(&self) -> Option<HeapRef> {
        self.prototype.borrow().clone()
    }

    pub(crate) fn set_prototype(&self, proto: Option<HeapRef>) {
        *self.prototype.borrow_mut() = proto;
    }

    /// Attached native state, if any.
    pub fn native_state(&self) -> Option<Rc<dyn Any>> {
        self.native.borrow().clone()
    }

    /// Attach native state, detaching (dropping) any previous attachment.
    pub fn set_native_state(&self, state: Option<Rc<dyn Any>>) {
        *self.native.borrow_mut() = state;
    }

    /// Advisory external-memory hint.
    pub fn external_bytes(&self) -> usize {
        self.external_bytes.get()
    }

    pub(crate) fn set_external_bytes(&self, amount: usize) {
        self.external_bytes.set(amount);
    }
}
