//! Sable core engine
//!
//! A reference-counted script value heap with host-callback hooks, built to
//! sit behind an embedding boundary such as `sable-ffi`. The engine owns:
//!
//! - the value model ([`Value`], [`HeapRef`], heap cells for strings,
//!   symbols, bigints, property names, weak references, and objects),
//! - object behavior (ordered property tables, prototype chains, arrays,
//!   byte buffers, functions, host-delegated objects, native state),
//! - execution plumbing (synchronous calls, constructor calls, a FIFO
//!   microtask queue, a cross-thread interrupt flag, scoped batch release),
//! - source handling (JSON value construction, the compiled-module
//!   container, prepared scripts),
//! - process-wide hooks (fatal handler, profiler toggles).
//!
//! Everything here is single-threaded per [`Engine`] instance; the only
//! cross-thread operation is the interrupt flag. There is no cycle
//! collector — lifetime is exactly reference counting.

pub mod engine;
pub mod error;
pub mod hooks;
pub mod json;
pub mod module;
pub mod object;
pub mod value;

pub use engine::{Engine, EngineOptions};
pub use error::{EngineError, EngineResult};
pub use module::PreparedScript;
pub use object::{FunctionCell, HostFn, HostObject, ObjectCell, ObjectKind};
pub use value::{strict_equals, BorrowedRef, CellData, HeapCell, HeapRef, PropKey, Value};
