//! JSON value construction
//!
//! Builds engine value trees from UTF-8 JSON text. Object key order is
//! preserved (serde_json's `preserve_order` feature), so enumeration of a
//! constructed object matches the source document.

use crate::engine::Engine;
use crate::error::EngineResult;
use crate::value::{PropKey, Value};

/// Parse JSON bytes into an engine value.
///
/// A parse failure is a script-level error: the returned `EngineError` is
/// a thrown `SyntaxError`-shaped object, the same way an engine surfaces
/// bad source text.
pub fn parse(engine: &Engine, bytes: &[u8]) -> EngineResult<Value> {
    let doc: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| engine.throw_error("SyntaxError", &e.to_string()))?;
    Ok(instantiate(engine, &doc))
}

/// Instantiate a parsed JSON document as a fresh engine value tree.
pub fn instantiate(engine: &Engine, doc: &serde_json::Value) -> Value {
    match doc {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(engine.create_string(s)),
        serde_json::Value::Array(items) => {
            let arr = engine.create_array(items.len());
            if let Some(slots) = engine.array_slots(&arr) {
                let mut slots = slots.borrow_mut();
                for (i, item) in items.iter().enumerate() {
                    slots[i] = instantiate(engine, item);
                }
            }
            Value::Object(arr)
        }
        serde_json::Value::Object(entries) => {
            let obj = engine.create_object();
            for (key, item) in entries {
                let value = instantiate(engine, item);
                if let Some(oc) = engine.object_cell(&obj) {
                    oc.set_own(PropKey::Str(engine.intern(key)), value);
                }
            }
            Value::Object(obj)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineOptions};
    use crate::value::strict_equals;

    #[test]
    fn parses_scalars_and_containers() {
        let engine = Engine::new(EngineOptions::default());
        let v = parse(&engine, b"{\"a\":1,\"b\":[true,null]}").unwrap();
        let obj = v.heap_ref().unwrap();

        let a = engine.get_property(obj, &PropKey::Str("a".into())).unwrap();
        assert!(strict_equals(&a, &Value::Number(1.0)));

        let b = engine.get_property(obj, &PropKey::Str("b".into())).unwrap();
        let b0 = engine.array_get(b.heap_ref().unwrap(), 0).unwrap();
        assert!(strict_equals(&b0, &Value::Bool(true)));
        let b1 = engine.array_get(b.heap_ref().unwrap(), 1).unwrap();
        assert!(strict_equals(&b1, &Value::Null));
    }

    #[test]
    fn key_order_is_preserved() {
        let engine = Engine::new(EngineOptions::default());
        let v = parse(&engine, b"{\"z\":0,\"a\":1,\"m\":2}").unwrap();
        let names = engine.property_names(v.heap_ref().unwrap()).unwrap();
        let texts: Vec<String> = names
            .iter()
            .map(|n| engine.to_display_string(n).unwrap())
            .collect();
        assert_eq!(texts, ["z", "a", "m"]);
    }

    #[test]
    fn parse_failure_is_thrown() {
        let engine = Engine::new(EngineOptions::default());
        let err = parse(&engine, b"{oops").unwrap_err();
        match err {
            crate::error::EngineError::Thrown(v) => {
                let name = engine
                    .get_property(v.heap_ref().unwrap(), &PropKey::Str("name".into()))
                    .unwrap();
                assert_eq!(engine.to_display_string(&name).unwrap(), "SyntaxError");
            }
            other => panic!("expected thrown value, got {other:?}"),
        }
    }
}
