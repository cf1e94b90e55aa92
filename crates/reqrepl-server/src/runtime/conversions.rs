//! Conversions between script values and response payloads.
//!
//! # Type Mapping
//!
//! | Script value                       | Payload / JSON              |
//! |------------------------------------|-----------------------------|
//! | string                             | `Payload::Text`             |
//! | `Uint8Array`                       | `Payload::Bytes`            |
//! | `null`                             | `Payload::Empty`            |
//! | array, plain object                | `Payload::Json`             |
//! | non-finite number                  | JSON `null`                 |
//! | function, symbol, `undefined` prop | skipped (`null` in arrays)  |
//!
//! Like `JSON.stringify`, object conversion walks own enumerable string keys
//! and a callable `toJSON` replaces the value before it is walked.

use boa_engine::{
    Context,
    JsString,
    js_string,
    object::{JsObject, builtins::{JsArray, JsUint8Array}},
    value::JsValue,
};
use hyper::body::Bytes;
use hyper::header::HeaderMap;
use reqrepl_common::{Payload, ReqreplError, Result};
use serde_json::Value as JsonValue;

/// Nesting depth past which a value is treated as cyclic.
const MAX_DEPTH: usize = 128;

/// Upper bound on array elements plus object members in one conversion.
///
/// Sparse arrays count their full `length`, holes included.
pub const MAX_JSON_ITEMS: usize = 1_000_000;

/// Convert serde_json::Value to a script value.
pub fn json_to_js_value(json: JsonValue, ctx: &mut Context) -> Result<JsValue> {
    match json {
        JsonValue::Null => Ok(JsValue::null()),
        JsonValue::Bool(b) => Ok(JsValue::new(b)),
        JsonValue::Number(n) => n
            .as_f64()
            .map(JsValue::new)
            .ok_or_else(|| ReqreplError::Script("Number out of range".into())),
        JsonValue::String(s) => Ok(JsValue::new(js_string!(s))),
        JsonValue::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(json_to_js_value(item, ctx)?);
            }
            Ok(JsArray::from_iter(values, ctx).into())
        }
        JsonValue::Object(map) => {
            let object = JsObject::with_object_proto(ctx.intrinsics());
            for (key, value) in map {
                let value = json_to_js_value(value, ctx)?;
                object
                    .create_data_property_or_throw(js_string!(key.clone()), value, ctx)
                    .map_err(|e| ReqreplError::Script(format!("Failed to set property '{}': {}", key, e)))?;
            }
            Ok(object.into())
        }
    }
}

/// Convert a script value to JSON.
///
/// # Errors
///
/// Returns `ReqreplError::Script` if a property getter or `toJSON` throws,
/// the value nests deeper than the cycle limit, or it holds more than
/// [`MAX_JSON_ITEMS`] array elements and object members in total.
pub fn js_value_to_json(value: &JsValue, ctx: &mut Context) -> Result<JsonValue> {
    let mut budget = MAX_JSON_ITEMS;
    Ok(to_json(value, &JsValue::new(js_string!("")), ctx, 0, &mut budget)?.unwrap_or(JsonValue::Null))
}

/// `None` marks values that JSON has no representation for.
fn to_json(value: &JsValue, key: &JsValue, ctx: &mut Context, depth: usize, budget: &mut usize) -> Result<Option<JsonValue>> {
    if depth > MAX_DEPTH {
        return Err(ReqreplError::Script("Value is cyclic or nested too deeply".into()));
    }

    // toJSON runs once per value; its result is serialized as is
    let replaced;
    let value = match value.as_object().map(|o| o.clone()) {
        Some(object) => {
            let to_json_fn = object.get(js_string!("toJSON"), ctx).map_err(script_error)?;
            match to_json_fn.as_callable().map(|f| f.clone()) {
                Some(f) => {
                    replaced = f.call(value, std::slice::from_ref(key), ctx).map_err(script_error)?;
                    &replaced
                }
                None => value,
            }
        }
        None => value,
    };

    if value.is_undefined() || value.is_symbol() {
        return Ok(None);
    }
    if value.is_null() {
        return Ok(Some(JsonValue::Null));
    }
    if let Some(b) = value.as_boolean() {
        return Ok(Some(JsonValue::Bool(b)));
    }
    if let Some(i) = value.as_i32() {
        return Ok(Some(JsonValue::Number(i.into())));
    }
    if let Some(n) = value.as_number() {
        return Ok(Some(number_to_json(n)));
    }
    if let Some(s) = value.as_string() {
        return Ok(Some(JsonValue::String(s.to_std_string_escaped())));
    }

    let Some(object) = value.as_object().map(|o| o.clone()) else {
        return Ok(None);
    };
    if object.is_callable() {
        return Ok(None);
    }

    if object.is_array() {
        let length = array_length(&object, ctx)?;
        spend(budget, length)?;

        let mut items = Vec::new();
        for index in 0..length {
            let item = object.get(index, ctx).map_err(script_error)?;
            let key = JsValue::new(js_string!(index.to_string()));
            items.push(to_json(&item, &key, ctx, depth + 1, budget)?.unwrap_or(JsonValue::Null));
        }
        return Ok(Some(JsonValue::Array(items)));
    }

    let keys = enumerable_keys(&object, ctx)?;
    spend(budget, keys.len())?;

    let mut map = serde_json::Map::new();
    for key in keys {
        let name = key.to_std_string_escaped();
        let property = object.get(key.clone(), ctx).map_err(script_error)?;
        if let Some(json) = to_json(&property, &JsValue::new(key), ctx, depth + 1, budget)? {
            map.insert(name, json);
        }
    }
    Ok(Some(JsonValue::Object(map)))
}

fn array_length(array: &JsObject, ctx: &mut Context) -> Result<usize> {
    let length = array
        .get(js_string!("length"), ctx)
        .and_then(|len| len.to_length(ctx))
        .map_err(script_error)?;
    usize::try_from(length).map_err(|_| too_many_items())
}

/// Own enumerable string keys, in the order `Object.keys` reports them.
fn enumerable_keys(object: &JsObject, ctx: &mut Context) -> Result<Vec<JsString>> {
    let object_constructor = ctx.intrinsics().constructors().object().constructor();
    let keys_fn = object_constructor.get(js_string!("keys"), ctx).map_err(script_error)?;
    let keys_fn = keys_fn
        .as_callable()
        .map(|f| f.clone())
        .ok_or_else(|| ReqreplError::Script("Object.keys is not callable".into()))?;

    let keys = keys_fn
        .call(&JsValue::undefined(), &[object.clone().into()], ctx)
        .map_err(script_error)?;
    let keys = keys
        .as_object()
        .map(|o| o.clone())
        .ok_or_else(|| ReqreplError::Script("Object.keys did not return an array".into()))?;

    let length = array_length(&keys, ctx)?;
    let mut names = Vec::with_capacity(length.min(MAX_JSON_ITEMS));
    for index in 0..length {
        let key = keys.get(index, ctx).map_err(script_error)?;
        names.push(key.to_string(ctx).map_err(script_error)?);
    }
    Ok(names)
}

fn spend(budget: &mut usize, items: usize) -> Result<()> {
    *budget = budget.checked_sub(items).ok_or_else(too_many_items)?;
    Ok(())
}

fn too_many_items() -> ReqreplError {
    ReqreplError::Script(format!("Value has more than {} elements to serialize", MAX_JSON_ITEMS))
}

fn number_to_json(n: f64) -> JsonValue {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        return JsonValue::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

/// Interprets a value as a response body, if it is sendable.
///
/// Strings, `Uint8Array`s, `null`, arrays and plain objects (whose
/// `constructor` is the intrinsic `Object`) are sendable; anything else
/// yields `None`.
pub fn payload_of(value: &JsValue, ctx: &mut Context) -> Result<Option<Payload>> {
    if let Some(s) = value.as_string() {
        return Ok(Some(Payload::Text(s.to_std_string_escaped())));
    }
    if value.is_null() {
        return Ok(Some(Payload::Empty));
    }

    let Some(object) = value.as_object().map(|o| o.clone()) else {
        return Ok(None);
    };

    if JsUint8Array::from_object(object.clone()).is_ok() {
        return Ok(Some(Payload::Bytes(uint8_bytes(&object, ctx)?)));
    }

    if object.is_array() || is_plain_object(&object, ctx)? {
        return Ok(Some(Payload::Json(js_value_to_json(value, ctx)?)));
    }

    Ok(None)
}

/// Copies the contents of a `Uint8Array` (or any array-like of bytes).
pub fn uint8_bytes(array: &JsObject, ctx: &mut Context) -> Result<Bytes> {
    let length = array
        .get(js_string!("length"), ctx)
        .and_then(|len| len.to_length(ctx))
        .map_err(script_error)?;

    let mut bytes = Vec::with_capacity(length as usize);
    for index in 0..length as usize {
        let byte = array
            .get(index, ctx)
            .and_then(|b| b.to_uint8(ctx))
            .map_err(script_error)?;
        bytes.push(byte);
    }
    Ok(Bytes::from(bytes))
}

fn is_plain_object(object: &JsObject, ctx: &mut Context) -> Result<bool> {
    let constructor = object.get(js_string!("constructor"), ctx).map_err(script_error)?;
    let intrinsic = ctx.intrinsics().constructors().object().constructor();
    Ok(constructor
        .as_object()
        .map(|c| JsObject::equals(&c.clone(), &intrinsic))
        .unwrap_or(false))
}

/// Request headers as a plain JSON object with lower-case names.
///
/// Repeated headers are joined with `", "`.
pub fn headers_to_json(headers: &HeaderMap) -> JsonValue {
    let mut map = serde_json::Map::new();
    for (name, value) in headers.iter() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match map.get_mut(name.as_str()) {
            Some(JsonValue::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            _ => {
                map.insert(name.as_str().to_owned(), JsonValue::String(value));
            }
        }
    }
    JsonValue::Object(map)
}

fn script_error(err: boa_engine::JsError) -> ReqreplError {
    ReqreplError::Script(err.to_string())
}
