//! Pure predicates that classify decoded values against the JSON-RPC 2.0 grammar.
//!
//! Everything inbound is checked here as a plain [`JsonValue`] before it is converted into the
//! typed payload model, so that a malformed message can be classified without a serde error
//! getting in the way.
use serde_json::Map;

use crate::types::JsonValue;

/// Standard error codes defined by the JSON-RPC 2.0 spec
const STANDARD_ERROR_CODES: [i64; 5] = [-32700, -32600, -32601, -32602, -32603];

/// Range reserved for implementation-defined server errors
const SERVER_ERROR_RANGE: std::ops::RangeInclusive<i64> = -32099..=-32000;

fn has_version(obj: &Map<String, JsonValue>) -> bool {
    obj.get("jsonrpc").and_then(JsonValue::as_str) == Some("2.0")
}

/// A request id must be a string or a number.
pub fn is_valid_id(value: &JsonValue) -> bool {
    value.is_string() || value.is_number()
}

/// Params, when present, must be an array or an object.
pub fn is_valid_params(value: &JsonValue) -> bool {
    value.is_array() || value.is_object()
}

/// Shape check for a single request or notification.
///
/// Only the envelope is checked here; whether `params` has a usable type is a separate question
/// answered with `INVALID_PARAMS` rather than `INVALID_REQUEST`.
pub fn is_valid_request(value: &JsonValue) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };

    has_version(obj)
        && obj.get("method").is_some_and(JsonValue::is_string)
        && obj.get("id").is_none_or(is_valid_id)
}

/// True for the five standard codes and for the server error range.
pub fn is_reserved_error_code(code: i64) -> bool {
    STANDARD_ERROR_CODES.contains(&code) || SERVER_ERROR_RANGE.contains(&code)
}

/// An error object with an integer code in a reserved range and a string message.
pub fn is_rpc_error(value: &JsonValue) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };

    obj.get("code")
        .and_then(JsonValue::as_i64)
        .is_some_and(is_reserved_error_code)
        && obj.get("message").is_some_and(JsonValue::is_string)
}

/// A batch is a non-empty array.  The elements are checked individually.
pub fn is_valid_batch(value: &JsonValue) -> bool {
    value.as_array().is_some_and(|items| !items.is_empty())
}

/// Shape check for a single response.
///
/// The `id` must be present (null allowed, for errors about unidentifiable requests) and exactly
/// one of `result` and `error` must be present.
pub fn is_valid_response(value: &JsonValue) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };

    if !has_version(obj) {
        return false;
    }

    let id_ok = match obj.get("id") {
        Some(id) => id.is_null() || is_valid_id(id),
        None => false,
    };

    let payload_ok = match (obj.get("result"), obj.get("error")) {
        (Some(_), None) => true,
        (None, Some(error)) => is_rpc_error(error),
        _ => false,
    };

    id_ok && payload_ok
}
