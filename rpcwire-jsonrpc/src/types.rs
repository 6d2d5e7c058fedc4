//! Rust struct definitions that ser/de to/from JSON-RPC 2.0 messages.
//!
//! These are the payload model only: constructors and shapes, no behavior.  Whether a decoded
//! value actually has one of these shapes is decided by [`crate::validate`] before anything is
//! converted into these types.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::validate;

/// Re-export the protocol primitives that are exactly what we would declare ourselves.
pub use jsonrpsee_types::{error::ErrorCode, params::TwoPointZero};
pub use serde_json::Value as JsonValue;

pub const PARSE_ERROR_MSG: &str = "Parse error";
pub const INVALID_REQUEST_MSG: &str = "Invalid Request";
pub const METHOD_NOT_FOUND_MSG: &str = "Method not found";
pub const INVALID_PARAMS_MSG: &str = "Invalid params";
pub const INTERNAL_ERROR_MSG: &str = "Internal error";

/// Request Id
///
/// Requests may only carry string or numeric ids.  `Null` exists for responses to requests
/// whose id could not be determined.
#[derive(Debug, PartialEq, Clone, Hash, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Id {
    /// Null
    Null,
    /// Numeric id
    Number(serde_json::Number),
    /// String id
    Str(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Null => f.write_str("null"),
            Id::Number(n) => write!(f, "{n}"),
            Id::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<u64> for Id {
    fn from(n: u64) -> Self {
        Id::Number(n.into())
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n.into())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::Str(s)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::Str(s.to_string())
    }
}

/// An optional member that is present on the wire, even as `null`, is `Some`.  Absent members
/// fall back to `None` through `#[serde(default)]`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// A request or, without an `id`, a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: TwoPointZero,
    pub method: String,
    /// Array or object; omitted entirely when there are none
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub params: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub id: Option<Id>,
}

impl Request {
    /// Create a serializable JSON-RPC method call or notification, depending on whether `id` is
    /// present.
    pub fn new(
        method: impl Into<String>,
        params: impl Into<Option<JsonValue>>,
        id: impl Into<Option<Id>>,
    ) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            method: method.into(),
            params: params.into(),
            id: id.into(),
        }
    }

    /// Same as [`Request::new`] with no id.
    pub fn notification(method: impl Into<String>, params: impl Into<Option<JsonValue>>) -> Self {
        Self::new(method, params, None)
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A response: the id of the request it answers, plus either a result or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: TwoPointZero,
    /// `Null` only when the request's own id could not be read
    pub id: Id,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl Response {
    pub fn success(id: Id, result: JsonValue) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            id,
            payload: ResponsePayload::success(result),
        }
    }

    pub fn error(id: Id, error: ErrorDetails) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            id,
            payload: ResponsePayload::error(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Error(_))
    }
}

/// `result` or `error`, flattened into the response object.
///
/// Untagged, with `Error` first: an object carrying an `error` member never deserializes as a
/// success.  Inbound responses are validated before they get here, so both members are never
/// present together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    Error(ErrorResponse),
    Success(SuccessResponse),
}

impl ResponsePayload {
    pub fn success(result: JsonValue) -> Self {
        ResponsePayload::Success(SuccessResponse { result })
    }

    pub fn error(details: impl Into<ErrorDetails>) -> Self {
        ResponsePayload::Error(ErrorResponse { error: details.into() })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub result: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// The `{code, message, data}` error object.
///
/// The constructors for the five reserved kinds always use the canonical message and carry no
/// data, so nothing application-specific can leak through them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub data: Option<JsonValue>,
}

impl ErrorDetails {
    pub fn new(code: ErrorCode, message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self {
            code,
            message: message.into(),
            data: data.into(),
        }
    }

    pub fn parse_error() -> Self {
        Self::new(ErrorCode::ParseError, PARSE_ERROR_MSG, None)
    }
    pub fn invalid_request() -> Self {
        Self::new(ErrorCode::InvalidRequest, INVALID_REQUEST_MSG, None)
    }
    pub fn method_not_found() -> Self {
        Self::new(ErrorCode::MethodNotFound, METHOD_NOT_FOUND_MSG, None)
    }
    pub fn invalid_params() -> Self {
        Self::new(ErrorCode::InvalidParams, INVALID_PARAMS_MSG, None)
    }
    pub fn internal_error() -> Self {
        Self::new(ErrorCode::InternalError, INTERNAL_ERROR_MSG, None)
    }

    /// An implementation-defined server error.
    ///
    /// The code should be in `-32099..=-32000`; anything else is coerced to an internal error by
    /// the server before it reaches the wire.
    pub fn server_error(code: i32, message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::from(code), message, data)
    }

    pub fn with_data(mut self, data: impl Into<Option<JsonValue>>) -> Self {
        self.data = data.into();
        self
    }

    /// True if the code is one of the five standard codes or in the server error range.
    pub fn is_reserved(&self) -> bool {
        validate::is_reserved_error_code(self.code.code() as i64)
    }
}

/// A payload on the wire: either a single message or a non-empty batch of them.
///
/// Outbound requests are `Payload<Request>`, outbound responses `Payload<Response>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload<T> {
    Batch(Vec<T>),
    Single(T),
}

impl<T> Payload<T> {
    pub fn len(&self) -> usize {
        match self {
            Payload::Batch(items) => items.len(),
            Payload::Single(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let request = Request::new("subtract", json!([42, 23]), Id::from(1u64));
        assert!(!request.is_notification());
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"jsonrpc": "2.0", "method": "subtract", "params": [42, 23], "id": 1})
        );

        let parsed: Request =
            serde_json::from_str(r#"{"id":1,"params":[42,23],"method":"subtract","jsonrpc":"2.0"}"#).unwrap();
        assert_eq!(parsed, request);

        // Anything but exactly "2.0" is refused
        assert!(serde_json::from_value::<Request>(json!({"jsonrpc": "1.0", "method": "subtract"})).is_err());
    }

    #[test]
    fn notification_wire_shape() {
        let notification = Request::notification("update", json!({"items": [1, 2]}));
        assert!(notification.is_notification());
        assert_eq!(
            serde_json::to_value(&notification).unwrap(),
            json!({"jsonrpc": "2.0", "method": "update", "params": {"items": [1, 2]}})
        );

        // No params member at all rather than `"params": null`
        assert_eq!(
            serde_json::to_value(Request::notification("heartbeat", None)).unwrap(),
            json!({"jsonrpc": "2.0", "method": "heartbeat"})
        );
    }

    #[test]
    fn response_wire_shapes() {
        let success = Response::success(Id::from("req-7"), json!({"rows": 3}));
        assert!(!success.is_error());
        assert_eq!(
            serde_json::to_value(&success).unwrap(),
            json!({"jsonrpc": "2.0", "id": "req-7", "result": {"rows": 3}})
        );

        let failure = Response::error(Id::from(8u64), ErrorDetails::method_not_found().with_data(json!("frobnicate")));
        assert!(failure.is_error());
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            json!({"jsonrpc": "2.0", "id": 8, "error": {"code": -32601, "message": "Method not found", "data": "frobnicate"}})
        );

        let parsed: Response =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 8, "result": null})).unwrap();
        assert_matches!(parsed.payload, ResponsePayload::Success(SuccessResponse { result: JsonValue::Null }));

        let parsed: Response = serde_json::from_value(
            json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "Parse error"}}),
        )
        .unwrap();
        assert_eq!(parsed, Response::error(Id::Null, ErrorDetails::parse_error()));
    }

    #[test]
    fn reserved_kinds_use_canonical_messages() {
        let kinds = [
            (ErrorDetails::parse_error(), -32700, "Parse error"),
            (ErrorDetails::invalid_request(), -32600, "Invalid Request"),
            (ErrorDetails::method_not_found(), -32601, "Method not found"),
            (ErrorDetails::invalid_params(), -32602, "Invalid params"),
            (ErrorDetails::internal_error(), -32603, "Internal error"),
        ];

        for (details, code, message) in kinds {
            assert_eq!(
                serde_json::to_value(&details).unwrap(),
                json!({"code": code, "message": message})
            );
            assert!(details.is_reserved());
        }

        assert!(ErrorDetails::server_error(-32000, "Busy", None).is_reserved());
        assert!(ErrorDetails::server_error(-32099, "Busy", None).is_reserved());
        assert!(!ErrorDetails::server_error(-32100, "Too low", None).is_reserved());
        assert!(!ErrorDetails::server_error(400, "Http-ish", None).is_reserved());
    }

    #[test]
    fn ids() {
        assert_eq!(serde_json::to_value(Id::Null).unwrap(), JsonValue::Null);
        assert_eq!(serde_json::to_value(Id::from("k")).unwrap(), json!("k"));
        assert_eq!(serde_json::to_value(Id::from(-3i64)).unwrap(), json!(-3));

        assert_eq!(serde_json::from_value::<Id>(json!(null)).unwrap(), Id::Null);
        assert_eq!(serde_json::from_value::<Id>(json!(12)).unwrap(), Id::from(12u64));
        assert_matches!(serde_json::from_value::<Id>(json!(0.5)).unwrap(), Id::Number(_));
        assert!(serde_json::from_value::<Id>(json!([1])).is_err());

        assert_eq!(Id::from(12u64).to_string(), "12");
        assert_eq!(Id::from("k").to_string(), "\"k\"");
        assert_eq!(Id::Null.to_string(), "null");
    }

    #[test]
    fn payloads_survive_the_wire() {
        fn wire<T: Serialize + serde::de::DeserializeOwned>(value: &T) -> T {
            serde_json::from_str(&serde_json::to_string(value).unwrap()).unwrap()
        }

        let requests = [
            Request::new("subtract", json!([42, 23]), Id::from(1u64)),
            Request::new("subtract", json!({"minuend": 42}), Id::from("abc")),
            Request::new("get_data", None, Id::from(2u64)),
            Request::notification("update", json!([1, 2, 3])),
            Request::notification("heartbeat", None),
            // Not something a client sends, but still a value the model can hold
            Request::new("odd", JsonValue::Null, Id::Null),
        ];
        for request in &requests {
            assert_eq!(&wire(request), request);
        }

        let responses = [
            Response::success(Id::from(1u64), json!(19)),
            Response::success(Id::from("x"), JsonValue::Null),
            Response::error(Id::Null, ErrorDetails::parse_error()),
            Response::error(Id::from(3u64), ErrorDetails::server_error(-32001, "Busy", json!({"retry": 5}))),
            Response::error(Id::from(4u64), ErrorDetails::server_error(-32001, "Busy", JsonValue::Null)),
        ];
        for response in &responses {
            assert_eq!(&wire(response), response);
        }

        let data_null = wire(&responses[4]);
        assert_matches!(data_null.payload, ResponsePayload::Error(ErrorResponse { error }) if error.data == Some(JsonValue::Null));

        let request_batch = Payload::Batch(requests.to_vec());
        assert_eq!(wire(&request_batch), request_batch);
        let response_batch = Payload::Batch(responses.to_vec());
        assert_eq!(wire(&response_batch), response_batch);
    }

    #[test]
    fn batch_payloads() {
        let batch = Payload::Batch(vec![
            Request::new("sum", json!([1, 2, 4]), Id::from("1")),
            Request::notification("notify_hello", json!([7])),
        ]);
        assert_eq!(batch.len(), 2);
        assert_eq!(
            serde_json::to_value(&batch).unwrap(),
            json!([
                {"jsonrpc": "2.0", "method": "sum", "params": [1, 2, 4], "id": "1"},
                {"jsonrpc": "2.0", "method": "notify_hello", "params": [7]},
            ])
        );

        let single: Payload<Response> =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": 19})).unwrap();
        assert_eq!(single, Payload::Single(Response::success(Id::from(1u64), json!(19))));
    }
}
