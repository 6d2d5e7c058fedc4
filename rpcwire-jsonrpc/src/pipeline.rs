//! Per-request dispatch on the server side.
//!
//! One decoded request value goes through four stages in order: classify, resolve the method,
//! bind params, invoke.  The first stage that fails decides the error and the rest are skipped.
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::instrument;

use crate::anomaly::{Anomaly, WarnSink};
use crate::error::panic_err_to_string;
use crate::method::{Method, MethodError, MethodMap, Params};
use crate::types::{ErrorDetails, Id, JsonValue, Response};
use crate::validate;

/// A request that passed classification
#[derive(Debug)]
struct Call {
    id: Option<Id>,
    method: String,
    params: Option<JsonValue>,
}

pub(crate) struct Dispatcher {
    name: String,
    methods: MethodMap,
    warn: WarnSink,
}

impl Dispatcher {
    pub(crate) fn new(name: String, methods: MethodMap, warn: WarnSink) -> Self {
        Self { name, methods, warn }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn warn(&self) -> &WarnSink {
        &self.warn
    }

    /// Run the pipeline over one decoded value.
    ///
    /// Returns `None` for notifications, whatever the outcome of the method.
    #[instrument(skip_all, fields(server = %self.name, method, request_id))]
    pub(crate) async fn dispatch(&self, value: JsonValue) -> Option<Response> {
        let call = match Self::classify(value) {
            Ok(call) => call,
            Err(details) => {
                tracing::debug!("Rejecting malformed request");
                return Some(Response::error(Id::Null, details));
            }
        };

        let span = tracing::Span::current();
        span.record("method", call.method.as_str());
        if let Some(id) = &call.id {
            span.record("request_id", tracing::field::display(id));
        }

        let outcome = self.run(&call).await;

        match call.id {
            None => {
                tracing::trace!(failed = outcome.is_err(), "Notification handled; no response");
                None
            }
            Some(id) => Some(match outcome {
                Ok(result) => Response::success(id, result),
                Err(details) => Response::error(id, details),
            }),
        }
    }

    async fn run(&self, call: &Call) -> Result<JsonValue, ErrorDetails> {
        let method = self.resolve(&call.method)?;
        let params = Self::bind(call.params.as_ref())?;
        self.invoke(call, method, params).await
    }

    /// Stage 1: envelope shape.  Anything malformed is `INVALID_REQUEST`, and since its id can't
    /// be trusted the response id is null.
    fn classify(value: JsonValue) -> Result<Call, ErrorDetails> {
        if !validate::is_valid_request(&value) {
            return Err(ErrorDetails::invalid_request());
        }

        let JsonValue::Object(mut obj) = value else {
            return Err(ErrorDetails::invalid_request());
        };

        let method = match obj.remove("method") {
            Some(JsonValue::String(method)) => method,
            _ => return Err(ErrorDetails::invalid_request()),
        };

        let id = match obj.remove("id") {
            None => None,
            Some(id) => Some(serde_json::from_value::<Id>(id).map_err(|_| ErrorDetails::invalid_request())?),
        };

        Ok(Call {
            id,
            method,
            params: obj.remove("params"),
        })
    }

    /// Stage 2
    fn resolve(&self, method: &str) -> Result<Arc<dyn Method>, ErrorDetails> {
        self.methods.get(method).ok_or_else(|| {
            tracing::debug!("Method not found");
            ErrorDetails::method_not_found()
        })
    }

    /// Stage 3
    fn bind(params: Option<&JsonValue>) -> Result<Params, ErrorDetails> {
        Params::bind(params).ok_or_else(ErrorDetails::invalid_params)
    }

    /// Stage 4: call the method and reduce whatever happens to a wire-safe error.
    async fn invoke(&self, call: &Call, method: Arc<dyn Method>, params: Params) -> Result<JsonValue, ErrorDetails> {
        let outcome = AssertUnwindSafe(method.call(params)).catch_unwind().await;

        let anomaly = match outcome {
            Ok(Ok(result)) => return Ok(result),
            Ok(Err(MethodError::Protocol(details))) if details.is_reserved() => {
                tracing::debug!(code = details.code.code(), "Method returned a protocol error");
                return Err(details);
            }
            Ok(Err(MethodError::Protocol(details))) => Anomaly::UnreservedErrorCode {
                method: call.method.clone(),
                error: details,
            },
            Ok(Err(MethodError::Application(error))) => Anomaly::MethodFailed {
                method: call.method.clone(),
                error,
            },
            Err(panic) => Anomaly::MethodPanicked {
                method: call.method.clone(),
                message: panic_err_to_string(panic),
            },
        };

        self.warn.report(&self.name, anomaly);
        Err(ErrorDetails::internal_error())
    }
}
