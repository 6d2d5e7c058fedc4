//! Server-side method abstraction: what a method receives, how it fails, and the name table.
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, json};
use thiserror::Error;

use crate::types::{ErrorDetails, JsonValue};

/// Parameters of a request, bound by shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    /// The request had no `params`
    #[default]
    None,
    /// `params` was an array
    Positional(Vec<JsonValue>),
    /// `params` was an object
    Named(Map<String, JsonValue>),
}

impl Params {
    /// Bind the raw `params` member of a request.  `None` means the value has a type that cannot
    /// be bound (not an array or object).
    pub(crate) fn bind(value: Option<&JsonValue>) -> Option<Self> {
        match value {
            None => Some(Params::None),
            Some(JsonValue::Array(items)) => Some(Params::Positional(items.clone())),
            Some(JsonValue::Object(map)) => Some(Params::Named(map.clone())),
            Some(_) => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Params::None)
    }

    pub fn into_value(self) -> Option<JsonValue> {
        match self {
            Params::None => None,
            Params::Positional(items) => Some(JsonValue::Array(items)),
            Params::Named(map) => Some(JsonValue::Object(map)),
        }
    }

    /// Deserialize the params into a concrete type.
    ///
    /// Positional params deserialize like a JSON array (tuples, `Vec`, tuple structs), named
    /// params like a JSON object.  Absent params deserialize like `null`, which suits `()` and
    /// `Option<T>`.  A mismatch is reported to the caller as `INVALID_PARAMS`.
    pub fn parse<T: DeserializeOwned>(self) -> Result<T, MethodError> {
        let value = self.into_value().unwrap_or(JsonValue::Null);
        serde_json::from_value(value).map_err(|e| {
            MethodError::Protocol(ErrorDetails::invalid_params().with_data(json!({ "reason": e.to_string() })))
        })
    }
}

/// Failure of a method invocation.
///
/// `Protocol` errors go on the wire as they are, provided their code is in a reserved range.
/// `Application` errors never do: the caller sees `INTERNAL_ERROR` and the details go to the
/// anomaly sink.
#[derive(Debug, Error)]
pub enum MethodError {
    #[error("JSON-RPC error {}: {}", .0.code.code(), .0.message)]
    Protocol(ErrorDetails),

    #[error(transparent)]
    Application(#[from] anyhow::Error),
}

impl MethodError {
    /// An implementation-defined server error, code in `-32099..=-32000`
    pub fn server_error(code: i32, message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        MethodError::Protocol(ErrorDetails::server_error(code, message, data))
    }

    pub fn invalid_params(reason: impl fmt::Display) -> Self {
        MethodError::Protocol(ErrorDetails::invalid_params().with_data(json!({ "reason": reason.to_string() })))
    }
}

impl From<ErrorDetails> for MethodError {
    fn from(details: ErrorDetails) -> Self {
        MethodError::Protocol(details)
    }
}

/// A callable JSON-RPC method.
///
/// Implemented for any `Fn(Params) -> impl Future<Output = Result<R, E>>` where `R` serializes
/// and `E` converts into [`MethodError`], so most methods are just async closures.
#[async_trait]
pub trait Method: Send + Sync + 'static {
    async fn call(&self, params: Params) -> Result<JsonValue, MethodError>;
}

#[async_trait]
impl<F, Fut, R, E> Method for F
where
    F: Fn(Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Serialize + Send + 'static,
    E: Into<MethodError> + Send + 'static,
{
    async fn call(&self, params: Params) -> Result<JsonValue, MethodError> {
        let result = (self)(params).await.map_err(Into::into)?;

        serde_json::to_value(result).map_err(|e| {
            MethodError::Application(anyhow::Error::new(e).context("Failed to serialize method result"))
        })
    }
}

/// Name to method table of a server
#[derive(Clone, Default)]
pub struct MethodMap {
    methods: HashMap<String, Arc<dyn Method>>,
}

impl MethodMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method, replacing any existing method with the same name
    pub fn insert(&mut self, name: impl Into<String>, method: impl Method) {
        self.methods.insert(name.into(), Arc::new(method));
    }

    pub fn with(mut self, name: impl Into<String>, method: impl Method) -> Self {
        self.insert(name, method);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Method>> {
        self.methods.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn extend(&mut self, other: MethodMap) {
        self.methods.extend(other.methods);
    }
}

impl fmt::Debug for MethodMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.methods.keys().collect();
        names.sort();
        f.debug_struct("MethodMap").field("methods", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde::Deserialize;

    #[test]
    fn bind_by_shape() {
        assert_eq!(Params::bind(None), Some(Params::None));
        assert_eq!(Params::bind(Some(&json!([1, 2]))), Some(Params::Positional(vec![json!(1), json!(2)])));
        assert_matches!(Params::bind(Some(&json!({"a": 1}))), Some(Params::Named(map)) if map["a"] == json!(1));
        assert_eq!(Params::bind(Some(&json!(null))), None);
        assert_eq!(Params::bind(Some(&json!("str"))), None);
        assert_eq!(Params::bind(Some(&json!(5))), None);
    }

    #[test]
    fn parse_positional_and_named() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Greeting {
            name: String,
            excited: bool,
        }

        let (a, b): (i64, i64) = Params::Positional(vec![json!(2), json!(3)]).parse().unwrap();
        assert_eq!((a, b), (2, 3));

        let mut map = Map::new();
        map.insert("name".into(), json!("world"));
        map.insert("excited".into(), json!(true));
        let greeting: Greeting = Params::Named(map).parse().unwrap();
        assert_eq!(
            greeting,
            Greeting {
                name: "world".into(),
                excited: true
            }
        );

        let () = Params::None.parse().unwrap();
    }

    #[test]
    fn parse_failure_is_invalid_params() {
        let result = Params::Positional(vec![json!("two"), json!(3)]).parse::<(i64, i64)>();
        assert_matches!(
            result,
            Err(MethodError::Protocol(details)) if details.code.code() == -32602 && details.data.is_some()
        );
    }

    #[tokio::test]
    async fn closures_are_methods() {
        let add = |params: Params| async move {
            let (a, b): (i64, i64) = params.parse()?;
            Ok::<_, MethodError>(a + b)
        };

        let result = Method::call(&add, Params::Positional(vec![json!(2), json!(3)]))
            .await
            .unwrap();
        assert_eq!(result, json!(5));

        let failing = |_params: Params| async move { Err::<(), _>(anyhow::anyhow!("database is down")) };
        assert_matches!(
            Method::call(&failing, Params::None).await,
            Err(MethodError::Application(_))
        );
    }

    #[test]
    fn method_map_lookup() {
        let map = MethodMap::new()
            .with("ping", |_: Params| async move { Ok::<_, MethodError>("pong") })
            .with("echo", |params: Params| async move { Ok::<_, MethodError>(params.into_value()) });

        assert_eq!(map.len(), 2);
        assert!(map.contains("ping"));
        assert!(map.get("echo").is_some());
        assert!(map.get("missing").is_none());
        assert_eq!(format!("{map:?}"), r#"MethodMap { methods: ["echo", "ping"] }"#);
    }
}
