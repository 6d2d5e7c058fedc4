//! Helpers for testing the JSON RPC implementation.
//!
//! This module is only compiled when `test` is enabled.  Integration tests include it by path, so
//! it must not refer to anything in this crate.
use std::sync::{Arc, Mutex};

/// Initialize tracing with a subscriber and some reasonable defaults suitable for enabling log
/// output in tests.
///
/// This is idempotent; it can be called from multiple tests in multiple threads but will only
/// initialize tracing once.
pub fn init_test_logging() {
    use std::sync::OnceLock;

    const DEFAULT_LOG_FILTER: &str = "debug";
    static INIT_LOGGING: OnceLock<()> = OnceLock::new();

    INIT_LOGGING.get_or_init(|| {
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
            .with_test_writer()
            .try_init()
            .unwrap()
    });
}

/// Records every payload handed to a send hook.
///
/// Only the unit tests use this; the integration test binaries that include this file by path
/// don't, hence the `dead_code` allowances.
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct Recorder {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[allow(dead_code)]
impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A send hook that appends to this recorder
    pub fn hook(&self) -> impl Fn(Vec<u8>) + Send + Sync + 'static {
        let sent = self.sent.clone();
        move |raw: Vec<u8>| sent.lock().unwrap().push(raw)
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Everything recorded so far, decoded as JSON
    pub fn json(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|raw| serde_json::from_slice(raw).unwrap())
            .collect()
    }
}
