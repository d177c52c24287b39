//! Inference backend boundary.
//!
//! Pipelines only see [`InferenceBackend`]: one request in, raw response text
//! out. Parsing and validation happen in [`crate::contracts`].

pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::{BackendError, Stage};

pub use openai::OpenAiBackend;

/// JSON Schema the response is expected to follow.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    pub name: String,
    pub schema: serde_json::Value,
}

impl ResponseFormat {
    pub fn for_type<T: JsonSchema>(name: &str) -> Self {
        let root = schemars::schema_for!(T);
        Self {
            name: name.to_string(),
            schema: serde_json::to_value(root).unwrap_or_default(),
        }
    }
}

/// One completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub stage: Stage,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub format: ResponseFormat,
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run one completion and return the raw message content.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError>;
}

/// Spaces successive calls at least `delay` apart, measured from the end of
/// the previous call.
pub struct Throttled {
    inner: Arc<dyn InferenceBackend>,
    delay: Duration,
    last_finished: Mutex<Option<Instant>>,
}

impl Throttled {
    pub fn new(inner: Arc<dyn InferenceBackend>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            last_finished: Mutex::new(None),
        }
    }
}

#[async_trait]
impl InferenceBackend for Throttled {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        let mut last = self.last_finished.lock().await;
        if let Some(finished) = *last {
            let since = finished.elapsed();
            if since < self.delay {
                let wait = self.delay - since;
                debug!(wait_ms = wait.as_millis() as u64, "Throttling backend call");
                tokio::time::sleep(wait).await;
            }
        }
        let result = self.inner.complete(request).await;
        *last = Some(Instant::now());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceBackend for Echo {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(request.user.clone())
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            stage: Stage::TagSingle,
            system: "sys".into(),
            user: "hello".into(),
            temperature: 0.0,
            format: ResponseFormat {
                name: "t".into(),
                schema: serde_json::json!({}),
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spaces_calls() {
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let throttled = Throttled::new(echo.clone(), Duration::from_secs(2));

        let start = Instant::now();
        throttled.complete(&request()).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));
        throttled.complete(&request()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
    }

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct Shape {
        name: String,
    }

    #[test]
    fn test_response_format_carries_schema() {
        let format = ResponseFormat::for_type::<Shape>("shape");
        assert_eq!(format.name, "shape");
        assert!(format.schema["properties"]["name"].is_object());
    }
}
