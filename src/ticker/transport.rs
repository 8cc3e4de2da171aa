// src/ticker/transport.rs
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::TickerConfig;
use crate::error::TransportError;

/// Thin JSON-over-HTTP seam. No retries, no status interpretation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, path: &str, params: &[(String, String)]) -> Result<Value, TransportError>;
    async fn post(&self, path: &str, body: Option<&Value>) -> Result<Value, TransportError>;
    fn name(&self) -> &'static str;
}

/// reqwest-backed transport against a configurable base URL.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration, connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ticker-feed/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connect(error_chain(&e)))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
            timeout,
        })
    }

    pub fn from_config(cfg: &TickerConfig) -> Result<Self, TransportError> {
        Self::new(
            cfg.base_url.clone(),
            Duration::from_millis(cfg.request_timeout_ms),
            Duration::from_millis(cfg.connect_timeout_ms),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn map_send_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Connect(error_chain(&e))
        }
    }

    async fn read_json(&self, resp: reqwest::Response) -> Result<Value, TransportError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        let bytes = resp.bytes().await.map_err(|e| self.map_send_error(e))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str, params: &[(String, String)]) -> Result<Value, TransportError> {
        let resp = self
            .client
            .get(self.url(path))
            .query(params)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        self.read_json(resp).await
    }

    async fn post(&self, path: &str, body: Option<&Value>) -> Result<Value, TransportError> {
        let mut req = self
            .client
            .post(self.url(path))
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req.send().await.map_err(|e| self.map_send_error(e))?;
        self.read_json(resp).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// reqwest hides the interesting part (e.g. "Connection refused") in the source chain.
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut out = e.to_string();
    let mut cur = e.source();
    while let Some(src) = cur {
        out.push_str(": ");
        out.push_str(&src.to_string());
        cur = src.source();
    }
    out
}

// --- In-process transport for tests and offline runs ---

#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Fail(TransportError),
}

#[derive(Debug, Clone)]
struct Step {
    reply: Reply,
    delay: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

#[derive(Default)]
struct ScriptState {
    routes: HashMap<String, VecDeque<Step>>,
    calls: Vec<RecordedCall>,
}

/// Replies are queued per path; the last queued reply for a path repeats.
/// Unscripted paths answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    state: Mutex<ScriptState>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(self, path: &str, value: Value) -> Self {
        self.push(path, Reply::Json(value), None);
        self
    }

    pub fn with_failure(self, path: &str, err: TransportError) -> Self {
        self.push(path, Reply::Fail(err), None);
        self
    }

    pub fn with_delayed_json(self, path: &str, value: Value, delay: Duration) -> Self {
        self.push(path, Reply::Json(value), Some(delay));
        self
    }

    pub fn push(&self, path: &str, reply: Reply, delay: Option<Duration>) {
        let mut st = self.state.lock().expect("script mutex poisoned");
        st.routes
            .entry(path.to_string())
            .or_default()
            .push_back(Step { reply, delay });
    }

    /// Drop everything queued for `path`; following calls use only what is pushed next.
    pub fn reset_path(&self, path: &str) {
        let mut st = self.state.lock().expect("script mutex poisoned");
        st.routes.remove(path);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().expect("script mutex poisoned").calls.clone()
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.state
            .lock()
            .expect("script mutex poisoned")
            .calls
            .iter()
            .filter(|c| c.path == path)
            .count()
    }

    async fn answer(&self, call: RecordedCall) -> Result<Value, TransportError> {
        let step = {
            let mut st = self.state.lock().expect("script mutex poisoned");
            let path = call.path.clone();
            st.calls.push(call);
            match st.routes.get_mut(&path) {
                Some(q) if q.len() > 1 => q.pop_front(),
                Some(q) => q.front().cloned(),
                None => None,
            }
        };
        let Some(step) = step else {
            return Err(TransportError::Status {
                status: 404,
                body: "no scripted response".into(),
            });
        };
        if let Some(d) = step.delay {
            tokio::time::sleep(d).await;
        }
        match step.reply {
            Reply::Json(v) => Ok(v),
            Reply::Fail(e) => Err(e),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, path: &str, params: &[(String, String)]) -> Result<Value, TransportError> {
        self.answer(RecordedCall {
            method: "GET",
            path: path.to_string(),
            params: params.to_vec(),
            body: None,
        })
        .await
    }

    async fn post(&self, path: &str, body: Option<&Value>) -> Result<Value, TransportError> {
        self.answer(RecordedCall {
            method: "POST",
            path: path.to_string(),
            params: Vec::new(),
            body: body.cloned(),
        })
        .await
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
