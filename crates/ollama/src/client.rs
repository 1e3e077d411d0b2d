//! HTTP client for the model server.

use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use modelhub_core::MalformedMessage;
use serde_json::{Map, Value};

use crate::error::OllamaError;

/// Timeout for the reachability check.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the model server lives and how long to wait on it.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Base URL, e.g. `http://127.0.0.1:11434`.
    pub base_url: String,
    /// Connect timeout, the wait for response headers, and the longest
    /// silence tolerated mid-stream.
    pub timeout: Duration,
}

impl OllamaConfig {
    pub fn new(ip: &str, port: u16, timeout: Duration) -> Self {
        Self {
            base_url: format!("http://{ip}:{port}"),
            timeout,
        }
    }
}

/// One JSON object from the `/api/create` progress stream, kept verbatim.
///
/// Typed accessors read the well-known keys; every other key is preserved
/// so the fragment can be relayed unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateProgress(Map<String, Value>);

impl CreateProgress {
    pub fn status(&self) -> Option<&str> {
        self.0.get("status").and_then(Value::as_str)
    }

    /// Error reported by the model server inside a 200 stream.
    pub fn error(&self) -> Option<&str> {
        self.0.get("error").and_then(Value::as_str)
    }

    /// `completed / total`, when both are reported and `total > 0`.
    pub fn ratio(&self) -> Option<f64> {
        let completed = self.0.get("completed").and_then(Value::as_u64)?;
        let total = self.0.get("total").and_then(Value::as_u64)?;
        (total > 0).then(|| (completed as f64 / total as f64).clamp(0.0, 1.0))
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for CreateProgress {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// A parsed line, or the raw text of a line that failed to parse.
#[derive(Debug, Clone)]
pub enum Fragment {
    Progress(CreateProgress),
    Malformed { raw: String, error: MalformedMessage },
}

impl Fragment {
    fn parse(line: String) -> Self {
        match serde_json::from_str::<Value>(&line) {
            Ok(Value::Object(fields)) => Fragment::Progress(fields.into()),
            Ok(_) => Fragment::Malformed {
                raw: line,
                error: MalformedMessage("expected a JSON object".to_string()),
            },
            Err(e) => Fragment::Malformed {
                raw: line,
                error: MalformedMessage(e.to_string()),
            },
        }
    }
}

/// HTTP client for a single model server.
#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    idle_timeout: Duration,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self, OllamaError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            idle_timeout: config.timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the model server answers `GET /` with 200.
    pub async fn ping(&self) -> Result<(), OllamaError> {
        let url = format!("{}/", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(PING_TIMEOUT)
            .send()
            .await
            .map_err(|e| OllamaError::Unreachable {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OllamaError::Unreachable {
                url,
                reason: format!("received status code {}", status.as_u16()),
            });
        }
        tracing::debug!(url = %url, "Model server reachable");
        Ok(())
    }

    /// Start `POST /api/create` and return its progress stream.
    pub async fn create_model(
        &self,
        name: &str,
        modelfile: &str,
    ) -> Result<CreateStream, OllamaError> {
        let body = serde_json::json!({
            "model": name,
            "modelfile": modelfile,
        });
        tracing::debug!(model = name, modelfile, "Creating model on model server");

        let request = self
            .client
            .post(format!("{}/api/create", self.base_url))
            .json(&body)
            .send();
        let response = tokio::time::timeout(self.idle_timeout, request)
            .await
            .map_err(|_| OllamaError::Timeout(self.idle_timeout))??;
        let response = Self::ensure_success(response).await?;

        Ok(CreateStream {
            chunks: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            buffer: Vec::new(),
            idle_timeout: self.idle_timeout,
            done: false,
        })
    }

    // ---- private helpers ----

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, OllamaError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(OllamaError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Line-delimited progress body of an `/api/create` call.
pub struct CreateStream {
    chunks: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    idle_timeout: Duration,
    done: bool,
}

impl CreateStream {
    /// Next parsed fragment. Blank lines are skipped; `None` at end of body.
    pub async fn next_fragment(&mut self) -> Option<Result<Fragment, OllamaError>> {
        self.next_line()
            .await
            .map(|line| line.map(Fragment::parse))
    }

    async fn next_line(&mut self) -> Option<Result<String, OllamaError>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                if let Some(text) = non_blank(&line) {
                    return Some(Ok(text));
                }
                continue;
            }

            if self.done {
                let rest = std::mem::take(&mut self.buffer);
                return non_blank(&rest).map(Ok);
            }

            match tokio::time::timeout(self.idle_timeout, self.chunks.next()).await {
                Err(_) => {
                    self.done = true;
                    self.buffer.clear();
                    return Some(Err(OllamaError::Timeout(self.idle_timeout)));
                }
                Ok(None) => self.done = true,
                Ok(Some(Err(e))) => {
                    self.done = true;
                    self.buffer.clear();
                    return Some(Err(e.into()));
                }
                Ok(Some(Ok(chunk))) => self.buffer.extend_from_slice(&chunk),
            }
        }
    }
}

fn non_blank(line: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
