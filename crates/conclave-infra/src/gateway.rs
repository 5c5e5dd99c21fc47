//! HTTP model gateway.
//!
//! Bots are invoked through an external gateway that speaks newline-delimited
//! JSON: the request body is one [`InvocationRequest`], the response body is a
//! stream of [`BotOutput`] objects, one per line. Tools run through a second
//! endpoint that takes `{bot_id, tool, arguments}` and answers with
//! `{"output": "..."}`.

use std::sync::Arc;
use std::time::Duration;

use conclave_core::dispatch::invoker::{
    BotInvoker, BotOutputStream, BoxToolExecutor, ToolExecutor, UnavailableInvoker,
};
use conclave_types::config::InvokerConfig;
use conclave_types::error::InvocationError;
use conclave_types::invocation::{BotOutput, InvocationRequest};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

/// Build a reqwest client with the gateway timeout applied to whole requests.
fn build_client(timeout_secs: u64) -> Result<reqwest::Client, InvocationError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| InvocationError::Provider(format!("failed to build HTTP client: {e}")))
}

fn request_error(e: reqwest::Error, timeout_secs: u64) -> InvocationError {
    if e.is_timeout() {
        InvocationError::Timeout(timeout_secs)
    } else {
        InvocationError::Provider(format!("HTTP request failed: {e}"))
    }
}

/// Parse one NDJSON line. Blank lines are keep-alives.
fn parse_line(line: &[u8]) -> Option<Result<BotOutput, InvocationError>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    Some(
        serde_json::from_slice(line)
            .map_err(|e| InvocationError::Provider(format!("malformed gateway output: {e}"))),
    )
}

/// Remove every complete line from the front of `buffer`.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let mut line: Vec<u8> = buffer.drain(..=pos).collect();
        line.pop();
        lines.push(line);
    }
    lines
}

/// [`BotInvoker`] that posts to an HTTP gateway and streams its NDJSON reply.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: reqwest::Client,
    endpoint: String,
    timeout_secs: u64,
}

impl HttpInvoker {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self, InvocationError> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            endpoint: endpoint.into(),
            timeout_secs,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl BotInvoker for HttpInvoker {
    fn name(&self) -> &str {
        "http"
    }

    fn invoke(&self, request: InvocationRequest) -> BotOutputStream {
        let client = self.client.clone();
        let url = self.endpoint.clone();
        let timeout_secs = self.timeout_secs;

        Box::pin(async_stream::try_stream! {
            tracing::debug!(bot = %request.bot_id, room = %request.room_id, url = %url, "invoking bot");

            let response = client
                .post(&url)
                .header("Accept", "application/x-ndjson")
                .json(&request)
                .send()
                .await
                .map_err(|e| request_error(e, timeout_secs))?;

            let status = response.status();
            let response = if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(status = %status, body = %body, "gateway error response");
                Err(InvocationError::Provider(format!("HTTP {status}: {body}")))?;
                unreachable!()
            } else {
                response
            };

            let mut byte_stream = response.bytes_stream();
            let mut buffer = Vec::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk.map_err(|e| request_error(e, timeout_secs))?;
                buffer.extend_from_slice(&chunk);

                for line in drain_lines(&mut buffer) {
                    if let Some(output) = parse_line(&line) {
                        yield output?;
                    }
                }
            }

            // Final line without a trailing newline
            if let Some(output) = parse_line(&buffer) {
                yield output?;
            }
        })
    }
}

#[derive(Debug, Serialize)]
struct ToolRequest<'a> {
    bot_id: &'a str,
    tool: &'a str,
    arguments: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ToolResponse {
    #[serde(default)]
    output: String,
}

/// [`ToolExecutor`] that runs tools through the gateway's tool endpoint.
#[derive(Debug, Clone)]
pub struct HttpToolExecutor {
    client: reqwest::Client,
    endpoint: String,
    timeout_secs: u64,
}

impl HttpToolExecutor {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self, InvocationError> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            endpoint: endpoint.into(),
            timeout_secs,
        })
    }
}

impl ToolExecutor for HttpToolExecutor {
    async fn execute(
        &self,
        bot_id: &str,
        tool: &str,
        arguments: &serde_json::Value,
    ) -> Result<String, InvocationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ToolRequest {
                bot_id,
                tool,
                arguments,
            })
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout_secs))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(InvocationError::UnknownTool(tool.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InvocationError::Provider(format!("HTTP {status}: {body}")));
        }

        let body: ToolResponse = response
            .json()
            .await
            .map_err(|e| InvocationError::Provider(format!("malformed tool response: {e}")))?;
        Ok(body.output)
    }
}

/// Tool endpoint for a config: explicit, or `{endpoint}/tools`.
fn tool_endpoint(config: &InvokerConfig) -> Option<String> {
    config.tool_endpoint.clone().or_else(|| {
        config
            .endpoint
            .as_deref()
            .map(|e| format!("{}/tools", e.trim_end_matches('/')))
    })
}

/// Build the invoker and tool executor a config asks for.
///
/// Without an endpoint every invocation fails with `Unavailable` and no
/// tools exist. A client that cannot be built degrades the same way.
pub fn from_config(config: &InvokerConfig) -> (Arc<dyn BotInvoker>, BoxToolExecutor) {
    let invoker: Arc<dyn BotInvoker> = match config.endpoint.as_deref() {
        Some(endpoint) => match HttpInvoker::new(endpoint, config.timeout_secs) {
            Ok(invoker) => {
                tracing::info!(endpoint, "model gateway configured");
                Arc::new(invoker)
            }
            Err(e) => {
                tracing::warn!("{e}, bots will be unavailable");
                Arc::new(UnavailableInvoker)
            }
        },
        None => {
            tracing::info!("no model gateway configured, bots will be unavailable");
            Arc::new(UnavailableInvoker)
        }
    };

    let tools = match tool_endpoint(config) {
        Some(endpoint) => match HttpToolExecutor::new(endpoint, config.timeout_secs) {
            Ok(executor) => BoxToolExecutor::new(executor),
            Err(e) => {
                tracing::warn!("{e}, tools disabled");
                BoxToolExecutor::default()
            }
        },
        None => BoxToolExecutor::default(),
    };

    (invoker, tools)
}
