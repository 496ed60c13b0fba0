use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::provider::{ChatRequest, LlmProvider, Message, ProviderError, Role};
use crate::stream::{parse_sse_line, SseParsed, StreamEvent};

/// Streaming client for the OpenAI chat completions API and compatible servers.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));

        debug!(model = %req.model, messages = req.messages.len(), tools = req.tools.len(), "sending streaming request to OpenAI");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "OpenAI streaming API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        process_openai_stream(resp, req.model.clone(), tx).await
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if !req.system.is_empty() {
        messages.push(serde_json::json!({
            "role": "system",
            "content": req.system,
        }));
    }
    messages.extend(req.messages.iter().map(wire_message));

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
        "stream": true,
        "stream_options": { "include_usage": true },
    });

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    },
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    body
}

fn wire_message(m: &Message) -> serde_json::Value {
    match m.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": m.tool_call_id,
            "content": m.content,
        }),
        Role::Assistant if !m.tool_calls.is_empty() => {
            let calls: Vec<serde_json::Value> = m
                .tool_calls
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.input.to_string(),
                        },
                    })
                })
                .collect();
            let content = if m.content.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::Value::String(m.content.clone())
            };
            serde_json::json!({
                "role": "assistant",
                "content": content,
                "tool_calls": calls,
            })
        }
        _ => serde_json::json!({
            "role": m.role,
            "content": m.content,
        }),
    }
}

/// Read the SSE body and forward decoded events to `tx`.
async fn process_openai_stream(
    resp: reqwest::Response,
    model: String,
    tx: mpsc::Sender<StreamEvent>,
) -> Result<(), ProviderError> {
    use futures_util::StreamExt;

    let mut decoder = StreamDecoder::new(model);
    let mut byte_stream = resp.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(|e| ProviderError::Stream(e.to_string()))?;
        for event in decoder.feed(&chunk) {
            if tx.send(event).await.is_err() {
                return Ok(()); // receiver dropped
            }
        }
        if decoder.is_done() {
            break;
        }
    }

    for event in decoder.finish()? {
        if tx.send(event).await.is_err() {
            break;
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Incremental decoder for the chat-completions SSE stream.
///
/// Tool-call arguments arrive in fragments keyed by call index; a call is
/// emitted as `ToolUse` once a later index starts or the choice finishes.
#[derive(Debug)]
struct StreamDecoder {
    model: String,
    tokens_in: u32,
    tokens_out: u32,
    stop_reason: String,
    line_buf: Vec<u8>,
    pending: BTreeMap<usize, PartialToolCall>,
    done: bool,
}

impl StreamDecoder {
    fn new(model: String) -> Self {
        Self {
            model,
            tokens_in: 0,
            tokens_out: 0,
            stop_reason: String::new(),
            line_buf: Vec::new(),
            pending: BTreeMap::new(),
            done: false,
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.line_buf.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.line_buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.line_buf.drain(..=pos).collect();
            if self.done {
                continue;
            }
            match std::str::from_utf8(&line) {
                Ok(line) => self.handle_line(line.trim(), &mut events),
                Err(_) => debug!("skipping non-UTF-8 SSE line"),
            }
        }
        events
    }

    /// Flush outstanding tool calls and emit `Done`. Fails if the stream
    /// closed without a finish reason or `[DONE]` marker.
    fn finish(mut self) -> Result<Vec<StreamEvent>, ProviderError> {
        if !self.done && self.stop_reason.is_empty() {
            return Err(ProviderError::Stream(
                "stream closed before completion".to_string(),
            ));
        }
        let mut events = Vec::new();
        self.flush_tool_calls(usize::MAX, &mut events);
        events.push(StreamEvent::Done {
            model: self.model,
            tokens_in: self.tokens_in,
            tokens_out: self.tokens_out,
            stop_reason: self.stop_reason,
        });
        Ok(events)
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        if line.is_empty() {
            return;
        }
        let Some(SseParsed::Data(data)) = parse_sse_line(line) else {
            return;
        };
        // OpenAI signals end-of-stream with a literal `[DONE]` data value
        if data.trim() == "[DONE]" {
            self.done = true;
            return;
        }

        let chunk: StreamChunk = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "skipping unparseable stream chunk");
                return;
            }
        };

        if let Some(err) = chunk.error {
            events.push(StreamEvent::Error {
                message: err.message,
            });
            self.done = true;
            return;
        }
        if let Some(model) = chunk.model {
            self.model = model;
        }
        if let Some(usage) = &chunk.usage {
            self.tokens_in = usage.prompt_tokens;
            self.tokens_out = usage.completion_tokens;
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    events.push(StreamEvent::TextDelta { text: content });
                }
            }
            for delta in choice.delta.tool_calls {
                // A new index means every earlier call is complete.
                self.flush_tool_calls(delta.index, events);
                let call = self.pending.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    call.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        call.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        call.arguments.push_str(&arguments);
                    }
                }
            }
            if let Some(reason) = choice.finish_reason.filter(|r| !r.is_empty()) {
                self.flush_tool_calls(usize::MAX, events);
                self.stop_reason = reason;
            }
        }
    }

    /// Emit every pending call with an index below `before`, in index order.
    fn flush_tool_calls(&mut self, before: usize, events: &mut Vec<StreamEvent>) {
        let keep = self.pending.split_off(&before);
        let complete = std::mem::replace(&mut self.pending, keep);
        for (_, call) in complete {
            let input = parse_arguments(&call.arguments);
            events.push(StreamEvent::ToolUse {
                id: call.id,
                name: call.name,
                input,
            });
        }
    }
}

/// Arguments are a JSON document in string form. Invalid JSON is passed
/// through as a string so the tool can report it.
fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

// OpenAI streaming chunk types (private, deserialization only)

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<StreamUsage>,
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct StreamError {
    message: String,
}
