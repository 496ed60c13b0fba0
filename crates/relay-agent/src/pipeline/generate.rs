//! Retry-integrated generation loop.
//!
//! Streams one model response into a delivery buffer. Text deltas are
//! appended as they arrive; each completed tool call is executed inline, its
//! annotation appended to the same buffer, and its result recorded for the
//! next request. A response that called tools is followed by another request
//! (a tool round). A failed attempt is retried after a fixed backoff without
//! clearing the buffer; once the retry budget is spent the buffer is aborted.

use std::time::Duration;

use relay_core::config::{AgentConfig, DeliveryConfig};
use relay_delivery::BufferWriter;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::provider::{ChatRequest, LlmProvider, Message, ProviderError, ToolCall};
use crate::stream::StreamEvent;
use crate::tools::{ToolResult, ToolSet};

/// Limits applied to one turn's generation.
#[derive(Debug, Clone)]
pub struct GenerationPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Upper bound on generate -> tool calls -> generate rounds.
    pub max_tool_rounds: usize,
    /// Fail an attempt that yields no stream event for this long.
    pub idle_timeout: Option<Duration>,
}

impl GenerationPolicy {
    pub fn from_config(agent: &AgentConfig, delivery: &DeliveryConfig) -> Self {
        Self {
            max_retries: delivery.max_retries,
            retry_backoff: delivery.retry_backoff(),
            max_tool_rounds: agent.max_tool_rounds.max(1),
            idle_timeout: delivery.stream_idle_timeout(),
        }
    }
}

/// Summary of a generation run that reached the end of the response.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
    /// Failed attempts that were retried.
    pub retries: u32,
    pub tool_rounds: usize,
    /// Names of every tool called, in call order.
    pub tools_called: Vec<String>,
}

/// What one streaming attempt produced before it ended.
#[derive(Debug, Default)]
struct Attempt {
    text: String,
    exchanges: Vec<(ToolCall, ToolResult)>,
    done: Option<(String, u32, u32, String)>,
}

/// Run generation for `request`, writing into `writer`.
///
/// On success the buffer is finished; when the retry budget is exhausted it
/// is aborted and the last error returned. Either way the writer is terminal
/// when this returns.
pub async fn generate_into(
    provider: &dyn LlmProvider,
    tools: &ToolSet,
    mut request: ChatRequest,
    writer: &BufferWriter,
    policy: &GenerationPolicy,
) -> Result<Generation, ProviderError> {
    let mut summary = Generation::default();
    let mut failures: u32 = 0;

    loop {
        let (attempt, result) = run_attempt(provider, tools, &request, writer, policy.idle_timeout).await;

        summary
            .tools_called
            .extend(attempt.exchanges.iter().map(|(call, _)| call.name.clone()));
        let called_tools = !attempt.exchanges.is_empty();

        // Completed tool calls stay in the conversation, even from a failed
        // attempt, so a retry does not repeat them.
        if called_tools {
            let (calls, results): (Vec<_>, Vec<_>) = attempt.exchanges.into_iter().unzip();
            let ids: Vec<String> = calls.iter().map(|c| c.id.clone()).collect();
            request
                .messages
                .push(Message::assistant_tool_calls(attempt.text, calls));
            for (id, result) in ids.into_iter().zip(results) {
                request.messages.push(Message::tool_result(id, result.content));
            }
        }

        match result {
            Ok(()) => {
                if let Some((model, tokens_in, tokens_out, stop_reason)) = attempt.done {
                    summary.model = model;
                    summary.tokens_in += tokens_in;
                    summary.tokens_out += tokens_out;
                    summary.stop_reason = stop_reason;
                }

                if !called_tools {
                    info!(
                        retries = summary.retries,
                        tool_rounds = summary.tool_rounds,
                        tokens_out = summary.tokens_out,
                        "generation complete"
                    );
                    writer.finish();
                    return Ok(summary);
                }

                summary.tool_rounds += 1;
                if summary.tool_rounds >= policy.max_tool_rounds {
                    warn!(
                        max_tool_rounds = policy.max_tool_rounds,
                        "tool round limit reached, finishing turn"
                    );
                    writer.finish();
                    return Ok(summary);
                }
                debug!(round = summary.tool_rounds, "re-issuing request with tool results");
            }
            Err(e) => {
                failures += 1;
                if failures > policy.max_retries {
                    warn!(attempts = failures, error = %e, "generation failed, retries exhausted");
                    writer.abort(e.to_string());
                    return Err(e);
                }
                summary.retries += 1;
                warn!(
                    attempt = failures,
                    max_retries = policy.max_retries,
                    error = %e,
                    "generation attempt failed, retrying"
                );
                tokio::time::sleep(policy.retry_backoff).await;
            }
        }
    }
}

/// Stream one request. Events are consumed while the provider call runs;
/// tool calls are executed as they arrive.
async fn run_attempt(
    provider: &dyn LlmProvider,
    tools: &ToolSet,
    request: &ChatRequest,
    writer: &BufferWriter,
    idle_timeout: Option<Duration>,
) -> (Attempt, Result<(), ProviderError>) {
    let mut attempt = Attempt::default();
    let (stream_tx, mut stream_rx) = mpsc::channel::<StreamEvent>(64);
    let send_fut = provider.send_stream(request, stream_tx);
    tokio::pin!(send_fut);
    let mut send_finished = false;
    let mut send_error = None;

    loop {
        tokio::select! {
            event = next_event(&mut stream_rx, idle_timeout) => {
                let event = match event {
                    Ok(Some(event)) => event,
                    // Sender dropped: the provider call has returned.
                    Ok(None) => break,
                    Err(e) => return (attempt, Err(e)),
                };
                match event {
                    StreamEvent::TextDelta { text } => {
                        writer.append(&text);
                        attempt.text.push_str(&text);
                    }
                    StreamEvent::ToolUse { id, name, input } => {
                        let call = ToolCall { id, name, input };
                        let result = tools.execute(&call).await;
                        writer.append_block(&tool_annotation(&call, &result));
                        attempt.exchanges.push((call, result));
                    }
                    StreamEvent::Done { model, tokens_in, tokens_out, stop_reason } => {
                        attempt.done = Some((model, tokens_in, tokens_out, stop_reason));
                    }
                    StreamEvent::Error { message } => {
                        return (attempt, Err(ProviderError::Stream(message)));
                    }
                }
            }
            result = &mut send_fut, if !send_finished => {
                send_finished = true;
                // Events sent before a failure still count; keep draining
                // until the channel closes.
                send_error = result.err();
            }
        }
    }

    match send_error {
        Some(e) => (attempt, Err(e)),
        None => (attempt, Ok(())),
    }
}

async fn next_event(
    rx: &mut mpsc::Receiver<StreamEvent>,
    idle_timeout: Option<Duration>,
) -> Result<Option<StreamEvent>, ProviderError> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, rx.recv())
            .await
            .map_err(|_| ProviderError::StreamIdle {
                ms: limit.as_millis() as u64,
            }),
        None => Ok(rx.recv().await),
    }
}

/// The line shown to users for a tool call.
pub fn tool_annotation(call: &ToolCall, result: &ToolResult) -> String {
    if result.is_error {
        format!("-# Tool `{}` execution failed: {}", call.name, result.content)
    } else {
        format!("-# Used tool `{}` with arguments `{}`", call.name, call.input)
    }
}
