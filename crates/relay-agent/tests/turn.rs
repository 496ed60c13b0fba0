use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relay_agent::pipeline::{run_turn, GenerationPolicy};
use relay_agent::provider::{ChatRequest, LlmProvider, Message, ProviderError, Role};
use relay_agent::tools::ToolSet;
use relay_agent::StreamEvent;
use relay_core::config::DeliveryConfig;
use relay_delivery::{ChunkSink, DeliveryError, TurnState};
use tokio::sync::mpsc;
use tokio::time::Instant;

enum Step {
    Text(&'static str),
    Tool(&'static str, serde_json::Value),
    Done,
    Fail(&'static str),
    Hang,
}

/// Plays back one script per request and records every request it receives.
struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        self.requests.lock().unwrap().push(req.clone());
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        let mut call_index = 0;
        for step in script {
            let event = match step {
                Step::Text(text) => StreamEvent::TextDelta { text: text.into() },
                Step::Tool(name, input) => {
                    call_index += 1;
                    StreamEvent::ToolUse {
                        id: format!("call_{call_index}"),
                        name: name.into(),
                        input,
                    }
                }
                Step::Done => StreamEvent::Done {
                    model: "scripted-model".into(),
                    tokens_in: 10,
                    tokens_out: 5,
                    stop_reason: "stop".into(),
                },
                Step::Fail(message) => return Err(ProviderError::Unavailable(message.into())),
                Step::Hang => std::future::pending().await,
            };
            let _ = tx.send(event).await;
        }
        Ok(())
    }
}

#[derive(Default)]
struct MockSink {
    sent: Mutex<Vec<(Instant, String)>>,
}

impl MockSink {
    fn contents(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }
}

#[async_trait]
impl ChunkSink for MockSink {
    async fn send_chunk(&self, content: &str) -> Result<String, DeliveryError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((Instant::now(), content.to_string()));
        Ok(format!("m{}", sent.len()))
    }

    async fn notify_typing(&self) {}
}

fn request() -> ChatRequest {
    ChatRequest {
        model: "scripted-model".into(),
        system: "Current time: test".into(),
        messages: vec![Message::user("Alice (Message ID: 1) - 2024-01-01 00:00:00 UTC:\nhi")],
        max_tokens: 256,
        tools: ToolSet::builtin().definitions(),
    }
}

fn delivery() -> DeliveryConfig {
    DeliveryConfig {
        abort_message: "Error: generation failed.".into(),
        ..DeliveryConfig::default()
    }
}

fn policy() -> GenerationPolicy {
    GenerationPolicy::from_config(&Default::default(), &delivery())
}

#[tokio::test(start_paused = true)]
async fn tool_call_is_annotated_between_parts() {
    let provider = ScriptedProvider::new(vec![
        vec![
            Step::Text("Part A"),
            Step::Tool("calculate_equation", serde_json::json!({ "equation": "2+2" })),
            Step::Done,
        ],
        vec![Step::Text("Part B"), Step::Done],
    ]);
    let sink = Arc::new(MockSink::default());

    let outcome = run_turn(&provider, &ToolSet::builtin(), request(), sink.clone(), &policy(), &delivery()).await;

    let generation = outcome.generation.unwrap();
    assert_eq!(generation.tool_rounds, 1);
    assert_eq!(generation.tools_called, vec!["calculate_equation"]);
    assert_eq!(generation.tokens_out, 10);
    assert_eq!(outcome.delivery.state, TurnState::Done);
    assert_eq!(
        sink.contents(),
        vec![
            "Part A".to_string(),
            "-# Used tool `calculate_equation` with arguments `{\"equation\":\"2+2\"}`".to_string(),
            "Part B".to_string(),
        ]
    );

    // The follow-up request carries the tool exchange.
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    let follow_up = &requests[1].messages;
    assert_eq!(follow_up.len(), 3);
    assert_eq!(follow_up[1].role, Role::Assistant);
    assert_eq!(follow_up[1].content, "Part A");
    assert_eq!(follow_up[1].tool_calls[0].name, "calculate_equation");
    assert_eq!(follow_up[2].role, Role::Tool);
    assert_eq!(follow_up[2].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(follow_up[2].content, "4");
}

#[tokio::test(start_paused = true)]
async fn failed_attempt_is_retried_after_backoff() {
    let provider = ScriptedProvider::new(vec![
        vec![Step::Text("Partial answer.\n\n"), Step::Fail("connection reset")],
        vec![Step::Text("Full answer."), Step::Done],
    ]);
    let sink = Arc::new(MockSink::default());
    let started = Instant::now();

    let outcome = run_turn(&provider, &ToolSet::builtin(), request(), sink.clone(), &policy(), &delivery()).await;

    let generation = outcome.generation.unwrap();
    assert_eq!(generation.retries, 1);
    assert!(started.elapsed() >= Duration::from_millis(2000));
    // Already-produced text is kept; the retry appends after it.
    assert_eq!(sink.contents(), vec!["Partial answer.", "Full answer."]);
    assert_eq!(provider.requests()[1].messages.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_abort_with_single_notice() {
    let provider = ScriptedProvider::new(vec![
        vec![Step::Text("One.\n\nTwo.\n\nThr"), Step::Fail("503")],
        vec![Step::Fail("503")],
        vec![Step::Fail("503")],
        vec![Step::Fail("503")],
    ]);
    let sink = Arc::new(MockSink::default());

    let outcome = run_turn(&provider, &ToolSet::builtin(), request(), sink.clone(), &policy(), &delivery()).await;

    assert!(outcome.generation.is_err());
    assert_eq!(provider.requests().len(), 4);
    assert_eq!(outcome.delivery.state, TurnState::Aborted);
    // "One." was settled and already out; the rest is discarded.
    assert_eq!(sink.contents(), vec!["One.", "Error: generation failed."]);
}

#[tokio::test(start_paused = true)]
async fn tool_results_survive_a_retry() {
    let provider = ScriptedProvider::new(vec![
        vec![
            Step::Tool("calculate_equation", serde_json::json!({ "equation": "6*7" })),
            Step::Fail("stream dropped"),
        ],
        vec![Step::Text("The answer is 42."), Step::Done],
    ]);
    let sink = Arc::new(MockSink::default());

    let outcome = run_turn(&provider, &ToolSet::builtin(), request(), sink.clone(), &policy(), &delivery()).await;

    let generation = outcome.generation.unwrap();
    assert_eq!(generation.retries, 1);
    assert_eq!(generation.tool_rounds, 0);
    let retry = &provider.requests()[1].messages;
    assert_eq!(retry.len(), 3);
    assert_eq!(retry[2].content, "42");
    assert_eq!(
        sink.contents(),
        vec![
            "-# Used tool `calculate_equation` with arguments `{\"equation\":\"6*7\"}`".to_string(),
            "The answer is 42.".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failing_tool_is_reported_inline() {
    let provider = ScriptedProvider::new(vec![
        vec![
            Step::Tool("calculate_equation", serde_json::json!({ "equation": "1/0" })),
            Step::Done,
        ],
        vec![Step::Text("Cannot divide by zero."), Step::Done],
    ]);
    let sink = Arc::new(MockSink::default());

    let outcome = run_turn(&provider, &ToolSet::builtin(), request(), sink.clone(), &policy(), &delivery()).await;

    assert!(outcome.generation.is_ok());
    assert_eq!(
        sink.contents(),
        vec![
            "-# Tool `calculate_equation` execution failed: Invalid equation: division by zero".to_string(),
            "Cannot divide by zero.".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn idle_stream_counts_as_failed_attempt() {
    let provider = ScriptedProvider::new(vec![
        vec![Step::Hang],
        vec![Step::Text("Recovered."), Step::Done],
    ]);
    let sink = Arc::new(MockSink::default());
    let policy = GenerationPolicy {
        idle_timeout: Some(Duration::from_secs(5)),
        ..policy()
    };
    let started = Instant::now();

    let outcome = run_turn(&provider, &ToolSet::builtin(), request(), sink.clone(), &policy, &delivery()).await;

    assert_eq!(outcome.generation.unwrap().retries, 1);
    assert!(started.elapsed() >= Duration::from_secs(7));
    assert_eq!(sink.contents(), vec!["Recovered."]);
}

#[tokio::test(start_paused = true)]
async fn tool_rounds_are_capped() {
    let tool = || Step::Tool("calculate_equation", serde_json::json!({ "equation": "1+1" }));
    let provider = ScriptedProvider::new(vec![
        vec![tool(), Step::Done],
        vec![tool(), Step::Done],
        vec![tool(), Step::Done],
    ]);
    let sink = Arc::new(MockSink::default());
    let policy = GenerationPolicy {
        max_tool_rounds: 2,
        ..policy()
    };

    let outcome = run_turn(&provider, &ToolSet::builtin(), request(), sink.clone(), &policy, &delivery()).await;

    assert_eq!(outcome.generation.unwrap().tool_rounds, 2);
    assert_eq!(provider.requests().len(), 2);
    assert_eq!(outcome.delivery.state, TurnState::Done);
}
