use std::sync::Arc;

use relay_core::config::DeliveryConfig;
use relay_delivery::{output_buffer, ChunkSink, DeliveryReport, DeliveryScheduler, TypingHandle};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::provider::{ChatRequest, LlmProvider, ProviderError};
use crate::tools::ToolSet;

use super::generate::{generate_into, Generation, GenerationPolicy};

/// Result of a complete turn: what was generated and what was delivered.
#[derive(Debug)]
pub struct TurnOutcome {
    pub turn_id: Uuid,
    pub generation: Result<Generation, ProviderError>,
    pub delivery: DeliveryReport,
}

/// Run one turn end to end.
///
/// Generation and delivery run concurrently on the same task, connected by
/// the output buffer; a typing indicator runs alongside until both are done.
pub async fn run_turn(
    provider: &dyn LlmProvider,
    tools: &ToolSet,
    request: ChatRequest,
    sink: Arc<dyn ChunkSink>,
    policy: &GenerationPolicy,
    delivery: &DeliveryConfig,
) -> TurnOutcome {
    let turn_id = Uuid::new_v4();
    let span = info_span!("turn", turn = %turn_id);

    async move {
        info!(model = %request.model, messages = request.messages.len(), "turn started");

        let (writer, reader) = output_buffer();
        let scheduler = DeliveryScheduler::new(reader, Arc::clone(&sink), delivery);
        let typing = TypingHandle::start(Arc::clone(&sink), delivery.typing_interval());

        let generation = async {
            let result = generate_into(provider, tools, request, &writer, policy).await;
            drop(writer);
            result
        };
        let (generation, report) = tokio::join!(generation, scheduler.run());
        typing.stop();

        info!(
            state = ?report.state,
            sent = report.sent.len(),
            failed = report.failed.len(),
            ok = generation.is_ok(),
            "turn finished"
        );

        TurnOutcome {
            turn_id,
            generation,
            delivery: report,
        }
    }
    .instrument(span)
    .await
}
