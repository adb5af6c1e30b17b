//! The conversation orchestrator: one spoken turn, end to end.
//!
//! intake transcript -> persist user turn and retrieve memory (overlapped)
//! -> compose prompt -> model call under a hard timeout -> dispatch action
//! -> merge the spoken response -> persist assistant turn.
//!
//! Turns within one session are sequential: the caller holds the session
//! context mutably, and a turn returns only after the assistant turn is
//! handed to the store. Every failure inside a turn degrades to some
//! response; nothing here is fatal to the session.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vox_action::{ActionRegistry, Dispatcher};
use vox_core::config::VoxConfig;
use vox_core::types::{ActionRecord, Role, Turn};
use vox_memory::MemoryStore;

use crate::composer::PromptComposer;
use crate::error::ChatError;
use crate::model::{DynModelService, ModelError};
use crate::session::SessionContext;

/// Fixed response spoken when the model call fails or times out.
pub const FALLBACK_RESPONSE: &str = "I'm sorry, I ran into a problem thinking about that.";

/// Maximum transcript length in characters.
const MAX_TRANSCRIPT_LENGTH: usize = 2000;

/// What one completed turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Final response text, ready for synthesis.
    pub response: String,
    /// The action record attached to the assistant turn, if any.
    pub action: Option<ActionRecord>,
    /// True when the turn completed on a degraded path (model fallback,
    /// lost memory context, or buffered persistence).
    pub degraded: bool,
}

/// Drives turns against the memory store, the model, and the dispatcher.
pub struct ConversationOrchestrator {
    store: Arc<MemoryStore>,
    registry: Arc<ActionRegistry>,
    dispatcher: Dispatcher,
    model: Arc<dyn DynModelService>,
    composer: PromptComposer,
    model_timeout: Duration,
    query_timeout: Duration,
    top_k: usize,
}

impl ConversationOrchestrator {
    pub fn new(
        store: Arc<MemoryStore>,
        registry: Arc<ActionRegistry>,
        model: Arc<dyn DynModelService>,
        config: &VoxConfig,
    ) -> Self {
        let dispatcher =
            Dispatcher::new(Arc::clone(&registry)).with_enabled(config.actions.enabled);
        Self {
            store,
            registry,
            dispatcher,
            model,
            composer: PromptComposer::new(&config.composer),
            model_timeout: Duration::from_millis(config.model.timeout_ms),
            query_timeout: Duration::from_millis(config.memory.query_timeout_ms),
            top_k: config.memory.top_k,
        }
    }

    /// Run one turn for a finalized transcript.
    pub async fn take_turn(
        &self,
        session: &mut SessionContext,
        transcript: &str,
    ) -> Result<TurnOutcome, ChatError> {
        let never = CancellationToken::new();
        match self.take_turn_cancellable(session, transcript, &never).await? {
            Some(outcome) => Ok(outcome),
            // Unreachable with a token nobody cancels; degrade anyway.
            None => Ok(TurnOutcome {
                response: FALLBACK_RESPONSE.to_string(),
                action: None,
                degraded: true,
            }),
        }
    }

    /// Run one turn, abandoning it if `cancel` fires (barge-in).
    ///
    /// Cancellation is honored up to the moment the model call is issued;
    /// once in flight, the orchestrator stops waiting and discards the
    /// result while the call finishes or times out in the background.
    /// Returns `Ok(None)` for an abandoned turn.
    pub async fn take_turn_cancellable(
        &self,
        session: &mut SessionContext,
        transcript: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<TurnOutcome>, ChatError> {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Err(ChatError::EmptyTranscript);
        }
        if transcript.len() > MAX_TRANSCRIPT_LENGTH {
            return Err(ChatError::TranscriptTooLong(MAX_TRANSCRIPT_LENGTH));
        }

        let session_id = session.session_id;
        let mut degraded = false;

        // Persist the user turn and retrieve memory concurrently; the
        // prompt is composed only once the query has settled.
        let mut user_turn = Turn::new(session_id, Role::User, transcript);
        let (append_result, query_result) = tokio::join!(
            self.store.append(user_turn.clone()),
            tokio::time::timeout(
                self.query_timeout,
                self.store.query(transcript, self.top_k, session_id),
            ),
        );

        match append_result {
            Ok(id) => user_turn.turn_id = Some(id),
            Err(e) => {
                warn!(error = %e, "User turn not yet durable; continuing");
                degraded = true;
            }
        }
        let memory = match query_result {
            Ok(hits) => hits,
            Err(_) => {
                debug!("Memory query timed out; composing without earlier context");
                Vec::new()
            }
        };

        // The buffer as it stood before this turn; the utterance enters
        // the prompt separately, as the final block.
        let payload =
            self.composer
                .compose(transcript, &session.recent_turns(), &memory, &self.registry);
        session.push(user_turn);

        if cancel.is_cancelled() {
            debug!("Turn cancelled before model call");
            return Ok(None);
        }

        // The model call runs as its own task so an abandoned wait leaves
        // the call to finish in the background.
        let model = Arc::clone(&self.model);
        let task_payload = payload.clone();
        let mut call = tokio::spawn(async move { model.generate_boxed(&task_payload).await });

        let model_result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Turn cancelled while model call in flight; discarding result");
                return Ok(None);
            }
            joined = tokio::time::timeout(self.model_timeout, &mut call) => match joined {
                Err(_) => Err(ModelError::Timeout(self.model_timeout.as_millis() as u64)),
                Ok(Err(join_error)) => {
                    Err(ModelError::Faulted(format!("model task failed: {}", join_error)))
                }
                Ok(Ok(result)) => result,
            },
        };

        let raw_output = match model_result {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Model call failed; speaking fallback");
                return Ok(Some(self.complete_degraded_turn(session).await));
            }
        };

        // Zero-or-one action per turn; the dispatcher never retries.
        let dispatch = self.dispatcher.dispatch(&raw_output).await;
        let response = merge_response(&dispatch.narrative, dispatch.record.as_ref(), &raw_output);

        let mut assistant_turn = Turn::new(session_id, Role::Assistant, response.clone());
        if let Some(ref record) = dispatch.record {
            assistant_turn = assistant_turn.with_action(record.clone());
        }
        match self.store.append(assistant_turn.clone()).await {
            Ok(id) => assistant_turn.turn_id = Some(id),
            Err(e) => {
                warn!(error = %e, "Assistant turn not yet durable; continuing");
                degraded = true;
            }
        }
        session.push(assistant_turn);

        info!(
            session = %session_id,
            action = dispatch.record.as_ref().map(|r| r.action_name.as_str()),
            degraded,
            "Turn completed"
        );

        Ok(Some(TurnOutcome {
            response,
            action: dispatch.record,
            degraded,
        }))
    }

    /// Flush pending writes at session teardown.
    pub async fn end_session(&self, session: &SessionContext) -> Result<(), ChatError> {
        self.store.flush()?;
        info!(session = %session.session_id, "Session ended");
        Ok(())
    }

    /// Record a system-error turn carrying the fixed fallback and finish
    /// the turn without attempting any action.
    async fn complete_degraded_turn(&self, session: &mut SessionContext) -> TurnOutcome {
        let mut error_turn = Turn::new(session.session_id, Role::System, FALLBACK_RESPONSE);
        match self.store.append(error_turn.clone()).await {
            Ok(id) => error_turn.turn_id = Some(id),
            Err(e) => warn!(error = %e, "System-error turn not yet durable"),
        }
        session.push(error_turn);

        TurnOutcome {
            response: FALLBACK_RESPONSE.to_string(),
            action: None,
            degraded: true,
        }
    }
}

/// Merge the spoken reply: "<model narrative> <action result, if present>".
fn merge_response(narrative: &str, record: Option<&ActionRecord>, raw_output: &str) -> String {
    let narrative = narrative.trim();
    let result_text = record
        .and_then(|r| r.result_text.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    match (narrative.is_empty(), result_text) {
        (false, Some(result)) => format!("{} {}", narrative, result),
        (false, None) => narrative.to_string(),
        (true, Some(result)) => result.to_string(),
        (true, None) => {
            let raw = raw_output.trim();
            if raw.is_empty() {
                FALLBACK_RESPONSE.to_string()
            } else {
                raw.to_string()
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;
    use vox_action::{Capability, CapabilityHandler, ParamKind, ParamSpec, Trigger};
    use vox_core::config::VoxConfig;
    use vox_core::error::VoxError;
    use vox_core::types::{ActionStatus, ArgMap, TurnId};
    use vox_memory::embedding::EmbeddingService;
    use vox_memory::{Database, HashEmbedding, MemoryStore};

    use crate::model::{ModelService, ScriptedModel};

    struct EchoAppHandler;

    #[async_trait::async_trait]
    impl CapabilityHandler for EchoAppHandler {
        async fn execute(&self, args: &ArgMap) -> Result<String, vox_action::ActionError> {
            let app = args.get("app").map(|v| v.to_string()).unwrap_or_default();
            Ok(format!("Opened {}", app))
        }
    }

    struct FailingEmbedding;

    impl EmbeddingService for FailingEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, VoxError> {
            Err(VoxError::Embedding("offline".to_string()))
        }

        fn dimensions(&self) -> usize {
            384
        }
    }

    struct SlowEmbedding;

    impl EmbeddingService for SlowEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, VoxError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(vec![1.0; 8])
        }

        fn dimensions(&self) -> usize {
            8
        }
    }

    /// Counts generate calls; always replies with the given text.
    struct CountingModel {
        calls: Arc<AtomicUsize>,
        reply: String,
    }

    impl ModelService for CountingModel {
        async fn generate(
            &self,
            _payload: &crate::composer::PromptPayload,
        ) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    fn test_registry() -> Arc<ActionRegistry> {
        let mut registry = ActionRegistry::new();
        registry
            .register(
                Capability::new("open_app", "Launch an application", Arc::new(EchoAppHandler))
                    .with_param(ParamSpec::required("app", ParamKind::String))
                    .with_trigger(Trigger::new("open cursor").with_arg("app", "cursor")),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn test_config() -> VoxConfig {
        let mut config = VoxConfig::default();
        config.memory.append_retries = 0;
        config.memory.retry_backoff_ms = 1;
        config.memory.query_timeout_ms = 50;
        config.model.timeout_ms = 200;
        config.session.short_term_turns = 6;
        config
    }

    fn store_with(embedder: Arc<dyn vox_memory::DynEmbeddingService>) -> Arc<MemoryStore> {
        let db = Arc::new(Database::in_memory().unwrap());
        Arc::new(MemoryStore::new(db, embedder, &test_config().memory).unwrap())
    }

    fn orchestrator(model: Arc<dyn DynModelService>) -> (ConversationOrchestrator, Arc<MemoryStore>) {
        let store = store_with(Arc::new(HashEmbedding::new()));
        let orch = ConversationOrchestrator::new(
            Arc::clone(&store),
            test_registry(),
            model,
            &test_config(),
        );
        (orch, store)
    }

    // ---- Happy path with an action ----

    #[tokio::test]
    async fn test_turn_with_action_merges_result() {
        let model = Arc::new(ScriptedModel::new(vec![
            "Sure, I'll open Cursor for you. [open_app app=cursor]",
        ]));
        let (orch, store) = orchestrator(model);
        let mut session = SessionContext::new(6);

        let outcome = orch.take_turn(&mut session, "open cursor please").await.unwrap();

        assert_eq!(
            outcome.response,
            "Sure, I'll open Cursor for you. Opened cursor"
        );
        assert!(!outcome.degraded);

        let record = outcome.action.unwrap();
        assert_eq!(record.action_name, "open_app");
        assert_eq!(record.status, ActionStatus::Succeeded);

        // User and assistant turns persisted, in order, with the record
        // attached to the assistant turn.
        assert_eq!(store.session_len(session.session_id).unwrap(), 2);
        let user = store.turn(session.session_id, TurnId(1)).unwrap().unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(user.text, "open cursor please");
        let assistant = store.turn(session.session_id, TurnId(2)).unwrap().unwrap();
        assert_eq!(assistant.role, Role::Assistant);
        assert!(assistant.action.is_some());
    }

    #[tokio::test]
    async fn test_turn_without_action() {
        let model = Arc::new(ScriptedModel::new(vec!["Nice to meet you."]));
        let (orch, store) = orchestrator(model);
        let mut session = SessionContext::new(6);

        let outcome = orch.take_turn(&mut session, "hello there").await.unwrap();

        assert_eq!(outcome.response, "Nice to meet you.");
        assert!(outcome.action.is_none());
        assert_eq!(store.session_len(session.session_id).unwrap(), 2);
        let assistant = store.turn(session.session_id, TurnId(2)).unwrap().unwrap();
        assert!(assistant.action.is_none());
    }

    // ---- Model failure paths ----

    #[tokio::test]
    async fn test_model_timeout_speaks_fallback_and_logs_system_turn() {
        let model = Arc::new(
            ScriptedModel::new(vec!["too late [open_app app=cursor]"])
                .with_delay(Duration::from_millis(500)),
        );
        let store = store_with(Arc::new(HashEmbedding::new()));
        let mut config = test_config();
        config.model.timeout_ms = 30;
        let orch =
            ConversationOrchestrator::new(Arc::clone(&store), test_registry(), model, &config);
        let mut session = SessionContext::new(6);

        let outcome = orch.take_turn(&mut session, "open cursor").await.unwrap();

        assert_eq!(outcome.response, FALLBACK_RESPONSE);
        assert!(outcome.degraded);
        assert!(outcome.action.is_none(), "no action on a timed-out turn");

        // User turn plus a system-error turn.
        assert_eq!(store.session_len(session.session_id).unwrap(), 2);
        let error_turn = store.turn(session.session_id, TurnId(2)).unwrap().unwrap();
        assert_eq!(error_turn.role, Role::System);
        assert_eq!(error_turn.text, FALLBACK_RESPONSE);
    }

    #[tokio::test]
    async fn test_model_fault_speaks_fallback() {
        // Empty script: the first call faults.
        let model = Arc::new(ScriptedModel::new(vec![]));
        let (orch, _) = orchestrator(model);
        let mut session = SessionContext::new(6);

        let outcome = orch.take_turn(&mut session, "hello").await.unwrap();
        assert_eq!(outcome.response, FALLBACK_RESPONSE);
        assert!(outcome.degraded);
    }

    // ---- Degradation: memory failures never break the turn ----

    #[tokio::test]
    async fn test_failing_embedder_turn_still_completes() {
        let store = store_with(Arc::new(FailingEmbedding));
        let model = Arc::new(ScriptedModel::new(vec!["All good."]));
        let orch = ConversationOrchestrator::new(
            Arc::clone(&store),
            test_registry(),
            model,
            &test_config(),
        );
        let mut session = SessionContext::new(6);

        let outcome = orch.take_turn(&mut session, "remember this").await.unwrap();
        assert_eq!(outcome.response, "All good.");

        // Turns persisted even though none are searchable.
        assert_eq!(store.session_len(session.session_id).unwrap(), 2);
        assert!(store.query("remember this", 3, session.session_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_slow_memory_query_degrades_to_no_context() {
        let store = store_with(Arc::new(SlowEmbedding));
        let model = Arc::new(ScriptedModel::new(vec!["Answered without memory."]));
        let mut config = test_config();
        config.memory.query_timeout_ms = 5;
        let orch =
            ConversationOrchestrator::new(Arc::clone(&store), test_registry(), model, &config);
        let mut session = SessionContext::new(6);

        let outcome = orch.take_turn(&mut session, "anything").await.unwrap();
        assert_eq!(outcome.response, "Answered without memory.");
    }

    // ---- Action failure stays in-band ----

    #[tokio::test]
    async fn test_failed_action_reported_in_reply() {
        // Tag with a missing required argument: validation fails, no
        // execution, and the reply carries the apology in-band.
        let model = Arc::new(ScriptedModel::new(vec!["One moment. [open_app]"]));
        let (orch, _) = orchestrator(model);
        let mut session = SessionContext::new(6);

        let outcome = orch.take_turn(&mut session, "open something").await.unwrap();

        assert!(outcome.response.starts_with("One moment."));
        assert!(outcome.response.contains("I couldn't do that"));
        let record = outcome.action.unwrap();
        assert_eq!(record.status, ActionStatus::Failed);
    }

    // ---- Validation ----

    #[tokio::test]
    async fn test_empty_transcript_rejected() {
        let (orch, _) = orchestrator(Arc::new(ScriptedModel::new(vec!["unused"])));
        let mut session = SessionContext::new(6);

        let result = orch.take_turn(&mut session, "   ").await;
        assert!(matches!(result, Err(ChatError::EmptyTranscript)));
    }

    #[tokio::test]
    async fn test_overlong_transcript_rejected() {
        let (orch, _) = orchestrator(Arc::new(ScriptedModel::new(vec!["unused"])));
        let mut session = SessionContext::new(6);

        let long = "a".repeat(MAX_TRANSCRIPT_LENGTH + 1);
        let result = orch.take_turn(&mut session, &long).await;
        assert!(matches!(result, Err(ChatError::TranscriptTooLong(_))));
    }

    // ---- Cancellation ----

    #[tokio::test]
    async fn test_cancelled_before_model_call_skips_model() {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = Arc::new(CountingModel {
            calls: Arc::clone(&calls),
            reply: "never spoken".to_string(),
        });
        let (orch, _) = orchestrator(model);
        let mut session = SessionContext::new(6);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = orch
            .take_turn_cancellable(&mut session, "barge-in", &cancel)
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_mid_call_discards_result() {
        let model = Arc::new(
            ScriptedModel::new(vec!["slow reply"]).with_delay(Duration::from_millis(200)),
        );
        let (orch, store) = orchestrator(model);
        let mut session = SessionContext::new(6);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let outcome = orch
            .take_turn_cancellable(&mut session, "tell me a story", &cancel)
            .await
            .unwrap();
        assert!(outcome.is_none());

        // The user turn was already persisted before the cancellation.
        assert_eq!(store.session_len(session.session_id).unwrap(), 1);
    }

    // ---- Sequential turns ----

    #[tokio::test]
    async fn test_turn_ids_increase_across_turns() {
        let model = Arc::new(ScriptedModel::new(vec!["one", "two", "three"]));
        let (orch, store) = orchestrator(model);
        let mut session = SessionContext::new(6);

        for transcript in ["first", "second", "third"] {
            orch.take_turn(&mut session, transcript).await.unwrap();
        }

        assert_eq!(store.session_len(session.session_id).unwrap(), 6);
        for id in 1..=6u64 {
            assert!(store.turn(session.session_id, TurnId(id)).unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_short_term_buffer_tracks_recent_turns() {
        let model = Arc::new(ScriptedModel::new(vec!["a", "b", "c"]));
        let store = store_with(Arc::new(HashEmbedding::new()));
        let mut config = test_config();
        config.session.short_term_turns = 3;
        let orch =
            ConversationOrchestrator::new(Arc::clone(&store), test_registry(), model, &config);
        let mut session = SessionContext::new(config.session.short_term_turns);

        for transcript in ["first", "second", "third"] {
            orch.take_turn(&mut session, transcript).await.unwrap();
        }

        // Six turns passed through; only the three most recent remain.
        let texts: Vec<String> = session
            .recent_turns()
            .iter()
            .map(|t| t.text.clone())
            .collect();
        assert_eq!(texts, vec!["b", "third", "c"]);
    }

    // ---- Memory context reaches later turns ----

    #[tokio::test]
    async fn test_earlier_turns_retrievable_in_later_ones() {
        let model = Arc::new(ScriptedModel::new(vec!["noted", "recalled"]));
        let (orch, store) = orchestrator(model);
        let mut session = SessionContext::new(2);

        orch.take_turn(&mut session, "my favorite color is teal")
            .await
            .unwrap();
        orch.take_turn(&mut session, "what's my favorite color")
            .await
            .unwrap();

        let hits = store
            .query("my favorite color is teal", 5, session.session_id)
            .await;
        assert!(!hits.is_empty());
        assert_eq!(hits[0].turn.text, "my favorite color is teal");
    }

    // ---- Teardown ----

    #[tokio::test]
    async fn test_end_session_flushes() {
        let model = Arc::new(ScriptedModel::new(vec!["bye"]));
        let (orch, _) = orchestrator(model);
        let mut session = SessionContext::new(6);

        orch.take_turn(&mut session, "goodbye").await.unwrap();
        orch.end_session(&session).await.unwrap();
    }

    // ---- merge_response ----

    #[test]
    fn test_merge_narrative_and_result() {
        let record = ActionRecord {
            action_name: "open_app".to_string(),
            arguments: ArgMap::new(),
            status: ActionStatus::Succeeded,
            result_text: Some("Opened cursor".to_string()),
        };
        assert_eq!(
            merge_response("On it.", Some(&record), "raw"),
            "On it. Opened cursor"
        );
        assert_eq!(merge_response("", Some(&record), "raw"), "Opened cursor");
    }

    #[test]
    fn test_merge_without_record_falls_back_to_raw() {
        assert_eq!(merge_response("spoken", None, "raw"), "spoken");
        assert_eq!(merge_response("", None, "raw text"), "raw text");
        assert_eq!(merge_response("", None, "   "), FALLBACK_RESPONSE);
    }

    // ---- Concurrent sessions ----

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let model = Arc::new(ScriptedModel::new(vec!["r1", "r2"]));
        let (orch, store) = orchestrator(model);

        let mut session_a = SessionContext::with_id(Uuid::new_v4(), 4);
        let mut session_b = SessionContext::with_id(Uuid::new_v4(), 4);

        orch.take_turn(&mut session_a, "only in session a").await.unwrap();
        orch.take_turn(&mut session_b, "only in session b").await.unwrap();

        let hits = store.query("only in session a", 5, session_b.session_id).await;
        assert!(hits.iter().all(|h| h.turn.text != "only in session a"));
        assert_eq!(store.session_len(session_a.session_id).unwrap(), 2);
        assert_eq!(store.session_len(session_b.session_id).unwrap(), 2);
    }
}
