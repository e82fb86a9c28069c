//! Per-persona chat session lifecycle.
//!
//! Each engine owns one persona's ordered message history and started flag,
//! and orchestrates the send pipeline: validate, gate on the throttle,
//! append the user message optimistically, dispatch, then either append the
//! assistant reply or roll the user message back. Every in-memory mutation
//! is written through to the durable store before the engine yields control.
//!
//! A send that loses to `stop()` (or the request timeout) rolls back
//! silently: the net effect of stopping mid-send is "as if never sent".

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::api::client::{GenerateError, GenerationClient};
use crate::api::GenerateRequest;
use crate::core::message::{self, Message};
use crate::core::notice::NoticeSender;
use crate::core::rate_limit::{RateLimiter, ThrottleDecision};
use crate::core::store::{keys, Store};
use crate::utils::validation;

/// How a send or regenerate settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Assistant reply appended.
    Completed,

    /// Refused pre-dispatch by the rate limiter; countdown running.
    Throttled { wait_secs: u64 },

    /// Cancelled mid-flight; any optimistic user message was rolled back
    /// and no error is surfaced.
    Stopped,

    /// Rejected before doing anything (blank content, countdown active).
    Ignored,

    /// A typed failure was reported on the notice channel. Only produced
    /// by the application layer, never by the engine itself.
    Failed,
}

#[derive(Debug)]
pub enum ChatError {
    /// The effective model id is not in the catalog; nothing dispatched.
    UnknownModel(String),

    /// Regenerate found no user message to reuse.
    NoMessageToRegenerate,

    /// The generation client settled with a failure (already rolled back).
    Generation(GenerateError),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::UnknownModel(model_id) => {
                write!(f, "Model \"{model_id}\" is not configured.")
            }
            ChatError::NoMessageToRegenerate => {
                write!(f, "Could not find a message to regenerate.")
            }
            ChatError::Generation(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ChatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChatError::Generation(err) => Some(err),
            _ => None,
        }
    }
}

struct InFlightCall {
    request_id: u64,
    token: CancellationToken,
}

/// Clonable handle that can cancel the session's in-flight call from
/// outside the engine borrow, e.g. a stop button while `send` is awaited.
#[derive(Clone)]
pub struct StopHandle {
    slot: Arc<Mutex<Option<InFlightCall>>>,
}

impl StopHandle {
    pub fn stop(&self) {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(call) = slot.as_ref() {
            call.token.cancel();
        }
    }
}

/// State machine for one persona's conversation.
pub struct ChatSessionEngine {
    persona_id: String,
    store: Store,
    client: Arc<GenerationClient>,
    limiter: Arc<RateLimiter>,
    notices: NoticeSender,
    messages: Vec<Message>,
    has_started: bool,
    in_flight: Arc<Mutex<Option<InFlightCall>>>,
    request_seq: u64,
}

impl ChatSessionEngine {
    /// Restore a session from the store (empty history if none persisted).
    pub fn load(
        persona_id: impl Into<String>,
        store: Store,
        client: Arc<GenerationClient>,
        limiter: Arc<RateLimiter>,
        notices: NoticeSender,
    ) -> Self {
        let persona_id = persona_id.into();
        let messages = store.get(&keys::chat_messages(&persona_id), Vec::new());
        let has_started = store.get(&keys::chat_started(&persona_id), false);
        Self {
            persona_id,
            store,
            client,
            limiter,
            notices,
            messages,
            has_started,
            in_flight: Arc::new(Mutex::new(None)),
            request_seq: 0,
        }
    }

    pub fn persona_id(&self) -> &str {
        &self.persona_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_started(&self) -> bool {
        self.has_started
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            slot: Arc::clone(&self.in_flight),
        }
    }

    /// Cancel the in-flight call, if any. The interrupted send resolves as
    /// [`SendOutcome::Stopped`] with its user message rolled back.
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Send a user turn through the full pipeline.
    pub async fn send(
        &mut self,
        content: &str,
        system_prompt: &str,
        model_id: &str,
    ) -> Result<SendOutcome, ChatError> {
        if validation::is_blank(content) || self.limiter.countdown().is_active() {
            return Ok(SendOutcome::Ignored);
        }

        match self.limiter.check_and_reserve(model_id) {
            ThrottleDecision::Allowed => {}
            ThrottleDecision::Throttled { wait_secs } => {
                return Ok(SendOutcome::Throttled { wait_secs });
            }
            ThrottleDecision::UnknownModel => {
                return Err(ChatError::UnknownModel(model_id.to_string()));
            }
        }

        if !self.has_started {
            self.has_started = true;
            self.persist_started();
        }

        let user_message = Message::user(content);
        let user_id = user_message.id.clone();
        self.messages.push(user_message);
        self.persist_messages();

        match self.dispatch(content, system_prompt, model_id).await {
            Ok(text) => {
                self.messages.push(Message::assistant(text));
                self.persist_messages();
                Ok(SendOutcome::Completed)
            }
            Err(GenerateError::Aborted) => {
                self.rollback(&user_id);
                tracing::debug!(
                    persona = %self.persona_id,
                    "send stopped; optimistic user message discarded"
                );
                Ok(SendOutcome::Stopped)
            }
            Err(err) => {
                self.rollback(&user_id);
                Err(ChatError::Generation(err))
            }
        }
    }

    /// Re-run generation for the most recent user message.
    ///
    /// Assistant messages stamped after that user message are dropped and
    /// the original content is reused; no new user message is created, so a
    /// failure here leaves the user message in place.
    pub async fn regenerate(
        &mut self,
        system_prompt: &str,
        model_id: &str,
    ) -> Result<SendOutcome, ChatError> {
        if self.limiter.countdown().is_active() {
            return Ok(SendOutcome::Ignored);
        }

        let last_user = message::last_user_message(&self.messages)
            .cloned()
            .ok_or(ChatError::NoMessageToRegenerate)?;

        match self.limiter.check_and_reserve(model_id) {
            ThrottleDecision::Allowed => {}
            ThrottleDecision::Throttled { wait_secs } => {
                return Ok(SendOutcome::Throttled { wait_secs });
            }
            ThrottleDecision::UnknownModel => {
                return Err(ChatError::UnknownModel(model_id.to_string()));
            }
        }

        message::retain_assistant_before(&mut self.messages, last_user.timestamp);
        self.persist_messages();

        match self
            .dispatch(&last_user.content, system_prompt, model_id)
            .await
        {
            Ok(text) => {
                self.messages.push(Message::assistant(text));
                self.persist_messages();
                Ok(SendOutcome::Completed)
            }
            Err(GenerateError::Aborted) => Ok(SendOutcome::Stopped),
            Err(err) => Err(ChatError::Generation(err)),
        }
    }

    /// Drop the conversation and its persisted keys.
    pub fn clear_history(&mut self) {
        self.messages.clear();
        self.has_started = false;
        self.store.remove(&keys::chat_messages(&self.persona_id));
        self.store.remove(&keys::chat_started(&self.persona_id));
    }

    /// Run one generation call, superseding any call still in flight.
    async fn dispatch(
        &mut self,
        user_prompt: &str,
        system_prompt: &str,
        model_id: &str,
    ) -> Result<String, GenerateError> {
        self.request_seq += 1;
        let request_id = self.request_seq;
        let token = CancellationToken::new();
        {
            let mut slot = self.lock_in_flight();
            if let Some(previous) = slot.replace(InFlightCall {
                request_id,
                token: token.clone(),
            }) {
                previous.token.cancel();
            }
        }

        let request = GenerateRequest {
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
            model_id: model_id.to_string(),
        };
        let result = self.client.generate(&request, &token).await;

        let mut slot = self.lock_in_flight();
        if slot.as_ref().is_some_and(|call| call.request_id == request_id) {
            *slot = None;
        }
        result
    }

    fn rollback(&mut self, user_message_id: &str) {
        message::remove_by_id(&mut self.messages, user_message_id);
        self.persist_messages();
    }

    fn persist_messages(&self) {
        if let Err(err) = self
            .store
            .set(&keys::chat_messages(&self.persona_id), &self.messages)
        {
            self.notices.error(err.to_string());
        }
    }

    fn persist_started(&self) {
        if let Err(err) = self
            .store
            .set(&keys::chat_started(&self.persona_id), &self.has_started)
        {
            self.notices.error(err.to_string());
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, Option<InFlightCall>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ChatSessionEngine {
    fn drop(&mut self) {
        // An abandoned engine must not leave a request running.
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::GenerationTransport;
    use crate::core::message::Role;
    use crate::core::store::MemoryStore;
    use crate::utils::test_utils::ScriptTransport;
    use std::time::Duration;

    const MODEL: &str = "gemini-2.5-flash";
    const PROMPT: &str = "You are helpful.";

    struct Fixture {
        transport: Arc<ScriptTransport>,
        store: Store,
        limiter: Arc<RateLimiter>,
        notices_rx: tokio::sync::mpsc::UnboundedReceiver<crate::core::notice::Notice>,
    }

    fn fixture() -> (Fixture, ChatSessionEngine) {
        fixture_with_store(Store::in_memory())
    }

    fn fixture_with_store(store: Store) -> (Fixture, ChatSessionEngine) {
        let transport = ScriptTransport::new();
        let client = Arc::new(GenerationClient::new(
            Arc::clone(&transport) as Arc<dyn GenerationTransport>
        ));
        let limiter = Arc::new(RateLimiter::new());
        let (notices, notices_rx) = NoticeSender::channel();
        let engine = ChatSessionEngine::load(
            "glitch",
            store.clone(),
            client,
            Arc::clone(&limiter),
            notices,
        );
        (
            Fixture {
                transport,
                store,
                limiter,
                notices_rx,
            },
            engine,
        )
    }

    #[tokio::test]
    async fn send_appends_user_and_assistant_messages() {
        let (fixture, mut engine) = fixture();
        fixture.transport.push_text("hi there");

        let outcome = engine.send("hello", PROMPT, MODEL).await.unwrap();

        assert_eq!(outcome, SendOutcome::Completed);
        assert_eq!(engine.messages().len(), 2);
        assert_eq!(engine.messages()[0].role, Role::User);
        assert_eq!(engine.messages()[0].content, "hello");
        assert_eq!(engine.messages()[1].role, Role::Assistant);
        assert_eq!(engine.messages()[1].content, "hi there");
        assert!(engine.has_started());
    }

    #[tokio::test]
    async fn send_persists_history_for_later_sessions() {
        let store = Store::in_memory();
        {
            let (fixture, mut engine) = fixture_with_store(store.clone());
            fixture.transport.push_text("persisted reply");
            engine.send("persist me", PROMPT, MODEL).await.unwrap();
        }

        let (_, engine) = fixture_with_store(store);
        assert_eq!(engine.messages().len(), 2);
        assert!(engine.has_started());
    }

    #[tokio::test]
    async fn blank_content_is_ignored() {
        let (fixture, mut engine) = fixture();
        let outcome = engine.send("   \n", PROMPT, MODEL).await.unwrap();
        assert_eq!(outcome, SendOutcome::Ignored);
        assert!(engine.messages().is_empty());
        assert!(!engine.has_started());
        assert_eq!(fixture.transport.calls(), 0);
    }

    #[tokio::test]
    async fn failed_generation_rolls_back_the_user_message() {
        let (fixture, mut engine) = fixture();
        fixture.transport.push_status(400, r#"{"error":"bad request"}"#);

        let result = engine.send("hello", PROMPT, MODEL).await;

        assert!(matches!(result, Err(ChatError::Generation(_))));
        assert!(engine.messages().is_empty());
        // The rollback is persisted too.
        let stored: Vec<Message> = fixture.store.get(&keys::chat_messages("glitch"), Vec::new());
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn stop_during_send_discards_silently() {
        let (fixture, mut engine) = fixture();
        fixture.transport.push_hang();
        let stop = engine.stop_handle();

        let (result, _) = tokio::join!(engine.send("hello", PROMPT, MODEL), async {
            // Let the send reach its await point before stopping.
            tokio::task::yield_now().await;
            stop.stop();
        });

        assert_eq!(result.unwrap(), SendOutcome::Stopped);
        assert!(engine.messages().is_empty());
    }

    #[tokio::test]
    async fn throttle_blocks_pre_dispatch() {
        let (fixture, mut engine) = fixture();
        // rpm 2 for this model.
        fixture.transport.push_text("one");
        fixture.transport.push_text("two");

        engine.send("first", PROMPT, "gemini-2.5-pro").await.unwrap();
        engine.send("second", PROMPT, "gemini-2.5-pro").await.unwrap();
        let outcome = engine.send("third", PROMPT, "gemini-2.5-pro").await.unwrap();

        match outcome {
            SendOutcome::Throttled { wait_secs } => assert!(wait_secs > 0),
            other => panic!("expected throttle, got {other:?}"),
        }
        // No network call and no message for the blocked send.
        assert_eq!(fixture.transport.calls(), 2);
        assert_eq!(engine.messages().len(), 4);
        assert!(fixture.limiter.countdown().is_active());

        // With the countdown active, further sends are ignored outright.
        let outcome = engine.send("fourth", PROMPT, "gemini-2.5-pro").await.unwrap();
        assert_eq!(outcome, SendOutcome::Ignored);
    }

    #[tokio::test]
    async fn unknown_model_fails_closed() {
        let (fixture, mut engine) = fixture();
        let result = engine.send("hello", PROMPT, "made-up").await;
        assert!(matches!(result, Err(ChatError::UnknownModel(_))));
        assert!(engine.messages().is_empty());
        assert_eq!(fixture.transport.calls(), 0);
    }

    #[tokio::test]
    async fn regenerate_replaces_the_assistant_reply() {
        let (fixture, mut engine) = fixture();
        fixture.transport.push_text("first answer");
        fixture.transport.push_text("second answer");

        engine.send("question", PROMPT, MODEL).await.unwrap();
        let first_assistant_id = engine.messages()[1].id.clone();

        let outcome = engine.regenerate(PROMPT, MODEL).await.unwrap();

        assert_eq!(outcome, SendOutcome::Completed);
        assert_eq!(engine.messages().len(), 2);
        assert_eq!(engine.messages()[0].content, "question");
        assert_eq!(engine.messages()[1].content, "second answer");
        assert_ne!(engine.messages()[1].id, first_assistant_id);
        // The user prompt is reused verbatim on the wire.
        let requests = fixture.transport.requests();
        assert_eq!(requests[1].user_prompt, "question");
    }

    #[tokio::test]
    async fn regenerate_without_user_message_fails() {
        let (_fixture, mut engine) = fixture();
        let result = engine.regenerate(PROMPT, MODEL).await;
        assert!(matches!(result, Err(ChatError::NoMessageToRegenerate)));
    }

    #[tokio::test]
    async fn regenerate_failure_keeps_the_user_message() {
        let (fixture, mut engine) = fixture();
        fixture.transport.push_text("first answer");
        fixture.transport.push_status(400, r#"{"error":"nope"}"#);

        engine.send("question", PROMPT, MODEL).await.unwrap();
        let result = engine.regenerate(PROMPT, MODEL).await;

        assert!(matches!(result, Err(ChatError::Generation(_))));
        assert_eq!(engine.messages().len(), 1);
        assert_eq!(engine.messages()[0].content, "question");
    }

    #[tokio::test]
    async fn clear_history_resets_state_and_storage() {
        let (fixture, mut engine) = fixture();
        fixture.transport.push_text("reply");
        engine.send("hello", PROMPT, MODEL).await.unwrap();

        engine.clear_history();

        assert!(engine.messages().is_empty());
        assert!(!engine.has_started());
        let stored: Vec<Message> = fixture.store.get(&keys::chat_messages("glitch"), Vec::new());
        assert!(stored.is_empty());
        assert!(!fixture.store.get(&keys::chat_started("glitch"), false));
    }

    #[tokio::test]
    async fn history_is_ordered_by_timestamp_after_many_sends() {
        let (_fixture, mut engine) = fixture();
        for turn in ["one", "two", "three"] {
            engine.send(turn, PROMPT, MODEL).await.unwrap();
        }
        let timestamps: Vec<i64> = engine.messages().iter().map(|m| m.timestamp).collect();
        let mut sorted = timestamps.clone();
        sorted.sort();
        assert_eq!(timestamps, sorted);
        assert_eq!(engine.messages().len(), 6);
    }

    #[tokio::test]
    async fn quota_failures_reach_the_notice_channel() {
        let store = Store::new(Arc::new(MemoryStore::with_quota(48)));
        let (mut fixture, mut engine) = fixture_with_store(store);
        fixture.transport.push_text(&"long reply ".repeat(64));

        let _ = engine.send("hello", PROMPT, MODEL).await;

        let notice = fixture.notices_rx.try_recv().expect("expected a notice");
        assert!(notice.message.contains("Storage quota exceeded"));
    }

    #[tokio::test]
    async fn stop_without_in_flight_call_is_a_no_op() {
        let (_fixture, engine) = fixture();
        engine.stop();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(engine.messages().is_empty());
    }
}
