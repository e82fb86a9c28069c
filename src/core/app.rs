//! The application-state root.
//!
//! [`ChatApp`] is the explicit state object hosts drive: it loads the
//! persona registry and global model from the store at init, owns one chat
//! session per persona (created lazily), shares a single rate limiter
//! across sessions, and folds every user-facing failure into the notice
//! channel returned by [`ChatApp::init`]. Interior components stay silent
//! and typed; this layer decides what a person actually sees.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::api::client::GenerationClient;
use crate::api::models;
use crate::core::backup::{self, BackupDocument, BackupError};
use crate::core::notice::{Notice, NoticeSender};
use crate::core::persona::{PersonaError, PersonaRegistry};
use crate::core::rate_limit::RateLimiter;
use crate::core::session::{ChatError, ChatSessionEngine, SendOutcome, StopHandle};
use crate::core::store::{keys, Store};

pub struct ChatApp {
    store: Store,
    client: Arc<GenerationClient>,
    limiter: Arc<RateLimiter>,
    registry: PersonaRegistry,
    sessions: HashMap<String, ChatSessionEngine>,
    global_model: String,
    notices: NoticeSender,
}

impl ChatApp {
    /// Load application state from the store. The returned receiver is the
    /// single user-facing notification stream.
    pub fn init(store: Store, client: Arc<GenerationClient>) -> (Self, UnboundedReceiver<Notice>) {
        Self::init_with_limiter(store, client, Arc::new(RateLimiter::new()))
    }

    /// Like [`Self::init`] with an injected limiter (custom window).
    pub fn init_with_limiter(
        store: Store,
        client: Arc<GenerationClient>,
        limiter: Arc<RateLimiter>,
    ) -> (Self, UnboundedReceiver<Notice>) {
        let (notices, notices_rx) = NoticeSender::channel();
        let registry = PersonaRegistry::load(store.clone());
        let global_model = store.get(keys::GLOBAL_MODEL, models::DEFAULT_MODEL_ID.to_string());
        (
            Self {
                store,
                client,
                limiter,
                registry,
                sessions: HashMap::new(),
                global_model,
                notices,
            },
            notices_rx,
        )
    }

    pub fn registry(&self) -> &PersonaRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PersonaRegistry {
        &mut self.registry
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn global_model(&self) -> &str {
        &self.global_model
    }

    /// Change the global default model and persist the choice.
    pub fn set_global_model(&mut self, model_id: &str) {
        self.global_model = model_id.to_string();
        if let Err(err) = self.store.set(keys::GLOBAL_MODEL, &self.global_model) {
            self.notices.error(err.to_string());
        }
    }

    /// The session for a persona, restoring it from the store on first use.
    pub fn session(&mut self, persona_id: &str) -> &mut ChatSessionEngine {
        let store = self.store.clone();
        let client = Arc::clone(&self.client);
        let limiter = Arc::clone(&self.limiter);
        let notices = self.notices.clone();
        self.sessions
            .entry(persona_id.to_string())
            .or_insert_with(|| ChatSessionEngine::load(persona_id, store, client, limiter, notices))
    }

    /// Stop handle for a persona's session, creating the session if needed.
    pub fn stop_handle(&mut self, persona_id: &str) -> StopHandle {
        self.session(persona_id).stop_handle()
    }

    /// Send a user turn for a persona, reporting failures as notices.
    pub async fn send_message(&mut self, persona_id: &str, content: &str) -> SendOutcome {
        let Some((system_prompt, model_id)) = self.resolve_dispatch(persona_id) else {
            return SendOutcome::Failed;
        };
        let result = self
            .session(persona_id)
            .send(content, &system_prompt, &model_id)
            .await;
        self.report(result)
    }

    /// Regenerate the latest response for a persona.
    pub async fn regenerate(&mut self, persona_id: &str) -> SendOutcome {
        let Some((system_prompt, model_id)) = self.resolve_dispatch(persona_id) else {
            return SendOutcome::Failed;
        };
        let result = self
            .session(persona_id)
            .regenerate(&system_prompt, &model_id)
            .await;
        self.report(result)
    }

    /// Cancel a persona's in-flight generation, if any.
    pub fn stop(&self, persona_id: &str) {
        if let Some(session) = self.sessions.get(persona_id) {
            session.stop();
        }
    }

    /// Wipe one persona's conversation.
    pub fn clear_history(&mut self, persona_id: &str) {
        self.session(persona_id).clear_history();
    }

    /// Wipe every persona's conversation, loaded or not.
    pub fn clear_all_history(&mut self) {
        for persona in self.registry.all_sorted() {
            match self.sessions.get_mut(&persona.id) {
                Some(session) => session.clear_history(),
                None => {
                    self.store.remove(&keys::chat_messages(&persona.id));
                    self.store.remove(&keys::chat_started(&persona.id));
                }
            }
        }
    }

    /// Snapshot all state into a backup document.
    pub fn export_backup(&self) -> BackupDocument {
        backup::export_all(&self.store, &self.registry)
    }

    /// Restore a backup document, then reload in-memory state from the
    /// store so the registry, global model, and sessions reflect it.
    pub fn import_backup(&mut self, value: &serde_json::Value) -> Result<(), BackupError> {
        backup::import_all(&self.store, value)?;
        self.reload();
        Ok(())
    }

    /// Remove every namespaced key and reset in-memory state. Irrecoverable.
    pub fn reset_app_data(&mut self) {
        backup::clear_all_local_data(&self.store);
        self.reload();
    }

    /// Restore default personas and the default model, keeping histories.
    pub fn restore_defaults(&mut self) {
        if let Err(err) = self.registry.clear_custom() {
            self.notices.error(err.to_string());
        }
        self.store.remove(keys::GLOBAL_MODEL);
        self.reload();
    }

    /// Re-read registry, global model, and sessions from the store.
    pub fn reload(&mut self) {
        self.registry = PersonaRegistry::load(self.store.clone());
        self.global_model = self
            .store
            .get(keys::GLOBAL_MODEL, models::DEFAULT_MODEL_ID.to_string());
        self.sessions.clear();
    }

    fn resolve_dispatch(&mut self, persona_id: &str) -> Option<(String, String)> {
        let Some(persona) = self.registry.get(persona_id) else {
            self.notices
                .error(format!("Persona with ID \"{persona_id}\" not found."));
            return None;
        };
        let model_id = persona
            .model
            .clone()
            .unwrap_or_else(|| self.global_model.clone());
        Some((persona.prompt, model_id))
    }

    fn report(&self, result: Result<SendOutcome, ChatError>) -> SendOutcome {
        match result {
            Ok(SendOutcome::Throttled { wait_secs }) => {
                self.notices.warning(format!(
                    "Rate limit reached. Please wait {wait_secs} seconds."
                ));
                SendOutcome::Throttled { wait_secs }
            }
            Ok(outcome) => outcome,
            Err(ChatError::Generation(err)) => {
                self.notices.error(format!(
                    "{err} Consider switching to a different model if this persists."
                ));
                SendOutcome::Failed
            }
            Err(err) => {
                self.notices.error(err.to_string());
                SendOutcome::Failed
            }
        }
    }

    /// Surface a registry failure on the notice channel. Registry calls
    /// return typed errors; hosts that don't inspect them route them here.
    pub fn report_persona_error(&self, err: &PersonaError) {
        self.notices.error(err.to_string());
    }
}

impl Drop for ChatApp {
    fn drop(&mut self) {
        // Session teardown: no countdown may keep ticking after the app.
        self.limiter.countdown().clear();
    }
}
