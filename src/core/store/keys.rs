//! Storage key layout.
//!
//! Every key carries the `parlour-` namespace so "clear all app data" can
//! sweep the store without touching unrelated keys on a shared medium.

/// Prefix identifying all keys owned by this application.
pub const NAMESPACE: &str = "parlour-";

/// JSON array of user-created/override persona records.
pub const CUSTOM_PERSONAS: &str = "parlour-custom-personas";

/// The globally selected default model id.
pub const GLOBAL_MODEL: &str = "parlour-global-model";

/// Message history for one persona's conversation.
pub fn chat_messages(persona_id: &str) -> String {
    format!("{NAMESPACE}{persona_id}-messages")
}

/// Whether a persona's conversation has ever been started.
pub fn chat_started(persona_id: &str) -> String {
    format!("{NAMESPACE}{persona_id}-started")
}
