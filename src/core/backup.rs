//! Whole-application backup: one JSON document bundling the global model,
//! the custom persona records, and every non-empty conversation history.
//!
//! Import validates the document shape before touching the store, so a
//! malformed document changes nothing. Histories are written wholesale
//! (no message-by-message merging), and in-memory state is deliberately not
//! refreshed here; callers reload after a successful import.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::api::models;
use crate::core::message::Message;
use crate::core::persona::{Persona, PersonaRegistry};
use crate::core::store::{keys, Store, StoreError};

/// The backup document. Persona records are the persisted shape (no
/// presentation fields to strip), histories are keyed by persona id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    pub global_model: Option<String>,
    pub personas: Vec<Persona>,
    pub histories: BTreeMap<String, Vec<Message>>,
}

#[derive(Debug)]
pub enum BackupError {
    /// The document is not an object carrying `personas` and `histories`.
    InvalidFormat,

    /// The store refused a write mid-import.
    Storage(StoreError),
}

impl fmt::Display for BackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupError::InvalidFormat => write!(f, "Invalid backup file format."),
            BackupError::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for BackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackupError::InvalidFormat => None,
            BackupError::Storage(err) => Some(err),
        }
    }
}

impl From<StoreError> for BackupError {
    fn from(err: StoreError) -> Self {
        BackupError::Storage(err)
    }
}

/// Snapshot everything worth backing up. Personas without any persisted
/// messages are left out of `histories`.
pub fn export_all(store: &Store, registry: &PersonaRegistry) -> BackupDocument {
    let mut histories = BTreeMap::new();
    for persona in registry.all_sorted() {
        let messages: Vec<Message> = store.get(&keys::chat_messages(&persona.id), Vec::new());
        if !messages.is_empty() {
            histories.insert(persona.id.clone(), messages);
        }
    }

    BackupDocument {
        global_model: Some(store.get(keys::GLOBAL_MODEL, models::DEFAULT_MODEL_ID.to_string())),
        personas: registry.export_custom(),
        histories,
    }
}

/// Restore a backup document into the store.
///
/// The caller owns reloading any in-memory state afterwards.
pub fn import_all(store: &Store, value: &serde_json::Value) -> Result<(), BackupError> {
    let document = parse_document(value)?;

    if let Some(model) = &document.global_model {
        store.set(keys::GLOBAL_MODEL, model)?;
    }
    store.set(keys::CUSTOM_PERSONAS, &document.personas)?;
    for (persona_id, history) in &document.histories {
        store.set(&keys::chat_messages(persona_id), history)?;
        // Imported conversations count as started.
        store.set(&keys::chat_started(persona_id), &true)?;
    }
    Ok(())
}

/// Remove every namespaced key. Irrecoverable.
pub fn clear_all_local_data(store: &Store) {
    store.clear_all();
}

fn parse_document(value: &serde_json::Value) -> Result<BackupDocument, BackupError> {
    let object = value.as_object().ok_or(BackupError::InvalidFormat)?;
    if !object.contains_key("personas") || !object.contains_key("histories") {
        return Err(BackupError::InvalidFormat);
    }
    serde_json::from_value(value.clone()).map_err(|_| BackupError::InvalidFormat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::persona::PersonaPatch;

    fn store_with_data() -> (Store, PersonaRegistry) {
        let store = Store::in_memory();
        let mut registry = PersonaRegistry::load(store.clone());
        registry.create("Reviewer", "Review this code").unwrap();
        registry
            .update(
                "glitch",
                PersonaPatch {
                    name: Some("Glitch2".to_string()),
                    ..PersonaPatch::default()
                },
            )
            .unwrap();

        store
            .set(keys::GLOBAL_MODEL, &"gemini-2.5-pro".to_string())
            .unwrap();
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        store.set(&keys::chat_messages("glitch"), &history).unwrap();
        store.set(&keys::chat_started("glitch"), &true).unwrap();
        (store, registry)
    }

    #[test]
    fn export_includes_only_non_empty_histories() {
        let (store, registry) = store_with_data();
        let document = export_all(&store, &registry);

        assert_eq!(document.global_model.as_deref(), Some("gemini-2.5-pro"));
        assert_eq!(document.personas.len(), 2);
        assert!(document.histories.contains_key("glitch"));
        assert!(!document.histories.contains_key("blame"));
        assert!(!document.histories.contains_key("reson"));
    }

    #[test]
    fn import_of_exported_document_round_trips() {
        let (store, registry) = store_with_data();
        let document = export_all(&store, &registry);
        let value = serde_json::to_value(&document).unwrap();

        let fresh = Store::in_memory();
        import_all(&fresh, &value).unwrap();

        let reloaded = PersonaRegistry::load(fresh.clone());
        assert_eq!(reloaded.export_custom(), registry.export_custom());
        assert_eq!(reloaded.get("glitch").unwrap().name, "Glitch2");

        let history: Vec<Message> = fresh.get(&keys::chat_messages("glitch"), Vec::new());
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hi");
        assert!(fresh.get(&keys::chat_started("glitch"), false));
        assert_eq!(
            fresh.get::<String>(keys::GLOBAL_MODEL, String::new()),
            "gemini-2.5-pro"
        );

        // Exporting again from the restored store yields the same document.
        assert_eq!(export_all(&fresh, &reloaded), document);
    }

    #[test]
    fn import_rejects_documents_missing_required_keys() {
        let store = Store::in_memory();
        let missing_histories = serde_json::json!({
            "globalModel": "gemini-2.5-flash",
            "personas": [],
        });

        let result = import_all(&store, &missing_histories);

        assert!(matches!(result, Err(BackupError::InvalidFormat)));
        // Nothing was written.
        assert!(store.keys_with_prefix(keys::NAMESPACE).is_empty());
    }

    #[test]
    fn import_rejects_non_object_documents() {
        let store = Store::in_memory();
        for value in [
            serde_json::json!([1, 2, 3]),
            serde_json::json!("backup"),
            serde_json::json!(null),
        ] {
            assert!(matches!(
                import_all(&store, &value),
                Err(BackupError::InvalidFormat)
            ));
        }
        assert!(store.keys_with_prefix(keys::NAMESPACE).is_empty());
    }

    #[test]
    fn import_without_global_model_leaves_it_untouched() {
        let store = Store::in_memory();
        store
            .set(keys::GLOBAL_MODEL, &"gemini-2.0-flash".to_string())
            .unwrap();
        let document = serde_json::json!({
            "globalModel": null,
            "personas": [],
            "histories": {},
        });

        import_all(&store, &document).unwrap();

        assert_eq!(
            store.get::<String>(keys::GLOBAL_MODEL, String::new()),
            "gemini-2.0-flash"
        );
    }

    #[test]
    fn clear_all_local_data_sweeps_the_namespace() {
        let (store, _registry) = store_with_data();
        assert!(!store.keys_with_prefix(keys::NAMESPACE).is_empty());
        clear_all_local_data(&store);
        assert!(store.keys_with_prefix(keys::NAMESPACE).is_empty());
    }
}
