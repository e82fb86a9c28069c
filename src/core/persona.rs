//! Persona records and the registry that manages them.
//!
//! The registry merges a fixed set of built-in personas with user-created
//! records. A user record sharing a built-in id acts as an override: it
//! shadows the built-in's name, prompt, placeholder, model, and recency
//! without ever deleting the built-in. Fully user-owned personas (fresh ids)
//! are created and deleted outright. Every mutation writes the custom list
//! back to the durable store before returning.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::builtin_personas::load_builtin_personas;
use crate::core::store::{keys, Store, StoreError};
use crate::utils::id;
use crate::utils::validation;

/// A persona: a named system prompt bound to one conversation thread, with
/// optional display strings and a per-persona model override.
///
/// This is the persisted shape; it round-trips through storage and backup
/// documents unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_prompts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,
}

/// Field-wise patch for [`PersonaRegistry::update`]. `None` leaves the
/// current value untouched.
#[derive(Debug, Clone, Default)]
pub struct PersonaPatch {
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub placeholder: Option<String>,
    pub intro_message: Option<String>,
    pub description: Option<String>,
    pub demo_prompts: Option<Vec<String>>,
    pub model: Option<String>,
    pub last_used: Option<i64>,
}

impl PersonaPatch {
    /// Patch that only refreshes recency.
    pub fn touch(now_ms: i64) -> Self {
        Self {
            last_used: Some(now_ms),
            ..Self::default()
        }
    }
}

/// Counters returned by [`PersonaRegistry::import_custom`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub added: usize,
    pub updated: usize,
}

#[derive(Debug)]
pub enum PersonaError {
    /// The import payload is not a list of persona-shaped records.
    InvalidFormat,

    /// The backing store refused the write.
    Storage(StoreError),
}

impl fmt::Display for PersonaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonaError::InvalidFormat => write!(f, "Invalid personas file format."),
            PersonaError::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PersonaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PersonaError::InvalidFormat => None,
            PersonaError::Storage(err) => Some(err),
        }
    }
}

impl From<StoreError> for PersonaError {
    fn from(err: StoreError) -> Self {
        PersonaError::Storage(err)
    }
}

/// Authoritative in-memory view of all personas, responsible for writing
/// the custom list back to the store on every mutation.
pub struct PersonaRegistry {
    store: Store,
    builtins: Vec<Persona>,
    custom: Vec<Persona>,
}

impl PersonaRegistry {
    /// Load built-ins and the persisted custom list.
    pub fn load(store: Store) -> Self {
        let custom = store.get(keys::CUSTOM_PERSONAS, Vec::new());
        Self {
            store,
            builtins: load_builtin_personas(),
            custom,
        }
    }

    /// All personas with overrides applied, sorted by recency: most
    /// recently used first, never-used personas in built-in declaration
    /// order at the tail.
    pub fn all_sorted(&self) -> Vec<Persona> {
        let mut personas = self.merged();
        personas.sort_by_key(|persona| std::cmp::Reverse(persona.last_used.unwrap_or(0)));
        personas
    }

    /// Resolve one persona by id, override-applied.
    pub fn get(&self, persona_id: &str) -> Option<Persona> {
        self.merged()
            .into_iter()
            .find(|persona| persona.id == persona_id)
    }

    pub fn is_builtin(&self, persona_id: &str) -> bool {
        self.builtins.iter().any(|persona| persona.id == persona_id)
    }

    /// Create a new user persona and return its id.
    pub fn create(&mut self, name: &str, prompt: &str) -> Result<String, PersonaError> {
        let new_id = id::persona_id();
        self.custom.push(Persona {
            id: new_id.clone(),
            name: name.to_string(),
            prompt: prompt.to_string(),
            is_default: false,
            model: None,
            placeholder: None,
            intro_message: None,
            description: None,
            demo_prompts: None,
            last_used: Some(Utc::now().timestamp_millis()),
        });
        self.save()?;
        Ok(new_id)
    }

    /// Apply a patch to a persona.
    ///
    /// For an existing custom record the patch shallow-merges. For a
    /// built-in id with no record yet, an override record is synthesized,
    /// inheriting name and prompt from the built-in where the patch leaves
    /// them unset. Unknown ids are a no-op.
    pub fn update(&mut self, persona_id: &str, patch: PersonaPatch) -> Result<(), PersonaError> {
        if let Some(index) = self.custom.iter().position(|p| p.id == persona_id) {
            apply_patch(&mut self.custom[index], patch);
            return self.save();
        }

        let Some(builtin) = self.builtins.iter().find(|p| p.id == persona_id) else {
            return Ok(());
        };

        let record = Persona {
            id: persona_id.to_string(),
            name: patch.name.unwrap_or_else(|| builtin.name.clone()),
            prompt: patch.prompt.unwrap_or_else(|| builtin.prompt.clone()),
            is_default: true,
            model: patch.model,
            placeholder: patch.placeholder,
            intro_message: None,
            description: None,
            demo_prompts: None,
            last_used: patch.last_used,
        };
        self.custom.push(record);
        self.save()
    }

    /// Delete a user persona. Built-in ids are refused (no-op); overrides
    /// are removed with [`Self::reset_to_default`] instead.
    pub fn delete(&mut self, persona_id: &str) -> Result<(), PersonaError> {
        if self.is_builtin(persona_id) {
            tracing::debug!(persona = persona_id, "refusing to delete built-in persona");
            return Ok(());
        }
        let before = self.custom.len();
        self.custom.retain(|persona| persona.id != persona_id);
        if self.custom.len() == before {
            return Ok(());
        }
        self.save()
    }

    /// Mark a persona as just used, reordering [`Self::all_sorted`].
    pub fn select(&mut self, persona_id: &str) -> Result<(), PersonaError> {
        if self.get(persona_id).is_none() {
            return Ok(());
        }
        self.update(persona_id, PersonaPatch::touch(Utc::now().timestamp_millis()))
    }

    /// Remove the override record for a built-in id, restoring pristine
    /// defaults. No-op for non-built-in ids; calling it twice is the same
    /// as calling it once.
    pub fn reset_to_default(&mut self, persona_id: &str) -> Result<(), PersonaError> {
        if !self.is_builtin(persona_id) {
            return Ok(());
        }
        let before = self.custom.len();
        self.custom.retain(|persona| persona.id != persona_id);
        if self.custom.len() == before {
            return Ok(());
        }
        self.save()
    }

    /// The custom/override records, as persisted. The persisted shape has
    /// no presentation-only fields, so this is suitable for backup as-is.
    pub fn export_custom(&self) -> Vec<Persona> {
        self.custom.clone()
    }

    /// How many incoming records collide with existing custom ids. Callers
    /// surface this before deciding whether to import with overwrite.
    pub fn duplicate_count(&self, records: &[Persona]) -> usize {
        let existing: HashSet<&str> = self.custom.iter().map(|p| p.id.as_str()).collect();
        records
            .iter()
            .filter(|record| existing.contains(record.id.as_str()))
            .count()
    }

    /// Parse an import payload into persona records.
    ///
    /// Accepts either a bare JSON array or an object wrapping one under a
    /// `personas` key. Anything else, or records missing id/name, fails
    /// with `InvalidFormat`.
    pub fn parse_import_records(value: &serde_json::Value) -> Result<Vec<Persona>, PersonaError> {
        let list = if value.is_array() {
            value
        } else {
            value
                .get("personas")
                .filter(|nested| nested.is_array())
                .ok_or(PersonaError::InvalidFormat)?
        };
        let records: Vec<Persona> =
            serde_json::from_value(list.clone()).map_err(|_| PersonaError::InvalidFormat)?;
        for record in &records {
            if validation::is_blank(&record.id) || validation::is_blank(&record.name) {
                return Err(PersonaError::InvalidFormat);
            }
        }
        Ok(records)
    }

    /// Merge externally supplied records into the custom list.
    ///
    /// Id collisions are skipped outright when `overwrite` is false. With
    /// `overwrite` set they merge-preserve: fields present in the incoming
    /// record replace the existing values, fields absent in the incoming
    /// record keep what was there. New ids are inserted as-is.
    pub fn import_custom(
        &mut self,
        records: Vec<Persona>,
        overwrite: bool,
    ) -> Result<ImportStats, PersonaError> {
        let mut stats = ImportStats::default();
        for incoming in records {
            match self.custom.iter().position(|p| p.id == incoming.id) {
                Some(index) if overwrite => {
                    let merged = merge_preserve(&self.custom[index], incoming);
                    self.custom[index] = merged;
                    stats.updated += 1;
                }
                Some(_) => {}
                None => {
                    self.custom.push(incoming);
                    stats.added += 1;
                }
            }
        }
        self.save()?;
        Ok(stats)
    }

    /// Drop every custom record, reverting all personas to built-ins.
    pub fn clear_custom(&mut self) -> Result<(), PersonaError> {
        self.custom.clear();
        self.store.remove(keys::CUSTOM_PERSONAS);
        Ok(())
    }

    fn merged(&self) -> Vec<Persona> {
        let custom_by_id: HashMap<&str, &Persona> = self
            .custom
            .iter()
            .map(|persona| (persona.id.as_str(), persona))
            .collect();

        let mut personas: Vec<Persona> = self
            .builtins
            .iter()
            .map(|builtin| match custom_by_id.get(builtin.id.as_str()) {
                Some(record) => apply_override(builtin, record),
                None => builtin.clone(),
            })
            .collect();

        let builtin_ids: HashSet<&str> = self
            .builtins
            .iter()
            .map(|persona| persona.id.as_str())
            .collect();
        personas.extend(
            self.custom
                .iter()
                .filter(|persona| !builtin_ids.contains(persona.id.as_str()))
                .cloned(),
        );
        personas
    }

    fn save(&self) -> Result<(), PersonaError> {
        self.store.set(keys::CUSTOM_PERSONAS, &self.custom)?;
        Ok(())
    }
}

fn apply_patch(persona: &mut Persona, patch: PersonaPatch) {
    if let Some(name) = patch.name {
        persona.name = name;
    }
    if let Some(prompt) = patch.prompt {
        persona.prompt = prompt;
    }
    if let Some(placeholder) = patch.placeholder {
        persona.placeholder = Some(placeholder);
    }
    if let Some(intro_message) = patch.intro_message {
        persona.intro_message = Some(intro_message);
    }
    if let Some(description) = patch.description {
        persona.description = Some(description);
    }
    if let Some(demo_prompts) = patch.demo_prompts {
        persona.demo_prompts = Some(demo_prompts);
    }
    if let Some(model) = patch.model {
        persona.model = Some(model);
    }
    if let Some(last_used) = patch.last_used {
        persona.last_used = Some(last_used);
    }
}

/// Overwrite-import merge: fields carried by the incoming record replace
/// the existing ones, fields it omits keep their previous values.
fn merge_preserve(existing: &Persona, incoming: Persona) -> Persona {
    Persona {
        id: existing.id.clone(),
        name: incoming.name,
        prompt: incoming.prompt,
        is_default: incoming.is_default,
        model: incoming.model.or_else(|| existing.model.clone()),
        placeholder: incoming.placeholder.or_else(|| existing.placeholder.clone()),
        intro_message: incoming
            .intro_message
            .or_else(|| existing.intro_message.clone()),
        description: incoming.description.or_else(|| existing.description.clone()),
        demo_prompts: incoming
            .demo_prompts
            .or_else(|| existing.demo_prompts.clone()),
        last_used: incoming.last_used.or(existing.last_used),
    }
}

/// Merged view of a built-in shadowed by an override record. A blank
/// override name/prompt/placeholder falls back to the built-in value;
/// recency and model always come from the override.
fn apply_override(builtin: &Persona, record: &Persona) -> Persona {
    Persona {
        id: builtin.id.clone(),
        name: non_blank_or(&record.name, &builtin.name),
        prompt: non_blank_or(&record.prompt, &builtin.prompt),
        is_default: true,
        model: record.model.clone(),
        placeholder: record
            .placeholder
            .clone()
            .filter(|value| !validation::is_blank(value))
            .or_else(|| builtin.placeholder.clone()),
        intro_message: builtin.intro_message.clone(),
        description: builtin.description.clone(),
        demo_prompts: builtin.demo_prompts.clone(),
        last_used: record.last_used,
    }
}

fn non_blank_or(value: &str, fallback: &str) -> String {
    if validation::is_blank(value) {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
