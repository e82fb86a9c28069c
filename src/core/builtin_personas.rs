use serde::Deserialize;

use crate::core::persona::Persona;

#[derive(Debug, Deserialize)]
struct BuiltinPersonaConfig {
    personas: Vec<Persona>,
}

/// Personas compiled into the binary. User records can shadow selected
/// fields of these by id but they are never removed.
pub fn load_builtin_personas() -> Vec<Persona> {
    const CONFIG_CONTENT: &str = include_str!("../builtins/personas.toml");
    let mut config: BuiltinPersonaConfig =
        toml::from_str(CONFIG_CONTENT).expect("Failed to parse builtins/personas.toml");
    for persona in &mut config.personas {
        persona.is_default = true;
    }
    config.personas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_has_expected_builtins() {
        let personas = load_builtin_personas();
        let ids: Vec<String> = personas.iter().map(|p| p.id.clone()).collect();
        assert!(ids.contains(&"glitch".to_string()));
        assert!(ids.contains(&"blame".to_string()));
        assert!(ids.contains(&"reson".to_string()));
    }

    #[test]
    fn builtins_are_marked_default_and_complete() {
        for persona in load_builtin_personas() {
            assert!(persona.is_default, "{} must be a default persona", persona.id);
            assert!(!persona.name.trim().is_empty());
            assert!(!persona.prompt.trim().is_empty());
            assert!(persona.placeholder.is_some());
            assert!(persona.intro_message.is_some());
            assert!(persona.last_used.is_none());
        }
    }
}
