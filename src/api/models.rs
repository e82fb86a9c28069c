//! Catalog of generation models the service accepts.
//!
//! The `rpm` column is the client-side requests-per-minute budget enforced
//! by the rate limiter before a request ever leaves the application; the
//! service applies its own limits on top.

/// A single model entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Model {
    pub id: &'static str,
    pub display_name: &'static str,
    /// Client-side requests-per-minute budget for throttling.
    pub rpm: usize,
    pub provider: &'static str,
}

/// Model used when neither the persona nor the host picked one.
pub const DEFAULT_MODEL_ID: &str = "gemini-2.5-flash";

pub const MODELS: &[Model] = &[
    Model {
        id: "gemini-2.5-pro",
        display_name: "Gemini 2.5 Pro",
        rpm: 2,
        provider: "Google",
    },
    Model {
        id: "gemini-2.5-flash",
        display_name: "Gemini 2.5 Flash",
        rpm: 4,
        provider: "Google",
    },
    Model {
        id: "gemini-2.5-flash-lite-preview-06-17",
        display_name: "Gemini 2.5 Flash-Lite (Preview)",
        rpm: 7,
        provider: "Google",
    },
    Model {
        id: "gemini-2.0-flash",
        display_name: "Gemini 2.0 Flash",
        rpm: 7,
        provider: "Google",
    },
    Model {
        id: "gemini-2.0-flash-lite",
        display_name: "Gemini 2.0 Flash-Lite",
        rpm: 10,
        provider: "Google",
    },
];

/// Look up a model by id.
pub fn find_model(id: &str) -> Option<&'static Model> {
    MODELS.iter().find(|model| model.id == id)
}
