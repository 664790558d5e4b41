//! Catalog of generative models the tutor can call, in fallback priority order.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Model used for speech synthesis. It never takes part in text fallback.
pub const TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
/// Prebuilt voice for examiner narration and shadowing samples.
pub const TTS_VOICE: &str = "Kore";

/// One selectable text model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Position in the fallback order; lower is tried first.
    pub priority: u32,
    #[serde(default)]
    pub is_default: bool,
}

impl ModelDescriptor {
    fn new(id: &str, name: &str, description: &str, priority: u32, is_default: bool) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            priority,
            is_default,
        }
    }
}

/// An immutable, priority-ordered list of text models.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<ModelDescriptor>", into = "Vec<ModelDescriptor>")]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            models: vec![
                ModelDescriptor::new(
                    "gemini-2.5-flash-preview-05-20",
                    "Gemini 2.5 Flash",
                    "Fast and efficient",
                    0,
                    true,
                ),
                ModelDescriptor::new(
                    "gemini-2.5-pro-preview-05-06",
                    "Gemini 2.5 Pro",
                    "Highest quality",
                    1,
                    false,
                ),
                ModelDescriptor::new(
                    "gemini-2.0-flash",
                    "Gemini 2.0 Flash",
                    "Stable and safe",
                    2,
                    false,
                ),
            ],
        }
    }
}

impl TryFrom<Vec<ModelDescriptor>> for ModelCatalog {
    type Error = String;

    fn try_from(mut models: Vec<ModelDescriptor>) -> Result<Self, Self::Error> {
        if models.is_empty() {
            return Err("model catalog must list at least one model".to_string());
        }
        models.sort_by_key(|m| m.priority);
        for (i, model) in models.iter().enumerate() {
            if models[..i].iter().any(|m| m.id == model.id) {
                return Err(format!("model '{}' is listed twice", model.id));
            }
        }
        Ok(Self { models })
    }
}

impl From<ModelCatalog> for Vec<ModelDescriptor> {
    fn from(catalog: ModelCatalog) -> Self {
        catalog.models
    }
}

impl ModelCatalog {
    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn find(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// The flagged default, or the highest-priority model when none is flagged.
    pub fn default_model(&self) -> &ModelDescriptor {
        self.models
            .iter()
            .find(|m| m.is_default)
            .unwrap_or(&self.models[0])
    }

    /// Builds the traversal order for one invocation: the selected model,
    /// then every other model once, wrapping around the priority list.
    pub fn fallback_order(&self, selected: &str) -> Vec<&ModelDescriptor> {
        let start = match self.models.iter().position(|m| m.id == selected) {
            Some(index) => index,
            None => {
                let fallback = self.default_model();
                warn!(selected, fallback = %fallback.id, "Selected model is not in the catalog");
                self.models
                    .iter()
                    .position(|m| m.id == fallback.id)
                    .unwrap_or(0)
            }
        };
        self.models[start..]
            .iter()
            .chain(self.models[..start].iter())
            .collect()
    }
}
