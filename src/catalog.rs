//! Catalog entity models
//!
//! Tracks, modules, and lessons as loaded from the catalog store. Read-only
//! from the engine's perspective. Identifier fields that historically carry
//! mixed encodings (foreign keys, codes, nested reference objects) are kept
//! as raw JSON values and resolved through the matching layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

fn default_true() -> bool {
    true
}

/// Top-level curriculum unit containing ordered modules
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Track {
    pub id: String,
    /// Human-readable code ("TRK-1", "track_1", free text)
    pub code: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub legacy_id: Option<String>,
    pub title: String,
    pub order: i32,
    /// Track-level prerequisites; entries are track references in any
    /// historical encoding
    #[serde(default)]
    pub prerequisites: Vec<Value>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Ordered unit within a track, optionally gated by a quiz or lab
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Module {
    pub id: String,
    /// Parent track reference; encodings vary across catalog generations
    pub track_id: Value,
    /// Human-readable code ("MOD-1.1", "module_1.1", free text)
    pub code: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub legacy_id: Option<String>,
    pub title: String,
    pub order: i32,
    #[serde(default)]
    pub quiz_id: Option<String>,
    #[serde(default)]
    pub lab_id: Option<String>,
    #[serde(default)]
    pub prerequisites: Vec<Value>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Module {
    /// Whether completing this module requires passing a quiz
    pub fn requires_quiz(&self) -> bool {
        self.quiz_id.is_some()
    }

    /// Whether completing this module requires passing a lab
    pub fn requires_lab(&self) -> bool {
        self.lab_id.is_some()
    }
}

/// Smallest orderable unit of content within a module
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Lesson {
    pub id: String,
    /// Parent module reference; encodings vary across catalog generations
    pub module_id: Value,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    pub title: String,
    pub order: i32,
    /// Lesson prerequisites; a single list mixing track, module, and lesson
    /// references with no type discriminant
    #[serde(default)]
    pub prerequisites: Vec<Value>,
    #[serde(default = "default_true")]
    pub active: bool,
}
