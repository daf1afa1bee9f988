//! Collaborator interfaces
//!
//! The engine loads catalog slices and one learner's progress aggregate
//! through these traits; everything behind them (database, HTTP, cache) is
//! out of scope. Catalog reads are re-fetched per operation - freshness over
//! performance. In-memory reference implementations live in [`memory`].

pub mod memory;

use std::collections::BTreeSet;

use serde_json::Value;

use crate::catalog::{Lesson, Module, Track};
use crate::error::ProgressionError;
use crate::progress::Progress;

/// Read-only catalog access
pub trait CatalogStore: Send + Sync {
    /// All active tracks, ordered by `order`
    fn find_active_tracks(&self) -> Result<Vec<Track>, ProgressionError>;

    /// Active modules whose stored track reference matches any of the given
    /// aliases, ordered by `order`. Alias-based because `Module.track_id`
    /// encodings historically differ from `Track.id`.
    fn find_active_modules_by_track_aliases(
        &self,
        aliases: &BTreeSet<String>,
    ) -> Result<Vec<Module>, ProgressionError>;

    /// Active lessons of a module, ordered by `order`
    fn find_active_lessons_by_module(
        &self,
        module: &Module,
    ) -> Result<Vec<Lesson>, ProgressionError>;

    /// Lesson lookup: direct key match with alias fallback
    fn find_lesson_by_id(&self, identifier: &Value) -> Result<Option<Lesson>, ProgressionError>;

    /// Module lookup: direct key match with alias fallback
    fn find_module_by_id(&self, identifier: &Value) -> Result<Option<Module>, ProgressionError>;

    /// Module lookup by primary key only (no alias matching); used by the
    /// prerequisite pipeline for id-shaped references
    fn find_module_by_key(&self, key: &str) -> Result<Option<Module>, ProgressionError>;
}

/// Load and save one learner's progress aggregate
pub trait ProgressStore: Send + Sync {
    fn find_by_learner(&self, learner_id: &str) -> Result<Option<Progress>, ProgressionError>;

    /// Create the aggregate for a learner (first reference)
    fn create(&self, learner_id: &str) -> Result<Progress, ProgressionError>;

    /// Persist the whole aggregate. No version check: a concurrent writer
    /// for the same learner can silently overwrite (known gap).
    fn save(&self, progress: &Progress) -> Result<(), ProgressionError>;
}

/// Gamification collaborator
pub trait Gamification: Send + Sync {
    /// Award points; returns true when the learner leveled up
    fn add_xp(&self, progress: &mut Progress, points: u32) -> bool;
}

pub use memory::{MemoryCatalog, MemoryProgressStore, XpLeveling};
