//! Lamad Progression - progression engine for learning tracks
//!
//! Tracks a learner's advancement through Tracks → Modules → Lessons and
//! gates access based on completion and prerequisites. The catalog grew
//! several identifier conventions over time (database keys, human codes
//! like "MOD-1.1", slugs, legacy string ids), so the engine carries a
//! dedicated reconciliation layer that resolves any historical spelling to
//! the same logical entity before gating decisions are made.
//!
//! ## Architecture
//!
//! ```text
//! request (learner id + target identifier)
//!     │
//!     ▼
//! ProgressionService ──► EventBus (audit + matching diagnostics)
//!     │
//!     ├─ TrackMatchingContext / ModuleMatchingContext (per operation)
//!     │      └─ Aliasable entities ◄─ Identifier Normalizer
//!     │
//!     ├─ CatalogStore (external: tracks, modules, lessons)
//!     └─ ProgressStore (external: one aggregate per learner)
//! ```
//!
//! ## Processing model
//!
//! Synchronous per request: each operation reads the whole aggregate,
//! builds a fresh matching context, mutates in memory, and saves the whole
//! aggregate back. Errors are domain-typed and raised before any save.
//! There is no version check on save, so concurrent operations for the same
//! learner can lose an update - a known gap, kept as-is.
//!
//! ## Matching tradeoff
//!
//! Alias resolution over-generates variants to maximize recall; the cost is
//! occasional alias collisions, resolved first-writer-wins and surfaced as
//! events rather than errors (see `ProgressionConfig::strict_alias_collisions`
//! to fail loudly instead).

pub mod catalog;
pub mod config;
pub mod error;
pub mod matching;
pub mod progress;
pub mod services;
pub mod store;

// Re-exports
pub use catalog::{Lesson, Module, Track};
pub use config::ProgressionConfig;
pub use error::ProgressionError;
pub use matching::{
    Aliasable, ModuleMatchingContext, Resolution, TrackMatchingContext,
};
pub use progress::{
    gate_statuses, lesson_statuses, LessonProgress, ModuleProgress, Progress, TrackProgress,
};
pub use services::{
    CompleteLessonOutcome, EventBus, LessonChain, ProgressionEvent, ProgressionService, Services,
};
pub use store::{CatalogStore, Gamification, MemoryCatalog, MemoryProgressStore, ProgressStore};
