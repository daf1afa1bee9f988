//! Service layer for the progression engine
//!
//! Services encapsulate business logic between transport handlers and the
//! collaborator stores:
//! - Gating and monotonic state transitions
//! - Cross-entity orchestration (tracks + modules + lessons)
//! - Event emission for audit/notifications and matching diagnostics
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (external, thin)
//!     ↓
//! ProgressionService (state machine + workflows)
//!     ↓
//! Matching Context (per-operation alias maps)
//!     ↓
//! CatalogStore / ProgressStore (external collaborators)
//! ```

pub mod events;
pub mod progression_service;

// Re-exports
pub use events::{EventBus, EventListener, LoggingEventListener, ProgressionEvent};
pub use progression_service::{
    CompleteLessonOutcome, LessonChain, ModuleUnlockOutcome, ProgressionService,
    PREREQUISITE_INTERPRETATIONS,
};

use std::sync::Arc;

use crate::config::ProgressionConfig;
use crate::store::{CatalogStore, Gamification, ProgressStore};

/// Service container for dependency injection
pub struct Services {
    pub progression: Arc<ProgressionService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Wire the progression service with a shared event bus
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        progress_store: Arc<dyn ProgressStore>,
        gamification: Arc<dyn Gamification>,
        config: ProgressionConfig,
    ) -> Self {
        let events = Arc::new(EventBus::new());

        Self {
            progression: Arc::new(ProgressionService::new(
                catalog,
                progress_store,
                gamification,
                events.clone(),
                config,
            )),
            events,
        }
    }
}
