//! Event system for progression operations
//!
//! Provides an event bus for notifying listeners about progression
//! operations. Useful for:
//! - Audit logging
//! - Real-time notifications
//! - Diagnosing heuristic alias matching (collision and prerequisite traces)

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Events emitted by the progression service
#[derive(Debug, Clone)]
pub enum ProgressionEvent {
    TrackStarted {
        learner_id: String,
        track_id: String,
    },
    TrackCompleted {
        learner_id: String,
        track_id: String,
    },
    LessonStarted {
        learner_id: String,
        lesson_id: String,
    },
    LessonCompleted {
        learner_id: String,
        lesson_id: String,
        leveled_up: bool,
    },
    ModuleCompleted {
        learner_id: String,
        module_id: String,
    },
    ModuleUnlocked {
        learner_id: String,
        module_id: String,
    },
    NextLessonQueued {
        learner_id: String,
        lesson_id: String,
    },

    // Diagnostic trace for the heuristic matching layer
    AliasCollision {
        alias: String,
        kept_id: String,
        discarded_id: String,
    },
    PrerequisiteResolved {
        learner_id: String,
        reference: String,
        interpretation: &'static str,
        satisfied: bool,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &ProgressionEvent);
}

/// Event bus for broadcasting progression events
pub struct EventBus {
    sender: broadcast::Sender<ProgressionEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: ProgressionEvent) {
        trace!(event = ?event, "Emitting progression event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressionEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &ProgressionEvent) {
        match event {
            ProgressionEvent::TrackStarted { learner_id, track_id } => {
                debug!(learner = %learner_id, track = %track_id, "Track started");
            }
            ProgressionEvent::LessonCompleted {
                learner_id,
                lesson_id,
                leveled_up,
            } => {
                debug!(
                    learner = %learner_id,
                    lesson = %lesson_id,
                    leveled_up = leveled_up,
                    "Lesson completed"
                );
            }
            ProgressionEvent::AliasCollision {
                alias,
                kept_id,
                discarded_id,
            } => {
                warn!(
                    alias = %alias,
                    kept = %kept_id,
                    discarded = %discarded_id,
                    "Alias collision"
                );
            }
            _ => {
                trace!(event = ?event, "Progression event");
            }
        }
    }
}
