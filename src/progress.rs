//! Per-learner progress aggregate
//!
//! One `Progress` record per learner holding nested track/module/lesson
//! state. Status advancement is monotonic: every transition goes through
//! [`advance_status`], which refuses to lower a status rank. Entries are
//! never deleted; a mis-created `locked` entry is upgraded lazily the next
//! time its module is resolved.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

/// Get current UTC timestamp as ISO 8601 string
pub fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

// ============================================================================
// Status Constants
// ============================================================================

/// Track and module gate statuses, in rank order
pub mod gate_statuses {
    pub const LOCKED: &str = "locked";
    pub const UNLOCKED: &str = "unlocked";
    pub const IN_PROGRESS: &str = "in_progress";
    pub const COMPLETED: &str = "completed";

    /// All gate statuses in rank order
    pub const ALL: [&str; 4] = [LOCKED, UNLOCKED, IN_PROGRESS, COMPLETED];

    /// Get index of a status, returning None for invalid values
    pub fn index_of(status: &str) -> Option<usize> {
        ALL.iter().position(|&s| s == status)
    }

    /// Check if a status is valid
    pub fn is_valid(status: &str) -> bool {
        ALL.contains(&status)
    }

    /// Rank of a status for monotonic comparison. Unknown or empty values
    /// (legacy statusless entries) rank lowest.
    pub fn rank(status: &str) -> i32 {
        index_of(status).map(|i| i as i32).unwrap_or(0)
    }
}

/// Lesson statuses, in rank order
pub mod lesson_statuses {
    pub const NOT_STARTED: &str = "not_started";
    pub const IN_PROGRESS: &str = "in_progress";
    pub const COMPLETED: &str = "completed";

    /// All lesson statuses in rank order
    pub const ALL: [&str; 3] = [NOT_STARTED, IN_PROGRESS, COMPLETED];

    /// Get index of a status, returning None for invalid values
    pub fn index_of(status: &str) -> Option<usize> {
        ALL.iter().position(|&s| s == status)
    }

    /// Check if a status is valid
    pub fn is_valid(status: &str) -> bool {
        ALL.contains(&status)
    }

    /// Rank of a status for monotonic comparison
    pub fn rank(status: &str) -> i32 {
        index_of(status).map(|i| i as i32).unwrap_or(0)
    }
}

/// Advance `status` to `next` if that raises its rank. Returns true when the
/// status changed. Never regresses an already-advanced status.
pub fn advance_status(status: &mut String, next: &str, rank: fn(&str) -> i32) -> bool {
    if rank(next) > rank(status) || (status.is_empty() && !next.is_empty()) {
        *status = next.to_string();
        true
    } else {
        false
    }
}

// ============================================================================
// Aggregate Models
// ============================================================================

/// The per-learner progress aggregate
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Progress {
    pub id: String,
    pub learner_id: String,
    pub tracks: Vec<TrackProgress>,
    #[serde(default)]
    pub xp: i64,
    #[serde(default)]
    pub level: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl Progress {
    /// Create a fresh aggregate for a learner
    pub fn new(learner_id: &str) -> Self {
        let now = current_timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            learner_id: learner_id.to_string(),
            tracks: Vec::new(),
            xp: 0,
            level: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Progress through one track
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TrackProgress {
    /// Stored track reference in whatever encoding wrote it
    pub track_id: Value,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub modules: Vec<ModuleProgress>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl TrackProgress {
    /// New entry in the `unlocked` state with no module entries yet
    pub fn unlocked(track_id: Value) -> Self {
        Self {
            track_id,
            status: gate_statuses::UNLOCKED.to_string(),
            modules: Vec::new(),
            started_at: Some(current_timestamp()),
            completed_at: None,
        }
    }

    /// Monotonically advance the gate status; returns true on change
    pub fn advance(&mut self, next: &str) -> bool {
        let changed = advance_status(&mut self.status, next, gate_statuses::rank);
        if changed && next == gate_statuses::COMPLETED {
            self.completed_at = Some(current_timestamp());
        }
        changed
    }

    pub fn is_completed(&self) -> bool {
        self.status == gate_statuses::COMPLETED
    }
}

/// Progress through one module
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ModuleProgress {
    /// Stored module reference in whatever encoding wrote it
    pub module_id: Value,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub lessons: Vec<LessonProgress>,
    #[serde(default)]
    pub quiz_attempts: Vec<QuizAttempt>,
    #[serde(default)]
    pub lab_attempts: Vec<LabAttempt>,
    #[serde(default)]
    pub best_quiz_score: Option<f32>,
    #[serde(default)]
    pub best_lab_score: Option<f32>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl ModuleProgress {
    /// New entry with the given gate status
    pub fn new(module_id: Value, status: &str) -> Self {
        Self {
            module_id,
            status: status.to_string(),
            lessons: Vec::new(),
            quiz_attempts: Vec::new(),
            lab_attempts: Vec::new(),
            best_quiz_score: None,
            best_lab_score: None,
            completed_at: None,
        }
    }

    /// Monotonically advance the gate status; returns true on change
    pub fn advance(&mut self, next: &str) -> bool {
        let changed = advance_status(&mut self.status, next, gate_statuses::rank);
        if changed && next == gate_statuses::COMPLETED {
            self.completed_at = Some(current_timestamp());
        }
        changed
    }

    pub fn is_completed(&self) -> bool {
        self.status == gate_statuses::COMPLETED
    }

    pub fn is_locked(&self) -> bool {
        gate_statuses::rank(&self.status) < gate_statuses::rank(gate_statuses::UNLOCKED)
    }
}

/// Progress through one lesson
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LessonProgress {
    /// Stored lesson reference in whatever encoding wrote it
    pub lesson_id: Value,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl LessonProgress {
    /// New entry with the given lesson status; `started_at` is stamped only
    /// when the lesson begins as `in_progress`
    pub fn new(lesson_id: Value, status: &str) -> Self {
        let started_at = if status == lesson_statuses::IN_PROGRESS {
            Some(current_timestamp())
        } else {
            None
        };
        Self {
            lesson_id,
            status: status.to_string(),
            started_at,
            completed_at: None,
        }
    }

    /// Monotonically advance the lesson status; returns true on change
    pub fn advance(&mut self, next: &str) -> bool {
        let changed = advance_status(&mut self.status, next, lesson_statuses::rank);
        if changed {
            match next {
                lesson_statuses::IN_PROGRESS if self.started_at.is_none() => {
                    self.started_at = Some(current_timestamp());
                }
                lesson_statuses::COMPLETED => {
                    if self.started_at.is_none() {
                        self.started_at = Some(current_timestamp());
                    }
                    self.completed_at = Some(current_timestamp());
                }
                _ => {}
            }
        }
        changed
    }

    pub fn is_completed(&self) -> bool {
        self.status == lesson_statuses::COMPLETED
    }
}

/// One recorded quiz attempt (scoring itself happens upstream)
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct QuizAttempt {
    pub quiz_id: String,
    pub score: f32,
    pub passed: bool,
    pub attempted_at: String,
}

/// One recorded lab attempt (scoring itself happens upstream)
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LabAttempt {
    pub lab_id: String,
    pub score: f32,
    pub passed: bool,
    pub attempted_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gate_status_ranks_are_ordered() {
        let ranks: Vec<i32> = gate_statuses::ALL.iter().map(|s| gate_statuses::rank(s)).collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);
        assert!(gate_statuses::is_valid("unlocked"));
        assert!(!gate_statuses::is_valid("open"));
    }

    #[test]
    fn test_statusless_entry_ranks_lowest() {
        assert_eq!(gate_statuses::rank(""), 0);
        assert_eq!(gate_statuses::rank("locked"), 0);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut mp = ModuleProgress::new(json!("m1"), gate_statuses::LOCKED);
        assert!(mp.advance(gate_statuses::UNLOCKED));
        assert!(mp.advance(gate_statuses::COMPLETED));
        // No regression once completed
        assert!(!mp.advance(gate_statuses::IN_PROGRESS));
        assert_eq!(mp.status, gate_statuses::COMPLETED);
        assert!(mp.completed_at.is_some());
    }

    #[test]
    fn test_statusless_entry_can_be_upgraded() {
        let mut mp = ModuleProgress::new(json!("m1"), "");
        assert!(mp.advance(gate_statuses::UNLOCKED));
        assert_eq!(mp.status, gate_statuses::UNLOCKED);
    }

    #[test]
    fn test_lesson_completion_stamps_timestamps() {
        let mut lp = LessonProgress::new(json!("l1"), lesson_statuses::NOT_STARTED);
        assert!(lp.started_at.is_none());
        assert!(lp.advance(lesson_statuses::IN_PROGRESS));
        assert!(lp.started_at.is_some());
        assert!(lp.advance(lesson_statuses::COMPLETED));
        assert!(lp.completed_at.is_some());
        // Restart attempt does not regress
        assert!(!lp.advance(lesson_statuses::IN_PROGRESS));
        assert!(lp.is_completed());
    }

    #[test]
    fn test_legacy_aggregate_deserializes() {
        // Minimal legacy shape: statusless module entry, no xp fields
        let progress: Progress = serde_json::from_value(json!({
            "id": "p1",
            "learner_id": "learner-1",
            "tracks": [{
                "track_id": "TRK-1",
                "status": "in_progress",
                "modules": [{"module_id": {"_id": "m1"}}]
            }],
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(progress.tracks.len(), 1);
        assert_eq!(progress.tracks[0].modules[0].status, "");
        assert_eq!(progress.xp, 0);
    }
}
