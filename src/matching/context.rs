//! Matching context
//!
//! Per-operation lookup structure built once per learner-facing call: an
//! alias→entity map over the catalog slice and an alias→progress map scoped
//! to one learner's aggregate. Progress entries are keyed by the union of
//! their own stored-identifier aliases and their resolved entity's aliases,
//! so a later lookup by either spelling lands on the same record.
//!
//! Collisions are first-writer-wins: the first registered entity owns the
//! alias. Collisions are recorded and logged, never fatal here (the service
//! decides whether to escalate under strict mode).

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;
use tracing::{debug, warn};

use super::alias::{identifier_aliases, Aliasable};
use super::normalize::{normalize_identifier, normalize_str};
use crate::catalog::{Lesson, Module, Track};
use crate::progress::{LessonProgress, Progress, TrackProgress};

/// One recorded alias collision (first writer kept)
#[derive(Debug, Clone)]
pub struct AliasCollision {
    pub alias: String,
    pub kept: String,
    pub discarded: String,
}

/// Result of resolving an identifier against one context level.
///
/// `matched_alias` records which variant hit, for diagnostics. An all-`None`
/// resolution means "not yet started", never an error.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub progress_idx: Option<usize>,
    pub entity_idx: Option<usize>,
    pub matched_alias: Option<String>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.progress_idx.is_none() && self.entity_idx.is_none()
    }
}

fn register_alias(
    map: &mut HashMap<String, usize>,
    alias: &str,
    idx: usize,
    kept_id: impl Fn(usize) -> String,
    collisions: &mut Vec<AliasCollision>,
) {
    if let Some(&owner) = map.get(alias) {
        if owner != idx {
            let collision = AliasCollision {
                alias: alias.to_string(),
                kept: kept_id(owner),
                discarded: kept_id(idx),
            };
            warn!(
                alias = %collision.alias,
                kept = %collision.kept,
                discarded = %collision.discarded,
                "Alias collision, first registration wins"
            );
            collisions.push(collision);
        }
        return;
    }
    map.insert(alias.to_string(), idx);
}

// ============================================================================
// Track Level
// ============================================================================

/// Alias lookup over the active track catalog and one learner's
/// TrackProgress list. Owns the catalog slice it was built from.
pub struct TrackMatchingContext {
    tracks: Vec<Track>,
    track_aliases: Vec<BTreeSet<String>>,
    alias_to_track: HashMap<String, usize>,
    /// alias -> (progress index, resolved track index if known)
    alias_to_progress: HashMap<String, (usize, Option<usize>)>,
    collisions: Vec<AliasCollision>,
}

impl TrackMatchingContext {
    /// Build the two maps for one operation
    pub fn prepare(tracks: Vec<Track>, progress: &Progress) -> Self {
        let track_aliases: Vec<BTreeSet<String>> =
            tracks.iter().map(|t| t.build_aliases()).collect();

        let mut alias_to_track = HashMap::new();
        let mut collisions = Vec::new();
        for (idx, aliases) in track_aliases.iter().enumerate() {
            for alias in aliases {
                register_alias(
                    &mut alias_to_track,
                    alias,
                    idx,
                    |i| tracks[i].id.clone(),
                    &mut collisions,
                );
            }
        }

        let mut alias_to_progress: HashMap<String, (usize, Option<usize>)> = HashMap::new();
        for (p_idx, entry) in progress.tracks.iter().enumerate() {
            let own = identifier_aliases(&entry.track_id);

            // Resolve the stored identifier to a catalog row: alias map
            // first, direct key equality as fallback
            let resolved = own
                .iter()
                .find_map(|a| alias_to_track.get(a).copied())
                .or_else(|| {
                    tracks
                        .iter()
                        .position(|t| entry.track_id.as_str() == Some(t.id.as_str()))
                });

            let mut union = own;
            if let Some(t_idx) = resolved {
                union.extend(track_aliases[t_idx].iter().cloned());
            }
            for alias in union {
                alias_to_progress.entry(alias).or_insert((p_idx, resolved));
            }
        }

        Self {
            tracks,
            track_aliases,
            alias_to_track,
            alias_to_progress,
            collisions,
        }
    }

    /// The catalog slice this context was built over
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, track_idx: usize) -> &Track {
        &self.tracks[track_idx]
    }

    /// Resolve an identifier to `{progress entry, entity}`: direct
    /// alias→progress lookup first, then alias→entity followed by a second
    /// pass over that entity's aliases against the progress map
    pub fn resolve_progress(&self, identifier: &Value) -> Resolution {
        let variants = normalize_identifier(identifier);

        for alias in &variants {
            if let Some(&(p_idx, t_idx)) = self.alias_to_progress.get(alias) {
                debug!(alias = %alias, "Track progress matched directly");
                return Resolution {
                    progress_idx: Some(p_idx),
                    entity_idx: t_idx,
                    matched_alias: Some(alias.clone()),
                };
            }
        }

        for alias in &variants {
            if let Some(&t_idx) = self.alias_to_track.get(alias) {
                for entity_alias in &self.track_aliases[t_idx] {
                    if let Some(&(p_idx, _)) = self.alias_to_progress.get(entity_alias) {
                        debug!(alias = %entity_alias, "Track progress matched via entity aliases");
                        return Resolution {
                            progress_idx: Some(p_idx),
                            entity_idx: Some(t_idx),
                            matched_alias: Some(entity_alias.clone()),
                        };
                    }
                }
                return Resolution {
                    progress_idx: None,
                    entity_idx: Some(t_idx),
                    matched_alias: Some(alias.clone()),
                };
            }
        }

        Resolution::default()
    }

    /// Resolve an identifier to a catalog track only
    pub fn track_index(&self, identifier: &Value) -> Option<usize> {
        normalize_identifier(identifier)
            .iter()
            .find_map(|a| self.alias_to_track.get(a).copied())
    }

    /// Full alias set of one catalog track
    pub fn aliases_for_track(&self, track_idx: usize) -> &BTreeSet<String> {
        &self.track_aliases[track_idx]
    }

    /// Collisions recorded while building the context
    pub fn collisions(&self) -> &[AliasCollision] {
        &self.collisions
    }
}

// ============================================================================
// Module Level
// ============================================================================

/// The analogous two-map lookup one level down: active modules of one track
/// against one TrackProgress's ModuleProgress list. Owns the module slice.
pub struct ModuleMatchingContext {
    modules: Vec<Module>,
    module_aliases: Vec<BTreeSet<String>>,
    alias_to_module: HashMap<String, usize>,
    alias_to_progress: HashMap<String, (usize, Option<usize>)>,
    collisions: Vec<AliasCollision>,
}

impl ModuleMatchingContext {
    pub fn prepare(modules: Vec<Module>, track_progress: &TrackProgress) -> Self {
        let module_aliases: Vec<BTreeSet<String>> =
            modules.iter().map(|m| m.build_aliases()).collect();

        let mut alias_to_module = HashMap::new();
        let mut collisions = Vec::new();
        for (idx, aliases) in module_aliases.iter().enumerate() {
            for alias in aliases {
                register_alias(
                    &mut alias_to_module,
                    alias,
                    idx,
                    |i| modules[i].id.clone(),
                    &mut collisions,
                );
            }
        }

        let mut alias_to_progress: HashMap<String, (usize, Option<usize>)> = HashMap::new();
        for (p_idx, entry) in track_progress.modules.iter().enumerate() {
            let own = identifier_aliases(&entry.module_id);
            let resolved = own
                .iter()
                .find_map(|a| alias_to_module.get(a).copied())
                .or_else(|| {
                    modules
                        .iter()
                        .position(|m| entry.module_id.as_str() == Some(m.id.as_str()))
                });

            let mut union = own;
            if let Some(m_idx) = resolved {
                union.extend(module_aliases[m_idx].iter().cloned());
            }
            for alias in union {
                alias_to_progress.entry(alias).or_insert((p_idx, resolved));
            }
        }

        Self {
            modules,
            module_aliases,
            alias_to_module,
            alias_to_progress,
            collisions,
        }
    }

    /// The ordered module slice this context was built over
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn into_modules(self) -> Vec<Module> {
        self.modules
    }

    /// Resolve an identifier to `{module progress entry, module}` with the
    /// same two-pass strategy as the track level
    pub fn find_module_progress(&self, identifier: &Value) -> Resolution {
        let variants = normalize_identifier(identifier);

        for alias in &variants {
            if let Some(&(p_idx, m_idx)) = self.alias_to_progress.get(alias) {
                return Resolution {
                    progress_idx: Some(p_idx),
                    entity_idx: m_idx,
                    matched_alias: Some(alias.clone()),
                };
            }
        }

        for alias in &variants {
            if let Some(&m_idx) = self.alias_to_module.get(alias) {
                for entity_alias in &self.module_aliases[m_idx] {
                    if let Some(&(p_idx, _)) = self.alias_to_progress.get(entity_alias) {
                        return Resolution {
                            progress_idx: Some(p_idx),
                            entity_idx: Some(m_idx),
                            matched_alias: Some(entity_alias.clone()),
                        };
                    }
                }
                return Resolution {
                    progress_idx: None,
                    entity_idx: Some(m_idx),
                    matched_alias: Some(alias.clone()),
                };
            }
        }

        Resolution::default()
    }

    /// Resolve an identifier to a catalog module only
    pub fn module_index(&self, identifier: &Value) -> Option<usize> {
        normalize_identifier(identifier)
            .iter()
            .find_map(|a| self.alias_to_module.get(a).copied())
    }

    /// ModuleProgress entry for a known catalog module, if tracked
    pub fn progress_for_module(&self, module_idx: usize) -> Option<usize> {
        self.module_aliases[module_idx]
            .iter()
            .find_map(|a| self.alias_to_progress.get(a).map(|&(p, _)| p))
    }

    pub fn collisions(&self) -> &[AliasCollision] {
        &self.collisions
    }
}

// ============================================================================
// Lesson Level
// ============================================================================

/// Alias set of a catalog lesson (id, code, slug). Lessons do not carry the
/// full builder treatment; variant intersection is enough one level down.
pub fn lesson_aliases(lesson: &Lesson) -> BTreeSet<String> {
    let mut aliases = normalize_str(&lesson.id);
    if let Some(code) = &lesson.code {
        aliases.extend(normalize_str(code));
    }
    if let Some(slug) = &lesson.slug {
        aliases.extend(normalize_str(slug));
    }
    aliases
}

/// Find the LessonProgress entry tracking a catalog lesson
pub fn find_lesson_progress(lessons: &[LessonProgress], lesson: &Lesson) -> Option<usize> {
    let wanted = lesson_aliases(lesson);
    lessons.iter().position(|lp| {
        identifier_aliases(&lp.lesson_id)
            .intersection(&wanted)
            .next()
            .is_some()
    })
}

/// Find a LessonProgress entry by a raw identifier in any encoding
pub fn find_lesson_progress_by_identifier(
    lessons: &[LessonProgress],
    identifier: &Value,
) -> Option<usize> {
    let wanted = normalize_identifier(identifier);
    lessons.iter().position(|lp| {
        identifier_aliases(&lp.lesson_id)
            .intersection(&wanted)
            .next()
            .is_some()
    })
}
