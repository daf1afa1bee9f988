//! Progression service - the unlock state machine and its entry points
//!
//! Wraps the catalog and progress stores with the gating rules:
//! - ensures progress records exist (aggregate created lazily, entries
//!   created on first touch and never deleted)
//! - evaluates gating (first module always eligible, later modules require
//!   their predecessor completed, quiz/lab gates block auto-completion)
//! - performs monotonic transitions and propagates unlocks on completion
//!
//! Each operation reads the whole aggregate, builds a fresh matching
//! context, mutates in memory, and saves the whole aggregate back. Errors
//! are raised before any save; there are no partial commits. There is also
//! no version check on save, so two concurrent operations for the same
//! learner can lose an update (known gap).

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::catalog::{Lesson, Module};
use crate::config::ProgressionConfig;
use crate::error::ProgressionError;
use crate::matching::{
    find_lesson_progress, find_lesson_progress_by_identifier, identifier_aliases,
    looks_like_primary_key, normalize_identifier, AliasCollision, Aliasable,
    ModuleMatchingContext, TrackMatchingContext,
};
use crate::progress::{
    current_timestamp, gate_statuses, lesson_statuses, LessonProgress, ModuleProgress, Progress,
    TrackProgress,
};
use crate::store::{CatalogStore, Gamification, ProgressStore};

use super::events::{EventBus, ProgressionEvent};

/// Priority order for interpreting an untyped prerequisite reference. The
/// first interpretation that resolves wins; its target must be completed.
pub const PREREQUISITE_INTERPRETATIONS: [&str; 4] =
    ["track", "module_key", "module_code", "lesson"];

/// Resolved chain returned by [`ProgressionService::ensure_lesson_progress`]
#[derive(Debug, Clone)]
pub struct LessonChain {
    /// The aggregate after the ensure pass (already persisted)
    pub progress: Progress,
    pub track_idx: usize,
    pub module_idx: usize,
    pub lesson_idx: usize,
    pub module: Module,
    pub lesson: Lesson,
}

/// Outcome of a lesson completion
#[derive(Debug, Clone)]
pub struct CompleteLessonOutcome {
    pub progress: Progress,
    pub leveled_up: bool,
    pub module_completed: bool,
    pub track_completed: bool,
    pub next_lesson_queued: bool,
    pub next_module_unlocked: Option<String>,
}

/// Outcome of an unlock-next-module pass
#[derive(Debug, Clone, Default)]
pub struct ModuleUnlockOutcome {
    pub module_completed: bool,
    pub next_module_unlocked: Option<String>,
}

/// Internal resolved location of one module inside the aggregate
struct ModuleChain {
    track_prog_idx: usize,
    module_prog_idx: usize,
    /// Position of the module among the track's active, ordered modules
    position: usize,
    /// Active modules of the track, in order
    modules: Vec<Module>,
    module: Module,
}

/// Progression service
pub struct ProgressionService {
    catalog: Arc<dyn CatalogStore>,
    progress_store: Arc<dyn ProgressStore>,
    gamification: Arc<dyn Gamification>,
    events: Arc<EventBus>,
    config: ProgressionConfig,
}

impl ProgressionService {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        progress_store: Arc<dyn ProgressStore>,
        gamification: Arc<dyn Gamification>,
        events: Arc<EventBus>,
        config: ProgressionConfig,
    ) -> Self {
        Self {
            catalog,
            progress_store,
            gamification,
            events,
            config,
        }
    }

    // =========================================================================
    // Entry Points
    // =========================================================================

    /// Start a track: prerequisite check, get-or-create TrackProgress, and
    /// seeding of ModuleProgress entries (first module unlocked, rest locked)
    pub fn start_track(
        &self,
        learner_id: &str,
        track_id: &Value,
    ) -> Result<Progress, ProgressionError> {
        let mut progress = self.get_or_create_progress(learner_id)?;
        let track_pk = self.start_track_inner(&mut progress, track_id)?;

        progress.updated_at = current_timestamp();
        self.progress_store.save(&progress)?;
        self.events.emit(ProgressionEvent::TrackStarted {
            learner_id: learner_id.to_string(),
            track_id: track_pk,
        });
        Ok(progress)
    }

    /// Start a lesson: chain resolution with gating, polymorphic
    /// prerequisite check, then the lesson (and its module and track) go
    /// `in_progress`. The prerequisite check runs before the lesson entry is
    /// created, so a failed start leaves no LessonProgress behind.
    pub fn start_lesson(
        &self,
        learner_id: &str,
        lesson_id: &Value,
    ) -> Result<Progress, ProgressionError> {
        let mut progress = self.get_or_create_progress(learner_id)?;
        let (chain, lesson) = self.ensure_module_chain(&mut progress, lesson_id)?;

        self.check_lesson_prerequisites(&progress, &chain, &lesson)?;

        let lesson_idx = self.ensure_lesson_entry(&mut progress, &chain, &lesson);
        let track_progress = &mut progress.tracks[chain.track_prog_idx];
        track_progress.modules[chain.module_prog_idx].lessons[lesson_idx]
            .advance(lesson_statuses::IN_PROGRESS);
        track_progress.modules[chain.module_prog_idx].advance(gate_statuses::IN_PROGRESS);
        track_progress.advance(gate_statuses::IN_PROGRESS);

        progress.updated_at = current_timestamp();
        self.progress_store.save(&progress)?;
        self.events.emit(ProgressionEvent::LessonStarted {
            learner_id: learner_id.to_string(),
            lesson_id: lesson.id.clone(),
        });
        Ok(progress)
    }

    /// Complete a lesson: ensure the chain, mark the lesson completed, award
    /// XP, queue the next lesson, and propagate module/track completion
    pub fn complete_lesson(
        &self,
        learner_id: &str,
        lesson_id: &Value,
    ) -> Result<CompleteLessonOutcome, ProgressionError> {
        let mut progress = self.get_or_create_progress(learner_id)?;
        let (chain, lesson) = self.ensure_module_chain(&mut progress, lesson_id)?;
        let lesson_idx = self.ensure_lesson_entry(&mut progress, &chain, &lesson);

        {
            let track_progress = &mut progress.tracks[chain.track_prog_idx];
            track_progress.modules[chain.module_prog_idx].lessons[lesson_idx]
                .advance(lesson_statuses::COMPLETED);
            track_progress.modules[chain.module_prog_idx].advance(gate_statuses::IN_PROGRESS);
            track_progress.advance(gate_statuses::IN_PROGRESS);
        }

        let leveled_up = self
            .gamification
            .add_xp(&mut progress, self.config.xp_per_lesson);

        let next_lesson_queued = self.unlock_next_lesson_inner(&mut progress, &chain, &lesson)?;
        let unlock = self.unlock_next_module_inner(&mut progress, &chain)?;

        let mut track_completed = false;
        if unlock.module_completed
            && self.all_modules_completed(&progress.tracks[chain.track_prog_idx], &chain.modules)
        {
            track_completed = progress.tracks[chain.track_prog_idx].advance(gate_statuses::COMPLETED);
            if track_completed {
                self.events.emit(ProgressionEvent::TrackCompleted {
                    learner_id: learner_id.to_string(),
                    track_id: display_ref(&chain.module.track_id),
                });
            }
        }

        progress.updated_at = current_timestamp();
        self.progress_store.save(&progress)?;
        self.events.emit(ProgressionEvent::LessonCompleted {
            learner_id: learner_id.to_string(),
            lesson_id: lesson.id.clone(),
            leveled_up,
        });

        Ok(CompleteLessonOutcome {
            progress,
            leveled_up,
            module_completed: unlock.module_completed,
            track_completed,
            next_lesson_queued,
            next_module_unlocked: unlock.next_module_unlocked,
        })
    }

    /// Resolve Lesson→Module→Track, creating whatever progress records are
    /// missing (implicitly starting the track on first touch), and return the
    /// resolved chain. The aggregate is persisted before returning.
    pub fn ensure_lesson_progress(
        &self,
        learner_id: &str,
        lesson_id: &Value,
    ) -> Result<LessonChain, ProgressionError> {
        let mut progress = self.get_or_create_progress(learner_id)?;
        let (chain, lesson) = self.ensure_module_chain(&mut progress, lesson_id)?;
        let lesson_idx = self.ensure_lesson_entry(&mut progress, &chain, &lesson);

        progress.updated_at = current_timestamp();
        self.progress_store.save(&progress)?;

        Ok(LessonChain {
            progress,
            track_idx: chain.track_prog_idx,
            module_idx: chain.module_prog_idx,
            lesson_idx,
            module: chain.module,
            lesson,
        })
    }

    // =========================================================================
    // Unlock Propagation
    // =========================================================================

    /// Queue the next active lesson of the module as `not_started` if it is
    /// not tracked yet. Returns true when an entry was appended.
    pub fn unlock_next_lesson(
        &self,
        progress: &mut Progress,
        module: &Module,
        current_lesson: &Lesson,
    ) -> Result<bool, ProgressionError> {
        let chain = self.locate_module_chain(progress, module)?;
        self.unlock_next_lesson_inner(progress, &chain, current_lesson)
    }

    /// Complete the module and unlock its successor, provided every tracked
    /// lesson is completed and the module carries no quiz/lab gate
    pub fn unlock_next_module(
        &self,
        progress: &mut Progress,
        module: &Module,
    ) -> Result<ModuleUnlockOutcome, ProgressionError> {
        let chain = self.locate_module_chain(progress, module)?;
        self.unlock_next_module_inner(progress, &chain)
    }

    fn unlock_next_lesson_inner(
        &self,
        progress: &mut Progress,
        chain: &ModuleChain,
        current_lesson: &Lesson,
    ) -> Result<bool, ProgressionError> {
        let lessons = self.catalog.find_active_lessons_by_module(&chain.module)?;
        let next = lessons
            .into_iter()
            .filter(|l| l.order > current_lesson.order)
            .min_by_key(|l| l.order);
        let Some(next) = next else {
            return Ok(false);
        };

        let entries =
            &mut progress.tracks[chain.track_prog_idx].modules[chain.module_prog_idx].lessons;
        if find_lesson_progress(entries, &next).is_some() {
            return Ok(false);
        }
        entries.push(LessonProgress::new(
            Value::String(next.id.clone()),
            lesson_statuses::NOT_STARTED,
        ));
        self.events.emit(ProgressionEvent::NextLessonQueued {
            learner_id: progress.learner_id.clone(),
            lesson_id: next.id,
        });
        Ok(true)
    }

    fn unlock_next_module_inner(
        &self,
        progress: &mut Progress,
        chain: &ModuleChain,
    ) -> Result<ModuleUnlockOutcome, ProgressionError> {
        let mut outcome = ModuleUnlockOutcome::default();

        // Quiz/lab gated modules are completed by their own workflows
        if chain.module.requires_quiz() || chain.module.requires_lab() {
            return Ok(outcome);
        }

        let track_progress = &mut progress.tracks[chain.track_prog_idx];
        if !track_progress.modules[chain.module_prog_idx]
            .lessons
            .iter()
            .all(|l| l.is_completed())
        {
            return Ok(outcome);
        }

        let newly_completed =
            track_progress.modules[chain.module_prog_idx].advance(gate_statuses::COMPLETED);
        outcome.module_completed = track_progress.modules[chain.module_prog_idx].is_completed();
        if newly_completed {
            info!(
                learner = %progress.learner_id,
                module = %chain.module.id,
                "Module completed"
            );
            self.events.emit(ProgressionEvent::ModuleCompleted {
                learner_id: progress.learner_id.clone(),
                module_id: chain.module.id.clone(),
            });
        }

        if let Some(next) = chain.modules.get(chain.position + 1) {
            let wanted = next.build_aliases();
            let existing = track_progress.modules.iter().position(|mp| {
                identifier_aliases(&mp.module_id)
                    .intersection(&wanted)
                    .next()
                    .is_some()
            });
            let unlocked = match existing {
                Some(idx) => track_progress.modules[idx].advance(gate_statuses::UNLOCKED),
                None => {
                    track_progress.modules.push(ModuleProgress::new(
                        Value::String(next.id.clone()),
                        gate_statuses::UNLOCKED,
                    ));
                    true
                }
            };
            if unlocked {
                outcome.next_module_unlocked = Some(next.id.clone());
                self.events.emit(ProgressionEvent::ModuleUnlocked {
                    learner_id: progress.learner_id.clone(),
                    module_id: next.id.clone(),
                });
            }
        }

        Ok(outcome)
    }

    // =========================================================================
    // Matching Helpers
    // =========================================================================

    /// Build the per-operation matching context over the active track catalog
    pub fn prepare_track_matching_context(
        &self,
        progress: &Progress,
    ) -> Result<TrackMatchingContext, ProgressionError> {
        let tracks = self.catalog.find_active_tracks()?;
        let ctx = TrackMatchingContext::prepare(tracks, progress);
        self.guard_collisions(ctx.collisions())?;
        Ok(ctx)
    }

    /// Index of the TrackProgress entry matching an identifier in any
    /// encoding, if the track has been started
    pub fn find_track_progress_by_identifier(
        &self,
        progress: &Progress,
        identifier: &Value,
    ) -> Result<Option<usize>, ProgressionError> {
        let ctx = self.prepare_track_matching_context(progress)?;
        Ok(ctx.resolve_progress(identifier).progress_idx)
    }

    /// Index of the ModuleProgress entry (within the track's entry) matching
    /// an identifier in any encoding
    pub fn find_module_progress_by_identifier(
        &self,
        progress: &Progress,
        track_id: &Value,
        identifier: &Value,
    ) -> Result<Option<usize>, ProgressionError> {
        let ctx = self.prepare_track_matching_context(progress)?;
        let resolution = ctx.resolve_progress(track_id);
        let Some(track_prog_idx) = resolution.progress_idx else {
            return Ok(None);
        };

        let modules = self.load_track_modules(&ctx, resolution.entity_idx, progress, track_prog_idx)?;
        let mctx = ModuleMatchingContext::prepare(modules, &progress.tracks[track_prog_idx]);
        Ok(mctx.find_module_progress(identifier).progress_idx)
    }

    /// Whether every active module of a track has a completed ModuleProgress
    pub fn are_all_track_modules_completed(
        &self,
        progress: &Progress,
        track_id: &Value,
    ) -> Result<bool, ProgressionError> {
        let ctx = self.prepare_track_matching_context(progress)?;
        let resolution = ctx.resolve_progress(track_id);
        if resolution.entity_idx.is_none() {
            return Err(ProgressionError::NotFound(format!(
                "track {}",
                display_ref(track_id)
            )));
        }
        let Some(track_prog_idx) = resolution.progress_idx else {
            return Ok(false);
        };

        let modules = self.load_track_modules(&ctx, resolution.entity_idx, progress, track_prog_idx)?;
        Ok(self.all_modules_completed(&progress.tracks[track_prog_idx], &modules))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn get_or_create_progress(&self, learner_id: &str) -> Result<Progress, ProgressionError> {
        match self.progress_store.find_by_learner(learner_id)? {
            Some(progress) => Ok(progress),
            None => {
                debug!(learner = %learner_id, "Creating progress aggregate on first reference");
                self.progress_store.create(learner_id)
            }
        }
    }

    fn guard_collisions(&self, collisions: &[AliasCollision]) -> Result<(), ProgressionError> {
        for collision in collisions {
            self.events.emit(ProgressionEvent::AliasCollision {
                alias: collision.alias.clone(),
                kept_id: collision.kept.clone(),
                discarded_id: collision.discarded.clone(),
            });
        }
        if self.config.strict_alias_collisions && !collisions.is_empty() {
            return Err(ProgressionError::Conflict(format!(
                "{} alias collision(s) in catalog slice",
                collisions.len()
            )));
        }
        Ok(())
    }

    /// Union of the catalog track's aliases and the stored progress
    /// identifier's aliases - Module.track_id encodings historically differ
    /// from Track.id, so module loading casts the widest net
    fn load_track_modules(
        &self,
        ctx: &TrackMatchingContext,
        track_idx: Option<usize>,
        progress: &Progress,
        track_prog_idx: usize,
    ) -> Result<Vec<Module>, ProgressionError> {
        let mut aliases = match track_idx {
            Some(idx) => ctx.aliases_for_track(idx).clone(),
            None => Default::default(),
        };
        aliases.extend(identifier_aliases(
            &progress.tracks[track_prog_idx].track_id,
        ));
        self.catalog.find_active_modules_by_track_aliases(&aliases)
    }

    fn start_track_inner(
        &self,
        progress: &mut Progress,
        track_id: &Value,
    ) -> Result<String, ProgressionError> {
        let ctx = self.prepare_track_matching_context(progress)?;
        let track_idx = ctx.track_index(track_id).ok_or_else(|| {
            ProgressionError::NotFound(format!("track {}", display_ref(track_id)))
        })?;
        let track = ctx.track(track_idx).clone();

        // Track prerequisites are matched as track identifiers only
        let mut unmet = Vec::new();
        for prereq in &track.prerequisites {
            let resolution = ctx.resolve_progress(prereq);
            let satisfied = resolution
                .progress_idx
                .map(|idx| progress.tracks[idx].is_completed())
                .unwrap_or(false);
            self.events.emit(ProgressionEvent::PrerequisiteResolved {
                learner_id: progress.learner_id.clone(),
                reference: display_ref(prereq),
                interpretation: "track",
                satisfied,
            });
            if !satisfied {
                unmet.push(display_ref(prereq));
            }
        }
        if !unmet.is_empty() {
            return Err(ProgressionError::PrerequisitesNotMet(format!(
                "track {}: {}",
                track.id,
                unmet.join(", ")
            )));
        }

        let track_prog_idx = match ctx.resolve_progress(track_id).progress_idx {
            Some(idx) => idx,
            None => {
                progress
                    .tracks
                    .push(TrackProgress::unlocked(Value::String(track.id.clone())));
                progress.tracks.len() - 1
            }
        };

        let modules = self.load_track_modules(&ctx, Some(track_idx), progress, track_prog_idx)?;
        let mctx = ModuleMatchingContext::prepare(modules, &progress.tracks[track_prog_idx]);
        self.guard_collisions(mctx.collisions())?;

        // Resolve every module's entry first, then mutate
        let resolved: Vec<Option<usize>> = (0..mctx.modules().len())
            .map(|idx| mctx.progress_for_module(idx))
            .collect();

        let track_progress = &mut progress.tracks[track_prog_idx];
        for (position, existing) in resolved.iter().enumerate() {
            match existing {
                Some(module_prog_idx) => {
                    // Self-heal a first module that was created while its
                    // track was in a bad state
                    if position == 0 && track_progress.modules[*module_prog_idx].is_locked() {
                        track_progress.modules[*module_prog_idx].advance(gate_statuses::UNLOCKED);
                        debug!(
                            module = %mctx.modules()[position].id,
                            "Upgraded mis-created first module to unlocked"
                        );
                    }
                }
                None => {
                    let status = if position == 0 {
                        gate_statuses::UNLOCKED
                    } else {
                        gate_statuses::LOCKED
                    };
                    track_progress.modules.push(ModuleProgress::new(
                        Value::String(mctx.modules()[position].id.clone()),
                        status,
                    ));
                }
            }
        }

        track_progress.advance(gate_statuses::IN_PROGRESS);
        info!(learner = %progress.learner_id, track = %track.id, "Track started");
        Ok(track.id)
    }

    /// Resolve Lesson→Module→Track and the module's progress entry, creating
    /// it if needed. Fails `TrackNotStarted` when the track cannot be started
    /// implicitly and `ModuleLocked` when the resolved entry is still locked.
    fn ensure_module_chain(
        &self,
        progress: &mut Progress,
        lesson_id: &Value,
    ) -> Result<(ModuleChain, Lesson), ProgressionError> {
        let lesson = self.catalog.find_lesson_by_id(lesson_id)?.ok_or_else(|| {
            ProgressionError::NotFound(format!("lesson {}", display_ref(lesson_id)))
        })?;
        let module = self
            .catalog
            .find_module_by_id(&lesson.module_id)?
            .ok_or_else(|| {
                ProgressionError::NotFound(format!("module {}", display_ref(&lesson.module_id)))
            })?;

        let mut ctx = self.prepare_track_matching_context(progress)?;
        let mut resolution = ctx.resolve_progress(&module.track_id);
        if resolution.progress_idx.is_none() {
            // Implicit track start on first touch
            debug!(track = %display_ref(&module.track_id), "Implicitly starting track");
            self.start_track_inner(progress, &module.track_id)?;
            ctx = self.prepare_track_matching_context(progress)?;
            resolution = ctx.resolve_progress(&module.track_id);
        }
        let track_prog_idx = resolution.progress_idx.ok_or_else(|| {
            ProgressionError::TrackNotStarted(display_ref(&module.track_id))
        })?;

        let modules =
            self.load_track_modules(&ctx, resolution.entity_idx, progress, track_prog_idx)?;
        let mctx = ModuleMatchingContext::prepare(modules, &progress.tracks[track_prog_idx]);
        self.guard_collisions(mctx.collisions())?;

        let position = mctx
            .modules()
            .iter()
            .position(|m| m.id == module.id)
            .ok_or_else(|| {
                ProgressionError::NotFound(format!("module {} not active in track", module.id))
            })?;

        // Lazy recheck: eligibility is evaluated on every resolution, so an
        // entry created while conditions were unmet heals on next access
        let eligible = position == 0
            || mctx
                .progress_for_module(position - 1)
                .map(|idx| progress.tracks[track_prog_idx].modules[idx].is_completed())
                .unwrap_or(false);

        let module_prog_idx = match mctx.progress_for_module(position) {
            Some(idx) => {
                if eligible {
                    progress.tracks[track_prog_idx].modules[idx].advance(gate_statuses::UNLOCKED);
                }
                idx
            }
            None => {
                let status = if eligible {
                    gate_statuses::UNLOCKED
                } else {
                    gate_statuses::LOCKED
                };
                progress.tracks[track_prog_idx]
                    .modules
                    .push(ModuleProgress::new(
                        Value::String(module.id.clone()),
                        status,
                    ));
                progress.tracks[track_prog_idx].modules.len() - 1
            }
        };

        if progress.tracks[track_prog_idx].modules[module_prog_idx].is_locked() {
            return Err(ProgressionError::ModuleLocked(module.id.clone()));
        }

        Ok((
            ModuleChain {
                track_prog_idx,
                module_prog_idx,
                position,
                modules: mctx.into_modules(),
                module,
            },
            lesson,
        ))
    }

    /// Locate an already-tracked module without creating anything (used by
    /// the standalone unlock operations)
    fn locate_module_chain(
        &self,
        progress: &Progress,
        module: &Module,
    ) -> Result<ModuleChain, ProgressionError> {
        let ctx = self.prepare_track_matching_context(progress)?;
        let resolution = ctx.resolve_progress(&module.track_id);
        let track_prog_idx = resolution.progress_idx.ok_or_else(|| {
            ProgressionError::TrackNotStarted(display_ref(&module.track_id))
        })?;

        let modules =
            self.load_track_modules(&ctx, resolution.entity_idx, progress, track_prog_idx)?;
        let mctx = ModuleMatchingContext::prepare(modules, &progress.tracks[track_prog_idx]);
        let position = mctx
            .modules()
            .iter()
            .position(|m| m.id == module.id)
            .ok_or_else(|| {
                ProgressionError::NotFound(format!("module {} not active in track", module.id))
            })?;
        let module_prog_idx = mctx.progress_for_module(position).ok_or_else(|| {
            ProgressionError::NotFound(format!("module progress for {}", module.id))
        })?;

        Ok(ModuleChain {
            track_prog_idx,
            module_prog_idx,
            position,
            modules: mctx.into_modules(),
            module: module.clone(),
        })
    }

    /// Get-or-create the LessonProgress entry for a lesson; creation sets
    /// `in_progress` (first touch)
    fn ensure_lesson_entry(
        &self,
        progress: &mut Progress,
        chain: &ModuleChain,
        lesson: &Lesson,
    ) -> usize {
        let entries =
            &mut progress.tracks[chain.track_prog_idx].modules[chain.module_prog_idx].lessons;
        match find_lesson_progress(entries, lesson) {
            Some(idx) => idx,
            None => {
                entries.push(LessonProgress::new(
                    Value::String(lesson.id.clone()),
                    lesson_statuses::IN_PROGRESS,
                ));
                entries.len() - 1
            }
        }
    }

    fn all_modules_completed(&self, track_progress: &TrackProgress, modules: &[Module]) -> bool {
        let mctx = ModuleMatchingContext::prepare(modules.to_vec(), track_progress);
        (0..modules.len()).all(|idx| {
            mctx.progress_for_module(idx)
                .map(|p| track_progress.modules[p].is_completed())
                .unwrap_or(false)
        })
    }

    // =========================================================================
    // Prerequisite Pipeline
    // =========================================================================

    fn check_lesson_prerequisites(
        &self,
        progress: &Progress,
        chain: &ModuleChain,
        lesson: &Lesson,
    ) -> Result<(), ProgressionError> {
        if lesson.prerequisites.is_empty() {
            return Ok(());
        }

        let tracks = self.catalog.find_active_tracks()?;
        let ctx = TrackMatchingContext::prepare(tracks, progress);

        let mut unmet = Vec::new();
        for prereq in &lesson.prerequisites {
            let (interpretation, satisfied) =
                self.resolve_prerequisite(progress, &ctx, chain, prereq)?;
            self.events.emit(ProgressionEvent::PrerequisiteResolved {
                learner_id: progress.learner_id.clone(),
                reference: display_ref(prereq),
                interpretation,
                satisfied,
            });
            if !satisfied {
                unmet.push(display_ref(prereq));
            }
        }

        if unmet.is_empty() {
            Ok(())
        } else {
            Err(ProgressionError::PrerequisitesNotMet(format!(
                "lesson {}: {}",
                lesson.id,
                unmet.join(", ")
            )))
        }
    }

    /// Try each interpretation of an untyped reference in the fixed priority
    /// order ([`PREREQUISITE_INTERPRETATIONS`]); the first one that resolves
    /// wins and its target must be completed. An unresolvable reference
    /// counts as unmet.
    fn resolve_prerequisite(
        &self,
        progress: &Progress,
        ctx: &TrackMatchingContext,
        chain: &ModuleChain,
        prereq: &Value,
    ) -> Result<(&'static str, bool), ProgressionError> {
        // (a) track identifier
        let resolution = ctx.resolve_progress(prereq);
        if !resolution.is_empty() {
            let satisfied = resolution
                .progress_idx
                .map(|idx| progress.tracks[idx].is_completed())
                .unwrap_or(false);
            return Ok(("track", satisfied));
        }

        // (b) module primary key, only for id-shaped references
        if let Some(raw) = prereq.as_str() {
            if looks_like_primary_key(raw) {
                if let Some(module) = self.catalog.find_module_by_key(raw)? {
                    return Ok(("module_key", self.module_completed_anywhere(progress, &module)));
                }
            }
        }

        // (c) module code via the track's module alias map
        let wanted = normalize_identifier(prereq);
        if let Some(module) = chain.modules.iter().find(|m| {
            m.build_aliases().intersection(&wanted).next().is_some()
        }) {
            return Ok(("module_code", self.module_completed_anywhere(progress, module)));
        }

        // (d) lesson identifier: scan every tracked lesson list
        for track_progress in &progress.tracks {
            for module_progress in &track_progress.modules {
                if let Some(idx) =
                    find_lesson_progress_by_identifier(&module_progress.lessons, prereq)
                {
                    return Ok(("lesson", module_progress.lessons[idx].is_completed()));
                }
            }
        }

        Ok(("unresolved", false))
    }

    /// Whether any tracked ModuleProgress for this module is completed,
    /// across every track entry of the aggregate
    fn module_completed_anywhere(&self, progress: &Progress, module: &Module) -> bool {
        let wanted = module.build_aliases();
        progress
            .tracks
            .iter()
            .flat_map(|tp| &tp.modules)
            .any(|mp| {
                mp.is_completed()
                    && identifier_aliases(&mp.module_id)
                        .intersection(&wanted)
                        .next()
                        .is_some()
            })
    }
}

/// Human-readable form of a raw reference for errors and events
fn display_ref(value: &Value) -> String {
    value
        .as_str()
        .map(|s| s.to_string())
        .unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryCatalog, MemoryProgressStore, XpLeveling};
    use serde_json::json;

    fn seeded_service() -> (ProgressionService, Arc<MemoryProgressStore>) {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert_track(
            serde_json::from_value(json!({
                "id": "t-0001", "code": "TRK-1", "slug": "rust-foundations",
                "title": "Rust Foundations", "order": 1,
            }))
            .unwrap(),
        );
        catalog.insert_track(
            serde_json::from_value(json!({
                "id": "t-0002", "code": "TRK-2", "title": "Advanced Rust", "order": 2,
                "prerequisites": ["TRK-1"],
            }))
            .unwrap(),
        );
        // Module.track_id stored under the code convention
        catalog.insert_module(
            serde_json::from_value(json!({
                "id": "m-0001", "track_id": "trk_1", "code": "MOD-1.1",
                "title": "Ownership", "order": 1,
            }))
            .unwrap(),
        );
        catalog.insert_module(
            serde_json::from_value(json!({
                "id": "m-0002", "track_id": "t-0001", "code": "MOD-1.2",
                "title": "Borrowing", "order": 2,
            }))
            .unwrap(),
        );
        catalog.insert_lesson(
            serde_json::from_value(json!({
                "id": "l-0001", "module_id": "mod-1.1", "code": "LES-1.1.1",
                "title": "Moves", "order": 1,
            }))
            .unwrap(),
        );
        catalog.insert_lesson(
            serde_json::from_value(json!({
                "id": "l-0002", "module_id": "m-0001", "code": "LES-1.1.2",
                "title": "Clones", "order": 2,
            }))
            .unwrap(),
        );
        catalog.insert_lesson(
            serde_json::from_value(json!({
                "id": "l-0003", "module_id": "m-0002", "code": "LES-1.2.1",
                "title": "Shared Borrows", "order": 1,
            }))
            .unwrap(),
        );

        let store = Arc::new(MemoryProgressStore::new());
        let service = ProgressionService::new(
            catalog,
            store.clone(),
            Arc::new(XpLeveling::default()),
            Arc::new(EventBus::new()),
            ProgressionConfig::default(),
        );
        (service, store)
    }

    #[test]
    fn test_start_track_first_module_invariant() {
        let (service, _) = seeded_service();
        let progress = service.start_track("learner-1", &json!("TRK-1")).unwrap();

        assert_eq!(progress.tracks.len(), 1);
        let tp = &progress.tracks[0];
        assert_eq!(tp.status, gate_statuses::IN_PROGRESS);
        assert_eq!(tp.modules.len(), 2);
        assert_eq!(tp.modules[0].status, gate_statuses::UNLOCKED);
        assert_eq!(tp.modules[1].status, gate_statuses::LOCKED);
    }

    #[test]
    fn test_start_track_unknown_is_not_found() {
        let (service, _) = seeded_service();
        let err = service.start_track("learner-1", &json!("TRK-9")).unwrap_err();
        assert!(matches!(err, ProgressionError::NotFound(_)));
    }

    #[test]
    fn test_start_track_prerequisites_gate() {
        let (service, _) = seeded_service();
        let err = service.start_track("learner-1", &json!("TRK-2")).unwrap_err();
        assert!(matches!(err, ProgressionError::PrerequisitesNotMet(_)));
        // Nothing was persisted for the failed start
        let progress = service.get_or_create_progress("learner-1").unwrap();
        assert!(progress.tracks.is_empty());
    }

    #[test]
    fn test_start_track_self_heals_locked_first_module() {
        let (service, store) = seeded_service();
        // Seed a legacy aggregate whose first module was created locked
        let mut progress = store.create("learner-1").unwrap();
        let mut tp = TrackProgress::unlocked(json!("trk_1"));
        tp.modules
            .push(ModuleProgress::new(json!("MOD-1.1"), gate_statuses::LOCKED));
        progress.tracks.push(tp);
        store.save(&progress).unwrap();

        let progress = service.start_track("learner-1", &json!("t-0001")).unwrap();
        assert_eq!(progress.tracks[0].modules[0].status, gate_statuses::UNLOCKED);
        // The second module was seeded locked alongside
        assert_eq!(progress.tracks[0].modules.len(), 2);
        assert_eq!(progress.tracks[0].modules[1].status, gate_statuses::LOCKED);
    }

    #[test]
    fn test_start_lesson_in_locked_module_fails_without_side_effect() {
        let (service, store) = seeded_service();
        service.start_track("learner-1", &json!("TRK-1")).unwrap();

        let err = service.start_lesson("learner-1", &json!("l-0003")).unwrap_err();
        assert!(matches!(err, ProgressionError::ModuleLocked(_)));

        // The failed attempt must not have persisted a lesson entry
        let progress = store.find_by_learner("learner-1").unwrap().unwrap();
        for tp in &progress.tracks {
            for mp in &tp.modules {
                assert!(mp.lessons.is_empty());
            }
        }
    }

    #[test]
    fn test_ensure_lesson_progress_implicitly_starts_track() {
        let (service, _) = seeded_service();
        let chain = service
            .ensure_lesson_progress("learner-1", &json!("l-0001"))
            .unwrap();

        assert_eq!(chain.lesson.id, "l-0001");
        assert_eq!(chain.module.id, "m-0001");
        let tp = &chain.progress.tracks[chain.track_idx];
        assert_eq!(tp.status, gate_statuses::IN_PROGRESS);
        let lp = &tp.modules[chain.module_idx].lessons[chain.lesson_idx];
        assert_eq!(lp.status, lesson_statuses::IN_PROGRESS);
    }

    #[test]
    fn test_ensure_lesson_progress_is_idempotent() {
        let (service, _) = seeded_service();
        let first = service
            .ensure_lesson_progress("learner-1", &json!("l-0001"))
            .unwrap();
        let second = service
            .ensure_lesson_progress("learner-1", &json!("l-0001"))
            .unwrap();

        assert_eq!(first.lesson_idx, second.lesson_idx);
        let mp = &second.progress.tracks[second.track_idx].modules[second.module_idx];
        assert_eq!(mp.lessons.len(), 1);
    }

    #[test]
    fn test_lesson_resolved_by_legacy_code() {
        let (service, _) = seeded_service();
        // Same lesson addressed by its code in a different convention
        let chain = service
            .ensure_lesson_progress("learner-1", &json!("les_1.1.1"))
            .unwrap();
        assert_eq!(chain.lesson.id, "l-0001");
    }

    #[test]
    fn test_completion_unlocks_next_module() {
        let (service, _) = seeded_service();
        service.start_track("learner-1", &json!("TRK-1")).unwrap();

        let outcome = service.complete_lesson("learner-1", &json!("l-0001")).unwrap();
        assert!(!outcome.module_completed);
        assert!(outcome.next_lesson_queued);

        let outcome = service.complete_lesson("learner-1", &json!("l-0002")).unwrap();
        assert!(outcome.module_completed);
        assert_eq!(outcome.next_module_unlocked.as_deref(), Some("m-0002"));
        assert!(!outcome.track_completed);

        let tp = &outcome.progress.tracks[0];
        assert_eq!(tp.modules[0].status, gate_statuses::COMPLETED);
        assert_eq!(tp.modules[1].status, gate_statuses::UNLOCKED);
    }

    #[test]
    fn test_quiz_gated_module_does_not_auto_complete() {
        let (service, _) = seeded_service();
        // A third track with a quiz-gated module
        let catalog = MemoryCatalog::new();
        catalog.insert_track(
            serde_json::from_value(json!({
                "id": "t-0003", "code": "TRK-3", "title": "Gated", "order": 3,
            }))
            .unwrap(),
        );
        catalog.insert_module(
            serde_json::from_value(json!({
                "id": "m-0031", "track_id": "t-0003", "code": "MOD-3.1",
                "title": "Gated Module", "order": 1, "quiz_id": "quiz-3.1",
            }))
            .unwrap(),
        );
        catalog.insert_lesson(
            serde_json::from_value(json!({
                "id": "l-0031", "module_id": "m-0031", "title": "Only Lesson", "order": 1,
            }))
            .unwrap(),
        );
        let store = Arc::new(MemoryProgressStore::new());
        let service = ProgressionService::new(
            Arc::new(catalog),
            store,
            Arc::new(XpLeveling::default()),
            service.events.clone(),
            ProgressionConfig::default(),
        );

        let outcome = service.complete_lesson("learner-1", &json!("l-0031")).unwrap();
        assert!(!outcome.module_completed);
        let mp = &outcome.progress.tracks[0].modules[0];
        assert_eq!(mp.status, gate_statuses::IN_PROGRESS);
        assert!(mp.lessons[0].is_completed());
    }

    #[test]
    fn test_xp_awarded_on_completion() {
        let (service, _) = seeded_service();
        let outcome = service.complete_lesson("learner-1", &json!("l-0001")).unwrap();
        assert_eq!(outcome.progress.xp, 10);
    }

    #[test]
    fn test_find_helpers_resolve_any_encoding() {
        let (service, _) = seeded_service();
        let progress = service.start_track("learner-1", &json!("TRK-1")).unwrap();

        let tp_idx = service
            .find_track_progress_by_identifier(&progress, &json!("rust-foundations"))
            .unwrap();
        assert_eq!(tp_idx, Some(0));

        let mp_idx = service
            .find_module_progress_by_identifier(&progress, &json!("trk-1"), &json!("module_1.1"))
            .unwrap();
        assert_eq!(mp_idx, Some(0));

        assert!(!service
            .are_all_track_modules_completed(&progress, &json!("TRK-1"))
            .unwrap());
    }
}
