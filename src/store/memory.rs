//! In-memory reference stores
//!
//! Backing stores for tests and embedded use. Interior mutability mirrors
//! the single-writer model: one mutex around the whole data set.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use serde_json::Value;

use super::{CatalogStore, Gamification, ProgressStore};
use crate::catalog::{Lesson, Module, Track};
use crate::error::ProgressionError;
use crate::matching::{identifier_aliases, lesson_aliases, normalize_identifier, Aliasable};
use crate::progress::Progress;

#[derive(Default)]
struct CatalogData {
    tracks: Vec<Track>,
    modules: Vec<Module>,
    lessons: Vec<Lesson>,
}

/// In-memory catalog
#[derive(Default)]
pub struct MemoryCatalog {
    inner: Mutex<CatalogData>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_track(&self, track: Track) {
        self.lock_unpoisoned().tracks.push(track);
    }

    pub fn insert_module(&self, module: Module) {
        self.lock_unpoisoned().modules.push(module);
    }

    pub fn insert_lesson(&self, lesson: Lesson) {
        self.lock_unpoisoned().lessons.push(lesson);
    }

    fn lock_unpoisoned(&self) -> std::sync::MutexGuard<'_, CatalogData> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CatalogData>, ProgressionError> {
        self.inner
            .lock()
            .map_err(|e| ProgressionError::Storage(format!("Lock poisoned: {}", e)))
    }
}

fn intersects(a: &BTreeSet<String>, b: &BTreeSet<String>) -> bool {
    a.intersection(b).next().is_some()
}

impl CatalogStore for MemoryCatalog {
    fn find_active_tracks(&self) -> Result<Vec<Track>, ProgressionError> {
        let data = self.lock()?;
        let mut tracks: Vec<Track> = data.tracks.iter().filter(|t| t.active).cloned().collect();
        tracks.sort_by_key(|t| t.order);
        Ok(tracks)
    }

    fn find_active_modules_by_track_aliases(
        &self,
        aliases: &BTreeSet<String>,
    ) -> Result<Vec<Module>, ProgressionError> {
        let data = self.lock()?;
        let mut modules: Vec<Module> = data
            .modules
            .iter()
            .filter(|m| m.active && intersects(&normalize_identifier(&m.track_id), aliases))
            .cloned()
            .collect();
        modules.sort_by_key(|m| m.order);
        Ok(modules)
    }

    fn find_active_lessons_by_module(
        &self,
        module: &Module,
    ) -> Result<Vec<Lesson>, ProgressionError> {
        let wanted = module.build_aliases();
        let data = self.lock()?;
        let mut lessons: Vec<Lesson> = data
            .lessons
            .iter()
            .filter(|l| l.active && intersects(&normalize_identifier(&l.module_id), &wanted))
            .cloned()
            .collect();
        lessons.sort_by_key(|l| l.order);
        Ok(lessons)
    }

    fn find_lesson_by_id(&self, identifier: &Value) -> Result<Option<Lesson>, ProgressionError> {
        let data = self.lock()?;
        if let Some(key) = identifier.as_str() {
            if let Some(lesson) = data.lessons.iter().find(|l| l.id == key) {
                return Ok(Some(lesson.clone()));
            }
        }
        let wanted = identifier_aliases(identifier);
        Ok(data
            .lessons
            .iter()
            .find(|l| intersects(&lesson_aliases(l), &wanted))
            .cloned())
    }

    fn find_module_by_id(&self, identifier: &Value) -> Result<Option<Module>, ProgressionError> {
        let data = self.lock()?;
        if let Some(key) = identifier.as_str() {
            if let Some(module) = data.modules.iter().find(|m| m.id == key) {
                return Ok(Some(module.clone()));
            }
        }
        let wanted = identifier_aliases(identifier);
        Ok(data
            .modules
            .iter()
            .find(|m| intersects(&m.build_aliases(), &wanted))
            .cloned())
    }

    fn find_module_by_key(&self, key: &str) -> Result<Option<Module>, ProgressionError> {
        let data = self.lock()?;
        Ok(data.modules.iter().find(|m| m.id == key).cloned())
    }
}

/// In-memory progress store keyed by learner id
#[derive(Default)]
pub struct MemoryProgressStore {
    inner: Mutex<HashMap<String, Progress>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Progress>>, ProgressionError> {
        self.inner
            .lock()
            .map_err(|e| ProgressionError::Storage(format!("Lock poisoned: {}", e)))
    }
}

impl ProgressStore for MemoryProgressStore {
    fn find_by_learner(&self, learner_id: &str) -> Result<Option<Progress>, ProgressionError> {
        Ok(self.lock()?.get(learner_id).cloned())
    }

    fn create(&self, learner_id: &str) -> Result<Progress, ProgressionError> {
        let progress = Progress::new(learner_id);
        self.lock()?.insert(learner_id.to_string(), progress.clone());
        Ok(progress)
    }

    fn save(&self, progress: &Progress) -> Result<(), ProgressionError> {
        self.lock()?
            .insert(progress.learner_id.clone(), progress.clone());
        Ok(())
    }
}

/// Threshold-based leveling: one level per `xp_per_level` points
pub struct XpLeveling {
    pub xp_per_level: i64,
}

impl Default for XpLeveling {
    fn default() -> Self {
        Self { xp_per_level: 100 }
    }
}

impl Gamification for XpLeveling {
    fn add_xp(&self, progress: &mut Progress, points: u32) -> bool {
        progress.xp += points as i64;
        let level = (progress.xp / self.xp_per_level.max(1)) as i32;
        let leveled_up = level > progress.level;
        if leveled_up {
            progress.level = level;
        }
        leveled_up
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded_catalog() -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        catalog.insert_track(
            serde_json::from_value(json!({
                "id": "t-0001", "code": "TRK-1", "title": "Rust Foundations", "order": 1,
            }))
            .unwrap(),
        );
        // track_id stored under the code convention, not the key
        catalog.insert_module(
            serde_json::from_value(json!({
                "id": "m-0001", "track_id": "trk_1", "code": "MOD-1.1",
                "title": "Ownership", "order": 1,
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
        catalog
    }

    #[test]
    fn test_modules_found_through_track_alias_union() {
        let catalog = seeded_catalog();
        let tracks = catalog.find_active_tracks().unwrap();
        let aliases = tracks[0].build_aliases();

        let modules = catalog.find_active_modules_by_track_aliases(&aliases).unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].id, "m-0001");
    }

    #[test]
    fn test_lessons_found_through_module_aliases() {
        let catalog = seeded_catalog();
        let module = catalog.find_module_by_key("m-0001").unwrap().unwrap();
        let lessons = catalog.find_active_lessons_by_module(&module).unwrap();
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0].id, "l-0001");
    }

    #[test]
    fn test_lesson_lookup_falls_back_to_aliases() {
        let catalog = seeded_catalog();
        let direct = catalog.find_lesson_by_id(&json!("l-0001")).unwrap();
        assert!(direct.is_some());
        let by_code = catalog.find_lesson_by_id(&json!("les_1.1.1")).unwrap();
        assert!(by_code.is_some());
        let missing = catalog.find_lesson_by_id(&json!("l-9999")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_progress_store_round_trip() {
        let store = MemoryProgressStore::new();
        assert!(store.find_by_learner("learner-1").unwrap().is_none());

        let mut progress = store.create("learner-1").unwrap();
        progress.xp = 50;
        store.save(&progress).unwrap();

        let loaded = store.find_by_learner("learner-1").unwrap().unwrap();
        assert_eq!(loaded.xp, 50);
        assert_eq!(loaded.id, progress.id);
    }

    #[test]
    fn test_xp_leveling() {
        let leveling = XpLeveling { xp_per_level: 100 };
        let mut progress = Progress::new("learner-1");

        assert!(!leveling.add_xp(&mut progress, 50));
        assert!(leveling.add_xp(&mut progress, 60));
        assert_eq!(progress.level, 1);
        assert_eq!(progress.xp, 110);
    }
}
