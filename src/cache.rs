//! Cache des timelines résolues (avant swaps), partagé par le processus.
//!
//! Clé : (planning, révision du contenu, fenêtre arrondie au jour, options).
//! Un calcul au plus par clé : les appelants concurrents d'une même clé
//! attendent le premier. Une invalidation n'interrompt pas les lectures en
//! cours, qui peuvent rendre l'ancienne valeur.

use crate::engine::{EngineError, FilterBy, FinalEvent};
use crate::model::ScheduleId;
use crate::source::ContentRevision;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub schedule: ScheduleId,
    pub revision: ContentRevision,
    pub bucket_start: DateTime<Utc>,
    pub bucket_end: DateTime<Utc>,
    pub filter_by: Option<FilterBy>,
    pub with_empty: bool,
    pub with_gap: bool,
}

pub type Timeline = Arc<Vec<FinalEvent>>;
type Slot = Arc<Mutex<Option<Timeline>>>;

pub struct ScheduleCache {
    entries: Option<Mutex<LruCache<CacheKey, Slot>>>,
}

impl std::fmt::Debug for ScheduleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleCache")
            .field("enabled", &self.entries.is_some())
            .field("len", &self.len())
            .finish()
    }
}

impl Default for ScheduleCache {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ScheduleCache {
    /// Capacité 0 : cache désactivé, chaque lecture recalcule.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|c| Mutex::new(LruCache::new(c))),
        }
    }

    pub fn get_or_compute<F>(&self, key: CacheKey, compute: F) -> Result<Timeline, EngineError>
    where
        F: FnOnce() -> Result<Vec<FinalEvent>, EngineError>,
    {
        let Some(entries) = &self.entries else {
            return compute().map(Arc::new);
        };

        let slot = {
            let mut map = entries.lock();
            Arc::clone(map.get_or_insert(key.clone(), || Arc::new(Mutex::new(None))))
        };

        let mut guard = slot.lock();
        if let Some(hit) = guard.as_ref() {
            tracing::debug!(schedule = key.schedule.as_str(), "timeline cache hit");
            return Ok(Arc::clone(hit));
        }
        tracing::debug!(schedule = key.schedule.as_str(), "timeline cache miss");
        let computed = Arc::new(compute()?);
        *guard = Some(Arc::clone(&computed));
        Ok(computed)
    }

    /// Supprime toutes les entrées d'un planning ; renvoie leur nombre.
    pub fn invalidate(&self, schedule: &ScheduleId) -> usize {
        let Some(entries) = &self.entries else {
            return 0;
        };
        let mut map = entries.lock();
        let stale: Vec<CacheKey> = map
            .iter()
            .filter(|(k, _)| &k.schedule == schedule)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            map.pop(key);
        }
        tracing::debug!(schedule = schedule.as_str(), dropped = stale.len(), "cache invalidated");
        stale.len()
    }

    pub fn clear(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
