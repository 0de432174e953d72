//! Cœur d'évaluation : expansion des couches, résolution, swaps, requêtes.

mod context;
mod expand;
mod quality;
mod queries;
mod resolve;
mod swaps;
mod types;
pub(crate) mod util;

pub use context::EvaluationContext;
pub use expand::{expand_overrides, expand_rotation, RotationOccurrences};
pub use quality::{build_report, QualityReport, UserLoad, BALANCE_WEIGHT, GAP_WEIGHT};
pub use queries::{partition_user_shifts, CurrentUserEvents, NextShift, ScheduleEvents};
pub use resolve::{collect_occurrences, resolve_definition};
pub use swaps::apply_swaps;
pub use types::{
    EngineError, EventUser, FilterBy, FinalEvent, GapCheck, LayerKind, ResolveOptions,
    ShiftOccurrence, SourceRef, SwapMark, UserShifts,
};
pub use util::QueryWindow;

use crate::cache::{CacheKey, ScheduleCache};
use crate::config::EngineConfig;
use crate::model::{Person, ScheduleDefinition, ScheduleId, ShiftSwapRequest, UserId};
use crate::provider::{ScheduleSourceProvider, SwapProvider, UserDirectory};
use crate::source::ScheduleSource;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type SharedSources = Arc<dyn ScheduleSourceProvider + Send + Sync>;
pub type SharedUsers = Arc<dyn UserDirectory + Send + Sync>;
pub type SharedSwaps = Arc<dyn SwapProvider + Send + Sync>;

/// Moteur d'évaluation : relie les collaborateurs, le cache et la config.
pub struct Engine {
    sources: SharedSources,
    users: SharedUsers,
    swaps: SharedSwaps,
    cache: Arc<ScheduleCache>,
    config: EngineConfig,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Un seul objet joue les trois rôles (cas du `Workspace`).
    pub fn new<P>(provider: Arc<P>) -> Self
    where
        P: ScheduleSourceProvider + UserDirectory + SwapProvider + Send + Sync + 'static,
    {
        Self::from_parts(provider.clone(), provider.clone(), provider)
    }

    pub fn from_parts(sources: SharedSources, users: SharedUsers, swaps: SharedSwaps) -> Self {
        let config = EngineConfig::default();
        Self {
            sources,
            users,
            swaps,
            cache: Arc::new(ScheduleCache::new(config.cache_capacity)),
            config,
        }
    }

    /// Remplace la configuration ; le cache est recréé à la nouvelle capacité.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.cache = Arc::new(ScheduleCache::new(config.cache_capacity));
        self.config = config;
        self
    }

    /// Partage un cache existant (typiquement celui du processus).
    pub fn with_cache(mut self, cache: Arc<ScheduleCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ScheduleCache {
        &self.cache
    }

    fn source(&self, schedule: &ScheduleId) -> Result<ScheduleSource, EngineError> {
        self.sources
            .get_raw_layers(schedule)?
            .ok_or_else(|| EngineError::UnknownSchedule(schedule.to_string()))
    }

    pub fn definition(&self, schedule: &ScheduleId) -> Result<ScheduleDefinition, EngineError> {
        self.source(schedule)?.definition()
    }

    /// Timeline résolue (avant swaps) de `schedule` sur [start, end).
    pub fn resolve(
        &self,
        schedule: &ScheduleId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        opts: ResolveOptions,
    ) -> Result<Vec<FinalEvent>, EngineError> {
        util::validate_window(start, end, &self.config)?;
        let source = self.source(schedule)?;
        self.resolve_source(&source, start, end, opts)
    }

    fn resolve_source(
        &self,
        source: &ScheduleSource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        opts: ResolveOptions,
    ) -> Result<Vec<FinalEvent>, EngineError> {
        let (bucket_start, bucket_end) = util::day_bucket(start, end);
        let key = CacheKey {
            schedule: source.id.clone(),
            revision: source.content_revision()?,
            bucket_start,
            bucket_end,
            filter_by: opts.filter_by,
            with_empty: opts.with_empty,
            with_gap: opts.with_gap,
        };
        let timeline = self.cache.get_or_compute(key, || {
            let def = source.definition()?;
            resolve_definition(&def, bucket_start, bucket_end, opts, self.users.as_ref())
        })?;

        let mut events = util::clip_events(&timeline, start, end);
        if !opts.include_shift_info {
            events.iter_mut().for_each(FinalEvent::strip_shift_info);
        }
        Ok(events)
    }

    fn overlay(
        &self,
        schedule: &ScheduleId,
        events: Vec<FinalEvent>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FinalEvent>, EngineError> {
        let swaps = self.swaps.get_approved_swaps(schedule, start, end)?;
        Ok(apply_swaps(events, &swaps, self.users.as_ref()))
    }

    /// Timeline finale complète (trous et créneaux vides inclus), swaps appliqués.
    pub fn final_events(
        &self,
        schedule: &ScheduleId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        include_shift_info: bool,
    ) -> Result<Vec<FinalEvent>, EngineError> {
        let events = self.resolve(
            schedule,
            start,
            end,
            ResolveOptions::final_events(include_shift_info),
        )?;
        self.overlay(schedule, events, start, end)
    }

    fn ensure_user(&self, user: &UserId) -> Result<Person, EngineError> {
        self.users
            .resolve_participant(user)
            .ok_or_else(|| EngineError::UnknownUser(user.to_string()))
    }

    /// Gardes passées / en cours / à venir de `user` sur
    /// [now - lookback, now + days).
    pub fn current_and_next_shifts(
        &self,
        schedule: &ScheduleId,
        user: &UserId,
        now: DateTime<Utc>,
        days: u32,
    ) -> Result<UserShifts, EngineError> {
        self.ensure_user(user)?;
        let start = util::sub_hours(now, self.config.lookback_hours)?;
        let end = util::add_days(now, days)?;
        let events = self.final_events(schedule, start, end, true)?;
        Ok(partition_user_shifts(&events, user, now))
    }

    pub fn quality_report(
        &self,
        schedule: &ScheduleId,
        start: DateTime<Utc>,
        days: Option<u32>,
    ) -> Result<QualityReport, EngineError> {
        let days = days.unwrap_or(self.config.quality_days);
        let end = util::add_days(start, days)?;
        util::validate_window(start, end, &self.config)?;
        let source = self.source(schedule)?;
        let participants = source.definition()?.participants();
        let events = self.resolve_source(&source, start, end, ResolveOptions::final_events(false))?;
        let events = self.overlay(schedule, events, start, end)?;
        Ok(build_report(&events, start, end, &participants))
    }

    /// Participants des rotations, lus sur la configuration (sans expansion).
    pub fn related_users(&self, schedule: &ScheduleId) -> Result<Vec<Person>, EngineError> {
        let def = self.definition(schedule)?;
        let mut out = Vec::new();
        for id in def.participants() {
            match self.users.resolve_participant(&id) {
                Some(person) => out.push(person),
                None => tracing::warn!(
                    schedule = schedule.as_str(),
                    user = id.as_str(),
                    "unknown rotation participant"
                ),
            }
        }
        Ok(out)
    }

    /// Oublie les timelines en cache du planning.
    pub fn invalidate(&self, schedule: &ScheduleId) -> usize {
        self.cache.invalidate(schedule)
    }

    /// Première garde à venir (ou en cours) de chaque participant.
    pub fn next_shifts_per_user(
        &self,
        schedule: &ScheduleId,
        now: DateTime<Utc>,
        days: Option<u32>,
    ) -> Result<BTreeMap<UserId, NextShift>, EngineError> {
        let days = days.unwrap_or(self.config.next_shifts_days);
        let start = util::sub_hours(now, self.config.lookback_hours)?;
        let end = util::add_days(now, days)?;
        let events = self.final_events(schedule, start, end, true)?;

        let mut out = BTreeMap::new();
        for person in self.related_users(schedule)? {
            let next = events
                .iter()
                .find(|e| e.end > now && e.is_assigned_to(&person.id));
            if let Some(event) = next {
                out.insert(
                    person.id.clone(),
                    NextShift {
                        event: event.clone(),
                        user_timezone: person.timezone,
                    },
                );
            }
        }
        Ok(out)
    }

    /// Demandes d'échange (non supprimées) intersectant la fenêtre.
    pub fn filter_shift_swaps(
        &self,
        schedule: &ScheduleId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ShiftSwapRequest>, EngineError> {
        util::validate_window(start, end, &self.config)?;
        self.source(schedule)?;
        let mut swaps = self.swaps.get_swap_requests(schedule, start, end)?;
        swaps.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(swaps)
    }

    /// Gardes de `user` sur plusieurs plannings, plus son statut d'astreinte à `now`.
    pub fn current_user_events(
        &self,
        user: &UserId,
        schedules: &[ScheduleId],
        start: DateTime<Utc>,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<CurrentUserEvents, EngineError> {
        self.ensure_user(user)?;
        let end = util::add_days(start, days)?;
        util::validate_window(start, end, &self.config)?;

        let mut out = CurrentUserEvents::default();
        for schedule in schedules {
            let source = self.source(schedule)?;
            let events =
                self.resolve_source(&source, start, end, ResolveOptions::final_events(true))?;
            let events = self
                .overlay(schedule, events, start, end)?
                .into_iter()
                .filter(|e| e.is_assigned_to(user))
                .collect();
            out.schedules.push(ScheduleEvents {
                id: source.id.clone(),
                name: source.name.clone(),
                events,
            });
        }
        out.is_oncall = self.user_is_oncall(user, schedules, now)?;
        Ok(out)
    }

    pub fn check_gaps_and_empty_shifts(
        &self,
        schedule: &ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<GapCheck, EngineError> {
        let end = util::add_days(now, self.config.gap_check_days)?;
        let events = self.resolve(schedule, now, end, ResolveOptions::final_events(false))?;
        Ok(GapCheck {
            has_gaps: events.iter().any(|e| e.is_gap),
            has_empty_shifts: events.iter().any(|e| e.is_empty),
        })
    }

    /// Rechargement forcé d'un planning : invalidation puis contrôle de couverture.
    pub fn reload(&self, schedule: &ScheduleId, now: DateTime<Utc>) -> Result<GapCheck, EngineError> {
        let dropped = self.invalidate(schedule);
        tracing::debug!(schedule = schedule.as_str(), dropped, "schedule reloaded");
        self.check_gaps_and_empty_shifts(schedule, now)
    }

    /// Utilisateurs d'astreinte à l'instant `at`, par planning.
    pub fn oncall_users(
        &self,
        schedules: &[ScheduleId],
        at: DateTime<Utc>,
    ) -> Result<BTreeMap<ScheduleId, Vec<Person>>, EngineError> {
        let mut out = BTreeMap::new();
        for schedule in schedules {
            let end = at
                .checked_add_signed(Duration::minutes(1))
                .ok_or_else(|| EngineError::InvalidTimeWindow("window out of range".to_string()))?;
            let events = self.final_events(schedule, at, end, false)?;
            let people: Vec<Person> = events
                .iter()
                .find(|e| e.covers(at))
                .map(|e| {
                    e.users
                        .iter()
                        .map(|u| {
                            self.users
                                .resolve_participant(&u.id)
                                .unwrap_or_else(|| Person::new(u.id.as_str(), u.display_name.clone()))
                        })
                        .collect()
                })
                .unwrap_or_default();
            out.insert(schedule.clone(), people);
        }
        Ok(out)
    }

    pub fn user_is_oncall(
        &self,
        user: &UserId,
        schedules: &[ScheduleId],
        at: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        self.context(schedules.to_vec(), at).user_is_oncall(user)
    }

    pub fn context(&self, schedules: Vec<ScheduleId>, at: DateTime<Utc>) -> EvaluationContext<'_> {
        EvaluationContext::new(self, schedules, at)
    }
}
