use crate::model::{Person, ShiftId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid recurrence in layer {layer}: {reason}")]
    InvalidRecurrence { layer: String, reason: &'static str },
    #[error("invalid time window: {0}")]
    InvalidTimeWindow(String),
    #[error("invalid schedule source: {0}")]
    InvalidSource(String),
    #[error("invalid type value: {0}")]
    InvalidFilter(String),
    #[error("unknown schedule: {0}")]
    UnknownSchedule(String),
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("invalid swap request: {0}")]
    SwapInvalid(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Classe de couches à évaluer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterBy {
    Rotation,
    Override,
    Final,
}

impl FromStr for FilterBy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rotation" => Ok(Self::Rotation),
            "override" => Ok(Self::Override),
            "final" => Ok(Self::Final),
            other => Err(EngineError::InvalidFilter(other.to_string())),
        }
    }
}

/// Options de résolution (`filter_events`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ResolveOptions {
    pub filter_by: Option<FilterBy>,
    pub with_empty: bool,
    pub with_gap: bool,
    pub include_shift_info: bool,
}

impl ResolveOptions {
    /// Options utilisées par `final_events`.
    pub fn final_events(include_shift_info: bool) -> Self {
        Self {
            filter_by: Some(FilterBy::Final),
            with_empty: true,
            with_gap: true,
            include_shift_info,
        }
    }

    pub(crate) fn includes_rotations(&self) -> bool {
        !matches!(self.filter_by, Some(FilterBy::Override))
    }

    pub(crate) fn includes_overrides(&self) -> bool {
        !matches!(self.filter_by, Some(FilterBy::Rotation))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Rotation,
    Override,
}

/// Provenance d'une occurrence : couche, priorité, rang de déclaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub kind: LayerKind,
    pub layer_id: String,
    pub priority: i32,
    pub order: usize,
}

/// Occurrence concrète d'une couche, intervalle UTC [start, end).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftOccurrence {
    pub shift_id: ShiftId,
    pub source: SourceRef,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub user: Option<UserId>,
    /// Rang de l'occurrence depuis le début de la règle.
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUser {
    pub id: UserId,
    pub display_name: String,
}

impl From<&Person> for EventUser {
    fn from(p: &Person) -> Self {
        Self {
            id: p.id.clone(),
            display_name: p.display_name.clone(),
        }
    }
}

/// Trace d'un swap appliqué sur un événement final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapMark {
    pub swap_id: String,
    pub benefactor: UserId,
}

/// Unité de la timeline résolue : au plus un utilisateur effectif.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalEvent {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub users: Vec<EventUser>,
    pub is_gap: bool,
    #[serde(default)]
    pub is_empty: bool,
    #[serde(default)]
    pub is_override: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default)]
    pub source_shift_ids: Vec<ShiftId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap: Option<SwapMark>,
}

impl FinalEvent {
    pub fn gap(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            users: Vec::new(),
            is_gap: true,
            is_empty: false,
            is_override: false,
            priority: None,
            source_shift_ids: Vec::new(),
            swap: None,
        }
    }

    pub fn user(&self) -> Option<&EventUser> {
        self.users.first()
    }

    pub fn is_assigned_to(&self, user: &UserId) -> bool {
        self.user().is_some_and(|u| &u.id == user)
    }

    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }

    pub(crate) fn strip_shift_info(&mut self) {
        self.priority = None;
        self.source_shift_ids.clear();
    }
}

/// Partition des gardes d'un utilisateur autour de `now`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserShifts {
    pub passed: Vec<FinalEvent>,
    pub current: Option<FinalEvent>,
    pub upcoming: Vec<FinalEvent>,
}

impl UserShifts {
    pub fn is_empty(&self) -> bool {
        self.passed.is_empty() && self.current.is_none() && self.upcoming.is_empty()
    }

    pub fn all(&self) -> Vec<FinalEvent> {
        self.passed
            .iter()
            .chain(self.current.iter())
            .chain(self.upcoming.iter())
            .cloned()
            .collect()
    }
}

/// Résultat de `check_gaps_and_empty_shifts`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GapCheck {
    pub has_gaps: bool,
    pub has_empty_shifts: bool,
}
