use crate::engine::EngineError;
use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifiant fort pour un utilisateur (référence de participant).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new<S: AsRef<str>>(s: S) -> Self {
        Self(s.as_ref().to_owned())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Personne connue de l'annuaire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: UserId,
    pub display_name: String,
    #[serde(default = "default_tz")]
    pub timezone: Tz,
}

impl Person {
    pub fn new<I: AsRef<str>, D: Into<String>>(id: I, display_name: D) -> Self {
        Self {
            id: UserId::new(id),
            display_name: display_name.into(),
            timezone: Tz::UTC,
        }
    }

    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.timezone = tz;
        self
    }
}

/// Identifiant fort pour un planning.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScheduleId(String);

impl ScheduleId {
    pub fn new<S: AsRef<str>>(s: S) -> Self {
        Self(s.as_ref().to_owned())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifiant fort pour un créneau source (occurrence de rotation ou override).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShiftId(String);

impl ShiftId {
    pub fn new<S: AsRef<str>>(s: S) -> Self {
        Self(s.as_ref().to_owned())
    }
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Pas de récurrence d'une rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

/// Fenêtre de restriction (heure murale du fuseau de la rotation).
///
/// `end_time <= start_time` signifie une fenêtre de nuit qui se termine le
/// lendemain ; le jour de semaine s'applique au jour de début.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictionWindow {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weekdays: Vec<Weekday>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Couche de rotation : règle de récurrence + liste de participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationLayer {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Plus la valeur est haute, plus la couche est prioritaire.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_tz")]
    pub timezone: Tz,
    /// Début de la première occurrence, en heure locale de `timezone`.
    pub start: NaiveDateTime,
    pub frequency: Frequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Durée murale d'une occurrence.
    pub duration_minutes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by_day: Vec<Weekday>,
    #[serde(default)]
    pub participants: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restrictions: Vec<RestrictionWindow>,
}

/// Affectation ponctuelle à horaire exact (intervalle UTC [start, end)).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideShift {
    pub id: ShiftId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub user: Option<UserId>,
}

impl OverrideShift {
    /// Crée un override en validant que `end > start`.
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        user: Option<UserId>,
    ) -> Result<Self, EngineError> {
        if end <= start {
            return Err(EngineError::InvalidTimeWindow(
                "override end must be after start".to_string(),
            ));
        }
        Ok(Self {
            id: ShiftId::random(),
            start,
            end,
            user,
        })
    }
}

/// Couche d'overrides (unique par planning, éventuellement vide).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OverrideLayer {
    #[serde(default)]
    pub shifts: Vec<OverrideShift>,
}

/// Planning normalisé : rotations ordonnées + une couche d'overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub id: ScheduleId,
    pub name: String,
    #[serde(default)]
    pub rotations: Vec<RotationLayer>,
    #[serde(default)]
    pub overrides: OverrideLayer,
}

impl ScheduleDefinition {
    /// Participants distincts des rotations, dans l'ordre de première apparition.
    pub fn participants(&self) -> Vec<UserId> {
        let mut out: Vec<UserId> = Vec::new();
        for user in self.rotations.iter().flat_map(|r| &r.participants) {
            if !out.contains(user) {
                out.push(user.clone());
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapStatus {
    Pending,
    Approved,
    Rejected,
    Deleted,
}

/// Demande d'échange : `benefactor` cède sa garde sur [swap_start, swap_end).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftSwapRequest {
    pub id: String,
    pub schedule: ScheduleId,
    pub benefactor: UserId,
    #[serde(default)]
    pub beneficiary: Option<UserId>,
    pub swap_start: DateTime<Utc>,
    pub swap_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: SwapStatus,
}

impl ShiftSwapRequest {
    pub fn new(
        schedule: ScheduleId,
        benefactor: UserId,
        swap_start: DateTime<Utc>,
        swap_end: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        if swap_end <= swap_start {
            return Err(EngineError::SwapInvalid("swap end must be after start"));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            schedule,
            benefactor,
            beneficiary: None,
            swap_start,
            swap_end,
            created_at,
            status: SwapStatus::Pending,
        })
    }

    /// Un bénéficiaire accepte la demande : pending -> approved.
    pub fn take(&mut self, beneficiary: UserId, at: DateTime<Utc>) -> Result<(), EngineError> {
        if self.status != SwapStatus::Pending {
            return Err(EngineError::SwapInvalid("only pending swap requests can be taken"));
        }
        if beneficiary == self.benefactor {
            return Err(EngineError::SwapInvalid("beneficiary must differ from benefactor"));
        }
        if at >= self.swap_start {
            return Err(EngineError::SwapInvalid("swap request already started"));
        }
        self.beneficiary = Some(beneficiary);
        self.status = SwapStatus::Approved;
        Ok(())
    }

    pub fn is_approved(&self) -> bool {
        self.status == SwapStatus::Approved && self.beneficiary.is_some()
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.is_approved() && self.swap_start <= now && now < self.swap_end
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.swap_end <= now
    }

    pub fn intersects(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.swap_start < end && start < self.swap_end
    }
}

fn default_tz() -> Tz {
    Tz::UTC
}

fn default_interval() -> u32 {
    1
}
