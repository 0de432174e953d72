use super::types::{FinalEvent, UserShifts};
use crate::model::{ScheduleId, UserId};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// Prochaine garde d'un utilisateur, avec son fuseau pour l'affichage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextShift {
    #[serde(flatten)]
    pub event: FinalEvent,
    pub user_timezone: Tz,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleEvents {
    pub id: ScheduleId,
    pub name: String,
    pub events: Vec<FinalEvent>,
}

/// Gardes d'un utilisateur sur plusieurs plannings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CurrentUserEvents {
    pub schedules: Vec<ScheduleEvents>,
    pub is_oncall: bool,
}

/// Répartit les gardes de `user` en passées / en cours / à venir.
pub fn partition_user_shifts(events: &[FinalEvent], user: &UserId, now: DateTime<Utc>) -> UserShifts {
    let mut out = UserShifts::default();
    for event in events.iter().filter(|e| e.is_assigned_to(user)) {
        if event.end <= now {
            out.passed.push(event.clone());
        } else if event.start > now {
            out.upcoming.push(event.clone());
        } else if out.current.is_none() {
            out.current = Some(event.clone());
        } else {
            // ne devrait pas arriver : la timeline résolue ne se chevauche pas
            tracing::warn!(user = user.as_str(), "user double-booked at the same instant");
            out.upcoming.push(event.clone());
        }
    }
    out
}
