use super::types::{EngineError, FinalEvent};
use crate::config::EngineConfig;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

pub(crate) fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Convertit une heure murale en instant UTC.
///
/// Heure ambiguë (recul d'heure) : la plus tôt. Heure inexistante (avance
/// d'heure) : premier quart d'heure valide qui suit. Une occurrence horaire
/// entièrement dans l'heure sautée se réduit donc à rien et n'est pas émise,
/// son rang de rotation restant consommé.
pub(crate) fn localize(tz: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    if let Some(t) = tz.from_local_datetime(&naive).earliest() {
        return t.with_timezone(&Utc);
    }
    let mut probe = naive;
    for _ in 0..16 {
        let Some(next) = probe.checked_add_signed(Duration::minutes(15)) else {
            break;
        };
        probe = next;
        if let Some(t) = tz.from_local_datetime(&probe).earliest() {
            return t.with_timezone(&Utc);
        }
    }
    Utc.from_utc_datetime(&naive)
}

fn out_of_range() -> EngineError {
    EngineError::InvalidTimeWindow("window out of range".to_string())
}

/// `at + days` jours ; un débordement est une fenêtre invalide.
pub(crate) fn add_days(at: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>, EngineError> {
    at.checked_add_signed(Duration::days(i64::from(days)))
        .ok_or_else(out_of_range)
}

/// `at - hours` heures ; un débordement est une fenêtre invalide.
pub(crate) fn sub_hours(at: DateTime<Utc>, hours: i64) -> Result<DateTime<Utc>, EngineError> {
    Duration::try_hours(hours)
        .and_then(|d| at.checked_sub_signed(d))
        .ok_or_else(out_of_range)
}

pub(crate) fn validate_window(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    config: &EngineConfig,
) -> Result<(), EngineError> {
    if end <= start {
        return Err(EngineError::InvalidTimeWindow(
            "end must be after start".to_string(),
        ));
    }
    let too_long = Duration::try_days(config.max_window_days).is_some_and(|max| end - start > max);
    if too_long {
        return Err(EngineError::InvalidTimeWindow(format!(
            "window exceeds {} days",
            config.max_window_days
        )));
    }
    Ok(())
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Élargit une fenêtre aux jours UTC entiers qui la contiennent.
pub(crate) fn day_bucket(start: DateTime<Utc>, end: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let bucket_start = midnight(start.date_naive());
    let floor_end = midnight(end.date_naive());
    let bucket_end = if floor_end == end {
        end
    } else {
        floor_end + Duration::days(1)
    };
    (bucket_start, bucket_end)
}

/// Restreint une timeline à [start, end) en rognant les bords.
pub(crate) fn clip_events(
    events: &[FinalEvent],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<FinalEvent> {
    events
        .iter()
        .filter(|e| overlaps(e.start, e.end, start, end))
        .map(|e| {
            let mut e = e.clone();
            e.start = e.start.max(start);
            e.end = e.end.min(end);
            e
        })
        .collect()
}

/// Fenêtre de requête [start, end).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl QueryWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, EngineError> {
        if end <= start {
            return Err(EngineError::InvalidTimeWindow(
                "end must be after start".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    /// `days` jours à partir du minuit local de `date` dans `tz`.
    pub fn local_days(date: NaiveDate, tz: Tz, days: u32) -> Result<Self, EngineError> {
        if days == 0 {
            return Err(EngineError::InvalidTimeWindow(
                "days must be >= 1".to_string(),
            ));
        }
        let start = localize(tz, date.and_time(chrono::NaiveTime::MIN));
        Self::new(start, add_days(start, days)?)
    }
}
