//! Expansion des couches en occurrences concrètes sur une fenêtre.
//!
//! Toute l'arithmétique se fait en heure murale du fuseau de la rotation
//! (une garde de 24 h dure 23 h réelles le jour du passage à l'heure d'été),
//! puis les bornes sont converties en UTC.

use super::types::{EngineError, LayerKind, ShiftOccurrence, SourceRef};
use super::util;
use crate::model::{Frequency, OverrideLayer, RotationLayer, ShiftId};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, Utc};
use std::collections::VecDeque;

/// Itérateur paresseux, borné par la fenêtre, des occurrences d'une rotation.
#[derive(Debug)]
pub struct RotationOccurrences<'a> {
    layer: &'a RotationLayer,
    source: SourceRef,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    duration: Duration,
    step: u64,
    index: u64,
    pending: VecDeque<ShiftOccurrence>,
    done: bool,
}

/// Expanse une rotation sur `[window_start, window_end)`.
///
/// `order` est le rang de déclaration de la couche dans le planning.
pub fn expand_rotation(
    layer: &RotationLayer,
    order: usize,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<RotationOccurrences<'_>, EngineError> {
    let first = util::localize(layer.timezone, layer.start);
    let active = first < window_end && layer.until.map_or(true, |u| u >= window_start);

    if active {
        if layer.interval == 0 {
            return Err(invalid(layer, "interval must be > 0"));
        }
        if layer.duration_minutes <= 0 {
            return Err(invalid(layer, "duration must be > 0"));
        }
        if layer.participants.is_empty() {
            return Err(invalid(layer, "participant list is empty"));
        }
    }

    let duration = match Duration::try_minutes(layer.duration_minutes.max(0)) {
        Some(d) => d,
        None if active => return Err(invalid(layer, "duration out of range")),
        None => Duration::zero(),
    };
    let step = if active {
        first_useful_step(layer, duration, window_start)
    } else {
        0
    };

    Ok(RotationOccurrences {
        layer,
        source: SourceRef {
            kind: LayerKind::Rotation,
            layer_id: layer.id.clone(),
            priority: layer.priority,
            order,
        },
        window_start,
        window_end,
        duration,
        step,
        index: step,
        pending: VecDeque::new(),
        done: !active,
    })
}

fn invalid(layer: &RotationLayer, reason: &'static str) -> EngineError {
    EngineError::InvalidRecurrence {
        layer: layer.id.clone(),
        reason,
    }
}

/// Borne maximale (en minutes) d'un pas de récurrence.
fn max_step_minutes(layer: &RotationLayer) -> i64 {
    let unit = match layer.frequency {
        Frequency::Hourly => 60,
        Frequency::Daily => 24 * 60,
        Frequency::Weekly => 7 * 24 * 60,
        Frequency::Monthly => 31 * 24 * 60,
    };
    unit * i64::from(layer.interval)
}

/// Premier pas dont l'occurrence peut encore toucher la fenêtre.
///
/// Seules les règles sans `by_day` sautent directement (un pas = une
/// occurrence) ; les autres sont parcourues depuis le début.
fn first_useful_step(layer: &RotationLayer, duration: Duration, window_start: DateTime<Utc>) -> u64 {
    if !layer.by_day.is_empty() {
        return 0;
    }
    let local_start = window_start.with_timezone(&layer.timezone).naive_local();
    let Some(elapsed) = (local_start - layer.start).checked_sub(&duration) else {
        return 0;
    };
    let elapsed = elapsed.num_minutes();
    if elapsed <= 0 {
        return 0;
    }
    // un pas de marge pour les décalages d'heure d'été
    let steps = elapsed / max_step_minutes(layer) - 1;
    let steps = steps.max(0) as u64;
    layer.count.map_or(steps, |c| steps.min(c))
}

impl<'a> RotationOccurrences<'a> {
    /// Débuts candidats (heure murale) produits par le pas `step`.
    fn candidates(&self, step: u64) -> Option<Vec<NaiveDateTime>> {
        let layer = self.layer;
        let n = step.checked_mul(u64::from(layer.interval))?;

        if layer.frequency == Frequency::Weekly && !layer.by_day.is_empty() {
            let monday = layer.start.date()
                - Duration::days(i64::from(layer.start.weekday().num_days_from_monday()));
            let week = monday.checked_add_signed(Duration::try_weeks(i64::try_from(n).ok()?)?)?;
            let mut days: Vec<_> = layer.by_day.iter().map(|d| d.num_days_from_monday()).collect();
            days.sort_unstable();
            days.dedup();
            let out = days
                .into_iter()
                .map(|d| (week + Duration::days(i64::from(d))).and_time(layer.start.time()))
                .filter(|dt| *dt >= layer.start)
                .collect();
            return Some(out);
        }

        let n_i64 = i64::try_from(n).ok()?;
        let start = match layer.frequency {
            Frequency::Hourly => layer.start.checked_add_signed(Duration::try_hours(n_i64)?)?,
            Frequency::Daily => layer.start.checked_add_signed(Duration::try_days(n_i64)?)?,
            Frequency::Weekly => layer.start.checked_add_signed(Duration::try_weeks(n_i64)?)?,
            Frequency::Monthly => layer
                .start
                .checked_add_months(Months::new(u32::try_from(n).ok()?))?,
        };

        if !layer.by_day.is_empty() && !layer.by_day.contains(&start.weekday()) {
            return Some(Vec::new());
        }
        Some(vec![start])
    }

    /// Traite un début candidat ; `false` signifie que la règle est épuisée.
    fn push_candidate(&mut self, naive_start: NaiveDateTime) -> bool {
        let layer = self.layer;
        let k = self.index;
        if layer.count.is_some_and(|c| k >= c) {
            return false;
        }
        let start = util::localize(layer.timezone, naive_start);
        if layer.until.is_some_and(|u| start > u) || start >= self.window_end {
            return false;
        }
        self.index += 1;

        // fin hors du calendrier représentable : la garde court jusqu'au bout
        let end = naive_start
            .checked_add_signed(self.duration)
            .map_or(DateTime::<Utc>::MAX_UTC, |e| util::localize(layer.timezone, e));
        if end <= self.window_start || end <= start {
            return true;
        }

        let participants = &layer.participants;
        let user = participants[(k % participants.len() as u64) as usize].clone();
        let shift_id = ShiftId::new(format!("{}-{}", layer.id, k));

        for (piece_start, piece_end) in restrict(layer, start, end, self.window_start, self.window_end) {
            if !util::overlaps(piece_start, piece_end, self.window_start, self.window_end) {
                continue;
            }
            self.pending.push_back(ShiftOccurrence {
                shift_id: shift_id.clone(),
                source: self.source.clone(),
                start: piece_start,
                end: piece_end,
                user: Some(user.clone()),
                index: k,
            });
        }
        true
    }
}

impl<'a> Iterator for RotationOccurrences<'a> {
    type Item = ShiftOccurrence;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(occ) = self.pending.pop_front() {
                return Some(occ);
            }
            if self.done {
                return None;
            }
            let Some(starts) = self.candidates(self.step) else {
                self.done = true;
                continue;
            };
            self.step += 1;
            for naive_start in starts {
                if !self.push_candidate(naive_start) {
                    self.done = true;
                    break;
                }
            }
        }
    }
}

/// Découpe une occurrence selon les fenêtres de restriction de la couche.
///
/// Seuls les jours proches de la fenêtre de requête sont parcourus.
fn restrict(
    layer: &RotationLayer,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    if layer.restrictions.is_empty() {
        return vec![(start, end)];
    }
    let tz = layer.timezone;
    let local_day = |t: DateTime<Utc>| t.with_timezone(&tz).date_naive();
    let first_day = local_day(start.max(window_start))
        .checked_sub_signed(Duration::days(2))
        .unwrap_or(NaiveDate::MIN);
    let last_day = local_day(end.min(window_end));

    let mut pieces = Vec::new();
    for day in first_day.iter_days().take_while(|d| *d <= last_day) {
        for window in &layer.restrictions {
            if !window.weekdays.is_empty() && !window.weekdays.contains(&day.weekday()) {
                continue;
            }
            let w_start = util::localize(tz, day.and_time(window.start_time));
            let end_day = if window.end_time <= window.start_time {
                day + Duration::days(1)
            } else {
                day
            };
            let w_end = util::localize(tz, end_day.and_time(window.end_time));
            let s = w_start.max(start);
            let e = w_end.min(end);
            if s < e {
                pieces.push((s, e));
            }
        }
    }

    pieces.sort();
    let mut merged: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::with_capacity(pieces.len());
    for (s, e) in pieces {
        match merged.last_mut() {
            Some(last) if s <= last.1 => last.1 = last.1.max(e),
            _ => merged.push((s, e)),
        }
    }
    merged
}

/// Overrides intersectant la fenêtre, triés par début puis ordre de déclaration.
pub fn expand_overrides(
    layer: &OverrideLayer,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<ShiftOccurrence> {
    let mut out: Vec<ShiftOccurrence> = layer
        .shifts
        .iter()
        .enumerate()
        .filter(|(_, s)| s.start < s.end)
        .filter(|(_, s)| util::overlaps(s.start, s.end, window_start, window_end))
        .map(|(i, s)| ShiftOccurrence {
            shift_id: s.id.clone(),
            source: SourceRef {
                kind: LayerKind::Override,
                layer_id: "overrides".to_string(),
                priority: 0,
                order: 0,
            },
            start: s.start,
            end: s.end,
            user: s.user.clone(),
            index: i as u64,
        })
        .collect();
    out.sort_by_key(|o| (o.start, o.index));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RestrictionWindow, UserId};
    use chrono::{NaiveDate, NaiveTime, TimeZone, Weekday};
    use chrono_tz::Tz;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn daily(users: &[&str]) -> RotationLayer {
        RotationLayer {
            id: "a".into(),
            name: "A".into(),
            priority: 0,
            timezone: Tz::UTC,
            start: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            frequency: Frequency::Daily,
            interval: 1,
            duration_minutes: 24 * 60,
            until: None,
            count: None,
            by_day: Vec::new(),
            participants: users.iter().map(UserId::new).collect(),
            restrictions: Vec::new(),
        }
    }

    fn users(occ: &[ShiftOccurrence]) -> Vec<&str> {
        occ.iter()
            .map(|o| o.user.as_ref().map(|u| u.as_str()).unwrap_or("-"))
            .collect()
    }

    #[test]
    fn round_robin_by_occurrence_index() {
        let layer = daily(&["u1", "u2"]);
        let occ: Vec<_> = expand_rotation(&layer, 0, utc(2024, 1, 1, 0), utc(2024, 1, 4, 0))
            .unwrap()
            .collect();
        assert_eq!(users(&occ), ["u1", "u2", "u1"]);
        assert_eq!(occ[1].start, utc(2024, 1, 2, 0));
        assert_eq!(occ[1].end, utc(2024, 1, 3, 0));
        assert_eq!(occ[1].shift_id.as_str(), "a-1");
    }

    #[test]
    fn fast_forward_keeps_rotation_index() {
        let layer = daily(&["u1", "u2", "u3"]);
        // 2024-03-01 est le 60e jour depuis le 1er janvier (index 60, 60 % 3 == 0)
        let occ: Vec<_> = expand_rotation(&layer, 0, utc(2024, 3, 1, 12), utc(2024, 3, 3, 0))
            .unwrap()
            .collect();
        assert_eq!(occ.len(), 2);
        assert_eq!(occ[0].index, 60);
        assert_eq!(users(&occ), ["u1", "u2"]);
    }

    #[test]
    fn nothing_outside_window() {
        let mut layer = daily(&["u1"]);
        layer.until = Some(utc(2024, 1, 2, 0));
        let occ: Vec<_> = expand_rotation(&layer, 0, utc(2024, 1, 1, 0), utc(2024, 1, 10, 0))
            .unwrap()
            .collect();
        assert_eq!(occ.len(), 2);

        layer.until = None;
        layer.count = Some(1);
        let occ: Vec<_> = expand_rotation(&layer, 0, utc(2024, 1, 1, 0), utc(2024, 1, 10, 0))
            .unwrap()
            .collect();
        assert_eq!(occ.len(), 1);
    }

    #[test]
    fn invalid_rules_rejected_only_when_active() {
        let mut layer = daily(&[]);
        let err = expand_rotation(&layer, 0, utc(2024, 1, 1, 0), utc(2024, 1, 2, 0)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRecurrence { .. }));

        // règle pas encore commencée : ignorée
        assert!(expand_rotation(&layer, 0, utc(2023, 1, 1, 0), utc(2023, 1, 2, 0)).is_ok());

        layer.participants = vec![UserId::new("u1")];
        layer.interval = 0;
        assert!(expand_rotation(&layer, 0, utc(2024, 1, 1, 0), utc(2024, 1, 2, 0)).is_err());
        layer.interval = 1;
        layer.duration_minutes = 0;
        assert!(expand_rotation(&layer, 0, utc(2024, 1, 1, 0), utc(2024, 1, 2, 0)).is_err());
    }

    #[test]
    fn dst_day_neither_duplicates_nor_drops() {
        let paris: Tz = "Europe/Paris".parse().unwrap();
        let mut layer = daily(&["u1", "u2"]);
        layer.timezone = paris;
        layer.start = NaiveDate::from_ymd_opt(2024, 3, 29)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let occ: Vec<_> = expand_rotation(&layer, 0, utc(2024, 3, 30, 0), utc(2024, 4, 2, 0))
            .unwrap()
            .collect();
        let starts: Vec<_> = occ.iter().map(|o| o.start).collect();
        // l'occurrence du 29 mars commence avant la fenêtre mais se termine dedans
        assert_eq!(
            starts,
            [
                utc(2024, 3, 29, 8),
                utc(2024, 3, 30, 8),
                utc(2024, 3, 31, 7),
                utc(2024, 4, 1, 7),
            ]
        );
        // la garde qui traverse le changement d'heure dure 23 h réelles
        assert_eq!(occ[1].end - occ[1].start, Duration::hours(23));
        assert_eq!(occ[2].end - occ[2].start, Duration::hours(24));
        assert_eq!(users(&occ), ["u1", "u2", "u1", "u2"]);
    }

    #[test]
    fn weekly_by_day_counts_each_emitted_day() {
        let mut layer = daily(&["u1", "u2"]);
        layer.frequency = Frequency::Weekly;
        layer.duration_minutes = 60;
        layer.by_day = vec![Weekday::Mon, Weekday::Wed];
        // 2024-01-01 est un lundi
        let occ: Vec<_> = expand_rotation(&layer, 0, utc(2024, 1, 1, 0), utc(2024, 1, 15, 0))
            .unwrap()
            .collect();
        let days: Vec<_> = occ.iter().map(|o| o.start.day()).collect();
        assert_eq!(days, [1, 3, 8, 10]);
        assert_eq!(users(&occ), ["u1", "u2", "u1", "u2"]);
    }

    #[test]
    fn monthly_clamps_to_month_end() {
        let mut layer = daily(&["u1", "u2", "u3"]);
        layer.frequency = Frequency::Monthly;
        layer.start = NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let occ: Vec<_> = expand_rotation(&layer, 0, utc(2024, 1, 1, 0), utc(2024, 5, 1, 0))
            .unwrap()
            .collect();
        let starts: Vec<_> = occ.iter().map(|o| o.start).collect();
        assert_eq!(
            starts,
            [
                utc(2024, 1, 31, 0),
                utc(2024, 2, 29, 0),
                utc(2024, 3, 31, 0),
                utc(2024, 4, 30, 0),
            ]
        );
        assert_eq!(users(&occ), ["u1", "u2", "u3", "u1"]);
        assert_eq!(occ[1].end, utc(2024, 3, 1, 0));

        // saut direct : le rang suit le nombre de mois écoulés
        let occ: Vec<_> = expand_rotation(&layer, 0, utc(2025, 6, 15, 0), utc(2025, 9, 1, 0))
            .unwrap()
            .collect();
        let starts: Vec<_> = occ.iter().map(|o| o.start).collect();
        assert_eq!(starts, [utc(2025, 6, 30, 0), utc(2025, 7, 31, 0), utc(2025, 8, 31, 0)]);
        assert_eq!(occ.iter().map(|o| o.index).collect::<Vec<_>>(), [17, 18, 19]);
        assert_eq!(users(&occ), ["u3", "u1", "u2"]);
    }

    #[test]
    fn monthly_count_limits_occurrences() {
        let mut layer = daily(&["u1", "u2"]);
        layer.frequency = Frequency::Monthly;
        layer.count = Some(2);
        let occ: Vec<_> = expand_rotation(&layer, 0, utc(2024, 1, 1, 0), utc(2024, 6, 1, 0))
            .unwrap()
            .collect();
        assert_eq!(occ.len(), 2);
        assert_eq!(occ[1].start, utc(2024, 2, 1, 0));

        layer.count = Some(18);
        let occ: Vec<_> = expand_rotation(&layer, 0, utc(2025, 6, 1, 12), utc(2025, 9, 1, 0))
            .unwrap()
            .collect();
        assert_eq!(occ.len(), 1);
        assert_eq!(occ[0].index, 17);
        assert_eq!(occ[0].start, utc(2025, 6, 1, 0));
    }

    #[test]
    fn out_of_range_duration_is_an_invalid_rule() {
        let mut layer = daily(&["u1"]);
        layer.duration_minutes = 1_000_000_000_000_000;
        let err = expand_rotation(&layer, 0, utc(2024, 1, 1, 0), utc(2024, 1, 2, 0)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRecurrence { reason, .. } if reason == "duration out of range"));

        // garde représentable mais dont la fin sort du calendrier
        layer.duration_minutes = 100_000_000_000_000;
        let occ: Vec<_> = expand_rotation(&layer, 0, utc(2024, 3, 1, 0), utc(2024, 3, 2, 0))
            .unwrap()
            .collect();
        // 1er janvier .. 1er mars : 61 gardes encore en cours
        assert_eq!(occ.len(), 61);
        assert_eq!(occ[60].end, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn hourly_slot_in_skipped_hour_is_not_emitted() {
        let mut layer = daily(&["u1", "u2"]);
        layer.timezone = "Europe/Paris".parse().unwrap();
        layer.frequency = Frequency::Hourly;
        layer.duration_minutes = 60;
        layer.start = NaiveDate::from_ymd_opt(2024, 3, 31)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let occ: Vec<_> = expand_rotation(&layer, 0, utc(2024, 3, 30, 23), utc(2024, 3, 31, 2))
            .unwrap()
            .collect();
        // 00:00, 01:00, (02:00 inexistant), 03:00 heure de Paris
        assert_eq!(occ.iter().map(|o| o.index).collect::<Vec<_>>(), [0, 1, 3]);
        assert_eq!(occ[2].start, utc(2024, 3, 31, 1));
    }

    #[test]
    fn restrictions_clip_and_keep_source_identity() {
        let mut layer = daily(&["u1"]);
        layer.restrictions = vec![RestrictionWindow {
            weekdays: vec![Weekday::Mon, Weekday::Tue],
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        }];
        let occ: Vec<_> = expand_rotation(&layer, 0, utc(2024, 1, 1, 0), utc(2024, 1, 4, 0))
            .unwrap()
            .collect();
        assert_eq!(occ.len(), 2);
        assert_eq!((occ[0].start, occ[0].end), (utc(2024, 1, 1, 9), utc(2024, 1, 1, 17)));
        assert_eq!(occ[1].shift_id.as_str(), "a-1");
    }

    #[test]
    fn overnight_restriction_spans_midnight() {
        let mut layer = daily(&["u1"]);
        layer.restrictions = vec![RestrictionWindow {
            weekdays: Vec::new(),
            start_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        }];
        let occ: Vec<_> = expand_rotation(&layer, 0, utc(2024, 1, 2, 0), utc(2024, 1, 3, 0))
            .unwrap()
            .collect();
        let spans: Vec<_> = occ.iter().map(|o| (o.start, o.end)).collect();
        assert_eq!(
            spans,
            [
                (utc(2024, 1, 2, 0), utc(2024, 1, 2, 6)),
                (utc(2024, 1, 2, 22), utc(2024, 1, 3, 0)),
            ]
        );
    }

    #[test]
    fn overrides_sorted_and_filtered() {
        let layer = OverrideLayer {
            shifts: vec![
                crate::model::OverrideShift {
                    id: ShiftId::new("o2"),
                    start: utc(2024, 1, 2, 10),
                    end: utc(2024, 1, 2, 14),
                    user: Some(UserId::new("u3")),
                },
                crate::model::OverrideShift {
                    id: ShiftId::new("o1"),
                    start: utc(2024, 1, 1, 10),
                    end: utc(2024, 1, 1, 14),
                    user: None,
                },
                crate::model::OverrideShift {
                    id: ShiftId::new("old"),
                    start: utc(2023, 1, 1, 10),
                    end: utc(2023, 1, 1, 14),
                    user: None,
                },
            ],
        };
        let occ = expand_overrides(&layer, utc(2024, 1, 1, 0), utc(2024, 1, 3, 0));
        let ids: Vec<_> = occ.iter().map(|o| o.shift_id.as_str()).collect();
        assert_eq!(ids, ["o1", "o2"]);
    }
}
