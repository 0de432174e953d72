use super::types::{EventUser, FinalEvent, SwapMark};
use super::util;
use crate::model::ShiftSwapRequest;
use crate::provider::UserDirectory;

/// Applique les échanges approuvés sur une timeline résolue.
///
/// - seuls les swaps approuvés comptent, dans l'ordre de création ;
/// - une portion déjà échangée n'est plus disponible pour un swap suivant ;
/// - un événement issu d'un override n'est jamais modifié.
pub fn apply_swaps(
    mut events: Vec<FinalEvent>,
    swaps: &[ShiftSwapRequest],
    users: &dyn UserDirectory,
) -> Vec<FinalEvent> {
    let mut ordered: Vec<&ShiftSwapRequest> = swaps.iter().filter(|s| s.is_approved()).collect();
    ordered.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

    for swap in ordered {
        let Some(beneficiary_id) = swap.beneficiary.as_ref() else {
            continue;
        };
        let Some(beneficiary) = users.resolve_participant(beneficiary_id) else {
            tracing::warn!(
                swap = swap.id.as_str(),
                user = beneficiary_id.as_str(),
                "unknown swap beneficiary, swap skipped"
            );
            continue;
        };
        let beneficiary = EventUser::from(&beneficiary);
        let mark = SwapMark {
            swap_id: swap.id.clone(),
            benefactor: swap.benefactor.clone(),
        };

        let mut out = Vec::with_capacity(events.len() + 2);
        for event in events {
            let eligible = !event.is_override
                && event.swap.is_none()
                && event.is_assigned_to(&swap.benefactor)
                && util::overlaps(event.start, event.end, swap.swap_start, swap.swap_end);
            if !eligible {
                out.push(event);
                continue;
            }

            let from = event.start.max(swap.swap_start);
            let to = event.end.min(swap.swap_end);
            if event.start < from {
                let mut before = event.clone();
                before.end = from;
                out.push(before);
            }
            let mut swapped = event.clone();
            swapped.start = from;
            swapped.end = to;
            swapped.users = vec![beneficiary.clone()];
            swapped.swap = Some(mark.clone());
            out.push(swapped);
            if to < event.end {
                let mut after = event;
                after.start = to;
                out.push(after);
            }
        }
        events = out;
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Person, ScheduleId, ShiftId, SwapStatus, UserId};
    use chrono::{DateTime, TimeZone, Utc};

    fn utc(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap()
    }

    fn people() -> Vec<Person> {
        vec![
            Person::new("u1", "U1"),
            Person::new("u2", "U2"),
            Person::new("u3", "U3"),
        ]
    }

    fn event(user: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> FinalEvent {
        FinalEvent {
            start,
            end,
            users: vec![EventUser {
                id: UserId::new(user),
                display_name: user.to_uppercase(),
            }],
            is_gap: false,
            is_empty: false,
            is_override: false,
            priority: Some(0),
            source_shift_ids: vec![ShiftId::new("a-0")],
            swap: None,
        }
    }

    fn swap(
        id: &str,
        from: &str,
        to: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        created_hour: u32,
    ) -> ShiftSwapRequest {
        ShiftSwapRequest {
            id: id.into(),
            schedule: ScheduleId::new("s"),
            benefactor: UserId::new(from),
            beneficiary: Some(UserId::new(to)),
            swap_start: start,
            swap_end: end,
            created_at: Utc.with_ymd_and_hms(2023, 12, 1, created_hour, 0, 0).unwrap(),
            status: SwapStatus::Approved,
        }
    }

    fn owners(events: &[FinalEvent]) -> Vec<(&str, u32, u32)> {
        use chrono::Timelike;
        events
            .iter()
            .map(|e| (e.user().unwrap().id.as_str(), e.start.hour(), e.end.hour()))
            .collect()
    }

    #[test]
    fn swap_inside_event_splits_in_three() {
        let original = event("u1", utc(1, 0), utc(1, 23));
        let out = apply_swaps(
            vec![original.clone()],
            &[swap("s1", "u1", "u2", utc(1, 10), utc(1, 14), 0)],
            &people(),
        );
        assert_eq!(owners(&out), [("u1", 0, 10), ("u2", 10, 14), ("u1", 14, 23)]);
        let total: i64 = out.iter().map(FinalEvent::duration_seconds).sum();
        assert_eq!(total, original.duration_seconds());
        assert_eq!(out[1].swap.as_ref().unwrap().benefactor, UserId::new("u1"));
        assert_eq!(out[1].source_shift_ids, original.source_shift_ids);
    }

    #[test]
    fn swap_touching_edge_splits_in_two() {
        let out = apply_swaps(
            vec![event("u1", utc(1, 0), utc(1, 20))],
            &[swap("s1", "u1", "u2", utc(1, 0), utc(1, 5), 0)],
            &people(),
        );
        assert_eq!(owners(&out), [("u2", 0, 5), ("u1", 5, 20)]);
    }

    #[test]
    fn overrides_and_other_users_untouched() {
        let mut ov = event("u1", utc(1, 0), utc(1, 10));
        ov.is_override = true;
        let other = event("u3", utc(1, 10), utc(1, 20));
        let out = apply_swaps(
            vec![ov.clone(), other.clone()],
            &[swap("s1", "u1", "u2", utc(1, 0), utc(1, 20), 0)],
            &people(),
        );
        assert_eq!(out, [ov, other]);
    }

    #[test]
    fn earliest_swap_claims_overlap() {
        let out = apply_swaps(
            vec![event("u1", utc(1, 0), utc(1, 20))],
            &[
                swap("late", "u1", "u3", utc(1, 5), utc(1, 15), 9),
                swap("early", "u1", "u2", utc(1, 0), utc(1, 10), 1),
            ],
            &people(),
        );
        assert_eq!(
            owners(&out),
            [("u2", 0, 10), ("u3", 10, 15), ("u1", 15, 20)]
        );
        assert_eq!(out[1].swap.as_ref().unwrap().swap_id, "late");
    }

    #[test]
    fn pending_and_unknown_beneficiaries_ignored() {
        let original = event("u1", utc(1, 0), utc(1, 20));
        let mut pending = swap("p", "u1", "u2", utc(1, 0), utc(1, 10), 0);
        pending.status = SwapStatus::Pending;
        let ghost = swap("g", "u1", "ghost", utc(1, 0), utc(1, 10), 1);
        let out = apply_swaps(vec![original.clone()], &[pending, ghost], &people());
        assert_eq!(out, [original]);
    }
}
