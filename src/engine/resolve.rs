use super::expand::{expand_overrides, expand_rotation};
use super::types::{
    EngineError, EventUser, FinalEvent, LayerKind, ResolveOptions, ShiftOccurrence,
};
use crate::model::{ScheduleDefinition, UserId};
use crate::provider::UserDirectory;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

/// Rang de précédence : override > priorité > couche déclarée plus tard >
/// occurrence plus tardive. Le dernier champ est la position, pour l'unicité.
type Rank = (LayerKind, i32, usize, DateTime<Utc>, u64, usize);

fn rank(occ: &ShiftOccurrence, position: usize) -> Rank {
    (
        occ.source.kind,
        occ.source.priority,
        occ.source.order,
        occ.start,
        occ.index,
        position,
    )
}

/// Collecte les occurrences des couches demandées sur la fenêtre.
pub fn collect_occurrences(
    def: &ScheduleDefinition,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    opts: ResolveOptions,
) -> Result<Vec<ShiftOccurrence>, EngineError> {
    let mut out = Vec::new();
    if opts.includes_rotations() {
        for (order, layer) in def.rotations.iter().enumerate() {
            out.extend(expand_rotation(layer, order, start, end)?);
        }
    }
    if opts.includes_overrides() {
        out.extend(expand_overrides(&def.overrides, start, end));
    }
    Ok(out)
}

/// Fusionne toutes les couches en une timeline ordonnée sans chevauchement.
pub fn resolve_definition(
    def: &ScheduleDefinition,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    opts: ResolveOptions,
    users: &dyn UserDirectory,
) -> Result<Vec<FinalEvent>, EngineError> {
    let occurrences = collect_occurrences(def, start, end, opts)?;
    let mut participants = ParticipantMemo::new(users, def);
    let mut events: Vec<FinalEvent> = Vec::new();

    for (piece_start, piece_end, winner) in sweep(&occurrences, start, end) {
        let event = match winner.map(|i| &occurrences[i]) {
            None if opts.with_gap => FinalEvent::gap(piece_start, piece_end),
            None => continue,
            Some(occ) => {
                let user = occ.user.as_ref().and_then(|u| participants.resolve(u));
                match user {
                    Some(user) => shift_event(occ, piece_start, piece_end, vec![user]),
                    None if opts.with_empty => {
                        let mut e = shift_event(occ, piece_start, piece_end, Vec::new());
                        e.is_empty = true;
                        e
                    }
                    // garde vide hors `with_empty` : trou pour garder la couverture
                    None if opts.with_gap => FinalEvent::gap(piece_start, piece_end),
                    None => continue,
                }
            }
        };
        push_coalesced(&mut events, event);
    }

    Ok(events)
}

/// Balayage : découpe la fenêtre aux bornes des occurrences et désigne le
/// gagnant de chaque sous-intervalle. O(N log N).
fn sweep(
    occurrences: &[ShiftOccurrence],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>, Option<usize>)> {
    let spans: Vec<(DateTime<Utc>, DateTime<Utc>)> = occurrences
        .iter()
        .map(|o| (o.start.max(start), o.end.min(end)))
        .collect();
    let live: Vec<usize> = (0..spans.len()).filter(|&i| spans[i].0 < spans[i].1).collect();

    let mut times: Vec<DateTime<Utc>> = live
        .iter()
        .flat_map(|&i| [spans[i].0, spans[i].1])
        .chain([start, end])
        .collect();
    times.sort_unstable();
    times.dedup();

    let mut by_start = live.clone();
    by_start.sort_by_key(|&i| spans[i].0);
    let mut by_end = live;
    by_end.sort_by_key(|&i| spans[i].1);

    let mut active: BTreeSet<Rank> = BTreeSet::new();
    let (mut si, mut ei) = (0usize, 0usize);
    let mut pieces = Vec::with_capacity(times.len());

    for pair in times.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        while ei < by_end.len() && spans[by_end[ei]].1 <= a {
            let i = by_end[ei];
            active.remove(&rank(&occurrences[i], i));
            ei += 1;
        }
        while si < by_start.len() && spans[by_start[si]].0 <= a {
            let i = by_start[si];
            active.insert(rank(&occurrences[i], i));
            si += 1;
        }
        pieces.push((a, b, active.last().map(|r| r.5)));
    }
    pieces
}

fn shift_event(
    occ: &ShiftOccurrence,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    users: Vec<EventUser>,
) -> FinalEvent {
    let is_override = occ.source.kind == LayerKind::Override;
    FinalEvent {
        start,
        end,
        users,
        is_gap: false,
        is_empty: false,
        is_override,
        priority: (!is_override).then_some(occ.source.priority),
        source_shift_ids: vec![occ.shift_id.clone()],
        swap: None,
    }
}

/// Deux événements portent la même affectation (même utilisateur, même source).
pub(crate) fn same_assignment(a: &FinalEvent, b: &FinalEvent) -> bool {
    a.users == b.users
        && a.is_gap == b.is_gap
        && a.is_empty == b.is_empty
        && a.is_override == b.is_override
        && a.priority == b.priority
        && a.source_shift_ids == b.source_shift_ids
        && a.swap == b.swap
}

pub(crate) fn push_coalesced(events: &mut Vec<FinalEvent>, event: FinalEvent) {
    if let Some(last) = events.last_mut() {
        if last.end == event.start && same_assignment(last, &event) {
            last.end = event.end;
            return;
        }
    }
    events.push(event);
}

/// Résolution des participants mémorisée pour la durée d'une évaluation.
struct ParticipantMemo<'a> {
    users: &'a dyn UserDirectory,
    def: &'a ScheduleDefinition,
    seen: HashMap<UserId, Option<EventUser>>,
}

impl<'a> ParticipantMemo<'a> {
    fn new(users: &'a dyn UserDirectory, def: &'a ScheduleDefinition) -> Self {
        Self {
            users,
            def,
            seen: HashMap::new(),
        }
    }

    fn resolve(&mut self, user: &UserId) -> Option<EventUser> {
        if let Some(hit) = self.seen.get(user) {
            return hit.clone();
        }
        let resolved = self.users.resolve_participant(user).map(|p| EventUser::from(&p));
        if resolved.is_none() {
            tracing::warn!(
                schedule = self.def.id.as_str(),
                user = user.as_str(),
                "unknown participant, shift left empty"
            );
        }
        self.seen.insert(user.clone(), resolved.clone());
        resolved
    }
}
