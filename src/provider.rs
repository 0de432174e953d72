//! Interfaces des collaborateurs externes consommés par le moteur.

use crate::model::{Person, ScheduleId, ShiftSwapRequest, UserId};
use crate::source::ScheduleSource;
use chrono::{DateTime, Utc};

/// Fournit la définition brute d'un planning (et donc sa révision de contenu).
pub trait ScheduleSourceProvider {
    /// `Ok(None)` si le planning n'existe pas.
    fn get_raw_layers(&self, schedule: &ScheduleId) -> anyhow::Result<Option<ScheduleSource>>;
}

/// Annuaire des utilisateurs.
pub trait UserDirectory {
    /// `None` si la référence est inconnue.
    fn resolve_participant(&self, user: &UserId) -> Option<Person>;
}

/// Fournit les demandes d'échange d'un planning sur une fenêtre.
pub trait SwapProvider {
    /// Demandes approuvées intersectant la fenêtre, seules appliquées à la timeline.
    fn get_approved_swaps(
        &self,
        schedule: &ScheduleId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ShiftSwapRequest>>;

    /// Toutes les demandes non supprimées intersectant la fenêtre.
    fn get_swap_requests(
        &self,
        schedule: &ScheduleId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ShiftSwapRequest>> {
        self.get_approved_swaps(schedule, start, end)
    }
}

impl UserDirectory for Vec<Person> {
    fn resolve_participant(&self, user: &UserId) -> Option<Person> {
        self.iter().find(|p| &p.id == user).cloned()
    }
}
