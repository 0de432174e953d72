use crate::model::{Person, ScheduleId, ShiftSwapRequest, SwapStatus, UserId};
use crate::provider::{ScheduleSourceProvider, SwapProvider, UserDirectory};
use crate::source::ScheduleSource;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Espace de travail complet : plannings bruts, annuaire, demandes d'échange.
///
/// Implémente tous les collaborateurs du moteur ; sert de source locale à la
/// CLI et aux tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workspace {
    #[serde(default)]
    pub schedules: Vec<ScheduleSource>,
    #[serde(default)]
    pub users: Vec<Person>,
    #[serde(default)]
    pub swaps: Vec<ShiftSwapRequest>,
}

impl Workspace {
    pub fn find_schedule(&self, id: &ScheduleId) -> Option<&ScheduleSource> {
        self.schedules.iter().find(|s| &s.id == id)
    }
    pub fn find_schedule_mut(&mut self, id: &ScheduleId) -> Option<&mut ScheduleSource> {
        self.schedules.iter_mut().find(|s| &s.id == id)
    }
    pub fn find_user(&self, id: &UserId) -> Option<&Person> {
        self.users.iter().find(|p| &p.id == id)
    }

    /// Ajoute ou remplace les utilisateurs par identifiant.
    pub fn upsert_users(&mut self, people: Vec<Person>) {
        for person in people {
            match self.users.iter_mut().find(|p| p.id == person.id) {
                Some(existing) => *existing = person,
                None => self.users.push(person),
            }
        }
    }
}

impl ScheduleSourceProvider for Workspace {
    fn get_raw_layers(&self, schedule: &ScheduleId) -> anyhow::Result<Option<ScheduleSource>> {
        Ok(self.find_schedule(schedule).cloned())
    }
}

impl UserDirectory for Workspace {
    fn resolve_participant(&self, user: &UserId) -> Option<Person> {
        self.find_user(user).cloned()
    }
}

impl SwapProvider for Workspace {
    fn get_approved_swaps(
        &self,
        schedule: &ScheduleId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ShiftSwapRequest>> {
        let mut out = self.get_swap_requests(schedule, start, end)?;
        out.retain(ShiftSwapRequest::is_approved);
        Ok(out)
    }

    fn get_swap_requests(
        &self,
        schedule: &ScheduleId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ShiftSwapRequest>> {
        let mut out: Vec<ShiftSwapRequest> = self
            .swaps
            .iter()
            .filter(|s| {
                &s.schedule == schedule
                    && s.status != SwapStatus::Deleted
                    && s.intersects(start, end)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(out)
    }
}

pub trait Storage {
    /// Charge un espace de travail depuis un support.
    fn load(&self) -> anyhow::Result<Workspace>;
    /// Sauvegarde de manière atomique.
    fn save(&self, workspace: &Workspace) -> anyhow::Result<()>;
}

pub struct JsonStorage {
    path: PathBuf,
}

impl JsonStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for JsonStorage {
    fn load(&self) -> anyhow::Result<Workspace> {
        let data =
            fs::read(&self.path).with_context(|| format!("reading {}", self.path.display()))?;
        let workspace: Workspace =
            serde_json::from_slice(&data).with_context(|| "parsing workspace.json")?;
        Ok(workspace)
    }

    fn save(&self, workspace: &Workspace) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(workspace)?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).with_context(|| "creating temp file")?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).with_context(|| "atomic rename")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn swap(id: &str, schedule: &str, day: u32, created_hour: u32) -> ShiftSwapRequest {
        ShiftSwapRequest {
            id: id.into(),
            schedule: ScheduleId::new(schedule),
            benefactor: UserId::new("u1"),
            beneficiary: Some(UserId::new("u2")),
            swap_start: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            swap_end: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
            created_at: Utc.with_ymd_and_hms(2023, 12, 1, created_hour, 0, 0).unwrap(),
            status: SwapStatus::Approved,
        }
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::open(dir.path().join("workspace.json")).unwrap();
        let mut ws = Workspace::default();
        ws.upsert_users(vec![Person::new("u1", "Alice")]);
        ws.schedules.push(ScheduleSource::web(
            ScheduleId::new("s"),
            "S",
            Vec::new(),
            Vec::new(),
        ));
        storage.save(&ws).unwrap();

        let loaded = storage.load().unwrap();
        assert_eq!(loaded.users, ws.users);
        assert_eq!(loaded.schedules, ws.schedules);
    }

    #[test]
    fn upsert_replaces_by_id() {
        let mut ws = Workspace::default();
        ws.upsert_users(vec![Person::new("u1", "Alice")]);
        ws.upsert_users(vec![Person::new("u1", "Alice B."), Person::new("u2", "Bob")]);
        assert_eq!(ws.users.len(), 2);
        assert_eq!(ws.users[0].display_name, "Alice B.");
    }

    #[test]
    fn swaps_filtered_by_schedule_and_window() {
        let ws = Workspace {
            swaps: vec![
                swap("late", "s", 2, 9),
                swap("early", "s", 2, 1),
                swap("other", "t", 2, 0),
                swap("outside", "s", 9, 0),
            ],
            ..Workspace::default()
        };
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let swaps = ws.get_approved_swaps(&ScheduleId::new("s"), start, end).unwrap();
        let ids: Vec<_> = swaps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["early", "late"]);
    }

    #[test]
    fn listing_keeps_pending_but_hides_deleted() {
        let mut pending = swap("pending", "s", 2, 3);
        pending.status = SwapStatus::Pending;
        pending.beneficiary = None;
        let mut deleted = swap("deleted", "s", 2, 4);
        deleted.status = SwapStatus::Deleted;
        let ws = Workspace {
            swaps: vec![pending, deleted, swap("ok", "s", 2, 5)],
            ..Workspace::default()
        };
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let schedule = ScheduleId::new("s");

        let listed = ws.get_swap_requests(&schedule, start, end).unwrap();
        let ids: Vec<_> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["pending", "ok"]);
        assert_eq!(ws.get_approved_swaps(&schedule, start, end).unwrap().len(), 1);
    }
}
