use super::{Engine, EngineError};
use crate::model::{Person, ScheduleId, UserId};
use chrono::{DateTime, Utc};
use std::cell::OnceCell;
use std::collections::BTreeMap;

/// Contexte d'une requête : les utilisateurs d'astreinte sont calculés une
/// seule fois puis réutilisés par chaque rendu de la même requête.
#[derive(Debug)]
pub struct EvaluationContext<'e> {
    engine: &'e Engine,
    schedules: Vec<ScheduleId>,
    at: DateTime<Utc>,
    oncall: OnceCell<BTreeMap<ScheduleId, Vec<Person>>>,
}

impl<'e> EvaluationContext<'e> {
    pub fn new(engine: &'e Engine, schedules: Vec<ScheduleId>, at: DateTime<Utc>) -> Self {
        Self {
            engine,
            schedules,
            at,
            oncall: OnceCell::new(),
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    pub fn oncall_users(&self) -> Result<&BTreeMap<ScheduleId, Vec<Person>>, EngineError> {
        if let Some(hit) = self.oncall.get() {
            return Ok(hit);
        }
        let computed = self.engine.oncall_users(&self.schedules, self.at)?;
        Ok(self.oncall.get_or_init(|| computed))
    }

    pub fn oncall_for(&self, schedule: &ScheduleId) -> Result<&[Person], EngineError> {
        Ok(self
            .oncall_users()?
            .get(schedule)
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }

    pub fn user_is_oncall(&self, user: &UserId) -> Result<bool, EngineError> {
        Ok(self
            .oncall_users()?
            .values()
            .flatten()
            .any(|p| &p.id == user))
    }
}
