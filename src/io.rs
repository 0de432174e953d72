use crate::engine::FinalEvent;
use crate::model::{OverrideShift, Person, UserId};
use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use csv::{ReaderBuilder, WriterBuilder};
use std::fs;
use std::path::Path;

/// Import d'utilisateurs depuis CSV: header `id,display_name[,timezone]`
pub fn import_users_csv<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<Person>> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut out = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        let id = rec.get(0).context("missing id")?.trim();
        let display = rec.get(1).context("missing display_name")?.trim();
        if id.is_empty() || display.is_empty() {
            bail!("invalid user row (empty)");
        }
        let mut person = Person::new(id, display);
        if let Some(tz) = rec.get(2) {
            let tz = tz.trim();
            if !tz.is_empty() {
                let tz: Tz = tz
                    .parse()
                    .map_err(|e| anyhow::anyhow!("invalid timezone for user {id}: {e}"))?;
                person = person.with_timezone(tz);
            }
        }
        out.push(person);
    }
    Ok(out)
}

fn parse_point(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid date/datetime: {raw}"))?;
    let datetime = date
        .and_hms_opt(0, 0, 0)
        .context("invalid midnight conversion")?;
    Ok(Utc.from_utc_datetime(&datetime))
}

/// Import d'overrides: header `user,start,end` (RFC3339 ou date nue = minuit UTC).
/// Un `user` vide produit un override sans assigné.
pub fn import_overrides_csv<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<OverrideShift>> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut out = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        let user = rec.get(0).context("missing user")?.trim();
        let start = parse_point(rec.get(1).context("missing start")?.trim())?;
        let end = parse_point(rec.get(2).context("missing end")?.trim())?;
        let user = (!user.is_empty()).then(|| UserId::new(user));
        let shift = OverrideShift::new(start, end, user)?;
        out.push(shift);
    }
    Ok(out)
}

/// Export JSON des événements (jolie mise en forme)
pub fn export_events_json<P: AsRef<Path>>(path: P, events: &[FinalEvent]) -> anyhow::Result<()> {
    let s = serde_json::to_string_pretty(events)?;
    fs::write(path, s)?;
    Ok(())
}

/// Export CSV des événements: header `start,end,user_id,display_name,kind,source_shift_ids`
pub fn export_events_csv<P: AsRef<Path>>(path: P, events: &[FinalEvent]) -> anyhow::Result<()> {
    let mut w = WriterBuilder::new().has_headers(true).from_path(path)?;
    w.write_record([
        "start",
        "end",
        "user_id",
        "display_name",
        "kind",
        "source_shift_ids",
    ])?;
    for e in events {
        let (id, name) = e
            .user()
            .map(|u| (u.id.as_str(), u.display_name.as_str()))
            .unwrap_or(("", ""));
        let kind = if e.is_gap {
            "gap"
        } else if e.is_empty {
            "empty"
        } else if e.is_override {
            "override"
        } else if e.swap.is_some() {
            "swap"
        } else {
            "rotation"
        };
        let start = e.start.to_rfc3339();
        let end = e.end.to_rfc3339();
        let shifts = e
            .source_shift_ids
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(";");
        w.write_record([
            start.as_str(),
            end.as_str(),
            id,
            name,
            kind,
            shifts.as_str(),
        ])?;
    }
    w.flush()?;
    Ok(())
}
