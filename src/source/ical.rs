//! Sous-ensemble iCalendar (RFC 5545) suffisant pour les calendriers d'astreinte.
//!
//! - `SUMMARY` : participants séparés par des virgules, préfixe `[L<n>]`
//!   optionnel pour la priorité ;
//! - `DTSTART` / `DTEND` en UTC (`Z`), avec `TZID=`, flottants ou `VALUE=DATE` ;
//! - `DURATION` à la place de `DTEND` ;
//! - `RRULE` : `FREQ`, `INTERVAL`, `COUNT`, `UNTIL`, `BYDAY` (sans ordinal).

use crate::engine::util::localize;
use crate::engine::EngineError;
use crate::model::{Frequency, OverrideShift, RotationLayer, ShiftId, UserId};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc, Weekday};
use chrono_tz::Tz;

#[derive(Debug, Clone)]
struct Property {
    name: String,
    params: Vec<(String, String)>,
    value: String,
}

impl Property {
    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default)]
struct VEvent {
    props: Vec<Property>,
}

impl VEvent {
    fn get(&self, name: &str) -> Option<&Property> {
        self.props.iter().find(|p| p.name == name)
    }
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidSource(msg.into())
}

fn unfold(raw: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix(' ').or_else(|| line.strip_prefix('\t')) {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}

fn parse_property(line: &str) -> Option<Property> {
    let (head, value) = line.split_once(':')?;
    let mut parts = head.split(';');
    let name = parts.next()?.trim().to_ascii_uppercase();
    let params = parts
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.trim().to_ascii_uppercase(), v.trim().trim_matches('"').to_string()))
        .collect();
    Some(Property {
        name,
        params,
        value: value.trim().to_string(),
    })
}

/// Fuseau par défaut du calendrier (`X-WR-TIMEZONE`) et ses événements.
fn parse_calendar(raw: &str) -> Result<(Tz, Vec<VEvent>), EngineError> {
    let mut default_tz = Tz::UTC;
    let mut events = Vec::new();
    let mut current: Option<VEvent> = None;
    let mut nested = 0usize;

    for line in unfold(raw) {
        let Some(prop) = parse_property(&line) else {
            continue;
        };
        let name = prop.name.clone();
        let value = prop.value.to_ascii_uppercase();
        match (name.as_str(), value.as_str()) {
            ("BEGIN", "VEVENT") if current.is_none() => current = Some(VEvent::default()),
            ("BEGIN", _) if current.is_some() => nested += 1,
            ("END", "VEVENT") if nested == 0 => {
                if let Some(event) = current.take() {
                    events.push(event);
                }
            }
            ("END", _) if nested > 0 => nested -= 1,
            ("X-WR-TIMEZONE", _) if current.is_none() => default_tz = parse_tz(&prop.value)?,
            _ => {
                if let (Some(event), 0) = (current.as_mut(), nested) {
                    event.props.push(prop);
                }
            }
        }
    }
    if current.is_some() {
        return Err(invalid("unterminated VEVENT"));
    }
    Ok((default_tz, events))
}

fn parse_tz(name: &str) -> Result<Tz, EngineError> {
    name.parse::<Tz>()
        .map_err(|_| invalid(format!("unknown timezone {name}")))
}

/// Horodatage iCalendar -> (heure murale, fuseau, date seule ?).
fn parse_time(prop: &Property, default_tz: Tz) -> Result<(NaiveDateTime, Tz, bool), EngineError> {
    let value = prop.value.as_str();
    let tz = match prop.param("TZID") {
        Some(name) => parse_tz(name)?,
        None => default_tz,
    };
    if prop.param("VALUE") == Some("DATE") || value.len() == 8 {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d")
            .map_err(|_| invalid(format!("invalid date {value}")))?;
        return Ok((date.and_time(chrono::NaiveTime::MIN), tz, true));
    }
    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
            .map_err(|_| invalid(format!("invalid date-time {value}")))?;
        return Ok((naive, Tz::UTC, false));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .map_err(|_| invalid(format!("invalid date-time {value}")))?;
    Ok((naive, tz, false))
}

fn parse_instant(prop: &Property, default_tz: Tz) -> Result<DateTime<Utc>, EngineError> {
    let (naive, tz, _) = parse_time(prop, default_tz)?;
    Ok(localize(tz, naive))
}

/// Durée ISO 8601 (`P1W`, `P1DT12H`, `PT30M`...) en minutes murales.
fn parse_duration(value: &str) -> Result<i64, EngineError> {
    let err = || invalid(format!("invalid duration {value}"));
    let body = value.strip_prefix('P').ok_or_else(err)?;
    let mut minutes = 0i64;
    let mut number = String::new();
    let mut in_time = false;
    for c in body.chars() {
        match c {
            'T' => in_time = true,
            '0'..='9' => number.push(c),
            unit => {
                let n: i64 = number.parse().map_err(|_| err())?;
                number.clear();
                let unit_minutes = match (unit, in_time) {
                    ('W', false) => 7 * 24 * 60,
                    ('D', false) => 24 * 60,
                    ('H', true) => 60,
                    ('M', true) => 1,
                    ('S', true) => {
                        minutes = minutes.checked_add(n / 60).ok_or_else(err)?;
                        continue;
                    }
                    _ => return Err(err()),
                };
                minutes = n
                    .checked_mul(unit_minutes)
                    .and_then(|m| minutes.checked_add(m))
                    .ok_or_else(err)?;
            }
        }
    }
    if !number.is_empty() {
        return Err(err());
    }
    Ok(minutes)
}

fn parse_weekday(code: &str) -> Result<Weekday, EngineError> {
    match code {
        "MO" => Ok(Weekday::Mon),
        "TU" => Ok(Weekday::Tue),
        "WE" => Ok(Weekday::Wed),
        "TH" => Ok(Weekday::Thu),
        "FR" => Ok(Weekday::Fri),
        "SA" => Ok(Weekday::Sat),
        "SU" => Ok(Weekday::Sun),
        other => Err(invalid(format!("unsupported BYDAY value {other}"))),
    }
}

/// `[L2] alice, bob` -> (2, [alice, bob]).
fn parse_summary(summary: &str) -> (i32, Vec<UserId>) {
    let mut priority = 0;
    let mut rest = summary.trim();
    if let Some(tail) = rest.strip_prefix("[L") {
        if let Some((level, after)) = tail.split_once(']') {
            if let Ok(level) = level.parse::<i32>() {
                priority = level;
                rest = after.trim();
            }
        }
    }
    let users = rest
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(UserId::new)
        .collect();
    (priority, users)
}

#[derive(Debug)]
struct Rule {
    frequency: Frequency,
    interval: u32,
    count: Option<u64>,
    until: Option<DateTime<Utc>>,
    by_day: Vec<Weekday>,
}

fn parse_rrule(value: &str, tz: Tz) -> Result<Rule, EngineError> {
    let mut rule = Rule {
        frequency: Frequency::Daily,
        interval: 1,
        count: None,
        until: None,
        by_day: Vec::new(),
    };
    let mut has_freq = false;
    for part in value.split(';').filter(|p| !p.is_empty()) {
        let (key, val) = part
            .split_once('=')
            .ok_or_else(|| invalid(format!("invalid RRULE part {part}")))?;
        match key.to_ascii_uppercase().as_str() {
            "FREQ" => {
                has_freq = true;
                rule.frequency = match val.to_ascii_uppercase().as_str() {
                    "HOURLY" => Frequency::Hourly,
                    "DAILY" => Frequency::Daily,
                    "WEEKLY" => Frequency::Weekly,
                    "MONTHLY" => Frequency::Monthly,
                    other => return Err(invalid(format!("unsupported FREQ {other}"))),
                };
            }
            "INTERVAL" => {
                rule.interval = val
                    .parse()
                    .map_err(|_| invalid(format!("invalid INTERVAL {val}")))?;
            }
            "COUNT" => {
                rule.count = Some(
                    val.parse()
                        .map_err(|_| invalid(format!("invalid COUNT {val}")))?,
                );
            }
            "UNTIL" => {
                let prop = Property {
                    name: "UNTIL".into(),
                    params: Vec::new(),
                    value: val.to_string(),
                };
                rule.until = Some(parse_instant(&prop, tz)?);
            }
            "BYDAY" => {
                rule.by_day = val
                    .split(',')
                    .map(|d| parse_weekday(d.trim().to_ascii_uppercase().as_str()))
                    .collect::<Result<_, _>>()?;
            }
            "WKST" => {}
            other => return Err(invalid(format!("unsupported RRULE part {other}"))),
        }
    }
    if !has_freq {
        return Err(invalid("RRULE without FREQ"));
    }
    Ok(rule)
}

/// Chaque VEVENT du calendrier principal devient une couche de rotation.
pub fn parse_rotations(raw: &str) -> Result<Vec<RotationLayer>, EngineError> {
    let (default_tz, events) = parse_calendar(raw)?;
    let mut layers = Vec::with_capacity(events.len());

    for (i, event) in events.iter().enumerate() {
        let id = event
            .get("UID")
            .map(|p| p.value.clone())
            .unwrap_or_else(|| format!("event-{i}"));
        let summary = event.get("SUMMARY").map(|p| p.value.as_str()).unwrap_or("");
        let (priority, participants) = parse_summary(summary);

        let dtstart = event
            .get("DTSTART")
            .ok_or_else(|| invalid(format!("event {id} has no DTSTART")))?;
        let (start, tz, all_day) = parse_time(dtstart, default_tz)?;

        let duration_minutes = if let Some(end) = event.get("DTEND") {
            let end = parse_instant(end, default_tz)?.with_timezone(&tz).naive_local();
            (end - start).num_minutes()
        } else if let Some(duration) = event.get("DURATION") {
            parse_duration(&duration.value)?
        } else if all_day {
            24 * 60
        } else {
            return Err(invalid(format!("event {id} has neither DTEND nor DURATION")));
        };

        let rule = match event.get("RRULE") {
            Some(prop) => parse_rrule(&prop.value, tz)?,
            None => Rule {
                frequency: Frequency::Daily,
                interval: 1,
                count: Some(1),
                until: None,
                by_day: Vec::new(),
            },
        };

        layers.push(RotationLayer {
            id,
            name: summary.to_string(),
            priority,
            timezone: tz,
            start,
            frequency: rule.frequency,
            interval: rule.interval,
            duration_minutes,
            until: rule.until,
            count: rule.count,
            by_day: rule.by_day,
            participants,
            restrictions: Vec::new(),
        });
    }
    Ok(layers)
}

/// Chaque VEVENT du calendrier d'overrides devient un override exact.
pub fn parse_overrides(raw: &str) -> Result<Vec<OverrideShift>, EngineError> {
    let (default_tz, events) = parse_calendar(raw)?;
    let mut out = Vec::with_capacity(events.len());

    for (i, event) in events.iter().enumerate() {
        let id = event
            .get("UID")
            .map(|p| p.value.clone())
            .unwrap_or_else(|| format!("override-{i}"));
        if event.get("RRULE").is_some() {
            return Err(invalid(format!("override {id} must not recur")));
        }
        let start = event
            .get("DTSTART")
            .ok_or_else(|| invalid(format!("override {id} has no DTSTART")))
            .and_then(|p| parse_instant(p, default_tz))?;
        let end = match (event.get("DTEND"), event.get("DURATION")) {
            (Some(p), _) => parse_instant(p, default_tz)?,
            (None, Some(p)) => chrono::Duration::try_minutes(parse_duration(&p.value)?)
                .and_then(|d| start.checked_add_signed(d))
                .ok_or_else(|| invalid(format!("override {id} ends out of range")))?,
            (None, None) => return Err(invalid(format!("override {id} has no end"))),
        };
        let summary = event.get("SUMMARY").map(|p| p.value.as_str()).unwrap_or("");
        let (_, users) = parse_summary(summary);

        out.push(OverrideShift {
            id: ShiftId::new(id),
            start,
            end,
            user: users.into_iter().next(),
        });
    }
    Ok(out)
}
