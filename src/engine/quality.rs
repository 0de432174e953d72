//! Score de qualité d'un planning sur une fenêtre.
//!
//! Le score (0–100) combine, à poids fixes, la part de la fenêtre couverte et
//! l'équilibre de la charge entre participants :
//!
//! `score = 100 × (GAP_WEIGHT × (1 − gap_ratio) + BALANCE_WEIGHT × (1 − imbalance))`
//!
//! `imbalance` est la distance en variation totale entre la répartition
//! observée et la répartition égale, normalisée dans [0, 1].

use super::types::FinalEvent;
use crate::model::UserId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

pub const GAP_WEIGHT: f64 = 0.5;
pub const BALANCE_WEIGHT: f64 = 0.5;
/// Part au-delà de la part idéale à partir de laquelle un utilisateur est surchargé.
pub const OVERLOAD_THRESHOLD: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserLoad {
    pub id: UserId,
    pub seconds: i64,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_score: u8,
    pub gap_seconds: i64,
    pub gap_ratio: f64,
    pub balance_variance: f64,
    pub imbalance: f64,
    pub users: Vec<UserLoad>,
    pub overloaded_users: Vec<UserId>,
    pub comments: Vec<String>,
}

/// Calcule le rapport à partir d'une timeline couvrant toute la fenêtre.
///
/// `participants` liste les utilisateurs censés partager la charge ; ceux qui
/// n'apparaissent dans aucun événement comptent avec une charge nulle.
pub fn build_report(
    events: &[FinalEvent],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    participants: &[UserId],
) -> QualityReport {
    let window_seconds = (window_end - window_start).num_seconds().max(1);

    let mut load: BTreeMap<UserId, i64> = participants.iter().map(|u| (u.clone(), 0)).collect();
    let mut covered = 0i64;
    for event in events {
        let start = event.start.max(window_start);
        let end = event.end.min(window_end);
        if end <= start {
            continue;
        }
        let seconds = (end - start).num_seconds();
        if let Some(user) = event.user() {
            covered += seconds;
            *load.entry(user.id.clone()).or_insert(0) += seconds;
        }
    }

    let gap_seconds = (window_seconds - covered).max(0);
    let gap_ratio = gap_seconds as f64 / window_seconds as f64;

    let n = load.len();
    let assigned: i64 = load.values().sum();
    let ideal = if n > 0 { 1.0 / n as f64 } else { 0.0 };
    let users: Vec<UserLoad> = load
        .into_iter()
        .map(|(id, seconds)| UserLoad {
            id,
            seconds,
            share: if assigned > 0 {
                seconds as f64 / assigned as f64
            } else {
                0.0
            },
        })
        .collect();

    let (balance_variance, imbalance) = if n > 1 && assigned > 0 {
        let variance = users.iter().map(|u| (u.share - ideal).powi(2)).sum::<f64>() / n as f64;
        let distance = users.iter().map(|u| (u.share - ideal).abs()).sum::<f64>() / 2.0;
        (variance, (distance / (1.0 - ideal)).clamp(0.0, 1.0))
    } else {
        (0.0, 0.0)
    };

    let overloaded_users: Vec<UserId> = if n > 1 && assigned > 0 {
        users
            .iter()
            .filter(|u| u.share > ideal * (1.0 + OVERLOAD_THRESHOLD))
            .map(|u| u.id.clone())
            .collect()
    } else {
        Vec::new()
    };

    let score = 100.0 * (GAP_WEIGHT * (1.0 - gap_ratio) + BALANCE_WEIGHT * (1.0 - imbalance));
    let total_score = score.round().clamp(0.0, 100.0) as u8;

    let mut comments = Vec::new();
    if gap_seconds > 0 {
        comments.push(format!(
            "Schedule has gaps ({:.0}% not covered)",
            gap_ratio * 100.0
        ));
    } else {
        comments.push("Schedule has no gaps".to_string());
    }
    if imbalance > 0.0 {
        comments.push("Schedule has balance issues".to_string());
    } else {
        comments.push("Schedule is perfectly balanced".to_string());
    }
    if !overloaded_users.is_empty() {
        comments.push(format!(
            "{} overloaded user(s)",
            overloaded_users.len()
        ));
    }

    QualityReport {
        window_start,
        window_end,
        total_score,
        gap_seconds,
        gap_ratio,
        balance_variance,
        imbalance,
        users,
        overloaded_users,
        comments,
    }
}
