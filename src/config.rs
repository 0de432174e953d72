use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Plafond accepté pour `max_window_days` (dix ans).
pub const MAX_WINDOW_DAYS: i64 = 3660;

/// Réglages du moteur d'évaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Étendue maximale d'une fenêtre de requête.
    pub max_window_days: i64,
    /// Recul pris par `current_and_next_shifts` pour les gardes passées.
    pub lookback_hours: i64,
    /// Capacité LRU du cache ; 0 désactive le cache.
    pub cache_capacity: usize,
    pub next_shifts_days: u32,
    pub quality_days: u32,
    pub gap_check_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_window_days: 93,
            lookback_hours: 24,
            cache_capacity: 256,
            next_shifts_days: 30,
            quality_days: 7,
            gap_check_days: 7,
        }
    }
}

impl EngineConfig {
    /// Charge une configuration JSON ; les champs absents gardent leur valeur par défaut.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = serde_json::from_slice(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        if !(1..=MAX_WINDOW_DAYS).contains(&config.max_window_days) {
            anyhow::bail!("max_window_days must be in 1..={MAX_WINDOW_DAYS}");
        }
        if !(0..=config.max_window_days * 24).contains(&config.lookback_hours) {
            anyhow::bail!("lookback_hours must be in 0..={}", config.max_window_days * 24);
        }
        Ok(config)
    }
}
