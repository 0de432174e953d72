//! Sources brutes des plannings et normalisation en `ScheduleDefinition`.
//!
//! Trois genres de plannings partagent la même interface d'expansion :
//! composés dans l'interface web, poussés par API (JSON brut) ou importés
//! depuis un calendrier iCalendar.

pub mod ical;

use crate::engine::EngineError;
use crate::model::{OverrideLayer, OverrideShift, RotationLayer, ScheduleDefinition, ScheduleId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Définition brute d'un planning, telle que stockée.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSource {
    pub id: ScheduleId,
    pub name: String,
    #[serde(flatten)]
    pub kind: SourceKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source_kind", rename_all = "snake_case")]
pub enum SourceKind {
    Web {
        #[serde(default)]
        rotations: Vec<RotationLayer>,
        #[serde(default)]
        overrides: Vec<OverrideShift>,
    },
    Api {
        payload: serde_json::Value,
    },
    Calendar {
        primary: String,
        #[serde(default)]
        overrides: Option<String>,
    },
}

/// Empreinte du contenu brut : change dès que la source change.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentRevision(String);

impl ContentRevision {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Deserialize)]
struct ApiPayload {
    #[serde(default)]
    rotations: Vec<RotationLayer>,
    #[serde(default)]
    overrides: Vec<OverrideShift>,
}

impl ScheduleSource {
    pub fn web(
        id: ScheduleId,
        name: impl Into<String>,
        rotations: Vec<RotationLayer>,
        overrides: Vec<OverrideShift>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind: SourceKind::Web {
                rotations,
                overrides,
            },
        }
    }

    pub fn content_revision(&self) -> Result<ContentRevision, EngineError> {
        let bytes = serde_json::to_vec(&self.kind).map_err(anyhow::Error::from)?;
        let digest = Sha256::digest(&bytes);
        Ok(ContentRevision(
            digest.iter().map(|b| format!("{b:02x}")).collect(),
        ))
    }

    /// Normalise la source en couches prêtes à expanser.
    pub fn definition(&self) -> Result<ScheduleDefinition, EngineError> {
        let (rotations, overrides) = match &self.kind {
            SourceKind::Web {
                rotations,
                overrides,
            } => (rotations.clone(), overrides.clone()),
            SourceKind::Api { payload } => {
                let parsed: ApiPayload = serde_json::from_value(payload.clone())
                    .map_err(|e| EngineError::InvalidSource(format!("api payload: {e}")))?;
                (parsed.rotations, parsed.overrides)
            }
            SourceKind::Calendar { primary, overrides } => {
                let rotations = ical::parse_rotations(primary)?;
                let overrides = match overrides {
                    Some(raw) => ical::parse_overrides(raw)?,
                    None => Vec::new(),
                };
                (rotations, overrides)
            }
        };

        let mut seen = HashSet::new();
        for layer in &rotations {
            if !seen.insert(layer.id.as_str()) {
                return Err(EngineError::InvalidSource(format!(
                    "duplicate rotation id {}",
                    layer.id
                )));
            }
        }
        if let Some(bad) = overrides.iter().find(|o| o.end <= o.start) {
            return Err(EngineError::InvalidSource(format!(
                "override {} ends before it starts",
                bad.id.as_str()
            )));
        }

        Ok(ScheduleDefinition {
            id: self.id.clone(),
            name: self.name.clone(),
            rotations,
            overrides: OverrideLayer { shifts: overrides },
        })
    }
}
