#![forbid(unsafe_code)]
//! Astreinte engine : évaluation des plannings d'astreinte.
//!
//! - Expansion paresseuse des rotations (heure murale, fuseaux IANA).
//! - Résolution des couches : overrides > priorité > ordre de déclaration.
//! - Échanges de gardes appliqués à la lecture, jamais mis en cache.
//! - Tout en UTC dans la lib ; affichage local en dehors.

pub mod cache;
pub mod config;
pub mod engine;
pub mod io;
pub mod model;
pub mod provider;
pub mod source;
pub mod storage;

pub use cache::{CacheKey, ScheduleCache};
pub use config::EngineConfig;
pub use engine::{
    Engine, EngineError, EvaluationContext, FilterBy, FinalEvent, GapCheck, QualityReport,
    QueryWindow, ResolveOptions, UserShifts,
};
pub use model::{
    Frequency, OverrideShift, Person, RotationLayer, ScheduleDefinition, ScheduleId,
    ShiftSwapRequest, SwapStatus, UserId,
};
pub use provider::{ScheduleSourceProvider, SwapProvider, UserDirectory};
pub use source::{ScheduleSource, SourceKind};
pub use storage::{JsonStorage, Storage, Workspace};
