#![forbid(unsafe_code)]
use anyhow::{bail, Context, Result};
use astreinte_engine::{
    engine::{Engine, FilterBy, QueryWindow, ResolveOptions},
    io,
    model::{ScheduleId, UserId},
    source::SourceKind,
    storage::{JsonStorage, Storage, Workspace},
    EngineConfig,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "logging")]
use tracing_subscriber::{fmt::Subscriber, EnvFilter};

/// Évaluation de plannings d'astreinte sur un espace de travail JSON
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Active les logs (feature `logging`)
    #[arg(long, global = true)]
    log: bool,

    /// Fichier JSON de l'espace de travail
    #[arg(long, global = true, default_value = "workspace.json")]
    workspace: String,

    /// Configuration JSON du moteur (optionnelle)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Événements d'un planning sur des jours locaux
    Events {
        #[arg(long)]
        schedule: String,
        /// rotation | override | final ; absent = timeline finale avec swaps
        #[arg(long = "type")]
        filter: Option<String>,
        /// YYYY-MM-DD, premier jour local
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, default_value_t = 1)]
        days: u32,
        #[arg(long, default_value = "UTC")]
        tz: String,
        /// Uniquement avec `--type` ; la timeline finale les inclut déjà
        #[arg(long, requires = "filter")]
        with_empty: bool,
        #[arg(long, requires = "filter")]
        with_gap: bool,
        /// Inclut priorité et créneaux sources
        #[arg(long)]
        shift_info: bool,
        #[arg(long)]
        out_csv: Option<String>,
        #[arg(long)]
        out_json: Option<String>,
    },

    /// Gardes passées / en cours / à venir d'un utilisateur
    Shifts {
        #[arg(long)]
        schedule: String,
        #[arg(long)]
        user: String,
        /// RFC3339, défaut : maintenant
        #[arg(long)]
        now: Option<String>,
        #[arg(long, default_value_t = 7)]
        days: u32,
    },

    /// Prochaine garde de chaque participant
    NextShifts {
        #[arg(long)]
        schedule: String,
        #[arg(long)]
        now: Option<String>,
        #[arg(long)]
        days: Option<u32>,
    },

    /// Rapport de qualité (code 2 si trous)
    Quality {
        #[arg(long)]
        schedule: String,
        /// RFC3339 ou YYYY-MM-DD (minuit UTC)
        #[arg(long)]
        start: String,
        #[arg(long)]
        days: Option<u32>,
    },

    /// Participants des rotations
    RelatedUsers {
        #[arg(long)]
        schedule: String,
    },

    /// Demandes d'échange intersectant une fenêtre
    Swaps {
        #[arg(long)]
        schedule: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },

    /// Invalide le cache puis contrôle la couverture (code 2 si trous)
    Reload {
        #[arg(long)]
        schedule: String,
        #[arg(long)]
        now: Option<String>,
    },

    /// Utilisateurs d'astreinte à un instant
    Oncall {
        /// liste "s1,s2,..."
        #[arg(long)]
        schedules: String,
        #[arg(long)]
        at: Option<String>,
    },

    /// Importer des utilisateurs depuis un CSV
    ImportUsers {
        #[arg(long)]
        csv: String,
    },

    /// Importer des overrides dans un planning web
    ImportOverrides {
        #[arg(long)]
        schedule: String,
        #[arg(long)]
        csv: String,
    },
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid date/datetime: {raw}"))?;
    Ok(Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN)))
}

fn instant_or_now(raw: Option<&str>) -> Result<DateTime<Utc>> {
    raw.map_or_else(|| Ok(Utc::now()), parse_instant)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    #[cfg(feature = "logging")]
    if cli.log {
        let _ = Subscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let storage = JsonStorage::open(&cli.workspace)?;
    let mut workspace = if storage.path().exists() {
        storage.load()?
    } else {
        Workspace::default()
    };

    // commandes d'écriture : pas besoin du moteur
    match &cli.cmd {
        Commands::ImportUsers { csv } => {
            let users = io::import_users_csv(csv)?;
            let count = users.len();
            workspace.upsert_users(users);
            storage.save(&workspace)?;
            println!("imported {count} user(s)");
            std::process::exit(0);
        }
        Commands::ImportOverrides { schedule, csv } => {
            let shifts = io::import_overrides_csv(csv)?;
            let count = shifts.len();
            let id = ScheduleId::new(schedule);
            let source = workspace
                .find_schedule_mut(&id)
                .ok_or_else(|| anyhow::anyhow!("unknown schedule: {id}"))?;
            match &mut source.kind {
                SourceKind::Web { overrides, .. } => overrides.extend(shifts),
                _ => bail!("overrides can only be imported into a web schedule"),
            }
            storage.save(&workspace)?;
            println!("imported {count} override(s) into {id}");
            std::process::exit(0);
        }
        _ => {}
    }

    let engine = Engine::new(Arc::new(workspace)).with_config(config);

    let code = match cli.cmd {
        Commands::Events {
            schedule,
            filter,
            date,
            days,
            tz,
            with_empty,
            with_gap,
            shift_info,
            out_csv,
            out_json,
        } => {
            let schedule = ScheduleId::new(schedule);
            let tz: Tz = tz
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid timezone {tz}: {e}"))?;
            let window = QueryWindow::local_days(date, tz, days)?;
            let events = match filter {
                None => engine.final_events(&schedule, window.start, window.end, shift_info)?,
                Some(raw) => {
                    let filter_by: FilterBy = raw.parse()?;
                    let opts = ResolveOptions {
                        filter_by: Some(filter_by),
                        with_empty,
                        with_gap,
                        include_shift_info: shift_info,
                    };
                    engine.resolve(&schedule, window.start, window.end, opts)?
                }
            };
            if let Some(path) = out_json {
                io::export_events_json(path, &events)?;
            }
            if let Some(path) = out_csv {
                io::export_events_csv(path, &events)?;
            }
            print_json(&events)?;
            0
        }
        Commands::Shifts {
            schedule,
            user,
            now,
            days,
        } => {
            let now = instant_or_now(now.as_deref())?;
            let shifts = engine.current_and_next_shifts(
                &ScheduleId::new(schedule),
                &UserId::new(user),
                now,
                days,
            )?;
            print_json(&shifts)?;
            0
        }
        Commands::NextShifts {
            schedule,
            now,
            days,
        } => {
            let now = instant_or_now(now.as_deref())?;
            let next = engine.next_shifts_per_user(&ScheduleId::new(schedule), now, days)?;
            print_json(&next)?;
            0
        }
        Commands::Quality {
            schedule,
            start,
            days,
        } => {
            let start = parse_instant(&start)?;
            let report = engine.quality_report(&ScheduleId::new(schedule), start, days)?;
            print_json(&report)?;
            // Code 2 = WARNING/INCOMPLETE
            if report.gap_seconds > 0 {
                2
            } else {
                0
            }
        }
        Commands::RelatedUsers { schedule } => {
            let users = engine.related_users(&ScheduleId::new(schedule))?;
            print_json(&users)?;
            0
        }
        Commands::Swaps {
            schedule,
            start,
            end,
        } => {
            let swaps = engine.filter_shift_swaps(
                &ScheduleId::new(schedule),
                parse_instant(&start)?,
                parse_instant(&end)?,
            )?;
            print_json(&swaps)?;
            0
        }
        Commands::Reload { schedule, now } => {
            let now = instant_or_now(now.as_deref())?;
            let check = engine.reload(&ScheduleId::new(schedule), now)?;
            print_json(&check)?;
            if check.has_gaps || check.has_empty_shifts {
                2
            } else {
                0
            }
        }
        Commands::Oncall { schedules, at } => {
            let at = instant_or_now(at.as_deref())?;
            let ids: Vec<ScheduleId> = schedules
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ScheduleId::new)
                .collect();
            if ids.is_empty() {
                bail!("no schedule given");
            }
            let ctx = engine.context(ids, at);
            print_json(ctx.oncall_users()?)?;
            0
        }
        Commands::ImportUsers { .. } | Commands::ImportOverrides { .. } => 0,
    };

    std::process::exit(code);
}
