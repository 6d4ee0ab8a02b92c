//! fraudsim - operator console for the fraud-awareness checkout simulation
//!
//! Lists live sessions, runs sweeps and interventions, and follows the live
//! dashboard from the terminal.

mod render;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fraudsim_core::{
    AdminDashboardController, AllowListCheck, ChangeFeed, CleanupScheduler, Config, Database,
    GuidanceKind, InterventionController, OperatorCheck, SessionQueryService, SessionStore,
};

#[derive(Parser)]
#[command(name = "fraudsim")]
#[command(about = "Monitor and steer fraud-awareness simulation sessions")]
#[command(version)]
struct Args {
    /// Operator reference (email) recorded on interventions
    #[arg(long, global = true, env = "FRAUDSIM_ACTOR")]
    actor: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List live sessions
    Sessions {
        /// Include operator sessions
        #[arg(long)]
        all: bool,

        /// Maximum number of sessions to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one session with its captured fields
    Detail { session: String },

    /// Mark stale sessions inactive
    Sweep {
        /// Deactivate every active session, ignoring the liveness window
        #[arg(long)]
        force: bool,
    },

    /// List unresolved alerts
    Alerts,

    /// Resolve an alert
    Resolve { alert: String },

    /// Score a session's captured data
    Analyze { session: String },

    /// Send guidance to a participant
    Guide {
        session: String,
        message: String,

        /// hint or warning
        #[arg(long, default_value = "hint")]
        kind: String,
    },

    /// Nudge a participant
    Nudge { session: String },

    /// Ask a participant's flow to start over
    Restart { session: String },

    /// Raise an alert if the session is high risk
    CheckAlerts { session: String },

    /// Show recent operator activity
    Activity {
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Follow the live dashboard until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        fraudsim_core::logging::init(&config.logging).context("failed to initialize logging")?;

    // Open database
    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    let store: Arc<dyn SessionStore> = Arc::new(db);

    let check = AllowListCheck::new(config.tracking.operator_emails.clone());
    let query = SessionQueryService::new(store.clone(), config.tracking.clone());

    match args.command {
        Command::Sessions { all, limit, json } => {
            let limit = limit.unwrap_or(config.dashboard.session_limit);
            let views = if all {
                query.list_active(limit)
            } else {
                query.list_participant_sessions(limit)
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else {
                render::print_sessions(&views);
            }
        }
        Command::Detail { session } => {
            let detail = query
                .session_detail(&session)
                .with_context(|| format!("no session found matching '{}'", session))?;
            render::print_detail(&detail);
        }
        Command::Sweep { force } => {
            let actor = authorize(args.actor.as_deref(), &check)?;
            let cleanup = CleanupScheduler::new(store.clone(), &config.tracking);
            let count = if force {
                cleanup.force_sweep()
            } else {
                cleanup.run_liveness_sweep()
            }
            .context("sweep failed")?;
            tracing::info!(actor = %actor, force, count, "Sweep requested");
            println!("Deactivated {} session(s)", count);
        }
        Command::Alerts => {
            render::print_alerts(&query.list_active_alerts());
        }
        Command::Resolve { alert } => {
            let controller = controller(&store, args.actor.as_deref(), &check)?;
            let resolved = controller
                .resolve_alert(&alert)
                .with_context(|| format!("failed to resolve alert '{}'", alert))?;
            println!(
                "Alert {} resolved by {}",
                resolved.id,
                resolved.resolved_by.as_deref().unwrap_or("-")
            );
        }
        Command::Analyze { session } => {
            let controller = controller(&store, args.actor.as_deref(), &check)?;
            let assessment = controller
                .analyze(&session)
                .with_context(|| format!("failed to analyze session '{}'", session))?;
            render::print_assessment(&assessment);
        }
        Command::Guide {
            session,
            message,
            kind,
        } => {
            let kind: GuidanceKind = kind.parse().map_err(anyhow::Error::msg)?;
            if !matches!(kind, GuidanceKind::Hint | GuidanceKind::Warning) {
                anyhow::bail!("guidance kind must be 'hint' or 'warning'");
            }
            let controller = controller(&store, args.actor.as_deref(), &check)?;
            let guidance = controller
                .send_guidance(&session, &message, kind)
                .with_context(|| format!("failed to send guidance to '{}'", session))?;
            println!("Queued {} {}", guidance.kind.as_str(), guidance.id);
        }
        Command::Nudge { session } => {
            let controller = controller(&store, args.actor.as_deref(), &check)?;
            let guidance = controller
                .nudge(&session)
                .with_context(|| format!("failed to nudge '{}'", session))?;
            println!("Queued nudge {}", guidance.id);
        }
        Command::Restart { session } => {
            let controller = controller(&store, args.actor.as_deref(), &check)?;
            let guidance = controller
                .restart(&session)
                .with_context(|| format!("failed to restart '{}'", session))?;
            println!("Queued restart {}", guidance.id);
        }
        Command::CheckAlerts { session } => {
            let controller = controller(&store, args.actor.as_deref(), &check)?;
            let alerts = controller
                .check_alerts(&session)
                .with_context(|| format!("failed to check alerts for '{}'", session))?;
            render::print_alerts(&alerts);
        }
        Command::Activity { limit } => {
            let limit = limit.unwrap_or(config.dashboard.activity_limit);
            render::print_activity(&query.list_recent_activity(limit));
        }
        Command::Watch => {
            let actor = authorize(args.actor.as_deref(), &check)?;
            watch(store, query, &config, &actor, &check).await?;
        }
    }

    Ok(())
}

/// The actor, if it passes the operator check.
fn authorize(actor: Option<&str>, check: &dyn OperatorCheck) -> Result<String> {
    let actor = actor.context("this command needs --actor <operator email>")?;
    if !check.is_operator(actor) {
        anyhow::bail!("'{}' is not an operator", actor);
    }
    Ok(actor.to_string())
}

fn controller(
    store: &Arc<dyn SessionStore>,
    actor: Option<&str>,
    check: &dyn OperatorCheck,
) -> Result<InterventionController> {
    let actor = authorize(actor, check)?;
    Ok(InterventionController::new(store.clone(), Some(actor)))
}

async fn watch(
    store: Arc<dyn SessionStore>,
    query: SessionQueryService,
    config: &Config,
    actor: &str,
    check: &dyn OperatorCheck,
) -> Result<()> {
    let _cleanup = config.cleanup.enabled.then(|| {
        CleanupScheduler::new(store.clone(), &config.tracking).spawn(config.cleanup.interval())
    });

    let dashboard = AdminDashboardController::new(
        Arc::new(query),
        ChangeFeed::new(store),
        config.dashboard.clone(),
    );
    let handle = dashboard
        .start(actor, check)
        .context("failed to start dashboard")?;
    let mut snapshots = handle.subscribe();

    println!("Watching live sessions (Ctrl-C to stop)");
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                render::print_snapshot(&snapshot);
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    tracing::info!("Dashboard watch stopped");
    handle.stop();
    Ok(())
}
