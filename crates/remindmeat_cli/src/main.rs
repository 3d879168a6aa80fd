//! `remindmeat` command line front end.
//!
//! # Responsibility
//! - Drive the reminder core against the durable SQLite gateway.
//! - Keep output line-oriented so it can be piped and diffed.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use remindmeat_core::{
    init_from_config, with_configured_timeout, AlertPolicy, AlertResolution, Coordinate,
    CoreConfig, CoreError, CreateReminderRequest, GatewayEventSender, NotificationGateway,
    ReconciliationEngine, Reminder, ReminderCore, ReminderCoreHandle, ReminderId, SqliteGateway,
    TriggerEdge,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

const DEFAULT_DB_FILE: &str = "remindmeat.db";

#[derive(Debug, Parser)]
#[command(name = "remindmeat", version, about = "Location-triggered reminders")]
struct Cli {
    /// JSON config file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Registration store; overrides `gateway.database_path`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Arm a new reminder.
    Add {
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Radius in meters.
        #[arg(long, default_value_t = 100.0)]
        radius: f64,
        /// entry | exit | both
        #[arg(long, default_value = "entry")]
        edge: TriggerEdge,
        /// Keep the reminder armed after it fires.
        #[arg(long)]
        repeats: bool,
    },
    /// Print pending reminders in arming order.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Disarm one reminder.
    Delete { id: ReminderId },
    /// Disarm every reminder not listed.
    Prune {
        #[arg(long = "keep")]
        keep: Vec<ReminderId>,
    },
    /// Report a location sample and acknowledge the alerts it fires.
    Locate {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, value_enum, default_value_t = AckArg::Keep)]
        ack: AckArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AckArg {
    Keep,
    Dismiss,
}

impl From<AckArg> for AlertResolution {
    fn from(value: AckArg) -> Self {
        match value {
            AckArg::Keep => Self::Keep,
            AckArg::Dismiss => Self::Dismiss,
        }
    }
}

struct Session {
    /// Unbounded handle for local location evaluation.
    gateway: Arc<SqliteGateway>,
    handle: ReminderCoreHandle,
    task: JoinHandle<ReconciliationEngine<Arc<dyn NotificationGateway>>>,
}

impl Session {
    async fn start(mut config: CoreConfig, db_override: Option<PathBuf>) -> Result<Self> {
        let db_path = db_override
            .or_else(|| config.gateway.database_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE));
        // One location sample can fire several reminders; print all of them.
        config.alert_policy = AlertPolicy::Queue;

        let (sender, events) = GatewayEventSender::channel();
        let gateway = SqliteGateway::open(&db_path, &config.gateway)
            .with_context(|| {
                format!("failed to open registration store `{}`", db_path.display())
            })?
            .with_event_sender(sender);
        let gateway = Arc::new(gateway);
        let bounded = with_configured_timeout(Arc::clone(&gateway), &config.gateway);
        let engine = ReconciliationEngine::new(bounded, &config);
        let (handle, task) = ReminderCore::spawn(engine, events);

        handle
            .load()
            .await
            .context("failed to load pending reminders")?;
        Ok(Self {
            gateway,
            handle,
            task,
        })
    }

    async fn finish(self) -> Result<()> {
        drop(self.handle);
        self.task.await.context("reminder core task failed")?;
        Ok(())
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<CoreConfig> {
    match path {
        Some(path) => CoreConfig::load(path)
            .with_context(|| format!("failed to load config `{}`", path.display())),
        None => Ok(CoreConfig::default()),
    }
}

fn print_reminder(reminder: &Reminder) {
    println!(
        "{}\t{:.6},{:.6}\t{}m\t{}\t{}\t{}",
        reminder.id,
        reminder.region.center.latitude,
        reminder.region.center.longitude,
        reminder.region.radius_m,
        reminder.region.trigger_edge.as_str(),
        if reminder.repeats { "repeats" } else { "once" },
        reminder.title
    );
}

async fn add(session: &Session, request: CreateReminderRequest) -> Result<()> {
    match session.handle.request_authorization().await {
        Ok(_) => {}
        Err(CoreError::AuthorizationDenied) => {
            bail!("notification permission denied; reminders cannot be armed")
        }
        Err(err) => return Err(err).context("authorization request failed"),
    }
    let reminder = session
        .handle
        .create_reminder_with(request)
        .await
        .context("failed to create reminder")?;
    print_reminder(&reminder);
    Ok(())
}

async fn prune(session: &Session, keep: Vec<ReminderId>) -> Result<()> {
    let current = session.handle.observe_pending_reminders().borrow().clone();
    let unknown: Vec<String> = keep
        .iter()
        .filter(|id| !current.iter().any(|reminder| reminder.id == **id))
        .map(ToString::to_string)
        .collect();
    if !unknown.is_empty() {
        bail!("unknown reminder ids: {}", unknown.join(", "));
    }

    let kept: Vec<Reminder> = current
        .into_iter()
        .filter(|reminder| keep.contains(&reminder.id))
        .collect();
    let report = session
        .handle
        .replace_reminder_list(kept)
        .await
        .context("bulk replace failed")?;

    for id in &report.removed {
        println!("removed\t{id}");
    }
    for (id, err) in &report.failed {
        eprintln!("failed\t{id}\t{err}");
    }
    if !report.is_complete() {
        bail!("{} reminder(s) could not be disarmed", report.failed.len());
    }
    Ok(())
}

async fn locate(session: &Session, point: Coordinate, ack: AckArg) -> Result<()> {
    let fired = session
        .gateway
        .report_location(point)
        .context("failed to evaluate location")?;
    info!(
        "event=cli_locate module=cli status=ok fired_count={}",
        fired.len()
    );

    // Deliveries are applied before the next command, so a round-trip flushes them.
    session
        .handle
        .load()
        .await
        .context("failed to flush deliveries")?;

    let alerts = session.handle.observe_alert();
    for _ in 0..fired.len() {
        let Some(event) = alerts.borrow().clone() else {
            break;
        };
        println!(
            "alert\t{}\t{}\t{}",
            event.reminder_id, event.fired_at_ms, event.reminder.title
        );
        session
            .handle
            .acknowledge_alert(ack.into())
            .await
            .context("failed to acknowledge alert")?;
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    init_from_config(&config.logging).context("failed to start logging")?;
    let session = Session::start(config, cli.db).await?;

    match cli.command {
        Command::Add {
            title,
            lat,
            lon,
            radius,
            edge,
            repeats,
        } => {
            let mut request =
                CreateReminderRequest::new(title, Coordinate::new(lat, lon), radius, edge);
            if repeats {
                request = request.repeating(true);
            }
            add(&session, request).await?;
        }
        Command::List { json } => {
            let reminders = session.handle.observe_pending_reminders().borrow().clone();
            if json {
                println!("{}", serde_json::to_string_pretty(&reminders)?);
            } else {
                reminders.iter().for_each(print_reminder);
            }
        }
        Command::Delete { id } => {
            session
                .handle
                .delete_reminder(id)
                .await
                .with_context(|| format!("failed to delete {id}"))?;
        }
        Command::Prune { keep } => prune(&session, keep).await?,
        Command::Locate { lat, lon, ack } => {
            locate(&session, Coordinate::new(lat, lon), ack).await?;
        }
    }

    session.finish().await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    run(Cli::parse()).await
}
