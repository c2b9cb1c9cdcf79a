use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{ApiServer, ApiState};
use crate::config::Config;
use crate::db::{self, SharedConnection};
use crate::invite::{Invite, InviteChangeEvent, Platform, SqliteInviteStore, TriggerPayload};
use crate::platform::WebDriverFactory;
use crate::runner::{RunReport, TaskRunner};
use crate::scheduler::{Dispatcher, ProcessTarget, ScheduleReconciler, SqliteTriggerBackend};
use crate::summary::delivery_from_config;
use crate::transcription;

pub mod args;

pub use args::{
    Cli, CliCommand, InviteAddArgs, InviteCliArgs, InviteCommand, ReconcileCliArgs, RunCliArgs,
};

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn reconciler_for(config: &Config, triggers: Arc<SqliteTriggerBackend>) -> ScheduleReconciler {
    ScheduleReconciler::new(
        triggers,
        config.scheduler.retry.clone(),
        config.scribe.lead_time_secs,
        config.scribe.name.clone(),
    )
}

pub async fn handle_serve(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    info!("Starting scribe service");

    let conn = db::shared(db::init_db()?);
    let triggers = Arc::new(SqliteTriggerBackend::new(conn));
    let reconciler = Arc::new(reconciler_for(&config, triggers.clone()));
    let cancel = CancellationToken::new();

    let api_server = ApiServer::new(
        &config.api,
        ApiState {
            reconciler,
            triggers: triggers.clone(),
        },
    );
    let api_cancel = cancel.child_token();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.start(api_cancel).await {
            error!("API server failed: {:#}", e);
        }
    });

    let dispatcher = Dispatcher::new(
        triggers,
        Arc::new(ProcessTarget::current_exe(config_path)?),
        Duration::from_secs(config.scheduler.poll_interval_secs),
    );
    let dispatcher_task = tokio::spawn(dispatcher.run(cancel.child_token()));

    info!("Scribe is ready!");
    info!(
        "Send change events with: curl -X POST http://{}:{}/events -H 'content-type: application/json' -d @event.json",
        config.api.host, config.api.port
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    cancel.cancel();

    let _ = tokio::join!(api_task, dispatcher_task);
    Ok(())
}

/// Parse a JSON-lines change feed. Blank lines are skipped.
pub fn parse_change_feed(content: &str) -> Result<Vec<InviteChangeEvent>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid change event on line {}", index + 1))
        })
        .collect()
}

pub async fn handle_reconcile(config: Config, args: ReconcileCliArgs) -> Result<()> {
    let content = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {:?}", args.file))?;
    let events = parse_change_feed(&content)?;

    let conn = db::shared(db::init_db()?);
    let reconciler = reconciler_for(&config, Arc::new(SqliteTriggerBackend::new(conn)));

    let mut failed = 0;
    for event in &events {
        match reconciler.apply(event).await {
            Ok(outcome) => println!("{}: {:?}", event.invite_id, outcome),
            Err(e) => {
                failed += 1;
                eprintln!("{}: {}", event.invite_id, e);
            }
        }
    }

    if failed > 0 {
        return Err(anyhow!("{} of {} events failed", failed, events.len()));
    }
    println!("Applied {} event(s)", events.len());
    Ok(())
}

pub async fn handle_run(config: Config, args: RunCliArgs) -> Result<()> {
    let raw = args
        .payload
        .context("No trigger payload: pass --payload or set SCRIBE_TRIGGER")?;
    let payload: TriggerPayload =
        serde_json::from_str(&raw).context("Failed to parse trigger payload")?;

    let conn = db::shared(db::init_db()?);
    let transcription = transcription::from_config(&config.transcription)?;
    let delivery = delivery_from_config(&config.delivery)?;
    let runner = TaskRunner::new(
        config.clone(),
        Arc::new(SqliteInviteStore::new(conn.clone())),
        Arc::new(SqliteTriggerBackend::new(conn)),
        Arc::new(WebDriverFactory::new(config.browser.clone())),
        transcription,
        delivery,
    );

    let cancel = runner.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    match runner.run(&payload).await? {
        RunReport::Abandoned { reason } => info!("Session abandoned: {}", reason),
        RunReport::Finished { status, summary } => info!(
            "Session {} ({})",
            status.as_str(),
            if summary.is_some() {
                "summary delivered"
            } else {
                "no summary"
            }
        ),
    }
    Ok(())
}

pub async fn handle_invite_command(config: Config, args: InviteCliArgs) -> Result<()> {
    let conn = db::shared(db::init_db()?);

    match args.command {
        InviteCommand::Add(add) => {
            let invite = invite_from_args(add)?;
            let id = invite.id.clone();
            apply_through_feed(&config, conn, |store| async move { store.create(&invite).await })
                .await?;
            println!("Invite {} created", id);
        }
        InviteCommand::List { limit } => {
            let invites = SqliteInviteStore::new(conn).list(limit).await?;
            if invites.is_empty() {
                println!("No invites.");
                return Ok(());
            }
            for invite in invites {
                let when = invite
                    .scheduled_time
                    .and_then(|t| chrono::DateTime::from_timestamp(t, 0))
                    .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "now".to_string());
                println!("ID: {}", invite.id);
                println!("Meeting: {} ({})", invite.name, invite.platform);
                println!("When: {}", when);
                println!("Status: {}", invite.status.as_str());
                println!("---");
            }
        }
        InviteCommand::Remove { id } => {
            let target = id.clone();
            let removed = apply_through_feed(&config, conn, |store| async move {
                store.delete(&target).await
            })
            .await?;
            if removed {
                println!("Invite {} removed", id);
            } else {
                return Err(anyhow!("Invite {} not found", id));
            }
        }
    }
    Ok(())
}

/// Run a store mutation and apply the change events it publishes.
async fn apply_through_feed<T, F, Fut>(config: &Config, conn: SharedConnection, op: F) -> Result<T>
where
    F: FnOnce(SqliteInviteStore) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let (tx, mut rx) = mpsc::channel(16);
    let reconciler = reconciler_for(config, Arc::new(SqliteTriggerBackend::new(conn.clone())));

    // The store (and its sender) is consumed by `op`, which closes the feed
    let result = op(SqliteInviteStore::new(conn).with_feed(tx)).await?;

    while let Some(event) = rx.recv().await {
        match reconciler.apply(&event).await {
            Ok(outcome) => info!(invite_id = %event.invite_id, "Reconciled: {:?}", outcome),
            Err(e) => warn!(invite_id = %event.invite_id, "Schedule not updated: {}", e),
        }
    }
    Ok(result)
}

fn invite_from_args(args: InviteAddArgs) -> Result<Invite> {
    let platform = Platform::parse(&args.platform)?;
    let scheduled = args
        .at
        .as_deref()
        .map(|at| {
            chrono::DateTime::parse_from_rfc3339(at)
                .map(|t| t.timestamp())
                .with_context(|| format!("Invalid meeting time '{}', expected RFC 3339", at))
        })
        .transpose()?;

    Ok(Invite::new(args.name, platform, args.meeting, scheduled)
        .with_password(args.password)
        .with_recipients(args.recipients))
}
