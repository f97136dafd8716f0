//! Subcommand handlers. Each prints the action response as JSON on stdout
//! and reports whether the action succeeded.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use log::{info, warn};
use relqual::reconcile::StopReason;
use relqual::{ActionResponse, Actions, Database, ModelRelease, PollManager, Settings};
use serde::Serialize;

use crate::cli::{Cli, Command};

pub async fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut settings = Settings::from_env().context("invalid configuration")?;
    if let Some(path) = cli.database {
        settings.runtime.database_path = Some(path);
    }
    let db_path = settings
        .database_path()
        .ok_or_else(|| anyhow!("could not determine a database path; set RELQUAL_DATABASE_PATH"))?;
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    let actions = Actions::new(settings, db)?;

    match cli.command {
        Command::Trigger { batch, watch } => {
            let releases = read_batch(&batch.input).await?;
            trigger(actions, releases, watch, false).await
        }
        Command::Precheck { batch, watch } => {
            let releases = read_batch(&batch.input).await?;
            trigger(actions, releases, watch, true).await
        }
        Command::Status { release } => print(&actions.check_job_status(&release).await),
        Command::Watch { release } => {
            let polls = actions.poll_manager()?;
            watch_until_done(&polls, &release).await
        }
        Command::Jobs { release, job_type } => {
            print(&actions.jobs_for_release(&release, job_type.map(Into::into)))
        }
        Command::PrecheckStatus { release, models } => {
            print(&actions.precheck_status_for_models(&release, &models))
        }
        Command::InitCheck { release } => print(&actions.check_initialization(&release).await),
        Command::Init { batch, user } => {
            let releases = read_batch(&batch.input).await?;
            print(&actions.initialize_release(releases, &user).await)
        }
        Command::EditDashboard { batch, user } => {
            let releases = read_batch(&batch.input).await?;
            print(&actions.edit_dashboard(releases, &user).await)
        }
        Command::Links { release } => print(&actions.release_links(&release)),
    }
}

async fn trigger(
    actions: Actions,
    releases: Vec<ModelRelease>,
    watch: bool,
    precheck: bool,
) -> anyhow::Result<bool> {
    let target = releases
        .first()
        .map(|r| r.release_target.trim().to_string())
        .unwrap_or_default();

    let polls = if watch {
        Some(Arc::new(actions.poll_manager()?))
    } else {
        None
    };
    let actions = match &polls {
        Some(polls) => actions.with_poll_manager(Arc::clone(polls)),
        None => actions,
    };

    let response = if precheck {
        actions.trigger_precheck_jobs(releases).await
    } else {
        actions.trigger_release_jobs(releases).await
    };
    let success = print(&response)?;

    if let Some(polls) = polls {
        if response.data.is_some() {
            watch_until_done(&polls, &target).await?;
        }
    }
    Ok(success)
}

async fn watch_until_done(polls: &PollManager, release: &str) -> anyhow::Result<bool> {
    polls.watch(release)?;
    let Some(scheduler) = polls.take(release) else {
        info!("No active jobs for {}", release);
        return Ok(true);
    };

    // Dropping the join future drops the scheduler, which ends its loop.
    tokio::select! {
        reason = scheduler.join() => match reason {
            Some(StopReason::Idle { cycles }) => {
                info!("All jobs for {} finished after {} poll cycles", release, cycles)
            }
            Some(StopReason::Stopped) => info!("Polling for {} stopped", release),
            None => warn!("Polling task for {} ended unexpectedly", release),
        },
        _ = tokio::signal::ctrl_c() => info!("Interrupted, polling for {} stopped", release),
    }
    Ok(true)
}

async fn read_batch(path: &Path) -> anyhow::Result<Vec<ModelRelease>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid batch file {}", path.display()))
}

fn print<T: Serialize>(response: &ActionResponse<T>) -> anyhow::Result<bool> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(response.success)
}
