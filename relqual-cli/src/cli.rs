use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use relqual::JobType;

#[derive(Parser, Debug)]
#[command(name = "relqual", version, about = "Release qualification orchestrator")]
pub struct Cli {
    /// SQLite database file. Defaults to RELQUAL_DATABASE_PATH or ~/.relqual/data/relqual.db.
    #[arg(long, global = true, value_name = "FILE")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Queue release qualification builds for every model in a batch file.
    Trigger {
        #[command(flatten)]
        batch: BatchArgs,
        /// Keep polling until every queued build finishes.
        #[arg(long)]
        watch: bool,
    },

    /// Queue pre-check builds for every model in a batch file.
    Precheck {
        #[command(flatten)]
        batch: BatchArgs,
        #[arg(long)]
        watch: bool,
    },

    /// Run one status reconciliation cycle for a release.
    Status { release: String },

    /// Poll a release until its jobs finish or Ctrl-C is pressed.
    Watch { release: String },

    /// List recorded jobs of a release, newest first.
    Jobs {
        release: String,
        #[arg(long = "type", value_enum)]
        job_type: Option<JobKind>,
    },

    /// Latest pre-check status of the given models.
    PrecheckStatus {
        release: String,
        #[arg(long = "model", required = true)]
        models: Vec<String>,
    },

    /// Report whether the dashboard already tracks a release.
    InitCheck { release: String },

    /// Initialize a release: dashboard, CI job, Jira tickets and saved links.
    Init {
        #[command(flatten)]
        batch: BatchArgs,
        #[arg(long, default_value = "")]
        user: String,
    },

    /// Add or update models on an initialized dashboard release.
    EditDashboard {
        #[command(flatten)]
        batch: BatchArgs,
        #[arg(long, default_value = "")]
        user: String,
    },

    /// Show the stored CI and Jira links of a release.
    Links { release: String },
}

#[derive(clap::Args, Debug)]
pub struct BatchArgs {
    /// JSON file holding an array of model release requests.
    #[arg(long, short = 'i', value_name = "FILE")]
    pub input: PathBuf,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum JobKind {
    Release,
    Precheck,
}

impl From<JobKind> for JobType {
    fn from(kind: JobKind) -> Self {
        match kind {
            JobKind::Release => JobType::Release,
            JobKind::Precheck => JobType::Precheck,
        }
    }
}
