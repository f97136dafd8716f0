//! Release qualification orchestration.
//!
//! Coordinates a Jenkins server, a qualification dashboard and Jira to
//! initialize a release, trigger per-model qualification builds and keep
//! their recorded status in sync until every build finishes.

pub mod actions;
pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod init;
pub mod model;
pub mod reconcile;
pub mod trigger;

pub use actions::{ActionResponse, Actions};
pub use config::Settings;
pub use db::Database;
pub use error::{ConfigError, RelqualError, Result, UpstreamError, ValidationError};
pub use init::{InitReport, Initializer};
pub use model::{Job, JobState, JobStatus, JobType, ModelRelease, PrecheckStatus, ReleaseBatch};
pub use reconcile::{PollManager, PollScheduler, PollSummary, Reconciler};
pub use trigger::{JobTrigger, TriggerOutcome};
