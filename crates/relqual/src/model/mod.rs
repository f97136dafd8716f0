//! Domain records shared by the engines, the store and the actions.

pub mod job;
pub mod release;

pub use job::{Job, JobState, JobStatus, JobType, PrecheckStatus, UnknownValue};
pub use release::{ModelRelease, Release, ReleaseBatch, ReleaseId, ReleaseLinks};
