//! Shared utilities for relqual integration tests.
//!
//! - `TestHarness` runs mock Jenkins, dashboard and Jira servers over an
//!   in-memory database
//! - builders create model release requests without boilerplate

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
