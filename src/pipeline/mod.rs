//! Pipeline entry points for ingestion runs.
//!
//! - `run_watchers`: Watch every venue's live scoreboard until cancelled
//! - `run_backfill`: Fetch and store one racer's history

pub mod backfill;
pub mod watch;

pub use backfill::{BackfillRequest, BackfillSummary, default_since, run_backfill};
pub use watch::run_watchers;
