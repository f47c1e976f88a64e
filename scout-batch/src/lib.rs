//! scout-batch library interface
//!
//! Reconciliation jobs that fill in derived records for registered filings:
//! daily price bars per ticker, extracted financial statements per filing and
//! computed ratios per filing. All share the pending-set plus bounded worker
//! pool in [`pool`].

pub mod pool;
pub mod prices;
pub mod ratios;
pub mod statements;

pub use pool::{run_job, JobReport, ReconcileJob, TaskOutcome};
