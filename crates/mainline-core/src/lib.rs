//! Domain types for the mainline merge orchestrator.
//!
//! Pure data and rules: the task lifecycle state machine, review records,
//! merge outcome taxonomy, repo configuration, and pipeline events.
//! Storage lives in `mainline-db`; subprocess work in `mainline-runner`.

pub mod event;
pub mod merge;
pub mod repo;
pub mod review;
pub mod task;
pub mod telemetry;
