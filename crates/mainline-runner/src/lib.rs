//! Merge pipeline runtime: git plumbing, pre-merge checks, the serialized
//! merge worker, and the queue scanner that drives it.

pub mod event_bus;
pub mod git;
pub mod merge_worker;
pub mod notify;
pub mod premerge;
pub mod scanner;
pub mod subprocess;
pub mod worktree;

#[cfg(test)]
pub mod testutil;

pub use event_bus::EventBus;
pub use merge_worker::MergeWorker;
pub use scanner::Scanner;
