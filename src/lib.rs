//! # Multitask Trainer
//!
//! Training-orchestration core for multi-task learning: checkpoints model,
//! optimizer and learning-rate scheduler state, tracks the best snapshot per
//! metric, and interleaves per-task data sources into one training stream.
//!
//! ## Modules
//!
//! - [`checkpoint`] — Snapshot store, best-metric ledger, cleanup and restore
//! - [`scheduler`] — Data source contract and batch interleaving strategies
//! - [`training`] — Learner loop driving scheduler and checkpointer
//! - [`config`] — TOML configuration loading and validation
//! - [`error`] — Structured error types

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod training;
