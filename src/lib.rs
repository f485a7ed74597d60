//! Juror notifications for the court contract.
//!
//! Turns `AppealDecision`, `Draw` and `TokenAndETHShift` logs into
//! deduplicated, acknowledgeable notifications for jurors. Shared by the
//! `juror-notify` service and the operator tools under `src/bin`.

pub mod chain;
pub mod config;
pub mod notify;
pub mod store;
