#![forbid(unsafe_code)]

//! Stage-by-stage parity checks between the legacy and modern JSON output of
//! the base-pair geometry pipeline.

pub mod checkpoint;
pub mod diagnostics;
pub mod field_compare;
pub mod generator;
pub mod log_events;
pub mod orchestrator;
pub mod record_keys;
pub mod record_loader;
pub mod report;
pub mod stage_registry;
pub mod stage_runner;
pub mod stages;
pub mod tolerances;
pub mod worklist;
