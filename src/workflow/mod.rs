//! Workflow module - the batch pipeline
//!
//! Structure:
//! - `processors`: the stages (worker client, per-file processing, enrichment) and startup setup
//! - `flows`: the batch coordinator that drives the stages and cleanup

pub mod flows;
pub mod processors;

pub use flows::BatchCoordinator;
