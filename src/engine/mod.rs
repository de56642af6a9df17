//! Ingestion, detection and trade-tracking engine.

pub mod consumer;
pub mod detector;
pub mod dispatcher;
pub mod orchestrator;
pub mod partition;
pub mod trade_monitor;
pub mod window;

pub use orchestrator::Orchestrator;
