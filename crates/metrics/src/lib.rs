//! Metrics for the handoff router and store.
//!
//! This crate only names metrics and re-exports the `metrics` facade macros.
//! Installing a recorder (Prometheus, statsd, ...) is up to the host process;
//! without one every call is a no-op.
//!
//! # Usage
//!
//! ```rust,ignore
//! use handoff_metrics::{counter, router, labels};
//!
//! counter!(router::MESSAGES_TOTAL, labels::ROUTE => "bot").increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
