//! Metric names for the dbhq bot core.
//!
//! Every crate records through the `metrics` facade, so nothing is collected
//! until a recorder is installed. With the `prometheus` feature,
//! [`init_metrics`] installs an exporter that serves the text format on an
//! HTTP listener.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dbhq_metrics::{counter, actions, labels};
//!
//! counter!(actions::SUCCEEDED_TOTAL, labels::ACTION => "delete_message").increment(1);
//! ```

mod definitions;
mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
