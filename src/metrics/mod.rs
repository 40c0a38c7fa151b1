//! Metrics module for Prometheus-based monitoring.
//!
//! A [`MetricsCollector`] owns its own Prometheus registry. One collector is
//! built at process start and shared (`Arc`) with every component that
//! reports, so tests get isolated counters and nothing lives in a global.
//!
//! # Example
//!
//! ```ignore
//! use agent_forge::metrics::MetricsCollector;
//!
//! let metrics = MetricsCollector::new()?;
//! metrics.record_enqueue("high");
//! metrics.record_job("completed", 1.2);
//! println!("{}", metrics.export_text());
//! ```

pub mod collectors;

pub use collectors::MetricsCollector;
