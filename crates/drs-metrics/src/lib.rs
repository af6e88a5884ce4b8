//! drs-metrics — Prometheus exposition for the DRS.
//!
//! Renders per-cluster status (health score, recommendation counts, job
//! counters, staleness) in the Prometheus text format served on
//! `GET /metrics`.

pub mod prometheus;

pub use prometheus::render_prometheus;
