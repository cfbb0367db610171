//! Push-based observability: outbound data only, no HTTP server and no
//! incoming requests. A Prometheus registry is kept in-process for the
//! gauge bookkeeping `MetricsReporter` renders into periodic JSON lines.

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
