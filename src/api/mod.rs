//! HTTP API handlers
//!
//! The HTTP ingress channel: a thin translation layer over the core
//! submit/query surface. The bot frontend submits through the same routes
//! with `channel=bot`.

pub mod health;
pub mod jobs;
pub mod metrics;

pub use health::health_routes;
pub use jobs::jobs_routes;
pub use metrics::metrics_routes;
