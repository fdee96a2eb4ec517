//! API layer
//!
//! HTTP handlers for:
//! - Browser pages (home, admin)
//! - Posts resource
//! - Metrics (Prometheus)

pub mod metrics;
mod pages;
mod posts;

pub use metrics::metrics_router;
pub use pages::pages_router;
pub use posts::{ListParams, posts_router};
