//! Sutu ingress - unified pen/pointer stroke ingress for low-latency painting
//!
//! Native tablet rings and generic pointer events are normalized into one
//! canonical point stream, routed exactly once, and driven through the stroke
//! lifecycle shared with the brush engine.

pub mod core;
pub mod input;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the tracing subscriber. Safe to call more than once.
pub fn init() {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sutu_ingress=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if installed.is_ok() {
        tracing::info!("Sutu ingress initializing...");
    }
}
