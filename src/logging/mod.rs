//! Logging infrastructure for Lintel
//!
//! `init` installs the global `tracing` subscriber; `audit` records the
//! security-relevant events of the authority as JSONL.

pub mod audit;

pub use audit::{AuditEvent, AuditKind, AuditLog};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("lintel={},audit=info,info", level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
