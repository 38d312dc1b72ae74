use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. Filter comes from `RUST_LOG`.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().compact())
        .with(ErrorLayer::default())
        .init();
}
