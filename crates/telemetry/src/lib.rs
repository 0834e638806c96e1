pub mod logging;

pub use logging::{init_structured_logging, init_with_service, LogConfig, LogFormat, LoggingGuard};

/// Plain `RUST_LOG`-driven stdout logging for tests and small tools.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
