use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` controls filtering (default `info`);
/// `FINISHFLOW_LOG_JSON` switches to JSON lines.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = crate::config::env_bool("FINISHFLOW_LOG_JSON").unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
