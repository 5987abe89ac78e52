use tracing_subscriber::EnvFilter;

/// Install the stderr log subscriber.
///
/// Logs never go to stdout, which carries command output (`query` JSON, run
/// summaries). `RUST_LOG` overrides `log_level` when set.
pub fn init(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
