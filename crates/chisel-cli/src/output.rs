use tracing_subscriber::EnvFilter;

/// Initialise logging once. `CHISEL_LOG` takes precedence; `--verbose`
/// bumps the default from warnings to debug.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("CHISEL_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
