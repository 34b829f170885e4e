use tracing_subscriber::EnvFilter;

/// Initializes tracing to stderr; stdout belongs to the protocol stream.
///
/// `RUST_LOG` wins over the verbosity flags when set.
pub fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
