use env_logger::{Builder, Env};

/// Initialise the process-wide logger.
///
/// Defaults to `info`; `RUST_LOG` overrides it (e.g. `RUST_LOG=cluster=debug`).
/// Calling it more than once is harmless.
pub fn setup_logging() {
    let _ = Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .format_target(true)
        .try_init();
}
