use tracing_subscriber::EnvFilter;

/// Filter for our own logs, unless `RUST_LOG` says otherwise.
pub fn create_env_filter(verbosity: u8, quiet: bool) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    match (quiet, verbosity) {
        (true, _) => EnvFilter::new("flotilla=warn"),
        (false, 0) => EnvFilter::new("flotilla=info"),
        (false, 1) => EnvFilter::new("flotilla=debug"),
        (false, _) => EnvFilter::new("flotilla=trace"),
    }
}

/// Logs go to stderr so that stdout carries only the report.
pub fn init(verbosity: u8, quiet: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(create_env_filter(verbosity, quiet))
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_env_filter() {
        let _ = create_env_filter(0, false);
        let _ = create_env_filter(1, false);
        let _ = create_env_filter(2, false);
        let _ = create_env_filter(0, true);
    }
}
