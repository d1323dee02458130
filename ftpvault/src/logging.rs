use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const QUIET_TARGETS: &[&str] = &["hyper=warn", "reqwest=warn", "opendal=warn", "rustls=warn"];

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init(level: &str) {
    let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref(), level);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn build_filter(rust_log: Option<&str>, level: &str) -> EnvFilter {
    if let Some(directives) = rust_log.filter(|value| !value.trim().is_empty()) {
        if let Ok(filter) = EnvFilter::try_new(directives) {
            return filter;
        }
    }

    let mut directives = vec![level.trim().to_ascii_lowercase()];
    directives.extend(QUIET_TARGETS.iter().map(|d| d.to_string()));
    EnvFilter::try_new(directives.join(","))
        .unwrap_or_else(|_| EnvFilter::new(format!("info,{}", QUIET_TARGETS.join(","))))
}
