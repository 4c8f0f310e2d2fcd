use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Crates whose debug output drowns the broker's own at verbose levels.
const QUIET_TARGETS: &[&str] = &["tungstenite=info", "tokio_tungstenite=info"];

/// Initialize tracing for the broker.
///
/// When `RUST_LOG` is set its directives are used as given. Otherwise the
/// configured level applies, falling back to `info` for unknown names, and
/// the WebSocket crates are held at `info`.
pub fn init(default_level: &str) {
    // try_init: the CLI, tests and embedders may all call this
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(default_level))
        .with_target(false)
        .try_init();
}

pub(crate) fn build_filter(default_level: &str) -> EnvFilter {
    let builder = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(parse_level(default_level)).into());
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return builder.from_env_lossy();
    }

    let mut filter = builder.parse_lossy("");
    for target in QUIET_TARGETS {
        if let Ok(directive) = target.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

pub(crate) fn parse_level(name: &str) -> tracing::Level {
    match name.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}
