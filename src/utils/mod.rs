//! The `utils` module holds the pieces shared by every other module: the
//! error taxonomy and logging initialisation.

pub mod error;
pub mod logging;

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::logging;

    #[test]
    fn test_logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("warn");
    }

    #[test]
    #[serial]
    fn test_filter_uses_configured_level_without_rust_log() {
        let filter = temp_env::with_var_unset("RUST_LOG", || logging::build_filter("debug"));
        let directives = filter.to_string();
        assert!(directives.split(',').any(|d| d == "debug"), "{directives}");
        assert!(directives.contains("tungstenite=info"), "{directives}");
    }

    #[test]
    #[serial]
    fn test_rust_log_overrides_configured_level() {
        let filter = temp_env::with_var("RUST_LOG", Some("popmqtt=trace"), || {
            logging::build_filter("warn")
        });
        let directives = filter.to_string();
        assert!(directives.contains("popmqtt=trace"), "{directives}");
        assert!(!directives.contains("tungstenite"), "{directives}");
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        assert_eq!(logging::parse_level("loud"), tracing::Level::INFO);
        assert_eq!(logging::parse_level("WARNING"), tracing::Level::WARN);
        assert_eq!(logging::parse_level("trace"), tracing::Level::TRACE);
    }
}
