use super::{AppError, BrokerError, logging};
use serial_test::serial;

#[test]
fn logging_init_is_idempotent() {
    logging::init("info");
    // a subscriber is installed by now, whichever call won
    assert!(!logging::init("debug"));
}

#[test]
#[serial]
fn logging_filter_uses_configured_directives() {
    temp_env::with_var_unset("RUST_LOG", || {
        assert_eq!(logging::filter("debug").to_string(), "debug");
        assert_eq!(
            logging::filter("wordcount=debug").to_string(),
            "wordcount=debug"
        );
    });
}

#[test]
#[serial]
fn logging_filter_prefers_rust_log() {
    temp_env::with_var("RUST_LOG", Some("warn"), || {
        assert_eq!(logging::filter("debug").to_string(), "warn");
    });
}

#[test]
fn unknown_group_error_names_stream_and_group() {
    let err = BrokerError::UnknownGroup {
        stream: "requests".to_string(),
        group: "workers".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "no consumer group 'workers' on stream 'requests'"
    );
}

#[test]
fn config_errors_become_app_errors() {
    fn load() -> Result<(), AppError> {
        Err::<(), _>(config::ConfigError::Message("missing port".to_string()))?;
        Ok(())
    }

    let err = load().unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
    assert_eq!(err.to_string(), "configuration error: missing port");
}
