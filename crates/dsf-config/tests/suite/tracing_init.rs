use dsf_config::{init_tracing, LoggingConfig};

#[test]
fn installs_once_and_writes_to_the_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dsf.log");
    let config = LoggingConfig {
        level: "info".to_owned(),
        stderr: false,
        file: Some(path.clone()),
        ..LoggingConfig::default()
    };

    assert!(init_tracing(&config));
    assert!(!init_tracing(&config));

    tracing::info!(target: "dsf.test", "session started");

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("session started"), "{contents}");
}
