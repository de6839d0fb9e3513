use anyhow::Result;
use ironfan::config::{RemoteConfig, ServiceConfig, init_worker_pool};
use std::io::Write;
use std::time::Duration;

#[test]
fn service_config_defaults() {
    let config = ServiceConfig::default();
    assert!(config.memoize);
    assert_eq!(config.max_frame_bytes, 20 * 1024 * 1024);
    assert_eq!(config.worker_threads, None);
}

#[test]
fn partial_json_keeps_defaults() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(file, r#"{{ "memoize": false, "worker_threads": 2 }}"#)?;

    let config = ServiceConfig::from_json_file(file.path())?;
    assert!(!config.memoize);
    assert_eq!(config.worker_threads, Some(2));
    assert_eq!(config.max_frame_bytes, ServiceConfig::default().max_frame_bytes);
    Ok(())
}

#[test]
fn invalid_json_names_the_file() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(file, "memoize = false")?;

    let err = ServiceConfig::from_json_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("invalid config"));
    Ok(())
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = ServiceConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(err.to_string().contains("failed to read config"));
}

#[test]
fn remote_config_timeout() {
    assert_eq!(RemoteConfig::default().timeout, None);
    assert_eq!(
        RemoteConfig::with_timeout(Duration::from_secs(3)).timeout,
        Some(Duration::from_secs(3))
    );
}

#[test]
fn worker_pool_reports_its_size() {
    assert!(init_worker_pool(Some(2)) >= 1);
    // a second call leaves the pool as it is
    let threads = rayon::current_num_threads();
    assert_eq!(init_worker_pool(Some(threads + 5)), threads);
}
