use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use vigil::{IndexBackend, VigilConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "VIGIL_CONFIG",
        "VIGIL_SOURCE_URL",
        "VIGIL_INTERVAL_SECS",
        "VIGIL_QUEUE_CAPACITY",
        "VIGIL_MOTION_SENSITIVITY",
        "VIGIL_MOTION_MIN_AREA",
        "VIGIL_KEYWORDS",
        "VIGIL_MIN_CONFIDENCE",
        "VIGIL_INFERENCE_ENDPOINT",
        "VIGIL_INFERENCE_API_KEY",
        "MOONDREAM_API_KEY",
        "VIGIL_INFERENCE_TIMEOUT_SECS",
        "VIGIL_INDEX_BACKEND",
        "VIGIL_INDEX_PATH",
        "VIGIL_ALERTS_DIR",
        "VIGIL_DETECTIONS_DIR",
        "VIGIL_WEBHOOK_URL",
        "VIGIL_HEADLESS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": { "url": "http://camera.local/stream", "max_consecutive_failures": 5 },
        "analysis": { "interval_secs": 1.5, "queue_capacity": 3 },
        "motion": { "sensitivity": 30, "min_area": 800 },
        "verification": { "keywords": ["Intruder", "fire"], "min_region_confidence": 0.4 },
        "inference": { "endpoint": "http://127.0.0.1:2020/v1", "timeout_secs": 10 },
        "storage": { "alerts_dir": "/tmp/vigil-alerts", "jpeg_quality": 75 },
        "notify": { "webhook_url": "https://hooks.example.com/vigil" }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("VIGIL_CONFIG", file.path());
    std::env::set_var("VIGIL_QUEUE_CAPACITY", "7");
    std::env::set_var("MOONDREAM_API_KEY", "md-key");
    std::env::set_var("VIGIL_HEADLESS", "true");

    let cfg = VigilConfig::load().expect("load config");
    assert_eq!(cfg.source_url, "http://camera.local/stream");
    assert_eq!(cfg.pipeline.max_source_failures, 5);
    assert_eq!(cfg.pipeline.analysis_interval, Duration::from_millis(1500));
    assert_eq!(cfg.pipeline.queue_capacity, 7);
    assert_eq!(cfg.motion.sensitivity, 30);
    assert_eq!(cfg.motion.min_area, 800);
    assert_eq!(cfg.verification.keywords, vec!["intruder", "fire"]);
    assert_eq!(cfg.verification.min_region_confidence, Some(0.4));
    assert_eq!(cfg.inference.endpoint, "http://127.0.0.1:2020/v1");
    assert_eq!(cfg.inference.timeout, Duration::from_secs(10));
    assert_eq!(cfg.inference.api_key.as_deref(), Some("md-key"));
    assert_eq!(
        cfg.storage.index_path,
        PathBuf::from("/tmp/vigil-alerts/alerts.json")
    );
    assert_eq!(cfg.storage.jpeg_quality, 75);
    assert_eq!(
        cfg.webhook_url.as_deref(),
        Some("https://hooks.example.com/vigil")
    );
    assert!(cfg.headless);

    clear_env();
}

#[test]
fn toml_file_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let raw = r#"
        [source]
        url = "stub://yard?frames=20"

        [storage]
        index_backend = "sqlite"
    "#;
    std::io::Write::write_all(&mut file, raw.as_bytes()).expect("write config");

    let cfg = VigilConfig::load_with(Some(file.path())).expect("load config");
    assert_eq!(cfg.source_url, "stub://yard?frames=20");
    assert_eq!(cfg.storage.index_backend, IndexBackend::Sqlite);
    assert_eq!(cfg.storage.index_path, PathBuf::from("alerts/alerts.db"));
}

#[test]
fn vigil_key_wins_over_moondream_key() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VIGIL_INFERENCE_API_KEY", "primary");
    std::env::set_var("MOONDREAM_API_KEY", "fallback");
    let cfg = VigilConfig::load().expect("load config");
    assert_eq!(cfg.inference.api_key.as_deref(), Some("primary"));
    assert!(cfg.inference.moondream_settings().is_ok());

    clear_env();
}

#[test]
fn invalid_env_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VIGIL_QUEUE_CAPACITY", "0");
    assert!(VigilConfig::load().is_err());
    clear_env();

    std::env::set_var("VIGIL_INTERVAL_SECS", "-2");
    assert!(VigilConfig::load().is_err());
    clear_env();

    std::env::set_var("VIGIL_MIN_CONFIDENCE", "2.0");
    assert!(VigilConfig::load().is_err());
    clear_env();

    std::env::set_var("VIGIL_INDEX_BACKEND", "postgres");
    assert!(VigilConfig::load().is_err());
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VIGIL_CONFIG", "/nonexistent/vigil.json");
    assert!(VigilConfig::load().is_err());
    clear_env();
}

#[test]
fn more_than_one_timeout_retry_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for (retries, accepted) in [(0, true), (1, true), (2, false), (4294967295u32, false)] {
        let mut file = Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp config");
        let raw = format!(
            "[inference]\ntimeout_secs = 0.05\ntimeout_retries = {}\n",
            retries
        );
        std::io::Write::write_all(&mut file, raw.as_bytes()).expect("write config");
        let result = VigilConfig::load_with(Some(file.path()));
        assert_eq!(result.is_ok(), accepted, "timeout_retries = {}", retries);
        if let Ok(cfg) = result {
            assert_eq!(cfg.inference.adapter_settings().timeout_retries, retries);
        }
    }
}
