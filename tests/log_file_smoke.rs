#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{fs, thread::sleep, time::Duration};

use shelfkeep_lib::config::LogConfig;

#[test]
fn file_sink_writes_json_lines() {
    shelfkeep_lib::logging::init_logging_with("shelfkeep=info");

    let tmp = tempfile::tempdir().unwrap();
    let config = LogConfig {
        dir: tmp.path().join("logs"),
        filter: "shelfkeep=info".into(),
        max_bytes: 1024 * 1024,
        max_files: 2,
    };
    let log_path = shelfkeep_lib::init_file_logging(&config).expect("file logging to initialize");
    assert!(config.dir.is_dir(), "logs dir missing: {:?}", config.dir);

    tracing::info!(target: "shelfkeep", event = "smoke_test", marker = "first");
    shelfkeep_lib::flush_file_logs();

    wait_for_file(&log_path);
    let contents = fs::read_to_string(&log_path).expect("read log file");
    let last_line = contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .last()
        .expect("log line present");
    let value: serde_json::Value = serde_json::from_str(last_line).expect("json log line");

    assert_eq!(
        value["event"],
        serde_json::Value::String("smoke_test".into())
    );
    assert_eq!(value["level"], serde_json::Value::String("INFO".into()));
    assert!(value["timestamp"].as_str().is_some());
    assert_eq!(value["target"], serde_json::Value::String("shelfkeep".into()));
}

fn wait_for_file(path: &std::path::Path) {
    for _ in 0..20 {
        if let Ok(metadata) = fs::metadata(path) {
            if metadata.len() > 0 {
                return;
            }
        }
        sleep(Duration::from_millis(50));
    }
}
