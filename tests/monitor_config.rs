use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use safety_monitor::config::MonitorConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SAFETY_MONITOR_CONFIG",
        "MODEL_PATH",
        "MODEL_INPUT_SIZE",
        "CONFIDENCE_THRESHOLD",
        "NMS_THRESHOLD",
        "CAMERA_INDEX",
        "UPLOAD_FOLDER",
        "RESULTS_FOLDER",
        "MAX_RECENT_DETECTIONS",
        "SAFETY_MONITOR_DEBUG",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_match_deployment_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = MonitorConfig::load().expect("load defaults");
    assert_eq!(cfg.model_path, PathBuf::from("model/best.onnx"));
    assert_eq!(cfg.model_input_size, 640);
    assert_eq!(cfg.confidence_threshold, 0.5);
    assert_eq!(cfg.nms_threshold, 0.4);
    assert_eq!(cfg.camera_index, 0);
    assert_eq!((cfg.camera.width, cfg.camera.height, cfg.camera.fps), (640, 480, 30));
    assert_eq!(cfg.upload_folder, PathBuf::from("uploads"));
    assert_eq!(cfg.results_folder, PathBuf::from("results"));
    assert_eq!(cfg.max_recent_detections, 50);
    assert_eq!(cfg.max_content_length, 16 * 1024 * 1024);
    assert_eq!(cfg.jpeg_quality, 90);
    assert!(!cfg.debug);
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "model": {
            "path": "/opt/models/ppe.onnx",
            "input_size": 320,
            "confidence_threshold": 0.35
        },
        "camera": { "index": 2, "width": 1280, "height": 720, "fps": 15 },
        "storage": { "upload_folder": "/var/lib/monitor/up", "max_content_length": 1024 },
        "stats": { "max_recent_detections": 10 },
        "jpeg_quality": 75,
        "debug": false
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("SAFETY_MONITOR_CONFIG", file.path());
    std::env::set_var("CAMERA_INDEX", "1");
    std::env::set_var("NMS_THRESHOLD", "0.6");
    std::env::set_var("SAFETY_MONITOR_DEBUG", "true");

    let cfg = MonitorConfig::load().expect("load config");
    assert_eq!(cfg.model_path, PathBuf::from("/opt/models/ppe.onnx"));
    assert_eq!(cfg.model_input_size, 320);
    assert_eq!(cfg.confidence_threshold, 0.35);
    assert_eq!(cfg.nms_threshold, 0.6);
    assert_eq!(cfg.camera_index, 1);
    assert_eq!(cfg.camera.width, 1280);
    assert_eq!(cfg.camera.fps, 15);
    assert_eq!(cfg.upload_folder, PathBuf::from("/var/lib/monitor/up"));
    assert_eq!(cfg.results_folder, PathBuf::from("results"));
    assert_eq!(cfg.max_content_length, 1024);
    assert_eq!(cfg.max_recent_detections, 10);
    assert_eq!(cfg.jpeg_quality, 75);
    assert!(cfg.debug);
    assert_eq!(cfg.thresholds().iou, 0.6);

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
        jpeg_quality = 60
        debug = true

        [model]
        path = "weights/helmet.onnx"

        [storage]
        results_folder = "out"
    "#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("SAFETY_MONITOR_CONFIG", file.path());

    let cfg = MonitorConfig::load().expect("load toml config");
    assert_eq!(cfg.model_path, PathBuf::from("weights/helmet.onnx"));
    assert_eq!(cfg.results_folder, PathBuf::from("out"));
    assert_eq!(cfg.jpeg_quality, 60);
    assert!(cfg.debug);

    clear_env();
}

#[test]
fn rejects_out_of_range_values() {
    let _guard = ENV_LOCK.lock().unwrap();

    for (key, value) in [
        ("CONFIDENCE_THRESHOLD", "0"),
        ("CONFIDENCE_THRESHOLD", "1.2"),
        ("NMS_THRESHOLD", "-0.1"),
        ("MAX_RECENT_DETECTIONS", "0"),
        ("MODEL_INPUT_SIZE", "600"),
        ("CAMERA_INDEX", "front"),
        ("SAFETY_MONITOR_CONFIG", "/nonexistent/monitor.toml"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        assert!(
            MonitorConfig::load().is_err(),
            "{}={} should be rejected",
            key,
            value
        );
    }
    clear_env();
}

#[test]
fn missing_or_malformed_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SAFETY_MONITOR_CONFIG", "/nonexistent/monitor.json");
    assert!(MonitorConfig::load().is_err());

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(b"{ not json").expect("write config");
    std::env::set_var("SAFETY_MONITOR_CONFIG", file.path());
    assert!(MonitorConfig::load().is_err());

    clear_env();
}
