use std::path::Path;
use std::sync::Arc;

use base64::Engine as _;
use image::{Rgb, RgbImage};
use tempfile::TempDir;

use safety_monitor::detect::ScriptedStep;
use safety_monitor::frame::encode_for_extension;
use safety_monitor::ingest::{SyntheticCameraOpener, SyntheticVideoCodec};
use safety_monitor::{
    CameraRegistry, DetectorBackend, DetectorSlot, MonitorConfig, RawPrediction, SafetyMonitor,
    ScriptedBackend, Upload,
};

fn monitor_with(dir: &TempDir, detector: DetectorSlot) -> SafetyMonitor {
    let config = MonitorConfig {
        upload_folder: dir.path().join("uploads"),
        results_folder: dir.path().join("results"),
        ..MonitorConfig::default()
    };
    SafetyMonitor::with_components(
        config,
        detector,
        Arc::new(SyntheticVideoCodec),
        CameraRegistry::new(SyntheticCameraOpener::default()),
    )
    .expect("build monitor")
}

fn two_workers() -> ScriptedBackend {
    ScriptedBackend::new(vec![
        RawPrediction::new([10.0, 30.0, 40.0, 60.0], 0.9, 0),
        RawPrediction::new([50.0, 50.0, 90.0, 90.0], 0.6, 2),
    ])
}

fn gray_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([128, 128, 128]));
    encode_for_extension(&image, "png", 90).expect("encode png")
}

fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).count())
        .unwrap_or(0)
}

fn b64(data: &str) -> Vec<u8> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .expect("valid base64")
}

#[test]
fn image_upload_annotates_persists_and_records() {
    let dir = TempDir::new().unwrap();
    let monitor = monitor_with(&dir, DetectorSlot::preloaded(two_workers()));

    let response = monitor
        .upload_image(Upload::new("site.png", gray_png(100, 100)))
        .expect("image upload");

    assert!(response.success);
    assert_eq!(response.total_detections, 2);
    let classes: Vec<_> = response.detections.iter().map(|d| d.class.as_str()).collect();
    assert_eq!(classes, vec!["no helmet", "safe"]);
    assert_eq!(response.detections[0].bbox, [10, 30, 40, 60]);
    assert!(response.filename.starts_with("result_"));
    assert!(response.filename.ends_with("_site.png"));

    let stored = std::fs::read(monitor.store().result_path(&response.filename)).unwrap();
    assert_eq!(b64(&response.image), stored);

    let annotated = image::load_from_memory(&stored).unwrap().to_rgb8();
    assert_eq!(annotated.get_pixel(10, 45), &Rgb([255, 0, 0]));
    assert_eq!(annotated.get_pixel(50, 70), &Rgb([0, 255, 0]));
    assert_eq!(annotated.get_pixel(25, 75), &Rgb([128, 128, 128]));

    let stats = monitor.stats();
    assert_eq!(stats.total_detections, 2);
    assert_eq!(stats.class_count("no helmet"), 1);
    assert_eq!(stats.class_count("safe"), 1);
    assert_eq!(stats.class_count("unsafe"), 0);
    assert_eq!(stats.recent_detections.len(), 1);
    assert_eq!(stats.recent_detections[0].total, 2);
}

#[test]
fn non_ascii_names_keep_their_format() {
    let dir = TempDir::new().unwrap();
    let monitor = monitor_with(&dir, DetectorSlot::preloaded(two_workers()));

    let response = monitor
        .upload_image(Upload::new("фото.png", gray_png(100, 100)))
        .expect("image upload");
    assert!(response.filename.ends_with("_upload.png"), "{}", response.filename);

    let stored = std::fs::read(monitor.store().result_path(&response.filename)).unwrap();
    assert_eq!(&stored[..4], &[0x89, b'P', b'N', b'G']);
    let annotated = image::load_from_memory(&stored).unwrap().to_rgb8();
    assert_eq!(annotated.get_pixel(10, 45), &Rgb([255, 0, 0]));
}

#[test]
fn out_of_range_boxes_are_drawn_without_overflow() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![
        RawPrediction::new([10.0, 10.0, 5.0e9, 40.0], 0.9, 2),
        RawPrediction::new([-5.0e9, -5.0e9, 20.0, 20.0], 0.8, 0),
    ]);
    let monitor = monitor_with(&dir, DetectorSlot::preloaded(backend));

    let response = monitor
        .upload_image(Upload::new("a.png", gray_png(64, 64)))
        .expect("image upload");
    assert_eq!(response.total_detections, 2);
    assert_eq!(response.detections[0].bbox[2], i32::MAX);
    assert!(monitor.store().result_path(&response.filename).exists());
    assert_eq!(monitor.stats().total_detections, 2);
}

#[test]
fn confidence_override_filters_detections() {
    let dir = TempDir::new().unwrap();
    let monitor = monitor_with(&dir, DetectorSlot::preloaded(two_workers()));

    let response = monitor
        .upload_image(Upload::new("yard.jpg", gray_png(100, 100)).with_confidence(0.75))
        .expect("image upload");
    assert_eq!(response.total_detections, 1);
    assert_eq!(response.detections[0].class, "no helmet");
}

#[test]
fn model_not_ready_is_service_unavailable() {
    let dir = TempDir::new().unwrap();
    let slot = DetectorSlot::new(|| -> anyhow::Result<Box<dyn DetectorBackend>> {
        anyhow::bail!("model file not found: model/best.onnx")
    });
    let monitor = monitor_with(&dir, slot);

    let err = monitor
        .upload_image(Upload::new("site.png", gray_png(20, 20)))
        .unwrap_err();
    assert_eq!(err.http_status(), 503);
    assert!(err.body.error.starts_with("Model not ready"));
    assert_eq!(monitor.stats().total_detections, 0);
    assert!(monitor.stats().recent_detections.is_empty());
    assert_eq!(file_count(monitor.store().upload_dir()), 0);
    assert_eq!(file_count(monitor.store().results_dir()), 0);
}

#[test]
fn rejected_uploads_leave_no_artifacts() {
    let dir = TempDir::new().unwrap();
    let monitor = monitor_with(&dir, DetectorSlot::preloaded(two_workers()));

    let err = monitor
        .upload_image(Upload::new("notes.txt", b"hello".to_vec()))
        .unwrap_err();
    assert_eq!(err.http_status(), 400);
    assert_eq!(err.body.error, "Invalid file type");

    let err = monitor
        .upload_image(Upload::new("broken.png", b"not really a png".to_vec()))
        .unwrap_err();
    assert_eq!(err.http_status(), 400);

    assert_eq!(file_count(monitor.store().upload_dir()), 0);
    assert_eq!(file_count(monitor.store().results_dir()), 0);
    assert_eq!(monitor.stats().recent_detections.len(), 0);
}

#[test]
fn inference_failure_aborts_without_recording() {
    let dir = TempDir::new().unwrap();
    let monitor = monitor_with(
        &dir,
        DetectorSlot::preloaded(ScriptedBackend::failing("tensor shape mismatch")),
    );

    let err = monitor
        .upload_image(Upload::new("site.png", gray_png(32, 32)))
        .unwrap_err();
    assert_eq!(err.http_status(), 500);
    assert!(err.body.error.contains("tensor shape mismatch"));
    assert_eq!(monitor.stats().recent_detections.len(), 0);
    assert_eq!(file_count(monitor.store().results_dir()), 0);
}

#[test]
fn concurrent_uploads_are_all_counted() {
    let dir = TempDir::new().unwrap();
    let monitor = Arc::new(monitor_with(&dir, DetectorSlot::preloaded(two_workers())));

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let monitor = monitor.clone();
            std::thread::spawn(move || {
                monitor
                    .upload_image(Upload::new(format!("cam{}.png", n), gray_png(100, 100)))
                    .expect("image upload")
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = monitor.stats();
    assert_eq!(stats.total_detections, 8);
    assert_eq!(stats.class_count("no helmet"), 4);
    assert_eq!(stats.recent_detections.len(), 4);
}

fn clip(frames: usize) -> Vec<u8> {
    let frames: Vec<_> = (0..frames)
        .map(|n| RgbImage::from_pixel(64, 48, Rgb([40 + n as u8 * 10, 90, 90])))
        .collect();
    SyntheticVideoCodec::encode(&frames, 10.0).expect("encode clip")
}

#[test]
fn video_upload_writes_output_and_preview() {
    let dir = TempDir::new().unwrap();
    let monitor = monitor_with(&dir, DetectorSlot::preloaded(two_workers()));

    let response = monitor
        .upload_video(Upload::new("shift.mp4", clip(3)))
        .expect("video upload");

    assert!(response.success);
    assert_eq!(response.message, "Video processing completed");
    assert!(response.video_filename.starts_with("result_"));
    assert!(response.video_filename.ends_with("_shift.mp4"));
    assert!(monitor
        .store()
        .result_path(&response.video_filename)
        .exists());

    let preview = b64(&response.preview);
    assert_eq!(&preview[..2], &[0xFF, 0xD8]);
    let preview = image::load_from_memory(&preview).unwrap().to_rgb8();
    assert_eq!(preview.dimensions(), (64, 48));
    let edge = preview.get_pixel(10, 45);
    assert!(edge[0] > 150 && edge[1] < 110, "box edge should be red: {:?}", edge);

    // Video passes do not feed the dashboard statistics.
    assert_eq!(monitor.stats().total_detections, 0);
    assert!(monitor.stats().recent_detections.is_empty());
}

#[test]
fn empty_or_undecodable_video_is_invalid_input() {
    let dir = TempDir::new().unwrap();
    let monitor = monitor_with(&dir, DetectorSlot::preloaded(two_workers()));

    let mut header_only = clip(1);
    header_only.truncate(16);
    let err = monitor
        .upload_video(Upload::new("empty.mp4", header_only))
        .unwrap_err();
    assert_eq!(err.http_status(), 400);
    assert_eq!(err.body.error, "video contains no frames");

    let err = monitor
        .upload_video(Upload::new("junk.avi", b"RIFF....AVI garbage".to_vec()))
        .unwrap_err();
    assert_eq!(err.http_status(), 400);

    let err = monitor
        .upload_video(Upload::new("still.png", gray_png(8, 8)))
        .unwrap_err();
    assert_eq!(err.body.error, "Invalid video file type");

    assert_eq!(file_count(monitor.store().upload_dir()), 0);
    assert_eq!(file_count(monitor.store().results_dir()), 0);
}

#[test]
fn failure_mid_video_removes_partial_output() {
    let dir = TempDir::new().unwrap();
    let backend = two_workers().with_steps([
        ScriptedStep::Predict(Vec::new()),
        ScriptedStep::Fail("device lost".to_string()),
    ]);
    let monitor = monitor_with(&dir, DetectorSlot::preloaded(backend));

    let err = monitor
        .upload_video(Upload::new("shift.mp4", clip(4)))
        .unwrap_err();
    assert_eq!(err.http_status(), 500);
    assert_eq!(file_count(monitor.store().results_dir()), 0);
    assert_eq!(file_count(monitor.store().upload_dir()), 0);
}

#[test]
fn reset_clears_stats_and_stored_files() {
    let dir = TempDir::new().unwrap();
    let monitor = monitor_with(&dir, DetectorSlot::preloaded(two_workers()));

    monitor
        .upload_image(Upload::new("a.png", gray_png(100, 100)))
        .unwrap();
    monitor
        .upload_video(Upload::new("b.mp4", clip(2)))
        .unwrap();
    assert!(file_count(monitor.store().results_dir()) > 0);

    let response = monitor.reset_stats().expect("reset");
    assert!(response.success);

    let stats = monitor.stats();
    assert_eq!(stats.total_detections, 0);
    assert!(stats.class_counts.values().all(|count| *count == 0));
    assert!(stats.recent_detections.is_empty());
    assert_eq!(file_count(monitor.store().upload_dir()), 0);
    assert_eq!(file_count(monitor.store().results_dir()), 0);
}
