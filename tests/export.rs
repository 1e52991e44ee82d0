//! Clip extraction end to end: frame counts over gappy history, side-by-side
//! composition and the container fallback.

use std::path::Path;
use std::sync::Arc;

use image::{Rgb, RgbImage};

use hindsight::codec::JpegCodec;
use hindsight::export::{
    extract, spawn_export, ClipJob, ClipSink, MemorySink, SinkFormat, ViewMode,
};
use hindsight::pipeline::RingStore;
use hindsight::ExportConfig;

const RED: Rgb<u8> = Rgb([230, 20, 20]);
const BLUE: Rgb<u8> = Rgb([20, 20, 230]);

fn store(dir: &Path, label: &str) -> Arc<RingStore> {
    Arc::new(RingStore::with_dir(label, dir.join(label), 1000, 90, Arc::new(JpegCodec)).unwrap())
}

fn export_config(dir: &Path, width: u32, height: u32) -> ExportConfig {
    ExportConfig {
        dir: dir.to_path_buf(),
        width,
        height,
        fps: 30,
        clip_secs: 20.0,
        quality: 80,
    }
}

fn close_to(p: &Rgb<u8>, want: Rgb<u8>) -> bool {
    p.0.iter().zip(want.0.iter()).all(|(a, b)| a.abs_diff(*b) < 40)
}

fn u32_at(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(data[at..at + 4].try_into().unwrap())
}

#[test]
fn twenty_seconds_at_thirty_fps_is_six_hundred_frames_despite_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let cam1 = store(dir.path(), "0");
    let cam2 = store(dir.path(), "1");
    // camera 1 has a 12 s hole, camera 2 only starts halfway through
    for ts in [100.0, 101.0, 102.0, 114.0, 115.0, 119.5] {
        cam1.write(&RgbImage::from_pixel(16, 8, RED), ts);
    }
    for ts in [110.0, 112.0, 118.0] {
        cam2.write(&RgbImage::from_pixel(16, 8, BLUE), ts);
    }

    let job = ClipJob::new(
        [cam1, cam2],
        100.0,
        120.0,
        ViewMode::SideBySide,
        &export_config(dir.path(), 32, 8),
    );
    let mut sink = MemorySink::default();
    let summary = extract(&job, &mut sink).unwrap();

    assert_eq!(summary.frames, 600);
    assert_eq!(sink.frames.len(), 600);
    assert_eq!(summary.blank_regions, 0);
    assert!(sink.frames.iter().all(|f| f.dimensions() == (32, 8)));
}

#[test]
fn side_by_side_letterboxes_sources_with_different_shapes() {
    let dir = tempfile::tempdir().unwrap();
    let wide = store(dir.path(), "0");
    let tall = store(dir.path(), "1");
    wide.write(&RgbImage::from_pixel(64, 16, RED), 50.0);
    tall.write(&RgbImage::from_pixel(16, 32, BLUE), 50.0);

    let job = ClipJob {
        stores: [wide, tall],
        start: 49.0,
        end: 51.0,
        cadence: 2.0,
        mode: ViewMode::SideBySide,
        width: 128,
        height: 64,
    };
    let mut sink = MemorySink::default();
    extract(&job, &mut sink).unwrap();
    let frame = &sink.frames[0];

    // left half 64x64: the 4:1 source becomes 64x16 at rows 24..40
    assert!(close_to(frame.get_pixel(32, 32), RED));
    assert!(close_to(frame.get_pixel(32, 4), Rgb([0, 0, 0])));
    assert!(close_to(frame.get_pixel(32, 60), Rgb([0, 0, 0])));
    // right half 64x64: the 1:2 source becomes 32x64 at columns 80..112
    assert!(close_to(frame.get_pixel(96, 32), BLUE));
    assert!(close_to(frame.get_pixel(70, 32), Rgb([0, 0, 0])));
    assert!(close_to(frame.get_pixel(120, 32), Rgb([0, 0, 0])));
}

#[test]
fn avi_header_reports_written_frames() {
    let dir = tempfile::tempdir().unwrap();
    let cam = store(dir.path(), "0");
    cam.write(&RgbImage::from_pixel(16, 8, RED), 10.0);

    let job = ClipJob {
        stores: [cam.clone(), cam],
        start: 10.0,
        end: 11.0,
        cadence: 15.0,
        mode: ViewMode::Camera1,
        width: 16,
        height: 8,
    };
    let mut sink = SinkFormat::MjpegAvi
        .open(&dir.path().join("clip.mp4"), 15, 16, 8, 80)
        .unwrap();
    let summary = extract(&job, sink.as_mut()).unwrap();
    let out = sink.finish().unwrap();

    assert_eq!(out.extension().unwrap(), "avi");
    let data = std::fs::read(&out).unwrap();
    assert_eq!(&data[0..4], b"RIFF");
    assert_eq!(&data[8..12], b"AVI ");
    assert_eq!(u32_at(&data, 48) as usize, summary.frames);
    assert_eq!(summary.frames, 15);
}

#[test]
fn background_export_falls_back_to_avi() {
    let dir = tempfile::tempdir().unwrap();
    let cam1 = store(dir.path(), "0");
    let cam2 = store(dir.path(), "1");
    cam1.write(&RgbImage::from_pixel(16, 8, RED), 5.0);
    cam2.write(&RgbImage::from_pixel(16, 8, BLUE), 5.0);

    let mut cfg = export_config(dir.path(), 32, 16);
    cfg.fps = 10;
    let job = ClipJob::new([cam1, cam2], 4.0, 6.0, ViewMode::SideBySide, &cfg);
    let handle = spawn_export(job, dir.path().join("clip_both.mp4"), &cfg).unwrap();
    assert_eq!(handle.mode(), ViewMode::SideBySide);

    let out = handle.wait().unwrap();
    assert!(out.exists());
    assert_eq!(out.file_stem().unwrap(), "clip_both");
    #[cfg(not(feature = "gstreamer-pipeline"))]
    assert_eq!(out.extension().unwrap(), "avi");
}
