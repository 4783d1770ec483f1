use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tempfile::{tempdir, TempDir};

use video_detector::session::NoProgress;
use video_detector::video::{FrameRate, FrameSink, FrameSource, SinkSpec, Y4mSink, Y4mSource, MP4V_FOURCC};
use video_detector::{
    DefaultCodec, DetectOptions, DetectionResult, Frame, FrameProcessor, Inference,
    InferenceCapability, InputError, LabelVocabulary, Presenter, ReplayBackend, RunReport,
    Session, SessionConfig, TrackerKind, Upload, WORKING_HEIGHT, WORKING_WIDTH,
};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 36;

/// Three frames: two cars, one person, nothing.
const CARS_THEN_PERSON: &str = r#"[
    {"frame": 0, "detections": [
        {"class_id": 2, "bbox": [10, 10, 80, 60], "confidence": 0.9},
        {"class_id": 2, "bbox": [200, 40, 300, 120], "confidence": 0.8}
    ]},
    {"frame": 1, "detections": [
        {"class_id": 0, "bbox": [400, 100, 460, 300], "confidence": 0.85}
    ]}
]"#;

fn write_video(path: &Path, frames: u32) -> Result<()> {
    write_sized_video(path, frames, WIDTH, HEIGHT)
}

fn write_sized_video(path: &Path, frames: u32, width: u32, height: u32) -> Result<()> {
    let spec = SinkSpec {
        frame_rate: FrameRate::new(25, 1)?,
        width,
        height,
        fourcc: MP4V_FOURCC,
    };
    let mut sink = Y4mSink::create(path, spec)?;
    for i in 0..frames {
        let shade = (i * 40) as u8;
        sink.write(&Frame::filled(width, height, [shade, 90, 200 - shade])?)?;
    }
    sink.finish()
}

fn session_config(root: &TempDir, tracking: bool) -> SessionConfig {
    let workdir = root.path().join("videos");
    SessionConfig {
        default_video: workdir.join("default.y4m"),
        workdir,
        output_dir: root.path().join("out"),
        allowed_extensions: vec!["mp4".into(), "y4m".into()],
        options: DetectOptions {
            confidence: 0.4,
            tracking,
            tracker: TrackerKind::ByteTrack,
        },
    }
}

fn session(config: SessionConfig) -> Session {
    Session::new(config, FrameProcessor::default()).with_codec(Box::new(DefaultCodec), "y4m")
}

fn replay(script: &str) -> Result<Inference> {
    Ok(Inference::new(Box::new(ReplayBackend::from_json(
        script,
        LabelVocabulary::coco(),
    )?)))
}

fn upload(root: &TempDir, name: &str, frames: u32) -> Result<Upload> {
    let scratch = root.path().join("scratch");
    fs::create_dir_all(&scratch)?;
    let path = scratch.join(name);
    write_video(&path, frames)?;
    Upload::from_path(&path)
}

#[derive(Default)]
struct RecordingPresenter {
    output: Option<PathBuf>,
    existed: bool,
    frames: u64,
    dims: Option<(u32, u32)>,
    first_frame: Option<Frame>,
}

impl Presenter for RecordingPresenter {
    fn present(&mut self, output: &Path, _report: &RunReport) -> Result<()> {
        self.output = Some(output.to_path_buf());
        self.existed = output.is_file();
        let mut source = Y4mSource::open(output)?;
        while let Some(frame) = source.next_frame()? {
            self.dims = Some(frame.dimensions());
            self.frames += 1;
            if self.first_frame.is_none() {
                self.first_frame = Some(frame);
            }
        }
        Ok(())
    }
}

fn input_error_code(err: &anyhow::Error) -> Option<&'static str> {
    err.downcast_ref::<InputError>().map(|e| e.code)
}

#[test]
fn per_frame_summaries_and_cumulative_ids() -> Result<()> {
    let root = tempdir()?;
    let session = session(session_config(&root, false));
    let mut inference = replay(CARS_THEN_PERSON)?;
    let mut presenter = RecordingPresenter::default();

    let upload = upload(&root, "street.y4m", 3)?;
    let report = session.run(Some(upload), &mut inference, &mut presenter, &mut NoProgress)?;

    assert_eq!(report.frames, 3);
    assert_eq!(report.class_ids, vec![2, 2, 0]);
    assert_eq!(report.frame_summaries, vec!["car: 2", "person: 1", ""]);
    assert_eq!(report.summary, "car: 2, person: 1");
    assert_eq!(report.session_id, session.id());
    Ok(())
}

#[test]
fn output_exists_only_during_presentation() -> Result<()> {
    let root = tempdir()?;
    let session = session(session_config(&root, false));
    let mut inference = replay(CARS_THEN_PERSON)?;
    let mut presenter = RecordingPresenter::default();

    let upload = upload(&root, "street.y4m", 3)?;
    session.run(Some(upload), &mut inference, &mut presenter, &mut NoProgress)?;

    let output = presenter.output.clone().expect("presenter was called");
    assert_eq!(output, session.output_path());
    assert!(presenter.existed);
    assert_eq!(presenter.frames, 3);
    // Annotated frames are written back at the source resolution.
    assert_eq!(presenter.dims, Some((WIDTH, HEIGHT)));
    assert!(!output.exists());
    Ok(())
}

#[test]
fn encoded_frames_carry_the_count_summary() -> Result<()> {
    let root = tempdir()?;
    let session = session(session_config(&root, false));
    let script = r#"[
        {"frame": 0, "detections": [{"class_id": 0, "bbox": [560, 300, 640, 390], "confidence": 0.9}]}
    ]"#;
    let mut inference = replay(script)?;
    let mut presenter = RecordingPresenter::default();

    let scratch = root.path().join("scratch");
    fs::create_dir_all(&scratch)?;
    let path = scratch.join("crossing.y4m");
    write_sized_video(&path, 1, WORKING_WIDTH, WORKING_HEIGHT)?;
    let report = session.run(
        Some(Upload::from_path(&path)?),
        &mut inference,
        &mut presenter,
        &mut NoProgress,
    )?;
    assert_eq!(report.frame_summaries, vec!["person: 1"]);

    let frame = presenter.first_frame.expect("one frame was encoded");
    // The person box sits bottom right; the top centre band holds only the summary.
    let green = frame
        .image()
        .enumerate_pixels()
        .filter(|(x, y, px)| {
            (200..520).contains(x)
                && (10..60).contains(y)
                && px.0[1] > 200
                && px.0[0] < 80
                && px.0[2] < 80
        })
        .count();
    assert!(green > 20, "summary missing from encoded frame ({} px)", green);

    let above_margin = frame
        .image()
        .enumerate_pixels()
        .filter(|(_, y, px)| *y < 8 && px.0[1] > 200 && px.0[0] < 80 && px.0[2] < 80)
        .count();
    assert_eq!(above_margin, 0);
    Ok(())
}

#[test]
fn uploaded_file_is_deleted_after_run() -> Result<()> {
    let root = tempdir()?;
    let config = session_config(&root, false);
    let session = session(config.clone());
    let mut inference = replay("[]")?;

    let upload = upload(&root, "clip.y4m", 2)?;
    let report = session.run(
        Some(upload),
        &mut inference,
        &mut RecordingPresenter::default(),
        &mut NoProgress,
    )?;

    assert_eq!(report.input, config.workdir.join(session.id()).join("clip.y4m"));
    assert!(!report.input.exists());
    assert!(!config.workdir.join(session.id()).exists());
    assert_eq!(report.summary, "");
    Ok(())
}

#[test]
fn default_video_is_never_deleted() -> Result<()> {
    let root = tempdir()?;
    let config = session_config(&root, false);
    fs::create_dir_all(&config.workdir)?;
    write_video(&config.default_video, 2)?;
    let session = session(config.clone());
    let mut inference = replay(CARS_THEN_PERSON)?;

    let report = session.run(
        None,
        &mut inference,
        &mut RecordingPresenter::default(),
        &mut NoProgress,
    )?;

    assert_eq!(report.input, config.default_video);
    assert_eq!(report.frames, 2);
    assert!(config.default_video.is_file());
    Ok(())
}

#[test]
fn missing_default_video_reports_input_error() -> Result<()> {
    let root = tempdir()?;
    let config = session_config(&root, false);
    let session = session(config.clone());
    let mut inference = replay("[]")?;
    let mut presenter = RecordingPresenter::default();

    let err = session
        .run(None, &mut inference, &mut presenter, &mut NoProgress)
        .expect_err("default video is missing");

    assert_eq!(input_error_code(&err), Some("DEFAULT_VIDEO_MISSING"));
    assert!(presenter.output.is_none());
    assert!(!session.output_path().exists());
    Ok(())
}

#[test]
fn unreadable_upload_reports_input_error_and_is_removed() -> Result<()> {
    let root = tempdir()?;
    let config = session_config(&root, false);
    let session = session(config.clone());
    let mut inference = replay("[]")?;

    let err = session
        .run(
            Some(Upload::new("broken.y4m", b"not a video".to_vec())),
            &mut inference,
            &mut RecordingPresenter::default(),
            &mut NoProgress,
        )
        .expect_err("garbage must not decode");

    assert_eq!(input_error_code(&err), Some("VIDEO_UNREADABLE"));
    assert!(!config.workdir.join(session.id()).join("broken.y4m").exists());
    Ok(())
}

#[test]
fn disallowed_extension_reports_input_error() -> Result<()> {
    let root = tempdir()?;
    let session = session(session_config(&root, false));
    let mut inference = replay("[]")?;

    let err = session
        .run(
            Some(Upload::new("clip.avi", vec![0u8; 16])),
            &mut inference,
            &mut RecordingPresenter::default(),
            &mut NoProgress,
        )
        .expect_err("avi is not allowed");

    assert_eq!(input_error_code(&err), Some("UPLOAD_EXTENSION_NOT_ALLOWED"));
    Ok(())
}

#[test]
fn cancellation_aborts_and_cleans_up() -> Result<()> {
    let root = tempdir()?;
    let config = session_config(&root, false);
    let session = session(config.clone()).with_cancel_flag(Arc::new(AtomicBool::new(true)));
    let mut inference = replay(CARS_THEN_PERSON)?;
    let mut presenter = RecordingPresenter::default();

    let upload = upload(&root, "street.y4m", 3)?;
    let err = session
        .run(Some(upload), &mut inference, &mut presenter, &mut NoProgress)
        .expect_err("run was cancelled");

    assert!(err.to_string().contains("interrupted"));
    assert!(input_error_code(&err).is_none());
    assert!(presenter.output.is_none());
    assert!(!session.output_path().exists());
    assert!(!config.workdir.join(session.id()).exists());
    Ok(())
}

/// Records the track ids the capability hands back.
struct TrackIds {
    inner: Inference,
    seen: Vec<Vec<Option<u32>>>,
    resets: u32,
}

impl InferenceCapability for TrackIds {
    fn labels(&self) -> &LabelVocabulary {
        self.inner.labels()
    }

    fn detect(&mut self, frame: &Frame, confidence: f32) -> Result<DetectionResult> {
        self.inner.detect(frame, confidence)
    }

    fn track(
        &mut self,
        frame: &Frame,
        confidence: f32,
        tracker: TrackerKind,
        persist: bool,
    ) -> Result<DetectionResult> {
        let result = self.inner.track(frame, confidence, tracker, persist)?;
        self.seen
            .push(result.detections.iter().map(|d| d.track_id).collect());
        Ok(result)
    }

    fn reset_tracking(&mut self) {
        self.resets += 1;
        self.inner.reset_tracking();
    }
}

#[test]
fn tracking_keeps_ids_stable_across_frames() -> Result<()> {
    let root = tempdir()?;
    let session = session(session_config(&root, true));
    let script = r#"[
        {"frame": 0, "detections": [{"class_id": 2, "bbox": [100, 100, 160, 140], "confidence": 0.9}]},
        {"frame": 1, "detections": [{"class_id": 2, "bbox": [104, 100, 164, 140], "confidence": 0.9}]},
        {"frame": 2, "detections": [{"class_id": 2, "bbox": [108, 101, 168, 141], "confidence": 0.9}]},
        {"frame": 3, "detections": [{"class_id": 2, "bbox": [112, 101, 172, 141], "confidence": 0.9}]}
    ]"#;
    let mut inference = TrackIds {
        inner: replay(script)?,
        seen: Vec::new(),
        resets: 0,
    };

    let upload = upload(&root, "drive.y4m", 4)?;
    let report = session.run(
        Some(upload),
        &mut inference,
        &mut RecordingPresenter::default(),
        &mut NoProgress,
    )?;

    assert_eq!(inference.resets, 1);
    assert_eq!(report.frame_summaries, vec!["car: 1"; 4]);
    assert_eq!(inference.seen.len(), 4);
    let first = inference.seen[0].clone();
    assert_eq!(first.len(), 1);
    assert!(first[0].is_some());
    for ids in &inference.seen {
        assert_eq!(ids, &first);
    }
    Ok(())
}
