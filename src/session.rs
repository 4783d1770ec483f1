//! Video orchestration: resolve the input, stream it through the frame
//! processor into an encoded output, present the result, clean up.
//!
//! Every transient file (the persisted upload and the output video) is owned
//! by a [`TransientFile`] guard, so it is deleted on success, on error and on
//! interrupt alike. The bundled default video is never owned by a guard.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::AppConfig;
use crate::detect::InferenceCapability;
use crate::overlay::ClassCountTable;
use crate::presenter::Presenter;
use crate::processor::{DetectOptions, FrameProcessor};
use crate::video::{Codec, DefaultCodec, FrameSource, SinkSpec, SourceInfo};
use crate::{new_session_id, InputError};

const OUTPUT_STEM: &str = "processed_video";

// ----------------------------------------------------------------------------
// Configuration and inputs
// ----------------------------------------------------------------------------

/// Everything one session needs, resolved from [`AppConfig`] and CLI flags.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub workdir: PathBuf,
    pub default_video: PathBuf,
    pub output_dir: PathBuf,
    /// Lowercase, without the leading dot.
    pub allowed_extensions: Vec<String>,
    pub options: DetectOptions,
}

impl SessionConfig {
    pub fn from_app(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            workdir: config.workdir.clone(),
            default_video: config.default_video_path(),
            output_dir: config.output_dir.clone(),
            allowed_extensions: config.allowed_extensions.clone(),
            options: DetectOptions {
                confidence: config.detection.confidence,
                tracking: config.tracking.enabled,
                tracker: config.tracker_kind()?,
            },
        })
    }

    fn extension_allowed(&self, ext: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }
}

/// A user-supplied video: its original file name and contents.
#[derive(Clone, Debug)]
pub struct Upload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Read a file from disk as if the user had uploaded it.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| InputError {
            code: "UPLOAD_UNREADABLE",
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { name, bytes })
    }
}

/// Deletes its file when dropped. Optionally removes the (then empty)
/// directory that contained it.
#[derive(Debug)]
pub struct TransientFile {
    path: PathBuf,
    remove_parent: bool,
}

impl TransientFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            remove_parent: false,
        }
    }

    fn with_parent(path: PathBuf) -> Self {
        Self {
            path,
            remove_parent: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransientFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("removed transient file {}", self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => log::warn!(
                "failed to remove transient file {}: {}",
                self.path.display(),
                err
            ),
        }
        if self.remove_parent {
            if let Some(parent) = self.path.parent() {
                if let Err(err) = fs::remove_dir(parent) {
                    log::debug!("kept directory {}: {}", parent.display(), err);
                }
            }
        }
    }
}

/// The video a session reads from.
#[derive(Debug)]
pub struct ResolvedInput {
    path: PathBuf,
    upload: Option<TransientFile>,
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_upload(&self) -> bool {
        self.upload.is_some()
    }
}

// ----------------------------------------------------------------------------
// Reports and progress
// ----------------------------------------------------------------------------

/// What a preview learned about the resolved video.
#[derive(Clone, Debug)]
pub struct Preview {
    pub path: PathBuf,
    pub uploaded: bool,
    pub info: SourceInfo,
}

/// Outcome of one detection run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub session_id: String,
    pub input: PathBuf,
    pub frames: u64,
    /// Class identifiers of every frame, concatenated in frame order.
    pub class_ids: Vec<u32>,
    /// Overlay summary of each frame; empty strings for frames without detections.
    pub frame_summaries: Vec<String>,
    /// Counts over the whole video.
    pub summary: String,
    pub elapsed: Duration,
}

/// Observer for the frame loop.
pub trait RunProgress {
    fn started(&mut self, _info: &SourceInfo) {}

    fn frame_done(&mut self, _index: u64, _summary: &str) {}

    fn finished(&mut self) {}
}

/// Progress observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl RunProgress for NoProgress {}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

pub struct Session {
    id: String,
    config: SessionConfig,
    processor: FrameProcessor,
    codec: Box<dyn Codec>,
    output_extension: String,
    cancel: Arc<AtomicBool>,
}

impl Session {
    pub fn new(config: SessionConfig, processor: FrameProcessor) -> Self {
        let codec = DefaultCodec;
        Self {
            id: new_session_id(),
            config,
            processor,
            output_extension: codec.output_extension().to_string(),
            codec: Box::new(codec),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the codec and the extension given to output files.
    pub fn with_codec(mut self, codec: Box<dyn Codec>, output_extension: &str) -> Self {
        self.codec = codec;
        self.output_extension = output_extension.trim_start_matches('.').to_string();
        self
    }

    /// Share a flag that aborts the frame loop once set.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn output_path(&self) -> PathBuf {
        self.config.output_dir.join(format!(
            "{}-{}.{}",
            OUTPUT_STEM, self.id, self.output_extension
        ))
    }

    /// Persist the upload or locate the default video.
    ///
    /// Every failure is an [`InputError`].
    pub fn resolve_input(&self, upload: Option<Upload>) -> Result<ResolvedInput> {
        let Some(upload) = upload else {
            let path = self.config.default_video.clone();
            if !path.is_file() {
                return Err(InputError {
                    code: "DEFAULT_VIDEO_MISSING",
                    message: format!("default video {} does not exist", path.display()),
                }
                .into());
            }
            return Ok(ResolvedInput { path, upload: None });
        };

        let name = self.sanitize_upload_name(&upload.name)?;
        if upload.bytes.is_empty() {
            return Err(InputError {
                code: "UPLOAD_EMPTY",
                message: format!("uploaded file {} is empty", name),
            }
            .into());
        }

        let dir = self.config.workdir.join(&self.id);
        let path = dir.join(&name);
        let persist = fs::create_dir_all(&dir).and_then(|()| fs::write(&path, &upload.bytes));
        // The guard exists before the write result is inspected so a partial file goes too.
        let guard = TransientFile::with_parent(path.clone());
        if let Err(err) = persist {
            return Err(InputError {
                code: "UPLOAD_PERSIST_FAILED",
                message: format!("failed to store upload at {}: {}", path.display(), err),
            }
            .into());
        }
        log::info!(
            "session {}: stored upload {} ({} bytes)",
            self.id,
            path.display(),
            upload.bytes.len()
        );
        Ok(ResolvedInput {
            path,
            upload: Some(guard),
        })
    }

    fn sanitize_upload_name(&self, raw: &str) -> Result<String> {
        let name = Path::new(raw.trim())
            .components()
            .next_back()
            .and_then(|component| match component {
                Component::Normal(name) => name.to_str(),
                _ => None,
            })
            .map(str::to_string)
            .ok_or_else(|| InputError {
                code: "UPLOAD_NAME_INVALID",
                message: format!("'{}' is not a usable file name", raw),
            })?;

        let ext = Path::new(&name)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        if !self.config.extension_allowed(ext) {
            return Err(InputError {
                code: "UPLOAD_EXTENSION_NOT_ALLOWED",
                message: format!(
                    "{} has an unsupported extension (allowed: {})",
                    name,
                    self.config.allowed_extensions.join(", ")
                ),
            }
            .into());
        }
        Ok(name)
    }

    /// Resolve the input and report its stream properties without processing.
    pub fn preview(&self, upload: Option<Upload>) -> Result<Preview> {
        let input = self.resolve_input(upload)?;
        let mut source = self.open_source(input.path())?;
        let info = source.info().clone();
        source.release();
        Ok(Preview {
            path: input.path().to_path_buf(),
            uploaded: input.is_upload(),
            info,
        })
    }

    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        self.codec.open_source(path).map_err(|err| {
            InputError {
                code: "VIDEO_UNREADABLE",
                message: format!("{:#}", err),
            }
            .into()
        })
    }

    /// Detect over every frame, present the output, then delete it.
    pub fn run(
        &self,
        upload: Option<Upload>,
        inference: &mut dyn InferenceCapability,
        presenter: &mut dyn Presenter,
        progress: &mut dyn RunProgress,
    ) -> Result<RunReport> {
        let input = self.resolve_input(upload)?;
        let output = TransientFile::new(self.output_path());

        let report = self.process_video(input.path(), output.path(), inference, progress)?;
        // Upload is no longer needed once the source is closed.
        drop(input);

        presenter
            .present(output.path(), &report)
            .context("failed to present output")?;
        drop(output);
        Ok(report)
    }

    fn process_video(
        &self,
        input: &Path,
        output: &Path,
        inference: &mut dyn InferenceCapability,
        progress: &mut dyn RunProgress,
    ) -> Result<RunReport> {
        let started = Instant::now();
        let mut source = self.open_source(input)?;
        let info = source.info().clone();

        fs::create_dir_all(&self.config.output_dir).with_context(|| {
            format!(
                "failed to create output directory {}",
                self.config.output_dir.display()
            )
        })?;
        let spec = SinkSpec::matching(&info);
        let mut sink = self.codec.open_sink(output, spec.clone())?;

        log::info!(
            "session {}: processing {} ({}x{} @ {} fps) into {}",
            self.id,
            input.display(),
            info.width,
            info.height,
            info.frame_rate,
            output.display()
        );

        inference.reset_tracking();
        progress.started(&info);

        let mut frames = 0u64;
        let mut class_ids = Vec::new();
        let mut frame_summaries = Vec::new();
        while let Some(frame) = source.next_frame()? {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(anyhow!("interrupted after {} frames", frames));
            }
            let processed = self
                .processor
                .process(inference, &frame, &self.config.options)
                .with_context(|| format!("frame {}", frames))?;
            log::debug!("frame {}: [{}]", frames, processed.summary);

            let annotated = if processed.frame.dimensions() == (spec.width, spec.height) {
                processed.frame
            } else {
                processed.frame.resized(spec.width, spec.height)
            };
            sink.write(&annotated)
                .with_context(|| format!("failed to write frame {}", frames))?;

            class_ids.extend(processed.class_ids);
            progress.frame_done(frames, &processed.summary);
            frame_summaries.push(processed.summary);
            frames += 1;
        }

        sink.finish()?;
        source.release();
        progress.finished();

        let summary = ClassCountTable::from_class_ids(&class_ids, inference.labels()).summary();
        log::info!(
            "session {}: {} frames, {} detections [{}]",
            self.id,
            frames,
            class_ids.len(),
            summary
        );
        Ok(RunReport {
            session_id: self.id.clone(),
            input: input.to_path_buf(),
            frames,
            class_ids,
            frame_summaries,
            summary,
            elapsed: started.elapsed(),
        })
    }
}
