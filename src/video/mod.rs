//! Video codecs: frame sources and sinks.
//!
//! - Local `.y4m` files (built in, no native dependencies)
//! - Any container FFmpeg can read, written as MPEG-4 Part 2 `.mp4`
//!   (feature: codec-ffmpeg)
//!
//! Sources and sinks are scoped resources. `release`/`finish` close them
//! explicitly on the success path; `Drop` closes them on every other path.
//! Only local file paths are accepted.

#[cfg(feature = "codec-ffmpeg")]
pub(crate) mod ffmpeg;
mod y4m;
mod yuv;

use std::fmt;
use std::path::Path;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub use y4m::{Y4mSink, Y4mSource};

/// Four-character code of MPEG-4 Part 2 video.
pub const MP4V_FOURCC: [u8; 4] = *b"mp4v";

/// Frame rate as a rational number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Result<Self> {
        if num == 0 || den == 0 {
            return Err(anyhow!("invalid frame rate {}/{}", num, den));
        }
        Ok(Self { num, den })
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{:.3}", self.as_f64())
        }
    }
}

/// Stream properties reported by a source.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceInfo {
    pub frame_rate: FrameRate,
    pub width: u32,
    pub height: u32,
    /// Frame count when the container declares one.
    pub frame_count: Option<u64>,
}

/// Output configuration for a sink.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkSpec {
    pub frame_rate: FrameRate,
    pub width: u32,
    pub height: u32,
    pub fourcc: [u8; 4],
}

impl SinkSpec {
    /// Same rate and size as the source, encoded as `mp4v`.
    pub fn matching(info: &SourceInfo) -> Self {
        Self {
            frame_rate: info.frame_rate,
            width: info.width,
            height: info.height,
            fourcc: MP4V_FOURCC,
        }
    }
}

/// Sequential reader of raw frames.
pub trait FrameSource {
    fn info(&self) -> &SourceInfo;

    /// Next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Close the underlying file. Further reads return `None`.
    fn release(&mut self);
}

/// Sequential writer of raw frames into one encoded file.
pub trait FrameSink {
    fn spec(&self) -> &SinkSpec;

    fn path(&self) -> &Path;

    /// Frame dimensions must equal the sink dimensions.
    fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close. Calling it again is a no-op.
    fn finish(&mut self) -> Result<()>;

    fn frames_written(&self) -> u64;
}

/// Opens sources and sinks for paths.
pub trait Codec {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>>;

    fn open_sink(&self, path: &Path, spec: SinkSpec) -> Result<Box<dyn FrameSink>>;
}

/// Picks an implementation from the file extension.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCodec;

impl DefaultCodec {
    /// Extension the output file should carry for this build.
    pub fn output_extension(&self) -> &'static str {
        if cfg!(feature = "codec-ffmpeg") {
            "mp4"
        } else {
            "y4m"
        }
    }
}

impl Codec for DefaultCodec {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        ensure_local_path(path)?;
        if is_y4m(path) {
            return Ok(Box::new(Y4mSource::open(path)?));
        }
        #[cfg(feature = "codec-ffmpeg")]
        {
            Ok(Box::new(ffmpeg::FfmpegSource::open(path)?))
        }
        #[cfg(not(feature = "codec-ffmpeg"))]
        {
            Err(anyhow!(
                "decoding {} requires the codec-ffmpeg feature",
                path.display()
            ))
        }
    }

    fn open_sink(&self, path: &Path, spec: SinkSpec) -> Result<Box<dyn FrameSink>> {
        ensure_local_path(path)?;
        if is_y4m(path) {
            return Ok(Box::new(Y4mSink::create(path, spec)?));
        }
        #[cfg(feature = "codec-ffmpeg")]
        {
            Ok(Box::new(ffmpeg::FfmpegSink::create(path, spec)?))
        }
        #[cfg(not(feature = "codec-ffmpeg"))]
        {
            Err(anyhow!(
                "encoding {} requires the codec-ffmpeg feature",
                path.display()
            ))
        }
    }
}

fn is_y4m(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("y4m"))
}

fn ensure_local_path(path: &Path) -> Result<()> {
    let raw = path.to_string_lossy();
    if raw.trim().is_empty() {
        return Err(anyhow!("video path is empty"));
    }
    if raw.contains("://") {
        return Err(anyhow!(
            "video codecs only support local paths (no URL schemes): {}",
            raw
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_schemes_are_rejected() {
        let codec = DefaultCodec;
        assert!(codec.open_source(Path::new("rtsp://camera/stream.y4m")).is_err());
        assert!(codec.open_source(Path::new("  ")).is_err());
    }

    #[test]
    fn frame_rate_rejects_zero_terms() {
        assert!(FrameRate::new(0, 1).is_err());
        assert!(FrameRate::new(30, 0).is_err());
        assert_eq!(FrameRate::new(30000, 1001).map(|r| r.to_string()).ok(), Some("29.970".into()));
        assert_eq!(FrameRate::new(25, 1).map(|r| r.to_string()).ok(), Some("25".into()));
    }

    #[test]
    fn sink_spec_matches_source_with_mp4v() -> Result<()> {
        let info = SourceInfo {
            frame_rate: FrameRate::new(24, 1)?,
            width: 1920,
            height: 1080,
            frame_count: Some(10),
        };
        let spec = SinkSpec::matching(&info);
        assert_eq!((spec.width, spec.height), (1920, 1080));
        assert_eq!(spec.frame_rate, info.frame_rate);
        assert_eq!(&spec.fourcc, b"mp4v");
        Ok(())
    }
}
