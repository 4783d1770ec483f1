//! YUV4MPEG2 (`.y4m`) source and sink.
//!
//! Uncompressed planar video with a one-line text header. The reader accepts
//! 4:4:4 and 4:2:0 chroma; the writer always emits 4:4:4 so annotated colours
//! survive untouched by subsampling.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::yuv::{rgb_to_yuv444, yuv_to_rgb, Chroma};
use super::{FrameRate, FrameSink, FrameSource, SinkSpec, SourceInfo};
use crate::frame::Frame;

const MAGIC: &str = "YUV4MPEG2";
const FRAME_TAG: &str = "FRAME";

struct Header {
    width: u32,
    height: u32,
    frame_rate: FrameRate,
    chroma: Chroma,
}

fn parse_header(line: &str) -> Result<Header> {
    let mut tokens = line.split_ascii_whitespace();
    if tokens.next() != Some(MAGIC) {
        return Err(anyhow!("not a YUV4MPEG2 stream"));
    }

    let mut width = None;
    let mut height = None;
    let mut frame_rate = None;
    let mut chroma = Chroma::C420;
    for token in tokens {
        if !token.is_char_boundary(1) {
            continue;
        }
        let (tag, value) = token.split_at(1);
        match tag {
            "W" => width = Some(value.parse::<u32>().context("invalid W in y4m header")?),
            "H" => height = Some(value.parse::<u32>().context("invalid H in y4m header")?),
            "F" => {
                let (num, den) = value
                    .split_once(':')
                    .ok_or_else(|| anyhow!("invalid F in y4m header: {}", value))?;
                frame_rate = Some(FrameRate::new(
                    num.parse().context("invalid F numerator in y4m header")?,
                    den.parse().context("invalid F denominator in y4m header")?,
                )?);
            }
            "C" => {
                chroma = match value {
                    "444" => Chroma::C444,
                    "420" | "420jpeg" | "420paldv" | "420mpeg2" => Chroma::C420,
                    other => return Err(anyhow!("unsupported y4m colour space C{}", other)),
                }
            }
            _ => {}
        }
    }

    let width = width.ok_or_else(|| anyhow!("y4m header missing W"))?;
    let height = height.ok_or_else(|| anyhow!("y4m header missing H"))?;
    if width == 0 || height == 0 {
        return Err(anyhow!("y4m header has zero dimensions"));
    }
    Ok(Header {
        width,
        height,
        frame_rate: frame_rate.ok_or_else(|| anyhow!("y4m header missing F"))?,
        chroma,
    })
}

// ----------------------------------------------------------------------------
// Source
// ----------------------------------------------------------------------------

pub struct Y4mSource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    info: SourceInfo,
    chroma: Chroma,
    frame_len: usize,
    frames_read: u64,
}

impl Y4mSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open y4m input '{}'", path.display()))?;
        let file_len = file.metadata().map(|m| m.len()).ok();
        let mut reader = BufReader::new(file);

        let mut line = String::new();
        let header_len = reader
            .read_line(&mut line)
            .with_context(|| format!("failed to read y4m header from '{}'", path.display()))?;
        let header = parse_header(line.trim_end())
            .with_context(|| format!("invalid y4m header in '{}'", path.display()))?;
        let frame_len = header.chroma.frame_len(header.width, header.height)?;

        // Exact when frame headers carry no parameters, which is the norm.
        let per_frame = (FRAME_TAG.len() + 1 + frame_len) as u64;
        let frame_count = file_len
            .map(|len| len.saturating_sub(header_len as u64))
            .filter(|body| body % per_frame == 0)
            .map(|body| body / per_frame);

        log::info!(
            "Y4mSource: opened {} ({}x{} @ {} fps)",
            path.display(),
            header.width,
            header.height,
            header.frame_rate
        );

        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(reader),
            info: SourceInfo {
                frame_rate: header.frame_rate,
                width: header.width,
                height: header.height,
                frame_count,
            },
            chroma: header.chroma,
            frame_len,
            frames_read: 0,
        })
    }
}

impl FrameSource for Y4mSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let mut tag = Vec::new();
        let read = reader
            .read_until(b'\n', &mut tag)
            .context("failed to read y4m frame header")?;
        if read == 0 {
            return Ok(None);
        }
        if !tag.starts_with(FRAME_TAG.as_bytes()) {
            return Err(anyhow!(
                "corrupt y4m stream in '{}' at frame {}",
                self.path.display(),
                self.frames_read
            ));
        }

        let mut planes = vec![0u8; self.frame_len];
        reader.read_exact(&mut planes).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                anyhow!("truncated y4m frame {}", self.frames_read)
            } else {
                anyhow!("failed to read y4m frame {}: {}", self.frames_read, e)
            }
        })?;

        let rgb = yuv_to_rgb(&planes, self.info.width, self.info.height, self.chroma)?;
        self.frames_read += 1;
        Ok(Some(Frame::from_rgb(self.info.width, self.info.height, rgb)?))
    }

    fn release(&mut self) {
        if self.reader.take().is_some() {
            log::info!(
                "Y4mSource: released {} after {} frames",
                self.path.display(),
                self.frames_read
            );
        }
    }
}

impl Drop for Y4mSource {
    fn drop(&mut self) {
        self.release();
    }
}

// ----------------------------------------------------------------------------
// Sink
// ----------------------------------------------------------------------------

pub struct Y4mSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    spec: SinkSpec,
    frames_written: u64,
}

impl Y4mSink {
    /// Create the file and write the stream header. The fourcc in `spec`
    /// does not apply to raw video and is ignored.
    pub fn create(path: &Path, spec: SinkSpec) -> Result<Self> {
        if spec.width == 0 || spec.height == 0 {
            return Err(anyhow!("sink dimensions must be non-zero"));
        }
        let file = File::create(path)
            .with_context(|| format!("failed to create y4m output '{}'", path.display()))?;
        let mut writer = BufWriter::new(file);
        writeln!(
            writer,
            "{} W{} H{} F{}:{} Ip A1:1 C444",
            MAGIC, spec.width, spec.height, spec.frame_rate.num, spec.frame_rate.den
        )
        .with_context(|| format!("failed to write y4m header to '{}'", path.display()))?;

        log::info!(
            "Y4mSink: writing {} ({}x{} @ {} fps)",
            path.display(),
            spec.width,
            spec.height,
            spec.frame_rate
        );

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            spec,
            frames_written: 0,
        })
    }
}

impl FrameSink for Y4mSink {
    fn spec(&self) -> &SinkSpec {
        &self.spec
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("y4m sink '{}' already finished", self.path.display()))?;
        if frame.dimensions() != (self.spec.width, self.spec.height) {
            return Err(anyhow!(
                "frame is {}x{}, sink expects {}x{}",
                frame.width(),
                frame.height(),
                self.spec.width,
                self.spec.height
            ));
        }
        writer.write_all(FRAME_TAG.as_bytes())?;
        writer.write_all(b"\n")?;
        writer
            .write_all(&rgb_to_yuv444(frame.pixels()))
            .with_context(|| format!("failed to write frame to '{}'", self.path.display()))?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("failed to flush '{}'", self.path.display()))?;
            log::info!(
                "Y4mSink: finished {} ({} frames)",
                self.path.display(),
                self.frames_written
            );
        }
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Drop for Y4mSink {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            log::warn!("Y4mSink: close on drop failed: {:#}", err);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
