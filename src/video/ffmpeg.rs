//! FFmpeg-backed video source and sink.
//!
//! The source decodes the best video stream of any container FFmpeg reads
//! and converts frames to RGB24. The sink encodes RGB24 frames with the
//! MPEG-4 Part 2 encoder, which the mp4 muxer tags as `mp4v`.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{self, flag::Flags};

use super::{FrameRate, FrameSink, FrameSource, SinkSpec, SourceInfo, MP4V_FOURCC};
use crate::frame::Frame;

// ----------------------------------------------------------------------------
// Source
// ----------------------------------------------------------------------------

pub(crate) struct FfmpegSource {
    path: PathBuf,
    input: Option<ffmpeg::format::context::Input>,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: scaling::Context,
    info: SourceInfo,
    eof_sent: bool,
    frames_read: u64,
}

impl FfmpegSource {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", path.display()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let rate = input_stream.avg_frame_rate();
        let frames = input_stream.frames();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let frame_rate = FrameRate::new(
            u32::try_from(rate.numerator()).unwrap_or(0),
            u32::try_from(rate.denominator()).unwrap_or(0),
        )
        .context("stream does not declare a usable frame rate")?;
        let info = SourceInfo {
            frame_rate,
            width: decoder.width(),
            height: decoder.height(),
            frame_count: u64::try_from(frames).ok().filter(|n| *n > 0),
        };

        log::info!(
            "FfmpegSource: opened {} ({}x{} @ {} fps)",
            path.display(),
            info.width,
            info.height,
            info.frame_rate
        );

        Ok(Self {
            path: path.to_path_buf(),
            input: Some(input),
            stream_index,
            decoder,
            scaler,
            info,
            eof_sent: false,
            frames_read: 0,
        })
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Self {
            input,
            stream_index,
            decoder,
            scaler,
            eof_sent,
            frames_read,
            ..
        } = self;

        // Frames already queued in the decoder come first.
        if let Some(frame) = receive_frame(decoder, scaler, frames_read)? {
            return Ok(Some(frame));
        }
        let Some(input) = input.as_mut() else {
            return Ok(None);
        };

        for (stream, packet) in input.packets() {
            if stream.index() != *stream_index {
                continue;
            }
            decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            if let Some(frame) = receive_frame(decoder, scaler, frames_read)? {
                return Ok(Some(frame));
            }
        }

        if !*eof_sent {
            *eof_sent = true;
            decoder.send_eof().context("flush ffmpeg decoder")?;
        }
        receive_frame(decoder, scaler, frames_read)
    }

    fn release(&mut self) {
        if self.input.take().is_some() {
            log::info!(
                "FfmpegSource: released {} after {} frames",
                self.path.display(),
                self.frames_read
            );
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Maps a send/receive status to whether the codec produced output.
/// `EAGAIN` (needs more input) and `Eof` (fully drained) are not errors.
fn codec_ready(status: std::result::Result<(), ffmpeg::Error>) -> Result<bool> {
    match status {
        Ok(()) => Ok(true),
        Err(ffmpeg::Error::Eof) => Ok(false),
        Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn receive_frame(
    decoder: &mut ffmpeg::codec::decoder::Video,
    scaler: &mut scaling::Context,
    frames_read: &mut u64,
) -> Result<Option<Frame>> {
    let mut decoded = ffmpeg::frame::Video::empty();
    if !codec_ready(decoder.receive_frame(&mut decoded)).context("decode video frame")? {
        return Ok(None);
    }
    let mut rgb_frame = ffmpeg::frame::Video::empty();
    scaler
        .run(&decoded, &mut rgb_frame)
        .context("scale frame to RGB")?;
    let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
    *frames_read += 1;
    Ok(Some(Frame::from_rgb(width, height, pixels)?))
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}

// ----------------------------------------------------------------------------
// Sink
// ----------------------------------------------------------------------------

struct Encoding {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::Video,
    scaler: scaling::Context,
    stream_index: usize,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
}

pub(crate) struct FfmpegSink {
    path: PathBuf,
    spec: SinkSpec,
    encoding: Option<Encoding>,
    frames_written: u64,
}

impl FfmpegSink {
    pub(crate) fn create(path: &Path, spec: SinkSpec) -> Result<Self> {
        if spec.fourcc != MP4V_FOURCC {
            return Err(anyhow!(
                "unsupported fourcc '{}'",
                String::from_utf8_lossy(&spec.fourcc)
            ));
        }
        ffmpeg::init().context("initialize ffmpeg")?;

        let mut output = ffmpeg::format::output(&path)
            .with_context(|| format!("failed to create output '{}' with ffmpeg", path.display()))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or_else(|| anyhow!("ffmpeg build has no MPEG-4 Part 2 encoder"))?;
        let mut stream = output.add_stream(codec).context("add output stream")?;
        let stream_index = stream.index();

        let time_base = ffmpeg::Rational::new(spec.frame_rate.den as i32, spec.frame_rate.num as i32);
        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create ffmpeg video encoder")?;
        encoder.set_width(spec.width);
        encoder.set_height(spec.height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(time_base);
        encoder.set_frame_rate(Some(ffmpeg::Rational::new(
            spec.frame_rate.num as i32,
            spec.frame_rate.den as i32,
        )));
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder
            .open_as(codec)
            .context("open MPEG-4 encoder")?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);

        output
            .write_header()
            .with_context(|| format!("write container header to '{}'", path.display()))?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|s| s.time_base())
            .ok_or_else(|| anyhow!("output stream disappeared after header"))?;

        let scaler = scaling::Context::get(
            Pixel::RGB24,
            spec.width,
            spec.height,
            Pixel::YUV420P,
            spec.width,
            spec.height,
            Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "FfmpegSink: writing {} ({}x{} @ {} fps, mp4v)",
            path.display(),
            spec.width,
            spec.height,
            spec.frame_rate
        );

        Ok(Self {
            path: path.to_path_buf(),
            spec,
            encoding: Some(Encoding {
                output,
                encoder,
                scaler,
                stream_index,
                encoder_time_base: time_base,
                stream_time_base,
            }),
            frames_written: 0,
        })
    }
}

impl Encoding {
    fn drain(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while codec_ready(self.encoder.receive_packet(&mut packet))
            .context("receive packet from MPEG-4 encoder")?
        {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .context("write encoded packet")?;
        }
        Ok(())
    }

    fn close(mut self) -> Result<()> {
        self.encoder.send_eof().context("flush MPEG-4 encoder")?;
        self.drain()?;
        self.output.write_trailer().context("write container trailer")?;
        Ok(())
    }
}

impl FrameSink for FfmpegSink {
    fn spec(&self) -> &SinkSpec {
        &self.spec
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let encoding = self
            .encoding
            .as_mut()
            .ok_or_else(|| anyhow!("sink '{}' already finished", self.path.display()))?;
        if frame.dimensions() != (self.spec.width, self.spec.height) {
            return Err(anyhow!(
                "frame is {}x{}, sink expects {}x{}",
                frame.width(),
                frame.height(),
                self.spec.width,
                self.spec.height
            ));
        }

        let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, frame.width(), frame.height());
        let row_bytes = frame.width() as usize * 3;
        let stride = rgb.stride(0);
        let data = rgb.data_mut(0);
        for (row, src) in frame.pixels().chunks_exact(row_bytes).enumerate() {
            data[row * stride..row * stride + row_bytes].copy_from_slice(src);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        encoding
            .scaler
            .run(&rgb, &mut yuv)
            .context("convert frame to YUV420P")?;
        yuv.set_pts(Some(self.frames_written as i64));
        encoding
            .encoder
            .send_frame(&yuv)
            .context("send frame to MPEG-4 encoder")?;
        encoding.drain()?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(encoding) = self.encoding.take() {
            encoding
                .close()
                .with_context(|| format!("finalize '{}'", self.path.display()))?;
            log::info!(
                "FfmpegSink: finished {} ({} frames)",
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

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            log::warn!("FfmpegSink: close on drop failed: {:#}", err);
        }
    }
}
