//! FFmpeg-backed video reader and MPEG-4 writer.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::util::format::pixel::Pixel;
use ffmpeg::Rational;
use image::RgbImage;

use super::video::{VideoInfo, VideoReader, VideoWriter};
use crate::frame::{rgb_from_raw, Frame};

pub(crate) struct FfmpegReader {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    info: VideoInfo,
    sequence: u64,
    eof_sent: bool,
}

impl FfmpegReader {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open '{}' with ffmpeg", path.display()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let rate = input_stream.avg_frame_rate();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let fps = if rate.numerator() > 0 && rate.denominator() > 0 {
            f64::from(rate)
        } else {
            VideoInfo::FALLBACK_FPS
        };
        let info = VideoInfo {
            width: decoder.width(),
            height: decoder.height(),
            fps,
        };
        log::info!(
            "opened video {} ({}x{} @ {:.2} fps)",
            path.display(),
            info.width,
            info.height,
            info.fps
        );

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            info,
            sequence: 0,
            eof_sent: false,
        })
    }

    fn receive(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        let image = rgb_from_raw(width, height, pixels)?;
        let frame = Frame::new(image, self.sequence);
        self.sequence += 1;
        Ok(Some(frame))
    }
}

impl VideoReader for FfmpegReader {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.receive()? {
            return Ok(Some(frame));
        }
        if self.eof_sent {
            return Ok(None);
        }

        while let Some((stream, packet)) = self.input.packets().next() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            if let Some(frame) = self.receive()? {
                return Ok(Some(frame));
            }
        }

        // Drain frames still buffered in the decoder.
        self.decoder.send_eof().context("flush ffmpeg decoder")?;
        self.eof_sent = true;
        self.receive()
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let plane = data
            .get(..len)
            .context("ffmpeg frame plane is shorter than expected")?;
        return Ok((plane.to_vec(), width, height));
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

/// Writes RGB frames as MPEG-4 Part 2 video in the container implied by the
/// output path (normally `.mp4`).
pub(crate) struct FfmpegWriter {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::video::Encoder,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    source_width: u32,
    source_height: u32,
    next_pts: i64,
}

impl FfmpegWriter {
    pub(crate) fn create(path: &Path, info: VideoInfo) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        // YUV 4:2:0 needs even dimensions.
        let width = info.width & !1;
        let height = info.height & !1;
        if width == 0 || height == 0 {
            return Err(anyhow!(
                "cannot encode {}x{} video",
                info.width,
                info.height
            ));
        }
        let fps = if info.fps.is_finite() && info.fps > 0.0 {
            info.fps
        } else {
            VideoInfo::FALLBACK_FPS
        };
        let frame_rate = Rational::from(fps);
        let time_base = frame_rate.invert();

        let mut output = ffmpeg::format::output(&path)
            .with_context(|| format!("failed to create '{}' with ffmpeg", path.display()))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);
        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or_else(|| anyhow!("ffmpeg has no MPEG-4 encoder"))?;

        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create MPEG-4 encoder")?;
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(time_base);
        encoder.set_frame_rate(Some(frame_rate));
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder.open_as(codec).context("open MPEG-4 encoder")?;

        let stream_index = {
            let mut stream = output.add_stream(codec).context("add video stream")?;
            stream.set_parameters(&encoder);
            stream.set_time_base(time_base);
            stream.index()
        };
        output
            .write_header()
            .with_context(|| format!("write header for {}", path.display()))?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .unwrap_or(time_base);

        let scaler = ffmpeg::software::scaling::context::Context::get(
            Pixel::RGB24,
            info.width,
            info.height,
            Pixel::YUV420P,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base: time_base,
            stream_time_base,
            source_width: info.width,
            source_height: info.height,
            next_pts: 0,
        })
    }

    fn drain_packets(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .context("write video packet")?;
        }
        Ok(())
    }
}

impl VideoWriter for FfmpegWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.source_width, self.source_height) {
            return Err(anyhow!(
                "frame is {}x{}, stream is {}x{}",
                frame.width(),
                frame.height(),
                self.source_width,
                self.source_height
            ));
        }
        let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, frame.width(), frame.height());
        let row_bytes = frame.width() as usize * 3;
        let stride = rgb.stride(0);
        let plane = rgb.data_mut(0);
        for (row, src) in frame.as_raw().chunks_exact(row_bytes).enumerate() {
            let start = row * stride;
            plane
                .get_mut(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?
                .copy_from_slice(src);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .context("scale frame to YUV420P")?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&yuv)
            .context("send frame to encoder")?;
        self.drain_packets()
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.encoder.send_eof().context("flush encoder")?;
        self.drain_packets()?;
        self.output.write_trailer().context("write trailer")?;
        Ok(())
    }
}
