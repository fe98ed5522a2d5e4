//! Stored-video decoding and encoding.
//!
//! `VideoCodec` opens readers over uploaded files and creates writers for
//! annotated output. `FileVideoCodec` goes through FFmpeg when built with the
//! `video-ffmpeg` feature. `SyntheticVideoCodec` reads and writes a minimal raw
//! container so the pipeline can be exercised without native libraries.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use crate::frame::{rgb_from_raw, Frame};

/// Geometry and timing of a video stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl VideoInfo {
    /// Frame rate to use when a container does not report one.
    pub const FALLBACK_FPS: f64 = 25.0;
}

pub trait VideoReader {
    fn info(&self) -> VideoInfo;

    /// Next decoded frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

pub trait VideoWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush buffered frames and close the container.
    fn finish(self: Box<Self>) -> Result<()>;
}

pub trait VideoCodec: Send + Sync {
    fn open_reader(&self, path: &Path) -> Result<Box<dyn VideoReader>>;
    fn create_writer(&self, path: &Path, info: VideoInfo) -> Result<Box<dyn VideoWriter>>;

    /// Extension of files produced by `create_writer`.
    fn output_extension(&self) -> &'static str {
        "mp4"
    }
}

/// Container files on disk, decoded and encoded with FFmpeg.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileVideoCodec;

impl VideoCodec for FileVideoCodec {
    #[cfg(feature = "video-ffmpeg")]
    fn open_reader(&self, path: &Path) -> Result<Box<dyn VideoReader>> {
        Ok(Box::new(super::video_ffmpeg::FfmpegReader::open(path)?))
    }

    #[cfg(feature = "video-ffmpeg")]
    fn create_writer(&self, path: &Path, info: VideoInfo) -> Result<Box<dyn VideoWriter>> {
        Ok(Box::new(super::video_ffmpeg::FfmpegWriter::create(path, info)?))
    }

    #[cfg(not(feature = "video-ffmpeg"))]
    fn open_reader(&self, path: &Path) -> Result<Box<dyn VideoReader>> {
        Err(anyhow!(
            "cannot decode {}: built without the video-ffmpeg feature",
            path.display()
        ))
    }

    #[cfg(not(feature = "video-ffmpeg"))]
    fn create_writer(&self, path: &Path, _info: VideoInfo) -> Result<Box<dyn VideoWriter>> {
        Err(anyhow!(
            "cannot encode {}: built without the video-ffmpeg feature",
            path.display()
        ))
    }
}

// ----------------------------------------------------------------------------
// Synthetic raw container
// ----------------------------------------------------------------------------

const SYNTHETIC_MAGIC: &[u8; 4] = b"SMV1";
const SYNTHETIC_HEADER_LEN: usize = 16;

/// Uncompressed RGB frames behind a 16-byte header:
/// magic, width, height, fps in millihertz (little endian).
#[derive(Clone, Copy, Debug, Default)]
pub struct SyntheticVideoCodec;

impl SyntheticVideoCodec {
    /// Serialize frames into the synthetic container, e.g. to build an upload.
    pub fn encode(frames: &[RgbImage], fps: f64) -> Result<Vec<u8>> {
        let first = frames
            .first()
            .ok_or_else(|| anyhow!("synthetic video needs at least one frame"))?;
        let info = VideoInfo {
            width: first.width(),
            height: first.height(),
            fps,
        };
        let mut out = header_bytes(info).to_vec();
        for frame in frames {
            check_dimensions(frame, info)?;
            out.extend_from_slice(frame.as_raw());
        }
        Ok(out)
    }
}

impl VideoCodec for SyntheticVideoCodec {
    fn open_reader(&self, path: &Path) -> Result<Box<dyn VideoReader>> {
        let file = File::open(path).with_context(|| format!("open video {}", path.display()))?;
        let mut input = BufReader::new(file);
        let mut header = [0u8; SYNTHETIC_HEADER_LEN];
        input
            .read_exact(&mut header)
            .with_context(|| format!("{} is not a video container", path.display()))?;
        let info = parse_header(&header)
            .with_context(|| format!("{} is not a video container", path.display()))?;
        Ok(Box::new(SyntheticReader {
            input,
            info,
            sequence: 0,
        }))
    }

    fn create_writer(&self, path: &Path, info: VideoInfo) -> Result<Box<dyn VideoWriter>> {
        let file =
            File::create(path).with_context(|| format!("create video {}", path.display()))?;
        let mut output = BufWriter::new(file);
        output.write_all(&header_bytes(info))?;
        Ok(Box::new(SyntheticWriter {
            output,
            info,
            path: path.to_path_buf(),
        }))
    }
}

fn header_bytes(info: VideoInfo) -> [u8; SYNTHETIC_HEADER_LEN] {
    let mut header = [0u8; SYNTHETIC_HEADER_LEN];
    header[..4].copy_from_slice(SYNTHETIC_MAGIC);
    header[4..8].copy_from_slice(&info.width.to_le_bytes());
    header[8..12].copy_from_slice(&info.height.to_le_bytes());
    let millihertz = (info.fps * 1000.0).round().clamp(0.0, u32::MAX as f64) as u32;
    header[12..16].copy_from_slice(&millihertz.to_le_bytes());
    header
}

fn parse_header(header: &[u8; SYNTHETIC_HEADER_LEN]) -> Result<VideoInfo> {
    if &header[..4] != SYNTHETIC_MAGIC {
        return Err(anyhow!("bad magic"));
    }
    let field = |range: std::ops::Range<usize>| -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&header[range]);
        u32::from_le_bytes(bytes)
    };
    let width = field(4..8);
    let height = field(8..12);
    if width == 0 || height == 0 {
        return Err(anyhow!("zero frame size"));
    }
    let fps = match field(12..16) {
        0 => VideoInfo::FALLBACK_FPS,
        millihertz => millihertz as f64 / 1000.0,
    };
    Ok(VideoInfo { width, height, fps })
}

fn check_dimensions(frame: &RgbImage, info: VideoInfo) -> Result<()> {
    if frame.dimensions() != (info.width, info.height) {
        return Err(anyhow!(
            "frame is {}x{}, stream is {}x{}",
            frame.width(),
            frame.height(),
            info.width,
            info.height
        ));
    }
    Ok(())
}

struct SyntheticReader {
    input: BufReader<File>,
    info: VideoInfo,
    sequence: u64,
}

impl VideoReader for SyntheticReader {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame_len = self.info.width as usize * self.info.height as usize * 3;
        let mut data = Vec::with_capacity(frame_len);
        let read = (&mut self.input)
            .take(frame_len as u64)
            .read_to_end(&mut data)
            .context("read video frame")?;
        if read == 0 {
            return Ok(None);
        }
        if read < frame_len {
            return Err(anyhow!(
                "truncated frame {}: {} of {} bytes",
                self.sequence,
                read,
                frame_len
            ));
        }
        let image = rgb_from_raw(self.info.width, self.info.height, data)?;
        let frame = Frame::new(image, self.sequence);
        self.sequence += 1;
        Ok(Some(frame))
    }
}

struct SyntheticWriter {
    output: BufWriter<File>,
    info: VideoInfo,
    path: PathBuf,
}

impl VideoWriter for SyntheticWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        check_dimensions(frame, self.info)?;
        self.output
            .write_all(frame.as_raw())
            .with_context(|| format!("write frame to {}", self.path.display()))
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.output
            .flush()
            .with_context(|| format!("flush {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(value: u8) -> RgbImage {
        RgbImage::from_pixel(6, 4, Rgb([value, value, value]))
    }

    #[test]
    fn synthetic_writer_output_reads_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.mp4");
        let codec = SyntheticVideoCodec;
        let info = VideoInfo {
            width: 6,
            height: 4,
            fps: 12.5,
        };

        let mut writer = codec.create_writer(&path, info)?;
        writer.write_frame(&solid(10))?;
        writer.write_frame(&solid(20))?;
        writer.finish()?;

        let mut reader = codec.open_reader(&path)?;
        assert_eq!(reader.info(), info);
        let first = reader.next_frame()?.ok_or_else(|| anyhow!("missing frame"))?;
        assert_eq!(first.sequence(), 0);
        assert_eq!(first.image().get_pixel(0, 0), &Rgb([10, 10, 10]));
        assert!(reader.next_frame()?.is_some());
        assert!(reader.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn non_container_files_are_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"not a video at all")?;
        assert!(SyntheticVideoCodec.open_reader(&path).is_err());
        Ok(())
    }

    #[test]
    fn truncated_frame_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.mp4");
        let mut bytes = SyntheticVideoCodec::encode(&[solid(1)], 30.0)?;
        bytes.truncate(bytes.len() - 5);
        std::fs::write(&path, bytes)?;
        let mut reader = SyntheticVideoCodec.open_reader(&path)?;
        assert!(reader.next_frame().is_err());
        Ok(())
    }

    #[test]
    fn writer_rejects_mismatched_frames() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let info = VideoInfo {
            width: 6,
            height: 4,
            fps: 30.0,
        };
        let mut writer = SyntheticVideoCodec.create_writer(&dir.path().join("o.mp4"), info)?;
        assert!(writer.write_frame(&RgbImage::new(2, 2)).is_err());
        Ok(())
    }

    #[cfg(not(feature = "video-ffmpeg"))]
    #[test]
    fn file_codec_requires_ffmpeg_feature() {
        assert!(FileVideoCodec.open_reader(Path::new("clip.mp4")).is_err());
    }
}
