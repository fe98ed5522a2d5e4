//! V4L2 camera source (`/dev/video<index>`).

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::camera::{CameraSettings, CameraSource};
use super::normalize::{normalize_to_rgb, PixelFormat};
use crate::frame::{rgb_from_raw, Frame};

/// Formats requested from the driver, in order of preference.
const PREFERRED_FOURCC: [&[u8; 4]; 3] = [b"RGB3", b"YUYV", b"MJPG"];

pub struct V4l2Camera {
    path: String,
    state: V4l2State,
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_count: u64,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn open(index: u32, settings: CameraSettings) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let path = format!("/dev/video{}", index);
        let device =
            v4l::Device::with_path(&path).with_context(|| format!("open v4l2 device {}", path))?;

        let mut negotiated = None;
        for fourcc in PREFERRED_FOURCC {
            let mut format = device.format().context("read v4l2 format")?;
            format.width = settings.width;
            format.height = settings.height;
            format.fourcc = v4l::FourCC::new(fourcc);
            match device.set_format(&format) {
                Ok(applied) => {
                    if let Some(pixel) = PixelFormat::from_fourcc(&applied.fourcc.repr) {
                        negotiated = Some((applied, pixel));
                        break;
                    }
                }
                Err(err) => {
                    log::warn!(
                        "V4l2Camera: {} rejected {}: {}",
                        path,
                        String::from_utf8_lossy(fourcc),
                        err
                    );
                }
            }
        }
        let (format, pixel) = negotiated
            .ok_or_else(|| anyhow!("{} offers no supported pixel format", path))?;

        if settings.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Camera: failed to set fps on {}: {}", path, err);
            }
        }

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Camera: opened {} ({}x{} {:?})",
            path,
            format.width,
            format.height,
            pixel
        );
        Ok(Self {
            path,
            state,
            format: pixel,
            width: format.width,
            height: format.height,
            frame_count: 0,
        })
    }
}

impl CameraSource for V4l2Camera {
    fn describe(&self) -> String {
        self.path.clone()
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.width, self.height, self.format);
        let rgb = self.state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, meta) = fields.stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let payload = if format == PixelFormat::Mjpeg && used > 0 {
                &buf[..used]
            } else {
                buf
            };
            normalize_to_rgb(payload, width, height, format)
        })?;

        let image = rgb_from_raw(width, height, rgb)?;
        let sequence = self.frame_count;
        self.frame_count += 1;
        Ok(Frame::new(image, sequence))
    }
}
