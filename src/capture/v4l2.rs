//! V4L2 camera with memory-mapped streaming buffers

use std::io;
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Value};
use v4l::io::traits::{CaptureStream, Stream};
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::camera::{Camera, CameraError};
use crate::capture::frame::{PixelFormat, RawFrame};
use crate::CameraConfig;

const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902; // 100 us units
const CID_GAIN: u32 = 0x0098_0913;
const CID_GAMMA: u32 = 0x0098_0910;

pub fn fourcc(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
        PixelFormat::Bgr24 => FourCC::new(b"BGR3"),
        PixelFormat::Yuyv => FourCC::new(b"YUYV"),
        PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
        PixelFormat::BayerRg8 => FourCC::new(b"RGGB"),
    }
}

/// V4L2 streaming camera
pub struct V4l2Camera {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    config: CameraConfig,
    name: String,
}

impl V4l2Camera {
    /// Open the device and apply format and sensor settings.
    pub fn open(config: CameraConfig) -> Result<Self, CameraError> {
        info!("Opening V4L2 camera: {}", config.device);

        let device = Device::with_path(&config.device)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CameraError::Device(format!(
                "{} doesn't support video capture",
                config.device
            )));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = fourcc(config.pixel_format);
        let applied = device.set_format(&fmt)?;

        if applied.width != config.width
            || applied.height != config.height
            || applied.fourcc != fmt.fourcc
        {
            return Err(CameraError::Device(format!(
                "driver negotiated {}x{} {} instead of {}x{} {}",
                applied.width, applied.height, applied.fourcc, fmt.width, fmt.height, fmt.fourcc
            )));
        }

        let camera = Self {
            name: format!("{} ({})", caps.card, config.device),
            device: Box::new(device),
            stream: None,
            config,
        };
        camera.apply_controls();
        Ok(camera)
    }

    fn apply_controls(&self) {
        let controls = [
            (
                "exposure",
                CID_EXPOSURE_ABSOLUTE,
                self.config.exposure_time_us.map(|us| (us / 100) as i64),
            ),
            ("gain", CID_GAIN, self.config.gain_db.map(|g| g.round() as i64)),
            (
                "gamma",
                CID_GAMMA,
                self.config.gamma.map(|g| (g * 100.0).round() as i64),
            ),
        ];

        for (label, id, value) in controls {
            let Some(value) = value else { continue };
            let control = Control {
                id,
                value: Value::Integer(value),
            };
            match self.device.set_control(control) {
                Ok(()) => info!("Set {} = {}", label, value),
                Err(e) => warn!("Device rejected {} = {}: {}", label, value, e),
            }
        }

        if self.config.trigger_line.is_some() || self.config.output_line.is_some() {
            warn!(
                "Trigger and strobe line routing are not exposed by V4L2, \
                 configure them on the device"
            );
        }
    }
}

impl Camera for V4l2Camera {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_streaming(&mut self) -> Result<(), CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.config.buffer_count)?;
        stream.start()?;

        self.stream = Some(stream);
        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );
        Ok(())
    }

    #[instrument(level = "trace", skip(self))]
    fn capture(&mut self, timeout: Duration) -> Result<RawFrame, CameraError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CameraError::Device("stream not started".into()))?;

        stream.set_timeout(timeout);
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(CameraError::Timeout(timeout))
            }
            Err(e) => return Err(e.into()),
        };

        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };

        Ok(RawFrame {
            data: Bytes::copy_from_slice(&buf[..used]),
            format: self.config.pixel_format,
            width: self.config.width,
            height: self.config.height,
            device_frame_id: Some(meta.sequence as u64),
            device_timestamp: Some(
                Duration::from_secs(meta.timestamp.sec as u64)
                    + Duration::from_micros(meta.timestamp.usec as u64),
            ),
        })
    }

    fn stop_streaming(&mut self) -> Result<(), CameraError> {
        if let Some(mut stream) = self.stream.take() {
            stream.stop()?;
        }
        Ok(())
    }
}
