//! Encoder seam: where converted frames leave the pipeline

pub mod ffmpeg;

use std::io;
use std::process::ExitStatus;

use thiserror::Error;

use crate::Frame;

pub use ffmpeg::FfmpegEncoder;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("frame {sequence} is {width}x{height}, encoder expects {expected_width}x{expected_height}")]
    Dimensions {
        sequence: u64,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },
    #[error("frame {sequence} carries {len} bytes, {expected} expected for RGB24")]
    BufferSize {
        sequence: u64,
        len: usize,
        expected: usize,
    },
    #[error("encoder I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("encoder exited with {0}")]
    Exit(ExitStatus),
    #[error("encoder rejected frame: {0}")]
    Rejected(String),
}

/// A video writer. Opening is the implementor's constructor.
///
/// `write_frame` failures are per frame: the caller counts them and carries
/// on. `finish` flushes and closes the output; the pipeline calls it once.
pub trait VideoEncoder: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), EncodeError>;

    fn finish(&mut self) -> Result<(), EncodeError>;
}

impl<E: VideoEncoder + ?Sized> VideoEncoder for Box<E> {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), EncodeError> {
        (**self).write_frame(frame)
    }

    fn finish(&mut self) -> Result<(), EncodeError> {
        (**self).finish()
    }
}

/// Reject frames whose size differs from what the encoder was opened with.
/// A short or long buffer would shift every frame after it in the stream.
pub fn check_dimensions(frame: &Frame, width: u32, height: u32) -> Result<(), EncodeError> {
    if frame.meta.width != width || frame.meta.height != height {
        return Err(EncodeError::Dimensions {
            sequence: frame.sequence,
            width: frame.meta.width,
            height: frame.meta.height,
            expected_width: width,
            expected_height: height,
        });
    }
    let expected = width as usize * height as usize * 3;
    if frame.pixels.len() != expected {
        return Err(EncodeError::BufferSize {
            sequence: frame.sequence,
            len: frame.pixels.len(),
            expected,
        });
    }
    Ok(())
}
