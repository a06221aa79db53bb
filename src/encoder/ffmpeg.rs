//! Video encoding through an ffmpeg subprocess fed raw RGB24 on stdin

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;

use tracing::{debug, info, warn};

use super::{check_dimensions, EncodeError, VideoEncoder};
use crate::{EncoderConfig, Frame};

pub struct FfmpegEncoder {
    child: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    width: u32,
    height: u32,
    frames: u64,
}

/// ffmpeg arguments for encoding `width`x`height` RGB24 frames into `path`.
pub fn ffmpeg_args(path: &Path, config: &EncoderConfig, width: u32, height: u32) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-n", // never overwrite
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgb24",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.extend([
        "-s".to_string(),
        format!("{}x{}", width, height),
        "-r".to_string(),
        config.fps.to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-c:v".to_string(),
        config.codec.clone(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ]);
    args.extend(config.extra_args.iter().cloned());
    args.push(path.to_string_lossy().into_owned());
    args
}

impl FfmpegEncoder {
    pub fn open(
        path: &Path,
        config: &EncoderConfig,
        width: u32,
        height: u32,
    ) -> Result<Self, EncodeError> {
        let args = ffmpeg_args(path, config, width, height);
        debug!("ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncodeError::Rejected("ffmpeg stdin unavailable".into()))?;

        // Stderr drain thread
        if let Some(stderr) = child.stderr.take() {
            thread::Builder::new()
                .name("ffmpeg-stderr".into())
                .spawn(move || {
                    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                        if !line.is_empty() {
                            warn!("FFmpeg stderr: {}", line);
                        }
                    }
                })?;
        }

        info!(
            "Encoding {}x{} @ {} fps with {} to {}",
            width,
            height,
            config.fps,
            config.codec,
            path.display()
        );

        let frame_len = width as usize * height as usize * 3;
        Ok(Self {
            child: Some(child),
            stdin: Some(BufWriter::with_capacity(frame_len, stdin)),
            width,
            height,
            frames: 0,
        })
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), EncodeError> {
        check_dimensions(frame, self.width, self.height)?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EncodeError::Rejected("encoder already finished".into()))?;
        stdin.write_all(&frame.pixels)?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), EncodeError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let flushed = match self.stdin.take() {
            Some(mut stdin) => stdin.flush(),
            None => Ok(()),
        };
        // stdin is closed here, ffmpeg sees EOF and finalizes the container
        let status = child.wait()?;
        flushed?;

        if !status.success() {
            return Err(EncodeError::Exit(status));
        }
        info!(frames = self.frames, "Encoder finished");
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.child.is_some() {
            if let Err(e) = self.finish() {
                warn!("Encoder did not finish cleanly: {}", e);
            }
        }
    }
}
