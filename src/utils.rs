use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::{eyre::eyre, Result};
use tracing::info;
use v4l::{capability::Flags, video::Capture, Device};

use crate::capture::v4l2::fourcc;
use crate::capture::PixelFormat;

/// Where one session writes its video and frame ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub video: PathBuf,
    pub ledger: PathBuf,
}

impl OutputPaths {
    /// `<base>.mp4` and `<base>.txt`; dots already in `base` are kept.
    pub fn from_base(base: &Path) -> Self {
        let with_suffix = |suffix: &str| {
            let mut name = OsString::from(base.as_os_str());
            name.push(suffix);
            PathBuf::from(name)
        };
        Self {
            video: with_suffix(".mp4"),
            ledger: with_suffix(".txt"),
        }
    }

    /// Create the output directory and refuse to clobber an earlier session.
    pub fn prepare(&self) -> Result<()> {
        for path in [&self.video, &self.ledger] {
            if path.exists() {
                return Err(eyre!(
                    "{} already exists. Choose another file name.",
                    path.display()
                ));
            }
        }
        if let Some(dir) = self.video.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Find the first capture device offering `format`
pub fn auto_detect_device(format: PixelFormat) -> Result<String> {
    info!("Auto-detecting capture devices...");
    let wanted = fourcc(format);

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        if let Ok(formats) = dev.enum_formats() {
            if formats.iter().any(|fmt| fmt.fourcc == wanted) {
                info!("Found {} device: {} - {}", wanted, path, caps.card);
                return Ok(path);
            }
        }
    }

    Err(eyre!("No capture device offering {:?} found", format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_append_extensions() {
        let paths = OutputPaths::from_base(Path::new("/data/videos/20240101_TopHat_LT01"));
        assert_eq!(paths.video, PathBuf::from("/data/videos/20240101_TopHat_LT01.mp4"));
        assert_eq!(paths.ledger, PathBuf::from("/data/videos/20240101_TopHat_LT01.txt"));

        let dotted = OutputPaths::from_base(Path::new("run.01"));
        assert_eq!(dotted.ledger, PathBuf::from("run.01.txt"));
    }

    #[test]
    fn prepare_creates_directory_and_refuses_existing_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let paths = OutputPaths::from_base(&dir.path().join("nested").join("session"));
        paths.prepare().unwrap();
        assert!(dir.path().join("nested").is_dir());

        fs::write(&paths.ledger, "Frame,Timestamp\n").unwrap();
        assert!(paths.prepare().is_err());
    }
}
