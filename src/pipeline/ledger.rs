//! Frame ledger: one (sequence, timestamp) row per frame accepted into the pipeline

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

use crate::Frame;

pub const HEADER: &str = "Frame,Timestamp";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger {0} already exists")]
    Exists(PathBuf),
    #[error("failed to write ledger: {0}")]
    Io(#[from] io::Error),
    #[error("failed to move ledger into place: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// How timestamps are written to the table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampMode {
    /// Seconds since the first ledger entry
    #[default]
    Relative,
    /// Seconds on the source clock
    Absolute,
}

/// Which clock a ledger timestamp comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    /// Host wall clock at capture, seconds since the Unix epoch
    #[default]
    Host,
    /// Camera clock, falling back to the host clock when the camera has none
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub timestamp: Duration,
}

/// Stamps ledger entries so that one session never mixes two clocks.
///
/// With [`TimestampSource::Device`], a camera that never reports device
/// timestamps moves the whole session to the host clock. A frame missing its
/// device timestamp mid-session is placed on the device clock by adding the host
/// time elapsed since the last stamped frame.
#[derive(Debug)]
pub struct LedgerClock {
    source: TimestampSource,
    last_device: Option<(Duration, SystemTime)>,
    extrapolated: u64,
}

impl LedgerClock {
    pub fn new(source: TimestampSource) -> Self {
        Self {
            source,
            last_device: None,
            extrapolated: 0,
        }
    }

    pub fn source(&self) -> TimestampSource {
        self.source
    }

    /// Frames whose device timestamp had to be extrapolated
    pub fn extrapolated(&self) -> u64 {
        self.extrapolated
    }

    pub fn stamp(&mut self, frame: &Frame) -> LedgerEntry {
        let host = frame
            .captured_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        let timestamp = match (self.source, frame.meta.device_timestamp, self.last_device) {
            (TimestampSource::Host, _, _) => host,
            (TimestampSource::Device, Some(device), _) => {
                self.last_device = Some((device, frame.captured_at));
                device
            }
            (TimestampSource::Device, None, None) => {
                warn!(
                    sequence = frame.sequence,
                    "Camera reports no device timestamps, using the host clock for this session"
                );
                self.source = TimestampSource::Host;
                host
            }
            (TimestampSource::Device, None, Some((device, at))) => {
                if self.extrapolated == 0 {
                    warn!(
                        sequence = frame.sequence,
                        "Frame without device timestamp, extrapolating from the host clock"
                    );
                }
                self.extrapolated += 1;
                device + frame.captured_at.duration_since(at).unwrap_or_default()
            }
        };

        LedgerEntry {
            sequence: frame.sequence,
            timestamp,
        }
    }
}

/// Missing sequence numbers between two consecutive entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub after: u64,
    pub missing: u64,
}

/// Append-only ledger, written by the acquisition loop only.
#[derive(Debug, Default)]
pub struct FrameLedger {
    entries: Vec<LedgerEntry>,
}

impl FrameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, sequence: u64, timestamp: Duration) {
        if let Some(last) = self.entries.last() {
            debug_assert!(sequence > last.sequence, "ledger sequence must increase");
            if sequence <= last.sequence {
                warn!(last = last.sequence, sequence, "Out of order ledger entry");
            }
        }
        self.entries.push(LedgerEntry {
            sequence,
            timestamp,
        });
    }

    pub fn push(&mut self, entry: LedgerEntry) {
        self.append(entry.sequence, entry.timestamp);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn sequences(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().map(|e| e.sequence)
    }

    pub fn gaps(&self) -> Vec<Gap> {
        self.entries
            .windows(2)
            .filter_map(|pair| {
                let missing = pair[1].sequence.saturating_sub(pair[0].sequence + 1);
                (missing > 0).then_some(Gap {
                    after: pair[0].sequence,
                    missing,
                })
            })
            .collect()
    }

    pub fn write_table<W: Write>(&self, mut out: W, mode: TimestampMode) -> io::Result<()> {
        writeln!(out, "{}", HEADER)?;
        let origin = match mode {
            TimestampMode::Relative => self.entries.first().map(|e| e.timestamp),
            TimestampMode::Absolute => None,
        }
        .unwrap_or_default();

        for entry in &self.entries {
            let seconds = entry.timestamp.saturating_sub(origin).as_secs_f64();
            writeln!(out, "{},{:.6}", entry.sequence, seconds)?;
        }
        out.flush()
    }

    /// Write the table next to `path` and rename it into place. An existing
    /// file at `path` is never replaced.
    pub fn persist(&self, path: &Path, mode: TimestampMode) -> Result<(), LedgerError> {
        if path.exists() {
            return Err(LedgerError::Exists(path.to_path_buf()));
        }
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir)?;
        self.write_table(BufWriter::new(&mut tmp), mode)?;
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(path)?;

        info!(path = %path.display(), entries = self.len(), "Ledger written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(rows: &[(u64, f64)]) -> FrameLedger {
        let mut ledger = FrameLedger::new();
        for &(seq, secs) in rows {
            ledger.append(seq, Duration::from_secs_f64(secs));
        }
        ledger
    }

    #[test]
    fn relative_table_starts_at_zero() {
        let ledger = ledger(&[(1, 100.0), (2, 100.5), (3, 101.25)]);
        let mut out = Vec::new();
        ledger.write_table(&mut out, TimestampMode::Relative).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Frame,Timestamp\n1,0.000000\n2,0.500000\n3,1.250000\n"
        );
    }

    #[test]
    fn absolute_table_keeps_clock() {
        let ledger = ledger(&[(1, 12.5)]);
        let mut out = Vec::new();
        ledger.write_table(&mut out, TimestampMode::Absolute).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Frame,Timestamp\n1,12.500000\n");
    }

    #[test]
    fn empty_ledger_is_just_a_header() {
        let mut out = Vec::new();
        FrameLedger::new()
            .write_table(&mut out, TimestampMode::Relative)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Frame,Timestamp\n");
    }

    #[test]
    fn gaps_are_found_by_diffing() {
        let ledger = ledger(&[(1, 0.0), (2, 0.1), (5, 0.4), (6, 0.5), (8, 0.7)]);
        assert_eq!(
            ledger.gaps(),
            vec![Gap { after: 2, missing: 2 }, Gap { after: 6, missing: 1 }]
        );
        assert!(self::ledger(&[(1, 0.0), (2, 0.1)]).gaps().is_empty());
    }

    fn frame(sequence: u64, at: SystemTime, device: Option<Duration>) -> Frame {
        Frame {
            sequence,
            captured_at: at,
            meta: crate::capture::frame::FrameMetadata {
                width: 1,
                height: 1,
                device_frame_id: None,
                device_timestamp: device,
            },
            pixels: bytes::Bytes::from_static(&[0, 0, 0]),
        }
    }

    #[test]
    fn device_clock_without_timestamps_uses_host_for_whole_session() {
        let at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let mut clock = LedgerClock::new(TimestampSource::Device);

        let first = clock.stamp(&frame(1, at, None));
        assert_eq!(first.timestamp, Duration::from_secs(1_700_000_000));
        assert_eq!(clock.source(), TimestampSource::Host);

        // a late device timestamp does not switch clocks again
        let later = at + Duration::from_millis(20);
        let second = clock.stamp(&frame(2, later, Some(Duration::from_secs(3))));
        assert_eq!(second.timestamp, Duration::from_millis(1_700_000_000_020));
    }

    #[test]
    fn missing_device_timestamp_is_extrapolated() {
        let at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let ms = Duration::from_millis;
        let mut clock = LedgerClock::new(TimestampSource::Device);

        let stamps: Vec<Duration> = [
            frame(1, at, Some(ms(10_000))),
            frame(2, at + ms(20), None),
            frame(3, at + ms(40), Some(ms(10_040))),
        ]
        .iter()
        .map(|f| clock.stamp(f).timestamp)
        .collect();

        assert_eq!(stamps, vec![ms(10_000), ms(10_020), ms(10_040)]);
        assert_eq!(clock.source(), TimestampSource::Device);
        assert_eq!(clock.extrapolated(), 1);
    }

    #[test]
    fn persist_writes_once_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.txt");
        let ledger = ledger(&[(1, 0.0), (2, 1.0)]);

        ledger.persist(&path, TimestampMode::Relative).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("Frame,Timestamp\n1,0.000000\n"));
        assert_eq!(written.lines().count(), 3);

        assert!(matches!(
            ledger.persist(&path, TimestampMode::Relative),
            Err(LedgerError::Exists(_))
        ));
        // no stray temporary files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn persist_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("session.txt");
        assert!(matches!(
            ledger(&[(1, 0.0)]).persist(&path, TimestampMode::Relative),
            Err(LedgerError::Io(_))
        ));
    }
}
