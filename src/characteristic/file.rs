//! Two-column characteristic files.
//!
//! One `x y` pair per line, separated by whitespace, at least two lines.
//! Blank lines are skipped; any other line without exactly two numeric
//! columns is a format error.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, warn};

use super::{Characteristic, Interpolation};
use crate::error::{PowerStampError, Result};
use crate::units::parse_value;

/// Parse characteristic text into a [`Characteristic`].
pub fn parse_characteristic(input: &str, mode: Interpolation) -> Result<Characteristic> {
    let mut x = Vec::new();
    let mut y = Vec::new();

    for (line_no, line) in input.lines().enumerate() {
        let line_no = line_no + 1;
        if line.trim().is_empty() {
            continue;
        }

        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() != 2 {
            return Err(PowerStampError::format(
                line_no,
                format!("expected 2 columns, found {}: '{}'", columns.len(), line.trim()),
            ));
        }

        let xv = parse_value(columns[0]).ok_or_else(|| {
            PowerStampError::format(line_no, format!("'{}' is not a number", columns[0]))
        })?;
        let yv = parse_value(columns[1]).ok_or_else(|| {
            PowerStampError::format(line_no, format!("'{}' is not a number", columns[1]))
        })?;
        x.push(xv);
        y.push(yv);
    }

    Characteristic::new(x, y, mode)
}

/// Read a characteristic file.
pub fn read_characteristic(path: &Path, mode: Interpolation) -> Result<Characteristic> {
    let content = std::fs::read_to_string(path).map_err(|e| PowerStampError::FileRead {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_characteristic(&content, mode)
}

/// Write a characteristic in the two-column format.
pub fn write_characteristic(path: &Path, characteristic: &Characteristic) -> Result<()> {
    let mut out = String::new();
    for (x, y) in characteristic.x().iter().zip(characteristic.y()) {
        // Infallible for String
        let _ = writeln!(out, "{x:e} {y:e}");
    }
    std::fs::write(path, out).map_err(|e| PowerStampError::FileWrite {
        path: path.display().to_string(),
        source: e,
    })
}

/// A characteristic backed by a file on disk.
///
/// Keeps the last successfully loaded data: a failed reload is reported to
/// the caller but the device keeps simulating with the previous curve.
#[derive(Debug, Clone)]
pub struct CharacteristicFile {
    path: PathBuf,
    mode: Interpolation,
    data: Characteristic,
    modified: Option<SystemTime>,
}

impl CharacteristicFile {
    /// Load a characteristic file. Fails fast on malformed content.
    pub fn open(path: impl Into<PathBuf>, mode: Interpolation) -> Result<Self> {
        let path = path.into();
        let data = read_characteristic(&path, mode)?;
        let modified = modification_time(&path);
        Ok(Self {
            path,
            mode,
            data,
            modified,
        })
    }

    /// Write `data` to `path` and track it.
    pub fn create(path: impl Into<PathBuf>, data: Characteristic) -> Result<Self> {
        let path = path.into();
        write_characteristic(&path, &data)?;
        let modified = modification_time(&path);
        Ok(Self {
            path,
            mode: data.mode(),
            data,
            modified,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last valid characteristic.
    pub fn data(&self) -> &Characteristic {
        &self.data
    }

    /// Reload when the file's modification time changed.
    ///
    /// Returns `Ok(true)` if new data was loaded. On error the previous data
    /// stays in place and the next call tries again.
    pub fn refresh(&mut self) -> Result<bool> {
        let modified = modification_time(&self.path);
        if modified.is_some() && modified == self.modified {
            return Ok(false);
        }
        self.reload().map(|_| true)
    }

    /// Unconditionally reload the file.
    pub fn reload(&mut self) -> Result<()> {
        match read_characteristic(&self.path, self.mode) {
            Ok(data) => {
                debug!(
                    "Reloaded characteristic '{}' ({} samples)",
                    self.path.display(),
                    data.len()
                );
                self.data = data;
                self.modified = modification_time(&self.path);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Keeping previous characteristic for '{}': {}",
                    self.path.display(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Replace the data and write it back to the file.
    pub fn update(&mut self, data: Characteristic) -> Result<()> {
        write_characteristic(&self.path, &data)?;
        self.mode = data.mode();
        self.data = data;
        self.modified = modification_time(&self.path);
        Ok(())
    }
}

fn modification_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("powerstamp_{}_{}", std::process::id(), name))
    }

    /// Rewrite `path` and move its mtime `secs` into the future, so the
    /// change is seen even on coarse-grained filesystems.
    fn rewrite(path: &Path, content: &str, secs: u64) {
        std::fs::write(path, content).unwrap();
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() + std::time::Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn test_parse_two_columns() {
        let c = parse_characteristic("0 1e-7\n100 0.8e-7\n\n300 1.2n\n", Interpolation::Log).unwrap();
        assert_eq!(c.len(), 3);
        assert_relative_eq!(c.y()[2], 1.2e-9);
        assert_eq!(c.mode(), Interpolation::Log);
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        let err = parse_characteristic("0 1\n1 2 3\n", Interpolation::Linear).unwrap_err();
        assert!(matches!(err, PowerStampError::CharacteristicFormat { line: 2, .. }));

        let err = parse_characteristic("0 1\nx 2\n", Interpolation::Linear).unwrap_err();
        assert!(matches!(err, PowerStampError::CharacteristicFormat { line: 2, .. }));

        let err = parse_characteristic("0 1\n", Interpolation::Linear).unwrap_err();
        assert!(matches!(err, PowerStampError::TooFewSamples { count: 1 }));
    }

    #[test]
    fn test_write_then_open() {
        let path = temp_path("write_then_open.txt");
        let c = Characteristic::default_inductance();
        let file = CharacteristicFile::create(&path, c.clone()).unwrap();
        let reopened = CharacteristicFile::open(file.path(), Interpolation::Linear).unwrap();
        assert_eq!(reopened.data(), &c);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_failed_reload_keeps_previous_data() {
        let path = temp_path("fallback.txt");
        std::fs::write(&path, "0 1\n1 2\n").unwrap();
        let mut file = CharacteristicFile::open(&path, Interpolation::Linear).unwrap();

        std::fs::write(&path, "0 1\nbroken\n").unwrap();
        assert!(file.reload().is_err());
        assert_relative_eq!(file.data().interpolate(0.5), 1.5);

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(file.reload(), Err(PowerStampError::FileRead { .. })));
        assert_relative_eq!(file.data().interpolate(0.5), 1.5);
    }

    #[test]
    fn test_refresh_follows_modification_time() {
        let path = temp_path("refresh.txt");
        std::fs::write(&path, "0 1\n1 2\n").unwrap();
        let mut file = CharacteristicFile::open(&path, Interpolation::Linear).unwrap();
        assert!(!file.refresh().unwrap());

        rewrite(&path, "0 1\n1 4\n", 5);
        assert!(file.refresh().unwrap());
        assert_relative_eq!(file.data().interpolate(0.5), 2.5);
        assert!(!file.refresh().unwrap());

        rewrite(&path, "0 1\n1\n", 10);
        assert!(file.refresh().is_err());
        assert_relative_eq!(file.data().interpolate(0.5), 2.5);
        // Still broken, still reported
        assert!(file.refresh().is_err());

        rewrite(&path, "0 2\n1 2\n", 15);
        assert!(file.refresh().unwrap());
        assert_relative_eq!(file.data().interpolate(0.5), 2.0);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file() {
        let err = CharacteristicFile::open(temp_path("missing.txt"), Interpolation::Linear).unwrap_err();
        assert!(matches!(err, PowerStampError::FileRead { .. }));
    }
}
