//! Log output setup.
//!
//! Logs go to stdout, or to `log_file_path` when configured. A file log is
//! rotated aside as `<file>.<YYYYmmddTHHMMSS>` (gzipped when compression is
//! on) when a previous run left one behind and whenever the active file
//! would grow past `max_size_bytes`. Rotated files older than the retention
//! window are removed at each rotation.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local, NaiveDateTime};
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

/// Default size at which the active log file is rotated.
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 100 * 1024 * 1024;

const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to prepare log file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to install log subscriber: {0}")]
    Init(String),
}

/// Logging options from the process configuration.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub file_path: Option<PathBuf>,
    /// Days of rotated logs to keep; 0 disables age-based pruning.
    pub retain_days: u32,
    /// Rotate once the active file would exceed this size; 0 disables it.
    pub max_size_bytes: u64,
    pub compress: bool,
    /// Text output at debug level; JSON at info level otherwise.
    pub development: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            file_path: None,
            retain_days: 7,
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            compress: true,
            development: true,
        }
    }
}

/// Install the global tracing subscriber.
pub fn init(options: &LogOptions) -> Result<(), LoggingError> {
    let default_level = if options.development { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let writer = match &options.file_path {
        Some(path) => {
            let file = RotatingFile::open(path, options).map_err(|source| LoggingError::File {
                path: path.clone(),
                source,
            })?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(io::stdout),
    };
    let ansi = options.file_path.is_none();

    let installed = if options.development {
        fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(ansi)
            .try_init()
    } else {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .try_init()
    };
    installed.map_err(|e| LoggingError::Init(e.to_string()))
}

/// Append-only log file that rotates itself by size.
///
/// Each event is written in a single `write` call by the formatter, so
/// rotation never splits a line.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    max_size: u64,
    retain_days: u32,
    compress: bool,
    file: Option<fs::File>,
    size: u64,
}

impl RotatingFile {
    /// Rotate a leftover log aside, prune old rotations and open `path`.
    pub fn open(path: impl Into<PathBuf>, options: &LogOptions) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        rotate_existing(&path, Local::now(), options.compress)?;
        prune_rotated(&path, options.retain_days, SystemTime::now())?;
        let file = open_append(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            max_size: options.max_size_bytes,
            retain_days: options.retain_days,
            compress: options.compress,
            file: Some(file),
            size,
        })
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        rotate_existing(&self.path, Local::now(), self.compress)?;
        prune_rotated(&self.path, self.retain_days, SystemTime::now())?;
        self.file = Some(open_append(&self.path)?);
        self.size = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let incoming = buf.len() as u64;
        if self.max_size > 0 && self.size > 0 && self.size + incoming > self.max_size {
            self.rotate()?;
        }
        if self.file.is_none() {
            // A previous rotation failed to reopen; try again.
            self.file = Some(open_append(&self.path)?);
            self.size = fs::metadata(&self.path)?.len();
        }
        let Some(file) = self.file.as_mut() else {
            return Err(io::Error::other("log file unavailable"));
        };
        let written = file.write(buf)?;
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

fn open_append(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new().create(true).append(true).open(path)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Move a non-empty log file aside. Returns the rotated path.
///
/// The stamp is advanced a second at a time until it names a free slot, so
/// rotations within the same second never overwrite each other.
pub fn rotate_existing(
    path: &Path,
    now: DateTime<Local>,
    compress: bool,
) -> io::Result<Option<PathBuf>> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => {}
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut stamp = now;
    let rotated = loop {
        let candidate = with_suffix(path, &format!(".{}", stamp.format(STAMP_FORMAT)));
        if !candidate.exists() && !with_suffix(&candidate, ".gz").exists() {
            break candidate;
        }
        stamp += chrono::Duration::seconds(1);
    };
    fs::rename(path, &rotated)?;

    if !compress {
        return Ok(Some(rotated));
    }
    let gz_path = with_suffix(&rotated, ".gz");
    let mut input = fs::File::open(&rotated)?;
    let mut encoder = GzEncoder::new(fs::File::create(&gz_path)?, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(&rotated)?;
    Ok(Some(gz_path))
}

/// Whether `name` is a rotation of `file_name`:
/// `<file_name>.<YYYYmmddTHHMMSS>` with an optional `.gz`.
fn is_rotation_of(name: &str, file_name: &str) -> bool {
    let Some(rest) = name
        .strip_prefix(file_name)
        .and_then(|rest| rest.strip_prefix('.'))
    else {
        return false;
    };
    let stamp = rest.strip_suffix(".gz").unwrap_or(rest);
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).is_ok()
}

/// Remove rotations of `path` last modified more than `retain_days` before
/// `now`. Returns the number of files removed. `retain_days == 0` keeps
/// everything.
pub fn prune_rotated(path: &Path, retain_days: u32, now: SystemTime) -> io::Result<usize> {
    if retain_days == 0 {
        return Ok(0);
    }
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(0);
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let max_age = Duration::from_secs(u64::from(retain_days) * 24 * 60 * 60);

    let mut removed = 0;
    for entry in fs::read_dir(dir)?.filter_map(Result::ok) {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !is_rotation_of(name, file_name) {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        let expired = now
            .duration_since(modified)
            .is_ok_and(|age| age > max_age);
        if expired {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 17, 8, 30, 0).unwrap()
    }

    #[test]
    fn rotate_moves_existing_log_aside() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("capsyncd.log");
        fs::write(&log, "previous run\n").unwrap();

        let rotated = rotate_existing(&log, fixed_now(), false).unwrap().unwrap();

        assert_eq!(rotated, dir.path().join("capsyncd.log.20240517T083000"));
        assert_eq!(fs::read_to_string(rotated).unwrap(), "previous run\n");
        assert!(!log.exists());
    }

    #[test]
    fn rotate_compresses_when_enabled() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("capsyncd.log");
        fs::write(&log, "previous run\n").unwrap();

        let rotated = rotate_existing(&log, fixed_now(), true).unwrap().unwrap();

        assert_eq!(rotated, dir.path().join("capsyncd.log.20240517T083000.gz"));
        assert!(!dir.path().join("capsyncd.log.20240517T083000").exists());
        let mut decoded = String::new();
        GzDecoder::new(fs::File::open(rotated).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "previous run\n");
    }

    #[test]
    fn rotate_skips_missing_or_empty_log() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("capsyncd.log");
        assert!(rotate_existing(&log, fixed_now(), true).unwrap().is_none());

        fs::write(&log, "").unwrap();
        assert!(rotate_existing(&log, fixed_now(), true).unwrap().is_none());
        assert!(log.exists());
    }

    #[test]
    fn prune_removes_only_expired_rotations() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("capsyncd.log");
        fs::write(&log, "current").unwrap();
        fs::write(dir.path().join("capsyncd.log.20240101T000000"), "old").unwrap();
        fs::write(dir.path().join("other.log.20240101T000000"), "unrelated").unwrap();

        // Nothing is older than a week yet.
        assert_eq!(prune_rotated(&log, 7, SystemTime::now()).unwrap(), 0);

        let later = SystemTime::now() + Duration::from_secs(8 * 24 * 60 * 60);
        assert_eq!(prune_rotated(&log, 7, later).unwrap(), 1);
        assert!(!dir.path().join("capsyncd.log.20240101T000000").exists());
        assert!(dir.path().join("other.log.20240101T000000").exists());
        assert!(log.exists());
    }

    #[test]
    fn zero_retention_keeps_every_rotation() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("capsyncd.log");
        let rotated = dir.path().join("capsyncd.log.20240101T000000.gz");
        fs::write(&rotated, "old").unwrap();

        let later = SystemTime::now() + Duration::from_secs(365 * 24 * 60 * 60);
        assert_eq!(prune_rotated(&log, 0, later).unwrap(), 0);
        assert!(rotated.exists());
    }

    #[test]
    fn prune_ignores_files_that_are_not_rotations() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("capsyncd.log");
        for name in [
            "capsyncd.log.bak",
            "capsyncd.log.lock",
            "capsyncd.log.2024",
            "capsyncd.log.20240101T000000.txt",
        ] {
            fs::write(dir.path().join(name), "keep").unwrap();
        }
        fs::write(dir.path().join("capsyncd.log.20240101T000000.gz"), "old").unwrap();

        let later = SystemTime::now() + Duration::from_secs(30 * 24 * 60 * 60);
        assert_eq!(prune_rotated(&log, 7, later).unwrap(), 1);
        assert!(dir.path().join("capsyncd.log.bak").exists());
        assert!(dir.path().join("capsyncd.log.lock").exists());
        assert!(dir.path().join("capsyncd.log.2024").exists());
        assert!(dir.path().join("capsyncd.log.20240101T000000.txt").exists());
    }

    #[test]
    fn rotation_within_one_second_takes_the_next_free_stamp() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("capsyncd.log");

        fs::write(&log, "first\n").unwrap();
        let first = rotate_existing(&log, fixed_now(), true).unwrap().unwrap();
        fs::write(&log, "second\n").unwrap();
        let second = rotate_existing(&log, fixed_now(), true).unwrap().unwrap();

        assert_eq!(first, dir.path().join("capsyncd.log.20240517T083000.gz"));
        assert_eq!(second, dir.path().join("capsyncd.log.20240517T083001.gz"));
    }

    fn rotations(dir: &Path) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| is_rotation_of(n, "capsyncd.log"))
            })
            .collect();
        found.sort();
        found
    }

    #[test]
    fn writer_rotates_when_size_is_exceeded() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("logs/capsyncd.log");
        let options = LogOptions {
            file_path: Some(log.clone()),
            max_size_bytes: 32,
            compress: false,
            ..LogOptions::default()
        };
        let mut writer = RotatingFile::open(&log, &options).unwrap();

        writer.write_all(b"event one: 20 bytes\n").unwrap();
        writer.write_all(b"event two: 20 bytes\n").unwrap();
        writer.write_all(b"event 3\n").unwrap();
        writer.flush().unwrap();

        let rotated = rotations(&dir.path().join("logs"));
        assert_eq!(rotated.len(), 1);
        assert_eq!(fs::read_to_string(&rotated[0]).unwrap(), "event one: 20 bytes\n");
        assert_eq!(
            fs::read_to_string(&log).unwrap(),
            "event two: 20 bytes\nevent 3\n"
        );
    }

    #[test]
    fn writer_compresses_runtime_rotations() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("capsyncd.log");
        let options = LogOptions {
            file_path: Some(log.clone()),
            max_size_bytes: 8,
            compress: true,
            ..LogOptions::default()
        };
        let mut writer = RotatingFile::open(&log, &options).unwrap();

        for line in ["aaaaaa\n", "bbbbbb\n", "cccccc\n"] {
            writer.write_all(line.as_bytes()).unwrap();
        }
        writer.flush().unwrap();

        let rotated = rotations(dir.path());
        assert_eq!(rotated.len(), 2);
        let mut decoded = String::new();
        for path in &rotated {
            assert_eq!(path.extension().and_then(|e| e.to_str()), Some("gz"));
            GzDecoder::new(fs::File::open(path).unwrap())
                .read_to_string(&mut decoded)
                .unwrap();
        }
        assert_eq!(decoded, "aaaaaa\nbbbbbb\n");
        assert_eq!(fs::read_to_string(&log).unwrap(), "cccccc\n");
    }

    #[test]
    fn writer_rotates_leftover_log_on_open() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("capsyncd.log");
        fs::write(&log, "previous run\n").unwrap();
        let options = LogOptions {
            file_path: Some(log.clone()),
            compress: false,
            ..LogOptions::default()
        };

        let mut writer = RotatingFile::open(&log, &options).unwrap();
        writer.write_all(b"new run\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(rotations(dir.path()).len(), 1);
        assert_eq!(fs::read_to_string(&log).unwrap(), "new run\n");
    }
}
