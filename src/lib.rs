use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Once;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

pub const CACHE_FILE_NAME: &str = "compile_timer_cache";

/// Combined length budget for a directory path plus the cache file name.
pub const PATH_CAPACITY: usize = 128;

pub const STAMP_RECORD_LEN: usize = std::mem::size_of::<Stamp>();

const TICKS_PER_SECOND: f64 = 1_000_000_000.0;

pub type Stamp = f64;

#[derive(Debug, Error)]
pub enum TimerError {
  #[error(
    "Directory path provided is too long, only supporting 128 characters including the cache file name."
  )]
  PathTooLong { dir: PathBuf },

  #[error("Could not open cache file {}: {source}", .path.display())]
  CacheMissing { path: PathBuf, source: io::Error },

  #[error("Could not read cache file {}: {source}", .path.display())]
  ReadFailed { path: PathBuf, source: io::Error },

  #[error("Could not write cache file {}: {source}", .path.display())]
  WriteFailed { path: PathBuf, source: io::Error },

  #[error("Cache file {} is corrupt, expected {expected} bytes but found {found}.", .path.display())]
  CorruptCache {
    path: PathBuf,
    expected: usize,
    found: usize,
  },

  #[error("Could not read the monotonic clock: {source}")]
  ClockFailed { source: io::Error },
}

impl TimerError {
  pub fn help(&self) -> Option<&'static str> {
    match self {
      TimerError::CacheMissing { .. } => Some(
        "The directory doesn't contain a cache file - Make sure you run the program with 'start' \
         before using 'stop', and that the directory exists; this program will not create it.",
      ),
      _ => None,
    }
  }

  pub fn is_usage(&self) -> bool {
    matches!(self, TimerError::PathTooLong { .. })
  }
}

/// Source of monotonic timestamps, expressed in seconds.
pub trait MonotonicClock {
  fn stamp(&self) -> Result<Stamp, TimerError>;
}

/// Monotonic clock backed by the operating system's high-resolution counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl MonotonicClock for SystemClock {
  fn stamp(&self) -> Result<Stamp, TimerError> {
    let mut now = libc::timespec {
      tv_sec: 0,
      tv_nsec: 0,
    };

    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) };
    if rc != 0 {
      return Err(TimerError::ClockFailed {
        source: io::Error::last_os_error(),
      });
    }

    let ticks = now.tv_sec as u64 * 1_000_000_000 + now.tv_nsec as u64;

    Ok(ticks as f64 / TICKS_PER_SECOND)
  }
}

/// The cache file holding the stamp of the last `start` inside a given directory.
///
/// The record is a single little-endian IEEE-754 double, nothing else.
#[derive(Debug, Clone)]
pub struct CacheFile {
  path: PathBuf,
}

impl CacheFile {
  /// Resolves `<dir>/compile_timer_cache`, rejecting paths over the length budget before any I/O.
  pub fn resolve(dir: &Path) -> Result<Self, TimerError> {
    if dir.as_os_str().len() + CACHE_FILE_NAME.len() >= PATH_CAPACITY - 1 {
      return Err(TimerError::PathTooLong {
        dir: dir.to_path_buf(),
      });
    }

    let path = dir.join(CACHE_FILE_NAME);
    debug!(path = %path.display(), "resolved cache file");

    Ok(CacheFile { path })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn write(&self, stamp: Stamp) -> Result<(), TimerError> {
    fs::write(&self.path, stamp.to_le_bytes()).map_err(|source| TimerError::WriteFailed {
      path: self.path.clone(),
      source,
    })?;

    debug!(path = %self.path.display(), stamp, "cache file written");

    Ok(())
  }

  /// Reads the stored stamp back, reporting a record of the wrong size as corrupt.
  pub fn read(&self) -> Result<Stamp, TimerError> {
    let bytes = match fs::read(&self.path) {
      Ok(bytes) => bytes,
      Err(source) if source.kind() == io::ErrorKind::NotFound => {
        return Err(TimerError::CacheMissing {
          path: self.path.clone(),
          source,
        })
      }
      Err(source) => {
        return Err(TimerError::ReadFailed {
          path: self.path.clone(),
          source,
        })
      }
    };

    if bytes.len() != STAMP_RECORD_LEN {
      return Err(TimerError::CorruptCache {
        path: self.path.clone(),
        expected: STAMP_RECORD_LEN,
        found: bytes.len(),
      });
    }

    let mut record = [0u8; STAMP_RECORD_LEN];
    record.copy_from_slice(&bytes);

    let stamp = Stamp::from_le_bytes(record);
    debug!(path = %self.path.display(), stamp, "cache file read");

    Ok(stamp)
  }
}

/// Measures elapsed time between a `start` and a later `stop` through the cache file.
#[derive(Debug)]
pub struct Timer<C = SystemClock> {
  clock: C,
}

impl Timer<SystemClock> {
  pub fn new() -> Self {
    Timer { clock: SystemClock }
  }
}

impl Default for Timer<SystemClock> {
  fn default() -> Self {
    Timer::new()
  }
}

impl<C: MonotonicClock> Timer<C> {
  pub fn with_clock(clock: C) -> Self {
    Timer { clock }
  }

  pub fn start(&self, cache: &CacheFile) -> Result<Stamp, TimerError> {
    let stamp = self.clock.stamp()?;
    cache.write(stamp)?;

    Ok(stamp)
  }

  pub fn stop(&self, cache: &CacheFile) -> Result<Stamp, TimerError> {
    // the stored stamp is read before the clock is sampled
    let stored = cache.read()?;
    let now = self.clock.stamp()?;

    let elapsed = now - stored;
    debug!(stored, now, elapsed, "elapsed computed");

    Ok(elapsed)
  }
}

/// Renders an elapsed time the way `stop` prints it: four decimal places and a trailing `s`.
pub fn format_elapsed(elapsed: Stamp) -> String {
  format!("{elapsed:.4}s")
}

static INIT: Once = Once::new();

/// Set up the tracing subscriber once per process.
pub fn init_logging() {
  INIT.call_once(|| {
    let env_filter =
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("compile_timer=warn"));

    // diagnostics stay off stdout, which belongs to the command output
    fmt()
      .with_env_filter(env_filter)
      .with_writer(io::stderr)
      .with_target(false)
      .compact()
      .init();
  });
}
