//! # Log Rotation
//!
//! Size-based rollover of the active JSONL file into numbered generations:
//!
//! ```text
//! telemetry.jsonl        active
//! telemetry.jsonl.1.gz   most recent generation
//! telemetry.jsonl.2.gz
//! ...
//! ```
//!
//! The rotator only tracks size and moves files. It never writes records;
//! the writer that owns the active file closes its handle before calling
//! [`RotatingWriter::rotate`] and reopens the path afterwards.

use crate::config::RotateConfig;
use crate::error::TelemetryError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const GZIP_SUFFIX: &str = ".gz";

/// File rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPolicy {
    /// Rotate when file reaches size (bytes)
    BySize(u64),

    /// No rotation
    Never,
}

/// One rotated file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// 1 is the most recent.
    pub index: usize,
    pub compressed: bool,
    pub path: PathBuf,
}

/// Size tracker and rollover state machine for one active file.
#[derive(Debug)]
pub struct RotatingWriter {
    path: PathBuf,
    policy: RotationPolicy,
    max_generations: usize,
    compress: bool,
    current_size: u64,
    initialized: bool,
}

impl RotatingWriter {
    pub fn new(path: impl Into<PathBuf>, config: &RotateConfig) -> Self {
        let policy = if config.enabled {
            RotationPolicy::BySize(config.max_size_bytes)
        } else {
            RotationPolicy::Never
        };

        RotatingWriter {
            path: path.into(),
            policy,
            max_generations: config.max_files.max(1),
            compress: config.compress,
            current_size: 0,
            initialized: false,
        }
    }

    /// Seed the tracked size from the file on disk. Only the first call
    /// reads the file; later calls are no-ops.
    pub fn init(&mut self) -> Result<(), TelemetryError> {
        if self.initialized {
            return Ok(());
        }

        self.current_size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(source) => {
                return Err(TelemetryError::WriteIo {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        self.initialized = true;
        debug!(
            "Rotation tracking {} from {} bytes",
            self.path.display(),
            self.current_size
        );
        Ok(())
    }

    pub fn track_write(&mut self, bytes_written: u64) {
        self.current_size = self.current_size.saturating_add(bytes_written);
    }

    pub fn should_rotate(&self) -> bool {
        match self.policy {
            RotationPolicy::BySize(max_bytes) => self.current_size >= max_bytes,
            RotationPolicy::Never => false,
        }
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of generation `index`, with or without the gzip suffix.
    pub fn generation_path(&self, index: usize, compressed: bool) -> PathBuf {
        generation_path(&self.path, index, compressed)
    }

    /// Rotated generations currently on disk, most recent first.
    pub fn generations(&self) -> Result<Vec<Generation>, TelemetryError> {
        list_generations(&self.path).map_err(|source| self.rotation_error(source))
    }

    /// Roll the active file over to generation 1.
    ///
    /// Older generations shift up by one; anything that would land beyond
    /// `max_generations` is deleted. With compression enabled the new
    /// generation 1 is gzipped. A compression failure leaves the plain
    /// `.1` file in place and is reported after the size has been reset,
    /// since the active path is already free at that point.
    pub fn rotate(&mut self) -> Result<(), TelemetryError> {
        if self.policy == RotationPolicy::Never {
            return Ok(());
        }

        if !self.path.exists() {
            self.current_size = 0;
            return Ok(());
        }

        let mut existing = self.generations()?;
        existing.sort_by(|a, b| b.index.cmp(&a.index));

        for generation in existing {
            if generation.index >= self.max_generations {
                if let Err(e) = fs::remove_file(&generation.path) {
                    warn!(
                        "Failed to prune rotated log {}: {}",
                        generation.path.display(),
                        e
                    );
                } else {
                    debug!("Pruned rotated log {}", generation.path.display());
                }
                continue;
            }

            let target = self.generation_path(generation.index + 1, generation.compressed);
            fs::rename(&generation.path, &target).map_err(|e| self.rotation_error(e))?;
        }

        let first = self.generation_path(1, false);
        fs::rename(&self.path, &first).map_err(|e| self.rotation_error(e))?;
        self.current_size = 0;

        if self.compress {
            self.compress_generation(&first)?;
        }

        info!(
            "Rotated {} (keeping {} generations)",
            self.path.display(),
            self.max_generations
        );
        Ok(())
    }

    /// Gzip `path` into `path.gz`, going through a temporary file so a
    /// failed compression never leaves a truncated archive behind.
    fn compress_generation(&self, path: &Path) -> Result<(), TelemetryError> {
        let mut compressed = path.as_os_str().to_owned();
        compressed.push(GZIP_SUFFIX);
        let compressed = PathBuf::from(compressed);

        let mut tmp = compressed.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let result = (|| -> io::Result<()> {
            let mut input = BufReader::new(File::open(path)?);
            let output = BufWriter::new(File::create(&tmp)?);
            let mut encoder = GzEncoder::new(output, Compression::default());
            io::copy(&mut input, &mut encoder)?;
            encoder.finish()?.flush()?;
            fs::rename(&tmp, &compressed)
        })();

        if let Err(e) = result {
            fs::remove_file(&tmp).ok();
            warn!(
                "Compression of {} failed, keeping it uncompressed: {}",
                path.display(),
                e
            );
            return Err(self.rotation_error(e));
        }

        // Remove uncompressed file
        fs::remove_file(path).map_err(|e| self.rotation_error(e))?;
        Ok(())
    }

    fn rotation_error(&self, source: io::Error) -> TelemetryError {
        TelemetryError::Rotation {
            path: self.path.clone(),
            source,
        }
    }
}

/// Path of generation `index` of `base`.
pub fn generation_path(base: &Path, index: usize, compressed: bool) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{}", index));
    if compressed {
        name.push(GZIP_SUFFIX);
    }
    PathBuf::from(name)
}

/// Rotated generations of `base` found next to it, most recent first.
pub fn list_generations(base: &Path) -> io::Result<Vec<Generation>> {
    let Some(file_name) = base.file_name().and_then(|n| n.to_str()) else {
        return Ok(Vec::new());
    };
    let dir = match base.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = format!("{}.", file_name);

    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut generations: Vec<Generation> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let rest = name.to_str()?.strip_prefix(&prefix)?;
            let (digits, compressed) = match rest.strip_suffix(GZIP_SUFFIX) {
                Some(digits) => (digits, true),
                None => (rest, false),
            };
            let index: usize = digits.parse().ok().filter(|i| *i >= 1)?;
            Some(Generation {
                index,
                compressed,
                path: entry.path(),
            })
        })
        .collect();

    generations.sort_by_key(|g| (g.index, g.compressed));
    Ok(generations)
}

/// Open a generation (or the active file) for reading, decompressing
/// `.gz` files transparently.
pub fn open_generation(path: &Path) -> io::Result<Box<dyn Read>> {
    let file = File::open(path)?;
    let is_gzip = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == "gz");
    if is_gzip {
        Ok(Box::new(GzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(max_size_bytes: u64, max_files: usize, compress: bool) -> RotateConfig {
        RotateConfig {
            enabled: true,
            max_size_bytes,
            max_files,
            compress,
        }
    }

    fn read_all(path: &Path) -> String {
        let mut out = String::new();
        open_generation(path)
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_disabled_never_rotates() -> Result<(), TelemetryError> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.jsonl");
        fs::write(&path, "x".repeat(1000)).unwrap();

        let mut rotator = RotatingWriter::new(&path, &RotateConfig::default());
        rotator.init()?;
        rotator.track_write(u64::MAX / 2);
        assert!(!rotator.should_rotate());

        rotator.rotate()?;
        assert!(path.exists());
        assert!(rotator.generations()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_tracks_size_and_triggers() -> Result<(), TelemetryError> {
        let dir = TempDir::new().unwrap();
        let mut rotator = RotatingWriter::new(dir.path().join("test.jsonl"), &config(100, 5, false));
        rotator.init()?;

        rotator.track_write(50);
        assert!(!rotator.should_rotate());
        rotator.track_write(60);
        assert!(rotator.should_rotate());
        Ok(())
    }

    #[test]
    fn test_init_seeds_from_existing_file_once() -> Result<(), TelemetryError> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.jsonl");
        fs::write(&path, "x".repeat(100)).unwrap();

        let mut rotator = RotatingWriter::new(&path, &config(50, 5, false));
        rotator.init()?;
        assert_eq!(rotator.current_size(), 100);
        assert!(rotator.should_rotate());

        rotator.track_write(5);
        rotator.init()?;
        assert_eq!(rotator.current_size(), 105);
        Ok(())
    }

    #[test]
    fn test_rotate_moves_active_to_first_generation() -> Result<(), TelemetryError> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.jsonl");
        fs::write(&path, "original content\n").unwrap();

        let mut rotator = RotatingWriter::new(&path, &config(10, 5, false));
        rotator.init()?;
        rotator.rotate()?;

        assert!(!path.exists());
        let first = dir.path().join("test.jsonl.1");
        assert_eq!(fs::read_to_string(first).unwrap(), "original content\n");
        assert!(!rotator.should_rotate());
        assert_eq!(rotator.current_size(), 0);
        Ok(())
    }

    #[test]
    fn test_compressed_generation_round_trips() -> Result<(), TelemetryError> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.jsonl");
        fs::write(&path, "content to compress\n").unwrap();

        let mut rotator = RotatingWriter::new(&path, &config(10, 5, true));
        rotator.init()?;
        rotator.rotate()?;

        let gz = dir.path().join("test.jsonl.1.gz");
        assert!(gz.exists());
        assert!(!dir.path().join("test.jsonl.1").exists());
        assert!(!dir.path().join("test.jsonl.1.gz.tmp").exists());
        assert_eq!(read_all(&gz), "content to compress\n");
        Ok(())
    }

    #[test]
    fn test_failed_compression_keeps_plain_generation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.jsonl");
        fs::write(&path, "keep me\n").unwrap();
        // A directory where the temporary archive goes makes File::create fail
        fs::create_dir(dir.path().join("test.jsonl.1.gz.tmp")).unwrap();

        let mut rotator = RotatingWriter::new(&path, &config(10, 5, true));
        rotator.init().unwrap();
        rotator.track_write(8);

        let err = rotator.rotate().unwrap_err();
        assert!(matches!(err, TelemetryError::Rotation { .. }));
        assert_eq!(rotator.current_size(), 0);
        assert!(!path.exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("test.jsonl.1")).unwrap(),
            "keep me\n"
        );
        assert!(!dir.path().join("test.jsonl.1.gz").exists());
    }

    #[test]
    fn test_retention_limits_generations() -> Result<(), TelemetryError> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.jsonl");
        for i in 1..=5 {
            fs::write(dir.path().join(format!("test.jsonl.{}", i)), format!("old {}\n", i)).unwrap();
        }
        fs::write(&path, "current\n").unwrap();

        let mut rotator = RotatingWriter::new(&path, &config(10, 3, false));
        rotator.init()?;
        rotator.rotate()?;

        let generations = rotator.generations()?;
        assert_eq!(generations.len(), 3);
        assert_eq!(fs::read_to_string(dir.path().join("test.jsonl.1")).unwrap(), "current\n");
        assert_eq!(fs::read_to_string(dir.path().join("test.jsonl.2")).unwrap(), "old 1\n");
        assert_eq!(fs::read_to_string(dir.path().join("test.jsonl.3")).unwrap(), "old 2\n");
        assert!(!dir.path().join("test.jsonl.4").exists());
        Ok(())
    }

    #[test]
    fn test_repeated_rotation_shifts_compressed_history() -> Result<(), TelemetryError> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.jsonl");
        let mut rotator = RotatingWriter::new(&path, &config(1, 2, true));
        rotator.init()?;

        for round in 1..=4 {
            fs::write(&path, format!("round {}\n", round)).unwrap();
            rotator.track_write(1);
            assert!(rotator.should_rotate());
            rotator.rotate()?;
        }

        let generations = rotator.generations()?;
        assert_eq!(generations.len(), 2);
        assert!(generations.iter().all(|g| g.compressed));
        assert_eq!(read_all(&rotator.generation_path(1, true)), "round 4\n");
        assert_eq!(read_all(&rotator.generation_path(2, true)), "round 3\n");
        Ok(())
    }

    #[test]
    fn test_rotate_without_active_file_only_resets() -> Result<(), TelemetryError> {
        let dir = TempDir::new().unwrap();
        let mut rotator = RotatingWriter::new(dir.path().join("missing.jsonl"), &config(10, 3, true));
        rotator.init()?;
        rotator.track_write(20);
        rotator.rotate()?;
        assert_eq!(rotator.current_size(), 0);
        assert!(rotator.generations()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_zero_generations_clamped_to_one() -> Result<(), TelemetryError> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.jsonl");
        let mut rotator = RotatingWriter::new(&path, &config(1, 0, false));
        rotator.init()?;

        fs::write(&path, "a\n").unwrap();
        rotator.rotate()?;
        fs::write(&path, "b\n").unwrap();
        rotator.rotate()?;

        let generations = rotator.generations()?;
        assert_eq!(generations.len(), 1);
        assert_eq!(fs::read_to_string(&generations[0].path).unwrap(), "b\n");
        Ok(())
    }

    #[test]
    fn test_listing_ignores_unrelated_files() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("test.jsonl");
        for name in ["test.jsonl.1", "test.jsonl.2.gz", "test.jsonl.bak", "test.jsonl.0", "other.jsonl.1", "test.jsonl.3.gz.tmp"] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let found = list_generations(&base).unwrap();
        let summary: Vec<_> = found.iter().map(|g| (g.index, g.compressed)).collect();
        assert_eq!(summary, vec![(1, false), (2, true)]);
    }
}
