//! # Telemetry Writer
//!
//! Ordered, rotation-capable NDJSON writer for the local audit file.
//!
//! Callers enqueue serialized records without blocking; a dedicated
//! `telemetry-writer` thread owns the file handle and appends them in
//! enqueue order. `flush()` is a barrier: it resolves once every record
//! enqueued before it has reached the OS.

use super::rotate::RotatingWriter;
use crate::config::RotateConfig;
use crate::error::TelemetryError;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot};

const BUFFER_SIZE: usize = 8192;

type Reply = oneshot::Sender<Result<(), TelemetryError>>;

enum WriterCommand {
    Append(String),
    Flush(Reply),
    Close(Reply),
}

/// Counters maintained by the writer thread.
#[derive(Debug, Clone, Default)]
pub struct WriterStats {
    pub records_written: u64,
    pub bytes_written: u64,
    pub rotations: u64,
    pub write_errors: u64,
}

/// Handle to the writer thread. Cheap to share behind `&`.
pub struct TelemetryWriter {
    path: PathBuf,
    tx: mpsc::UnboundedSender<WriterCommand>,
    closed: AtomicBool,
    stats: Arc<Mutex<WriterStats>>,
}

struct ActiveFile {
    path: PathBuf,
    rotator: RotatingWriter,
    writer: Option<BufWriter<File>>,
    pending_error: Option<TelemetryError>,
    stats: Arc<Mutex<WriterStats>>,
}

impl TelemetryWriter {
    /// Start a writer for `path`. The file itself is created lazily on the
    /// first append; rotation state is seeded from it now if it exists.
    pub fn open(path: impl Into<PathBuf>, rotate: &RotateConfig) -> Result<Self, TelemetryError> {
        let path = path.into();
        let mut rotator = RotatingWriter::new(&path, rotate);
        rotator.init()?;

        let stats = Arc::new(Mutex::new(WriterStats::default()));
        let active = ActiveFile {
            path: path.clone(),
            rotator,
            writer: None,
            pending_error: None,
            stats: Arc::clone(&stats),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        thread::Builder::new()
            .name("telemetry-writer".to_string())
            .spawn(move || active.run(rx))
            .map_err(|source| TelemetryError::WriteIo {
                path: path.clone(),
                source,
            })?;

        info!("Telemetry writer started for {}", path.display());

        Ok(TelemetryWriter {
            path,
            tx,
            closed: AtomicBool::new(false),
            stats,
        })
    }

    /// Serialize `record` and enqueue it as one line.
    pub fn write<T: Serialize>(&self, record: &T) -> Result<(), TelemetryError> {
        let line = serde_json::to_string(record)?;
        self.write_line(line)
    }

    /// Enqueue an already serialized JSON object. `line` must not contain a
    /// newline.
    pub fn write_line(&self, line: String) -> Result<(), TelemetryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TelemetryError::Closed);
        }
        self.tx
            .send(WriterCommand::Append(line))
            .map_err(|_| TelemetryError::Closed)
    }

    /// Wait until every earlier record has been written, then report the
    /// first failure since the previous barrier.
    pub async fn flush(&self) -> Result<(), TelemetryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TelemetryError::Closed);
        }
        let (reply, done) = oneshot::channel();
        self.tx
            .send(WriterCommand::Flush(reply))
            .map_err(|_| TelemetryError::Closed)?;
        done.await.map_err(|_| TelemetryError::Closed)?
    }

    /// Flush, release the file and stop the writer thread.
    pub async fn close(&self) -> Result<(), TelemetryError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TelemetryError::Closed);
        }
        let (reply, done) = oneshot::channel();
        self.tx
            .send(WriterCommand::Close(reply))
            .map_err(|_| TelemetryError::Closed)?;
        done.await.map_err(|_| TelemetryError::Closed)?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> WriterStats {
        self.stats.lock().clone()
    }
}

impl ActiveFile {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
        while let Some(command) = rx.blocking_recv() {
            let mut next = Some(command);
            while let Some(command) = next.take() {
                match command {
                    WriterCommand::Append(line) => self.append(line),
                    WriterCommand::Flush(reply) => {
                        let _ = reply.send(self.barrier());
                    }
                    WriterCommand::Close(reply) => {
                        let result = self.barrier();
                        self.writer = None;
                        debug!("Telemetry writer for {} closed", self.path.display());
                        let _ = reply.send(result);
                        return;
                    }
                }
                next = rx.try_recv().ok();
            }

            // Queue drained
            if let Err(e) = self.flush_buffer() {
                self.record_error(e);
            }
        }

        // Every handle dropped without close()
        if let Err(e) = self.flush_buffer() {
            error!("Final telemetry flush failed: {}", e);
        }
    }

    fn append(&mut self, line: String) {
        if let Err(e) = self.append_line(line) {
            self.record_error(e);
        }
    }

    fn append_line(&mut self, mut line: String) -> Result<(), TelemetryError> {
        line.push('\n');

        if self.rotator.should_rotate() {
            // The handle must be released before the file is renamed
            self.flush_buffer()?;
            self.writer = None;
            match self.rotator.rotate() {
                Ok(()) => self.stats.lock().rotations += 1,
                Err(e) => self.record_error(e),
            }
        }

        let path = self.path.clone();
        let writer = self.writer()?;
        writer
            .write_all(line.as_bytes())
            .map_err(|source| TelemetryError::WriteIo { path, source })?;

        let len = line.len() as u64;
        self.rotator.track_write(len);
        let mut stats = self.stats.lock();
        stats.records_written += 1;
        stats.bytes_written += len;
        Ok(())
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, TelemetryError> {
        if self.writer.is_none() {
            let path = self.path.clone();
            let io_error = |source| TelemetryError::WriteIo {
                path: path.clone(),
                source,
            };

            let torn = ends_mid_line(&path).map_err(io_error)?;
            let file = open_append(&path).map_err(io_error)?;
            let mut writer = BufWriter::with_capacity(BUFFER_SIZE, file);
            if torn {
                warn!("{} ends mid-line; starting a new line", path.display());
                writer.write_all(b"\n").map_err(io_error)?;
                self.rotator.track_write(1);
            }
            self.writer = Some(writer);
        }
        self.writer.as_mut().ok_or(TelemetryError::Closed)
    }

    fn flush_buffer(&mut self) -> Result<(), TelemetryError> {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(source) = writer.flush() {
                // Drop the handle so the next append reopens the path
                self.writer = None;
                return Err(TelemetryError::WriteIo {
                    path: self.path.clone(),
                    source,
                });
            }
        }
        Ok(())
    }

    fn barrier(&mut self) -> Result<(), TelemetryError> {
        if let Err(e) = self.flush_buffer() {
            self.record_error(e);
        }
        match self.pending_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn record_error(&mut self, e: TelemetryError) {
        error!("Telemetry write failed: {}", e);
        self.stats.lock().write_errors += 1;
        if self.pending_error.is_none() {
            self.pending_error = Some(e);
        }
    }
}

/// Whether an existing file lacks its final newline, as after a crash
/// mid-write or an external edit.
fn ends_mid_line(path: &Path) -> io::Result<bool> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn read_lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_writes_ndjson_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.jsonl");
        let writer = TelemetryWriter::open(&path, &RotateConfig::default()).unwrap();

        for i in 0..3 {
            writer.write(&json!({"type": "test", "seq": i})).unwrap();
        }
        writer.flush().await.unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        for (i, line) in lines.iter().enumerate() {
            assert_eq!(line["seq"], i);
        }
        assert_eq!(writer.stats().records_written, 3);
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deep").join("test.jsonl");
        let writer = TelemetryWriter::open(&path, &RotateConfig::default()).unwrap();

        writer.write(&json!({"type": "test"})).unwrap();
        writer.flush().await.unwrap();
        assert!(path.exists());
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_appends_to_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.jsonl");
        fs::write(&path, "{\"type\":\"earlier\"}\n").unwrap();

        let writer = TelemetryWriter::open(&path, &RotateConfig::default()).unwrap();
        writer.write(&json!({"type": "later"})).unwrap();
        writer.close().await.unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "earlier");
        assert_eq!(lines[1]["type"], "later");
    }

    #[tokio::test]
    async fn test_appends_after_unterminated_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.jsonl");
        fs::write(&path, "{\"type\":\"earlier\"}").unwrap();

        let writer = TelemetryWriter::open(&path, &RotateConfig::default()).unwrap();
        writer.write(&json!({"type": "later"})).unwrap();
        writer.close().await.unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "earlier");
        assert_eq!(lines[1]["type"], "later");
    }

    #[tokio::test]
    async fn test_rejects_use_after_close() {
        let dir = TempDir::new().unwrap();
        let writer =
            TelemetryWriter::open(dir.path().join("test.jsonl"), &RotateConfig::default()).unwrap();
        writer.close().await.unwrap();

        assert!(matches!(
            writer.write(&json!({"type": "late"})),
            Err(TelemetryError::Closed)
        ));
        assert!(matches!(writer.flush().await, Err(TelemetryError::Closed)));
        assert!(matches!(writer.close().await, Err(TelemetryError::Closed)));
    }

    #[tokio::test]
    async fn test_rotates_before_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.jsonl");
        let rotate = RotateConfig {
            enabled: true,
            max_size_bytes: 50,
            max_files: 3,
            compress: false,
        };
        let writer = TelemetryWriter::open(&path, &rotate).unwrap();

        let filler = "x".repeat(40);
        writer.write(&json!({"n": 1, "pad": filler})).unwrap();
        writer.write(&json!({"n": 2})).unwrap();
        writer.flush().await.unwrap();

        let rotated = read_lines(&dir.path().join("test.jsonl.1"));
        assert_eq!(rotated.len(), 1);
        assert_eq!(rotated[0]["n"], 1);

        let active = read_lines(&path);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0]["n"], 2);
        assert_eq!(writer.stats().rotations, 1);
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reports_error_at_next_flush() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes every open fail
        let path = dir.path().join("occupied");
        fs::create_dir(&path).unwrap();

        let writer = TelemetryWriter::open(&path, &RotateConfig::default()).unwrap();
        writer.write(&json!({"type": "test"})).unwrap();

        let err = writer.flush().await.unwrap_err();
        assert!(matches!(err, TelemetryError::WriteIo { .. }));
        assert_eq!(writer.stats().write_errors, 1);

        // Reported once; the next barrier is clean
        writer.flush().await.unwrap();
        writer.close().await.unwrap();
    }
}
