//! Rotating JSON-lines file sink.
//!
//! The logging hot path must stay responsive, so file output is implemented as:
//! - a bounded queue (non-blocking `try_send`)
//! - a dedicated thread with buffered writes, periodic flush and size-based rotation

use super::LogEntry;
use crate::error::{Result, ShipError};
use crate::transport::Sink;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    pub path: PathBuf,
    pub max_bytes: u64,
    pub max_files: usize,
    pub flush_interval: Duration,
    pub channel_capacity: usize,
}

enum Command {
    Lines(Vec<String>),
    Flush(oneshot::Sender<()>),
}

/// Sink writing one JSON object per line to a local file
pub struct FileSink {
    name: String,
    tx: Mutex<Option<SyncSender<Command>>>,
}

impl FileSink {
    /// Open (or create) the target file and start the writer thread
    pub fn spawn(cfg: FileSinkConfig) -> Result<Self> {
        if let Some(parent) = cfg.path.parent() {
            fs::create_dir_all(parent).map_err(|e| ShipError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let (file, size) = open_append(&cfg.path).map_err(|e| ShipError::Io {
            path: cfg.path.clone(),
            source: e,
        })?;
        let (tx, rx) = sync_channel::<Command>(cfg.channel_capacity.max(1));

        let path = cfg.path.clone();
        thread::Builder::new()
            .name("logship-file-sink".to_string())
            .spawn(move || run_writer(rx, cfg, file, size))
            .map_err(|e| ShipError::Io { path, source: e })?;

        Ok(Self {
            name: "file".to_string(),
            tx: Mutex::new(Some(tx)),
        })
    }

    fn sender(&self) -> Result<SyncSender<Command>> {
        self.tx.lock().clone().ok_or(ShipError::Closed)
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, entry: &LogEntry) -> Result<()> {
        self.write_batch(std::slice::from_ref(entry)).await
    }

    async fn write_batch(&self, entries: &[LogEntry]) -> Result<()> {
        let lines = entries
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        match self.sender()?.try_send(Command::Lines(lines)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ShipError::Sink {
                sink: self.name.clone(),
                reason: "writer queue full".into(),
            }),
            Err(TrySendError::Disconnected(_)) => Err(ShipError::Closed),
        }
    }

    async fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let tx = self.sender()?;
        // The writer queue may be momentarily full; hand the blocking send to a worker.
        tokio::task::spawn_blocking(move || tx.send(Command::Flush(ack_tx)))
            .await
            .map_err(|e| ShipError::Sink {
                sink: "file".into(),
                reason: e.to_string(),
            })?
            .map_err(|_| ShipError::Closed)?;
        ack_rx.await.map_err(|_| ShipError::Closed)
    }

    async fn close(&self) -> Result<()> {
        let flushed = self.flush().await;
        // Dropping the sender ends the writer thread after a final flush.
        self.tx.lock().take();
        flushed
    }
}

fn run_writer(rx: Receiver<Command>, cfg: FileSinkConfig, file: File, start_size: u64) {
    let max_bytes = cfg.max_bytes.max(1024);
    let max_files = cfg.max_files.max(1);
    let flush_interval = if cfg.flush_interval.is_zero() {
        Duration::from_millis(250)
    } else {
        cfg.flush_interval
    };

    let mut writer = BufWriter::new(file);
    let mut size = start_size;
    let mut dirty = false;
    let mut last_flush = Instant::now();

    loop {
        match rx.recv_timeout(flush_interval) {
            Ok(Command::Lines(lines)) => {
                for line in lines {
                    if write_line(&mut writer, &line).is_ok() {
                        size = size.saturating_add(line.len() as u64 + 1);
                        dirty = true;
                    }

                    if size >= max_bytes {
                        let _ = writer.flush();
                        drop(writer);
                        if let Err(e) = rotate_files(&cfg.path, max_files) {
                            warn!("File sink rotation failed: {}", e);
                        }
                        match open_truncate(&cfg.path) {
                            Ok(f) => {
                                writer = BufWriter::new(f);
                                size = 0;
                                dirty = false;
                                last_flush = Instant::now();
                            }
                            Err(e) => {
                                // If we cannot reopen the file, stop writing.
                                warn!("File sink cannot reopen {:?}: {}", cfg.path, e);
                                return;
                            }
                        }
                    }
                }
            }
            Ok(Command::Flush(ack)) => {
                let _ = writer.flush();
                dirty = false;
                last_flush = Instant::now();
                let _ = ack.send(());
            }
            Err(RecvTimeoutError::Timeout) => {
                if dirty && last_flush.elapsed() >= flush_interval {
                    let _ = writer.flush();
                    dirty = false;
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = writer.flush();
                break;
            }
        }
    }
}

fn write_line(writer: &mut BufWriter<File>, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(())
}

fn open_append(path: &Path) -> io::Result<(File, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

fn open_truncate(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
}

fn rotate_files(path: &Path, max_files: usize) -> io::Result<()> {
    if max_files == 0 {
        return Ok(());
    }

    let stem = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "logship.log".to_string());
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    // Remove the oldest.
    let oldest = dir.join(format!("{}.{}", stem, max_files));
    let _ = fs::remove_file(&oldest);

    // Shift: N-1 -> N, ... 1 -> 2.
    for i in (1..max_files).rev() {
        let src = dir.join(format!("{}.{}", stem, i));
        let dst = dir.join(format!("{}.{}", stem, i + 1));
        if src.exists() {
            fs::rename(&src, &dst)?;
        }
    }

    // Active -> .1
    let first = dir.join(format!("{}.1", stem));
    if path.exists() {
        fs::rename(path, first)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;

    fn config(path: PathBuf, max_bytes: u64) -> FileSinkConfig {
        FileSinkConfig {
            path,
            max_bytes,
            max_files: 2,
            flush_interval: Duration::from_millis(20),
            channel_capacity: 64,
        }
    }

    #[test]
    fn test_rotate_files_keeps_max_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");

        fs::write(&path, "active").unwrap();
        fs::write(dir.path().join("app.log.1"), "one").unwrap();
        fs::write(dir.path().join("app.log.2"), "two").unwrap();

        rotate_files(&path, 2).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("app.log.1")).unwrap(), "active");
        assert_eq!(fs::read_to_string(dir.path().join("app.log.2")).unwrap(), "one");
        assert!(!dir.path().join("app.log.3").exists());
    }

    #[tokio::test]
    async fn test_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("app.log");
        let sink = FileSink::spawn(config(path.clone(), 1 << 20)).unwrap();

        let entries = vec![
            LogEntry::new(LogLevel::Info, "first"),
            LogEntry::new(LogLevel::Warn, "second"),
        ];
        sink.write_batch(&entries).await.unwrap();
        sink.flush().await.unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let parsed: Vec<LogEntry> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed, entries);
    }

    #[tokio::test]
    async fn test_rotates_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = FileSink::spawn(config(path.clone(), 1024)).unwrap();

        let big = "x".repeat(600);
        for _ in 0..3 {
            sink.write(&LogEntry::new(LogLevel::Info, big.clone()))
                .await
                .unwrap();
        }
        sink.flush().await.unwrap();

        assert!(dir.path().join("app.log.1").exists());
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::spawn(config(dir.path().join("app.log"), 1 << 20)).unwrap();
        sink.close().await.unwrap();

        let err = sink
            .write(&LogEntry::new(LogLevel::Info, "late"))
            .await
            .unwrap_err();
        assert!(matches!(err, ShipError::Closed));
    }
}
