//! Output destinations for a child's stdout and stderr.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use sluice_common::{SluiceError, SluiceResult, clear_path_for, resolve_in};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// A writer shared between the caller and the engine.
pub type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// How a file sink treats existing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileMode {
    /// Truncate the file before the child writes.
    Overwrite,
    /// Keep existing content and write after it.
    Append,
}

/// Where a child's output goes.
///
/// Sinks are compared by identity: two file sinks are the same sink when they
/// name the same path with the same mode, two writer sinks are the same sink
/// when they are clones of one [`Sink::writer`] call, and there is only one
/// capture sink.
#[derive(Clone)]
pub enum Sink {
    /// Write to a file.
    File {
        /// Path, relative to the child's working directory.
        path: PathBuf,
        /// Overwrite or append.
        mode: FileMode,
    },
    /// Write to a caller-supplied writer.
    Writer(SharedWriter),
    /// Collect the bytes and return them as text with the outcome.
    Capture,
}

/// Identity of a [`Sink`], used to deduplicate requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SinkKey {
    /// A file path and mode.
    File(PathBuf, FileMode),
    /// Address of a shared writer.
    Writer(usize),
    /// The capture marker.
    Capture,
}

impl Sink {
    /// Truncate `path` and write to it.
    pub fn overwrite(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            mode: FileMode::Overwrite,
        }
    }

    /// Append to `path`.
    pub fn append(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            mode: FileMode::Append,
        }
    }

    /// Write to `writer`.
    ///
    /// Clone the returned sink to send several channels to the same writer.
    /// The engine flushes the writer but never shuts it down; it is dropped
    /// when the last clone goes away.
    pub fn writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self::Writer(Arc::new(Mutex::new(Box::new(writer))))
    }

    /// Parse a textual destination: `overwrite:<path>`, `append:<path>` or
    /// `capture`.
    ///
    /// # Errors
    ///
    /// A bare path is rejected so that nobody truncates a file by accident.
    pub fn parse(spec: &str) -> SluiceResult<Self> {
        if spec == "capture" {
            return Ok(Self::Capture);
        }
        if let Some(path) = spec.strip_prefix("overwrite:") {
            return non_empty(path, spec).map(Self::overwrite);
        }
        if let Some(path) = spec.strip_prefix("append:") {
            return non_empty(path, spec).map(Self::append);
        }
        Err(SluiceError::BarePathSink {
            path: spec.to_string(),
        })
    }

    /// Identity of this sink, with file paths as written.
    #[must_use]
    pub fn key(&self) -> SinkKey {
        self.key_in(None)
    }

    /// Identity of this sink once relative file paths are taken against `cwd`.
    ///
    /// `.` segments are dropped; symlinks and `..` are left alone.
    #[must_use]
    pub fn key_in(&self, cwd: Option<&Path>) -> SinkKey {
        match self {
            Self::File { path, mode } => {
                SinkKey::File(resolve_in(cwd, path).components().collect(), *mode)
            }
            Self::Writer(writer) => SinkKey::Writer(Arc::as_ptr(writer).cast::<()>() as usize),
            Self::Capture => SinkKey::Capture,
        }
    }

    /// Open the sink so bytes can be written to it.
    ///
    /// File paths resolve against `cwd`; missing parent directories are
    /// created.
    pub async fn open(self, cwd: Option<&Path>) -> SluiceResult<Destination> {
        match self {
            Self::File { path, mode } => {
                let path = resolve_in(cwd, &path);
                clear_path_for(&path).await.map_err(|err| match err {
                    SluiceError::Io(source) => SluiceError::SinkOpen {
                        path: path.clone(),
                        source,
                    },
                    other => other,
                })?;

                let mut options = tokio::fs::OpenOptions::new();
                match mode {
                    FileMode::Overwrite => options.write(true).create(true).truncate(true),
                    FileMode::Append => options.append(true).create(true),
                };
                let file = options
                    .open(&path)
                    .await
                    .map_err(|source| SluiceError::SinkOpen {
                        path: path.clone(),
                        source,
                    })?;

                tracing::debug!(path = %path.display(), ?mode, "Opened output file");
                Ok(Destination::File { path, file })
            }
            Self::Writer(writer) => Ok(Destination::Writer(writer)),
            Self::Capture => Ok(Destination::Capture),
        }
    }
}

fn non_empty(path: &str, spec: &str) -> SluiceResult<PathBuf> {
    if path.is_empty() {
        return Err(SluiceError::Sink {
            message: format!("{spec:?} names no file"),
        });
    }
    Ok(PathBuf::from(path))
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { path, mode } => f
                .debug_struct("File")
                .field("path", path)
                .field("mode", mode)
                .finish(),
            Self::Writer(_) => f.write_str("Writer"),
            Self::Capture => f.write_str("Capture"),
        }
    }
}

/// An opened sink.
///
/// Files opened here are owned by the engine and closed when delivery ends.
/// Writers belong to the caller and are only flushed.
pub enum Destination {
    /// A file the engine opened.
    File {
        /// Resolved path, for diagnostics.
        path: PathBuf,
        /// The open file.
        file: tokio::fs::File,
    },
    /// A caller-supplied writer.
    Writer(SharedWriter),
    /// In-memory capture.
    Capture,
}

impl Destination {
    /// Human-readable name for logs and failure reports.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::File { path, .. } => path.display().to_string(),
            Self::Writer(_) => "writer".to_string(),
            Self::Capture => "capture".to_string(),
        }
    }

    pub(crate) async fn write(&mut self, chunk: &Bytes) -> std::io::Result<()> {
        match self {
            Self::File { file, .. } => file.write_all(chunk).await,
            Self::Writer(writer) => writer.lock().await.write_all(chunk).await,
            Self::Capture => Ok(()),
        }
    }

    pub(crate) async fn finish(self) -> std::io::Result<()> {
        match self {
            Self::File { mut file, .. } => {
                file.flush().await?;
                file.sync_data().await
            }
            Self::Writer(writer) => writer.lock().await.flush().await,
            Self::Capture => Ok(()),
        }
    }
}
