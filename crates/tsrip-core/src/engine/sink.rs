//! Sink writers: the destination end of the ordered byte stream.
//!
//! A sink accepts chunks strictly in the order handed to it and appends
//! them to the destination. `FileSink` writes through a `.part` temp file
//! and atomically renames on completion; `StreamSink` adapts any
//! `io::Write` (pipe, stdout, a Vec in tests).

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::PartialOutputPolicy;

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path
/// (e.g. `show.ts` → `show.ts.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Destination-side failure (disk full, permission, rename across
/// filesystems). Never retried.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("write: {0}")]
    Write(#[source] std::io::Error),
    #[error("finalize {path}: {source}")]
    Finalize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Append-only destination for the reassembled stream. The handle is opened
/// before the first chunk and released on every exit path: `complete` after
/// the last chunk of a successful merge, `abandon` on failure.
pub trait Sink {
    /// Append one chunk after all previously appended chunks.
    fn append(&mut self, chunk: &[u8]) -> Result<(), SinkError>;

    /// Flush and release the destination after the final chunk.
    fn complete(&mut self) -> Result<(), SinkError>;

    /// Release the destination after a failed merge, applying the
    /// partial-output policy. Best-effort; must not panic.
    fn abandon(&mut self);
}

/// File-backed sink: appends to `<dest>.part`, then syncs and atomically
/// renames to `dest` on completion. On abandon, the `.part` file is kept or
/// removed per the configured policy (kept by default, so a failed merge
/// leaves its valid prefix behind for inspection).
pub struct FileSink {
    file: Option<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    policy: PartialOutputPolicy,
}

impl FileSink {
    /// Create the temp file for `final_path`, truncating any leftover from
    /// a previous run.
    pub fn create(final_path: &Path, policy: PartialOutputPolicy) -> Result<Self, SinkError> {
        let temp = temp_path(final_path);
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp)
            .map_err(|source| SinkError::Open {
                path: temp.clone(),
                source,
            })?;
        Ok(Self {
            file: Some(file),
            temp_path: temp,
            final_path: final_path.to_path_buf(),
            policy,
        })
    }

    /// Path of the temp file while the merge is running.
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }
}

impl Sink for FileSink {
    fn append(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        match self.file.as_mut() {
            Some(f) => f.write_all(chunk).map_err(SinkError::Write),
            None => Err(SinkError::Write(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "sink already released",
            ))),
        }
    }

    fn complete(&mut self) -> Result<(), SinkError> {
        if let Some(f) = self.file.take() {
            f.sync_all().map_err(SinkError::Write)?;
            drop(f);
            std::fs::rename(&self.temp_path, &self.final_path).map_err(|source| {
                SinkError::Finalize {
                    path: self.final_path.clone(),
                    source,
                }
            })?;
        }
        Ok(())
    }

    fn abandon(&mut self) {
        if let Some(f) = self.file.take() {
            let _ = f.sync_all();
            drop(f);
            if self.policy == PartialOutputPolicy::Discard {
                if let Err(e) = std::fs::remove_file(&self.temp_path) {
                    tracing::warn!("could not remove {}: {}", self.temp_path.display(), e);
                }
            }
        }
    }
}

/// Sink over any writer. `complete` flushes; `abandon` flushes best-effort
/// (whatever reached the writer stays there — a pipe cannot be unsent).
pub struct StreamSink<W: Write> {
    writer: W,
}

impl<W: Write> StreamSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Sink for StreamSink<W> {
    fn append(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        self.writer.write_all(chunk).map_err(SinkError::Write)
    }

    fn complete(&mut self) -> Result<(), SinkError> {
        self.writer.flush().map_err(SinkError::Write)
    }

    fn abandon(&mut self) {
        let _ = self.writer.flush();
    }
}
