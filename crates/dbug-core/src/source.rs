//! Configuration documents read from a file and reloaded when the file changes.
use crate::config::DbugDocument;
use crate::error::{DbugError, DbugResult};
use crate::runtime::Dbug;
use std::error::Error as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

/// What a poll compares to decide whether the file changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
}

/// A configuration document on disk.
///
/// [`poll`](ConfigSource::poll) installs the document into a runtime whenever the file's
/// modification time or size differs from the last read. Installing goes through
/// [`Dbug::load_document`], so only the templates and reporters that changed are touched.
/// Failures are logged once per distinct message and leave the installed configuration alone.
#[derive(Debug)]
pub struct ConfigSource {
    path: PathBuf,
    stamp: Option<Stamp>,
    last_error: Option<String>,
}

impl ConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stamp: None,
            last_error: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The message of the most recent failed read, cleared by the next successful load.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Reads and parses the document without installing it.
    pub fn read(&self) -> DbugResult<DbugDocument> {
        let text = fs::read_to_string(&self.path).map_err(|source| DbugError::ReadSource {
            path: self.path.display().to_string(),
            source,
        })?;
        DbugDocument::from_json(&text)
    }

    fn stamp(&self) -> DbugResult<Stamp> {
        let meta = fs::metadata(&self.path).map_err(|source| DbugError::ReadSource {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(Stamp {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }

    /// Installs the document if the file changed since the last poll. Returns whether a new
    /// document was installed.
    pub fn poll(&mut self, dbug: &Dbug) -> bool {
        match self.reload(dbug) {
            Ok(installed) => installed,
            Err(err) => {
                let message = error_chain(&err);
                if self.last_error.as_deref() != Some(message.as_str()) {
                    log::error!("configuration {}: {message}", self.path.display());
                    self.last_error = Some(message);
                }
                false
            }
        }
    }

    fn reload(&mut self, dbug: &Dbug) -> DbugResult<bool> {
        let stamp = self.stamp()?;
        if self.stamp == Some(stamp) {
            return Ok(false);
        }
        // A file that fails to parse is not read again until it changes.
        self.stamp = Some(stamp);
        let document = self.read()?;
        dbug.load_document(document)?;
        log::info!("loaded configuration {}", self.path.display());
        self.last_error = None;
        Ok(true)
    }

    /// Polls on a background thread every `interval` until the returned watcher is dropped.
    pub fn watch(mut self, dbug: Dbug, interval: Duration) -> DbugResult<SourceWatcher> {
        let (stop, stopped) = mpsc::channel::<()>();
        let path = self.path.display().to_string();
        let handle = thread::Builder::new()
            .name(format!("dbug-config {path}"))
            .spawn(move || loop {
                self.poll(&dbug);
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|source| DbugError::ReadSource { path, source })?;
        Ok(SourceWatcher {
            stop: Some(stop),
            handle: Some(handle),
        })
    }
}

fn error_chain(err: &DbugError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Stops its background poll when dropped.
#[derive(Debug)]
pub struct SourceWatcher {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for SourceWatcher {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
