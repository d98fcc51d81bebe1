//! Output sinks: where transformed bytes end up.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tracing::debug;

/// Errors writing one output.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("invalid {what} name '{name}'")]
    InvalidName { what: &'static str, name: String },

    #[error("cannot create folder '{}': {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot create file '{}': {source}", path.display())]
    CreateFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed writing '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no free file name for '{0}' in the download folder")]
    NoFreeName(String),
}

/// Destination for transformed outputs.
///
/// Implementations are shared across all concurrent items of a chunk.
pub trait OutputSink: Send + Sync {
    /// Write `bytes` as `name`, inside `folder` when the sink supports folders.
    ///
    /// Returns the path that was written. The content is fully flushed before
    /// this returns.
    fn write(&self, bytes: &[u8], name: &str, folder: Option<&str>) -> Result<PathBuf, SinkError>;
}

/// Writes into a chosen output directory, creating sub-folders on demand.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if needed and return a sink for it.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| SinkError::CreateDir {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `name` lands inside `folder`. A blank folder means the root.
    pub fn path_for(&self, name: &str, folder: Option<&str>) -> PathBuf {
        match non_blank(folder) {
            Some(folder) => self.root.join(folder).join(name),
            None => self.root.join(name),
        }
    }
}

impl OutputSink for DirectorySink {
    fn write(&self, bytes: &[u8], name: &str, folder: Option<&str>) -> Result<PathBuf, SinkError> {
        check_component("file", name)?;

        let dir = match non_blank(folder) {
            Some(folder) => {
                check_component("folder", folder)?;
                let dir = self.root.join(folder);
                // create_dir_all tolerates a concurrent creator
                fs::create_dir_all(&dir).map_err(|source| SinkError::CreateDir {
                    path: dir.clone(),
                    source,
                })?;
                dir
            }
            None => self.root.clone(),
        };

        // Staged next to the target and renamed over it, so concurrent writers
        // of one name each leave a complete file
        let path = dir.join(name);
        let mut staged = NamedTempFile::new_in(&dir).map_err(|source| SinkError::CreateFile {
            path: path.clone(),
            source,
        })?;
        write_fully(staged.as_file_mut(), bytes, &path)?;
        staged.persist(&path).map_err(|e| SinkError::Write {
            path: path.clone(),
            source: e.error,
        })?;

        debug!(path = %path.display(), bytes = bytes.len(), "wrote output");
        Ok(path)
    }
}

/// Saves every item as an independent file in a download folder.
///
/// Folders are ignored and existing files are never overwritten: a taken
/// name gets a ` (n)` suffix instead.
#[derive(Debug, Clone)]
pub struct DownloadSink {
    dir: PathBuf,
}

const MAX_DUPLICATE_SUFFIX: u32 = 9999;

impl DownloadSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Sink for the user's download directory, if the platform has one.
    pub fn user_downloads() -> Option<Self> {
        dirs::download_dir().map(Self::new)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl OutputSink for DownloadSink {
    fn write(&self, bytes: &[u8], name: &str, _folder: Option<&str>) -> Result<PathBuf, SinkError> {
        check_component("file", name)?;
        fs::create_dir_all(&self.dir).map_err(|source| SinkError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        for n in 0..=MAX_DUPLICATE_SUFFIX {
            let path = self.dir.join(numbered_name(name, n));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    write_fully(&mut file, bytes, &path)?;
                    debug!(path = %path.display(), bytes = bytes.len(), "saved download");
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(SinkError::CreateFile { path, source }),
            }
        }

        Err(SinkError::NoFreeName(name.to_string()))
    }
}

/// Where a batch writes its outputs.
#[derive(Debug, Clone)]
pub enum OutputTarget {
    /// A chosen output directory with folder support.
    Directory(DirectorySink),
    /// No directory chosen: each output becomes a separate download.
    Download(DownloadSink),
}

impl OutputTarget {
    pub fn sink(&self) -> &dyn OutputSink {
        match self {
            OutputTarget::Directory(sink) => sink,
            OutputTarget::Download(sink) => sink,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            OutputTarget::Directory(sink) => sink.root(),
            OutputTarget::Download(sink) => sink.dir(),
        }
    }
}

/// Keeps the item latest in batch order as the final content of each path.
///
/// Items of one chunk run concurrently, so two items writing the same output
/// may finish in either order. Writes to one path are serialized, and a write
/// is skipped once a later item has already written that path. Download
/// targets never overwrite and pass straight through.
#[derive(Debug, Default)]
pub struct OrderedWrites {
    written: Mutex<HashMap<PathBuf, Arc<Mutex<Option<usize>>>>>,
}

impl OrderedWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write item `seq`'s output through `target`.
    pub fn write(
        &self,
        target: &OutputTarget,
        seq: usize,
        bytes: &[u8],
        name: &str,
        folder: Option<&str>,
    ) -> Result<PathBuf, SinkError> {
        let sink = match target {
            OutputTarget::Directory(sink) => sink,
            OutputTarget::Download(sink) => return sink.write(bytes, name, folder),
        };

        let path = sink.path_for(name, folder);
        let slot = {
            let mut written = self.written.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(written.entry(path.clone()).or_default())
        };

        let mut latest = slot.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*latest, Some(later) if later > seq) {
            debug!(path = %path.display(), seq, "superseded by a later item");
            return Ok(path);
        }
        let path = sink.write(bytes, name, folder)?;
        *latest = Some(seq);
        Ok(path)
    }
}

fn non_blank(folder: Option<&str>) -> Option<&str> {
    folder.map(str::trim).filter(|f| !f.is_empty())
}

fn write_fully(file: &mut File, bytes: &[u8], path: &Path) -> Result<(), SinkError> {
    let wrap = |source| SinkError::Write {
        path: path.to_path_buf(),
        source,
    };
    file.write_all(bytes).map_err(wrap)?;
    file.flush().map_err(wrap)?;
    file.sync_all().map_err(wrap)?;
    Ok(())
}

/// A single path component: no separators, no traversal, not empty.
fn check_component(what: &'static str, name: &str) -> Result<(), SinkError> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(SinkError::InvalidName {
            what,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// `photo.jpg` -> `photo (2).jpg` for n = 2; n = 0 keeps the name.
fn numbered_name(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({n}).{ext}"),
        _ => format!("{name} ({n})"),
    }
}
