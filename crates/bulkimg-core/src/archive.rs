//! ZIP packaging of converted outputs.

use crate::target::OutputFormat;
use indexmap::IndexMap;
use std::io::{Cursor, Write};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to add archive entry '{name}': {source}")]
    Entry {
        name: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("failed to write archive entry '{name}': {source}")]
    Write {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to finalize archive: {0}")]
    Finish(#[source] zip::result::ZipError),

    #[error("failed to save archive to '{path}': {source}")]
    Save {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Collects named outputs and packages them into one ZIP.
///
/// Entry names are unique: adding a name that is already present replaces
/// the earlier bytes and keeps the entry's original position.
#[derive(Debug, Clone, Default)]
pub struct ArchivePackager {
    entries: IndexMap<String, Vec<u8>>,
}

impl ArchivePackager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        let name = name.into();
        if let Some(replaced) = self.entries.insert(name, bytes) {
            debug!(bytes = replaced.len(), "replaced archive entry with the same name");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry names in archive order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Build the deflate-compressed archive.
    pub fn finish(&self) -> Result<Vec<u8>, ArchiveError> {
        let mut output = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut output);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);

            for (name, data) in &self.entries {
                writer
                    .start_file(name.as_str(), options)
                    .map_err(|source| ArchiveError::Entry {
                        name: name.clone(),
                        source,
                    })?;
                writer.write_all(data).map_err(|source| ArchiveError::Write {
                    name: name.clone(),
                    source,
                })?;
            }

            writer.finish().map_err(ArchiveError::Finish)?;
        }
        Ok(output.into_inner())
    }

    /// Build the archive and save it to `path`.
    pub fn write_to(&self, path: &Path) -> Result<(), ArchiveError> {
        let bytes = self.finish()?;
        std::fs::write(path, &bytes).map_err(|source| ArchiveError::Save {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), entries = self.len(), bytes = bytes.len(), "archive saved");
        Ok(())
    }
}

/// `converted_images_<ext>.zip`
pub fn default_archive_name(format: OutputFormat) -> String {
    format!("converted_images_{}.zip", format.extension())
}
