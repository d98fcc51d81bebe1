//! Input images.

use std::path::Path;

/// One input image: a display name, its raw bytes and a declared media type.
///
/// Items are read-only once created and live only for the duration of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    /// Display name, usually the original file name (with extension).
    pub name: String,
    /// Raw, still-encoded content.
    pub bytes: Vec<u8>,
    /// Declared media type such as `image/jpeg`.
    pub media_type: String,
}

impl SourceItem {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes,
            media_type: media_type.into(),
        }
    }

    /// Build an item from in-memory bytes, declaring the media type from the name.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let media_type = media_type_for_name(&name).to_string();
        Self {
            name,
            bytes,
            media_type,
        }
    }

    /// Read a local file. The display name is the file name without directories.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Ok(Self::from_bytes(name, bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Media type declared for a file name, judged by its extension only.
pub fn media_type_for_name(name: &str) -> &'static str {
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => return "application/octet-stream",
    };
    match ext.as_str() {
        "jpg" | "jpeg" | "jfif" | "pjpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "tif" | "tiff" => "image/tiff",
        "ico" => "image/x-icon",
        "svg" => "image/svg+xml",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_for_name() {
        assert_eq!(media_type_for_name("a.JPG"), "image/jpeg");
        assert_eq!(media_type_for_name("photo.final.png"), "image/png");
        assert_eq!(media_type_for_name("README"), "application/octet-stream");
        assert_eq!(media_type_for_name("notes.txt"), "application/octet-stream");
    }

    #[test]
    fn test_from_path_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.webp");
        std::fs::write(&path, b"RIFF").unwrap();

        let item = SourceItem::from_path(&path).unwrap();
        assert_eq!(item.name, "cat.webp");
        assert_eq!(item.media_type, "image/webp");
        assert_eq!(item.bytes, b"RIFF");
    }
}
