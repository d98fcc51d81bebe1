//! Output file naming.

use crate::target::OutputFormat;

/// Name used when a URL has no usable file name.
pub const FALLBACK_NAME: &str = "image.jpg";

/// Replace the final extension with the encoding's extension.
///
/// `photo.final.png` becomes `photo.final.jpeg`. A name without an extension
/// gets one appended, and an empty name becomes `image.<ext>`.
pub fn converted_name(name: &str, format: OutputFormat) -> String {
    let ext = format.extension();
    let name = name.trim();
    if name.is_empty() {
        return format!("image.{ext}");
    }
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{stem}.{ext}"),
        _ => format!("{name}.{ext}"),
    }
}

/// Last non-empty path segment of a URL, ignoring query and fragment.
pub fn url_file_name(url: &str) -> Option<String> {
    let url = url.trim();
    let without_suffix = url.split(['?', '#']).next().unwrap_or("");
    let path = match without_suffix.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path).unwrap_or(""),
        None => without_suffix,
    };
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .next_back()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converted_name() {
        assert_eq!(converted_name("a.png", OutputFormat::Jpeg), "a.jpeg");
        assert_eq!(converted_name("photo.final.png", OutputFormat::Webp), "photo.final.webp");
        assert_eq!(converted_name("README", OutputFormat::Png), "README.png");
        assert_eq!(converted_name(".hidden", OutputFormat::Gif), ".hidden.gif");
        assert_eq!(converted_name("", OutputFormat::Avif), "image.avif");
    }

    #[test]
    fn test_url_file_name() {
        assert_eq!(
            url_file_name("https://cdn.test/img/cat.png?w=200#top").as_deref(),
            Some("cat.png")
        );
        assert_eq!(url_file_name("https://cdn.test/img/").as_deref(), Some("img"));
        assert_eq!(url_file_name("https://cdn.test"), None);
        assert_eq!(url_file_name("https://cdn.test/?q=1"), None);
    }
}
