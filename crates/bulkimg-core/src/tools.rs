//! Tool workflows: resize, convert, rename/move and download.
//!
//! Each workflow checks its preconditions first and returns a
//! [`PreconditionError`] without touching any item. Past that point every
//! problem is recorded against the item it belongs to.

use crate::archive::ArchivePackager;
use crate::batch::{BatchReport, BatchRunner, Failure, FailureKind, Job, Progress};
use crate::mapping::{MappingError, MappingRow, Resolved, resolve, validate_rows};
use crate::naming::converted_name;
use crate::sink::{OrderedWrites, OutputTarget, SinkError};
use crate::source::SourceItem;
use crate::target::{Geometry, OutputFormat, PixelBox, TargetError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Media types the convert workflow accepts from local files.
pub const CONVERTIBLE_MEDIA_TYPES: [&str; 6] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/webp",
    "image/avif",
];

/// Errors from decoding or encoding one image.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("cannot decode image: {0}")]
    Decode(String),

    #[error("cannot encode {format}: {detail}")]
    Encode { format: OutputFormat, detail: String },

    #[error("{0} encoding is not available in this build")]
    UnsupportedEncoding(OutputFormat),
}

/// Errors fetching one remote image.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("server answered HTTP {0}")]
    Status(u16),

    #[error("failed reading response body: {0}")]
    Body(String),
}

impl From<TransformError> for Failure {
    fn from(err: TransformError) -> Self {
        let kind = match err {
            TransformError::Decode(_) => FailureKind::Decode,
            TransformError::Encode { .. } | TransformError::UnsupportedEncoding(_) => {
                FailureKind::Encode
            }
        };
        Failure::new(kind, err.to_string())
    }
}

impl From<FetchError> for Failure {
    fn from(err: FetchError) -> Self {
        Failure::new(FailureKind::Fetch, err.to_string())
    }
}

impl From<SinkError> for Failure {
    fn from(err: SinkError) -> Self {
        Failure::new(FailureKind::Write, err.to_string())
    }
}

/// Problems that stop a batch before any item runs.
#[derive(Debug, thiserror::Error)]
pub enum PreconditionError {
    #[error("no input files selected")]
    NoInputs,

    #[error("no URLs given")]
    NoUrls,

    #[error("no input files or URLs given")]
    NoInputsOrUrls,

    #[error("the mapping has no rows")]
    NoMapping,

    #[error("no output directory chosen; this tool needs one")]
    NoOutputTarget,

    #[error("URLs were given but no fetcher is available")]
    NoFetcher,

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Target(#[from] TargetError),
}

/// Decodes and re-encodes images.
pub trait Transformer: Send + Sync {
    /// Fit the image inside `size` and render it centered on a canvas of
    /// exactly that size, encoded like the source where possible.
    fn resize(&self, source: &SourceItem, size: PixelBox) -> Result<Vec<u8>, TransformError>;

    /// Re-encode the image 1:1 in `format`.
    fn convert(&self, source: &SourceItem, format: OutputFormat)
    -> Result<Vec<u8>, TransformError>;
}

/// Retrieves remote images.
pub trait Fetcher: Send + Sync {
    /// Fetch `url`. The returned item is named after the URL's file name.
    fn fetch(&self, url: &str) -> Result<SourceItem, FetchError>;
}

/// An output written by a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Saved {
    /// Output name as requested.
    pub name: String,
    /// Where it actually landed.
    pub path: PathBuf,
}

/// One converted entry added to the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvertOutcome {
    pub name: String,
    pub size: usize,
}

/// Resize every source into `geometry` and write it under its own name.
pub fn resize<P>(
    sources: Vec<SourceItem>,
    geometry: Geometry,
    transformer: &dyn Transformer,
    target: &OutputTarget,
    runner: &BatchRunner,
    on_progress: P,
) -> Result<BatchReport<Saved>, PreconditionError>
where
    P: Fn(Progress<'_>) + Sync,
{
    if sources.is_empty() {
        return Err(PreconditionError::NoInputs);
    }
    let size = geometry.resolve()?;
    info!(%geometry, width = size.width, height = size.height, "resizing");

    let writes = OrderedWrites::new();
    let jobs = sources
        .into_iter()
        .enumerate()
        .map(|(seq, source)| Job::new(source.name.clone(), (seq, source)))
        .collect();

    Ok(runner.run(
        jobs,
        |(seq, source): (usize, SourceItem)| {
            let bytes = transformer.resize(&source, size)?;
            let path = writes.write(target, seq, &bytes, &source.name, None)?;
            Ok(Saved {
                name: source.name,
                path,
            })
        },
        on_progress,
    ))
}

enum ConvertInput {
    Local(SourceItem),
    Remote(String),
}

/// Convert local files, then URLs, to `format` and package the results.
///
/// The returned packager holds the successful outputs in input order.
pub fn convert<P>(
    sources: Vec<SourceItem>,
    urls: Vec<String>,
    format: OutputFormat,
    transformer: &dyn Transformer,
    fetcher: Option<&dyn Fetcher>,
    runner: &BatchRunner,
    on_progress: P,
) -> Result<(BatchReport<ConvertOutcome>, ArchivePackager), PreconditionError>
where
    P: Fn(Progress<'_>) + Sync,
{
    let urls = clean_urls(urls);
    if sources.is_empty() && urls.is_empty() {
        return Err(PreconditionError::NoInputsOrUrls);
    }
    if !urls.is_empty() && fetcher.is_none() {
        return Err(PreconditionError::NoFetcher);
    }
    info!(files = sources.len(), urls = urls.len(), %format, "converting");

    let jobs = sources
        .into_iter()
        .map(|source| Job::new(source.name.clone(), ConvertInput::Local(source)))
        .chain(
            urls.into_iter()
                .map(|url| Job::new(url.clone(), ConvertInput::Remote(url))),
        )
        .collect();

    let report = runner.run(
        jobs,
        |input: ConvertInput| {
            let source = match input {
                ConvertInput::Local(source) => {
                    if !is_convertible(&source.media_type) {
                        return Err(Failure::new(
                            FailureKind::Unsupported,
                            format!("'{}' is not a supported input type", source.media_type),
                        ));
                    }
                    source
                }
                ConvertInput::Remote(url) => match fetcher {
                    Some(fetcher) => fetcher.fetch(&url)?,
                    None => return Err(Failure::new(FailureKind::Fetch, "no fetcher")),
                },
            };
            let bytes = transformer.convert(&source, format)?;
            Ok((converted_name(&source.name, format), bytes))
        },
        on_progress,
    );

    let mut packager = ArchivePackager::new();
    let report = report.map(|(name, bytes)| {
        let size = bytes.len();
        packager.add(name.clone(), bytes);
        ConvertOutcome { name, size }
    });
    Ok((report, packager))
}

/// Copy each mapped source to its new name, inside its folder when set.
///
/// Rows whose `original_name` matches no source fail as `missing`.
pub fn remap<P>(
    sources: Vec<SourceItem>,
    rows: Vec<MappingRow>,
    target: &OutputTarget,
    runner: &BatchRunner,
    on_progress: P,
) -> Result<BatchReport<Saved>, PreconditionError>
where
    P: Fn(Progress<'_>) + Sync,
{
    if sources.is_empty() {
        return Err(PreconditionError::NoInputs);
    }
    if rows.is_empty() {
        return Err(PreconditionError::NoMapping);
    }
    validate_rows(&rows)?;
    if !matches!(target, OutputTarget::Directory(_)) {
        return Err(PreconditionError::NoOutputTarget);
    }

    let sources: Vec<Arc<SourceItem>> = sources.into_iter().map(Arc::new).collect();
    let resolution = resolve(&sources, &rows);
    info!(
        rows = resolution.len(),
        unmatched = resolution.unmatched().count(),
        "remapping"
    );

    // Rows sharing a target are ordered by their position in the mapping
    let writes = OrderedWrites::new();
    let jobs = resolution
        .entries
        .into_iter()
        .enumerate()
        .map(|(seq, entry)| Job::new(entry.row().original_name.clone(), (seq, entry)))
        .collect();

    Ok(runner.run(
        jobs,
        |(seq, entry): (usize, Resolved)| match entry {
            Resolved::Matched { source, row } => {
                let path = writes.write(target, seq, &source.bytes, &row.new_name, row.folder())?;
                let name = match row.folder() {
                    Some(folder) => format!("{folder}/{}", row.new_name),
                    None => row.new_name.clone(),
                };
                Ok(Saved { name, path })
            }
            Resolved::Missing(row) => Err(Failure::new(
                FailureKind::Missing,
                format!("no file named '{}' was provided", row.original_name),
            )),
        },
        on_progress,
    ))
}

/// Fetch each URL and save it under its URL file name.
pub fn download<P>(
    urls: Vec<String>,
    fetcher: &dyn Fetcher,
    target: &OutputTarget,
    runner: &BatchRunner,
    on_progress: P,
) -> Result<BatchReport<Saved>, PreconditionError>
where
    P: Fn(Progress<'_>) + Sync,
{
    let urls = clean_urls(urls);
    if urls.is_empty() {
        return Err(PreconditionError::NoUrls);
    }
    info!(urls = urls.len(), target = %target.path().display(), "downloading");

    let writes = OrderedWrites::new();
    let jobs = urls
        .into_iter()
        .enumerate()
        .map(|(seq, url)| Job::new(url.clone(), (seq, url)))
        .collect();

    Ok(runner.run(
        jobs,
        |(seq, url): (usize, String)| {
            let item = fetcher.fetch(&url)?;
            let path = writes.write(target, seq, &item.bytes, &item.name, None)?;
            Ok(Saved {
                name: item.name,
                path,
            })
        },
        on_progress,
    ))
}

fn clean_urls(urls: Vec<String>) -> Vec<String> {
    urls.into_iter()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect()
}

fn is_convertible(media_type: &str) -> bool {
    let essence = media_type.split(';').next().unwrap_or("").trim();
    CONVERTIBLE_MEDIA_TYPES
        .iter()
        .any(|accepted| accepted.eq_ignore_ascii_case(essence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchStatus;
    use crate::naming::{FALLBACK_NAME, url_file_name};
    use crate::sink::{DirectorySink, DownloadSink};
    use crate::units::Unit;
    use std::collections::HashMap;
    use std::fs;
    use std::io::Read;
    use std::sync::Mutex;

    /// Writes a textual description instead of pixels.
    struct FakeTransformer;

    impl Transformer for FakeTransformer {
        fn resize(&self, source: &SourceItem, size: PixelBox) -> Result<Vec<u8>, TransformError> {
            if source.bytes == b"corrupt" {
                return Err(TransformError::Decode("bad header".into()));
            }
            Ok(format!("{}x{}", size.width, size.height).into_bytes())
        }

        fn convert(
            &self,
            source: &SourceItem,
            format: OutputFormat,
        ) -> Result<Vec<u8>, TransformError> {
            if format == OutputFormat::Avif {
                return Err(TransformError::UnsupportedEncoding(format));
            }
            let mut out = format.extension().as_bytes().to_vec();
            out.extend_from_slice(&source.bytes);
            Ok(out)
        }
    }

    /// Echoes the source bytes, so outputs can be told apart.
    struct LabelTransformer;

    impl Transformer for LabelTransformer {
        fn resize(&self, source: &SourceItem, size: PixelBox) -> Result<Vec<u8>, TransformError> {
            let mut out = source.bytes.clone();
            out.extend_from_slice(format!(" {}x{}", size.width, size.height).as_bytes());
            Ok(out)
        }

        fn convert(
            &self,
            source: &SourceItem,
            _format: OutputFormat,
        ) -> Result<Vec<u8>, TransformError> {
            Ok(source.bytes.clone())
        }
    }

    struct FakeFetcher(HashMap<&'static str, &'static [u8]>);

    impl Fetcher for FakeFetcher {
        fn fetch(&self, url: &str) -> Result<SourceItem, FetchError> {
            let bytes = self.0.get(url).ok_or(FetchError::Status(404))?;
            let name = url_file_name(url).unwrap_or_else(|| FALLBACK_NAME.to_string());
            Ok(SourceItem::new(name, bytes.to_vec(), "image/png"))
        }
    }

    fn fetcher() -> FakeFetcher {
        FakeFetcher(HashMap::from([
            ("https://img.test/a/cat.png", b"cat".as_slice()),
            ("https://img.test/", b"root".as_slice()),
        ]))
    }

    fn directory(dir: &tempfile::TempDir) -> OutputTarget {
        OutputTarget::Directory(DirectorySink::new(dir.path()))
    }

    fn png(name: &str, bytes: &[u8]) -> SourceItem {
        SourceItem::from_bytes(name, bytes.to_vec())
    }

    #[test]
    fn test_rename_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let rows = crate::mapping::parse_mapping(b"original_name,new_name\nphoto.png,cover.png").unwrap();
        let progress = Mutex::new(Vec::new());

        let report = remap(
            vec![png("photo.png", b"PNGDATA")],
            rows,
            &directory(&dir),
            &BatchRunner::default(),
            |p| progress.lock().unwrap().push((p.processed, p.total)),
        )
        .unwrap();

        assert_eq!(report.status(), BatchStatus::AllSucceeded);
        assert_eq!(progress.into_inner().unwrap(), vec![(1, 1)]);
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(fs::read(dir.path().join("cover.png")).unwrap(), b"PNGDATA");
    }

    #[test]
    fn test_remap_folders_and_missing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            MappingRow::new("a.jpg", "x.jpg").in_folder("shoes"),
            MappingRow::new("c.jpg", "y.jpg"),
            MappingRow::new("a.jpg", "z.jpg"),
        ];

        let report = remap(
            vec![png("a.jpg", b"A"), png("b.jpg", b"B")],
            rows,
            &directory(&dir),
            &BatchRunner::new(2),
            |_| {},
        )
        .unwrap();

        assert_eq!(report.total(), 3);
        assert_eq!(report.status(), BatchStatus::CompletedWithErrors);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].item, "c.jpg");
        assert_eq!(failures[0].kind, FailureKind::Missing);

        assert_eq!(fs::read(dir.path().join("shoes/x.jpg")).unwrap(), b"A");
        assert_eq!(fs::read(dir.path().join("z.jpg")).unwrap(), b"A");
        let names: Vec<_> = report.successes().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["shoes/x.jpg", "z.jpg"]);
    }

    #[test]
    fn test_remap_shared_target_keeps_last_row() {
        for _ in 0..10 {
            let dir = tempfile::tempdir().unwrap();
            let sources: Vec<_> = (0..20)
                .map(|i| png(&format!("s{i}.png"), &vec![b'a' + i as u8; 500 + i * 97]))
                .collect();
            let rows: Vec<_> = (0..20)
                .map(|i| MappingRow::new(format!("s{i}.png"), "x.png"))
                .collect();

            let report = remap(sources, rows, &directory(&dir), &BatchRunner::new(20), |_| {})
                .unwrap();

            assert_eq!(report.status(), BatchStatus::AllSucceeded);
            assert_eq!(report.succeeded(), 20);
            assert_eq!(
                fs::read(dir.path().join("x.png")).unwrap(),
                vec![b'a' + 19; 500 + 19 * 97]
            );
            assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        }
    }

    #[test]
    fn test_move_same_name_in_folder_keeps_last_row() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            MappingRow::new("a.jpg", "cover.jpg").in_folder("set"),
            MappingRow::new("b.jpg", "cover.jpg").in_folder("other"),
            MappingRow::new("c.jpg", "cover.jpg").in_folder(" set "),
            MappingRow::new("b.jpg", "cover.jpg").in_folder("set"),
        ];
        let sources = vec![png("a.jpg", b"A"), png("b.jpg", b"BB"), png("c.jpg", b"CCC")];

        // Two chunks: the last writer of set/cover.jpg lands in the second one
        let report = remap(sources, rows, &directory(&dir), &BatchRunner::new(3), |_| {}).unwrap();

        assert_eq!(report.status(), BatchStatus::AllSucceeded);
        assert_eq!(fs::read(dir.path().join("set/cover.jpg")).unwrap(), b"BB");
        assert_eq!(fs::read(dir.path().join("other/cover.jpg")).unwrap(), b"BB");
        assert_eq!(fs::read_dir(dir.path().join("set")).unwrap().count(), 1);
    }

    #[test]
    fn test_resize_same_file_name_keeps_last_input() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![png("a.png", b"first"), png("a.png", b"second")];

        let report = resize(
            sources,
            Geometry::new(3.0, 2.0, Unit::Px),
            &LabelTransformer,
            &directory(&dir),
            &BatchRunner::new(2),
            |_| {},
        )
        .unwrap();

        assert_eq!(report.succeeded(), 2);
        assert_eq!(fs::read(dir.path().join("a.png")).unwrap(), b"second 3x2");
    }

    #[test]
    fn test_remap_preconditions() {
        let dir = tempfile::tempdir().unwrap();
        let runner = BatchRunner::new(1);
        let rows = || vec![MappingRow::new("a.jpg", "b.jpg")];

        assert!(matches!(
            remap(vec![], rows(), &directory(&dir), &runner, |_| {}),
            Err(PreconditionError::NoInputs)
        ));
        assert!(matches!(
            remap(vec![png("a.jpg", b"")], vec![], &directory(&dir), &runner, |_| {}),
            Err(PreconditionError::NoMapping)
        ));
        assert!(matches!(
            remap(
                vec![png("a.jpg", b"")],
                vec![MappingRow::new("a.jpg", " ")],
                &directory(&dir),
                &runner,
                |_| {}
            ),
            Err(PreconditionError::Mapping(MappingError::EmptyField { .. }))
        ));
        let downloads = OutputTarget::Download(DownloadSink::new(dir.path()));
        assert!(matches!(
            remap(vec![png("a.jpg", b"")], rows(), &downloads, &runner, |_| {}),
            Err(PreconditionError::NoOutputTarget)
        ));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_resize_writes_each_item_and_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![
            png("one.png", b"ok"),
            png("two.jpg", b"corrupt"),
            png("three.gif", b"ok"),
        ];

        let report = resize(
            sources,
            Geometry::new(200.0, 100.0, Unit::Px),
            &FakeTransformer,
            &directory(&dir),
            &BatchRunner::default(),
            |_| {},
        )
        .unwrap();

        assert_eq!(report.succeeded(), 2);
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.item, "two.jpg");
        assert_eq!(failure.kind, FailureKind::Decode);
        assert_eq!(fs::read(dir.path().join("one.png")).unwrap(), b"200x100");
        assert!(!dir.path().join("two.jpg").exists());
    }

    #[test]
    fn test_resize_preconditions() {
        let dir = tempfile::tempdir().unwrap();
        let runner = BatchRunner::new(1);
        assert!(matches!(
            resize(
                vec![],
                Geometry::new(1.0, 1.0, Unit::In),
                &FakeTransformer,
                &directory(&dir),
                &runner,
                |_| {}
            ),
            Err(PreconditionError::NoInputs)
        ));
        assert!(matches!(
            resize(
                vec![png("a.png", b"ok")],
                Geometry::new(0.0, 1.0, Unit::In),
                &FakeTransformer,
                &directory(&dir),
                &runner,
                |_| {}
            ),
            Err(PreconditionError::Target(TargetError::NonPositive { .. }))
        ));
    }

    #[test]
    fn test_convert_packages_files_then_urls() {
        let sources = vec![
            png("b.png", b"1"),
            png("notes.txt", b"text"),
            png("b.gif", b"2"),
        ];
        let urls = vec![
            "https://img.test/a/cat.png".to_string(),
            "   ".to_string(),
            "https://img.test/missing.png".to_string(),
        ];
        let fetcher = fetcher();

        let (report, packager) = convert(
            sources,
            urls,
            OutputFormat::Jpeg,
            &FakeTransformer,
            Some(&fetcher),
            &BatchRunner::new(3),
            |_| {},
        )
        .unwrap();

        assert_eq!(report.total(), 5);
        let failures: Vec<_> = report.failures().map(|f| (f.item.as_str(), f.kind)).collect();
        assert_eq!(
            failures,
            vec![
                ("notes.txt", FailureKind::Unsupported),
                ("https://img.test/missing.png", FailureKind::Fetch),
            ]
        );

        // b.png and b.gif share a converted name; the later one wins
        let names: Vec<_> = packager.names().collect();
        assert_eq!(names, vec!["b.jpeg", "cat.jpeg"]);

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(packager.finish().unwrap())).unwrap();
        let mut data = Vec::new();
        archive.by_name("b.jpeg").unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, b"jpeg2");
    }

    #[test]
    fn test_convert_unavailable_encoding_is_per_item() {
        let (report, packager) = convert(
            vec![png("a.png", b"1")],
            vec![],
            OutputFormat::Avif,
            &FakeTransformer,
            None,
            &BatchRunner::new(1),
            |_| {},
        )
        .unwrap();
        assert_eq!(report.failures().next().unwrap().kind, FailureKind::Encode);
        assert!(packager.is_empty());
    }

    #[test]
    fn test_convert_preconditions() {
        let runner = BatchRunner::new(1);
        assert!(matches!(
            convert(vec![], vec![" ".into()], OutputFormat::Png, &FakeTransformer, None, &runner, |_| {}),
            Err(PreconditionError::NoInputsOrUrls)
        ));
        assert!(matches!(
            convert(
                vec![],
                vec!["https://img.test/a/cat.png".into()],
                OutputFormat::Png,
                &FakeTransformer,
                None,
                &runner,
                |_| {}
            ),
            Err(PreconditionError::NoFetcher)
        ));
    }

    #[test]
    fn test_download_names_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        let target = OutputTarget::Download(DownloadSink::new(dir.path()));
        let urls = vec![
            "https://img.test/a/cat.png".to_string(),
            "https://img.test/".to_string(),
            "https://img.test/gone.png".to_string(),
        ];

        let report = download(urls, &fetcher(), &target, &BatchRunner::default(), |_| {}).unwrap();

        assert_eq!(report.succeeded(), 2);
        assert_eq!(fs::read(dir.path().join("cat.png")).unwrap(), b"cat");
        assert_eq!(fs::read(dir.path().join(FALLBACK_NAME)).unwrap(), b"root");
        assert_eq!(report.failures().next().unwrap().kind, FailureKind::Fetch);

        assert!(matches!(
            download(vec![], &fetcher(), &target, &BatchRunner::default(), |_| {}),
            Err(PreconditionError::NoUrls)
        ));
    }
}
