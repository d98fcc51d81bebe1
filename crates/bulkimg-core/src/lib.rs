//! Bulk Img Tools: batch image pipeline
//!
//! The core crate holds everything that does not need an image codec or a
//! network stack: the data model, CSV mapping resolution, unit conversion,
//! the chunked batch runner, output sinks, the ZIP packager and the tool
//! workflows that tie them together. Codecs and fetching plug in through the
//! [`Transformer`] and [`Fetcher`] traits.

mod archive;
mod batch;
mod export;
mod mapping;
mod naming;
mod sink;
mod source;
mod target;
mod tools;
mod units;

pub use archive::{ArchiveError, ArchivePackager, default_archive_name};
pub use batch::{
    BatchReport, BatchRunner, BatchStatus, BatchSummary, DEFAULT_BATCH_SIZE, Failure, FailureKind,
    ItemFailure, ItemOutcome, Job, Progress,
};
pub use export::FailureExport;
pub use mapping::{
    MappingError, MappingRow, Resolution, Resolved, parse_mapping, resolve, template,
    validate_rows,
};
pub use naming::{FALLBACK_NAME, converted_name, url_file_name};
pub use sink::{DirectorySink, DownloadSink, OrderedWrites, OutputSink, OutputTarget, SinkError};
pub use source::{SourceItem, media_type_for_name};
pub use target::{
    Geometry, MAX_CANVAS_PIXELS, MAX_CANVAS_SIDE, OutputFormat, PixelBox, TargetError,
};
pub use tools::{
    CONVERTIBLE_MEDIA_TYPES, ConvertOutcome, FetchError, Fetcher, PreconditionError, Saved,
    TransformError, Transformer, convert, download, remap, resize,
};
pub use units::{DPI, Unit, to_pixels};
