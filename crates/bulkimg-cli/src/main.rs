//! bulkimg: bulk image resize, convert, rename, move and download

mod config;
mod errors;

use anyhow::{Context, Result, anyhow, bail};
use bulkimg_core::{
    BatchReport, BatchRunner, BatchStatus, DEFAULT_BATCH_SIZE, DirectorySink, DownloadSink,
    FailureExport, Fetcher, Geometry, OutputFormat, OutputTarget, PreconditionError, Progress,
    SourceItem, Unit, default_archive_name, media_type_for_name, parse_mapping, template,
    validate_rows,
};
use bulkimg_fetch::{DEFAULT_TIMEOUT, HttpFetcher};
use bulkimg_image::{ImageTransformer, supported_encodings};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use config::Config;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, warn};

/// Usage errors and batch-fatal precondition failures.
const EXIT_FAILURE: u8 = 1;
/// The batch ran but at least one item failed.
const EXIT_ITEM_ERRORS: u8 = 2;

fn parse_unit(s: &str) -> Result<Unit, String> {
    s.parse()
}

/// Collect files from patterns, directories, and globs.
///
/// Explicit files are kept in argument order. Directory entries are sorted
/// and filtered to image files; `recursive` walks sub-directories too.
fn collect_files(patterns: Vec<String>, recursive: bool) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for pattern in patterns {
        let path = PathBuf::from(&pattern);

        if path.is_dir() {
            let mut found: Vec<PathBuf> = if recursive {
                walkdir::WalkDir::new(&path)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .map(|e| e.into_path())
                    .collect()
            } else {
                std::fs::read_dir(&path)
                    .map(|entries| {
                        entries
                            .flatten()
                            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                            .map(|e| e.path())
                            .collect()
                    })
                    .unwrap_or_default()
            };
            found.retain(|p| is_image_file(p));
            found.sort();
            if found.is_empty() {
                warn!(directory = %path.display(), "directory contains no image files");
            }
            files.extend(found);
        } else if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            files.extend(expand_glob_pattern(&pattern));
        } else {
            files.push(path);
        }
    }

    files
}

fn is_image_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| media_type_for_name(n).starts_with("image/"))
        .unwrap_or(false)
}

/// Expand a single glob pattern.
fn expand_glob_pattern(pattern: &str) -> Vec<PathBuf> {
    match glob::glob(pattern) {
        Ok(paths) => {
            let files: Vec<PathBuf> = paths.flatten().filter(|p| p.is_file()).collect();
            if files.is_empty() {
                warn!(pattern, "pattern matched no files");
            }
            files
        }
        Err(e) => {
            warn!(pattern, error = %e, "invalid glob pattern");
            Vec::new()
        }
    }
}

/// Output verbosity level.
#[derive(Clone, Copy)]
enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    /// Default log filter when `RUST_LOG` is not set.
    fn log_filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "debug",
        }
    }

    fn info(self, msg: &str) {
        if !matches!(self, Verbosity::Quiet) {
            println!("{msg}");
        }
    }

    fn result(self, msg: &str) {
        if !matches!(self, Verbosity::Quiet) {
            println!("{msg}");
        }
    }
}

/// How a command ended, short of a hard error.
enum Outcome {
    Success,
    ItemErrors,
}

impl From<BatchStatus> for Outcome {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::AllSucceeded => Outcome::Success,
            BatchStatus::CompletedWithErrors => Outcome::ItemErrors,
        }
    }
}

#[derive(Parser)]
#[command(name = "bulkimg", version)]
#[command(about = "Bulk image resize, convert, rename, move and download", long_about = None)]
struct Cli {
    /// Verbose output (show debug info)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to config file (default: ~/.config/bulkimg/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Items processed concurrently per chunk [default: 20]
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: Option<u64>,

    /// Save failed items to this file (.csv for item,reason rows, else one per line)
    #[arg(long, global = true)]
    failures: Option<PathBuf>,

    /// Save a JSON summary of the batch to this file
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resize images onto an exact canvas, keeping their aspect ratio
    Resize {
        /// Input files, directories or glob patterns
        #[arg(required = true)]
        inputs: Vec<String>,
        /// Recursively process directories
        #[arg(short = 'r', long)]
        recursive: bool,
        /// Target width, in --unit
        #[arg(long, required_unless_present = "preset", requires = "height")]
        width: Option<f64>,
        /// Target height, in --unit
        #[arg(long, required_unless_present = "preset", requires = "width")]
        height: Option<f64>,
        /// Unit for width and height: px, in, cm, mm, pt, pica
        #[arg(long, value_parser = parse_unit)]
        unit: Option<Unit>,
        /// Apply a named size (thumbnail, instagram, hd, passport, a4, letter)
        #[arg(long, conflicts_with_all = ["width", "height", "unit"])]
        preset: Option<String>,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Convert images to another format and package them into one ZIP
    Convert {
        /// Input files, directories or glob patterns
        inputs: Vec<String>,
        /// Recursively process directories
        #[arg(short = 'r', long)]
        recursive: bool,
        /// Target format: jpeg, png, gif, webp, avif
        #[arg(long)]
        to: Option<String>,
        #[command(flatten)]
        urls: UrlArgs,
        /// Archive file (default: converted_images_<ext>.zip in the output directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Directory that receives the archive
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Copy files to new names listed in a mapping CSV
    Rename(MapArgs),

    /// Copy files to new names inside the folders listed in a mapping CSV
    Move(MapArgs),

    /// Download images from URLs
    Download {
        #[command(flatten)]
        urls: UrlArgs,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Print the mapping CSV template
    Template {
        /// Include the folder_name column used by `move`
        #[arg(long)]
        folder: bool,
        /// Write the template to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List available presets
    Presets,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Generate man page
    Manpage,
}

#[derive(Args)]
struct OutputArgs {
    /// Output directory (created if missing). Without it, files go to the download directory.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args)]
struct UrlArgs {
    /// Image URL (repeatable)
    #[arg(long = "url")]
    urls: Vec<String>,
    /// File with one URL per line
    #[arg(long)]
    urls_file: Option<PathBuf>,
    /// Fetch proxy endpoint; requests go to <proxy>?url=<encoded url>
    #[arg(long)]
    proxy: Option<String>,
    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Args)]
struct MapArgs {
    /// Input files, directories or glob patterns
    #[arg(required = true)]
    inputs: Vec<String>,
    /// Recursively process directories
    #[arg(short = 'r', long)]
    recursive: bool,
    /// Mapping CSV with original_name,new_name[,folder_name] columns
    #[arg(short, long)]
    mapping: PathBuf,
    /// Output directory (created if missing)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_FAILURE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    // Load config file; problems are reported once logging is up
    let (config, config_error) = match Config::load(cli.config.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    // Apply config defaults, CLI flags override
    let verbose = cli.verbose || config.defaults.verbose;
    let quiet = cli.quiet || config.defaults.quiet;
    let verbosity = Verbosity::from_flags(verbose, quiet);
    init_logging(verbosity);

    if let Some(e) = config_error {
        warn!("{e:#}; using defaults");
    }

    match run(cli, &config, verbosity) {
        Ok(Outcome::Success) => ExitCode::SUCCESS,
        Ok(Outcome::ItemErrors) => ExitCode::from(EXIT_ITEM_ERRORS),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn init_logging(v: Verbosity) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(v.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli, config: &Config, v: Verbosity) -> Result<Outcome> {
    let batch_size = cli
        .batch_size
        .map(|n| n as usize)
        .or(config.defaults.batch_size)
        .unwrap_or(DEFAULT_BATCH_SIZE);

    let session = Session {
        config,
        runner: BatchRunner::new(batch_size),
        v,
        failures: cli.failures,
        report: cli.report,
    };

    match cli.command {
        Commands::Resize {
            inputs,
            recursive,
            width,
            height,
            unit,
            preset,
            output,
        } => {
            let geometry = match preset {
                Some(name) => config
                    .get_preset(&name)
                    .with_context(|| {
                        errors::unknown_preset_error(&name, &config::preset_names(config))
                    })?
                    .geometry(),
                None => {
                    let (Some(width), Some(height)) = (width, height) else {
                        bail!("Resize needs --width and --height, or --preset");
                    };
                    let unit = unit.or(config.defaults.unit).unwrap_or_default();
                    Geometry::new(width, height, unit)
                }
            };
            cmd_resize(&session, inputs, recursive, geometry, output.output_dir)
        }
        Commands::Convert {
            inputs,
            recursive,
            to,
            urls,
            output,
            output_dir,
        } => {
            let format = resolve_format(to, config)?;
            cmd_convert(&session, inputs, recursive, format, &urls, output, output_dir)
        }
        Commands::Rename(args) => cmd_remap(&session, args, false),
        Commands::Move(args) => cmd_remap(&session, args, true),
        Commands::Download { urls, output } => cmd_download(&session, &urls, output.output_dir),
        Commands::Template { folder, output } => cmd_template(folder, output.as_deref(), v),
        Commands::Presets => cmd_presets(config, v),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "bulkimg", &mut std::io::stdout());
            Ok(Outcome::Success)
        }
        Commands::Manpage => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            man.render(&mut std::io::stdout())?;
            Ok(Outcome::Success)
        }
    }
}

/// Settings shared by every batch command.
struct Session<'a> {
    config: &'a Config,
    runner: BatchRunner,
    v: Verbosity,
    failures: Option<PathBuf>,
    report: Option<PathBuf>,
}

impl Session<'_> {
    /// Read every input file up front.
    fn load_sources(&self, patterns: Vec<String>, recursive: bool) -> Result<Vec<SourceItem>> {
        collect_files(patterns, recursive)
            .iter()
            .map(|path| {
                SourceItem::from_path(path).map_err(|e| anyhow!(errors::file_read_error(path, &e)))
            })
            .collect()
    }

    /// The chosen output directory, if any.
    fn directory_target(&self, output_dir: Option<PathBuf>) -> Result<Option<OutputTarget>> {
        let Some(dir) = output_dir.or_else(|| self.config.defaults.output_dir.clone()) else {
            return Ok(None);
        };
        let sink = DirectorySink::create(&dir)
            .with_context(|| format!("Cannot use output directory {}", dir.display()))?;
        Ok(Some(OutputTarget::Directory(sink)))
    }

    /// The chosen output directory, else the download directory.
    fn output_target(&self, output_dir: Option<PathBuf>) -> Result<OutputTarget> {
        if let Some(target) = self.directory_target(output_dir)? {
            return Ok(target);
        }
        let sink = match &self.config.defaults.download_dir {
            Some(dir) => DownloadSink::new(dir),
            None => DownloadSink::user_downloads()
                .context("No download directory found. Use --output-dir to choose one.")?,
        };
        Ok(OutputTarget::Download(sink))
    }

    fn fetcher(&self, args: &UrlArgs) -> Result<HttpFetcher> {
        let timeout = args
            .timeout
            .or(self.config.defaults.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        let mut fetcher = HttpFetcher::new(timeout)?;

        let proxy = args
            .proxy
            .as_deref()
            .or(self.config.defaults.proxy_url.as_deref());
        if let Some(proxy) = proxy {
            fetcher = fetcher
                .with_proxy(proxy)
                .with_context(|| format!("Invalid proxy URL '{}'", proxy))?;
        }
        Ok(fetcher)
    }

    fn progress_bar(&self) -> ProgressBar {
        if matches!(self.v, Verbosity::Quiet) {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=> "));
        }
        pb
    }

    /// Print the final status and write the requested exports.
    fn finish<T>(&self, pb: ProgressBar, report: &BatchReport<T>) -> Result<Outcome> {
        pb.finish_and_clear();

        match report.status() {
            BatchStatus::AllSucceeded => {
                self.v
                    .result(&format!("All {} item(s) succeeded.", report.total()));
            }
            BatchStatus::CompletedWithErrors => {
                self.v.result(&format!(
                    "Completed with errors: {} succeeded, {} failed.",
                    report.succeeded(),
                    report.failed()
                ));
                for failure in report.failures() {
                    eprintln!("  {}: {}", failure.item, failure.reason());
                }
            }
        }

        if let Some(path) = &self.failures {
            FailureExport::from_path(path)
                .write_to(path, report.failures())
                .with_context(|| format!("Failed to write failure list {}", path.display()))?;
            debug!(path = %path.display(), "failure list saved");
        }

        if let Some(path) = &self.report {
            let json = serde_json::to_string_pretty(&report.summary())?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write report {}", path.display()))?;
            debug!(path = %path.display(), "report saved");
        }

        Ok(report.status().into())
    }
}

/// Progress callback that drives the bar.
fn track(pb: &ProgressBar) -> impl Fn(Progress<'_>) + Sync + '_ {
    move |p| {
        pb.set_length(p.total as u64);
        pb.set_position(p.processed as u64);
        pb.set_message(p.item.to_string());
    }
}

fn resolve_format(to: Option<String>, config: &Config) -> Result<OutputFormat> {
    let format = match to {
        Some(to) => to
            .parse::<OutputFormat>()
            .map_err(|_| anyhow!(errors::unknown_format_error(&to, &OutputFormat::ALL)))?,
        None => config
            .defaults
            .format
            .context("No output format given. Use --to <jpeg|png|gif|webp|avif>.")?,
    };

    if !supported_encodings().contains(&format) {
        bail!(errors::unavailable_format_error(format));
    }
    Ok(format)
}

/// URLs from `--url` flags and `--urls-file`, trimmed, blanks skipped.
fn read_urls(args: &UrlArgs) -> Result<Vec<String>> {
    let mut urls: Vec<String> = args
        .urls
        .iter()
        .map(|url| url.trim())
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect();
    if let Some(path) = &args.urls_file {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow!(errors::file_read_error(path, &e)))?;
        urls.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
    }
    Ok(urls)
}

fn cmd_resize(
    s: &Session,
    inputs: Vec<String>,
    recursive: bool,
    geometry: Geometry,
    output_dir: Option<PathBuf>,
) -> Result<Outcome> {
    let sources = s.load_sources(inputs, recursive)?;
    if sources.is_empty() {
        return Err(PreconditionError::NoInputs.into());
    }
    geometry.resolve()?;
    let target = s.output_target(output_dir)?;
    debug!(%geometry, target = %target.path().display(), "resize");

    let pb = s.progress_bar();
    let report = bulkimg_core::resize(
        sources,
        geometry,
        &ImageTransformer,
        &target,
        &s.runner,
        track(&pb),
    )?;

    for saved in report.successes() {
        debug!(name = %saved.name, path = %saved.path.display(), "saved");
    }
    s.finish(pb, &report)
}

/// Where the convert archive ends up.
enum ArchiveDestination {
    File(PathBuf),
    Target(OutputTarget),
}

fn cmd_convert(
    s: &Session,
    inputs: Vec<String>,
    recursive: bool,
    format: OutputFormat,
    url_args: &UrlArgs,
    output: Option<PathBuf>,
    output_dir: Option<PathBuf>,
) -> Result<Outcome> {
    let sources = if inputs.is_empty() {
        Vec::new()
    } else {
        s.load_sources(inputs, recursive)?
    };
    let urls = read_urls(url_args)?;
    if sources.is_empty() && urls.is_empty() {
        return Err(PreconditionError::NoInputsOrUrls.into());
    }
    let fetcher = if urls.is_empty() {
        None
    } else {
        Some(s.fetcher(url_args)?)
    };
    let destination = match output {
        Some(path) => ArchiveDestination::File(path),
        None => ArchiveDestination::Target(s.output_target(output_dir)?),
    };

    let pb = s.progress_bar();
    let (report, packager) = bulkimg_core::convert(
        sources,
        urls,
        format,
        &ImageTransformer,
        fetcher.as_ref().map(|f| f as &dyn Fetcher),
        &s.runner,
        track(&pb),
    )?;
    let outcome = s.finish(pb, &report)?;

    if packager.is_empty() {
        warn!("nothing was converted; no archive written");
        return Ok(outcome);
    }

    let path = match destination {
        ArchiveDestination::File(path) => {
            packager.write_to(&path)?;
            path
        }
        ArchiveDestination::Target(target) => {
            let bytes = packager.finish()?;
            target
                .sink()
                .write(&bytes, &default_archive_name(format), None)?
        }
    };
    s.v.result(&format!(
        "Archive: {} ({} image(s))",
        path.display(),
        packager.len()
    ));
    Ok(outcome)
}

fn cmd_remap(s: &Session, args: MapArgs, keep_folders: bool) -> Result<Outcome> {
    let data = std::fs::read(&args.mapping)
        .map_err(|e| anyhow!(errors::file_read_error(&args.mapping, &e)))?;
    let mut rows = parse_mapping(&data)
        .with_context(|| format!("Invalid mapping file {}", args.mapping.display()))?;
    if !keep_folders {
        for row in &mut rows {
            row.folder_name = None;
        }
    }

    let sources = s.load_sources(args.inputs, args.recursive)?;
    if sources.is_empty() {
        return Err(PreconditionError::NoInputs.into());
    }
    if rows.is_empty() {
        return Err(PreconditionError::NoMapping.into());
    }
    validate_rows(&rows)?;
    let Some(target) = s.directory_target(args.output_dir)? else {
        return Err(PreconditionError::NoOutputTarget)
            .context("Use --output-dir, or set output_dir in the config file");
    };

    let pb = s.progress_bar();
    let report = bulkimg_core::remap(sources, rows, &target, &s.runner, track(&pb))?;

    for saved in report.successes() {
        debug!(name = %saved.name, path = %saved.path.display(), "copied");
    }
    s.finish(pb, &report)
}

fn cmd_download(s: &Session, url_args: &UrlArgs, output_dir: Option<PathBuf>) -> Result<Outcome> {
    let urls = read_urls(url_args)?;
    if urls.is_empty() {
        return Err(PreconditionError::NoUrls.into());
    }
    let fetcher = s.fetcher(url_args)?;
    let target = s.output_target(output_dir)?;

    let pb = s.progress_bar();
    let report = bulkimg_core::download(urls, &fetcher, &target, &s.runner, track(&pb))?;

    for saved in report.successes() {
        debug!(name = %saved.name, path = %saved.path.display(), "downloaded");
    }
    s.finish(pb, &report)
}

fn cmd_template(with_folder: bool, output: Option<&Path>, v: Verbosity) -> Result<Outcome> {
    let header = template(with_folder);
    match output {
        Some(path) => {
            std::fs::write(path, header)
                .with_context(|| format!("Failed to write template {}", path.display()))?;
            v.info(&format!("Template written to {}", path.display()));
        }
        None => print!("{header}"),
    }
    Ok(Outcome::Success)
}

/// List available presets.
fn cmd_presets(config: &Config, v: Verbosity) -> Result<Outcome> {
    v.info("Built-in presets:\n");

    for (name, _, desc) in config::BUILTIN_PRESETS {
        v.info(&format!("  {:<12} {}", name, desc));
    }

    if !config.presets.is_empty() {
        v.info("\nUser-defined presets:\n");
        for (name, preset) in &config.presets {
            v.info(&format!("  {:<12} {}", name, preset.geometry()));
        }
    }

    if let Some(path) = Config::default_path() {
        v.info(&format!("\nConfig file: {}", path.display()));
    }

    Ok(Outcome::Success)
}
