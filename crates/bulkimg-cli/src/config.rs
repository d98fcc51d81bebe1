//! Configuration file and presets support.

use anyhow::{Context, Result};
use bulkimg_core::{Geometry, OutputFormat, Unit};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default CLI options.
    pub defaults: Defaults,
    /// User-defined presets.
    pub presets: BTreeMap<String, Preset>,
}

/// Default CLI options.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Enable verbose output by default.
    pub verbose: bool,
    /// Enable quiet output by default.
    pub quiet: bool,
    /// Items processed concurrently per chunk.
    pub batch_size: Option<usize>,
    /// Output directory used when `--output-dir` is not given.
    pub output_dir: Option<PathBuf>,
    /// Where outputs go when no output directory is chosen.
    pub download_dir: Option<PathBuf>,
    /// Unit for `--width`/`--height` when `--unit` is not given.
    pub unit: Option<Unit>,
    /// Encoding for `convert` when `--to` is not given.
    pub format: Option<OutputFormat>,
    /// Fetch proxy endpoint for URL inputs.
    pub proxy_url: Option<String>,
    /// Per-request timeout for URL inputs.
    pub timeout_secs: Option<u64>,
}

/// A named resize geometry.
///
/// ```toml
/// [presets.banner]
/// width = 1500
/// height = 500
/// unit = "px"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Preset {
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub unit: Unit,
}

impl Preset {
    const fn new(width: f64, height: f64, unit: Unit) -> Self {
        Self {
            width,
            height,
            unit,
        }
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.width, self.height, self.unit)
    }
}

impl Config {
    /// Load config from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults. An unreadable or invalid file is an
    /// error; callers log it and fall back to the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Get the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("bulkimg").join("config.toml"))
    }

    /// Get a preset by name (user-defined first, then built-in).
    pub fn get_preset(&self, name: &str) -> Option<Preset> {
        if let Some(preset) = self.presets.get(name) {
            return Some(*preset);
        }
        builtin_preset(name)
    }
}

/// Built-in presets with descriptions.
pub const BUILTIN_PRESETS: [(&str, Preset, &str); 6] = [
    ("thumbnail", Preset::new(200.0, 200.0, Unit::Px), "200 x 200 px"),
    ("instagram", Preset::new(1080.0, 1080.0, Unit::Px), "1080 x 1080 px, square post"),
    ("hd", Preset::new(1920.0, 1080.0, Unit::Px), "1920 x 1080 px"),
    ("passport", Preset::new(2.0, 2.0, Unit::In), "2 x 2 in passport photo"),
    ("a4", Preset::new(210.0, 297.0, Unit::Mm), "210 x 297 mm"),
    ("letter", Preset::new(8.5, 11.0, Unit::In), "8.5 x 11 in US letter"),
];

fn builtin_preset(name: &str) -> Option<Preset> {
    let name = match name {
        "thumb" => "thumbnail",
        "1080p" => "hd",
        other => other,
    };
    BUILTIN_PRESETS
        .iter()
        .find(|(builtin, _, _)| *builtin == name)
        .map(|(_, preset, _)| *preset)
}

/// Names of every preset, built-in first.
pub fn preset_names(config: &Config) -> Vec<&str> {
    BUILTIN_PRESETS
        .iter()
        .map(|(name, _, _)| *name)
        .chain(config.presets.keys().map(String::as_str))
        .collect()
}
