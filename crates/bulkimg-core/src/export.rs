//! Export of failed item lists.

use crate::batch::ItemFailure;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Layout of an exported failure list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureExport {
    /// One failed item identifier per line.
    Text,
    /// `item,reason` header then one row per failure.
    Csv,
}

impl FailureExport {
    /// `.csv` selects CSV, anything else plain text.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => FailureExport::Csv,
            _ => FailureExport::Text,
        }
    }

    /// Render the list into a string.
    pub fn render<'a>(
        self,
        failures: impl IntoIterator<Item = &'a ItemFailure>,
    ) -> Result<String, csv::Error> {
        let mut buf = Vec::new();
        self.write(&mut buf, failures)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Write the list to `out`.
    pub fn write<'a, W: Write>(
        self,
        mut out: W,
        failures: impl IntoIterator<Item = &'a ItemFailure>,
    ) -> Result<(), csv::Error> {
        match self {
            FailureExport::Text => {
                for failure in failures {
                    writeln!(out, "{}", failure.item)?;
                }
                out.flush()?;
            }
            FailureExport::Csv => {
                let mut wtr = csv::Writer::from_writer(out);
                wtr.write_record(["item", "reason"])?;
                for failure in failures {
                    wtr.write_record([failure.item.as_str(), failure.reason().as_str()])?;
                }
                wtr.flush()?;
            }
        }
        Ok(())
    }

    pub fn write_to<'a>(
        self,
        path: &Path,
        failures: impl IntoIterator<Item = &'a ItemFailure>,
    ) -> Result<(), csv::Error> {
        let file = File::create(path)?;
        self.write(BufWriter::new(file), failures)
    }
}
