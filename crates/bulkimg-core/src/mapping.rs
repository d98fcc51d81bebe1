//! CSV rename/move mappings and their resolution against uploaded files.

use crate::source::SourceItem;
use std::collections::HashMap;
use std::sync::Arc;

/// Errors reading or validating a mapping file.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("failed to read mapping CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("mapping CSV header is missing the '{0}' column")]
    MissingColumn(&'static str),

    #[error("mapping row {row}: '{field}' must not be empty")]
    EmptyField { row: usize, field: &'static str },
}

/// One rename/move instruction.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MappingRow {
    pub original_name: String,
    pub new_name: String,
    /// Target sub-folder; `None` writes to the output root.
    #[serde(default)]
    pub folder_name: Option<String>,
}

impl MappingRow {
    pub fn new(original_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self {
            original_name: original_name.into(),
            new_name: new_name.into(),
            folder_name: None,
        }
    }

    pub fn in_folder(mut self, folder: impl Into<String>) -> Self {
        let folder = folder.into();
        self.folder_name = if folder.trim().is_empty() {
            None
        } else {
            Some(folder)
        };
        self
    }

    /// Folder name if set and not blank.
    pub fn folder(&self) -> Option<&str> {
        self.folder_name
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }
}

/// Parse a mapping CSV.
///
/// The header row must name `original_name` and `new_name`; `folder_name` is
/// optional. Fields are split on plain commas: quoting is not interpreted, so
/// file names containing commas cannot be expressed.
pub fn parse_mapping(data: &[u8]) -> Result<Vec<MappingRow>, MappingError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .quoting(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}').eq_ignore_ascii_case(name))
    };

    let original_idx = column("original_name").ok_or(MappingError::MissingColumn("original_name"))?;
    let new_idx = column("new_name").ok_or(MappingError::MissingColumn("new_name"))?;
    let folder_idx = column("folder_name");

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }

        let field = |idx: usize| record.get(idx).unwrap_or("").to_string();
        let mut row = MappingRow::new(field(original_idx), field(new_idx));
        if let Some(idx) = folder_idx {
            row = row.in_folder(field(idx));
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Reject the whole mapping if any row lacks a required name.
pub fn validate_rows(rows: &[MappingRow]) -> Result<(), MappingError> {
    for (idx, row) in rows.iter().enumerate() {
        if row.original_name.trim().is_empty() {
            return Err(MappingError::EmptyField {
                row: idx + 1,
                field: "original_name",
            });
        }
        if row.new_name.trim().is_empty() {
            return Err(MappingError::EmptyField {
                row: idx + 1,
                field: "new_name",
            });
        }
    }
    Ok(())
}

/// Header line of the downloadable mapping template.
pub fn template(with_folder: bool) -> &'static str {
    if with_folder {
        "original_name,new_name,folder_name\n"
    } else {
        "original_name,new_name\n"
    }
}

/// Outcome of matching one mapping row.
#[derive(Debug, Clone)]
pub enum Resolved {
    Matched {
        source: Arc<SourceItem>,
        row: MappingRow,
    },
    Missing(MappingRow),
}

impl Resolved {
    pub fn row(&self) -> &MappingRow {
        match self {
            Resolved::Matched { row, .. } | Resolved::Missing(row) => row,
        }
    }
}

/// Rows resolved against the uploaded files, in mapping order.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub entries: Vec<Resolved>,
}

impl Resolution {
    /// Matched `(source, row)` pairs in row order.
    pub fn pairs(&self) -> impl Iterator<Item = (&SourceItem, &MappingRow)> {
        self.entries.iter().filter_map(|entry| match entry {
            Resolved::Matched { source, row } => Some((source.as_ref(), row)),
            Resolved::Missing(_) => None,
        })
    }

    /// Rows whose `original_name` matched no file.
    pub fn unmatched(&self) -> impl Iterator<Item = &MappingRow> {
        self.entries.iter().filter_map(|entry| match entry {
            Resolved::Missing(row) => Some(row),
            Resolved::Matched { .. } => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Match mapping rows to sources by exact, case-sensitive display name.
///
/// When several sources share a name the last one wins. Several rows may
/// reference the same source; each is resolved independently.
pub fn resolve(sources: &[Arc<SourceItem>], rows: &[MappingRow]) -> Resolution {
    let by_name: HashMap<&str, &Arc<SourceItem>> = sources
        .iter()
        .map(|source| (source.name.as_str(), source))
        .collect();

    let entries = rows
        .iter()
        .map(|row| match by_name.get(row.original_name.as_str()) {
            Some(source) => Resolved::Matched {
                source: Arc::clone(source),
                row: row.clone(),
            },
            None => Resolved::Missing(row.clone()),
        })
        .collect();

    Resolution { entries }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, bytes: &[u8]) -> Arc<SourceItem> {
        Arc::new(SourceItem::from_bytes(name, bytes.to_vec()))
    }

    #[test]
    fn test_parse_two_columns() {
        let rows = parse_mapping(b"original_name,new_name\nphoto.png,cover.png\n").unwrap();
        assert_eq!(rows, vec![MappingRow::new("photo.png", "cover.png")]);
    }

    #[test]
    fn test_parse_folder_column_and_blank_lines() {
        let csv = b"original_name,new_name,folder_name\r\na.jpg,x.jpg,shoes\r\n\r\nb.jpg,y.jpg,\r\n";
        let rows = parse_mapping(csv).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].folder(), Some("shoes"));
        assert_eq!(rows[1].folder(), None);
    }

    #[test]
    fn test_parse_columns_by_header_name() {
        let rows = parse_mapping(b"new_name,original_name\nx.jpg,a.jpg\n").unwrap();
        assert_eq!(rows[0].original_name, "a.jpg");
        assert_eq!(rows[0].new_name, "x.jpg");
    }

    #[test]
    fn test_parse_does_not_interpret_quotes() {
        let rows = parse_mapping(b"original_name,new_name\n\"a.jpg\",b.jpg\n").unwrap();
        assert_eq!(rows[0].original_name, "\"a.jpg\"");
    }

    #[test]
    fn test_parse_missing_column() {
        let err = parse_mapping(b"name,new_name\na.jpg,b.jpg\n").unwrap_err();
        assert!(matches!(err, MappingError::MissingColumn("original_name")));
    }

    #[test]
    fn test_short_row_fails_validation() {
        let rows = parse_mapping(b"original_name,new_name\na.jpg,b.jpg\nc.jpg\n").unwrap();
        let err = validate_rows(&rows).unwrap_err();
        assert!(matches!(
            err,
            MappingError::EmptyField {
                row: 2,
                field: "new_name"
            }
        ));
    }

    #[test]
    fn test_validate_empty_original() {
        let rows = vec![MappingRow::new("", "b.jpg")];
        assert!(matches!(
            validate_rows(&rows),
            Err(MappingError::EmptyField {
                row: 1,
                field: "original_name"
            })
        ));
    }

    #[test]
    fn test_resolve_matched_and_missing() {
        let sources = vec![item("a.jpg", b"a"), item("b.jpg", b"b")];
        let rows = vec![
            MappingRow::new("a.jpg", "x.jpg"),
            MappingRow::new("c.jpg", "y.jpg"),
        ];

        let resolution = resolve(&sources, &rows);

        let pairs: Vec<_> = resolution.pairs().collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.name, "a.jpg");
        assert_eq!(pairs[0].1.new_name, "x.jpg");

        let unmatched: Vec<_> = resolution.unmatched().collect();
        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0].original_name, "c.jpg");
    }

    #[test]
    fn test_resolve_is_case_sensitive() {
        let sources = vec![item("A.jpg", b"a")];
        let rows = vec![MappingRow::new("a.jpg", "x.jpg")];
        assert_eq!(resolve(&sources, &rows).unmatched().count(), 1);
    }

    #[test]
    fn test_resolve_last_duplicate_source_wins() {
        let sources = vec![item("a.jpg", b"first"), item("a.jpg", b"second")];
        let rows = vec![MappingRow::new("a.jpg", "x.jpg")];
        let resolution = resolve(&sources, &rows);
        let (source, _) = resolution.pairs().next().unwrap();
        assert_eq!(source.bytes, b"second");
    }

    #[test]
    fn test_resolve_fan_out() {
        let sources = vec![item("a.jpg", b"a")];
        let rows = vec![
            MappingRow::new("a.jpg", "x.jpg"),
            MappingRow::new("a.jpg", "y.jpg").in_folder("sub"),
        ];
        let resolution = resolve(&sources, &rows);
        assert_eq!(resolution.pairs().count(), 2);
        assert_eq!(resolution.unmatched().count(), 0);
    }
}
