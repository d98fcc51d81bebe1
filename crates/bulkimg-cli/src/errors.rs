//! Error messages with actionable suggestions.

use bulkimg_core::OutputFormat;
use std::path::Path;

/// Build an error message for an unknown `--to` value.
pub fn unknown_format_error(input: &str, available: &[OutputFormat]) -> String {
    let names: Vec<&str> = available.iter().map(|f| f.extension()).collect();
    let mut msg = format!("Unknown output format '{}'", input);

    if let Some(suggestion) = find_similar(input, &names) {
        msg.push_str(&format!(".\n\nDid you mean '{}'?", suggestion));
        return msg;
    }

    msg.push_str(&format!(".\n\nAvailable formats: {}", names.join(", ")));
    msg
}

/// Build an error message for a format that is known but not compiled in.
pub fn unavailable_format_error(format: OutputFormat) -> String {
    format!(
        "Output format '{}' is not available in this build.\n\nRebuild with: cargo build --features {}",
        format, format
    )
}

/// Build an error message for an unknown preset.
pub fn unknown_preset_error(input: &str, names: &[&str]) -> String {
    let mut msg = format!("Unknown preset '{}'", input);

    if let Some(suggestion) = find_similar(input, names) {
        msg.push_str(&format!(".\n\nDid you mean '{}'?", suggestion));
    } else {
        msg.push_str(&format!(".\n\nAvailable presets: {}", names.join(", ")));
    }
    msg.push_str("\nRun `bulkimg presets` for details.");
    msg
}

/// Build an error message for file read errors.
pub fn file_read_error(path: &Path, err: &std::io::Error) -> String {
    use std::io::ErrorKind;

    let mut msg = format!("Failed to read '{}'", path.display());

    match err.kind() {
        ErrorKind::NotFound => {
            msg.push_str(": file not found");

            if let Some(suggestions) = find_similar_files(path) {
                if !suggestions.is_empty() {
                    msg.push_str(&format!(".\n\nDid you mean: {}?", suggestions.join(", ")));
                }
            }
        }
        ErrorKind::PermissionDenied => {
            msg.push_str(": permission denied. Check file permissions.");
        }
        _ => {
            msg.push_str(&format!(": {}", err));
        }
    }

    msg
}

/// Closest candidate within edit distance 2.
fn find_similar<'a>(input: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let input = input.trim().trim_start_matches('.').to_lowercase();
    candidates
        .iter()
        .map(|candidate| (levenshtein(&input, candidate), *candidate))
        .filter(|(distance, candidate)| *distance <= 2 && input != *candidate)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate)
}

/// Simple Levenshtein distance for short strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Files in the same directory whose names are close to the missing one.
fn find_similar_files(path: &Path) -> Option<Vec<String>> {
    let file_name = path.file_name()?.to_str()?.to_lowercase();
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut similar: Vec<String> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| levenshtein(&name.to_lowercase(), &file_name) <= 2)
        .collect();
    similar.sort();
    similar.truncate(3);
    Some(similar)
}
