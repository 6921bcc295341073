//! Output file naming for the CLI.

use std::collections::HashSet;
use std::path::Path;

const RESERVED: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];
const SUFFIX: &str = "-nodrm";

/// Replace characters that are not allowed in file names with `_`.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if RESERVED.contains(&c) || c.is_control() { '_' } else { c })
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        "book".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// `<sanitized-title>-nodrm.<ext>`, keeping the input's extension
/// (`.azw` when it has none).
pub fn output_file_name(title: &str, input: &Path) -> String {
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or("azw");
    format!("{}{SUFFIX}.{ext}", sanitize_title(title))
}

/// Claim `name` in `taken`, numbering it (`T-nodrm-2.azw`, `T-nodrm-3.azw`,
/// ...) when an earlier book of the same run already produced it.
pub fn claim_file_name(name: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.clone()) {
        return name;
    }
    let (stem, ext) = name.rsplit_once('.').unwrap_or((name.as_str(), ""));
    let mut n = 2;
    loop {
        let candidate = if ext.is_empty() { format!("{stem}-{n}") } else { format!("{stem}-{n}.{ext}") };
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
