//! Source canonicalization
//!
//! The interpreter reads the workspace file with its own tokenizer, which
//! disagrees with the parser on a few byte-level details: a lone `\r` ends a
//! line, a coding cookie re-decodes the whole file, and NUL is refused. The
//! analyzer and the workspace both see the canonical text produced here, so
//! what runs is exactly what was checked.
use crate::analysis::{AnalysisFailure, FailureKind, Location, Violation};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

static CODING_COOKIE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[ \t\x0c]*#.*?coding[:=][ \t]*([-\w.]+)").ok());

const BOM: char = '\u{feff}';

/// Normalize line endings and vet the declared encoding.
///
/// Fails as a syntax error on NUL bytes and on any coding cookie that does
/// not name UTF-8.
pub fn canonicalize(source: &str) -> Result<Cow<'_, str>, AnalysisFailure> {
    if let Some(offset) = source.find('\0') {
        return Err(failure(
            "NUL",
            location_of(source, offset),
            "source code cannot contain null bytes".to_string(),
        ));
    }

    let stripped = source.strip_prefix(BOM).unwrap_or(source);
    let canonical: Cow<'_, str> = if stripped.contains('\r') {
        Cow::Owned(stripped.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(stripped)
    };

    for (row, line) in canonical.split('\n').take(2).enumerate() {
        let Some((start, name)) = cookie(line) else {
            continue;
        };
        if !names_utf8(name) {
            return Err(failure(
                "coding",
                Location {
                    line: row + 1,
                    column: start + 1,
                },
                format!("unsupported source encoding `{}`, only utf-8 is accepted", name),
            ));
        }
    }

    Ok(canonical)
}

/// Byte offset and name of the encoding declared on `line`, if any.
fn cookie(line: &str) -> Option<(usize, &str)> {
    match CODING_COOKIE.as_ref() {
        Some(re) => re.captures(line)?.get(1).map(|m| (m.start(), m.as_str())),
        // Without the pattern every mention of a coding is refused.
        None => line.find("coding").map(|i| (i, line)),
    }
}

fn names_utf8(name: &str) -> bool {
    let normal = name.to_ascii_lowercase().replace('_', "-");
    normal == "utf-8" || normal == "utf8" || normal.starts_with("utf-8-")
}

fn location_of(source: &str, offset: usize) -> Location {
    let before = &source[..offset];
    let line_start = before.rfind(['\n', '\r']).map_or(0, |i| i + 1);
    Location {
        line: before.matches('\n').count() + 1,
        column: offset - line_start + 1,
    }
}

fn failure(symbol: &str, location: Location, message: String) -> AnalysisFailure {
    AnalysisFailure {
        kind: FailureKind::SyntaxError,
        location,
        message: format!("Syntax error at {}: {}", location, message),
        violations: vec![Violation {
            symbol: symbol.to_string(),
            location,
            message,
        }],
    }
}
