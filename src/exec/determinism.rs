//! Determinism prelude
//!
//! Pins the PRNGs and the wall clock of the interpreter before the
//! submitted source runs. A leading docstring and `from __future__` imports
//! stay above the prelude, since the interpreter only accepts them first.
//! Everything else follows the prelude unmodified.
use crate::analysis::syntax;
use chrono::{DateTime, Datelike, Timelike, Utc};

/// Source with the prelude spliced in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedSource {
    pub source: String,
    /// Submitted lines kept above the prelude
    pub prelude_start: usize,
    pub prelude_lines: usize,
}

impl WrappedSource {
    /// The source as submitted, no prelude.
    pub fn unwrapped(source: &str) -> Self {
        Self {
            source: source.to_string(),
            prelude_start: 0,
            prelude_lines: 0,
        }
    }
}

/// Whether the source text mentions numpy at all.
pub fn references_numpy(source: &str) -> bool {
    source.contains("numpy") || source.contains("np.")
}

pub fn wrap(source: &str, seed: u64, fixed_time: DateTime<Utc>) -> WrappedSource {
    let prelude = prelude(seed, fixed_time, references_numpy(source));
    let prelude_lines = prelude.lines().count();

    let (head, rest) = source.split_at(future_head_len(source));
    let mut wrapped = String::with_capacity(source.len() + prelude.len() + 1);
    wrapped.push_str(head);
    if !head.is_empty() && !head.ends_with('\n') {
        wrapped.push('\n');
    }
    wrapped.push_str(&prelude);
    wrapped.push_str(rest);

    WrappedSource {
        source: wrapped,
        prelude_start: head.lines().count(),
        prelude_lines,
    }
}

/// Byte length of the prefix that must stay ahead of the prelude: through
/// the line ending the last leading `from __future__` import. Zero when
/// there is none or the source does not parse.
fn future_head_len(source: &str) -> usize {
    let Ok(tree) = syntax::parse(source) else {
        return 0;
    };
    let root = tree.root_node();

    let mut end = None;
    let mut first_statement = true;
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        match child.kind() {
            "comment" => continue,
            "future_import_statement" => end = Some(child.end_byte()),
            "expression_statement" if first_statement && is_docstring(&child) => {}
            _ => break,
        }
        first_statement = false;
    }

    match end {
        Some(end) => source[end..].find('\n').map_or(source.len(), |i| end + i + 1),
        None => 0,
    }
}

fn is_docstring(statement: &tree_sitter::Node<'_>) -> bool {
    statement.named_child_count() == 1
        && statement
            .named_child(0)
            .is_some_and(|child| matches!(child.kind(), "string" | "concatenated_string"))
}

fn prelude(seed: u64, fixed_time: DateTime<Utc>, seed_numpy: bool) -> String {
    let timestamp = fixed_time.timestamp();
    let micros = fixed_time.timestamp_subsec_micros();
    let nanos = i128::from(timestamp) * 1_000_000_000 + i128::from(micros) * 1_000;

    let mut out = String::new();
    out.push_str("import random as _sb_random\n");
    out.push_str("import time as _sb_time\n");
    out.push_str("import datetime as _sb_datetime\n");
    out.push_str(&format!("_sb_random.seed({})\n", seed));

    if seed_numpy {
        out.push_str("try:\n");
        out.push_str("    import numpy as _sb_numpy\n");
        // numpy seeds must fit in 32 bits
        out.push_str(&format!(
            "    _sb_numpy.random.seed({})\n",
            seed % (1u64 << 32)
        ));
        out.push_str("except ImportError:\n");
        out.push_str("    pass\n");
    }

    let seconds = timestamp as f64 + f64::from(micros) / 1_000_000.0;
    out.push_str(&format!("_sb_time.time = lambda: {:.6}\n", seconds));
    out.push_str(&format!("_sb_time.time_ns = lambda: {}\n", nanos));

    out.push_str("class _SbFixedDatetime(_sb_datetime.datetime):\n");
    out.push_str("    @classmethod\n");
    out.push_str("    def now(cls, tz=None):\n");
    out.push_str("        if tz is None:\n");
    out.push_str("            return _SB_FIXED_NAIVE_UTC\n");
    out.push_str("        return _SB_FIXED_NAIVE_UTC.replace(tzinfo=_sb_datetime.timezone.utc).astimezone(tz)\n");
    out.push_str("    @classmethod\n");
    out.push_str("    def utcnow(cls):\n");
    out.push_str("        return _SB_FIXED_NAIVE_UTC\n");
    out.push_str("    @classmethod\n");
    out.push_str("    def today(cls):\n");
    out.push_str("        return _SB_FIXED_NAIVE_UTC\n");
    out.push_str(&format!(
        "_SB_FIXED_NAIVE_UTC = _SbFixedDatetime({}, {}, {}, {}, {}, {}, {})\n",
        fixed_time.year(),
        fixed_time.month(),
        fixed_time.day(),
        fixed_time.hour(),
        fixed_time.minute(),
        fixed_time.second(),
        micros
    ));
    out.push_str("_sb_datetime.datetime = _SbFixedDatetime\n");
    out.push_str("del _sb_random, _sb_time\n");
    out
}
