//! Static analysis of submitted source
//!
//! The source is first canonicalized by [`source`], then three passes run
//! over one tree-sitter syntax tree, strictly in order and short-circuiting
//! on the first that fails:
//!
//! 1. [`syntax`]: the source must parse without ERROR or MISSING nodes
//! 2. [`imports`]: every imported root module must be allow-listed
//! 3. [`constructs`]: no forbidden calls, reflection tricks, or dunder access
//!
//! Nothing here spawns a process.

pub mod constructs;
pub mod imports;
pub mod source;
pub mod syntax;

use crate::config::policy::Policy;
use crate::config::types::{ErrorClass, Result};
use serde::Serialize;
use std::fmt;
use tree_sitter::Node;

/// 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn of(node: &Node<'_>) -> Self {
        let point = node.start_position();
        Self {
            line: point.row + 1,
            column: point.column + 1,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SyntaxError,
    ForbiddenImport,
    ForbiddenConstruct,
}

impl FailureKind {
    pub fn error_class(&self) -> ErrorClass {
        match self {
            FailureKind::SyntaxError => ErrorClass::Syntax,
            FailureKind::ForbiddenImport => ErrorClass::ForbiddenImport,
            FailureKind::ForbiddenConstruct => ErrorClass::SecurityViolation,
        }
    }

    /// Caller-facing prefix and remediation hint.
    fn banner(&self) -> (&'static str, &'static str) {
        match self {
            FailureKind::SyntaxError => ("SYNTAX_ERROR", "Fix syntax before execution"),
            FailureKind::ForbiddenImport => ("IMPORT_ERROR", "Use only allowed libraries"),
            FailureKind::ForbiddenConstruct => {
                ("SECURITY", "Avoid introspection and dangerous operations")
            }
        }
    }
}

/// One offending symbol found by a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub symbol: String,
    pub location: Location,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisFailure {
    pub kind: FailureKind,
    /// Location of the first violation in document order
    pub location: Location,
    pub message: String,
    /// Every violation found by the failing pass
    pub violations: Vec<Violation>,
}

impl AnalysisFailure {
    pub(crate) fn from_violations(
        kind: FailureKind,
        message: String,
        violations: Vec<Violation>,
    ) -> Option<Self> {
        let location = violations.first()?.location;
        Some(Self {
            kind,
            location,
            message,
            violations,
        })
    }

    pub fn error_class(&self) -> ErrorClass {
        self.kind.error_class()
    }

    /// Message returned in the report's `error` field.
    pub fn report_message(&self) -> String {
        let (prefix, hint) = self.kind.banner();
        format!("{}: {}\n\nHINT: {}", prefix, self.message, hint)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisVerdict {
    Pass,
    Fail(AnalysisFailure),
}

impl AnalysisVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, AnalysisVerdict::Pass)
    }

    pub fn failure(&self) -> Option<&AnalysisFailure> {
        match self {
            AnalysisVerdict::Pass => None,
            AnalysisVerdict::Fail(failure) => Some(failure),
        }
    }
}

/// Canonicalize `source` and run the three passes over it.
///
/// Errors only when the parser itself cannot be set up; anything wrong
/// with the source is a [`AnalysisVerdict::Fail`].
pub fn analyze(source: &str, policy: &Policy) -> Result<AnalysisVerdict> {
    match source::canonicalize(source) {
        Ok(canonical) => analyze_canonical(&canonical, policy),
        Err(failure) => Ok(AnalysisVerdict::Fail(failure)),
    }
}

/// The three passes over text already produced by [`source::canonicalize`].
pub(crate) fn analyze_canonical(source: &str, policy: &Policy) -> Result<AnalysisVerdict> {
    let tree = syntax::parse(source)?;
    let root = tree.root_node();

    if let Some(failure) = syntax::check(root, source) {
        return Ok(AnalysisVerdict::Fail(failure));
    }

    let references = imports::collect(root, source);
    if let Some(failure) = imports::check(&references, policy) {
        return Ok(AnalysisVerdict::Fail(failure));
    }

    if let Some(failure) = constructs::check(root, source, policy) {
        return Ok(AnalysisVerdict::Fail(failure));
    }

    Ok(AnalysisVerdict::Pass)
}

/// Preorder walk of every node under `root`, anonymous tokens included.
pub(crate) fn for_each_node<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>)) {
    let mut cursor = root.walk();
    loop {
        visit(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

pub(crate) fn node_text<'s>(node: &Node<'_>, source: &'s str) -> &'s str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}
