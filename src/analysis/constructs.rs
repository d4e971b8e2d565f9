//! Dangerous construct pass
//!
//! Rejected, at any nesting depth:
//! - calls whose callee is a bare forbidden name (`eval(...)`)
//! - `getattr(x, "__dunder__")` and friends with a literal dunder argument
//! - bare references to dunders outside the safe set (`__builtins__`)
//! - attribute access to such dunders (`x.__class__`)
//! - forbidden callables referenced as values (`f = eval`)
use crate::analysis::{for_each_node, node_text, AnalysisFailure, FailureKind, Location, Violation};
use crate::config::policy::Policy;
use tree_sitter::Node;

pub fn check(root: Node<'_>, source: &str, policy: &Policy) -> Option<AnalysisFailure> {
    let mut violations = Vec::new();

    for_each_node(root, |node| match node.kind() {
        "call" => check_call(&node, source, policy, &mut violations),
        "attribute" => check_attribute(&node, source, policy, &mut violations),
        "identifier" => check_identifier(&node, source, policy, &mut violations),
        _ => {}
    });

    violations.sort_by_key(|v| (v.location.line, v.location.column));
    let first = violations.first()?;
    let message = if violations.len() == 1 {
        first.message.clone()
    } else {
        format!(
            "{} (and {} more)",
            first.message,
            violations.len() - 1
        )
    };
    AnalysisFailure::from_violations(FailureKind::ForbiddenConstruct, message, violations)
}

fn check_call(node: &Node<'_>, source: &str, policy: &Policy, out: &mut Vec<Violation>) {
    let Some(function) = node.child_by_field_name("function") else {
        return;
    };
    if function.kind() != "identifier" {
        return;
    }
    let name = node_text(&function, source);

    if policy.forbidden_callables.contains(name) {
        out.push(Violation {
            symbol: name.to_string(),
            location: Location::of(node),
            message: format!("Forbidden function: {}()", name),
        });
        return;
    }

    if policy.forbidden_attribute_functions.contains(name) {
        let attribute = node
            .child_by_field_name("arguments")
            .and_then(|args| positional_argument(&args, 1))
            .and_then(|arg| string_literal(&arg, source));
        if let Some(attribute) = attribute {
            if attribute.starts_with("__") {
                out.push(Violation {
                    symbol: attribute.clone(),
                    location: Location::of(node),
                    message: format!(
                        "Forbidden: {}() with dunder attribute '{}'",
                        name, attribute
                    ),
                });
            }
        }
    }
}

fn check_attribute(node: &Node<'_>, source: &str, policy: &Policy, out: &mut Vec<Violation>) {
    let Some(attribute) = node.child_by_field_name("attribute") else {
        return;
    };
    let name = node_text(&attribute, source);
    if policy.is_forbidden_dunder(name) {
        out.push(Violation {
            symbol: name.to_string(),
            location: Location::of(&attribute),
            message: format!("Forbidden attribute access: {}", name),
        });
    }
}

fn check_identifier(node: &Node<'_>, source: &str, policy: &Policy, out: &mut Vec<Violation>) {
    if !is_name_reference(node) {
        return;
    }
    let name = node_text(node, source);

    if policy.is_forbidden_dunder(name) {
        out.push(Violation {
            symbol: name.to_string(),
            location: Location::of(node),
            message: format!("Forbidden name reference: {}", name),
        });
        return;
    }

    // Calls are reported by check_call.
    if policy.forbidden_callables.contains(name) && !is_callee(node) {
        out.push(Violation {
            symbol: name.to_string(),
            location: Location::of(node),
            message: format!("Forbidden reference to {}", name),
        });
    }
}

fn is_callee(node: &Node<'_>) -> bool {
    node.parent().is_some_and(|parent| {
        parent.kind() == "call" && parent.child_by_field_name("function") == Some(*node)
    })
}

/// Whether an identifier is read as a variable rather than naming an
/// attribute, keyword, parameter, definition, or import path.
fn is_name_reference(node: &Node<'_>) -> bool {
    let Some(parent) = node.parent() else {
        return true;
    };
    let is_field = |field: &str| parent.child_by_field_name(field) == Some(*node);

    match parent.kind() {
        "attribute" => !is_field("attribute"),
        "keyword_argument" => !is_field("name"),
        "function_definition" | "class_definition" => !is_field("name"),
        "default_parameter" | "typed_default_parameter" => !is_field("name"),
        "typed_parameter" => is_field("type"),
        "parameters" | "lambda_parameters" => false,
        "list_splat_pattern" | "dictionary_splat_pattern" => !parent
            .parent()
            .is_some_and(|p| matches!(p.kind(), "parameters" | "lambda_parameters" | "typed_parameter")),
        "dotted_name" | "aliased_import" | "relative_import" | "import_prefix" => false,
        "global_statement" | "nonlocal_statement" => false,
        _ => true,
    }
}

/// The `index`-th positional argument of an argument list.
fn positional_argument<'t>(args: &Node<'t>, index: usize) -> Option<Node<'t>> {
    let mut cursor = args.walk();
    let positional = args
        .named_children(&mut cursor)
        .filter(|arg| {
            !matches!(
                arg.kind(),
                "keyword_argument" | "list_splat" | "dictionary_splat" | "comment"
            )
        })
        .nth(index);
    positional
}

/// Value of a plain or implicitly concatenated string literal. F-strings
/// with interpolations are not literals.
fn string_literal(node: &Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "string" => {
            let mut cursor = node.walk();
            let mut start = None;
            let mut end = None;
            for child in node.children(&mut cursor) {
                match child.kind() {
                    "string_start" => start = Some(child.end_byte()),
                    "string_end" => end = Some(child.start_byte()),
                    "interpolation" => return None,
                    _ => {}
                }
            }
            source.get(start?..end?).map(str::to_string)
        }
        "concatenated_string" => {
            let mut cursor = node.walk();
            let parts: Option<Vec<String>> = node
                .named_children(&mut cursor)
                .filter(|child| child.kind() != "comment")
                .map(|child| string_literal(&child, source))
                .collect();
            parts.map(|parts| parts.concat())
        }
        "parenthesized_expression" => {
            let mut cursor = node.walk();
            let inner = node
                .named_children(&mut cursor)
                .find(|child| child.kind() != "comment");
            inner.and_then(|inner| string_literal(&inner, source))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::syntax;

    fn check_source(source: &str) -> Option<AnalysisFailure> {
        let tree = syntax::parse(source).unwrap();
        check(tree.root_node(), source, &Policy::default())
    }

    fn symbols(source: &str) -> Vec<String> {
        check_source(source)
            .map(|f| f.violations.into_iter().map(|v| v.symbol).collect())
            .unwrap_or_default()
    }

    #[test]
    fn forbidden_call_at_any_depth() {
        let source = "\
def outer():
    def inner():
        return [eval(x) for x in ['1']]
    return inner()
";
        let failure = check_source(source).unwrap();
        assert_eq!(failure.kind, FailureKind::ForbiddenConstruct);
        assert_eq!(failure.message, "Forbidden function: eval()");
        assert_eq!(failure.location.line, 3);
    }

    #[test]
    fn every_forbidden_callable_is_caught() {
        for name in ["exec", "compile", "__import__", "open", "globals", "breakpoint"] {
            let source = format!("x = {}('a')\n", name);
            assert!(!symbols(&source).is_empty(), "{} slipped through", name);
        }
    }

    #[test]
    fn getattr_with_dunder_literal() {
        assert_eq!(symbols("getattr(obj, '__class__')"), vec!["__class__"]);
        assert_eq!(symbols("hasattr(obj, \"__dict__\")"), vec!["__dict__"]);
        assert_eq!(symbols("getattr(obj, '__cl' 'ass__')"), vec!["__class__"]);
    }

    #[test]
    fn getattr_with_plain_attribute_is_fine() {
        assert!(check_source("getattr(obj, 'value', None)").is_none());
        assert!(check_source("getattr(obj, name)").is_none());
        assert!(check_source("getattr(obj, default='__x__')").is_none());
    }

    #[test]
    fn dunder_attribute_and_name() {
        assert_eq!(symbols("x = ().__class__.__bases__"), vec!["__class__", "__bases__"]);
        assert_eq!(symbols("b = __builtins__"), vec!["__builtins__"]);
    }

    #[test]
    fn safe_dunders_pass() {
        let source = "import numpy\nprint(__name__, numpy.__version__, __doc__)\n";
        assert!(check_source(source).is_none());
    }

    #[test]
    fn forbidden_callable_aliasing() {
        assert_eq!(symbols("f = eval\nf('1')\n"), vec!["eval"]);
        assert_eq!(symbols("run = [compile][0]"), vec!["compile"]);
    }

    #[test]
    fn definitions_and_keywords_are_not_references() {
        let source = "\
class Shape:
    def __init__(self, open=False):
        self.open = open

def area(*args, **kwargs):
    return dict(compile=1)
";
        // `open` as parameter and attribute is fine; reading it is a reference.
        assert_eq!(symbols(source), vec!["open"]);
    }

    #[test]
    fn attribute_named_like_forbidden_callable() {
        assert!(check_source("import json\njson.loads('{}')\nre.compile('x')\n").is_none());
    }

    #[test]
    fn all_violations_accumulate() {
        let failure = check_source("eval('1')\nexec('2')\nx.__dict__\n").unwrap();
        assert_eq!(failure.violations.len(), 3);
        assert!(failure.message.ends_with("(and 2 more)"));
    }

    #[test]
    fn fstring_is_not_a_literal() {
        assert!(check_source("getattr(obj, f'{name}')").is_none());
    }
}
