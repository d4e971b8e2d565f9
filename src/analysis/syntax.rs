//! Syntax pass
use crate::analysis::{for_each_node, node_text, AnalysisFailure, FailureKind, Location, Violation};
use crate::config::types::{Result, SandboxError};
use tree_sitter::{Node, Parser, Tree};

/// Parse `source` with the Python grammar.
pub fn parse(source: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
    parser
        .set_language(&language)
        .map_err(|e| SandboxError::Parser(format!("Failed to load Python grammar: {}", e)))?;

    parser
        .parse(source, None)
        .ok_or_else(|| SandboxError::Parser("Parser returned no tree".to_string()))
}

/// First ERROR or MISSING node in document order, a Python 2 statement
/// form the grammar still accepts, or a construct the interpreter's compiler
/// refuses even though it parses.
pub fn check(root: Node<'_>, source: &str) -> Option<AnalysisFailure> {
    let offender = match (first_offender(root, source), inconsistent_indent(root, source)) {
        (Some(a), Some(b)) => Some(if b.location.line < a.location.line { b } else { a }),
        (a, b) => a.or(b),
    }?;
    let message = format!(
        "Syntax error at {}: {}",
        offender.location, offender.message
    );
    AnalysisFailure::from_violations(FailureKind::SyntaxError, message, vec![offender])
}

fn first_offender(root: Node<'_>, source: &str) -> Option<Violation> {
    let mut found: Option<Violation> = None;

    for_each_node(root, |node| {
        if found.is_some() {
            return;
        }
        let (at, message) = if node.is_missing() {
            (node, format!("expected `{}`", node.kind()))
        } else if node.is_error() {
            (node, format!("invalid syntax near `{}`", snippet(&node, source)))
        } else {
            match node.kind() {
                "print_statement" => (node, "print statement without parentheses".to_string()),
                "exec_statement" => (node, "exec statement is not valid Python 3".to_string()),
                "argument_list" => match misordered_argument(node) {
                    Some(misplaced) => misplaced,
                    None => return,
                },
                "delete_statement" => match undeletable_target(node) {
                    Some(target) => (target, format!("cannot delete {}", describe(&target))),
                    None => return,
                },
                "expression_statement" | "assignment" | "augmented_assignment" => {
                    match bare_named_expression(node) {
                        Some(walrus) => (walrus, "unparenthesized assignment expression".to_string()),
                        None => return,
                    }
                }
                _ => return,
            }
        };

        found = Some(Violation {
            symbol: at.kind().to_string(),
            location: Location::of(&at),
            message,
        });
    });

    found
}

/// Positional after keyword, or iterable unpacking after `**`.
fn misordered_argument(args: Node<'_>) -> Option<(Node<'_>, String)> {
    let mut keyword = false;
    let mut mapping = false;
    let mut cursor = args.walk();
    for arg in args.named_children(&mut cursor) {
        match arg.kind() {
            "comment" => {}
            "keyword_argument" => keyword = true,
            "dictionary_splat" => mapping = true,
            "list_splat" if mapping => {
                return Some((arg, "iterable argument unpacking follows keyword argument unpacking".to_string()));
            }
            "list_splat" => {}
            _ if mapping => {
                return Some((arg, "positional argument follows keyword argument unpacking".to_string()));
            }
            _ if keyword => {
                return Some((arg, "positional argument follows keyword argument".to_string()));
            }
            _ => {}
        }
    }
    None
}

fn undeletable_target(statement: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = statement.walk();
    let targets: Vec<_> = statement.named_children(&mut cursor).collect();
    targets.into_iter().find_map(first_undeletable)
}

fn first_undeletable(target: Node<'_>) -> Option<Node<'_>> {
    match target.kind() {
        "identifier" | "attribute" | "subscript" | "comment" => None,
        "tuple" | "list" | "expression_list" | "parenthesized_expression" => {
            let mut cursor = target.walk();
            let inner: Vec<_> = target.named_children(&mut cursor).collect();
            inner.into_iter().find_map(first_undeletable)
        }
        _ => Some(target),
    }
}

fn describe(node: &Node<'_>) -> &'static str {
    match node.kind() {
        "call" => "function call",
        "string" | "concatenated_string" | "integer" | "float" | "true" | "false" | "none" => "literal",
        "list_splat" => "starred",
        _ => "expression",
    }
}

/// `a := 1` as a statement, or as the right side of an assignment.
fn bare_named_expression(node: Node<'_>) -> Option<Node<'_>> {
    let candidate = if node.kind() == "expression_statement" {
        node.named_child(0)
    } else {
        node.child_by_field_name("right")
    }?;
    (candidate.kind() == "named_expression").then_some(candidate)
}

/// Statement kinds that open their own logical line.
fn starts_logical_line(node: &Node<'_>) -> bool {
    if node.kind() == "comment" || !node.is_named() {
        return false;
    }
    match node.parent().map(|p| p.kind()) {
        Some("module" | "block" | "decorated_definition") => true,
        _ => matches!(
            node.kind(),
            "elif_clause" | "else_clause" | "except_clause" | "except_group_clause" | "finally_clause"
        ),
    }
}

/// Tab and space indentation that only agrees under one tab width.
///
/// Every statement line is measured twice, once with tabs to the next
/// multiple of eight and once with tabs as one column. Both measures must
/// order the indentation stack the same way.
fn inconsistent_indent(root: Node<'_>, source: &str) -> Option<Violation> {
    let mut starts: Vec<Node<'_>> = Vec::new();
    for_each_node(root, |node| {
        if starts_logical_line(&node) {
            starts.push(node);
        }
    });
    starts.sort_by_key(|node| node.start_byte());
    starts.dedup_by_key(|node| node.start_position().row);

    let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
    for node in starts {
        let start = node.start_byte();
        let Some(indent) = source.get(start - node.start_position().column..start) else {
            continue;
        };
        if !indent.chars().all(|c| matches!(c, ' ' | '\t' | '\x0c')) {
            continue;
        }

        let (mut col, mut altcol) = (0usize, 0usize);
        for c in indent.chars() {
            match c {
                ' ' => {
                    col += 1;
                    altcol += 1;
                }
                '\t' => {
                    col = (col / 8 + 1) * 8;
                    altcol += 1;
                }
                _ => {
                    col = 0;
                    altcol = 0;
                }
            }
        }

        let consistent = loop {
            let (top_col, top_alt) = stack.last().copied().unwrap_or((0, 0));
            if col == top_col {
                break altcol == top_alt;
            }
            if col > top_col {
                stack.push((col, altcol));
                break altcol > top_alt;
            }
            if stack.len() == 1 {
                break true;
            }
            stack.pop();
        };

        if !consistent {
            return Some(Violation {
                symbol: "TabError".to_string(),
                location: Location::of(&node),
                message: "inconsistent use of tabs and spaces in indentation".to_string(),
            });
        }
    }
    None
}

fn snippet(node: &Node<'_>, source: &str) -> String {
    let text = node_text(node, source);
    let first_line = text.lines().next().unwrap_or("").trim();
    first_line.chars().take(40).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(source: &str) -> Option<AnalysisFailure> {
        let tree = parse(source).unwrap();
        check(tree.root_node(), source)
    }

    #[test]
    fn valid_source_has_no_failure() {
        assert!(self::failure("x = [i * 2 for i in range(3)]\nprint(x)\n").is_none());
    }

    #[test]
    fn unclosed_paren_reports_line() {
        let failure = self::failure("a = 1\nb = (2 +\n").unwrap();
        assert_eq!(failure.kind, FailureKind::SyntaxError);
        assert_eq!(failure.violations.len(), 1);
        assert!(failure.message.starts_with("Syntax error at line"));
    }

    #[test]
    fn missing_colon_is_located_on_its_line() {
        let failure = self::failure("x = 1\n\nif x > 0\n    print(x)\n").unwrap();
        assert_eq!(failure.location.line, 3);
    }

    #[test]
    fn python2_print_is_rejected() {
        let failure = self::failure("print 'hello'\n").unwrap();
        assert_eq!(failure.location.line, 1);
        assert!(failure.message.contains("print"));
    }

    #[test]
    fn positional_after_keyword_is_rejected() {
        let failure = self::failure("f(a=1, b)\n").unwrap();
        assert!(failure.message.contains("positional argument follows keyword argument"));
        assert_eq!(failure.location.column, 8);

        let failure = self::failure("f(**a, b)\n").unwrap();
        assert!(failure.message.contains("keyword argument unpacking"));
    }

    #[test]
    fn iterable_unpacking_after_mapping_unpacking_is_rejected() {
        let failure = self::failure("f(**a, *b)\n").unwrap();
        assert!(failure.message.contains("iterable argument unpacking"));
    }

    #[test]
    fn valid_argument_orders_pass() {
        for source in [
            "f(a, *b, c=1, **d)\n",
            "f(a=1, *b)\n",
            "f(*a, b, *c)\n",
            "f(x for x in y)\n",
            "class A(B, metaclass=M):\n    pass\n",
        ] {
            assert!(self::failure(source).is_none(), "{}", source);
        }
    }

    #[test]
    fn delete_of_call_or_literal_is_rejected() {
        let failure = self::failure("del f()\n").unwrap();
        assert!(failure.message.contains("cannot delete function call"));

        let failure = self::failure("x = 1\ndel x, 1\n").unwrap();
        assert_eq!(failure.location.line, 2);
        assert!(failure.message.contains("cannot delete literal"));
    }

    #[test]
    fn delete_of_names_and_items_passes() {
        assert!(self::failure("del a\ndel a.b, c[0]\ndel (d, [e, f])\n").is_none());
    }

    #[test]
    fn bare_walrus_statement_is_rejected() {
        let failure = self::failure("a := 1\n").unwrap();
        assert!(failure.message.contains("unparenthesized assignment expression"));
        assert!(self::failure("x = y := 1\n").is_some());
        assert!(self::failure("(a := 1)\nif (n := 3) > 2:\n    print(n)\n").is_none());
    }

    #[test]
    fn mixed_tabs_and_spaces_are_rejected() {
        let failure = self::failure("if 1:\n\tx = 1\n        y = 2\n").unwrap();
        assert_eq!(failure.location.line, 3);
        assert!(failure.message.contains("inconsistent use of tabs and spaces"));
        assert_eq!(failure.violations[0].symbol, "TabError");
    }

    #[test]
    fn consistent_tabs_pass() {
        assert!(self::failure("if 1:\n\tx = 1\n\tif x:\n\t\ty = 2\n\tz = 3\n").is_none());
        assert!(self::failure("if 1:\n    x = 1\nelse:\n    x = 2\n").is_none());
    }

    #[test]
    fn empty_source_parses() {
        assert!(self::failure("").is_none());
    }
}
