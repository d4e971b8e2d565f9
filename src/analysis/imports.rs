//! Import allow-list pass
use crate::analysis::{for_each_node, node_text, AnalysisFailure, FailureKind, Location, Violation};
use crate::config::policy::Policy;
use tree_sitter::Node;

/// One imported module as written in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    /// Dotted module path, e.g. `pvlib.irradiance`
    pub module: String,
    pub location: Location,
}

impl ImportRef {
    pub fn root(&self) -> &str {
        self.module.split('.').next().unwrap_or(&self.module)
    }
}

/// Every module named by an import statement, in document order.
///
/// Relative imports contribute their named module if they have one;
/// `from . import x` names none and contributes nothing.
pub fn collect(root: Node<'_>, source: &str) -> Vec<ImportRef> {
    let mut refs = Vec::new();

    for_each_node(root, |node| match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                let dotted = if name.kind() == "aliased_import" {
                    name.child_by_field_name("name")
                } else {
                    Some(name)
                };
                if let Some(dotted) = dotted {
                    push_module(&mut refs, &dotted, source);
                }
            }
        }
        "import_from_statement" => {
            if let Some(module) = node.child_by_field_name("module_name") {
                if module.kind() == "relative_import" {
                    let mut cursor = module.walk();
                    let named = module
                        .named_children(&mut cursor)
                        .find(|child| child.kind() == "dotted_name");
                    if let Some(dotted) = named {
                        push_module(&mut refs, &dotted, source);
                    }
                } else {
                    push_module(&mut refs, &module, source);
                }
            }
        }
        "future_import_statement" => refs.push(ImportRef {
            module: "__future__".to_string(),
            location: Location::of(&node),
        }),
        _ => {}
    });

    refs
}

fn push_module(refs: &mut Vec<ImportRef>, node: &Node<'_>, source: &str) {
    let module: String = node_text(node, source)
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\\')
        .collect();
    if !module.is_empty() {
        refs.push(ImportRef {
            module,
            location: Location::of(node),
        });
    }
}

/// Reject any import whose root module is outside the allow-list.
pub fn check(refs: &[ImportRef], policy: &Policy) -> Option<AnalysisFailure> {
    let violations: Vec<Violation> = refs
        .iter()
        .filter(|r| !policy.is_import_allowed(r.root()))
        .map(|r| Violation {
            symbol: r.root().to_string(),
            location: r.location,
            message: format!("import of {} is not allowed", r.module),
        })
        .collect();

    if violations.is_empty() {
        return None;
    }

    let mut offenders: Vec<&str> = Vec::new();
    for violation in &violations {
        if !offenders.contains(&violation.symbol.as_str()) {
            offenders.push(&violation.symbol);
        }
    }

    let message = format!(
        "Forbidden imports detected: {}. Allowed modules: {}",
        offenders.join(", "),
        policy.allowed_imports_listing()
    );
    AnalysisFailure::from_violations(FailureKind::ForbiddenImport, message, violations)
}
