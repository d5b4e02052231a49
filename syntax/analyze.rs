use std::collections::{HashMap, HashSet};

use crate::config::FunctionSet;
use crate::diagnostic::{sort_diagnostics, Diagnostic};
use crate::expr::{DataStr, Expr, Ident};
use crate::tree::{ActionKind, ActionNode, BindingKind, ErrorNode, Node, Template, WalkEvent};

/// Returns the diagnostics for syntax errors and unterminated blocks
pub fn structural(template: &Template) -> Vec<Diagnostic> {
    let mut diagnostics = structural_unsorted(template);
    sort_diagnostics(&mut diagnostics);
    diagnostics
}

/// Runs every check against a parsed template
///
/// This is a pure function of its arguments; the result is sorted by start offset and then by
/// descending severity.
pub fn analyze(template: &Template, functions: &FunctionSet) -> Vec<Diagnostic> {
    let mut diagnostics = structural_unsorted(template);

    let mut checker = ScopeChecker::new(functions);
    checker.check(template);
    diagnostics.append(&mut checker.diagnostics);

    check_template_names(template, &mut diagnostics);

    sort_diagnostics(&mut diagnostics);
    diagnostics
}

fn structural_unsorted(template: &Template) -> Vec<Diagnostic> {
    let mut diagnostics = vec![];

    for node in template.nodes() {
        match node {
            Node::Error(error) => diagnostics.push(Diagnostic::from(&error.error)),
            // A truncated parse leaves every enclosing block open
            Node::Action(action)
                if action.kind.opens_block()
                    && !action.is_terminated()
                    && template.truncated.is_none() =>
            {
                diagnostics.push(Diagnostic::error(
                    action.span,
                    format!("`{}` is missing its matching end", action.kind.as_str()),
                    "unterminated-block",
                ));
            }
            _ => {}
        }
    }

    diagnostics
}

/// Returns the block kind of a malformed action that still opened a block
fn error_block_kind(error: &ErrorNode) -> Option<ActionKind> {
    error
        .keyword
        .and_then(ActionKind::from_keyword)
        .filter(|kind| kind.opens_block())
}

fn starts_template(kind: ActionKind) -> bool {
    matches!(kind, ActionKind::Block | ActionKind::Define)
}

struct Scope {
    variables: Vec<DataStr>,
    /// Template bodies can't see variables from outside
    isolated: bool,
}

/// Variable scopes following `text/template`'s rules
///
/// A variable is visible from the action after its declaration up to the `end` of the enclosing
/// `if`, `range` or `with`. Template bodies start with only `$` in scope.
struct Scopes {
    scopes: Vec<Scope>,
}

impl Scopes {
    fn new() -> Scopes {
        Scopes {
            scopes: vec![Scope {
                variables: vec![],
                isolated: true,
            }],
        }
    }

    fn push(&mut self, isolated: bool) {
        self.scopes.push(Scope {
            variables: vec![],
            isolated,
        });
    }

    fn pop(&mut self) {
        // The root scope is never popped
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    fn declare(&mut self, name: DataStr) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.variables.push(name);
        }
    }

    fn is_defined(&self, name: &str) -> bool {
        if name == "$" {
            return true;
        }

        for scope in self.scopes.iter().rev() {
            if scope.variables.iter().any(|variable| &**variable == name) {
                return true;
            }

            if scope.isolated {
                break;
            }
        }

        false
    }
}

struct ScopeChecker<'f> {
    functions: &'f FunctionSet,
    scopes: Scopes,
    diagnostics: Vec<Diagnostic>,
}

impl<'f> ScopeChecker<'f> {
    fn new(functions: &'f FunctionSet) -> ScopeChecker<'f> {
        ScopeChecker {
            functions,
            scopes: Scopes::new(),
            diagnostics: vec![],
        }
    }

    fn check(&mut self, template: &Template) {
        for event in template.walk() {
            match event {
                WalkEvent::Enter(Node::Action(action)) => self.enter_action(action),
                WalkEvent::Leave(Node::Action(action)) if action.kind.opens_block() => {
                    self.scopes.pop()
                }
                WalkEvent::Enter(Node::Error(error)) => {
                    if let Some(kind) = error_block_kind(error) {
                        self.scopes.push(starts_template(kind));
                    }
                }
                WalkEvent::Leave(Node::Error(error)) => {
                    if error_block_kind(error).is_some() {
                        self.scopes.pop();
                    }
                }
                _ => {}
            }
        }
    }

    fn enter_action(&mut self, action: &ActionNode) {
        // The header is evaluated before any of its declarations take effect
        for expr in &action.expressions {
            self.check_expr(expr);
        }

        if action.kind.opens_block() {
            self.scopes.push(starts_template(action.kind));
        }

        if let Some(bindings) = &action.bindings {
            for variable in &bindings.variables {
                match bindings.kind {
                    BindingKind::Declare => self.scopes.declare(variable.name.clone()),
                    BindingKind::Assign => self.check_variable(variable),
                }
            }
        }
    }

    fn check_variable(&mut self, variable: &Ident) {
        if !self.scopes.is_defined(&variable.name) {
            self.diagnostics.push(Diagnostic::error(
                variable.span,
                format!("undefined variable `{}`", variable.name),
                "undefined-variable",
            ));
        }
    }

    fn check_expr(&mut self, expr: &Expr) {
        for expr in expr.descendants() {
            match expr {
                Expr::VariableRef(variable) => self.check_variable(variable),
                Expr::FunctionCall { name, .. } => {
                    if !self.functions.contains(&name.name) {
                        self.diagnostics.push(Diagnostic::warning(
                            name.span,
                            format!("function `{}` is not defined", name.name),
                            "unknown-function",
                        ));
                    }
                }
                Expr::FieldAccess { base, field, .. } => {
                    let invalid_base = match base.as_ref() {
                        Expr::Literal { .. } => true,
                        // `.Name` has an implied dot with an empty span
                        Expr::Dot(span) => !span.is_empty(),
                        _ => false,
                    };

                    if invalid_base {
                        self.diagnostics.push(Diagnostic::error(
                            field.span,
                            format!(
                                "can't access field `{}` of {}",
                                field.name,
                                base.description()
                            ),
                            "invalid-field-access",
                        ));
                    }
                }
                Expr::MethodCall { receiver, .. } => {
                    if !matches!(receiver.as_ref(), Expr::FieldAccess { .. }) {
                        self.diagnostics.push(Diagnostic::error(
                            receiver.span(),
                            format!(
                                "can't give arguments to non-function {}",
                                receiver.description()
                            ),
                            "not-a-function",
                        ));
                    }
                }
                Expr::Dot(_) | Expr::Pipeline { .. } | Expr::Literal { .. } => {}
            }
        }
    }
}

fn check_template_names(template: &Template, diagnostics: &mut Vec<Diagnostic>) {
    let mut definitions: Vec<(ActionKind, &Ident)> = vec![];
    let mut used: HashSet<&str> = HashSet::new();

    for node in template.nodes() {
        let action = match node {
            Node::Action(action) => action,
            _ => continue,
        };

        if let Some(name) = &action.name {
            match action.kind {
                ActionKind::Define => definitions.push((action.kind, name)),
                ActionKind::Block => {
                    // Blocks are executed where they're defined
                    definitions.push((action.kind, name));
                    used.insert(&name.name);
                }
                ActionKind::Template => {
                    used.insert(&name.name);
                }
                _ => {}
            }
        }
    }

    let mut first_definitions: HashMap<&str, &Ident> = HashMap::new();

    for (kind, name) in definitions {
        if first_definitions.insert(&name.name, name).is_some() {
            diagnostics.push(Diagnostic::warning(
                name.span,
                format!("template `{}` is already defined", name.name),
                "duplicate-template",
            ));
        }

        if kind == ActionKind::Define && !used.contains(&*name.name) {
            diagnostics.push(Diagnostic::information(
                name.span,
                format!("template `{}` is defined but never used", name.name),
                "unused-define",
            ));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use crate::diagnostic::Severity;
    use crate::parser::parse_str;
    use crate::span::t2s;
    use proptest::prelude::*;

    fn analyze_default(source: &str) -> Vec<Diagnostic> {
        let config = Config::default();
        analyze(&parse_str(source, &config).template, &config.functions)
    }

    fn codes(diagnostics: &[Diagnostic]) -> Vec<&'static str> {
        diagnostics.iter().map(|d| d.code).collect()
    }

    #[test]
    fn clean_template() {
        let j = r#"{{ range $i, $e := .Items }}{{ printf "%d: %s" $i $e.Name | html }}{{ end }}"#;
        assert!(analyze_default(j).is_empty());
    }

    #[test]
    fn unknown_function() {
        let j = "{{ upper .X }}{{ len .X }}";
        let t = "   ^^^^^                  ";

        let diagnostics = analyze_default(j);
        assert_eq!(
            vec![Diagnostic::warning(
                t2s(t),
                "function `upper` is not defined".to_owned(),
                "unknown-function"
            )],
            diagnostics
        );

        let mut config = Config::default();
        config.functions.insert("upper");
        let parse = parse_str(j, &config);
        assert!(analyze(&parse.template, &config.functions).is_empty());
    }

    #[test]
    fn undefined_variables() {
        let j = "{{ $x }}{{ $y := 1 }}{{ $y }}{{ if $z := .A }}{{ $z }}{{ end }}{{ $z }}{{ $q = 1 }}";
        let t = "   ^^                                                                           ";
        let u = "                                                                  ^^               ";
        let v = "                                                                          ^^       ";

        let diagnostics = analyze_default(j);
        assert_eq!(vec!["undefined-variable"; 3], codes(&diagnostics));

        let spans: Vec<_> = diagnostics.iter().map(|d| d.span).collect();
        assert_eq!(vec![t2s(t), t2s(u), t2s(v)], spans);
    }

    #[test]
    fn variables_visible_until_end() {
        // Declarations in a branch stay visible in later branches of the same block
        let j = "{{ with $w := .A }}{{ $b := 1 }}{{ else }}{{ $w }}{{ $b }}{{ end }}";
        assert!(analyze_default(j).is_empty());

        let j = "{{ $ }}{{ $x := . }}{{ $x := $x }}";
        assert!(analyze_default(j).is_empty());

        let j = "{{ $x := $x }}";
        assert_eq!(vec!["undefined-variable"], codes(&analyze_default(j)));
    }

    #[test]
    fn templates_have_their_own_scope() {
        let j = r#"{{ $a := 1 }}{{ define "t" }}{{ $a }}{{ $ }}{{ end }}{{ template "t" }}"#;
        let t = r#"                                ^^                                      "#;

        let diagnostics = analyze_default(j);
        assert_eq!(vec!["undefined-variable"], codes(&diagnostics));
        assert_eq!(t2s(t), diagnostics[0].span);

        let j = r#"{{ $a := 1 }}{{ block "b" $a }}{{ $a }}{{ end }}"#;
        assert_eq!(vec!["undefined-variable"], codes(&analyze_default(j)));
    }

    #[test]
    fn invalid_field_access() {
        let j = r#"{{ "s".Len }}{{ .A.B }}{{ $.C }}{{ nil.D }}"#;
        let t = r#"       ^^^                                  "#;

        let diagnostics = analyze_default(j);
        assert_eq!(vec!["invalid-field-access"; 2], codes(&diagnostics));
        assert_eq!(t2s(t), diagnostics[0].span);
        assert_eq!("can't access field `Len` of string", diagnostics[0].message);
    }

    #[test]
    fn arguments_to_non_functions() {
        let diagnostics = analyze_default(r#"{{ "s" 1 }}{{ .Method 1 }}{{ $ 2 }}"#);
        assert_eq!(vec!["not-a-function"; 2], codes(&diagnostics));
    }

    #[test]
    fn template_definitions() {
        let j = r#"{{define "a"}}{{end}}{{define "b"}}{{end}}{{define "b"}}{{end}}{{template "b"}}{{block "c" .}}{{end}}"#;
        let diagnostics = analyze_default(j);

        assert_eq!(vec!["unused-define", "duplicate-template"], codes(&diagnostics));
        assert_eq!(Severity::Information, diagnostics[0].severity);
        assert_eq!(Severity::Warning, diagnostics[1].severity);
    }

    #[test]
    fn severity_breaks_ties() {
        let j = r#"{{define "a"}}{{end}}{{define "a"}}{{end}}"#;
        let diagnostics = analyze_default(j);

        // The second definition is both a duplicate and unused
        assert_eq!(
            vec!["unused-define", "duplicate-template", "unused-define"],
            codes(&diagnostics)
        );
        assert_eq!(diagnostics[1].span, diagnostics[2].span);
        assert_eq!(Severity::Warning, diagnostics[1].severity);
    }

    #[test]
    fn malformed_blocks_keep_scopes_balanced() {
        let j = "{{ range $a, $b, $c := . }}{{ $a }}{{ end }}{{ $a }}";
        let diagnostics = analyze_default(j);

        assert_eq!(
            vec!["too-many-variables", "undefined-variable", "undefined-variable"],
            codes(&diagnostics)
        );
    }

    fn fragment() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec![
            "{{", "}}", "if ", "else ", "end", "range ", "with ", "define ", "block ",
            "template ", " ", ".A", "$x", "$y", ":=", "=", ",", "|", "(", ")", "\"t\"", "1",
            "upper", "len", "x",
        ])
    }

    proptest! {
        #[test]
        fn analysis_is_deterministic(fragments in prop::collection::vec(fragment(), 0..40)) {
            let source: String = fragments.concat();
            let config = Config::default();
            let parse = parse_str(&source, &config);

            let first = analyze(&parse.template, &config.functions);
            let second = analyze(&parse.template, &config.functions);
            prop_assert_eq!(&first, &second);

            let mut sorted = first.clone();
            sort_diagnostics(&mut sorted);
            prop_assert_eq!(first, sorted);
        }
    }
}
