use go_template_syntax::config::FunctionSet;
use go_template_syntax::expr::Expr;
use go_template_syntax::scope::{action_at, bindings_at, dot_at, expr_at};
use go_template_syntax::span::Span;
use go_template_syntax::tree::{ActionKind, Node, Template};

use crate::handler::SyncRequestHandler;
use crate::model::{Document, StoreError};
use crate::session::State;

fn describe_dot(template: &Template, offset: u32) -> String {
    format!("`.` ({})", dot_at(template, offset).description())
}

fn describe_expr(document: &Document, functions: &FunctionSet, expr: &Expr, offset: u32) -> String {
    let template = document.template();
    let source_of = |expr: &Expr| expr.span().slice(document.text()).to_owned();

    match expr {
        Expr::Dot(_) => describe_dot(template, offset),
        Expr::VariableRef(ident) => {
            let binding = bindings_at(template, offset)
                .into_iter()
                .find(|binding| binding.name == ident.name);

            match binding {
                Some(binding) => format!("`{}`: {}", ident.name, binding.source.description()),
                None => format!("`{}`: undefined variable", ident.name),
            }
        }
        Expr::FieldAccess { base, field, .. } => {
            let base = match **base {
                Expr::Dot(_) => describe_dot(template, offset),
                ref base => format!("`{}`", source_of(base)),
            };

            format!("field `{}` of {}", field.name, base)
        }
        Expr::FunctionCall { name, .. } => match functions.doc(&name.name) {
            Some(doc) => format!("function `{}`\n\n{}", name.name, doc),
            None if functions.contains(&name.name) => format!("function `{}`", name.name),
            None => format!("unknown function `{}`", name.name),
        },
        Expr::MethodCall { receiver, args, .. } => format!(
            "call of `{}` with {} argument{}",
            source_of(receiver),
            args.len(),
            if args.len() == 1 { "" } else { "s" }
        ),
        Expr::Pipeline { stages, .. } => format!("pipeline of {} commands", stages.len()),
        Expr::Literal { .. } => format!("{} literal", expr.description()),
    }
}

fn hover_contents(
    document: &Document,
    functions: &FunctionSet,
    offset: u32,
) -> Option<(String, Span)> {
    let template = document.template();

    let action = match action_at(template, offset)? {
        Node::Action(action) => action,
        Node::Error(error) => return Some((error.message(), error.span)),
        Node::Text(_) => return None,
    };

    if let Some(name) = action
        .name
        .as_ref()
        .filter(|name| name.span.touches_offset(offset))
    {
        let text = match action.kind {
            ActionKind::Define => format!("defines template `{}`", name.name),
            ActionKind::Block => format!("defines and executes template `{}`", name.name),
            _ => format!("executes template `{}`", name.name),
        };

        return Some((text, name.span));
    }

    let expr = expr_at(action, offset)?;
    Some((describe_expr(document, functions, expr, offset), expr.span()))
}

/// Returns a static description of the expression at `position`
pub fn hover(
    document: &Document,
    position: lsp_types::Position,
    functions: &FunctionSet,
) -> Option<lsp_types::Hover> {
    let offset = document.position_to_offset(position);
    let (value, span) = hover_contents(document, functions, offset)?;

    Some(lsp_types::Hover {
        contents: lsp_types::HoverContents::Markup(lsp_types::MarkupContent {
            kind: lsp_types::MarkupKind::Markdown,
            value,
        }),
        range: Some(document.span_to_range(span)),
    })
}

pub struct HoverHandler;

impl SyncRequestHandler for HoverHandler {
    type Request = lsp_types::request::HoverRequest;

    fn handle(
        state: &State,
        params: lsp_types::HoverParams,
    ) -> Result<Option<lsp_types::Hover>, StoreError> {
        let position_params = params.text_document_position_params;
        let document = state.documents.get(&position_params.text_document.uri)?;

        Ok(hover(
            &document,
            position_params.position,
            &state.config.syntax.functions,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use go_template_syntax::config::Config;

    fn hover_at(text: &str, marker: &str) -> Option<(String, lsp_types::Range)> {
        let document = Document::new(
            lsp_types::Url::parse("file:///test.tmpl").unwrap(),
            1,
            text.into(),
            &Config::default(),
        );
        let character = text.find(marker).expect("marker not found") as u32;

        hover(
            &document,
            lsp_types::Position::new(0, character),
            &FunctionSet::builtins(),
        )
        .map(|hover| match hover.contents {
            lsp_types::HoverContents::Markup(markup) => (markup.value, hover.range.unwrap()),
            other => panic!("Unexpected hover contents {:?}", other),
        })
    }

    fn range(start: u32, end: u32) -> lsp_types::Range {
        lsp_types::Range {
            start: lsp_types::Position::new(0, start),
            end: lsp_types::Position::new(0, end),
        }
    }

    #[test]
    fn loop_variable() {
        let text = "{{ range $i, $e := .Items }}{{ $e.Name }}{{ end }}";

        assert_eq!(
            Some((
                "`$e`: loop variable bound by enclosing range".to_owned(),
                range(31, 33)
            )),
            hover_at(text, "e.Name")
        );
        assert_eq!(
            Some(("field `Name` of `$e`".to_owned(), range(31, 38))),
            hover_at(text, "Name")
        );
    }

    #[test]
    fn field_of_dot() {
        let text = "{{ with .User }}{{ .Name }}{{ end }}";

        assert_eq!(
            Some((
                "field `Name` of `.` (value of enclosing with)".to_owned(),
                range(19, 24)
            )),
            hover_at(text, "Name }}")
        );
    }

    #[test]
    fn functions() {
        let (text, _) = hover_at("{{ printf \"%d\" 1 }}", "intf").unwrap();
        assert!(text.starts_with("function `printf`\n\n"));

        let (text, _) = hover_at("{{ upper . }}", "pper").unwrap();
        assert_eq!("unknown function `upper`", text);
    }

    #[test]
    fn template_names() {
        assert_eq!(
            Some(("executes template `nav`".to_owned(), range(12, 17))),
            hover_at("{{ template \"nav\" . }}", "nav")
        );
    }

    #[test]
    fn syntax_errors() {
        let (text, _) = hover_at("{{ end }}", "end").unwrap();
        assert_eq!("unexpected {{end}}", text);
    }

    #[test]
    fn nothing_on_text() {
        assert_eq!(None, hover_at("hello {{ . }}", "llo"));
    }
}
