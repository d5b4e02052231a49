use go_template_syntax::expr::Expr;
use go_template_syntax::scope::{action_at, bindings_at, expr_at};
use go_template_syntax::span::Span;
use go_template_syntax::tree::{ActionKind, Node, Template};

use crate::handler::SyncRequestHandler;
use crate::model::{Document, StoreError};
use crate::session::State;

/// Returns the span of the `define` or `block` introducing a template name
fn template_definition(template: &Template, name: &str) -> Option<Span> {
    template.nodes().find_map(|node| match node {
        Node::Action(action) if matches!(action.kind, ActionKind::Define | ActionKind::Block) => {
            action
                .name
                .as_ref()
                .filter(|ident| &*ident.name == name)
                .map(|ident| ident.span)
        }
        _ => None,
    })
}

fn definition_span(template: &Template, offset: u32) -> Option<Span> {
    let action = action_at(template, offset)?.as_action()?;

    if let Some(name) = action
        .name
        .as_ref()
        .filter(|name| name.span.touches_offset(offset))
    {
        return template_definition(template, &name.name);
    }

    match expr_at(action, offset)? {
        Expr::VariableRef(ident) => bindings_at(template, offset)
            .into_iter()
            .find(|binding| binding.name == ident.name)
            .and_then(|binding| binding.span),
        _ => None,
    }
}

/// Returns the declaration of the template name or variable at `position`
pub fn definition(document: &Document, position: lsp_types::Position) -> Option<lsp_types::Location> {
    let offset = document.position_to_offset(position);
    let span = definition_span(document.template(), offset)?;

    Some(lsp_types::Location {
        uri: document.uri().clone(),
        range: document.span_to_range(span),
    })
}

pub struct DefinitionHandler;

impl SyncRequestHandler for DefinitionHandler {
    type Request = lsp_types::request::GotoDefinition;

    fn handle(
        state: &State,
        params: lsp_types::GotoDefinitionParams,
    ) -> Result<Option<lsp_types::GotoDefinitionResponse>, StoreError> {
        let position_params = params.text_document_position_params;
        let document = state.documents.get(&position_params.text_document.uri)?;

        Ok(definition(&document, position_params.position).map(lsp_types::GotoDefinitionResponse::Scalar))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use go_template_syntax::config::Config;

    fn definition_at(text: &str, marker: &str) -> Option<(u32, u32)> {
        let document = Document::new(
            lsp_types::Url::parse("file:///test.tmpl").unwrap(),
            1,
            text.into(),
            &Config::default(),
        );
        let character = text.rfind(marker).expect("marker not found") as u32;

        definition(&document, lsp_types::Position::new(0, character)).map(|location| {
            assert_eq!(document.uri(), &location.uri);
            (location.range.start.character, location.range.end.character)
        })
    }

    #[test]
    fn template_to_define() {
        let text = r#"{{ define "row" }}x{{ end }}{{ template "row" . }}"#;
        assert_eq!(Some((10, 15)), definition_at(text, "row"));

        let text = r#"{{ block "nav" . }}x{{ end }}{{ template "nav" . }}"#;
        assert_eq!(Some((9, 14)), definition_at(text, "nav"));

        assert_eq!(None, definition_at(r#"{{ template "missing" . }}"#, "missing"));
    }

    #[test]
    fn variable_to_declaration() {
        let text = "{{ $title := .Title }}{{ range $i, $e := .L }}{{ $title }}{{ $e }}{{ end }}";

        assert_eq!(Some((3, 9)), definition_at(text, "$title"));
        assert_eq!(Some((35, 37)), definition_at(text, "$e"));
    }

    #[test]
    fn nothing_for_dot_or_root() {
        assert_eq!(None, definition_at("{{ . }}", "."));
        assert_eq!(None, definition_at("{{ $ }}", "$"));
        assert_eq!(None, definition_at("{{ $undefined }}", "$undefined"));
    }
}
