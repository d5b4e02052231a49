use std::collections::HashSet;

use lsp_types::{CompletionItem, CompletionItemKind, CompletionResponse, Documentation};

use go_template_syntax::config::{Config, Delimiters};
use go_template_syntax::error::ErrorKind;
use go_template_syntax::scope::{action_at, bindings_at, dot_at};
use go_template_syntax::tree::{ActionKind, Node};

use crate::handler::SyncRequestHandler;
use crate::model::{Document, StoreError};
use crate::session::State;

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '.'
}

/// Returns the partially typed variable, field or function name ending at `offset`
fn word_before(text: &str, offset: u32) -> &str {
    let before = &text[..offset as usize];
    let start = before
        .char_indices()
        .rev()
        .find(|(_, c)| !is_word_char(*c))
        .map_or(0, |(index, c)| index + c.len_utf8());

    &before[start..]
}

/// Returns true if `offset` is between the delimiters of an action that holds a pipeline
fn in_pipeline(node: &Node, offset: u32, delimiters: &Delimiters) -> bool {
    let span = node.span();
    let after_open = offset >= span.start() + delimiters.open().len() as u32;
    let before_close = offset + delimiters.close().len() as u32 <= span.end();

    match node {
        Node::Text(_) => false,
        Node::Action(action) => action.kind != ActionKind::Comment && after_open && before_close,
        Node::Error(error) => match error.error.kind() {
            ErrorKind::UnclosedComment => false,
            ErrorKind::UnterminatedAction => after_open,
            _ => after_open && before_close,
        },
    }
}

pub fn completion_items(
    document: &Document,
    position: lsp_types::Position,
    config: &Config,
) -> Vec<CompletionItem> {
    let template = document.template();
    let offset = document.position_to_offset(position);

    match action_at(template, offset) {
        Some(node) if in_pipeline(node, offset, &config.delimiters) => {}
        _ => return vec![],
    }

    let word = word_before(document.text(), offset);
    if word.get(1..).map_or(false, |rest| rest.contains('.')) {
        // Fields depend on the data passed at execution time
        return vec![];
    }

    let wants_dot = !word.starts_with('$');
    let wants_variables = !word.starts_with('.');
    let wants_functions = wants_dot && wants_variables;

    let mut items = vec![];

    if wants_dot {
        items.push(CompletionItem {
            label: ".".to_owned(),
            kind: Some(CompletionItemKind::VARIABLE),
            detail: Some(dot_at(template, offset).description()),
            sort_text: Some("0".to_owned()),
            ..Default::default()
        });
    }

    if wants_variables {
        let mut seen = HashSet::new();

        // Inner bindings shadow outer bindings with the same name
        let bindings = bindings_at(template, offset)
            .into_iter()
            .filter(|binding| seen.insert(binding.name.clone()));

        items.extend(bindings.enumerate().map(|(index, binding)| CompletionItem {
            label: binding.name.to_string(),
            kind: Some(CompletionItemKind::VARIABLE),
            detail: Some(binding.source.description().to_owned()),
            sort_text: Some(format!("1{:04}", index)),
            ..Default::default()
        }));
    }

    if wants_functions {
        items.extend(config.functions.iter().map(|(name, doc)| CompletionItem {
            label: name.to_owned(),
            kind: Some(CompletionItemKind::FUNCTION),
            detail: Some("function".to_owned()),
            documentation: doc.map(|doc| Documentation::String(doc.to_owned())),
            sort_text: Some(format!("2{}", name)),
            ..Default::default()
        }));
    }

    items
}

pub struct CompletionHandler;

impl SyncRequestHandler for CompletionHandler {
    type Request = lsp_types::request::Completion;

    fn handle(
        state: &State,
        params: lsp_types::CompletionParams,
    ) -> Result<Option<CompletionResponse>, StoreError> {
        let position_params = params.text_document_position;
        let document = state.documents.get(&position_params.text_document.uri)?;

        let items = completion_items(&document, position_params.position, &state.config.syntax);
        if items.is_empty() {
            Ok(None)
        } else {
            Ok(Some(CompletionResponse::Array(items)))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn document(text: &str) -> Document {
        Document::new(
            lsp_types::Url::parse("file:///test.tmpl").unwrap(),
            1,
            text.into(),
            &Config::default(),
        )
    }

    fn labels_at(text: &str, character: u32) -> Vec<String> {
        completion_items(
            &document(text),
            lsp_types::Position::new(0, character),
            &Config::default(),
        )
        .into_iter()
        .map(|item| item.label)
        .collect()
    }

    #[test]
    fn range_dot_is_loop_variable() {
        let items = completion_items(
            &document("{{ range .Items }}{{ . }}{{end}}"),
            lsp_types::Position::new(0, 21),
            &Config::default(),
        );

        let dot = items.iter().find(|item| item.label == ".").unwrap();
        assert_eq!(
            Some("loop variable bound by enclosing range"),
            dot.detail.as_deref()
        );

        assert!(items.iter().any(|item| item.label == "$"));
        assert!(items.iter().any(|item| item.label == "printf"));
    }

    #[test]
    fn variables_innermost_first() {
        let text = "{{ $x := 1 }}{{ range $i, $x := .L }}{{ $ }}{{ end }}";
        let character = text.find("$ }}").unwrap() as u32 + 1;

        assert_eq!(vec!["$x", "$i", "$"], labels_at(text, character));
    }

    #[test]
    fn nothing_in_text_or_comments() {
        assert!(labels_at("abc{{ . }}", 1).is_empty());
        assert!(labels_at("{{/* note */}}", 5).is_empty());
        // Directly before the open delimiter
        assert!(labels_at("abc{{ . }}", 3).is_empty());
    }

    #[test]
    fn nothing_for_fields() {
        assert!(labels_at("{{ .Items.Na }}", 12).is_empty());
        assert!(labels_at("{{ $x.Na }}", 8).is_empty());
    }

    #[test]
    fn unterminated_action_at_end() {
        let text = "{{ if .A }}{{ ";
        let labels = labels_at(text, text.len() as u32);

        assert!(labels.contains(&".".to_owned()));
        assert!(labels.contains(&"len".to_owned()));
    }

    #[test]
    fn custom_functions() {
        let mut config = Config::default();
        config.functions.insert("include");

        let items = completion_items(
            &document("{{ inc }}"),
            lsp_types::Position::new(0, 6),
            &config,
        );

        let include = items.iter().find(|item| item.label == "include").unwrap();
        assert_eq!(Some(CompletionItemKind::FUNCTION), include.kind);
        assert_eq!(None, include.documentation);
    }
}
