use std::sync::Arc;

use go_template_syntax::config::Config;
use go_template_syntax::diagnostic::Diagnostic;
use go_template_syntax::line_index::{LineIndex, Position};
use go_template_syntax::parser::{parse_str, Parse};
use go_template_syntax::span::Span;
use go_template_syntax::tree::Template;

use crate::model::StoreError;

/// Immutable snapshot of an open document at a fixed version
///
/// The snapshot carries the syntax diagnostics found while parsing. Checks that depend on the
/// configured function set run in the diagnostics watcher and are published separately.
#[derive(Debug)]
pub struct Document {
    uri: lsp_types::Url,
    version: i32,
    text: Arc<str>,
    line_index: LineIndex,
    parse: Parse,
}

fn to_lsp_position(position: Position) -> lsp_types::Position {
    lsp_types::Position {
        line: position.line,
        character: position.character,
    }
}

fn from_lsp_position(position: lsp_types::Position) -> Position {
    Position::new(position.line, position.character)
}

impl Document {
    pub fn new(uri: lsp_types::Url, version: i32, text: Arc<str>, config: &Config) -> Document {
        Document {
            line_index: LineIndex::new(&text),
            parse: parse_str(&text, config),
            uri,
            version,
            text,
        }
    }

    pub fn uri(&self) -> &lsp_types::Url {
        &self.uri
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn template(&self) -> &Template {
        &self.parse.template
    }

    /// Syntax errors and unterminated blocks in source order
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.parse.diagnostics
    }

    pub fn offset_to_position(&self, offset: u32) -> lsp_types::Position {
        to_lsp_position(self.line_index.position(&self.text, offset as usize))
    }

    /// Returns the byte offset for a position, clamping positions past the end of a line or text
    pub fn position_to_offset(&self, position: lsp_types::Position) -> u32 {
        self.line_index
            .offset(&self.text, from_lsp_position(position)) as u32
    }

    pub fn span_to_range(&self, span: Span) -> lsp_types::Range {
        lsp_types::Range {
            start: self.offset_to_position(span.start()),
            end: self.offset_to_position(span.end()),
        }
    }

    /// Applies content changes in order, returning the text of the next version
    ///
    /// Each range is resolved against the text produced by the changes before it.
    pub fn apply_changes(
        &self,
        changes: &[lsp_types::TextDocumentContentChangeEvent],
    ) -> Result<String, StoreError> {
        let mut text = self.text.to_string();
        let mut line_index = self.line_index.clone();

        for change in changes {
            match change.range {
                None => {
                    text = change.text.clone();
                }
                Some(range) => {
                    let resolve = |position: lsp_types::Position| {
                        line_index
                            .resolve(&text, from_lsp_position(position))
                            .ok_or_else(|| StoreError::InvalidEdit {
                                uri: self.uri.clone(),
                                range,
                            })
                    };

                    let start_offset = resolve(range.start)?;
                    let end_offset = resolve(range.end)?;

                    if end_offset < start_offset {
                        return Err(StoreError::InvalidEdit {
                            uri: self.uri.clone(),
                            range,
                        });
                    }

                    text.replace_range(start_offset..end_offset, &change.text);
                }
            }

            line_index = LineIndex::new(&text);
        }

        Ok(text)
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

    fn range_change(
        (start_line, start_character): (u32, u32),
        (end_line, end_character): (u32, u32),
        text: &str,
    ) -> lsp_types::TextDocumentContentChangeEvent {
        lsp_types::TextDocumentContentChangeEvent {
            range: Some(lsp_types::Range {
                start: lsp_types::Position::new(start_line, start_character),
                end: lsp_types::Position::new(end_line, end_character),
            }),
            range_length: None,
            text: text.to_owned(),
        }
    }

    #[test]
    fn test_append_to_empty() {
        let doc = document("");
        let text = doc
            .apply_changes(&[range_change((0, 0), (0, 0), "abc-123")])
            .unwrap();

        assert_eq!("abc-123", text);
    }

    #[test]
    fn test_append_to_line() {
        let doc = document("Hello");
        let text = doc
            .apply_changes(&[range_change((0, 5), (0, 5), ", world!")])
            .unwrap();

        assert_eq!("Hello, world!", text);
    }

    #[test]
    fn test_replace_line() {
        let doc = document("hello\nnebraska\n");
        let text = doc
            .apply_changes(&[range_change((1, 0), (1, 8), "world")])
            .unwrap();

        assert_eq!("hello\nworld\n", text);
    }

    #[test]
    fn test_delete_line() {
        let doc = document("hello\nentire\nworld\n");
        let text = doc
            .apply_changes(&[range_change((1, 0), (2, 0), "")])
            .unwrap();

        assert_eq!("hello\nworld\n", text);
    }

    #[test]
    fn test_delete_utf16() {
        let doc = document("Defuse 💣 me");
        let text = doc
            .apply_changes(&[range_change((0, 7), (0, 10), "")])
            .unwrap();

        assert_eq!("Defuse me", text);
    }

    #[test]
    fn sequential_changes() {
        let doc = document("{{ .A }}");
        let changes = [
            range_change((0, 3), (0, 5), ".Name"),
            range_change((0, 0), (0, 0), "x\n"),
            lsp_types::TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: "full".to_owned(),
            },
            range_change((0, 4), (0, 4), "!"),
        ];

        assert_eq!("full!", doc.apply_changes(&changes).unwrap());
        assert_eq!(
            "x\n{{ .Name }}",
            doc.apply_changes(&changes[..2]).unwrap()
        );
    }

    #[test]
    fn unresolvable_edits() {
        let doc = document("ab\ncd");

        assert!(matches!(
            doc.apply_changes(&[range_change((4, 0), (4, 0), "x")]),
            Err(StoreError::InvalidEdit { .. })
        ));
        assert!(matches!(
            doc.apply_changes(&[range_change((0, 9), (0, 9), "x")]),
            Err(StoreError::InvalidEdit { .. })
        ));
        assert!(matches!(
            doc.apply_changes(&[range_change((1, 1), (0, 1), "x")]),
            Err(StoreError::InvalidEdit { .. })
        ));
    }

    #[test]
    fn syntax_diagnostics() {
        assert!(document("{{ if .A }}x{{ end }}").diagnostics().is_empty());

        let doc = document("{{ if .A }}x");
        let codes: Vec<_> = doc.diagnostics().iter().map(|diagnostic| diagnostic.code).collect();
        assert_eq!(vec!["unterminated-block"], codes);

        // Unknown functions need the configured function set
        assert!(document("{{ frobnicate }}").diagnostics().is_empty());
    }

    #[test]
    fn positions() {
        let doc = document("ab\n{{ .X }}");

        assert_eq!(lsp_types::Position::new(1, 3), doc.offset_to_position(6));
        assert_eq!(6, doc.position_to_offset(lsp_types::Position::new(1, 3)));
        assert_eq!(
            lsp_types::Range {
                start: lsp_types::Position::new(1, 0),
                end: lsp_types::Position::new(1, 8),
            },
            doc.span_to_range(Span::new(3, 11))
        );
    }
}
