use crate::config::Delimiters;
use crate::error::ErrorKind;
use crate::line_index::{Position, PositionTracker};
use crate::span::Span;
use crate::token::{Keyword, Operator, Token, TokenKind};

const COMMENT_OPEN: &str = "/*";
const COMMENT_CLOSE: &str = "*/";

#[derive(Debug, Clone, Copy)]
enum State {
    Text,
    Action {
        start: usize,
        start_position: Position,
        at_start: bool,
    },
    Done,
}

/// Lazy tokenizer for template source
///
/// The lexer never fails; malformed input produces [`TokenKind::Error`] tokens. It is cheap to
/// clone, and a clone restarts from the point it was cloned at.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    source: &'a str,
    delimiters: Delimiters,
    offset: usize,
    state: State,
    tracker: PositionTracker,
}

/// Tokenizes `source` using the default `{{`/`}}` delimiters
pub fn tokenize(source: &str) -> Lexer<'_> {
    Lexer::new(source, &Delimiters::default())
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, delimiters: &Delimiters) -> Lexer<'a> {
        Lexer {
            source,
            delimiters: delimiters.clone(),
            offset: 0,
            state: State::Text,
            tracker: PositionTracker::new(),
        }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    fn rest(&self) -> &'a str {
        &self.source[self.offset..]
    }

    fn token(&mut self, kind: TokenKind, start: usize, end: usize) -> Token<'a> {
        let start_position = self.tracker.advance_to(self.source, start);
        self.token_from(kind, start, start_position, end)
    }

    fn token_from(
        &mut self,
        kind: TokenKind,
        start: usize,
        start_position: Position,
        end: usize,
    ) -> Token<'a> {
        let end_position = self.tracker.advance_to(self.source, end);
        self.offset = end;

        Token {
            kind,
            span: Span::from_offsets(start, end),
            start: start_position,
            end: end_position,
            text: &self.source[start..end],
        }
    }

    fn lex_text(&mut self) -> Token<'a> {
        let start = self.offset;
        let rest = self.rest();

        if rest.is_empty() {
            self.state = State::Done;
            return self.token(TokenKind::Eof, start, start);
        }

        match rest.find(self.delimiters.open()) {
            Some(0) => self.lex_action_open(),
            Some(text_len) => self.token(TokenKind::Text, start, start + text_len),
            None => self.token(TokenKind::Text, start, self.source.len()),
        }
    }

    fn lex_action_open(&mut self) -> Token<'a> {
        let start = self.offset;
        let after_delim = &self.rest()[self.delimiters.open().len()..];

        // `{{-3}}` is a negative number while `{{- 3}}` trims the preceding text
        let trim = after_delim.starts_with('-') && after_delim[1..].starts_with(is_space);

        let end = start + self.delimiters.open().len() + if trim { 1 } else { 0 };
        let token = self.token(TokenKind::ActionOpen { trim }, start, end);

        self.state = State::Action {
            start,
            start_position: token.start,
            at_start: true,
        };

        token
    }

    fn unterminated(&mut self, start: usize, start_position: Position, kind: ErrorKind) -> Token<'a> {
        let end = self.offset;
        self.state = State::Text;
        self.token_from(TokenKind::Error(kind), start, start_position, end)
    }

    fn lex_action(&mut self, start: usize, start_position: Position, at_start: bool) -> Token<'a> {
        let before_space = self.offset;
        let rest = self.rest();
        self.offset += rest.len() - rest.trim_start_matches(is_space).len();
        let skipped_space = self.offset > before_space;

        let rest = self.rest();
        let token_start = self.offset;
        let close = self.delimiters.close();

        if skipped_space && rest.starts_with('-') && rest[1..].starts_with(close) {
            self.state = State::Text;
            return self.token(
                TokenKind::ActionClose { trim: true },
                token_start,
                token_start + 1 + close.len(),
            );
        }

        if rest.starts_with(close) {
            self.state = State::Text;
            return self.token(
                TokenKind::ActionClose { trim: false },
                token_start,
                token_start + close.len(),
            );
        }

        if rest.starts_with(self.delimiters.open()) {
            // Resume at the next action; everything since our open delimiter is unterminated
            return self.unterminated(start, start_position, ErrorKind::UnterminatedAction);
        }

        if at_start && rest.starts_with(COMMENT_OPEN) {
            return match rest.find(COMMENT_CLOSE) {
                Some(close_index) => {
                    self.state = State::Action {
                        start,
                        start_position,
                        at_start: false,
                    };
                    self.token(
                        TokenKind::Comment,
                        token_start,
                        token_start + close_index + COMMENT_CLOSE.len(),
                    )
                }
                None => {
                    self.offset = self.source.len();
                    self.unterminated(start, start_position, ErrorKind::UnclosedComment)
                }
            };
        }

        let mut chars = rest.chars();
        let c = match chars.next() {
            Some(c) => c,
            None => return self.unterminated(start, start_position, ErrorKind::UnterminatedAction),
        };
        let next_char = chars.next();

        let single = |kind| (kind, token_start + c.len_utf8());

        let (kind, end) = match c {
            '|' => single(TokenKind::Pipe),
            '(' => single(TokenKind::LeftParen),
            ')' => single(TokenKind::RightParen),
            ',' => single(TokenKind::Operator(Operator::Comma)),
            '=' => single(TokenKind::Operator(Operator::Assign)),
            ':' if next_char == Some('=') => {
                (TokenKind::Operator(Operator::Declare), token_start + 2)
            }
            '"' => self.scan_quoted(token_start),
            '`' => self.scan_raw(token_start),
            '\'' => self.scan_char(token_start),
            '$' => (
                TokenKind::Variable,
                self.scan_while(token_start + 1, is_identifier_char),
            ),
            '.' => match next_char {
                Some(n) if is_identifier_start(n) => (
                    TokenKind::Field,
                    self.scan_while(token_start + 1, is_identifier_char),
                ),
                Some(n) if n.is_ascii_digit() => (TokenKind::Number, self.scan_number(token_start)),
                _ => single(TokenKind::Dot),
            },
            '0'..='9' => (TokenKind::Number, self.scan_number(token_start)),
            '+' | '-' if next_char.map_or(false, |n| n.is_ascii_digit()) => {
                (TokenKind::Number, self.scan_number(token_start))
            }
            c if is_identifier_start(c) => {
                let end = self.scan_while(token_start, is_identifier_char);
                let kind = match Keyword::from_word(&self.source[token_start..end]) {
                    Some(keyword) => TokenKind::Keyword(keyword),
                    None => TokenKind::Identifier,
                };

                (kind, end)
            }
            other => single(TokenKind::Error(ErrorKind::UnexpectedChar(other))),
        };

        self.state = State::Action {
            start,
            start_position,
            at_start: false,
        };
        self.token(kind, token_start, end)
    }

    /// Returns the offset of the first char at or after `from` not matching `predicate`
    fn scan_while(&self, from: usize, predicate: impl Fn(char) -> bool) -> usize {
        self.source[from..]
            .find(|c| !predicate(c))
            .map(|i| from + i)
            .unwrap_or_else(|| self.source.len())
    }

    fn scan_number(&self, from: usize) -> usize {
        let mut previous = '\0';
        let mut end = self.source.len();

        for (i, c) in self.source[from..].char_indices() {
            let continues = if i == 0 {
                true
            } else if c == '+' || c == '-' {
                // Exponent signs such as `1e-3` or `0x1p+2`
                matches!(previous, 'e' | 'E' | 'p' | 'P')
            } else {
                c.is_ascii_alphanumeric() || c == '_' || c == '.'
            };

            if !continues {
                end = from + i;
                break;
            }
            previous = c;
        }

        end
    }

    fn scan_escaped(&self, from: usize, quote: char, error: ErrorKind) -> (TokenKind, usize) {
        let mut chars = self.source[from + 1..].char_indices();

        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, '\n')) | None => break,
                    Some(_) => {}
                },
                '\n' => return (TokenKind::Error(error), from + 1 + i),
                c if c == quote => {
                    let kind = if quote == '"' {
                        TokenKind::StringLiteral
                    } else {
                        TokenKind::Char
                    };
                    return (kind, from + 1 + i + 1);
                }
                _ => {}
            }
        }

        // Stop before a trailing newline so the error stays on the literal's line
        let end = self.source[from..]
            .find('\n')
            .map(|i| from + i)
            .unwrap_or_else(|| self.source.len());

        (TokenKind::Error(error), end)
    }

    fn scan_quoted(&self, from: usize) -> (TokenKind, usize) {
        self.scan_escaped(from, '"', ErrorKind::UnterminatedString)
    }

    fn scan_char(&self, from: usize) -> (TokenKind, usize) {
        self.scan_escaped(from, '\'', ErrorKind::UnterminatedChar)
    }

    fn scan_raw(&self, from: usize) -> (TokenKind, usize) {
        match self.source[from + 1..].find('`') {
            Some(i) => (TokenKind::StringLiteral, from + 1 + i + 1),
            None => (
                TokenKind::Error(ErrorKind::UnterminatedRawString),
                self.source.len(),
            ),
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        match self.state {
            State::Done => None,
            State::Text => Some(self.lex_text()),
            State::Action {
                start,
                start_position,
                at_start,
            } => Some(self.lex_action(start, start_position, at_start)),
        }
    }
}
