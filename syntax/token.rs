use crate::error::ErrorKind;
use crate::line_index::Position;
use crate::span::Span;

/// Reserved word of the action language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Keyword {
    If,
    Else,
    End,
    Range,
    With,
    Block,
    Define,
    Template,
    Break,
    Continue,
    True,
    False,
    Nil,
}

impl Keyword {
    pub const ALL: [Keyword; 13] = [
        Keyword::If,
        Keyword::Else,
        Keyword::End,
        Keyword::Range,
        Keyword::With,
        Keyword::Block,
        Keyword::Define,
        Keyword::Template,
        Keyword::Break,
        Keyword::Continue,
        Keyword::True,
        Keyword::False,
        Keyword::Nil,
    ];

    pub fn from_word(word: &str) -> Option<Keyword> {
        Keyword::ALL
            .iter()
            .copied()
            .find(|keyword| keyword.as_str() == word)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::End => "end",
            Keyword::Range => "range",
            Keyword::With => "with",
            Keyword::Block => "block",
            Keyword::Define => "define",
            Keyword::Template => "template",
            Keyword::Break => "break",
            Keyword::Continue => "continue",
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::Nil => "nil",
        }
    }

    /// Returns true if the keyword may only appear as the first word of an action
    pub fn is_control(self) -> bool {
        !matches!(self, Keyword::True | Keyword::False | Keyword::Nil)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `:=`
    Declare,
    /// `=`
    Assign,
    /// `,`
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Literal text outside of any action
    Text,
    /// Opening delimiter, `trim` is set for `{{- `
    ActionOpen { trim: bool },
    /// Closing delimiter, `trim` is set for ` -}}`
    ActionClose { trim: bool },
    /// `/* ... */` occupying a whole action
    Comment,
    Identifier,
    Keyword(Keyword),
    Operator(Operator),
    /// Double quoted or raw backquoted string
    StringLiteral,
    Char,
    Number,
    /// `$` or `$name`
    Variable,
    /// `.Name`
    Field,
    /// A lone `.`
    Dot,
    Pipe,
    LeftParen,
    RightParen,
    Error(ErrorKind),
    Eof,
}

impl TokenKind {
    /// Returns true if the lexer returns to literal text after this token
    ///
    /// This is the case for closing delimiters and for an unterminated action.
    pub fn ends_action(&self) -> bool {
        matches!(
            self,
            TokenKind::ActionClose { .. }
                | TokenKind::Error(ErrorKind::UnterminatedAction)
                | TokenKind::Error(ErrorKind::UnclosedComment)
                | TokenKind::Eof
        )
    }
}

/// Lexical token borrowing from its source
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub span: Span,
    pub start: Position,
    pub end: Position,
    pub text: &'a str,
}

impl<'a> Token<'a> {
    /// Returns true if `next` starts exactly where this token ends
    pub fn is_adjacent_to(&self, next: &Token<'_>) -> bool {
        self.span.end() == next.span.start()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keyword_words() {
        for keyword in Keyword::ALL.iter().copied() {
            assert_eq!(Some(keyword), Keyword::from_word(keyword.as_str()));
        }

        assert_eq!(None, Keyword::from_word("elif"));
        assert_eq!(None, Keyword::from_word("If"));
    }
}
