use std::error;
use std::fmt;
use std::fmt::Display;
use std::result;

use crate::span::Span;
use crate::token::Keyword;

/// (Spanned)[`Span`] syntax error
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    span: Span,
    pub(crate) kind: ErrorKind,
}

impl Error {
    pub fn new(span: Span, kind: ErrorKind) -> Error {
        Error { span, kind }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn span(&self) -> Span {
        self.span
    }
}

impl error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind().message())
    }
}

/// Syntax error without (span)[`Span`] information
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    // Lexical errors
    UnterminatedAction,
    UnterminatedString,
    UnterminatedRawString,
    UnterminatedChar,
    UnclosedComment,
    UnexpectedChar(char),

    // Structural errors
    EmptyAction,
    UnmatchedEnd,
    UnexpectedElse,
    MissingCondition(Keyword),
    MissingName(Keyword),
    UnexpectedOperand(Keyword),
    UnexpectedKeyword(Keyword),
    UnexpectedToken(Box<str>),
    EmptyCommand,
    MissingPipeline,
    UnclosedParen,
    TooManyVariables(Option<Keyword>),
    NestedDefine,
    BreakOutsideRange,
    ContinueOutsideRange,
    ExpressionTooDeep,
    NestingTooDeep(usize),
}

impl ErrorKind {
    /// Returns a string describing the error
    pub fn message(&self) -> String {
        match self {
            ErrorKind::UnterminatedAction => "unterminated action".to_owned(),
            ErrorKind::UnterminatedString => "unterminated quoted string".to_owned(),
            ErrorKind::UnterminatedRawString => "unterminated raw quoted string".to_owned(),
            ErrorKind::UnterminatedChar => "unterminated character constant".to_owned(),
            ErrorKind::UnclosedComment => "unclosed comment".to_owned(),
            ErrorKind::UnexpectedChar(c) => format!("unexpected `{}` in action", c.escape_debug()),
            ErrorKind::EmptyAction => "missing value for command".to_owned(),
            ErrorKind::UnmatchedEnd => "unexpected {{end}}".to_owned(),
            ErrorKind::UnexpectedElse => "unexpected {{else}}".to_owned(),
            ErrorKind::MissingCondition(keyword) => {
                format!("missing value for `{}`", keyword.as_str())
            }
            ErrorKind::MissingName(keyword) => {
                format!("expected a quoted template name after `{}`", keyword.as_str())
            }
            ErrorKind::UnexpectedOperand(keyword) => {
                format!("unexpected operand after `{}`", keyword.as_str())
            }
            ErrorKind::UnexpectedKeyword(keyword) => {
                format!("unexpected `{}` in operand", keyword.as_str())
            }
            ErrorKind::UnexpectedToken(text) => format!("unexpected `{}` in operand", text),
            ErrorKind::EmptyCommand => "missing command in pipeline".to_owned(),
            ErrorKind::MissingPipeline => "missing pipeline after variable declaration".to_owned(),
            ErrorKind::UnclosedParen => "unclosed left paren".to_owned(),
            ErrorKind::TooManyVariables(Some(Keyword::Range)) => {
                "too many variables in range; at most two are allowed".to_owned()
            }
            ErrorKind::TooManyVariables(Some(keyword)) => {
                format!("too many variables in `{}` declaration", keyword.as_str())
            }
            ErrorKind::TooManyVariables(None) => "too many variables in declaration".to_owned(),
            ErrorKind::NestedDefine => "`define` is only allowed at the top level".to_owned(),
            ErrorKind::BreakOutsideRange => "{{break}} outside {{range}}".to_owned(),
            ErrorKind::ContinueOutsideRange => "{{continue}} outside {{range}}".to_owned(),
            ErrorKind::ExpressionTooDeep => "expression is nested too deeply".to_owned(),
            ErrorKind::NestingTooDeep(max) => {
                format!("actions are nested deeper than {} levels; parsing stopped", max)
            }
        }
    }

    /// Returns a stable identifier for the error reported as the diagnostic code
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::UnterminatedAction => "unterminated-action",
            ErrorKind::UnterminatedString
            | ErrorKind::UnterminatedRawString
            | ErrorKind::UnterminatedChar => "unterminated-literal",
            ErrorKind::UnclosedComment => "unclosed-comment",
            ErrorKind::UnexpectedChar(_) => "unexpected-char",
            ErrorKind::EmptyAction => "empty-action",
            ErrorKind::UnmatchedEnd => "unmatched-end",
            ErrorKind::UnexpectedElse => "unexpected-else",
            ErrorKind::MissingCondition(_) => "missing-condition",
            ErrorKind::MissingName(_) => "missing-name",
            ErrorKind::UnexpectedOperand(_) => "unexpected-operand",
            ErrorKind::UnexpectedKeyword(_) => "unexpected-keyword",
            ErrorKind::UnexpectedToken(_) => "unexpected-token",
            ErrorKind::EmptyCommand => "empty-command",
            ErrorKind::MissingPipeline => "missing-pipeline",
            ErrorKind::UnclosedParen => "unclosed-paren",
            ErrorKind::TooManyVariables(_) => "too-many-variables",
            ErrorKind::NestedDefine => "nested-define",
            ErrorKind::BreakOutsideRange | ErrorKind::ContinueOutsideRange => "loop-control-outside-range",
            ErrorKind::ExpressionTooDeep | ErrorKind::NestingTooDeep(_) => "nesting-too-deep",
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
