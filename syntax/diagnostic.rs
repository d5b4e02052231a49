use std::cmp::Reverse;

use crate::error::Error;
use crate::span::Span;

/// Diagnostic severity ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Information,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub span: Span,
    pub message: String,
    pub code: &'static str,
}

impl Diagnostic {
    pub fn new(severity: Severity, span: Span, message: String, code: &'static str) -> Diagnostic {
        Diagnostic {
            severity,
            span,
            message,
            code,
        }
    }

    pub fn error(span: Span, message: String, code: &'static str) -> Diagnostic {
        Diagnostic::new(Severity::Error, span, message, code)
    }

    pub fn warning(span: Span, message: String, code: &'static str) -> Diagnostic {
        Diagnostic::new(Severity::Warning, span, message, code)
    }

    pub fn information(span: Span, message: String, code: &'static str) -> Diagnostic {
        Diagnostic::new(Severity::Information, span, message, code)
    }
}

impl From<&Error> for Diagnostic {
    fn from(error: &Error) -> Diagnostic {
        Diagnostic::error(error.span(), error.kind().message(), error.kind().code())
    }
}

/// Sorts diagnostics by start offset and then by descending severity
///
/// Remaining ties are broken on the end offset, message and code so the order is total.
pub fn sort_diagnostics(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by(|a, b| {
        (a.span.start(), Reverse(a.severity), a.span.end(), &a.message, a.code).cmp(&(
            b.span.start(),
            Reverse(b.severity),
            b.span.end(),
            &b.message,
            b.code,
        ))
    });
}
