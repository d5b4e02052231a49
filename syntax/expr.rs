use std::sync::Arc;

use crate::span::Span;

pub type DataStr = Arc<str>;

/// Spanned name such as a variable, field, function or template name
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Ident {
    pub span: Span,
    pub name: DataStr,
}

impl Ident {
    pub fn new(span: Span, name: &str) -> Ident {
        Ident {
            span,
            name: name.into(),
        }
    }
}

#[derive(PartialEq, Debug, Clone)]
pub enum Literal {
    /// Unquoted string contents
    Str(DataStr),
    /// Character constant as written, including quotes
    Char(DataStr),
    /// Number as written
    Number(DataStr),
    Bool(bool),
    Nil,
}

impl Literal {
    pub fn description(&self) -> &'static str {
        match self {
            Literal::Str(_) => "string",
            Literal::Char(_) => "character constant",
            Literal::Number(_) => "number",
            Literal::Bool(true) => "boolean true",
            Literal::Bool(false) => "boolean false",
            Literal::Nil => "nil",
        }
    }
}

#[derive(PartialEq, Debug, Clone)]
pub enum Expr {
    /// The current context `.`
    ///
    /// The span is empty when the dot is implied by a field access such as `.Name`.
    Dot(Span),
    /// `$` or `$name`; the name includes the `$`
    VariableRef(Ident),
    FieldAccess {
        span: Span,
        base: Box<Expr>,
        field: Ident,
    },
    FunctionCall {
        span: Span,
        name: Ident,
        args: Vec<Expr>,
    },
    /// Command whose head is not a function name, e.g. `.Method arg`
    MethodCall {
        span: Span,
        receiver: Box<Expr>,
        args: Vec<Expr>,
    },
    Pipeline {
        span: Span,
        stages: Vec<Expr>,
    },
    Literal {
        span: Span,
        value: Literal,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Dot(span)
            | Expr::FieldAccess { span, .. }
            | Expr::FunctionCall { span, .. }
            | Expr::MethodCall { span, .. }
            | Expr::Pipeline { span, .. }
            | Expr::Literal { span, .. } => *span,
            Expr::VariableRef(ident) => ident.span,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Expr::Dot(_) => "current context",
            Expr::VariableRef(_) => "variable",
            Expr::FieldAccess { .. } => "field access",
            Expr::FunctionCall { .. } => "function call",
            Expr::MethodCall { .. } => "method call",
            Expr::Pipeline { .. } => "pipeline",
            Expr::Literal { value, .. } => value.description(),
        }
    }

    /// Iterates over the direct subexpressions in source order
    pub fn children(&self) -> impl Iterator<Item = &Expr> {
        let (head, rest): (Option<&Expr>, &[Expr]) = match self {
            Expr::Dot(_) | Expr::VariableRef(_) | Expr::Literal { .. } => (None, &[][..]),
            Expr::FieldAccess { base, .. } => (Some(&**base), &[][..]),
            Expr::FunctionCall { args, .. } => (None, &args[..]),
            Expr::MethodCall { receiver, args, .. } => (Some(&**receiver), &args[..]),
            Expr::Pipeline { stages, .. } => (None, &stages[..]),
        };

        head.into_iter().chain(rest.iter())
    }

    /// Returns the innermost base of a chain of field accesses
    pub fn field_root(&self) -> &Expr {
        let mut current = self;
        while let Expr::FieldAccess { base, .. } = current {
            current = base;
        }
        current
    }

    /// Iterates over this expression and all subexpressions in pre-order
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a Expr>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Expr;

    fn next(&mut self) -> Option<&'a Expr> {
        let expr = self.stack.pop()?;

        let before = self.stack.len();
        self.stack.extend(expr.children());
        // Children were pushed in source order; visit the first one next
        self.stack[before..].reverse();

        Some(expr)
    }
}
