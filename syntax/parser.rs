use crate::analyze;
use crate::config::Config;
use crate::diagnostic::Diagnostic;
use crate::error::{Error, ErrorKind, Result};
use crate::expr::{Expr, Ident, Literal};
use crate::lexer::Lexer;
use crate::span::Span;
use crate::token::{Keyword, Operator, Token, TokenKind};
use crate::tree::{
    ActionKind, ActionNode, BindingKind, Bindings, ErrorNode, Node, Template, TextNode,
};

/// Maximum depth of parenthesised pipelines inside one action
const MAX_EXPRESSION_DEPTH: usize = 100;

/// Result of parsing a template
#[derive(Debug)]
pub struct Parse {
    pub template: Template,
    /// Syntax errors and unterminated blocks in source order
    pub diagnostics: Vec<Diagnostic>,
}

/// Parses a template source using the delimiters and limits from `config`
pub fn parse_str(source: &str, config: &Config) -> Parse {
    parse(Lexer::new(source, &config.delimiters), config)
}

/// Parses a token stream into a template
///
/// Parsing never fails. Malformed actions are replaced with [`ErrorNode`]s and reported in the
/// returned diagnostics.
pub fn parse<'a>(tokens: impl IntoIterator<Item = Token<'a>>, config: &Config) -> Parse {
    let template = TreeBuilder::new(config).build(tokens.into_iter());
    let diagnostics = analyze::structural(&template);

    Parse {
        template,
        diagnostics,
    }
}

/// Tokens of a single action from its open delimiter to its close
struct RawAction<'a> {
    open: Token<'a>,
    body: Vec<Token<'a>>,
    /// Close delimiter or the error token ending an unterminated action
    close: Option<Token<'a>>,
}

impl<'a> RawAction<'a> {
    fn collect<I>(open: Token<'a>, tokens: &mut I) -> RawAction<'a>
    where
        I: Iterator<Item = Token<'a>>,
    {
        let mut body = vec![];

        for token in tokens {
            if token.kind.ends_action() {
                return RawAction {
                    open,
                    body,
                    close: Some(token),
                };
            }
            body.push(token);
        }

        RawAction {
            open,
            body,
            close: None,
        }
    }

    fn span(&self) -> Span {
        match self.close.as_ref().or_else(|| self.body.last()) {
            Some(last) => self.open.span.cover(last.span),
            None => self.open.span,
        }
    }

    fn trim_left(&self) -> bool {
        matches!(self.open.kind, TokenKind::ActionOpen { trim: true })
    }

    fn trim_right(&self) -> bool {
        matches!(
            self.close,
            Some(Token {
                kind: TokenKind::ActionClose { trim: true },
                ..
            })
        )
    }

    /// Returns the first lexical error, preferring an unterminated action over errors inside it
    fn lex_error(&self) -> Option<Error> {
        let span = self.span();

        match &self.close {
            None
            | Some(Token {
                kind: TokenKind::Eof,
                ..
            }) => return Some(Error::new(span, ErrorKind::UnterminatedAction)),
            Some(Token {
                kind: TokenKind::Error(kind),
                span,
                ..
            }) => return Some(Error::new(*span, kind.clone())),
            Some(_) => {}
        }

        self.body.iter().find_map(|token| match &token.kind {
            TokenKind::Error(kind) => Some(Error::new(token.span, kind.clone())),
            _ => None,
        })
    }

    fn classify(&self) -> (ActionKind, Option<Keyword>) {
        match self.body.first().map(|token| &token.kind) {
            Some(TokenKind::Comment) => (ActionKind::Comment, None),
            Some(TokenKind::Keyword(keyword)) => match ActionKind::from_keyword(*keyword) {
                Some(kind) => (kind, Some(*keyword)),
                None => (ActionKind::Output, None),
            },
            _ => (ActionKind::Output, None),
        }
    }

    /// Returns the keyword chained after a leading `else`
    fn chained(&self) -> Option<Keyword> {
        match self.body.get(1).map(|token| &token.kind) {
            Some(TokenKind::Keyword(keyword @ (Keyword::If | Keyword::With))) => Some(*keyword),
            _ => None,
        }
    }
}

/// Role of an open node on the parser's stack
#[derive(Debug, Clone, Copy, PartialEq)]
enum Frame {
    Block { kind: ActionKind, malformed: bool },
    Else { chained: bool },
}

fn frame_of(node: &Node) -> Option<Frame> {
    match node {
        Node::Action(action) if action.kind.opens_block() => Some(Frame::Block {
            kind: action.kind,
            malformed: false,
        }),
        Node::Action(action) if action.kind == ActionKind::Else => Some(Frame::Else {
            chained: action.chained.is_some(),
        }),
        Node::Error(error) => match error.keyword.and_then(ActionKind::from_keyword) {
            // A malformed else is closed by whatever follows it
            Some(ActionKind::Else) => Some(Frame::Else { chained: true }),
            Some(kind) if kind.opens_block() => Some(Frame::Block {
                kind,
                malformed: true,
            }),
            _ => None,
        },
        _ => None,
    }
}

fn node_or_error(action: Result<ActionNode>, span: Span, keyword: Option<Keyword>) -> Node {
    match action {
        Ok(action) => Node::Action(action),
        Err(error) => Node::Error(ErrorNode::new(error, span, keyword)),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    Truncate,
}

/// Builds a tree from actions using an explicit stack of open blocks
struct TreeBuilder<'c> {
    config: &'c Config,
    root: Vec<Node>,
    /// Open blocks and `else` branches, innermost last
    stack: Vec<Node>,
    block_depth: usize,
    truncated: Option<Span>,
}

impl<'c> TreeBuilder<'c> {
    fn new(config: &'c Config) -> TreeBuilder<'c> {
        TreeBuilder {
            config,
            root: vec![],
            stack: vec![],
            block_depth: 0,
            truncated: None,
        }
    }

    fn build<'a>(mut self, mut tokens: impl Iterator<Item = Token<'a>>) -> Template {
        let mut end: u32 = 0;

        while let Some(token) = tokens.next() {
            end = end.max(token.span.end());

            match token.kind {
                TokenKind::Text => self.push(Node::Text(TextNode {
                    span: token.span,
                    content: token.text.into(),
                })),
                TokenKind::ActionOpen { .. } => {
                    let action = RawAction::collect(token, &mut tokens);
                    let span = action.span();
                    end = end.max(span.end());

                    if self.action(action) == Step::Truncate {
                        let eof = tokens.by_ref().map(|token| token.span.end()).fold(end, u32::max);
                        self.truncate(span, eof);
                        end = eof;
                        break;
                    }
                }
                TokenKind::Eof => break,
                _ => {
                    let error = Error::new(token.span, ErrorKind::UnexpectedToken(token.text.into()));
                    self.push(Node::Error(ErrorNode::new(error, token.span, None)));
                }
            }
        }

        while !self.stack.is_empty() {
            self.close_frame();
        }

        Template {
            nodes: self.root,
            span: Span::new(0, end),
            truncated: self.truncated,
        }
    }

    fn push(&mut self, node: Node) {
        let siblings = match self.stack.last_mut().and_then(Node::children_mut) {
            Some(children) => children,
            None => &mut self.root,
        };

        siblings.push(node);
    }

    fn top_frame(&self) -> Option<Frame> {
        self.stack.last().and_then(frame_of)
    }

    fn open_frame(&mut self, node: Node) {
        if let Some(Frame::Block { .. }) = frame_of(&node) {
            self.block_depth += 1;
        }
        self.stack.push(node);
    }

    fn close_frame(&mut self) {
        let mut node = match self.stack.pop() {
            Some(node) => node,
            None => return,
        };

        if let Some(Frame::Block { .. }) = frame_of(&node) {
            self.block_depth -= 1;
        }

        let extent = match node.children().last() {
            Some(last) => node.span().cover(last.extent()),
            None => node.span(),
        };
        node.set_extent(extent);

        self.push(node);
    }

    fn action(&mut self, raw: RawAction<'_>) -> Step {
        let span = raw.span();
        let (kind, keyword) = raw.classify();

        let action = match raw.lex_error() {
            Some(error) => Err(error),
            None => ActionParser::new(&raw.body, span).header(kind),
        };

        let action = action.map(|mut action| {
            action.trim_left = raw.trim_left();
            action.trim_right = raw.trim_right();
            action
        });

        match kind {
            ActionKind::If
            | ActionKind::Range
            | ActionKind::With
            | ActionKind::Block
            | ActionKind::Define => return self.open_block(kind, keyword, span, action),
            ActionKind::Else => self.else_branch(raw.chained(), span, action),
            ActionKind::End => self.end(span, action),
            ActionKind::Break | ActionKind::Continue => self.loop_control(kind, span, action),
            ActionKind::Output | ActionKind::Template | ActionKind::Comment => {
                self.push(node_or_error(action, span, None))
            }
        }

        Step::Continue
    }

    fn open_block(
        &mut self,
        kind: ActionKind,
        keyword: Option<Keyword>,
        span: Span,
        action: Result<ActionNode>,
    ) -> Step {
        if let Some(max_depth) = self.config.max_nesting_depth {
            if self.block_depth >= max_depth {
                return Step::Truncate;
            }
        }

        let action = if kind == ActionKind::Define && !self.stack.is_empty() {
            Err(Error::new(span, ErrorKind::NestedDefine))
        } else {
            action
        };

        self.open_frame(node_or_error(action, span, keyword));
        Step::Continue
    }

    fn else_branch(&mut self, chained: Option<Keyword>, span: Span, action: Result<ActionNode>) {
        // Each chained branch ends where the next branch starts
        if let Some(Frame::Else { chained: true }) = self.top_frame() {
            self.close_frame();
        }

        let accepted = match self.top_frame() {
            Some(Frame::Block {
                malformed: true, ..
            }) => true,
            Some(Frame::Block { kind, .. }) => match (kind, chained) {
                (ActionKind::If, None | Some(Keyword::If)) => true,
                (ActionKind::With, None | Some(Keyword::With)) => true,
                (ActionKind::Range, None) => true,
                _ => false,
            },
            Some(Frame::Else { .. }) | None => false,
        };

        if accepted {
            self.open_frame(node_or_error(action, span, Some(Keyword::Else)));
        } else {
            let error = Error::new(span, ErrorKind::UnexpectedElse);
            self.push(Node::Error(ErrorNode::new(error, span, None)));
        }
    }

    fn end(&mut self, span: Span, action: Result<ActionNode>) {
        if let Some(Frame::Else { .. }) = self.top_frame() {
            self.close_frame();
        }

        if let Some(Frame::Block { .. }) = self.top_frame() {
            self.push(node_or_error(action, span, Some(Keyword::End)));
            self.close_frame();
        } else {
            let error = Error::new(span, ErrorKind::UnmatchedEnd);
            self.push(Node::Error(ErrorNode::new(error, span, None)));
        }
    }

    /// Returns true if `break` and `continue` would apply to an enclosing `range`
    fn in_range_body(&self) -> bool {
        for (index, node) in self.stack.iter().enumerate().rev() {
            match frame_of(node) {
                Some(Frame::Block {
                    kind: ActionKind::Range,
                    ..
                }) => {
                    let in_else = matches!(
                        self.stack.get(index + 1).and_then(frame_of),
                        Some(Frame::Else { .. })
                    );

                    if !in_else {
                        return true;
                    }
                }
                // Templates have their own loop context
                Some(Frame::Block {
                    kind: ActionKind::Block | ActionKind::Define,
                    ..
                }) => return false,
                _ => {}
            }
        }

        false
    }

    fn loop_control(&mut self, kind: ActionKind, span: Span, action: Result<ActionNode>) {
        if self.in_range_body() {
            self.push(node_or_error(action, span, None));
            return;
        }

        let error_kind = if kind == ActionKind::Break {
            ErrorKind::BreakOutsideRange
        } else {
            ErrorKind::ContinueOutsideRange
        };

        let error = Error::new(span, error_kind);
        self.push(Node::Error(ErrorNode::new(error, span, None)));
    }

    fn truncate(&mut self, action_span: Span, eof: u32) {
        let max_depth = self.config.max_nesting_depth.unwrap_or(self.block_depth);
        let span = Span::new(action_span.start(), eof);

        let error = Error::new(action_span, ErrorKind::NestingTooDeep(max_depth));
        self.push(Node::Error(ErrorNode::new(error, span, None)));
        self.truncated = Some(span);
    }
}

/// Parses the tokens between an action's delimiters
struct ActionParser<'t, 'a> {
    tokens: &'t [Token<'a>],
    pos: usize,
    span: Span,
    depth: usize,
}

impl<'t, 'a> ActionParser<'t, 'a> {
    fn new(tokens: &'t [Token<'a>], span: Span) -> ActionParser<'t, 'a> {
        ActionParser {
            tokens,
            pos: 0,
            span,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&'t Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&'t TokenKind> {
        self.peek().map(|token| &token.kind)
    }

    fn next(&mut self) -> Option<&'t Token<'a>> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Returns the span for errors about something missing at the current position
    fn here(&self) -> Span {
        match self.peek() {
            Some(token) => token.span,
            None => self.span,
        }
    }

    fn header(mut self, kind: ActionKind) -> Result<ActionNode> {
        let mut action = ActionNode::new(kind, self.span);

        if kind != ActionKind::Output {
            // Skip the leading keyword or comment
            self.pos = 1;
        }

        match kind {
            ActionKind::Output => {
                if self.at_end() {
                    return Err(Error::new(self.span, ErrorKind::EmptyAction));
                }

                action.bindings = self.bindings(None)?;
                if action.bindings.is_some() && self.at_end() {
                    return Err(Error::new(self.span, ErrorKind::MissingPipeline));
                }
                action.expressions = self.rest_pipeline()?;
            }
            ActionKind::Comment => self.expect_end(None)?,
            ActionKind::If => self.condition(&mut action, Keyword::If)?,
            ActionKind::Range => self.condition(&mut action, Keyword::Range)?,
            ActionKind::With => self.condition(&mut action, Keyword::With)?,
            ActionKind::Else => match self.peek_kind() {
                Some(TokenKind::Keyword(keyword @ (Keyword::If | Keyword::With))) => {
                    let keyword = *keyword;
                    self.pos += 1;
                    action.chained = Some(keyword);
                    self.condition(&mut action, keyword)?;
                }
                Some(_) => self.expect_end(Some(Keyword::Else))?,
                None => {}
            },
            ActionKind::End => self.expect_end(Some(Keyword::End))?,
            ActionKind::Break => self.expect_end(Some(Keyword::Break))?,
            ActionKind::Continue => self.expect_end(Some(Keyword::Continue))?,
            ActionKind::Define => {
                action.name = Some(self.template_name(Keyword::Define)?);
                self.expect_end(Some(Keyword::Define))?;
            }
            ActionKind::Template => {
                action.name = Some(self.template_name(Keyword::Template)?);
                if !self.at_end() {
                    action.expressions = self.rest_pipeline()?;
                }
            }
            ActionKind::Block => {
                action.name = Some(self.template_name(Keyword::Block)?);
                if self.at_end() {
                    return Err(Error::new(
                        self.span,
                        ErrorKind::MissingCondition(Keyword::Block),
                    ));
                }
                action.expressions = self.rest_pipeline()?;
            }
        }

        Ok(action)
    }

    fn condition(&mut self, action: &mut ActionNode, keyword: Keyword) -> Result<()> {
        action.bindings = self.bindings(Some(keyword))?;

        if self.at_end() {
            let kind = if action.bindings.is_some() {
                ErrorKind::MissingPipeline
            } else {
                ErrorKind::MissingCondition(keyword)
            };

            return Err(Error::new(self.span, kind));
        }

        action.expressions = self.rest_pipeline()?;
        Ok(())
    }

    fn expect_end(&self, keyword: Option<Keyword>) -> Result<()> {
        let (first, last) = match (self.peek(), self.tokens.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Ok(()),
        };

        let kind = match keyword {
            Some(keyword) => ErrorKind::UnexpectedOperand(keyword),
            None => ErrorKind::UnexpectedToken(first.text.into()),
        };

        Err(Error::new(first.span.cover(last.span), kind))
    }

    fn template_name(&mut self, keyword: Keyword) -> Result<Ident> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::StringLiteral => {
                self.pos += 1;
                Ok(Ident::new(token.span, &unquote(token.text)))
            }
            _ => Err(Error::new(self.here(), ErrorKind::MissingName(keyword))),
        }
    }

    /// Parses a leading `$x :=`, `$x =` or `$k, $v :=` if present
    fn bindings(&mut self, keyword: Option<Keyword>) -> Result<Option<Bindings>> {
        let mut index = self.pos;
        let mut variables = vec![];

        let kind = loop {
            match self.tokens.get(index) {
                Some(token) if token.kind == TokenKind::Variable => {
                    variables.push(Ident::new(token.span, token.text));
                }
                _ => return Ok(None),
            }

            match self.tokens.get(index + 1).map(|token| &token.kind) {
                Some(TokenKind::Operator(Operator::Comma)) => index += 2,
                Some(TokenKind::Operator(Operator::Declare)) => break BindingKind::Declare,
                Some(TokenKind::Operator(Operator::Assign)) => break BindingKind::Assign,
                _ => return Ok(None),
            }
        };

        self.pos = index + 2;

        let max_variables = if keyword == Some(Keyword::Range) { 2 } else { 1 };
        if variables.len() > max_variables {
            let extra = variables[max_variables].span.cover(variables[variables.len() - 1].span);
            return Err(Error::new(extra, ErrorKind::TooManyVariables(keyword)));
        }

        Ok(Some(Bindings { kind, variables }))
    }

    /// Parses a pipeline that must extend to the end of the action
    fn rest_pipeline(&mut self) -> Result<Vec<Expr>> {
        let pipeline = self.pipeline()?;

        match self.peek() {
            Some(token) => Err(Error::new(
                token.span,
                ErrorKind::UnexpectedToken(token.text.into()),
            )),
            None => Ok(vec![pipeline]),
        }
    }

    /// Parses commands separated by `|`
    ///
    /// A single command is returned as-is instead of as a one stage [`Expr::Pipeline`].
    fn pipeline(&mut self) -> Result<Expr> {
        let mut stages = vec![self.command()?];

        while let Some(TokenKind::Pipe) = self.peek_kind() {
            self.pos += 1;
            stages.push(self.command()?);
        }

        if stages.len() == 1 {
            return Ok(stages.remove(0));
        }

        let span = stages[0].span().cover(stages[stages.len() - 1].span());
        Ok(Expr::Pipeline { span, stages })
    }

    fn command(&mut self) -> Result<Expr> {
        let mut operands = vec![];

        while let Some(kind) = self.peek_kind() {
            if matches!(kind, TokenKind::Pipe | TokenKind::RightParen) {
                break;
            }
            operands.push(self.operand()?);
        }

        let mut operands = operands.into_iter();
        let head = match operands.next() {
            Some(head) => head,
            None => return Err(Error::new(self.here(), ErrorKind::EmptyCommand)),
        };

        let args: Vec<Expr> = operands.collect();
        let span = match args.last() {
            Some(last) => head.span().cover(last.span()),
            None => head.span(),
        };

        Ok(match head {
            Expr::FunctionCall {
                name,
                args: head_args,
                ..
            } if head_args.is_empty() => Expr::FunctionCall { span, name, args },
            head if args.is_empty() => head,
            head => Expr::MethodCall {
                span,
                receiver: Box::new(head),
                args,
            },
        })
    }

    fn operand(&mut self) -> Result<Expr> {
        let mut expr = self.term()?;

        // Fields only chain when written directly after the term, e.g. `$x.Name`
        while let Some(token) = self.peek() {
            if token.kind != TokenKind::Field || token.span.start() != expr.span().end() {
                break;
            }

            self.pos += 1;
            expr = Expr::FieldAccess {
                span: expr.span().cover(token.span),
                base: Box::new(expr),
                field: field_ident(token),
            };
        }

        Ok(expr)
    }

    fn term(&mut self) -> Result<Expr> {
        let token = match self.next() {
            Some(token) => token,
            None => return Err(Error::new(self.span, ErrorKind::EmptyCommand)),
        };

        let span = token.span;
        let literal = |value| Ok(Expr::Literal { span, value });

        match &token.kind {
            TokenKind::Dot => Ok(Expr::Dot(span)),
            TokenKind::Field => Ok(Expr::FieldAccess {
                span,
                base: Box::new(Expr::Dot(Span::new(span.start(), span.start()))),
                field: field_ident(token),
            }),
            TokenKind::Variable => Ok(Expr::VariableRef(Ident::new(span, token.text))),
            TokenKind::Identifier => Ok(Expr::FunctionCall {
                span,
                name: Ident::new(span, token.text),
                args: vec![],
            }),
            TokenKind::StringLiteral => literal(Literal::Str(unquote(token.text).into())),
            TokenKind::Char => literal(Literal::Char(token.text.into())),
            TokenKind::Number => literal(Literal::Number(token.text.into())),
            TokenKind::Keyword(Keyword::True) => literal(Literal::Bool(true)),
            TokenKind::Keyword(Keyword::False) => literal(Literal::Bool(false)),
            TokenKind::Keyword(Keyword::Nil) => literal(Literal::Nil),
            TokenKind::Keyword(keyword) => {
                Err(Error::new(span, ErrorKind::UnexpectedKeyword(*keyword)))
            }
            TokenKind::LeftParen => self.parenthesized(span),
            TokenKind::Error(kind) => Err(Error::new(span, kind.clone())),
            TokenKind::Text
            | TokenKind::ActionOpen { .. }
            | TokenKind::ActionClose { .. }
            | TokenKind::Comment
            | TokenKind::Operator(_)
            | TokenKind::Pipe
            | TokenKind::RightParen
            | TokenKind::Eof => Err(Error::new(
                span,
                ErrorKind::UnexpectedToken(token.text.into()),
            )),
        }
    }

    fn parenthesized(&mut self, open_span: Span) -> Result<Expr> {
        if self.depth >= MAX_EXPRESSION_DEPTH {
            return Err(Error::new(open_span, ErrorKind::ExpressionTooDeep));
        }

        self.depth += 1;
        let inner = self.pipeline()?;
        self.depth -= 1;

        match self.next() {
            Some(close) if close.kind == TokenKind::RightParen => {
                let stages = match inner {
                    Expr::Pipeline { stages, .. } => stages,
                    single => vec![single],
                };

                Ok(Expr::Pipeline {
                    span: open_span.cover(close.span),
                    stages,
                })
            }
            _ => Err(Error::new(open_span, ErrorKind::UnclosedParen)),
        }
    }
}

fn field_ident(token: &Token<'_>) -> Ident {
    // Drop the leading `.`
    let span = token.span.with_start(token.span.start() + 1);
    Ident::new(span, &token.text[1..])
}

/// Returns the contents of a quoted or raw string literal
pub fn unquote(text: &str) -> String {
    if let Some(raw) = text.strip_prefix('`') {
        return raw.strip_suffix('`').unwrap_or(raw).to_owned();
    }

    let inner = text.strip_prefix('"').unwrap_or(text);
    let inner = inner.strip_suffix('"').unwrap_or(inner);

    let mut unquoted = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            unquoted.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => unquoted.push('\n'),
            Some('t') => unquoted.push('\t'),
            Some('r') => unquoted.push('\r'),
            Some('a') => unquoted.push('\u{7}'),
            Some('b') => unquoted.push('\u{8}'),
            Some('f') => unquoted.push('\u{c}'),
            Some('v') => unquoted.push('\u{b}'),
            Some(c @ ('\\' | '"' | '\'')) => unquoted.push(c),
            // Numeric escapes are kept as written
            Some(other) => {
                unquoted.push('\\');
                unquoted.push(other);
            }
            None => unquoted.push('\\'),
        }
    }

    unquoted
}
