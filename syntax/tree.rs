use std::mem;

use crate::error::Error;
use crate::expr::{DataStr, Expr, Ident};
use crate::span::Span;
use crate::token::Keyword;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Bare pipeline whose value is written to the output
    Output,
    If,
    Else,
    End,
    Range,
    With,
    Block,
    Template,
    Define,
    Break,
    Continue,
    Comment,
}

impl ActionKind {
    pub fn from_keyword(keyword: Keyword) -> Option<ActionKind> {
        Some(match keyword {
            Keyword::If => ActionKind::If,
            Keyword::Else => ActionKind::Else,
            Keyword::End => ActionKind::End,
            Keyword::Range => ActionKind::Range,
            Keyword::With => ActionKind::With,
            Keyword::Block => ActionKind::Block,
            Keyword::Define => ActionKind::Define,
            Keyword::Template => ActionKind::Template,
            Keyword::Break => ActionKind::Break,
            Keyword::Continue => ActionKind::Continue,
            Keyword::True | Keyword::False | Keyword::Nil => return None,
        })
    }

    /// Returns true if actions of this kind contain a body terminated by `{{end}}`
    pub fn opens_block(self) -> bool {
        matches!(
            self,
            ActionKind::If
                | ActionKind::Range
                | ActionKind::With
                | ActionKind::Block
                | ActionKind::Define
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Output => "output",
            ActionKind::If => "if",
            ActionKind::Else => "else",
            ActionKind::End => "end",
            ActionKind::Range => "range",
            ActionKind::With => "with",
            ActionKind::Block => "block",
            ActionKind::Template => "template",
            ActionKind::Define => "define",
            ActionKind::Break => "break",
            ActionKind::Continue => "continue",
            ActionKind::Comment => "comment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// `$x := pipeline`
    Declare,
    /// `$x = pipeline`
    Assign,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bindings {
    pub kind: BindingKind,
    pub variables: Vec<Ident>,
}

#[derive(Debug, PartialEq)]
pub struct TextNode {
    pub span: Span,
    pub content: DataStr,
}

#[derive(Debug, PartialEq)]
pub struct ActionNode {
    pub kind: ActionKind,
    /// Span of the action itself from its open to its close delimiter
    pub span: Span,
    /// Span of the action including its body and `{{end}}`
    pub extent: Span,
    pub trim_left: bool,
    pub trim_right: bool,
    /// Template name of `define`, `block` and `template`
    pub name: Option<Ident>,
    pub bindings: Option<Bindings>,
    pub expressions: Vec<Expr>,
    /// Body of a block or `else` branch
    ///
    /// `else` branches are children of their block and the matching `end` is the block's last
    /// child.
    pub children: Vec<Node>,
    /// Keyword following `else` in `{{else if}}` or `{{else with}}`
    pub chained: Option<Keyword>,
}

impl ActionNode {
    pub fn new(kind: ActionKind, span: Span) -> ActionNode {
        ActionNode {
            kind,
            span,
            extent: span,
            trim_left: false,
            trim_right: false,
            name: None,
            bindings: None,
            expressions: vec![],
            children: vec![],
            chained: None,
        }
    }

    /// Returns the variables declared by this action
    pub fn declared_variables(&self) -> &[Ident] {
        match &self.bindings {
            Some(Bindings {
                kind: BindingKind::Declare,
                variables,
            }) => variables,
            _ => &[],
        }
    }

    /// Returns the `{{end}}` closing this block
    pub fn end(&self) -> Option<&ActionNode> {
        match self.children.last() {
            Some(Node::Action(end)) if end.kind == ActionKind::End => Some(end),
            _ => None,
        }
    }

    /// Returns true if this block was closed by an `{{end}}`, even a malformed one
    pub fn is_terminated(&self) -> bool {
        match self.children.last() {
            Some(Node::Action(end)) => end.kind == ActionKind::End,
            Some(Node::Error(error)) => error.keyword == Some(Keyword::End),
            _ => false,
        }
    }

    /// Returns the span of the body this action's header applies to
    ///
    /// For blocks this runs from the end of the header to the start of the first `else` or the
    /// `end`. For `else` branches it runs to the end of the branch.
    pub fn body_span(&self) -> Span {
        let body_end = self
            .children
            .iter()
            .find(|child| is_branch_boundary(child))
            .map(|child| child.span().start())
            .unwrap_or_else(|| self.extent.end());

        Span::new(self.span.end(), body_end)
    }

    /// Iterates over the `else` branches of a block
    pub fn else_branches(&self) -> impl Iterator<Item = &Node> {
        self.children.iter().filter(|child| match child {
            Node::Action(action) => action.kind == ActionKind::Else,
            Node::Error(error) => error.keyword == Some(Keyword::Else) && !error.children.is_empty(),
            Node::Text(_) => false,
        })
    }
}

fn is_branch_boundary(node: &Node) -> bool {
    match node {
        Node::Action(action) => matches!(action.kind, ActionKind::Else | ActionKind::End),
        Node::Error(error) => matches!(error.keyword, Some(Keyword::Else) | Some(Keyword::End)),
        Node::Text(_) => false,
    }
}

/// Malformed action standing in for the construct it failed to parse as
#[derive(Debug, PartialEq)]
pub struct ErrorNode {
    pub error: Error,
    /// Span of the malformed action
    pub span: Span,
    pub extent: Span,
    /// Leading keyword of the malformed action
    pub keyword: Option<Keyword>,
    /// Body if the malformed action still opened a block
    pub children: Vec<Node>,
}

impl ErrorNode {
    pub fn new(error: Error, span: Span, keyword: Option<Keyword>) -> ErrorNode {
        ErrorNode {
            error,
            span,
            extent: span,
            keyword,
            children: vec![],
        }
    }

    pub fn message(&self) -> String {
        self.error.kind().message()
    }
}

#[derive(Debug, PartialEq)]
pub enum Node {
    Text(TextNode),
    Action(ActionNode),
    Error(ErrorNode),
}

impl Node {
    /// Returns the span of the node itself excluding any body
    pub fn span(&self) -> Span {
        match self {
            Node::Text(text) => text.span,
            Node::Action(action) => action.span,
            Node::Error(error) => error.span,
        }
    }

    /// Returns the span of the node including any body
    pub fn extent(&self) -> Span {
        match self {
            Node::Text(text) => text.span,
            Node::Action(action) => action.extent,
            Node::Error(error) => error.extent,
        }
    }

    pub fn children(&self) -> &[Node] {
        match self {
            Node::Text(_) => &[],
            Node::Action(action) => &action.children,
            Node::Error(error) => &error.children,
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<Node>> {
        match self {
            Node::Text(_) => None,
            Node::Action(action) => Some(&mut action.children),
            Node::Error(error) => Some(&mut error.children),
        }
    }

    pub(crate) fn set_extent(&mut self, extent: Span) {
        match self {
            Node::Text(_) => {}
            Node::Action(action) => action.extent = extent,
            Node::Error(error) => error.extent = extent,
        }
    }

    pub fn as_action(&self) -> Option<&ActionNode> {
        match self {
            Node::Action(action) => Some(action),
            _ => None,
        }
    }
}

// Trees can be nested arbitrarily deep; drop them without recursing
fn drop_children(children: &mut Vec<Node>) {
    let mut pending = mem::take(children);

    while let Some(mut node) = pending.pop() {
        if let Some(grandchildren) = node.children_mut() {
            pending.append(grandchildren);
        }
    }
}

impl Drop for ActionNode {
    fn drop(&mut self) {
        drop_children(&mut self.children);
    }
}

impl Drop for ErrorNode {
    fn drop(&mut self) {
        drop_children(&mut self.children);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WalkEvent<'a> {
    Enter(&'a Node),
    Leave(&'a Node),
}

/// Iterative depth-first traversal of a tree
pub struct Walk<'a> {
    stack: Vec<WalkEvent<'a>>,
}

impl<'a> Walk<'a> {
    pub fn new(nodes: &'a [Node]) -> Walk<'a> {
        Walk {
            stack: nodes.iter().rev().map(WalkEvent::Enter).collect(),
        }
    }
}

impl<'a> Iterator for Walk<'a> {
    type Item = WalkEvent<'a>;

    fn next(&mut self) -> Option<WalkEvent<'a>> {
        let event = self.stack.pop()?;

        if let WalkEvent::Enter(node) = event {
            self.stack.push(WalkEvent::Leave(node));
            self.stack
                .extend(node.children().iter().rev().map(WalkEvent::Enter));
        }

        Some(event)
    }
}

/// Root of a parsed template
#[derive(Debug, PartialEq)]
pub struct Template {
    pub nodes: Vec<Node>,
    /// Span of the entire source
    pub span: Span,
    /// Span left unparsed after exceeding the nesting limit
    pub truncated: Option<Span>,
}

impl Template {
    pub fn walk(&self) -> Walk<'_> {
        Walk::new(&self.nodes)
    }

    /// Iterates over every node in pre-order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.walk().filter_map(|event| match event {
            WalkEvent::Enter(node) => Some(node),
            WalkEvent::Leave(_) => None,
        })
    }

    /// Returns the spans of every node excluding bodies in source order
    ///
    /// These tile the source without gaps or overlaps.
    pub fn source_spans(&self) -> Vec<Span> {
        self.nodes().map(Node::span).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;
    use crate::span::t2s;

    fn text(span: Span) -> Node {
        Node::Text(TextNode {
            span,
            content: "x".into(),
        })
    }

    fn deeply_nested(depth: usize) -> Node {
        let mut node = text(Span::new(0, 1));
        for _ in 0..depth {
            let mut action = ActionNode::new(ActionKind::If, Span::new(0, 1));
            action.children.push(node);
            node = Node::Action(action);
        }
        node
    }

    #[test]
    fn walk_events() {
        //      {{if .}}a{{end}}
        let mut block = ActionNode::new(ActionKind::If, t2s("^^^^^^^^        "));
        block.children.push(text(t2s("        ^       ")));
        block.children.push(Node::Action(ActionNode::new(
            ActionKind::End,
            t2s("         ^^^^^^^"),
        )));
        block.extent = t2s("^^^^^^^^^^^^^^^^");

        let template = Template {
            nodes: vec![Node::Action(block)],
            span: t2s("^^^^^^^^^^^^^^^^"),
            truncated: None,
        };

        let events: Vec<_> = template
            .walk()
            .map(|event| match event {
                WalkEvent::Enter(node) => (true, node.span()),
                WalkEvent::Leave(node) => (false, node.span()),
            })
            .collect();

        assert_eq!(
            vec![
                (true, t2s("^^^^^^^^        ")),
                (true, t2s("        ^       ")),
                (false, t2s("        ^       ")),
                (true, t2s("         ^^^^^^^")),
                (false, t2s("         ^^^^^^^")),
                (false, t2s("^^^^^^^^        ")),
            ],
            events
        );

        let block = template.nodes[0].as_action().unwrap();
        assert!(block.is_terminated());
        assert!(block.end().is_some());
        assert_eq!(t2s("        ^       "), block.body_span());
    }

    #[test]
    fn error_end_terminates() {
        let mut block = ActionNode::new(ActionKind::With, Span::new(0, 10));
        assert!(!block.is_terminated());

        block.children.push(Node::Error(ErrorNode::new(
            Error::new(Span::new(15, 16), ErrorKind::UnexpectedOperand(Keyword::End)),
            Span::new(10, 20),
            Some(Keyword::End),
        )));
        assert!(block.is_terminated());
        assert!(block.end().is_none());
    }

    #[test]
    fn drop_deep_tree() {
        // This would overflow the stack with a recursive drop
        drop(deeply_nested(1_000_000));
    }
}
