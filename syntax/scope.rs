//! Position queries against a parsed template

use crate::error::ErrorKind;
use crate::expr::{DataStr, Expr, Ident};
use crate::span::Span;
use crate::token::Keyword;
use crate::tree::{ActionKind, ActionNode, Node, Template};

/// Returns true if a node still extends to the end of its extent because it was never closed
fn is_open_ended(node: &Node) -> bool {
    match node {
        Node::Text(_) => false,
        Node::Action(action) => {
            action.kind == ActionKind::Else
                || (action.kind.opens_block() && !action.is_terminated())
        }
        Node::Error(error) => {
            let closed_by_end = match error.children.last() {
                Some(Node::Action(end)) => end.kind == ActionKind::End,
                Some(Node::Error(end)) => end.keyword == Some(Keyword::End),
                _ => false,
            };

            matches!(
                error.error.kind(),
                ErrorKind::UnterminatedAction | ErrorKind::UnclosedComment
            ) || (error.keyword.is_some() && error.keyword != Some(Keyword::End) && !closed_by_end)
        }
    }
}

/// Returns the nodes containing `offset` from the outermost to the innermost
///
/// An offset at the very end of an unclosed block or action is considered inside it.
pub fn node_path_at(template: &Template, offset: u32) -> Vec<&Node> {
    let mut path = vec![];
    let mut siblings: &[Node] = &template.nodes;

    loop {
        let last_index = siblings.len().wrapping_sub(1);
        let found = siblings.iter().enumerate().find(|(index, node)| {
            let extent = node.extent();

            extent.contains_offset(offset)
                || (*index == last_index && extent.end() == offset && is_open_ended(node))
        });

        match found {
            Some((_, node)) => {
                path.push(node);
                siblings = node.children();
            }
            None => return path,
        }
    }
}

/// Returns the innermost action or malformed action whose delimiters contain `offset`
pub fn action_at(template: &Template, offset: u32) -> Option<&Node> {
    let innermost = node_path_at(template, offset).pop()?;

    match innermost {
        Node::Text(_) => None,
        node if node.span().contains_offset(offset) || node.span().end() == offset => Some(node),
        // Inside a block's body but not in any action
        _ => None,
    }
}

/// Where a variable in scope came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingSource {
    /// `$`, the data passed to the template
    Root,
    /// `$x := pipeline` in a plain action
    Declared,
    /// First variable of a two variable `range`
    RangeKey,
    /// Element variable of a `range`
    RangeElement,
    /// Variable declared in the condition of an `if` or `with`
    Condition(Keyword),
}

impl BindingSource {
    pub fn description(self) -> &'static str {
        match self {
            BindingSource::Root => "data passed to the template",
            BindingSource::Declared => "variable declared in an earlier action",
            BindingSource::RangeKey => "loop index or key bound by enclosing range",
            BindingSource::RangeElement => "loop variable bound by enclosing range",
            BindingSource::Condition(Keyword::With) => "variable bound by enclosing with",
            BindingSource::Condition(_) => "variable bound by enclosing if",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: DataStr,
    /// Declaring variable or `None` for `$`
    pub span: Option<Span>,
    pub source: BindingSource,
}

impl Binding {
    fn root() -> Binding {
        Binding {
            name: "$".into(),
            span: None,
            source: BindingSource::Root,
        }
    }

    fn new(variable: &Ident, source: BindingSource) -> Binding {
        Binding {
            name: variable.name.clone(),
            span: Some(variable.span),
            source,
        }
    }
}

fn declared_in(action: &ActionNode, source: BindingSource) -> impl Iterator<Item = Binding> + '_ {
    action
        .declared_variables()
        .iter()
        .map(move |variable| Binding::new(variable, source))
}

fn header_bindings(action: &ActionNode, bindings: &mut Vec<Binding>) {
    match action.kind {
        ActionKind::Range => {
            let variables = action.declared_variables();
            for (index, variable) in variables.iter().enumerate() {
                let source = if index + 1 < variables.len() {
                    BindingSource::RangeKey
                } else {
                    BindingSource::RangeElement
                };
                bindings.push(Binding::new(variable, source));
            }
        }
        ActionKind::If => bindings.extend(declared_in(action, BindingSource::Condition(Keyword::If))),
        ActionKind::With => {
            bindings.extend(declared_in(action, BindingSource::Condition(Keyword::With)))
        }
        ActionKind::Else => {
            if let Some(chained) = action.chained {
                bindings.extend(declared_in(action, BindingSource::Condition(chained)));
            }
        }
        _ => {}
    }
}

/// Collects declarations in a preceding sibling that remain visible after it
fn sibling_bindings(node: &Node, bindings: &mut Vec<Binding>) {
    let mut pending = vec![node];

    while let Some(node) = pending.pop() {
        let action = match node {
            Node::Action(action) => action,
            _ => continue,
        };

        match action.kind {
            // Earlier branches share their block's scope
            ActionKind::Else => {
                header_bindings(action, bindings);
                pending.extend(action.children.iter().rev());
            }
            kind if kind.opens_block() => {}
            _ => bindings.extend(declared_in(action, BindingSource::Declared)),
        }
    }
}

/// Returns the variables visible at `offset`, innermost first
///
/// Inner bindings shadow outer bindings of the same name. `$` is always the last binding.
pub fn bindings_at(template: &Template, offset: u32) -> Vec<Binding> {
    let path = node_path_at(template, offset);
    let mut bindings = vec![];
    let mut siblings: &[Node] = &template.nodes;

    for node in path {
        for sibling in siblings.iter().take_while(|sibling| !std::ptr::eq(*sibling, node)) {
            sibling_bindings(sibling, &mut bindings);
        }

        let action = match node {
            Node::Action(action) if offset >= action.span.end() => action,
            Node::Error(_) if offset >= node.span().end() => {
                siblings = node.children();
                continue;
            }
            // Declarations only take effect after their action
            _ => break,
        };

        if matches!(action.kind, ActionKind::Block | ActionKind::Define) {
            bindings.clear();
        }
        header_bindings(action, &mut bindings);

        siblings = node.children();
    }

    bindings.reverse();
    bindings.push(Binding::root());
    bindings
}

/// Value of `.` at a position
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DotContext<'a> {
    /// Data passed to the template
    Root,
    /// Element of the enclosing `range`
    RangeElement(&'a ActionNode),
    /// Value of the enclosing `with` or `else with`
    With(&'a ActionNode),
    /// Argument of the enclosing `define` or `block`
    TemplateData(&'a Ident),
}

impl<'a> DotContext<'a> {
    pub fn description(&self) -> String {
        match self {
            DotContext::Root => "data passed to the template".to_owned(),
            DotContext::RangeElement(_) => "loop variable bound by enclosing range".to_owned(),
            DotContext::With(_) => "value of enclosing with".to_owned(),
            DotContext::TemplateData(name) => {
                format!("data passed to template `{}`", name.name)
            }
        }
    }
}

fn is_else_branch(node: &Node) -> bool {
    match node {
        Node::Action(action) => action.kind == ActionKind::Else,
        Node::Error(error) => error.keyword == Some(Keyword::Else),
        Node::Text(_) => false,
    }
}

/// Returns the value of `.` at `offset`
pub fn dot_at(template: &Template, offset: u32) -> DotContext<'_> {
    let path = node_path_at(template, offset);
    let mut dot = DotContext::Root;

    for (index, node) in path.iter().enumerate() {
        let action = match node {
            Node::Action(action) if offset >= action.span.end() => action,
            _ => continue,
        };

        let in_else = path.get(index + 1).map_or(false, |next| is_else_branch(next));

        dot = match action.kind {
            ActionKind::Range if !in_else => DotContext::RangeElement(action),
            ActionKind::With if !in_else => DotContext::With(action),
            ActionKind::Else if action.chained == Some(Keyword::With) => DotContext::With(action),
            ActionKind::Block | ActionKind::Define => match &action.name {
                Some(name) => DotContext::TemplateData(name),
                None => dot,
            },
            _ => dot,
        };
    }

    dot
}

/// Returns the smallest expression of an action touching `offset`
pub fn expr_at(action: &ActionNode, offset: u32) -> Option<&Expr> {
    action
        .expressions
        .iter()
        .flat_map(Expr::descendants)
        .filter(|expr| {
            let span = expr.span();
            !span.is_empty() && span.touches_offset(offset)
        })
        .min_by_key(|expr| expr.span().len())
}
