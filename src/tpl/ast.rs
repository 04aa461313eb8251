use std::collections::BTreeMap;

/// One significant source line: blank and `/` comment lines never make it here.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub number: usize, // 1-based
    pub level: usize,  // indent width / 2
    pub content: String,
}

/// A line with the lines nested under it.
#[derive(Debug, Clone, PartialEq)]
pub struct LineTree {
    pub line: Line,
    pub children: Vec<LineTree>,
}

/// Dynamic attribute clause written after a tag head.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrClause {
    /// `(...)`: call-style arguments, keyword arguments become pairs.
    Args(String),
    /// `{...}`: a dict literal.
    Mapping(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub attrs: BTreeMap<String, String>, // from `.class` and `#id` shorthand
    pub clauses: Vec<AttrClause>,
    pub children: Vec<SyntaxNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Tag(Tag),
    /// `-` line; the header text always ends with `:`.
    Control {
        header: String,
        children: Vec<SyntaxNode>,
    },
    Text(String),
    /// `=` line: escaped expression output.
    Output(String),
    /// `+` line: expression or assignment.
    Statement(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxNode {
    pub line: usize,
    pub text: String, // full source line content, for diagnostics
    pub kind: NodeKind,
}

impl SyntaxNode {
    pub fn children(&self) -> &[SyntaxNode] {
        match &self.kind {
            NodeKind::Tag(tag) => &tag.children,
            NodeKind::Control { children, .. } => children,
            _ => &[],
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<SyntaxNode>> {
        match &mut self.kind {
            NodeKind::Tag(tag) => Some(&mut tag.children),
            NodeKind::Control { children, .. } => Some(children),
            _ => None,
        }
    }
}
