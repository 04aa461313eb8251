use std::collections::BTreeMap;

use crate::error::HamlError;
use crate::tpl::ast::{AttrClause, Line, LineTree, NodeKind, SyntaxNode, Tag};

/// Parses template source into its syntax tree.
pub fn parse(source: &str) -> Result<Vec<SyntaxNode>, HamlError> {
    let lines = parse_lines(source)?;
    let trees = make_tree(lines)?;
    trees.iter().map(tree_to_node).collect()
}

/// Splits source into significant lines tagged with their indent level.
pub fn parse_lines(source: &str) -> Result<Vec<Line>, HamlError> {
    let mut lines = Vec::new();
    for (index, data) in source.split('\n').enumerate() {
        let content = data.trim();
        if content.is_empty() || content.starts_with('/') {
            continue;
        }
        let number = index + 1;
        let indent = data.chars().take_while(|c| c.is_whitespace()).count();
        if indent % 2 != 0 {
            return Err(HamlError::Indentation { line: number });
        }
        lines.push(Line {
            number,
            level: indent / 2,
            content: content.to_string(),
        });
    }
    Ok(lines)
}

/// Nests lines under the closest preceding line one level up.
pub fn make_tree(lines: Vec<Line>) -> Result<Vec<LineTree>, HamlError> {
    let mut roots: Vec<LineTree> = Vec::new();
    // open ancestors of the current line, outermost first
    let mut stack: Vec<LineTree> = Vec::new();

    for line in lines {
        if line.level > stack.len() {
            return Err(HamlError::Indentation { line: line.number });
        }
        while stack.len() > line.level {
            close_last(&mut stack, &mut roots);
        }
        stack.push(LineTree {
            line,
            children: Vec::new(),
        });
    }
    while !stack.is_empty() {
        close_last(&mut stack, &mut roots);
    }
    Ok(roots)
}

fn close_last(stack: &mut Vec<LineTree>, roots: &mut Vec<LineTree>) {
    if let Some(done) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.children.push(done),
            None => roots.push(done),
        }
    }
}

fn tree_to_node(tree: &LineTree) -> Result<SyntaxNode, HamlError> {
    let mut node = line_to_node(&tree.line.content, tree.line.number)?;
    if tree.children.is_empty() {
        return Ok(node);
    }
    // nested lines belong to the line's own node, never to its inline child
    let line = node.line;
    let children = tree
        .children
        .iter()
        .map(tree_to_node)
        .collect::<Result<Vec<_>, _>>()?;
    match node.children_mut() {
        Some(slot) => slot.extend(children),
        None => return Err(HamlError::Nesting { line }),
    }
    Ok(node)
}

/// Classifies one line by its first character.
pub fn line_to_node(content: &str, number: usize) -> Result<SyntaxNode, HamlError> {
    let kind = match content.chars().next() {
        Some('.') | Some('#') | Some('%') => NodeKind::Tag(line_to_tag(content, number)?),
        Some('-') => {
            let mut header = content[1..].trim().to_string();
            if !header.ends_with(':') {
                header.push(':');
            }
            NodeKind::Control {
                header,
                children: Vec::new(),
            }
        }
        Some('=') => NodeKind::Output(content[1..].trim().to_string()),
        Some('+') => NodeKind::Statement(content[1..].trim().to_string()),
        _ => NodeKind::Text(content.to_string()),
    };
    Ok(SyntaxNode {
        line: number,
        text: content.to_string(),
        kind,
    })
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn line_to_tag(content: &str, number: usize) -> Result<Tag, HamlError> {
    let fail = |reason: &str| HamlError::Compile {
        text: content.to_string(),
        line: number,
        reason: reason.to_string(),
    };

    let mut rest = content;
    let mut name = None;
    let mut classes: Vec<&str> = Vec::new();
    let mut id = None;

    while let Some(sigil) = rest.chars().next().filter(|c| matches!(c, '%' | '.' | '#')) {
        let body = &rest[1..];
        let len = body.find(|c: char| !is_word_char(c)).unwrap_or(body.len());
        if len == 0 {
            return Err(fail(&format!("expected a name after '{}'", sigil)));
        }
        let word = &body[..len];
        match sigil {
            '%' => name = Some(word),
            '.' => classes.push(word),
            _ => id = Some(word),
        }
        rest = &body[len..];
    }

    let mut attrs = BTreeMap::new();
    if !classes.is_empty() {
        attrs.insert("class".to_string(), classes.join(" "));
    }
    if let Some(id) = id {
        attrs.insert("id".to_string(), id.to_string());
    }

    let mut clauses = Vec::new();
    for (open, close) in [('(', ')'), ('{', '}')] {
        if rest.starts_with(open) {
            let end = find_closing(rest, open, close)
                .ok_or_else(|| fail(&format!("unclosed '{}'", open)))?;
            let inner = rest[1..end].to_string();
            clauses.push(match open {
                '(' => AttrClause::Args(inner),
                _ => AttrClause::Mapping(inner),
            });
            rest = &rest[end + 1..];
        }
    }

    let mut children = Vec::new();
    let rest = rest.trim();
    if !rest.is_empty() {
        children.push(line_to_node(rest, number)?);
    }

    Ok(Tag {
        name: name.unwrap_or("div").to_string(),
        attrs,
        clauses,
        children,
    })
}

/// Byte offset of the bracket closing the one `s` starts with. Quoted strings
/// are skipped, honouring backslash escapes.
pub fn find_closing(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            c if c == open => depth += 1,
            c if c == close => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
