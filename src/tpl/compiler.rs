use std::sync::Arc;

use crate::error::HamlError;
use crate::expr::builtins::ESCAPE;
use crate::expr::{
    Expr, Header, ParseError, Statement, StatementError, parse_call_args, parse_expr,
    parse_header, parse_statement,
};
use crate::tpl::ast::{AttrClause, NodeKind, SyntaxNode, Tag};
use crate::tpl::ir::{AttrItem, Instr, InstrKind, LoopHead, Procedure};

/// Lowers a syntax tree into IR.
pub fn compile(nodes: &[SyntaxNode]) -> Result<Vec<Instr>, HamlError> {
    let mut out = Vec::new();
    compile_block(nodes, &mut out)?;
    Ok(out)
}

fn compile_block(nodes: &[SyntaxNode], out: &mut Vec<Instr>) -> Result<(), HamlError> {
    // set while the previous sibling was an `if` or `elif`
    let mut chain = false;
    for node in nodes {
        chain = compile_node(node, out, chain)?;
    }
    Ok(())
}

fn compile_error(node: &SyntaxNode, reason: impl ToString) -> HamlError {
    HamlError::Compile {
        text: node.text.clone(),
        line: node.line,
        reason: reason.to_string(),
    }
}

/// Appends the node's instructions; returns whether an `if` chain stays open.
fn compile_node(node: &SyntaxNode, out: &mut Vec<Instr>, chain: bool) -> Result<bool, HamlError> {
    let line = node.line;
    match &node.kind {
        NodeKind::Tag(tag) => compile_tag(node, tag, out)?,
        NodeKind::Control { header, children } => {
            let header = parse_header(header).map_err(|e| compile_error(node, e))?;
            let body = compile(children)?;
            return compile_control(node, header, body, out, chain);
        }
        NodeKind::Text(text) => out.push(Instr::text(line, format!("{}\n", text))),
        NodeKind::Output(src) => {
            let expr = parse_expr(src).map_err(|e| compile_error(node, e))?;
            out.push(Instr::write(line, Expr::call(ESCAPE, vec![expr])));
            out.push(Instr::text(line, "\n"));
        }
        NodeKind::Statement(src) => {
            let kind = match parse_statement(src) {
                Ok(Statement::Expr(expr)) => InstrKind::Eval(expr),
                Ok(Statement::Assign { targets, value }) => InstrKind::Assign { targets, value },
                Err(StatementError::Syntax(e)) => return Err(compile_error(node, e)),
                Err(StatementError::Unsupported(reason)) => {
                    return Err(HamlError::UnsupportedStatement {
                        text: node.text.clone(),
                        line,
                        reason,
                    });
                }
            };
            out.push(Instr::new(line, kind));
        }
    }
    Ok(false)
}

fn compile_control(
    node: &SyntaxNode,
    header: Header,
    body: Vec<Instr>,
    out: &mut Vec<Instr>,
    chain: bool,
) -> Result<bool, HamlError> {
    let line = node.line;
    let open_branches = match out.last_mut() {
        Some(Instr {
            kind: InstrKind::Conditional { branches, orelse },
            ..
        }) if chain => Some((branches, orelse)),
        _ => None,
    };
    let kind = match header {
        Header::If(test) => InstrKind::Conditional {
            branches: vec![(test, body)],
            orelse: Vec::new(),
        },
        Header::Elif(test) => {
            let (branches, _) =
                open_branches.ok_or_else(|| compile_error(node, "'elif' without a matching 'if'"))?;
            branches.push((test, body));
            return Ok(true);
        }
        Header::Else => {
            let (_, orelse) =
                open_branches.ok_or_else(|| compile_error(node, "'else' without a matching 'if'"))?;
            *orelse = body;
            return Ok(false);
        }
        Header::For { targets, iter } => InstrKind::Loop {
            head: LoopHead::For { targets, iter },
            body,
        },
        Header::While(test) => InstrKind::Loop {
            head: LoopHead::While(test),
            body,
        },
        Header::Def { name, params } => {
            InstrKind::ProcedureDef(Arc::new(Procedure { name, params, body }))
        }
    };
    let opens_chain = matches!(kind, InstrKind::Conditional { .. });
    out.push(Instr::new(line, kind));
    Ok(opens_chain)
}

fn compile_tag(node: &SyntaxNode, tag: &Tag, out: &mut Vec<Instr>) -> Result<(), HamlError> {
    let line = node.line;
    out.push(Instr::text(line, format!("<{}", tag.name)));
    let items = attr_items(tag).map_err(|e| compile_error(node, e))?;
    if !items.is_empty() {
        out.push(Instr::new(line, InstrKind::Attrs(items)));
    }
    if tag.children.is_empty() {
        out.push(Instr::text(line, format!("></{}>\n", tag.name)));
    } else {
        out.push(Instr::text(line, ">\n"));
        compile_block(&tag.children, out)?;
        out.push(Instr::text(line, format!("</{}>\n", tag.name)));
    }
    Ok(())
}

/// Dynamic clause pairs first, then the `.class`/`#id` shorthand.
fn attr_items(tag: &Tag) -> Result<Vec<AttrItem>, ParseError> {
    let mut items = Vec::new();
    for clause in &tag.clauses {
        match clause {
            AttrClause::Args(src) => {
                let (args, kwargs) = parse_call_args(src)?;
                for arg in args {
                    items.push(match arg {
                        Expr::Tuple(mut pair) if pair.len() == 2 => {
                            let value = pair.swap_remove(1);
                            AttrItem::Pair(pair.swap_remove(0), value)
                        }
                        other => AttrItem::Spread(other),
                    });
                }
                for (name, value) in kwargs {
                    items.push(AttrItem::Pair(Expr::str(name), value));
                }
            }
            AttrClause::Mapping(src) => match parse_expr(&format!("{{{}}}", src))? {
                Expr::Dict(pairs) => {
                    items.extend(pairs.into_iter().map(|(k, v)| AttrItem::Pair(k, v)));
                }
                other => items.push(AttrItem::Spread(other)),
            },
        }
    }
    for (name, value) in &tag.attrs {
        items.push(AttrItem::Pair(Expr::str(name.as_str()), Expr::str(value.as_str())));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpl::parser::parse;
    use crate::value::Value;

    fn lower(src: &str) -> Result<Vec<Instr>, HamlError> {
        compile(&parse(src)?)
    }

    #[test]
    fn test_text_and_output() {
        let ir = lower("hello\n= name").unwrap();
        assert_eq!(ir[0].kind, InstrKind::Write(Expr::str("hello\n")));
        assert_eq!(
            ir[1].kind,
            InstrKind::Write(Expr::call(ESCAPE, vec![Expr::name("name")]))
        );
        assert_eq!(ir[2].kind, InstrKind::Write(Expr::str("\n")));
        assert_eq!(ir[1].line, 2);
    }

    #[test]
    fn test_tag_without_children() {
        let ir = lower("%div.foo#bar").unwrap();
        assert_eq!(ir.len(), 3);
        assert_eq!(ir[0].kind, InstrKind::Write(Expr::str("<div")));
        assert_eq!(
            ir[1].kind,
            InstrKind::Attrs(vec![
                AttrItem::Pair(Expr::str("class"), Expr::str("foo")),
                AttrItem::Pair(Expr::str("id"), Expr::str("bar")),
            ])
        );
        assert_eq!(ir[2].kind, InstrKind::Write(Expr::str("></div>\n")));
    }

    #[test]
    fn test_tag_with_children() {
        let ir = lower("%p\n  hi").unwrap();
        let texts: Vec<_> = ir.iter().map(|i| i.kind.clone()).collect();
        assert_eq!(
            texts,
            vec![
                InstrKind::Write(Expr::str("<p")),
                InstrKind::Write(Expr::str(">\n")),
                InstrKind::Write(Expr::str("hi\n")),
                InstrKind::Write(Expr::str("</p>\n")),
            ]
        );
    }

    #[test]
    fn test_attribute_clauses() {
        let ir = lower("%a(('x', 1), href=url){'data-y': 2}").unwrap();
        assert_eq!(
            ir[1].kind,
            InstrKind::Attrs(vec![
                AttrItem::Pair(Expr::str("x"), Expr::Literal(Value::Int(1))),
                AttrItem::Pair(Expr::str("href"), Expr::name("url")),
                AttrItem::Pair(Expr::str("data-y"), Expr::Literal(Value::Int(2))),
            ])
        );
        let ir = lower("%a(extra)").unwrap();
        assert_eq!(ir[1].kind, InstrKind::Attrs(vec![AttrItem::Spread(Expr::name("extra"))]));
    }

    #[test]
    fn test_if_chain() {
        let ir = lower("- if a\n  x\n- elif b\n  y\n- else\n  z").unwrap();
        assert_eq!(ir.len(), 1);
        match &ir[0].kind {
            InstrKind::Conditional { branches, orelse } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(branches[1].0, Expr::name("b"));
                assert_eq!(orelse[0].kind, InstrKind::Write(Expr::str("z\n")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_orphan_else() {
        let err = lower("%p\n- else\n  x").unwrap_err();
        assert!(matches!(err, HamlError::Compile { line: 2, .. }));
        let err = lower("- if a\n  x\n- else\n  y\n- else\n  z").unwrap_err();
        assert!(matches!(err, HamlError::Compile { line: 5, .. }));
    }

    #[test]
    fn test_loops_and_defs() {
        let ir = lower("- for k, v in items\n  = k\n- def row(x, y=1)\n  = x").unwrap();
        assert!(matches!(
            &ir[0].kind,
            InstrKind::Loop { head: LoopHead::For { targets, .. }, body }
                if targets == &["k".to_string(), "v".to_string()] && body.len() == 2
        ));
        match &ir[1].kind {
            InstrKind::ProcedureDef(p) => {
                assert_eq!(p.name, "row");
                assert_eq!(p.params.required(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_statements() {
        let ir = lower("+ total = a + b\n+ show(total)").unwrap();
        assert!(matches!(&ir[0].kind, InstrKind::Assign { targets, .. } if targets == &["total"]));
        assert!(matches!(&ir[1].kind, InstrKind::Eval(e) if e.called_name() == Some("show")));

        let err = lower("%p\n+ return 1").unwrap_err();
        assert!(matches!(err, HamlError::UnsupportedStatement { line: 2, .. }));
        assert!(err.to_string().starts_with("cannot convert statement"));
    }

    #[test]
    fn test_compile_error_message() {
        let err = lower("%p\n= 1 +").unwrap_err();
        assert_eq!(err.to_string(), "compiler failed near '= 1 +' at line 2");
    }
}
