//! Intermediate representation the compiler lowers syntax nodes into.
//!
//! The IR is a small imperative language: writes to the output buffer, plain
//! control flow, assignments and procedure definitions. The optimizer rewrites
//! it and the renderer walks it.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::expr::builtins::WRITE_ATTRS;
use crate::expr::{Expr, Params};

#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub line: usize,
    pub kind: InstrKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstrKind {
    Write(Expr),
    WriteMany(Vec<Expr>),
    /// Attribute emission before flattening.
    Attrs(Vec<AttrItem>),
    Conditional {
        branches: Vec<(Expr, Vec<Instr>)>,
        orelse: Vec<Instr>,
    },
    Loop {
        head: LoopHead,
        body: Vec<Instr>,
    },
    Assign {
        targets: Vec<String>,
        value: Expr,
    },
    /// Expression evaluated for its effect; procedure calls end up here.
    Eval(Expr),
    ProcedureDef(Arc<Procedure>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrItem {
    Pair(Expr, Expr),
    /// Evaluates to a `(name, value)` pair or a mapping of them.
    Spread(Expr),
}

impl AttrItem {
    /// Runtime form handed to the attribute serializer.
    pub fn to_expr(&self) -> Expr {
        match self {
            AttrItem::Pair(n, v) => Expr::Tuple(vec![n.clone(), v.clone()]),
            AttrItem::Spread(e) => e.clone(),
        }
    }
}

/// `__write_attrs([...])` over the given items.
pub fn write_attrs_call(items: &[AttrItem]) -> Expr {
    Expr::call(WRITE_ATTRS, vec![Expr::List(items.iter().map(AttrItem::to_expr).collect())])
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopHead {
    For { targets: Vec<String>, iter: Expr },
    While(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub name: String,
    pub params: Params,
    pub body: Vec<Instr>,
}

impl Instr {
    pub fn new(line: usize, kind: InstrKind) -> Self {
        Instr { line, kind }
    }

    pub fn write(line: usize, expr: Expr) -> Self {
        Instr::new(line, InstrKind::Write(expr))
    }

    pub fn text(line: usize, text: impl Into<String>) -> Self {
        Instr::write(line, Expr::str(text))
    }

    /// Expressions owned directly by this instruction, nested bodies excluded.
    pub fn exprs(&self) -> Vec<&Expr> {
        match &self.kind {
            InstrKind::Write(e) | InstrKind::Eval(e) => vec![e],
            InstrKind::WriteMany(items) => items.iter().collect(),
            InstrKind::Attrs(items) => items
                .iter()
                .flat_map(|item| match item {
                    AttrItem::Pair(n, v) => vec![n, v],
                    AttrItem::Spread(e) => vec![e],
                })
                .collect(),
            InstrKind::Conditional { branches, .. } => branches.iter().map(|(t, _)| t).collect(),
            InstrKind::Loop { head, .. } => match head {
                LoopHead::For { iter, .. } => vec![iter],
                LoopHead::While(test) => vec![test],
            },
            InstrKind::Assign { value, .. } => vec![value],
            InstrKind::ProcedureDef(p) => p
                .params
                .positional
                .iter()
                .filter_map(|param| param.default.as_ref())
                .collect(),
        }
    }

    /// Nested instruction bodies.
    pub fn bodies(&self) -> Vec<&[Instr]> {
        match &self.kind {
            InstrKind::Conditional { branches, orelse } => {
                let mut out: Vec<&[Instr]> = branches.iter().map(|(_, b)| b.as_slice()).collect();
                out.push(orelse);
                out
            }
            InstrKind::Loop { body, .. } => vec![body],
            InstrKind::ProcedureDef(p) => vec![&p.body],
            _ => Vec::new(),
        }
    }

    /// Rebuilds the instruction with `f` applied to every nested body.
    pub fn map_bodies(self, f: &mut impl FnMut(Vec<Instr>) -> Vec<Instr>) -> Instr {
        let kind = match self.kind {
            InstrKind::Conditional { branches, orelse } => InstrKind::Conditional {
                branches: branches.into_iter().map(|(t, b)| (t, f(b))).collect(),
                orelse: f(orelse),
            },
            InstrKind::Loop { head, body } => InstrKind::Loop { head, body: f(body) },
            InstrKind::ProcedureDef(p) => {
                let p = Arc::unwrap_or_clone(p);
                InstrKind::ProcedureDef(Arc::new(Procedure {
                    body: f(p.body),
                    ..p
                }))
            }
            other => other,
        };
        Instr { kind, ..self }
    }
}

/// Pre-order walk over every instruction, nested bodies included.
pub fn walk<'a>(body: &'a [Instr], f: &mut impl FnMut(&'a Instr)) {
    for instr in body {
        f(instr);
        for nested in instr.bodies() {
            walk(nested, f);
        }
    }
}

/// True when any instruction in `body` satisfies `pred`.
pub fn any(body: &[Instr], pred: &mut impl FnMut(&Instr) -> bool) -> bool {
    for instr in body {
        if pred(instr) {
            return true;
        }
        for nested in instr.bodies() {
            if any(nested, pred) {
                return true;
            }
        }
    }
    false
}

/// True when `name` is read anywhere in `body`.
pub fn mentions(body: &[Instr], name: &str) -> bool {
    any(body, &mut |instr| instr.exprs().iter().any(|e| e.mentions(name)))
}

/// Replaces reads of the mapped names throughout `body`. Nested loops and
/// procedures shadow their own targets and parameters. Assignments to mapped
/// names are not tracked, so callers only substitute names `body` never assigns.
pub fn substitute(body: &[Instr], map: &HashMap<String, Expr>) -> Vec<Instr> {
    body.iter().map(|instr| substitute_instr(instr, map)).collect()
}

fn without<'a>(
    map: &HashMap<String, Expr>,
    names: impl IntoIterator<Item = &'a str>,
) -> HashMap<String, Expr> {
    let mut inner = map.clone();
    for name in names {
        inner.remove(name);
    }
    inner
}

fn substitute_instr(instr: &Instr, map: &HashMap<String, Expr>) -> Instr {
    let sub = |e: &Expr| e.substitute(map);
    let kind = match &instr.kind {
        InstrKind::Write(e) => InstrKind::Write(sub(e)),
        InstrKind::WriteMany(items) => InstrKind::WriteMany(items.iter().map(sub).collect()),
        InstrKind::Eval(e) => InstrKind::Eval(sub(e)),
        InstrKind::Attrs(items) => InstrKind::Attrs(
            items
                .iter()
                .map(|item| match item {
                    AttrItem::Pair(n, v) => AttrItem::Pair(sub(n), sub(v)),
                    AttrItem::Spread(e) => AttrItem::Spread(sub(e)),
                })
                .collect(),
        ),
        InstrKind::Conditional { branches, orelse } => InstrKind::Conditional {
            branches: branches
                .iter()
                .map(|(t, b)| (sub(t), substitute(b, map)))
                .collect(),
            orelse: substitute(orelse, map),
        },
        InstrKind::Loop { head, body } => match head {
            LoopHead::For { targets, iter } => {
                let inner = without(map, targets.iter().map(String::as_str));
                InstrKind::Loop {
                    head: LoopHead::For {
                        targets: targets.clone(),
                        iter: sub(iter),
                    },
                    body: substitute(body, &inner),
                }
            }
            LoopHead::While(test) => InstrKind::Loop {
                head: LoopHead::While(sub(test)),
                body: substitute(body, map),
            },
        },
        InstrKind::Assign { targets, value } => InstrKind::Assign {
            targets: targets.clone(),
            value: sub(value),
        },
        InstrKind::ProcedureDef(p) => {
            let mut params = p.params.clone();
            for param in &mut params.positional {
                param.default = param.default.as_ref().map(sub);
            }
            let inner = without(map, p.params.names());
            InstrKind::ProcedureDef(Arc::new(Procedure {
                name: p.name.clone(),
                params,
                body: substitute(&p.body, &inner),
            }))
        }
    };
    Instr::new(instr.line, kind)
}

/// Human-readable reconstruction of a compiled template.
pub fn to_source(required: &[String], body: &[Instr]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "def render({}):", required.join(", "));
    if body.is_empty() {
        out.push_str("    pass\n");
    }
    write_block(&mut out, body, 1);
    out
}

fn write_block(out: &mut String, body: &[Instr], depth: usize) {
    let pad = "    ".repeat(depth);
    for instr in body {
        match &instr.kind {
            InstrKind::Write(e) => {
                let _ = writeln!(out, "{}write({})", pad, e);
            }
            InstrKind::WriteMany(items) => {
                let items: Vec<String> = items.iter().map(|e| e.to_string()).collect();
                let _ = writeln!(out, "{}write_many({})", pad, items.join(", "));
            }
            InstrKind::Attrs(items) => {
                let items: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        AttrItem::Pair(n, v) => format!("({}, {})", n, v),
                        AttrItem::Spread(e) => format!("*{}", e),
                    })
                    .collect();
                let _ = writeln!(out, "{}attrs({})", pad, items.join(", "));
            }
            InstrKind::Conditional { branches, orelse } => {
                for (i, (test, branch)) in branches.iter().enumerate() {
                    let keyword = if i == 0 { "if" } else { "elif" };
                    let _ = writeln!(out, "{}{} {}:", pad, keyword, test);
                    write_suite(out, branch, depth + 1);
                }
                if !orelse.is_empty() {
                    let _ = writeln!(out, "{}else:", pad);
                    write_suite(out, orelse, depth + 1);
                }
            }
            InstrKind::Loop { head, body } => {
                match head {
                    LoopHead::For { targets, iter } => {
                        let _ = writeln!(out, "{}for {} in {}:", pad, targets.join(", "), iter);
                    }
                    LoopHead::While(test) => {
                        let _ = writeln!(out, "{}while {}:", pad, test);
                    }
                }
                write_suite(out, body, depth + 1);
            }
            InstrKind::Assign { targets, value } => {
                let _ = writeln!(out, "{}{} = {}", pad, targets.join(", "), value);
            }
            InstrKind::Eval(e) => {
                let _ = writeln!(out, "{}{}", pad, e);
            }
            InstrKind::ProcedureDef(p) => {
                let mut params: Vec<String> = p
                    .params
                    .positional
                    .iter()
                    .map(|param| match &param.default {
                        Some(d) => format!("{}={}", param.name, d),
                        None => param.name.clone(),
                    })
                    .collect();
                if let Some(v) = &p.params.varargs {
                    params.push(format!("*{}", v));
                }
                if let Some(k) = &p.params.kwargs {
                    params.push(format!("**{}", k));
                }
                let _ = writeln!(out, "{}def {}({}):", pad, p.name, params.join(", "));
                write_suite(out, &p.body, depth + 1);
            }
        }
    }
}

fn write_suite(out: &mut String, body: &[Instr], depth: usize) {
    if body.is_empty() {
        let _ = writeln!(out, "{}pass", "    ".repeat(depth));
    } else {
        write_block(out, body, depth);
    }
}
