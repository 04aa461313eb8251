//! Embedded expression language.
//!
//! Templates carry small Python-flavoured expressions in output lines,
//! statements, control headers and attribute clauses. This module parses them
//! into [`Expr`] trees and evaluates them against an [`Env`].

use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;

use crate::value::Value;

pub mod builtins;
pub mod eval;
mod lexer;
mod parser;

pub use eval::{Env, EvalError, StaticEnv, eval, eval_static};
pub use parser::{parse_call_args, parse_expr, parse_header, parse_statement};

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct ParseError(pub String);

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        ParseError(msg.into())
    }
}

/// Failure to turn a `+` line into a statement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatementError {
    #[error("{0}")]
    Syntax(#[from] ParseError),
    #[error("{0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    IfElse {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Expr(Expr),
    Assign { targets: Vec<String>, value: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    pub positional: Vec<Param>,
    pub varargs: Option<String>,
    pub kwargs: Option<String>,
}

impl Params {
    pub fn required(&self) -> usize {
        self.positional.iter().filter(|p| p.default.is_none()).count()
    }

    /// Every name the parameter list binds.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.positional
            .iter()
            .map(|p| p.name.as_str())
            .chain(self.varargs.as_deref())
            .chain(self.kwargs.as_deref())
    }
}

/// A parsed control line.
#[derive(Debug, Clone, PartialEq)]
pub enum Header {
    If(Expr),
    Elif(Expr),
    Else,
    For { targets: Vec<String>, iter: Expr },
    While(Expr),
    Def { name: String, params: Params },
}

impl Expr {
    pub fn str(s: impl Into<String>) -> Expr {
        Expr::Literal(Value::Str(s.into()))
    }

    pub fn name(s: impl Into<String>) -> Expr {
        Expr::Name(s.into())
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            func: Box::new(Expr::name(name)),
            args,
            kwargs: Vec::new(),
        }
    }

    pub fn as_literal_str(&self) -> Option<&str> {
        match self {
            Expr::Literal(Value::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Name of the function when this is a call to a bare name.
    pub fn called_name(&self) -> Option<&str> {
        match self {
            Expr::Call { func, .. } => match func.as_ref() {
                Expr::Name(n) => Some(n),
                _ => None,
            },
            _ => None,
        }
    }

    fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_) | Expr::Name(_) => Vec::new(),
            Expr::List(items) | Expr::Tuple(items) => items.iter().collect(),
            Expr::Dict(pairs) => pairs.iter().flat_map(|(k, v)| [k, v]).collect(),
            Expr::Attr(obj, _) => vec![&**obj],
            Expr::Index(obj, idx) => vec![&**obj, &**idx],
            Expr::Call { func, args, kwargs } => {
                let mut out: Vec<&Expr> = vec![&**func];
                out.extend(args.iter());
                out.extend(kwargs.iter().map(|(_, v)| v));
                out
            }
            Expr::Unary(_, e) => vec![&**e],
            Expr::Binary(_, l, r) | Expr::Compare(_, l, r) | Expr::And(l, r) | Expr::Or(l, r) => {
                vec![&**l, &**r]
            }
            Expr::IfElse { test, body, orelse } => vec![&**test, &**body, &**orelse],
        }
    }

    /// Visits every name read, in source order.
    pub fn for_each_name<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        if let Expr::Name(n) = self {
            f(n);
        }
        for child in self.children() {
            child.for_each_name(f);
        }
    }

    pub fn mentions(&self, name: &str) -> bool {
        let mut found = false;
        self.for_each_name(&mut |n| found |= n == name);
        found
    }

    /// True when the expression reads no names besides builtins not rebound in `shadowed`.
    pub fn is_static(&self, shadowed: &HashSet<String>) -> bool {
        let mut ok = true;
        self.for_each_name(&mut |n| {
            if !builtins::is_builtin(n) || shadowed.contains(n) {
                ok = false;
            }
        });
        ok
    }

    /// True when every call in the expression targets a builtin or a method.
    pub fn calls_only_builtins(&self) -> bool {
        if let Expr::Call { func, .. } = self {
            if let Expr::Name(n) = func.as_ref() {
                if !builtins::is_builtin(n) {
                    return false;
                }
            }
        }
        self.children().into_iter().all(Expr::calls_only_builtins)
    }

    /// Replaces name reads by the mapped expressions.
    pub fn substitute(&self, map: &HashMap<String, Expr>) -> Expr {
        let sub = |e: &Expr| e.substitute(map);
        let boxed = |e: &Expr| Box::new(e.substitute(map));
        match self {
            Expr::Name(n) => map.get(n).cloned().unwrap_or_else(|| self.clone()),
            Expr::Literal(_) => self.clone(),
            Expr::List(items) => Expr::List(items.iter().map(sub).collect()),
            Expr::Tuple(items) => Expr::Tuple(items.iter().map(sub).collect()),
            Expr::Dict(pairs) => Expr::Dict(pairs.iter().map(|(k, v)| (sub(k), sub(v))).collect()),
            Expr::Attr(obj, attr) => Expr::Attr(boxed(obj), attr.clone()),
            Expr::Index(obj, idx) => Expr::Index(boxed(obj), boxed(idx)),
            Expr::Call { func, args, kwargs } => Expr::Call {
                func: boxed(func),
                args: args.iter().map(sub).collect(),
                kwargs: kwargs.iter().map(|(k, v)| (k.clone(), sub(v))).collect(),
            },
            Expr::Unary(op, e) => Expr::Unary(*op, boxed(e)),
            Expr::Binary(op, l, r) => Expr::Binary(*op, boxed(l), boxed(r)),
            Expr::Compare(op, l, r) => Expr::Compare(*op, boxed(l), boxed(r)),
            Expr::And(l, r) => Expr::And(boxed(l), boxed(r)),
            Expr::Or(l, r) => Expr::Or(boxed(l), boxed(r)),
            Expr::IfElse { test, body, orelse } => Expr::IfElse {
                test: boxed(test),
                body: boxed(body),
                orelse: boxed(orelse),
            },
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Not => "not ",
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
        })
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
        })
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        })
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => f.write_str(&v.repr()),
            Expr::Name(n) => f.write_str(n),
            Expr::List(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Expr::Tuple(items) => {
                f.write_str("(")?;
                write_list(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Expr::Dict(pairs) => {
                f.write_str("{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            Expr::Attr(obj, attr) => write!(f, "{}.{}", obj, attr),
            Expr::Index(obj, idx) => write!(f, "{}[{}]", obj, idx),
            Expr::Call { func, args, kwargs } => {
                write!(f, "{}(", func)?;
                write_list(f, args)?;
                for (i, (k, v)) in kwargs.iter().enumerate() {
                    if i > 0 || !args.is_empty() {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", k, v)?;
                }
                f.write_str(")")
            }
            Expr::Unary(op, e) => write!(f, "({}{})", op, e),
            Expr::Binary(op, l, r) => write!(f, "({} {} {})", l, op, r),
            Expr::Compare(op, l, r) => write!(f, "({} {} {})", l, op, r),
            Expr::And(l, r) => write!(f, "({} and {})", l, r),
            Expr::Or(l, r) => write!(f, "({} or {})", l, r),
            Expr::IfElse { test, body, orelse } => {
                write!(f, "({} if {} else {})", body, test, orelse)
            }
        }
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .positional
            .iter()
            .map(|p| match &p.default {
                Some(d) => format!("{}={}", p.name, d),
                None => p.name.clone(),
            })
            .collect();
        if let Some(v) = &self.varargs {
            parts.push(format!("*{}", v));
        }
        if let Some(k) = &self.kwargs {
            parts.push(format!("**{}", k));
        }
        f.write_str(&parts.join(", "))
    }
}
