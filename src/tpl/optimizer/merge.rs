use std::mem;

use crate::expr::Expr;
use crate::tpl::ir::{Instr, InstrKind};
use crate::value::Value;

/// Collapses runs of writes, concatenating adjacent literal text. A run holds
/// dynamic payloads from one source line only, so render errors keep their
/// line.
pub(super) fn run(body: Vec<Instr>) -> Vec<Instr> {
    let mut out = Vec::with_capacity(body.len());
    let mut pending = Run::default();

    for instr in body {
        let instr = instr.map_bodies(&mut run);
        let line = instr.line;
        match instr.kind {
            InstrKind::Write(e) => pending.push(line, e, &mut out),
            InstrKind::WriteMany(items) => {
                for e in items {
                    pending.push(line, e, &mut out);
                }
            }
            kind => {
                pending.flush(&mut out);
                out.push(Instr::new(line, kind));
            }
        }
    }
    pending.flush(&mut out);
    out
}

#[derive(Default)]
struct Run {
    payload: Vec<Expr>,
    first_line: usize,
    dynamic_line: Option<usize>,
}

impl Run {
    fn push(&mut self, line: usize, expr: Expr, out: &mut Vec<Instr>) {
        let literal = expr.as_literal_str().is_some();
        if let Some(text) = expr.as_literal_str() {
            if text.is_empty() {
                return;
            }
            if let Some(Expr::Literal(Value::Str(prev))) = self.payload.last_mut() {
                prev.push_str(text);
                return;
            }
        } else if self.dynamic_line.is_some_and(|d| d != line) {
            self.flush(out);
        }
        if self.payload.is_empty() {
            self.first_line = line;
        }
        if !literal {
            self.dynamic_line = Some(line);
        }
        self.payload.push(expr);
    }

    fn flush(&mut self, out: &mut Vec<Instr>) {
        let line = self.dynamic_line.take().unwrap_or(self.first_line);
        match self.payload.len() {
            0 => {}
            1 => {
                if let Some(e) = self.payload.pop() {
                    out.push(Instr::write(line, e));
                }
            }
            _ => out.push(Instr::new(line, InstrKind::WriteMany(mem::take(&mut self.payload)))),
        }
    }
}
