use std::collections::HashSet;

use crate::expr::builtins::is_builtin;
use crate::expr::Expr;
use crate::tpl::ir::{AttrItem, Instr, InstrKind, LoopHead};

struct Frame {
    names: HashSet<String>,
    procedure: bool,
}

struct Collector {
    frames: Vec<Frame>,
    seen: HashSet<String>,
    found: Vec<String>,
}

/// Names a template reads without binding them first, in first-occurrence
/// order. These are the inputs a render context must provide.
pub fn free_variables(body: &[Instr]) -> Vec<String> {
    let mut collector = Collector {
        frames: vec![Frame {
            names: HashSet::new(),
            procedure: true,
        }],
        seen: HashSet::new(),
        found: Vec::new(),
    };
    collector.bind_procedures(body);
    collector.block(body);
    collector.found
}

/// Procedures a frame defines anywhere in its control flow, outside nested
/// procedure bodies.
fn defined_procedures<'a>(body: &'a [Instr], out: &mut Vec<&'a str>) {
    for instr in body {
        match &instr.kind {
            InstrKind::ProcedureDef(p) => out.push(&p.name),
            _ => {
                for nested in instr.bodies() {
                    defined_procedures(nested, out);
                }
            }
        }
    }
}

impl Collector {
    fn is_bound(&self, name: &str) -> bool {
        self.frames.iter().any(|f| f.names.contains(name))
    }

    fn read(&mut self, expr: &Expr) {
        let mut names = Vec::new();
        expr.for_each_name(&mut |n| names.push(n.to_string()));
        for name in names {
            if is_builtin(&name) || self.is_bound(&name) || self.seen.contains(&name) {
                continue;
            }
            self.seen.insert(name.clone());
            self.found.push(name);
        }
    }

    /// Binds in the innermost procedure (or template) frame.
    fn bind(&mut self, name: &str) {
        if let Some(frame) = self.frames.iter_mut().rev().find(|f| f.procedure) {
            frame.names.insert(name.to_string());
        }
    }

    /// Procedures of a frame are visible to each other before their
    /// definitions run, so mutually recursive calls are not free reads.
    fn bind_procedures(&mut self, body: &[Instr]) {
        let mut names = Vec::new();
        defined_procedures(body, &mut names);
        for name in names {
            self.bind(name);
        }
    }

    fn scoped<'a>(&mut self, names: impl IntoIterator<Item = &'a str>, procedure: bool, body: &[Instr]) {
        self.frames.push(Frame {
            names: names.into_iter().map(str::to_string).collect(),
            procedure,
        });
        if procedure {
            self.bind_procedures(body);
        }
        self.block(body);
        self.frames.pop();
    }

    fn block(&mut self, body: &[Instr]) {
        for instr in body {
            self.instr(instr);
        }
    }

    fn instr(&mut self, instr: &Instr) {
        match &instr.kind {
            InstrKind::Write(e) | InstrKind::Eval(e) => self.read(e),
            InstrKind::WriteMany(items) => items.iter().for_each(|e| self.read(e)),
            InstrKind::Attrs(items) => {
                for item in items {
                    match item {
                        AttrItem::Pair(n, v) => {
                            self.read(n);
                            self.read(v);
                        }
                        AttrItem::Spread(e) => self.read(e),
                    }
                }
            }
            InstrKind::Conditional { branches, orelse } => {
                for (test, body) in branches {
                    self.read(test);
                    self.block(body);
                }
                self.block(orelse);
            }
            InstrKind::Loop { head, body } => match head {
                LoopHead::For { targets, iter } => {
                    self.read(iter);
                    self.scoped(targets.iter().map(String::as_str), false, body);
                }
                LoopHead::While(test) => {
                    self.read(test);
                    self.block(body);
                }
            },
            InstrKind::Assign { targets, value } => {
                self.read(value);
                for target in targets {
                    self.bind(target);
                }
            }
            InstrKind::ProcedureDef(p) => {
                for default in p.params.positional.iter().filter_map(|param| param.default.as_ref()) {
                    self.read(default);
                }
                self.bind(&p.name);
                self.scoped(p.params.names(), true, &p.body);
            }
        }
    }
}
