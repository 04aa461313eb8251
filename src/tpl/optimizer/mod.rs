//! IR rewrites that preserve rendered output.
//!
//! Attribute flattening runs first. Loop unrolling, procedure inlining and
//! branch pruning then repeat until none of them changes the IR or the
//! iteration cap is hit. Escape folding and write merging run last.

use std::collections::HashSet;

use tracing::trace;

use crate::expr::{Expr, eval_static};
use crate::options::OptimizerOptions;
use crate::tpl::ir::{self, Instr, InstrKind, LoopHead};
use crate::value::Value;

mod fold;
mod inline;
mod merge;
mod open_tag;
mod prune;
mod unroll;

/// Facts about the whole template the passes consult.
pub(crate) struct PassContext {
    /// Every name the template binds: assignment and loop targets,
    /// parameters and procedure names.
    pub shadowed: HashSet<String>,
    /// Like `shadowed`, minus procedure names.
    pub rebound: HashSet<String>,
    pub max_unroll: usize,
}

impl PassContext {
    fn new(body: &[Instr], options: &OptimizerOptions) -> Self {
        let mut rebound = HashSet::new();
        let mut procedures = HashSet::new();
        ir::walk(body, &mut |instr| match &instr.kind {
            InstrKind::Assign { targets, .. }
            | InstrKind::Loop {
                head: LoopHead::For { targets, .. },
                ..
            } => rebound.extend(targets.iter().cloned()),
            InstrKind::ProcedureDef(p) => {
                procedures.insert(p.name.clone());
                rebound.extend(p.params.names().map(str::to_string));
            }
            _ => {}
        });
        let shadowed = rebound.union(&procedures).cloned().collect();
        PassContext {
            shadowed,
            rebound,
            max_unroll: options.max_unroll,
        }
    }

    /// Compile-time value of a static expression; `None` when the expression
    /// reads names or fails to evaluate.
    pub fn static_value(&self, expr: &Expr) -> Option<Value> {
        if !expr.is_static(&self.shadowed) {
            return None;
        }
        eval_static(expr).ok()
    }
}

pub fn optimize(body: Vec<Instr>, options: &OptimizerOptions) -> Vec<Instr> {
    if !options.enabled {
        return body;
    }
    let ctx = PassContext::new(&body, options);

    let mut body = open_tag::run(body, &ctx);
    for iteration in 0..options.max_iterations {
        let mut changed = false;
        body = unroll::run(body, &ctx, &mut changed);
        body = inline::run(body, &ctx, &mut changed);
        body = prune::run(body, &ctx, &mut changed);
        trace!(iteration, changed, "optimizer round");
        if !changed {
            break;
        }
    }
    let body = fold::run(body, &ctx);
    merge::run(body)
}
