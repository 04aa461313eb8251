use std::collections::HashMap;

use tracing::trace;

use crate::expr::Expr;
use crate::expr::builtins::iterate;
use crate::tpl::ir::{self, Instr, InstrKind, LoopHead};
use crate::tpl::optimizer::PassContext;
use crate::value::Value;

/// Replaces `for` loops over static iterables with one body copy per item.
pub(super) fn run(body: Vec<Instr>, ctx: &PassContext, changed: &mut bool) -> Vec<Instr> {
    let mut out = Vec::with_capacity(body.len());
    for instr in body {
        if let InstrKind::Loop {
            head: LoopHead::For { targets, iter },
            body: loop_body,
        } = &instr.kind
        {
            if let Some(copies) = unroll(targets, iter, loop_body, ctx) {
                trace!(line = instr.line, instructions = copies.len(), "unrolled loop");
                *changed = true;
                out.extend(copies);
                continue;
            }
        }
        out.push(instr.map_bodies(&mut |b| run(b, ctx, changed)));
    }
    out
}

fn unroll(targets: &[String], iter: &Expr, body: &[Instr], ctx: &PassContext) -> Option<Vec<Instr>> {
    let iterable = ctx.static_value(iter)?;
    let items = iterate(&iterable).ok()?;
    if items.len() > ctx.max_unroll || !unrollable_body(targets, body) {
        return None;
    }
    let mut out = Vec::new();
    for item in items {
        let values = unpack(targets.len(), item)?;
        let map: HashMap<String, Expr> = targets
            .iter()
            .cloned()
            .zip(values.into_iter().map(Expr::Literal))
            .collect();
        out.extend(ir::substitute(body, &map));
    }
    Some(out)
}

// The body must not rebind a target, define procedures, or call anything but
// builtins: procedures read loop targets through the call stack.
fn unrollable_body(targets: &[String], body: &[Instr]) -> bool {
    !ir::any(body, &mut |instr| match &instr.kind {
        InstrKind::Assign { targets: assigned, .. } => assigned.iter().any(|t| targets.contains(t)),
        InstrKind::ProcedureDef(_) => true,
        _ => instr.exprs().iter().any(|e| !e.calls_only_builtins()),
    })
}

fn unpack(count: usize, item: Value) -> Option<Vec<Value>> {
    if count == 1 {
        return Some(vec![item]);
    }
    let items = match item {
        Value::List(items) | Value::Tuple(items) => items,
        Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
        _ => return None,
    };
    (items.len() == count).then_some(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptimizerOptions;
    use crate::tpl::optimizer::tests::lower;

    fn unrolled(src: &str, options: &OptimizerOptions) -> (Vec<Instr>, bool) {
        let ir = lower(src);
        let ctx = PassContext::new(&ir, options);
        let mut changed = false;
        let out = run(ir, &ctx, &mut changed);
        (out, changed)
    }

    fn has_loop(body: &[Instr]) -> bool {
        ir::any(body, &mut |i| matches!(i.kind, InstrKind::Loop { .. }))
    }

    #[test]
    fn test_unrolls_with_unpacking() {
        let (out, changed) = unrolled(
            "- for k, v in [('a', 1), ('b', 2)]\n  = k\n  = v",
            &OptimizerOptions::new(),
        );
        assert!(changed);
        assert!(!has_loop(&out));
        assert_eq!(out.len(), 8);
        assert!(!out[0].exprs()[0].mentions("k"));
    }

    #[test]
    fn test_dynamic_iterable_kept() {
        let (out, changed) = unrolled("- for x in items\n  = x", &OptimizerOptions::new());
        assert!(!changed);
        assert!(has_loop(&out));
    }

    #[test]
    fn test_limits() {
        let (_, changed) = unrolled(
            "- for x in range(10)\n  = x",
            &OptimizerOptions::new().max_unroll(5),
        );
        assert!(!changed);
        let (_, changed) = unrolled("- for x in [1, 2]\n  + x = 3", &OptimizerOptions::new());
        assert!(!changed);
        let (_, changed) = unrolled("- for a, b in [1, 2]\n  = a", &OptimizerOptions::new());
        assert!(!changed);
        let (_, changed) = unrolled("- for x in [1]\n  + show(x)", &OptimizerOptions::new());
        assert!(!changed);
    }

    #[test]
    fn test_nested_loop_unrolled_next_round() {
        let (out, changed) = unrolled(
            "- for x in [1, 2]\n  - for y in range(x)\n    = y",
            &OptimizerOptions::new(),
        );
        assert!(changed);
        assert_eq!(out.len(), 2);
        assert!(has_loop(&out));
        let ctx = PassContext::new(&out, &OptimizerOptions::new());
        let mut changed = false;
        let out = run(out, &ctx, &mut changed);
        assert!(changed);
        assert!(!has_loop(&out));
    }
}
