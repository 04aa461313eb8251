use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;

use crate::expr::Expr;
use crate::tpl::ir::{self, Instr, InstrKind, LoopHead, Procedure};
use crate::tpl::optimizer::PassContext;

/// Replaces statement-level procedure calls with the procedure body, then
/// drops definitions nothing refers to any more.
pub(super) fn run(body: Vec<Instr>, ctx: &PassContext, changed: &mut bool) -> Vec<Instr> {
    let mut defs: HashMap<String, usize> = HashMap::new();
    ir::walk(&body, &mut |instr| {
        if let InstrKind::ProcedureDef(p) = &instr.kind {
            *defs.entry(p.name.clone()).or_default() += 1;
        }
    });
    let candidates: HashSet<String> = defs
        .into_iter()
        .filter(|(name, count)| *count == 1 && !ctx.rebound.contains(name))
        .map(|(name, _)| name)
        .collect();

    let body = inline_block(body, ctx, &candidates, &HashMap::new(), changed);

    let mut referenced = HashSet::new();
    ir::walk(&body, &mut |instr| {
        for expr in instr.exprs() {
            expr.for_each_name(&mut |n| {
                referenced.insert(n.to_string());
            });
        }
    });
    drop_unreferenced(body, ctx, &referenced, changed)
}

fn inline_block(
    body: Vec<Instr>,
    ctx: &PassContext,
    candidates: &HashSet<String>,
    visible: &HashMap<String, Arc<Procedure>>,
    changed: &mut bool,
) -> Vec<Instr> {
    let mut visible = visible.clone();
    let mut out = Vec::with_capacity(body.len());
    for instr in body {
        if let InstrKind::Eval(expr) = &instr.kind {
            if let Some(expansion) = expand(expr, &visible) {
                trace!(line = instr.line, "inlined procedure call");
                *changed = true;
                out.extend(expansion);
                continue;
            }
        }
        let instr = instr.map_bodies(&mut |b| inline_block(b, ctx, candidates, &visible, changed));
        if let InstrKind::ProcedureDef(p) = &instr.kind {
            if candidates.contains(&p.name) && inlinable(p, ctx) {
                visible.insert(p.name.clone(), p.clone());
            }
        }
        out.push(instr);
    }
    out
}

fn loop_targets(body: &[Instr]) -> HashSet<&str> {
    let mut targets = HashSet::new();
    ir::walk(body, &mut |instr| {
        if let InstrKind::Loop {
            head: LoopHead::For { targets: t, .. },
            ..
        } = &instr.kind
        {
            targets.extend(t.iter().map(String::as_str));
        }
    });
    targets
}

fn inlinable(p: &Procedure, ctx: &PassContext) -> bool {
    let params = &p.params;
    if params.varargs.is_some() || params.kwargs.is_some() {
        return false;
    }
    let static_defaults = params
        .positional
        .iter()
        .filter_map(|param| param.default.as_ref())
        .all(|d| d.is_static(&ctx.shadowed));
    if !static_defaults || ir::mentions(&p.body, &p.name) {
        return false;
    }
    // Calls left in the body resolve names through the caller's frame, which
    // inlining removes.
    let nested = ir::any(&p.body, &mut |instr| match instr.kind {
        InstrKind::ProcedureDef(_) | InstrKind::Assign { .. } => true,
        _ => instr.exprs().iter().any(|e| !e.calls_only_builtins()),
    });
    if nested {
        return false;
    }
    let targets = loop_targets(&p.body);
    params.names().all(|name| !targets.contains(name))
}

fn expand(expr: &Expr, visible: &HashMap<String, Arc<Procedure>>) -> Option<Vec<Instr>> {
    let (name, args) = match expr {
        Expr::Call { func, args, kwargs } if kwargs.is_empty() => match func.as_ref() {
            Expr::Name(name) => (name, args),
            _ => return None,
        },
        _ => return None,
    };
    let p = visible.get(name)?;
    let params = &p.params.positional;
    if args.len() < p.params.required() || args.len() > params.len() {
        return None;
    }
    if !args.iter().all(Expr::calls_only_builtins) {
        return None;
    }

    let targets = loop_targets(&p.body);
    let mut captured = false;
    for arg in args {
        arg.for_each_name(&mut |n| captured |= targets.contains(n));
    }
    if captured {
        return None;
    }

    let mut map = HashMap::new();
    for (i, param) in params.iter().enumerate() {
        let value = match (args.get(i), &param.default) {
            (Some(arg), _) => arg.clone(),
            (None, Some(default)) => default.clone(),
            (None, None) => return None,
        };
        map.insert(param.name.clone(), value);
    }
    Some(ir::substitute(&p.body, &map))
}

fn drop_unreferenced(
    body: Vec<Instr>,
    ctx: &PassContext,
    referenced: &HashSet<String>,
    changed: &mut bool,
) -> Vec<Instr> {
    let mut out = Vec::with_capacity(body.len());
    for instr in body {
        if let InstrKind::ProcedureDef(p) = &instr.kind {
            let static_defaults = instr.exprs().iter().all(|d| d.is_static(&ctx.shadowed));
            if !referenced.contains(&p.name) && static_defaults {
                trace!(line = instr.line, name = %p.name, "dropped unused procedure");
                *changed = true;
                continue;
            }
        }
        out.push(instr.map_bodies(&mut |b| drop_unreferenced(b, ctx, referenced, changed)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptimizerOptions;
    use crate::tpl::optimizer::tests::lower;

    fn inlined(src: &str) -> (Vec<Instr>, bool) {
        let ir = lower(src);
        let ctx = PassContext::new(&ir, &OptimizerOptions::new());
        let mut changed = false;
        let out = run(ir, &ctx, &mut changed);
        (out, changed)
    }

    fn has_def(body: &[Instr]) -> bool {
        ir::any(body, &mut |i| matches!(i.kind, InstrKind::ProcedureDef(_)))
    }

    #[test]
    fn test_inlines_and_drops_definition() {
        let (out, changed) = inlined("- def greet(who, mark='!')\n  = who + mark\n+ greet(name)");
        assert!(changed);
        assert!(!has_def(&out));
        assert_eq!(out.len(), 2);
        let expr = out[0].exprs()[0];
        assert!(expr.mentions("name"));
        assert!(!expr.mentions("who"));
    }

    #[test]
    fn test_call_before_definition_kept() {
        let (out, changed) = inlined("+ f()\n- def f()\n  x");
        assert!(!changed);
        assert!(has_def(&out));
    }

    #[test]
    fn test_blocked_cases() {
        for src in [
            "- def f(a)\n  + b = a\n+ f(1)",
            "- def f(*a)\n  x\n+ f(1)",
            "- def f(a)\n  x\n+ f(a=1)",
            "- def f(a)\n  x\n+ f(g(1))",
            "- def f(a)\n  - for i in a\n    = i\n+ f([i])",
            "- def f(a)\n  - for a in [1]\n    = a\n+ f(1)",
            "- def f(a)\n  x\n- def f(a)\n  y\n+ f(1)",
            "- def f(a)\n  x\n+ f = 1\n+ f(1)",
            "- def f(n)\n  + f(n)\n+ f(1)",
            "- def g()\n  + q = p\n  = q\n- def f(p)\n  + g()\n+ f(1)",
        ] {
            let (out, _) = inlined(src);
            assert!(
                ir::any(&out, &mut |i| matches!(&i.kind, InstrKind::Eval(e) if e.called_name() == Some("f"))),
                "call inlined for {:?}",
                src
            );
        }
    }

    #[test]
    fn test_inner_calls_inlined_first() {
        let (out, changed) = inlined("- def g(v)\n  = v\n- def f(p)\n  + g(p)\n+ f(1)");
        assert!(changed);
        assert!(!has_def(&out));
        assert!(!ir::any(&out, &mut |i| matches!(i.kind, InstrKind::Eval(_))));
    }

    #[test]
    fn test_unused_definition_dropped() {
        let (out, changed) = inlined("- def unused()\n  x\nhello");
        assert!(changed);
        assert_eq!(out, vec![Instr::text(3, "hello\n")]);
    }
}
