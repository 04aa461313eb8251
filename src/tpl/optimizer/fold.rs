use crate::expr::Expr;
use crate::tpl::ir::{Instr, InstrKind};
use crate::tpl::optimizer::PassContext;

/// Evaluates static write payloads, escape calls included, into literal text.
pub(super) fn run(body: Vec<Instr>, ctx: &PassContext) -> Vec<Instr> {
    body.into_iter()
        .map(|instr| {
            let instr = instr.map_bodies(&mut |b| run(b, ctx));
            let kind = match instr.kind {
                InstrKind::Write(e) => InstrKind::Write(fold(e, ctx)),
                InstrKind::WriteMany(items) => {
                    InstrKind::WriteMany(items.into_iter().map(|e| fold(e, ctx)).collect())
                }
                kind => kind,
            };
            Instr::new(instr.line, kind)
        })
        .collect()
}

fn fold(expr: Expr, ctx: &PassContext) -> Expr {
    if expr.as_literal_str().is_some() {
        return expr;
    }
    match ctx.static_value(&expr) {
        Some(value) => Expr::str(value.to_text()),
        None => expr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptimizerOptions;
    use crate::tpl::optimizer::tests::lower;

    fn folded(src: &str) -> Vec<InstrKind> {
        let ir = lower(src);
        let ctx = PassContext::new(&ir, &OptimizerOptions::new());
        run(ir, &ctx).into_iter().map(|i| i.kind).collect()
    }

    #[test]
    fn test_static_escape_folded() {
        let out = folded("= '<b>'");
        assert_eq!(out[0], InstrKind::Write(Expr::str("&lt;b&gt;")));
        let out = folded("= 2 * 21");
        assert_eq!(out[0], InstrKind::Write(Expr::str("42")));
    }

    #[test]
    fn test_dynamic_and_failing_kept() {
        let out = folded("= name");
        assert!(matches!(&out[0], InstrKind::Write(e) if e.as_literal_str().is_none()));
        let out = folded("= 1 / 0");
        assert!(matches!(&out[0], InstrKind::Write(e) if e.as_literal_str().is_none()));
    }
}
