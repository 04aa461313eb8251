use tracing::trace;

use crate::tpl::ir::{Instr, InstrKind};
use crate::tpl::optimizer::PassContext;

/// Resolves conditionals whose leading tests are static, splicing the
/// chosen branch in place.
pub(super) fn run(body: Vec<Instr>, ctx: &PassContext, changed: &mut bool) -> Vec<Instr> {
    let mut out = Vec::with_capacity(body.len());
    for instr in body {
        let instr = instr.map_bodies(&mut |b| run(b, ctx, changed));
        let line = instr.line;
        let (branches, orelse) = match instr.kind {
            InstrKind::Conditional { branches, orelse } => (branches, orelse),
            kind => {
                out.push(Instr::new(line, kind));
                continue;
            }
        };

        let total = branches.len();
        let mut remaining = Vec::with_capacity(total);
        let mut taken = None;
        for (test, branch) in branches {
            if !remaining.is_empty() {
                remaining.push((test, branch));
                continue;
            }
            match ctx.static_value(&test).map(|v| v.is_true()) {
                Some(true) => {
                    taken = Some(branch);
                    break;
                }
                Some(false) => {}
                None => remaining.push((test, branch)),
            }
        }

        if remaining.len() == total {
            out.push(Instr::new(
                line,
                InstrKind::Conditional {
                    branches: remaining,
                    orelse,
                },
            ));
            continue;
        }
        trace!(line, "pruned conditional");
        *changed = true;
        match taken {
            Some(branch) => out.extend(branch),
            None if remaining.is_empty() => out.extend(orelse),
            None => out.push(Instr::new(
                line,
                InstrKind::Conditional {
                    branches: remaining,
                    orelse,
                },
            )),
        }
    }
    out
}
