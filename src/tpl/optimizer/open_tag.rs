use crate::escape::quote_attribute;
use crate::expr::Expr;
use crate::expr::builtins::QUOTE_ATTR;
use crate::html::{AttrPart, layout_attrs};
use crate::tpl::ir::{AttrItem, Instr, InstrKind, write_attrs_call};
use crate::tpl::optimizer::PassContext;

/// Replaces every `Attrs` instruction with plain writes.
pub(super) fn run(body: Vec<Instr>, ctx: &PassContext) -> Vec<Instr> {
    let mut out = Vec::with_capacity(body.len());
    for instr in body {
        let instr = instr.map_bodies(&mut |b| run(b, ctx));
        match instr.kind {
            InstrKind::Attrs(items) => out.extend(flatten(&items, instr.line, ctx)),
            kind => out.push(Instr::new(instr.line, kind)),
        }
    }
    out
}

fn flatten(items: &[AttrItem], line: usize, ctx: &PassContext) -> Vec<Instr> {
    let call = write_attrs_call(items);

    if let Some(value) = ctx.static_value(&call) {
        let text = value.to_text();
        return if text.is_empty() {
            Vec::new()
        } else {
            vec![Instr::text(line, text)]
        };
    }

    let mut named = Vec::with_capacity(items.len());
    for item in items {
        let (name, value) = match item {
            AttrItem::Pair(name, value) => (name, value),
            AttrItem::Spread(_) => return vec![Instr::write(line, call)],
        };
        match ctx.static_value(name) {
            Some(name) if name.is_true() => named.push((name.to_text(), value)),
            Some(_) => {}
            None => return vec![Instr::write(line, call)],
        }
    }

    let mut out = Vec::new();
    layout_attrs(named, |part| match part {
        AttrPart::Text(text) => out.push(Instr::text(line, text)),
        AttrPart::Value(value) => out.push(match ctx.static_value(value) {
            Some(v) => Instr::text(line, quote_attribute(&v.to_text()).into_owned()),
            None => Instr::write(line, Expr::call(QUOTE_ATTR, vec![value.clone()])),
        }),
    });
    out
}
