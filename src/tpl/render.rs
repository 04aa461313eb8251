use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::HamlError;
use crate::expr::builtins::iterate;
use crate::expr::{Env, EvalError, Expr, eval};
use crate::tpl::ir::{Instr, InstrKind, LoopHead, write_attrs_call};
use crate::tpl::render_context::{Binding, Callable, Context};
use crate::value::Value;

/// Nested procedure calls allowed before a render gives up.
const MAX_CALL_DEPTH: usize = 64;

struct Fault {
    line: usize,
    error: EvalError,
}

struct Walker {
    ctx: Context,
    out: String,
    depth: usize,
    // innermost failure, kept so errors raised inside a procedure body
    // report that line rather than the call site
    fault: Option<Fault>,
}

/// Executes IR against a prepared context, returning the rendered text.
pub(crate) fn render(body: &[Instr], ctx: Context, capacity: usize) -> Result<String, HamlError> {
    let mut walker = Walker {
        ctx,
        out: String::with_capacity(capacity),
        depth: 0,
        fault: None,
    };
    match walker.block(body) {
        Ok(()) => Ok(walker.out),
        Err(outer) => {
            let fault = walker.fault.take().unwrap_or(outer);
            Err(HamlError::Render {
                line: fault.line,
                source: fault.error,
            })
        }
    }
}

impl Env for Walker {
    fn lookup(&self, name: &str) -> Option<Value> {
        match self.ctx.lookup(name)? {
            Binding::Value(v) => Some(v.clone()),
            Binding::Procedure(c) => Some(Value::Str(format!("<procedure {}>", c.procedure.name))),
        }
    }

    fn is_procedure(&self, name: &str) -> bool {
        matches!(self.ctx.lookup(name), Some(Binding::Procedure(_)))
    }

    fn call(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, EvalError> {
        match self.ctx.lookup(name) {
            Some(Binding::Procedure(c)) => {
                let callable = c.clone();
                self.invoke(callable, args, kwargs)
            }
            _ => Err(EvalError::NotCallable(name.to_string())),
        }
    }
}

impl Walker {
    fn eval_at(&mut self, expr: &Expr, line: usize) -> Result<Value, Fault> {
        eval(expr, self).map_err(|error| Fault { line, error })
    }

    fn block(&mut self, body: &[Instr]) -> Result<(), Fault> {
        for instr in body {
            self.instr(instr)?;
        }
        Ok(())
    }

    fn write(&mut self, expr: &Expr, line: usize) -> Result<(), Fault> {
        if let Some(text) = expr.as_literal_str() {
            self.out.push_str(text);
            return Ok(());
        }
        match self.eval_at(expr, line)? {
            Value::Str(s) => self.out.push_str(&s),
            other => self.out.push_str(&other.to_text()),
        }
        Ok(())
    }

    fn instr(&mut self, instr: &Instr) -> Result<(), Fault> {
        let line = instr.line;
        match &instr.kind {
            InstrKind::Write(e) => self.write(e, line)?,
            InstrKind::WriteMany(items) => {
                for e in items {
                    self.write(e, line)?;
                }
            }
            InstrKind::Attrs(items) => self.write(&write_attrs_call(items), line)?,
            InstrKind::Conditional { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval_at(test, line)?.is_true() {
                        return self.block(body);
                    }
                }
                self.block(orelse)?;
            }
            InstrKind::Loop {
                head: LoopHead::For { targets, iter },
                body,
            } => {
                let iterable = self.eval_at(iter, line)?;
                let items = iterate(&iterable).map_err(|error| Fault { line, error })?;
                self.ctx.push(false);
                let result = self.for_loop(targets, items, body, line);
                self.ctx.pop();
                result?;
            }
            InstrKind::Loop {
                head: LoopHead::While(test),
                body,
            } => {
                while self.eval_at(test, line)?.is_true() {
                    self.block(body)?;
                }
            }
            InstrKind::Assign { targets, value } => {
                let value = self.eval_at(value, line)?;
                self.store(targets, value, false)
                    .map_err(|error| Fault { line, error })?;
            }
            InstrKind::Eval(e) => {
                self.eval_at(e, line)?;
            }
            InstrKind::ProcedureDef(p) => {
                let mut defaults = Vec::with_capacity(p.params.positional.len());
                for param in &p.params.positional {
                    defaults.push(match &param.default {
                        Some(d) => Some(self.eval_at(d, line)?),
                        None => None,
                    });
                }
                let callable = Callable {
                    procedure: p.clone(),
                    defaults: Arc::new(defaults),
                };
                self.ctx.assign(&p.name, Binding::Procedure(callable));
            }
        }
        Ok(())
    }

    fn for_loop(
        &mut self,
        targets: &[String],
        items: Vec<Value>,
        body: &[Instr],
        line: usize,
    ) -> Result<(), Fault> {
        for item in items {
            self.store(targets, item, true)
                .map_err(|error| Fault { line, error })?;
            self.block(body)?;
        }
        Ok(())
    }

    /// Binds `value` to the targets, unpacking when there are several.
    fn store(&mut self, targets: &[String], value: Value, local: bool) -> Result<(), EvalError> {
        let mut bind = |ctx: &mut Context, name: &str, v: Value| {
            if local {
                ctx.bind_local(name, Binding::Value(v));
            } else {
                ctx.assign(name, Binding::Value(v));
            }
        };
        if let [target] = targets {
            bind(&mut self.ctx, target, value);
            return Ok(());
        }
        let items = match value {
            Value::List(items) | Value::Tuple(items) => items,
            Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
            other => {
                return Err(EvalError::Type(format!(
                    "cannot unpack non-sequence {}",
                    other.type_name()
                )));
            }
        };
        if items.len() != targets.len() {
            return Err(EvalError::Unpack {
                expected: targets.len(),
                got: items.len(),
            });
        }
        for (target, item) in targets.iter().zip(items) {
            bind(&mut self.ctx, target, item);
        }
        Ok(())
    }

    fn invoke(
        &mut self,
        callable: Callable,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, EvalError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(EvalError::Recursion);
        }
        let bindings = bind_arguments(&callable, args, kwargs)?;
        self.ctx.push(true);
        for (name, value) in bindings {
            self.ctx.bind_local(&name, Binding::Value(value));
        }
        self.depth += 1;
        let result = self.block(&callable.procedure.body);
        self.depth -= 1;
        self.ctx.pop();
        match result {
            Ok(()) => Ok(Value::Null),
            Err(fault) => {
                let error = fault.error.clone();
                self.fault.get_or_insert(fault);
                Err(error)
            }
        }
    }
}

fn bind_arguments(
    callable: &Callable,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Vec<(String, Value)>, EvalError> {
    let name = &callable.procedure.name;
    let params = &callable.procedure.params;
    let count = params.positional.len();

    let mut slots: Vec<Option<Value>> = vec![None; count];
    let mut args = args.into_iter();
    for slot in slots.iter_mut() {
        match args.next() {
            Some(v) => *slot = Some(v),
            None => break,
        }
    }
    let extra: Vec<Value> = args.collect();
    if !extra.is_empty() && params.varargs.is_none() {
        return Err(EvalError::Arguments(format!(
            "{}() takes {} positional arguments but {} were given",
            name,
            count,
            count + extra.len()
        )));
    }

    let mut extra_kwargs = BTreeMap::new();
    for (key, value) in kwargs {
        match params.positional.iter().position(|p| p.name == key) {
            Some(i) if slots[i].is_some() => {
                return Err(EvalError::Arguments(format!(
                    "{}() got multiple values for argument '{}'",
                    name, key
                )));
            }
            Some(i) => slots[i] = Some(value),
            None if params.kwargs.is_some() => {
                extra_kwargs.insert(key, value);
            }
            None => {
                return Err(EvalError::Arguments(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    name, key
                )));
            }
        }
    }

    let mut out = Vec::with_capacity(count + 2);
    for ((param, slot), default) in params.positional.iter().zip(slots).zip(callable.defaults.iter()) {
        match slot.or_else(|| default.clone()) {
            Some(v) => out.push((param.name.clone(), v)),
            None => {
                return Err(EvalError::Arguments(format!(
                    "{}() missing required argument '{}'",
                    name, param.name
                )));
            }
        }
    }
    if let Some(varargs) = &params.varargs {
        out.push((varargs.clone(), Value::Tuple(extra)));
    }
    if let Some(kw) = &params.kwargs {
        out.push((kw.clone(), Value::Map(extra_kwargs)));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpl::compiler::compile;
    use crate::tpl::parser::parse;
    use std::collections::HashMap;

    fn run(src: &str, vars: &[(&str, Value)]) -> Result<String, HamlError> {
        let ir = compile(&parse(src)?)?;
        let globals: HashMap<String, Value> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        render(&ir, Context::new(globals), 64)
    }

    #[test]
    fn test_escaped_output() {
        let out = run("= '<b>'", &[]).unwrap();
        assert_eq!(out, "&lt;b&gt;\n");
    }

    #[test]
    fn test_attrs_unoptimized() {
        let out = run("%a.x(title=t) go", &[("t", Value::from("x&y"))]).unwrap();
        assert_eq!(out, "<a class='x' title='x&amp;y'>\ngo\n</a>\n");
    }

    #[test]
    fn test_loops_and_unpacking() {
        let src = "- for k, v in pairs\n  = k + '=' + str(v)";
        let pairs = Value::List(vec![
            Value::Tuple(vec![Value::from("a"), Value::Int(1)]),
            Value::Tuple(vec![Value::from("b"), Value::Int(2)]),
        ]);
        assert_eq!(run(src, &[("pairs", pairs)]).unwrap(), "a=1\nb=2\n");

        let err = run("- for a, b in [1]\n  = a", &[]).unwrap_err();
        assert!(matches!(err, HamlError::Render { line: 1, .. }));
    }

    #[test]
    fn test_while_and_assign() {
        let src = "+ n = 0\n- while n < 3\n  = n\n  + n = n + 1";
        assert_eq!(run(src, &[]).unwrap(), "0\n1\n2\n");
    }

    #[test]
    fn test_procedures() {
        let src = "\
- def item(label, mark='*', *rest, **opts)
  %li= mark + label + str(len(rest)) + str(len(opts))
+ item('a')
+ item('b', '-', 1, 2, x=3)";
        assert_eq!(
            run(src, &[]).unwrap(),
            "<li>\n*a00\n</li>\n<li>\n-b21\n</li>\n"
        );
    }

    #[test]
    fn test_procedure_scope_is_local() {
        let src = "+ x = 'outer'\n- def f()\n  + x = 'inner'\n  = x\n+ f()\n= x";
        assert_eq!(run(src, &[]).unwrap(), "inner\nouter\n");
    }

    #[test]
    fn test_argument_errors() {
        let err = run("- def f(a)\n  = a\n+ f()", &[]).unwrap_err();
        assert!(err.to_string().contains("missing required argument 'a'"));
        let err = run("- def f(a)\n  = a\n+ f(1, 2)", &[]).unwrap_err();
        assert!(matches!(err, HamlError::Render { line: 3, .. }));
    }

    #[test]
    fn test_error_line_inside_procedure() {
        let err = run("- def f()\n  = missing\n+ f()", &[]).unwrap_err();
        match err {
            HamlError::Render { line, source } => {
                assert_eq!(line, 2);
                assert_eq!(source, EvalError::Undefined("missing".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_runaway_recursion() {
        let err = run("- def f()\n  + f()\n+ f()", &[]).unwrap_err();
        assert!(matches!(
            err,
            HamlError::Render {
                source: EvalError::Recursion,
                ..
            }
        ));
    }
}
