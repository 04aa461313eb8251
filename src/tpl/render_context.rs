use std::collections::HashMap;
use std::sync::Arc;

use crate::tpl::ir::Procedure;
use crate::value::Value;

/// A procedure bound at render time, with its defaults evaluated at definition.
#[derive(Debug, Clone)]
pub(crate) struct Callable {
    pub procedure: Arc<Procedure>,
    pub defaults: Arc<Vec<Option<Value>>>,
}

#[derive(Debug, Clone)]
pub(crate) enum Binding {
    Value(Value),
    Procedure(Callable),
}

struct Frame {
    vars: HashMap<String, Binding>,
    procedure: bool, // template root or procedure call; loops push plain frames
}

/// Name scopes of one render.
pub(crate) struct Context {
    frames: Vec<Frame>,
}

impl Context {
    pub fn new(globals: HashMap<String, Value>) -> Self {
        let vars = globals
            .into_iter()
            .map(|(k, v)| (k, Binding::Value(v)))
            .collect();
        Self {
            frames: vec![Frame {
                vars,
                procedure: true,
            }],
        }
    }

    pub fn push(&mut self, procedure: bool) {
        self.frames.push(Frame {
            vars: HashMap::new(),
            procedure,
        });
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&Binding> {
        self.frames.iter().rev().find_map(|f| f.vars.get(key))
    }

    /// Binds in the innermost frame (loop targets, parameters).
    pub fn bind_local(&mut self, key: &str, binding: Binding) {
        if let Some(frame) = self.frames.last_mut() {
            frame.vars.insert(key.to_string(), binding);
        }
    }

    /// Assignment: rebinds the name where it is visible up to the innermost
    /// procedure frame, otherwise creates it in that procedure frame.
    pub fn assign(&mut self, key: &str, binding: Binding) {
        for frame in self.frames.iter_mut().rev() {
            if frame.procedure || frame.vars.contains_key(key) {
                frame.vars.insert(key.to_string(), binding);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(ctx: &Context, key: &str) -> Option<Value> {
        match ctx.lookup(key) {
            Some(Binding::Value(v)) => Some(v.clone()),
            _ => None,
        }
    }

    #[test]
    fn test_lookup_shadowing() {
        let mut globals = HashMap::new();
        globals.insert("a".to_string(), Value::Int(1));
        let mut ctx = Context::new(globals);

        ctx.push(false);
        ctx.bind_local("a", Binding::Value(Value::Int(2)));
        assert_eq!(value(&ctx, "a"), Some(Value::Int(2)));

        ctx.pop();
        assert_eq!(value(&ctx, "a"), Some(Value::Int(1)));
        assert_eq!(value(&ctx, "b"), None);
    }

    #[test]
    fn test_assign_targets_procedure_frame() {
        let mut ctx = Context::new(HashMap::new());
        ctx.push(false);
        ctx.bind_local("item", Binding::Value(Value::Int(1)));
        ctx.assign("item", Binding::Value(Value::Int(5)));
        ctx.assign("total", Binding::Value(Value::Int(9)));
        assert_eq!(value(&ctx, "item"), Some(Value::Int(5)));
        ctx.pop();
        assert_eq!(value(&ctx, "item"), None);
        assert_eq!(value(&ctx, "total"), Some(Value::Int(9)));
    }

    #[test]
    fn test_assign_inside_procedure_stays_local() {
        let mut ctx = Context::new(HashMap::new());
        ctx.assign("x", Binding::Value(Value::Int(1)));
        ctx.push(true);
        ctx.assign("x", Binding::Value(Value::Int(2)));
        assert_eq!(value(&ctx, "x"), Some(Value::Int(2)));
        ctx.pop();
        assert_eq!(value(&ctx, "x"), Some(Value::Int(1)));
    }
}
