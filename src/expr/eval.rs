use std::cmp::Ordering;
use std::collections::BTreeMap;

use thiserror::Error;

use crate::expr::builtins::{self, compare_values, contains, values_equal};
use crate::expr::{BinOp, CmpOp, Expr, UnaryOp};
use crate::value::Value;

/// Errors raised while evaluating an expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("name '{0}' is not defined")]
    Undefined(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("value error: {0}")]
    Value(String),
    #[error("attribute error: {0}")]
    Attribute(String),
    #[error("key error: {0}")]
    Key(String),
    #[error("index error: {0}")]
    Index(String),
    #[error("'{0}' is not callable")]
    NotCallable(String),
    #[error("{0}")]
    Arguments(String),
    #[error("cannot unpack {got} values into {expected} targets")]
    Unpack { expected: usize, got: usize },
    #[error("division by zero")]
    ZeroDivision,
    #[error("integer overflow")]
    Overflow,
    #[error("maximum recursion depth exceeded")]
    Recursion,
    #[error("result of {0} items exceeds the size limit")]
    TooLarge(usize),
}

/// Largest string or sequence compile-time evaluation may build.
pub const STATIC_SIZE_LIMIT: usize = 1 << 16;

/// Name environment an expression is evaluated in.
pub trait Env {
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Whether `name` is bound to a procedure rather than a value.
    fn is_procedure(&self, _name: &str) -> bool {
        false
    }

    /// Calls a procedure bound in the environment.
    fn call(
        &mut self,
        name: &str,
        _args: Vec<Value>,
        _kwargs: Vec<(String, Value)>,
    ) -> Result<Value, EvalError> {
        Err(EvalError::NotCallable(name.to_string()))
    }

    /// Largest string or sequence an operation may build; `None` is unbounded.
    fn size_limit(&self) -> Option<usize> {
        None
    }
}

/// Environment with no bindings, used for compile-time evaluation.
pub struct StaticEnv;

impl Env for StaticEnv {
    fn lookup(&self, _name: &str) -> Option<Value> {
        None
    }

    fn size_limit(&self) -> Option<usize> {
        Some(STATIC_SIZE_LIMIT)
    }
}

pub fn eval_static(expr: &Expr) -> Result<Value, EvalError> {
    eval(expr, &mut StaticEnv)
}

pub fn eval(expr: &Expr, env: &mut dyn Env) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Name(n) => match env.lookup(n) {
            Some(v) => Ok(v),
            None if builtins::is_builtin(n) => Err(EvalError::Type(format!(
                "builtin '{}' cannot be used as a value",
                n
            ))),
            None => Err(EvalError::Undefined(n.clone())),
        },
        Expr::List(items) => Ok(Value::List(eval_all(items, env)?)),
        Expr::Tuple(items) => Ok(Value::Tuple(eval_all(items, env)?)),
        Expr::Dict(pairs) => {
            let mut map = BTreeMap::new();
            for (k, v) in pairs {
                let key = match eval(k, env)? {
                    Value::Str(s) => s,
                    other => {
                        return Err(EvalError::Type(format!(
                            "dict keys must be str, not {}",
                            other.type_name()
                        )));
                    }
                };
                map.insert(key, eval(v, env)?);
            }
            Ok(Value::Map(map))
        }
        Expr::Attr(obj, attr) => match eval(obj, env)? {
            Value::Map(mut m) => m.remove(attr).ok_or_else(|| {
                EvalError::Attribute(format!("'dict' object has no attribute '{}'", attr))
            }),
            other => Err(EvalError::Attribute(format!(
                "'{}' object has no attribute '{}'",
                other.type_name(),
                attr
            ))),
        },
        Expr::Index(obj, idx) => {
            let obj = eval(obj, env)?;
            let idx = eval(idx, env)?;
            index_value(obj, &idx)
        }
        Expr::Call { func, args, kwargs } => {
            let args = eval_all(args, env)?;
            let mut kw = Vec::with_capacity(kwargs.len());
            for (k, v) in kwargs {
                kw.push((k.clone(), eval(v, env)?));
            }
            match func.as_ref() {
                Expr::Name(n) => {
                    if env.is_procedure(n) {
                        return env.call(n, args, kw);
                    }
                    if env.lookup(n).is_some() {
                        return Err(EvalError::NotCallable(n.clone()));
                    }
                    if builtins::is_builtin(n) {
                        if let Some(limit) = env.size_limit() {
                            builtins::check_size(n, None, &args, limit)?;
                        }
                        return builtins::call_builtin(n, args, kw);
                    }
                    Err(EvalError::Undefined(n.clone()))
                }
                Expr::Attr(obj, method) => {
                    let obj = eval(obj, env)?;
                    if !kw.is_empty() {
                        return Err(EvalError::Arguments(format!(
                            "{}() takes no keyword arguments",
                            method
                        )));
                    }
                    if let Some(limit) = env.size_limit() {
                        builtins::check_size(method, Some(&obj), &args, limit)?;
                    }
                    builtins::call_method(obj, method, args)
                }
                other => Err(EvalError::NotCallable(other.to_string())),
            }
        }
        Expr::Unary(op, operand) => {
            let v = eval(operand, env)?;
            unary_op(*op, v)
        }
        Expr::Binary(op, l, r) => {
            let l = eval(l, env)?;
            let r = eval(r, env)?;
            binary_op(*op, l, r, env.size_limit())
        }
        Expr::Compare(op, l, r) => {
            let l = eval(l, env)?;
            let r = eval(r, env)?;
            compare_op(*op, &l, &r).map(Value::Bool)
        }
        Expr::And(l, r) => {
            let l = eval(l, env)?;
            if !l.is_true() { Ok(l) } else { eval(r, env) }
        }
        Expr::Or(l, r) => {
            let l = eval(l, env)?;
            if l.is_true() { Ok(l) } else { eval(r, env) }
        }
        Expr::IfElse { test, body, orelse } => {
            if eval(test, env)?.is_true() {
                eval(body, env)
            } else {
                eval(orelse, env)
            }
        }
    }
}

fn eval_all(items: &[Expr], env: &mut dyn Env) -> Result<Vec<Value>, EvalError> {
    items.iter().map(|item| eval(item, env)).collect()
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub(crate) fn of(v: &Value) -> Option<Num> {
        match v {
            Value::Bool(b) => Some(Num::Int(*b as i64)),
            Value::Int(i) => Some(Num::Int(*i)),
            Value::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn unsupported(op: impl std::fmt::Display, l: &Value, r: &Value) -> EvalError {
    EvalError::Type(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        l.type_name(),
        r.type_name()
    ))
}

fn unary_op(op: UnaryOp, v: Value) -> Result<Value, EvalError> {
    match (op, Num::of(&v)) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!v.is_true())),
        (UnaryOp::Neg, Some(Num::Int(i))) => i.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
        (UnaryOp::Neg, Some(Num::Float(f))) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Some(Num::Int(i))) => Ok(Value::Int(i)),
        (UnaryOp::Pos, Some(Num::Float(f))) => Ok(Value::Float(f)),
        (_, None) => Err(EvalError::Type(format!(
            "bad operand type for unary {}: '{}'",
            op,
            v.type_name()
        ))),
    }
}

/// Checked repeat count for a sequence of `len` items.
fn repeat_count(len: usize, times: i64, limit: Option<usize>) -> Result<usize, EvalError> {
    let times = usize::try_from(times.max(0)).map_err(|_| EvalError::Overflow)?;
    let total = len
        .checked_mul(times)
        .filter(|n| *n <= isize::MAX as usize)
        .ok_or(EvalError::Overflow)?;
    match limit {
        Some(max) if total > max => Err(EvalError::TooLarge(total)),
        _ => Ok(times),
    }
}

fn floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q }
}

fn py_mod(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }
}

fn py_fmod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
}

pub(crate) fn binary_op(
    op: BinOp,
    l: Value,
    r: Value,
    limit: Option<usize>,
) -> Result<Value, EvalError> {
    match (op, &l, &r) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{}{}", a, b))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            return Ok(Value::List(a.iter().chain(b).cloned().collect()));
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            return Ok(Value::Tuple(a.iter().chain(b).cloned().collect()));
        }
        (BinOp::Mul, Value::Str(s), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Str(s)) => {
            let times = repeat_count(s.len(), *n, limit)?;
            return Ok(Value::Str(s.repeat(times)));
        }
        (BinOp::Mul, Value::List(items), Value::Int(n))
        | (BinOp::Mul, Value::Int(n), Value::List(items)) => {
            let times = repeat_count(items.len(), *n, limit)?;
            return Ok(Value::List(std::iter::repeat_n(items.iter(), times).flatten().cloned().collect()));
        }
        _ => {}
    }

    let (a, b) = match (Num::of(&l), Num::of(&r)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(unsupported(op, &l, &r)),
    };

    let value = match (op, a, b) {
        (BinOp::Add, Num::Int(x), Num::Int(y)) => Value::Int(x.checked_add(y).ok_or(EvalError::Overflow)?),
        (BinOp::Sub, Num::Int(x), Num::Int(y)) => Value::Int(x.checked_sub(y).ok_or(EvalError::Overflow)?),
        (BinOp::Mul, Num::Int(x), Num::Int(y)) => Value::Int(x.checked_mul(y).ok_or(EvalError::Overflow)?),
        (BinOp::Add, x, y) => Value::Float(x.as_f64() + y.as_f64()),
        (BinOp::Sub, x, y) => Value::Float(x.as_f64() - y.as_f64()),
        (BinOp::Mul, x, y) => Value::Float(x.as_f64() * y.as_f64()),
        (BinOp::Div, x, y) => {
            if y.as_f64() == 0.0 {
                return Err(EvalError::ZeroDivision);
            }
            Value::Float(x.as_f64() / y.as_f64())
        }
        (BinOp::FloorDiv, Num::Int(x), Num::Int(y)) => {
            if y == 0 {
                return Err(EvalError::ZeroDivision);
            }
            Value::Int(floor_div(x, y))
        }
        (BinOp::FloorDiv, x, y) => {
            if y.as_f64() == 0.0 {
                return Err(EvalError::ZeroDivision);
            }
            Value::Float((x.as_f64() / y.as_f64()).floor())
        }
        (BinOp::Mod, Num::Int(x), Num::Int(y)) => {
            if y == 0 {
                return Err(EvalError::ZeroDivision);
            }
            Value::Int(py_mod(x, y))
        }
        (BinOp::Mod, x, y) => {
            if y.as_f64() == 0.0 {
                return Err(EvalError::ZeroDivision);
            }
            Value::Float(py_fmod(x.as_f64(), y.as_f64()))
        }
        (BinOp::Pow, Num::Int(x), Num::Int(y)) if y >= 0 => {
            let exp = u32::try_from(y).map_err(|_| EvalError::Overflow)?;
            Value::Int(x.checked_pow(exp).ok_or(EvalError::Overflow)?)
        }
        (BinOp::Pow, x, y) => Value::Float(x.as_f64().powf(y.as_f64())),
    };
    Ok(value)
}

pub(crate) fn compare_op(op: CmpOp, l: &Value, r: &Value) -> Result<bool, EvalError> {
    Ok(match op {
        CmpOp::Eq => values_equal(l, r),
        CmpOp::Ne => !values_equal(l, r),
        CmpOp::Lt => compare_values(l, r)? == Ordering::Less,
        CmpOp::Le => compare_values(l, r)? != Ordering::Greater,
        CmpOp::Gt => compare_values(l, r)? == Ordering::Greater,
        CmpOp::Ge => compare_values(l, r)? != Ordering::Less,
        CmpOp::In => contains(r, l)?,
        CmpOp::NotIn => !contains(r, l)?,
        CmpOp::Is => l.type_name() == r.type_name() && values_equal(l, r),
        CmpOp::IsNot => !(l.type_name() == r.type_name() && values_equal(l, r)),
    })
}

fn normalize_index(i: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if i < 0 { i + len } else { i };
    if (0..len).contains(&idx) { Some(idx as usize) } else { None }
}

fn index_value(obj: Value, idx: &Value) -> Result<Value, EvalError> {
    match (obj, idx) {
        (Value::List(mut items), Value::Int(i)) | (Value::Tuple(mut items), Value::Int(i)) => {
            match normalize_index(*i, items.len()) {
                Some(pos) => Ok(items.swap_remove(pos)),
                None => Err(EvalError::Index("index out of range".to_string())),
            }
        }
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            match normalize_index(*i, chars.len()) {
                Some(pos) => Ok(Value::Str(chars[pos].to_string())),
                None => Err(EvalError::Index("string index out of range".to_string())),
            }
        }
        (Value::Map(mut m), Value::Str(k)) => {
            m.remove(k).ok_or_else(|| EvalError::Key(Value::Str(k.clone()).repr()))
        }
        (Value::Map(_), other) => Err(EvalError::Key(other.repr())),
        (obj, idx) => Err(EvalError::Type(format!(
            "'{}' object cannot be indexed by '{}'",
            obj.type_name(),
            idx.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expr;
    use std::collections::HashMap;

    struct MapEnv(HashMap<String, Value>);

    impl Env for MapEnv {
        fn lookup(&self, name: &str) -> Option<Value> {
            self.0.get(name).cloned()
        }
    }

    fn run(src: &str) -> Result<Value, EvalError> {
        let mut vars = HashMap::new();
        vars.insert("x".to_string(), Value::Int(10));
        vars.insert("name".to_string(), Value::from("bob"));
        let mut user = BTreeMap::new();
        user.insert("age".to_string(), Value::Int(42));
        vars.insert("user".to_string(), Value::Map(user));
        eval(&parse_expr(src).unwrap(), &mut MapEnv(vars))
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run("x * 2 + 1").unwrap(), Value::Int(21));
        assert_eq!(run("7 // -2").unwrap(), Value::Int(-4));
        assert_eq!(run("-7 % 3").unwrap(), Value::Int(2));
        assert_eq!(run("x / 4").unwrap(), Value::Float(2.5));
        assert_eq!(run("2 ** 10").unwrap(), Value::Int(1024));
        assert_eq!(run("'ab' * 2").unwrap(), Value::from("abab"));
        assert_eq!(run("1 / 0"), Err(EvalError::ZeroDivision));
    }

    #[test]
    fn test_boolean_values() {
        assert_eq!(run("0 or 'fallback'").unwrap(), Value::from("fallback"));
        assert_eq!(run("x and name").unwrap(), Value::from("bob"));
        assert_eq!(run("'yes' if x > 5 else 'no'").unwrap(), Value::from("yes"));
        assert_eq!(run("'o' in name").unwrap(), Value::Bool(true));
        assert_eq!(run("None is None").unwrap(), Value::Bool(true));
        assert_eq!(run("1 == 1.0").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_lookup_and_errors() {
        assert_eq!(run("user.age").unwrap(), Value::Int(42));
        assert_eq!(run("user['age']").unwrap(), Value::Int(42));
        assert_eq!(run("[1, 2, 3][-1]").unwrap(), Value::Int(3));
        assert_eq!(run("missing"), Err(EvalError::Undefined("missing".into())));
        assert!(matches!(run("user.nope"), Err(EvalError::Attribute(_))));
        assert!(matches!(run("x()"), Err(EvalError::NotCallable(_))));
        assert!(matches!(run("'a' + 1"), Err(EvalError::Type(_))));
    }

    #[test]
    fn test_static_eval() {
        assert_eq!(
            eval_static(&parse_expr("len(range(3))").unwrap()).unwrap(),
            Value::Int(3)
        );
        assert!(eval_static(&parse_expr("x").unwrap()).is_err());
    }

    #[test]
    fn test_repeat_overflow() {
        assert_eq!(run("'abc' * 9000000000000000000"), Err(EvalError::Overflow));
        assert_eq!(run("[1, 2] * 9000000000000000000"), Err(EvalError::Overflow));
        assert_eq!(run("'ab' * -3").unwrap(), Value::from(""));
    }

    #[test]
    fn test_static_size_limit() {
        let stat = |src: &str| eval_static(&parse_expr(src).unwrap());
        assert!(matches!(stat("'abc' * 100000"), Err(EvalError::TooLarge(300000))));
        assert!(matches!(stat("range(1000000000)"), Err(EvalError::TooLarge(_))));
        assert!(matches!(stat("range(0, 10**12, 2)"), Err(EvalError::TooLarge(_))));
        assert!(matches!(
            stat("('a' * 60000).replace('a', 'bb')"),
            Err(EvalError::TooLarge(120000))
        ));
        assert_eq!(stat("len(range(5, 0, -2))").unwrap(), Value::Int(3));
        assert_eq!(stat("len('ab' * 1000)").unwrap(), Value::Int(2000));
        // render-time evaluation has no size limit
        assert_eq!(run("len('ab' * 100000)").unwrap(), Value::Int(200000));
    }
}
