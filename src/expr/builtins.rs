//! Builtin functions, value methods and the rendering intrinsics.

use std::cmp::Ordering;

use crate::escape::{escape, quote_attribute};
use crate::expr::eval::{EvalError, Num};
use crate::html::write_attrs;
use crate::value::Value;

/// HTML-escapes its argument's text.
pub const ESCAPE: &str = "__escape";
/// Attribute-quotes its argument's text.
pub const QUOTE_ATTR: &str = "__quote_attr";
/// Serializes a list of `(name, value)` pairs into attribute text.
pub const WRITE_ATTRS: &str = "__write_attrs";

const FUNCTIONS: &[&str] = &[
    "len", "range", "enumerate", "str", "int", "float", "bool", "abs", "min", "max", "sorted",
    "zip", ESCAPE, QUOTE_ATTR, WRITE_ATTRS,
];

pub fn is_builtin(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), EvalError> {
    if args.len() < min || args.len() > max {
        let expected = if max == usize::MAX {
            format!("at least {}", min)
        } else if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(EvalError::Arguments(format!(
            "{}() takes {} arguments ({} given)",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn int_arg(name: &str, v: &Value) -> Result<i64, EvalError> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(*b as i64),
        other => Err(EvalError::Type(format!(
            "{}() expects an integer, got '{}'",
            name,
            other.type_name()
        ))),
    }
}

fn take_kwarg(kwargs: &mut Vec<(String, Value)>, key: &str) -> Option<Value> {
    let pos = kwargs.iter().position(|(k, _)| k == key)?;
    Some(kwargs.remove(pos).1)
}

/// Rejects calls whose result would exceed `limit` items before building it.
/// Only the calls whose output can outgrow their inputs are checked.
pub fn check_size(
    callee: &str,
    obj: Option<&Value>,
    args: &[Value],
    limit: usize,
) -> Result<(), EvalError> {
    let len: u128 = match (obj, callee) {
        (None, "range") => {
            let nums: Vec<i128> = args
                .iter()
                .filter_map(|a| int_arg(callee, a).ok())
                .map(i128::from)
                .collect();
            let (start, stop, step) = match nums.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] if *step != 0 => (*start, *stop, *step),
                _ => return Ok(()),
            };
            let span = if step > 0 { stop - start } else { start - stop };
            if span <= 0 { 0 } else { ((span - 1) / step.abs() + 1) as u128 }
        }
        (Some(Value::Str(s)), "replace") => match (args.first(), args.get(1)) {
            (Some(Value::Str(from)), Some(Value::Str(to))) if to.len() > from.len() => {
                let count = if from.is_empty() {
                    s.chars().count() + 1
                } else {
                    s.matches(from.as_str()).count()
                };
                s.len() as u128 + count as u128 * (to.len() - from.len()) as u128
            }
            _ => return Ok(()),
        },
        _ => return Ok(()),
    };
    if len > limit as u128 {
        return Err(EvalError::TooLarge(usize::try_from(len).unwrap_or(usize::MAX)));
    }
    Ok(())
}

pub fn call_builtin(
    name: &str,
    mut args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    let start = if name == "enumerate" { take_kwarg(&mut kwargs, "start") } else { None };
    let reverse = if name == "sorted" { take_kwarg(&mut kwargs, "reverse") } else { None };
    if let Some((k, _)) = kwargs.first() {
        return Err(EvalError::Arguments(format!(
            "{}() got an unexpected keyword argument '{}'",
            name, k
        )));
    }

    match name {
        "len" => {
            arity(name, &args, 1, 1)?;
            let n = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(v) | Value::Tuple(v) => v.len(),
                Value::Map(m) => m.len(),
                other => {
                    return Err(EvalError::Type(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::Int(n as i64))
        }
        "range" => {
            arity(name, &args, 1, 3)?;
            let nums = args
                .iter()
                .map(|a| int_arg(name, a))
                .collect::<Result<Vec<_>, _>>()?;
            let (start, stop, step) = match nums.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => unreachable!(),
            };
            if step == 0 {
                return Err(EvalError::Value("range() arg 3 must not be zero".to_string()));
            }
            let mut out = Vec::new();
            let mut i = start;
            while (step > 0 && i < stop) || (step < 0 && i > stop) {
                out.push(Value::Int(i));
                i = match i.checked_add(step) {
                    Some(next) => next,
                    None => break,
                };
            }
            Ok(Value::List(out))
        }
        "enumerate" => {
            arity(name, &args, 1, 2)?;
            let offset = match start.as_ref().or(args.get(1)) {
                Some(v) => int_arg(name, v)?,
                None => 0,
            };
            let items = iterate(&args[0])?;
            Ok(Value::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::Tuple(vec![Value::Int(i as i64 + offset), v]))
                    .collect(),
            ))
        }
        "str" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Str(args.first().map(Value::to_text).unwrap_or_default()))
        }
        "int" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(Value::Float(f)) => Ok(Value::Int(f.trunc() as i64)),
                Some(Value::Str(s)) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    EvalError::Value(format!("invalid literal for int(): {}", Value::Str(s.clone()).repr()))
                }),
                Some(other) => int_arg(name, other).map(Value::Int),
            }
        }
        "float" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                    EvalError::Value(format!(
                        "could not convert string to float: {}",
                        Value::Str(s.clone()).repr()
                    ))
                }),
                Some(other) => match Num::of(other) {
                    Some(n) => Ok(Value::Float(n.as_f64())),
                    None => Err(EvalError::Type(format!(
                        "float() argument must be a string or a number, not '{}'",
                        other.type_name()
                    ))),
                },
            }
        }
        "bool" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::is_true)))
        }
        "abs" => {
            arity(name, &args, 1, 1)?;
            match Num::of(&args[0]) {
                Some(Num::Int(i)) => i.checked_abs().map(Value::Int).ok_or(EvalError::Overflow),
                Some(Num::Float(f)) => Ok(Value::Float(f.abs())),
                None => Err(EvalError::Type(format!(
                    "bad operand type for abs(): '{}'",
                    args[0].type_name()
                ))),
            }
        }
        "min" | "max" => {
            arity(name, &args, 1, usize::MAX)?;
            let items = if args.len() == 1 { iterate(&args[0])? } else { args };
            let wanted = if name == "min" { Ordering::Less } else { Ordering::Greater };
            let mut best: Option<Value> = None;
            for item in items {
                best = Some(match best {
                    Some(current) if compare_values(&item, &current)? != wanted => current,
                    _ => item,
                });
            }
            best.ok_or_else(|| EvalError::Value(format!("{}() arg is an empty sequence", name)))
        }
        "sorted" => {
            arity(name, &args, 1, 1)?;
            let mut items = iterate(&args[0])?;
            let mut failure = None;
            items.sort_by(|a, b| match compare_values(a, b) {
                Ok(ord) => ord,
                Err(e) => {
                    failure.get_or_insert(e);
                    Ordering::Equal
                }
            });
            if let Some(e) = failure {
                return Err(e);
            }
            if reverse.as_ref().is_some_and(Value::is_true) {
                items.reverse();
            }
            Ok(Value::List(items))
        }
        "zip" => {
            let columns = args.iter().map(iterate).collect::<Result<Vec<_>, _>>()?;
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::List(
                (0..len)
                    .map(|i| Value::Tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        ESCAPE => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Str(escape(&args[0].to_text()).into_owned()))
        }
        QUOTE_ATTR => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Str(quote_attribute(&args[0].to_text()).into_owned()))
        }
        WRITE_ATTRS => {
            arity(name, &args, 1, 1)?;
            let pairs = attr_pairs(args.swap_remove(0))?;
            Ok(Value::Str(write_attrs(&pairs)))
        }
        other => Err(EvalError::Undefined(other.to_string())),
    }
}

/// Flattens an attribute list: each item is a 2-item sequence or a mapping.
fn attr_pairs(list: Value) -> Result<Vec<(Value, Value)>, EvalError> {
    let mut pairs = Vec::new();
    for item in iterate(&list)? {
        match item {
            Value::Map(m) => pairs.extend(m.into_iter().map(|(k, v)| (Value::Str(k), v))),
            Value::List(mut kv) | Value::Tuple(mut kv) if kv.len() == 2 => {
                let value = kv.swap_remove(1);
                let name = kv.swap_remove(0);
                pairs.push((name, value));
            }
            other => {
                return Err(EvalError::Type(format!(
                    "attribute must be a (name, value) pair or a dict, not {}",
                    other.repr()
                )));
            }
        }
    }
    Ok(pairs)
}

/// Items produced by iterating a value: list/tuple items, string characters, dict keys.
pub fn iterate(v: &Value) -> Result<Vec<Value>, EvalError> {
    match v {
        Value::List(items) | Value::Tuple(items) => Ok(items.clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Map(m) => Ok(m.keys().map(|k| Value::Str(k.clone())).collect()),
        other => Err(EvalError::Type(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => match (Num::of(a), Num::of(b)) {
            (Some(Num::Int(x)), Some(Num::Int(y))) => x == y,
            (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
            _ => false,
        },
    }
}

pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering, EvalError> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_values(l, r)?;
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => match (Num::of(a), Num::of(b)) {
            (Some(Num::Int(x)), Some(Num::Int(y))) => Ok(x.cmp(&y)),
            (Some(x), Some(y)) => x.as_f64().partial_cmp(&y.as_f64()).ok_or_else(|| {
                EvalError::Value("cannot order NaN".to_string())
            }),
            _ => Err(EvalError::Type(format!(
                "comparison not supported between instances of '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, EvalError> {
    match (container, item) {
        (Value::Str(hay), Value::Str(needle)) => Ok(hay.contains(needle.as_str())),
        (Value::Str(_), other) => Err(EvalError::Type(format!(
            "'in <string>' requires string as left operand, not {}",
            other.type_name()
        ))),
        (Value::List(items), _) | (Value::Tuple(items), _) => {
            Ok(items.iter().any(|v| values_equal(v, item)))
        }
        (Value::Map(m), Value::Str(k)) => Ok(m.contains_key(k)),
        (Value::Map(_), _) => Ok(false),
        (other, _) => Err(EvalError::Type(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn str_arg<'a>(method: &str, args: &'a [Value], i: usize) -> Result<&'a str, EvalError> {
    match args.get(i) {
        Some(Value::Str(s)) => Ok(s.as_str()),
        Some(other) => Err(EvalError::Type(format!(
            "{}() argument must be str, not {}",
            method,
            other.type_name()
        ))),
        None => Err(EvalError::Arguments(format!("{}() missing argument", method))),
    }
}

/// Calls a method on a value.
pub fn call_method(obj: Value, method: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    match (&obj, method) {
        (Value::Str(s), "upper") => {
            arity(method, &args, 0, 0)?;
            Ok(Value::Str(s.to_uppercase()))
        }
        (Value::Str(s), "lower") => {
            arity(method, &args, 0, 0)?;
            Ok(Value::Str(s.to_lowercase()))
        }
        (Value::Str(s), "strip") => {
            arity(method, &args, 0, 0)?;
            Ok(Value::Str(s.trim().to_string()))
        }
        (Value::Str(s), "startswith") => {
            arity(method, &args, 1, 1)?;
            Ok(Value::Bool(s.starts_with(str_arg(method, &args, 0)?)))
        }
        (Value::Str(s), "endswith") => {
            arity(method, &args, 1, 1)?;
            Ok(Value::Bool(s.ends_with(str_arg(method, &args, 0)?)))
        }
        (Value::Str(s), "replace") => {
            arity(method, &args, 2, 2)?;
            let from = str_arg(method, &args, 0)?;
            let to = str_arg(method, &args, 1)?;
            Ok(Value::Str(s.replace(from, to)))
        }
        (Value::Str(s), "split") => {
            arity(method, &args, 0, 1)?;
            let parts: Vec<Value> = if args.is_empty() {
                s.split_whitespace().map(Value::from).collect()
            } else {
                let sep = str_arg(method, &args, 0)?;
                if sep.is_empty() {
                    return Err(EvalError::Value("empty separator".to_string()));
                }
                s.split(sep).map(Value::from).collect()
            };
            Ok(Value::List(parts))
        }
        (Value::Str(s), "join") => {
            arity(method, &args, 1, 1)?;
            let mut parts = Vec::new();
            for item in iterate(&args[0])? {
                match item {
                    Value::Str(p) => parts.push(p),
                    other => {
                        return Err(EvalError::Type(format!(
                            "sequence item: expected str instance, {} found",
                            other.type_name()
                        )));
                    }
                }
            }
            Ok(Value::Str(parts.join(s.as_str())))
        }
        (Value::Map(m), "items") => {
            arity(method, &args, 0, 0)?;
            Ok(Value::List(
                m.iter()
                    .map(|(k, v)| Value::Tuple(vec![Value::Str(k.clone()), v.clone()]))
                    .collect(),
            ))
        }
        (Value::Map(m), "keys") => {
            arity(method, &args, 0, 0)?;
            Ok(Value::List(m.keys().map(|k| Value::Str(k.clone())).collect()))
        }
        (Value::Map(m), "values") => {
            arity(method, &args, 0, 0)?;
            Ok(Value::List(m.values().cloned().collect()))
        }
        (Value::Map(m), "get") => {
            arity(method, &args, 1, 2)?;
            let key = str_arg(method, &args, 0)?;
            Ok(m.get(key).cloned().or_else(|| args.get(1).cloned()).unwrap_or(Value::Null))
        }
        _ => Err(EvalError::Attribute(format!(
            "'{}' object has no attribute '{}'",
            obj.type_name(),
            method
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        call_builtin(name, args, Vec::new())
    }

    #[test]
    fn test_range_and_enumerate() {
        assert_eq!(call("range", vec![Value::Int(3)]).unwrap(), Value::from(vec![0, 1, 2]));
        assert_eq!(
            call("range", vec![Value::Int(5), Value::Int(0), Value::Int(-2)]).unwrap(),
            Value::from(vec![5, 3, 1])
        );
        let enumerated = call_builtin(
            "enumerate",
            vec![Value::from(vec!["a"])],
            vec![("start".to_string(), Value::Int(1))],
        )
        .unwrap();
        assert_eq!(
            enumerated,
            Value::List(vec![Value::Tuple(vec![Value::Int(1), Value::from("a")])])
        );
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call("str", vec![Value::Float(1.0)]).unwrap(), Value::from("1.0"));
        assert_eq!(call("int", vec![Value::from(" 42 ")]).unwrap(), Value::Int(42));
        assert!(matches!(call("int", vec![Value::from("x")]), Err(EvalError::Value(_))));
        assert_eq!(call("len", vec![Value::from("héllo")]).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_min_max_sorted() {
        let list = Value::from(vec![3, 1, 2]);
        assert_eq!(call("min", vec![list.clone()]).unwrap(), Value::Int(1));
        assert_eq!(call("max", vec![Value::Int(4), Value::Int(9)]).unwrap(), Value::Int(9));
        assert_eq!(call("sorted", vec![list]).unwrap(), Value::from(vec![1, 2, 3]));
        assert!(call("sorted", vec![Value::List(vec![Value::Int(1), Value::from("a")])]).is_err());
    }

    #[test]
    fn test_intrinsics() {
        assert_eq!(call(ESCAPE, vec![Value::from("<b>")]).unwrap(), Value::from("&lt;b&gt;"));
        assert_eq!(call(QUOTE_ATTR, vec![Value::from("'")]).unwrap(), Value::from("&#39;"));
        let pairs = Value::List(vec![
            Value::Tuple(vec![Value::from("id"), Value::Int(1)]),
            Value::Tuple(vec![Value::from("class"), Value::from("a")]),
        ]);
        assert_eq!(call(WRITE_ATTRS, vec![pairs]).unwrap(), Value::from(" class='a' id='1'"));
    }

    #[test]
    fn test_methods() {
        let s = Value::from("a,b");
        assert_eq!(
            call_method(s.clone(), "split", vec![Value::from(",")]).unwrap(),
            Value::from(vec!["a", "b"])
        );
        assert_eq!(
            call_method(Value::from("-"), "join", vec![Value::from(vec!["x", "y"])]).unwrap(),
            Value::from("x-y")
        );
        assert!(matches!(call_method(s, "nope", vec![]), Err(EvalError::Attribute(_))));
    }
}
