//! Built-in template helpers. Helpers take evaluated arguments and return a
//! JSON value; unknown names yield `None`.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::path::lookup;
use crate::value::{as_number, display, is_empty, is_truthy, loose_eq, number};

static NULL: Value = Value::Null;

pub(crate) const HELPER_NAMES: &[&str] = &[
    // strings
    "uppercase", "upper", "lowercase", "lower", "capitalize", "trim", "replace", "split", "join",
    "concat", "truncate", "substring", "contains", "startsWith", "endsWith", "length",
    // numbers
    "add", "subtract", "multiply", "divide", "mod", "round", "floor", "ceil", "abs", "min", "max",
    "sum", "avg",
    // arrays
    "first", "last", "slice", "unique", "flatten", "reverse", "sort", "pluck",
    // objects
    "keys", "values", "get",
    // json
    "json", "stringify", "parse",
    // dates
    "now", "formatDate",
    // comparisons and logic
    "eq", "ne", "gt", "gte", "lt", "lte", "and", "or", "not",
    // type predicates
    "isString", "isNumber", "isArray", "isObject", "isEmpty", "typeOf",
    // fallbacks
    "default", "coalesce",
];

pub(crate) fn exists(name: &str) -> bool {
    HELPER_NAMES.contains(&name)
}

fn arg(args: &[Value], i: usize) -> &Value {
    args.get(i).unwrap_or(&NULL)
}

fn text(args: &[Value], i: usize) -> String {
    display(arg(args, i))
}

fn num(args: &[Value], i: usize) -> Option<f64> {
    as_number(arg(args, i))
}

fn items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Numbers from every argument, with array arguments spread.
fn numbers(args: &[Value]) -> Vec<f64> {
    args.iter()
        .flat_map(items)
        .filter_map(|v| as_number(&v))
        .collect()
}

fn arith(args: &[Value], op: fn(f64, f64) -> Option<f64>) -> Result<Value, String> {
    let a = num(args, 0).ok_or_else(|| format!("'{}' is not a number", text(args, 0)))?;
    let b = num(args, 1).ok_or_else(|| format!("'{}' is not a number", text(args, 1)))?;
    op(a, b).map(number).ok_or_else(|| "division by zero".to_string())
}

fn index_arg(args: &[Value], i: usize, len: usize, default: usize) -> usize {
    match num(args, i) {
        Some(n) if n < 0.0 => len.saturating_sub((-n) as usize),
        Some(n) => (n as usize).min(len),
        None => default,
    }
}

fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|d| Utc.from_utc_datetime(&d))
            }),
        _ => None,
    }
}

fn ordering(args: &[Value]) -> Option<std::cmp::Ordering> {
    let (a, b) = (arg(args, 0), arg(args, 1));
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => as_number(a)?.partial_cmp(&as_number(b)?),
    }
}

pub(crate) fn call(name: &str, args: &[Value]) -> Option<Result<Value, String>> {
    let value = match name {
        "uppercase" | "upper" => Value::String(text(args, 0).to_uppercase()),
        "lowercase" | "lower" => Value::String(text(args, 0).to_lowercase()),
        "capitalize" => {
            let s = text(args, 0);
            let mut chars = s.chars();
            Value::String(match chars.next() {
                Some(c) => c.to_uppercase().chain(chars).collect(),
                None => String::new(),
            })
        }
        "trim" => Value::String(text(args, 0).trim().to_string()),
        "replace" => Value::String(text(args, 0).replace(&text(args, 1), &text(args, 2))),
        "split" => {
            let sep = match arg(args, 1) {
                Value::Null => ",".to_string(),
                v => display(v),
            };
            Value::Array(
                text(args, 0)
                    .split(sep.as_str())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            )
        }
        "join" => {
            let sep = match arg(args, 1) {
                Value::Null => ", ".to_string(),
                v => display(v),
            };
            Value::String(
                items(arg(args, 0))
                    .iter()
                    .map(display)
                    .collect::<Vec<_>>()
                    .join(&sep),
            )
        }
        "concat" => Value::String(args.iter().map(display).collect()),
        "truncate" => {
            let s = text(args, 0);
            let limit = num(args, 1).unwrap_or(100.0).max(0.0) as usize;
            if s.chars().count() <= limit {
                Value::String(s)
            } else {
                let suffix = match arg(args, 2) {
                    Value::Null => "...".to_string(),
                    v => display(v),
                };
                Value::String(s.chars().take(limit).collect::<String>() + &suffix)
            }
        }
        "substring" => {
            let chars: Vec<char> = text(args, 0).chars().collect();
            let start = index_arg(args, 1, chars.len(), 0);
            let end = index_arg(args, 2, chars.len(), chars.len()).max(start);
            Value::String(chars[start..end].iter().collect())
        }
        "contains" => Value::Bool(match arg(args, 0) {
            Value::Array(items) => items.iter().any(|v| loose_eq(v, arg(args, 1))),
            Value::Object(map) => map.contains_key(&text(args, 1)),
            other => display(other).contains(&text(args, 1)),
        }),
        "startsWith" => Value::Bool(text(args, 0).starts_with(&text(args, 1))),
        "endsWith" => Value::Bool(text(args, 0).ends_with(&text(args, 1))),
        "length" => Value::from(match arg(args, 0) {
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            Value::Null => 0,
            other => display(other).chars().count(),
        }),

        "add" => match (arg(args, 0), arg(args, 1)) {
            (Value::String(a), b) if as_number(b).is_none() || as_number(arg(args, 0)).is_none() => {
                Value::String(format!("{}{}", a, display(b)))
            }
            _ => return Some(arith(args, |a, b| Some(a + b))),
        },
        "subtract" => return Some(arith(args, |a, b| Some(a - b))),
        "multiply" => return Some(arith(args, |a, b| Some(a * b))),
        "divide" => return Some(arith(args, |a, b| (b != 0.0).then(|| a / b))),
        "mod" => return Some(arith(args, |a, b| (b != 0.0).then(|| a % b))),
        "round" => {
            let n = num(args, 0).unwrap_or(0.0);
            let digits = num(args, 1).unwrap_or(0.0).clamp(0.0, 15.0) as i32;
            let scale = 10f64.powi(digits);
            number((n * scale).round() / scale)
        }
        "floor" => number(num(args, 0).unwrap_or(0.0).floor()),
        "ceil" => number(num(args, 0).unwrap_or(0.0).ceil()),
        "abs" => number(num(args, 0).unwrap_or(0.0).abs()),
        "min" => numbers(args)
            .into_iter()
            .reduce(f64::min)
            .map(number)
            .unwrap_or(Value::Null),
        "max" => numbers(args)
            .into_iter()
            .reduce(f64::max)
            .map(number)
            .unwrap_or(Value::Null),
        "sum" => number(numbers(args).iter().sum()),
        "avg" => {
            let ns = numbers(args);
            if ns.is_empty() {
                Value::Null
            } else {
                number(ns.iter().sum::<f64>() / ns.len() as f64)
            }
        }

        "first" => items(arg(args, 0)).into_iter().next().unwrap_or(Value::Null),
        "last" => items(arg(args, 0)).pop().unwrap_or(Value::Null),
        "slice" => {
            let list = items(arg(args, 0));
            let start = index_arg(args, 1, list.len(), 0);
            let end = index_arg(args, 2, list.len(), list.len()).max(start);
            Value::Array(list[start..end].to_vec())
        }
        "unique" => {
            let mut out: Vec<Value> = Vec::new();
            for v in items(arg(args, 0)) {
                if !out.contains(&v) {
                    out.push(v);
                }
            }
            Value::Array(out)
        }
        "flatten" => Value::Array(items(arg(args, 0)).into_iter().flat_map(|v| items(&v)).collect()),
        "reverse" => match arg(args, 0) {
            Value::String(s) => Value::String(s.chars().rev().collect()),
            other => Value::Array(items(other).into_iter().rev().collect()),
        },
        "sort" => {
            let mut list = items(arg(args, 0));
            list.sort_by(|a, b| match (as_number(a), as_number(b)) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                _ => display(a).cmp(&display(b)),
            });
            Value::Array(list)
        }
        "pluck" => {
            let field = text(args, 1);
            Value::Array(
                items(arg(args, 0))
                    .iter()
                    .map(|v| lookup(v, &field).unwrap_or(Value::Null))
                    .collect(),
            )
        }

        "keys" => match arg(args, 0) {
            Value::Object(map) => Value::Array(map.keys().map(|k| Value::String(k.clone())).collect()),
            Value::Array(list) => Value::Array((0..list.len()).map(Value::from).collect()),
            _ => Value::Array(vec![]),
        },
        "values" => match arg(args, 0) {
            Value::Object(map) => Value::Array(map.values().cloned().collect()),
            other => Value::Array(items(other)),
        },
        "get" => lookup(arg(args, 0), &text(args, 1)).unwrap_or_else(|| arg(args, 2).clone()),

        "json" | "stringify" => {
            let pretty = is_truthy(arg(args, 1));
            let rendered = if pretty {
                serde_json::to_string_pretty(arg(args, 0))
            } else {
                serde_json::to_string(arg(args, 0))
            };
            match rendered {
                Ok(s) => Value::String(s),
                Err(e) => return Some(Err(e.to_string())),
            }
        }
        "parse" => match arg(args, 0) {
            Value::String(s) => match serde_json::from_str(s) {
                Ok(v) => v,
                Err(e) => return Some(Err(format!("invalid JSON: {}", e))),
            },
            other => other.clone(),
        },

        "now" => Value::String(Utc::now().to_rfc3339()),
        "formatDate" => {
            let date = match arg(args, 0) {
                Value::Null => Utc::now(),
                v => match parse_date(v) {
                    Some(d) => d,
                    None => return Some(Err(format!("'{}' is not a date", display(v)))),
                },
            };
            let format = match arg(args, 1) {
                Value::Null => "%Y-%m-%d".to_string(),
                v => display(v),
            };
            Value::String(date.format(&format).to_string())
        }

        "eq" => Value::Bool(loose_eq(arg(args, 0), arg(args, 1))),
        "ne" => Value::Bool(!loose_eq(arg(args, 0), arg(args, 1))),
        "gt" => Value::Bool(ordering(args).is_some_and(|o| o.is_gt())),
        "gte" => Value::Bool(ordering(args).is_some_and(|o| o.is_ge())),
        "lt" => Value::Bool(ordering(args).is_some_and(|o| o.is_lt())),
        "lte" => Value::Bool(ordering(args).is_some_and(|o| o.is_le())),
        "and" => Value::Bool(!args.is_empty() && args.iter().all(is_truthy)),
        "or" => Value::Bool(args.iter().any(is_truthy)),
        "not" => Value::Bool(!is_truthy(arg(args, 0))),

        "isString" => Value::Bool(arg(args, 0).is_string()),
        "isNumber" => Value::Bool(arg(args, 0).is_number()),
        "isArray" => Value::Bool(arg(args, 0).is_array()),
        "isObject" => Value::Bool(arg(args, 0).is_object()),
        "isEmpty" => Value::Bool(is_empty(arg(args, 0))),
        "typeOf" => Value::String(
            match arg(args, 0) {
                Value::Null => "null",
                Value::Bool(_) => "boolean",
                Value::Number(_) => "number",
                Value::String(_) => "string",
                Value::Array(_) => "array",
                Value::Object(_) => "object",
            }
            .to_string(),
        ),

        "default" => match arg(args, 0) {
            v if is_empty(v) => arg(args, 1).clone(),
            v => v.clone(),
        },
        "coalesce" => args
            .iter()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or(Value::Null),

        _ => return None,
    };
    Some(Ok(value))
}
