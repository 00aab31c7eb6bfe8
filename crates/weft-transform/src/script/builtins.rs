//! The capability allowlist: globals, static members and value methods the
//! interpreter exposes. Anything not named here does not exist at runtime.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::interp::{
    check_array_len, check_string_len, strict_equals, throw, Fault, Interpreter, Val, R,
};

/// Global names bound in every script scope besides `input`/`variables`.
pub(crate) const GLOBALS: &[&str] = &[
    "Math",
    "JSON",
    "Object",
    "Array",
    "String",
    "Number",
    "Date",
    "parseInt",
    "parseFloat",
    "isNaN",
];

const NAMESPACES: &[&str] = &["Math", "JSON", "Object", "Array"];

const STATICS: &[&str] = &[
    "Math.abs", "Math.floor", "Math.ceil", "Math.round", "Math.trunc", "Math.sign", "Math.sqrt",
    "Math.cbrt", "Math.pow", "Math.min", "Math.max", "Math.log", "Math.log2", "Math.log10",
    "Math.exp", "Math.sin", "Math.cos", "Math.tan", "Math.atan2", "Math.hypot",
    "JSON.stringify", "JSON.parse",
    "Object.keys", "Object.values", "Object.entries", "Object.assign", "Object.fromEntries",
    "Object.freeze",
    "Array.isArray", "Array.from", "Array.of",
    "Number.isInteger", "Number.isFinite", "Number.isNaN", "Number.parseFloat", "Number.parseInt",
    "String.fromCharCode",
    "Date.now", "Date.parse",
];

const MUTATING_ARRAY_METHODS: &[&str] = &["push", "pop", "shift", "unshift", "splice", "sort", "reverse"];

pub(crate) fn is_namespace(name: &str) -> bool {
    NAMESPACES.contains(&name)
}

pub(crate) fn is_mutating_array_method(name: &str) -> bool {
    MUTATING_ARRAY_METHODS.contains(&name)
}

fn arg(args: &[Val], i: usize) -> Val {
    args.get(i).cloned().unwrap_or(Val::Undefined)
}

fn int_arg(args: &[Val], i: usize, default: i64) -> i64 {
    match args.get(i) {
        None | Some(Val::Undefined) => default,
        Some(v) => {
            let n = v.to_number();
            if n.is_nan() {
                0
            } else {
                n.trunc() as i64
            }
        }
    }
}

/// JS-style relative index clamped into `0..=len`.
fn rel_index(i: i64, len: usize) -> usize {
    if i < 0 {
        len.saturating_sub(i.unsigned_abs() as usize)
    } else {
        (i as usize).min(len)
    }
}

fn json_items(v: &Val) -> Option<Vec<Value>> {
    match v {
        Val::Json(Value::Array(items)) => Some(items.clone()),
        _ => None,
    }
}

pub(crate) fn global_property(ns: &str, prop: &str) -> Option<Val> {
    let constant = match (ns, prop) {
        ("Math", "PI") => Some(std::f64::consts::PI),
        ("Math", "E") => Some(std::f64::consts::E),
        ("Math", "LN2") => Some(std::f64::consts::LN_2),
        ("Math", "LN10") => Some(std::f64::consts::LN_10),
        ("Math", "SQRT2") => Some(std::f64::consts::SQRT_2),
        ("Number", "MAX_SAFE_INTEGER") => Some(9_007_199_254_740_991.0),
        ("Number", "MIN_SAFE_INTEGER") => Some(-9_007_199_254_740_991.0),
        ("Number", "EPSILON") => Some(f64::EPSILON),
        _ => None,
    };
    if let Some(c) = constant {
        return Some(Val::from_f64(c));
    }
    let qualified = format!("{}.{}", ns, prop);
    STATICS
        .iter()
        .find(|s| **s == qualified)
        .map(|s| Val::Global(*s))
}

pub(crate) fn call_global(it: &mut Interpreter, name: &str, args: Vec<Val>) -> R<Val> {
    if let Some((ns, member)) = name.split_once('.') {
        return call_static(it, ns, member, args);
    }
    match name {
        "String" => Ok(Val::str(match args.first() {
            Some(v) => v.to_js_string(),
            None => String::new(),
        })),
        "Number" => Ok(Val::from_f64(args.first().map_or(0.0, Val::to_number))),
        "parseInt" => Ok(parse_int(&arg(&args, 0).to_js_string(), int_arg(&args, 1, 10))),
        "parseFloat" => Ok(parse_float(&arg(&args, 0).to_js_string())),
        "isNaN" => Ok(Val::bool(arg(&args, 0).to_number().is_nan())),
        "Date" => Ok(Val::str(Val::Date(Utc::now()).to_js_string())),
        other => throw(format!("TypeError: {} is not a function", other)),
    }
}

fn parse_int(s: &str, radix: i64) -> Val {
    let s = s.trim();
    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (radix, digits) = match (radix, digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X"))) {
        (16, Some(rest)) | (10, Some(rest)) => (16, rest),
        _ => (radix.clamp(2, 36) as u32, digits),
    };
    let valid: String = digits.chars().take_while(|c| c.is_digit(radix)).collect();
    match i64::from_str_radix(&valid, radix) {
        Ok(n) => Val::from_f64(if neg { -(n as f64) } else { n as f64 }),
        Err(_) => Val::NonFinite(f64::NAN),
    }
}

fn parse_float(s: &str) -> Val {
    let s = s.trim();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_exp = false;
    for (i, c) in s.char_indices() {
        let ok = match c {
            '0'..='9' => true,
            '+' | '-' => i == 0 || s[..i].ends_with(['e', 'E']),
            '.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                true
            }
            'e' | 'E' if !seen_exp && i > 0 => {
                seen_exp = true;
                true
            }
            _ => false,
        };
        if !ok {
            break;
        }
        end = i + c.len_utf8();
    }
    let mut candidate = &s[..end];
    while !candidate.is_empty() {
        if let Ok(n) = candidate.parse::<f64>() {
            return Val::from_f64(n);
        }
        candidate = &candidate[..candidate.len() - 1];
    }
    Val::NonFinite(f64::NAN)
}

fn math(args: &[Val], f: fn(f64) -> f64) -> Val {
    Val::from_f64(f(arg(args, 0).to_number()))
}

fn call_static(it: &mut Interpreter, ns: &str, member: &str, args: Vec<Val>) -> R<Val> {
    let numbers = || args.iter().map(Val::to_number).collect::<Vec<_>>();
    Ok(match (ns, member) {
        ("Math", "abs") => math(&args, f64::abs),
        ("Math", "floor") => math(&args, f64::floor),
        ("Math", "ceil") => math(&args, f64::ceil),
        ("Math", "round") => math(&args, |x| (x + 0.5).floor()),
        ("Math", "trunc") => math(&args, f64::trunc),
        ("Math", "sign") => math(&args, |x| if x == 0.0 || x.is_nan() { x } else { x.signum() }),
        ("Math", "sqrt") => math(&args, f64::sqrt),
        ("Math", "cbrt") => math(&args, f64::cbrt),
        ("Math", "log") => math(&args, f64::ln),
        ("Math", "log2") => math(&args, f64::log2),
        ("Math", "log10") => math(&args, f64::log10),
        ("Math", "exp") => math(&args, f64::exp),
        ("Math", "sin") => math(&args, f64::sin),
        ("Math", "cos") => math(&args, f64::cos),
        ("Math", "tan") => math(&args, f64::tan),
        ("Math", "pow") => Val::from_f64(arg(&args, 0).to_number().powf(arg(&args, 1).to_number())),
        ("Math", "atan2") => Val::from_f64(arg(&args, 0).to_number().atan2(arg(&args, 1).to_number())),
        ("Math", "hypot") => Val::from_f64(numbers().iter().map(|x| x * x).sum::<f64>().sqrt()),
        ("Math", "min") => Val::from_f64(numbers().into_iter().fold(f64::INFINITY, |a, b| {
            if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) }
        })),
        ("Math", "max") => Val::from_f64(numbers().into_iter().fold(f64::NEG_INFINITY, |a, b| {
            if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) }
        })),

        ("JSON", "stringify") => {
            let value = arg(&args, 0);
            if matches!(value, Val::Undefined | Val::Func(_) | Val::Global(_)) {
                return Ok(Val::Undefined);
            }
            let json = value.to_json()?;
            let indent = match arg(&args, 2) {
                Val::Json(Value::String(s)) => s,
                v if v.to_number() > 0.0 => " ".repeat(v.to_number().min(10.0) as usize),
                _ => String::new(),
            };
            Val::str(stringify(&json, &indent))
        }
        ("JSON", "parse") => {
            let text = arg(&args, 0).to_js_string();
            match serde_json::from_str::<Value>(&text) {
                Ok(v) => Val::Json(v),
                Err(e) => return throw(format!("SyntaxError: {}", e)),
            }
        }

        ("Object", "keys") => Val::Json(Value::Array(match arg(&args, 0) {
            Val::Json(Value::Object(map)) => map.keys().map(|k| Value::String(k.clone())).collect(),
            Val::Json(Value::Array(items)) => (0..items.len()).map(|i| Value::String(i.to_string())).collect(),
            _ => Vec::new(),
        })),
        ("Object", "values") => Val::Json(Value::Array(match arg(&args, 0) {
            Val::Json(Value::Object(map)) => map.into_iter().map(|(_, v)| v).collect(),
            Val::Json(Value::Array(items)) => items,
            _ => Vec::new(),
        })),
        ("Object", "entries") => Val::Json(Value::Array(match arg(&args, 0) {
            Val::Json(Value::Object(map)) => map
                .into_iter()
                .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
                .collect(),
            Val::Json(Value::Array(items)) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| Value::Array(vec![Value::String(i.to_string()), v]))
                .collect(),
            _ => Vec::new(),
        })),
        ("Object", "assign") => {
            let mut target = match arg(&args, 0) {
                Val::Json(Value::Object(map)) => map,
                _ => Map::new(),
            };
            for source in args.iter().skip(1) {
                if let Val::Json(Value::Object(map)) = source {
                    target.extend(map.clone());
                }
            }
            Val::Json(Value::Object(target))
        }
        ("Object", "fromEntries") => {
            let mut map = Map::new();
            for entry in json_items(&arg(&args, 0)).unwrap_or_default() {
                if let Value::Array(pair) = entry {
                    let key = pair.first().map(|k| Val::Json(k.clone()).to_js_string()).unwrap_or_default();
                    super::lexer::check_identifier(&key).map_err(Fault::Fatal)?;
                    map.insert(key, pair.get(1).cloned().unwrap_or(Value::Null));
                }
            }
            Val::Json(Value::Object(map))
        }
        ("Object", "freeze") => arg(&args, 0),

        ("Array", "isArray") => Val::bool(matches!(arg(&args, 0), Val::Json(Value::Array(_)))),
        ("Array", "from") => {
            let items: Vec<Val> = match arg(&args, 0) {
                Val::Json(Value::Array(items)) => items.into_iter().map(Val::Json).collect(),
                Val::Json(Value::String(s)) => s.chars().map(|c| Val::str(c.to_string())).collect(),
                Val::Json(Value::Object(map)) => {
                    let len = map.get("length").and_then(Value::as_u64).unwrap_or(0) as usize;
                    check_array_len(len)?;
                    vec![Val::Undefined; len]
                }
                _ => Vec::new(),
            };
            let mapper = arg(&args, 1);
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                let v = if matches!(mapper, Val::Undefined) {
                    item
                } else {
                    it.call_value(&mapper, vec![item, Val::from_f64(i as f64)])?
                };
                out.push(v.to_json()?);
            }
            Val::Json(Value::Array(out))
        }
        ("Array", "of") => Val::Json(Value::Array(args.iter().map(Val::to_json).collect::<R<_>>()?)),

        ("Number", "isInteger") => Val::bool(match arg(&args, 0) {
            Val::Json(Value::Number(n)) => n.as_f64().is_some_and(|f| f.fract() == 0.0),
            _ => false,
        }),
        ("Number", "isFinite") => Val::bool(matches!(arg(&args, 0), Val::Json(Value::Number(_)))),
        ("Number", "isNaN") => Val::bool(matches!(arg(&args, 0), Val::NonFinite(f) if f.is_nan())),
        ("Number", "parseFloat") => parse_float(&arg(&args, 0).to_js_string()),
        ("Number", "parseInt") => parse_int(&arg(&args, 0).to_js_string(), int_arg(&args, 1, 10)),

        ("String", "fromCharCode") => Val::str(
            args.iter()
                .filter_map(|v| char::from_u32(v.to_number() as u32))
                .collect::<String>(),
        ),

        ("Date", "now") => Val::from_f64(Utc::now().timestamp_millis() as f64),
        ("Date", "parse") => match parse_date(&arg(&args, 0).to_js_string()) {
            Some(d) => Val::from_f64(d.timestamp_millis() as f64),
            None => Val::NonFinite(f64::NAN),
        },

        (ns, member) => return throw(format!("TypeError: {}.{} is not a function", ns, member)),
    })
}

fn stringify(value: &Value, indent: &str) -> String {
    if indent.is_empty() {
        return value.to_string();
    }
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    match value.serialize(&mut ser) {
        Ok(()) => String::from_utf8(buf).unwrap_or_default(),
        Err(_) => value.to_string(),
    }
}

pub(crate) fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| Utc.from_utc_datetime(&d))
        })
}

pub(crate) fn construct(class: &str, args: Vec<Val>) -> R<Val> {
    match class {
        "Date" => match args.first() {
            None => Ok(Val::Date(Utc::now())),
            Some(Val::Json(Value::Number(n))) => n
                .as_f64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single())
                .map(Val::Date)
                .map_or_else(|| throw("RangeError: Invalid time value"), Ok),
            Some(Val::Date(d)) => Ok(Val::Date(*d)),
            Some(other) => match parse_date(&other.to_js_string()) {
                Some(d) => Ok(Val::Date(d)),
                None => throw("RangeError: Invalid time value"),
            },
        },
        "Error" | "TypeError" | "RangeError" => {
            let mut map = Map::new();
            map.insert("name".into(), Value::String(class.to_string()));
            map.insert(
                "message".into(),
                Value::String(args.first().map(Val::to_js_string).unwrap_or_default()),
            );
            Ok(Val::Json(Value::Object(map)))
        }
        other => throw(format!("TypeError: {} is not a constructor", other)),
    }
}

// ── Value methods ───────────────────────────────────────────────

pub(crate) fn call_method(it: &mut Interpreter, recv: Val, name: &str, args: Vec<Val>) -> R<Val> {
    match recv {
        Val::Global(ns) if !ns.contains('.') => call_static(it, ns, name, args),
        Val::Json(Value::String(s)) => string_method(&s, name, &args),
        Val::Json(Value::Array(items)) => array_method(it, items, name, args),
        Val::Json(Value::Number(n)) => number_method(n.as_f64().unwrap_or(0.0), name, &args),
        Val::NonFinite(f) => number_method(f, name, &args),
        Val::Date(d) => date_method(d, name),
        Val::Json(Value::Object(map)) => match name {
            "hasOwnProperty" => Ok(Val::bool(map.contains_key(&arg(&args, 0).to_js_string()))),
            "toString" => Ok(Val::str("[object Object]")),
            _ => throw(format!("TypeError: object.{} is not a function", name)),
        },
        Val::Json(Value::Bool(b)) if name == "toString" => Ok(Val::str(b.to_string())),
        other if other.is_nullish() => throw(format!(
            "TypeError: Cannot read properties of {} (reading '{}')",
            other.to_js_string(),
            name
        )),
        other => throw(format!("TypeError: {}.{} is not a function", other.type_of(), name)),
    }
}

fn string_method(s: &str, name: &str, args: &[Val]) -> R<Val> {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    let text = |i: usize| arg(args, i).to_js_string();
    Ok(match name {
        "toUpperCase" => Val::str(s.to_uppercase()),
        "toLowerCase" => Val::str(s.to_lowercase()),
        "trim" => Val::str(s.trim()),
        "trimStart" => Val::str(s.trim_start()),
        "trimEnd" => Val::str(s.trim_end()),
        "toString" | "valueOf" => Val::str(s),
        "includes" => Val::bool(s.contains(&text(0))),
        "startsWith" => Val::bool(s.starts_with(&text(0))),
        "endsWith" => Val::bool(s.ends_with(&text(0))),
        "indexOf" => Val::from_f64(
            s.find(&text(0))
                .map_or(-1.0, |byte| s[..byte].chars().count() as f64),
        ),
        "lastIndexOf" => Val::from_f64(
            s.rfind(&text(0))
                .map_or(-1.0, |byte| s[..byte].chars().count() as f64),
        ),
        "slice" => {
            let start = rel_index(int_arg(args, 0, 0), len);
            let end = rel_index(int_arg(args, 1, len as i64), len).max(start);
            Val::str(chars[start..end].iter().collect::<String>())
        }
        "substring" => {
            let a = int_arg(args, 0, 0).clamp(0, len as i64) as usize;
            let b = int_arg(args, 1, len as i64).clamp(0, len as i64) as usize;
            let (start, end) = if a <= b { (a, b) } else { (b, a) };
            Val::str(chars[start..end].iter().collect::<String>())
        }
        "charAt" => Val::str(
            chars
                .get(int_arg(args, 0, 0).max(0) as usize)
                .map(|c| c.to_string())
                .unwrap_or_default(),
        ),
        "charCodeAt" => match chars.get(int_arg(args, 0, 0).max(0) as usize) {
            Some(c) => Val::from_f64(f64::from(u32::from(*c))),
            None => Val::NonFinite(f64::NAN),
        },
        "at" => {
            let i = int_arg(args, 0, 0);
            let idx = if i < 0 { len as i64 + i } else { i };
            match usize::try_from(idx).ok().and_then(|i| chars.get(i)) {
                Some(c) => Val::str(c.to_string()),
                None => Val::Undefined,
            }
        }
        "split" => {
            let limit = match args.get(1) {
                Some(Val::Undefined) | None => usize::MAX,
                Some(v) => v.to_number().max(0.0) as usize,
            };
            let parts: Vec<Value> = match arg(args, 0) {
                Val::Undefined => vec![Value::String(s.to_string())],
                sep => {
                    let sep = sep.to_js_string();
                    if sep.is_empty() {
                        chars.iter().map(|c| Value::String(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(|p| Value::String(p.to_string())).collect()
                    }
                }
            };
            Val::Json(Value::Array(parts.into_iter().take(limit).collect()))
        }
        "replace" => Val::str(s.replacen(&text(0), &text(1), 1)),
        "replaceAll" => Val::str(s.replace(&text(0), &text(1))),
        "repeat" => {
            let n = int_arg(args, 0, 0);
            if !(0..=10_000).contains(&n) {
                return throw("RangeError: Invalid count value");
            }
            check_string_len(s.len() * n as usize)?;
            Val::str(s.repeat(n as usize))
        }
        "padStart" | "padEnd" => {
            let target = int_arg(args, 0, 0).max(0) as usize;
            let fill = match arg(args, 1) {
                Val::Undefined => " ".to_string(),
                v => v.to_js_string(),
            };
            if target <= len || fill.is_empty() {
                Val::str(s)
            } else {
                let widest = fill.chars().map(char::len_utf8).max().unwrap_or(1);
                check_string_len(s.len().saturating_add((target - len).saturating_mul(widest)))?;
                let pad: String = fill.chars().cycle().take(target - len).collect();
                if name == "padStart" {
                    Val::str(pad + s)
                } else {
                    Val::str(s.to_string() + &pad)
                }
            }
        }
        "concat" => {
            let tail: Vec<String> = args.iter().map(Val::to_js_string).collect();
            check_string_len(s.len() + tail.iter().map(String::len).sum::<usize>())?;
            Val::str(s.to_string() + &tail.concat())
        }
        "localeCompare" => Val::from_f64(match s.cmp(text(0).as_str()) {
            Ordering::Less => -1.0,
            Ordering::Equal => 0.0,
            Ordering::Greater => 1.0,
        }),
        _ => return throw(format!("TypeError: string.{} is not a function", name)),
    })
}

fn number_method(n: f64, name: &str, args: &[Val]) -> R<Val> {
    Ok(match name {
        "toFixed" => {
            let digits = int_arg(args, 0, 0).clamp(0, 100) as usize;
            Val::str(format!("{:.*}", digits, n))
        }
        "toString" => Val::str(Val::from_f64(n).to_js_string()),
        "valueOf" => Val::from_f64(n),
        _ => return throw(format!("TypeError: number.{} is not a function", name)),
    })
}

fn date_method(d: DateTime<Utc>, name: &str) -> R<Val> {
    use chrono::{Datelike, Timelike};
    Ok(match name {
        "getTime" | "valueOf" => Val::from_f64(d.timestamp_millis() as f64),
        "toISOString" | "toJSON" | "toString" => Val::Date(d).to_json().map(Val::Json)?,
        "getFullYear" => Val::from_f64(f64::from(d.year())),
        "getMonth" => Val::from_f64(f64::from(d.month0())),
        "getDate" => Val::from_f64(f64::from(d.day())),
        "getDay" => Val::from_f64(f64::from(d.weekday().num_days_from_sunday())),
        "getHours" => Val::from_f64(f64::from(d.hour())),
        "getMinutes" => Val::from_f64(f64::from(d.minute())),
        "getSeconds" => Val::from_f64(f64::from(d.second())),
        "getMilliseconds" => Val::from_f64(f64::from(d.timestamp_subsec_millis())),
        _ => return throw(format!("TypeError: date.{} is not a function", name)),
    })
}

fn callback(it: &mut Interpreter, f: &Val, item: &Value, index: usize) -> R<Val> {
    it.call_value(f, vec![Val::Json(item.clone()), Val::from_f64(index as f64)])
}

fn flatten_into(out: &mut Vec<Value>, items: Vec<Value>, depth: i64) {
    for item in items {
        match item {
            Value::Array(inner) if depth > 0 => flatten_into(out, inner, depth - 1),
            other => out.push(other),
        }
    }
}

fn array_method(it: &mut Interpreter, items: Vec<Value>, name: &str, args: Vec<Val>) -> R<Val> {
    let len = items.len();
    let f = arg(&args, 0);
    Ok(match name {
        "map" => {
            let mut out = Vec::with_capacity(len);
            for (i, item) in items.iter().enumerate() {
                out.push(callback(it, &f, item, i)?.to_json()?);
            }
            Val::Json(Value::Array(out))
        }
        "filter" => {
            let mut out = Vec::new();
            for (i, item) in items.iter().enumerate() {
                if callback(it, &f, item, i)?.truthy() {
                    out.push(item.clone());
                }
            }
            Val::Json(Value::Array(out))
        }
        "forEach" => {
            for (i, item) in items.iter().enumerate() {
                callback(it, &f, item, i)?;
            }
            Val::Undefined
        }
        "find" | "findIndex" => {
            for (i, item) in items.iter().enumerate() {
                if callback(it, &f, item, i)?.truthy() {
                    return Ok(if name == "find" {
                        Val::Json(item.clone())
                    } else {
                        Val::from_f64(i as f64)
                    });
                }
            }
            if name == "find" {
                Val::Undefined
            } else {
                Val::from_f64(-1.0)
            }
        }
        "some" => {
            for (i, item) in items.iter().enumerate() {
                if callback(it, &f, item, i)?.truthy() {
                    return Ok(Val::bool(true));
                }
            }
            Val::bool(false)
        }
        "every" => {
            for (i, item) in items.iter().enumerate() {
                if !callback(it, &f, item, i)?.truthy() {
                    return Ok(Val::bool(false));
                }
            }
            Val::bool(true)
        }
        "reduce" => {
            let mut iter = items.iter().enumerate();
            let mut acc = match args.get(1) {
                Some(initial) => initial.clone(),
                None => match iter.next() {
                    Some((_, first)) => Val::Json(first.clone()),
                    None => return throw("TypeError: Reduce of empty array with no initial value"),
                },
            };
            for (i, item) in iter {
                acc = it.call_value(&f, vec![acc, Val::Json(item.clone()), Val::from_f64(i as f64)])?;
            }
            acc
        }
        "flatMap" => {
            let mut out = Vec::new();
            for (i, item) in items.iter().enumerate() {
                match callback(it, &f, item, i)?.to_json()? {
                    Value::Array(inner) => out.extend(inner),
                    other => out.push(other),
                }
            }
            Val::Json(Value::Array(out))
        }
        "includes" => Val::bool(items.iter().any(|v| strict_equals(&Val::Json(v.clone()), &f))),
        "indexOf" => Val::from_f64(
            items
                .iter()
                .position(|v| strict_equals(&Val::Json(v.clone()), &f))
                .map_or(-1.0, |i| i as f64),
        ),
        "join" => {
            let sep = match f {
                Val::Undefined => ",".to_string(),
                v => v.to_js_string(),
            };
            let parts: Vec<String> = items
                .iter()
                .map(|v| if v.is_null() { String::new() } else { Val::Json(v.clone()).to_js_string() })
                .collect();
            let total = parts.iter().map(String::len).sum::<usize>()
                + sep.len().saturating_mul(parts.len().saturating_sub(1));
            check_string_len(total)?;
            Val::str(parts.join(&sep))
        }
        "slice" => {
            let start = rel_index(int_arg(&args, 0, 0), len);
            let end = rel_index(int_arg(&args, 1, len as i64), len).max(start);
            Val::Json(Value::Array(items[start..end].to_vec()))
        }
        "concat" => {
            let mut out = items;
            for a in &args {
                match a.to_json()? {
                    Value::Array(more) => {
                        check_array_len(out.len() + more.len())?;
                        out.extend(more)
                    }
                    other => out.push(other),
                }
            }
            Val::Json(Value::Array(out))
        }
        "flat" => {
            let depth = int_arg(&args, 0, 1);
            let mut out = Vec::new();
            flatten_into(&mut out, items, depth);
            Val::Json(Value::Array(out))
        }
        "at" => {
            let i = int_arg(&args, 0, 0);
            let idx = if i < 0 { len as i64 + i } else { i };
            usize::try_from(idx)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .map_or(Val::Undefined, Val::Json)
        }
        "toString" => Val::str(Val::Json(Value::Array(items)).to_js_string()),
        "toSorted" | "toReversed" => {
            let mut copy = items;
            let mutating = if name == "toSorted" { "sort" } else { "reverse" };
            call_array_mut(it, &mut copy, mutating, args)?;
            Val::Json(Value::Array(copy))
        }
        _ => return throw(format!("TypeError: array.{} is not a function", name)),
    })
}

/// In-place array methods. The caller writes `items` back to the binding the
/// receiver came from.
pub(crate) fn call_array_mut(it: &mut Interpreter, items: &mut Vec<Value>, name: &str, args: Vec<Val>) -> R<Val> {
    Ok(match name {
        "push" => {
            check_array_len(items.len() + args.len())?;
            for a in &args {
                items.push(a.to_json()?);
            }
            Val::from_f64(items.len() as f64)
        }
        "pop" => items.pop().map_or(Val::Undefined, Val::Json),
        "shift" => {
            if items.is_empty() {
                Val::Undefined
            } else {
                Val::Json(items.remove(0))
            }
        }
        "unshift" => {
            check_array_len(items.len() + args.len())?;
            let mut front = Vec::with_capacity(args.len());
            for a in &args {
                front.push(a.to_json()?);
            }
            items.splice(0..0, front);
            Val::from_f64(items.len() as f64)
        }
        "splice" => {
            let len = items.len();
            let start = rel_index(int_arg(&args, 0, 0), len);
            let count = match args.get(1) {
                None => len - start,
                Some(v) => (v.to_number().max(0.0) as usize).min(len - start),
            };
            let mut insert = Vec::new();
            for a in args.iter().skip(2) {
                insert.push(a.to_json()?);
            }
            let removed: Vec<Value> = items.splice(start..start + count, insert).collect();
            Val::Json(Value::Array(removed))
        }
        "reverse" => {
            items.reverse();
            Val::Json(Value::Array(items.clone()))
        }
        "sort" => {
            let cmp = arg(&args, 0);
            let sorted = merge_sort(it, std::mem::take(items), &cmp)?;
            *items = sorted;
            Val::Json(Value::Array(items.clone()))
        }
        other => return throw(format!("TypeError: array.{} is not a function", other)),
    })
}

fn compare(it: &mut Interpreter, cmp: &Val, a: &Value, b: &Value) -> R<Ordering> {
    if matches!(cmp, Val::Undefined) {
        let (x, y) = (Val::Json(a.clone()).to_js_string(), Val::Json(b.clone()).to_js_string());
        return Ok(x.cmp(&y));
    }
    let n = it
        .call_value(cmp, vec![Val::Json(a.clone()), Val::Json(b.clone())])?
        .to_number();
    Ok(if n < 0.0 {
        Ordering::Less
    } else if n > 0.0 {
        Ordering::Greater
    } else {
        Ordering::Equal
    })
}

/// Stable merge sort with a comparator that can fail.
fn merge_sort(it: &mut Interpreter, items: Vec<Value>, cmp: &Val) -> R<Vec<Value>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let mut items = items;
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(it, items, cmp)?;
    let right = merge_sort(it, right, cmp)?;
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut l = left.into_iter().peekable();
    let mut r = right.into_iter().peekable();
    loop {
        let take_right = match (l.peek(), r.peek()) {
            (Some(a), Some(b)) => compare(it, cmp, a, b)? == Ordering::Greater,
            _ => break,
        };
        if take_right {
            out.extend(r.next());
        } else {
            out.extend(l.next());
        }
    }
    out.extend(l);
    out.extend(r);
    Ok(out)
}
