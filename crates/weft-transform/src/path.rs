//! Dot-path access into JSON values: `a.b[0].c`, `items.0.name`.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Split a dot path into segments. Bracketed and bare numeric segments both
/// become indexes; bracketed quoted keys (`a["b.c"]`) stay keys.
pub fn parse_path(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();

    let flush = |current: &mut String, segments: &mut Vec<Segment>| {
        if current.is_empty() {
            return;
        }
        let seg = std::mem::take(current);
        match seg.parse::<usize>() {
            Ok(i) => segments.push(Segment::Index(i)),
            Err(_) => segments.push(Segment::Key(seg)),
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '.' => flush(&mut current, &mut segments),
            '[' => {
                flush(&mut current, &mut segments);
                let mut inner = String::new();
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    inner.push(c);
                }
                let inner = inner.trim();
                let quoted = inner.len() >= 2
                    && ((inner.starts_with('"') && inner.ends_with('"'))
                        || (inner.starts_with('\'') && inner.ends_with('\'')));
                if quoted {
                    segments.push(Segment::Key(inner[1..inner.len() - 1].to_string()));
                } else if let Ok(i) = inner.parse::<usize>() {
                    segments.push(Segment::Index(i));
                } else if !inner.is_empty() {
                    segments.push(Segment::Key(inner.to_string()));
                }
            }
            _ => current.push(c),
        }
    }
    flush(&mut current, &mut segments);
    segments
}

/// Look up a dot path. An empty path returns the value itself.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in parse_path(path) {
        current = match (&segment, current) {
            (Segment::Key(k), Value::Object(map)) => map.get(k)?,
            (Segment::Index(i), Value::Array(items)) => items.get(*i)?,
            (Segment::Index(i), Value::Object(map)) => map.get(&i.to_string())?,
            _ => return None,
        };
    }
    Some(current)
}

/// Look up a dot path, returning an owned value and supporting `.length` on
/// arrays and strings.
pub fn lookup(value: &Value, path: &str) -> Option<Value> {
    let segments = parse_path(path);
    let mut current = value.clone();
    for segment in segments {
        current = match (segment, current) {
            (Segment::Key(k), Value::Object(mut map)) => map.remove(&k)?,
            (Segment::Index(i), Value::Array(mut items)) if i < items.len() => items.swap_remove(i),
            (Segment::Index(i), Value::Object(mut map)) => map.remove(&i.to_string())?,
            (Segment::Key(k), Value::Array(items)) if k == "length" => Value::from(items.len()),
            (Segment::Key(k), Value::String(s)) if k == "length" => {
                Value::from(s.chars().count())
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Write `value` at a dot path inside `root`, creating intermediate objects.
pub fn set_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    let keys: Vec<String> = parse_path(path)
        .into_iter()
        .map(|s| match s {
            Segment::Key(k) => k,
            Segment::Index(i) => i.to_string(),
        })
        .collect();
    let Some((last, parents)) = keys.split_last() else {
        return;
    };

    let mut current = root;
    for key in parents {
        let entry = current
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.clone(), value);
}
