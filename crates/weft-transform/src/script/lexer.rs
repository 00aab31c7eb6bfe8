use weft_core::error::{Result, WeftError};

/// Identifiers that may never appear in script source, as names or as
/// property keys. Rejected before parsing.
pub const DENYLIST: &[&str] = &[
    "eval",
    "Function",
    "require",
    "import",
    "process",
    "global",
    "globalThis",
    "window",
    "document",
    "fetch",
    "XMLHttpRequest",
    "WebSocket",
    "setTimeout",
    "setInterval",
    "setImmediate",
    "__proto__",
    "prototype",
    "constructor",
];

const PUNCTS: &[&str] = &[
    "===", "!==", "...", "**", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "+=", "-=", "*=",
    "/=", "%=", "++", "--", "+", "-", "*", "/", "%", "<", ">", "=", "!", "?", ":", ".", ",", ";", "(",
    ")", "[", "]", "{", "}",
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Num(f64),
    Str(String),
    Template(Vec<TplChunk>),
    Ident(String),
    Punct(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TplChunk {
    Text(String),
    Code(Vec<Tok>),
}

pub(crate) fn check_identifier(name: &str) -> Result<()> {
    if DENYLIST.contains(&name) {
        return Err(WeftError::ForbiddenIdentifier(name.to_string()));
    }
    Ok(())
}

/// Template literals nested inside `${}` beyond this depth are rejected.
const MAX_TEMPLATE_NESTING: usize = 32;

pub(crate) fn tokenize(src: &str) -> Result<Vec<Tok>> {
    tokenize_at(src, 0)
}

fn tokenize_at(src: &str, level: usize) -> Result<Vec<Tok>> {
    let chars: Vec<char> = src.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i += 2;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let (n, next) = number(&chars, i)?;
            toks.push(Tok::Num(n));
            i = next;
            continue;
        }
        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            check_identifier(&word)?;
            toks.push(Tok::Ident(word));
            continue;
        }
        if c == '"' || c == '\'' {
            let (s, next) = string(&chars, i)?;
            toks.push(Tok::Str(s));
            i = next;
            continue;
        }
        if c == '`' {
            let (chunks, next) = template(&chars, i, level)?;
            toks.push(Tok::Template(chunks));
            i = next;
            continue;
        }
        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        match PUNCTS.iter().find(|p| rest.starts_with(**p)) {
            Some(p) => {
                toks.push(Tok::Punct(*p));
                i += p.len();
            }
            None => {
                return Err(WeftError::Script(format!(
                    "unexpected character '{}' at {}",
                    c, i
                )))
            }
        }
    }
    Ok(toks)
}

fn number(chars: &[char], start: usize) -> Result<(f64, usize)> {
    let mut i = start;
    if chars[i] == '0' && matches!(chars.get(i + 1), Some('x') | Some('X')) {
        i += 2;
        let hex_start = i;
        while i < chars.len() && chars[i].is_ascii_hexdigit() {
            i += 1;
        }
        let digits: String = chars[hex_start..i].iter().collect();
        let n = i64::from_str_radix(&digits, 16)
            .map_err(|_| WeftError::Script(format!("invalid hex literal 0x{}", digits)))?;
        return Ok((n as f64, i));
    }
    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == '_') {
        i += 1;
    }
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        i += 1;
        if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
            i += 1;
        }
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
    let n = text
        .parse::<f64>()
        .map_err(|_| WeftError::Script(format!("invalid number literal {}", text)))?;
    Ok((n, i))
}

fn escape(chars: &[char], i: usize) -> Result<(char, usize)> {
    let Some(&c) = chars.get(i) else {
        return Err(WeftError::Script("unterminated escape".into()));
    };
    Ok(match c {
        'n' => ('\n', i + 1),
        't' => ('\t', i + 1),
        'r' => ('\r', i + 1),
        '0' => ('\0', i + 1),
        'u' => {
            let hex: String = chars.get(i + 1..i + 5).unwrap_or_default().iter().collect();
            let code = u32::from_str_radix(&hex, 16)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| WeftError::Script(format!("invalid unicode escape \\u{}", hex)))?;
            (code, i + 5)
        }
        other => (other, i + 1),
    })
}

fn string(chars: &[char], start: usize) -> Result<(String, usize)> {
    let quote = chars[start];
    let mut i = start + 1;
    let mut s = String::new();
    loop {
        match chars.get(i) {
            None | Some('\n') => return Err(WeftError::Script("unterminated string literal".into())),
            Some('\\') => {
                let (c, next) = escape(chars, i + 1)?;
                s.push(c);
                i = next;
            }
            Some(&c) if c == quote => return Ok((s, i + 1)),
            Some(&c) => {
                s.push(c);
                i += 1;
            }
        }
    }
}

fn template(chars: &[char], start: usize, level: usize) -> Result<(Vec<TplChunk>, usize)> {
    if level >= MAX_TEMPLATE_NESTING {
        return Err(WeftError::Script(format!(
            "SyntaxError: template literals nest deeper than {} levels",
            MAX_TEMPLATE_NESTING
        )));
    }
    let mut i = start + 1;
    let mut chunks = Vec::new();
    let mut text = String::new();
    loop {
        match chars.get(i) {
            None => return Err(WeftError::Script("unterminated template literal".into())),
            Some('`') => {
                if !text.is_empty() {
                    chunks.push(TplChunk::Text(text));
                }
                return Ok((chunks, i + 1));
            }
            Some('\\') => {
                let (c, next) = escape(chars, i + 1)?;
                text.push(c);
                i = next;
            }
            Some('$') if chars.get(i + 1) == Some(&'{') => {
                if !text.is_empty() {
                    chunks.push(TplChunk::Text(std::mem::take(&mut text)));
                }
                let code_start = i + 2;
                let mut depth = 1;
                let mut j = code_start;
                let mut quote: Option<char> = None;
                while j < chars.len() {
                    let c = chars[j];
                    match quote {
                        Some(_) if c == '\\' => j += 1,
                        Some(q) if c == q => quote = None,
                        Some(_) => {}
                        None => match c {
                            '"' | '\'' | '`' => quote = Some(c),
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        },
                    }
                    j += 1;
                }
                if depth != 0 {
                    return Err(WeftError::Script("unterminated ${ in template literal".into()));
                }
                let code: String = chars[code_start..j].iter().collect();
                chunks.push(TplChunk::Code(tokenize_at(&code, level + 1)?));
                i = j + 1;
            }
            Some(&c) => {
                text.push(c);
                i += 1;
            }
        }
    }
}
