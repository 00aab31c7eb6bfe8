use weft_core::error::{Result, WeftError};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TagKind {
    /// `{{expr}}`
    Expr,
    /// `{{{expr}}}`
    Unescaped,
    /// `{{#name params}}`
    Open,
    /// `{{/name}}`
    Close,
    /// `{{else}}` or `{{else if cond}}`
    Else,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Tag {
    pub kind: TagKind,
    /// Tag contents with delimiters, sigils and `~` markers removed.
    pub body: String,
    /// The tag exactly as written, used when an unresolved expression is
    /// echoed back in non-strict mode.
    pub source: String,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Text(String),
    Tag(Tag),
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    text: String,
    tokens: Vec<Token>,
    trim_next: bool,
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut lx = Lexer {
        src,
        pos: 0,
        text: String::new(),
        tokens: Vec::new(),
        trim_next: false,
    };
    lx.run()?;
    Ok(lx.tokens)
}

impl<'a> Lexer<'a> {
    fn run(&mut self) -> Result<()> {
        while self.pos < self.src.len() {
            let rest = &self.src[self.pos..];
            if rest.starts_with("\\{{") {
                self.push_text("{{");
                self.pos += 3;
            } else if rest.starts_with("{{{{") {
                self.raw_block()?;
            } else if rest.starts_with("{{!--") {
                self.skip_until("--}}")?;
            } else if rest.starts_with("{{!") {
                self.skip_until("}}")?;
            } else if rest.starts_with("{{{") {
                self.tag("{{{", "}}}")?;
            } else if rest.starts_with("{{") {
                self.tag("{{", "}}")?;
            } else {
                let Some(ch) = rest.chars().next() else { break };
                let mut buf = [0u8; 4];
                self.push_text(ch.encode_utf8(&mut buf));
                self.pos += ch.len_utf8();
            }
        }
        self.flush_text();
        Ok(())
    }

    fn push_text(&mut self, s: &str) {
        if self.trim_next {
            let trimmed = s.trim_start();
            if trimmed.is_empty() {
                return;
            }
            self.trim_next = false;
            self.text.push_str(trimmed);
        } else {
            self.text.push_str(s);
        }
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.tokens.push(Token::Text(std::mem::take(&mut self.text)));
        }
    }

    fn find_from(&self, needle: &str, from: usize) -> Result<usize> {
        self.src[from..]
            .find(needle)
            .map(|i| from + i)
            .ok_or_else(|| WeftError::Template(format!("unclosed tag at offset {}", self.pos)))
    }

    fn skip_until(&mut self, close: &str) -> Result<()> {
        let end = self.find_from(close, self.pos)?;
        self.pos = end + close.len();
        Ok(())
    }

    fn raw_block(&mut self) -> Result<()> {
        let open_end = self.find_from("}}}}", self.pos)?;
        let name = self.src[self.pos + 4..open_end].trim();
        if name.is_empty() || name.starts_with('/') {
            return Err(WeftError::Template(format!(
                "invalid raw block at offset {}",
                self.pos
            )));
        }
        let end_tag = ["{{{{/", name, "}}}}"].concat();
        let body_start = open_end + 4;
        let body_end = self.src[body_start..]
            .find(&end_tag)
            .map(|i| body_start + i)
            .ok_or_else(|| WeftError::Template(format!("unclosed raw block '{}'", name)))?;
        let body = self.src[body_start..body_end].to_string();
        self.push_text(&body);
        self.pos = body_end + end_tag.len();
        Ok(())
    }

    fn tag(&mut self, open: &str, close: &str) -> Result<()> {
        let start = self.pos;
        let end = self.find_from(close, start + open.len())?;
        let source = self.src[start..end + close.len()].to_string();
        let mut body = self.src[start + open.len()..end].trim();

        if let Some(b) = body.strip_prefix('~') {
            let kept = self.text.trim_end().len();
            self.text.truncate(kept);
            body = b.trim_start();
        }
        let trim_after = body.ends_with('~');
        if trim_after {
            body = body[..body.len() - 1].trim_end();
        }

        let (kind, body) = if open == "{{{" {
            (TagKind::Unescaped, body)
        } else if let Some(b) = body.strip_prefix('#') {
            (TagKind::Open, b.trim())
        } else if let Some(b) = body.strip_prefix('/') {
            (TagKind::Close, b.trim())
        } else if body == "else" || body == "^" {
            (TagKind::Else, "")
        } else if let Some(b) = body.strip_prefix("else ") {
            (TagKind::Else, b.trim())
        } else if let Some(b) = body.strip_prefix('&') {
            (TagKind::Unescaped, b.trim())
        } else {
            (TagKind::Expr, body)
        };

        self.flush_text();
        self.tokens.push(Token::Tag(Tag {
            kind,
            body: body.to_string(),
            source,
            offset: start,
        }));
        self.pos = end + close.len();
        self.trim_next = trim_after;
        Ok(())
    }
}
