// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Rewrites Go-template style `{{ ... }}` expressions into Jinja call syntax.
//!
//! Stub files written for Go-template tooling use whitespace-separated calls, dotted
//! field access and argument-appending pipelines:
//!
//! ```text
//! {{ upper .Request.name }}          ->  {{ upper(Request.name) }}
//! {{ .Request.count | add 1 }}       ->  {{ add(1, Request.count) }}
//! {{ sprintf "%s-%d" (lower .Request.id) 3 }}
//! ```
//!
//! Anything the rewriter does not understand is passed through untouched, so native
//! Jinja (`{{ upper(Request.name) }}`, `{{ Request.name | length }}`) keeps working.

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Rewrites every `{{ ... }}` block of `source`. `is_function` decides which bare
/// identifiers are calls.
pub fn translate(source: &str, is_function: impl Fn(&str) -> bool) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find(OPEN) {
        let Some(len) = rest[start + OPEN.len()..].find(CLOSE) else {
            break;
        };
        let end = start + OPEN.len() + len;
        out.push_str(&rest[..start]);
        out.push_str(OPEN);
        out.push_str(&translate_block(&rest[start + OPEN.len()..end], &is_function));
        out.push_str(CLOSE);
        rest = &rest[end + CLOSE.len()..];
    }
    out.push_str(rest);
    out
}

/// Translates the inside of one `{{ ... }}` block, keeping whitespace-control markers.
fn translate_block(block: &str, is_function: &impl Fn(&str) -> bool) -> String {
    let block = unescape_quotes(block);
    let (lead, body, trail) = split_trim_markers(&block);

    match Parser::new(body, is_function).and_then(|mut p| p.parse()) {
        Some(expr) => format!("{lead} {expr} {trail}"),
        None => block.to_string(),
    }
}

/// Stub files embedded in JSON often carry `\"` inside expressions.
fn unescape_quotes(expr: &str) -> String {
    let mut result = expr.to_string();
    loop {
        let next = result.replace(r#"\\""#, "\"").replace(r#"\""#, "\"");
        if next == result {
            return result;
        }
        result = next;
    }
}

/// Splits `{{- ` / ` -}}` markers off the body. A dash must touch the braces and be
/// followed (or preceded) by whitespace, so `{{ -1 }}` keeps its sign.
fn split_trim_markers(block: &str) -> (&str, &str, &str) {
    let mut body = block;
    let mut lead = "";
    match body.strip_prefix('-') {
        Some(stripped) if stripped.starts_with(char::is_whitespace) => {
            body = stripped;
            lead = "-";
        }
        _ => {}
    }
    let mut trail = "";
    match body.strip_suffix('-') {
        Some(stripped) if stripped.ends_with(char::is_whitespace) => {
            body = stripped;
            trail = "-";
        }
        _ => {}
    }
    (lead, body.trim(), trail)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Already in Jinja literal form
    Literal(String),
    /// `name` or `name.field`
    Ident(String),
    /// `.Field.sub`, rendered without the leading dot
    Field(String),
    LParen,
    RParen,
    Pipe,
}

struct Parser<'a, F> {
    tokens: Vec<Token>,
    pos: usize,
    is_function: &'a F,
}

impl<'a, F: Fn(&str) -> bool> Parser<'a, F> {
    fn new(body: &str, is_function: &'a F) -> Option<Self> {
        Some(Self {
            tokens: tokenize(body)?,
            pos: 0,
            is_function,
        })
    }

    fn parse(&mut self) -> Option<String> {
        if self.tokens.is_empty() {
            return None;
        }
        let expr = self.pipeline()?;
        (self.pos == self.tokens.len()).then_some(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn pipeline(&mut self) -> Option<String> {
        let mut acc = self.command(None)?;
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            acc = self.command(Some(acc))?;
        }
        Some(acc)
    }

    /// One whitespace-separated command. A piped value becomes the last argument.
    fn command(&mut self, piped: Option<String>) -> Option<String> {
        let mut operands: Vec<(String, bool)> = Vec::new();
        while let Some(token) = self.peek().cloned() {
            match token {
                Token::Pipe | Token::RParen => break,
                Token::LParen => {
                    self.pos += 1;
                    let inner = self.pipeline()?;
                    if self.peek() != Some(&Token::RParen) {
                        return None;
                    }
                    self.pos += 1;
                    operands.push((inner, false));
                }
                Token::Literal(text) | Token::Field(text) => {
                    self.pos += 1;
                    operands.push((text, false));
                }
                Token::Ident(name) => {
                    self.pos += 1;
                    let callable = (self.is_function)(&name);
                    operands.push((name, callable));
                }
            }
        }

        let (head, callable) = operands.first().cloned()?;
        if callable {
            let args: Vec<String> = operands
                .into_iter()
                .skip(1)
                .map(|(arg, _)| arg)
                .chain(piped)
                .collect();
            return Some(format!("{head}({})", args.join(", ")));
        }
        (operands.len() == 1 && piped.is_none()).then_some(head)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Returns `None` for anything outside the Go-template subset, including native call syntax.
fn tokenize(body: &str) -> Option<Vec<Token>> {
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '"' | '\'' => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i] != c {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
                if i >= chars.len() {
                    return None;
                }
                i += 1;
                let raw: String = chars[start..i].iter().collect();
                tokens.push(Token::Literal(raw));
            }
            '`' => {
                let start = i + 1;
                let len = chars[start..].iter().position(|&ch| ch == '`')?;
                let raw: String = chars[start..start + len].iter().collect();
                tokens.push(Token::Literal(serde_json::to_string(&raw).ok()?));
                i = start + len + 1;
            }
            '.' => {
                let start = i + 1;
                i = start;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let path: String = chars[start..i].iter().collect();
                if path.is_empty() || path.starts_with('.') || path.ends_with('.') {
                    return None;
                }
                tokens.push(Token::Field(path));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || matches!(chars[i], '.' | 'e' | 'E')) {
                    i += 1;
                }
                tokens.push(Token::Literal(chars[start..i].iter().collect()));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                // `name(` is already a Jinja call
                if chars.get(i) == Some(&'(') {
                    return None;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.as_str() {
                    "nil" => Token::Literal("none".to_string()),
                    "true" | "false" => Token::Literal(word),
                    // control words belong to native Jinja blocks
                    "if" | "else" | "end" | "range" | "with" | "define" | "block" | "template"
                    | "and" | "or" | "not" | "is" | "in" => return None,
                    _ => Token::Ident(word),
                };
                tokens.push(token);
            }
            _ => return None,
        }
    }
    Some(tokens)
}
