use std::rc::Rc;

use super::source::{Location, Source};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Symbol,
    EscapedString,
    UnescapedString,
    Character,
    Int,
    Float,
    Hex,
    Binary,
    Bool,
    LParen,
    RParen,
    LSquare,
    RSquare,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    DoubleColon,
    Semicolon,
    Equals,
    FatArrow,
    Ellipsis,
    When,
    Try,
    Catch,
    Match,
    New,
    Throw,
    Let,
    Var,
    Using,
    Type,
    Class,
    Interface,
    Module,
    Iso,
    Mut,
    Imm,
    SelfType,
    End,
}

#[derive(Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub location: Location,
}

const SYMBOL_CHARS: &[u8] = b"!#$%&*+-/<=>?@\\^|~";

fn is_symbol_char(b: u8) -> bool {
    SYMBOL_CHARS.contains(&b)
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn keyword(text: &str) -> Option<TokenKind> {
    let kind = match text {
        "when" => TokenKind::When,
        "try" => TokenKind::Try,
        "catch" => TokenKind::Catch,
        "match" => TokenKind::Match,
        "new" => TokenKind::New,
        "throw" => TokenKind::Throw,
        "let" => TokenKind::Let,
        "var" => TokenKind::Var,
        "using" => TokenKind::Using,
        "type" => TokenKind::Type,
        "class" => TokenKind::Class,
        "interface" => TokenKind::Interface,
        "module" => TokenKind::Module,
        "iso" => TokenKind::Iso,
        "mut" => TokenKind::Mut,
        "imm" => TokenKind::Imm,
        "Self" => TokenKind::SelfType,
        "true" | "false" => TokenKind::Bool,
        _ => return None,
    };
    Some(kind)
}

/// Advance `pos` past the next token and return it. Returns `End` at the end
/// of input and on every call thereafter.
pub fn lex(source: &Rc<Source>, pos: &mut usize) -> Token {
    let bytes = source.contents.as_bytes();
    skip_trivia(bytes, pos);

    let start = *pos;
    let token = |kind: TokenKind, end: usize| Token {
        kind,
        location: Location::new(source.clone(), start, end),
    };

    if start >= bytes.len() {
        return token(TokenKind::End, start);
    }

    let b = bytes[start];

    if is_ident_start(b) {
        let mut end = start + 1;
        while end < bytes.len() && is_ident_continue(bytes[end]) {
            end += 1;
        }
        *pos = end;
        let kind = keyword(&source.contents[start..end]).unwrap_or(TokenKind::Ident);
        return token(kind, end);
    }

    if b.is_ascii_digit() {
        let (kind, end) = lex_number(bytes, start);
        *pos = end;
        return token(kind, end);
    }

    match b {
        b'(' | b')' | b'[' | b']' | b'{' | b'}' | b',' | b';' => {
            *pos = start + 1;
            let kind = match b {
                b'(' => TokenKind::LParen,
                b')' => TokenKind::RParen,
                b'[' => TokenKind::LSquare,
                b']' => TokenKind::RSquare,
                b'{' => TokenKind::LBrace,
                b'}' => TokenKind::RBrace,
                b',' => TokenKind::Comma,
                _ => TokenKind::Semicolon,
            };
            token(kind, start + 1)
        }
        b'.' => {
            let mut end = start + 1;
            while end < bytes.len() && bytes[end] == b'.' {
                end += 1;
            }
            *pos = end;
            let kind = match end - start {
                1 => TokenKind::Dot,
                3 => TokenKind::Ellipsis,
                _ => TokenKind::Symbol,
            };
            token(kind, end)
        }
        b':' => {
            if start + 1 < bytes.len() && bytes[start + 1] == b':' {
                *pos = start + 2;
                token(TokenKind::DoubleColon, start + 2)
            } else {
                *pos = start + 1;
                token(TokenKind::Colon, start + 1)
            }
        }
        b'"' => {
            let end = scan_delimited(bytes, start + 1, b'"', true);
            *pos = end;
            token(TokenKind::EscapedString, end)
        }
        b'`' => {
            let end = scan_delimited(bytes, start + 1, b'`', false);
            *pos = end;
            token(TokenKind::UnescapedString, end)
        }
        b'\'' => {
            let end = scan_delimited(bytes, start + 1, b'\'', true);
            *pos = end;
            token(TokenKind::Character, end)
        }
        _ if is_symbol_char(b) => {
            let mut end = start + 1;
            while end < bytes.len() && is_symbol_char(bytes[end]) {
                // A comment opener ends the symbol run.
                if bytes[end] == b'/'
                    && end + 1 < bytes.len()
                    && (bytes[end + 1] == b'/' || bytes[end + 1] == b'*')
                {
                    break;
                }
                end += 1;
            }
            *pos = end;
            let kind = match &source.contents[start..end] {
                "=" => TokenKind::Equals,
                "=>" => TokenKind::FatArrow,
                _ => TokenKind::Symbol,
            };
            token(kind, end)
        }
        _ => {
            // Unrecognized byte: hand it to the parser as a symbol so the
            // error is reported with a location instead of being dropped.
            *pos = start + 1;
            token(TokenKind::Symbol, start + 1)
        }
    }
}

fn lex_number(bytes: &[u8], start: usize) -> (TokenKind, usize) {
    if bytes[start] == b'0' && start + 1 < bytes.len() {
        match bytes[start + 1] {
            b'x' | b'X' => {
                let mut end = start + 2;
                while end < bytes.len() && (bytes[end].is_ascii_hexdigit() || bytes[end] == b'_') {
                    end += 1;
                }
                return (TokenKind::Hex, end);
            }
            b'b' | b'B' => {
                let mut end = start + 2;
                while end < bytes.len() && matches!(bytes[end], b'0' | b'1' | b'_') {
                    end += 1;
                }
                return (TokenKind::Binary, end);
            }
            _ => {}
        }
    }

    let mut end = start;
    let mut float = false;
    while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'_') {
        end += 1;
    }
    // Only consume a dot that begins a fraction; `1.foo` is a select.
    if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
        float = true;
        end += 1;
        while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'_') {
            end += 1;
        }
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && matches!(bytes[exp], b'+' | b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            float = true;
            end = exp;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
    }
    let kind = if float { TokenKind::Float } else { TokenKind::Int };
    (kind, end)
}

/// Scan to the closing delimiter, skipping backslash escapes when `escapes`
/// is set. An unterminated literal runs to the end of input; the parser
/// reports the consequence at the next expected token.
fn scan_delimited(bytes: &[u8], mut pos: usize, close: u8, escapes: bool) -> usize {
    while pos < bytes.len() {
        if bytes[pos] == close {
            return pos + 1;
        }
        if escapes && bytes[pos] == b'\\' && pos + 1 < bytes.len() {
            pos += 1;
        }
        pos += 1;
    }
    pos
}

fn skip_trivia(bytes: &[u8], pos: &mut usize) {
    loop {
        while *pos < bytes.len() && bytes[*pos].is_ascii_whitespace() {
            *pos += 1;
        }
        if *pos + 1 < bytes.len() && bytes[*pos] == b'/' && bytes[*pos + 1] == b'/' {
            while *pos < bytes.len() && bytes[*pos] != b'\n' {
                *pos += 1;
            }
            continue;
        }
        if *pos + 1 < bytes.len() && bytes[*pos] == b'/' && bytes[*pos + 1] == b'*' {
            // Block comments nest.
            let mut depth = 1;
            *pos += 2;
            while *pos < bytes.len() && depth > 0 {
                if *pos + 1 < bytes.len() && bytes[*pos] == b'/' && bytes[*pos + 1] == b'*' {
                    depth += 1;
                    *pos += 2;
                } else if *pos + 1 < bytes.len() && bytes[*pos] == b'*' && bytes[*pos + 1] == b'/' {
                    depth -= 1;
                    *pos += 2;
                } else {
                    *pos += 1;
                }
            }
            continue;
        }
        return;
    }
}

/// Decode the contents of an `EscapedString` or `Character` token,
/// stripping the delimiters and resolving backslash escapes.
pub fn escaped_content(location: &Location) -> String {
    let raw = location.view();
    let quotes: &[char] = &['"', '\''];
    let inner = raw
        .strip_prefix(quotes)
        .unwrap_or(raw)
        .strip_suffix(quotes)
        .unwrap_or(raw);

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('x') => {
                let hi = chars.next();
                let lo = chars.next();
                let code = [hi, lo]
                    .into_iter()
                    .flatten()
                    .filter_map(|c| c.to_digit(16))
                    .fold(0, |acc, d| acc * 16 + d);
                if let Some(c) = char::from_u32(code) {
                    out.push(c);
                }
            }
            Some('u') => {
                if chars.next() == Some('{') {
                    let mut code = 0u32;
                    for c in chars.by_ref() {
                        if c == '}' {
                            break;
                        }
                        code = code * 16 + c.to_digit(16).unwrap_or(0);
                    }
                    if let Some(c) = char::from_u32(code) {
                        out.push(c);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Decode an `UnescapedString` token by stripping the backtick delimiters.
pub fn unescaped_content(location: &Location) -> String {
    let raw = location.view();
    raw.strip_prefix('`')
        .unwrap_or(raw)
        .strip_suffix('`')
        .unwrap_or(raw)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::source::synthetic_source;

    fn lex_all(src: &str) -> Vec<(TokenKind, String)> {
        let source = synthetic_source(src);
        let mut pos = 0;
        let mut out = Vec::new();
        loop {
            let tok = lex(&source, &mut pos);
            let done = tok.kind == TokenKind::End;
            out.push((tok.kind, tok.location.view().to_string()));
            if done {
                break;
            }
        }
        out
    }

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex_all(src).into_iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            kinds("class C iso Self selfish"),
            vec![
                TokenKind::Class,
                TokenKind::Ident,
                TokenKind::Iso,
                TokenKind::SelfType,
                TokenKind::Ident,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn punctuation_and_symbols() {
        assert_eq!(
            kinds("( ) [ ] { } , ; : :: . ... = => -> ~> <~ & | @"),
            vec![
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::LSquare,
                TokenKind::RSquare,
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::Comma,
                TokenKind::Semicolon,
                TokenKind::Colon,
                TokenKind::DoubleColon,
                TokenKind::Dot,
                TokenKind::Ellipsis,
                TokenKind::Equals,
                TokenKind::FatArrow,
                TokenKind::Symbol,
                TokenKind::Symbol,
                TokenKind::Symbol,
                TokenKind::Symbol,
                TokenKind::Symbol,
                TokenKind::Symbol,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("0 42 3.5 1e9 2.5e-3 0xFF 0b1010"),
            vec![
                TokenKind::Int,
                TokenKind::Int,
                TokenKind::Float,
                TokenKind::Float,
                TokenKind::Float,
                TokenKind::Hex,
                TokenKind::Binary,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn int_dot_is_a_select() {
        assert_eq!(
            kinds("1.foo"),
            vec![
                TokenKind::Int,
                TokenKind::Dot,
                TokenKind::Ident,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn strings_and_characters() {
        let toks = lex_all(r#""a\nb" `raw` 'x'"#);
        assert_eq!(toks[0].0, TokenKind::EscapedString);
        assert_eq!(toks[1].0, TokenKind::UnescapedString);
        assert_eq!(toks[2].0, TokenKind::Character);
        assert_eq!(toks[1].1, "`raw`");
    }

    #[test]
    fn escape_decoding() {
        let source = synthetic_source(r#""a\nb\x41\u{1F600}""#);
        let mut pos = 0;
        let tok = lex(&source, &mut pos);
        assert_eq!(escaped_content(&tok.location), "a\nbA\u{1F600}");
    }

    #[test]
    fn comments_nest() {
        assert_eq!(
            kinds("a // line\nb /* outer /* inner */ still */ c"),
            vec![
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn end_repeats() {
        let source = synthetic_source("x");
        let mut pos = 0;
        assert_eq!(lex(&source, &mut pos).kind, TokenKind::Ident);
        assert_eq!(lex(&source, &mut pos).kind, TokenKind::End);
        assert_eq!(lex(&source, &mut pos).kind, TokenKind::End);
    }

    #[test]
    fn bools_are_constants() {
        let toks = lex_all("true false");
        assert_eq!(toks[0].0, TokenKind::Bool);
        assert_eq!(toks[1].0, TokenKind::Bool);
        assert_eq!(toks[0].1, "true");
    }
}
