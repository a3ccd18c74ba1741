//! lexing

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::ops::Range;

use crate::syntax::Op;

/// a span of source bytes, in the named source
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Location(pub String, pub Range<usize>);

#[derive(PartialEq, Debug, Clone)]
pub enum TokenKind {
    Unknown(String),
    Natural(u64),
    Integer(i64),
    Word(String),
    /// a label between backticks, never a keyword
    Quoted(String),

    Lambda,
    Forall,
    Arrow,
    Colon,
    Equal,
    Comma,
    Dot,
    At,
    Bar,
    Op(Op),

    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    OpenBrace,
    CloseBrace,
    OpenAngle,
    CloseAngle,

    /// opening or closing `"` of a text literal
    Quote,
    /// verbatim text between `"`, `${` and `}`, escapes already decoded
    TextPart(String),
    /// `${`
    Interp,
    /// the `}` closing an interpolation
    InterpEnd,

    Path(String),
    Url(String),
    Env(String),
    Hash(String),

    If,
    Then,
    Else,
    Let,
    In,
    As,
    Missing,

    End,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            TokenKind::Unknown(tok) => write!(f, "token '{tok}'"),
            TokenKind::Natural(n) => write!(f, "natural '{n}'"),
            TokenKind::Integer(n) => write!(f, "integer '{n:+}'"),
            TokenKind::Word(w) => write!(f, "word '{w}'"),
            TokenKind::Quoted(w) => write!(f, "label '`{w}`'"),
            TokenKind::Lambda => write!(f, "'λ'"),
            TokenKind::Forall => write!(f, "'∀'"),
            TokenKind::Arrow => write!(f, "'→'"),
            TokenKind::Colon => write!(f, "':'"),
            TokenKind::Equal => write!(f, "'='"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Dot => write!(f, "'.'"),
            TokenKind::At => write!(f, "'@'"),
            TokenKind::Bar => write!(f, "'|'"),
            TokenKind::Op(op) => write!(f, "operator '{op}'"),
            TokenKind::OpenParen => write!(f, "open '('"),
            TokenKind::CloseParen => write!(f, "close ')'"),
            TokenKind::OpenBracket => write!(f, "open '['"),
            TokenKind::CloseBracket => write!(f, "close ']'"),
            TokenKind::OpenBrace => write!(f, "open '{{'"),
            TokenKind::CloseBrace => write!(f, "close '}}'"),
            TokenKind::OpenAngle => write!(f, "open '<'"),
            TokenKind::CloseAngle => write!(f, "close '>'"),
            TokenKind::Quote => write!(f, "quote"),
            TokenKind::TextPart(s) if s.len() < 16 => write!(f, "text {s:?}"),
            TokenKind::TextPart(s) => write!(f, "text of {} bytes", s.len()),
            TokenKind::Interp => write!(f, "'${{'"),
            TokenKind::InterpEnd => write!(f, "close '}}'"),
            TokenKind::Path(p) => write!(f, "path '{p}'"),
            TokenKind::Url(u) => write!(f, "url '{u}'"),
            TokenKind::Env(n) => write!(f, "'env:{n}'"),
            TokenKind::Hash(h) => write!(f, "'sha256:{h}'"),
            TokenKind::If => write!(f, "keyword 'if'"),
            TokenKind::Then => write!(f, "keyword 'then'"),
            TokenKind::Else => write!(f, "keyword 'else'"),
            TokenKind::Let => write!(f, "keyword 'let'"),
            TokenKind::In => write!(f, "keyword 'in'"),
            TokenKind::As => write!(f, "keyword 'as'"),
            TokenKind::Missing => write!(f, "keyword 'missing'"),
            TokenKind::End => write!(f, "end of file"),
        }
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct Token(pub Location, pub TokenKind);

fn is_label_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || b'_' == c
}

fn is_label_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"_-/".contains(&c)
}

fn ends_path(c: u8) -> bool {
    c.is_ascii_whitespace() || b"()[]{}<>,\"".contains(&c)
}

/// note: this is an infinite iterator (`next()` is never `None`)
pub struct Lexer<'parse> {
    src: &'parse [u8],
    path: &'parse str,
    at: usize,
    last_at: usize,
    /// brace depth inside each open `${`, innermost last
    interps: Vec<usize>,
    in_text: bool,
}

impl<'parse> Lexer<'parse> {
    pub(crate) fn new(path: &'parse str, src: &'parse [u8]) -> Self {
        Self {
            src,
            path,
            at: 0,
            last_at: 0,
            interps: Vec::new(),
            in_text: false,
        }
    }

    fn tok(&self, range: Range<usize>, k: TokenKind) -> Token {
        Token(Location(self.path.to_string(), range), k)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.at).copied()
    }

    fn rest(&self) -> &'parse [u8] {
        &self.src[self.at.min(self.src.len())..]
    }

    fn eat_while(&mut self, pred: impl Fn(u8) -> bool) -> &'parse [u8] {
        let start = self.at;
        while self.peek().is_some_and(&pred) {
            self.at += 1;
        }
        &self.src[start..self.at]
    }

    /// whitespace, `-- line` and nested `{- block -}` comments
    fn skip_trivia(&mut self) {
        loop {
            let rest = self.rest();
            if rest.first().is_some_and(u8::is_ascii_whitespace) {
                self.at += 1;
            } else if rest.starts_with(b"--") {
                self.eat_while(|c| b'\n' != c);
            } else if rest.starts_with(b"{-") {
                self.at += 2;
                let mut depth = 1;
                while depth > 0 && self.at < self.src.len() {
                    let rest = self.rest();
                    if rest.starts_with(b"{-") {
                        depth += 1;
                        self.at += 2;
                    } else if rest.starts_with(b"-}") {
                        depth -= 1;
                        self.at += 2;
                    } else {
                        self.at += 1;
                    }
                }
            } else {
                break;
            }
        }
    }

    /// a run of verbatim text up to the closing quote or the next `${`
    fn text_part(&mut self) -> TokenKind {
        let mut acc = Vec::new();
        loop {
            let rest = self.rest();
            match rest.first() {
                None | Some(b'"') => break,
                Some(b'$') if rest.starts_with(b"${") => break,
                Some(b'\\') => {
                    let (len, c): (usize, Option<char>) = match rest.get(1) {
                        Some(b'"') => (2, Some('"')),
                        Some(b'\\') => (2, Some('\\')),
                        Some(b'/') => (2, Some('/')),
                        Some(b'$') => (2, Some('$')),
                        Some(b'b') => (2, Some('\u{8}')),
                        Some(b'f') => (2, Some('\u{c}')),
                        Some(b'n') => (2, Some('\n')),
                        Some(b'r') => (2, Some('\r')),
                        Some(b't') => (2, Some('\t')),
                        Some(b'u') => {
                            let hex = rest.get(2..6).unwrap_or_default();
                            let c = std::str::from_utf8(hex)
                                .ok()
                                .filter(|h| 4 == h.len())
                                .and_then(|h| u32::from_str_radix(h, 16).ok())
                                .and_then(char::from_u32);
                            (6, c)
                        }
                        _ => (2, None),
                    };
                    let Some(c) = c else {
                        let bad = String::from_utf8_lossy(&rest[..len.min(rest.len())]).into_owned();
                        self.at += len.min(rest.len());
                        return TokenKind::Unknown(bad);
                    };
                    acc.extend_from_slice(c.encode_utf8(&mut [0; 4]).as_bytes());
                    self.at += len;
                }
                Some(&c) => {
                    acc.push(c);
                    self.at += 1;
                }
            }
        }
        match String::from_utf8(acc) {
            Ok(s) => TokenKind::TextPart(s),
            Err(e) => TokenKind::Unknown(String::from_utf8_lossy(e.as_bytes()).into_owned()),
        }
    }

    fn number(&mut self, negative: Option<bool>) -> TokenKind {
        let start = self.at;
        let rest = self.rest();
        let parsed = if rest.starts_with(b"0x") || rest.starts_with(b"0X") {
            self.at += 2;
            let digits = self.eat_while(|c| c.is_ascii_hexdigit());
            std::str::from_utf8(digits)
                .ok()
                .and_then(|d| u64::from_str_radix(d, 16).ok())
        } else {
            let digits = self.eat_while(|c| c.is_ascii_digit());
            std::str::from_utf8(digits).ok().and_then(|d| d.parse().ok())
        };

        let text = || String::from_utf8_lossy(&self.src[start..self.at]).into_owned();
        match (parsed, negative) {
            (None, _) => TokenKind::Unknown(text()),
            (Some(n), None) => TokenKind::Natural(n),
            (Some(n), Some(false)) => match i64::try_from(n) {
                Ok(i) => TokenKind::Integer(i),
                Err(_) => TokenKind::Unknown(format!("+{}", text())),
            },
            (Some(n), Some(true)) => match 0i64.checked_sub_unsigned(n) {
                Some(i) => TokenKind::Integer(i),
                None => TokenKind::Unknown(format!("-{}", text())),
            },
        }
    }

    fn word(&mut self) -> TokenKind {
        let w = self.eat_while(is_label_char);

        if self.peek() == Some(b':') {
            if w == b"env" {
                self.at += 1;
                let name = self.eat_while(|c| c.is_ascii_alphanumeric() || b'_' == c);
                return TokenKind::Env(String::from_utf8_lossy(name).into_owned());
            }
            if w == b"sha256" {
                self.at += 1;
                let hex = self.eat_while(|c| c.is_ascii_alphanumeric());
                return TokenKind::Hash(String::from_utf8_lossy(hex).into_owned());
            }
        }

        match w {
            b"if" => TokenKind::If,
            b"then" => TokenKind::Then,
            b"else" => TokenKind::Else,
            b"let" => TokenKind::Let,
            b"in" => TokenKind::In,
            b"as" => TokenKind::As,
            b"missing" => TokenKind::Missing,
            b"forall" => TokenKind::Forall,
            // is_label_char only accepts ascii
            _ => TokenKind::Word(String::from_utf8_lossy(w).into_owned()),
        }
    }
}

impl<'parse> Iterator for Lexer<'parse> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        use TokenKind::*;

        if self.in_text {
            let at = self.at;
            let rest = self.rest();
            let tok = if rest.is_empty() {
                self.in_text = false;
                End
            } else if rest.starts_with(b"\"") {
                self.in_text = false;
                self.at += 1;
                Quote
            } else if rest.starts_with(b"${") {
                self.in_text = false;
                self.interps.push(0);
                self.at += 2;
                Interp
            } else {
                self.text_part()
            };
            self.last_at = self.at;
            return Some(self.tok(at..self.at, tok));
        }

        self.skip_trivia();
        let at = self.at;
        let Some(byte) = self.peek() else {
            let range = self.last_at..self.last_at;
            return Some(self.tok(range, End));
        };
        let rest = self.rest();

        let (len, tok) = match byte {
            b'"' => {
                self.in_text = true;
                (1, Quote)
            }

            b'{' => {
                if let Some(depth) = self.interps.last_mut() {
                    *depth += 1;
                }
                (1, OpenBrace)
            }
            b'}' => match self.interps.last_mut() {
                Some(0) => {
                    self.interps.pop();
                    self.in_text = true;
                    (1, InterpEnd)
                }
                Some(depth) => {
                    *depth -= 1;
                    (1, CloseBrace)
                }
                None => (1, CloseBrace),
            },

            b'(' => (1, OpenParen),
            b')' => (1, CloseParen),
            b'[' => (1, OpenBracket),
            b']' => (1, CloseBracket),
            b'<' => (1, OpenAngle),
            b'>' => (1, CloseAngle),
            b',' => (1, Comma),
            b'@' => (1, At),
            b':' => (1, Colon),
            b'\\' => (1, Lambda),
            b'*' => (1, TokenKind::Op(crate::syntax::Op::NaturalTimes)),
            b'#' => (1, TokenKind::Op(crate::syntax::Op::ListAppend)),

            b'|' if rest.starts_with(b"||") => (2, TokenKind::Op(crate::syntax::Op::BoolOr)),
            b'|' => (1, Bar),
            b'&' if rest.starts_with(b"&&") => (2, TokenKind::Op(crate::syntax::Op::BoolAnd)),
            b'=' if rest.starts_with(b"==") => (2, TokenKind::Op(crate::syntax::Op::BoolEq)),
            b'=' => (1, Equal),
            b'!' if rest.starts_with(b"!=") => (2, TokenKind::Op(crate::syntax::Op::BoolNe)),
            b'+' if rest.starts_with(b"++") => (2, TokenKind::Op(crate::syntax::Op::TextAppend)),
            b'-' if rest.starts_with(b"->") => (2, Arrow),

            b'+' | b'-' if rest.get(1).is_some_and(u8::is_ascii_digit) => {
                self.at += 1;
                let tok = self.number(Some(b'-' == byte));
                self.last_at = self.at;
                return Some(self.tok(at..self.at, tok));
            }
            b'+' => (1, TokenKind::Op(crate::syntax::Op::NaturalPlus)),

            b'.' if rest.starts_with(b"./") || rest.starts_with(b"../") => {
                let p = self.eat_while(|c| !ends_path(c));
                (0, Path(String::from_utf8_lossy(p).into_owned()))
            }
            b'/' | b'~' if rest.starts_with(b"/") || rest.starts_with(b"~/") => {
                let p = self.eat_while(|c| !ends_path(c));
                (0, Path(String::from_utf8_lossy(p).into_owned()))
            }
            b'.' => (1, Dot),
            b'h' if rest.starts_with(b"http://") || rest.starts_with(b"https://") => {
                let u = self.eat_while(|c| !ends_path(c));
                (0, Url(String::from_utf8_lossy(u).into_owned()))
            }

            b'`' => {
                self.at += 1;
                let w = self.eat_while(|c| b'`' != c && b'\n' != c);
                let w = String::from_utf8_lossy(w).into_owned();
                if self.peek() == Some(b'`') {
                    (1, Quoted(w))
                } else {
                    (0, Unknown(format!("`{w}")))
                }
            }

            c if c.is_ascii_digit() => {
                let tok = self.number(None);
                (0, tok)
            }
            c if is_label_start(c) => {
                let tok = self.word();
                (0, tok)
            }

            _ if rest.starts_with("λ".as_bytes()) => ("λ".len(), Lambda),
            _ if rest.starts_with("∀".as_bytes()) => ("∀".len(), Forall),
            _ if rest.starts_with("→".as_bytes()) => ("→".len(), Arrow),

            _ => {
                // one whole utf-8 sequence
                let len = match byte {
                    0xf0..=0xff => 4,
                    0xe0..=0xef => 3,
                    0xc0..=0xdf => 2,
                    _ => 1,
                }
                .min(rest.len());
                (len, Unknown(String::from_utf8_lossy(&rest[..len]).into_owned()))
            }
        };

        // tokens that consumed their input themselves report a length of 0
        self.at += len;
        self.last_at = self.at;
        Some(self.tok(at..self.at, tok))
    }
}

#[test]
fn test() {
    use insta::assert_snapshot;

    fn t(script: &str) -> String {
        let mut end = true;
        Lexer::new("t", script.as_bytes())
            .take_while(|t| {
                if !end {
                    false
                } else {
                    end = TokenKind::End != t.1;
                    true
                }
            })
            .map(|t| t.1.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    assert_snapshot!(t(""), @"end of file");
    assert_snapshot!(
        t("λ(x : Natural) → x + 1"),
        @"'λ' open '(' word 'x' ':' word 'Natural' close ')' '→' word 'x' operator '+' natural '1' end of file"
    );
    assert_snapshot!(
        t("\\(x : Natural) -> x ++ y"),
        @"'λ' open '(' word 'x' ':' word 'Natural' close ')' '→' word 'x' operator '++' word 'y' end of file"
    );
    assert_snapshot!(
        t("1 + -2 +3 0x10"),
        @"natural '1' operator '+' integer '-2' integer '+3' natural '16' end of file"
    );
    assert_snapshot!(
        t("Natural/show x@1 `if`"),
        @"word 'Natural/show' word 'x' '@' natural '1' label '`if`' end of file"
    );
    assert_snapshot!(
        t("./a.dhall ../b /c ~/d https://e.org/f env:HOME sha256:00ff as Text"),
        @"path './a.dhall' path '../b' path '/c' path '~/d' url 'https://e.org/f' 'env:HOME' 'sha256:00ff' keyword 'as' word 'Text' end of file"
    );
    assert_snapshot!(
        t("r.x -- to the end\n{- nested {- block -} comment -} y"),
        @"word 'r' '.' word 'x' word 'y' end of file"
    );
    assert_snapshot!(
        t(r#""a${ { b = "c" }.b }\n\"""#),
        @r#"quote text "a" '${' open '{' word 'b' '=' quote text "c" quote close '}' '.' word 'b' close '}' text "\n\"" quote end of file"#
    );
    assert_snapshot!(t("\"open"), @r#"quote text "open" end of file"#);
    assert_snapshot!(t("99999999999999999999 ∃"), @"token '99999999999999999999' token '∃' end of file");
}
