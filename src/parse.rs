//! parsing

use std::collections::{BTreeMap, VecDeque};

use crate::builtin::Builtin;
use crate::errors::{self, SyntaxError, SyntaxErrorKind};
use crate::format::{is_plain_label, op_level};
use crate::hash::Sha256Hash;
use crate::import::ImportLocation;
use crate::lex::{Lexer, Location, Token, TokenKind};
use crate::stack::on_large_stack;
use crate::syntax::{Binding, Chunks, Const, Expr, Import, ImportMode, Label, MAX_DEPTH};

/// bound on the parser's own recursion, one level per nested expression
pub const MAX_NESTING: usize = 256;

type Parsed<T> = Result<T, Box<SyntaxError>>;

/// an expression and the depth of its tree
struct Node(Expr, usize);

impl Node {
    fn leaf(e: Expr) -> Node {
        Node(e, 1)
    }
}

/// parse a whole source; `path` only names it in error locations
pub fn parse(path: &str, source: &[u8]) -> Result<Expr, SyntaxError> {
    on_large_stack(|| {
        let mut parser = Parser::new(path, source);
        let parsed = parser
            .expression()
            .and_then(|Node(e, _)| parser.expect(TokenKind::End, "end of file").map(|_| e));
        parsed.map_err(|e| *e)
    })
}

struct Parser<'parse> {
    path: &'parse str,
    source: &'parse [u8],
    lexer: Lexer<'parse>,
    ahead: VecDeque<Token>,
    nesting: usize,
}

impl<'parse> Parser<'parse> {
    fn new(path: &'parse str, source: &'parse [u8]) -> Self {
        Self {
            path,
            source,
            lexer: Lexer::new(path, source),
            ahead: VecDeque::new(),
            nesting: 0,
        }
    }

    // token stream {{{
    fn lex(&mut self) -> Token {
        match self.lexer.next() {
            Some(token) => token,
            None => {
                let end = self.source.len();
                Token(Location(self.path.into(), end..end), TokenKind::End)
            }
        }
    }

    fn peek_at(&mut self, n: usize) -> &TokenKind {
        while self.ahead.len() <= n {
            let token = self.lex();
            self.ahead.push_back(token);
        }
        &self.ahead[n].1
    }

    fn peek(&mut self) -> &TokenKind {
        self.peek_at(0)
    }

    fn peek_loc(&mut self) -> Location {
        self.peek_at(0);
        match self.ahead.front() {
            Some(token) => token.0.clone(),
            None => Location(self.path.into(), 0..0),
        }
    }

    fn next(&mut self) -> Token {
        match self.ahead.pop_front() {
            Some(token) => token,
            None => self.lex(),
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> Parsed<Location> {
        let token = self.next();
        if kind == token.1 {
            Ok(token.0)
        } else {
            Err(self.unexpected(token, expected))
        }
    }
    // }}}

    // error helpers {{{
    fn error(&self, loc: Location, kind: SyntaxErrorKind) -> Box<SyntaxError> {
        Box::new(errors::syntax_error(self.source, loc, kind))
    }

    fn unexpected(&self, token: Token, expected: &'static str) -> Box<SyntaxError> {
        let Token(loc, token) = token;
        self.error(loc, SyntaxErrorKind::Unexpected { token, expected })
    }

    /// wrap `e`, whose children are at most `depth` deep
    fn node(&self, loc: &Location, e: Expr, depth: usize) -> Parsed<Node> {
        let depth = depth + 1;
        if MAX_DEPTH < depth {
            Err(self.error(loc.clone(), SyntaxErrorKind::TooDeep(MAX_DEPTH)))
        } else {
            Ok(Node(e, depth))
        }
    }
    // }}}

    fn label(&mut self) -> Parsed<Label> {
        let token = self.next();
        match token.1 {
            TokenKind::Quoted(w) => Ok(w),
            TokenKind::Word(w) if is_plain_label(&w) => Ok(w),
            TokenKind::Word(w) => Err(self.error(token.0, SyntaxErrorKind::ReservedLabel(w))),
            _ => Err(self.unexpected(token, "a label")),
        }
    }

    /// record fields and union alternatives may be named after built-ins
    fn field_label(&mut self) -> Parsed<Label> {
        let token = self.next();
        match token.1 {
            TokenKind::Quoted(w) | TokenKind::Word(w) => Ok(w),
            _ => Err(self.unexpected(token, "a field name")),
        }
    }

    fn expression(&mut self) -> Parsed<Node> {
        self.nesting += 1;
        if MAX_NESTING < self.nesting {
            let loc = self.peek_loc();
            return Err(self.error(loc, SyntaxErrorKind::TooDeep(MAX_NESTING)));
        }
        let r = self.expression_inner();
        self.nesting -= 1;
        r
    }

    fn expression_inner(&mut self) -> Parsed<Node> {
        let kind = self.peek().clone();
        match kind {
            TokenKind::Lambda | TokenKind::Forall => {
                let loc = self.next().0;
                self.expect(TokenKind::OpenParen, "open '('")?;
                let name = self.label()?;
                self.expect(TokenKind::Colon, "':'")?;
                let Node(ty, d1) = self.expression()?;
                self.expect(TokenKind::CloseParen, "close ')'")?;
                self.expect(TokenKind::Arrow, "'→'")?;
                let Node(body, d2) = self.expression()?;
                let e = if TokenKind::Lambda == kind {
                    Expr::Lambda(name, Box::new(ty), Box::new(body))
                } else {
                    Expr::Pi(name, Box::new(ty), Box::new(body))
                };
                self.node(&loc, e, d1.max(d2))
            }

            TokenKind::If => {
                let loc = self.next().0;
                let Node(c, d1) = self.expression()?;
                self.expect(TokenKind::Then, "keyword 'then'")?;
                let Node(t, d2) = self.expression()?;
                self.expect(TokenKind::Else, "keyword 'else'")?;
                let Node(e, d3) = self.expression()?;
                let e = Expr::BoolIf(Box::new(c), Box::new(t), Box::new(e));
                self.node(&loc, e, d1.max(d2).max(d3))
            }

            TokenKind::Let => {
                let loc = self.peek_loc();
                let mut bindings = Vec::new();
                let mut depth = 0;
                while TokenKind::Let == *self.peek() {
                    self.next();
                    let name = self.label()?;
                    let annot = if TokenKind::Colon == *self.peek() {
                        self.next();
                        let Node(t, d) = self.expression()?;
                        depth = depth.max(d);
                        Some(t)
                    } else {
                        None
                    };
                    self.expect(TokenKind::Equal, "'='")?;
                    let Node(value, d) = self.expression()?;
                    depth = depth.max(d);
                    bindings.push(Binding { name, annot, value });
                }
                self.expect(TokenKind::In, "keyword 'in'")?;
                let Node(body, d) = self.expression()?;
                // each binding is one more level for whoever walks the tree
                let depth = depth.max(d) + bindings.len() - 1;
                self.node(&loc, Expr::Let(bindings, Box::new(body)), depth)
            }

            TokenKind::OpenBracket if TokenKind::CloseBracket == *self.peek_at(1) => {
                let loc = self.next().0;
                self.next();
                self.expect(TokenKind::Colon, "':' and the type of the list")?;
                let Node(ty, d) = self.application()?;
                match ty {
                    Expr::App(list, item) if Expr::Builtin(Builtin::List) == *list => {
                        self.node(&loc, Expr::EmptyList(item), d)
                    }
                    _ => Err(self.error(loc, SyntaxErrorKind::EmptyListAnnotation)),
                }
            }

            _ => {
                let Node(e, d) = self.operators(1)?;
                let kind = self.peek().clone();
                match kind {
                    TokenKind::Arrow => {
                        let loc = self.next().0;
                        let Node(b, d2) = self.expression()?;
                        self.node(&loc, Expr::arrow(e, b), d.max(d2))
                    }
                    TokenKind::Colon => {
                        let loc = self.next().0;
                        let Node(t, d2) = self.expression()?;
                        self.node(&loc, Expr::Annot(Box::new(e), Box::new(t)), d.max(d2))
                    }
                    _ => Ok(Node(e, d)),
                }
            }
        }
    }

    /// operators of precedence `min` or tighter, all left-associative
    fn operators(&mut self, min: u8) -> Parsed<Node> {
        let Node(mut lhs, mut depth) = self.application()?;
        while let TokenKind::Op(op) = *self.peek() {
            let level = op_level(op);
            if level < min {
                break;
            }
            let loc = self.next().0;
            let Node(rhs, d) = self.operators(level + 1)?;
            let Node(e, d) = self.node(&loc, Expr::op(op, lhs, rhs), depth.max(d))?;
            lhs = e;
            depth = d;
        }
        Ok(Node(lhs, depth))
    }

    fn starts_argument(&mut self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Natural(_)
                | TokenKind::Integer(_)
                | TokenKind::Word(_)
                | TokenKind::Quoted(_)
                | TokenKind::Quote
                | TokenKind::OpenParen
                | TokenKind::OpenBracket
                | TokenKind::OpenBrace
                | TokenKind::OpenAngle
                | TokenKind::Path(_)
                | TokenKind::Url(_)
                | TokenKind::Env(_)
                | TokenKind::Missing
        )
    }

    fn application(&mut self) -> Parsed<Node> {
        let Node(mut func, mut depth) = self.import()?;
        while self.starts_argument() {
            let loc = self.peek_loc();
            let Node(arg, d) = self.import()?;
            let Node(e, d) = self.node(&loc, Expr::app(func, arg), depth.max(d))?;
            func = e;
            depth = d;
        }
        Ok(Node(func, depth))
    }

    fn import(&mut self) -> Parsed<Node> {
        let kind = self.peek().clone();
        let location = match kind {
            TokenKind::Path(p) => ImportLocation::Local(p.into()),
            TokenKind::Url(u) => ImportLocation::Remote(u),
            TokenKind::Env(n) if !n.is_empty() => ImportLocation::Env(n),
            TokenKind::Missing => ImportLocation::Missing,
            _ => return self.selector(),
        };
        self.next();

        let hash = match self.peek().clone() {
            TokenKind::Hash(h) => {
                let loc = self.next().0;
                let parsed = h.parse::<Sha256Hash>();
                Some(parsed.map_err(|_| self.error(loc, SyntaxErrorKind::InvalidHash(h)))?)
            }
            _ => None,
        };

        let mode = if TokenKind::As == *self.peek() {
            self.next();
            let token = self.next();
            let mode = match &token.1 {
                TokenKind::Word(w) if "Text" == w => Some(ImportMode::RawText),
                TokenKind::Word(w) if "Location" == w => Some(ImportMode::Location),
                _ => None,
            };
            match mode {
                Some(mode) => mode,
                None => return Err(self.unexpected(token, "'Text' or 'Location'")),
            }
        } else {
            ImportMode::Code
        };

        Ok(Node::leaf(Expr::Import(Import {
            location,
            mode,
            hash,
        })))
    }

    fn selector(&mut self) -> Parsed<Node> {
        let Node(mut e, mut depth) = self.primitive()?;
        while TokenKind::Dot == *self.peek() {
            let loc = self.next().0;
            let name = self.field_label()?;
            let Node(f, d) = self.node(&loc, Expr::Field(Box::new(e), name), depth)?;
            e = f;
            depth = d;
        }
        Ok(Node(e, depth))
    }

    fn primitive(&mut self) -> Parsed<Node> {
        let Token(loc, kind) = self.next();
        match kind {
            TokenKind::Natural(n) => Ok(Node::leaf(Expr::NaturalLit(n))),
            TokenKind::Integer(i) => Ok(Node::leaf(Expr::IntegerLit(i))),

            TokenKind::Word(w) => Ok(Node::leaf(match w.as_str() {
                "True" => Expr::BoolLit(true),
                "False" => Expr::BoolLit(false),
                "Type" => Expr::Const(Const::Type),
                "Kind" => Expr::Const(Const::Kind),
                "Sort" => Expr::Const(Const::Sort),
                _ => match Builtin::try_from_name(&w) {
                    Some(b) => Expr::Builtin(b),
                    None => return self.variable(w),
                },
            })),
            TokenKind::Quoted(w) => self.variable(w),

            TokenKind::Quote => self.text(loc),

            TokenKind::OpenParen => {
                let node = self.expression()?;
                self.expect(TokenKind::CloseParen, "close ')'")?;
                Ok(node)
            }

            TokenKind::OpenBracket if TokenKind::CloseBracket == *self.peek() => {
                Err(self.error(loc, SyntaxErrorKind::EmptyListAnnotation))
            }
            TokenKind::OpenBracket => self.list(loc),
            TokenKind::OpenBrace => self.record(loc),
            TokenKind::OpenAngle => self.union(loc),

            kind => Err(self.unexpected(Token(loc, kind), "an expression")),
        }
    }

    fn variable(&mut self, name: Label) -> Parsed<Node> {
        let mut index = 0;
        if TokenKind::At == *self.peek() {
            self.next();
            let token = self.next();
            match token.1 {
                TokenKind::Natural(n) => {
                    index = usize::try_from(n).map_err(|_| self.unexpected(token, "an index"))?
                }
                _ => return Err(self.unexpected(token, "an index")),
            }
        }
        Ok(Node::leaf(Expr::Var(crate::syntax::Var { name, index })))
    }

    fn text(&mut self, loc: Location) -> Parsed<Node> {
        let mut lit = Chunks::default();
        let mut depth = 0;
        loop {
            let token = self.next();
            match token.1 {
                TokenKind::TextPart(s) => lit.suffix.push_str(&s),
                TokenKind::Interp => {
                    let Node(e, d) = self.expression()?;
                    depth = depth.max(d);
                    self.expect(TokenKind::InterpEnd, "close '}'")?;
                    lit.chunks.push((std::mem::take(&mut lit.suffix), e));
                }
                TokenKind::Quote => break,
                _ => return Err(self.unexpected(token, "closing quote")),
            }
        }
        self.node(&loc, Expr::TextLit(lit), depth)
    }

    fn list(&mut self, loc: Location) -> Parsed<Node> {
        let mut items = Vec::new();
        let mut depth = 0;
        loop {
            let Node(e, d) = self.expression()?;
            items.push(e);
            depth = depth.max(d);
            let token = self.next();
            match token.1 {
                TokenKind::Comma => {}
                TokenKind::CloseBracket => break,
                _ => return Err(self.unexpected(token, "',' or close ']'")),
            }
        }
        self.node(&loc, Expr::NonEmptyList(items), depth)
    }

    fn record(&mut self, loc: Location) -> Parsed<Node> {
        if TokenKind::CloseBrace == *self.peek() {
            self.next();
            return Ok(Node::leaf(Expr::RecordType(BTreeMap::new())));
        }
        if TokenKind::Equal == *self.peek() && TokenKind::CloseBrace == *self.peek_at(1) {
            self.next();
            self.next();
            return Ok(Node::leaf(Expr::RecordLit(BTreeMap::new())));
        }

        let is_type = TokenKind::Colon == *self.peek_at(1);
        let (sep, expected) = if is_type {
            (TokenKind::Colon, "':'")
        } else {
            (TokenKind::Equal, "'='")
        };

        let mut fields = BTreeMap::new();
        let mut depth = 0;
        loop {
            let name_loc = self.peek_loc();
            let name = self.field_label()?;
            self.expect(sep.clone(), expected)?;
            let Node(e, d) = self.expression()?;
            depth = depth.max(d);
            if fields.contains_key(&name) {
                return Err(self.error(name_loc, SyntaxErrorKind::DuplicateField(name)));
            }
            fields.insert(name, e);

            let token = self.next();
            match token.1 {
                TokenKind::Comma => {}
                TokenKind::CloseBrace => break,
                _ => return Err(self.unexpected(token, "',' or close '}'")),
            }
        }

        let e = if is_type {
            Expr::RecordType(fields)
        } else {
            Expr::RecordLit(fields)
        };
        self.node(&loc, e, depth)
    }

    fn union(&mut self, loc: Location) -> Parsed<Node> {
        let mut alts = BTreeMap::new();
        if TokenKind::CloseAngle == *self.peek() {
            self.next();
            return Ok(Node::leaf(Expr::UnionType(alts)));
        }

        let mut depth = 0;
        loop {
            let name_loc = self.peek_loc();
            let name = self.field_label()?;
            let ty = if TokenKind::Colon == *self.peek() {
                self.next();
                let Node(t, d) = self.expression()?;
                depth = depth.max(d);
                Some(t)
            } else {
                None
            };
            if alts.contains_key(&name) {
                return Err(self.error(name_loc, SyntaxErrorKind::DuplicateField(name)));
            }
            alts.insert(name, ty);

            let token = self.next();
            match token.1 {
                TokenKind::Bar => {}
                TokenKind::CloseAngle => break,
                _ => return Err(self.unexpected(token, "'|' or close '>'")),
            }
        }
        self.node(&loc, Expr::UnionType(alts), depth)
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;
    use crate::syntax::Op;

    fn p(source: &str) -> String {
        match parse("t", source.as_bytes()) {
            Ok(e) => e.to_string(),
            Err(e) => format!("error: {e}"),
        }
    }

    #[test]
    fn parsing() {
        assert_snapshot!(p("1 + 2 * 3"), @"1 + 2 * 3");
        assert_snapshot!(p("(1 + 2) * 3"), @"(1 + 2) * 3");
        assert_snapshot!(p("1 + -2"), @"1 + -2");
        assert_snapshot!(p("\\(x : Natural) -> x"), @"λ(x : Natural) → x");
        assert_snapshot!(p("forall (a : Type) -> a -> a"), @"∀(a : Type) → a → a");
        assert_snapshot!(p("let x = 1 let y : Natural = x in y"), @"let x = 1 let y : Natural = x in y");
        assert_snapshot!(p("if True then \"a\" else \"b\""), @r#"if True then "a" else "b""#);
        assert_snapshot!(p("[] : List Natural"), @"[] : List Natural");
        assert_snapshot!(p("[1, 2, 3] # [4]"), @"[1, 2, 3] # [4]");
        assert_snapshot!(p("{ b = 1, a = True }.a"), @"{ a = True, b = 1 }.a");
        assert_snapshot!(p("{ a : Natural }"), @"{ a : Natural }");
        assert_snapshot!(p("{=} : {}"), @"{=} : {}");
        assert_snapshot!(p("< B | A : Text >"), @"< A : Text | B >");
        assert_snapshot!(p("f x@1 (g y)"), @"f x@1 (g y)");
        assert_snapshot!(p("Natural/show 3 ++ \"!\""), @r#"Natural/show 3 ++ "!""#);
        assert_snapshot!(p("\"a ${\"b ${x}\"} c\""), @r#""a ${"b ${x}"} c""#);
    }

    #[test]
    fn imports() {
        assert_snapshot!(p("./a.dhall"), @"./a.dhall");
        assert_snapshot!(p("../a as Text"), @"../a as Text");
        assert_snapshot!(p("env:HOME as Location"), @"env:HOME as Location");
        assert_snapshot!(p("f missing"), @"f missing");
        assert_snapshot!(
            p("https://example.org/p.dhall sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"),
            @"https://example.org/p.dhall sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        let Ok(Expr::Import(import)) = parse("t", b"/etc/x.dhall sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855 as Text") else {
            panic!("not an import")
        };
        assert_eq!(ImportLocation::Local("/etc/x.dhall".into()), import.location);
        assert_eq!(ImportMode::RawText, import.mode);
        assert_eq!(Some(Sha256Hash::of(b"")), import.hash);
    }

    #[test]
    fn structure() {
        assert_eq!(
            Ok(Expr::op(
                Op::BoolOr,
                Expr::op(Op::BoolAnd, Expr::BoolLit(true), Expr::BoolLit(false)),
                Expr::op(Op::BoolEq, Expr::var("a", 0), Expr::var("b", 2)),
            )),
            parse("t", b"True && False || a == b@2")
        );
        // application binds tighter than any operator, selection tighter still
        assert_eq!(
            Ok(Expr::op(
                Op::NaturalPlus,
                Expr::app(Expr::var("f", 0), Expr::field(Expr::var("r", 0), "x")),
                Expr::NaturalLit(1),
            )),
            parse("t", b"f r.x + 1")
        );
    }

    #[test]
    fn errors() {
        assert_snapshot!(p("1 +"), @"error: t:1: Unexpected end of file, expected an expression");
        assert_snapshot!(p("(1"), @"error: t:1: Unexpected end of file, expected close ')'");
        assert_snapshot!(p("\\(Natural : Type) -> 1"), @"error: t:1: `Natural` is reserved and cannot be bound");
        assert_snapshot!(p("x\n[]"), @"error: t:2: An empty list must be annotated with `: List T`");
        assert_snapshot!(p("[] : Natural"), @"error: t:1: An empty list must be annotated with `: List T`");
        assert_snapshot!(p("{ a = 1, a = 2 }"), @"error: t:1: Duplicate field `a`");
        assert_snapshot!(p("./a sha256:abc"), @"error: t:1: Invalid integrity hash `abc`");
        assert_snapshot!(p("./a as Code"), @"error: t:1: Unexpected word 'Code', expected 'Text' or 'Location'");
        assert_snapshot!(p("\"open"), @"error: t:1: Unexpected end of file, expected closing quote");

        let Err(e) = parse("t", b"let x = 1\nin x +") else {
            panic!("should fail")
        };
        assert_eq!(2, e.lnum);
        assert_eq!("in x +", e.line);
    }

    #[test]
    fn limits() {
        // the whole program is one level, each list around it one more
        let nested = |n: usize| format!("{}1{}", "[".repeat(n), "]".repeat(n));
        assert!(parse("t", nested(MAX_NESTING - 1).as_bytes()).is_ok());
        assert_snapshot!(p(&nested(MAX_NESTING)), @"error: t:1: Expression is nested too deeply (limit is 256)");

        // long but shallow for the parser, deep for whoever walks the tree
        let sum = |n: usize| vec!["1"; n].join(" + ");
        assert!(parse("t", sum(MAX_DEPTH).as_bytes()).is_ok());
        assert_snapshot!(p(&sum(MAX_DEPTH + 1)), @"error: t:1: Expression is nested too deeply (limit is 1024)");

        let lets: String = (0..MAX_NESTING * 2).map(|k| format!("let x{k} = {k} ")).collect();
        assert!(parse("t", format!("{lets}in x0").as_bytes()).is_ok());
    }
}
