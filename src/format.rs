//! displaying expressions back as source text

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::builtin::Builtin;
use crate::syntax::{Chunks, Const, Expr, Import, ImportMode, Op, Var};

// loosest to tightest; operators sit in between at `1 + their rank`
const EXPR: u8 = 0;
const APP: u8 = 9;
const SELECTOR: u8 = 10;
const PRIMITIVE: u8 = 11;

pub(crate) fn op_level(op: Op) -> u8 {
    match op {
        Op::BoolOr => 1,
        Op::NaturalPlus => 2,
        Op::TextAppend => 3,
        Op::ListAppend => 4,
        Op::BoolAnd => 5,
        Op::NaturalTimes => 6,
        Op::BoolEq => 7,
        Op::BoolNe => 8,
    }
}

fn level(e: &Expr) -> u8 {
    match e {
        Expr::Lambda(..)
        | Expr::Pi(..)
        | Expr::Let(..)
        | Expr::BoolIf(..)
        | Expr::Annot(..)
        | Expr::EmptyList(_) => EXPR,
        Expr::Op(op, _, _) => op_level(*op),
        Expr::App(..) => APP,
        Expr::Import(i) if i.hash.is_some() || ImportMode::Code != i.mode => APP,
        Expr::Field(..) => SELECTOR,
        _ => PRIMITIVE,
    }
}

const KEYWORDS: &[&str] = &[
    "if", "then", "else", "let", "in", "as", "missing", "forall", "Type", "Kind", "Sort", "True",
    "False",
];

/// whether `name` can be written as is, otherwise it needs backticks
pub fn is_plain_label(name: &str) -> bool {
    let mut bytes = name.bytes();
    bytes
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || b'_' == c)
        && bytes.all(|c| c.is_ascii_alphanumeric() || b"_-/".contains(&c))
        && !KEYWORDS.contains(&name)
        && Builtin::try_from_name(name).is_none()
}

struct Label<'a>(&'a str);

impl Display for Label<'_> {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        if is_plain_label(self.0) {
            write!(f, "{}", self.0)
        } else {
            write!(f, "`{}`", self.0)
        }
    }
}

fn write_at(f: &mut Formatter, e: &Expr, min: u8) -> FmtResult {
    if level(e) < min {
        write!(f, "(")?;
        write_expr(f, e)?;
        write!(f, ")")
    } else {
        write_expr(f, e)
    }
}

fn write_text(f: &mut Formatter, s: &str) -> FmtResult {
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '$' if chars.peek() == Some(&'{') => write!(f, "\\$")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            c if c.is_control() && (c as u32) < 0x10000 => write!(f, "\\u{:04X}", c as u32)?,
            c => write!(f, "{c}")?,
        }
    }
    Ok(())
}

fn write_expr(f: &mut Formatter, e: &Expr) -> FmtResult {
    match e {
        Expr::Const(c) => write!(f, "{c}"),
        Expr::Var(v) => write!(f, "{v}"),

        Expr::Lambda(x, a, b) => {
            write!(f, "λ({} : ", Label(x))?;
            write_at(f, a, EXPR)?;
            write!(f, ") → ")?;
            write_at(f, b, EXPR)
        }
        Expr::Pi(x, a, b) if "_" == x && !b.mentions("_", 0) => {
            write_at(f, a, 1)?;
            write!(f, " → ")?;
            write_at(f, b, EXPR)
        }
        Expr::Pi(x, a, b) => {
            write!(f, "∀({} : ", Label(x))?;
            write_at(f, a, EXPR)?;
            write!(f, ") → ")?;
            write_at(f, b, EXPR)
        }
        Expr::App(func, arg) => {
            write_at(f, func, APP)?;
            write!(f, " ")?;
            write_at(f, arg, SELECTOR)
        }
        Expr::Let(bindings, body) => {
            for b in bindings {
                write!(f, "let {}", Label(&b.name))?;
                if let Some(t) = &b.annot {
                    write!(f, " : ")?;
                    write_at(f, t, EXPR)?;
                }
                write!(f, " = ")?;
                write_at(f, &b.value, EXPR)?;
                write!(f, " ")?;
            }
            write!(f, "in ")?;
            write_at(f, body, EXPR)
        }
        Expr::Annot(e, t) => {
            write_at(f, e, 1)?;
            write!(f, " : ")?;
            write_at(f, t, EXPR)
        }

        Expr::Builtin(b) => write!(f, "{b}"),
        Expr::BoolLit(true) => write!(f, "True"),
        Expr::BoolLit(false) => write!(f, "False"),
        Expr::BoolIf(c, t, e) => {
            write!(f, "if ")?;
            write_at(f, c, EXPR)?;
            write!(f, " then ")?;
            write_at(f, t, EXPR)?;
            write!(f, " else ")?;
            write_at(f, e, EXPR)
        }
        Expr::NaturalLit(n) => write!(f, "{n}"),
        Expr::IntegerLit(i) => write!(f, "{i:+}"),
        Expr::TextLit(Chunks { chunks, suffix }) => {
            write!(f, "\"")?;
            for (prefix, e) in chunks {
                write_text(f, prefix)?;
                write!(f, "${{")?;
                write_at(f, e, EXPR)?;
                write!(f, "}}")?;
            }
            write_text(f, suffix)?;
            write!(f, "\"")
        }

        Expr::Op(op, l, r) => {
            let lvl = op_level(*op);
            write_at(f, l, lvl)?;
            write!(f, " {op} ")?;
            write_at(f, r, lvl + 1)
        }

        Expr::EmptyList(t) => {
            write!(f, "[] : List ")?;
            write_at(f, t, SELECTOR)
        }
        Expr::NonEmptyList(items) => {
            write!(f, "[")?;
            for (k, it) in items.iter().enumerate() {
                if 0 < k {
                    write!(f, ", ")?;
                }
                write_at(f, it, EXPR)?;
            }
            write!(f, "]")
        }
        Expr::RecordType(fields) if fields.is_empty() => write!(f, "{{}}"),
        Expr::RecordType(fields) => {
            write!(f, "{{ ")?;
            for (k, (name, t)) in fields.iter().enumerate() {
                if 0 < k {
                    write!(f, ", ")?;
                }
                write!(f, "{} : ", Label(name))?;
                write_at(f, t, EXPR)?;
            }
            write!(f, " }}")
        }
        Expr::RecordLit(fields) if fields.is_empty() => write!(f, "{{=}}"),
        Expr::RecordLit(fields) => {
            write!(f, "{{ ")?;
            for (k, (name, v)) in fields.iter().enumerate() {
                if 0 < k {
                    write!(f, ", ")?;
                }
                write!(f, "{} = ", Label(name))?;
                write_at(f, v, EXPR)?;
            }
            write!(f, " }}")
        }
        Expr::Field(r, k) => {
            write_at(f, r, SELECTOR)?;
            write!(f, ".{}", Label(k))
        }
        Expr::UnionType(alts) if alts.is_empty() => write!(f, "<>"),
        Expr::UnionType(alts) => {
            write!(f, "< ")?;
            for (k, (name, t)) in alts.iter().enumerate() {
                if 0 < k {
                    write!(f, " | ")?;
                }
                write!(f, "{}", Label(name))?;
                if let Some(t) = t {
                    write!(f, " : ")?;
                    write_at(f, t, EXPR)?;
                }
            }
            write!(f, " >")
        }

        Expr::Import(i) => write!(f, "{i}"),
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write_expr(f, self)
    }
}

impl Display for Const {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(
            f,
            "{}",
            match self {
                Const::Type => "Type",
                Const::Kind => "Kind",
                Const::Sort => "Sort",
            }
        )
    }
}

impl Display for Var {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", Label(&self.name))?;
        if 0 < self.index {
            write!(f, "@{}", self.index)?;
        }
        Ok(())
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(
            f,
            "{}",
            match self {
                Op::BoolOr => "||",
                Op::NaturalPlus => "+",
                Op::TextAppend => "++",
                Op::ListAppend => "#",
                Op::BoolAnd => "&&",
                Op::NaturalTimes => "*",
                Op::BoolEq => "==",
                Op::BoolNe => "!=",
            }
        )
    }
}

impl Display for Import {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", self.location)?;
        if let Some(hash) = &self.hash {
            write!(f, " {hash}")?;
        }
        match self.mode {
            ImportMode::Code => Ok(()),
            ImportMode::RawText => write!(f, " as Text"),
            ImportMode::Location => write!(f, " as Location"),
        }
    }
}

#[test]
fn test() {
    use insta::assert_snapshot;

    use crate::syntax::Binding;

    let nat = || Expr::Builtin(Builtin::Natural);

    assert_snapshot!(
        Expr::lambda("x", nat(), Expr::op(Op::NaturalPlus, Expr::var("x", 0), Expr::NaturalLit(1))),
        @"λ(x : Natural) → x + 1"
    );
    assert_snapshot!(Expr::arrow(nat(), Expr::arrow(nat(), nat())), @"Natural → Natural → Natural");
    assert_snapshot!(Expr::arrow(Expr::arrow(nat(), nat()), nat()), @"(Natural → Natural) → Natural");
    assert_snapshot!(
        Expr::pi("a", Expr::Const(Const::Type), Expr::list_of(Expr::var("a", 0))),
        @"∀(a : Type) → List a"
    );
    assert_snapshot!(
        Expr::op(
            Op::NaturalTimes,
            Expr::op(Op::NaturalPlus, Expr::NaturalLit(1), Expr::NaturalLit(2)),
            Expr::IntegerLit(-3),
        ),
        @"(1 + 2) * -3"
    );
    assert_snapshot!(
        Expr::app(Expr::Builtin(Builtin::NaturalShow), Expr::app(Expr::var("f", 1), Expr::var("x", 0))),
        @"Natural/show (f@1 x)"
    );
    assert_snapshot!(
        Expr::Let(
            vec![Binding { name: "if".into(), annot: Some(nat()), value: Expr::NaturalLit(0) }],
            Box::new(Expr::var("if", 0)),
        ),
        @"let `if` : Natural = 0 in `if`"
    );
    assert_snapshot!(Expr::text("say \"${hi}\"\n"), @r#""say \"\${hi}\"\n""#);
    assert_snapshot!(Expr::EmptyList(Box::new(Expr::list_of(nat()))), @"[] : List (List Natural)");
    assert_snapshot!(
        Expr::field(
            Expr::RecordLit([("a".to_string(), Expr::RecordLit(Default::default()))].into()),
            "a",
        ),
        @"{ a = {=} }.a"
    );
    assert_snapshot!(
        Expr::UnionType([("A".to_string(), Some(nat())), ("B".to_string(), None)].into()),
        @"< A : Natural | B >"
    );
}
