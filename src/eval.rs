//! normalization, alpha-normalization and judgmental equality

use std::convert::Infallible;
use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::builtin::Builtin;
use crate::stack::on_large_stack;
use crate::syntax::{infallible, Binding, Chunks, Expr, Op};

/// an expression in beta-normal form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value(Expr);

impl Value {
    /// caller guarantees `expr` is already normal
    pub(crate) fn from_normal(expr: Expr) -> Value {
        Value(expr)
    }

    pub fn as_expr(&self) -> &Expr {
        &self.0
    }

    pub fn into_expr(self) -> Expr {
        self.0
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

/// Beta-normalize a term. Terminates for well-typed, import-free terms;
/// applying it to anything else is a caller error (though it still returns
/// some tree).
pub fn eval(expr: &Expr) -> Value {
    on_large_stack(|| Value(normalize(expr)))
}

/// the alpha-normal expression of a value, every binder renamed to `_`
pub fn quote_alpha_normal(value: &Value) -> Expr {
    on_large_stack(|| alpha_normalize(&value.0))
}

pub fn judgmentally_equal(a: &Expr, b: &Expr) -> bool {
    on_large_stack(|| alpha_normalize(&normalize(a)) == alpha_normalize(&normalize(b)))
}

pub(crate) fn normalize(expr: &Expr) -> Expr {
    match expr {
        Expr::Const(_)
        | Expr::Var(_)
        | Expr::Builtin(_)
        | Expr::BoolLit(_)
        | Expr::NaturalLit(_)
        | Expr::IntegerLit(_)
        | Expr::Import(_) => expr.clone(),

        Expr::Lambda(x, a, b) => Expr::Lambda(x.clone(), Box::new(normalize(a)), Box::new(normalize(b))),
        Expr::Pi(x, a, b) => Expr::Pi(x.clone(), Box::new(normalize(a)), Box::new(normalize(b))),
        Expr::App(f, a) => apply(normalize(f), normalize(a)),

        Expr::Let(bindings, body) => match bindings.split_first() {
            Some((first, rest)) => {
                let value = normalize(&first.value);
                normalize(&Expr::wrap_let(rest, body).instantiate(&first.name, &value))
            }
            None => normalize(body),
        },
        Expr::Annot(e, _) => normalize(e),

        Expr::BoolIf(c, t, e) => match normalize(c) {
            Expr::BoolLit(true) => normalize(t),
            Expr::BoolLit(false) => normalize(e),
            c => {
                let t = normalize(t);
                let e = normalize(e);
                if matches!((&t, &e), (Expr::BoolLit(true), Expr::BoolLit(false))) {
                    c
                } else if alpha_normalize(&t) == alpha_normalize(&e) {
                    t
                } else {
                    Expr::BoolIf(Box::new(c), Box::new(t), Box::new(e))
                }
            }
        },

        Expr::TextLit(lit) => normalize_text(lit),
        Expr::Op(op, l, r) => binop(*op, normalize(l), normalize(r)),

        Expr::EmptyList(t) => Expr::EmptyList(Box::new(normalize(t))),
        Expr::NonEmptyList(items) => Expr::NonEmptyList(items.iter().map(normalize).collect()),
        Expr::RecordType(fields) => {
            Expr::RecordType(fields.iter().map(|(k, v)| (k.clone(), normalize(v))).collect())
        }
        Expr::RecordLit(fields) => {
            Expr::RecordLit(fields.iter().map(|(k, v)| (k.clone(), normalize(v))).collect())
        }
        Expr::Field(r, k) => match normalize(r) {
            Expr::RecordLit(mut fields) => match fields.remove(k) {
                Some(v) => v,
                None => Expr::Field(Box::new(Expr::RecordLit(fields)), k.clone()),
            },
            r => Expr::Field(Box::new(r), k.clone()),
        },
        Expr::UnionType(alts) => Expr::UnionType(
            alts.iter()
                .map(|(k, t)| (k.clone(), t.as_ref().map(normalize)))
                .collect(),
        ),
    }
}

/// both `func` and `arg` are normal
fn apply(func: Expr, arg: Expr) -> Expr {
    if let Expr::Lambda(x, _, body) = &func {
        return normalize(&body.instantiate(x, &arg));
    }

    let reduced = match (&func, &arg) {
        (Expr::Builtin(b), _) => builtin(*b, &arg),
        // `List/length T xs`
        (Expr::App(inner, _), Expr::EmptyList(_))
            if matches!(**inner, Expr::Builtin(Builtin::ListLength)) =>
        {
            Some(Expr::NaturalLit(0))
        }
        (Expr::App(inner, _), Expr::NonEmptyList(items))
            if matches!(**inner, Expr::Builtin(Builtin::ListLength)) =>
        {
            Some(Expr::NaturalLit(items.len() as u64))
        }
        _ => None,
    };

    reduced.unwrap_or_else(|| Expr::app(func, arg))
}

fn builtin(b: Builtin, arg: &Expr) -> Option<Expr> {
    Some(match (b, arg) {
        (Builtin::NaturalIsZero, Expr::NaturalLit(n)) => Expr::BoolLit(*n == 0),
        (Builtin::NaturalEven, Expr::NaturalLit(n)) => Expr::BoolLit(n % 2 == 0),
        (Builtin::NaturalOdd, Expr::NaturalLit(n)) => Expr::BoolLit(n % 2 == 1),
        (Builtin::NaturalToInteger, Expr::NaturalLit(n)) => Expr::IntegerLit(i64::try_from(*n).ok()?),
        (Builtin::NaturalShow, Expr::NaturalLit(n)) => Expr::text(n.to_string()),
        (Builtin::IntegerShow, Expr::IntegerLit(i)) => Expr::text(if *i < 0 {
            i.to_string()
        } else {
            format!("+{i}")
        }),
        (Builtin::IntegerNegate, Expr::IntegerLit(i)) => Expr::IntegerLit(i.checked_neg()?),
        _ => return None,
    })
}

/// both operands are normal; arithmetic that would overflow stays unreduced
fn binop(op: Op, l: Expr, r: Expr) -> Expr {
    use Expr::{BoolLit, NaturalLit};

    let reduced = match (op, &l, &r) {
        (Op::BoolOr, BoolLit(true), _) | (Op::BoolOr, _, BoolLit(true)) => Some(BoolLit(true)),
        (Op::BoolOr, BoolLit(false), _) => Some(r.clone()),
        (Op::BoolOr, _, BoolLit(false)) => Some(l.clone()),

        (Op::BoolAnd, BoolLit(false), _) | (Op::BoolAnd, _, BoolLit(false)) => Some(BoolLit(false)),
        (Op::BoolAnd, BoolLit(true), _) => Some(r.clone()),
        (Op::BoolAnd, _, BoolLit(true)) => Some(l.clone()),

        (Op::BoolEq, BoolLit(a), BoolLit(b)) => Some(BoolLit(a == b)),
        (Op::BoolEq, BoolLit(true), _) => Some(r.clone()),
        (Op::BoolEq, _, BoolLit(true)) => Some(l.clone()),

        (Op::BoolNe, BoolLit(a), BoolLit(b)) => Some(BoolLit(a != b)),
        (Op::BoolNe, BoolLit(false), _) => Some(r.clone()),
        (Op::BoolNe, _, BoolLit(false)) => Some(l.clone()),

        (Op::NaturalPlus, NaturalLit(a), NaturalLit(b)) => a.checked_add(*b).map(NaturalLit),
        (Op::NaturalPlus, NaturalLit(0), _) => Some(r.clone()),
        (Op::NaturalPlus, _, NaturalLit(0)) => Some(l.clone()),

        (Op::NaturalTimes, NaturalLit(a), NaturalLit(b)) => a.checked_mul(*b).map(NaturalLit),
        (Op::NaturalTimes, NaturalLit(0), _) | (Op::NaturalTimes, _, NaturalLit(0)) => {
            Some(NaturalLit(0))
        }
        (Op::NaturalTimes, NaturalLit(1), _) => Some(r.clone()),
        (Op::NaturalTimes, _, NaturalLit(1)) => Some(l.clone()),

        (Op::TextAppend, Expr::TextLit(_), Expr::TextLit(_)) => Some(normalize_text(&Chunks {
            chunks: vec![(String::new(), l.clone()), (String::new(), r.clone())],
            suffix: String::new(),
        })),
        (Op::TextAppend, Expr::TextLit(a), _) if a.chunks.is_empty() && a.suffix.is_empty() => {
            Some(r.clone())
        }
        (Op::TextAppend, _, Expr::TextLit(b)) if b.chunks.is_empty() && b.suffix.is_empty() => {
            Some(l.clone())
        }

        (Op::ListAppend, Expr::EmptyList(_), _) => Some(r.clone()),
        (Op::ListAppend, _, Expr::EmptyList(_)) => Some(l.clone()),
        (Op::ListAppend, Expr::NonEmptyList(a), Expr::NonEmptyList(b)) => {
            Some(Expr::NonEmptyList(a.iter().chain(b).cloned().collect()))
        }

        _ => None,
    };

    // `x && x`, `x || x`, `x == x`, `x != x`
    let reduced = reduced.or_else(|| {
        let same = || alpha_normalize(&l) == alpha_normalize(&r);
        match op {
            Op::BoolAnd | Op::BoolOr if same() => Some(l.clone()),
            Op::BoolEq if same() => Some(BoolLit(true)),
            Op::BoolNe if same() => Some(BoolLit(false)),
            _ => None,
        }
    });

    reduced.unwrap_or_else(|| Expr::op(op, l, r))
}

/// flatten nested literals and merge adjacent text; `"${e}"` is just `e`
fn normalize_text(lit: &Chunks) -> Expr {
    let mut out = Chunks::default();
    let mut pending = String::new();

    for (prefix, e) in &lit.chunks {
        pending.push_str(prefix);
        match normalize(e) {
            Expr::TextLit(inner) => {
                for (p, ie) in inner.chunks {
                    pending.push_str(&p);
                    out.chunks.push((std::mem::take(&mut pending), ie));
                }
                pending.push_str(&inner.suffix);
            }
            e => out.chunks.push((std::mem::take(&mut pending), e)),
        }
    }
    pending.push_str(&lit.suffix);
    out.suffix = pending;

    if out.suffix.is_empty() && out.chunks.len() == 1 && out.chunks[0].0.is_empty() {
        if let Some((_, e)) = out.chunks.pop() {
            return e;
        }
    }
    Expr::TextLit(out)
}

/// rename every binder to `_`, keeping references pointing at the same binders
pub fn alpha_normalize(expr: &Expr) -> Expr {
    match expr {
        Expr::Lambda(x, a, b) => Expr::Lambda(
            "_".into(),
            Box::new(alpha_normalize(a)),
            Box::new(alpha_normalize(&anonymize(x, b))),
        ),
        Expr::Pi(x, a, b) => Expr::Pi(
            "_".into(),
            Box::new(alpha_normalize(a)),
            Box::new(alpha_normalize(&anonymize(x, b))),
        ),
        Expr::Let(bindings, body) => {
            let Some((first, rest)) = bindings.split_first() else {
                return alpha_normalize(body);
            };
            let mut out = vec![Binding {
                name: "_".into(),
                annot: first.annot.as_ref().map(alpha_normalize),
                value: alpha_normalize(&first.value),
            }];
            let body = match alpha_normalize(&anonymize(&first.name, &Expr::wrap_let(rest, body))) {
                Expr::Let(more, body) if !rest.is_empty() => {
                    out.extend(more);
                    body
                }
                body => Box::new(body),
            };
            Expr::Let(out, body)
        }
        _ => infallible(expr.traverse::<Infallible>(|child, _| Ok(alpha_normalize(child)))),
    }
}

/// rewrite the body of a binder named `name` as if it were named `_`
fn anonymize(name: &str, body: &Expr) -> Expr {
    if name == "_" {
        return body.clone();
    }
    body.shift(1, "_", 0)
        .subst(name, 0, &Expr::var("_", 0))
        .shift(-1, name, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::Const;

    fn nat(n: u64) -> Expr {
        Expr::NaturalLit(n)
    }

    #[test]
    fn arithmetic() {
        assert_eq!(nat(3), normalize(&Expr::op(Op::NaturalPlus, nat(1), nat(2))));
        assert_eq!(nat(6), normalize(&Expr::op(Op::NaturalTimes, nat(2), nat(3))));

        // overflow is left alone rather than wrapped
        let big = Expr::op(Op::NaturalPlus, nat(u64::MAX), nat(1));
        assert_eq!(big, normalize(&big));

        // identities on open terms
        let x = Expr::var("x", 0);
        assert_eq!(x, normalize(&Expr::op(Op::NaturalPlus, nat(0), x.clone())));
        assert_eq!(nat(0), normalize(&Expr::op(Op::NaturalTimes, x.clone(), nat(0))));
    }

    #[test]
    fn beta_and_let() {
        let id = Expr::lambda("x", Expr::Builtin(Builtin::Natural), Expr::var("x", 0));
        assert_eq!(nat(4), eval(&Expr::app(id, nat(4))).into_expr());

        let e = Expr::Let(
            vec![
                Binding {
                    name: "x".into(),
                    annot: None,
                    value: nat(1),
                },
                Binding {
                    name: "y".into(),
                    annot: None,
                    value: Expr::op(Op::NaturalPlus, Expr::var("x", 0), nat(1)),
                },
            ],
            Box::new(Expr::op(Op::NaturalTimes, Expr::var("y", 0), nat(10))),
        );
        assert_eq!(nat(20), eval(&e).into_expr());
    }

    #[test]
    fn builtins() {
        let show = |i| normalize(&Expr::app(Expr::Builtin(Builtin::IntegerShow), Expr::IntegerLit(i)));
        assert_eq!(Expr::text("+3"), show(3));
        assert_eq!(Expr::text("-3"), show(-3));

        let len = Expr::app(
            Expr::app(Expr::Builtin(Builtin::ListLength), Expr::Builtin(Builtin::Natural)),
            Expr::NonEmptyList(vec![nat(1), nat(2)]),
        );
        assert_eq!(nat(2), normalize(&len));

        let stuck = Expr::app(Expr::Builtin(Builtin::NaturalEven), Expr::var("n", 0));
        assert_eq!(stuck, normalize(&stuck));
    }

    #[test]
    fn text() {
        let e = Expr::TextLit(Chunks {
            chunks: vec![
                ("a".into(), Expr::text("b")),
                (String::new(), Expr::var("x", 0)),
            ],
            suffix: "c".into(),
        });
        let expected = Expr::TextLit(Chunks {
            chunks: vec![("ab".into(), Expr::var("x", 0))],
            suffix: "c".into(),
        });
        assert_eq!(expected, normalize(&e));

        let only = Expr::TextLit(Chunks {
            chunks: vec![(String::new(), Expr::var("x", 0))],
            suffix: String::new(),
        });
        assert_eq!(Expr::var("x", 0), normalize(&only));

        let append = Expr::op(Op::TextAppend, Expr::text("ab"), Expr::text("cd"));
        assert_eq!(Expr::text("abcd"), normalize(&append));
    }

    #[test]
    fn alpha_equivalence() {
        let f = |x: &str| Expr::lambda(x, Expr::Const(Const::Type), Expr::var(x, 0));
        assert_ne!(f("a"), f("b"));
        assert_eq!(alpha_normalize(&f("a")), alpha_normalize(&f("b")));
        assert!(judgmentally_equal(&f("a"), &f("b")));

        // `λ(x : Type) → λ(_ : x) → x` keeps pointing at the outer binder
        let nested = Expr::lambda(
            "x",
            Expr::Const(Const::Type),
            Expr::lambda("_", Expr::var("x", 0), Expr::var("x", 0)),
        );
        let expected = Expr::lambda(
            "_",
            Expr::Const(Const::Type),
            Expr::lambda("_", Expr::var("_", 0), Expr::var("_", 1)),
        );
        assert_eq!(expected, alpha_normalize(&nested));
    }
}
