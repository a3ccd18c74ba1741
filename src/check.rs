//! type inference for import-free expressions

use crate::builtin::Builtin;
use crate::errors::TypeError;
use crate::eval::{judgmentally_equal, normalize, Value};
use crate::stack::on_large_stack;
use crate::syntax::{Const, Expr, Label, Op, Var};

/// Types of the variables in scope, innermost last.
///
/// Every type is normal and valid where it is, so inserting shifts the ones
/// already there past the new binder.
#[derive(Debug, Clone, Default)]
pub struct Context(Vec<(Label, Expr)>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, ty: Expr) -> Context {
        let mut entries: Vec<_> = self
            .0
            .iter()
            .map(|(x, t)| (x.clone(), t.shift(1, name, 0)))
            .collect();
        entries.push((name.into(), ty.shift(1, name, 0)));
        Context(entries)
    }

    pub fn lookup(&self, var: &Var) -> Option<&Expr> {
        self.0
            .iter()
            .rev()
            .filter(|(x, _)| *x == var.name)
            .nth(var.index)
            .map(|(_, t)| t)
    }
}

/// the (normal) type of a closed expression
pub fn type_of(expr: &Expr) -> Result<Value, TypeError> {
    on_large_stack(|| type_with(&Context::new(), expr).map(Value::from_normal))
}

fn bool() -> Expr {
    Expr::Builtin(Builtin::Bool)
}

/// `Some(c)` when `e` is itself a type, kind or sort living in `c`
fn universe(ctx: &Context, e: &Expr) -> Result<Option<Const>, TypeError> {
    Ok(match type_with(ctx, e)? {
        Expr::Const(c) => Some(c),
        _ => None,
    })
}

fn list_item(ty: &Expr) -> Option<&Expr> {
    match ty {
        Expr::App(l, t) if matches!(**l, Expr::Builtin(Builtin::List)) => Some(t),
        _ => None,
    }
}

/// Infer the type of `expr` in `ctx`, in normal form.
pub fn type_with(ctx: &Context, expr: &Expr) -> Result<Expr, TypeError> {
    match expr {
        Expr::Const(Const::Type) => Ok(Expr::Const(Const::Kind)),
        Expr::Const(Const::Kind) => Ok(Expr::Const(Const::Sort)),
        Expr::Const(Const::Sort) => Err(TypeError::UntypedSort),
        Expr::Var(v) => ctx
            .lookup(v)
            .cloned()
            .ok_or_else(|| TypeError::UnboundVariable(v.clone())),

        // functions {{{
        Expr::Lambda(x, a, b) => {
            if universe(ctx, a)?.is_none() {
                return Err(TypeError::InvalidInputType((**a).clone()));
            }
            let a = normalize(a);
            let tb = type_with(&ctx.insert(x, a.clone()), b)?;
            let pi = Expr::Pi(x.clone(), Box::new(a), Box::new(tb));
            type_with(ctx, &pi)?;
            Ok(pi)
        }
        Expr::Pi(x, a, b) => {
            let Some(i) = universe(ctx, a)? else {
                return Err(TypeError::InvalidInputType((**a).clone()));
            };
            let Some(o) = universe(&ctx.insert(x, normalize(a)), b)? else {
                return Err(TypeError::InvalidOutputType((**b).clone()));
            };
            // impredicative: functions into terms are terms
            Ok(Expr::Const(if Const::Type == o { o } else { i.max(o) }))
        }
        Expr::App(f, a) => {
            let tf = type_with(ctx, f)?;
            let Expr::Pi(x, input, output) = &tf else {
                return Err(TypeError::NotAFunction {
                    func: (**f).clone(),
                    ty: tf,
                });
            };
            let ta = type_with(ctx, a)?;
            if !judgmentally_equal(input, &ta) {
                return Err(TypeError::TypeMismatch {
                    expected: (**input).clone(),
                    actual: ta,
                });
            }
            Ok(normalize(&output.instantiate(x, a)))
        }
        // }}}

        Expr::Let(bindings, body) => {
            let Some((first, rest)) = bindings.split_first() else {
                return type_with(ctx, body);
            };
            let tv = type_with(ctx, &first.value)?;
            if let Some(annot) = &first.annot {
                type_with(ctx, annot)?;
                if !judgmentally_equal(annot, &tv) {
                    return Err(TypeError::AnnotMismatch {
                        annotation: normalize(annot),
                        actual: tv,
                    });
                }
            }
            let value = normalize(&first.value);
            type_with(ctx, &Expr::wrap_let(rest, body).instantiate(&first.name, &value))
        }
        Expr::Annot(e, t) => {
            type_with(ctx, t)?;
            let te = type_with(ctx, e)?;
            if judgmentally_equal(t, &te) {
                Ok(te)
            } else {
                Err(TypeError::AnnotMismatch {
                    annotation: normalize(t),
                    actual: te,
                })
            }
        }

        Expr::Builtin(b) => Ok(b.make_type()),
        Expr::BoolLit(_) => Ok(bool()),
        Expr::BoolIf(c, t, e) => {
            let tc = type_with(ctx, c)?;
            if tc != bool() {
                return Err(TypeError::InvalidPredicate(tc));
            }
            let tt = type_with(ctx, t)?;
            if universe(ctx, &tt)? != Some(Const::Type) {
                return Err(TypeError::IfBranchMustBeTerm((**t).clone()));
            }
            let te = type_with(ctx, e)?;
            if universe(ctx, &te)? != Some(Const::Type) {
                return Err(TypeError::IfBranchMustBeTerm((**e).clone()));
            }
            if !judgmentally_equal(&tt, &te) {
                return Err(TypeError::IfBranchMismatch {
                    left: tt,
                    right: te,
                });
            }
            Ok(tt)
        }
        Expr::NaturalLit(_) => Ok(Expr::Builtin(Builtin::Natural)),
        Expr::IntegerLit(_) => Ok(Expr::Builtin(Builtin::Integer)),
        Expr::TextLit(lit) => {
            for (_, e) in &lit.chunks {
                let te = type_with(ctx, e)?;
                if te != Expr::Builtin(Builtin::Text) {
                    return Err(TypeError::CantInterpolate(te));
                }
            }
            Ok(Expr::Builtin(Builtin::Text))
        }

        Expr::Op(Op::ListAppend, l, r) => {
            let tl = type_with(ctx, l)?;
            let tr = type_with(ctx, r)?;
            for t in [&tl, &tr] {
                if list_item(t).is_none() {
                    return Err(TypeError::OperandMismatch {
                        op: Op::ListAppend,
                        expected: Expr::Builtin(Builtin::List),
                        actual: t.clone(),
                    });
                }
            }
            if !judgmentally_equal(&tl, &tr) {
                return Err(TypeError::ListAppendMismatch {
                    left: tl,
                    right: tr,
                });
            }
            Ok(tl)
        }
        Expr::Op(op, l, r) => {
            let expected = Expr::Builtin(match op {
                Op::BoolOr | Op::BoolAnd | Op::BoolEq | Op::BoolNe => Builtin::Bool,
                Op::NaturalPlus | Op::NaturalTimes => Builtin::Natural,
                Op::TextAppend => Builtin::Text,
                Op::ListAppend => Builtin::List,
            });
            for operand in [l, r] {
                let actual = type_with(ctx, operand)?;
                if actual != expected {
                    return Err(TypeError::OperandMismatch {
                        op: *op,
                        expected,
                        actual,
                    });
                }
            }
            Ok(expected)
        }

        // lists {{{
        // `[] : List t` carries `t`
        Expr::EmptyList(t) => {
            if universe(ctx, t)? != Some(Const::Type) {
                return Err(TypeError::InvalidListType((**t).clone()));
            }
            Ok(Expr::list_of(normalize(t)))
        }
        Expr::NonEmptyList(items) => {
            let Some((first, rest)) = items.split_first() else {
                return Err(TypeError::MissingListType(expr.clone()));
            };
            let t0 = type_with(ctx, first)?;
            if universe(ctx, &t0)? != Some(Const::Type) {
                return Err(TypeError::InvalidListType(t0));
            }
            for (k, it) in rest.iter().enumerate() {
                let ti = type_with(ctx, it)?;
                if !judgmentally_equal(&t0, &ti) {
                    return Err(TypeError::InvalidListElement {
                        index: k + 1,
                        expected: t0,
                        actual: ti,
                    });
                }
            }
            Ok(Expr::list_of(t0))
        }
        // }}}

        // records and unions {{{
        Expr::RecordType(fields) => {
            let mut c = Const::Type;
            for (name, t) in fields {
                match universe(ctx, t)? {
                    Some(u) => c = c.max(u),
                    None => return Err(TypeError::InvalidFieldType(name.clone())),
                }
            }
            Ok(Expr::Const(c))
        }
        Expr::RecordLit(fields) => {
            let mut types = std::collections::BTreeMap::new();
            for (name, v) in fields {
                let tv = type_with(ctx, v)?;
                if universe(ctx, &tv)?.is_none() {
                    return Err(TypeError::InvalidFieldType(name.clone()));
                }
                types.insert(name.clone(), tv);
            }
            Ok(Expr::RecordType(types))
        }
        Expr::Field(r, k) => match type_with(ctx, r)? {
            Expr::RecordType(mut fields) => fields
                .remove(k)
                .ok_or_else(|| TypeError::MissingField(k.clone())),
            _ => match normalize(r) {
                Expr::UnionType(alts) => match alts.get(k) {
                    // a constructor
                    Some(Some(t)) => {
                        let t = t.clone();
                        let union = Expr::UnionType(alts).shift(1, k, 0);
                        Ok(Expr::Pi(k.clone(), Box::new(t), Box::new(union)))
                    }
                    Some(None) => Ok(Expr::UnionType(alts)),
                    None => Err(TypeError::MissingField(k.clone())),
                },
                _ => Err(TypeError::NotARecord((**r).clone())),
            },
        },
        Expr::UnionType(alts) => {
            let mut c = Const::Type;
            for (name, t) in alts {
                if let Some(t) = t {
                    match universe(ctx, t)? {
                        Some(u) => c = c.max(u),
                        None => return Err(TypeError::InvalidAlternativeType(name.clone())),
                    }
                }
            }
            Ok(Expr::Const(c))
        }
        // }}}

        Expr::Import(i) => Err(TypeError::UnresolvedImport(i.clone())),
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;
    use crate::parse::parse;

    fn t(source: &str) -> String {
        let expr = parse("t", source.as_bytes()).unwrap();
        match type_of(&expr) {
            Ok(ty) => ty.to_string(),
            Err(e) => format!("error: {e}"),
        }
    }

    #[test]
    fn typing() {
        assert_snapshot!(t("1 + 2"), @"Natural");
        assert_snapshot!(t("λ(x : Natural) → x + 1"), @"∀(x : Natural) → Natural");
        assert_snapshot!(t("λ(a : Type) → λ(x : a) → x"), @"∀(a : Type) → ∀(x : a) → a");
        assert_snapshot!(t("λ(x : Type) → λ(x : x) → x"), @"∀(x : Type) → ∀(x : x) → x@1");
        assert_snapshot!(t("let id = λ(a : Type) → λ(x : a) → x in id Natural 3"), @"Natural");
        assert_snapshot!(t("let a = Natural let x : a = 1 in [x] # [2]"), @"List Natural");
        assert_snapshot!(t("List/length Natural [1]"), @"Natural");
        assert_snapshot!(t("Type"), @"Kind");
        assert_snapshot!(t("List"), @"Type → Type");
        assert_snapshot!(t("{ a : Natural }"), @"Type");
        assert_snapshot!(t("{ b = \"x\", a = 1 }"), @"{ a : Natural, b : Text }");
        assert_snapshot!(t("{ a = { b = True } }.a.b"), @"Bool");
        assert_snapshot!(t("if True then 1 else 2"), @"Natural");
        assert_snapshot!(t("\"a${Natural/show 1}\""), @"Text");
        assert_snapshot!(t("< A : Natural | B >.A"), @"∀(A : Natural) → < A : Natural | B >");
        assert_snapshot!(t("< A : Natural | B >.B"), @"< A : Natural | B >");
        assert_snapshot!(t("[] : List Bool"), @"List Bool");
        assert_snapshot!(t("[] : List (List Natural)"), @"List (List Natural)");
        assert_snapshot!(t("([] : List Natural) # [1]"), @"List Natural");
        assert_snapshot!(t("List/length Bool ([] : List Bool)"), @"Natural");
    }

    #[test]
    fn errors() {
        assert_snapshot!(t("1 + True"), @"error: Operand of `+` must be `Natural`, got `Bool`");
        assert_snapshot!(t("x"), @"error: Unbound variable `x`");
        assert_snapshot!(t("Sort"), @"error: `Sort` has no type");
        assert_snapshot!(t("3 4"), @"error: Not a function: `3` has type `Natural`");
        assert_snapshot!(
            t("(λ(x : Natural) → x) True"),
            @"error: Wrong type of function argument, expected `Natural` but got `Bool`"
        );
        assert_snapshot!(t("1 : Text"), @"error: Expression doesn't match annotation, annotated `Text` but got `Natural`");
        assert_snapshot!(t("if 1 then 2 else 3"), @"error: Invalid predicate for `if`, expected `Bool` but got `Natural`");
        assert_snapshot!(t("if True then 1 else \"a\""), @"error: `if` branches have different types, `Natural` and `Text`");
        assert_snapshot!(t("if True then Natural else Text"), @"error: An `if` branch must be a term, `Natural` is not");
        assert_snapshot!(t("[] : List 1"), @"error: Invalid type for list elements, `1` is not a type");
        assert_snapshot!(t("[] : List Type"), @"error: Invalid type for list elements, `Type` is not a type");
        assert_snapshot!(t("[1, True]"),@"error: List element 1 should have type `Natural` but has type `Bool`");
        assert_snapshot!(t("[1] # [True]"), @"error: Cannot append lists of different types, `List Natural` and `List Bool`");
        assert_snapshot!(t("{ a = 1 }.b"), @"error: Missing field `b`");
        assert_snapshot!(t("\"${1}\""), @"error: Cannot interpolate a value of type `Natural`, only `Text`");
        assert_snapshot!(t("λ(x : 1) → x"), @"error: Invalid function input, `1` is not a type");
        assert_snapshot!(t("./a.dhall"), @"error: Import `./a.dhall` was not resolved");
    }

    #[test]
    fn context() {
        let ctx = Context::new()
            .insert("a", Expr::Const(Const::Type))
            .insert("x", Expr::var("a", 0))
            .insert("a", Expr::Builtin(Builtin::Bool));
        // the outer `a` is now `a@1`
        assert_eq!(Some(&Expr::var("a", 1)), ctx.lookup(&Var { name: "x".into(), index: 0 }));
        assert_eq!(Some(&bool()), ctx.lookup(&Var { name: "a".into(), index: 0 }));
        assert_eq!(None, ctx.lookup(&Var { name: "a".into(), index: 2 }));
    }
}
