//! expression tree and binder-aware rewriting

use std::collections::BTreeMap;
use std::convert::Infallible;

use serde::{Deserialize, Serialize};

use crate::builtin::Builtin;
use crate::hash::Sha256Hash;
use crate::import::ImportLocation;

pub type Label = String;

/// Bound on the depth of every tree that gets walked, each `let` binding
/// counting as one level.
pub const MAX_DEPTH: usize = 1024;

/// universes, `Type : Kind : Sort`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Const {
    Type,
    Kind,
    Sort,
}

/// a variable is a name and how many binders of that same name to skip (`x@1`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Var {
    pub name: Label,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub name: Label,
    pub annot: Option<Expr>,
    pub value: Expr,
}

/// `"p0${e0}p1${e1}suffix"`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Chunks {
    pub chunks: Vec<(String, Expr)>,
    pub suffix: String,
}

/// binary operators, listed from loosest to tightest binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    BoolOr,
    NaturalPlus,
    TextAppend,
    ListAppend,
    BoolAnd,
    NaturalTimes,
    BoolEq,
    BoolNe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportMode {
    /// parse and resolve the content as a program
    Code,
    /// the content is an opaque text literal
    RawText,
    /// the location itself, never fetched
    Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Import {
    pub location: ImportLocation,
    pub mode: ImportMode,
    pub hash: Option<Sha256Hash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    Const(Const),
    Var(Var),
    Lambda(Label, Box<Expr>, Box<Expr>),
    Pi(Label, Box<Expr>, Box<Expr>),
    App(Box<Expr>, Box<Expr>),
    Let(Vec<Binding>, Box<Expr>),
    Annot(Box<Expr>, Box<Expr>),
    Builtin(Builtin),
    BoolLit(bool),
    BoolIf(Box<Expr>, Box<Expr>, Box<Expr>),
    NaturalLit(u64),
    IntegerLit(i64),
    TextLit(Chunks),
    Op(Op, Box<Expr>, Box<Expr>),
    /// holds the element type, not the list type
    EmptyList(Box<Expr>),
    NonEmptyList(Vec<Expr>),
    RecordType(BTreeMap<Label, Expr>),
    RecordLit(BTreeMap<Label, Expr>),
    Field(Box<Expr>, Label),
    UnionType(BTreeMap<Label, Option<Expr>>),
    Import(Import),
}

pub(crate) fn infallible<T>(r: Result<T, Infallible>) -> T {
    match r {
        Ok(t) => t,
        Err(never) => match never {},
    }
}

// constructors {{{
impl Expr {
    pub fn var(name: &str, index: usize) -> Expr {
        Expr::Var(Var {
            name: name.into(),
            index,
        })
    }

    pub fn lambda(name: &str, ty: Expr, body: Expr) -> Expr {
        Expr::Lambda(name.into(), Box::new(ty), Box::new(body))
    }

    pub fn pi(name: &str, ty: Expr, body: Expr) -> Expr {
        Expr::Pi(name.into(), Box::new(ty), Box::new(body))
    }

    /// non-dependent function type
    pub fn arrow(from: Expr, to: Expr) -> Expr {
        Expr::pi("_", from, to)
    }

    pub fn app(func: Expr, arg: Expr) -> Expr {
        Expr::App(Box::new(func), Box::new(arg))
    }

    pub fn op(op: Op, l: Expr, r: Expr) -> Expr {
        Expr::Op(op, Box::new(l), Box::new(r))
    }

    pub fn field(record: Expr, name: &str) -> Expr {
        Expr::Field(Box::new(record), name.into())
    }

    pub fn text(text: impl Into<String>) -> Expr {
        Expr::TextLit(Chunks {
            chunks: Vec::new(),
            suffix: text.into(),
        })
    }

    pub fn list_of(item: Expr) -> Expr {
        Expr::app(Expr::Builtin(Builtin::List), item)
    }

    /// `let` over the given bindings, or just the body when there are none
    pub fn wrap_let(bindings: &[Binding], body: &Expr) -> Expr {
        if bindings.is_empty() {
            body.clone()
        } else {
            Expr::Let(bindings.to_vec(), Box::new(body.clone()))
        }
    }
}
// }}}

// traversal {{{
impl Expr {
    /// rebuild this node with `f` applied to each direct child;
    /// `f` also receives the names bound between this node and that child, outermost first
    pub fn traverse<E>(
        &self,
        mut f: impl FnMut(&Expr, &[Label]) -> Result<Expr, E>,
    ) -> Result<Expr, E> {
        Ok(match self {
            Expr::Const(_)
            | Expr::Var(_)
            | Expr::Builtin(_)
            | Expr::BoolLit(_)
            | Expr::NaturalLit(_)
            | Expr::IntegerLit(_)
            | Expr::Import(_) => self.clone(),

            Expr::Lambda(x, a, b) => Expr::Lambda(
                x.clone(),
                Box::new(f(a, &[])?),
                Box::new(f(b, std::slice::from_ref(x))?),
            ),
            Expr::Pi(x, a, b) => Expr::Pi(
                x.clone(),
                Box::new(f(a, &[])?),
                Box::new(f(b, std::slice::from_ref(x))?),
            ),
            Expr::App(g, a) => Expr::App(Box::new(f(g, &[])?), Box::new(f(a, &[])?)),

            Expr::Let(bindings, body) => {
                let mut bound = Vec::with_capacity(bindings.len());
                let mut out = Vec::with_capacity(bindings.len());
                for binding in bindings {
                    let annot = match &binding.annot {
                        Some(t) => Some(f(t, &bound)?),
                        None => None,
                    };
                    let value = f(&binding.value, &bound)?;
                    out.push(Binding {
                        name: binding.name.clone(),
                        annot,
                        value,
                    });
                    bound.push(binding.name.clone());
                }
                Expr::Let(out, Box::new(f(body, &bound)?))
            }

            Expr::Annot(e, t) => Expr::Annot(Box::new(f(e, &[])?), Box::new(f(t, &[])?)),
            Expr::BoolIf(c, t, e) => Expr::BoolIf(
                Box::new(f(c, &[])?),
                Box::new(f(t, &[])?),
                Box::new(f(e, &[])?),
            ),
            Expr::TextLit(lit) => {
                let mut chunks = Vec::with_capacity(lit.chunks.len());
                for (prefix, e) in &lit.chunks {
                    chunks.push((prefix.clone(), f(e, &[])?));
                }
                Expr::TextLit(Chunks {
                    chunks,
                    suffix: lit.suffix.clone(),
                })
            }
            Expr::Op(op, l, r) => Expr::Op(*op, Box::new(f(l, &[])?), Box::new(f(r, &[])?)),
            Expr::EmptyList(t) => Expr::EmptyList(Box::new(f(t, &[])?)),
            Expr::NonEmptyList(items) => {
                let mut out = Vec::with_capacity(items.len());
                for it in items {
                    out.push(f(it, &[])?);
                }
                Expr::NonEmptyList(out)
            }
            Expr::RecordType(fields) => {
                let mut out = BTreeMap::new();
                for (k, v) in fields {
                    out.insert(k.clone(), f(v, &[])?);
                }
                Expr::RecordType(out)
            }
            Expr::RecordLit(fields) => {
                let mut out = BTreeMap::new();
                for (k, v) in fields {
                    out.insert(k.clone(), f(v, &[])?);
                }
                Expr::RecordLit(out)
            }
            Expr::Field(r, k) => Expr::Field(Box::new(f(r, &[])?), k.clone()),
            Expr::UnionType(alts) => {
                let mut out = BTreeMap::new();
                for (k, v) in alts {
                    let v = match v {
                        Some(t) => Some(f(t, &[])?),
                        None => None,
                    };
                    out.insert(k.clone(), v);
                }
                Expr::UnionType(out)
            }
        })
    }

    /// whether `pred` holds for any direct child (the rebuilt node is discarded)
    fn any_child(&self, mut pred: impl FnMut(&Expr, &[Label]) -> bool) -> bool {
        self.traverse(|child, bound| {
            if pred(child, bound) {
                Err(())
            } else {
                Ok(Expr::Const(Const::Type))
            }
        })
        .is_err()
    }

    /// `↑(delta, name, min)`: adjust the index of every free `name@i` where `i >= min`
    pub fn shift(&self, delta: isize, name: &str, min: usize) -> Expr {
        match self {
            Expr::Var(v) if v.name == name && v.index >= min => Expr::Var(Var {
                name: v.name.clone(),
                index: v.index.saturating_add_signed(delta),
            }),
            _ => infallible(self.traverse::<Infallible>(|child, bound| {
                let min = min + bound.iter().filter(|b| *b == name).count();
                Ok(child.shift(delta, name, min))
            })),
        }
    }

    /// `e[name@index := value]`
    pub fn subst(&self, name: &str, index: usize, value: &Expr) -> Expr {
        match self {
            Expr::Var(v) if v.name == name && v.index == index => value.clone(),
            _ => infallible(self.traverse::<Infallible>(|child, bound| {
                if bound.is_empty() {
                    return Ok(child.subst(name, index, value));
                }
                let mut index = index;
                let mut value = value.clone();
                for b in bound {
                    value = value.shift(1, b, 0);
                    if b == name {
                        index += 1;
                    }
                }
                Ok(child.subst(name, index, &value))
            })),
        }
    }

    /// instantiate the body of a binder named `name` with `arg`
    pub fn instantiate(&self, name: &str, arg: &Expr) -> Expr {
        self.subst(name, 0, &arg.shift(1, name, 0)).shift(-1, name, 0)
    }

    /// whether `name@index` occurs free
    pub fn mentions(&self, name: &str, index: usize) -> bool {
        match self {
            Expr::Var(v) => v.name == name && v.index == index,
            _ => self.any_child(|child, bound| {
                let index = index + bound.iter().filter(|b| *b == name).count();
                child.mentions(name, index)
            }),
        }
    }

    /// whether the tree is more than `limit` levels deep, looking no further down
    pub fn deeper_than(&self, limit: usize) -> bool {
        let levels = match self {
            Expr::Let(bindings, _) => bindings.len().max(1),
            _ => 1,
        };
        match limit.checked_sub(levels) {
            Some(rest) => self.any_child(|child, _| child.deeper_than(rest)),
            None => true,
        }
    }

    /// number of import placeholders left in the tree
    pub fn count_imports(&self) -> usize {
        match self {
            Expr::Import(_) => 1,
            _ => {
                let mut n = 0;
                self.any_child(|child, _| {
                    n += child.count_imports();
                    false
                });
                n
            }
        }
    }
}
// }}}
