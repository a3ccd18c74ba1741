//! built-in constants and functions

use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};

use crate::syntax::{Const, Expr};

// shorthands for writing the types below
fn ty(b: Builtin) -> Expr {
    Expr::Builtin(b)
}
fn arrow(from: Expr, to: Expr) -> Expr {
    Expr::arrow(from, to)
}

macro_rules! make {
    ($($(#[$desc:meta])+ $var:ident($name:literal) :: $mkty:expr),*$(,)?) => {
        /// Built-in constants and functions.
        ///
        /// Their names are reserved: a variable can never be named after one.
        /// Each one has a closed type (already in normal form); reduction of
        /// saturated applications is done by the normalizer.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Builtin { $($(#[$desc])+ $var,)* }

        impl Display for Builtin {
            fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
                write!(f, "{}", match self { $(Self::$var => $name,)* })
            }
        }

        impl Builtin {
            pub const NAMES: &'static [&'static str] = &[$($name,)*];

            pub fn try_from_name(name: &str) -> Option<Self> {
                match name { $($name => Some(Self::$var),)* _ => None }
            }

            pub fn make_type(&self) -> Expr {
                match self { $(Self::$var => ($mkty as fn() -> Expr)(),)* }
            }
        }
    };
}

make! {
    /// the type of booleans
    Bool("Bool")                      :: || Expr::Const(Const::Type),
    /// the type of non-negative integers
    Natural("Natural")                :: || Expr::Const(Const::Type),
    /// the type of signed integers
    Integer("Integer")                :: || Expr::Const(Const::Type),
    /// the type of text
    Text("Text")                      :: || Expr::Const(Const::Type),
    /// the list type constructor
    List("List")                      :: || arrow(Expr::Const(Const::Type), Expr::Const(Const::Type)),

    /// whether a natural is zero
    NaturalIsZero("Natural/isZero")   :: || arrow(ty(Builtin::Natural), ty(Builtin::Bool)),
    /// whether a natural is even
    NaturalEven("Natural/even")       :: || arrow(ty(Builtin::Natural), ty(Builtin::Bool)),
    /// whether a natural is odd
    NaturalOdd("Natural/odd")         :: || arrow(ty(Builtin::Natural), ty(Builtin::Bool)),
    /// convert a natural into the same (non-negative) integer
    NaturalToInteger("Natural/toInteger") :: || arrow(ty(Builtin::Natural), ty(Builtin::Integer)),
    /// render a natural as text
    NaturalShow("Natural/show")       :: || arrow(ty(Builtin::Natural), ty(Builtin::Text)),
    /// render an integer as text, always signed
    IntegerShow("Integer/show")       :: || arrow(ty(Builtin::Integer), ty(Builtin::Text)),
    /// negate an integer
    IntegerNegate("Integer/negate")   :: || arrow(ty(Builtin::Integer), ty(Builtin::Integer)),
    /// length of a list;
    /// 'List/length Natural [1, 2]' is '2'
    ListLength("List/length")         :: || Expr::pi(
        "a",
        Expr::Const(Const::Type),
        arrow(Expr::list_of(Expr::var("a", 0)), ty(Builtin::Natural)),
    ),
}

#[test]
fn test() {
    for name in Builtin::NAMES {
        let b = Builtin::try_from_name(name).unwrap();
        assert_eq!(*name, b.to_string());
    }
    assert_eq!(None, Builtin::try_from_name("Natural/fold"));
    assert_eq!(Expr::Const(Const::Type), Builtin::Text.make_type());
}
