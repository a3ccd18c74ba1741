//! binary encoding of expressions
//!
//! Used both to compute semantic hashes and as the payload of the persisted
//! cache entries. The encoding is deterministic: maps are ordered and there is
//! no source position information in the tree.

use crate::errors::EncodingError;
use crate::syntax::Expr;

pub fn encode(expr: &Expr) -> Result<Vec<u8>, EncodingError> {
    postcard::to_allocvec(expr).map_err(EncodingError::Encode)
}

pub fn decode(bytes: &[u8]) -> Result<Expr, EncodingError> {
    postcard::from_bytes(bytes).map_err(EncodingError::Decode)
}

#[test]
fn test() {
    use crate::syntax::{Const, Op};

    let e = Expr::lambda(
        "x",
        Expr::Const(Const::Type),
        Expr::op(Op::NaturalPlus, Expr::var("x", 0), Expr::NaturalLit(1)),
    );
    let bytes = encode(&e).unwrap();
    assert_eq!(bytes, encode(&e.clone()).unwrap());
    assert_eq!(e, decode(&bytes).unwrap());

    assert!(decode(&bytes[..bytes.len() - 1]).is_err());
}
