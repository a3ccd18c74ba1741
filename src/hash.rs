//! semantic hashes, used to pin imports

use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::binary;
use crate::errors::{EncodingError, ParseHashError};
use crate::eval::{quote_alpha_normal, Value};
use crate::stack::on_large_stack;
use crate::syntax::Expr;

/// a sha256 digest, written `sha256:<64 hex digits>`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sha256Hash([u8; 32]);

impl Sha256Hash {
    pub fn of(bytes: &[u8]) -> Self {
        Sha256Hash(Sha256::digest(bytes).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; 32]> for Sha256Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Sha256Hash(bytes)
    }
}

impl Display for Sha256Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "sha256:{}", self.to_hex())
    }
}

impl Debug for Sha256Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(self, f)
    }
}

/// accepts the digest with or without its `sha256:` prefix
impl FromStr for Sha256Hash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("sha256:").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|_| ParseHashError(s.into()))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| ParseHashError(s.into()))?;
        Ok(Sha256Hash(bytes))
    }
}

/// The canonical form of a value: its alpha-normal expression, the
/// binary encoding of it and the digest of that encoding.
#[derive(Debug, Clone)]
pub struct Canonical {
    pub expr: Expr,
    pub bytes: Vec<u8>,
    pub hash: Sha256Hash,
}

impl Canonical {
    pub fn of(value: &Value) -> Result<Canonical, EncodingError> {
        on_large_stack(|| {
            let expr = quote_alpha_normal(value);
            let bytes = binary::encode(&expr)?;
            let hash = Sha256Hash::of(&bytes);
            Ok(Canonical { expr, bytes, hash })
        })
    }
}

/// `sha256(encode(alpha_normalize(value)))`, equal for judgmentally equal values
pub fn semantic_hash(value: &Value) -> Result<Sha256Hash, EncodingError> {
    Canonical::of(value).map(|c| c.hash)
}

#[test]
fn test() {
    let zero = Sha256Hash::of(b"");
    assert_eq!(
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        zero.to_string()
    );
    assert_eq!(Ok(zero), zero.to_string().parse());
    assert_eq!(Ok(zero), zero.to_hex().parse());
    assert!("sha256:abcd".parse::<Sha256Hash>().is_err());
    assert!("sha256:zz".parse::<Sha256Hash>().is_err());
}
