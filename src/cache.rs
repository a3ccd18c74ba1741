//! Resolution cache.
//!
//! Verified results are kept in memory by semantic hash and by (location,
//! mode). Entries are never replaced once inserted. Optionally, hashed entries
//! are also persisted to a directory so later sessions can skip fetching.
//!
//! # File Format
//!
//! One file per entry, named `1220<hex digest>`:
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ magic: [u8; 4]        "DHSL"             │
//! │ version: u32 (le)     schema version     │
//! ├──────────────────────────────────────────┤
//! │ payload: canonical encoding of the value │
//! └──────────────────────────────────────────┘
//! ```
//!
//! The digest of the payload must be the one in the file name, it is checked
//! again on every read.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::binary;
use crate::errors::EncodingError;
use crate::eval::Value;
use crate::hash::{Canonical, Sha256Hash};
use crate::import::ImportLocation;
use crate::syntax::{Expr, ImportMode};

/// Current schema version. Bump on any breaking change to the encoding.
pub const SCHEMA_VERSION: u32 = 1;

/// Magic bytes identifying a cache entry.
const MAGIC: [u8; 4] = *b"DHSL";

const HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid magic bytes (expected DHSL)")]
    InvalidMagic,
    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("truncated header")]
    TruncatedHeader,
    #[error("content hash mismatch: expected {expected}, found {found}")]
    HashMismatch {
        expected: Sha256Hash,
        found: Sha256Hash,
    },
    #[error(transparent)]
    Decode(#[from] EncodingError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// entry format {{{
pub fn serialize_entry(canonical: &Canonical) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + canonical.bytes.len());
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    bytes.extend_from_slice(&canonical.bytes);
    bytes
}

pub fn deserialize_entry(bytes: &[u8], expected: &Sha256Hash) -> Result<Expr, CacheError> {
    if bytes.len() < HEADER_LEN {
        return Err(CacheError::TruncatedHeader);
    }
    if bytes[0..4] != MAGIC {
        return Err(CacheError::InvalidMagic);
    }
    let mut version = [0; 4];
    version.copy_from_slice(&bytes[4..HEADER_LEN]);
    let found = u32::from_le_bytes(version);
    if SCHEMA_VERSION != found {
        return Err(CacheError::VersionMismatch {
            expected: SCHEMA_VERSION,
            found,
        });
    }

    let payload = &bytes[HEADER_LEN..];
    let found = Sha256Hash::of(payload);
    if *expected != found {
        return Err(CacheError::HashMismatch {
            expected: *expected,
            found,
        });
    }
    Ok(binary::decode(payload)?)
}
// }}}

// disk store {{{
#[derive(Debug)]
struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    fn path(&self, hash: &Sha256Hash) -> PathBuf {
        self.dir.join(format!("1220{}", hash.to_hex()))
    }

    fn read(&self, hash: &Sha256Hash) -> Result<Option<Expr>, CacheError> {
        let bytes = match fs::read(self.path(hash)) {
            Ok(bytes) => bytes,
            Err(e) if io::ErrorKind::NotFound == e.kind() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        deserialize_entry(&bytes, hash).map(Some)
    }

    fn write(&self, canonical: &Canonical) -> Result<(), CacheError> {
        let path = self.path(&canonical.hash);
        if path.exists() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)?;
        // readers must never see a partial entry
        let partial = path.with_extension(format!("{}.partial", std::process::id()));
        fs::write(&partial, serialize_entry(canonical))?;
        fs::rename(&partial, &path)?;
        Ok(())
    }
}
// }}}

/// Verified resolutions, shared by every resolver given the same instance.
#[derive(Debug, Default)]
pub struct Cache {
    by_hash: RwLock<HashMap<Sha256Hash, Value>>,
    by_location: RwLock<HashMap<(ImportLocation, ImportMode), Value>>,
    disk: Option<DiskStore>,
}

impl Cache {
    /// in memory only
    pub fn new() -> Self {
        Self::default()
    }

    /// also persisting hashed entries under `dir`, created on first write
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self {
            disk: Some(DiskStore { dir: dir.into() }),
            ..Self::default()
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.disk.as_ref().map(|d| d.dir.as_path())
    }

    /// The entry verified under `hash`, from memory or else from disk.
    /// An unusable persisted entry is skipped as if absent.
    pub fn get_hash(&self, hash: &Sha256Hash) -> Option<Value> {
        if let Some(value) = self.by_hash.read().get(hash) {
            trace!(hash = %hash, "memory cache hit");
            return Some(value.clone());
        }

        let disk = self.disk.as_ref()?;
        match disk.read(hash) {
            Ok(Some(expr)) => {
                debug!(hash = %hash, "persisted cache hit");
                let value = Value::from_normal(expr);
                Some(self.by_hash.write().entry(*hash).or_insert(value).clone())
            }
            Ok(None) => None,
            Err(e) => {
                warn!(hash = %hash, error = %e, "ignoring unusable cache entry");
                None
            }
        }
    }

    /// Keep `canonical` under its hash unless something already is, and
    /// return what is kept. Failing to persist it is only logged.
    pub fn insert_hash(&self, canonical: Canonical) -> Value {
        let value = {
            let mut by_hash = self.by_hash.write();
            if let Some(existing) = by_hash.get(&canonical.hash) {
                return existing.clone();
            }
            let value = Value::from_normal(canonical.expr.clone());
            by_hash.insert(canonical.hash, value.clone());
            value
        };

        if let Some(disk) = &self.disk {
            match disk.write(&canonical) {
                Ok(()) => debug!(hash = %canonical.hash, "persisted cache entry"),
                Err(e) => warn!(hash = %canonical.hash, error = %e, "could not persist cache entry"),
            }
        }
        value
    }

    pub fn get_location(&self, location: &ImportLocation, mode: ImportMode) -> Option<Value> {
        self.by_location
            .read()
            .get(&(location.clone(), mode))
            .cloned()
    }

    /// insert if absent, returns what is kept
    pub fn insert_location(&self, location: ImportLocation, mode: ImportMode, value: Value) -> Value {
        self.by_location
            .write()
            .entry((location, mode))
            .or_insert(value)
            .clone()
    }

    /// number of entries kept in memory by hash
    pub fn len(&self) -> usize {
        self.by_hash.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.read().is_empty() && self.by_location.read().is_empty()
    }

    /// forget everything held in memory; persisted entries stay
    pub fn clear(&self) {
        self.by_hash.write().clear();
        self.by_location.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::eval;
    use crate::syntax::Op;

    fn canonical(n: u64) -> Canonical {
        let value = eval(&Expr::op(Op::NaturalPlus, Expr::NaturalLit(n), Expr::NaturalLit(1)));
        Canonical::of(&value).unwrap()
    }

    #[test]
    fn memory() {
        let cache = Cache::new();
        let c = canonical(1);
        let hash = c.hash;
        assert!(cache.get_hash(&hash).is_none());
        assert_eq!(&Expr::NaturalLit(2), cache.insert_hash(c).as_expr());
        assert_eq!(Some(&Expr::NaturalLit(2)), cache.get_hash(&hash).as_ref().map(Value::as_expr));
        assert_eq!(1, cache.len());

        let here = ImportLocation::Local("/a".into());
        let first = eval(&Expr::NaturalLit(1));
        let second = eval(&Expr::NaturalLit(2));
        assert_eq!(first, cache.insert_location(here.clone(), ImportMode::Code, first.clone()));
        // never replaced
        assert_eq!(first, cache.insert_location(here.clone(), ImportMode::Code, second));
        assert_eq!(Some(first), cache.get_location(&here, ImportMode::Code));
        assert_eq!(None, cache.get_location(&here, ImportMode::RawText));

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get_hash(&hash).is_none());
    }

    #[test]
    fn persisted() {
        let dir = tempfile::tempdir().unwrap();
        let c = canonical(41);
        let hash = c.hash;

        Cache::persistent(dir.path()).insert_hash(c);
        let file = dir.path().join(format!("1220{}", hash.to_hex()));
        assert!(file.is_file());

        let fresh = Cache::persistent(dir.path());
        assert_eq!(Some(&Expr::NaturalLit(42)), fresh.get_hash(&hash).as_ref().map(Value::as_expr));
        assert_eq!(1, fresh.len());

        // tampered entries are not trusted
        let mut bytes = fs::read(&file).unwrap();
        *bytes.last_mut().unwrap() ^= 1;
        fs::write(&file, &bytes).unwrap();
        assert!(Cache::persistent(dir.path()).get_hash(&hash).is_none());

        fs::write(&file, b"garbage").unwrap();
        assert!(Cache::persistent(dir.path()).get_hash(&hash).is_none());
    }

    #[test]
    fn entry_format() {
        let c = canonical(0);
        let bytes = serialize_entry(&c);
        assert_eq!(b"DHSL", &bytes[..4]);
        assert_eq!(Expr::NaturalLit(1), deserialize_entry(&bytes, &c.hash).unwrap());

        assert!(matches!(
            deserialize_entry(&bytes[..5], &c.hash),
            Err(CacheError::TruncatedHeader)
        ));
        assert!(matches!(
            deserialize_entry(&bytes, &Sha256Hash::of(b"")),
            Err(CacheError::HashMismatch { .. })
        ));

        let mut newer = bytes.clone();
        newer[4..8].copy_from_slice(&(SCHEMA_VERSION + 1).to_le_bytes());
        assert!(matches!(
            deserialize_entry(&newer, &c.hash),
            Err(CacheError::VersionMismatch { found, .. }) if found == SCHEMA_VERSION + 1
        ));

        let mut other = bytes;
        other[0] = b'X';
        assert!(matches!(deserialize_entry(&other, &c.hash), Err(CacheError::InvalidMagic)));
    }
}
