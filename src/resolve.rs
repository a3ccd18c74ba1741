//! Import resolution.
//!
//! Every import placeholder of a tree is replaced by what it denotes: the
//! normal form of the (recursively resolved, independently well-typed) program
//! at its location, the raw text there, or the location itself. Pinned imports
//! must match their hash, and are then served from the cache by that hash.
//!
//! Splicing values into their importers makes trees deeper than any one file,
//! so every resolved tree and every imported value is held to
//! [`MAX_DEPTH`] before it gets checked or normalized.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::cache::Cache;
use crate::check::type_of;
use crate::errors::{Error, ErrorKind, FetchError};
use crate::eval::{eval, Value};
use crate::hash::{Canonical, Sha256Hash};
use crate::import::{Ancestors, Fetch, ImportLocation, StdFetcher};
use crate::parse::parse;
use crate::settings::Settings;
use crate::stack::on_large_stack;
use crate::syntax::{Expr, Import, ImportMode, MAX_DEPTH};

/// a fully resolved, type-checked and normalized program
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded {
    pub value: Value,
    pub ty: Value,
}

/// A resolution session: settings, a way to fetch content and the cache
/// every resolution it performs goes through.
pub struct Resolver<F: Fetch = StdFetcher> {
    settings: Settings,
    fetcher: F,
    cache: Arc<Cache>,
}

impl Resolver<StdFetcher> {
    pub fn new(settings: Settings) -> Self {
        let fetcher = StdFetcher::new(settings.remote_timeout);
        Resolver::with_fetcher(settings, fetcher)
    }
}

impl<F: Fetch> Resolver<F> {
    /// with a cache of its own, persisted if `settings.cache_dir` is set
    pub fn with_fetcher(settings: Settings, fetcher: F) -> Self {
        let cache = match &settings.cache_dir {
            Some(dir) => Cache::persistent(dir),
            None => Cache::new(),
        };
        Self {
            settings,
            fetcher,
            cache: Arc::new(cache),
        }
    }

    /// share `cache` with other sessions instead
    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// where a top-level program is considered to be
    fn here(&self) -> ImportLocation {
        ImportLocation::Local(self.settings.root.join("<input>"))
    }

    // entry points {{{
    /// Resolve the imports of a top-level program. The result has none left.
    pub fn resolve(&self, expr: &Expr) -> Result<Expr, Error> {
        self.resolve_in(expr, &Ancestors::root(self.here()))
    }

    /// Resolve the imports of `expr` as if it was found at the end of
    /// `ancestors`. Fails if the resolved tree is deeper than [`MAX_DEPTH`].
    pub fn resolve_in(&self, expr: &Expr, ancestors: &Ancestors) -> Result<Expr, Error> {
        on_large_stack(|| {
            let expr = self.resolve_with(expr, ancestors)?;
            within_depth(&expr, ancestors)?;
            Ok(expr)
        })
    }

    /// parse, resolve, type-check and normalize a top-level program
    pub fn load_str(&self, name: &str, source: &str) -> Result<Loaded, Error> {
        on_large_stack(|| {
            let expr = parse(name, source.as_bytes())?;
            let expr = self.resolve(&expr)?;
            let ty = type_of(&expr)?;
            Ok(Loaded {
                value: eval(&expr),
                ty,
            })
        })
    }

    /// same as [`Resolver::load_str`] with the content of a file, relative to
    /// the root; its own relative imports are relative to it
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Loaded, Error> {
        let key = ImportLocation::Local(path.as_ref().to_path_buf()).chain(&self.here());
        debug!(location = %key, "loading file");

        let bytes = self.fetcher.fetch(&key).map_err(|error| {
            Error::new(
                ErrorKind::ImportFetch {
                    location: key.clone(),
                    error,
                },
                Vec::new(),
            )
        })?;
        let ancestors = Ancestors::root(key.clone()).push(key.clone());
        on_large_stack(|| {
            let expr = parse(&key.to_string(), &bytes).map_err(|e| Error::new(e, ancestors.chain()))?;
            let expr = self.resolve_in(&expr, &ancestors)?;
            let ty = type_of(&expr).map_err(|e| Error::new(e, ancestors.chain()))?;
            Ok(Loaded {
                value: eval(&expr),
                ty,
            })
        })
    }
    // }}}

    /// Rebuild the tree of one file with its imports replaced; other files
    /// are only entered through [`Resolver::fetch`].
    fn resolve_with(&self, expr: &Expr, ancestors: &Ancestors) -> Result<Expr, Error> {
        match expr {
            Expr::Import(import) => self.resolve_import(import, ancestors),
            _ => expr.traverse(|child, _| self.resolve_with(child, ancestors)),
        }
    }

    fn resolve_import(&self, import: &Import, ancestors: &Ancestors) -> Result<Expr, Error> {
        let key = import.location.chain(ancestors.here());
        trace!(location = %key, mode = ?import.mode, "resolving import");

        if ancestors.contains(&key) {
            return Err(Error::new(
                ErrorKind::ImportCycle {
                    cycle: ancestors.cycle_to(&key),
                },
                ancestors.chain(),
            ));
        }
        if self.settings.max_import_depth <= ancestors.depth() {
            return Err(Error::new(
                ErrorKind::ImportDepth {
                    limit: self.settings.max_import_depth,
                },
                ancestors.chain(),
            ));
        }
        // remote content only reaches other remote content
        if let ImportLocation::Remote(_) = ancestors.here() {
            let reachable = matches!(key, ImportLocation::Remote(_) | ImportLocation::Missing);
            if !reachable && ImportMode::Location != import.mode {
                return Err(Error::new(
                    ErrorKind::ImportNotAllowed {
                        importer: ancestors.here().clone(),
                        location: key,
                    },
                    ancestors.chain(),
                ));
            }
        }

        if let Some(pin) = &import.hash {
            if let Some(value) = self.cache.get_hash(pin) {
                debug!(location = %key, hash = %pin, "served from cache");
                return Ok(value.into_expr());
            }
        }

        let value = match import.mode {
            ImportMode::Location => Value::from_normal(key.to_expr()),
            mode => match self.cache.get_location(&key, mode) {
                Some(value) => {
                    trace!(location = %key, "already resolved in this session");
                    value
                }
                None => {
                    let value = self.fetch(&key, mode, ancestors)?;
                    self.cache.insert_location(key.clone(), mode, value)
                }
            },
        };

        match &import.hash {
            Some(pin) => self.verify(&key, *pin, &value, ancestors),
            None => Ok(value.into_expr()),
        }
    }

    /// the content at `key`, as a value
    fn fetch(&self, key: &ImportLocation, mode: ImportMode, ancestors: &Ancestors) -> Result<Value, Error> {
        let fetch_error = |error: FetchError| {
            Error::new(
                ErrorKind::ImportFetch {
                    location: key.clone(),
                    error,
                },
                ancestors.chain(),
            )
        };

        debug!(location = %key, "fetching");
        let bytes = self.fetcher.fetch(key).map_err(fetch_error)?;

        match mode {
            ImportMode::RawText => String::from_utf8(bytes)
                .map(|text| Value::from_normal(Expr::text(text)))
                .map_err(|_| fetch_error(FetchError::NotUtf8)),
            ImportMode::Location => Ok(Value::from_normal(key.to_expr())),
            ImportMode::Code => {
                let inner = ancestors.push(key.clone());
                let expr = parse(&key.to_string(), &bytes).map_err(|e| Error::new(e, inner.chain()))?;
                let expr = self.resolve_in(&expr, &inner)?;
                // imported programs must stand on their own
                type_of(&expr).map_err(|e| Error::new(e, inner.chain()))?;
                let value = eval(&expr);
                within_depth(value.as_expr(), &inner)?;
                Ok(value)
            }
        }
    }

    fn verify(
        &self,
        key: &ImportLocation,
        pin: Sha256Hash,
        value: &Value,
        ancestors: &Ancestors,
    ) -> Result<Expr, Error> {
        let canonical = Canonical::of(value).map_err(|e| Error::new(e, ancestors.chain()))?;
        if pin != canonical.hash {
            return Err(Error::new(
                ErrorKind::ImportIntegrity {
                    location: key.clone(),
                    expected: pin,
                    actual: canonical.hash,
                },
                ancestors.chain(),
            ));
        }
        debug!(location = %key, hash = %pin, "integrity verified");
        Ok(self.cache.insert_hash(canonical).into_expr())
    }
}

fn within_depth(expr: &Expr, ancestors: &Ancestors) -> Result<(), Error> {
    if expr.deeper_than(MAX_DEPTH) {
        return Err(Error::new(
            ErrorKind::ResolvedDepth { limit: MAX_DEPTH },
            ancestors.chain(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::MemoryFetcher;

    fn local(p: &str) -> ImportLocation {
        ImportLocation::Local(p.into())
    }

    fn resolver(fetcher: MemoryFetcher) -> Resolver<MemoryFetcher> {
        Resolver::with_fetcher(Settings::default().with_root("/r"), fetcher)
    }

    fn resolve(r: &Resolver<MemoryFetcher>, source: &str) -> Result<String, String> {
        let expr = parse("t", source.as_bytes()).map_err(|e| e.to_string())?;
        r.resolve(&expr).map(|e| e.to_string()).map_err(|e| e.to_string())
    }

    #[test]
    fn structure() {
        let r = resolver(
            MemoryFetcher::new()
                .with(local("/r/a.dhall"), "let x = 1 in x + 1")
                .with(local("/r/sub/b.dhall"), "./c.dhall")
                .with(local("/r/sub/c.dhall"), "True"),
        );
        assert_eq!(Ok("λ(y : Natural) → y + 2".into()), resolve(&r, "λ(y : Natural) → y + ./a.dhall"));
        assert_eq!(Ok("{ a = 2, b = True }".into()), resolve(&r, "{ a = ./a.dhall, b = ./sub/b.dhall }"));
        assert_eq!(1, r.fetcher().fetch_count(&local("/r/a.dhall")));
        assert_eq!(1, r.fetcher().fetch_count(&local("/r/sub/c.dhall")));
    }

    #[test]
    fn modes() {
        let r = resolver(MemoryFetcher::new().with(local("/r/t"), "not ${code}\n"));
        assert_eq!(Ok(r#""not \${code}\n""#.into()), resolve(&r, "./t as Text"));
        assert_eq!(
            Ok(r#"< Environment : Text | Local : Text | Missing | Remote : Text >.Local "/r/nowhere""#.into()),
            resolve(&r, "./nowhere as Location")
        );
        assert_eq!(0, r.fetcher().fetch_count(&local("/r/nowhere")));
        assert_eq!(
            Err("Cannot fetch missing: `missing` never resolves".into()),
            resolve(&r, "missing")
        );
    }

    #[test]
    fn errors_carry_the_chain() {
        let r = resolver(
            MemoryFetcher::new()
                .with(local("/r/a"), "./b")
                .with(local("/r/b"), "1 +"),
        );
        let expr = parse("t", b"./a").unwrap();
        let err = r.resolve(&expr).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Syntax(_)));
        assert_eq!(&[local("/r/a"), local("/r/b")], err.chain());

        let r = resolver(MemoryFetcher::new().with(local("/r/a"), "./b"));
        let err = r.resolve(&expr).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::ImportFetch { location, error: FetchError::NotFound } if *location == local("/r/b")
        ));
        assert_eq!(&[local("/r/a")], err.chain());
    }

    #[test]
    fn depth() {
        let mut fetcher = MemoryFetcher::new();
        for k in 0..5 {
            fetcher.insert(local(&format!("/r/{k}")), format!("./{}", k + 1));
        }
        fetcher.insert(local("/r/5"), "0");
        let r = Resolver::with_fetcher(Settings::default().with_root("/r").with_max_import_depth(6), fetcher);
        assert_eq!(Ok("0".into()), resolve(&r, "./0"));

        let r = Resolver::with_fetcher(
            Settings::default().with_root("/r").with_max_import_depth(3),
            MemoryFetcher::new()
                .with(local("/r/0"), "./1")
                .with(local("/r/1"), "./2")
                .with(local("/r/2"), "./3")
                .with(local("/r/3"), "0"),
        );
        let err = r.resolve(&parse("t", b"./0").unwrap()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ImportDepth { limit: 3 }));
        assert_eq!(3, err.chain().len());
    }

    #[test]
    fn remote_content_stays_remote() {
        let remote = |url: &str| ImportLocation::Remote(url.into());
        let r = resolver(
            MemoryFetcher::new()
                .with(remote("https://example.org/cfg/a.dhall"), "./b.dhall + 1")
                .with(remote("https://example.org/cfg/b.dhall"), "1")
                .with(remote("https://example.org/leak.dhall"), "/etc/passwd as Text")
                .with(remote("https://example.org/env.dhall"), "{ home = env:HOME as Text }")
                .with(remote("https://example.org/where.dhall"), "/etc/passwd as Location")
                .with(local("/etc/passwd"), "root")
                .with(local("/r/c.dhall"), "https://example.org/cfg/a.dhall + 0"),
        );
        assert_eq!(Ok("2".into()), resolve(&r, "https://example.org/cfg/a.dhall"));
        assert_eq!(Ok("2".into()), resolve(&r, "./c.dhall"));

        assert_eq!(
            Err("Remote https://example.org/leak.dhall cannot import /etc/passwd (in https://example.org/leak.dhall)".into()),
            resolve(&r, "https://example.org/leak.dhall")
        );
        assert_eq!(0, r.fetcher().fetch_count(&local("/etc/passwd")));
        assert_eq!(
            Err("Remote https://example.org/env.dhall cannot import env:HOME (in https://example.org/env.dhall)".into()),
            resolve(&r, "https://example.org/env.dhall")
        );

        // naming a location reads nothing
        assert_eq!(
            Ok(r#"< Environment : Text | Local : Text | Missing | Remote : Text >.Local "/etc/passwd""#.into()),
            resolve(&r, "https://example.org/where.dhall")
        );
    }
}
