//! import locations, fetching their content and the ancestor stack

use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::builtin::Builtin;
use crate::errors::FetchError;
use crate::syntax::Expr;

// locations {{{
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ImportLocation {
    /// as written (`./a`, `../a`, `/a`, `~/a`) until chained, then absolute
    Local(PathBuf),
    Remote(String),
    Env(String),
    Missing,
}

impl Display for ImportLocation {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            ImportLocation::Local(path) => {
                let starts_ok = path.is_absolute()
                    || matches!(
                        path.components().next(),
                        Some(Component::CurDir | Component::ParentDir)
                    )
                    || path.starts_with("~");
                if starts_ok {
                    write!(f, "{}", path.display())
                } else {
                    write!(f, "./{}", path.display())
                }
            }
            ImportLocation::Remote(url) => write!(f, "{url}"),
            ImportLocation::Env(name) => write!(f, "env:{name}"),
            ImportLocation::Missing => write!(f, "missing"),
        }
    }
}

/// lexically resolve `.` and `..`; leading `..` of a relative path are kept
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            c => out.push(c.as_os_str()),
        }
    }
    out
}

/// the directory of `url` joined with the relative `path`
fn join_url(url: &str, path: &Path) -> String {
    let (origin, rest) = match url.find("://") {
        Some(k) => {
            let after = k + 3;
            match url[after..].find('/') {
                Some(s) => url.split_at(after + s),
                None => (url, ""),
            }
        }
        None => ("", url),
    };
    let mut segments: Vec<String> = rest
        .split('/')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    segments.pop();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                segments.pop();
            }
            Component::Normal(s) => segments.push(s.to_string_lossy().into_owned()),
            _ => {}
        }
    }
    format!("{origin}/{}", segments.join("/"))
}

impl ImportLocation {
    /// where `self`, written inside `importer`, actually points to
    pub fn chain(&self, importer: &ImportLocation) -> ImportLocation {
        match self {
            ImportLocation::Local(path) => {
                if let Ok(rest) = path.strip_prefix("~") {
                    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
                    return ImportLocation::Local(normalize_path(&home.join(rest)));
                }
                if path.is_absolute() {
                    return ImportLocation::Local(normalize_path(path));
                }
                match importer {
                    ImportLocation::Local(base) => {
                        let dir = base.parent().unwrap_or(Path::new(""));
                        ImportLocation::Local(normalize_path(&dir.join(path)))
                    }
                    ImportLocation::Remote(url) => ImportLocation::Remote(join_url(url, path)),
                    ImportLocation::Env(_) | ImportLocation::Missing => {
                        ImportLocation::Local(normalize_path(path))
                    }
                }
            }
            other => other.clone(),
        }
    }

    /// `< Local : Text | Remote : Text | Environment : Text | Missing >`
    pub fn location_type() -> Expr {
        let text = || Some(Expr::Builtin(Builtin::Text));
        Expr::UnionType(
            [
                ("Local".to_string(), text()),
                ("Remote".to_string(), text()),
                ("Environment".to_string(), text()),
                ("Missing".to_string(), None),
            ]
            .into(),
        )
    }

    /// the value of `<this> as Location`, already normal
    pub fn to_expr(&self) -> Expr {
        let alt = |name: &str| Expr::field(ImportLocation::location_type(), name);
        match self {
            ImportLocation::Local(_) => Expr::app(alt("Local"), Expr::text(self.to_string())),
            ImportLocation::Remote(url) => Expr::app(alt("Remote"), Expr::text(url.clone())),
            ImportLocation::Env(name) => Expr::app(alt("Environment"), Expr::text(name.clone())),
            ImportLocation::Missing => alt("Missing"),
        }
    }
}
// }}}

// fetching {{{
/// access to the content behind an import location
pub trait Fetch: Send + Sync {
    fn fetch(&self, location: &ImportLocation) -> Result<Vec<u8>, FetchError>;
}

/// files, environment variables and (with the `remote` feature) http(s)
pub struct StdFetcher {
    #[cfg(feature = "remote")]
    agent: ureq::Agent,
}

/// cap on the size of a remote response
#[cfg(feature = "remote")]
const MAX_REMOTE_BYTES: u64 = 64 << 20;

impl StdFetcher {
    #[cfg_attr(not(feature = "remote"), allow(unused_variables))]
    pub fn new(timeout: Duration) -> Self {
        Self {
            #[cfg(feature = "remote")]
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    #[cfg(feature = "remote")]
    fn fetch_remote(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        use std::io::Read;

        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_REMOTE_BYTES)
            .read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    #[cfg(not(feature = "remote"))]
    fn fetch_remote(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::RemoteDisabled)
    }
}

impl Fetch for StdFetcher {
    fn fetch(&self, location: &ImportLocation) -> Result<Vec<u8>, FetchError> {
        match location {
            ImportLocation::Local(path) => Ok(std::fs::read(path)?),
            ImportLocation::Remote(url) => self.fetch_remote(url),
            ImportLocation::Env(name) => std::env::var(name)
                .map(String::into_bytes)
                .map_err(|_| FetchError::EnvNotSet(name.clone())),
            ImportLocation::Missing => Err(FetchError::Missing),
        }
    }
}

/// Content supplied inline rather than read from anywhere, keyed by the
/// (chained) location it stands for. Counts how often each was fetched.
#[derive(Default)]
pub struct MemoryFetcher {
    files: HashMap<ImportLocation, Vec<u8>>,
    counts: Mutex<HashMap<ImportLocation, usize>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, location: ImportLocation, content: impl Into<Vec<u8>>) -> Self {
        self.insert(location, content);
        self
    }

    pub fn insert(&mut self, location: ImportLocation, content: impl Into<Vec<u8>>) {
        self.files.insert(location, content.into());
    }

    pub fn fetch_count(&self, location: &ImportLocation) -> usize {
        self.counts.lock().get(location).copied().unwrap_or(0)
    }
}

impl Fetch for MemoryFetcher {
    fn fetch(&self, location: &ImportLocation) -> Result<Vec<u8>, FetchError> {
        *self.counts.lock().entry(location.clone()).or_default() += 1;
        match (location, self.files.get(location)) {
            (ImportLocation::Missing, _) => Err(FetchError::Missing),
            (_, Some(content)) => Ok(content.clone()),
            (_, None) => Err(FetchError::NotFound),
        }
    }
}
// }}}

// ancestors {{{
#[derive(Debug)]
struct Frame {
    key: ImportLocation,
    parent: Option<Arc<Frame>>,
    depth: usize,
}

/// The imports being resolved along one path from the root, innermost last.
///
/// Extending it shares the existing frames, so sibling branches each get their
/// own path without copying or seeing one another.
#[derive(Debug, Clone)]
pub struct Ancestors {
    here: ImportLocation,
    top: Option<Arc<Frame>>,
}

impl Ancestors {
    /// an empty path, relative imports are resolved against `here`
    pub fn root(here: ImportLocation) -> Self {
        Self { here, top: None }
    }

    /// what relative imports are chained onto
    pub fn here(&self) -> &ImportLocation {
        &self.here
    }

    pub fn depth(&self) -> usize {
        self.top.as_ref().map_or(0, |f| f.depth)
    }

    pub fn push(&self, key: ImportLocation) -> Ancestors {
        let frame = Frame {
            key: key.clone(),
            parent: self.top.clone(),
            depth: self.depth() + 1,
        };
        Ancestors {
            here: key,
            top: Some(Arc::new(frame)),
        }
    }

    /// innermost first
    pub fn iter(&self) -> impl Iterator<Item = &ImportLocation> + '_ {
        std::iter::successors(self.top.as_deref(), |f| f.parent.as_deref()).map(|f| &f.key)
    }

    pub fn contains(&self, key: &ImportLocation) -> bool {
        self.iter().any(|k| k == key)
    }

    /// outermost first
    pub fn chain(&self) -> Vec<ImportLocation> {
        let mut chain: Vec<_> = self.iter().cloned().collect();
        chain.reverse();
        chain
    }

    /// the cycle closed by importing `key` once more, starting and ending at it
    pub fn cycle_to(&self, key: &ImportLocation) -> Vec<ImportLocation> {
        let chain = self.chain();
        let start = chain.iter().position(|k| k == key).unwrap_or(chain.len());
        let mut cycle = chain[start..].to_vec();
        cycle.push(key.clone());
        cycle
    }
}
// }}}
