//! resolution settings, with defaults and environment overrides

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

pub const CACHE_DIR_VAR: &str = "DHALL_SEL_CACHE_DIR";
pub const MAX_IMPORT_DEPTH_VAR: &str = "DHALL_SEL_MAX_IMPORT_DEPTH";

#[derive(Debug, Clone)]
pub struct Settings {
    /// what top-level relative imports are relative to
    pub root: PathBuf,
    /// how many imports may be nested along one path
    pub max_import_depth: usize,
    /// where verified pinned imports are persisted, if anywhere
    pub cache_dir: Option<PathBuf>,
    pub remote_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            max_import_depth: 64,
            cache_dir: None,
            remote_timeout: Duration::from_secs(30),
        }
    }
}

impl Settings {
    /// Defaults, the persisted cache enabled and the current directory as root.
    ///
    /// `DHALL_SEL_CACHE_DIR` overrides the cache directory (empty disables it),
    /// which otherwise is the user's cache directory. `DHALL_SEL_MAX_IMPORT_DEPTH`
    /// overrides the depth limit; an unparsable value is ignored.
    pub fn from_env() -> Self {
        let mut settings = Settings::default();
        if let Ok(root) = std::env::current_dir() {
            settings.root = root;
        }

        settings.cache_dir = match std::env::var_os(CACHE_DIR_VAR) {
            Some(dir) if dir.is_empty() => None,
            Some(dir) => Some(PathBuf::from(dir)),
            None => dirs::cache_dir().map(|d| d.join("dhall-sel")),
        };

        if let Ok(depth) = std::env::var(MAX_IMPORT_DEPTH_VAR) {
            match depth.trim().parse() {
                Ok(depth) => settings.max_import_depth = depth,
                Err(e) => warn!(value = %depth, error = %e, "ignoring {MAX_IMPORT_DEPTH_VAR}"),
            }
        }

        settings
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_max_import_depth(mut self, depth: usize) -> Self {
        self.max_import_depth = depth;
        self
    }

    pub fn with_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.cache_dir = dir;
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }
}

#[test]
fn test() {
    let settings = Settings::default()
        .with_root("/cfg")
        .with_max_import_depth(3)
        .with_cache_dir(Some("/tmp/c".into()));
    assert_eq!(PathBuf::from("/cfg"), settings.root);
    assert_eq!(3, settings.max_import_depth);
    assert_eq!(Some(PathBuf::from("/tmp/c")), settings.cache_dir);
    assert_eq!(Duration::from_secs(30), settings.remote_timeout);
}
