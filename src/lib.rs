//! A total, typed configuration language: parsing, import resolution with
//! integrity pinning and caching, type checking and normalization.
//!
//! ```no_run
//! use dhall_sel::{Resolver, Settings};
//!
//! let resolver = Resolver::new(Settings::from_env());
//! match resolver.load_str("<input>", "let n = 1 + 2 in { n = n }") {
//!     Ok(loaded) => println!("{} : {}", loaded.value, loaded.ty),
//!     Err(e) => e.report_stderr(),
//! }
//! ```

pub mod binary;
pub mod builtin;
pub mod cache;
pub mod check;
pub mod errors;
pub mod eval;
pub mod format;
pub mod hash;
pub mod import;
pub mod lex;
pub mod parse;
pub mod resolve;
pub mod settings;
pub mod stack;
pub mod syntax;

#[cfg(test)]
mod tests;

pub use crate::cache::Cache;
pub use crate::check::type_of;
pub use crate::errors::{Error, ErrorKind, FetchError, SyntaxError, TypeError};
pub use crate::eval::{eval, judgmentally_equal, quote_alpha_normal, Value};
pub use crate::hash::{semantic_hash, Sha256Hash};
pub use crate::import::{Fetch, ImportLocation, MemoryFetcher, StdFetcher};
pub use crate::parse::parse;
pub use crate::resolve::{Loaded, Resolver};
pub use crate::settings::Settings;
pub use crate::syntax::Expr;

/// load a top-level program with settings from the environment
pub fn load(source: &str) -> Result<Loaded, Error> {
    Resolver::new(Settings::from_env()).load_str("<input>", source)
}

/// parse a program, leaving its imports in place
pub fn resolve_str_as_expr(name: &str, content: &str) -> Result<Expr, SyntaxError> {
    parse(name, content.as_bytes())
}
