use std::fs;
use std::path::Path;
use std::sync::Arc;

use insta::assert_snapshot;

use crate::builtin::Builtin;
use crate::errors::{Error, ErrorKind, TypeError};
use crate::eval::eval;
use crate::hash::{semantic_hash, Sha256Hash};
use crate::import::{ImportLocation, MemoryFetcher};
use crate::parse::parse;
use crate::resolve::Resolver;
use crate::settings::Settings;
use crate::syntax::{Expr, MAX_DEPTH};

// utils {{{
fn local(p: impl AsRef<Path>) -> ImportLocation {
    ImportLocation::Local(p.as_ref().to_path_buf())
}

fn memory(files: &[(&str, &str)]) -> Resolver<MemoryFetcher> {
    let mut fetcher = MemoryFetcher::new();
    for (path, content) in files {
        fetcher.insert(local(path), *content);
    }
    Resolver::with_fetcher(Settings::default().with_root("/r"), fetcher)
}

fn resolve<F: crate::import::Fetch>(r: &Resolver<F>, source: &str) -> Result<Expr, Error> {
    r.resolve(&parse("t", source.as_bytes())?)
}

fn hash_of(source: &str) -> Sha256Hash {
    semantic_hash(&eval(&parse("t", source.as_bytes()).unwrap())).unwrap()
}

fn cycle_of(err: &Error) -> &[ImportLocation] {
    match err.kind() {
        ErrorKind::ImportCycle { cycle } => cycle,
        other => panic!("not a cycle: {other}"),
    }
}
// }}}

// whole programs {{{
#[test]
fn arithmetic() {
    let loaded = memory(&[]).load_str("t", "1 + 2").unwrap();
    assert_eq!(&Expr::NaturalLit(3), loaded.value.as_expr());
    assert_eq!(&Expr::Builtin(Builtin::Natural), loaded.ty.as_expr());

    let err = memory(&[]).load_str("t", "1 + -2").unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::Type(TypeError::OperandMismatch { actual: Expr::Builtin(Builtin::Integer), .. })
    ));
    assert!(err.chain().is_empty());
}

#[test]
fn program_with_imports() {
    let r = memory(&[
        ("/r/lib/util.dhall", "λ(n : Natural) → n * 2"),
        ("/r/lib/name.txt", "sel"),
        ("/r/main.dhall", "let double = ./lib/util.dhall in { x = double 21, name = ./lib/name.txt as Text }"),
    ]);
    let loaded = r.load_file("main.dhall").unwrap();
    assert_snapshot!(loaded.value, @r#"{ name = "sel", x = 42 }"#);
    assert_snapshot!(loaded.ty, @"{ name : Text, x : Natural }");
}

#[test]
fn resolved_tree_has_no_imports() {
    let r = memory(&[
        ("/r/a", "{ b = ./b, c = ./c as Text, d = ./d as Location }"),
        ("/r/b", "[1, 2] # [3]"),
        ("/r/c", "c"),
    ]);
    let expr = parse("t", b"{ a = ./a, again = ./a, here = ./b }").unwrap();
    assert_eq!(3, expr.count_imports());
    assert_eq!(0, r.resolve(&expr).unwrap().count_imports());
}

#[test]
fn empty_lists() {
    let r = memory(&[("/r/e.dhall", "[] : List Natural")]);
    let loaded = r.load_str("t", "./e.dhall # [1]").unwrap();
    assert_snapshot!(loaded.value, @"[1]");
    assert_snapshot!(loaded.ty, @"List Natural");

    let loaded = r.load_str("t", "{ none = ./e.dhall, count = List/length Natural ./e.dhall }").unwrap();
    assert_snapshot!(loaded.value, @"{ count = 0, none = [] : List Natural }");
}

#[test]
fn long_programs() {
    // long sequences are walked one step at a time, not nested
    let lets: String = (1..=600).map(|k| format!("let x{k} = x{} + 1\n", k - 1)).collect();
    let loaded = memory(&[]).load_str("t", &format!("let x0 = 0\n{lets}in x600")).unwrap();
    assert_eq!(&Expr::NaturalLit(600), loaded.value.as_expr());

    let sum = vec!["1"; MAX_DEPTH].join(" + ");
    let loaded = memory(&[]).load_str("t", &sum).unwrap();
    assert_eq!(&Expr::NaturalLit(MAX_DEPTH as u64), loaded.value.as_expr());
}

#[test]
fn environment_import() {
    std::env::set_var("DHALL_SEL_TEST_ENV_IMPORT", "{ a = 1 } : { a : Natural }");
    let r = Resolver::new(Settings::default());
    let loaded = r.load_str("t", "(env:DHALL_SEL_TEST_ENV_IMPORT).a + 1").unwrap();
    assert_eq!(&Expr::NaturalLit(2), loaded.value.as_expr());
}
// }}}

// cycles {{{
#[test]
fn self_import() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.dhall");
    fs::write(&a, "1 + ./a.dhall").unwrap();

    let r = Resolver::new(Settings::default().with_root(dir.path()));
    let err = r.load_file("a.dhall").unwrap_err();
    assert_eq!(&[local(&a), local(&a)], cycle_of(&err));

    let err = resolve(&r, "./a.dhall").unwrap_err();
    assert_eq!(&[local(&a), local(&a)], cycle_of(&err));
}

#[test]
fn mutual_imports() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.dhall");
    let b = dir.path().join("sub").join("b.dhall");
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(&a, "{ b = ./sub/b.dhall }").unwrap();
    fs::write(&b, "[../a.dhall]").unwrap();

    let r = Resolver::new(Settings::default().with_root(dir.path()));
    let err = r.load_file("a.dhall").unwrap_err();
    assert_eq!(&[local(&a), local(&b), local(&a)], cycle_of(&err));

    let err = r.load_file("sub/b.dhall").unwrap_err();
    assert_eq!(&[local(&b), local(&a), local(&b)], cycle_of(&err));
}

#[test]
fn siblings_are_not_cycles() {
    let r = memory(&[
        ("/r/shared", "1"),
        ("/r/a", "./shared + 1"),
        ("/r/b", "./shared + ./a"),
    ]);
    assert_eq!(Ok(Expr::NaturalLit(3)), resolve(&r, "./b").map_err(|e| e.to_string()));
}

#[test]
fn cycle_report() {
    let r = memory(&[("/r/a.dhall", "./b.dhall"), ("/r/b.dhall", "./a.dhall")]);
    let err = resolve(&r, "./a.dhall").unwrap_err();
    assert_snapshot!(err.report(), @r"
    Import cycle
    | Import cycle: /r/a.dhall -> /r/b.dhall -> /r/a.dhall
    | ↳ imported from /r/b.dhall
    | ↳ imported from /r/a.dhall
    ===
    ");
}
// }}}

#[test]
fn deep_import_chain() {
    // each file is shallow, the values they splice together are not
    let files: Vec<(String, String)> = (0..60)
        .map(|k| (format!("/r/{k}"), format!("{}./{}{}", "[".repeat(30), k + 1, "]".repeat(30))))
        .chain([("/r/60".to_string(), "1".to_string())])
        .collect();
    let files: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
    let r = memory(&files);

    // `./26` is 30 * 34 + 1 levels deep, `./25` 30 more
    let err = r.load_str("t", "./0").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ResolvedDepth { limit: MAX_DEPTH }));
    assert_eq!(26, err.chain().len());
    assert_eq!(Some(&local("/r/25")), err.chain().last());

    assert!(r.load_str("t", "./26").is_ok());
}

// modes {{{
#[test]
fn text_is_never_parsed() {
    let content = "-- not code ${ \"\n\tλ";
    let r = memory(&[("/r/raw", content)]);
    assert_eq!(Expr::text(content), resolve(&r, "./raw as Text").unwrap());

    let loaded = r.load_str("t", "./raw as Text ++ \"!\"").unwrap();
    assert_eq!(&Expr::text(format!("{content}!")), loaded.value.as_expr());
}

#[test]
fn location_is_never_fetched() {
    let r = memory(&[]);
    let loaded = r.load_str("t", "../elsewhere/x.dhall as Location").unwrap();
    assert_snapshot!(
        loaded.value,
        @r#"< Environment : Text | Local : Text | Missing | Remote : Text >.Local "/elsewhere/x.dhall""#
    );
    assert_snapshot!(loaded.ty, @"< Environment : Text | Local : Text | Missing | Remote : Text >");
    assert_eq!(0, r.fetcher().fetch_count(&local("/elsewhere/x.dhall")));
}

#[test]
fn unused_ill_typed_import() {
    let r = memory(&[("/r/bad.dhall", "1 + True")]);
    let err = r.load_str("t", "let unused = ./bad.dhall in 0").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Type(TypeError::OperandMismatch { .. })));
    assert_eq!(&[local("/r/bad.dhall")], err.chain());
}

#[test]
fn imports_are_closed() {
    // the importer's bindings are not in scope of what it imports
    let r = memory(&[("/r/open.dhall", "x + 1")]);
    let err = r.load_str("t", "let x = 1 in ./open.dhall").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Type(TypeError::UnboundVariable(_))));
}
// }}}

// integrity {{{
#[test]
fn pinning() {
    let content = "λ(x : Natural) → x + 0";
    let good = hash_of(content);
    let r = memory(&[("/r/f.dhall", content)]);

    let err = resolve(&r, &format!("./f.dhall {}", Sha256Hash::of(b"nope"))).unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::ImportIntegrity { expected, actual, .. } if *expected == Sha256Hash::of(b"nope") && *actual == good
    ));

    let pinned = format!("./f.dhall {good}");
    assert_snapshot!(resolve(&r, &pinned).unwrap(), @"λ(_ : Natural) → _");
    assert_snapshot!(resolve(&r, &pinned).unwrap(), @"λ(_ : Natural) → _");
    assert_eq!(1, r.fetcher().fetch_count(&local("/r/f.dhall")));

    // a different claim is checked again, even for content already resolved
    let err = resolve(&r, &format!("./f.dhall {}", hash_of("1"))).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ImportIntegrity { .. }));
}

#[test]
fn hash_is_semantic() {
    // same value up to names and reduction, so same hash
    assert_eq!(hash_of("λ(y : Natural) → y"), hash_of("λ(x : Natural) → x + 0"));
    assert_eq!(hash_of("3"), hash_of("let a = 1 in a + 2"));
    assert_ne!(hash_of("3"), hash_of("+3"));

    let good = hash_of("λ(y : Natural) → y");
    let r = memory(&[("/r/f.dhall", "λ(x : Natural) → x + 0")]);
    resolve(&r, &format!("./f.dhall {good}")).unwrap();

    // content addressed: another location with that pin is never fetched
    let sharing = Resolver::with_fetcher(Settings::default().with_root("/r"), MemoryFetcher::new())
        .with_cache(Arc::clone(r.cache()));
    assert_snapshot!(resolve(&sharing, &format!("./copy.dhall {good}")).unwrap(), @"λ(_ : Natural) → _");
    assert_eq!(0, sharing.fetcher().fetch_count(&local("/r/copy.dhall")));
}

#[test]
fn persisted_cache() {
    let cache = tempfile::tempdir().unwrap();
    let settings = Settings::default()
        .with_root("/r")
        .with_cache_dir(Some(cache.path().to_path_buf()));
    let good = hash_of("{ a = True }");
    let pinned = format!("./f.dhall {good}");

    let fetcher = MemoryFetcher::new().with(local("/r/f.dhall"), "{ a = True && True }");
    let first = Resolver::with_fetcher(settings.clone(), fetcher);
    assert_snapshot!(resolve(&first, &pinned).unwrap(), @"{ a = True }");
    assert!(cache.path().join(format!("1220{}", good.to_hex())).is_file());

    // a later session, with nothing to fetch from
    let later = Resolver::with_fetcher(settings, MemoryFetcher::new());
    assert_snapshot!(resolve(&later, &pinned).unwrap(), @"{ a = True }");
    assert_eq!(0, later.fetcher().fetch_count(&local("/r/f.dhall")));

    let err = resolve(&later, "./f.dhall").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ImportFetch { .. }));
}

#[test]
fn separate_sessions() {
    let content = "1";
    let pinned = format!("./one {}", hash_of(content));
    let a = memory(&[("/r/one", content)]);
    let b = memory(&[("/r/one", content)]);
    resolve(&a, &pinned).unwrap();
    resolve(&b, &pinned).unwrap();
    assert_eq!(1, a.fetcher().fetch_count(&local("/r/one")));
    assert_eq!(1, b.fetcher().fetch_count(&local("/r/one")));
    assert_eq!(1, a.cache().len());

    a.cache().clear();
    resolve(&a, &pinned).unwrap();
    assert_eq!(2, a.fetcher().fetch_count(&local("/r/one")));
}
// }}}
