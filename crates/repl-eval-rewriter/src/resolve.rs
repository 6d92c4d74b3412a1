//! Module Path Resolver (4.A).
//!
//! Relative and absolute specifiers are resolved against the filesystem with
//! the same extension-inference order the teacher's bundler used
//! (`.ts, .tsx, .js, .jsx, index.ts, index.js`), extended with a
//! `node_modules/<specifier>` fallback. Anything else is a bare specifier and
//! is handed to the built-in registry rather than the filesystem (§6.1):
//! resolution never fails for a bare specifier, it just yields a `BuiltIn`
//! that the evaluator may or may not recognize.

use std::path::{Path, PathBuf};

use repl_eval_types::{EvalError, ModuleRef};

const EXTENSION_ORDER: &[&str] = &["ts", "tsx", "js", "jsx"];

fn is_relative_or_absolute(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
}

/// Try `base`, then `base.<ext>` for each inferred extension, then
/// `base/index.<ext>`.
fn resolve_on_disk(base: &Path) -> Option<PathBuf> {
    if base.is_file() {
        return Some(base.to_path_buf());
    }
    for ext in EXTENSION_ORDER {
        let candidate = base.with_extension(ext);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    for ext in EXTENSION_ORDER {
        let candidate = base.join(format!("index.{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// A package's own `main` field, the one piece of `package.json` this
/// resolver honors (§4.A: no ancestor `node_modules` walking, no `exports`
/// map, just "does this sibling package name a main file").
fn resolve_package_main(package_dir: &Path) -> Option<PathBuf> {
    let text = std::fs::read_to_string(package_dir.join("package.json")).ok()?;
    let value: serde_json::Value = serde_json::from_str(&text).ok()?;
    let main = value.get("main")?.as_str()?;
    resolve_on_disk(&package_dir.join(main))
}

/// Resolve an import/dynamic-import specifier seen while rewriting
/// `importing_namespace`.
pub fn resolve_specifier(importing_namespace: &Path, specifier: &str) -> Result<ModuleRef, EvalError> {
    if is_relative_or_absolute(specifier) {
        let parent = importing_namespace.parent().unwrap_or_else(|| Path::new("."));
        let base = parent.join(specifier);
        return resolve_on_disk(&base)
            .map(|path| ModuleRef::User {
                path: path.canonicalize().unwrap_or(path),
            })
            .ok_or_else(|| EvalError::resolve(specifier, importing_namespace));
    }

    let parent = importing_namespace.parent().unwrap_or_else(|| Path::new("."));
    let node_modules_base = parent.join("node_modules").join(specifier);
    let from_package = resolve_package_main(&node_modules_base);
    if let Some(path) = from_package.or_else(|| resolve_on_disk(&node_modules_base)) {
        return Ok(ModuleRef::User {
            path: path.canonicalize().unwrap_or(path),
        });
    }

    Ok(ModuleRef::BuiltIn {
        id: specifier.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn resolves_relative_sibling_with_inferred_extension() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("util.ts"), "export const x = 1;").unwrap();
        let entry = dir.path().join("main.ts");
        fs::write(&entry, "").unwrap();

        let resolved = resolve_specifier(&entry, "./util").unwrap();
        match resolved {
            ModuleRef::User { path } => assert_eq!(path.file_name().unwrap(), "util.ts"),
            ModuleRef::BuiltIn { .. } => panic!("expected a user module"),
        }
    }

    #[test]
    fn resolves_directory_index() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/index.js"), "export const x = 1;").unwrap();
        let entry = dir.path().join("main.ts");
        fs::write(&entry, "").unwrap();

        let resolved = resolve_specifier(&entry, "./lib").unwrap();
        match resolved {
            ModuleRef::User { path } => assert!(path.ends_with("lib/index.js")),
            ModuleRef::BuiltIn { .. } => panic!("expected a user module"),
        }
    }

    #[test]
    fn missing_relative_module_is_resolve_error() {
        let dir = TempDir::new().unwrap();
        let entry = dir.path().join("main.ts");
        fs::write(&entry, "").unwrap();

        let err = resolve_specifier(&entry, "./nope").unwrap_err();
        assert!(matches!(err, EvalError::ResolveError { .. }));
    }

    #[test]
    fn bare_specifier_is_built_in_not_an_error() {
        let dir = TempDir::new().unwrap();
        let entry = dir.path().join("main.ts");
        fs::write(&entry, "").unwrap();

        let resolved = resolve_specifier(&entry, "console").unwrap();
        assert!(resolved.is_built_in());
    }

    #[test]
    fn node_modules_sibling_wins_over_built_in_registry() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("node_modules/left-pad")).unwrap();
        fs::write(dir.path().join("node_modules/left-pad/index.js"), "").unwrap();
        let entry = dir.path().join("main.ts");
        fs::write(&entry, "").unwrap();

        let resolved = resolve_specifier(&entry, "left-pad").unwrap();
        assert!(!resolved.is_built_in());
    }

    #[test]
    fn node_modules_package_json_main_field_is_honored() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("node_modules/thing")).unwrap();
        fs::write(
            dir.path().join("node_modules/thing/package.json"),
            r#"{"main": "lib/entry.js"}"#,
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("node_modules/thing/lib")).unwrap();
        fs::write(dir.path().join("node_modules/thing/lib/entry.js"), "").unwrap();
        let entry = dir.path().join("main.ts");
        fs::write(&entry, "").unwrap();

        let resolved = resolve_specifier(&entry, "thing").unwrap();
        match resolved {
            ModuleRef::User { path } => assert!(path.ends_with("lib/entry.js")),
            ModuleRef::BuiltIn { .. } => panic!("expected a user module"),
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// §6.1: resolving a bare specifier never fails, regardless of
            /// what it looks like, since anything not found on disk simply
            /// falls through to the built-in registry.
            #[test]
            fn bare_specifier_resolution_never_errors(
                specifier in "[a-zA-Z][a-zA-Z0-9_-]{0,30}",
            ) {
                let dir = TempDir::new().unwrap();
                let entry = dir.path().join("main.ts");
                fs::write(&entry, "").unwrap();

                prop_assert!(resolve_specifier(&entry, &specifier).is_ok());
            }
        }
    }
}
