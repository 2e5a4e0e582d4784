//! Module specifier -> file resolution.
//!
//! Order: alias table (longest prefix), relative candidates, then language
//! specific lookups (Python dotted modules, Rust module paths, package
//! manifests for bare JS specifiers). Anything that does not exist on disk is
//! an [`Resolution::Unresolved`] value, never an error.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::error::ResolveError;
use crate::model::Language;
use crate::util;

const JS_EXTENSIONS: &[&str] = &["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"];
const PY_EXTENSIONS: &[&str] = &["py", "pyi"];
const RS_EXTENSIONS: &[&str] = &["rs"];
const MANIFESTS: &[&str] = &["package.json", "Cargo.toml", "pyproject.toml", "setup.py"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved { path: PathBuf },
    Unresolved { reason: String },
}

impl Resolution {
    fn unresolved(reason: impl Into<String>) -> Self {
        Resolution::Unresolved {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Alias {
    prefix: String,
    target: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Resolver {
    root: PathBuf,
    /// Sorted longest prefix first.
    aliases: Vec<Alias>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TsConfig {
    #[serde(default)]
    compiler_options: CompilerOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompilerOptions {
    base_url: Option<String>,
    #[serde(default)]
    paths: HashMap<String, Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct PackageJson {
    name: Option<String>,
    main: Option<String>,
}

impl Resolver {
    pub fn new(root: impl Into<PathBuf>, aliases: &BTreeMap<String, String>) -> Self {
        let root = util::normalize_path(&root.into());
        let mut resolver = Self {
            root,
            aliases: Vec::new(),
        };
        for (prefix, target) in aliases {
            let target = Path::new(target.trim_end_matches('*'));
            let target = if target.is_absolute() {
                target.to_path_buf()
            } else {
                resolver.root.join(target)
            };
            resolver.push_alias(prefix, target);
        }
        resolver
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn push_alias(&mut self, prefix: &str, target: PathBuf) {
        let prefix = prefix.trim_end_matches('*').to_string();
        if prefix.is_empty() || self.aliases.iter().any(|a| a.prefix == prefix) {
            return;
        }
        self.aliases.push(Alias { prefix, target });
        self.aliases
            .sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()).then(a.prefix.cmp(&b.prefix)));
    }

    /// Merges `compilerOptions.paths` from the workspace tsconfig/jsconfig.
    /// Configured aliases keep precedence over tsconfig entries with the
    /// same prefix.
    pub fn load_tsconfig_paths(&mut self) -> Result<usize> {
        let Some(config_path) = ["tsconfig.json", "jsconfig.json"]
            .iter()
            .map(|name| self.root.join(name))
            .find(|path| path.is_file())
        else {
            return Ok(0);
        };
        let content = util::read_to_string(&config_path)?;
        let config: TsConfig = serde_json5::from_str(&content)
            .with_context(|| format!("parse {}", config_path.display()))?;
        let base = self
            .root
            .join(config.compiler_options.base_url.as_deref().unwrap_or("."));
        let mut added = 0;
        let mut patterns: Vec<_> = config.compiler_options.paths.into_iter().collect();
        patterns.sort();
        for (pattern, targets) in patterns {
            let Some(first) = targets.first() else {
                continue;
            };
            let before = self.aliases.len();
            self.push_alias(&pattern, base.join(first.trim_end_matches('*')));
            added += self.aliases.len() - before;
        }
        tracing::debug!(aliases = added, config = %config_path.display(), "loaded tsconfig paths");
        Ok(added)
    }

    pub fn resolve(&self, from: &Path, spec: &str) -> Result<Option<PathBuf>, ResolveError> {
        Ok(match self.resolve_detailed(from, spec)? {
            Resolution::Resolved { path } => Some(path),
            Resolution::Unresolved { .. } => None,
        })
    }

    pub fn resolve_detailed(&self, from: &Path, spec: &str) -> Result<Resolution, ResolveError> {
        if spec.trim().is_empty() {
            return Err(ResolveError::Malformed("module specifier is empty".into()));
        }
        if spec.contains('\0') {
            return Err(ResolveError::Malformed("module specifier contains a NUL byte".into()));
        }
        if !from.is_absolute() {
            return Err(ResolveError::Malformed(format!(
                "importing file must be an absolute path: {}",
                from.display()
            )));
        }
        let spec = spec.trim();
        let language = Language::from_path(from).unwrap_or(Language::TypeScript);

        let resolution = if let Some(resolution) = self.resolve_alias(spec, language) {
            resolution
        } else {
            match language {
                Language::Python => self.resolve_python(from, spec),
                Language::Rust => self.resolve_rust(from, spec),
                _ => self.resolve_js(from, spec),
            }
        };
        Ok(match resolution {
            Resolution::Resolved { path } => {
                let path = util::normalize_path(&path);
                if util::is_within(&self.root, &path) {
                    Resolution::Resolved { path }
                } else {
                    Resolution::unresolved(format!(
                        "{spec} resolves outside the workspace root"
                    ))
                }
            }
            other => other,
        })
    }

    fn resolve_alias(&self, spec: &str, language: Language) -> Option<Resolution> {
        let alias = self.aliases.iter().find(|alias| {
            spec.starts_with(&alias.prefix)
                && (alias.prefix.ends_with('/')
                    || spec.len() == alias.prefix.len()
                    || spec[alias.prefix.len()..].starts_with('/'))
        })?;
        let rest = spec[alias.prefix.len()..].trim_start_matches('/');
        let base = if rest.is_empty() {
            alias.target.clone()
        } else {
            alias.target.join(rest)
        };
        Some(match file_candidates(&base, language) {
            Some(path) => Resolution::Resolved { path },
            None => Resolution::unresolved(format!(
                "alias {} matched but {} does not exist",
                alias.prefix,
                base.display()
            )),
        })
    }

    fn resolve_js(&self, from: &Path, spec: &str) -> Resolution {
        let spec = spec.split(['?', '#']).next().unwrap_or(spec);
        let from_dir = parent_dir(from);
        if spec.starts_with("./") || spec.starts_with("../") || spec == "." || spec == ".." {
            let base = from_dir.join(spec);
            return match file_candidates(&base, Language::TypeScript) {
                Some(path) => Resolution::Resolved { path },
                None => Resolution::unresolved(format!(
                    "no file matches relative specifier {spec}"
                )),
            };
        }
        if let Some(rest) = spec.strip_prefix('/') {
            let base = self.root.join(rest);
            return match file_candidates(&base, Language::TypeScript) {
                Some(path) => Resolution::Resolved { path },
                None => Resolution::unresolved(format!("no file matches {spec} under the workspace root")),
            };
        }
        if spec.starts_with("node:") {
            return Resolution::unresolved(format!("{spec} is a runtime builtin"));
        }
        for dir in self.ancestors(&from_dir) {
            let manifest = dir.join("package.json");
            if !manifest.is_file() {
                continue;
            }
            let Some(package) = read_package_json(&manifest) else {
                continue;
            };
            let Some(name) = package.name.as_deref() else {
                continue;
            };
            let rest = if spec == name {
                ""
            } else if let Some(rest) = spec.strip_prefix(name).and_then(|r| r.strip_prefix('/')) {
                rest
            } else {
                continue;
            };
            let found = if rest.is_empty() {
                package
                    .main
                    .as_deref()
                    .and_then(|main| file_candidates(&dir.join(main), Language::TypeScript))
                    .or_else(|| file_candidates(&dir.join("src/index"), Language::TypeScript))
                    .or_else(|| file_candidates(&dir.join("index"), Language::TypeScript))
            } else {
                file_candidates(&dir.join(rest), Language::TypeScript)
                    .or_else(|| file_candidates(&dir.join("src").join(rest), Language::TypeScript))
            };
            if let Some(path) = found {
                return Resolution::Resolved { path };
            }
        }
        Resolution::unresolved(format!("external package {spec}"))
    }

    fn resolve_python(&self, from: &Path, spec: &str) -> Resolution {
        let from_dir = parent_dir(from);
        let dots = spec.chars().take_while(|c| *c == '.').count();
        let segments: Vec<&str> = spec[dots..].split('.').filter(|s| !s.is_empty()).collect();

        if dots > 0 {
            let mut base = from_dir.clone();
            for _ in 1..dots {
                if !base.pop() {
                    break;
                }
            }
            if let Some(path) = python_module(&base, &segments) {
                return Resolution::Resolved { path };
            }
            // `from .pkg import name` where name lives in pkg/__init__.py
            if !segments.is_empty() {
                if let Some(path) = python_module(&base, &segments[..segments.len() - 1]) {
                    return Resolution::Resolved { path };
                }
            }
            return Resolution::unresolved(format!("no module matches relative import {spec}"));
        }
        if segments.is_empty() {
            return Resolution::unresolved(format!("invalid module path {spec}"));
        }
        // Script directory first, then each ancestor up to the workspace root
        // (and its src/ layout).
        for dir in self.ancestors(&from_dir) {
            if let Some(path) = python_module(&dir, &segments) {
                return Resolution::Resolved { path };
            }
            let src = dir.join("src");
            if src.is_dir() {
                if let Some(path) = python_module(&src, &segments) {
                    return Resolution::Resolved { path };
                }
            }
            if has_manifest(&dir) && dir != from_dir {
                break;
            }
        }
        Resolution::unresolved(format!("external module {spec}"))
    }

    fn resolve_rust(&self, from: &Path, spec: &str) -> Resolution {
        let segments: Vec<&str> = spec.split("::").map(str::trim).filter(|s| !s.is_empty()).collect();
        let Some(first) = segments.first().copied() else {
            return Resolution::unresolved(format!("invalid module path {spec}"));
        };
        let self_dir = rust_module_dir(from);
        let crate_dir = self.rust_crate_dir(from);

        let (bases, rest): (Vec<PathBuf>, &[&str]) = match first {
            "crate" => (vec![crate_dir.clone()], &segments[1..]),
            "self" => (vec![self_dir.clone()], &segments[1..]),
            "super" => {
                let supers = segments.iter().take_while(|s| **s == "super").count();
                let mut dir = self_dir.clone();
                for _ in 0..supers {
                    if !dir.pop() {
                        break;
                    }
                }
                (vec![dir], &segments[supers..])
            }
            _ => (vec![self_dir.clone(), crate_dir.clone()], &segments[..]),
        };

        for base in &bases {
            for take in (1..=rest.len()).rev() {
                if let Some(path) = rust_module_file(base, &rest[..take]) {
                    if path != util::normalize_path(from) {
                        return Resolution::Resolved { path };
                    }
                }
            }
        }
        if rest.is_empty() || first == "crate" {
            let target = match first {
                "crate" => rust_dir_module_file(&crate_dir),
                "super" => rust_dir_module_file(&bases[0]),
                _ => None,
            };
            if let Some(path) = target.filter(|p| *p != util::normalize_path(from)) {
                return Resolution::Resolved { path };
            }
        }
        Resolution::unresolved(match first {
            "crate" | "self" | "super" => format!("no module file for {spec}"),
            _ => format!("external crate {first}"),
        })
    }

    fn rust_crate_dir(&self, from: &Path) -> PathBuf {
        let from_dir = parent_dir(from);
        for dir in self.ancestors(&from_dir) {
            if dir.join("main.rs").is_file() || dir.join("lib.rs").is_file() {
                return dir;
            }
            if dir.join("Cargo.toml").is_file() {
                let src = dir.join("src");
                return if src.is_dir() { src } else { dir };
            }
        }
        self.root.clone()
    }

    /// `dir` and each parent up to and including the workspace root.
    fn ancestors(&self, dir: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut current = Some(dir);
        while let Some(dir) = current {
            if !dir.starts_with(&self.root) {
                break;
            }
            out.push(dir.to_path_buf());
            if dir == self.root {
                break;
            }
            current = dir.parent();
        }
        out
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    util::clean_path(path.parent().unwrap_or_else(|| Path::new("/")))
}

fn has_manifest(dir: &Path) -> bool {
    MANIFESTS.iter().any(|name| dir.join(name).is_file())
}

fn read_package_json(path: &Path) -> Option<PackageJson> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(package) => Some(package),
        Err(err) => {
            tracing::debug!(path = %path.display(), "unreadable package.json: {err}");
            None
        }
    }
}

fn extension_order(language: Language) -> Vec<&'static str> {
    let preferred: &[&str] = match language {
        Language::Python => PY_EXTENSIONS,
        Language::Rust => RS_EXTENSIONS,
        _ => JS_EXTENSIONS,
    };
    let mut order: Vec<&str> = preferred.to_vec();
    for ext in JS_EXTENSIONS.iter().chain(PY_EXTENSIONS).chain(RS_EXTENSIONS) {
        if !order.contains(ext) {
            order.push(ext);
        }
    }
    order
}

/// Verbatim, then `base.<ext>`, then directory index conventions.
fn file_candidates(base: &Path, language: Language) -> Option<PathBuf> {
    let base = util::clean_path(base);
    if base.is_file() {
        return Some(base);
    }
    let order = extension_order(language);
    let raw = base.as_os_str().to_string_lossy().to_string();
    for ext in &order {
        let candidate = PathBuf::from(format!("{raw}.{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    // ESM style `./a.js` pointing at `a.ts`
    if let Some(ext) = base.extension().and_then(|e| e.to_str()) {
        if matches!(ext, "js" | "jsx" | "mjs" | "cjs") {
            for ts_ext in ["ts", "tsx", "mts", "cts"] {
                let candidate = base.with_extension(ts_ext);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
    }
    if base.is_dir() {
        for ext in &order {
            let candidate = base.join(format!("index.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        for name in ["__init__.py", "mod.rs"] {
            let candidate = base.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

fn python_module(base: &Path, segments: &[&str]) -> Option<PathBuf> {
    let mut rel = base.to_path_buf();
    for segment in segments {
        rel.push(segment);
    }
    if segments.is_empty() {
        let init = rel.join("__init__.py");
        return init.is_file().then_some(init);
    }
    for ext in PY_EXTENSIONS {
        let candidate = rel.with_extension(ext);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    let init = rel.join("__init__.py");
    init.is_file().then_some(init)
}

/// Directory holding the child modules of the module defined by `file`.
fn rust_module_dir(file: &Path) -> PathBuf {
    let parent = parent_dir(file);
    match file.file_name().and_then(|n| n.to_str()) {
        Some("mod.rs" | "lib.rs" | "main.rs") | None => parent,
        Some(_) => match file.file_stem() {
            Some(stem) => parent.join(stem),
            None => parent,
        },
    }
}

fn rust_module_file(base: &Path, segments: &[&str]) -> Option<PathBuf> {
    let mut rel = base.to_path_buf();
    for segment in segments {
        rel.push(segment);
    }
    let file = rel.with_extension("rs");
    if file.is_file() {
        return Some(util::normalize_path(&file));
    }
    let module = rel.join("mod.rs");
    module.is_file().then(|| util::normalize_path(&module))
}

fn rust_dir_module_file(dir: &Path) -> Option<PathBuf> {
    for name in ["lib.rs", "main.rs", "mod.rs"] {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(util::normalize_path(&candidate));
        }
    }
    let file = dir.with_extension("rs");
    file.is_file().then(|| util::normalize_path(&file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn workspace(files: &[&str]) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "").unwrap();
        }
        let root = dir.path().canonicalize().unwrap();
        (dir, root)
    }

    fn resolved(resolver: &Resolver, from: &Path, spec: &str) -> Option<PathBuf> {
        resolver.resolve(from, spec).unwrap()
    }

    #[test]
    fn relative_tries_verbatim_extensions_then_index() {
        let (_dir, root) = workspace(&["src/a.ts", "src/b/index.tsx", "src/c.service.ts"]);
        let resolver = Resolver::new(&root, &BTreeMap::new());
        let from = root.join("src/main.ts");
        assert_eq!(resolved(&resolver, &from, "./a.ts"), Some(root.join("src/a.ts")));
        assert_eq!(resolved(&resolver, &from, "./a"), Some(root.join("src/a.ts")));
        assert_eq!(resolved(&resolver, &from, "./a.js"), Some(root.join("src/a.ts")));
        assert_eq!(resolved(&resolver, &from, "./b"), Some(root.join("src/b/index.tsx")));
        assert_eq!(
            resolved(&resolver, &from, "./c.service"),
            Some(root.join("src/c.service.ts"))
        );
    }

    #[test]
    fn missing_relative_is_unresolved_with_reason() {
        let (_dir, root) = workspace(&["src/main.ts"]);
        let resolver = Resolver::new(&root, &BTreeMap::new());
        match resolver
            .resolve_detailed(&root.join("src/main.ts"), "./missing")
            .unwrap()
        {
            Resolution::Unresolved { reason } => assert!(reason.contains("./missing")),
            other => panic!("expected unresolved, got {other:?}"),
        }
    }

    #[test]
    fn malformed_input_is_an_error() {
        let resolver = Resolver::new("/", &BTreeMap::new());
        assert!(resolver.resolve(Path::new("/a.ts"), "").is_err());
        assert!(resolver.resolve(Path::new("/a.ts"), "a\0b").is_err());
        assert!(resolver.resolve(Path::new("a.ts"), "./b").is_err());
    }

    #[test]
    fn longest_alias_prefix_wins() {
        let (_dir, root) = workspace(&["src/lib/x.ts", "special/x.ts"]);
        let mut aliases = BTreeMap::new();
        aliases.insert("@app/".to_string(), "src/".to_string());
        aliases.insert("@app/lib/".to_string(), "special/".to_string());
        let resolver = Resolver::new(&root, &aliases);
        assert_eq!(
            resolved(&resolver, &root.join("src/main.ts"), "@app/lib/x"),
            Some(root.join("special/x.ts"))
        );
    }

    #[test]
    fn tsconfig_paths_become_aliases() {
        let (_dir, root) = workspace(&["src/components/button.tsx"]);
        fs::write(
            root.join("tsconfig.json"),
            "{\n  // comment\n  \"compilerOptions\": { \"baseUrl\": \".\", \"paths\": { \"@components/*\": [\"src/components/*\"], }, },\n}\n",
        )
        .unwrap();
        let mut resolver = Resolver::new(&root, &BTreeMap::new());
        assert_eq!(resolver.load_tsconfig_paths().unwrap(), 1);
        assert_eq!(
            resolved(&resolver, &root.join("src/app.tsx"), "@components/button"),
            Some(root.join("src/components/button.tsx"))
        );
    }

    #[test]
    fn bare_specifier_matches_workspace_package_name() {
        let (_dir, root) = workspace(&["packages/core/src/index.ts", "packages/core/src/util.ts"]);
        fs::write(
            root.join("packages/core/package.json"),
            r#"{"name": "@acme/core"}"#,
        )
        .unwrap();
        let resolver = Resolver::new(&root, &BTreeMap::new());
        let from = root.join("packages/core/src/feature.ts");
        assert_eq!(
            resolved(&resolver, &from, "@acme/core"),
            Some(root.join("packages/core/src/index.ts"))
        );
        assert_eq!(
            resolved(&resolver, &from, "@acme/core/util"),
            Some(root.join("packages/core/src/util.ts"))
        );
        assert_eq!(resolved(&resolver, &from, "react"), None);
    }

    #[test]
    fn python_dotted_and_relative_modules() {
        let (_dir, root) = workspace(&[
            "app.py",
            "utils/__init__.py",
            "utils/helpers.py",
            "services/processor.py",
        ]);
        let resolver = Resolver::new(&root, &BTreeMap::new());
        let app = root.join("app.py");
        assert_eq!(
            resolved(&resolver, &app, "utils.helpers"),
            Some(root.join("utils/helpers.py"))
        );
        assert_eq!(resolved(&resolver, &app, "utils"), Some(root.join("utils/__init__.py")));
        let processor = root.join("services/processor.py");
        assert_eq!(
            resolved(&resolver, &processor, "..utils.helpers"),
            Some(root.join("utils/helpers.py"))
        );
        assert_eq!(
            resolved(&resolver, &root.join("utils/helpers.py"), ".format_name"),
            Some(root.join("utils/__init__.py"))
        );
        assert_eq!(resolved(&resolver, &app, "requests"), None);
    }

    #[test]
    fn rust_module_paths() {
        let (_dir, root) = workspace(&[
            "main.rs",
            "helper.rs",
            "utils/database.rs",
            "utils/mod.rs",
            "utils/net/mod.rs",
        ]);
        let resolver = Resolver::new(&root, &BTreeMap::new());
        let main = root.join("main.rs");
        assert_eq!(resolved(&resolver, &main, "self::helper"), Some(root.join("helper.rs")));
        assert_eq!(
            resolved(&resolver, &main, "utils::database"),
            Some(root.join("utils/database.rs"))
        );
        assert_eq!(
            resolved(&resolver, &main, "crate::utils::database::connect_db"),
            Some(root.join("utils/database.rs"))
        );
        assert_eq!(
            resolved(&resolver, &root.join("utils/database.rs"), "super::net"),
            Some(root.join("utils/net/mod.rs"))
        );
        assert_eq!(resolved(&resolver, &main, "self::unused"), None);
        assert_eq!(resolved(&resolver, &main, "std::collections::HashMap"), None);
    }
}
