use anyhow::{Context, Result};
use ignore::WalkBuilder;
use ignore::overrides::{Override, OverrideBuilder};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::model::Language;

#[derive(Debug, Clone)]
pub struct LanguageSpec {
    pub language: Language,
    pub extensions: &'static [&'static str],
}

static LANGUAGE_SPECS: &[LanguageSpec] = &[
    LanguageSpec {
        language: Language::TypeScript,
        extensions: &["ts", "mts", "cts"],
    },
    LanguageSpec {
        language: Language::Tsx,
        extensions: &["tsx"],
    },
    LanguageSpec {
        language: Language::JavaScript,
        extensions: &["js", "jsx", "mjs", "cjs"],
    },
    LanguageSpec {
        language: Language::Python,
        extensions: &["py", "pyi"],
    },
    LanguageSpec {
        language: Language::Rust,
        extensions: &["rs"],
    },
];

/// Directories never worth walking into.
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "target", "__pycache__", ".venv"];

pub fn language_specs() -> &'static [LanguageSpec] {
    LANGUAGE_SPECS
}

pub fn language_for_extension(ext: &str) -> Option<Language> {
    LANGUAGE_SPECS
        .iter()
        .find(|spec| spec.extensions.contains(&ext))
        .map(|spec| spec.language)
}

pub fn is_analyzable(path: &Path) -> bool {
    Language::from_path(path).is_some()
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub respect_gitignore: bool,
    pub exclude_patterns: Vec<String>,
    /// 0 means unlimited.
    pub max_files: usize,
}

/// Gitignore-style exclusion shared by the walker and the file watcher.
#[derive(Debug, Clone)]
pub struct ExcludeFilter {
    overrides: Override,
}

impl ExcludeFilter {
    pub fn new(root: &Path, patterns: &[String]) -> Result<Self> {
        let mut builder = OverrideBuilder::new(root);
        for pattern in patterns {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }
            builder
                .add(&format!("!{pattern}"))
                .with_context(|| format!("invalid exclude pattern {pattern}"))?;
        }
        let overrides = builder.build().context("build exclude patterns")?;
        Ok(Self { overrides })
    }

    pub fn overrides(&self) -> &Override {
        &self.overrides
    }

    pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        if path
            .components()
            .any(|comp| SKIP_DIRS.iter().any(|skip| comp.as_os_str() == OsStr::new(skip)))
        {
            return true;
        }
        self.overrides.matched(path, is_dir).is_ignore()
    }
}

/// Enumerates analyzable files under `root`, sorted for a stable index order.
pub fn scan_workspace(root: &Path, options: &ScanOptions) -> Result<Vec<PathBuf>> {
    let filter = ExcludeFilter::new(root, &options.exclude_patterns)?;
    let mut builder = WalkBuilder::new(root);
    builder
        .ignore(options.respect_gitignore)
        .git_ignore(options.respect_gitignore)
        .git_global(options.respect_gitignore)
        .git_exclude(options.respect_gitignore)
        .parents(options.respect_gitignore)
        .require_git(false)
        .hidden(false)
        .overrides(filter.overrides().clone())
        .filter_entry(|entry| !is_skipped_entry(entry));

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("walk error: {err}");
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        if !is_analyzable(entry.path()) {
            continue;
        }
        files.push(crate::util::normalize_path(entry.path()));
    }
    files.sort();
    files.dedup();
    if options.max_files > 0 && files.len() > options.max_files {
        tracing::warn!(
            found = files.len(),
            limit = options.max_files,
            "workspace exceeds maxFiles; truncating"
        );
        files.truncate(options.max_files);
    }
    Ok(files)
}

fn is_skipped_entry(entry: &ignore::DirEntry) -> bool {
    let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
    is_dir && SKIP_DIRS.iter().any(|skip| entry.file_name() == OsStr::new(skip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scan_finds_supported_languages_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "").unwrap();
        fs::write(dir.path().join("b.py"), "").unwrap();
        fs::write(dir.path().join("README.md"), "").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "").unwrap();

        let files = scan_workspace(dir.path(), &ScanOptions::default()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.ts", "b.py"]);
    }

    #[test]
    fn exclude_patterns_and_gitignore_are_respected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("gen")).unwrap();
        fs::create_dir_all(dir.path().join("build")).unwrap();
        fs::write(dir.path().join("gen/x.ts"), "").unwrap();
        fs::write(dir.path().join("build/y.ts"), "").unwrap();
        fs::write(dir.path().join("main.ts"), "").unwrap();
        fs::write(dir.path().join(".gitignore"), "build/\n").unwrap();

        let options = ScanOptions {
            respect_gitignore: true,
            exclude_patterns: vec!["gen/**".to_string()],
            max_files: 0,
        };
        let files = scan_workspace(dir.path(), &options).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("main.ts"));
    }

    #[test]
    fn max_files_truncates() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("f{i}.js")), "").unwrap();
        }
        let options = ScanOptions {
            max_files: 2,
            ..ScanOptions::default()
        };
        assert_eq!(scan_workspace(dir.path(), &options).unwrap().len(), 2);
    }

    #[test]
    fn language_table_covers_module_variants() {
        assert_eq!(language_for_extension("mts"), Some(Language::TypeScript));
        assert_eq!(language_for_extension("cjs"), Some(Language::JavaScript));
        assert_eq!(language_for_extension("pyi"), Some(Language::Python));
        assert_eq!(language_for_extension("go"), None);
    }
}
