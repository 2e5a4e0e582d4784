use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::Spider;
use crate::error::ToolError;
use crate::model::{ImportType, ParsedImport};
use crate::util;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyUsage {
    pub target_path: String,
    pub module_specifier: String,
    pub import_type: ImportType,
    pub line: usize,
    pub used: bool,
    pub used_bindings: Vec<String>,
    pub unused_bindings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub file_path: String,
    pub dependencies: Vec<DependencyUsage>,
    pub used_count: usize,
    pub unused_count: usize,
}

/// Names that appear in a file outside its import statements.
struct UsageEvidence<'a> {
    references: HashSet<&'a str>,
    identifiers: HashSet<&'a str>,
}

impl UsageEvidence<'_> {
    fn mentions(&self, name: &str) -> bool {
        self.references.contains(name) || self.identifiers.contains(name)
    }
}

impl Spider {
    /// Checks each resolved import of `path` for actual use. Edges are checked
    /// in parallel; a check that fails counts as used.
    pub fn verify_dependency_usage(
        &mut self,
        path: &Path,
        targets: Option<&[PathBuf]>,
    ) -> Result<UsageReport, ToolError> {
        let key = util::path_key(path);
        let file = Path::new(&key);
        if !file.is_file() {
            return Err(ToolError::file_not_found(&key));
        }
        let content = util::read_to_string(file)?;
        let parsed = self.parser.parse(file, &content)?;

        let wanted: Option<HashSet<String>> =
            targets.map(|targets| targets.iter().map(|t| util::path_key(t)).collect());
        let work: Vec<(&ParsedImport, PathBuf)> = parsed
            .imports
            .iter()
            .filter_map(|import| {
                let target = self.resolver.resolve(file, &import.module).ok().flatten()?;
                Some((import, target))
            })
            .filter(|(_, target)| {
                wanted
                    .as_ref()
                    .is_none_or(|wanted| wanted.contains(&util::path_key(target)))
            })
            .collect();

        let evidence = UsageEvidence {
            references: parsed.references.iter().map(|r| r.name.as_str()).collect(),
            identifiers: identifiers_outside_imports(&content, &parsed.imports),
        };

        let dependencies: Vec<DependencyUsage> = work
            .par_iter()
            .map(|(import, target)| {
                check_usage(import, target, &evidence).unwrap_or_else(|err| {
                    warn!(target = %target.display(), "usage check failed, assuming used: {err:#}");
                    DependencyUsage {
                        target_path: target.to_string_lossy().to_string(),
                        module_specifier: import.module.clone(),
                        import_type: import.import_type,
                        line: import.line,
                        used: true,
                        used_bindings: Vec::new(),
                        unused_bindings: Vec::new(),
                        error: Some(format!("{err:#}")),
                    }
                })
            })
            .collect();

        let used_count = dependencies.iter().filter(|d| d.used).count();
        debug!(path = %key, edges = dependencies.len(), used_count, "verified dependency usage");
        Ok(UsageReport {
            file_path: key,
            unused_count: dependencies.len() - used_count,
            used_count,
            dependencies,
        })
    }
}

fn check_usage(
    import: &ParsedImport,
    target: &Path,
    evidence: &UsageEvidence<'_>,
) -> Result<DependencyUsage> {
    let metadata =
        fs::metadata(target).with_context(|| format!("stat {}", target.display()))?;
    if !metadata.is_file() {
        bail!("{} is no longer a file", target.display());
    }

    let mut used_bindings = Vec::new();
    let mut unused_bindings = Vec::new();
    let used = if import.import_type == ImportType::ModuleDecl {
        // `mod foo;` is live when something reaches into `foo::`
        let module = import.module.rsplit("::").next().unwrap_or(&import.module);
        evidence.mentions(module)
    } else if import.bindings.is_empty() {
        true
    } else {
        for binding in &import.bindings {
            if evidence.mentions(&binding.local) {
                used_bindings.push(binding.local.clone());
            } else {
                unused_bindings.push(binding.local.clone());
            }
        }
        !used_bindings.is_empty()
    };

    Ok(DependencyUsage {
        target_path: target.to_string_lossy().to_string(),
        module_specifier: import.module.clone(),
        import_type: import.import_type,
        line: import.line,
        used,
        used_bindings,
        unused_bindings,
        error: None,
    })
}

/// Identifier-like words of `content`, skipping the lines of static import
/// statements. A statement continues until its brackets balance.
fn identifiers_outside_imports<'a>(content: &'a str, imports: &[ParsedImport]) -> HashSet<&'a str> {
    let lines: Vec<&str> = content.lines().collect();
    let mut skipped = vec![false; lines.len()];
    for import in imports {
        if matches!(import.import_type, ImportType::Dynamic | ImportType::Require) {
            continue;
        }
        let mut depth: i32 = 0;
        let mut idx = import.line.saturating_sub(1);
        while idx < lines.len() {
            skipped[idx] = true;
            for ch in lines[idx].chars() {
                match ch {
                    '{' | '(' | '[' => depth += 1,
                    '}' | ')' | ']' => depth -= 1,
                    _ => {}
                }
            }
            if depth <= 0 {
                break;
            }
            idx += 1;
        }
    }

    lines
        .iter()
        .zip(skipped)
        .filter(|(_, skip)| !skip)
        .flat_map(|(&line, _)| {
            line.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
                .filter(|word| !word.is_empty())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn flags_unused_named_imports() {
        let dir = workspace(&[
            (
                "main.ts",
                "import {\n  used,\n  unused,\n} from './lib';\nimport './side-effect';\nconsole.log(used);\n",
            ),
            ("lib.ts", "export const used = 1;\nexport const unused = 2;\n"),
            ("side-effect.ts", "console.log('loaded');\n"),
        ]);
        let mut spider = spider(&dir);
        let report = spider
            .verify_dependency_usage(&dir.path().join("main.ts"), None)
            .unwrap();
        assert_eq!(report.dependencies.len(), 2);
        let lib = report
            .dependencies
            .iter()
            .find(|d| d.module_specifier == "./lib")
            .unwrap();
        assert!(lib.used);
        assert_eq!(lib.used_bindings, vec!["used".to_string()]);
        assert_eq!(lib.unused_bindings, vec!["unused".to_string()]);
        let side = report
            .dependencies
            .iter()
            .find(|d| d.module_specifier == "./side-effect")
            .unwrap();
        assert!(side.used);
    }

    #[test]
    fn unused_rust_module_declaration() {
        let dir = workspace(&[
            ("main.rs", "mod helper;\nmod unused;\n\nfn main() {\n    let data = helper::format_data(\"test\");\n    println!(\"{}\", data);\n}\n"),
            ("helper.rs", "pub fn format_data(input: &str) -> String {\n    input.to_string()\n}\n"),
            ("unused.rs", "pub fn never() {}\n"),
        ]);
        let mut spider = spider(&dir);
        let report = spider
            .verify_dependency_usage(&dir.path().join("main.rs"), None)
            .unwrap();
        let by_spec = |spec: &str| {
            report
                .dependencies
                .iter()
                .find(|d| d.module_specifier == spec)
                .unwrap()
                .used
        };
        assert!(by_spec("self::helper"));
        assert!(!by_spec("self::unused"));
        assert_eq!(report.unused_count, 1);
    }

    #[test]
    fn check_fails_for_vanished_target() {
        let import = ParsedImport {
            module: "./gone".to_string(),
            import_type: ImportType::Static,
            line: 1,
            bindings: Vec::new(),
        };
        let evidence = UsageEvidence {
            references: HashSet::new(),
            identifiers: HashSet::new(),
        };
        let err = check_usage(&import, Path::new("/definitely/not/here.ts"), &evidence);
        assert!(err.is_err());
    }
}
