//! Typed tool surface: one params struct per tool, one request variant per
//! tool, and a single exhaustive dispatch.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::ToolError;
use crate::impact;
use crate::resolver::Resolution;
use crate::spider::Spider;
use crate::util;

/// Upper bound for every depth parameter.
pub const MAX_DEPTH_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileParams {
    /// Workspace-relative or absolute path inside the workspace.
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CrawlParams {
    pub entry_file: String,
    /// Hops from the entry file (0..=50). Defaults to the workspace maxDepth.
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExpandNodeParams {
    pub file_path: String,
    /// Files the client already holds; they are not reported again.
    #[serde(default)]
    pub known_files: Vec<String>,
    /// Additional hops below the node (0..=50, default 1).
    pub extra_depth: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerifyUsageParams {
    pub file_path: String,
    /// Restrict the check to these dependency targets.
    pub targets: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResolveModuleParams {
    /// The importing file.
    pub from_file: String,
    pub module_specifier: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EmptyParams {}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InvalidateFilesParams {
    pub file_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SymbolParams {
    pub file_path: String,
    /// Bare name (`save`) or qualified name (`Store.save`).
    pub symbol_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TraceParams {
    pub file_path: String,
    pub symbol_name: String,
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BreakingChangesParams {
    /// Determines the language; the file itself is not read.
    pub file_path: String,
    pub old_content: String,
    pub new_content: String,
    pub symbol_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImpactParams {
    pub file_path: String,
    pub symbol_name: String,
    /// Default true.
    pub include_transitive: Option<bool>,
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileLogicParams {
    pub file_path: String,
    /// Include calls that leave the file. Default false.
    pub include_external: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    AnalyzeDependencies(FileParams),
    CrawlDependencyGraph(CrawlParams),
    FindReferencingFiles(FileParams),
    ExpandNode(ExpandNodeParams),
    ParseImports(FileParams),
    VerifyDependencyUsage(VerifyUsageParams),
    ResolveModulePath(ResolveModuleParams),
    GetIndexStatus(EmptyParams),
    InvalidateFiles(InvalidateFilesParams),
    RebuildIndex(EmptyParams),
    GetSymbolGraph(FileParams),
    FindUnusedSymbols(FileParams),
    GetSymbolDependents(SymbolParams),
    TraceFunctionExecution(TraceParams),
    GetSymbolCallers(SymbolParams),
    AnalyzeBreakingChanges(BreakingChangesParams),
    GetImpactAnalysis(ImpactParams),
    AnalyzeFileLogic(FileLogicParams),
}

pub struct ToolDoc {
    pub name: &'static str,
    pub summary: &'static str,
}

pub const TOOL_DOCS: &[ToolDoc] = &[
    ToolDoc {
        name: "analyze_dependencies",
        summary: "Direct imports of one file, resolved to workspace paths.",
    },
    ToolDoc {
        name: "crawl_dependency_graph",
        summary: "Breadth-first dependency graph from an entry file, with cycles.",
    },
    ToolDoc {
        name: "find_referencing_files",
        summary: "Files that import the given file.",
    },
    ToolDoc {
        name: "expand_node",
        summary: "Grow a partial graph from one node, skipping known files.",
    },
    ToolDoc {
        name: "parse_imports",
        summary: "Raw import statements of a file, unresolved.",
    },
    ToolDoc {
        name: "verify_dependency_usage",
        summary: "Whether each resolved import of a file is actually used.",
    },
    ToolDoc {
        name: "resolve_module_path",
        summary: "Resolve one module specifier from an importing file.",
    },
    ToolDoc {
        name: "get_index_status",
        summary: "Index state, progress counters and warmup info.",
    },
    ToolDoc {
        name: "invalidate_files",
        summary: "Drop cached analysis for the given files.",
    },
    ToolDoc {
        name: "rebuild_index",
        summary: "Re-index the workspace, cancelling a rebuild already running.",
    },
    ToolDoc {
        name: "get_symbol_graph",
        summary: "Symbols of a file and the symbol-level edges leaving it.",
    },
    ToolDoc {
        name: "find_unused_symbols",
        summary: "Symbols of a file that nothing references.",
    },
    ToolDoc {
        name: "get_symbol_dependents",
        summary: "Direct dependents of a symbol.",
    },
    ToolDoc {
        name: "trace_function_execution",
        summary: "Forward call chain of a function.",
    },
    ToolDoc {
        name: "get_symbol_callers",
        summary: "Callers of a symbol from the symbol reverse index.",
    },
    ToolDoc {
        name: "analyze_breaking_changes",
        summary: "Classify signature changes between two versions of a file.",
    },
    ToolDoc {
        name: "get_impact_analysis",
        summary: "Direct and transitive blast radius of changing a symbol.",
    },
    ToolDoc {
        name: "analyze_file_logic",
        summary: "Call hierarchy inside one file.",
    },
];

fn from_params<T: DeserializeOwned>(tool: &str, params: Value) -> Result<T, ToolError> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params)
        .map_err(|err| ToolError::validation(format!("invalid params for {tool}: {err}")))
}

fn require_path(field: &str, value: &str) -> Result<(), ToolError> {
    if value.trim().is_empty() {
        return Err(ToolError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn check_depth(field: &str, value: Option<usize>) -> Result<(), ToolError> {
    match value {
        Some(depth) if depth > MAX_DEPTH_LIMIT => Err(ToolError::validation(format!(
            "{field} must be within 0..={MAX_DEPTH_LIMIT}, got {depth}"
        ))),
        _ => Ok(()),
    }
}

impl ToolRequest {
    /// Typed deserialisation plus range checks. An unknown tool name is a
    /// validation error for this request only.
    pub fn parse(tool: &str, params: Value) -> Result<Self, ToolError> {
        let request = match tool {
            "analyze_dependencies" => ToolRequest::AnalyzeDependencies(from_params(tool, params)?),
            "crawl_dependency_graph" => ToolRequest::CrawlDependencyGraph(from_params(tool, params)?),
            "find_referencing_files" => ToolRequest::FindReferencingFiles(from_params(tool, params)?),
            "expand_node" => ToolRequest::ExpandNode(from_params(tool, params)?),
            "parse_imports" => ToolRequest::ParseImports(from_params(tool, params)?),
            "verify_dependency_usage" => {
                ToolRequest::VerifyDependencyUsage(from_params(tool, params)?)
            }
            "resolve_module_path" => ToolRequest::ResolveModulePath(from_params(tool, params)?),
            "get_index_status" => ToolRequest::GetIndexStatus(from_params(tool, params)?),
            "invalidate_files" => ToolRequest::InvalidateFiles(from_params(tool, params)?),
            "rebuild_index" => ToolRequest::RebuildIndex(from_params(tool, params)?),
            "get_symbol_graph" => ToolRequest::GetSymbolGraph(from_params(tool, params)?),
            "find_unused_symbols" => ToolRequest::FindUnusedSymbols(from_params(tool, params)?),
            "get_symbol_dependents" => ToolRequest::GetSymbolDependents(from_params(tool, params)?),
            "trace_function_execution" => {
                ToolRequest::TraceFunctionExecution(from_params(tool, params)?)
            }
            "get_symbol_callers" => ToolRequest::GetSymbolCallers(from_params(tool, params)?),
            "analyze_breaking_changes" => {
                ToolRequest::AnalyzeBreakingChanges(from_params(tool, params)?)
            }
            "get_impact_analysis" => ToolRequest::GetImpactAnalysis(from_params(tool, params)?),
            "analyze_file_logic" => ToolRequest::AnalyzeFileLogic(from_params(tool, params)?),
            other => return Err(ToolError::validation(format!("unknown tool: {other}"))),
        };
        request.validate()?;
        Ok(request)
    }

    fn validate(&self) -> Result<(), ToolError> {
        match self {
            ToolRequest::AnalyzeDependencies(p)
            | ToolRequest::FindReferencingFiles(p)
            | ToolRequest::ParseImports(p)
            | ToolRequest::GetSymbolGraph(p)
            | ToolRequest::FindUnusedSymbols(p) => require_path("filePath", &p.file_path),
            ToolRequest::CrawlDependencyGraph(p) => {
                require_path("entryFile", &p.entry_file)?;
                check_depth("maxDepth", p.max_depth)
            }
            ToolRequest::ExpandNode(p) => {
                require_path("filePath", &p.file_path)?;
                check_depth("extraDepth", p.extra_depth)
            }
            ToolRequest::VerifyDependencyUsage(p) => require_path("filePath", &p.file_path),
            ToolRequest::ResolveModulePath(p) => {
                require_path("fromFile", &p.from_file)?;
                require_path("moduleSpecifier", &p.module_specifier)
            }
            ToolRequest::GetIndexStatus(_) | ToolRequest::RebuildIndex(_) => Ok(()),
            ToolRequest::InvalidateFiles(p) => {
                for path in &p.file_paths {
                    require_path("filePaths[]", path)?;
                }
                Ok(())
            }
            ToolRequest::GetSymbolDependents(p) | ToolRequest::GetSymbolCallers(p) => {
                require_path("filePath", &p.file_path)?;
                require_path("symbolName", &p.symbol_name)
            }
            ToolRequest::TraceFunctionExecution(p) => {
                require_path("filePath", &p.file_path)?;
                require_path("symbolName", &p.symbol_name)?;
                check_depth("maxDepth", p.max_depth)
            }
            ToolRequest::AnalyzeBreakingChanges(p) => require_path("filePath", &p.file_path),
            ToolRequest::GetImpactAnalysis(p) => {
                require_path("filePath", &p.file_path)?;
                require_path("symbolName", &p.symbol_name)?;
                check_depth("maxDepth", p.max_depth)
            }
            ToolRequest::AnalyzeFileLogic(p) => require_path("filePath", &p.file_path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleResolution {
    pub from_file: String,
    pub module_specifier: String,
    pub resolved: bool,
    pub resolved_path: Option<String>,
    pub failure_reason: Option<String>,
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|err| ToolError::execution(format!("serialize result: {err}")))
}

/// Runs one request against the spider. `rebuild_index` runs to completion
/// here; the worker loop intercepts it to step the pass instead.
pub fn dispatch(spider: &mut Spider, request: ToolRequest) -> Result<Value, ToolError> {
    match request {
        ToolRequest::AnalyzeDependencies(p) => {
            let path = spider.resolve_path(&p.file_path)?;
            to_json(&spider.analyze(&path)?)
        }
        ToolRequest::CrawlDependencyGraph(p) => {
            let path = spider.resolve_path(&p.entry_file)?;
            let depth = p.max_depth.unwrap_or(spider.config().max_depth);
            to_json(&spider.crawl(&path, depth)?)
        }
        ToolRequest::FindReferencingFiles(p) => {
            let path = spider.resolve_path(&p.file_path)?;
            let entries = spider.find_referencing_files(&path);
            Ok(json!({
                "filePath": util::path_key(&path),
                "count": entries.len(),
                "referencingFiles": entries,
            }))
        }
        ToolRequest::ExpandNode(p) => {
            let path = spider.resolve_path(&p.file_path)?;
            let mut known = HashSet::new();
            for raw in &p.known_files {
                known.insert(util::path_key(&spider.resolve_path(raw)?));
            }
            to_json(&spider.crawl_from(&path, &known, p.extra_depth.unwrap_or(1))?)
        }
        ToolRequest::ParseImports(p) => {
            let path = spider.resolve_path(&p.file_path)?;
            let parsed = spider.parse_file(&path)?;
            Ok(json!({
                "filePath": util::path_key(&path),
                "imports": parsed.imports,
            }))
        }
        ToolRequest::VerifyDependencyUsage(p) => {
            let path = spider.resolve_path(&p.file_path)?;
            let targets = match &p.targets {
                Some(raw) => Some(
                    raw.iter()
                        .map(|t| spider.resolve_path(t))
                        .collect::<Result<Vec<PathBuf>, ToolError>>()?,
                ),
                None => None,
            };
            to_json(&spider.verify_dependency_usage(&path, targets.as_deref())?)
        }
        ToolRequest::ResolveModulePath(p) => {
            let from = spider.resolve_path(&p.from_file)?;
            let resolution = spider.resolver().resolve_detailed(&from, &p.module_specifier)?;
            let (resolved_path, failure_reason) = match resolution {
                Resolution::Resolved { path } => (Some(util::path_key(&path)), None),
                Resolution::Unresolved { reason } => (None, Some(reason)),
            };
            to_json(&ModuleResolution {
                from_file: util::path_key(&from),
                module_specifier: p.module_specifier,
                resolved: resolved_path.is_some(),
                resolved_path,
                failure_reason,
            })
        }
        ToolRequest::GetIndexStatus(_) => Ok(json!({
            "status": spider.status(),
            "warmup": spider.warmup(),
            "cachedFiles": spider.cache().len(),
            "reverseIndexTargets": spider.reverse_index().target_count(),
            "symbolIndexedFiles": spider.symbol_index().indexed_files(),
        })),
        ToolRequest::InvalidateFiles(p) => {
            // All paths must pass before anything is evicted.
            let paths = p
                .file_paths
                .iter()
                .map(|raw| spider.resolve_path(raw))
                .collect::<Result<Vec<_>, _>>()?;
            let mut invalidated = Vec::new();
            let mut not_cached = Vec::new();
            for path in paths {
                let key = util::path_key(&path);
                if spider.invalidate_file(&path) {
                    invalidated.push(key);
                } else {
                    not_cached.push(key);
                }
            }
            Ok(json!({ "invalidated": invalidated, "notCached": not_cached }))
        }
        ToolRequest::RebuildIndex(_) => {
            let summary = spider.build_full_index(|_| {})?;
            spider.record_warmup(&summary);
            to_json(&summary)
        }
        ToolRequest::GetSymbolGraph(p) => {
            let path = spider.resolve_path(&p.file_path)?;
            to_json(&spider.symbol_graph(&path)?)
        }
        ToolRequest::FindUnusedSymbols(p) => {
            let path = spider.resolve_path(&p.file_path)?;
            to_json(&spider.find_unused_symbols(&path)?)
        }
        ToolRequest::GetSymbolDependents(p) => {
            let path = spider.resolve_path(&p.file_path)?;
            to_json(&spider.get_symbol_dependents(&path, &p.symbol_name)?)
        }
        ToolRequest::TraceFunctionExecution(p) => {
            let path = spider.resolve_path(&p.file_path)?;
            let depth = p.max_depth.unwrap_or(spider.config().max_depth);
            to_json(&spider.trace_function_execution(&path, &p.symbol_name, depth)?)
        }
        ToolRequest::GetSymbolCallers(p) => {
            let path = spider.resolve_path(&p.file_path)?;
            to_json(&spider.get_symbol_callers(&path, &p.symbol_name)?)
        }
        ToolRequest::AnalyzeBreakingChanges(p) => {
            let path = spider.resolve_path(&p.file_path)?;
            let report = impact::analyze_breaking_changes(
                spider.parser_mut(),
                &path,
                &p.old_content,
                &p.new_content,
                p.symbol_name.as_deref(),
            )?;
            to_json(&report)
        }
        ToolRequest::GetImpactAnalysis(p) => {
            let path = spider.resolve_path(&p.file_path)?;
            let depth = p.max_depth.unwrap_or(spider.config().max_depth);
            let analysis = impact::get_impact_analysis(
                spider,
                &path,
                &p.symbol_name,
                p.include_transitive.unwrap_or(true),
                depth,
            )?;
            to_json(&analysis)
        }
        ToolRequest::AnalyzeFileLogic(p) => {
            let path = spider.resolve_path(&p.file_path)?;
            to_json(&spider.analyze_file_logic(&path, p.include_external.unwrap_or(false))?)
        }
    }
}

fn schema_value<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    let raw = serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object"}));
    simplify_schema(raw)
}

/// JSON Schema of a tool's params, or `None` for an unknown tool.
pub fn tool_schema(tool: &str) -> Option<Value> {
    let schema = match tool {
        "analyze_dependencies"
        | "find_referencing_files"
        | "parse_imports"
        | "get_symbol_graph"
        | "find_unused_symbols" => schema_value::<FileParams>(),
        "crawl_dependency_graph" => schema_value::<CrawlParams>(),
        "expand_node" => schema_value::<ExpandNodeParams>(),
        "verify_dependency_usage" => schema_value::<VerifyUsageParams>(),
        "resolve_module_path" => schema_value::<ResolveModuleParams>(),
        "get_index_status" | "rebuild_index" => schema_value::<EmptyParams>(),
        "invalidate_files" => schema_value::<InvalidateFilesParams>(),
        "get_symbol_dependents" | "get_symbol_callers" => schema_value::<SymbolParams>(),
        "trace_function_execution" => schema_value::<TraceParams>(),
        "analyze_breaking_changes" => schema_value::<BreakingChangesParams>(),
        "get_impact_analysis" => schema_value::<ImpactParams>(),
        "analyze_file_logic" => schema_value::<FileLogicParams>(),
        _ => return None,
    };
    Some(schema)
}

/// Inlines `$ref`s, collapses `Option<T>` and drops schemars noise.
fn simplify_schema(mut schema: Value) -> Value {
    let definitions = schema
        .get("definitions")
        .cloned()
        .unwrap_or_else(|| json!({}));
    inline_refs(&mut schema, &definitions);
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("definitions");
        obj.remove("title");
    }
    schema
}

fn inline_refs(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(name) = map
                .get("$ref")
                .and_then(|r| r.as_str())
                .and_then(|r| r.strip_prefix("#/definitions/"))
                .map(str::to_string)
            {
                if let Some(def) = definitions.get(name.as_str()) {
                    let mut inlined = def.clone();
                    inline_refs(&mut inlined, definitions);
                    *value = inlined;
                    return;
                }
            }
            // schemars 0.8 renders Option<T> as `type: [T, "null"]`
            if let Some(Value::Array(types)) = map.get("type").cloned() {
                let non_null: Vec<&Value> = types.iter().filter(|t| *t != "null").collect();
                if non_null.len() == 1 {
                    map.insert("type".to_string(), non_null[0].clone());
                }
            }
            for (_, child) in map.iter_mut() {
                inline_refs(child, definitions);
            }
            if map.get("type").and_then(|t| t.as_str()) == Some("integer") {
                map.remove("format");
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                inline_refs(item, definitions);
            }
        }
        _ => {}
    }
}
